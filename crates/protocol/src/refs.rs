//! Content references and the artifact shapes built around them.
//!
//! A [`ContentRef`] is the SHA-256 digest of the exact byte payload in the
//! canonical form `sha256:<64 lowercase hex>`. Identical bytes always
//! produce the same ref, which is what makes store writes idempotent.

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

use crate::limits;

const REF_PREFIX: &str = "sha256:";

fn ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^sha256:[0-9a-f]{64}$")
            .unwrap_or_else(|_| unreachable!("content ref regex is valid"))
    })
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid content ref {0:?} (expected sha256:<64 lowercase hex>)")]
pub struct InvalidRef(pub String);

/// Opaque content-addressed identifier of a stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
pub struct ContentRef(String);

impl ContentRef {
    /// Digest `bytes` into its canonical ref.
    #[must_use]
    pub fn for_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        use fmt::Write as _;
        let mut out = String::with_capacity(REF_PREFIX.len() + 64);
        out.push_str(REF_PREFIX);
        for byte in digest {
            let _ = write!(out, "{byte:02x}");
        }
        Self(out)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 64 hex characters after the `sha256:` prefix.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.0[REF_PREFIX.len()..]
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentRef {
    type Err = InvalidRef;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if ref_regex().is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidRef(raw.to_string()))
        }
    }
}

impl TryFrom<String> for ContentRef {
    type Error = InvalidRef;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<ContentRef> for String {
    fn from(value: ContentRef) -> Self {
        value.0
    }
}

/// Descriptor of one immutable stored object. The payload itself never
/// travels in this shape; callers page it in through `get_page`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct StoredArtifact {
    #[serde(rename = "ref")]
    pub content_ref: ContentRef,
    /// Payload length in bytes.
    pub size: u64,
    pub mime: String,
    /// First [`limits::PREVIEW_MAX_CHARS`] characters for textual MIME
    /// types, `"..."`-suffixed when truncated. Absent for binary content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    pub created_at_unix_ms: u64,
}

fn default_page() -> u32 {
    1
}

/// Request for one page of a stored payload.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PageRequest {
    #[serde(rename = "ref")]
    pub content_ref: ContentRef,
    /// 1-based page number.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Bytes per page, clamped to
    /// [`limits::MIN_PAGE_SIZE`]..=[`limits::MAX_PAGE_SIZE`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
}

/// One page of a stored payload. `content` is raw bytes, base64 on the
/// JSON wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct PagedContent {
    #[serde(rename = "ref")]
    pub content_ref: ContentRef,
    pub page: u32,
    pub total_pages: u32,
    #[serde(with = "base64_bytes")]
    #[schemars(with = "String")]
    pub content: Vec<u8>,
    pub has_more: bool,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD
            .decode(raw.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Derive the preview for a stored payload: textual MIME types only,
/// truncated to [`limits::PREVIEW_MAX_CHARS`] characters.
#[must_use]
pub fn derive_preview(payload: &[u8], mime: &str) -> Option<String> {
    if !is_textual_mime(mime) {
        return None;
    }
    let text = String::from_utf8_lossy(payload);
    let mut preview: String = text.chars().take(limits::PREVIEW_MAX_CHARS).collect();
    if text.chars().count() > limits::PREVIEW_MAX_CHARS {
        preview.push_str("...");
    }
    Some(preview)
}

#[must_use]
pub fn is_textual_mime(mime: &str) -> bool {
    mime.starts_with("text/") || mime == "application/json" || mime.ends_with("+json")
}
