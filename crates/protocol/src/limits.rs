//! Bounds and clamp helpers shared by the gateway, the artifact store and
//! the task executor. Keeping the numbers in one place means a request
//! validated here is always in range by the time the engine sees it.

use anyhow::Result;

pub const MIN_TIMEOUT_MS: u64 = 1_000;
pub const MAX_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

pub const MIN_PAGE_SIZE: usize = 256;
pub const MAX_PAGE_SIZE: usize = 65_536;
pub const DEFAULT_PAGE_SIZE: usize = 4_096;

/// Serialized outputs above this many bytes are persisted to the artifact
/// store and returned by ref instead of inline.
pub const INLINE_THRESHOLD_BYTES: usize = 4_096;

pub const MAX_TOOL_NAME_CHARS: usize = 100;

/// Previews carry at most this many characters of the payload, plus a
/// `"..."` suffix when the payload was longer.
pub const PREVIEW_MAX_CHARS: usize = 200;

#[must_use]
pub fn clamp_timeout_ms(requested: Option<u64>) -> u64 {
    requested
        .unwrap_or(DEFAULT_TIMEOUT_MS)
        .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
}

#[must_use]
pub fn clamp_page_size(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}

/// Tool names are 1..=100 characters with no surrounding whitespace.
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("tool name must not be empty");
    }
    if name.trim() != name {
        anyhow::bail!("tool name must not have surrounding whitespace");
    }
    let chars = name.chars().count();
    if chars > MAX_TOOL_NAME_CHARS {
        anyhow::bail!("tool name too long ({chars} chars, max {MAX_TOOL_NAME_CHARS})");
    }
    Ok(())
}
