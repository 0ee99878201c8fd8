use std::path::{Path, PathBuf};
use toolcore_protocol::ContentRef;

pub const OBJECTS_DIR_NAME: &str = "objects";

pub const PAYLOAD_EXT: &str = "bin";
pub const SIDECAR_EXT: &str = "json";

/// Shard directory for a ref: the first two hex chars, which keeps any
/// single directory to at most 256 children.
#[must_use]
pub fn shard_dir(content_ref: &ContentRef) -> &str {
    content_ref.hex().get(0..2).unwrap_or("00")
}

#[must_use]
pub fn objects_dir(root: &Path) -> PathBuf {
    root.join(OBJECTS_DIR_NAME)
}

/// Payload location: `objects/<hh>/<hex64>.bin`.
#[must_use]
pub fn payload_path(root: &Path, content_ref: &ContentRef) -> PathBuf {
    objects_dir(root)
        .join(shard_dir(content_ref))
        .join(format!("{}.{PAYLOAD_EXT}", content_ref.hex()))
}

/// Metadata sidecar location: `objects/<hh>/<hex64>.json`.
#[must_use]
pub fn sidecar_path(root: &Path, content_ref: &ContentRef) -> PathBuf {
    objects_dir(root)
        .join(shard_dir(content_ref))
        .join(format!("{}.{SIDECAR_EXT}", content_ref.hex()))
}
