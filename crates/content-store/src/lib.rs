//! # Toolcore Content Store
//!
//! Durable, deduplicated, content-addressed storage of byte payloads.
//!
//! ## Layout
//!
//! ```text
//! <root>/objects/<hh>/<hex64>.bin    payload
//! <root>/objects/<hh>/<hex64>.json   metadata sidecar
//! ```
//!
//! Payloads are keyed by `sha256:<hex>` of the exact bytes, so storing the
//! same content twice costs one physical write and re-opening a root
//! restores the metadata index from the sidecars.
//!
//! ## Example
//!
//! ```no_run
//! use toolcore_content_store::ContentStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = ContentStore::open("/var/lib/toolcore/store").await?;
//!
//!     let artifact = store.put(b"large tool output", "text/plain").await?;
//!     let page = store.get_page(&artifact.content_ref, 1, None).await?;
//!
//!     println!("{} bytes in {} pages", artifact.size, page.unwrap().total_pages);
//!     Ok(())
//! }
//! ```

mod error;
mod paths;
mod store;

pub use error::{ContentStoreError, Result};
pub use paths::{objects_dir, payload_path, sidecar_path};
pub use store::ContentStore;

// Re-export the shapes callers hold on to.
pub use toolcore_protocol::{ContentRef, PagedContent, StoredArtifact};
