use crate::error::{ContentStoreError, Result};
use crate::paths::{objects_dir, payload_path, sidecar_path, PAYLOAD_EXT, SIDECAR_EXT};
use log::{debug, info, warn};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use toolcore_protocol::{derive_preview, limits, ContentRef, PagedContent, StoredArtifact};

/// Content-addressed artifact store: payloads live on disk under
/// `objects/<hh>/<hex64>.bin` with a JSON metadata sidecar, keyed by the
/// SHA-256 of the exact bytes. Writing the same bytes twice is a no-op.
///
/// Cheap to clone; all clones share the same root and metadata index.
#[derive(Clone)]
pub struct ContentStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    root: PathBuf,
    // Never held across an await.
    index: Mutex<HashMap<ContentRef, StoredArtifact>>,
}

impl ContentStore {
    /// Open (creating if missing) a store rooted at `root`. Re-opening a
    /// root that already holds objects restores the metadata index from
    /// the sidecars; payloads without a sidecar are skipped with a warning.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(objects_dir(&root)).await?;

        let scan_root = root.clone();
        let index = tokio::task::spawn_blocking(move || scan_objects(&scan_root))
            .await
            .map_err(|e| ContentStoreError::Other(format!("store scan task failed: {e}")))??;

        if !index.is_empty() {
            info!("Opened content store at {root:?} ({} artifacts)", index.len());
        }
        Ok(Self {
            inner: Arc::new(StoreInner {
                root,
                index: Mutex::new(index),
            }),
        })
    }

    /// Persist `payload`, returning its descriptor. Idempotent: a second
    /// call with identical bytes returns the original artifact (same
    /// `created_at_unix_ms`) and performs no further I/O.
    pub async fn put(&self, payload: &[u8], mime: &str) -> Result<StoredArtifact> {
        let content_ref = ContentRef::for_bytes(payload);

        let artifact = StoredArtifact {
            content_ref: content_ref.clone(),
            size: payload.len() as u64,
            mime: mime.to_string(),
            preview: derive_preview(payload, mime),
            created_at_unix_ms: unix_now_ms(),
        };

        // Reserve the ref under the lock: racing identical puts all get
        // the first caller's artifact, and exactly one writer touches the
        // disk, so the sidecar always agrees with the index.
        {
            let mut index = lock_index(&self.inner.index);
            match index.entry(content_ref.clone()) {
                Entry::Occupied(existing) => {
                    let existing = existing.get().clone();
                    debug!("put {content_ref}: already stored ({} bytes)", existing.size);
                    return Ok(existing);
                }
                Entry::Vacant(slot) => {
                    slot.insert(artifact.clone());
                }
            }
        }

        // The full payload is hashed before any byte is committed, and
        // both files land via tmp+rename, so a crash can orphan a .tmp or
        // a payload without its sidecar but never a mismatched ref.
        if let Err(e) = self.write_object(&content_ref, payload, &artifact).await {
            lock_index(&self.inner.index).remove(&content_ref);
            return Err(e);
        }

        debug!("put {content_ref}: stored {} bytes ({mime})", artifact.size);
        Ok(artifact)
    }

    async fn write_object(
        &self,
        content_ref: &ContentRef,
        payload: &[u8],
        artifact: &StoredArtifact,
    ) -> Result<()> {
        let payload_file = payload_path(&self.inner.root, content_ref);
        if let Some(parent) = payload_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(&payload_file, payload).await?;

        let sidecar_file = sidecar_path(&self.inner.root, content_ref);
        let sidecar_bytes = serde_json::to_vec_pretty(artifact)?;
        write_atomic(&sidecar_file, &sidecar_bytes).await?;
        Ok(())
    }

    /// Full payload bytes, or `None` for an unknown ref. Absence is never
    /// an error; real I/O failures propagate.
    pub async fn get(&self, content_ref: &ContentRef) -> Result<Option<Vec<u8>>> {
        if self.get_meta(content_ref).is_none() {
            return Ok(None);
        }
        let path = payload_path(&self.inner.root, content_ref);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("payload missing for indexed ref {content_ref} at {path:?}");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Payload decoded as UTF-8. Invalid UTF-8 is an error; absence is
    /// `Ok(None)`.
    pub async fn get_string(&self, content_ref: &ContentRef) -> Result<Option<String>> {
        match self.get(content_ref).await? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes)?)),
            None => Ok(None),
        }
    }

    /// One page of the payload. Pages are 1-based; `page_size` is clamped
    /// to the protocol bounds (default 4096). A page of 0 or past the end
    /// is a [`ContentStoreError::PageOutOfRange`] error, not a clamp.
    pub async fn get_page(
        &self,
        content_ref: &ContentRef,
        page: u32,
        page_size: Option<usize>,
    ) -> Result<Option<PagedContent>> {
        let Some(meta) = self.get_meta(content_ref) else {
            return Ok(None);
        };
        let page_size = limits::clamp_page_size(page_size);
        let total_pages = total_pages(meta.size, page_size);
        if page == 0 || page > total_pages {
            return Err(ContentStoreError::PageOutOfRange { page, total_pages });
        }

        let Some(bytes) = self.get(content_ref).await? else {
            return Ok(None);
        };
        let start = (page as usize - 1).saturating_mul(page_size);
        let end = start.saturating_add(page_size).min(bytes.len());
        let content = bytes.get(start..end).unwrap_or_default().to_vec();

        Ok(Some(PagedContent {
            content_ref: content_ref.clone(),
            page,
            total_pages,
            content,
            has_more: page < total_pages,
        }))
    }

    /// Metadata only; answered from the in-memory index without touching
    /// disk.
    #[must_use]
    pub fn get_meta(&self, content_ref: &ContentRef) -> Option<StoredArtifact> {
        lock_index(&self.inner.index).get(content_ref).cloned()
    }

    /// All stored artifacts. Diagnostics surface; unpaginated by design.
    #[must_use]
    pub fn list(&self) -> Vec<StoredArtifact> {
        lock_index(&self.inner.index).values().cloned().collect()
    }

    /// Sum of stored payload sizes in bytes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        lock_index(&self.inner.index)
            .values()
            .map(|a| a.size)
            .sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock_index(&self.inner.index).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }
}

fn total_pages(size: u64, page_size: usize) -> u32 {
    // Minimum of 1 even for empty payloads.
    let pages = size.div_ceil(page_size as u64).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

fn lock_index(
    index: &Mutex<HashMap<ContentRef, StoredArtifact>>,
) -> std::sync::MutexGuard<'_, HashMap<ContentRef, StoredArtifact>> {
    index.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("bin");
    let tmp = path.with_extension(format!("{ext}.tmp"));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, &path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

fn scan_objects(root: &Path) -> Result<HashMap<ContentRef, StoredArtifact>> {
    let mut index = HashMap::new();
    let objects = objects_dir(root);
    let Ok(shards) = std::fs::read_dir(&objects) else {
        return Ok(index);
    };
    for shard in shards.flatten() {
        if !shard.path().is_dir() {
            continue;
        }
        let Ok(entries) = std::fs::read_dir(shard.path()) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(SIDECAR_EXT) => {}
                Some(PAYLOAD_EXT) => {
                    if !path.with_extension(SIDECAR_EXT).exists() {
                        warn!("payload without sidecar skipped: {path:?}");
                    }
                    continue;
                }
                // Leftover .tmp from an interrupted write, or unrelated file.
                _ => continue,
            }
            let artifact: StoredArtifact = match std::fs::read(&path)
                .map_err(ContentStoreError::from)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(Into::into))
            {
                Ok(artifact) => artifact,
                Err(e) => {
                    warn!("unreadable sidecar skipped: {path:?}: {e}");
                    continue;
                }
            };
            if !path.with_extension(PAYLOAD_EXT).exists() {
                warn!("sidecar without payload skipped: {path:?}");
                continue;
            }
            index.insert(artifact.content_ref.clone(), artifact);
        }
    }
    Ok(index)
}

pub(crate) fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_has_a_floor_of_one() {
        assert_eq!(total_pages(0, 4096), 1);
        assert_eq!(total_pages(1, 4096), 1);
        assert_eq!(total_pages(4096, 4096), 1);
        assert_eq!(total_pages(4097, 4096), 2);
        assert_eq!(total_pages(10_000, 256), 40);
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let temp = tempfile::TempDir::new().expect("tempdir");
        let store = ContentStore::open(temp.path()).await.expect("open store");

        let artifact = store.put(b"hello world", "text/plain").await.expect("put");
        assert_eq!(artifact.size, 11);
        assert_eq!(artifact.preview.as_deref(), Some("hello world"));

        let bytes = store
            .get(&artifact.content_ref)
            .await
            .expect("get")
            .expect("stored payload");
        assert_eq!(bytes, b"hello world");
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_size(), 11);
    }
}
