use pretty_assertions::assert_eq;
use tempfile::TempDir;
use toolcore_content_store::{ContentRef, ContentStore, ContentStoreError};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test]
async fn put_is_idempotent_per_ref() {
    init_logs();
    let temp = TempDir::new().expect("tempdir");
    let store = ContentStore::open(temp.path()).await.expect("open store");

    let first = store.put(b"same bytes", "text/plain").await.expect("put");
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = store.put(b"same bytes", "text/plain").await.expect("put again");

    assert_eq!(first.content_ref, second.content_ref);
    assert_eq!(first.created_at_unix_ms, second.created_at_unix_ms);
    assert_eq!(store.list().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_identical_puts_agree_on_one_artifact() {
    init_logs();
    let temp = TempDir::new().expect("tempdir");
    let store = ContentStore::open(temp.path()).await.expect("open store");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .put(b"contended payload", "text/plain")
                    .await
                    .expect("put")
            })
        })
        .collect();

    let mut artifacts = Vec::new();
    for handle in handles {
        artifacts.push(handle.await.expect("join put"));
    }
    let first = &artifacts[0];
    for artifact in &artifacts {
        assert_eq!(artifact.content_ref, first.content_ref);
        assert_eq!(artifact.created_at_unix_ms, first.created_at_unix_ms);
    }
    assert_eq!(store.list().len(), 1);

    // The sidecar on disk carries the same timestamp the callers saw.
    let reopened = ContentStore::open(temp.path()).await.expect("reopen store");
    let meta = reopened.get_meta(&first.content_ref).expect("meta restored");
    assert_eq!(meta.created_at_unix_ms, first.created_at_unix_ms);
}

#[tokio::test]
async fn get_reproduces_stored_bytes() {
    init_logs();
    let temp = TempDir::new().expect("tempdir");
    let store = ContentStore::open(temp.path()).await.expect("open store");

    for payload in [&b""[..], b"x", &[0u8, 159, 146, 150], &vec![7u8; 100_000]] {
        let artifact = store.put(payload, "application/octet-stream").await.expect("put");
        let bytes = store
            .get(&artifact.content_ref)
            .await
            .expect("get")
            .expect("payload present");
        assert_eq!(bytes, payload);
        assert_eq!(artifact.size, payload.len() as u64);
        assert_eq!(artifact.content_ref, ContentRef::for_bytes(payload));
    }
}

#[tokio::test]
async fn unknown_refs_are_absent_not_errors() {
    init_logs();
    let temp = TempDir::new().expect("tempdir");
    let store = ContentStore::open(temp.path()).await.expect("open store");

    let unknown = ContentRef::for_bytes(b"never stored");
    assert!(store.get(&unknown).await.expect("get").is_none());
    assert!(store.get_string(&unknown).await.expect("get_string").is_none());
    assert!(store.get_page(&unknown, 1, None).await.expect("get_page").is_none());
    assert!(store.get_meta(&unknown).is_none());
}

#[tokio::test]
async fn get_string_requires_valid_utf8() {
    init_logs();
    let temp = TempDir::new().expect("tempdir");
    let store = ContentStore::open(temp.path()).await.expect("open store");

    let text = store.put("héllo".as_bytes(), "text/plain").await.expect("put");
    assert_eq!(
        store.get_string(&text.content_ref).await.expect("get_string"),
        Some("héllo".to_string())
    );

    let binary = store
        .put(&[0xff, 0xfe, 0xfd], "application/octet-stream")
        .await
        .expect("put");
    let err = store
        .get_string(&binary.content_ref)
        .await
        .expect_err("invalid utf8 should error");
    assert!(matches!(err, ContentStoreError::Utf8(_)));
}

#[tokio::test]
async fn preview_truncates_at_200_chars() {
    init_logs();
    let temp = TempDir::new().expect("tempdir");
    let store = ContentStore::open(temp.path()).await.expect("open store");

    let long = "a".repeat(350);
    let artifact = store.put(long.as_bytes(), "text/plain").await.expect("put");
    let preview = artifact.preview.expect("text payloads get a preview");
    assert_eq!(preview.chars().count(), 203);
    assert!(preview.ends_with("..."));

    let short = "b".repeat(200);
    let artifact = store.put(short.as_bytes(), "application/json").await.expect("put");
    assert_eq!(artifact.preview.as_deref(), Some(short.as_str()));

    let artifact = store
        .put(b"\x00\x01\x02", "application/octet-stream")
        .await
        .expect("put");
    assert!(artifact.preview.is_none());
}

#[tokio::test]
async fn paging_reconstructs_the_payload() {
    init_logs();
    let temp = TempDir::new().expect("tempdir");
    let store = ContentStore::open(temp.path()).await.expect("open store");

    // Deliberately not a multiple of any page size.
    let payload: Vec<u8> = (0..10_007u32).map(|i| (i % 251) as u8).collect();
    let artifact = store.put(&payload, "application/octet-stream").await.expect("put");

    for page_size in [256usize, 1_000, 4_096, 65_536] {
        let first = store
            .get_page(&artifact.content_ref, 1, Some(page_size))
            .await
            .expect("get_page")
            .expect("page present");
        let expected_pages = payload.len().div_ceil(page_size).max(1) as u32;
        assert_eq!(first.total_pages, expected_pages);

        let mut reassembled = Vec::new();
        for page in 1..=first.total_pages {
            let chunk = store
                .get_page(&artifact.content_ref, page, Some(page_size))
                .await
                .expect("get_page")
                .expect("page present");
            assert_eq!(chunk.page, page);
            assert_eq!(chunk.has_more, page < chunk.total_pages);
            reassembled.extend_from_slice(&chunk.content);
        }
        assert_eq!(reassembled, payload, "page_size {page_size}");
    }
}

#[tokio::test]
async fn empty_payload_still_has_one_page() {
    init_logs();
    let temp = TempDir::new().expect("tempdir");
    let store = ContentStore::open(temp.path()).await.expect("open store");

    let artifact = store.put(b"", "text/plain").await.expect("put");
    let page = store
        .get_page(&artifact.content_ref, 1, None)
        .await
        .expect("get_page")
        .expect("page present");
    assert_eq!(page.total_pages, 1);
    assert!(page.content.is_empty());
    assert!(!page.has_more);
}

#[tokio::test]
async fn out_of_range_pages_are_rejected() {
    init_logs();
    let temp = TempDir::new().expect("tempdir");
    let store = ContentStore::open(temp.path()).await.expect("open store");

    let artifact = store.put(&[0u8; 5_000], "application/octet-stream").await.expect("put");

    let err = store
        .get_page(&artifact.content_ref, 0, None)
        .await
        .expect_err("page 0 is out of range");
    assert!(matches!(
        err,
        ContentStoreError::PageOutOfRange { page: 0, total_pages: 2 }
    ));

    let err = store
        .get_page(&artifact.content_ref, 3, None)
        .await
        .expect_err("page past the end is out of range");
    assert!(matches!(
        err,
        ContentStoreError::PageOutOfRange { page: 3, total_pages: 2 }
    ));
}

#[tokio::test]
async fn reopen_restores_the_index() {
    init_logs();
    let temp = TempDir::new().expect("tempdir");

    let first_ref = {
        let store = ContentStore::open(temp.path()).await.expect("open store");
        let artifact = store
            .put(b"durable artifact payload", "text/plain")
            .await
            .expect("put");
        store.put(&[9u8; 9_000], "application/octet-stream").await.expect("put");
        artifact.content_ref
    };

    let reopened = ContentStore::open(temp.path()).await.expect("reopen store");
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.total_size(), 24 + 9_000);

    let meta = reopened.get_meta(&first_ref).expect("meta restored");
    assert_eq!(meta.preview.as_deref(), Some("durable artifact payload"));
    assert_eq!(
        reopened.get_string(&first_ref).await.expect("get_string"),
        Some("durable artifact payload".to_string())
    );
    let page = reopened
        .get_page(&first_ref, 1, Some(256))
        .await
        .expect("get_page")
        .expect("page present");
    assert_eq!(page.content, b"durable artifact payload");
}
