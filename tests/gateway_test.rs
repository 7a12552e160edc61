mod common;

use common::{BUCKET, MemoryObjectStore, gateway};
use module_backend::services::storage::{
    BucketPolicy, BucketPresence, Gateway, ListQuery, ObjectRef, OperationScope, RemoveOptions,
    StorageError,
};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::AsyncReadExt;

#[tokio::test]
async fn test_bucket_exists_before_and_after_create() {
    let store = MemoryObjectStore::new();
    let scope = OperationScope::new();
    let session = gateway(&store).session().with_scope(&scope);

    assert!(matches!(session.bucket_exists().await, BucketPresence::Absent));
    session.make_bucket().await.unwrap();
    assert!(session.bucket_exists().await.is_present());

    // Creating again is not an error.
    session.make_bucket().await.unwrap();
    assert_eq!(session.list_buckets().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_bucket_policy_round_trip() {
    let store = MemoryObjectStore::with_bucket(BUCKET);
    let scope = OperationScope::new();
    let session = gateway(&store).session().with_scope(&scope);

    assert!(session.bucket_policy().await.unwrap().is_none());

    let policy = BucketPolicy(r#"{"Version":"2012-10-17","Statement":[]}"#.to_string());
    session.set_bucket_policy(&policy).await.unwrap();
    assert_eq!(session.bucket_policy().await.unwrap(), Some(policy));
}

#[tokio::test]
async fn test_remove_bucket() {
    let store = MemoryObjectStore::with_bucket("scratch");
    let scope = OperationScope::new();
    let session = gateway(&store).session().bucket("scratch").with_scope(&scope);

    session.remove_bucket().await.unwrap();
    assert!(matches!(session.bucket_exists().await, BucketPresence::Absent));
}

#[tokio::test]
async fn test_missing_bucket_or_scope_is_configuration_error() {
    let store = MemoryObjectStore::with_bucket(BUCKET);

    let unbound = Gateway::new(store.clone(), "us-east-1");
    let scope = OperationScope::new();
    let err = unbound
        .session()
        .with_scope(&scope)
        .stat_object("modules/files/a.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Configuration(_)));

    let err = gateway(&store)
        .session()
        .stat_object("modules/files/a.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Configuration(_)));

    // Presigning is local and needs no scope.
    assert!(
        gateway(&store)
            .session()
            .presigned_get("modules/files/a.txt", Duration::from_secs(60))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_sessions_do_not_share_configuration() {
    let store = MemoryObjectStore::with_bucket(BUCKET);
    let gateway = gateway(&store);

    let other = gateway.session().bucket("archive");
    let default = gateway.session();

    assert_eq!(other.bucket_name(), Some("archive"));
    assert_eq!(default.bucket_name(), Some(BUCKET));
}

#[tokio::test]
async fn test_remove_missing_object_is_not_found() {
    let store = MemoryObjectStore::with_bucket(BUCKET);
    let scope = OperationScope::new();
    let session = gateway(&store).session().with_scope(&scope);

    let err = session
        .remove_object("modules/files/ghost.txt", RemoveOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_remove_existing_object() {
    let store = MemoryObjectStore::with_bucket(BUCKET);
    store.insert(BUCKET, "modules/files/a.txt", b"hello text", Some("text/plain"));
    let scope = OperationScope::new();
    let session = gateway(&store).session().with_scope(&scope);

    session
        .remove_object("modules/files/a.txt", RemoveOptions::default())
        .await
        .unwrap();
    assert!(store.object(BUCKET, "modules/files/a.txt").is_none());
}

#[tokio::test]
async fn test_list_empty_bucket() {
    let store = MemoryObjectStore::with_bucket(BUCKET);
    let scope = OperationScope::new();
    let session = gateway(&store).session().with_scope(&scope);

    assert!(session.list_objects(&ListQuery::default()).await.unwrap().is_empty());
    assert!(
        session
            .list_incomplete_uploads(&ListQuery::default())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_list_objects_follows_pages() {
    let store = MemoryObjectStore::with_bucket(BUCKET);
    store.page_size.store(2, Ordering::SeqCst);
    for name in ["a", "b", "c", "d", "e"] {
        store.insert(BUCKET, &format!("modules/files/{}.txt", name), b"x", None);
    }
    store.insert(BUCKET, "other/z.txt", b"x", None);

    let scope = OperationScope::new();
    let session = gateway(&store).session().with_scope(&scope);
    let objects = session
        .list_objects(&ListQuery::recursive("modules/files/"))
        .await
        .unwrap();

    let keys: Vec<_> = objects.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "modules/files/a.txt",
            "modules/files/b.txt",
            "modules/files/c.txt",
            "modules/files/d.txt",
            "modules/files/e.txt",
        ]
    );
}

#[tokio::test]
async fn test_interrupted_listing_returns_partial_results() {
    let store = MemoryObjectStore::with_bucket(BUCKET);
    store.page_size.store(1, Ordering::SeqCst);
    *store.stall_after_pages.lock().unwrap() = Some(2);
    for name in ["a", "b", "c", "d"] {
        store.insert(BUCKET, &format!("modules/files/{}.txt", name), b"x", None);
    }

    let scope = OperationScope::with_timeout(Duration::from_millis(100));
    let session = gateway(&store).session().with_scope(&scope);
    let objects = session
        .list_objects(&ListQuery::recursive("modules/files/"))
        .await
        .unwrap();

    assert_eq!(objects.len(), 2);
}

#[tokio::test]
async fn test_cancelled_scope_stops_listing() {
    let store = MemoryObjectStore::with_bucket(BUCKET);
    store.insert(BUCKET, "modules/files/a.txt", b"x", None);

    let scope = OperationScope::new();
    scope.cancel();
    let session = gateway(&store).session().with_scope(&scope);

    assert!(session.list_objects(&ListQuery::default()).await.unwrap().is_empty());
    assert!(matches!(
        session.stat_object("modules/files/a.txt").await,
        Err(StorageError::Cancelled)
    ));
}

#[tokio::test]
async fn test_remove_incomplete_upload_only_touches_key() {
    let store = MemoryObjectStore::with_bucket(BUCKET);
    store.add_incomplete_upload(BUCKET, "modules/files/big.bin");
    store.add_incomplete_upload(BUCKET, "modules/files/big.bin");
    store.add_incomplete_upload(BUCKET, "modules/files/other.bin");

    let scope = OperationScope::new();
    let session = gateway(&store).session().with_scope(&scope);

    session
        .remove_incomplete_upload("modules/files/big.bin")
        .await
        .unwrap();
    let remaining = session
        .list_incomplete_uploads(&ListQuery::recursive("modules/"))
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key, "modules/files/other.bin");

    // Nothing pending is still fine.
    session
        .remove_incomplete_upload("modules/files/big.bin")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_copy_object() {
    let store = MemoryObjectStore::with_bucket(BUCKET);
    store.add_bucket("archive");
    store.insert(BUCKET, "modules/files/a.txt", b"hello text", Some("text/plain"));

    let scope = OperationScope::new();
    let session = gateway(&store).session().bucket("archive").with_scope(&scope);
    session
        .copy_object(&ObjectRef::new(BUCKET, "modules/files/a.txt"), "2024/a.txt")
        .await
        .unwrap();

    let (data, _) = store.object("archive", "2024/a.txt").unwrap();
    assert_eq!(data, b"hello text");
}

#[tokio::test]
async fn test_put_and_get_object_stream() {
    let store = MemoryObjectStore::with_bucket(BUCKET);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    tokio::fs::write(&path, b"lecture notes").await.unwrap();

    let scope = OperationScope::new();
    let session = gateway(&store).session().with_scope(&scope);
    let file = tokio::fs::File::open(&path).await.unwrap();
    let info = session
        .put_object("modules/files/notes.txt", file, "text/plain")
        .await
        .unwrap();
    assert_eq!(info.size, 13);

    let body = session.get_object("modules/files/notes.txt").await.unwrap();
    assert_eq!(body.content_type.as_deref(), Some("text/plain"));
    let mut reader = body.reader;
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"lecture notes");
}

#[tokio::test]
async fn test_fget_object_writes_destination() {
    let store = MemoryObjectStore::with_bucket(BUCKET);
    store.insert(BUCKET, "modules/files/a.txt", b"hello text", Some("text/plain"));
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("nested").join("a.txt");

    let scope = OperationScope::new();
    let session = gateway(&store).session().with_scope(&scope);
    let info = session.fget_object("modules/files/a.txt", &dest).await.unwrap();

    assert_eq!(info.size, 10);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"hello text");
    assert_eq!(std::fs::read_dir(dest.parent().unwrap()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_fget_missing_object_leaves_destination_untouched() {
    let store = MemoryObjectStore::with_bucket(BUCKET);
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("a.txt");
    tokio::fs::write(&dest, b"previous").await.unwrap();

    let scope = OperationScope::new();
    let session = gateway(&store).session().with_scope(&scope);
    let err = session
        .fget_object("modules/files/a.txt", &dest)
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"previous");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_concurrent_uploads_to_one_key() {
    let store = MemoryObjectStore::with_bucket(BUCKET);
    let dir = tempfile::tempdir().unwrap();
    let first = vec![b'a'; 2048];
    let second = vec![b'b'; 1024];
    let first_path = dir.path().join("first.bin");
    let second_path = dir.path().join("second.bin");
    tokio::fs::write(&first_path, &first).await.unwrap();
    tokio::fs::write(&second_path, &second).await.unwrap();

    let gateway = gateway(&store);
    let upload = |path: std::path::PathBuf| {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            let scope = OperationScope::new();
            let file = tokio::fs::File::open(&path).await.unwrap();
            gateway
                .session()
                .with_scope(&scope)
                .put_object("modules/files/shared.bin", file, "application/octet-stream")
                .await
        })
    };

    let (a, b) = tokio::join!(upload(first_path), upload(second_path));
    a.unwrap().unwrap();
    b.unwrap().unwrap();

    let (data, _) = store.object(BUCKET, "modules/files/shared.bin").unwrap();
    assert!(data == first || data == second);
    assert_eq!(store.object_count(BUCKET), 1);
}

#[tokio::test]
async fn test_presigned_url_resolves_to_published_bytes() {
    use module_backend::services::relay::UrlResolver;

    let store = MemoryObjectStore::with_bucket(BUCKET);
    store.insert(BUCKET, "modules/files/a.txt", b"hello text", Some("text/plain"));
    let resolver = common::MemoryResolver::new(store.clone());

    let session = gateway(&store).session();
    let url = session
        .presigned_get("modules/files/a.txt", Duration::from_secs(900))
        .await
        .unwrap();
    assert_eq!(url.key, "modules/files/a.txt");
    assert_eq!(url.expires_in, Duration::from_secs(900));
    assert_eq!(store.presign_calls.load(Ordering::SeqCst), 1);

    let body = resolver.resolve(&url).await.unwrap();
    let mut reader = body.reader;
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"hello text");
}
