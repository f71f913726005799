use remora::{
    EngineConfig, ErrorKind, MediaType, OpContext, Protocol, RemoteEngine, ResourceUri, ScanFilter,
    ScanOptions,
};
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;
use tempfile::TempDir;

fn config(dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.cache_dir = dir.join("cache");
    config.credentials.pbkdf2_iterations = 1_000;
    config.pool.maintenance_interval_secs = 1;
    config
}

async fn engine() -> (TempDir, RemoteEngine) {
    let dir = tempfile::tempdir().unwrap();
    let engine = RemoteEngine::new(config(dir.path()), &SecretString::new("master".into()))
        .await
        .unwrap();
    (dir, engine)
}

fn write(path: &Path, bytes: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

#[tokio::test]
async fn scans_a_local_tree() {
    let (dir, engine) = engine().await;
    let media = dir.path().join("media");
    write(&media.join("a.jpg"), b"jpeg");
    write(&media.join("notes.txt"), b"text");
    write(&media.join("trip/b.PNG"), b"png!");
    write(&media.join("trip/deeper/c.mp4"), b"video");

    let root = ResourceUri::local(&media);
    let scanner = engine.scanner(&root).unwrap();
    let opts = ScanOptions::background();

    let images = scanner
        .scan(&root, &ScanFilter::types([MediaType::Image]), &opts)
        .await
        .unwrap();
    let names: Vec<_> = images.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["a.jpg", "b.PNG"]);
    assert!(images.iter().all(|f| f.media_type == MediaType::Image));

    let all = scanner.count(&root, &ScanFilter::default(), &opts).await.unwrap();
    assert_eq!(all, 4);

    let top = scanner
        .scan(&root, &ScanFilter::default().top_level_only(), &opts)
        .await
        .unwrap();
    assert_eq!(top.len(), 2);
    engine.shutdown().await;
}

#[tokio::test]
async fn local_copy_respects_overwrite() {
    let (dir, engine) = engine().await;
    let src = ResourceUri::local(dir.path().join("src.bin"));
    let dst = ResourceUri::local(dir.path().join("out/dst.bin"));
    write(&dir.path().join("src.bin"), b"payload");
    write(&dir.path().join("out/dst.bin"), b"old");

    let err = engine.copy(&src, &dst, false, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AlreadyExists);
    assert_eq!(std::fs::read(dir.path().join("out/dst.bin")).unwrap(), b"old");

    let (sink, stream) = engine.progress_channel();
    assert!(engine.copy(&src, &dst, true, Some(&sink)).await.unwrap());
    assert_eq!(std::fs::read(dir.path().join("out/dst.bin")).unwrap(), b"payload");
    assert!(stream.latest().finished);

    let moved = ResourceUri::local(dir.path().join("moved.bin"));
    assert!(engine.move_file(&src, &moved, false, None).await.unwrap());
    assert!(!dir.path().join("src.bin").exists());
    assert!(dir.path().join("moved.bin").exists());

    assert!(!engine.copy(&moved, &moved, true, None).await.unwrap());
}

#[tokio::test]
async fn edit_round_trip_through_the_cache() {
    let (dir, engine) = engine().await;
    let file = dir.path().join("doc.txt");
    write(&file, b"first draft");
    let uri = ResourceUri::local(&file);
    let ctx = OpContext::interactive();

    let err = engine.commit_edit(&uri, None, &ctx).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    let local = engine.open_for_edit(&uri, &ctx).await.unwrap();
    assert!(local.starts_with(dir.path().join("cache")));
    assert_eq!(std::fs::read(&local).unwrap(), b"first draft");

    std::fs::write(&local, b"second draft").unwrap();
    let written = engine.commit_edit(&uri, None, &ctx).await.unwrap();
    assert_eq!(written, 12);
    assert_eq!(std::fs::read(&file).unwrap(), b"second draft");
    assert!(engine.cache().is_cached(&uri.to_string()).await);
}

#[tokio::test]
async fn local_connection_test_checks_existence() {
    let (dir, engine) = engine().await;
    assert!(engine
        .test_connection(&ResourceUri::local(dir.path()), None)
        .await
        .unwrap());
    assert!(!engine
        .test_connection(&ResourceUri::local(dir.path().join("missing")), None)
        .await
        .unwrap());
}

#[tokio::test]
async fn cloud_resources_are_unsupported() {
    let (_dir, engine) = engine().await;
    let uri = ResourceUri::parse("cloud://drive/abc123").unwrap();
    let err = engine.test_connection(&uri, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unsupported);
    let err = engine.list(&uri, &OpContext::interactive()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unsupported);
}

#[tokio::test]
async fn sftp_to_a_closed_port_is_a_network_error() {
    let (_dir, engine) = engine().await;
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let uri = ResourceUri::parse(&format!("sftp://127.0.0.1:{}/home", port)).unwrap();
    let err = engine.test_connection(&uri, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NetworkUnreachable);
}

#[tokio::test]
async fn smb_without_smbclient_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.smb.smbclient_path = dir.path().join("no-such-smbclient");
    let engine = RemoteEngine::new(config, &SecretString::new("master".into()))
        .await
        .unwrap();

    let uri = ResourceUri::parse("smb://nas/media/photos").unwrap();
    let err = engine.test_connection(&uri, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unsupported);

    let err = engine.list(&uri, &OpContext::interactive()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unsupported);
    let stats = engine.pool_stats().await;
    let smb = stats.iter().find(|(p, _)| *p == Protocol::Smb).unwrap();
    assert_eq!(smb.1.total_sessions, 0);
}

#[tokio::test]
async fn shutdown_leaves_empty_pools() {
    let (_dir, engine) = engine().await;
    engine.shutdown().await;
    let stats = engine.pool_stats().await;
    assert_eq!(stats.len(), 3);
    assert!(stats.iter().all(|(_, s)| s.total_sessions == 0));
    assert!(engine.throttle_stats().iter().all(|g| g.in_use == 0));
    // A second shutdown is harmless.
    engine.shutdown().await;
}

#[tokio::test]
async fn saved_credentials_are_resolved() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    let store = dir.path().join("credentials.json");
    config.credentials.store_path = Some(store.clone());
    config.credentials.default_username = "guest".into();
    let secret = SecretString::new("master".into());

    let engine = RemoteEngine::new(config.clone(), &secret).await.unwrap();
    engine
        .credentials()
        .save("nas", "media", "alice", &SecretString::new("hunter2".into()), Some("HOME"))
        .await
        .unwrap();
    let raw = std::fs::read_to_string(&store).unwrap();
    assert!(!raw.contains("hunter2"));

    // A fresh engine over the same file and master secret decrypts it.
    let engine = RemoteEngine::new(config, &secret).await.unwrap();
    let creds = engine.credentials().resolve("nas", "media", None).await.unwrap();
    assert_eq!(creds.username, "alice");
    assert_eq!(creds.domain.as_deref(), Some("HOME"));
    assert_eq!(creds.password.as_ref().unwrap().expose_secret(), "hunter2");

    let fallback = engine.credentials().resolve("other", "share", None).await.unwrap();
    assert_eq!(fallback.username, "guest");
    assert!(!fallback.has_password());
}
