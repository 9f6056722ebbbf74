//! Client/server round trips over a real Unix socket.

use std::sync::Arc;

use libcsi::backend::MemoryBackend;
use libcsi::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

fn start_server(dir: &std::path::Path, backend: Arc<MemoryBackend>) -> std::path::PathBuf {
    let path = dir.join("csi.sock");
    let server = CsiServer::bind(&path, backend).expect("bind");
    tokio::spawn(async move {
        let _ = server.serve().await;
    });
    path
}

fn request(name: &str) -> CreateVolumeRequest {
    CreateVolumeRequest {
        name: name.into(),
        capacity_bytes: 10 * 1024 * 1024,
        volume_capabilities: vec![VolumeCapability::default()],
        ..Default::default()
    }
}

#[tokio::test]
async fn identity_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let path = start_server(tmp.path(), Arc::new(MemoryBackend::new().with_topology()));
    let client = CsiClient::new(&path);

    assert!(client.probe().await.unwrap());
    let info = client.get_plugin_info().await.unwrap();
    assert_eq!(info.name, "rk8s.memory.csi");
    let caps = client.get_plugin_capabilities().await.unwrap();
    assert_eq!(
        caps,
        vec![
            PluginCapability::ControllerService,
            PluginCapability::VolumeAccessibilityConstraints
        ]
    );
}

#[tokio::test]
async fn create_and_delete_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let path = start_server(tmp.path(), Arc::clone(&backend));
    let client = CsiClient::new(&path);

    let vol = client.create_volume(request("pvc-1")).await.unwrap();
    assert!(backend.contains(&vol.volume_id));
    assert_eq!(vol.capacity_bytes, 10 * 1024 * 1024);

    let again = client.create_volume(request("pvc-1")).await.unwrap();
    assert_eq!(again.volume_id, vol.volume_id);
    assert_eq!(backend.volume_count(), 1);

    client.delete_volume(&vol.volume_id).await.unwrap();
    assert_eq!(backend.volume_count(), 0);
}

#[tokio::test]
async fn plugin_errors_cross_the_socket() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let path = start_server(tmp.path(), Arc::clone(&backend));
    let client = CsiClient::new(&path);

    backend.inject_error(CsiError::ResourceExhausted("pool gold is full".into()));
    let err = client.create_volume(request("pvc-2")).await.unwrap_err();
    assert_eq!(err, CsiError::ResourceExhausted("pool gold is full".into()));

    let err = client.delete_volume(&"missing".into()).await.unwrap_err();
    assert_eq!(err, CsiError::NotFound("missing".into()));
}

#[tokio::test]
async fn concurrent_requests_share_one_client() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let path = start_server(tmp.path(), Arc::clone(&backend));
    let client = Arc::new(CsiClient::new(&path));

    let mut handles = Vec::new();
    for i in 0..16 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            client.create_volume(request(&format!("pvc-{i}"))).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(backend.volume_count(), 16);
}

#[tokio::test]
async fn response_variant_sent_as_request_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let path = start_server(tmp.path(), Arc::new(MemoryBackend::new()));

    let response = CsiClient::new(&path)
        .request(&CsiMessage::Ok)
        .await
        .unwrap();
    assert!(matches!(
        response,
        CsiMessage::Error(CsiError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn malformed_request_gets_invalid_argument() {
    let tmp = tempfile::tempdir().unwrap();
    let path = start_server(tmp.path(), Arc::new(MemoryBackend::new()));

    let mut stream = UnixStream::connect(&path).await.unwrap();
    stream.write_all(b"{not json").await.unwrap();
    stream.shutdown().await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();

    let response: CsiMessage = serde_json::from_slice(&buf).unwrap();
    assert!(matches!(
        response,
        CsiMessage::Error(CsiError::InvalidArgument(_))
    ));
}
