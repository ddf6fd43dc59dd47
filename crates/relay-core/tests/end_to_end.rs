//! End-to-end scenarios driving `App` against an in-memory bus and store,
//! standing in for a connected device on the other end of the subject.

use std::sync::Arc;

use relay_core::{bus::InMemoryBus, config::Config, datastore::InMemoryDataStore, session::SessionKind, App};
use relay_protocol::{encode_payload, msg_type, Continue, Error as FtError, FileInfo, Proto, ProtoMsg};
use tokio::sync::mpsc;

fn test_app() -> Arc<App> {
    Arc::new(App::new(Config::default(), InMemoryBus::new(32), InMemoryDataStore::new()))
}

#[tokio::test]
async fn download_success_streams_file_contents() {
    let app = test_app();
    app.presence.set_connected(None, "dev-1").await.unwrap();

    let subject = relay_core::subject::device_subject(None, "dev-1");
    let bus = app.bus.clone();
    let device_subject = subject.clone();
    tokio::spawn(async move {
        let mut sub = bus.subscribe(&device_subject).await.unwrap();

        let stat_req = sub.recv().await.unwrap();
        assert_eq!(stat_req.msg_type(), msg_type::STAT);
        let sid = stat_req.session_id().to_string();

        let info = FileInfo { path: Some("/etc/hostname".into()), uid: Some(0), gid: Some(0), mode: Some(0o644), size: Some(6) };
        bus.publish(&device_subject, ProtoMsg::new(Proto::FileTransfer, msg_type::FILE_INFO, sid.clone()).with_body(encode_payload(&info).unwrap()))
            .await
            .unwrap();

        let get_req = sub.recv().await.unwrap();
        assert_eq!(get_req.msg_type(), msg_type::GET);

        bus.publish(&device_subject, ProtoMsg::new(Proto::FileTransfer, msg_type::CHUNK, sid.clone()).with_body(b"node1\n".to_vec()))
            .await
            .unwrap();
        bus.publish(&device_subject, ProtoMsg::new(Proto::FileTransfer, msg_type::CHUNK, sid).with_body(Vec::new())).await.unwrap();
    });

    let session_id = app.open_session(None, "alice", "dev-1", SessionKind::FileTransferDownload).await.unwrap();
    let mut download = app.download(None, "dev-1", session_id, "/etc/hostname".into()).await.unwrap();

    assert_eq!(download.info.size, Some(6));
    let chunk = download.body_rx.recv().await.unwrap().unwrap();
    assert_eq!(chunk, bytes::Bytes::from_static(b"node1\n"));
    assert!(download.body_rx.recv().await.is_none());
}

#[tokio::test]
async fn download_stat_error_maps_to_remote_error() {
    let app = test_app();
    app.presence.set_connected(None, "dev-1").await.unwrap();

    let subject = relay_core::subject::device_subject(None, "dev-1");
    let bus = app.bus.clone();
    let device_subject = subject.clone();
    tokio::spawn(async move {
        let mut sub = bus.subscribe(&device_subject).await.unwrap();
        let stat_req = sub.recv().await.unwrap();
        let sid = stat_req.session_id().to_string();
        let err = FtError { message_type: Some("stat".into()), error: Some("no such file".into()) };
        bus.publish(&device_subject, ProtoMsg::new(Proto::FileTransfer, msg_type::ERROR, sid).with_body(encode_payload(&err).unwrap()))
            .await
            .unwrap();
    });

    let session_id = app.open_session(None, "alice", "dev-1", SessionKind::FileTransferDownload).await.unwrap();
    let result = app.download(None, "dev-1", session_id, "/missing".into()).await;
    assert!(matches!(result, Err(relay_core::RelayError::Remote(_))));
}

#[tokio::test]
async fn upload_success_sends_chunked_body() {
    let app = test_app();
    app.presence.set_connected(None, "dev-1").await.unwrap();

    let subject = relay_core::subject::device_subject(None, "dev-1");
    let bus = app.bus.clone();
    let device_subject = subject.clone();
    tokio::spawn(async move {
        let mut sub = bus.subscribe(&device_subject).await.unwrap();
        let put_req = sub.recv().await.unwrap();
        assert_eq!(put_req.msg_type(), msg_type::PUT);
        let sid = put_req.session_id().to_string();

        bus.publish(&device_subject, ProtoMsg::new(Proto::FileTransfer, msg_type::CONTINUE, sid).with_body(encode_payload(&Continue {}).unwrap()))
            .await
            .unwrap();

        loop {
            let frame = sub.recv().await.unwrap();
            if frame.msg_type() == msg_type::CHUNK && frame.body.is_empty() {
                break;
            }
        }
    });

    let (body_tx, body_rx) = mpsc::channel(4);
    body_tx.send(bytes::Bytes::from_static(b"8200 bytes worth of data")).await.unwrap();
    body_tx.send(bytes::Bytes::new()).await.unwrap();

    let session_id = app.open_session(None, "alice", "dev-1", SessionKind::FileTransferUpload).await.unwrap();
    let info = FileInfo { path: Some("/tmp/x".into()), uid: Some(0), gid: Some(0), mode: Some(0o644), size: None };
    app.upload(None, "dev-1", session_id, info, body_rx).await.unwrap();
}

#[tokio::test]
async fn check_update_on_disconnected_device_is_conflict() {
    let app = test_app();
    let err = app.check_update("acme", "dev-1").await.unwrap_err();
    assert!(matches!(err, relay_core::RelayError::DeviceNotFound(_)));
}
