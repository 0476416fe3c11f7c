//! Public API capture tests against the in-memory backend

use futures::StreamExt;
use std::time::Duration;
use syncml_viewer::backends::MemoryBackend;
use syncml_viewer::{CaptureConfig, CaptureError, CaptureState, ChannelSink, SyncMlViewer};
use tracing::info;

const TIMEOUT: Duration = Duration::from_secs(5);

fn payload(xml: &str) -> Vec<u8> {
    let mut data = b"\x02\x00\x00\x00".to_vec();
    data.extend_from_slice(xml.as_bytes());
    data.push(0);
    data
}

#[tokio::test]
async fn yaml_configured_capture_streams_records() {
    let _ = tracing_subscriber::fmt::try_init();

    let config = CaptureConfig::from_yaml_str(
        r#"
session_name: MdmTrace
record_separator: "\n---\n"
schema:
  version: 1
  providers:
    - name: OmaDmClient
      id: "{0EC685CD-64E4-4375-92AD-4086B6AF5F1D}"
  events: [OmaDmSyncmlVerboseTrace]
"#,
    )
    .unwrap();

    let backend = MemoryBackend::new();
    let controller = SyncMlViewer::controller(backend.clone(), config).unwrap();
    let (sink, mut records) = ChannelSink::new();
    let handle = controller.start(sink).await.unwrap();
    assert_eq!(handle.session_name(), "MdmTrace");

    // Only the configured event name is recognized.
    backend.emit("MdmTrace", "OmaDmClientExeStart", payload("<SyncML><A/></SyncML>"));
    backend.emit("MdmTrace", "OmaDmSyncmlVerboseTrace", payload("<SyncML><B>1</B></SyncML>"));

    let record = tokio::time::timeout(TIMEOUT, records.next()).await.unwrap().unwrap();
    info!("Received record: {:?}", record);
    assert_eq!(record, "<SyncML>\n  <B>1</B>\n</SyncML>\n---\n");

    let summary = handle.stop().await.unwrap();
    assert_eq!(summary.stats.ignored, 1);
    assert_eq!(summary.stats.rendered, 1);
    assert_eq!(controller.state(), CaptureState::Idle);
}

#[tokio::test]
async fn configured_session_name_is_exclusive() {
    let config = CaptureConfig::default().with_session_name("Exclusive");
    let backend = MemoryBackend::new();

    let first = SyncMlViewer::controller(backend.clone(), config.clone()).unwrap();
    let second = SyncMlViewer::controller(backend.clone(), config).unwrap();

    let (sink, _records) = ChannelSink::new();
    let handle = first.start(sink).await.unwrap();

    let (sink, _records) = ChannelSink::new();
    let err = second.start(sink).await.err().unwrap();
    assert!(matches!(err, CaptureError::NameInUse { .. }));
    assert!(!err.is_retryable());

    handle.stop().await.unwrap();
    assert!(backend.active_sessions().is_empty());
}
