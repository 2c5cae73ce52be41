//! ExceptionLogger writing reports into a shared file read back through the CLI path.

use exceptional::config::{ExceptionalConfig, WriterConfig};
use exceptional::{
    ExceptionLogger, ExceptionReport, NoopSignal, PayloadCodec, RecordBuffer, ReferenceReader,
    ReportStore, RingError, StackFrame, WriteCoordinator,
};
use std::sync::Arc;
use std::time::Duration;

fn logger_for(buffer: &Arc<RecordBuffer>, compress: bool) -> ExceptionLogger {
    let coordinator =
        WriteCoordinator::spawn(Arc::clone(buffer), NoopSignal, WriterConfig::default()).unwrap();
    ExceptionLogger::new(coordinator, PayloadCodec::new(compress))
}

#[test]
fn test_reports_reach_external_reader() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("reports.ring");

    let buffer = Arc::new(RecordBuffer::create_shared(&path, 8192).unwrap());
    let logger = logger_for(&buffer, true);

    let report = ExceptionReport::new("NullPointerException")
        .with_frame(StackFrame::new("com.example.Service", "handle").at("Service.java", 88))
        .with_cause(ExceptionReport::new("missing config"));
    logger.log(&report).unwrap();
    logger
        .log_error(&RingError::Signal("reader gone".into()))
        .unwrap();

    assert!(logger.coordinator().wait_idle(Duration::from_secs(5)));
    assert_eq!(logger.close().unwrap().written, 2);

    let codec = PayloadCodec::new(true);
    let mut reader = ReferenceReader::open(&path).unwrap();
    let decoded: Vec<_> = reader
        .drain()
        .iter()
        .map(|payload| codec.decode(payload).unwrap())
        .collect();

    assert_eq!(decoded[0], report);
    assert_eq!(
        decoded[1].message.as_deref(),
        Some("Consumer signal failed: reader gone")
    );
}

#[test]
fn test_oversized_report_is_rejected_not_submitted() {
    let buffer = Arc::new(RecordBuffer::with_capacity(1024).unwrap());
    let logger = logger_for(&buffer, false);

    let huge = ExceptionReport::new("y".repeat(70_000));
    let err = logger.log(&huge).unwrap_err();
    assert!(matches!(err, RingError::RecordTooLarge { .. }));
    assert!(err.can_recover());

    let stats = logger.close().unwrap();
    assert_eq!(stats.submitted, 0);
    assert!(buffer.is_empty());
}

#[test]
fn test_codec_follows_payload_config() {
    let mut config = ExceptionalConfig::default();
    assert!(!PayloadCodec::from_config(&config.payload).compresses());
    config.payload.compress = true;
    assert!(PayloadCodec::from_config(&config.payload).compresses());
}

#[test]
fn test_collected_reports_are_stored_and_listed() {
    let temp_dir = tempfile::tempdir().unwrap();
    let ring = temp_dir.path().join("collect.ring");
    let store_path = temp_dir.path().join("reports.jsonl");

    let buffer = Arc::new(RecordBuffer::create_shared(&ring, 4096).unwrap());
    let logger = logger_for(&buffer, false);
    for i in 0..3 {
        logger
            .log(&ExceptionReport::new(format!("failure {i}")))
            .unwrap();
    }
    assert!(logger.coordinator().wait_idle(Duration::from_secs(5)));
    logger.close().unwrap();

    let codec = PayloadCodec::new(false);
    let mut reader = ReferenceReader::open(&ring).unwrap();
    let mut store = ReportStore::open(&store_path).unwrap();
    while let Some(payload) = reader.next_record() {
        store.insert(codec.decode(&payload).unwrap()).unwrap();
    }

    let reopened = ReportStore::open(&store_path).unwrap();
    let ids: Vec<u64> = reopened.list().iter().map(|stored| stored.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(
        reopened.get(2).unwrap().report.message.as_deref(),
        Some("failure 1")
    );
    assert!(reopened.get(4).is_none());
}
