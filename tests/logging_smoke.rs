mod common;

use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use common::seed_event_store;
use supplier_risk::{
    log_app_start, log_inputs_selected, run_pipeline, FeatureConfig, LoggingConfig,
    PipelineConfig,
};
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

#[test]
fn pipeline_run_emits_stage_events() {
    let dir = tempfile::tempdir().expect("temp dir");
    seed_event_store(dir.path());
    let cfg = PipelineConfig {
        data_root: dir.path().to_path_buf(),
        store_path: dir.path().join("features.sqlite"),
        csv_export: None,
        features: FeatureConfig::default(),
    };

    let logs = capture_logs(Level::INFO, || {
        run_pipeline(&cfg).expect("pipeline runs");
    });

    for event in [
        "pipeline.run.start",
        "events.load.finish",
        "align.finish",
        "features.build.finish",
        "split.fallback.applied",
        "split.finish",
        "store.write.finish",
        "pipeline.run.finish",
    ] {
        assert!(
            logs.contains(&format!("\"event\":\"{event}\"")),
            "missing {event} in {logs}"
        );
    }
    assert!(!logs.contains("\"event\":\"events.aggregate.orders\""));
}

#[test]
fn aggregation_details_are_logged_at_debug() {
    let dir = tempfile::tempdir().expect("temp dir");
    seed_event_store(dir.path());
    let cfg = PipelineConfig {
        data_root: dir.path().to_path_buf(),
        store_path: dir.path().join("features.sqlite"),
        csv_export: None,
        features: FeatureConfig::default(),
    };

    let logs = capture_logs(Level::DEBUG, || {
        run_pipeline(&cfg).expect("pipeline runs");
    });

    assert!(logs.contains("\"event\":\"events.aggregate.orders\""));
    assert!(logs.contains("\"event\":\"events.aggregate.deliveries\""));
}

#[test]
fn cli_lifecycle_helpers_emit_baseline_events() {
    let logs = capture_logs(Level::INFO, || {
        let cfg = LoggingConfig::default();
        log_app_start(&cfg);
        log_inputs_selected(Path::new("data"), Path::new("data/features.sqlite"), None);
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"event\":\"inputs.selected\""));
}
