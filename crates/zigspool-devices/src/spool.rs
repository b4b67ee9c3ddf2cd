//! Check_MK spool artifacts.
//!
//! Rendering is pure: [`render_status`] turns a device into a [`StatusReport`].
//! Persisting goes through a [`StatusSink`]. [`SpoolWriter`] does the file I/O
//! and [`SpoolWorker`] runs it on a background task in submission order, so
//! the last update for a device is always the one left on disk.
//!
//! Artifact layout (`<spool_dir>/<freshness>_<identity>.txt`, with path
//! separators in the identity replaced by `_`):
//!
//! ```text
//! <<<<zigbee2mqtt>>>>
//! <<<local>>>
//! 0 lamp battery=45;20;5;0;100 Zigbee device lamp state is online
//! <<<<>>>>
//! ```

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use zigspool_core::{FreshnessConfig, SpoolError};

use crate::device::ZigbeeDevice;

/// Battery warning level written into the perfdata field.
pub const BATTERY_WARN: u32 = 20;
/// Battery critical level written into the perfdata field.
pub const BATTERY_CRIT: u32 = 5;

/// A rendered artifact, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub identity: String,
    pub freshness_secs: u64,
    pub content: String,
}

impl StatusReport {
    pub fn file_name(&self) -> String {
        format!("{}_{}.txt", self.freshness_secs, file_identity(&self.identity))
    }
}

/// Pipe-joined perfdata, or `None` when the device has nothing to report.
///
/// Battery is reported only once the device declared numeric battery
/// telemetry and sent at least one state payload.
pub fn render_metrics(device: &ZigbeeDevice) -> Option<String> {
    let expose = device.battery_expose()?;
    device.state()?;

    let bound = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
    let metrics = [format!(
        "battery={};{};{};{};{}",
        device.battery(),
        BATTERY_WARN,
        BATTERY_CRIT,
        bound(expose.value_min),
        bound(expose.value_max),
    )];

    Some(metrics.join("|"))
}

/// Render one device as a piggybacked local check.
pub fn render_status(
    device: &ZigbeeDevice,
    piggyback: &str,
    freshness: &FreshnessConfig,
) -> StatusReport {
    let identity = device.identity();
    let availability = device.availability();
    let metrics = render_metrics(device).unwrap_or_else(|| "-".to_string());

    let content = format!(
        "<<<<{piggyback}>>>>\n<<<local>>>\n{code} {identity} {metrics} Zigbee device {identity} state is {availability}\n<<<<>>>>\n",
        code = availability.status_code(),
    );

    StatusReport {
        identity: identity.to_string(),
        freshness_secs: device.freshness_secs(freshness),
        content,
    }
}

/// Destination for rendered artifacts.
///
/// Both calls return immediately; failures are the sink's to log.
pub trait StatusSink: Send + Sync {
    /// Replace the artifact for `report.identity`.
    fn materialize(&self, report: StatusReport);

    /// Remove every artifact for `identity`.
    fn retire(&self, identity: &str);
}

/// Identity as it appears in artifact file names.
///
/// Friendly names may contain `/`; each path separator becomes `_`.
pub fn file_identity(identity: &str) -> Cow<'_, str> {
    if identity.contains(['/', '\\']) {
        Cow::Owned(identity.replace(['/', '\\'], "_"))
    } else {
        Cow::Borrowed(identity)
    }
}

/// Whether `file_name` is an artifact `<digits>_<identity>.txt`.
pub fn is_artifact_for(file_name: &str, identity: &str) -> bool {
    let Some(stem) = file_name.strip_suffix(".txt") else {
        return false;
    };
    match stem.split_once('_') {
        Some((secs, rest)) => {
            !secs.is_empty()
                && secs.bytes().all(|b| b.is_ascii_digit())
                && rest == file_identity(identity)
        }
        None => false,
    }
}

/// Direct file I/O against the spool directory.
#[derive(Debug, Clone)]
pub struct SpoolWriter {
    dir: PathBuf,
}

impl SpoolWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, report: &StatusReport) -> PathBuf {
        self.dir.join(report.file_name())
    }

    /// Existing artifacts for `identity`, whatever freshness they encode.
    pub async fn artifacts_for(&self, identity: &str) -> Result<Vec<PathBuf>, SpoolError> {
        let read_dir_err = |source| SpoolError::ReadDir {
            path: self.dir.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(read_dir_err)?;
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_dir_err)? {
            if let Some(name) = entry.file_name().to_str() {
                if is_artifact_for(name, identity) {
                    found.push(entry.path());
                }
            }
        }
        Ok(found)
    }

    /// Delete every artifact for `identity`. Failures are logged and skipped.
    ///
    /// Returns the number of files removed.
    pub async fn remove_artifacts(&self, identity: &str) -> usize {
        let paths = match self.artifacts_for(identity).await {
            Ok(paths) => paths,
            Err(e) => {
                warn!("{}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(source) => warn!("{}", SpoolError::Delete { path, source }),
            }
        }
        removed
    }

    /// Replace the artifact for `report.identity` and restart its freshness window.
    pub async fn write(&self, report: &StatusReport) -> Result<PathBuf, SpoolError> {
        self.remove_artifacts(&report.identity).await;

        let path = self.path_for(report);
        tokio::fs::write(&path, report.content.as_bytes())
            .await
            .map_err(|source| SpoolError::Write {
                path: path.clone(),
                source,
            })?;

        if let Err(e) = touch(&path).await {
            debug!("Touch of {} failed ({}), reopening", path.display(), e);
            if let Err(source) = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
            {
                return Err(SpoolError::Write { path, source });
            }
        }

        Ok(path)
    }
}

async fn touch(path: &Path) -> std::io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new().write(true).open(&path)?;
        file.set_modified(SystemTime::now())
    })
    .await
    .map_err(std::io::Error::other)?
}

enum SpoolJob {
    Write(StatusReport),
    Retire(String),
    Flush(oneshot::Sender<()>),
}

/// Handle to a background task that applies spool jobs one at a time.
///
/// Submitting never blocks. The task exits once every handle is dropped.
#[derive(Debug, Clone)]
pub struct SpoolWorker {
    tx: mpsc::UnboundedSender<SpoolJob>,
}

impl std::fmt::Debug for SpoolJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write(r) => write!(f, "Write({})", r.file_name()),
            Self::Retire(id) => write!(f, "Retire({})", id),
            Self::Flush(_) => write!(f, "Flush"),
        }
    }
}

impl SpoolWorker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(writer: SpoolWriter) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    SpoolJob::Write(report) => match writer.write(&report).await {
                        Ok(path) => debug!("Wrote spool file {}", path.display()),
                        Err(e) => error!("{}", e),
                    },
                    SpoolJob::Retire(identity) => {
                        let removed = writer.remove_artifacts(&identity).await;
                        debug!("Retired {} spool file(s) for {}", removed, identity);
                    }
                    SpoolJob::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Spool worker stopped");
        });

        (Self { tx }, task)
    }

    /// Wait until every job submitted before this call has been applied.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(SpoolJob::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    fn submit(&self, job: SpoolJob) {
        if let Err(e) = self.tx.send(job) {
            error!("Spool worker is gone, dropping {:?}", e.0);
        }
    }
}

impl StatusSink for SpoolWorker {
    fn materialize(&self, report: StatusReport) {
        self.submit(SpoolJob::Write(report));
    }

    fn retire(&self, identity: &str) {
        self.submit(SpoolJob::Retire(identity.to_string()));
    }
}

/// Sink event recorded by [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Materialized(StatusReport),
    Retired(String),
}

/// In-memory sink that records every call, in order.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    /// Materialized reports, in order.
    pub fn reports(&self) -> Vec<StatusReport> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Materialized(r) => Some(r.clone()),
                SinkEvent::Retired(_) => None,
            })
            .collect()
    }

    /// Retired identities, in order.
    pub fn retired(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Retired(id) => Some(id.clone()),
                SinkEvent::Materialized(_) => None,
            })
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.reports().len()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl StatusSink for MemorySink {
    fn materialize(&self, report: StatusReport) {
        self.events.lock().push(SinkEvent::Materialized(report));
    }

    fn retire(&self, identity: &str) {
        self.events
            .lock()
            .push(SinkEvent::Retired(identity.to_string()));
    }
}
