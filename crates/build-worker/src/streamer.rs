//! Per-build log streaming to the control plane.
//!
//! Producers hand lines to [`LogRouter::stream`]; a per-build background
//! task batches them on a 300 ms interval and POSTs one body per log level.
//! Delivery is best-effort telemetry: a failed POST is logged locally and
//! the batch dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use monitoring::metrics::{record_log_batch_dropped, record_log_batch_posted};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const FLUSH_INTERVAL: Duration = Duration::from_millis(300);
const ENTRY_CAPACITY: usize = 100;
const POST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
        }
    }
}

struct LogEntry {
    message: String,
    level: LogLevel,
}

struct StreamerHandle {
    entries: mpsc::Sender<LogEntry>,
    flush_now: mpsc::Sender<()>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Registry of per-build streamers. Cheap to clone; one per process,
/// constructed at the service root and injected where needed.
#[derive(Clone)]
pub struct LogRouter {
    streamers: Arc<Mutex<HashMap<String, StreamerHandle>>>,
    client: reqwest::Client,
    control_api_url: String,
}

#[derive(Clone)]
struct SenderPair {
    entries: mpsc::Sender<LogEntry>,
    flush_now: mpsc::Sender<()>,
}

impl LogRouter {
    pub fn new(control_api_url: &str) -> Self {
        Self {
            streamers: Arc::new(Mutex::new(HashMap::new())),
            client: reqwest::Client::new(),
            control_api_url: control_api_url.to_string(),
        }
    }

    /// Queue a log line for the build. Non-blocking on the fast path; a full
    /// queue forces an immediate flush and then waits for capacity.
    pub async fn stream(&self, build_id: &str, message: &str, level: LogLevel) {
        let pair = self.get_or_create(build_id);
        let entry = LogEntry {
            message: message.to_string(),
            level,
        };

        match pair.entries.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                let _ = pair.flush_now.try_send(());
                if pair.entries.send(entry).await.is_err() {
                    debug!("Log streamer for {} closed, line dropped", build_id);
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Log streamer for {} closed, line dropped", build_id);
            }
        }
    }

    /// Stop the build's streamer: final flush, then remove it from the
    /// registry. Called once from the pipeline's cleanup path.
    pub async fn ensure_flushed(&self, build_id: &str) {
        let handle = self.streamers.lock().unwrap().remove(build_id);

        if let Some(handle) = handle {
            let _ = handle.shutdown.send(());
            drop(handle.entries);
            drop(handle.flush_now);
            let _ = handle.task.await;
        }
    }

    fn get_or_create(&self, build_id: &str) -> SenderPair {
        let mut streamers = self.streamers.lock().unwrap();

        if let Some(handle) = streamers.get(build_id) {
            return SenderPair {
                entries: handle.entries.clone(),
                flush_now: handle.flush_now.clone(),
            };
        }

        let (entries_tx, entries_rx) = mpsc::channel(ENTRY_CAPACITY);
        let (flush_tx, flush_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(flush_loop(
            entries_rx,
            flush_rx,
            shutdown_rx,
            self.client.clone(),
            format!("{}/builds/{}/logs", self.control_api_url, build_id),
        ));

        let pair = SenderPair {
            entries: entries_tx.clone(),
            flush_now: flush_tx.clone(),
        };

        streamers.insert(
            build_id.to_string(),
            StreamerHandle {
                entries: entries_tx,
                flush_now: flush_tx,
                shutdown: shutdown_tx,
                task,
            },
        );

        pair
    }
}

async fn flush_loop(
    mut entries: mpsc::Receiver<LogEntry>,
    mut flush_now: mpsc::Receiver<()>,
    mut shutdown: oneshot::Receiver<()>,
    client: reqwest::Client,
    logs_url: String,
) {
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + FLUSH_INTERVAL, FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                flush(&mut entries, &client, &logs_url).await;
            }
            Some(_) = flush_now.recv() => {
                flush(&mut entries, &client, &logs_url).await;
            }
            _ = &mut shutdown => {
                flush(&mut entries, &client, &logs_url).await;
                return;
            }
        }
    }
}

/// Drain queued entries, group them by level preserving arrival order, and
/// POST one `{logs, level}` body per level.
async fn flush(entries: &mut mpsc::Receiver<LogEntry>, client: &reqwest::Client, logs_url: &str) {
    let mut batch = Vec::new();
    while let Ok(entry) = entries.try_recv() {
        batch.push(entry);
    }

    if batch.is_empty() {
        return;
    }

    for (level, logs) in group_by_level(batch) {
        let payload = serde_json::json!({
            "logs": logs,
            "level": level.as_str(),
        });

        match client
            .post(logs_url)
            .timeout(POST_TIMEOUT)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                record_log_batch_posted();
            }
            Ok(response) => {
                record_log_batch_dropped();
                warn!("Log POST to {} returned {}", logs_url, response.status());
            }
            Err(e) => {
                record_log_batch_dropped();
                warn!("Log POST to {} failed: {}", logs_url, e);
            }
        }
    }
}

/// Concatenate messages per level, keeping arrival order within a level and
/// first-seen order across levels.
fn group_by_level(batch: Vec<LogEntry>) -> Vec<(LogLevel, String)> {
    let mut by_level: Vec<(LogLevel, String)> = Vec::new();
    for entry in batch {
        match by_level.iter_mut().find(|(level, _)| *level == entry.level) {
            Some((_, logs)) => logs.push_str(&entry.message),
            None => by_level.push((entry.level, entry.message)),
        }
    }
    by_level
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_grouping_preserves_arrival_order() {
        let batch = vec![
            LogEntry { message: "a\n".into(), level: LogLevel::Info },
            LogEntry { message: "oops\n".into(), level: LogLevel::Error },
            LogEntry { message: "b\n".into(), level: LogLevel::Info },
            LogEntry { message: "done\n".into(), level: LogLevel::Success },
        ];

        let by_level = group_by_level(batch);

        assert_eq!(by_level.len(), 3);
        assert_eq!(by_level[0], (LogLevel::Info, "a\nb\n".to_string()));
        assert_eq!(by_level[1], (LogLevel::Error, "oops\n".to_string()));
        assert_eq!(by_level[2], (LogLevel::Success, "done\n".to_string()));
    }

    #[test]
    fn empty_batch_yields_no_groups() {
        assert!(group_by_level(Vec::new()).is_empty());
    }

    use std::net::SocketAddr;
    use std::time::Duration;

    type Captured = Arc<Mutex<Vec<(String, String, String)>>>;

    async fn capture_logs(
        axum::extract::State(captured): axum::extract::State<Captured>,
        axum::extract::Path(build_id): axum::extract::Path<String>,
        axum::Json(body): axum::Json<serde_json::Value>,
    ) -> axum::Json<serde_json::Value> {
        captured.lock().unwrap().push((
            build_id,
            body["level"].as_str().unwrap_or_default().to_string(),
            body["logs"].as_str().unwrap_or_default().to_string(),
        ));
        axum::Json(serde_json::json!({ "success": true }))
    }

    async fn start_capture_server() -> (SocketAddr, Captured) {
        let captured: Captured = Arc::default();
        let app = axum::Router::new()
            .route("/builds/{id}/logs", axum::routing::post(capture_logs))
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (addr, captured)
    }

    #[tokio::test]
    async fn batches_arrive_grouped_by_level() {
        let (addr, captured) = start_capture_server().await;
        let router = LogRouter::new(&format!("http://{addr}"));

        router.stream("b1", "one\n", LogLevel::Info).await;
        router.stream("b1", "two\n", LogLevel::Info).await;
        router.stream("b1", "boom\n", LogLevel::Error).await;

        tokio::time::sleep(Duration::from_millis(700)).await;

        let posts = captured.lock().unwrap().clone();
        assert!(posts.contains(&(
            "b1".to_string(),
            "info".to_string(),
            "one\ntwo\n".to_string()
        )));
        assert!(posts.contains(&("b1".to_string(), "error".to_string(), "boom\n".to_string())));

        router.ensure_flushed("b1").await;
    }

    #[tokio::test]
    async fn close_flushes_the_tail_without_waiting_for_a_tick() {
        let (addr, captured) = start_capture_server().await;
        let router = LogRouter::new(&format!("http://{addr}"));

        router.stream("b2", "tail line\n", LogLevel::Info).await;
        router.ensure_flushed("b2").await;

        let posts = captured.lock().unwrap().clone();
        assert_eq!(
            posts,
            vec![(
                "b2".to_string(),
                "info".to_string(),
                "tail line\n".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn builds_stream_to_their_own_endpoint() {
        let (addr, captured) = start_capture_server().await;
        let router = LogRouter::new(&format!("http://{addr}"));

        router.stream("left", "l\n", LogLevel::Info).await;
        router.stream("right", "r\n", LogLevel::Info).await;
        router.ensure_flushed("left").await;
        router.ensure_flushed("right").await;

        let posts = captured.lock().unwrap().clone();
        assert!(posts.contains(&("left".to_string(), "info".to_string(), "l\n".to_string())));
        assert!(posts.contains(&("right".to_string(), "info".to_string(), "r\n".to_string())));
    }
}
