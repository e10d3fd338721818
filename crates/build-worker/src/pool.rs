//! Bounded worker pool executing build jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::pipeline::{self, BuildJob, WorkerContext};

const QUEUE_CAPACITY: usize = 100;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Handle used by HTTP handlers to enqueue jobs. Submission awaits channel
/// capacity when the queue is full; that backpressure is intentional.
#[derive(Clone)]
pub struct JobSubmitter {
    tx: mpsc::Sender<BuildJob>,
}

impl JobSubmitter {
    pub async fn submit(&self, job: BuildJob) -> std::result::Result<(), BuildJob> {
        self.tx.send(job).await.map_err(|e| e.0)
    }
}

/// Fixed pool of `workers` tasks sharing one bounded job queue. Each worker
/// processes a job to completion before taking another.
pub struct BuilderPool {
    tx: mpsc::Sender<BuildJob>,
    tasks: JoinSet<()>,
}

impl BuilderPool {
    pub fn start(workers: usize, ctx: Arc<WorkerContext>) -> Self {
        let (tx, rx) = mpsc::channel::<BuildJob>(QUEUE_CAPACITY);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut tasks = JoinSet::new();
        for id in 0..workers {
            let rx = Arc::clone(&rx);
            let ctx = Arc::clone(&ctx);
            tasks.spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => {
                            info!("[worker {}] Processing build {}", id, job.build_id);
                            pipeline::execute_build(&ctx, job).await;
                        }
                        None => break,
                    }
                }
                debug!("[worker {}] Stopped", id);
            });
        }

        info!("Started {} build workers", workers);
        Self { tx, tasks }
    }

    pub fn submitter(&self) -> JobSubmitter {
        JobSubmitter {
            tx: self.tx.clone(),
        }
    }

    /// Stop accepting jobs and wait for in-flight builds, aborting whatever
    /// is still running after the grace period.
    pub async fn shutdown(mut self) {
        drop(self.tx);

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "Builds still running after {:?}; aborting workers",
                SHUTDOWN_GRACE
            );
            self.tasks.shutdown().await;
        }
    }
}
