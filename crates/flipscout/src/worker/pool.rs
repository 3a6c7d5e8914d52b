use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};
use tokio::runtime::Runtime;
use tokio::sync::broadcast;

use crate::error::WorkerError;
use crate::pipeline::progress::{BroadcastProgress, NoopProgress, ProgressEvent};
use crate::pipeline::Pipeline;
use crate::worker::job::JobSummary;

/// Anything that can accept a job id for background processing.
pub trait JobDispatcher: Send + Sync {
    /// At-least-once: a job enqueued twice is simply run twice, which the
    /// pipeline tolerates.
    fn enqueue(&self, job_id: &str) -> Result<(), WorkerError>;
}

pub struct WorkerPool {
    job_sender: Sender<String>,
    result_receiver: Receiver<JobSummary>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    /// Kept so the channel stays open while workers hold clones.
    #[allow(dead_code)]
    progress_sender: Option<Arc<broadcast::Sender<ProgressEvent>>>,
}

impl WorkerPool {
    pub fn new(pipeline: Pipeline, worker_count: usize) -> Result<Self, WorkerError> {
        Self::with_progress_sender(pipeline, worker_count, None)
    }

    /// Starts `worker_count` threads, each with its own current-thread tokio
    /// runtime. The pool shares the pipeline's shutdown flag.
    pub fn with_progress_sender(
        pipeline: Pipeline,
        worker_count: usize,
        progress_sender: Option<Arc<broadcast::Sender<ProgressEvent>>>,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be greater than 0".to_string(),
            ));
        }
        let (job_sender, job_receiver) = bounded::<String>(worker_count * 2);
        let (result_sender, result_receiver) = bounded::<JobSummary>(worker_count * 2);
        let shutdown = pipeline.shutdown_flag();

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(WorkerError::Runtime)?;
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let worker_pipeline = pipeline.clone();
            let sender = progress_sender.clone();

            let handle = thread::Builder::new()
                .name(format!("flipscout-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, runtime, job_rx, result_tx, worker_pipeline, sender);
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
            progress_sender,
        })
    }

    pub fn try_recv_result(&self) -> Option<JobSummary> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<JobSummary> {
        self.result_receiver.recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<JobSummary> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    /// Raises the shutdown flag: running jobs stop claiming items and idle
    /// workers exit.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

impl JobDispatcher for WorkerPool {
    fn enqueue(&self, job_id: &str) -> Result<(), WorkerError> {
        if self.is_shutdown() {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(job_id.to_string())
            .map_err(|_| WorkerError::ChannelClosed)
    }
}

fn run_worker(
    worker_id: usize,
    runtime: Runtime,
    job_receiver: Receiver<String>,
    result_sender: Sender<JobSummary>,
    pipeline: Pipeline,
    progress_sender: Option<Arc<broadcast::Sender<ProgressEvent>>>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if pipeline.is_shutdown() {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job_id) => {
                debug!("Worker {} running job {}", worker_id, job_id);

                let result = match progress_sender {
                    Some(ref sender) => {
                        let progress = BroadcastProgress::new(Arc::clone(sender));
                        runtime.block_on(pipeline.run_job(&job_id, &progress))
                    }
                    None => runtime.block_on(pipeline.run_job(&job_id, &NoopProgress)),
                };

                let summary = match result {
                    Ok(report) => JobSummary::completed(report),
                    Err(e) => JobSummary::failure(&job_id, e.to_string()),
                };

                if let Err(e) = result_sender.send(summary) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
