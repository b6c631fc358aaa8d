//! Transcode job registry.
//!
//! Each accepted transcode request becomes one background task driving a
//! processor through init → processing → deinit. Jobs are registered
//! under an opaque id; discarding aborts the task and sweeps the scratch
//! areas the abort left behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use tokio::task::JoinHandle;
use vodvault_common::{ReqSeq, UserId, VersionId};
use vodvault_storage::AsyncStorage;

use crate::transcode::removal::discard_transcoded;
use crate::transcode::FileProcessor;

struct JobHandle {
    task: JoinHandle<()>,
    done: Arc<AtomicBool>,
    usr_id: UserId,
    req_seq: ReqSeq,
    version: VersionId,
    remote: Arc<dyn AsyncStorage>,
    /// Kept alive for the duration of the job; dropping it removes the
    /// job's scratch directory from disk.
    _scratch: Arc<tempfile::TempDir>,
}

/// Registry of in-flight transcode jobs.
#[derive(Default)]
pub struct TranscodeJobRegistry {
    jobs: DashMap<String, JobHandle>,
}

impl TranscodeJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a job task driving `processor` to completion. Returns the
    /// job id.
    pub fn start(
        &self,
        mut processor: Box<dyn FileProcessor>,
        usr_id: UserId,
        req_seq: ReqSeq,
        version: VersionId,
        remote: Arc<dyn AsyncStorage>,
        scratch: Arc<tempfile::TempDir>,
    ) -> String {
        let job_id = format!("{:016x}", rand::thread_rng().gen::<u64>());
        let done = Arc::new(AtomicBool::new(false));
        let done_flag = done.clone();
        let id_for_log = job_id.clone();

        let task = tokio::spawn(async move {
            let run = async {
                processor.init().await?;
                loop {
                    let state = processor.processing().await?;
                    if state == crate::transcode::ProcessingState::Done {
                        break;
                    }
                }
                Ok::<(), vodvault_common::Error>(())
            };
            match run.await {
                Ok(()) => tracing::info!(job = %id_for_log, "transcode job finished"),
                Err(e) => tracing::warn!(job = %id_for_log, "transcode job failed: {e}"),
            }
            if let Err(e) = processor.deinit().await {
                tracing::warn!(job = %id_for_log, "transcode deinit failed: {e}");
            }
            done_flag.store(true, Ordering::SeqCst);
        });

        self.jobs.insert(
            job_id.clone(),
            JobHandle {
                task,
                done,
                usr_id,
                req_seq,
                version,
                remote,
                _scratch: scratch,
            },
        );
        job_id
    }

    /// True when a job exists and has run to completion.
    pub fn is_done(&self, job_id: &str) -> Option<bool> {
        self.jobs
            .get(job_id)
            .map(|job| job.done.load(Ordering::SeqCst))
    }

    /// Abort a job and sweep the scratch trees its abort may have left.
    /// Unknown job ids are ignored.
    pub fn discard(&self, job_id: &str) {
        let Some((_, job)) = self.jobs.remove(job_id) else {
            return;
        };
        let finished = job.done.load(Ordering::SeqCst);
        job.task.abort();
        if !finished {
            let remote = job.remote;
            let usr_id = job.usr_id;
            let req_seq = job.req_seq;
            let version = job.version;
            tokio::spawn(async move {
                if let Err(e) =
                    discard_transcoded(&remote, usr_id, req_seq, Some(&version), false).await
                {
                    tracing::warn!("scratch sweep after discard failed: {e}");
                }
            });
        }
    }

    /// Drop completed jobs from the registry, returning how many remain.
    pub fn reap(&self) -> usize {
        self.jobs
            .retain(|_, job| !job.done.load(Ordering::SeqCst));
        self.jobs.len()
    }
}
