//! Background writer for store updates that do not need to finish before the
//! caller gets its answer.
//!
//! Jobs are processed one at a time in submission order, so two SMS appended
//! for the same activation land in call order and a release never overtakes
//! an earlier job. Each job goes through the retry executor; when the store
//! stays busy the job is given a few more rounds before the failure is
//! logged and counted.

use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::model::{ActivationId, NewSms, NumberId, TerminalStatuses};
use crate::services::error::{PoolError, PoolResult};
use crate::services::retry::RetryExecutor;
use crate::storage::PoolStore;

const BUSY_ROUNDS: u32 = 3;

#[derive(Debug)]
enum Job {
    ReleaseNumber {
        activation_id: ActivationId,
        number_id: NumberId,
    },
    AppendSms(NewSms),
    Flush(oneshot::Sender<()>),
}

impl Job {
    fn label(&self) -> &'static str {
        match self {
            Job::ReleaseNumber { .. } => "release_number",
            Job::AppendSms(_) => "append_sms",
            Job::Flush(_) => "flush",
        }
    }
}

/// Cloneable submission handle. The worker stops once every handle is
/// dropped and the queue has drained.
#[derive(Debug, Clone)]
pub struct DeferredWriter {
    jobs: mpsc::UnboundedSender<Job>,
}

impl DeferredWriter {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn<S>(
        store: S,
        retry: RetryExecutor,
        terminal: TerminalStatuses,
    ) -> (Self, JoinHandle<()>)
    where
        S: PoolStore,
    {
        let (jobs, queue) = mpsc::unbounded_channel();
        let worker = Worker {
            store,
            retry,
            terminal,
            never_cancelled: CancellationToken::new(),
        };
        let handle = tokio::spawn(worker.run(queue));
        (Self { jobs }, handle)
    }

    pub fn release_number(&self, activation_id: ActivationId, number_id: NumberId) -> PoolResult<()> {
        self.submit(Job::ReleaseNumber {
            activation_id,
            number_id,
        })
    }

    pub fn append_sms(&self, sms: NewSms) -> PoolResult<()> {
        self.submit(Job::AppendSms(sms))
    }

    /// Resolves once every job submitted before this call has been handled.
    pub async fn flush(&self) -> PoolResult<()> {
        let (done, wait) = oneshot::channel();
        self.submit(Job::Flush(done))?;
        wait.await
            .map_err(|_| PoolError::Store("deferred writer stopped".into()))
    }

    fn submit(&self, job: Job) -> PoolResult<()> {
        self.jobs
            .send(job)
            .map_err(|_| PoolError::Store("deferred writer stopped".into()))
    }
}

struct Worker<S> {
    store: S,
    retry: RetryExecutor,
    terminal: TerminalStatuses,
    never_cancelled: CancellationToken,
}

impl<S: PoolStore> Worker<S> {
    async fn run(self, mut queue: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = queue.recv().await {
            let label = job.label();
            match self.handle(job).await {
                Ok(()) => {
                    counter!("pool_deferred_writes_total", "job" => label, "result" => "ok")
                        .increment(1);
                }
                Err(err) => {
                    error!(job = label, error = %err, "deferred write failed permanently");
                    counter!("pool_deferred_writes_total", "job" => label, "result" => "failed")
                        .increment(1);
                }
            }
        }
        debug!("deferred writer drained");
    }

    async fn handle(&self, job: Job) -> PoolResult<()> {
        match job {
            Job::ReleaseNumber {
                activation_id,
                number_id,
            } => {
                let released = self
                    .with_busy_rounds("release_number", || async {
                        self.store
                            .release_number(number_id, activation_id, &self.terminal)
                            .await
                    })
                    .await?;
                if !released {
                    debug!(%activation_id, %number_id, "number still held, release skipped");
                }
                Ok(())
            }
            Job::AppendSms(sms) => {
                let record = self
                    .with_busy_rounds("append_sms", || {
                        let sms = sms.clone();
                        async move { self.store.append_sms(sms).await }
                    })
                    .await?;
                debug!(activation_id = %record.activation_id, sms_id = record.id, "sms stored");
                Ok(())
            }
            Job::Flush(done) => {
                let _ = done.send(());
                Ok(())
            }
        }
    }

    async fn with_busy_rounds<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> PoolResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = crate::storage::StorageResult<T>>,
    {
        let mut round = 1;
        loop {
            match self
                .retry
                .run(operation, &self.never_cancelled, &mut attempt)
                .await
            {
                Err(PoolError::StoreBusy { attempts }) if round < BUSY_ROUNDS => {
                    warn!(operation, round, attempts, "deferred write still busy, requeueing");
                    round += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::retry::RetryPolicy;
    use crate::testing::MemoryStore;
    use chrono::Utc;
    use std::time::Duration;

    fn retry() -> RetryExecutor {
        RetryExecutor::new(
            RetryPolicy::default()
                .with_max_attempts(2)
                .with_base_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn sms_are_appended_in_submission_order() {
        let store = MemoryStore::with_demo_numbers(&[79000000001]);
        let activation = store.open_activation(79000000001);
        let (writer, _handle) = DeferredWriter::spawn(store.clone(), retry(), TerminalStatuses::default());

        for text in ["first", "second", "third"] {
            writer
                .append_sms(NewSms {
                    activation_id: activation,
                    text: text.into(),
                    received_at: Utc::now(),
                })
                .unwrap();
        }
        writer.flush().await.unwrap();

        let texts: Vec<_> = store.sms_texts(activation);
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn busy_store_is_retried_across_rounds() {
        let store = MemoryStore::with_demo_numbers(&[79000000002]);
        let activation = store.open_activation(79000000002);
        store.fail_next_writes(5);
        let (writer, _handle) = DeferredWriter::spawn(store.clone(), retry(), TerminalStatuses::default());

        writer
            .append_sms(NewSms {
                activation_id: activation,
                text: "code 1234".into(),
                received_at: Utc::now(),
            })
            .unwrap();
        writer.flush().await.unwrap();

        assert_eq!(store.sms_texts(activation), vec!["code 1234"]);
    }

    #[tokio::test]
    async fn worker_stops_after_handles_drop() {
        let store = MemoryStore::with_demo_numbers(&[]);
        let (writer, handle) = DeferredWriter::spawn(store, retry(), TerminalStatuses::default());
        drop(writer);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker exits")
            .expect("worker does not panic");
    }
}
