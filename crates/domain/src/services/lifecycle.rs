//! Activation lifecycle after allocation: status updates, SMS delivery and
//! read access.

use chrono::Utc;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::model::{
    ActivationId, ActivationRecord, FinishStampPolicy, NewSms, SmsRecord, TerminalStatuses,
};
use crate::services::error::{PoolError, PoolResult};
use crate::services::retry::RetryExecutor;
use crate::services::writer::DeferredWriter;
use crate::storage::PoolStore;

#[derive(Clone)]
pub struct LifecycleManager<S> {
    store: S,
    retry: RetryExecutor,
    writer: DeferredWriter,
    terminal: TerminalStatuses,
    stamp: FinishStampPolicy,
}

impl<S: PoolStore> LifecycleManager<S> {
    pub fn new(
        store: S,
        retry: RetryExecutor,
        writer: DeferredWriter,
        terminal: TerminalStatuses,
        stamp: FinishStampPolicy,
    ) -> Self {
        Self {
            store,
            retry,
            writer,
            terminal,
            stamp,
        }
    }

    pub fn terminal_statuses(&self) -> &TerminalStatuses {
        &self.terminal
    }

    /// Records `status` for the activation.
    ///
    /// `finished_at` is written once and never moved afterwards. Every
    /// terminal update queues a release of the number, so repeating one
    /// retries a release that was lost earlier; the store refuses the
    /// release while another open activation holds the number. The release
    /// itself may land after this call returns. Concurrent updates to the
    /// same activation resolve to whichever write the store applies last.
    pub async fn finish(
        &self,
        id: ActivationId,
        status: i32,
        cancel: &CancellationToken,
    ) -> PoolResult<ActivationRecord> {
        let terminal = self.terminal.contains(status);
        let stamp = match self.stamp {
            FinishStampPolicy::TerminalOnly => terminal,
            FinishStampPolicy::Always => true,
        };
        let now = Utc::now();

        let change = self
            .retry
            .run("finish_activation", cancel, || {
                self.store
                    .update_status(id, status, stamp.then_some(now))
            })
            .await
            .and_then(|change| change.ok_or(PoolError::ActivationNotFound(id)))
            .inspect_err(|err| {
                counter!("pool_finish_total", "result" => err.kind().as_ref().to_owned())
                    .increment(1);
            })?;
        counter!("pool_finish_total", "result" => "success").increment(1);

        if terminal {
            let number_id = change.activation.number_id;
            if let Err(err) = self.writer.release_number(id, number_id) {
                // The status change is already durable; only the release is lost.
                error!(activation_id = %id, %number_id, error = %err, "could not queue number release");
            }
            if !self.terminal.contains(change.previous_status) {
                info!(activation_id = %id, status, %number_id, "activation finished");
            }
        }

        Ok(change.activation)
    }

    /// Accepts an SMS for an existing activation. The text is persisted in
    /// the background; per activation, messages are stored in call order.
    pub async fn record_sms(
        &self,
        id: ActivationId,
        text: String,
        cancel: &CancellationToken,
    ) -> PoolResult<()> {
        let accepted = self.accept_sms(id, text, cancel).await;
        let result = match &accepted {
            Ok(()) => "success".to_owned(),
            Err(err) => err.kind().as_ref().to_owned(),
        };
        counter!("pool_sms_total", "result" => result).increment(1);
        accepted
    }

    async fn accept_sms(
        &self,
        id: ActivationId,
        text: String,
        cancel: &CancellationToken,
    ) -> PoolResult<()> {
        let exists = self
            .retry
            .run("check_activation", cancel, || self.store.activation_exists(id))
            .await?;
        if !exists {
            return Err(PoolError::ActivationNotFound(id));
        }

        self.writer.append_sms(NewSms {
            activation_id: id,
            text,
            received_at: Utc::now(),
        })
    }

    /// Messages stored so far, oldest first. Queued messages that the writer
    /// has not persisted yet are not included.
    pub async fn list_sms(
        &self,
        id: ActivationId,
        cancel: &CancellationToken,
    ) -> PoolResult<Vec<SmsRecord>> {
        self.retry
            .run("list_sms", cancel, || self.store.list_sms(id))
            .await
    }

    pub async fn activation(
        &self,
        id: ActivationId,
        cancel: &CancellationToken,
    ) -> PoolResult<ActivationRecord> {
        self.retry
            .run("find_activation", cancel, || self.store.find_activation(id))
            .await?
            .ok_or(PoolError::ActivationNotFound(id))
    }

    /// Waits for every queued write submitted so far.
    pub async fn flush(&self) -> PoolResult<()> {
        self.writer.flush().await
    }
}
