// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that pushes pending tasks to devices.
//!
//! One worker runs per task kind. Each cycle:
//! 1. Opens a [`ProvisioningTx`](fuota_provisioning::ProvisioningTx) and claims
//!    up to `batch_size` eligible tasks (`FOR UPDATE SKIP LOCKED`)
//! 2. Builds the command for each task and hands it to the downlink queue
//! 3. Records every attempt as failed (`retry_count + 1`, `retry_after = now + interval`)
//! 4. Commits, releasing the claimed rows
//!
//! A task only becomes provisioned when the device's answer arrives (see
//! [`AnswerHandler`](crate::answers::AnswerHandler)). A queue error for one
//! task is logged and the task rescheduled; the rest of the batch proceeds.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use fuota_provisioning::{AttemptOutcome, PostgresStore, TaskRepository};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::config::SyncWorkerConfig;
use crate::downlink::{DownlinkEnqueuer, ToDownlinkCommand};
use crate::error::Result;

/// Sync worker for tasks of kind `T`.
pub struct SyncWorker<T> {
    store: PostgresStore,
    enqueuer: Arc<dyn DownlinkEnqueuer>,
    config: SyncWorkerConfig,
    backoff: BackoffPolicy,
    shutdown: Arc<Notify>,
    _kind: PhantomData<fn() -> T>,
}

impl<T> SyncWorker<T>
where
    T: TaskRepository + ToDownlinkCommand,
{
    /// Create a new sync worker.
    pub fn new(
        store: PostgresStore,
        enqueuer: Arc<dyn DownlinkEnqueuer>,
        config: SyncWorkerConfig,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            enqueuer,
            config,
            backoff,
            shutdown: Arc::new(Notify::new()),
            _kind: PhantomData,
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sync loop until the shutdown signal is received.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!(kind = %T::KIND, "Sync worker disabled");
            return;
        }

        info!(
            kind = %T::KIND,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_retries = self.config.max_retries,
            batch_size = self.config.batch_size,
            "Sync worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!(kind = %T::KIND, "Sync worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.sync_once().await {
                        error!(kind = %T::KIND, error = %e, "Sync cycle failed");
                    }
                }
            }
        }

        info!(kind = %T::KIND, "Sync worker stopped");
    }

    /// Run one sync cycle. Returns the number of tasks attempted.
    pub async fn sync_once(&self) -> Result<usize> {
        let mut tx = self.store.begin().await?;
        let tasks: Vec<T> = tx
            .select_pending(self.config.batch_size, self.config.max_retries)
            .await?;

        if tasks.is_empty() {
            tx.commit().await?;
            debug!(kind = %T::KIND, "No pending tasks");
            return Ok(0);
        }

        let now = Utc::now();
        let count = tasks.len();

        for mut task in tasks {
            self.attempt(&task).await;

            let interval = task.retry().retry_interval;
            let outcome = AttemptOutcome::Failed {
                retry_after: self.backoff.retry_after(now, interval)?,
                retry_interval: self.backoff.next(interval),
            };
            tx.record_outcome(&mut task, &outcome).await?;
        }

        tx.commit().await?;
        debug!(kind = %T::KIND, count, "Sync cycle complete");
        Ok(count)
    }

    /// Enqueue the task's command. Failures are logged, never propagated.
    async fn attempt(&self, task: &T) {
        let dev_eui = task.dev_eui();
        let key = task.key();

        let command = match task.to_downlink_command() {
            Ok(command) => command,
            Err(e) => {
                warn!(
                    kind = %T::KIND,
                    dev_eui = %dev_eui,
                    key = %key,
                    error = %e,
                    "Cannot build command, rescheduling"
                );
                return;
            }
        };

        match self.enqueuer.enqueue(dev_eui, &command).await {
            Ok(()) => info!(
                kind = %T::KIND,
                dev_eui = %dev_eui,
                key = %key,
                f_port = command.f_port(),
                retry_count = task.retry().retry_count,
                "{} enqueued",
                command.name()
            ),
            Err(e) => warn!(
                kind = %T::KIND,
                dev_eui = %dev_eui,
                key = %key,
                error = %e,
                "Failed to enqueue {}, rescheduling",
                command.name()
            ),
        }
    }
}
