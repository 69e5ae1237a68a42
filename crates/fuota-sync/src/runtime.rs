// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for fuota-sync.
//!
//! [`SyncRuntime`] runs the three sync workers inside an existing tokio
//! application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fuota_provisioning::{PostgresStore, StoreConfig};
//! use fuota_sync::{SyncConfig, SyncRuntime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = PostgresStore::connect(&StoreConfig::from_env()?).await?;
//!     let enqueuer = Arc::new(MyNetworkServerQueue::new());
//!
//!     let runtime = SyncRuntime::builder()
//!         .store(store)
//!         .enqueuer(enqueuer)
//!         .config(SyncConfig::from_env()?)
//!         .build()?
//!         .start();
//!
//!     // ... feed device answers to runtime.answer_handler() ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use fuota_provisioning::{
    PostgresStore, RemoteFragmentationSession, RemoteMulticastClassCSession, RemoteMulticastSetup,
    TaskRepository,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::answers::AnswerHandler;
use crate::config::SyncConfig;
use crate::downlink::{DownlinkEnqueuer, ToDownlinkCommand};
use crate::worker::SyncWorker;

/// Builder for creating a [`SyncRuntime`].
#[derive(Default)]
pub struct SyncRuntimeBuilder {
    store: Option<PostgresStore>,
    enqueuer: Option<Arc<dyn DownlinkEnqueuer>>,
    config: SyncConfig,
}

impl SyncRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task store (required).
    pub fn store(mut self, store: PostgresStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the downlink queue (required).
    pub fn enqueuer(mut self, enqueuer: Arc<dyn DownlinkEnqueuer>) -> Self {
        self.enqueuer = Some(enqueuer);
        self
    }

    /// Set the worker configuration.
    ///
    /// Default: [`SyncConfig::default()`]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<SyncRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let enqueuer = self
            .enqueuer
            .ok_or_else(|| anyhow::anyhow!("enqueuer is required"))?;

        Ok(SyncRuntimeConfig {
            store,
            enqueuer,
            config: self.config,
        })
    }
}

/// Configuration for a [`SyncRuntime`].
pub struct SyncRuntimeConfig {
    store: PostgresStore,
    enqueuer: Arc<dyn DownlinkEnqueuer>,
    config: SyncConfig,
}

impl SyncRuntimeConfig {
    /// Start the runtime, spawning one task per sync worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> SyncRuntime {
        let multicast_setup = self.spawn::<RemoteMulticastSetup>();
        let fragmentation_session = self.spawn::<RemoteFragmentationSession>();
        let class_c_session = self.spawn::<RemoteMulticastClassCSession>();

        info!(
            multicast_setup = self.config.multicast_setup.enabled,
            fragmentation_session = self.config.fragmentation_session.enabled,
            class_c_session = self.config.class_c_session.enabled,
            "SyncRuntime started"
        );

        SyncRuntime {
            workers: vec![multicast_setup, fragmentation_session, class_c_session],
            answers: AnswerHandler::new(self.store),
        }
    }

    fn spawn<T>(&self) -> WorkerHandle
    where
        T: TaskRepository + ToDownlinkCommand + 'static,
    {
        let worker = SyncWorker::<T>::new(
            self.store.clone(),
            self.enqueuer.clone(),
            self.config.worker(T::KIND).clone(),
            self.config.backoff,
        );
        let enabled = self.config.worker(T::KIND).enabled;
        let shutdown = worker.shutdown_handle();
        let handle = tokio::spawn(async move {
            worker.run().await;
        });

        WorkerHandle {
            name: T::KIND.to_string(),
            enabled,
            shutdown,
            handle,
        }
    }
}

struct WorkerHandle {
    name: String,
    enabled: bool,
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Running sync workers embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct SyncRuntime {
    workers: Vec<WorkerHandle>,
    answers: AnswerHandler,
}

impl SyncRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> SyncRuntimeBuilder {
        SyncRuntimeBuilder::new()
    }

    /// Handler for device answers, sharing the runtime's store.
    pub fn answer_handler(&self) -> &AnswerHandler {
        &self.answers
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals every worker to stop, then waits for them. A cycle in progress
    /// finishes before its worker exits.
    pub async fn shutdown(self) -> Result<()> {
        info!("SyncRuntime shutting down...");

        for worker in &self.workers {
            worker.shutdown.notify_one();
        }

        let mut panicked = Vec::new();
        for worker in self.workers {
            if let Err(e) = worker.handle.await {
                error!("{} sync worker task panicked: {}", worker.name, e);
                panicked.push(worker.name);
            }
        }

        if panicked.is_empty() {
            info!("SyncRuntime shutdown complete");
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "sync worker tasks panicked: {}",
                panicked.join(", ")
            ))
        }
    }

    /// Check if every enabled worker task is still running.
    ///
    /// Disabled workers exit on start and are not considered.
    pub fn is_running(&self) -> bool {
        self.workers
            .iter()
            .filter(|w| w.enabled)
            .all(|w| !w.handle.is_finished())
    }
}
