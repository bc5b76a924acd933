// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Watcher Context Module 🕸️
//!
//! Shared state of a running watcher.
use std::sync::Arc;

use tokio::sync::broadcast;

use rosen_watcher_config::WatcherConfig;
use rosen_watcher_utils::metric::Metrics;

/// WatcherContext contains the watcher's configuration, metrics and shutdown signal.
#[derive(Clone)]
pub struct WatcherContext {
    /// The configuration of the watcher.
    pub config: Arc<WatcherConfig>,
    /// Broadcasts a shutdown signal to all running jobs.
    ///
    /// Every job loop holds a receiver and leaves its loop once a `()` is
    /// sent through this sender.
    notify_shutdown: broadcast::Sender<()>,
    /// Represents the metrics for the watcher
    pub metrics: Arc<Metrics>,
}

impl WatcherContext {
    /// Creates a new WatcherContext.
    pub fn new(config: WatcherConfig) -> rosen_watcher_utils::Result<Self> {
        let (notify_shutdown, _) = broadcast::channel(2);
        let metrics = Arc::new(Metrics::new()?);
        Ok(Self {
            config: Arc::new(config),
            notify_shutdown,
            metrics,
        })
    }
    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }
    /// Sends a shutdown signal to all subscribed jobs.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }
}

/// Listens for the watcher shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single value is
/// ever sent. Once a value has been sent via the broadcast channel, the job
/// should shutdown.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received
    shutdown: bool,

    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Returns `true` if the shutdown signal has been received.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        // If the shutdown signal has already been received, then return
        // immediately.
        if self.shutdown {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;

        // Remember that the signal has been received.
        self.shutdown = true;
    }
}
