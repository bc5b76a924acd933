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

//! Periodic job runner.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use rosen_watcher_utils::metric::Metrics;
use rosen_watcher_utils::probe;

use crate::context::{Shutdown, WatcherContext};

/// Runs one job on a fixed interval until the watcher shuts down.
///
/// A tick that fires while the previous run is still in flight is skipped.
/// Every run starts after a random delay of up to `max_jitter` milliseconds.
#[derive(Debug)]
pub struct JobRunner {
    name: &'static str,
    period: Duration,
    max_jitter: u64,
    in_flight: Arc<Mutex<()>>,
    metrics: Arc<Metrics>,
    shutdown: Shutdown,
}

impl JobRunner {
    /// Creates a runner for the job `name`, ticking every `period`.
    pub fn new(
        name: &'static str,
        period: Duration,
        ctx: &WatcherContext,
    ) -> Self {
        Self {
            name,
            period,
            max_jitter: ctx.config.scheduler.max_jitter,
            in_flight: Arc::new(Mutex::new(())),
            metrics: ctx.metrics.clone(),
            shutdown: ctx.shutdown_signal(),
        }
    }

    /// Overrides the jitter taken from the config, in milliseconds.
    pub fn with_max_jitter(mut self, max_jitter: u64) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Spawns the job loop on the runtime.
    ///
    /// The returned handle completes once the shutdown signal is received.
    /// A run that is in flight at that moment is left to finish on its own.
    pub fn spawn<F, Fut>(self, job: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = rosen_watcher_utils::Result<()>> + Send + 'static,
    {
        tokio::task::spawn(self.run(Arc::new(job)))
    }

    async fn run<F, Fut>(mut self, job: Arc<F>)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = rosen_watcher_utils::Result<()>> + Send + 'static,
    {
        let name = self.name;
        tracing::debug!(job = name, period = ?self.period, "Job started");
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        while !self.shutdown.is_shutdown() {
            tokio::select! {
                _ = interval.tick() => {},
                _ = self.shutdown.recv() => continue,
            }
            let Ok(guard) = self.in_flight.clone().try_lock_owned() else {
                self.metrics.job_overlaps_skipped.inc();
                tracing::warn!(job = name, "Previous run still in flight, skipping");
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Job,
                    job = name,
                    skipped = true,
                );
                continue;
            };
            let jitter = if self.max_jitter == 0 {
                0
            } else {
                rand::thread_rng().gen_range(0..=self.max_jitter)
            };
            let job = job.clone();
            tokio::task::spawn(async move {
                let _guard = guard;
                tokio::time::sleep(Duration::from_millis(jitter)).await;
                tracing::trace!(job = name, jitter, "Running job");
                match job().await {
                    Ok(()) => {
                        tracing::event!(
                            target: probe::TARGET,
                            tracing::Level::DEBUG,
                            kind = %probe::Kind::Job,
                            job = name,
                            finished = true,
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            job = name,
                            "Job failed, retrying on the next tick: {}",
                            e
                        );
                        tracing::event!(
                            target: probe::TARGET,
                            tracing::Level::DEBUG,
                            kind = %probe::Kind::Job,
                            job = name,
                            errored = true,
                            error = %e,
                        );
                    }
                }
            });
        }
        tracing::debug!(job = name, "Job stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use rosen_watcher_utils::Error;

    fn context() -> WatcherContext {
        WatcherContext::new(crate::tests::config()).unwrap()
    }

    fn counting_job(
        counter: &Arc<AtomicUsize>,
        work: Duration,
        fail: bool,
    ) -> impl Fn() -> std::pin::Pin<
        Box<dyn Future<Output = rosen_watcher_utils::Result<()>> + Send>,
    > + Send
           + Sync
           + 'static {
        let counter = counter.clone();
        move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(work).await;
                if fail {
                    Err(Error::Generic("job failed"))
                } else {
                    Ok(())
                }
            })
        }
    }

    #[tokio::test]
    async fn skips_ticks_while_a_run_is_in_flight() {
        let ctx = context();
        let starts = Arc::new(AtomicUsize::new(0));
        let handle = JobRunner::new("slow", Duration::from_millis(20), &ctx)
            .with_max_jitter(0)
            .spawn(counting_job(&starts, Duration::from_millis(500), false));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(ctx.metrics.job_overlaps_skipped.get() >= 1.0);

        ctx.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn failed_run_is_retried_on_next_tick() {
        let ctx = context();
        let starts = Arc::new(AtomicUsize::new(0));
        let handle = JobRunner::new("failing", Duration::from_millis(10), &ctx)
            .with_max_jitter(0)
            .spawn(counting_job(&starts, Duration::ZERO, true));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(starts.load(Ordering::SeqCst) >= 2);
        assert!(logs_contain("retrying on the next tick"));

        ctx.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let ctx = context();
        let starts = Arc::new(AtomicUsize::new(0));
        let handle = JobRunner::new("quick", Duration::from_millis(10), &ctx)
            .with_max_jitter(0)
            .spawn(counting_job(&starts, Duration::ZERO, false));
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        // let a run spawned by the last tick start.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_shutdown = starts.load(Ordering::SeqCst);
        assert!(after_shutdown >= 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(starts.load(Ordering::SeqCst), after_shutdown);
    }
}
