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

#![deny(unsafe_code)]
#![warn(missing_docs)]

//! # Rosen Watcher Service 🕸️
//!
//! Schedules the watcher jobs.
//!
//! ## Overview
//!
//! A watcher attests to bridge events it observed on a source chain by
//! publishing commitment transactions, and follows those transactions until
//! they are final. Three jobs run side by side, each on its own timer:
//!
//!   1. Commitment creation, for observations that became ready.
//!   2. The transaction queue, over every transaction still pending.
//!   3. The commitment reaper, pruning old spent commitments.
//!
//! Jobs never call each other; they share the store. Chain access and
//! transaction signing are provided by the caller through
//! [`ChainReader`] and [`TransactionBuilder`].

use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix;
use tokio::task::JoinHandle;

use rosen_watcher_chain::{ChainReader, TransactionBuilder};
use rosen_watcher_commitment_creation::CommitmentCreation;
use rosen_watcher_commitment_reaper::CommitmentReaper;
use rosen_watcher_config::cli::{create_store, load_config, setup_logger, Opts};
use rosen_watcher_lifecycle::LifecycleEvaluator;
use rosen_watcher_store::WatcherStore;
use rosen_watcher_tx_queue::TxQueue;
use rosen_watcher_utils::{probe, retry, ItemOutcome};

/// Watcher context.
pub mod context;
/// Periodic job runner.
pub mod runner;

pub use context::WatcherContext;
pub use runner::JobRunner;

/// How many times the chain is asked for its height before giving up.
const MAX_RETRY_COUNT: usize = 5;
/// Delay between two attempts to reach the chain.
const CHAIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);

fn report<K, O>(job: &str, outcomes: &[ItemOutcome<K, O>]) {
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    if failed > 0 {
        tracing::warn!(job, total = outcomes.len(), failed, "Job finished with failures");
    } else {
        tracing::debug!(job, total = outcomes.len(), "Job finished");
    }
}

/// Starts the commitment creation, transaction queue and reaper jobs.
///
/// Waits for the chain to answer first, then returns the handles of the
/// three job loops. The loops stop on [`WatcherContext::shutdown`].
pub async fn ignite<S, C, B>(
    ctx: &WatcherContext,
    store: S,
    chain: Arc<C>,
    builder: Arc<B>,
) -> rosen_watcher_utils::Result<Vec<JoinHandle<()>>>
where
    S: WatcherStore,
    C: ChainReader + 'static,
    B: TransactionBuilder + 'static,
{
    let backoff =
        retry::ConstantWithMaxRetryCount::new(CHAIN_RETRY_INTERVAL, MAX_RETRY_COUNT);
    let height = backoff::future::retry(backoff, || async {
        chain.current_height().await.map_err(|e| {
            tracing::warn!("Chain not reachable yet: {}", e);
            backoff::Error::transient(e)
        })
    })
    .await?;
    tracing::info!(height, wid = %ctx.config.watcher.wid, "Chain reachable, starting jobs");

    let config = ctx.config.as_ref();
    let metrics = ctx.metrics.clone();
    let lifecycle = Arc::new(LifecycleEvaluator::new(
        store.clone(),
        chain.clone(),
        config.into(),
        metrics.clone(),
    ));
    let creation = Arc::new(CommitmentCreation::new(
        store.clone(),
        chain.clone(),
        builder,
        lifecycle.clone(),
        config.into(),
        metrics.clone(),
    ));
    let queue = Arc::new(TxQueue::new(
        store.clone(),
        chain.clone(),
        lifecycle,
        config.into(),
        metrics.clone(),
    ));
    let reaper = Arc::new(CommitmentReaper::from_config(
        store, chain, config, metrics,
    ));

    let creation_job = JobRunner::new(
        "commitment-creation",
        Duration::from_secs(config.commitment.creation_interval),
        ctx,
    )
    .spawn(move || {
        let creation = creation.clone();
        async move {
            report("commitment-creation", &creation.job().await?);
            Ok(())
        }
    });
    let queue_job = JobRunner::new(
        "tx-queue",
        Duration::from_secs(config.transactions.interval),
        ctx,
    )
    .spawn(move || {
        let queue = queue.clone();
        async move {
            report("tx-queue", &queue.job().await?);
            Ok(())
        }
    });
    let reaper_job = JobRunner::new(
        "commitment-reaper",
        Duration::from_secs(config.cleanup.interval),
        ctx,
    )
    .spawn(move || {
        let reaper = reaper.clone();
        async move {
            reaper.remove_old_commitments().await?;
            Ok(())
        }
    });
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        ignited = true,
        %height,
    );
    Ok(vec![creation_job, queue_job, reaper_job])
}

/// Runs the watcher until it receives a termination signal.
///
/// Loads the config and the store from `args`, starts every job with the
/// given chain access and waits for the jobs to stop after a signal.
pub async fn run<C, B>(
    args: Opts,
    chain: Arc<C>,
    builder: Arc<B>,
) -> anyhow::Result<()>
where
    C: ChainReader + 'static,
    B: TransactionBuilder + 'static,
{
    setup_logger(args.verbose, "rosen_watcher")?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }

    // The configuration is validated and configured from the given directory
    let config = load_config(args.config_dir.clone())?;
    let ctx = WatcherContext::new(config)?;
    // persistent storage for the watcher
    let store = create_store(&args).await?;
    let handles = ignite(&ctx, store, chain, builder).await?;
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        started = true
    );
    // watch for signals
    let mut ctrlc_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut termination_signal = unix::signal(unix::SignalKind::terminate())?;
    let mut quit_signal = unix::signal(unix::SignalKind::quit())?;
    tokio::select! {
        _ = ctrlc_signal.recv() => {
            tracing::warn!("Interrupted (Ctrl+C) ...");
        },
        _ = termination_signal.recv() => {
            tracing::warn!("Got Terminate signal ...");
        },
        _ = quit_signal.recv() => {
            tracing::warn!("Quitting ...");
        },
    }
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        shutdown = true
    );
    tracing::warn!("Shutting down...");
    // send shutdown signal to all of the jobs.
    ctx.shutdown();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Job loop did not stop cleanly: {}", e);
        }
    }
    tracing::info!("Clean Exit ..");
    Ok(())
}
