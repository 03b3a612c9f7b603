//! The `adaptest sync` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use adaptest_sync::config::{create_remote, load_config_from};
use adaptest_sync::engine::{AllowAll, AttemptEngine, Catalog};
use adaptest_sync::retry::RetryPolicy;
use adaptest_sync::store::{FileStore, LocalStore};
use adaptest_sync::worker::FlushReport;

/// Conflicts re-queue a merged snapshot; each round pushes those again.
const MAX_ROUNDS: usize = 3;

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let remote = create_remote(&config)?
        .context("no remote configured; add a [remote] section or set ADAPTEST_REMOTE_URL")?;

    let (catalog, _rejected) = Catalog::from_directory(&config.definitions_dir)?;
    let store = Arc::new(FileStore::open(config.attempts_dir())?);
    let engine = AttemptEngine::new(catalog, store.clone(), Arc::new(AllowAll))
        .with_remote(Arc::clone(&remote));

    let mut queued = 0;
    for attempt_id in store.list()? {
        match store.load(attempt_id) {
            Ok(Some(snapshot)) => {
                engine.queue().enqueue(snapshot);
                queued += 1;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(attempt = %attempt_id, "skipping unreadable snapshot: {e}"),
        }
    }

    if queued == 0 {
        println!("No local attempts in {}.", store.dir().display());
        return Ok(());
    }
    eprintln!("Pushing {queued} attempt(s) to {}", remote.name());

    let worker = engine.worker(
        remote,
        RetryPolicy::from_config(&config.sync),
        config.sync.max_in_flight,
    );
    let mut total = FlushReport::default();
    for _ in 0..MAX_ROUNDS {
        let report = worker.flush().await;
        total.pushed += report.pushed;
        total.reconciled += report.reconciled;
        total.superseded += report.superseded;
        if report.reconciled == 0 {
            break;
        }
    }

    println!(
        "Pushed: {}, reconciled: {}, superseded: {}",
        total.pushed, total.reconciled, total.superseded
    );

    let left = engine.queue().len();
    anyhow::ensure!(left == 0, "{left} attempt(s) could not be pushed; run sync again later");
    println!("All attempts in sync.");

    Ok(())
}
