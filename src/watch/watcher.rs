//! File watcher and reconcile loop.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::dev::{DevClient, DevSession, PushParameters};
use crate::devfile;
use crate::error::{AstraError, Result};
use crate::sync::{load_ignores, IgnoreMatcher};

use super::{ComponentStatus, State};

/// How often a component waiting for its pod is reconciled again.
pub const DEFAULT_WAITING_RETRY_INTERVAL: Duration = Duration::from_secs(5);

type FileEvents = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// Drives the reconciles of a dev session.
#[derive(Debug, Clone)]
pub struct WatchClient {
    retry_interval: Duration,
}

impl Default for WatchClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Paths below `root` touched by `event`, ignored ones excluded.
fn relevant_paths(event: &Event, root: &Path, matcher: &IgnoreMatcher) -> Vec<PathBuf> {
    if matches!(event.kind, EventKind::Access(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|p| {
            p.strip_prefix(root)
                .is_ok_and(|rel| !rel.as_os_str().is_empty() && !matcher.is_ignored(rel))
        })
        .cloned()
        .collect()
}

fn start_watcher(root: &Path) -> Result<(RecommendedWatcher, FileEvents)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            // The loop is gone once the receiver is dropped.
            let _ = tx.send(res);
        },
        Config::default(),
    )
    .map_err(|e| AstraError::internal(format!("unable to watch files: {e}")))?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| AstraError::internal(format!("unable to watch {}: {e}", root.display())))?;
    Ok((watcher, rx))
}

impl WatchClient {
    /// Creates a watch client.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            retry_interval: DEFAULT_WAITING_RETRY_INTERVAL,
        }
    }

    /// Sets how often a waiting component is reconciled again.
    #[must_use]
    pub const fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Runs one reconcile and publishes its outcome.
    ///
    /// Only fatal errors are returned; the others leave the component in
    /// error until the next change. Cancelling the session abandons the
    /// reconcile in flight.
    async fn push<D: DevClient + ?Sized>(
        &self,
        client: &D,
        session: &DevSession,
        params: &PushParameters,
        status: &mut ComponentStatus,
    ) -> Result<()> {
        let token = session.token();
        let outcome = select! {
            outcome = client.reconcile(params, status) => outcome,
            () = token.cancelled() => {
                debug!("Reconcile interrupted by cancellation");
                return Ok(());
            }
        };
        match outcome {
            Ok(()) => {
                if status.state() == State::Ready {
                    info!("Dev mode is running. Press Ctrl+c to exit and clean up resources");
                } else {
                    info!("Waiting for the component to be running");
                }
            }
            Err(e) if e.is_fatal() => {
                status.set_state(State::Error);
                session.publish_state(State::Error);
                return Err(e);
            }
            Err(e) => {
                error!("Error occurred on push: {}", e);
                warn!("Changes will be pushed again on the next file change");
                status.set_state(State::Error);
            }
        }
        session.publish_state(status.state());
        Ok(())
    }

    /// Waits `delay` for more events after the first one, and collects the
    /// paths they touch.
    async fn debounce(
        events: &mut FileEvents,
        first: notify::Result<Event>,
        delay: Duration,
        root: &Path,
        matcher: &IgnoreMatcher,
    ) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        let mut next = Some(first);
        while let Some(res) = next.take() {
            match res {
                Ok(event) => changed.extend(relevant_paths(&event, root, matcher)),
                Err(e) => warn!("File watch error: {}", e),
            }
            if let Ok(Some(more)) = tokio::time::timeout(delay, events.recv()).await {
                next = Some(more);
            }
        }
        changed.sort();
        changed.dedup();
        changed
    }

    /// Reconciles the component, then keeps it up to date until the session
    /// is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error when the watcher cannot start or a reconcile fails
    /// in a way retrying cannot fix.
    pub async fn watch_and_push<D: DevClient + ?Sized>(
        &self,
        client: &D,
        session: &DevSession,
        mut params: PushParameters,
    ) -> Result<()> {
        let mut push_rx = session
            .take_push_receiver()
            .ok_or_else(|| AstraError::internal("the push channel of the session is already in use"))?;
        let token = session.token();
        let root = params.context.devfile_dir.clone();

        let mut patterns = load_ignores(&root);
        patterns.extend(params.options.ignore_paths.iter().cloned());
        let matcher = IgnoreMatcher::new(&patterns);

        let (_watcher, mut file_rx) = if params.options.watch_files {
            let (watcher, rx) = start_watcher(&root)?;
            (Some(watcher), Some(rx))
        } else {
            (None, None)
        };

        let mut status = ComponentStatus::new();
        self.push(client, session, &params, &mut status).await?;
        if file_rx.is_some() {
            info!("Watching for changes in {}", root.display());
        }

        let mut retry = tokio::time::interval(self.retry_interval);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        retry.reset();

        loop {
            select! {
                biased;
                () = token.cancelled() => {
                    debug!("Watch loop cancelled");
                    return Ok(());
                }
                Some(()) = push_rx.recv() => {
                    info!("Push requested");
                    self.push(client, session, &params, &mut status).await?;
                }
                Some(first) = async { file_rx.as_mut()?.recv().await }, if file_rx.is_some() => {
                    let Some(events) = file_rx.as_mut() else { continue };
                    let changed =
                        Self::debounce(events, first, params.options.watch_delay, &root, &matcher).await;
                    if changed.is_empty() {
                        continue;
                    }
                    debug!("Changed paths: {:?}", changed);

                    if changed.iter().any(|p| *p == params.devfile_path) {
                        info!("Devfile changed, reloading it");
                        match devfile::parse_and_validate(&params.devfile_path, params.options.variables.clone()) {
                            Ok(parsed) => params.devfile = Arc::new(parsed),
                            Err(e) => {
                                error!("Unable to load the updated devfile: {}", e);
                                status.set_state(State::Error);
                                session.publish_state(State::Error);
                                continue;
                            }
                        }
                    }
                    self.push(client, session, &params, &mut status).await?;
                }
                _ = retry.tick(), if status.state() == State::Waiting => {
                    debug!("Component still waiting, reconciling again");
                    self.push(client, session, &params, &mut status).await?;
                }
            }
        }
    }
}
