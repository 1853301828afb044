use std::future::pending;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, Instant, MissedTickBehavior};

use chezmoi_sync_core::{identity, Direction, Layout, LogFormat, RunOutcome, SyncConfig, Trigger};
use chezmoi_sync_engine::{CancelToken, ChezmoiGit, SyncController};

use crate::error::{io_err, DaemonError};
use crate::logging::init_tracing;
use crate::paths::{LOG_ROTATION_INTERVAL, PULL_MUTE_WINDOW};
use crate::reactor::{PushReactor, RunResult};
use crate::watcher::{NotifyWatcher, Watcher};

const DEFAULT_LEVEL: &str = "info";

/// Which directions one daemon process drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectionSelection {
    Push,
    Pull,
    #[default]
    Both,
}

impl DirectionSelection {
    pub fn includes(&self, direction: Direction) -> bool {
        match self {
            DirectionSelection::Both => true,
            DirectionSelection::Push => direction == Direction::Push,
            DirectionSelection::Pull => direction == Direction::Pull,
        }
    }

    pub fn directions(&self) -> Vec<Direction> {
        Direction::all()
            .iter()
            .copied()
            .filter(|d| self.includes(*d))
            .collect()
    }
}

impl FromStr for DirectionSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(DirectionSelection::Push),
            "pull" => Ok(DirectionSelection::Pull),
            "both" => Ok(DirectionSelection::Both),
            other => Err(format!("unknown direction '{other}' (expected push, pull or both)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DaemonOptions {
    pub selection: DirectionSelection,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(layout: Layout, options: DaemonOptions) -> Result<(), DaemonError> {
    let config = match SyncConfig::load(&layout) {
        Ok(config) => {
            init_tracing(config.log_format, DEFAULT_LEVEL);
            config
        }
        Err(err) => {
            init_tracing(LogFormat::default(), DEFAULT_LEVEL);
            tracing::error!(path = %layout.config_file.display(), error = %err, "refusing to start");
            return Err(err.into());
        }
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(layout, config, options))
}

/// Validate the environment, then drive the selected directions until a
/// shutdown signal arrives.
pub async fn run(
    layout: Layout,
    config: SyncConfig,
    options: DaemonOptions,
) -> Result<(), DaemonError> {
    layout.ensure_state_dir()?;
    for tool in [&config.git_bin, &config.chezmoi_bin] {
        which::which(tool).map_err(|_| DaemonError::ToolMissing { tool: tool.clone() })?;
    }
    if !config.watch_path.is_dir() {
        return Err(DaemonError::WatchPathMissing {
            path: config.watch_path.clone(),
        });
    }

    let machine = identity::ensure_identity(&layout)?;
    tracing::info!(
        machine = %machine,
        directions = ?options.selection.directions(),
        watch_path = %config.watch_path.display(),
        upstream = %config.upstream_ref(),
        pull_interval_secs = config.pull_interval.as_secs(),
        push_debounce_ms = config.push_debounce.as_millis() as u64,
        "daemon starting",
    );

    let watcher: Option<Box<dyn Watcher>> = if options.selection.includes(Direction::Push) {
        Some(Box::new(NotifyWatcher::start(&config.watch_path)?))
    } else {
        None
    };
    let tool = Arc::new(ChezmoiGit::from_config(&config));
    let controller = Arc::new(SyncController::new(layout, config, machine, tool));

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    run_with(controller, watcher, options, shutdown_tx).await?;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Drive `controller` with an already-started watcher. Any task ending (or a
/// send on `shutdown_tx`) stops the others.
pub async fn run_with(
    controller: Arc<SyncController>,
    watcher: Option<Box<dyn Watcher>>,
    options: DaemonOptions,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let push_handle = match (options.selection.includes(Direction::Push), watcher) {
        (true, Some(watcher)) => {
            let shutdown = shutdown_tx.clone();
            let controller = controller.clone();
            Some(tokio::spawn(async move {
                let result = push_task(controller, watcher, shutdown.subscribe()).await;
                let _ = shutdown.send(());
                result
            }))
        }
        (true, None) => {
            return Err(DaemonError::Task {
                task: "push",
                reason: "push direction selected without a watcher".to_string(),
            })
        }
        (false, _) => None,
    };

    let pull_handle = if options.selection.includes(Direction::Pull) {
        let shutdown = shutdown_tx.clone();
        let controller = controller.clone();
        Some(tokio::spawn(async move {
            let result = pull_task(controller, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        }))
    } else {
        None
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let log_dir = controller.config().log_dir.clone();
        let directions = options.selection.directions();
        tokio::spawn(async move {
            let result = log_rotation_task(log_dir, directions, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = wait_for_signal() => {
                    let name = signal?;
                    tracing::info!(signal = name, "shutting down daemon");
                    let _ = shutdown.send(());
                    Ok(())
                }
            }
        })
    };

    let (push_result, pull_result, rotation_result, signal_result) = tokio::join!(
        join_optional(push_handle),
        join_optional(pull_handle),
        rotation_handle,
        signal_handle
    );

    handle_join("push", push_result)?;
    handle_join("pull", pull_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ----- push

async fn push_task(
    controller: Arc<SyncController>,
    mut watcher: Box<dyn Watcher>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let config = controller.config();
    let mut reactor = PushReactor::new(config.push_debounce);
    // Periodic rescan catches dropped events and commits made while we were down.
    let mut rescan = interval(config.pull_interval);
    rescan.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let cancel = CancelToken::new();
    let mut running: Option<JoinHandle<RunOutcome>> = None;
    let mut trigger = Trigger::Timer;
    let mut watching = true;

    loop {
        let deadline = if running.is_none() {
            reactor.deadline()
        } else {
            None
        };

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            batch = watcher.events().recv(), if watching => match batch {
                Some(batch) if pull_recently_active(&controller) => {
                    tracing::debug!(paths = batch.paths.len(), "ignoring changes written by pull");
                }
                Some(batch) => {
                    tracing::debug!(paths = batch.paths.len(), "source tree changed");
                    trigger = Trigger::Watcher;
                    reactor.on_event(Instant::now());
                }
                None => {
                    tracing::warn!("watcher stopped delivering events; relying on rescan");
                    watching = false;
                }
            },
            _ = rescan.tick() => {
                if reactor.deadline().is_none() && running.is_none() {
                    trigger = Trigger::Timer;
                }
                reactor.on_event(Instant::now());
            }
            _ = sleep_until_optional(deadline) => {}
            joined = join_running(&mut running) => {
                running = None;
                let outcome = joined.map_err(|err| join_error("push", err))?;
                reactor.on_finished(RunResult::from_outcome(&outcome), Instant::now());
                if let Some(delay) = reactor.deadline() {
                    tracing::debug!(
                        state = ?reactor.state(),
                        in_ms = delay.saturating_duration_since(Instant::now()).as_millis() as u64,
                        "next push scheduled",
                    );
                }
            }
        }

        if running.is_none() && reactor.poll(Instant::now()) {
            let controller = controller.clone();
            let cancel = cancel.clone();
            let run_trigger = trigger;
            running = Some(tokio::task::spawn_blocking(move || {
                controller.run_push(run_trigger, &cancel)
            }));
        }
    }

    watcher.close();
    finish_in_flight("push", running, &cancel, config.shutdown_grace).await
}

/// The pull direction holds the interlock or released it moments ago.
fn pull_recently_active(controller: &SyncController) -> bool {
    let interlock = controller.interlock();
    if interlock
        .holder()
        .is_some_and(|holder| holder.direction == Direction::Pull)
    {
        return true;
    }
    matches!(
        interlock.last_release(),
        Some((Direction::Pull, at)) if at.elapsed() < PULL_MUTE_WINDOW
    )
}

// ----- pull

async fn pull_task(
    controller: Arc<SyncController>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let config = controller.config();
    let mut ticker = interval(config.pull_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let cancel = CancelToken::new();
    let mut running: Option<JoinHandle<RunOutcome>> = None;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                if running.is_some() {
                    tracing::debug!("previous pull still running; skipping tick");
                    continue;
                }
                let controller = controller.clone();
                let cancel = cancel.clone();
                running = Some(tokio::task::spawn_blocking(move || {
                    controller.run_pull(Trigger::Timer, &cancel)
                }));
            }
            joined = join_running(&mut running) => {
                running = None;
                joined.map_err(|err| join_error("pull", err))?;
            }
        }
    }

    finish_in_flight("pull", running, &cancel, config.shutdown_grace).await
}

// ----- shared

/// Ask an in-flight run to stop, wait `grace`, then kill its subprocess.
async fn finish_in_flight(
    task: &'static str,
    running: Option<JoinHandle<RunOutcome>>,
    cancel: &CancelToken,
    grace: Duration,
) -> Result<(), DaemonError> {
    cancel.stop();
    let Some(mut handle) = running else {
        return Ok(());
    };

    tracing::info!(task, grace_ms = grace.as_millis() as u64, "waiting for in-flight run");
    let joined = match tokio::time::timeout(grace, &mut handle).await {
        Ok(joined) => joined,
        Err(_) => {
            tracing::warn!(task, "in-flight run outlived the shutdown grace; killing it");
            cancel.kill();
            handle.await
        }
    };
    joined.map_err(|err| join_error(task, err))?;
    Ok(())
}

async fn join_running(running: &mut Option<JoinHandle<RunOutcome>>) -> Result<RunOutcome, JoinError> {
    match running {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

async fn sleep_until_optional(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn join_optional(
    handle: Option<JoinHandle<Result<(), DaemonError>>>,
) -> Result<Result<(), DaemonError>, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => Ok(Ok(())),
    }
}

async fn log_rotation_task(
    log_dir: PathBuf,
    directions: Vec<Direction>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut ticker = interval(LOG_ROTATION_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let log_dir = log_dir.clone();
                let directions = directions.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_logs(&log_dir, &directions);
                })
                .await
                .ok();
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str, DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| io_err("ctrl-c handler", e))?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<&'static str, DaemonError> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| io_err("ctrl-c handler", e))?;
    Ok("ctrl-c")
}

fn join_error(task: &'static str, err: JoinError) -> DaemonError {
    DaemonError::Task {
        task,
        reason: format!("join failure: {err}"),
    }
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(join_error(task, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chezmoi_sync_engine::{
        ApplyOutcome, CommitOutcome, Divergence, DotfilesTool, FetchOutcome, MergeOutcome,
        MergeStrategy, PushOutcome, SyncError, Upstream,
    };
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    use crate::watcher::{ChangeBatch, ChannelWatcher};

    /// Always clean and up to date; counts pipeline runs per direction.
    #[derive(Default)]
    struct CountingTool {
        push_runs: AtomicUsize,
        pull_runs: AtomicUsize,
    }

    impl DotfilesTool for CountingTool {
        fn local_dirty(&self, _: &CancelToken) -> Result<bool, SyncError> {
            Ok(false)
        }
        fn changed_paths(&self, _: &CancelToken) -> Result<Vec<String>, SyncError> {
            Ok(Vec::new())
        }
        fn staged_changes(&self, _: &CancelToken) -> Result<Vec<String>, SyncError> {
            Ok(Vec::new())
        }
        fn commit_all(&self, _: &str, _: &CancelToken) -> Result<CommitOutcome, SyncError> {
            Ok(CommitOutcome::NothingToCommit)
        }
        fn divergence(&self, _: &Upstream, _: &CancelToken) -> Result<Divergence, SyncError> {
            // Only the push pipeline asks before fetching.
            self.push_runs.fetch_add(1, Ordering::SeqCst);
            Ok(Divergence::default())
        }
        fn head_commit(&self, _: &CancelToken) -> Result<Option<String>, SyncError> {
            Ok(None)
        }
        fn push(&self, _: &Upstream, _: &CancelToken) -> Result<PushOutcome, SyncError> {
            Ok(PushOutcome::Ok)
        }
        fn fetch(&self, _: &Upstream, _: &CancelToken) -> Result<FetchOutcome, SyncError> {
            self.pull_runs.fetch_add(1, Ordering::SeqCst);
            Ok(FetchOutcome::Ok)
        }
        fn fast_forward_or_merge(
            &self,
            _: &Upstream,
            _: &MergeStrategy,
            _: &CancelToken,
        ) -> Result<MergeOutcome, SyncError> {
            Ok(MergeOutcome::UpToDate)
        }
        fn apply(&self, _: &CancelToken) -> Result<ApplyOutcome, SyncError> {
            Ok(ApplyOutcome::Ok)
        }
    }

    struct Harness {
        _root: TempDir,
        tool: Arc<CountingTool>,
        controller: Arc<SyncController>,
        shutdown: broadcast::Sender<()>,
    }

    fn harness() -> Harness {
        let root = TempDir::new().unwrap();
        let layout = Layout::rooted_at(root.path());
        layout.ensure_state_dir().unwrap();
        let mut config = SyncConfig::defaults(&layout);
        config.push_debounce = Duration::from_millis(50);
        config.pull_interval = Duration::from_secs(3600);
        config.shutdown_grace = Duration::from_millis(500);
        let tool = Arc::new(CountingTool::default());
        let controller = Arc::new(SyncController::new(
            layout,
            config,
            "test-host".into(),
            tool.clone(),
        ));
        let (shutdown, _) = broadcast::channel(4);
        Harness {
            _root: root,
            tool,
            controller,
            shutdown,
        }
    }

    fn start(
        h: &Harness,
        selection: DirectionSelection,
    ) -> (
        mpsc::Sender<ChangeBatch>,
        JoinHandle<Result<(), DaemonError>>,
    ) {
        let (tx, watcher) = ChannelWatcher::new();
        let handle = tokio::spawn(run_with(
            h.controller.clone(),
            Some(Box::new(watcher)),
            DaemonOptions { selection },
            h.shutdown.clone(),
        ));
        (tx, handle)
    }

    fn batch() -> ChangeBatch {
        ChangeBatch {
            paths: vec![PathBuf::from("dot_zshrc")],
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn startup_rescan_and_watcher_batch_each_run_push() {
        let h = harness();
        let (tx, handle) = start(&h, DirectionSelection::Push);

        settle().await;
        assert_eq!(h.tool.push_runs.load(Ordering::SeqCst), 1);

        tx.send(batch()).await.unwrap();
        tx.send(batch()).await.unwrap();
        settle().await;
        assert_eq!(h.tool.push_runs.load(Ordering::SeqCst), 2);
        assert_eq!(h.tool.pull_runs.load(Ordering::SeqCst), 0);

        h.shutdown.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("daemon should stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn changes_during_or_right_after_pull_are_ignored() {
        let h = harness();
        let (tx, handle) = start(&h, DirectionSelection::Push);
        settle().await;
        assert_eq!(h.tool.push_runs.load(Ordering::SeqCst), 1);

        let guard = h
            .controller
            .interlock()
            .try_acquire(Direction::Pull)
            .unwrap()
            .expect("interlock free");
        tx.send(batch()).await.unwrap();
        settle().await;
        drop(guard);
        tx.send(batch()).await.unwrap();
        settle().await;
        assert_eq!(h.tool.push_runs.load(Ordering::SeqCst), 1);

        h.shutdown.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("daemon should stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pull_only_daemon_runs_first_tick_immediately() {
        let h = harness();
        let handle = tokio::spawn(run_with(
            h.controller.clone(),
            None,
            DaemonOptions {
                selection: DirectionSelection::Pull,
            },
            h.shutdown.clone(),
        ));

        settle().await;
        assert_eq!(h.tool.pull_runs.load(Ordering::SeqCst), 1);
        assert_eq!(h.tool.push_runs.load(Ordering::SeqCst), 0);

        h.shutdown.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("daemon should stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn push_without_watcher_is_rejected() {
        let h = harness();
        let err = run_with(
            h.controller.clone(),
            None,
            DaemonOptions::default(),
            h.shutdown.clone(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DaemonError::Task { task: "push", .. }), "got: {err}");
    }

    #[test]
    fn direction_selection_parses() {
        assert_eq!(
            "both".parse::<DirectionSelection>(),
            Ok(DirectionSelection::Both)
        );
        assert_eq!(
            DirectionSelection::Pull.directions(),
            vec![Direction::Pull]
        );
        assert!("sideways".parse::<DirectionSelection>().is_err());
    }
}
