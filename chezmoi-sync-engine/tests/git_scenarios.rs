//! End-to-end pipeline runs against real git repositories.
//!
//! Layout per test: a bare `upstream.git` seeded with one commit and two
//! clones (`a`, `b`) acting as two machines. `chezmoi` is replaced by a
//! shell script that records each `apply`. Skipped when git is unavailable.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use chezmoi_sync_core::{run_record, Direction, ErrorCategory, Layout, MachineId, RunOutcome, SkipReason, SyncConfig, Trigger};
use chezmoi_sync_engine::{CancelToken, ChezmoiGit, SyncController};
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn configure_user(repo: &Path, name: &str) {
    git(repo, &["config", "user.name", name]);
    git(repo, &["config", "user.email", &format!("{name}@example.com")]);
    git(repo, &["config", "commit.gpgsign", "false"]);
}

struct World {
    root: TempDir,
    upstream: PathBuf,
    apply_log: PathBuf,
    chezmoi: PathBuf,
}

impl World {
    fn new() -> Option<Self> {
        if which::which("git").is_err() {
            eprintln!("git not found; skipping");
            return None;
        }
        let root = TempDir::new().unwrap();
        let upstream = root.path().join("upstream.git");
        fs::create_dir_all(&upstream).unwrap();
        git(&upstream, &["init", "--bare", "--quiet"]);
        git(&upstream, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        let seed = root.path().join("seed");
        fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "--quiet"]);
        configure_user(&seed, "seed");
        fs::write(seed.join("dot_zshrc"), "export EDITOR=vi\n").unwrap();
        git(&seed, &["add", "-A"]);
        git(&seed, &["commit", "--quiet", "-m", "seed"]);
        git(&seed, &["push", "--quiet", upstream.to_str().unwrap(), "HEAD:refs/heads/main"]);

        let apply_log = root.path().join("apply.log");
        let chezmoi = root.path().join("fake-chezmoi");
        fs::write(
            &chezmoi,
            format!("#!/bin/sh\necho \"$@\" >> '{}'\n", apply_log.display()),
        )
        .unwrap();
        fs::set_permissions(&chezmoi, fs::Permissions::from_mode(0o755)).unwrap();

        Some(Self {
            root,
            upstream,
            apply_log,
            chezmoi,
        })
    }

    /// Clone upstream as machine `name` and build its controller.
    fn machine(&self, name: &str) -> (PathBuf, SyncController) {
        let checkout = self.root.path().join(name);
        git(
            self.root.path(),
            &["clone", "--quiet", self.upstream.to_str().unwrap(), name],
        );
        configure_user(&checkout, name);

        let layout = Layout::rooted_at(&self.root.path().join(format!("{name}-state")));
        let mut config = SyncConfig::defaults(&layout);
        config.watch_path = checkout.clone();
        config.chezmoi_bin = self.chezmoi.display().to_string();
        let tool = Arc::new(ChezmoiGit::from_config(&config));
        let ctl = SyncController::new(layout, config, MachineId(format!("test-{name}")), tool);
        (checkout, ctl)
    }

    fn upstream_log(&self) -> String {
        git(&self.upstream, &["log", "--format=%s", "main"])
    }
}

fn run_push(ctl: &SyncController, trigger: Trigger) -> RunOutcome {
    ctl.run_push(trigger, &CancelToken::new())
}

fn run_pull(ctl: &SyncController, trigger: Trigger) -> RunOutcome {
    ctl.run_pull(trigger, &CancelToken::new())
}

#[test]
fn push_on_one_machine_then_pull_on_another() {
    let Some(world) = World::new() else { return };
    let (a, ctl_a) = world.machine("a");
    let (b, ctl_b) = world.machine("b");

    fs::write(a.join("dot_zshrc"), "export EDITOR=nvim\n").unwrap();
    let pushed = run_push(&ctl_a, Trigger::Watcher);
    assert!(matches!(pushed, RunOutcome::Ok { commit: Some(_), .. }), "{pushed:?}");
    let log = world.upstream_log();
    assert!(log.starts_with("Auto-sync from test-a at "), "{log}");
    assert!(log.lines().next().unwrap().ends_with(": dot_zshrc"));

    let pulled = run_pull(&ctl_b, Trigger::Timer);
    assert!(matches!(pulled, RunOutcome::Ok { .. }), "{pulled:?}");
    assert_eq!(
        fs::read_to_string(b.join("dot_zshrc")).unwrap(),
        "export EDITOR=nvim\n"
    );
    let applied = fs::read_to_string(&world.apply_log).unwrap();
    assert!(applied.contains("apply"), "{applied}");
    assert!(applied.contains("--keep-going"));
}

#[test]
fn clean_tree_is_skipped() {
    let Some(world) = World::new() else { return };
    let (_, ctl) = world.machine("a");
    assert_eq!(
        run_push(&ctl, Trigger::Watcher),
        RunOutcome::skipped(SkipReason::Clean)
    );
    assert_eq!(run_pull(&ctl, Trigger::Timer), RunOutcome::ok());
    assert!(!world.apply_log.exists());
}

#[test]
fn pull_defers_while_tree_is_dirty() {
    let Some(world) = World::new() else { return };
    let (a, ctl_a) = world.machine("a");
    let (b, ctl_b) = world.machine("b");

    fs::write(a.join("dot_gitconfig"), "[user]\n").unwrap();
    assert!(run_push(&ctl_a, Trigger::Manual).is_success());

    fs::write(b.join("dot_zshrc"), "local edit\n").unwrap();
    let outcome = run_pull(&ctl_b, Trigger::Timer);
    assert_eq!(outcome.category(), Some(ErrorCategory::DeferredLocalChanges));
    assert_eq!(fs::read_to_string(b.join("dot_zshrc")).unwrap(), "local edit\n");
    assert!(!b.join("dot_gitconfig").exists());
}

#[test]
fn concurrent_upstream_commit_is_rebased_and_pushed() {
    let Some(world) = World::new() else { return };
    let (a, ctl_a) = world.machine("a");
    let (b, ctl_b) = world.machine("b");

    fs::write(a.join("dot_vimrc"), "set nu\n").unwrap();
    assert!(run_push(&ctl_a, Trigger::Watcher).is_success());

    fs::write(b.join("dot_tmux.conf"), "set -g mouse on\n").unwrap();
    let outcome = run_push(&ctl_b, Trigger::Watcher);
    assert!(matches!(outcome, RunOutcome::Ok { rebases: 1, .. }), "{outcome:?}");

    let log = world.upstream_log();
    assert!(log.contains("test-a"));
    assert!(log.contains("test-b"));
    // linear history: rebased, not merged
    let parents = git(&world.upstream, &["log", "--format=%p", "-1", "main"]);
    assert_eq!(parents.split_whitespace().count(), 1);
}

#[test]
fn conflicting_edits_need_an_operator() {
    let Some(world) = World::new() else { return };
    let (a, ctl_a) = world.machine("a");
    let (b, ctl_b) = world.machine("b");

    fs::write(a.join("dot_zshrc"), "export EDITOR=emacs\n").unwrap();
    assert!(run_push(&ctl_a, Trigger::Watcher).is_success());

    fs::write(b.join("dot_zshrc"), "export EDITOR=nano\n").unwrap();
    let outcome = run_push(&ctl_b, Trigger::Watcher);
    assert_eq!(outcome.category(), Some(ErrorCategory::ConflictNeedsOperator));

    // rebase aborted: no in-progress state, local edit still committed
    assert!(!b.join(".git/rebase-merge").exists());
    assert!(!b.join(".git/rebase-apply").exists());
    assert_eq!(git(&b, &["status", "--porcelain"]), "");
    assert_eq!(
        fs::read_to_string(b.join("dot_zshrc")).unwrap(),
        "export EDITOR=nano\n"
    );

    let record = run_record::load_at(ctl_b.layout(), Direction::Push).unwrap();
    assert!(record.blocks_automation());
    assert_eq!(
        run_push(&ctl_b, Trigger::Watcher),
        RunOutcome::skipped(SkipReason::OperatorRequired)
    );
}

#[test]
fn unpushed_commit_is_sent_by_next_run() {
    let Some(world) = World::new() else { return };
    let (a, ctl_a) = world.machine("a");

    fs::write(a.join("dot_profile"), "PATH=$PATH\n").unwrap();
    git(&a, &["add", "-A"]);
    git(&a, &["commit", "--quiet", "-m", "manual commit"]);

    assert!(run_push(&ctl_a, Trigger::Watcher).is_success());
    assert!(world.upstream_log().starts_with("manual commit"));
}
