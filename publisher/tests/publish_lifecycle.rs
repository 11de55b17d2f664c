//! End-to-end publish tests against real git repositories.
//!
//! Each test gets a throwaway working copy plus a bare remote and drives
//! `PublishStep::perform` with the real `GitBinder`.

use std::fs;
use std::time::{Duration, Instant};

use publisher::core::revision::RevisionChange;
use publisher::core::types::{BuildIdentity, BuildOutcome};
use publisher::error::FailureCategory;
use publisher::io::build_record::{BuildRecordStore, JsonRecordStore};
use publisher::io::config::{PublisherConfig, RemoteConfig, ScmKind};
use publisher::io::env::{FixedEnv, InheritedEnv};
use publisher::io::git::{EnvVars, GitBinder};
use publisher::io::log_sink::MemorySink;
use publisher::publish::{Build, PublishStep, StepReport};
use publisher::reconcile::CommitOutcome;
use publisher::test_support::TestRepo;
use serde_json::Value;

fn config_for(repo: &TestRepo, branch: &str) -> PublisherConfig {
    let mut cfg = PublisherConfig::default();
    cfg.scm.remotes.push(RemoteConfig {
        name: "origin".to_string(),
        uri: repo.remote_uri(),
    });
    cfg.scm.branches.push(branch.to_string());
    cfg
}

fn build_for(repo: &TestRepo, number: u64, outcome: BuildOutcome) -> Build {
    let identity = BuildIdentity::new("myproj", number).expect("identity");
    Build::new(identity, repo.path(), outcome)
}

/// Scenario: a successful build with workspace changes is committed, tagged,
/// pushed, and its new HEAD is stored in the build record.
#[test]
fn successful_build_is_committed_tagged_and_pushed() {
    let repo = TestRepo::new().expect("repo");
    let store = JsonRecordStore::new(repo.root().join("state"));
    let cfg = config_for(&repo, "master");
    let log = MemorySink::new();
    repo.write_file("dist/version.txt", "1.0.42\n").expect("write");

    let mut build = build_for(&repo, 42, BuildOutcome::Success);
    let report = PublishStep::new(&cfg, &store, &InheritedEnv, &GitBinder).perform(&mut build, &log);

    let StepReport::Published(published) = report else {
        panic!("expected publish, got {report:?}; log: {:?}", log.lines());
    };
    let head = repo.head().expect("head");
    assert_eq!(published.build_tag, "myproj-42");
    assert_eq!(published.remote_branch, "master");
    assert_eq!(published.commit, CommitOutcome::Committed);
    assert_eq!(
        published.revision,
        RevisionChange::Updated {
            previous: None,
            current: head.clone(),
        }
    );
    assert_eq!(build.outcome(), BuildOutcome::Success);

    assert_eq!(
        repo.git_cmd(&["log", "-1", "--format=%s"]).expect("log"),
        "Build: myproj-42"
    );
    assert_eq!(repo.remote_rev("refs/heads/master").expect("remote head"), head);
    assert_eq!(repo.remote_rev("refs/tags/myproj-42").expect("remote tag"), head);

    let record = store
        .get(build.identity())
        .expect("get")
        .expect("record exists");
    assert_eq!(record.last_revision(), Some(&head));
    assert!(log.contains("Committing changes, tagging and pushing result of build number myproj-42 to origin:master"));
    assert!(log.contains("Build Revision:(none)"));
    assert!(log.contains(&format!("Post-Commit Revision:{head}")));
}

/// Scenario: a clean working tree still gets a tag and a push, without a commit.
#[test]
fn clean_tree_is_tagged_without_a_commit() {
    let repo = TestRepo::new().expect("repo");
    let store = JsonRecordStore::new(repo.root().join("state"));
    let cfg = config_for(&repo, "master");
    let log = MemorySink::new();
    let before = repo.head().expect("head");

    let mut build = build_for(&repo, 7, BuildOutcome::Unstable);
    let report = PublishStep::new(&cfg, &store, &InheritedEnv, &GitBinder).perform(&mut build, &log);

    let StepReport::Published(published) = report else {
        panic!("expected publish, got {report:?}; log: {:?}", log.lines());
    };
    assert_eq!(published.commit, CommitOutcome::NothingToCommit);
    assert_eq!(repo.head().expect("head"), before);
    assert_eq!(repo.remote_rev("refs/tags/myproj-7").expect("remote tag"), before);
    assert!(log.contains("Nothing to commit. No modifications to working tree"));
}

/// Scenario: a stored revision equal to HEAD is left untouched.
#[test]
fn unchanged_head_keeps_stored_revision() {
    let repo = TestRepo::new().expect("repo");
    let store = JsonRecordStore::new(repo.root().join("state"));
    let cfg = config_for(&repo, "master");
    let log = MemorySink::new();
    let head = repo.head().expect("head");

    let identity = BuildIdentity::new("myproj", 8).expect("identity");
    let mut record = store.get_or_create(&identity).expect("create");
    record.set_last_revision(head.clone());
    store.save(&identity, &record).expect("save");

    let mut build = build_for(&repo, 8, BuildOutcome::Success);
    let report = PublishStep::new(&cfg, &store, &InheritedEnv, &GitBinder).perform(&mut build, &log);

    let StepReport::Published(published) = report else {
        panic!("expected publish, got {report:?}; log: {:?}", log.lines());
    };
    assert_eq!(published.revision, RevisionChange::Unchanged(head.clone()));
    assert!(!log.contains("Post-Commit Revision"));
    let stored = store.get(&identity).expect("get").expect("record");
    assert_eq!(stored.last_revision(), Some(&head));
}

/// Scenario: a failed build only loses its stale marker tag.
#[test]
fn failed_build_only_removes_stale_tag() {
    let repo = TestRepo::new().expect("repo");
    let store = JsonRecordStore::new(repo.root().join("state"));
    let cfg = config_for(&repo, "master");
    let log = MemorySink::new();
    repo.git_cmd(&["tag", "hudson-myproj-9"]).expect("stale tag");
    repo.write_file("dist/out.txt", "broken\n").expect("write");
    let before = repo.head().expect("head");

    let mut build = build_for(&repo, 9, BuildOutcome::Failure);
    let report = PublishStep::new(&cfg, &store, &InheritedEnv, &GitBinder).perform(&mut build, &log);

    assert_eq!(report, StepReport::NoAction);
    assert!(!report.ran_and_changed());
    assert_eq!(build.outcome(), BuildOutcome::Failure);
    assert_eq!(repo.git_cmd(&["tag", "--list"]).expect("tags"), "");
    assert_eq!(repo.head().expect("head"), before);
    assert!(repo.remote_rev("refs/heads/master").is_err());
    assert!(
        !repo
            .git_cmd(&["status", "--porcelain"])
            .expect("status")
            .is_empty()
    );
}

/// Scenario: the stale marker is deleted before a successful publish too.
#[test]
fn stale_tag_is_removed_before_publishing() {
    let repo = TestRepo::new().expect("repo");
    let store = JsonRecordStore::new(repo.root().join("state"));
    let cfg = config_for(&repo, "master");
    let log = MemorySink::new();
    repo.git_cmd(&["tag", "hudson-myproj-3"]).expect("stale tag");

    let mut build = build_for(&repo, 3, BuildOutcome::Success);
    let report = PublishStep::new(&cfg, &store, &InheritedEnv, &GitBinder).perform(&mut build, &log);

    assert!(report.ran_and_changed(), "log: {:?}", log.lines());
    assert_eq!(repo.git_cmd(&["tag", "--list"]).expect("tags"), "myproj-3");
    assert!(repo.remote_rev("refs/tags/hudson-myproj-3").is_err());
}

/// Scenario: the `**` wildcard pushes to the default branch.
#[test]
fn wildcard_branch_pushes_to_default_branch() {
    let repo = TestRepo::new().expect("repo");
    let store = JsonRecordStore::new(repo.root().join("state"));
    let cfg = config_for(&repo, "**");
    let log = MemorySink::new();
    repo.write_file("notes.txt", "wildcard\n").expect("write");

    let mut build = build_for(&repo, 11, BuildOutcome::Success);
    let report = PublishStep::new(&cfg, &store, &InheritedEnv, &GitBinder).perform(&mut build, &log);

    let StepReport::Published(published) = report else {
        panic!("expected publish, got {report:?}; log: {:?}", log.lines());
    };
    assert_eq!(published.remote_branch, "master");
    assert_eq!(
        repo.remote_rev("refs/heads/master").expect("remote head"),
        repo.head().expect("head")
    );
    assert!(log.contains("to origin:master"));
}

/// Scenario: a rejected tag push fails the build after the branch was pushed.
#[test]
fn rejected_tag_push_fails_build_with_branch_already_pushed() {
    let repo = TestRepo::new().expect("repo");
    repo.reject_tag_pushes().expect("hook");
    let store = JsonRecordStore::new(repo.root().join("state"));
    let cfg = config_for(&repo, "master");
    let log = MemorySink::new();
    repo.write_file("dist/version.txt", "1.0.5\n").expect("write");

    let mut build = build_for(&repo, 5, BuildOutcome::Success);
    let report = PublishStep::new(&cfg, &store, &InheritedEnv, &GitBinder).perform(&mut build, &log);

    let StepReport::Failed { category, .. } = &report else {
        panic!("expected failure, got {report:?}");
    };
    assert_eq!(*category, FailureCategory::Git);
    assert_eq!(build.outcome(), BuildOutcome::Failure);

    let head = repo.head().expect("head");
    assert_eq!(repo.remote_rev("refs/heads/master").expect("remote head"), head);
    assert!(repo.remote_rev("refs/tags/myproj-5").is_err());
    assert!(log.contains("ERROR: Git Exception:"));

    let record = store
        .get(build.identity())
        .expect("get")
        .expect("record exists");
    assert_eq!(record.last_revision(), None);
}

/// A push the remote refuses as non-fast-forward fails the build and is not retried.
#[test]
fn non_fast_forward_push_fails_without_retry() {
    let repo = TestRepo::new().expect("repo");
    let upstream = repo.advance_remote().expect("advance remote");
    let store = JsonRecordStore::new(repo.root().join("state"));
    let cfg = config_for(&repo, "master");
    let log = MemorySink::new();
    repo.write_file("dist/version.txt", "1.0.6\n").expect("write");

    let mut build = build_for(&repo, 6, BuildOutcome::Success);
    let report = PublishStep::new(&cfg, &store, &InheritedEnv, &GitBinder).perform(&mut build, &log);

    let StepReport::Failed { category, .. } = &report else {
        panic!("expected failure, got {report:?}");
    };
    assert_eq!(*category, FailureCategory::Git);
    assert_eq!(build.outcome(), BuildOutcome::Failure);
    assert_eq!(repo.remote_rev("refs/heads/master").expect("remote head"), upstream);
    assert!(repo.remote_rev("refs/tags/myproj-6").is_err());

    let pushes = log
        .lines()
        .iter()
        .filter(|line| line.starts_with("> git push"))
        .count();
    assert_eq!(pushes, 1, "log: {:?}", log.lines());
    assert!(log.contains("ERROR: Git Exception:"));
}

/// A git command that hangs is killed at the configured timeout and fails the build.
#[test]
fn hung_git_times_out_and_fails_build() {
    let repo = TestRepo::new().expect("repo");
    let store = JsonRecordStore::new(repo.root().join("state"));
    let mut cfg = config_for(&repo, "master");
    cfg.scm.git_executable = repo.hanging_git().expect("script");
    cfg.command_timeout_secs = 1;
    let log = MemorySink::new();

    let mut build = build_for(&repo, 13, BuildOutcome::Success);
    let started = Instant::now();
    let report = PublishStep::new(&cfg, &store, &InheritedEnv, &GitBinder).perform(&mut build, &log);

    assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
    let StepReport::Failed { category, message } = &report else {
        panic!("expected failure, got {report:?}");
    };
    assert_eq!(*category, FailureCategory::Git);
    assert!(message.contains("timed out after 1s"), "message: {message}");
    assert_eq!(build.outcome(), BuildOutcome::Failure);
    assert!(log.contains("ERROR: Git Exception:"));
}

/// Variables from the build environment reach every git invocation.
#[test]
fn build_environment_is_applied_to_git() {
    let repo = TestRepo::new().expect("repo");
    let store = JsonRecordStore::new(repo.root().join("state"));
    let cfg = config_for(&repo, "master");
    let log = MemorySink::new();
    repo.write_file("dist/app.bin", "bits\n").expect("write");

    let mut vars = EnvVars::new();
    vars.insert("GIT_AUTHOR_NAME".to_string(), "Build Robot".to_string());
    let env = FixedEnv(vars);

    let mut build = build_for(&repo, 12, BuildOutcome::Success);
    let report = PublishStep::new(&cfg, &store, &env, &GitBinder).perform(&mut build, &log);

    assert!(report.ran_and_changed(), "log: {:?}", log.lines());
    assert_eq!(
        repo.git_cmd(&["log", "-1", "--format=%an"]).expect("log"),
        "Build Robot"
    );
}

/// Fields another collaborator wrote to the record survive the revision update.
#[test]
fn publish_preserves_foreign_record_fields() {
    let repo = TestRepo::new().expect("repo");
    let store = JsonRecordStore::new(repo.root().join("state"));
    let cfg = config_for(&repo, "master");
    let log = MemorySink::new();
    repo.write_file("dist/version.txt", "2.0\n").expect("write");

    let identity = BuildIdentity::new("myproj", 20).expect("identity");
    let path = store.record_path(&identity);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(&path, "{\"last_revision\":null,\"checkout_branch\":\"master\"}").expect("seed");

    let mut build = build_for(&repo, 20, BuildOutcome::Success);
    let report = PublishStep::new(&cfg, &store, &InheritedEnv, &GitBinder).perform(&mut build, &log);
    assert!(report.ran_and_changed(), "log: {:?}", log.lines());

    let raw: Value =
        serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
    assert_eq!(
        raw["last_revision"],
        Value::String(repo.head().expect("head").to_string())
    );
    assert_eq!(raw["checkout_branch"], Value::String("master".to_string()));
}

/// Jobs that do not use git are declined without touching anything.
#[test]
fn non_git_job_is_declined() {
    let repo = TestRepo::new().expect("repo");
    let store = JsonRecordStore::new(repo.root().join("state"));
    let mut cfg = config_for(&repo, "master");
    cfg.scm.kind = ScmKind::Subversion;
    let log = MemorySink::new();
    repo.git_cmd(&["tag", "hudson-myproj-4"]).expect("stale tag");

    let mut build = build_for(&repo, 4, BuildOutcome::Success);
    let report = PublishStep::new(&cfg, &store, &InheritedEnv, &GitBinder).perform(&mut build, &log);

    assert_eq!(report, StepReport::Declined);
    assert_eq!(repo.git_cmd(&["tag", "--list"]).expect("tags"), "hudson-myproj-4");
    assert!(!store.record_path(build.identity()).exists());
    assert!(log.lines().is_empty());
}
