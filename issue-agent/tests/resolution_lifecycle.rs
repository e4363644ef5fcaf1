//! End-to-end resolution step tests against a real git remote and an
//! in-memory tracker.
//!
//! Each test drives `IssueResolver::resolve` one or more times and checks the
//! durable effects: remote branch contents, pull requests, and the
//! `Iteration:` comments that later runs read back.

use issue_agent::core::tags::parse_iteration;
use issue_agent::patch::PatchOutcome;
use issue_agent::resolve::{IssueResolver, ResolveOutcome, ResolveReport};
use issue_agent::test_support::{
    BOT_LOGIN, FakeOp, FakeTracker, ScriptedLlm, TestRepo, pr_url, test_config,
};

const BRANCH: &str = "agent/issue-7";
const ARTIFACT: &str = "agent_output/issue-7.md";

const README_DIFF: &str = "diff --git a/README.md b/README.md
--- a/README.md
+++ b/README.md
@@ -1 +1,3 @@
 # widgets
+
+Hello.
";

fn tracker_with_issue() -> FakeTracker {
    let tracker = FakeTracker::default();
    tracker.add_issue(7, "Add greeting", "Say hello in Python");
    tracker
}

fn updated(outcome: ResolveOutcome) -> ResolveReport {
    match outcome {
        ResolveOutcome::Updated(report) => report,
        other => panic!("expected an update, got {other:?}"),
    }
}

fn bot_iterations(tracker: &FakeTracker, issue: u64) -> Vec<u32> {
    tracker
        .comments(issue)
        .iter()
        .filter(|c| c.author == BOT_LOGIN)
        .filter_map(|c| parse_iteration(&c.body))
        .collect()
}

#[test]
fn first_run_without_llm_pushes_fallback_and_opens_pr() {
    let repo = TestRepo::new().expect("repo");
    let cfg = test_config(&repo);
    let tracker = tracker_with_issue();
    let llm = ScriptedLlm::unconfigured();
    let resolver = IssueResolver::new(&cfg, &tracker, &llm, repo.outside());

    let report = updated(resolver.resolve(7).expect("resolve"));

    assert_eq!(report.iteration, 1);
    assert_eq!(report.branch, BRANCH);
    assert_eq!(report.patch, PatchOutcome::Unconfigured);
    assert!(report.committed);
    let written = report.fallback.expect("fallback ran").written;
    assert_eq!(written, vec!["hello.py".to_string(), ARTIFACT.to_string()]);

    assert_eq!(
        repo.remote_file(BRANCH, "hello.py").as_deref(),
        Some("print(\"Hello, world!\")\n")
    );
    let artifact = repo.remote_file(BRANCH, ARTIFACT).expect("artifact pushed");
    assert!(artifact.contains("## Title\nAdd greeting\n"));

    let pr = report.pull_request;
    assert_eq!(pr.number, 100);
    assert_eq!(pr.head_ref, BRANCH);
    assert_eq!(pr.title, "Agent: Add greeting (#7)");
    assert_eq!(parse_iteration(&pr.body), Some(1));

    let comments = tracker.comments(7);
    assert_eq!(comments.len(), 1);
    assert_eq!(
        comments[0].body,
        format!("Code Agent created/updated PR: {}\n\nIteration: 1", pr_url(100))
    );
}

#[test]
fn rerun_with_identical_output_reuses_pr_without_new_commit() {
    let repo = TestRepo::new().expect("repo");
    let cfg = test_config(&repo);
    let tracker = tracker_with_issue();
    let llm = ScriptedLlm::unconfigured();
    let resolver = IssueResolver::new(&cfg, &tracker, &llm, repo.outside());

    let first = updated(resolver.resolve(7).expect("first run"));
    let commits = repo.remote_commit_count(BRANCH).expect("count");

    let second = updated(resolver.resolve(7).expect("second run"));
    assert!(!second.committed);
    assert_eq!(second.iteration, 2);
    assert_eq!(second.pull_request.number, first.pull_request.number);
    assert_eq!(parse_iteration(&second.pull_request.body), Some(2));

    assert_eq!(repo.remote_commit_count(BRANCH).expect("count"), commits);
    assert_eq!(tracker.pr_creations(), 1);
    assert_eq!(tracker.pull_requests().len(), 1);
    assert_eq!(bot_iterations(&tracker, 7), vec![1, 2]);
}

#[test]
fn approved_pr_short_circuits_without_mutation() {
    let repo = TestRepo::new().expect("repo");
    let cfg = test_config(&repo);
    let tracker = tracker_with_issue();
    let llm = ScriptedLlm::unconfigured();
    let resolver = IssueResolver::new(&cfg, &tracker, &llm, repo.outside());

    updated(resolver.resolve(7).expect("first run"));
    tracker.add_comment(100, "reviewer", "STATUS: APPROVED\n\nSummary:\nLooks good.");
    let commits = repo.remote_commit_count(BRANCH).expect("count");

    let outcome = resolver.resolve(7).expect("second run");
    assert_eq!(outcome, ResolveOutcome::AlreadyApproved { pr_number: 100 });
    assert_eq!(repo.remote_commit_count(BRANCH).expect("count"), commits);
    assert_eq!(bot_iterations(&tracker, 7), vec![1]);
}

#[test]
fn strict_reviewer_ignores_approvals_from_other_accounts() {
    let repo = TestRepo::new().expect("repo");
    let mut cfg = test_config(&repo);
    cfg.reviewer_login = Some("review-bot".to_string());
    let tracker = tracker_with_issue();
    let llm = ScriptedLlm::unconfigured();
    let resolver = IssueResolver::new(&cfg, &tracker, &llm, repo.outside());

    updated(resolver.resolve(7).expect("first run"));
    tracker.add_comment(100, "review-bot", "STATUS: CHANGES_REQUESTED\n\nSummary:\nNo.");
    tracker.add_comment(100, "drive-by", "STATUS: APPROVED");

    let report = updated(resolver.resolve(7).expect("second run"));
    assert_eq!(report.iteration, 2);
}

#[test]
fn iteration_cap_stops_before_any_change() {
    let repo = TestRepo::new().expect("repo");
    let mut cfg = test_config(&repo);
    cfg.max_iterations = 2;
    let tracker = tracker_with_issue();
    let llm = ScriptedLlm::unconfigured();
    let resolver = IssueResolver::new(&cfg, &tracker, &llm, repo.outside());

    updated(resolver.resolve(7).expect("run 1"));
    updated(resolver.resolve(7).expect("run 2"));
    let outcome = resolver.resolve(7).expect("run 3");

    assert_eq!(
        outcome,
        ResolveOutcome::MaxIterationsReached {
            iteration: 2,
            max_iterations: 2
        }
    );
    assert_eq!(bot_iterations(&tracker, 7), vec![1, 2]);
}

#[test]
fn iteration_tags_from_other_authors_do_not_count() {
    let repo = TestRepo::new().expect("repo");
    let mut cfg = test_config(&repo);
    cfg.max_iterations = 2;
    let tracker = tracker_with_issue();
    tracker.add_comment(7, "someone", "Iteration: 9");
    let llm = ScriptedLlm::unconfigured();
    let resolver = IssueResolver::new(&cfg, &tracker, &llm, repo.outside());

    let report = updated(resolver.resolve(7).expect("resolve"));
    assert_eq!(report.iteration, 1);
}

#[test]
fn applied_diff_skips_fallback() {
    let repo = TestRepo::new().expect("repo");
    let cfg = test_config(&repo);
    let tracker = tracker_with_issue();
    let llm = ScriptedLlm::new([Some(format!("```diff\n{README_DIFF}```"))]);
    let resolver = IssueResolver::new(&cfg, &tracker, &llm, repo.outside());

    let report = updated(resolver.resolve(7).expect("resolve"));

    assert_eq!(report.patch, PatchOutcome::Applied);
    assert!(report.fallback.is_none());
    assert_eq!(
        repo.remote_file(BRANCH, "README.md").as_deref(),
        Some("# widgets\n\nHello.\n")
    );
    assert!(repo.remote_file(BRANCH, ARTIFACT).is_none());

    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Issue title: Add greeting"));
}

#[test]
fn prose_or_broken_diff_falls_back() {
    let repo = TestRepo::new().expect("repo");
    let cfg = test_config(&repo);
    let tracker = tracker_with_issue();
    tracker.add_issue(8, "Other", "Nothing to see");
    let broken = README_DIFF.replace(" # widgets", " # gadgets");
    let llm = ScriptedLlm::new([Some("I am not sure how to fix this.".to_string()), Some(broken)]);
    let resolver = IssueResolver::new(&cfg, &tracker, &llm, repo.outside());

    let prose = updated(resolver.resolve(7).expect("prose"));
    assert_eq!(prose.patch, PatchOutcome::NotADiff);
    assert!(repo.remote_file(BRANCH, ARTIFACT).is_some());

    let rejected = updated(resolver.resolve(8).expect("broken diff"));
    assert_eq!(rejected.patch, PatchOutcome::ApplyFailed);
    assert_eq!(
        repo.remote_file("agent/issue-8", "README.md").as_deref(),
        Some("# widgets\n")
    );
    assert!(repo.remote_file("agent/issue-8", "agent_output/issue-8.md").is_some());
}

#[test]
fn reviewer_feedback_reaches_the_patch_prompt() {
    let repo = TestRepo::new().expect("repo");
    let cfg = test_config(&repo);
    let tracker = tracker_with_issue();
    let llm = ScriptedLlm::new(Vec::<Option<String>>::new());
    let resolver = IssueResolver::new(&cfg, &tracker, &llm, repo.outside());

    updated(resolver.resolve(7).expect("first run"));
    tracker.add_comment(
        100,
        "reviewer",
        "STATUS: CHANGES_REQUESTED\n\nSummary:\nPlease add a docstring.",
    );
    let report = updated(resolver.resolve(7).expect("second run"));

    assert_eq!(report.patch, PatchOutcome::NoResponse);
    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("docstring"));
    assert!(prompts[1].contains("Please add a docstring."));
}

#[test]
fn fresh_clone_resumes_existing_remote_branch() {
    let repo = TestRepo::new().expect("repo");
    repo.push_commit(BRANCH, "notes.txt", "keep me\n").expect("seed branch");
    let before = repo.remote_commit_count(BRANCH).expect("count");

    let cfg = test_config(&repo);
    let tracker = tracker_with_issue();
    let llm = ScriptedLlm::unconfigured();
    let resolver = IssueResolver::new(&cfg, &tracker, &llm, repo.clone_dir());

    let report = updated(resolver.resolve(7).expect("resolve"));
    assert!(report.committed);
    assert_eq!(repo.remote_commit_count(BRANCH).expect("count"), before + 1);
    assert_eq!(repo.remote_file(BRANCH, "notes.txt").as_deref(), Some("keep me\n"));
}

#[test]
fn unpushed_local_branch_is_published() {
    let repo = TestRepo::new().expect("repo");
    repo.commit_local(BRANCH, "notes.txt", "local only\n").expect("local commit");
    assert!(!repo.remote_branch_exists(BRANCH));
    let base = repo.remote_commit_count("main").expect("count");

    let cfg = test_config(&repo);
    let tracker = tracker_with_issue();
    let llm = ScriptedLlm::unconfigured();
    let resolver = IssueResolver::new(&cfg, &tracker, &llm, repo.clone_dir());

    let report = updated(resolver.resolve(7).expect("resolve"));
    assert!(report.committed);
    assert_eq!(repo.remote_file(BRANCH, "notes.txt").as_deref(), Some("local only\n"));
    assert!(repo.remote_file(BRANCH, ARTIFACT).is_some());
    assert_eq!(repo.remote_commit_count(BRANCH).expect("count"), base + 2);
}

#[test]
fn blank_reply_counts_as_no_response() {
    let repo = TestRepo::new().expect("repo");
    let cfg = test_config(&repo);
    let tracker = tracker_with_issue();
    let llm = ScriptedLlm::new([Some("   ")]);
    let resolver = IssueResolver::new(&cfg, &tracker, &llm, repo.outside());

    let report = updated(resolver.resolve(7).expect("resolve"));

    assert_eq!(report.patch, PatchOutcome::NoResponse);
    assert_eq!(llm.prompts().len(), 1);
    assert!(report.fallback.is_some());
    assert!(repo.remote_file(BRANCH, ARTIFACT).is_some());
}

#[test]
fn failed_pr_listing_never_creates_a_duplicate() {
    let repo = TestRepo::new().expect("repo");
    let cfg = test_config(&repo);
    let tracker = tracker_with_issue();
    let llm = ScriptedLlm::unconfigured();
    let resolver = IssueResolver::new(&cfg, &tracker, &llm, repo.outside());

    updated(resolver.resolve(7).expect("first run"));
    tracker.fail(FakeOp::ListPullRequests);

    let err = resolver.resolve(7).expect_err("listing failure propagates");
    assert!(format!("{err:#}").contains("list pull requests for head"));
    assert_eq!(tracker.pr_creations(), 1);
    assert_eq!(bot_iterations(&tracker, 7), vec![1]);
}

#[test]
fn unreadable_issue_history_aborts_before_touching_git() {
    let repo = TestRepo::new().expect("repo");
    let cfg = test_config(&repo);
    let tracker = tracker_with_issue();
    tracker.fail(FakeOp::ListComments);
    let llm = ScriptedLlm::unconfigured();
    let resolver = IssueResolver::new(&cfg, &tracker, &llm, repo.outside());

    assert!(resolver.resolve(7).is_err());
    assert!(!repo.remote_branch_exists(BRANCH));
    assert_eq!(tracker.pr_creations(), 0);
}
