//! Reviewer verdict tests: rule ordering, publishing, and the closed loop
//! with the resolution step.

use issue_agent::core::types::{PrFile, Verdict};
use issue_agent::resolve::{IssueResolver, ResolveOutcome};
use issue_agent::review::ReviewVerdictEngine;
use issue_agent::test_support::{FakeOp, FakeTracker, ScriptedLlm, TestRepo, test_config};

const LIMIT: usize = 60_000;

fn file(name: &str) -> PrFile {
    PrFile {
        filename: name.to_string(),
        patch: Some(format!("@@ -0,0 +1 @@\n+{name}")),
    }
}

/// Tracker holding issue #7 and its agent PR #100 touching the artifact.
fn linked_setup() -> FakeTracker {
    let tracker = FakeTracker::default();
    tracker.add_issue(7, "Add greeting", "Say hello");
    tracker.add_pull_request(100, "agent/issue-7", "Agent: Add greeting (#7)");
    tracker.set_files(100, vec![file("agent_output/issue-7.md"), file("hello.py")]);
    tracker
}

#[test]
fn failing_ci_requests_changes_before_reading_files() {
    let tracker = linked_setup();
    tracker.fail(FakeOp::ListFiles);
    let llm = ScriptedLlm::new([Some("STATUS: APPROVED")]);
    let engine = ReviewVerdictEngine::new(&tracker, &llm, LIMIT).expect("engine");

    let report = engine.review(100, "failure").expect("review");

    assert_eq!(report.decision.verdict, Verdict::ChangesRequested);
    assert_eq!(report.decision.message, "CI status is failure. Please fix CI failures.");
    assert_eq!(report.issue_number, Some(7));
    assert!(llm.prompts().is_empty());

    let comments = tracker.comments(100);
    assert_eq!(comments.len(), 1);
    assert_eq!(
        comments[0].body,
        "STATUS: CHANGES_REQUESTED\n\nSummary:\nCI status is failure. Please fix CI failures.\n"
    );
    let reviews = tracker.reviews();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].verdict, Verdict::ChangesRequested);
    assert!(reviews[0].body.starts_with("STATUS: CHANGES_REQUESTED\n\nDetails:\n"));
    assert!(report.review_submitted);
}

#[test]
fn ci_status_match_is_case_insensitive() {
    let tracker = linked_setup();
    let llm = ScriptedLlm::unconfigured();
    let engine = ReviewVerdictEngine::new(&tracker, &llm, LIMIT).expect("engine");

    let report = engine.review(100, "SUCCESS").expect("review");
    assert_eq!(report.decision.verdict, Verdict::Approved);
}

#[test]
fn missing_artifact_requests_changes() {
    let tracker = linked_setup();
    tracker.set_files(100, vec![file("src/lib.rs")]);
    let llm = ScriptedLlm::new([Some("STATUS: APPROVED")]);
    let engine = ReviewVerdictEngine::new(&tracker, &llm, LIMIT).expect("engine");

    let report = engine.review(100, "success").expect("review");

    assert_eq!(report.decision.verdict, Verdict::ChangesRequested);
    assert_eq!(
        report.decision.message,
        "Expected file agent_output/issue-7.md not found in PR. Please add output or code changes."
    );
    assert!(llm.prompts().is_empty());
}

#[test]
fn unlinked_pr_skips_artifact_rule_and_approves_without_llm() {
    let tracker = FakeTracker::default();
    tracker.add_pull_request(5, "deps/bump", "Bump dependencies");
    tracker.set_files(5, vec![file("Cargo.lock")]);
    let llm = ScriptedLlm::unconfigured();
    let engine = ReviewVerdictEngine::new(&tracker, &llm, LIMIT).expect("engine");

    let report = engine.review(5, "success").expect("review");

    assert_eq!(report.issue_number, None);
    assert_eq!(report.decision.verdict, Verdict::Approved);
    assert_eq!(report.decision.message, "LLM not configured; minimal checks passed.");
    assert_eq!(tracker.reviews()[0].verdict, Verdict::Approved);
}

#[test]
fn unlinked_pr_without_llm_never_lists_files() {
    let tracker = FakeTracker::default();
    tracker.add_pull_request(5, "deps/bump", "Bump dependencies");
    tracker.fail(FakeOp::ListFiles);
    let llm = ScriptedLlm::unconfigured();
    let engine = ReviewVerdictEngine::new(&tracker, &llm, LIMIT).expect("engine");

    let report = engine.review(5, "success").expect("review");

    assert_eq!(report.decision.verdict, Verdict::Approved);
    assert_eq!(report.decision.message, "LLM not configured; minimal checks passed.");
}

#[test]
fn file_listing_failure_propagates_when_artifact_rule_applies() {
    let tracker = linked_setup();
    tracker.fail(FakeOp::ListFiles);
    let llm = ScriptedLlm::unconfigured();
    let engine = ReviewVerdictEngine::new(&tracker, &llm, LIMIT).expect("engine");

    let err = engine.review(100, "success").expect_err("files required");
    assert!(format!("{err:#}").contains("list files of pull request #100"));
    assert!(tracker.comments(100).is_empty());
}

#[test]
fn llm_response_decides_after_rules_pass() {
    let tracker = linked_setup();
    let llm = ScriptedLlm::new([Some("STATUS: CHANGES_REQUESTED\nThe greeting lacks a newline.")]);
    let engine = ReviewVerdictEngine::new(&tracker, &llm, LIMIT).expect("engine");

    let report = engine.review(100, "success").expect("review");

    assert_eq!(report.decision.verdict, Verdict::ChangesRequested);
    assert_eq!(
        report.decision.message,
        "STATUS: CHANGES_REQUESTED\nThe greeting lacks a newline."
    );
    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Add greeting"));
    assert!(prompts[0].contains("File: agent_output/issue-7.md"));
    assert!(prompts[0].contains("CI status: success"));
}

#[test]
fn missing_llm_response_fails_open() {
    let tracker = linked_setup();
    let llm = ScriptedLlm::new([None::<String>]);
    let engine = ReviewVerdictEngine::new(&tracker, &llm, LIMIT).expect("engine");

    let report = engine.review(100, "success").expect("review");
    assert_eq!(report.decision.verdict, Verdict::Approved);
    assert_eq!(report.decision.message, "No LLM response; defaulting to approve.");
}

#[test]
fn unreadable_linked_issue_still_reaches_llm() {
    let tracker = linked_setup();
    tracker.fail(FakeOp::GetIssue);
    let llm = ScriptedLlm::new([Some("Looks fine.")]);
    let engine = ReviewVerdictEngine::new(&tracker, &llm, LIMIT).expect("engine");

    let report = engine.review(100, "success").expect("review");
    assert_eq!(report.decision.verdict, Verdict::Approved);
    assert_eq!(report.decision.message, "Looks fine.");
    assert!(!llm.prompts()[0].contains("Say hello"));
}

#[test]
fn failed_formal_review_keeps_the_verdict_comment() {
    let tracker = linked_setup();
    tracker.fail(FakeOp::CreateReview);
    let llm = ScriptedLlm::unconfigured();
    let engine = ReviewVerdictEngine::new(&tracker, &llm, LIMIT).expect("engine");

    let report = engine.review(100, "success").expect("review");

    assert!(!report.review_submitted);
    assert!(tracker.reviews().is_empty());
    assert!(tracker.comments(100)[0].body.starts_with("STATUS: APPROVED\n"));
}

#[test]
fn failed_verdict_comment_propagates() {
    let tracker = linked_setup();
    tracker.fail(FakeOp::CreateComment);
    let llm = ScriptedLlm::unconfigured();
    let engine = ReviewVerdictEngine::new(&tracker, &llm, LIMIT).expect("engine");

    let err = engine.review(100, "success").expect_err("comment failure");
    assert!(format!("{err:#}").contains("post verdict comment"));
    assert!(tracker.reviews().is_empty());
}

#[test]
fn review_verdict_drives_the_next_resolution_step() {
    let repo = TestRepo::new().expect("repo");
    let cfg = test_config(&repo);
    let tracker = FakeTracker::default().with_remote(repo.remote(), "main");
    tracker.add_issue(7, "Add greeting", "Say hello in Python");
    let llm = ScriptedLlm::unconfigured();
    let resolver = IssueResolver::new(&cfg, &tracker, &llm, repo.outside());
    let engine = ReviewVerdictEngine::new(&tracker, &llm, LIMIT).expect("engine");

    let ResolveOutcome::Updated(first) = resolver.resolve(7).expect("run 1") else {
        panic!("expected first run to update");
    };
    let pr_number = first.pull_request.number;

    let rejected = engine.review(pr_number, "failure").expect("review 1");
    assert_eq!(rejected.decision.verdict, Verdict::ChangesRequested);

    let ResolveOutcome::Updated(second) = resolver.resolve(7).expect("run 2") else {
        panic!("changes requested should allow another iteration");
    };
    assert_eq!(second.iteration, 2);
    assert_eq!(second.pull_request.number, pr_number);

    let approved = engine.review(pr_number, "success").expect("review 2");
    assert_eq!(approved.decision.verdict, Verdict::Approved);
    assert_eq!(approved.issue_number, Some(7));

    let third = resolver.resolve(7).expect("run 3");
    assert_eq!(third, ResolveOutcome::AlreadyApproved { pr_number });
}
