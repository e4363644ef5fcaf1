//! Test fixtures: an in-memory tracker, a scripted completion service, and a
//! throwaway repository with a bare remote.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::types::{Comment, Issue, PrFile, PullRequest, Verdict};
use crate::io::config::AgentConfig;
use crate::io::llm::TextCompletion;
use crate::io::retry::RetryPolicy;
use crate::io::tracker::{NewPullRequest, Tracker};

pub const BOT_LOGIN: &str = "agent-bot";
pub const REPOSITORY: &str = "acme/widgets";

/// Tracker operations that can be made to fail with [`FakeTracker::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    AuthenticatedLogin,
    GetIssue,
    ListOpenIssues,
    ListComments,
    CreateComment,
    ListPullRequests,
    ListFiles,
    CreatePullRequest,
    UpdatePullRequest,
    CreateReview,
}

/// A formal review recorded by [`FakeTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedReview {
    pub pr_number: u64,
    pub verdict: Verdict,
    pub body: String,
}

#[derive(Debug, Default)]
struct FakeState {
    issues: BTreeMap<u64, Issue>,
    comments: BTreeMap<u64, Vec<Comment>>,
    pull_requests: BTreeMap<u64, PullRequest>,
    files: BTreeMap<u64, Vec<PrFile>>,
    reviews: Vec<RecordedReview>,
    pr_creations: usize,
    next_comment_id: u64,
    next_pr_number: u64,
    clock: u64,
    failing: HashSet<FakeOp>,
    failing_issues: HashSet<u64>,
}

impl FakeState {
    fn tick(&mut self) -> String {
        self.clock += 1;
        format!(
            "2024-01-01T{:02}:{:02}:{:02}Z",
            self.clock / 3600,
            (self.clock / 60) % 60,
            self.clock % 60
        )
    }

    fn push_comment(&mut self, number: u64, author: &str, body: &str) -> Comment {
        self.next_comment_id += 1;
        let comment = Comment {
            id: self.next_comment_id,
            author: author.to_string(),
            body: body.to_string(),
            created_at: self.tick(),
        };
        self.comments.entry(number).or_default().push(comment.clone());
        comment
    }
}

/// In-memory [`Tracker`] that records every write.
///
/// Pull request files come from explicit [`FakeTracker::set_files`] calls or,
/// when a remote is attached, from `git diff <base>...<head>` in that remote.
pub struct FakeTracker {
    login: String,
    remote: Option<(PathBuf, String)>,
    state: Mutex<FakeState>,
}

impl Default for FakeTracker {
    fn default() -> Self {
        Self::new(BOT_LOGIN)
    }
}

impl FakeTracker {
    pub fn new(login: &str) -> Self {
        Self {
            login: login.to_string(),
            remote: None,
            state: Mutex::new(FakeState {
                next_pr_number: 100,
                ..FakeState::default()
            }),
        }
    }

    /// Derive PR files from branches in a bare remote.
    pub fn with_remote(mut self, remote: &Path, base: &str) -> Self {
        self.remote = Some((remote.to_path_buf(), base.to_string()));
        self
    }

    pub fn add_issue(&self, number: u64, title: &str, body: &str) -> Issue {
        let issue = Issue {
            number,
            title: title.to_string(),
            body: body.to_string(),
            labels: vec!["agent".to_string()],
        };
        self.lock().issues.insert(number, issue.clone());
        issue
    }

    /// Add a comment authored by `author` (not necessarily the agent).
    pub fn add_comment(&self, number: u64, author: &str, body: &str) -> Comment {
        self.lock().push_comment(number, author, body)
    }

    pub fn add_pull_request(&self, number: u64, head_ref: &str, title: &str) -> PullRequest {
        let pr = PullRequest {
            number,
            head_ref: head_ref.to_string(),
            title: title.to_string(),
            body: String::new(),
            html_url: pr_url(number),
        };
        self.lock().pull_requests.insert(number, pr.clone());
        pr
    }

    pub fn set_files(&self, pr_number: u64, files: Vec<PrFile>) {
        self.lock().files.insert(pr_number, files);
    }

    /// Make every subsequent call of `op` fail.
    pub fn fail(&self, op: FakeOp) {
        self.lock().failing.insert(op);
    }

    /// Make `get_issue` fail for one issue only.
    pub fn fail_issue(&self, number: u64) {
        self.lock().failing_issues.insert(number);
    }

    pub fn comments(&self, number: u64) -> Vec<Comment> {
        self.lock().comments.get(&number).cloned().unwrap_or_default()
    }

    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.lock().pull_requests.values().cloned().collect()
    }

    pub fn reviews(&self) -> Vec<RecordedReview> {
        self.lock().reviews.clone()
    }

    /// Number of `create_pull_request` calls that succeeded.
    pub fn pr_creations(&self) -> usize {
        self.lock().pr_creations
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake tracker lock")
    }

    fn check(&self, op: FakeOp) -> Result<()> {
        if self.lock().failing.contains(&op) {
            bail!("injected failure: {op:?}");
        }
        Ok(())
    }

    fn remote_files(&self, head: &str) -> Result<Vec<PrFile>> {
        let Some((remote, base)) = &self.remote else {
            return Ok(Vec::new());
        };
        let range = format!("{base}...{head}");
        let names = git(remote, &["diff", "--name-only", &range])?;
        names
            .lines()
            .filter(|name| !name.is_empty())
            .map(|name| {
                let patch = git(remote, &["diff", &range, "--", name])?;
                Ok(PrFile {
                    filename: name.to_string(),
                    patch: Some(patch),
                })
            })
            .collect()
    }
}

impl Tracker for FakeTracker {
    fn authenticated_login(&self) -> Result<String> {
        self.check(FakeOp::AuthenticatedLogin)?;
        Ok(self.login.clone())
    }

    fn get_issue(&self, number: u64) -> Result<Issue> {
        self.check(FakeOp::GetIssue)?;
        let state = self.lock();
        if state.failing_issues.contains(&number) {
            bail!("injected failure: issue #{number}");
        }
        state
            .issues
            .get(&number)
            .cloned()
            .ok_or_else(|| anyhow!("issue #{number} not found"))
    }

    fn list_open_issues(&self, label: &str) -> Result<Vec<Issue>> {
        self.check(FakeOp::ListOpenIssues)?;
        Ok(self
            .lock()
            .issues
            .values()
            .filter(|issue| issue.labels.iter().any(|l| l == label))
            .cloned()
            .collect())
    }

    fn list_comments(&self, number: u64) -> Result<Vec<Comment>> {
        self.check(FakeOp::ListComments)?;
        Ok(self.comments(number))
    }

    fn create_comment(&self, number: u64, body: &str) -> Result<Comment> {
        self.check(FakeOp::CreateComment)?;
        Ok(self.lock().push_comment(number, &self.login, body))
    }

    fn list_open_pull_requests(&self, head: Option<&str>) -> Result<Vec<PullRequest>> {
        self.check(FakeOp::ListPullRequests)?;
        Ok(self
            .pull_requests()
            .into_iter()
            .filter(|pr| head.is_none_or(|h| pr.head_ref == h))
            .collect())
    }

    fn get_pull_request(&self, number: u64) -> Result<PullRequest> {
        self.lock()
            .pull_requests
            .get(&number)
            .cloned()
            .ok_or_else(|| anyhow!("pull request #{number} not found"))
    }

    fn list_pull_request_files(&self, number: u64) -> Result<Vec<PrFile>> {
        self.check(FakeOp::ListFiles)?;
        let (explicit, head) = {
            let state = self.lock();
            let head = state.pull_requests.get(&number).map(|pr| pr.head_ref.clone());
            (state.files.get(&number).cloned(), head)
        };
        if let Some(files) = explicit {
            return Ok(files);
        }
        match head {
            Some(head) => self.remote_files(&head),
            None => bail!("pull request #{number} not found"),
        }
    }

    fn create_pull_request(&self, request: &NewPullRequest) -> Result<PullRequest> {
        self.check(FakeOp::CreatePullRequest)?;
        let mut state = self.lock();
        let number = state.next_pr_number;
        state.next_pr_number += 1;
        state.pr_creations += 1;
        let pr = PullRequest {
            number,
            head_ref: request.head.clone(),
            title: request.title.clone(),
            body: request.body.clone(),
            html_url: pr_url(number),
        };
        state.pull_requests.insert(number, pr.clone());
        Ok(pr)
    }

    fn update_pull_request(&self, number: u64, title: &str, body: &str) -> Result<PullRequest> {
        self.check(FakeOp::UpdatePullRequest)?;
        let mut state = self.lock();
        let pr = state
            .pull_requests
            .get_mut(&number)
            .ok_or_else(|| anyhow!("pull request #{number} not found"))?;
        pr.title = title.to_string();
        pr.body = body.to_string();
        Ok(pr.clone())
    }

    fn create_review(&self, number: u64, verdict: Verdict, body: &str) -> Result<()> {
        self.check(FakeOp::CreateReview)?;
        self.lock().reviews.push(RecordedReview {
            pr_number: number,
            verdict,
            body: body.to_string(),
        });
        Ok(())
    }
}

pub fn pr_url(number: u64) -> String {
    format!("https://example.test/{REPOSITORY}/pull/{number}")
}

/// Completion service that replays queued responses and records prompts.
///
/// An exhausted queue answers `None`.
pub struct ScriptedLlm {
    configured: bool,
    responses: Mutex<VecDeque<Option<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            configured: true,
            responses: Mutex::new(responses.into_iter().map(|r| r.map(Into::into)).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new(Vec::<Option<String>>::new())
        }
    }

    /// User prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

impl TextCompletion for ScriptedLlm {
    fn is_configured(&self) -> bool {
        self.configured
    }

    fn complete(&self, _system: &str, user: &str) -> Option<String> {
        self.prompts.lock().expect("prompts lock").push(user.to_string());
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .flatten()
    }
}

/// Bare remote seeded with a `main` branch plus a working clone of it.
pub struct TestRepo {
    temp: TempDir,
    remote: PathBuf,
    clone: PathBuf,
    /// Not a working copy; hand this to the resolver to force the cached-clone path.
    outside: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let remote = temp.path().join("remote.git");
        let seed = temp.path().join("seed");
        let clone = temp.path().join("clone");
        let outside = temp.path().join("outside");
        fs::create_dir_all(&seed)?;
        fs::create_dir_all(&outside)?;

        git(temp.path(), &["init", "-q", "--bare", "remote.git"])?;
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"])?;

        git(&seed, &["init", "-q"])?;
        git(&seed, &["checkout", "-q", "-b", "main"])?;
        fs::write(seed.join("README.md"), "# widgets\n")?;
        git(&seed, &["add", "-A"])?;
        git(&seed, &["commit", "-q", "-m", "seed"])?;
        let remote_arg = remote.to_string_lossy().into_owned();
        git(&seed, &["remote", "add", "origin", &remote_arg])?;
        git(&seed, &["push", "-q", "origin", "main"])?;

        let clone_arg = clone.to_string_lossy().into_owned();
        git(temp.path(), &["clone", "-q", &remote_arg, &clone_arg])?;

        Ok(Self {
            temp,
            remote,
            clone,
            outside,
        })
    }

    pub fn remote(&self) -> &Path {
        &self.remote
    }

    pub fn clone_dir(&self) -> &Path {
        &self.clone
    }

    pub fn outside(&self) -> &Path {
        &self.outside
    }

    /// Root for cached clones made by the agent.
    pub fn cache_root(&self) -> PathBuf {
        self.outside.join("cache")
    }

    pub fn remote_branch_exists(&self, branch: &str) -> bool {
        let full_ref = format!("refs/heads/{branch}");
        git(&self.remote, &["rev-parse", "--verify", "--quiet", &full_ref]).is_ok()
    }

    /// Commits on `branch` in the remote.
    pub fn remote_commit_count(&self, branch: &str) -> Result<usize> {
        let out = git(&self.remote, &["rev-list", "--count", branch])?;
        Ok(out.trim().parse()?)
    }

    /// File contents at the tip of `branch` in the remote.
    pub fn remote_file(&self, branch: &str, path: &str) -> Option<String> {
        git(&self.remote, &["show", &format!("{branch}:{path}")]).ok()
    }

    /// Commit a file onto `branch` in the remote through a scratch clone.
    pub fn push_commit(&self, branch: &str, path: &str, contents: &str) -> Result<()> {
        let scratch = self.temp.path().join(format!("scratch-{}", branch.replace('/', "-")));
        let remote_arg = self.remote.to_string_lossy().into_owned();
        let scratch_arg = scratch.to_string_lossy().into_owned();
        git(self.temp.path(), &["clone", "-q", &remote_arg, &scratch_arg])?;
        if self.remote_branch_exists(branch) {
            git(&scratch, &["checkout", "-q", branch])?;
        } else {
            git(&scratch, &["checkout", "-q", "-b", branch])?;
        }
        let target = scratch.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, contents)?;
        git(&scratch, &["add", "-A"])?;
        git(&scratch, &["commit", "-q", "-m", "external change"])?;
        git(&scratch, &["push", "-q", "origin", branch])?;
        fs::remove_dir_all(&scratch)?;
        Ok(())
    }

    /// Commit `path` on a new local `branch` of the working clone without pushing.
    pub fn commit_local(&self, branch: &str, path: &str, contents: &str) -> Result<()> {
        git(&self.clone, &["checkout", "-q", "-b", branch])?;
        let target = self.clone.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, contents)?;
        git(&self.clone, &["add", "-A"])?;
        git(&self.clone, &["commit", "-q", "-m", "local change"])?;
        Ok(())
    }
}

/// Configuration pointing at `repo`'s remote with single-attempt calls.
pub fn test_config(repo: &TestRepo) -> AgentConfig {
    AgentConfig {
        token: "test-token".to_string(),
        repository: REPOSITORY.to_string(),
        clone_url: Some(repo.remote().to_string_lossy().into_owned()),
        workdir_root: repo.cache_root(),
        git_timeout_secs: 60,
        retry: RetryPolicy {
            max_attempts: 1,
            base_delay_ms: 0,
        },
        ..AgentConfig::default()
    }
}

fn git_command(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new("git");
    cmd.args(["-c", "user.name=Test", "-c", "user.email=test@example.test"])
        .args(["-c", "init.defaultBranch=main", "-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0");
    cmd
}

fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let out = git_command(dir, args).output()?;
    if !out.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}
