//! Mirror-failover launch loop.
//!
//! The launcher brings the stack up by rewriting the composition document
//! for one registry mirror at a time and calling `docker-compose up -d`.
//!
//! # Rotation
//!
//! Mirrors are drawn uniformly at random from those not yet tried in the
//! current cycle, so concurrent installs do not all hit the same registry
//! first. A mirror stays marked as tried after any failure, rate limit or
//! otherwise, so a broken mirror is not retried until every other mirror
//! has had its turn. When none remain the cycle ends: the tried set is
//! cleared, the launcher waits [`LaunchPolicy::cycle_backoff`] and the cycle
//! counter is incremented. After [`LaunchPolicy::max_retries`] cycles the
//! launcher gives up and returns [`LaunchOutcome::Exhausted`].
//!
//! ```text
//!   ┌─────────────┐  none left   ┌──────────────────────────┐
//!   │ pick mirror │─────────────▶│ clear, sleep 60s, cycle+1│──┐
//!   └─────────────┘              └──────────────────────────┘  │
//!          │ mirror                                            │
//!          ▼                                                   │
//!   ┌─────────────┐  ok   ┌────────────┐                       │
//!   │ write + up  │──────▶│ settle 10s │──▶ Started            │
//!   └─────────────┘       └────────────┘                       │
//!          │ failed                                            │
//!          ▼                                                   │
//!   classify, sleep 5s ──────────▶ pick mirror ◀───────────────┘
//! ```

use crate::compose::Compose;
use crate::config::{DatabaseCredentials, LaunchPolicy, StackLayout};
use crate::error::Result;
use crate::process::{CommandOutput, CommandRunner};
use crate::templates::{write_composition, CompositionParams};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::fmt;

/// Substrings that identify a registry rate-limit response.
const RATE_LIMIT_MARKERS: &[&str] = &["toomanyrequests", "too many requests"];

/// Why a single `up` attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchFailure {
    /// The registry rejected the pull with a rate-limit error.
    RateLimited,
    /// Any other non-zero exit or a failure to start the orchestrator.
    Other,
}

impl fmt::Display for LaunchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate limited"),
            Self::Other => write!(f, "error"),
        }
    }
}

/// Classify the output of a failed `up` call.
pub fn classify_failure(output: &CommandOutput) -> LaunchFailure {
    if RATE_LIMIT_MARKERS
        .iter()
        .any(|marker| output.contains_ignore_case(marker))
    {
        LaunchFailure::RateLimited
    } else {
        LaunchFailure::Other
    }
}

/// Final result of [`StackLauncher::launch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The stack came up on `mirror`.
    Started {
        /// Mirror used by the successful attempt.
        mirror: String,
        /// Total `up` invocations, including the successful one.
        attempts: u32,
        /// Completed cycles before the success.
        cycles: u32,
    },
    /// Every cycle ended without a successful `up`.
    Exhausted {
        /// Completed cycles (equals the configured maximum).
        cycles: u32,
        /// Total `up` invocations.
        attempts: u32,
    },
}

/// Next step chosen by [`MirrorRotation::select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection<'a> {
    /// Try this mirror.
    Mirror(&'a str),
    /// Every mirror was tried this cycle; the tried set has been cleared.
    CycleExhausted,
}

/// Retry state for one launch: tried mirrors and completed cycles.
#[derive(Debug, Clone)]
pub struct MirrorRotation<'a> {
    mirrors: &'a [String],
    used: HashSet<&'a str>,
    cycles: u32,
}

impl<'a> MirrorRotation<'a> {
    /// Start a fresh rotation over `mirrors`.
    pub fn new(mirrors: &'a [String]) -> Self {
        Self {
            mirrors,
            used: HashSet::with_capacity(mirrors.len()),
            cycles: 0,
        }
    }

    /// Mirrors not yet tried in this cycle, in configuration order.
    pub fn available(&self) -> Vec<&'a str> {
        self.mirrors
            .iter()
            .map(String::as_str)
            .filter(|m| !self.used.contains(m))
            .collect()
    }

    /// Mirrors already tried in this cycle.
    pub fn used(&self) -> &HashSet<&'a str> {
        &self.used
    }

    /// Number of completed cycles.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Pick an untried mirror, or end the cycle when none remain.
    ///
    /// The chosen mirror is marked as tried before it is returned.
    pub fn select<G: Rng + ?Sized>(&mut self, rng: &mut G) -> Selection<'a> {
        let available = self.available();
        match available.choose(rng) {
            Some(&mirror) => {
                self.used.insert(mirror);
                Selection::Mirror(mirror)
            }
            None => {
                self.used.clear();
                self.cycles += 1;
                Selection::CycleExhausted
            }
        }
    }
}

/// Brings the stack up, rotating across registry mirrors on failure.
pub struct StackLauncher<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    layout: &'a StackLayout,
    policy: &'a LaunchPolicy,
    credentials: &'a DatabaseCredentials,
    rng: StdRng,
}

impl<'a, R: CommandRunner + ?Sized> StackLauncher<'a, R> {
    /// Create a launcher with an entropy-seeded mirror picker.
    pub fn new(
        runner: &'a R,
        layout: &'a StackLayout,
        policy: &'a LaunchPolicy,
        credentials: &'a DatabaseCredentials,
    ) -> Self {
        Self {
            runner,
            layout,
            policy,
            credentials,
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a fixed seed for mirror selection.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Run the launch loop, publishing nginx on `port`.
    ///
    /// # Errors
    ///
    /// Only a failure to write the composition document is returned as an
    /// error. Orchestrator failures are retried and, once every cycle is
    /// spent, reported as [`LaunchOutcome::Exhausted`].
    pub async fn launch(&mut self, port: u16) -> Result<LaunchOutcome> {
        let policy = self.policy;
        tracing::info!(
            port,
            mirrors = policy.mirrors.len(),
            max_retries = policy.max_retries,
            "Starting stack"
        );

        let compose = Compose::new(self.runner, self.layout);
        let mut rotation = MirrorRotation::new(&policy.mirrors);
        let mut attempts = 0u32;

        while rotation.cycles() < policy.max_retries {
            let mirror = match rotation.select(&mut self.rng) {
                Selection::Mirror(mirror) => mirror,
                Selection::CycleExhausted => {
                    tracing::info!(
                        cycle = rotation.cycles(),
                        backoff_secs = policy.cycle_backoff.as_secs(),
                        "All mirrors attempted, starting new retry cycle"
                    );
                    tokio::time::sleep(policy.cycle_backoff).await;
                    continue;
                }
            };

            attempts += 1;
            tracing::info!(mirror, attempt = attempts, "Trying mirror");

            write_composition(
                self.layout,
                &CompositionParams {
                    mirror,
                    port,
                    credentials: self.credentials,
                },
            )
            .await?;

            let failure = match compose.up().await {
                Ok(output) if output.success() => {
                    tokio::time::sleep(policy.settle_interval).await;
                    tracing::info!(mirror, attempts, "Stack started");
                    return Ok(LaunchOutcome::Started {
                        mirror: mirror.to_string(),
                        attempts,
                        cycles: rotation.cycles(),
                    });
                }
                Ok(output) => {
                    let failure = classify_failure(&output);
                    match failure {
                        LaunchFailure::RateLimited => tracing::warn!(
                            mirror,
                            "Rate limit hit for mirror, trying next mirror"
                        ),
                        LaunchFailure::Other => tracing::warn!(
                            mirror,
                            exit_code = output.exit_code,
                            error = output.summary(),
                            "Error starting containers"
                        ),
                    }
                    failure
                }
                Err(e) => {
                    tracing::warn!(mirror, error = %e, "Error starting containers");
                    LaunchFailure::Other
                }
            };

            tracing::debug!(
                mirror,
                %failure,
                backoff_secs = policy.mirror_backoff.as_secs(),
                "Backing off before next mirror"
            );
            tokio::time::sleep(policy.mirror_backoff).await;
        }

        tracing::error!(
            cycles = rotation.cycles(),
            attempts,
            "All mirrors failed"
        );
        Ok(LaunchOutcome::Exhausted {
            cycles: rotation.cycles(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackError;
    use crate::process::CommandSpec;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    enum Reply {
        Ok,
        Fail(&'static str),
        SpawnError,
    }

    /// Replays scripted results for `up` and records the mirror found in
    /// the composition document at each call.
    struct ScriptedRunner {
        replies: Mutex<VecDeque<Reply>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    fn mirror_in(doc: &str) -> String {
        let line = doc
            .lines()
            .find(|l| l.trim_start().starts_with("image:"))
            .expect("document has an image line");
        let image = line.trim_start().trim_start_matches("image:").trim();
        image.split('/').next().unwrap().to_string()
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: &CommandSpec) -> crate::Result<CommandOutput> {
            let file = &spec.get_args()[1];
            let doc = std::fs::read_to_string(file).expect("compose file exists at up");
            self.seen.lock().unwrap().push(mirror_in(&doc));

            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Reply::Fail("error"));
            match reply {
                Reply::Ok => Ok(CommandOutput::default()),
                Reply::Fail(stderr) => Ok(CommandOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                }),
                Reply::SpawnError => Err(StackError::Spawn {
                    program: spec.program().display().to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                }),
            }
        }
    }

    fn policy(mirrors: &[&str], max_retries: u32) -> LaunchPolicy {
        LaunchPolicy {
            mirrors: mirrors.iter().map(|m| m.to_string()).collect(),
            max_retries,
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_failure() {
        let rate_limited = CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "Error response from daemon: toomanyrequests: You have reached your pull rate limit".into(),
        };
        assert_eq!(classify_failure(&rate_limited), LaunchFailure::RateLimited);

        let http_429 = CommandOutput {
            exit_code: 1,
            stdout: "429 Too Many Requests".into(),
            stderr: String::new(),
        };
        assert_eq!(classify_failure(&http_429), LaunchFailure::RateLimited);

        let other = CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "manifest unknown".into(),
        };
        assert_eq!(classify_failure(&other), LaunchFailure::Other);
    }

    #[test]
    fn test_rotation_tries_every_mirror_before_reset() {
        let mirrors: Vec<String> = ["a", "b", "c"].iter().map(|m| m.to_string()).collect();
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut rotation = MirrorRotation::new(&mirrors);
            let mut cycle = HashSet::new();

            for _ in 0..3 {
                match rotation.select(&mut rng) {
                    Selection::Mirror(m) => assert!(cycle.insert(m), "{m} repeated in cycle"),
                    Selection::CycleExhausted => panic!("cycle ended early"),
                }
                assert!(rotation
                    .used()
                    .iter()
                    .all(|m| mirrors.iter().any(|x| x.as_str() == *m)));
            }
            assert_eq!(cycle.len(), 3);
            assert_eq!(rotation.cycles(), 0);
            assert!(rotation.available().is_empty());

            assert_eq!(rotation.select(&mut rng), Selection::CycleExhausted);
            assert!(rotation.used().is_empty());
            assert_eq!(rotation.cycles(), 1);
            assert_eq!(rotation.available(), vec!["a", "b", "c"]);
        }
    }

    #[test]
    fn test_rotation_clears_only_when_full() {
        let mirrors: Vec<String> = ["a", "b", "c", "d"].iter().map(|m| m.to_string()).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let mut rotation = MirrorRotation::new(&mirrors);

        for _ in 0..40 {
            let was_full = rotation.used().len() == mirrors.len();
            match rotation.select(&mut rng) {
                Selection::CycleExhausted => assert!(was_full),
                Selection::Mirror(_) => assert!(!was_full),
            }
        }
        assert_eq!(rotation.cycles(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_rate_limited_exhausts_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StackLayout::new(dir.path());
        let policy = policy(&["a", "b", "c"], 3);
        let credentials = DatabaseCredentials::default();
        let runner = ScriptedRunner::new(
            (0..9).map(|_| Reply::Fail("toomanyrequests")).collect(),
        );

        let start = Instant::now();
        let outcome = StackLauncher::new(&runner, &layout, &policy, &credentials)
            .with_seed(1)
            .launch(40000)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            LaunchOutcome::Exhausted {
                cycles: 3,
                attempts: 9
            }
        );

        let seen = runner.seen();
        assert_eq!(seen.len(), 9);
        for cycle in seen.chunks(3) {
            let mut sorted = cycle.to_vec();
            sorted.sort();
            assert_eq!(sorted, vec!["a", "b", "c"]);
        }

        // 9 mirror back-offs plus 3 cycle back-offs.
        assert_eq!(start.elapsed(), Duration::from_secs(9 * 5 + 3 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_second_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StackLayout::new(dir.path());
        let policy = policy(&["a", "b", "c"], 3);
        let credentials = DatabaseCredentials::default();
        let runner = ScriptedRunner::new(vec![Reply::Fail("manifest unknown"), Reply::Ok]);

        let start = Instant::now();
        let outcome = StackLauncher::new(&runner, &layout, &policy, &credentials)
            .with_seed(42)
            .launch(40001)
            .await
            .unwrap();

        let seen = runner.seen();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);

        let LaunchOutcome::Started {
            mirror,
            attempts,
            cycles,
        } = outcome
        else {
            panic!("expected the stack to start");
        };
        assert_eq!(mirror, seen[1]);
        assert_eq!(attempts, 2);
        assert_eq!(cycles, 0);

        let on_disk = std::fs::read_to_string(layout.compose_file()).unwrap();
        assert_eq!(mirror_in(&on_disk), mirror);
        assert!(on_disk.contains("\"40001:80\""));

        // One mirror back-off plus the settle interval.
        assert_eq!(start.elapsed(), Duration::from_secs(5 + 10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StackLayout::new(dir.path());
        let policy = policy(&["a", "b", "c"], 3);
        let credentials = DatabaseCredentials::default();
        let runner = ScriptedRunner::new(vec![Reply::Ok]);

        let outcome = StackLauncher::new(&runner, &layout, &policy, &credentials)
            .launch(40002)
            .await
            .unwrap();

        assert!(matches!(outcome, LaunchOutcome::Started { attempts: 1, .. }));
        assert_eq!(runner.seen().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_failure_moves_to_next_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StackLayout::new(dir.path());
        let policy = policy(&["a", "b"], 1);
        let credentials = DatabaseCredentials::default();
        let runner = ScriptedRunner::new(vec![Reply::SpawnError, Reply::Ok]);

        let outcome = StackLauncher::new(&runner, &layout, &policy, &credentials)
            .launch(40003)
            .await
            .unwrap();

        assert!(matches!(outcome, LaunchOutcome::Started { attempts: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_cycle_reset() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StackLayout::new(dir.path());
        let policy = policy(&["a", "b"], 3);
        let credentials = DatabaseCredentials::default();
        let runner = ScriptedRunner::new(vec![
            Reply::Fail("toomanyrequests"),
            Reply::Fail("toomanyrequests"),
            Reply::Ok,
        ]);

        let outcome = StackLauncher::new(&runner, &layout, &policy, &credentials)
            .with_seed(3)
            .launch(40004)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            LaunchOutcome::Started {
                attempts: 3,
                cycles: 1,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_never_invokes_orchestrator() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StackLayout::new(dir.path());
        let policy = policy(&["a"], 0);
        let credentials = DatabaseCredentials::default();
        let runner = ScriptedRunner::new(vec![Reply::Ok]);

        let outcome = StackLauncher::new(&runner, &layout, &policy, &credentials)
            .launch(40005)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            LaunchOutcome::Exhausted {
                cycles: 0,
                attempts: 0
            }
        );
        assert!(runner.seen().is_empty());
        assert!(!layout.compose_file().exists());
    }

    #[tokio::test]
    async fn test_unwritable_layout_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StackLayout::new(dir.path().join("missing").join("deeper"));
        let policy = policy(&["a"], 1);
        let credentials = DatabaseCredentials::default();
        let runner = ScriptedRunner::new(vec![Reply::Ok]);

        let result = StackLauncher::new(&runner, &layout, &policy, &credentials)
            .launch(40006)
            .await;

        assert!(matches!(result, Err(StackError::Io(_))));
        assert!(runner.seen().is_empty());
    }
}
