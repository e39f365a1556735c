//! CI run polling.
//!
//! After a publish, the poller samples the host's latest run on a fixed
//! interval and classifies it into [`BuildPhase`]. It ends on a terminal
//! verdict, after `max_polls` samples (`Timeout`), or when cancelled.
//!
//! Query failures and unrecognisable runs count as "no run yet" and are
//! retried on the next tick. Cancellation is checked on every wake-up and
//! again after every network call, so a result that arrives after a cancel
//! is dropped.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::build_log::tail_chars;
use super::host::{RunSummary, SourceHost};
use super::models::{ArtifactRef, BuildPhase, BuildRun, RunConclusion, RunStatus};

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_polls: u32,
    /// Characters kept from each failed job's log.
    pub job_log_chars: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_polls: 180,
            job_log_chars: 5000,
        }
    }
}

/// What to watch for.
#[derive(Debug, Clone, Default)]
pub struct PollTarget {
    /// Commit pushed by the publish; runs for other commits are ignored.
    pub head_sha: Option<String>,
    /// File name to download the artifact under.
    pub artifact_file_name: String,
}

/// One sample, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollUpdate {
    pub sample: u32,
    pub run_id: Option<u64>,
    pub phase: BuildPhase,
    pub percent: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Success {
        run: BuildRun,
        artifact: Option<ArtifactRef>,
    },
    /// A failed build (not a transport failure), with the failed jobs' log text.
    Failure { run: BuildRun, log: String },
    Timeout { samples: u32 },
    Cancelled,
}

impl PollOutcome {
    pub fn phase(&self) -> Option<BuildPhase> {
        match self {
            PollOutcome::Success { .. } => Some(BuildPhase::Success),
            PollOutcome::Failure { .. } => Some(BuildPhase::Failure),
            PollOutcome::Timeout { .. } => Some(BuildPhase::Timeout),
            PollOutcome::Cancelled => None,
        }
    }
}

/// Cosmetic progress: a random walk of 1-3 points per non-terminal tick,
/// held at 99 until a verdict arrives. Nothing may branch on it.
#[derive(Debug, Default)]
pub struct ProgressEstimator {
    percent: u8,
}

impl ProgressEstimator {
    pub const CEILING: u8 = 99;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn advance(&mut self) -> u8 {
        let step = rand::thread_rng().gen_range(1..=3u8);
        self.percent = self.percent.saturating_add(step).min(Self::CEILING);
        self.percent
    }

    pub fn finish(&mut self) -> u8 {
        self.percent = 100;
        self.percent
    }
}

/// Classify a sample. `None` means "no run for this publish yet".
fn classify(summary: &RunSummary, head_sha: Option<&str>) -> Option<BuildPhase> {
    if let (Some(expected), Some(actual)) = (head_sha, summary.head_sha.as_deref())
        && expected != actual
    {
        return None;
    }
    BuildPhase::from_run(&summary.status, summary.conclusion.as_deref())
}

fn projection(summary: &RunSummary, phase: BuildPhase, percent: u8) -> BuildRun {
    let (status, conclusion) = match phase {
        BuildPhase::Success => (RunStatus::Completed, Some(RunConclusion::Success)),
        BuildPhase::Failure => (RunStatus::Completed, Some(RunConclusion::Failure)),
        BuildPhase::Queued | BuildPhase::Idle | BuildPhase::Timeout => (RunStatus::Queued, None),
        BuildPhase::InProgress => (RunStatus::InProgress, None),
    };
    BuildRun {
        id: summary.id,
        status,
        conclusion,
        progress_percent: percent,
        html_url: summary.html_url.clone(),
    }
}

pub struct BuildStatusPoller {
    host: Arc<dyn SourceHost>,
    config: PollConfig,
}

impl BuildStatusPoller {
    pub fn new(host: Arc<dyn SourceHost>, config: PollConfig) -> Self {
        Self { host, config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll until a terminal outcome. `on_update` fires once per sample.
    pub async fn run(
        &self,
        target: &PollTarget,
        cancel: &CancellationToken,
        mut on_update: impl FnMut(PollUpdate) + Send,
    ) -> PollOutcome {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.config.interval,
            self.config.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut progress = ProgressEstimator::new();

        for sample in 1..=self.config.max_polls {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                _ = ticker.tick() => {}
            }

            let latest = match self.host.get_latest_run().await {
                Ok(latest) => latest,
                Err(e) => {
                    debug!(sample, error = %e, "run query failed, retrying next tick");
                    None
                }
            };
            if cancel.is_cancelled() {
                return PollOutcome::Cancelled;
            }

            let classified = latest.as_ref().and_then(|summary| {
                classify(summary, target.head_sha.as_deref()).map(|phase| (summary, phase))
            });

            match classified {
                Some((summary, BuildPhase::Success)) => {
                    let run = projection(summary, BuildPhase::Success, progress.finish());
                    on_update(PollUpdate {
                        sample,
                        run_id: Some(run.id),
                        phase: BuildPhase::Success,
                        percent: 100,
                    });
                    info!(run_id = run.id, sample, "build succeeded");
                    let artifact = self.fetch_artifact(run.id, target).await;
                    return PollOutcome::Success { run, artifact };
                }
                Some((summary, BuildPhase::Failure)) => {
                    let run = projection(summary, BuildPhase::Failure, progress.finish());
                    on_update(PollUpdate {
                        sample,
                        run_id: Some(run.id),
                        phase: BuildPhase::Failure,
                        percent: 100,
                    });
                    info!(run_id = run.id, sample, "build failed");
                    let log = self.failure_log(run.id).await;
                    return PollOutcome::Failure { run, log };
                }
                Some((summary, phase)) => on_update(PollUpdate {
                    sample,
                    run_id: Some(summary.id),
                    phase,
                    percent: progress.advance(),
                }),
                None => on_update(PollUpdate {
                    sample,
                    run_id: None,
                    phase: BuildPhase::Idle,
                    percent: progress.advance(),
                }),
            }
        }

        warn!(samples = self.config.max_polls, "gave up waiting for a build verdict");
        PollOutcome::Timeout {
            samples: self.config.max_polls,
        }
    }

    /// Spawn [`BuildStatusPoller::run`] in the background.
    ///
    /// After `cancel()`, neither callback fires again.
    pub fn start<U, T>(
        self: &Arc<Self>,
        target: PollTarget,
        on_update: U,
        on_terminal: T,
    ) -> PollHandle
    where
        U: FnMut(PollUpdate) + Send + 'static,
        T: FnOnce(PollOutcome) + Send + 'static,
    {
        let token = CancellationToken::new();
        let poller = Arc::clone(self);
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            let guard_token = task_token.clone();
            let mut on_update = on_update;
            let outcome = poller
                .run(&target, &task_token, move |update| {
                    if !guard_token.is_cancelled() {
                        on_update(update);
                    }
                })
                .await;
            if !task_token.is_cancelled() {
                on_terminal(outcome);
            }
        });
        PollHandle { token, task }
    }

    async fn fetch_artifact(&self, run_id: u64, target: &PollTarget) -> Option<ArtifactRef> {
        match self.host.get_run_artifact(run_id).await {
            Ok(Some(remote)) => Some(ArtifactRef {
                id: remote.id,
                name: remote.name,
                size_in_bytes: remote.size_in_bytes,
                download_url: remote.archive_download_url,
                run_id,
                file_name: target.artifact_file_name.clone(),
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(run_id, error = %e, "failed to look up build artifact");
                None
            }
        }
    }

    async fn failure_log(&self, run_id: u64) -> String {
        let jobs = match self.host.get_failure_logs(run_id).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(run_id, error = %e, "failed to fetch failed job logs");
                return String::new();
            }
        };
        let mut out = String::new();
        for job in jobs {
            if job.failed_steps.is_empty() {
                out.push_str(&format!("── job {} failed ──\n", job.job_name));
            } else {
                out.push_str(&format!(
                    "── job {} failed at: {} ──\n",
                    job.job_name,
                    job.failed_steps.join(", ")
                ));
            }
            let text = tail_chars(job.text.trim_end(), self.config.job_log_chars);
            if !text.is_empty() {
                out.push_str(&text);
                out.push('\n');
            }
        }
        out
    }
}

/// Handle to a background poll started with [`BuildStatusPoller::start`].
pub struct PollHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Stop sampling. Takes effect at the next tick boundary at the latest.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("poll task ended abnormally: {}", e);
        }
    }
}
