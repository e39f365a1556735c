//! The build cycle driver.
//!
//! One driver task at a time runs `publish -> poll -> (fix -> publish -> poll)*`
//! as a plain loop. Whether a failed build is followed by a fix is decided
//! by [`EternalLoopController`] at the moment the failure is handled, never
//! by a value captured when the cycle started.
//!
//! ```text
//!   build() / start_loop()
//!          │
//!          v
//!     ┌─ Publish ──> Poll ──┬─ Success ─> loop off, artifact stored
//!     │                     ├─ Timeout ─> loop off
//!     │                     ├─ Cancelled
//!     │                     └─ Failure ─┬─ loop off ─> done
//!     │                                 └─ loop on ──> Fix
//!     └──────────── fix delay ──────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ai::CodeGenerator;
use super::autofix::AutoFixOrchestrator;
use super::eternal::{EternalLoopController, FixGate};
use super::host::SourceHost;
use super::models::{ArtifactRef, BuildPhase, LoopState, StopReason};
use super::poller::{BuildStatusPoller, PollConfig, PollOutcome, PollTarget};
use super::publisher::RepositoryPublisher;
use super::session::BuildSession;
use super::ws::WsMessage;
use crate::config::BuildSection;
use crate::errors::{BuildError, PollError, PublishError};

/// The driver in flight. A cancelled driver keeps the slot until it has
/// actually exited, so no second cycle can start writing next to it.
struct DriverSlot {
    id: u64,
    cancel: CancellationToken,
    cancelled: bool,
}

enum Step {
    Publish,
    Fix,
}

/// How one publish+poll cycle ended.
enum CycleEnd {
    Failed,
    Ended(StopReason),
}

pub struct BuildOrchestrator {
    session: Arc<BuildSession>,
    host: Arc<dyn SourceHost>,
    publisher: RepositoryPublisher,
    poller: BuildStatusPoller,
    autofix: AutoFixOrchestrator,
    eternal: EternalLoopController,
    fix_delay: Duration,
    driver: Mutex<Option<DriverSlot>>,
    next_driver_id: AtomicU64,
}

impl BuildOrchestrator {
    pub fn new(
        session: Arc<BuildSession>,
        host: Arc<dyn SourceHost>,
        generator: Arc<dyn CodeGenerator>,
        build: &BuildSection,
    ) -> Self {
        let publisher =
            RepositoryPublisher::new(Arc::clone(&host), &build.workflow_path, &build.artifact_glob);
        let poller = BuildStatusPoller::new(
            Arc::clone(&host),
            PollConfig {
                interval: build.poll_interval(),
                max_polls: build.max_polls,
                job_log_chars: build.log_tail_chars,
            },
        );
        Self {
            session,
            host,
            publisher,
            poller,
            autofix: AutoFixOrchestrator::new(generator, build.log_tail_chars),
            eternal: EternalLoopController::new(build.max_fix_attempts),
            fix_delay: build.fix_delay(),
            driver: Mutex::new(None),
            next_driver_id: AtomicU64::new(1),
        }
    }

    pub fn session(&self) -> &Arc<BuildSession> {
        &self.session
    }

    pub fn destination(&self) -> Option<String> {
        self.publisher.destination()
    }

    pub fn loop_state(&self) -> LoopState {
        self.eternal.state()
    }

    pub fn max_fix_attempts(&self) -> Option<u32> {
        self.eternal.max_attempts()
    }

    pub fn is_building(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<DriverSlot>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn default_message(&self) -> String {
        format!("Update {} via plugin-forge", self.session.settings().project_name)
    }

    /// Reject a build before anything is pushed.
    fn check_ready(&self) -> Result<(), PublishError> {
        if self.publisher.destination().is_none() {
            return Err(PublishError::NotConfigured(
                "no repository or credentials linked".to_string(),
            ));
        }
        if self.session.project().is_empty() {
            return Err(PublishError::EmptyProject);
        }
        Ok(())
    }

    fn claim(slot: &mut Option<DriverSlot>, id: u64) -> CancellationToken {
        let cancel = CancellationToken::new();
        *slot = Some(DriverSlot {
            id,
            cancel: cancel.clone(),
            cancelled: false,
        });
        cancel
    }

    fn spawn_driver(self: &Arc<Self>, slot: &mut Option<DriverSlot>, message: String) {
        let id = self.next_driver_id.fetch_add(1, Ordering::Relaxed);
        let cancel = Self::claim(slot, id);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let reason = this.drive(id, cancel, message).await;
            info!(reason = %reason.describe(), "build driver finished");
        });
    }

    /// Start one publish+poll cycle in the background.
    ///
    /// A failure is only followed by a fix if the eternal loop is on when
    /// the failure is handled.
    pub fn build(self: &Arc<Self>, message: Option<String>) -> Result<(), BuildError> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(PollError::AlreadyRunning.into());
        }
        self.check_ready()?;
        let message = message.unwrap_or_else(|| self.default_message());
        self.spawn_driver(&mut slot, message);
        Ok(())
    }

    /// Run a build to its end on the current task and report why it ended.
    pub async fn run_build(
        self: &Arc<Self>,
        eternal: bool,
        message: Option<String>,
    ) -> Result<StopReason, BuildError> {
        let (id, cancel) = {
            let mut slot = self.slot();
            if slot.is_some() {
                return Err(PollError::AlreadyRunning.into());
            }
            self.check_ready()?;
            if eternal && self.eternal.start() {
                self.announce_loop_start();
            }
            let id = self.next_driver_id.fetch_add(1, Ordering::Relaxed);
            (id, Self::claim(&mut slot, id))
        };
        let message = message.unwrap_or_else(|| self.default_message());
        Ok(self.drive(id, cancel, message).await)
    }

    /// Switch the eternal loop on. Kicks off a publish unless a build is
    /// already in flight, in which case that build's failure will be fixed.
    ///
    /// Returns `false` if the loop was already running.
    pub fn start_loop(self: &Arc<Self>) -> Result<bool, BuildError> {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|s| s.cancelled) {
            return Err(PollError::AlreadyRunning.into());
        }
        if self.eternal.is_active() {
            return Ok(false);
        }
        if slot.is_none() {
            self.check_ready()?;
        }
        if !self.eternal.start() {
            return Ok(false);
        }
        self.announce_loop_start();
        if slot.is_none() {
            let message = self.default_message();
            self.spawn_driver(&mut slot, message);
        } else {
            self.session
                .log("A build is already running; its failure will be fixed automatically");
        }
        Ok(true)
    }

    /// Switch the eternal loop off. The build in flight, if any, runs to its
    /// verdict but no fix follows it.
    pub fn stop_loop(&self) -> bool {
        self.halt_loop(StopReason::UserRequested).is_some()
    }

    /// Cancel the build in flight and switch the loop off.
    ///
    /// The slot stays taken until the driver notices and exits; until then
    /// new builds are refused. Returns `false` if nothing was left to cancel.
    pub fn cancel_build(&self) -> bool {
        let cancelled = {
            let mut slot = self.slot();
            match slot.as_mut() {
                Some(driver) if !driver.cancelled => {
                    driver.cancelled = true;
                    driver.cancel.cancel();
                    true
                }
                _ => false,
            }
        };
        self.halt_loop(StopReason::UserRequested);
        if cancelled {
            self.session.log("Build cancelled");
            self.session.emit(&WsMessage::BuildCancelled);
        }
        cancelled
    }

    pub fn shutdown(&self) {
        if self.cancel_build() {
            info!("cancelled in-flight build on shutdown");
        }
    }

    /// Download the artifact of the last successful build.
    pub async fn download_artifact(&self) -> Result<(ArtifactRef, Vec<u8>), PollError> {
        let artifact = self.session.artifact().ok_or(PollError::NoArtifact)?;
        let bytes = self
            .host
            .download_artifact(&artifact.download_url)
            .await
            .map_err(PollError::Artifact)?;
        Ok((artifact, bytes))
    }

    fn announce_loop_start(&self) {
        self.session.log("Eternal loop started: failed builds will be fixed and rebuilt");
        self.session.emit(&WsMessage::LoopStarted {
            state: self.eternal.state(),
        });
    }

    /// Switch the loop off (if on) and tell everyone why.
    fn halt_loop(&self, reason: StopReason) -> Option<LoopState> {
        let last = self.eternal.stop()?;
        self.announce_loop_stop(last.attempt_count, reason);
        Some(last)
    }

    fn announce_loop_stop(&self, attempt_count: u32, reason: StopReason) {
        self.session.log(format!(
            "Eternal loop stopped ({}) after {} fix attempt(s)",
            reason.describe(),
            attempt_count
        ));
        self.session.emit(&WsMessage::LoopStopped {
            state: LoopState {
                active: false,
                attempt_count,
            },
            reason,
        });
    }

    /// Decide, under the driver lock, whether this driver exits. A loop
    /// switched on while the driver was finishing keeps it alive.
    fn release_or_resume(&self, id: u64, cancel: &CancellationToken) -> bool {
        let mut slot = self.slot();
        if !cancel.is_cancelled() && self.eternal.is_active() {
            return true;
        }
        if slot.as_ref().is_some_and(|s| s.id == id) {
            *slot = None;
        }
        false
    }

    async fn drive(&self, id: u64, cancel: CancellationToken, message: String) -> StopReason {
        let mut step = Step::Publish;
        let mut cycle = 0;
        let mut last_failed = false;
        loop {
            let ended = match step {
                Step::Publish => {
                    cycle += 1;
                    match self.cycle(cycle, &cancel, &message).await {
                        CycleEnd::Failed if self.eternal.is_active() => {
                            last_failed = true;
                            step = Step::Fix;
                            continue;
                        }
                        CycleEnd::Failed => {
                            last_failed = true;
                            self.session.log("Eternal loop is off; not attempting a fix");
                            StopReason::BuildFailed
                        }
                        CycleEnd::Ended(reason) => {
                            last_failed = false;
                            reason
                        }
                    }
                }
                Step::Fix => match self.fix_attempt(&cancel).await {
                    Ok(()) => {
                        step = Step::Publish;
                        continue;
                    }
                    Err(reason) => reason,
                },
            };

            if self.release_or_resume(id, &cancel) {
                step = if last_failed { Step::Fix } else { Step::Publish };
                continue;
            }
            return ended;
        }
    }

    async fn cycle(&self, cycle: u32, cancel: &CancellationToken, message: &str) -> CycleEnd {
        let project = self.session.project();
        let settings = self.session.settings();

        self.session.emit(&WsMessage::PublishStarted {
            cycle,
            file_count: project.files.len(),
        });
        self.session.log(format!(
            "[cycle {}] Publishing {} files to {}",
            cycle,
            project.files.len(),
            self.publisher.destination().unwrap_or_else(|| "<unlinked>".into())
        ));

        let report = match self
            .publisher
            .publish(&project, &settings, message, cancel)
            .await
        {
            Ok(report) => report,
            Err(PublishError::Cancelled { written, total }) => {
                self.session.log(format!(
                    "[cycle {}] Publish stopped after {} of {} files",
                    cycle, written, total
                ));
                return CycleEnd::Ended(StopReason::Cancelled);
            }
            Err(e) => {
                warn!(cycle, error = %e, "publish failed");
                let error = e.to_string();
                self.session.log(format!("[cycle {}] Publish failed: {}", cycle, error));
                self.session.emit(&WsMessage::PublishFailed {
                    cycle,
                    error: error.clone(),
                });
                let reason = StopReason::PublishFailed(error);
                self.halt_loop(reason.clone());
                return CycleEnd::Ended(reason);
            }
        };
        if cancel.is_cancelled() {
            self.session.log(format!(
                "[cycle {}] Publish finished after cancel; result discarded",
                cycle
            ));
            return CycleEnd::Ended(StopReason::Cancelled);
        }
        self.session.replace_project(report.project);
        self.session.log(format!(
            "[cycle {}] Pushed {} files{}",
            cycle,
            report.written.len(),
            report
                .head_sha
                .as_deref()
                .map(|sha| format!(" (head {})", &sha[..sha.len().min(7)]))
                .unwrap_or_default()
        ));
        self.session.emit(&WsMessage::PublishCompleted {
            cycle,
            written: report.written,
            head_sha: report.head_sha.clone(),
        });

        self.session.log(format!("[cycle {}] Waiting for CI", cycle));
        let target = PollTarget {
            head_sha: report.head_sha,
            artifact_file_name: settings.artifact_file_name(),
        };
        let session = Arc::clone(&self.session);
        let mut last_phase = None;
        let outcome = self
            .poller
            .run(&target, cancel, move |update| {
                if last_phase != Some(update.phase) {
                    last_phase = Some(update.phase);
                    session.log(format!(
                        "[cycle {}] CI: {} ({}%)",
                        cycle,
                        phase_label(update.phase),
                        update.percent
                    ));
                }
                session.emit(&WsMessage::BuildProgress {
                    run_id: update.run_id,
                    phase: update.phase,
                    percent: update.percent,
                    sample: update.sample,
                });
            })
            .await;

        match outcome {
            PollOutcome::Success { run, artifact } => {
                match &artifact {
                    Some(a) => self.session.log(format!(
                        "[cycle {}] Build succeeded; artifact {} ({} bytes) ready as {}",
                        cycle, a.name, a.size_in_bytes, a.file_name
                    )),
                    None => self
                        .session
                        .log(format!("[cycle {}] Build succeeded; no artifact found", cycle)),
                }
                self.session.set_artifact(artifact.clone());
                self.session
                    .emit(&WsMessage::BuildSucceeded { run, artifact });
                self.halt_loop(StopReason::BuildSucceeded);
                CycleEnd::Ended(StopReason::BuildSucceeded)
            }
            PollOutcome::Failure { run, log } => {
                self.session
                    .log(format!("[cycle {}] Build failed (run {})", cycle, run.id));
                if log.trim().is_empty() {
                    self.session.log("No job logs were available for the failed run");
                } else {
                    self.session.log(log);
                }
                self.session.emit(&WsMessage::BuildFailed { run });
                CycleEnd::Failed
            }
            PollOutcome::Timeout { samples } => {
                self.session.log(format!(
                    "[cycle {}] Gave up waiting for CI after {} checks",
                    cycle, samples
                ));
                self.session.emit(&WsMessage::BuildTimedOut { samples });
                self.halt_loop(StopReason::Timeout);
                CycleEnd::Ended(StopReason::Timeout)
            }
            PollOutcome::Cancelled => {
                self.session
                    .log(format!("[cycle {}] Stopped watching CI", cycle));
                CycleEnd::Ended(StopReason::Cancelled)
            }
        }
    }

    /// One repair round. `Ok` means "republish now".
    async fn fix_attempt(&self, cancel: &CancellationToken) -> Result<(), StopReason> {
        let attempt = match self.eternal.try_begin_fix() {
            FixGate::Proceed { attempt } => attempt,
            FixGate::Inactive => {
                self.session.log("Eternal loop is off; not attempting a fix");
                return Err(StopReason::UserRequested);
            }
            FixGate::CapReached { attempts } => {
                let reason = StopReason::AttemptCapReached(attempts);
                self.announce_loop_stop(attempts, reason.clone());
                return Err(reason);
            }
        };

        self.session.emit(&WsMessage::FixStarted { attempt });
        self.session
            .log(format!("[fix {}] Asking the AI to fix the build", attempt));

        let project = self.session.project();
        let log = self.session.log_snapshot();
        let settings = self.session.settings();
        let result = self.autofix.fix(&project, &log, &settings).await;
        if cancel.is_cancelled() {
            self.session.log(format!(
                "[fix {}] Build was cancelled; AI answer discarded",
                attempt
            ));
            return Err(StopReason::Cancelled);
        }
        match result {
            Ok(fixed) => {
                let file_count = fixed.files.len();
                let explanation = fixed.explanation.clone();
                self.session.replace_project(fixed);
                self.session.log(format!(
                    "[fix {}] AI returned {} files{}",
                    attempt,
                    file_count,
                    if explanation.is_empty() {
                        String::new()
                    } else {
                        format!(": {}", explanation)
                    }
                ));
                self.session
                    .emit(&WsMessage::FixCompleted { attempt, file_count });
            }
            Err(e) => {
                warn!(attempt, error = %e, "fix attempt failed");
                let error = e.to_string();
                self.session
                    .log(format!("[fix {}] Fix failed: {}", attempt, error));
                self.session.emit(&WsMessage::FixFailed {
                    attempt,
                    error: error.clone(),
                });
                let reason = StopReason::FixFailed(error);
                self.halt_loop(reason.clone());
                return Err(reason);
            }
        }

        if !self.eternal.is_active() {
            self.session
                .log("Eternal loop was stopped; the fixed project was not republished");
            return Err(StopReason::UserRequested);
        }

        self.session.log(format!(
            "[fix {}] Republishing in {}s",
            attempt,
            self.fix_delay.as_secs()
        ));
        tokio::select! {
            _ = cancel.cancelled() => return Err(StopReason::Cancelled),
            _ = tokio::time::sleep(self.fix_delay) => {}
        }
        if !self.eternal.is_active() {
            self.session
                .log("Eternal loop was stopped; the fixed project was not republished");
            return Err(StopReason::UserRequested);
        }
        Ok(())
    }
}

fn phase_label(phase: BuildPhase) -> &'static str {
    match phase {
        BuildPhase::Idle => "waiting for the run to appear",
        BuildPhase::Queued => "queued",
        BuildPhase::InProgress => "building",
        BuildPhase::Success => "succeeded",
        BuildPhase::Failure => "failed",
        BuildPhase::Timeout => "timed out",
    }
}
