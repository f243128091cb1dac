//! Flow controller (§4.1): orchestrates one meeting's lifecycle through a
//! [`PlatformStrategy`], racing audio/speaker capture against removal
//! detection, and feeding the exit detector on a fixed tick.
//!
//! All mutable meeting state (roster, speaker tracker, exit detector) is
//! owned by this one async function; the platform strategy and the
//! transcription client run as futures polled from the same `select!`, not
//! as independently-scheduled parallel mutators (§5).

use std::time::Instant;

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{
    audio::AudioPipeline,
    config::{BotConfig, Task},
    control_plane::StopFlag,
    exit_detector::{ExitDetector, TickInputs, TICK},
    participant::{Participant, Roster},
    session::Session,
    speaker_tracker::SpeakerTracker,
    status::{Stage, StatusReporter},
    transcription::{ClientCommand, GatewayEvent, TranscriptionClient},
};

use super::strategy::{AdmissionOutcome, Observation, PlatformStrategy, RemovalSignal, StrategyReason};

/// Terminal result of one controller run, carrying enough information for
/// `main` to map it to a process exit code (§6).
#[derive(Clone, Debug)]
pub enum Outcome {
    /// Normal completion, `exit 0`.
    Completed(String),
    /// Join or setup failure, `exit 1`.
    SetupFailed(String),
    /// Admission was rejected or timed out, `exit 2`.
    AdmissionFailed(String),
}

/// State shared between the observation callback (writer) and the 5-second
/// exit-detector tick (reader). Locked only synchronously, never held
/// across an `.await` point.
struct SharedState {
    roster: Roster,
    tracker: SpeakerTracker,
    ui_present: bool,
    last_speech: Option<Instant>,
    reset_since_last_tick: bool,
}

pub struct FlowController {
    strategy: Box<dyn PlatformStrategy>,
    config: BotConfig,
    stop: StopFlag,
    status: StatusReporter,
    gateway_url: url::Url,
    model: String,
}

impl FlowController {
    #[must_use]
    pub fn new(
        strategy: Box<dyn PlatformStrategy>,
        config: BotConfig,
        stop: StopFlag,
        status: StatusReporter,
        gateway_url: url::Url,
        model: impl Into<String>,
    ) -> Self {
        Self {
            strategy,
            config,
            stop,
            status,
            gateway_url,
            model: model.into(),
        }
    }

    pub async fn run(mut self, mut reconfigure_rx: mpsc::UnboundedReceiver<crate::control_plane::ReconfigureRequest>) -> Outcome {
        let prefix = self.config.platform.reason_prefix();

        self.status.report(Stage::Joining, None, None).await;
        if let Err(e) = self.strategy.join().await {
            let reason = e.to_string();
            let _ = self.strategy.leave("join_error").await;
            self.status
                .report(Stage::Failed, Some(reason.clone()), None)
                .await;
            return Outcome::SetupFailed(reason);
        }

        if self.stop.is_set() {
            let _ = self.strategy.leave("stopped").await;
            self.status
                .report(Stage::Completed, Some("stopped".into()), None)
                .await;
            return Outcome::Completed("stopped".into());
        }

        self.status.report(Stage::AwaitingAdmission, None, None).await;

        let timeout_ms = self.config.automatic_leave.waiting_room_timeout_ms;
        let (admission, prepared) =
            tokio::join!(self.strategy.wait_for_admission(timeout_ms), self.strategy.prepare());

        if let Err(e) = prepared {
            let reason = e.to_string();
            let _ = self.strategy.leave("setup_error").await;
            self.status
                .report(Stage::Failed, Some(reason.clone()), None)
                .await;
            return Outcome::SetupFailed(reason);
        }

        let admission = match admission {
            Ok(a) => a,
            Err(e) => {
                let reason = e.to_string();
                let _ = self.strategy.leave("admission_error").await;
                self.status
                    .report(Stage::Failed, Some(reason.clone()), None)
                    .await;
                return Outcome::SetupFailed(reason);
            }
        };

        let rejection = match admission {
            AdmissionOutcome::Admitted => None,
            AdmissionOutcome::Rejected => Some(StrategyReason::AdmissionRejected),
            AdmissionOutcome::Timeout => Some(StrategyReason::AdmissionTimeout),
        };
        if let Some(reason) = rejection {
            let prefixed = reason.with_prefix(prefix);
            let _ = self.strategy.leave(&prefixed).await;
            self.status
                .report(Stage::Failed, Some(prefixed.clone()), None)
                .await;
            return Outcome::AdmissionFailed(prefixed);
        }

        self.status.report(Stage::Active, None, None).await;
        let reason = self.run_active(prefix, &mut reconfigure_rx).await;
        let _ = self.strategy.leave(&reason).await;
        self.status
            .report(Stage::Completed, Some(reason.clone()), None)
            .await;
        Outcome::Completed(reason)
    }

    /// The `active` phase: races audio/speaker capture against removal
    /// detection while the exit detector ticks every 5 seconds, and
    /// returns the platform-prefixed reason the meeting ended for.
    async fn run_active(
        &self,
        prefix: &'static str,
        reconfigure_rx: &mut mpsc::UnboundedReceiver<crate::control_plane::ReconfigureRequest>,
    ) -> String {
        let joined_at = Instant::now();
        let mut exit_detector = ExitDetector::new(crate::config::ExitDetectorConfig::from_env().unwrap_or_default(), joined_at);
        let mut local_session = Session::new(self.config.language.clone(), self.config.task.unwrap_or(Task::Transcribe));
        let mut pipeline = AudioPipeline::new(self.strategy.audio_sample_rate());

        let shared = Arc::new(Mutex::new(SharedState {
            roster: Roster::new(),
            tracker: SpeakerTracker::new(5),
            ui_present: true,
            last_speech: None,
            reset_since_last_tick: false,
        }));

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let client = TranscriptionClient::new(&self.config, self.gateway_url.clone(), self.model.clone());
        let gate = client.gate();
        let client_run = client.run(cmd_rx, event_tx);
        tokio::pin!(client_run);

        let mut tick = tokio::time::interval(TICK);
        let mut last_applied_speech: Option<Instant> = None;

        let shared_for_observe = shared.clone();
        let cmd_tx_for_observe = cmd_tx.clone();
        let mut on_observe = move |obs: Observation| {
            let now = Instant::now();
            let mut s = shared_for_observe.lock();
            s.ui_present = obs.participant_list_ui_present;

            // Speaker events carry a timestamp relative to `audioStartWallclockMs`
            // (§3); until that origin exists there is nothing valid to stamp
            // them with, so the tracker simply isn't driven yet (most visible
            // in degraded-audio mode, where it may never become `Some`).
            let relative_ms = local_session.relative_ms(now);

            let seen: std::collections::HashSet<_> =
                obs.participants.iter().map(|p| p.id.clone()).collect();
            let previously_active: Vec<_> = s.roster.active_ids().cloned().collect();
            for left in previously_active.iter().filter(|id| !seen.contains(*id)) {
                if let Some(relative_ms) = relative_ms {
                    if let Some(ev) = s.tracker.on_removed(left, relative_ms) {
                        let _ = cmd_tx_for_observe.send(ClientCommand::Speaker(ev));
                        s.reset_since_last_tick = true;
                    }
                }
                s.roster.remove(left);
            }

            for p in &obs.participants {
                let is_new = s.roster.get(&p.id).is_none();
                s.roster.upsert(Participant {
                    id: p.id.clone(),
                    display_name: p.display_name.clone(),
                    element: None,
                });
                if is_new {
                    s.reset_since_last_tick = true;
                }

                let Some(relative_ms) = relative_ms else {
                    continue;
                };

                // Updated every tick a participant is observed speaking, not
                // just on SPEAKER_END, so an ongoing turn keeps the "recent
                // speech" clock current instead of freezing it at the start
                // of the turn (§4.6 cases 3/3.5).
                if p.speaking {
                    s.last_speech = Some(now);
                }

                let event = if p.speaking {
                    s.tracker.on_speaking(&p.id, &p.display_name, relative_ms)
                } else {
                    s.tracker.on_silent(&p.id, relative_ms)
                };
                if let Some(ev) = event {
                    if matches!(ev.kind, crate::speaker_tracker::EventKind::SpeakerEnd) {
                        s.last_speech = Some(now);
                        s.reset_since_last_tick = true;
                    }
                    let _ = cmd_tx_for_observe.send(ClientCommand::Speaker(ev));
                }
            }

            if let Some(samples) = obs.audio_samples {
                for frame in pipeline.push(&samples, &gate, &mut local_session, now) {
                    let _ = cmd_tx_for_observe.send(ClientCommand::AudioFrame(frame));
                }
            }
        };

        let recording = self.strategy.start_recording(&mut on_observe);
        tokio::pin!(recording);
        let removal_monitor = self.strategy.start_removal_monitor();
        tokio::pin!(removal_monitor);

        let map_removal = |sig: RemovalSignal| -> String {
            match sig {
                RemovalSignal::MeetingEnded => StrategyReason::NormalCompletion.with_prefix(prefix),
                RemovalSignal::RemovedByAdmin => StrategyReason::BotRemovedByAdmin.with_prefix(prefix),
                RemovalSignal::Failed => StrategyReason::NormalCompletion.with_prefix(prefix),
            }
        };

        let reason = loop {
            tokio::select! {
                biased;

                _ = &mut client_run => {
                    // The transcription client only returns on a voluntary
                    // leave it was never asked for; treat it as if the
                    // meeting ended from our side too.
                    break map_removal(RemovalSignal::Failed);
                }

                Some(req) = reconfigure_rx.recv() => {
                    let _ = cmd_tx.send(ClientCommand::Reconfigure { language: req.language, task: req.task });
                }

                Some(_event) = event_rx.recv() => {
                    // Reserved for transcript logging / language-detection
                    // observability; no control-flow effect here.
                }

                _ = tick.tick() => {
                    if self.stop.is_set() {
                        break StrategyReason::NormalCompletion.with_prefix(prefix);
                    }
                    let mut s = shared.lock();
                    if s.last_speech != last_applied_speech {
                        if let Some(t) = s.last_speech {
                            exit_detector.record_speech_end(t);
                        }
                        last_applied_speech = s.last_speech;
                    }
                    let active_ids: Vec<_> = s.roster.active_ids().cloned().collect();
                    let all_remaining_never_spoken = !active_ids.is_empty()
                        && active_ids.iter().all(|id| !s.tracker.has_spoken(id));
                    let inputs = TickInputs {
                        participant_count: s.roster.active_count(),
                        participant_list_ui_present: s.ui_present,
                        meeting_has_had_speech: s.tracker.meeting_has_had_speech(),
                        speakers_identified: s.roster.speakers_identified(),
                        all_remaining_never_spoken,
                        countdown_reset: s.reset_since_last_tick,
                    };
                    s.reset_since_last_tick = false;
                    drop(s);

                    if let Some(exit_reason) = exit_detector.tick(Instant::now(), inputs) {
                        break exit_reason.with_prefix(prefix);
                    }
                }

                res = &mut recording => {
                    break map_removal(res.unwrap_or(RemovalSignal::Failed));
                }

                res = &mut removal_monitor => {
                    break map_removal(res.unwrap_or(RemovalSignal::Failed));
                }
            }
        };

        self.shutdown_client(&cmd_tx, &mut client_run).await;
        reason
    }

    async fn shutdown_client(
        &self,
        cmd_tx: &mpsc::UnboundedSender<ClientCommand>,
        client_run: &mut (impl std::future::Future<Output = ()> + Unpin),
    ) {
        let _ = cmd_tx.send(ClientCommand::Leave);
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), client_run).await;
    }
}
