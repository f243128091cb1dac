//! Microsoft Teams strategy (§4.2.2): multi-step join, a pre-navigation
//! WebRTC interception hook (Teams does not otherwise expose remote audio
//! in the DOM), and debounced voice-level-outline speaker detection.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Duration};

use crate::config::BotConfig;
use crate::flow::strategy::{
    AdmissionOutcome, Observation, ParticipantSnapshot, PlatformStrategy, RemovalSignal,
    StrategyError,
};
use crate::logging::log;

use super::cdp::{self, Session};

const ADMISSION_POLL: Duration = Duration::from_millis(500);
const SPEAKER_POLL: Duration = Duration::from_millis(200);
/// Debounce window: a voice-level-outline toggle must hold for this long
/// before being trusted as a real state transition (§4.2.2).
const SPEAKER_DEBOUNCE: Duration = Duration::from_millis(200);

/// `AudioContext`'s default sample rate in Chromium, which the shared
/// audio-interception script captures at (§4.3).
const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Per-participant debounce bookkeeping for the voice-level outline.
#[derive(Clone, Copy)]
struct PendingState {
    speaking: bool,
    since: Instant,
}

pub struct TeamsStrategy {
    session: AsyncMutex<Option<Session>>,
    config: BotConfig,
    confirmed: Mutex<HashMap<String, bool>>,
    pending: Mutex<HashMap<String, PendingState>>,
}

impl TeamsStrategy {
    #[must_use]
    pub fn new(config: BotConfig) -> Self {
        Self {
            session: AsyncMutex::new(None),
            config,
            confirmed: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn meeting_url(&self) -> String {
        self.config
            .meeting_url
            .clone()
            .map(|u| u.to_string())
            .unwrap_or_else(|| self.config.native_meeting_id.clone())
    }

    /// Applies the debounce registry to a raw speaking signal, returning the
    /// confirmed state only once it has held for `SPEAKER_DEBOUNCE`.
    fn debounce(&self, id: &str, raw_speaking: bool, now: Instant) -> bool {
        let mut pending = self.pending.lock();
        let mut confirmed = self.confirmed.lock();
        let current = *confirmed.get(id).unwrap_or(&false);

        match pending.get(id) {
            Some(p) if p.speaking == raw_speaking => {
                if now.saturating_duration_since(p.since) >= SPEAKER_DEBOUNCE {
                    confirmed.insert(id.to_string(), raw_speaking);
                    return raw_speaking;
                }
                current
            }
            _ => {
                pending.insert(
                    id.to_string(),
                    PendingState {
                        speaking: raw_speaking,
                        since: now,
                    },
                );
                current
            }
        }
    }
}

#[async_trait]
impl PlatformStrategy for TeamsStrategy {
    async fn join(&self) -> Result<(), StrategyError> {
        let sess = Session::launch(true)
            .await
            .map_err(|e| StrategyError::Join(e.to_string()))?;

        // Installed before navigation: the WebRTC peer-connection wrapper
        // must be in place before Teams' own scripts construct it.
        sess.page
            .evaluate_on_new_document(cdp::AUDIO_INTERCEPT_INIT_SCRIPT)
            .await
            .map_err(|e| StrategyError::Join(format!("failed to install audio hook: {e}")))?;

        sess.page
            .goto(self.meeting_url())
            .await
            .map_err(|e| StrategyError::Join(format!("navigation failed: {e}")))?;

        if let Ok(el) = sess.page.find_element("text=Continue on this browser").await {
            let _ = el.click().await;
        }
        if let Ok(el) = sess.page.find_element("[aria-label*='camera']").await {
            let _ = el.click().await;
        }
        if let Ok(name_input) = sess.page.find_element("input#displayName, input[placeholder*='name']").await {
            let _ = name_input.click().await;
            let _ = name_input.type_str(&self.config.bot_name).await;
        }
        if let Ok(el) = sess.page.find_element("text=Computer audio, [aria-label*='computer audio']").await {
            let _ = el.click().await;
        }

        let join_now = sess
            .page
            .find_element("button[aria-label*='Join now'], text=Join now")
            .await
            .map_err(|e| StrategyError::Join(format!("no join-now control found: {e}")))?;
        join_now
            .click()
            .await
            .map_err(|e| StrategyError::Join(format!("failed to click join now: {e}")))?;

        *self.session.lock().await = Some(sess);
        Ok(())
    }

    async fn wait_for_admission(&self, timeout_ms: u64) -> Result<AdmissionOutcome, StrategyError> {
        let guard = self.session.lock().await;
        let page = &guard
            .as_ref()
            .ok_or_else(|| StrategyError::Join("join() was never called".into()))?
            .page;

        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if page.find_element("[aria-label*='Hang up'], [aria-label*='Leave']").await.is_ok() {
                return Ok(AdmissionOutcome::Admitted);
            }
            if page
                .find_element("text=Someone will let you in shortly")
                .await
                .is_ok()
            {
                log::debug!("Teams: still in the lobby");
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(AdmissionOutcome::Timeout);
            }
            sleep(ADMISSION_POLL).await;
        }
    }

    async fn prepare(&self) -> Result<(), StrategyError> {
        // The audio hook is installed pre-navigation in `join`; nothing
        // further to instrument here.
        Ok(())
    }

    async fn start_recording(
        &self,
        on_observe: &mut (dyn FnMut(Observation) + Send),
    ) -> Result<RemovalSignal, StrategyError> {
        let mut ticker = tokio::time::interval(SPEAKER_POLL);
        loop {
            ticker.tick().await;
            let guard = self.session.lock().await;
            let Some(sess) = guard.as_ref() else {
                return Ok(RemovalSignal::Failed);
            };
            let page = &sess.page;

            let raw = read_raw_participants(page).await;
            let now = Instant::now();
            let participants = raw
                .into_iter()
                .map(|(id, name, raw_speaking)| {
                    let speaking = self.debounce(&id, raw_speaking, now);
                    ParticipantSnapshot {
                        id,
                        display_name: name,
                        speaking,
                    }
                })
                .collect();

            let ui_present = page.find_element("[data-tid='roster'], [role='list']").await.is_ok();
            let audio_samples = cdp::drain_audio_queue(page).await;
            drop(guard);

            on_observe(Observation {
                participants,
                participant_list_ui_present: ui_present,
                audio_samples,
            });

            if !ui_present {
                return Ok(RemovalSignal::MeetingEnded);
            }
        }
    }

    async fn start_removal_monitor(&self) -> Result<RemovalSignal, StrategyError> {
        let mut ticker = tokio::time::interval(Duration::from_secs(2));
        loop {
            ticker.tick().await;
            let guard = self.session.lock().await;
            let Some(sess) = guard.as_ref() else {
                return Ok(RemovalSignal::Failed);
            };
            if sess
                .page
                .find_element("text=You were removed from this meeting")
                .await
                .is_ok()
            {
                return Ok(RemovalSignal::RemovedByAdmin);
            }
            if sess.page.find_element("[aria-label*='Hang up']").await.is_err() {
                return Ok(RemovalSignal::MeetingEnded);
            }
        }
    }

    async fn leave(&self, _reason: &str) -> Result<(), StrategyError> {
        let mut guard = self.session.lock().await;
        if let Some(mut sess) = guard.take() {
            if let Ok(el) = sess.page.find_element("[aria-label*='Hang up']").await {
                let _ = el.click().await;
            }
            sess.close().await;
        }
        Ok(())
    }

    fn audio_sample_rate(&self) -> u32 {
        AUDIO_SAMPLE_RATE
    }
}

/// Reads each roster tile's id/name plus its raw (undebounced) voice-level
/// outline state.
async fn read_raw_participants(page: &chromiumoxide::Page) -> Vec<(String, String, bool)> {
    let script = r#"(() => {
        return Array.from(document.querySelectorAll('[data-tid="participant-tile"]')).map((el) => {
            const id = el.getAttribute('data-tid-participant-id') || el.id;
            const nameEl = el.querySelector('[data-tid="participant-name"]');
            const name = (nameEl && nameEl.textContent) ? nameEl.textContent.trim() : id;
            const speaking = !!el.querySelector('.voice-level-outline--active');
            return { id, name, speaking };
        });
    })()"#;

    #[derive(serde::Deserialize)]
    struct Raw {
        id: String,
        name: String,
        speaking: bool,
    }

    let raw: Vec<Raw> = match page.evaluate(script).await {
        Ok(v) => v.into_value().unwrap_or_default(),
        Err(e) => {
            log::warn!("Teams: failed to read participant roster: {}", e);
            return Vec::new();
        }
    };

    raw.into_iter().map(|r| (r.id, r.name, r.speaking)).collect()
}
