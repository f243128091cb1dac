//! Google Meet strategy (§4.2.1): CDP navigation/fill/join, admission via
//! 2-of-N toolbar-signal polling, audio via live media-element discovery,
//! and speaker detection via per-participant class-mutation polling.

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

/// Admission polling cadence and the 2-of-N signal threshold (§4.2.1).
const ADMISSION_POLL: Duration = Duration::from_millis(500);
const ADMISSION_SIGNALS_REQUIRED: usize = 2;

/// Fallback polling loop for speaking-class mutations mutation observers
/// miss (§4.2.1).
const SPEAKER_POLL: Duration = Duration::from_millis(500);

/// Bounded retries while discovering the first live audio element
/// (§4.2.1's "retry up to N×T ms").
const AUDIO_DISCOVERY_ATTEMPTS: u32 = 10;
const AUDIO_DISCOVERY_INTERVAL: Duration = Duration::from_millis(500);

/// Class names that indicate a Meet participant tile is currently speaking.
/// Obfuscated and drift-prone upstream (§9 open question); kept as a
/// configurable list with a visible-indicator fallback, not a single
/// hardcoded selector.
const SPEAKING_CLASSES: &[&str] = &["Oaajmc", "wEsLMd"];

/// `AudioContext`'s default sample rate in Chromium, which the shared
/// audio-interception script captures at (§4.3).
const AUDIO_SAMPLE_RATE: u32 = 48_000;

pub struct MeetStrategy {
    session: AsyncMutex<Option<Session>>,
    config: BotConfig,
    audio_found: Mutex<bool>,
}

impl MeetStrategy {
    #[must_use]
    pub fn new(config: BotConfig) -> Self {
        Self {
            session: AsyncMutex::new(None),
            config,
            audio_found: Mutex::new(false),
        }
    }

    fn meeting_url(&self) -> String {
        self.config
            .meeting_url
            .clone()
            .map(|u| u.to_string())
            .unwrap_or_else(|| format!("https://meet.google.com/{}", self.config.native_meeting_id))
    }
}

#[async_trait]
impl PlatformStrategy for MeetStrategy {
    async fn join(&self) -> Result<(), StrategyError> {
        let sess = Session::launch(true)
            .await
            .map_err(|e| StrategyError::Join(e.to_string()))?;

        sess.page
            .goto(self.meeting_url())
            .await
            .map_err(|e| StrategyError::Join(format!("navigation failed: {e}")))?;

        if let Ok(name_input) = sess.page.find_element("input[type=text]").await {
            let _ = name_input.click().await;
            let _ = name_input.type_str(&self.config.bot_name).await;
        }

        for selector in ["[aria-label*='microphone']", "[aria-label*='camera']"] {
            if let Ok(el) = sess.page.find_element(selector).await {
                let _ = el.click().await;
            }
        }

        let join_button = sess
            .page
            .find_element("[aria-label*='Ask to join'], [aria-label*='Join now']")
            .await
            .map_err(|e| StrategyError::Join(format!("no join control found: {e}")))?;
        join_button
            .click()
            .await
            .map_err(|e| StrategyError::Join(format!("failed to click join: {e}")))?;

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
        const SIGNAL_SELECTORS: &[&str] = &[
            "[aria-label*='people']",
            "[aria-label*='chat']",
            "[aria-label*='Leave call']",
            "[data-participant-id]",
            "[aria-label*='microphone']",
        ];

        loop {
            let mut signals = 0;
            for selector in SIGNAL_SELECTORS {
                if page.find_element(selector).await.is_ok() {
                    signals += 1;
                }
            }
            if signals >= ADMISSION_SIGNALS_REQUIRED {
                return Ok(AdmissionOutcome::Admitted);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(AdmissionOutcome::Timeout);
            }
            sleep(ADMISSION_POLL).await;
        }
    }

    async fn prepare(&self) -> Result<(), StrategyError> {
        let guard = self.session.lock().await;
        let page = &guard
            .as_ref()
            .ok_or_else(|| StrategyError::Prepare("join() was never called".into()))?
            .page;
        page.evaluate(cdp::AUDIO_INTERCEPT_INIT_SCRIPT)
            .await
            .map_err(|e| StrategyError::Prepare(format!("failed to install audio hook: {e}")))?;
        Ok(())
    }

    async fn start_recording(
        &self,
        on_observe: &mut (dyn FnMut(Observation) + Send),
    ) -> Result<RemovalSignal, StrategyError> {
        let mut ticker = tokio::time::interval(SPEAKER_POLL);
        let mut discovery_attempts = 0u32;

        loop {
            ticker.tick().await;
            let guard = self.session.lock().await;
            let Some(sess) = guard.as_ref() else {
                return Ok(RemovalSignal::Failed);
            };
            let page = &sess.page;

            if !*self.audio_found.lock() && discovery_attempts < AUDIO_DISCOVERY_ATTEMPTS {
                discovery_attempts += 1;
                if page.find_element("audio[src], audio[srcObject], video[srcObject]").await.is_ok()
                {
                    *self.audio_found.lock() = true;
                } else if discovery_attempts == AUDIO_DISCOVERY_ATTEMPTS {
                    log::warn!("Meet: no live audio element found, entering degraded monitoring mode");
                }
                sleep(AUDIO_DISCOVERY_INTERVAL).await;
            }

            let participants = read_participants(page).await;
            let ui_present = page.find_element("[data-participant-id], [role='list']").await.is_ok();
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
            let removed_text = sess
                .page
                .find_element("*:has-text('You\\'ve been removed')")
                .await
                .is_ok();
            if removed_text {
                return Ok(RemovalSignal::RemovedByAdmin);
            }
            if sess.page.find_element("[aria-label*='Leave call']").await.is_err() {
                return Ok(RemovalSignal::MeetingEnded);
            }
        }
    }

    async fn leave(&self, _reason: &str) -> Result<(), StrategyError> {
        let mut guard = self.session.lock().await;
        if let Some(mut sess) = guard.take() {
            if let Ok(el) = sess.page.find_element("[aria-label*='Leave call']").await {
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

/// Reads the current roster via `data-participant-id` nodes, resolving
/// names through a sibling text selector and a per-node speaking class
/// (§4.5 "identity resolution").
async fn read_participants(page: &chromiumoxide::Page) -> Vec<ParticipantSnapshot> {
    let script = format!(
        r#"(() => {{
            const speakingClasses = {classes:?};
            return Array.from(document.querySelectorAll('[data-participant-id]')).map((el) => {{
                const id = el.getAttribute('data-participant-id');
                const nameEl = el.querySelector('[data-self-name], .zWGUib, .ZjFb7c');
                const name = (nameEl && nameEl.textContent) ? nameEl.textContent.trim() : id;
                const speaking = speakingClasses.some((c) => el.classList.contains(c))
                    || !!el.querySelector('.speaking-indicator');
                return {{ id, name, speaking }};
            }});
        }})()"#,
        classes = SPEAKING_CLASSES,
    );

    #[derive(serde::Deserialize)]
    struct Raw {
        id: String,
        name: String,
        speaking: bool,
    }

    let raw: Vec<Raw> = match page.evaluate(script).await {
        Ok(v) => v.into_value().unwrap_or_default(),
        Err(e) => {
            log::warn!("Meet: failed to read participant roster: {}", e);
            return Vec::new();
        }
    };

    raw.into_iter()
        .map(|r| ParticipantSnapshot {
            id: r.id,
            display_name: r.name,
            speaking: r.speaking,
        })
        .collect()
}
