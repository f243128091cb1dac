//! Transcription-gateway streaming client (§4.4): WebSocket connection,
//! config handshake, audio/metadata/speaker/session-control messages, and
//! stubborn (bounded-delay, infinite-retry) reconnect.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use derive_more::{Display, Error as DeriveError, From};
use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc, time};
use tokio_tungstenite::{
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use url::Url;
use uuid::Uuid;

use crate::{
    audio::{EmissionGate, EmittedFrame},
    config::{BotConfig, Platform, Task},
    logging::log,
    session::Session,
    speaker_tracker::{EventKind, SpeakerEvent},
};

use super::messages::{
    AudioChunkMetadata, ConfigMessage, DisconnectMarker, InboundMessage, InboundStatus, Segment,
    SessionControlMessage, SessionControlPayload, SpeakerActivityMessage, SpeakerActivityPayload,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect watchdog: a `CONNECTING` socket that fails to progress this long
/// is force-closed (§4.4).
const CONNECT_WATCHDOG: Duration = Duration::from_secs(3);

/// Drain time allotted to the `LEAVING_MEETING` send before closing (§4.4).
const LEAVE_DRAIN: Duration = Duration::from_millis(500);

/// Connection state (§4.4). Only `Ready` unblocks audio emission.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Configured,
    Ready,
}

/// Commands accepted by the running client loop.
#[derive(Debug)]
pub enum ClientCommand {
    AudioFrame(EmittedFrame),
    Speaker(SpeakerEvent),
    Reconfigure {
        language: Option<String>,
        task: Option<Task>,
    },
    Leave,
}

/// Events surfaced to the rest of the worker (status logger, transcript
/// sink). Not part of the control-flow contract — purely observational.
#[derive(Debug)]
pub enum GatewayEvent {
    Ready,
    LanguageDetected(String),
    TranscriptSegments(Vec<Segment>),
    Closed,
}

/// Thread-safe handle exposing the current readiness as an
/// [`EmissionGate`] the audio pipeline can poll without awaiting the
/// client's own task.
#[derive(Clone, Debug)]
pub struct ReadyGate {
    ready: Arc<AtomicBool>,
    transcribe_enabled: Arc<AtomicBool>,
}

impl EmissionGate for ReadyGate {
    fn should_emit(&self) -> bool {
        self.transcribe_enabled.load(Ordering::Relaxed) && self.ready.load(Ordering::Relaxed)
    }
}

/// Possible errors from a single connect attempt. All are transient from
/// the stubborn-reconnect loop's point of view except a clean voluntary
/// close.
#[derive(Debug, Display, DeriveError, From)]
pub enum ConnectError {
    #[display(fmt = "Connecting to transcription gateway timed out")]
    Watchdog,
    #[display(fmt = "WebSocket error: {}", _0)]
    Ws(tungstenite::Error),
}

/// Fixed, immutable-per-connection identity the client stamps onto every
/// outbound message.
#[derive(Clone, Debug)]
struct Identity {
    token: String,
    meeting_id: String,
    meeting_url: Option<String>,
    platform: Platform,
}

/// The transcription-gateway streaming client.
pub struct TranscriptionClient {
    gateway_url: Url,
    identity: Identity,
    session: Session,
    base_delay: Duration,
    model: String,
    ready: Arc<AtomicBool>,
    transcribe_enabled: Arc<AtomicBool>,
    pending_reconfig: Option<(Option<String>, Option<Task>)>,
    dedup_last_transcript: String,
}

impl TranscriptionClient {
    #[must_use]
    pub fn new(cfg: &BotConfig, gateway_url: Url, model: impl Into<String>) -> Self {
        let transcribe_enabled = Arc::new(AtomicBool::new(cfg.transcribe_enabled()));
        Self {
            gateway_url,
            identity: Identity {
                token: cfg.auth_token.clone(),
                meeting_id: cfg.meeting_id.clone(),
                meeting_url: cfg.meeting_url.as_ref().map(Url::to_string),
                platform: cfg.platform,
            },
            session: Session::new(cfg.language.clone(), cfg.task.unwrap_or(Task::Transcribe)),
            base_delay: cfg.reconnect_base_delay(),
            model: model.into(),
            ready: Arc::new(AtomicBool::new(false)),
            transcribe_enabled,
            pending_reconfig: None,
            dedup_last_transcript: String::new(),
        }
    }

    /// A cheap, cloneable handle usable as the audio pipeline's
    /// [`EmissionGate`].
    #[must_use]
    pub fn gate(&self) -> ReadyGate {
        ReadyGate {
            ready: self.ready.clone(),
            transcribe_enabled: self.transcribe_enabled.clone(),
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Runs the stubborn-reconnect loop forever until told to leave or the
    /// command channel closes. Each iteration opens a fresh session (new
    /// UID, reset audio origin) per §4.4.
    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
        event_tx: mpsc::UnboundedSender<GatewayEvent>,
    ) {
        loop {
            self.ready.store(false, Ordering::Relaxed);
            self.session.reset();

            match self.connect_and_serve(&mut cmd_rx, &event_tx).await {
                Ok(Terminal::VoluntaryLeave) => {
                    log::info!("Transcription client left voluntarily");
                    let _ = event_tx.send(GatewayEvent::Closed);
                    return;
                }
                Ok(Terminal::Reconnect) => {
                    log::info!("Transcription client reconfiguring, reconnecting");
                }
                Err(err) => {
                    log::error!("Transcription gateway connection failed: {}", err);
                }
            }

            self.ready.store(false, Ordering::Relaxed);
            let _ = event_tx.send(GatewayEvent::Closed);
            time::sleep(self.base_delay).await;
        }
    }

    async fn connect_and_serve(
        &mut self,
        cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
        event_tx: &mpsc::UnboundedSender<GatewayEvent>,
    ) -> Result<Terminal, ConnectError> {
        let mut ws = self.connect_with_watchdog().await?;
        self.send_config(&mut ws).await?;

        let mut language_logged = false;

        loop {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ClientCommand::Leave) => {
                            self.send_leaving(&mut ws).await;
                            return Ok(Terminal::VoluntaryLeave);
                        }
                        Some(ClientCommand::Reconfigure { language, task }) => {
                            if self.ready.load(Ordering::Relaxed) {
                                self.session.language = language;
                                if let Some(t) = task {
                                    self.session.task = t;
                                }
                                self.close_no_reconnect(&mut ws).await;
                                return Ok(Terminal::Reconnect);
                            }
                            // Queued: applied once READY (§4.4).
                            self.pending_reconfig = Some((language, task));
                        }
                        Some(ClientCommand::AudioFrame(frame)) => {
                            if self.ready.load(Ordering::Relaxed) {
                                self.send_audio_frame(&mut ws, &frame).await?;
                            }
                        }
                        Some(ClientCommand::Speaker(ev)) => {
                            if self.ready.load(Ordering::Relaxed) {
                                self.send_speaker_event(&mut ws, &ev).await?;
                            }
                        }
                        None => return Ok(Terminal::VoluntaryLeave),
                    }
                }

                msg = ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_inbound(&text, event_tx, &mut language_logged);
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(ConnectError::Ws(tungstenite::Error::ConnectionClosed));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(ConnectError::Ws(e)),
                    }
                }
            }
        }
    }

    async fn connect_with_watchdog(&mut self) -> Result<WsStream, ConnectError> {
        log::debug!("Connecting to transcription gateway at {}", self.gateway_url);
        let attempt = tokio_tungstenite::connect_async(self.gateway_url.as_str());
        let (ws, _resp) = time::timeout(CONNECT_WATCHDOG, attempt)
            .await
            .map_err(|_| ConnectError::Watchdog)??;
        Ok(ws)
    }

    async fn send_config(&mut self, ws: &mut WsStream) -> Result<(), ConnectError> {
        let msg = ConfigMessage {
            uid: self.session.uid(),
            language: self.session.language.clone(),
            task: self.session.task,
            platform: self.identity.platform,
            token: self.identity.token.clone(),
            meeting_id: self.identity.meeting_id.clone(),
            meeting_url: self.identity.meeting_url.clone(),
            model: self.model.clone(),
            use_vad: true,
        };
        let json = serde_json::to_string(&msg).expect("ConfigMessage always serializes");
        ws.send(Message::Text(json)).await?;
        Ok(())
    }

    fn handle_inbound(
        &mut self,
        text: &str,
        event_tx: &mpsc::UnboundedSender<GatewayEvent>,
        language_logged: &mut bool,
    ) {
        let parsed: InboundMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Unparseable gateway message ignored: {} ({})", e, text);
                return;
            }
        };

        match parsed {
            InboundMessage::Status {
                status: InboundStatus::ServerReady,
                ..
            } => {
                self.ready.store(true, Ordering::Relaxed);
                if let Some((language, task)) = self.pending_reconfig.take() {
                    self.session.language = language;
                    if let Some(t) = task {
                        self.session.task = t;
                    }
                }
                let _ = event_tx.send(GatewayEvent::Ready);
            }
            InboundMessage::Status {
                status: InboundStatus::Wait,
                message,
            } => {
                log::debug!("Gateway status WAIT: {:?}", message);
            }
            InboundMessage::Status {
                status: InboundStatus::Error,
                message,
            } => {
                log::error!("Gateway reported error: {:?}", message);
            }
            InboundMessage::Language { language } => {
                if !*language_logged {
                    log::info!("Gateway detected language: {}", language);
                    *language_logged = true;
                }
                let _ = event_tx.send(GatewayEvent::LanguageDetected(language));
            }
            InboundMessage::Disconnect { message: DisconnectMarker } => {
                log::info!("Gateway requested disconnect");
                // The actual socket close is driven by the gateway itself;
                // the read loop's next poll surfaces it as a connection
                // error and the stubborn-reconnect loop takes over.
            }
            InboundMessage::Segments { segments } => {
                let joined: String = segments
                    .iter()
                    .filter(|s| s.completed)
                    .map(|s| s.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                if joined.is_empty() || joined == self.dedup_last_transcript {
                    return;
                }
                self.dedup_last_transcript = joined;
                let _ = event_tx.send(GatewayEvent::TranscriptSegments(segments));
            }
        }
    }

    async fn send_audio_frame(
        &self,
        ws: &mut WsStream,
        frame: &EmittedFrame,
    ) -> Result<(), ConnectError> {
        let meta = AudioChunkMetadata {
            length: frame.samples.len(),
            sample_rate: crate::audio::resample::TARGET_SAMPLE_RATE,
        };
        ws.send(Message::Text(
            serde_json::to_string(&meta).expect("metadata always serializes"),
        ))
        .await?;

        let mut bytes = Vec::with_capacity(frame.samples.len() * 4);
        for s in &frame.samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        ws.send(Message::Binary(bytes)).await?;
        Ok(())
    }

    async fn send_speaker_event(
        &self,
        ws: &mut WsStream,
        ev: &SpeakerEvent,
    ) -> Result<(), ConnectError> {
        let event_type = match ev.kind {
            EventKind::SpeakerStart => "SPEAKER_START",
            EventKind::SpeakerEnd => "SPEAKER_END",
        };
        let msg = SpeakerActivityMessage {
            payload: SpeakerActivityPayload {
                event_type,
                participant_name: ev.participant_name.clone(),
                participant_id_meet: ev.participant_id.clone(),
                relative_client_timestamp_ms: ev.relative_ms,
                uid: self.session.uid(),
                token: self.identity.token.clone(),
                platform: self.identity.platform,
                meeting_id: self.identity.meeting_id.clone(),
                meeting_url: self.identity.meeting_url.clone(),
            },
        };
        ws.send(Message::Text(
            serde_json::to_string(&msg).expect("speaker event always serializes"),
        ))
        .await?;
        Ok(())
    }

    /// Sends `LEAVING_MEETING` and waits up to [`LEAVE_DRAIN`] for the send
    /// to flush before the caller closes the socket (§4.4, §5 ordering
    /// guarantee: queued before any voluntary close).
    async fn send_leaving(&self, ws: &mut WsStream) {
        let msg = SessionControlMessage {
            payload: SessionControlPayload {
                event: "LEAVING_MEETING",
                uid: self.session.uid(),
                client_timestamp_ms: now_ms(),
                token: self.identity.token.clone(),
                platform: self.identity.platform,
                meeting_id: self.identity.meeting_id.clone(),
            },
        };
        let json = serde_json::to_string(&msg).expect("session control always serializes");
        let send = async {
            let _ = ws.send(Message::Text(json)).await;
            let _ = ws.close().await;
        };
        if time::timeout(LEAVE_DRAIN, send).await.is_err() {
            log::warn!("LEAVING_MEETING send did not drain within {:?}", LEAVE_DRAIN);
        }
    }

    /// Closes without reconnecting, used by reconfigure (§4.4) to avoid a
    /// race between the old connection's close and the new connect.
    async fn close_no_reconnect(&self, ws: &mut WsStream) {
        let _ = ws.close().await;
    }
}

enum Terminal {
    VoluntaryLeave,
    Reconnect,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_gate_requires_both_ready_and_enabled() {
        let ready = Arc::new(AtomicBool::new(false));
        let enabled = Arc::new(AtomicBool::new(true));
        let gate = ReadyGate {
            ready: ready.clone(),
            transcribe_enabled: enabled.clone(),
        };
        assert!(!gate.should_emit());
        ready.store(true, Ordering::Relaxed);
        assert!(gate.should_emit());
        enabled.store(false, Ordering::Relaxed);
        assert!(!gate.should_emit());
    }
}
