//! Control Plane (§4.7): a Redis pub/sub subscriber for runtime commands.
//!
//! Subscription is single-threaded in effect: the handler only ever sets a
//! stop flag or forwards a reconfigure request onto channels the flow
//! controller already owns, never mutating shared state directly (§4.7,
//! §5 "no cross-task locking because there is no parallel mutator").

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use derive_more::{Display, Error as DeriveError, From};
use futures_util::StreamExt as _;
use redis::aio::PubSub;
use serde::Deserialize;
use tokio::sync::mpsc;
use url::Url;

use crate::{config::Task, logging::log};

/// Parsed `bot_commands:meeting:{meetingId}` payload (§4.7).
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum Command {
    Leave,
    Reconfigure {
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        task: Option<Task>,
    },
}

/// Reconfigure request forwarded to the transcription client.
#[derive(Clone, Debug)]
pub struct ReconfigureRequest {
    pub language: Option<String>,
    pub task: Option<Task>,
}

/// Errors establishing or running the subscription.
#[derive(Debug, Display, DeriveError, From)]
pub enum ControlPlaneError {
    #[display(fmt = "Failed to connect to broker: {}", _0)]
    Connect(redis::RedisError),
}

/// A shared, cheaply-clonable flag the flow controller polls after each
/// await boundary (§5 "the broker `leave` command cancels in-progress
/// admission by setting the stop flag the controller checks").
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Owns the broker subscription for the duration of one meeting.
pub struct ControlPlane {
    broker_url: Url,
    channel: String,
    stop: StopFlag,
    reconfigure_tx: mpsc::UnboundedSender<ReconfigureRequest>,
}

impl ControlPlane {
    #[must_use]
    pub fn new(
        broker_url: Url,
        meeting_id: &str,
        stop: StopFlag,
        reconfigure_tx: mpsc::UnboundedSender<ReconfigureRequest>,
    ) -> Self {
        Self {
            broker_url,
            channel: format!("bot_commands:meeting:{meeting_id}"),
            stop,
            reconfigure_tx,
        }
    }

    /// Connects, subscribes, and processes commands until the connection is
    /// dropped or unrecoverably errors. Re-subscription on disconnect is the
    /// caller's responsibility (§7 "broker subscribes are re-established by
    /// the control plane") — see [`Self::run_reconnecting`].
    async fn run_once(&self) -> Result<(), ControlPlaneError> {
        let client = redis::Client::open(self.broker_url.as_str())?;
        let conn = client.get_async_connection().await?;
        let mut pubsub: PubSub = conn.into_pubsub();
        pubsub.subscribe(&self.channel).await?;

        log::info!("Control plane subscribed to {}", self.channel);

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("Unreadable control-plane payload: {}", e);
                    continue;
                }
            };
            self.handle(&payload);
        }
        Ok(())
    }

    fn handle(&self, payload: &str) {
        let cmd: Command = match serde_json::from_str(payload) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Unparseable control-plane command ignored: {} ({})", e, payload);
                return;
            }
        };
        match cmd {
            Command::Leave => {
                log::info!("Control plane received leave command");
                self.stop.set();
            }
            Command::Reconfigure { language, task } => {
                log::info!("Control plane received reconfigure command");
                let _ = self
                    .reconfigure_tx
                    .send(ReconfigureRequest { language, task });
            }
        }
    }

    /// Runs [`Self::run_once`] forever, reconnecting with a short fixed
    /// delay on failure, matching §7's "broker subscribes are re-established
    /// by the control plane" without the stubborn-reconnect complexity of
    /// the transcription client — command delivery is at-least-effort, not
    /// a hard requirement for the meeting to proceed.
    pub async fn run_reconnecting(self) {
        loop {
            if let Err(e) = self.run_once().await {
                log::error!("Control plane subscription error: {}", e);
            }
            if self.stop.is_set() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leave_command_deserializes() {
        let cmd: Command = serde_json::from_str(r#"{"action":"leave"}"#).unwrap();
        assert!(matches!(cmd, Command::Leave));
    }

    #[test]
    fn reconfigure_command_deserializes_with_partial_fields() {
        let cmd: Command =
            serde_json::from_str(r#"{"action":"reconfigure","language":"fr"}"#).unwrap();
        match cmd {
            Command::Reconfigure { language, task } => {
                assert_eq!(language.as_deref(), Some("fr"));
                assert_eq!(task, None);
            }
            Command::Leave => panic!("wrong variant"),
        }
    }

    #[test]
    fn stop_flag_starts_clear() {
        let flag = StopFlag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
    }
}
