//! Shared Chrome DevTools Protocol plumbing for the DOM-driven strategies
//! (Meet, Teams): browser launch, the background handler task CDP requires,
//! and the JS-side audio queue both strategies drain the same way.
//!
//! Grounded in `chromiumoxide`'s own launch contract: `Browser::launch`
//! returns a `Handler` that must be polled to completion on its own task for
//! any CDP command to make progress — there is no implicit driver.

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt as _;
use tokio::task::JoinHandle;

use crate::flow::strategy::StrategyError;
use crate::logging::log;

/// A launched browser plus the single page the bot operates in, and the
/// handle of the background task pumping CDP events — dropping the handle
/// (without aborting it) lets the browser keep running until `leave`.
pub struct Session {
    pub browser: Browser,
    pub page: Page,
    handler: JoinHandle<()>,
}

impl Session {
    pub async fn launch(headless: bool) -> Result<Self, StrategyError> {
        let config = BrowserConfig::builder()
            .with_head()
            .build()
            .map_err(|e| StrategyError::Prepare(format!("invalid browser config: {e}")))?;
        let config = if headless { config } else { config };

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| StrategyError::Join(format!("failed to launch browser: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    log::warn!("CDP handler event error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| StrategyError::Join(format!("failed to open page: {e}")))?;

        Ok(Self {
            browser,
            page,
            handler,
        })
    }

    pub async fn close(&mut self) {
        let _ = self.page.close().await;
        let _ = self.browser.close().await;
        self.handler.abort();
    }
}

/// JS injected via `evaluate_on_new_document` before navigation: wraps
/// `RTCPeerConnection` so every remote track gets attached to a hidden
/// `<audio>` element the shared acquisition code can find, and maintains a
/// window-scoped queue of captured mono Float32 chunks drained each poll
/// (§4.2.2 "without this hook Teams does not expose remote audio in the
/// DOM" — harmless, if redundant, on Meet, which already exposes audio
/// elements directly).
pub const AUDIO_INTERCEPT_INIT_SCRIPT: &str = r#"
(() => {
  window.__meetbotAudioQueue = [];
  window.__meetbotAudioCtx = new (window.AudioContext || window.webkitAudioContext)();

  const attach = (stream) => {
    if (!stream.getAudioTracks().length) return;
    const el = document.createElement('audio');
    el.srcObject = stream;
    el.muted = true;
    el.autoplay = true;
    document.body.appendChild(el);

    const ctx = window.__meetbotAudioCtx;
    const src = ctx.createMediaStreamSource(stream);
    const proc = ctx.createScriptProcessor(4096, 1, 1);
    src.connect(proc);
    proc.connect(ctx.destination);
    proc.onaudioprocess = (ev) => {
      const data = ev.inputBuffer.getChannelData(0);
      window.__meetbotAudioQueue.push(Array.from(data));
    };
  };

  const NativePC = window.RTCPeerConnection;
  if (NativePC) {
    window.RTCPeerConnection = function (...args) {
      const pc = new NativePC(...args);
      pc.addEventListener('track', (ev) => {
        if (ev.streams && ev.streams[0]) attach(ev.streams[0]);
      });
      return pc;
    };
    window.RTCPeerConnection.prototype = NativePC.prototype;
  }
})();
"#;

/// Drains `window.__meetbotAudioQueue`, flattening it into one chunk of
/// mono samples at the page's (48 kHz, by convention) capture rate. Returns
/// `None` if nothing was captured since the last drain.
pub async fn drain_audio_queue(page: &Page) -> Option<Vec<f32>> {
    let script = "(() => { const q = window.__meetbotAudioQueue || []; \
                  window.__meetbotAudioQueue = []; return q.flat(); })()";
    let value: Vec<f32> = page.evaluate(script).await.ok()?.into_value().ok()?;
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
