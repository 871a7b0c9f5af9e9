//! Vision Describer (§4.4, §6 "Remote model contracts").
//!
//! Grounded on `TODO/llm.rs`'s `LlmClient` (OpenAI-compatible `/chat/completions`
//! request with base64 `image_url` content parts, `reqwest` with a fixed
//! timeout). Generalized per §9 "Ollama/HTTP LLM calls scattered across
//! modules": consolidated behind one `VisionModelClient` trait matching the
//! §6 request/response shape, rather than a provider enum with
//! primary/fallback baked in. A concrete HTTP implementation is provided;
//! other transports (gRPC, local IPC) implement the same trait.

use crate::error::Error;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Track summary handed to the describer so its prompt can reference what
/// the tracker already knows (§4.4 "current track summary").
#[derive(Debug, Clone)]
pub struct TrackSummary {
    pub track_id: u64,
    pub class: String,
    pub bbox: (i32, i32, i32, i32),
}

/// `context` bundle passed alongside the frame (§4.4 Operations).
#[derive(Debug, Clone)]
pub struct DescribeContext {
    pub mode: crate::config::Mode,
    pub focus: Vec<String>,
    pub tracks: Vec<TrackSummary>,
    pub previous_description: Option<String>,
}

/// Result of a successful describe call (§3 `Description`).
#[derive(Debug, Clone)]
pub struct Description {
    pub text: String,
    pub frame_seq: u64,
    pub model_id: String,
    pub latency: Duration,
    /// Set by the guarder, not the describer itself; `false` until then.
    pub significance: bool,
}

/// The §6 "Vision model" remote contract. Implementations must not block
/// longer than the timeout embedded in the request.
pub trait VisionModelClient: Send + Sync {
    fn describe(
        &self,
        image_bytes: &[u8],
        context: &DescribeContext,
        model_id: &str,
        timeout: Duration,
    ) -> Result<(String, Duration), Error>;
}

impl VisionModelClient for Box<dyn VisionModelClient> {
    fn describe(
        &self,
        image_bytes: &[u8],
        context: &DescribeContext,
        model_id: &str,
        timeout: Duration,
    ) -> Result<(String, Duration), Error> {
        (**self).describe(image_bytes, context, model_id, timeout)
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
    detail: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// HTTP implementation against an OpenAI-compatible `/chat/completions`
/// endpoint. Owns a dedicated single-threaded Tokio runtime so the scheduler
/// can call `describe` synchronously while the actual request stays async,
/// same division of labor as `TODO/llm.rs`'s `reqwest::Client` usage — just
/// driven from a worker thread instead of an ambient async main.
pub struct HttpVisionClient {
    http: reqwest::Client,
    base_url: String,
    runtime: tokio::runtime::Runtime,
}

impl HttpVisionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder().build().expect("reqwest client"),
            base_url: base_url.into(),
            runtime: tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("tokio runtime"),
        }
    }

    fn build_prompt(context: &DescribeContext) -> String {
        let focus = if context.focus.is_empty() {
            "any object".to_string()
        } else {
            context.focus.join(", ")
        };
        let tracks = context
            .tracks
            .iter()
            .map(|t| format!("#{} {} at ({},{},{},{})", t.track_id, t.class, t.bbox.0, t.bbox.1, t.bbox.2, t.bbox.3))
            .collect::<Vec<_>>()
            .join("; ");

        let mut prompt = format!(
            "Mode: {:?}. Focus classes: {focus}. Current tracks: {}.\n\
             Describe what is happening in this frame in one or two sentences.",
            context.mode,
            if tracks.is_empty() { "none" } else { &tracks }
        );
        if let Some(prev) = &context.previous_description {
            prompt.push_str(&format!("\nPrevious description for comparison: \"{prev}\""));
        }
        prompt
    }
}

impl VisionModelClient for HttpVisionClient {
    fn describe(
        &self,
        image_bytes: &[u8],
        context: &DescribeContext,
        model_id: &str,
        timeout: Duration,
    ) -> Result<(String, Duration), Error> {
        let b64 = format!("data:image/jpeg;base64,{}", B64.encode(image_bytes));
        let prompt = Self::build_prompt(context);

        let body = ChatRequest {
            model: model_id.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: vec![
                    ContentPart::ImageUrl { image_url: ImageUrl { url: b64, detail: "low".to_string() } },
                    ContentPart::Text { text: prompt },
                ],
            }],
            max_tokens: 120,
            temperature: 0.2,
        };

        debug!(model_id, "vision describer call");
        let started = Instant::now();

        let call = async {
            let resp = self
                .http
                .post(&self.base_url)
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::VlmTransport(e.to_string()))?;

            if !resp.status().is_success() {
                let status = resp.status();
                return Err(Error::VlmBackend(format!("HTTP {status}")));
            }

            let parsed: ChatResponse = resp.json().await.map_err(|e| Error::VlmBackend(e.to_string()))?;
            parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| Error::VlmBackend("empty choices array".to_string()))
        };

        let text = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, call).await })
            .map_err(|_| Error::VlmTimeout)??;

        Ok((text, started.elapsed()))
    }
}

/// Failure-tracking wrapper around a `VisionModelClient`; the scheduler asks
/// this whether the describer is `Degraded` (§4.4 "Failure semantics").
pub struct Describer<C: VisionModelClient> {
    client: C,
    vlm_fail_threshold: u32,
    consecutive_failures: u32,
}

impl<C: VisionModelClient> Describer<C> {
    pub fn new(client: C, vlm_fail_threshold: u32) -> Self {
        Self { client, vlm_fail_threshold, consecutive_failures: 0 }
    }

    pub fn is_degraded(&self) -> bool {
        self.consecutive_failures >= self.vlm_fail_threshold
    }

    pub fn describe(
        &mut self,
        image_bytes: &[u8],
        context: &DescribeContext,
        model_id: &str,
        frame_seq: u64,
        timeout: Duration,
    ) -> Result<Description, Error> {
        match self.client.describe(image_bytes, context, model_id, timeout) {
            Ok((text, latency)) => {
                self.consecutive_failures = 0;
                Ok(Description { text, frame_seq, model_id: model_id.to_string(), latency, significance: false })
            }
            Err(err) => {
                self.consecutive_failures += 1;
                if self.is_degraded() {
                    warn!(consecutive_failures = self.consecutive_failures, "vision describer degraded");
                }
                Err(err)
            }
        }
    }
}

/// Whether the Vision Describer should run at all for this frame (§4.4,
/// §4.6 step 6). `best_confidence` is `None` when the detector produced no
/// detections.
pub fn should_describe(
    mode: crate::config::Mode,
    best_confidence: Option<f32>,
    skip_llm_threshold: f32,
    trigger_fired: bool,
) -> bool {
    use crate::config::Mode;
    match mode {
        Mode::Full | Mode::Diff => true,
        _ => trigger_fired || best_confidence.map_or(true, |c| c < skip_llm_threshold),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;

    #[test]
    fn full_mode_always_describes() {
        assert!(should_describe(Mode::Full, Some(0.99), 0.7, false));
    }

    #[test]
    fn track_mode_skips_when_confidence_high() {
        assert!(!should_describe(Mode::Track, Some(0.95), 0.7, false));
    }

    #[test]
    fn track_mode_describes_when_confidence_low() {
        assert!(should_describe(Mode::Track, Some(0.2), 0.7, false));
    }

    #[test]
    fn no_detections_triggers_describe() {
        assert!(should_describe(Mode::Track, None, 0.7, false));
    }
}
