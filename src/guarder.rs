//! Response Guarder (§4.5).
//!
//! The regex pre-filter is grounded on `content_cleaning.rs`'s style of
//! pure-function text classification (lowercase, substring checks, no
//! external state); the remote classifier follows the same consolidated
//! "remote model client" shape as the describer (§9), rather than
//! `TODO/llm.rs`'s ad hoc `text_to_sql`/`describe_scene` calls.

use crate::error::Error;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// Case-insensitive "nothing happened" patterns (§4.5 "Regex pre-filter").
static NOISE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)no significant change",
        r"(?i)no (noticeable |visible )?movement",
        r"(?i)scene (is )?unchanged",
        r"(?i)nothing (has )?changed",
        r"(?i)no activity (detected|observed)",
        r"(?i)(image|frame|scene) (appears |looks )?(identical|the same)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static guarder pattern is valid"))
    .collect()
});

/// `true` if `text` matches one of the fixed no-op patterns.
fn matches_noise_pattern(text: &str) -> bool {
    NOISE_PATTERNS.iter().any(|re| re.is_match(text))
}

/// The §6 "Guarder model" remote contract.
pub trait GuarderClient: Send + Sync {
    fn classify(&self, text: &str, previous_text: Option<&str>, model_id: &str, timeout: Duration) -> Result<bool, Error>;
}

impl GuarderClient for Box<dyn GuarderClient> {
    fn classify(&self, text: &str, previous_text: Option<&str>, model_id: &str, timeout: Duration) -> Result<bool, Error> {
        (**self).classify(text, previous_text, model_id, timeout)
    }
}

/// HTTP implementation against an OpenAI-compatible `/chat/completions`
/// endpoint, reusing the same request shape as `HttpVisionClient` minus the
/// image content part.
pub struct HttpGuarderClient {
    http: reqwest::Client,
    base_url: String,
    runtime: tokio::runtime::Runtime,
}

impl HttpGuarderClient {
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
}

#[derive(serde::Serialize)]
struct GuarderRequest<'a> {
    model: String,
    messages: Vec<GuarderMessage<'a>>,
    max_tokens: u32,
}

#[derive(serde::Serialize)]
struct GuarderMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(serde::Deserialize)]
struct GuarderResponse {
    choices: Vec<GuarderChoice>,
}

#[derive(serde::Deserialize)]
struct GuarderChoice {
    message: GuarderChoiceMessage,
}

#[derive(serde::Deserialize)]
struct GuarderChoiceMessage {
    content: String,
}

impl GuarderClient for HttpGuarderClient {
    fn classify(&self, text: &str, previous_text: Option<&str>, model_id: &str, timeout: Duration) -> Result<bool, Error> {
        let prompt = format!(
            "Previous description: \"{}\"\nNew description: \"{text}\"\n\
             Does the new description report something meaningful and different \
             from the previous one? Answer with exactly one word: yes or no.",
            previous_text.unwrap_or("(none)"),
        );

        let body = GuarderRequest {
            model: model_id.to_string(),
            messages: vec![GuarderMessage { role: "user", content: &prompt }],
            max_tokens: 5,
        };

        let call = async {
            let resp = self
                .http
                .post(&self.base_url)
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::GuarderError(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(Error::GuarderError(format!("HTTP {}", resp.status())));
            }

            let parsed: GuarderResponse = resp.json().await.map_err(|e| Error::GuarderError(e.to_string()))?;
            parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| Error::GuarderError("empty choices array".to_string()))
        };

        let raw = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, call).await })
            .map_err(|_| Error::GuarderTimeout)??;

        Ok(parse_yes_no(&raw))
    }
}

/// Fail-open yes/no parse (§4.5 "any parse ambiguity is treated as yes").
fn parse_yes_no(raw: &str) -> bool {
    let lower = raw.trim().to_lowercase();
    !lower.starts_with("no")
}

/// Runs the pre-filter, then (if configured and not already rejected) the
/// remote classifier. Returns the final `significance` flag for a
/// `Description` (§4.5).
pub fn guard<C: GuarderClient>(
    client: Option<&C>,
    text: &str,
    previous_text: Option<&str>,
    use_guarder: bool,
    model_id: &str,
    timeout: Duration,
) -> bool {
    if matches_noise_pattern(text) {
        return false;
    }
    if !use_guarder {
        return true;
    }
    let Some(client) = client else { return true };
    match client.classify(text, previous_text, model_id, timeout) {
        Ok(significant) => significant,
        Err(Error::GuarderTimeout) | Err(Error::GuarderError(_)) => true,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysYes;
    impl GuarderClient for AlwaysYes {
        fn classify(&self, _: &str, _: Option<&str>, _: &str, _: Duration) -> Result<bool, Error> {
            Ok(true)
        }
    }

    struct AlwaysNo;
    impl GuarderClient for AlwaysNo {
        fn classify(&self, _: &str, _: Option<&str>, _: &str, _: Duration) -> Result<bool, Error> {
            Ok(false)
        }
    }

    struct AlwaysTimeout;
    impl GuarderClient for AlwaysTimeout {
        fn classify(&self, _: &str, _: Option<&str>, _: &str, _: Duration) -> Result<bool, Error> {
            Err(Error::GuarderTimeout)
        }
    }

    #[test]
    fn noise_pattern_is_rejected_without_calling_guarder() {
        let significant = guard(Some(&AlwaysYes), "No significant change detected.", None, true, "m", Duration::from_secs(1));
        assert!(!significant);
    }

    #[test]
    fn guarder_disabled_passes_through() {
        let significant = guard::<AlwaysNo>(None, "A person walked by.", None, false, "m", Duration::from_secs(1));
        assert!(significant);
    }

    #[test]
    fn guarder_timeout_fails_open() {
        let significant = guard(Some(&AlwaysTimeout), "A person walked by.", None, true, "m", Duration::from_secs(1));
        assert!(significant);
    }

    #[test]
    fn guarder_no_verdict_suppresses() {
        let significant = guard(Some(&AlwaysNo), "A person walked by.", None, true, "m", Duration::from_secs(1));
        assert!(!significant);
    }

    #[test]
    fn parse_yes_no_is_fail_open_on_ambiguity() {
        assert!(parse_yes_no("Yes, definitely."));
        assert!(parse_yes_no("I'm not sure, maybe."));
        assert!(!parse_yes_no("no"));
        assert!(!parse_yes_no("No."));
    }
}
