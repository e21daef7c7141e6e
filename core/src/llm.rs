//! Reply generation.
//!
//! `LlmClient` talks to any OpenAI-compatible local server (Ollama,
//! llama.cpp server, vLLM) over `chat/completions`. `Assistant` layers the
//! persona, optional context prefix, single-sentence shaping, and a
//! deterministic fallback so a dead LLM never silences the loop.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::memory::Role;
use crate::{JarvinError, Result};

/// System instructions keeping replies crisp, in-character, and adaptive.
pub const DEFAULT_SYSTEM_INSTRUCTIONS: &str = "You are Jarvin - an AI assistant inspired by J.A.R.V.I.S.: polite, unflappable, subtly wry, and highly efficient. \
Dynamically adapt your tone to the user's intent: \
if they seek emotional support, begin with a brief empathetic acknowledgement and follow with one concise, practical suggestion; \
if they want clear advice, facts, or a decision, respond decisively with an action-first directive or a crisp fact. \
When uncertain, ask at most one very short clarifying question. \
Always reply in at most ONE sentence. \
Mirror the user's formality and intensity, but use no preambles, no lists, no markdown, and no emojis.";

/// Blocking-from-the-caller's-view reply generation. Implementations may
/// stream internally but present a single awaited string.
#[async_trait]
pub trait ChatEngine: Send + Sync {
    async fn reply(&self, user_text: &str, context: Option<&str>) -> Result<String>;
}

#[derive(Clone, Debug)]
pub struct LlmClientConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmClientConfig {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            base_url: s.llm_base_url.clone(),
            model: s.llm_model.clone(),
            api_key: s.llm_api_key.clone(),
            request_timeout_ms: s.llm_timeout_ms,
            temperature: s.llm_temperature,
            max_tokens: s.llm_max_tokens,
        }
    }
}

/// HTTP client for OpenAI-compatible `chat/completions`.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    pub cfg: LlmClientConfig,
}

impl LlmClient {
    pub fn new(cfg: LlmClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| JarvinError::Llm(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, cfg })
    }

    /// One blocking chat turn; returns the assistant text, trimmed.
    pub async fn chat(
        &self,
        system_prompt: &str,
        user_text: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let url = format!(
            "{}/chat/completions",
            self.cfg.base_url.trim_end_matches('/')
        );
        let body = json!({
            "model": self.cfg.model,
            "messages": [
                { "role": "system", "content": system_prompt.trim() },
                { "role": "user", "content": user_text.trim() },
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        debug!(target: "llm", %url, model = %self.cfg.model, "POST chat/completions");
        let mut req = self.http.post(&url).header("content-type", "application/json");
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .json(&body)
            .send()
            .await
            .map_err(|e| JarvinError::Llm(format!("request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(JarvinError::Llm(format!(
                "chat/completions returned {}: {}",
                status, body
            )));
        }

        let val: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| JarvinError::Llm(format!("failed to parse response: {}", e)))?;
        let text = val
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        Ok(text)
    }
}

/// The conversational engine used by the live pipeline and `/chat`.
pub struct Assistant {
    client: LlmClient,
    pub system_instructions: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Assistant {
    pub fn new(client: LlmClient, system_instructions: String) -> Self {
        let temperature = client.cfg.temperature;
        let max_tokens = client.cfg.max_tokens;
        Self {
            client,
            system_instructions,
            temperature,
            max_tokens,
        }
    }

    pub fn from_settings(s: &Settings) -> Result<Self> {
        let client = LlmClient::new(LlmClientConfig::from_settings(s))?;
        Ok(Self::new(client, s.system_instructions.clone()))
    }

    /// Reply with per-call overrides; used by `/chat`.
    pub async fn reply_with(
        &self,
        user_text: &str,
        context: Option<&str>,
        system_instructions: Option<&str>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<String> {
        let text = user_text.trim();
        if text.is_empty() {
            return Ok("I didn't catch that - please repeat.".into());
        }

        let composed = match context.map(str::trim).filter(|c| !c.is_empty()) {
            Some(ctx) => format!("{}\n\nUser: {}", ctx, text),
            None => text.to_string(),
        };
        let system = system_instructions.unwrap_or(&self.system_instructions);

        match self
            .client
            .chat(
                system,
                &composed,
                temperature.unwrap_or(self.temperature),
                max_tokens.unwrap_or(self.max_tokens),
            )
            .await
        {
            Ok(out) if !out.is_empty() => Ok(one_sentence(&out)),
            Ok(_) => Ok(fallback_reply(text)),
            Err(e) => {
                warn!(target: "llm", error = %e, "Local LLM failed; using fallback reply");
                Ok(fallback_reply(text))
            }
        }
    }
}

#[async_trait]
impl ChatEngine for Assistant {
    async fn reply(&self, user_text: &str, context: Option<&str>) -> Result<String> {
        self.reply_with(user_text, context, None, None, None).await
    }
}

static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?](\s|$)").expect("valid regex"));

// Avoids run-ons without chopping words awkwardly when the model skipped
// sentence punctuation entirely.
const SOFT_CHAR_CAP: usize = 220;

/// First sentence of `text`, trimmed; soft-capped when no punctuation exists.
pub fn one_sentence(text: &str) -> String {
    let s = text.trim();
    if s.is_empty() {
        return String::new();
    }
    if let Some(m) = SENTENCE_END.find(s) {
        return s[..m.start() + 1].trim().to_string();
    }
    if s.chars().count() > SOFT_CHAR_CAP {
        let capped: String = s.chars().take(SOFT_CHAR_CAP).collect();
        return format!("{}...", capped.trim_end());
    }
    s.to_string()
}

/// Deterministic stub replies when no local LLM is reachable.
pub fn fallback_reply(text: &str) -> String {
    let lower = text.to_lowercase();
    if lower.contains("time") {
        return "I can report the time once the clock tool is wired.".into();
    }
    if lower.contains("weather") {
        return "Weather checks will be available after the forecast tool is connected.".into();
    }
    one_sentence(&format!("You said: {}", text))
}

/// Compact, model-friendly context block: selected profile fields plus a
/// small window of recent turns.
pub fn build_context(
    profile: &HashMap<String, String>,
    history: &[(Role, String)],
    max_turns: usize,
) -> String {
    let mut lines: Vec<String> = Vec::new();

    let mut pf: Vec<String> = Vec::new();
    for (key, label) in [
        ("name", "Name"),
        ("goal", "Goal"),
        ("mood", "Mood"),
        ("communication_style", "Prefers"),
        ("response_length", "Length"),
    ] {
        if let Some(v) = profile.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            pf.push(format!("{}: {}", label, v));
        }
    }
    if !pf.is_empty() {
        lines.push(format!("User profile: {}", pf.join(" | ")));
    }

    let window = &history[history.len().saturating_sub(max_turns * 2)..];
    if !window.is_empty() {
        lines.push("Recent conversation:".into());
        for (role, msg) in window {
            let m = msg.trim().replace('\n', " ");
            if m.is_empty() {
                continue;
            }
            let who = match role {
                Role::User => "User",
                Role::Assistant => "Jarvin",
            };
            lines.push(format!("{}: {}", who, m));
        }
    }

    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_sentence_cuts_at_first_terminator() {
        assert_eq!(one_sentence("Done. And more text."), "Done.");
        assert_eq!(one_sentence("  Is that so?  Indeed."), "Is that so?");
        assert_eq!(one_sentence("no punctuation here"), "no punctuation here");
        assert_eq!(one_sentence(""), "");
    }

    #[test]
    fn one_sentence_soft_caps_run_ons() {
        let long = "word ".repeat(100);
        let out = one_sentence(&long);
        assert!(out.ends_with("..."));
        assert!(out.chars().count() <= SOFT_CHAR_CAP + 3);
    }

    #[test]
    fn fallback_replies_are_single_sentences() {
        assert!(fallback_reply("what time is it").contains("clock"));
        assert!(fallback_reply("how's the weather").contains("forecast"));
        assert_eq!(fallback_reply("hello there"), "You said: hello there");
    }

    #[test]
    fn context_includes_profile_and_windowed_history() {
        let mut profile = HashMap::new();
        profile.insert("name".to_string(), "Alice".to_string());
        profile.insert("goal".to_string(), "Ship Jarvin".to_string());
        profile.insert("mood".to_string(), "".to_string());

        let history: Vec<(Role, String)> = (0..10)
            .flat_map(|i| {
                [
                    (Role::User, format!("question {}", i)),
                    (Role::Assistant, format!("answer {}", i)),
                ]
            })
            .collect();

        let ctx = build_context(&profile, &history, 2);
        assert!(ctx.starts_with("User profile: Name: Alice | Goal: Ship Jarvin"));
        // only the last two pairs survive the window
        assert!(ctx.contains("question 9"));
        assert!(!ctx.contains("question 7"));
        assert!(ctx.contains("Jarvin: answer 9"));
    }

    #[test]
    fn context_is_empty_for_no_inputs() {
        assert_eq!(build_context(&HashMap::new(), &[], 6), "");
    }
}
