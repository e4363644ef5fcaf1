//! Generative text-completion service.
//!
//! [`TextCompletion`] is the seam the patch generator and reviewer use. The
//! contract never fails: an unconfigured service, an HTTP error or an empty
//! reply all come back as `None`.

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::io::config::{AgentConfig, Provider};
use crate::io::retry::{CallOutcome, RetryPolicy, check_status, classify_send_error};

const TEMPERATURE: f64 = 0.2;

/// Prompt in, text out.
pub trait TextCompletion {
    /// False when no provider credentials are available.
    fn is_configured(&self) -> bool;

    /// Complete a system + user prompt pair. Failures are logged and become `None`.
    fn complete(&self, system: &str, user: &str) -> Option<String>;
}

/// HTTP-backed completion client for the configured provider.
pub struct LlmClient {
    backend: Option<Backend>,
}

struct Backend {
    provider: Provider,
    api_key: String,
    model: String,
    endpoint: String,
    http: Client,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn unconfigured() -> Self {
        Self { backend: None }
    }

    pub fn from_config(cfg: &AgentConfig) -> Result<Self> {
        let Some((provider, api_key)) = cfg.llm.active()? else {
            info!("generative service not configured");
            return Ok(Self::unconfigured());
        };
        let Some(model) = cfg
            .llm
            .model
            .clone()
            .or_else(|| default_model(provider).map(str::to_string))
        else {
            warn!(?provider, "provider requires LLM_MODEL; treating service as unconfigured");
            return Ok(Self::unconfigured());
        };
        let base = cfg
            .llm
            .base_url
            .as_deref()
            .unwrap_or_else(|| default_base_url(provider));
        let endpoint = format!("{}/{}", base.trim_end_matches('/'), endpoint_path(provider));
        let http = Client::builder()
            .timeout(cfg.http_timeout())
            .build()
            .context("build llm http client")?;
        debug!(?provider, %model, %endpoint, "generative service configured");
        Ok(Self {
            backend: Some(Backend {
                provider,
                api_key: api_key.to_string(),
                model,
                endpoint,
                http,
                retry: cfg.retry,
            }),
        })
    }
}

impl TextCompletion for LlmClient {
    fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    fn complete(&self, system: &str, user: &str) -> Option<String> {
        let backend = self.backend.as_ref()?;
        backend.call(system, user).into_option("llm completion")
    }
}

impl Backend {
    #[instrument(skip_all, fields(provider = ?self.provider))]
    fn call(&self, system: &str, user: &str) -> CallOutcome<String> {
        let body = request_body(self.provider, &self.model, system, user);
        let response = self.retry.execute("llm completion", || {
            let response = self
                .authorize(self.http.post(&self.endpoint))
                .json(&body)
                .send()
                .map_err(classify_send_error)?;
            check_status(response)
        });
        let text = match response.and_then(|r| r.text().context("read llm response")) {
            Ok(text) => text,
            Err(err) => return CallOutcome::Failed(err),
        };
        match extract_text(self.provider, &text) {
            Ok(Some(text)) => CallOutcome::Success(text),
            Ok(None) => CallOutcome::Empty,
            Err(err) => CallOutcome::Failed(err),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.provider {
            Provider::OpenAi => request.bearer_auth(&self.api_key),
            Provider::Yandex => request.header("Authorization", format!("Api-Key {}", self.api_key)),
            Provider::Anthropic => request
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01"),
        }
    }
}

fn default_model(provider: Provider) -> Option<&'static str> {
    match provider {
        Provider::OpenAi => Some("gpt-4o-mini"),
        Provider::Anthropic => Some("claude-3-5-haiku-latest"),
        // Yandex model URIs embed the cloud folder id.
        Provider::Yandex => None,
    }
}

fn default_base_url(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "https://api.openai.com/v1",
        Provider::Yandex => "https://llm.api.cloud.yandex.net/foundationModels/v1",
        Provider::Anthropic => "https://api.anthropic.com/v1",
    }
}

fn endpoint_path(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "chat/completions",
        Provider::Yandex => "completion",
        Provider::Anthropic => "messages",
    }
}

fn request_body(provider: Provider, model: &str, system: &str, user: &str) -> Value {
    match provider {
        Provider::OpenAi => json!({
            "model": model,
            "temperature": TEMPERATURE,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        }),
        Provider::Yandex => json!({
            "modelUri": model,
            "completionOptions": {"stream": false, "temperature": TEMPERATURE, "maxTokens": 2000},
            "messages": [
                {"role": "system", "text": system},
                {"role": "user", "text": user},
            ],
        }),
        Provider::Anthropic => json!({
            "model": model,
            "system": system,
            "temperature": TEMPERATURE,
            "max_tokens": 4096,
            "messages": [{"role": "user", "content": user}],
        }),
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YandexResponse {
    result: YandexResult,
}

#[derive(Debug, Deserialize)]
struct YandexResult {
    alternatives: Vec<YandexAlternative>,
}

#[derive(Debug, Deserialize)]
struct YandexAlternative {
    message: YandexMessage,
}

#[derive(Debug, Deserialize)]
struct YandexMessage {
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Pull the reply text out of a provider response body. Blank text is `None`.
fn extract_text(provider: Provider, body: &str) -> Result<Option<String>> {
    let text = match provider {
        Provider::OpenAi => {
            let parsed: OpenAiResponse =
                serde_json::from_str(body).context("decode chat completions response")?;
            parsed.choices.into_iter().next().and_then(|c| c.message.content)
        }
        Provider::Yandex => {
            let parsed: YandexResponse =
                serde_json::from_str(body).context("decode completion response")?;
            parsed
                .result
                .alternatives
                .into_iter()
                .next()
                .map(|a| a.message.text)
        }
        Provider::Anthropic => {
            let parsed: AnthropicResponse =
                serde_json::from_str(body).context("decode messages response")?;
            let joined = parsed
                .content
                .into_iter()
                .filter(|block| block.kind == "text")
                .filter_map(|block| block.text)
                .collect::<Vec<_>>()
                .join("\n");
            Some(joined)
        }
    };
    Ok(text.filter(|t| !t.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_client_returns_none() {
        let client = LlmClient::unconfigured();
        assert!(!client.is_configured());
        assert_eq!(client.complete("s", "u"), None);
    }

    #[test]
    fn provider_without_key_is_unconfigured() {
        let mut cfg = AgentConfig::default();
        cfg.llm.provider = Some("openai".to_string());
        let client = LlmClient::from_config(&cfg).expect("client");
        assert!(!client.is_configured());
    }

    #[test]
    fn yandex_without_model_is_unconfigured() {
        let mut cfg = AgentConfig::default();
        cfg.llm.provider = Some("yandex".to_string());
        cfg.llm.api_key = Some("k".to_string());
        assert!(!LlmClient::from_config(&cfg).expect("client").is_configured());

        cfg.llm.model = Some("gpt://folder/yandexgpt/latest".to_string());
        assert!(LlmClient::from_config(&cfg).expect("client").is_configured());
    }

    #[test]
    fn request_bodies_follow_provider_shapes() {
        let openai = request_body(Provider::OpenAi, "m", "sys", "usr");
        assert_eq!(openai["messages"][0]["content"], "sys");
        assert_eq!(openai["messages"][1]["role"], "user");

        let yandex = request_body(Provider::Yandex, "gpt://f/y", "sys", "usr");
        assert_eq!(yandex["modelUri"], "gpt://f/y");
        assert_eq!(yandex["messages"][1]["text"], "usr");
        assert_eq!(yandex["completionOptions"]["maxTokens"], 2000);

        let anthropic = request_body(Provider::Anthropic, "m", "sys", "usr");
        assert_eq!(anthropic["system"], "sys");
        assert_eq!(anthropic["messages"][0]["content"], "usr");
    }

    #[test]
    fn extracts_text_per_provider() {
        let openai = r#"{"choices":[{"message":{"content":"diff --git a/x b/x"}}]}"#;
        assert_eq!(
            extract_text(Provider::OpenAi, openai).expect("parse").as_deref(),
            Some("diff --git a/x b/x")
        );

        let yandex = r#"{"result":{"alternatives":[{"message":{"role":"assistant","text":"STATUS: APPROVED"}}]}}"#;
        assert_eq!(
            extract_text(Provider::Yandex, yandex).expect("parse").as_deref(),
            Some("STATUS: APPROVED")
        );

        let anthropic = r#"{"content":[{"type":"text","text":"a"},{"type":"tool_use"},{"type":"text","text":"b"}]}"#;
        assert_eq!(
            extract_text(Provider::Anthropic, anthropic).expect("parse").as_deref(),
            Some("a\nb")
        );
    }

    #[test]
    fn blank_or_missing_text_is_empty_and_garbage_is_an_error() {
        assert_eq!(
            extract_text(Provider::OpenAi, r#"{"choices":[]}"#).expect("parse"),
            None
        );
        assert_eq!(
            extract_text(Provider::OpenAi, r#"{"choices":[{"message":{"content":"  "}}]}"#)
                .expect("parse"),
            None
        );
        assert!(extract_text(Provider::Yandex, "not json").is_err());
    }
}
