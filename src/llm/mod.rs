//! LLM adapter: chat-completion client abstraction, the OpenAI-compatible provider,
//! and the disabled/mock/scripted stand-ins used when no real model is wired in.

pub mod json;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::metrics::{ensure_metrics_described, LLM_CALLS, LLM_CALL_MS, LLM_FAILURES};

pub use json::{extract_first_json, parse_reply, ParsedReply};

/// What a call is for. Drives logging labels and the mock provider's canned replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallPurpose {
    Summary,
    Draft,
    DuplicateCheck,
    OneLiner,
    Cluster,
}

impl CallPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            CallPurpose::Summary => "summary",
            CallPurpose::Draft => "draft",
            CallPurpose::DuplicateCheck => "duplicate_check",
            CallPurpose::OneLiner => "one_liner",
            CallPurpose::Cluster => "cluster",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub purpose: CallPurpose,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub timeout: Duration,
    /// Ask the provider for a JSON object response when it supports it.
    pub json_mode: bool,
}

impl ChatRequest {
    /// Concatenated user content; handy for scripted clients and logs.
    pub fn user_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub type ChatFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;

/// Trait object used across the pipeline.
pub trait ChatClient: Send + Sync {
    /// Run one chat completion and return the assistant text.
    fn complete<'a>(&'a self, req: &'a ChatRequest) -> ChatFuture<'a>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynChatClient = Arc<dyn ChatClient>;

/// Issue a call with the request's timeout, recording metrics and logs.
/// Any failure (transport, status, timeout, blank content) collapses to `None`.
pub async fn call(client: &dyn ChatClient, req: &ChatRequest) -> Option<String> {
    ensure_metrics_described();
    let purpose = req.purpose.as_str();
    counter!(LLM_CALLS, "purpose" => purpose).increment(1);
    let started = Instant::now();

    let outcome = tokio::time::timeout(req.timeout, client.complete(req)).await;
    histogram!(LLM_CALL_MS, "purpose" => purpose).record(started.elapsed().as_millis() as f64);

    let err = match outcome {
        Ok(Ok(text)) if !text.trim().is_empty() => {
            debug!(target: "llm", purpose, model = %req.model, chars = text.chars().count(), "llm call ok");
            return Some(text);
        }
        Ok(Ok(_)) => anyhow!("empty completion"),
        Ok(Err(e)) => e,
        Err(_) => anyhow!("timed out after {:?}", req.timeout),
    };
    counter!(LLM_FAILURES, "purpose" => purpose).increment(1);
    warn!(target: "llm", purpose, model = %req.model, provider = client.provider_name(), error = %err, "llm call failed");
    None
}

/// Factory: build a client according to config and environment variables.
///
/// * If `LLM_TEST_MODE=mock`, returns the deterministic mock client.
/// * Else dispatches on `provider`; unknown providers are disabled.
pub fn build_client_from_config(config: &LlmConfig) -> anyhow::Result<DynChatClient> {
    if std::env::var("LLM_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(MockClient));
    }

    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiCompatClient::new(config)?)),
        "mock" => Ok(Arc::new(MockClient)),
        "disabled" => Ok(Arc::new(DisabledClient)),
        other => {
            warn!(target: "llm", provider = other, "unknown llm provider, calls disabled");
            Ok(Arc::new(DisabledClient))
        }
    }
}

// ------------------------------------------------------------
// OpenAI-compatible provider
// ------------------------------------------------------------

pub struct OpenAiCompatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiCompatClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("daily-briefing/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
        })
    }

    async fn complete_impl(&self, req: &ChatRequest) -> anyhow::Result<String> {
        if self.api_key.is_empty() {
            anyhow::bail!("no api key configured");
        }

        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            temperature: f32,
            #[serde(skip_serializing_if = "Option::is_none")]
            response_format: Option<ResponseFormat>,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }

        let body = Req {
            model: &req.model,
            messages: &req.messages,
            temperature: req.temperature,
            response_format: req.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(req.timeout)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("provider returned HTTP {status}");
        }
        let parsed: Resp = resp.json().await?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

impl ChatClient for OpenAiCompatClient {
    fn complete<'a>(&'a self, req: &'a ChatRequest) -> ChatFuture<'a> {
        Box::pin(self.complete_impl(req))
    }
    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Stand-ins
// ------------------------------------------------------------

/// Fails every call; used when no provider is configured.
pub struct DisabledClient;

impl ChatClient for DisabledClient {
    fn complete<'a>(&'a self, _req: &'a ChatRequest) -> ChatFuture<'a> {
        Box::pin(async { Err(anyhow!("llm disabled")) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Canned, well-formed replies per call purpose for local runs without a model.
pub struct MockClient;

impl ChatClient for MockClient {
    fn complete<'a>(&'a self, req: &'a ChatRequest) -> ChatFuture<'a> {
        let out = match req.purpose {
            CallPurpose::Summary => "（模拟摘要）本文介绍了相关财政资金安排。".to_string(),
            CallPurpose::Draft => serde_json::json!({
                "header": {"title": "全省财政重点工作稳步推进", "lede": "各地加快资金拨付。", "lede_citations": [1]},
                "why_it_matters": "关系民生保障。",
                "why_citations": [1],
                "big_picture": "财政政策持续发力。",
                "big_picture_citations": [1],
                "focus_topic": "财政资金拨付",
                "visual_focus": "common_issue",
                "by_the_numbers": [],
                "recent_hotwords": []
            })
            .to_string(),
            CallPurpose::DuplicateCheck => r#"{"duplicate": false}"#.to_string(),
            CallPurpose::OneLiner => r#"{"items": []}"#.to_string(),
            CallPurpose::Cluster => r#"{"events": []}"#.to_string(),
        };
        Box::pin(async move { Ok(out) })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

type Responder = dyn Fn(&ChatRequest) -> Option<String> + Send + Sync;

/// Test double: answers from a closure, counts calls, and records every request.
/// A `None` from the closure is reported as a provider failure.
pub struct ScriptedClient {
    responder: Box<Responder>,
    calls: AtomicUsize,
    log: Mutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ChatRequest) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of recorded calls for one purpose.
    pub fn calls_for(&self, purpose: CallPurpose) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.purpose == purpose)
            .count()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        match self.log.lock() {
            Ok(g) => g.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }
}

impl ChatClient for ScriptedClient {
    fn complete<'a>(&'a self, req: &'a ChatRequest) -> ChatFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.log.lock() {
            Ok(mut g) => g.push(req.clone()),
            Err(p) => p.into_inner().push(req.clone()),
        }
        let out = (self.responder)(req);
        Box::pin(async move { out.ok_or_else(|| anyhow!("scripted failure")) })
    }
    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(purpose: CallPurpose, timeout: Duration) -> ChatRequest {
        ChatRequest {
            purpose,
            model: "m".into(),
            messages: vec![ChatMessage::system("s"), ChatMessage::user("u")],
            temperature: 0.0,
            timeout,
            json_mode: false,
        }
    }

    #[tokio::test]
    async fn blank_and_failed_completions_collapse_to_none() {
        let client = ScriptedClient::new(|r| match r.purpose {
            CallPurpose::Summary => Some("   ".into()),
            CallPurpose::Draft => None,
            _ => Some("ok".into()),
        });
        let t = Duration::from_secs(1);
        assert_eq!(call(&client, &req(CallPurpose::Summary, t)).await, None);
        assert_eq!(call(&client, &req(CallPurpose::Draft, t)).await, None);
        assert_eq!(
            call(&client, &req(CallPurpose::Cluster, t)).await.as_deref(),
            Some("ok")
        );
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.calls_for(CallPurpose::Draft), 1);
    }

    struct Slow;
    impl ChatClient for Slow {
        fn complete<'a>(&'a self, _req: &'a ChatRequest) -> ChatFuture<'a> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("late".to_string())
            })
        }
        fn provider_name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let out = call(&Slow, &req(CallPurpose::Summary, Duration::from_millis(20))).await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn disabled_client_always_fails() {
        let out = call(&DisabledClient, &req(CallPurpose::Draft, Duration::from_secs(1))).await;
        assert!(out.is_none());
    }

    #[serial_test::serial]
    #[test]
    fn test_mode_env_forces_mock() {
        std::env::set_var("LLM_TEST_MODE", "mock");
        let client = build_client_from_config(&LlmConfig::default()).unwrap();
        std::env::remove_var("LLM_TEST_MODE");
        assert_eq!(client.provider_name(), "mock");
    }
}
