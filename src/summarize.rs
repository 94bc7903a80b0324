// src/summarize.rs
//! One-sentence summary per finance source, with a text-heuristic fallback.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::warn;

use crate::config::BriefingConfig;
use crate::llm::{self, CallPurpose, ChatClient, ChatMessage, ChatRequest, ParsedReply};
use crate::model::{string_from_value, Article, PerArticleSummary};
use crate::pool::SourcePool;
use crate::prompts;
use crate::text::{clean_text, extract_key_snippets, truncate_chars};

const SUMMARY_TIMEOUT: Duration = Duration::from_secs(45);
const MAX_TITLE_CHARS: usize = 120;
const MAX_SUMMARY_CHARS: usize = 120;
const TITLE_FALLBACK_CHARS: usize = 80;

/// Summaries for every pool entry with a backing article, in pool order.
/// Calls run concurrently up to `summary_concurrency`.
pub async fn summarize_pool(
    client: &dyn ChatClient,
    model: &str,
    pool: &SourcePool<'_>,
    cfg: &BriefingConfig,
) -> Vec<PerArticleSummary> {
    let jobs: Vec<_> = pool
        .entries
        .iter()
        .filter_map(|e| pool.article(e.id).map(|a| (e.id, a)))
        .map(|(id, a)| summarize_one(client, model, id, a, cfg))
        .collect();

    stream::iter(jobs)
        .buffered(cfg.summary_concurrency.max(1))
        .collect()
        .await
}

async fn summarize_one(
    client: &dyn ChatClient,
    model: &str,
    source_id: u32,
    article: &Article,
    cfg: &BriefingConfig,
) -> PerArticleSummary {
    let title = article.title.trim();
    let cleaned = clean_text(&article.content);
    let clip = truncate_chars(&cleaned, cfg.per_article_chars);

    let req = ChatRequest {
        purpose: CallPurpose::Summary,
        model: model.to_string(),
        messages: vec![
            ChatMessage::system(prompts::summary_system(&cfg.briefing_name)),
            ChatMessage::user(prompts::summary_user(source_id, title, clip)),
        ],
        temperature: 0.1,
        timeout: SUMMARY_TIMEOUT,
        json_mode: true,
    };

    let mut summary = match llm::call(client, &req).await.map(|raw| llm::parse_reply::<Value>(&raw)) {
        Some(ParsedReply::Parsed(v)) => v.get("summary").map(string_from_value).unwrap_or_default(),
        Some(ParsedReply::Malformed(_)) => {
            warn!(target: "briefing", source_id, "summary reply was not json");
            String::new()
        }
        Some(ParsedReply::Empty) | None => String::new(),
    };

    if summary.trim().is_empty() {
        summary = fallback_summary(title, clip, &cfg.vocabulary.snippet_signals, cfg.max_snippets_per_article);
    }

    PerArticleSummary {
        source_id,
        title: truncate_chars(title, MAX_TITLE_CHARS).to_string(),
        summary: truncate_chars(summary.trim(), MAX_SUMMARY_CHARS).to_string(),
    }
}

/// First key snippet of the body, else the clipped title.
pub fn fallback_summary(title: &str, body: &str, signals: &[String], max_snippets: usize) -> String {
    extract_key_snippets(body, signals, max_snippets)
        .into_iter()
        .next()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| truncate_chars(title.trim(), TITLE_FALLBACK_CHARS).to_string())
}
