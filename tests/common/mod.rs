// tests/common/mod.rs
//
// Shared fixtures: articles, scripted model replies, and a generator wired to an
// in-memory one-liner store and a fixed clock.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};

use daily_briefing::clock::FixedClock;
use daily_briefing::config::{BriefingConfig, LlmConfig};
use daily_briefing::llm::{ChatRequest, ScriptedClient};
use daily_briefing::oneliner::{DynOneLinerStore, MemoryOneLinerStore};
use daily_briefing::{Article, BriefingGenerator, BriefingRequest};

pub fn window_end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 5, 12, 0, 0).unwrap()
}

pub fn target_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 5).unwrap()
}

pub fn article(id: i64, account: &str, title: &str, content: &str, hours_ago: i64) -> Article {
    Article {
        id: Some(id),
        title: title.into(),
        content: content.into(),
        url: format!("https://mp.example.com/s/{id}"),
        account: account.into(),
        published_at: window_end() - chrono::Duration::hours(hours_ago),
    }
}

/// Five flood-relief subsidy articles across Hangzhou, Ningbo and Wenzhou. Ids 1..=5
/// keep input order because every article scores the same keyword hits.
pub fn flood_articles() -> Vec<Article> {
    let body = |city: &str| {
        format!("{city}财政局下达防汛救灾专项资金 500万元，补助资金直达受灾群众，补贴标准同步公布。")
    };
    vec![
        article(1, "杭州财政", "杭州发放防汛补助", &body("杭州"), 2),
        article(2, "杭州日报", "杭州追加救灾补助", &body("杭州"), 3),
        article(3, "宁波发布", "宁波防汛补助到位", &body("宁波"), 4),
        article(4, "温州财政", "温州启动救灾补助", &body("温州"), 5),
        article(5, "宁波日报", "宁波补贴直达受灾户", &body("宁波"), 6),
    ]
}

pub fn request(finance: Vec<Article>, all: Vec<Article>) -> BriefingRequest {
    BriefingRequest {
        target_date: target_date(),
        finance_articles: finance,
        all_articles: all,
        window_end_utc: Some(window_end()),
    }
}

pub fn generator(client: Arc<ScriptedClient>, store: DynOneLinerStore) -> BriefingGenerator {
    generator_with(client, store, BriefingConfig::default())
}

pub fn generator_with(
    client: Arc<ScriptedClient>,
    store: DynOneLinerStore,
    cfg: BriefingConfig,
) -> BriefingGenerator {
    BriefingGenerator::new(
        client,
        store,
        Arc::new(FixedClock(window_end())),
        cfg,
        &LlmConfig::default(),
    )
}

pub fn memory_store() -> Arc<MemoryOneLinerStore> {
    Arc::new(MemoryOneLinerStore::new())
}

pub fn summary_reply() -> Option<String> {
    Some(json!({"summary": "各地下达防汛补助资金"}).to_string())
}

/// A well-formed draft reply. `rows` are (indicator, value) pairs citing source 1.
pub fn draft_reply(title: &str, topic: &str, lede_citations: &[u32], rows: &[(&str, &str)]) -> Option<String> {
    let rows: Vec<Value> = rows
        .iter()
        .map(|(indicator, value)| json!({"indicator": indicator, "value": value, "note": "", "citations": [1]}))
        .collect();
    Some(
        json!({
            "header": {"title": title, "lede": "多地防汛补助资金到位。", "lede_citations": lede_citations},
            "why_it_matters": "为何重要：资金直达受灾群众。",
            "why_citations": [],
            "big_picture": "汛期财政保障持续加力。",
            "big_picture_citations": [],
            "focus_topic": topic,
            "visual_focus": "common_issue",
            "by_the_numbers": rows,
        })
        .to_string(),
    )
}

/// Ids found under `items[].<key>` of the request's JSON user message.
pub fn request_ids(req: &ChatRequest, key: &str) -> Vec<i64> {
    serde_json::from_str::<Value>(&req.user_text())
        .ok()
        .and_then(|v| v.get("items").and_then(Value::as_array).cloned())
        .unwrap_or_default()
        .iter()
        .filter_map(|it| it.get(key).and_then(Value::as_i64))
        .collect()
}

/// One-liner reply tagging every requested article with `finance(article_id)`.
pub fn oneliner_reply(req: &ChatRequest, finance: impl Fn(i64) -> i64) -> Option<String> {
    let items: Vec<Value> = request_ids(req, "article_id")
        .into_iter()
        .map(|id| {
            json!({
                "article_id": id,
                "one_liner": format!("发放防汛补助{id}"),
                "tags": {"finance": finance(id), "minsheng": 0, "tech": 0}
            })
        })
        .collect();
    Some(json!({ "items": items }).to_string())
}
