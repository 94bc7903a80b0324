// src/hotspots.rs
//! Recent hotspots: tag-gated clustering of cached one-liners into named events.
//! The model only groups and names; coverage and hotness are computed here.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::BriefingConfig;
use crate::llm::{self, CallPurpose, ChatClient, ChatMessage, ChatRequest, ParsedReply};
use crate::model::{ids_from_value, string_from_value, Article, HotspotCategory, HotspotEvent, TagScores};
use crate::oneliner::OneLinerService;
use crate::pool::{local_date, SourcePool};
use crate::prompts;
use crate::text::normalize_label;

const CLUSTER_TIMEOUT: Duration = Duration::from_secs(80);
const MIN_CLUSTER_ITEMS: usize = 3;
const MAX_EVENT_CHARS: usize = 12;
const MAX_WHY_CHARS: usize = 12;
const MAX_EVENT_SOURCES: usize = 6;
const POLICY_MARKER_BONUS: f64 = 1.2;

/// One clustering input row.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterItem {
    pub source_id: u32,
    pub one_liner: String,
    pub tags: TagScores,
    pub account: String,
    pub title: String,
    #[serde(skip)]
    pub published_at: DateTime<Utc>,
}

/// Event as named by the model, after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterEvent {
    pub event: String,
    pub source_ids: Vec<u32>,
    pub why_hot: String,
    pub category: HotspotCategory,
}

pub struct HotspotExtractor<'a> {
    pub client: &'a dyn ChatClient,
    pub model: &'a str,
    pub oneliners: &'a OneLinerService,
    pub cfg: &'a BriefingConfig,
}

impl HotspotExtractor<'_> {
    /// Hotspots over the pool's articles published within the window ending at `end_utc`,
    /// sorted by hotness and capped at `top_k`. Any failure yields an empty list.
    pub async fn extract(&self, pool: &SourcePool<'_>, end_utc: DateTime<Utc>) -> Vec<HotspotEvent> {
        let h = &self.cfg.hotspots;
        let start = end_utc - chrono::Duration::days(i64::from(h.window_days));

        let windowed: Vec<(u32, &Article)> = pool
            .entries
            .iter()
            .filter_map(|e| pool.article(e.id).map(|a| (e.id, a)))
            .filter(|(_, a)| a.persisted_id().is_some())
            .filter(|(_, a)| a.published_at >= start && a.published_at <= end_utc)
            .collect();
        if windowed.is_empty() {
            return Vec::new();
        }

        let articles: Vec<&Article> = windowed.iter().map(|(_, a)| *a).collect();
        let oneliners = self.oneliners.get_or_compute(&articles).await;

        let mut items: Vec<ClusterItem> = windowed
            .iter()
            .filter_map(|(sid, a)| {
                let ol = a.persisted_id().and_then(|id| oneliners.get(&id))?;
                let entry = pool.entry(*sid)?;
                (!ol.one_liner.trim().is_empty() && ol.tags.sum() >= h.tag_sum_threshold).then(|| {
                    ClusterItem {
                        source_id: *sid,
                        one_liner: ol.one_liner.trim().to_string(),
                        tags: ol.tags,
                        account: entry.account.clone(),
                        title: entry.title.clone(),
                        published_at: a.published_at,
                    }
                })
            })
            .collect();

        if items.len() < MIN_CLUSTER_ITEMS {
            debug!(target: "hotspots", qualified = items.len(), "too few tagged articles for hotspots");
            return Vec::new();
        }
        if items.len() > h.cluster_max_items {
            rank_for_truncation(&mut items, end_utc, &self.cfg.vocabulary.policy_markers);
            items.truncate(h.cluster_max_items);
        }

        let target_n = h.top_k.clamp(3, 8);
        let events = self.cluster(&items, target_n).await;
        let offset = self.cfg.local_offset();

        let mut out: Vec<HotspotEvent> = events
            .into_iter()
            .map(|ev| score_event(ev, pool, offset))
            .collect();
        out.sort_by(|a, b| b.hotness.cmp(&a.hotness));
        out.truncate(h.top_k);
        info!(target: "hotspots", items = items.len(), hotspots = out.len(), "recent hotspots extracted");
        out
    }

    async fn cluster(&self, items: &[ClusterItem], target_n: usize) -> Vec<ClusterEvent> {
        let req = ChatRequest {
            purpose: CallPurpose::Cluster,
            model: self.model.to_string(),
            messages: vec![
                ChatMessage::system(prompts::cluster_system()),
                ChatMessage::user(json!({"target_n": target_n, "items": items}).to_string()),
            ],
            temperature: 0.2,
            timeout: CLUSTER_TIMEOUT,
            json_mode: true,
        };
        let valid: HashSet<u32> = items.iter().map(|i| i.source_id).collect();
        match llm::call(self.client, &req).await.map(|raw| llm::parse_reply::<Value>(&raw)) {
            Some(ParsedReply::Parsed(v)) => parse_cluster_events(&v, &valid, target_n),
            Some(ParsedReply::Malformed(_)) => {
                warn!(target: "hotspots", "cluster reply was not json");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}

/// `tag_sum*10 + recency bonus + policy-marker bonus`, highest first.
pub fn rank_for_truncation(items: &mut [ClusterItem], end_utc: DateTime<Utc>, policy_markers: &[String]) {
    let score = |it: &ClusterItem| -> f64 {
        let days = (end_utc - it.published_at).num_seconds().div_euclid(86_400);
        let recency = match days {
            d if d <= 0 => 3.0,
            1 => 2.0,
            2 => 1.0,
            _ => 0.2,
        };
        let marker = if policy_markers.iter().any(|m| !m.is_empty() && it.title.contains(m.as_str())) {
            POLICY_MARKER_BONUS
        } else {
            0.0
        };
        f64::from(it.tags.sum()) * 10.0 + recency + marker
    };
    items.sort_by(|a, b| score(b).partial_cmp(&score(a)).unwrap_or(Ordering::Equal));
}

/// Validate model events: names normalized and unique, at least two source ids from the
/// input, ids deduplicated and capped, stop after `target_n` events.
pub fn parse_cluster_events(v: &Value, valid: &HashSet<u32>, target_n: usize) -> Vec<ClusterEvent> {
    let raw = match v {
        Value::Array(a) => a.as_slice(),
        other => other.get("events").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]),
    };

    let mut out = Vec::new();
    let mut seen_names = HashSet::new();
    for it in raw.iter().filter(|it| it.is_object()) {
        let name = normalize_label(&it.get("event").map(string_from_value).unwrap_or_default(), MAX_EVENT_CHARS);
        if name.chars().count() < 2 || seen_names.contains(&name) {
            continue;
        }
        let mut ids: Vec<u32> = Vec::new();
        for id in it.get("source_ids").map(ids_from_value).unwrap_or_default() {
            if valid.contains(&id) && !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.len() < 2 {
            continue;
        }
        ids.truncate(MAX_EVENT_SOURCES);

        let why_hot = normalize_label(&it.get("why_hot").map(string_from_value).unwrap_or_default(), MAX_WHY_CHARS);
        let category = HotspotCategory::parse_lenient(&it.get("category").map(string_from_value).unwrap_or_default());
        seen_names.insert(name.clone());
        out.push(ClusterEvent {
            event: name,
            source_ids: ids,
            why_hot,
            category,
        });
        if out.len() >= target_n {
            break;
        }
    }
    out
}

/// `min(100, 20 + docs*18 + accounts*10)`; `last_seen` is the local date of the newest cited article.
pub fn hotness(docs: usize, accounts: usize) -> u32 {
    (20 + docs * 18 + accounts * 10).min(100) as u32
}

fn score_event(ev: ClusterEvent, pool: &SourcePool<'_>, offset: chrono::FixedOffset) -> HotspotEvent {
    let docs = ev.source_ids.len();
    let accounts: HashSet<&str> = ev
        .source_ids
        .iter()
        .filter_map(|id| pool.entry(*id))
        .map(|e| e.account.trim())
        .filter(|a| !a.is_empty())
        .collect();
    let last_seen = ev
        .source_ids
        .iter()
        .filter_map(|id| pool.article(*id))
        .map(|a| a.published_at)
        .max()
        .map(|dt| local_date(&dt, offset))
        .unwrap_or_default();

    HotspotEvent {
        hotness: hotness(docs, accounts.len()),
        coverage_docs: docs,
        coverage_accounts: accounts.len(),
        last_seen,
        event: ev.event,
        source_ids: ev.source_ids,
        why_hot: ev.why_hot,
        category: ev.category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn hotness_formula_caps_at_100() {
        assert_eq!(hotness(2, 1), 66);
        assert_eq!(hotness(2, 0), 56);
        assert_eq!(hotness(6, 6), 100);
    }

    #[test]
    fn cluster_events_are_validated() {
        let valid: HashSet<u32> = [1, 2, 3, 4].into_iter().collect();
        let v = json!({"events": [
            {"event": "发放 育儿补贴。", "source_ids": [1, "2", 2, 99], "why_hot": "多地 同步", "category": "WELFARE"},
            {"event": "发放育儿补贴", "source_ids": [3, 4], "category": "fiscal"},
            {"event": "单", "source_ids": [1, 2]},
            {"event": "专项债发行", "source_ids": [1, 99]},
            {"event": "以旧换新补贴", "source_ids": [3, 4], "category": "misc"},
            {"event": "研发费用加计扣除", "source_ids": [1, 3]}
        ]});
        let out = parse_cluster_events(&v, &valid, 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].event, "发放育儿补贴");
        assert_eq!(out[0].source_ids, vec![1, 2]);
        assert_eq!(out[0].why_hot, "多地同步");
        assert_eq!(out[0].category, HotspotCategory::Welfare);
        assert_eq!(out[1].event, "以旧换新补贴");
        assert_eq!(out[1].category, HotspotCategory::Other);
    }

    fn item(id: u32, tags: u8, hours_ago: i64, title: &str) -> ClusterItem {
        let end = Utc.with_ymd_and_hms(2025, 6, 5, 12, 0, 0).unwrap();
        ClusterItem {
            source_id: id,
            one_liner: "x".into(),
            tags: TagScores::clamped(tags as i64, 0, 0),
            account: String::new(),
            title: title.into(),
            published_at: end - chrono::Duration::hours(hours_ago),
        }
    }

    #[test]
    fn truncation_rank_prefers_tags_then_recency_then_markers() {
        let end = Utc.with_ymd_and_hms(2025, 6, 5, 12, 0, 0).unwrap();
        let mut items = vec![
            item(1, 2, 60, "通知"),
            item(2, 2, 1, "通知"),
            item(3, 3, 80, "通知"),
            item(4, 2, 60, "发放消费券"),
        ];
        rank_for_truncation(&mut items, end, &crate::config::Vocabulary::default().policy_markers);
        let ids: Vec<u32> = items.iter().map(|i| i.source_id).collect();
        assert_eq!(ids, vec![3, 2, 4, 1]);
    }
}
