//! # Briefing data model
//! Inputs (articles), intermediate stage outputs, and the final briefing document.
//!
//! LLM-produced structures deserialize leniently: citation arrays accept numbers or
//! numeric strings (invalid entries are skipped), and text fields accept any scalar.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Scraped document as read from the article store. Read-only for this pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    /// Persisted id; `None` for documents that never reached the store.
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "article_url")]
    pub url: String,
    #[serde(default, alias = "account_name")]
    pub account: String,
    pub published_at: DateTime<Utc>,
}

impl Article {
    /// Persisted id if it is a positive store key.
    pub fn persisted_id(&self) -> Option<i64> {
        self.id.filter(|id| *id > 0)
    }
}

/// One citable source inside a briefing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceEntry {
    pub id: u32,
    pub account: String,
    pub title: String,
    pub url: String,
    /// Local `YYYY-MM-DD` of the article's publication, empty if unknown.
    #[serde(default)]
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PerArticleSummary {
    pub source_id: u32,
    pub title: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum VisualFocus {
    #[default]
    CommonIssue,
    HighImpactEvent,
}

impl VisualFocus {
    fn parse_lenient(s: &str) -> Self {
        match s.trim() {
            "high_impact_event" => VisualFocus::HighImpactEvent,
            _ => VisualFocus::CommonIssue,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FocusType {
    QnaHeavy,
    TimelineHeavy,
    ChangeHeavy,
    ProcessHeavy,
    DataHeavy,
    General,
}

impl FocusType {
    pub fn as_str(self) -> &'static str {
        match self {
            FocusType::QnaHeavy => "qna_heavy",
            FocusType::TimelineHeavy => "timeline_heavy",
            FocusType::ChangeHeavy => "change_heavy",
            FocusType::ProcessHeavy => "process_heavy",
            FocusType::DataHeavy => "data_heavy",
            FocusType::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FocusStyle {
    DataSnapshot,
    ActionChain,
    WhatChanged,
    Timeline,
    QnaGaps,
}

impl FocusStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            FocusStyle::DataSnapshot => "data_snapshot",
            FocusStyle::ActionChain => "action_chain",
            FocusStyle::WhatChanged => "what_changed",
            FocusStyle::Timeline => "timeline",
            FocusStyle::QnaGaps => "qna_gaps",
        }
    }
}

/// Lead-sentence micro-variants, rotated day by day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LeadVariant {
    #[serde(rename = "v1_numbers_first")]
    NumbersFirst,
    #[serde(rename = "v2_time_first")]
    TimeFirst,
    #[serde(rename = "v3_actor_first")]
    ActorFirst,
    #[serde(rename = "v4_doc_first")]
    DocFirst,
    #[serde(rename = "v5_scope_first")]
    ScopeFirst,
    #[serde(rename = "v6_threshold_first")]
    ThresholdFirst,
    #[serde(rename = "v7_change_first")]
    ChangeFirst,
    #[serde(rename = "v8_process_first")]
    ProcessFirst,
    #[serde(rename = "v9_quote_first")]
    QuoteFirst,
    #[serde(rename = "v10_plain")]
    Plain,
}

impl LeadVariant {
    pub const ALL: [LeadVariant; 10] = [
        LeadVariant::NumbersFirst,
        LeadVariant::TimeFirst,
        LeadVariant::ActorFirst,
        LeadVariant::DocFirst,
        LeadVariant::ScopeFirst,
        LeadVariant::ThresholdFirst,
        LeadVariant::ChangeFirst,
        LeadVariant::ProcessFirst,
        LeadVariant::QuoteFirst,
        LeadVariant::Plain,
    ];

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|v| *v == self).unwrap_or(9)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Header {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub lede: String,
    #[serde(default, deserialize_with = "lenient_ids")]
    pub lede_citations: Vec<u32>,
}

/// A "by the numbers" table row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NumberRow {
    #[serde(default, deserialize_with = "lenient_string")]
    pub indicator: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub note: String,
    #[serde(default, deserialize_with = "lenient_ids")]
    pub citations: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Hotword {
    #[serde(default, deserialize_with = "lenient_string")]
    pub word: String,
    #[serde(default, deserialize_with = "lenient_ids")]
    pub source_ids: Vec<u32>,
}

/// Lede / why-it-matters / big-picture draft as returned by the drafting model.
/// Style fields are filled in locally after parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FocusDraft {
    #[serde(default)]
    pub header: Header,
    #[serde(default, deserialize_with = "lenient_string")]
    pub why_it_matters: String,
    #[serde(default, deserialize_with = "lenient_ids")]
    pub why_citations: Vec<u32>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub big_picture: String,
    #[serde(default, deserialize_with = "lenient_ids")]
    pub big_picture_citations: Vec<u32>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub focus_topic: String,
    #[serde(default, deserialize_with = "lenient_visual_focus")]
    pub visual_focus: VisualFocus,
    #[serde(default, deserialize_with = "lenient_rows")]
    pub by_the_numbers: Vec<NumberRow>,
    #[serde(default, deserialize_with = "lenient_hotwords")]
    pub recent_hotwords: Vec<Hotword>,
    #[serde(skip_deserializing)]
    pub focus_type: Option<FocusType>,
    #[serde(skip_deserializing)]
    pub focus_style: Option<FocusStyle>,
    #[serde(skip_deserializing)]
    pub lead_variant: Option<LeadVariant>,
}

/// Relevance scores assigned by the one-liner model, each in `[0, 3]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TagScores {
    #[serde(default)]
    pub finance: u8,
    #[serde(default)]
    pub minsheng: u8,
    #[serde(default)]
    pub tech: u8,
}

impl TagScores {
    pub fn clamped(finance: i64, minsheng: i64, tech: i64) -> Self {
        let c = |v: i64| v.clamp(0, 3) as u8;
        Self {
            finance: c(finance),
            minsheng: c(minsheng),
            tech: c(tech),
        }
    }

    pub fn sum(&self) -> u32 {
        self.finance as u32 + self.minsheng as u32 + self.tech as u32
    }
}

/// Persisted one-liner condensation. Unique per `(article_id, prompt_version)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OneLinerResult {
    pub article_id: i64,
    pub one_liner: String,
    pub tags: TagScores,
    pub keep: bool,
    pub model: String,
    pub prompt_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum HotspotCategory {
    Welfare,
    Fiscal,
    Consumption,
    Tech,
    #[default]
    Other,
}

impl HotspotCategory {
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "welfare" => HotspotCategory::Welfare,
            "fiscal" => HotspotCategory::Fiscal,
            "consumption" => HotspotCategory::Consumption,
            "tech" => HotspotCategory::Tech,
            _ => HotspotCategory::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HotspotEvent {
    pub event: String,
    pub hotness: u32,
    pub source_ids: Vec<u32>,
    pub coverage_docs: usize,
    pub coverage_accounts: usize,
    pub last_seen: String,
    pub why_hot: String,
    pub category: HotspotCategory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HotspotsMeta {
    pub window_days: u32,
    pub total_hotspots: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_end_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keyword {
    pub word: String,
    pub weight: u32,
    pub hotness: u32,
    pub citations: usize,
    pub source_ids: Vec<u32>,
    pub snippets: Vec<String>,
}

/// Constraint the drafting loop could not satisfy before running out of attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    FocusTopicDuplicate,
    FocusTooLocal,
}

/// The assembled briefing document for one target date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalBriefing {
    pub schema: String,
    pub target_date: NaiveDate,
    pub focus_topic: String,
    pub visual_focus: VisualFocus,
    pub header: Header,
    pub why_it_matters: String,
    pub why_citations: Vec<u32>,
    pub big_picture: String,
    pub big_picture_citations: Vec<u32>,
    pub by_the_numbers: Vec<NumberRow>,
    pub recent_hotwords: Vec<Hotword>,
    pub keywords: Vec<Keyword>,
    pub recent_hotspots: Vec<HotspotEvent>,
    pub recent_hotspots_meta: HotspotsMeta,
    pub article_summaries: Vec<PerArticleSummary>,
    pub focus_type: FocusType,
    pub focus_style: FocusStyle,
    pub lead_variant: LeadVariant,
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub quality_flags: Vec<QualityFlag>,
}

pub const BRIEFING_SCHEMA: &str = "smart_brevity_v1";

// ------------------------------------------------------------
// Lenient deserializers for model output
// ------------------------------------------------------------

/// Accept a positive integer or a numeric string as a citation id.
pub(crate) fn id_from_value(v: &Value) -> Option<u32> {
    let n = match v {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f > 0.0)
                .map(|f| f as u64)
        })?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    if n == 0 || n > u32::MAX as u64 {
        return None;
    }
    Some(n as u32)
}

pub(crate) fn ids_from_value(v: &Value) -> Vec<u32> {
    match v {
        Value::Array(items) => items.iter().filter_map(id_from_value).collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn string_from_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn lenient_ids<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u32>, D::Error> {
    let raw = Option::<Value>::deserialize(d)?;
    Ok(raw.as_ref().map(ids_from_value).unwrap_or_default())
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let raw = Option::<Value>::deserialize(d)?;
    Ok(raw.as_ref().map(string_from_value).unwrap_or_default())
}

fn lenient_visual_focus<'de, D: Deserializer<'de>>(d: D) -> Result<VisualFocus, D::Error> {
    let raw = Option::<Value>::deserialize(d)?;
    Ok(raw
        .as_ref()
        .map(|v| VisualFocus::parse_lenient(&string_from_value(v)))
        .unwrap_or_default())
}

fn lenient_list<T: serde::de::DeserializeOwned>(raw: Option<Value>) -> Vec<T> {
    match raw {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter(Value::is_object)
            .filter_map(|it| serde_json::from_value(it).ok())
            .collect(),
        _ => Vec::new(),
    }
}

fn lenient_rows<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<NumberRow>, D::Error> {
    Ok(lenient_list(Option::<Value>::deserialize(d)?))
}

fn lenient_hotwords<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Hotword>, D::Error> {
    Ok(lenient_list(Option::<Value>::deserialize(d)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn draft_parses_mixed_citation_types() {
        let v = json!({
            "focus_topic": "医保缴费",
            "visual_focus": "high_impact_event",
            "header": {"title": "全省医保缴费启动", "lede": "x", "lede_citations": [1, "2", "abc", 0, -3]},
            "why_citations": null,
            "big_picture_citations": ["4"],
            "by_the_numbers": [{"indicator": "资金", "value": 500, "citations": [1]}, "junk"]
        });
        let d: FocusDraft = serde_json::from_value(v).unwrap();
        assert_eq!(d.header.lede_citations, vec![1, 2]);
        assert!(d.why_citations.is_empty());
        assert_eq!(d.big_picture_citations, vec![4]);
        assert_eq!(d.visual_focus, VisualFocus::HighImpactEvent);
        assert_eq!(d.by_the_numbers.len(), 1);
        assert_eq!(d.by_the_numbers[0].value, "500");
    }

    #[test]
    fn unknown_visual_focus_defaults_to_common_issue() {
        let d: FocusDraft = serde_json::from_value(json!({"visual_focus": "whatever"})).unwrap();
        assert_eq!(d.visual_focus, VisualFocus::CommonIssue);
    }

    #[test]
    fn tag_scores_clamp_into_range() {
        let t = TagScores::clamped(7, -2, 2);
        assert_eq!((t.finance, t.minsheng, t.tech), (3, 0, 2));
        assert_eq!(t.sum(), 5);
    }

    #[test]
    fn lead_variant_serializes_with_catalogue_names() {
        let s = serde_json::to_string(&LeadVariant::Plain).unwrap();
        assert_eq!(s, "\"v10_plain\"");
        assert_eq!(LeadVariant::ALL[3].index(), 3);
    }
}
