// src/focus.rs
//! Focus drafting loop: one draft call, then bounded retries while the focus topic
//! repeats a recent one or the framing is too local.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::NaiveDate;
use metrics::counter;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::{BriefingConfig, Vocabulary};
use crate::llm::{self, CallPurpose, ChatClient, ChatMessage, ChatRequest, ParsedReply};
use crate::metrics::FOCUS_RETRIES;
use crate::model::{FocusDraft, Header, PerArticleSummary, QualityFlag, VisualFocus};
use crate::pool::SourcePool;
use crate::prompts;
use crate::style::StyleChoice;
use crate::text::{strip_focus_markers, truncate_chars};

const DRAFT_TIMEOUT: Duration = Duration::from_secs(120);
const DUPLICATE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_FOCUS_TOPIC_CHARS: usize = 12;
const MINIMAL_LEDE_CHARS: usize = 200;
const MAX_HISTORY_TOPICS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftState {
    Drafting,
    RetryDuplicate,
    RetryTooLocal,
    Done,
    Exhausted,
}

/// Models and knobs shared by the drafting calls.
pub struct FocusContext<'c> {
    pub client: &'c dyn ChatClient,
    pub draft_model: &'c str,
    pub check_model: &'c str,
    pub cfg: &'c BriefingConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DraftOutcome {
    pub draft: FocusDraft,
    pub attempts: u32,
    /// Constraints the accepted draft still violates.
    pub flags: Vec<QualityFlag>,
}

/// Run the drafting state machine. `None` only when the first call yields nothing usable.
pub async fn draft_focus(
    ctx: &FocusContext<'_>,
    date: NaiveDate,
    summaries: &[PerArticleSummary],
    style: StyleChoice,
    recent_topics: &[String],
    pool: &SourcePool<'_>,
) -> Option<DraftOutcome> {
    let recent: Vec<String> = recent_topics
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    let max_attempts = ctx.cfg.max_focus_attempts.max(1);
    let system = prompts::draft_system(&ctx.cfg.briefing_name, date);

    let mut state = DraftState::Drafting;
    let mut attempts = 0u32;
    let mut extra = String::new();
    let mut duplicate_retries = 0u32;
    let mut best: Option<FocusDraft> = None;
    let mut violation: Option<QualityFlag> = None;

    loop {
        match state {
            DraftState::Drafting | DraftState::RetryDuplicate | DraftState::RetryTooLocal => {
                if attempts >= max_attempts {
                    state = DraftState::Exhausted;
                    continue;
                }
                match state {
                    DraftState::RetryDuplicate => {
                        extra.push_str(if duplicate_retries == 0 {
                            prompts::RETRY_DUPLICATE_FIRST
                        } else {
                            prompts::RETRY_DUPLICATE_AGAIN
                        });
                        duplicate_retries += 1;
                        counter!(FOCUS_RETRIES, "reason" => "duplicate").increment(1);
                    }
                    DraftState::RetryTooLocal => {
                        if !extra.contains(prompts::RETRY_TOO_LOCAL) {
                            extra.push_str(prompts::RETRY_TOO_LOCAL);
                        }
                        counter!(FOCUS_RETRIES, "reason" => "too_local").increment(1);
                    }
                    _ => {}
                }
                attempts += 1;

                let user = prompts::draft_user(
                    &ctx.cfg.briefing_name,
                    summaries,
                    style.focus_type,
                    style.focus_style,
                    style.lead_variant,
                    &recent,
                    &extra,
                );
                let req = ChatRequest {
                    purpose: CallPurpose::Draft,
                    model: ctx.draft_model.to_string(),
                    messages: vec![ChatMessage::system(system.clone()), ChatMessage::user(user)],
                    temperature: 0.2,
                    timeout: DRAFT_TIMEOUT,
                    json_mode: true,
                };

                let reply = llm::call(ctx.client, &req)
                    .await
                    .map(|raw| llm::parse_reply::<FocusDraft>(&raw));
                state = match reply {
                    None | Some(ParsedReply::Empty) => {
                        if best.is_none() {
                            warn!(target: "briefing", attempt = attempts, "first draft call produced nothing");
                            return None;
                        }
                        DraftState::Exhausted
                    }
                    Some(ParsedReply::Malformed(raw)) => {
                        if best.is_none() {
                            warn!(target: "briefing", "draft reply was not json, using minimal draft");
                            best = Some(minimal_draft(&raw, date, &ctx.cfg.briefing_name));
                            violation = None;
                            DraftState::Done
                        } else {
                            DraftState::Exhausted
                        }
                    }
                    Some(ParsedReply::Parsed(draft)) => {
                        let next = assess(ctx, &draft, &recent, pool).await;
                        violation = match next {
                            DraftState::RetryDuplicate => Some(QualityFlag::FocusTopicDuplicate),
                            DraftState::RetryTooLocal => Some(QualityFlag::FocusTooLocal),
                            _ => None,
                        };
                        best = Some(draft);
                        next
                    }
                };
            }
            DraftState::Done => {
                let draft = best?;
                info!(target: "briefing", attempts, "focus draft accepted");
                return Some(DraftOutcome {
                    draft,
                    attempts,
                    flags: Vec::new(),
                });
            }
            DraftState::Exhausted => {
                let draft = best?;
                let flags: Vec<QualityFlag> = violation.into_iter().collect();
                warn!(target: "briefing", attempts, ?flags, "focus drafting exhausted, keeping best effort");
                return Some(DraftOutcome {
                    draft,
                    attempts,
                    flags,
                });
            }
        }
    }
}

/// Next state for a parsed draft.
async fn assess(
    ctx: &FocusContext<'_>,
    draft: &FocusDraft,
    recent: &[String],
    pool: &SourcePool<'_>,
) -> DraftState {
    let topic = draft.focus_topic.trim();
    if topic.is_empty() {
        return DraftState::Drafting;
    }
    if is_semantic_duplicate(ctx, topic, recent).await {
        info!(target: "briefing", topic, "focus topic repeats a recent one");
        return DraftState::RetryDuplicate;
    }
    if is_too_local(draft, pool, &ctx.cfg.vocabulary) {
        info!(target: "briefing", title = %draft.header.title, "focus framing too local");
        return DraftState::RetryTooLocal;
    }
    DraftState::Done
}

/// Exact match short-circuits; otherwise ask the cheap model. Any failure means "not a duplicate".
pub async fn is_semantic_duplicate(ctx: &FocusContext<'_>, topic: &str, recent: &[String]) -> bool {
    let t = topic.trim();
    if t.is_empty() || recent.is_empty() {
        return false;
    }
    if recent.iter().any(|r| r == t) {
        return true;
    }

    let history: Vec<&String> = recent.iter().take(MAX_HISTORY_TOPICS).collect();
    let req = ChatRequest {
        purpose: CallPurpose::DuplicateCheck,
        model: ctx.check_model.to_string(),
        messages: vec![
            ChatMessage::system(prompts::duplicate_system()),
            ChatMessage::user(json!({"candidate": t, "history": history}).to_string()),
        ],
        temperature: 0.0,
        timeout: DUPLICATE_TIMEOUT,
        json_mode: true,
    };
    match llm::call(ctx.client, &req).await.map(|raw| llm::parse_reply::<Value>(&raw)) {
        Some(ParsedReply::Parsed(v)) => v.get("duplicate") == Some(&Value::Bool(true)),
        _ => false,
    }
}

/// Headline anchored below city level, or a common issue whose citations do not span
/// at least two cities, unless the headline carries province-wide framing.
pub fn is_too_local(draft: &FocusDraft, pool: &SourcePool<'_>, vocab: &Vocabulary) -> bool {
    let title = draft.header.title.trim();
    let contains_any = |text: &str, words: &[String]| words.iter().any(|w| !w.is_empty() && text.contains(w.as_str()));

    let has_local = !title.is_empty() && contains_any(title, &vocab.local_markers);
    let broad = contains_any(title, &vocab.broad_markers);
    let has_city = contains_any(title, &vocab.cities);

    if has_local && !broad {
        return true;
    }

    match draft.visual_focus {
        VisualFocus::CommonIssue => {
            let cited: BTreeSet<u32> = draft
                .header
                .lede_citations
                .iter()
                .chain(&draft.why_citations)
                .chain(&draft.big_picture_citations)
                .copied()
                .collect();
            let cities: BTreeSet<&str> = cited
                .iter()
                .filter_map(|id| pool.entry(*id))
                .flat_map(|s| {
                    let blob = format!("{} {}", s.account, s.title);
                    vocab
                        .cities
                        .iter()
                        .filter(move |c| !c.is_empty() && blob.contains(c.as_str()))
                        .map(String::as_str)
                })
                .collect();
            cities.len() < 2 && !broad
        }
        VisualFocus::HighImpactEvent => has_local && !(broad || has_city),
    }
}

/// Draft built from a reply that was not JSON: the raw text becomes the lede.
pub fn minimal_draft(raw: &str, date: NaiveDate, briefing_name: &str) -> FocusDraft {
    FocusDraft {
        header: Header {
            title: default_title(briefing_name, date),
            date: date.format("%Y-%m-%d").to_string(),
            lede: truncate_chars(raw.trim(), MINIMAL_LEDE_CHARS).to_string(),
            lede_citations: Vec::new(),
        },
        why_it_matters: String::new(),
        why_citations: Vec::new(),
        big_picture: String::new(),
        big_picture_citations: Vec::new(),
        focus_topic: String::new(),
        visual_focus: VisualFocus::CommonIssue,
        by_the_numbers: Vec::new(),
        recent_hotwords: Vec::new(),
        focus_type: None,
        focus_style: None,
        lead_variant: None,
    }
}

fn default_title(briefing_name: &str, date: NaiveDate) -> String {
    format!("{briefing_name}（{}）", date.format("%Y-%m-%d"))
}

/// Fill defaults, pin the date, strip legacy section markers, and stamp the style.
pub fn finalize_draft(
    mut draft: FocusDraft,
    date: NaiveDate,
    briefing_name: &str,
    style: StyleChoice,
) -> FocusDraft {
    if draft.header.title.trim().is_empty() {
        draft.header.title = default_title(briefing_name, date);
    }
    draft.header.date = date.format("%Y-%m-%d").to_string();
    draft.header.lede = strip_focus_markers(&draft.header.lede);
    draft.why_it_matters = strip_focus_markers(&draft.why_it_matters);
    draft.big_picture = strip_focus_markers(&draft.big_picture);

    let topic = if draft.focus_topic.trim().is_empty() {
        draft.header.title.trim().to_string()
    } else {
        draft.focus_topic.trim().to_string()
    };
    draft.focus_topic = truncate_chars(&topic, MAX_FOCUS_TOPIC_CHARS).to_string();

    draft.focus_type = Some(style.focus_type);
    draft.focus_style = Some(style.focus_style);
    draft.lead_variant = Some(style.lead_variant);
    draft
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FocusStyle, FocusType, LeadVariant, SourceEntry};

    fn pool_with(entries: &[(u32, &str, &str)]) -> SourcePool<'static> {
        SourcePool {
            entries: entries
                .iter()
                .map(|(id, account, title)| SourceEntry {
                    id: *id,
                    account: account.to_string(),
                    title: title.to_string(),
                    url: format!("u{id}"),
                    date: String::new(),
                })
                .collect(),
            articles: Default::default(),
        }
    }

    fn draft(title: &str, vf: VisualFocus, cites: &[u32]) -> FocusDraft {
        let mut d = minimal_draft("", NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), "简报");
        d.header.title = title.into();
        d.visual_focus = vf;
        d.header.lede_citations = cites.to_vec();
        d
    }

    #[test]
    fn too_local_table() {
        let vocab = Vocabulary::default();
        let pool = pool_with(&[
            (1, "杭州财政", "杭州发放补助"),
            (2, "宁波发布", "宁波救灾资金"),
            (3, "杭州日报", "杭州再拨款"),
        ]);
        let cases = [
            ("文成县发放补贴", VisualFocus::HighImpactEvent, vec![1], true),
            ("全省县级财政补助到位", VisualFocus::HighImpactEvent, vec![1], false),
            ("杭州高新区发布新政", VisualFocus::HighImpactEvent, vec![1], true),
            ("杭州发布救灾新政", VisualFocus::HighImpactEvent, vec![1], false),
            ("多地发放防汛补助", VisualFocus::CommonIssue, vec![1, 3], true),
            ("多地发放防汛补助", VisualFocus::CommonIssue, vec![1, 2], false),
            ("浙江防汛补助发放", VisualFocus::CommonIssue, vec![1], false),
            ("多地发放防汛补助", VisualFocus::CommonIssue, vec![9], true),
        ];
        for (title, vf, cites, expected) in cases {
            assert_eq!(is_too_local(&draft(title, vf, &cites), &pool, &vocab), expected, "{title} {cites:?}");
        }
    }

    #[test]
    fn finalize_fills_defaults_and_strips_markers() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let mut d = draft("", VisualFocus::CommonIssue, &[]);
        d.header.date = "1999-01-01".into();
        d.why_it_matters = "为何重要：资金到位".into();
        d.big_picture = "【大局】保障民生".into();
        let style = StyleChoice {
            focus_type: FocusType::General,
            focus_style: FocusStyle::Timeline,
            lead_variant: LeadVariant::Plain,
        };
        let out = finalize_draft(d, date, "浙江财政信息摘要", style);
        assert_eq!(out.header.title, "浙江财政信息摘要（2025-06-01）");
        assert_eq!(out.header.date, "2025-06-01");
        assert_eq!(out.why_it_matters, "资金到位");
        assert_eq!(out.big_picture, "保障民生");
        assert_eq!(out.focus_topic.chars().count(), 12);
        assert_eq!(out.focus_style, Some(FocusStyle::Timeline));
    }

    #[test]
    fn minimal_draft_clips_raw_reply() {
        let raw = "字".repeat(300);
        let d = minimal_draft(&raw, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), "简报");
        assert_eq!(d.header.lede.chars().count(), 200);
        assert!(d.header.lede_citations.is_empty());
    }
}
