// src/style.rs
//! Deterministic choice of focus type, narrative style, and lead micro-variant.

use chrono::NaiveDate;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::StyleSignals;
use crate::model::{FocusStyle, FocusType, LeadVariant, PerArticleSummary};
use crate::text::truncate_chars;

const SIGNAL_TEXT_CHARS: usize = 8_000;
const AVOID_RECENT_DAYS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Signals {
    pub has_number: bool,
    pub has_time_marker: bool,
    pub has_change_verb: bool,
    pub has_process_verb: bool,
    pub has_question: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleChoice {
    pub focus_type: FocusType,
    pub focus_style: FocusStyle,
    pub lead_variant: LeadVariant,
}

/// Compiled signal patterns. Invalid configured patterns never match.
pub struct StyleSelector {
    number: Option<Regex>,
    time_marker: Option<Regex>,
    change_verb: Option<Regex>,
    process_verb: Option<Regex>,
    question: Option<Regex>,
}

fn compile(name: &str, pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(target: "briefing", signal = name, error = %e, "invalid style signal pattern");
            None
        }
    }
}

impl StyleSelector {
    pub fn new(signals: &StyleSignals) -> Self {
        Self {
            number: compile("number", &signals.number),
            time_marker: compile("time_marker", &signals.time_marker),
            change_verb: compile("change_verb", &signals.change_verb),
            process_verb: compile("process_verb", &signals.process_verb),
            question: compile("question", &signals.question),
        }
    }

    pub fn signals(&self, summaries: &[PerArticleSummary]) -> Signals {
        let joined = summaries
            .iter()
            .map(|s| s.summary.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let text = truncate_chars(joined.trim(), SIGNAL_TEXT_CHARS);
        let hit = |re: &Option<Regex>| re.as_ref().is_some_and(|r| r.is_match(text));
        Signals {
            has_number: hit(&self.number),
            has_time_marker: hit(&self.time_marker),
            has_change_verb: hit(&self.change_verb),
            has_process_verb: hit(&self.process_verb),
            has_question: hit(&self.question),
        }
    }

    /// `recent_styles` and `recent_variants` are most-recent-first.
    pub fn choose(
        &self,
        date: NaiveDate,
        summaries: &[PerArticleSummary],
        recent_styles: &[FocusStyle],
        recent_variants: &[LeadVariant],
    ) -> StyleChoice {
        let signals = self.signals(summaries);
        let (focus_type, ranked) = rank_styles(signals);

        let avoid: Vec<FocusStyle> = recent_styles.iter().take(AVOID_RECENT_DAYS).copied().collect();
        let focus_style = ranked
            .iter()
            .copied()
            .find(|s| !avoid.contains(s))
            .unwrap_or(ranked[0]);

        let lead_variant = pick_lead_variant(date, focus_style, recent_variants.first().copied());
        debug!(
            target: "briefing",
            ?signals,
            focus_type = focus_type.as_str(),
            focus_style = focus_style.as_str(),
            ?lead_variant,
            "style chosen"
        );
        StyleChoice {
            focus_type,
            focus_style,
            lead_variant,
        }
    }
}

/// Signal combination to focus type plus five ranked style candidates.
pub fn rank_styles(s: Signals) -> (FocusType, [FocusStyle; 5]) {
    use FocusStyle::*;
    if s.has_question && s.has_process_verb {
        (FocusType::QnaHeavy, [QnaGaps, ActionChain, Timeline, DataSnapshot, WhatChanged])
    } else if s.has_time_marker && s.has_process_verb {
        (FocusType::TimelineHeavy, [Timeline, ActionChain, DataSnapshot, WhatChanged, QnaGaps])
    } else if s.has_change_verb {
        (FocusType::ChangeHeavy, [WhatChanged, DataSnapshot, Timeline, ActionChain, QnaGaps])
    } else if s.has_process_verb {
        (FocusType::ProcessHeavy, [ActionChain, Timeline, DataSnapshot, QnaGaps, WhatChanged])
    } else if s.has_number {
        (FocusType::DataHeavy, [DataSnapshot, Timeline, WhatChanged, ActionChain, QnaGaps])
    } else {
        (FocusType::General, [DataSnapshot, ActionChain, Timeline, WhatChanged, QnaGaps])
    }
}

/// Stable hash of `date|style` modulo 10, advanced by one when it repeats yesterday's.
pub fn pick_lead_variant(
    date: NaiveDate,
    style: FocusStyle,
    yesterday: Option<LeadVariant>,
) -> LeadVariant {
    let key = format!("{}|{}", date.format("%Y-%m-%d"), style.as_str());
    let digest = Sha256::digest(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let idx = (u64::from_be_bytes(head) % 10) as usize;

    let variant = LeadVariant::ALL[idx];
    if yesterday == Some(variant) {
        LeadVariant::ALL[(idx + 1) % 10]
    } else {
        variant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summaries(texts: &[&str]) -> Vec<PerArticleSummary> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| PerArticleSummary {
                source_id: i as u32 + 1,
                title: String::new(),
                summary: t.to_string(),
            })
            .collect()
    }

    fn selector() -> StyleSelector {
        StyleSelector::new(&StyleSignals::default())
    }

    #[test]
    fn signal_table_maps_to_focus_type() {
        let cases: [(&str, FocusType, FocusStyle); 6] = [
            ("如何申请补贴", FocusType::QnaHeavy, FocusStyle::QnaGaps),
            ("即日起开始申报", FocusType::TimelineHeavy, FocusStyle::Timeline),
            ("标准上调", FocusType::ChangeHeavy, FocusStyle::WhatChanged),
            ("启动资金发放", FocusType::ProcessHeavy, FocusStyle::ActionChain),
            ("共计3项", FocusType::DataHeavy, FocusStyle::DataSnapshot),
            ("会议召开", FocusType::General, FocusStyle::DataSnapshot),
        ];
        let sel = selector();
        let d = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        for (text, ft, fs) in cases {
            let c = sel.choose(d, &summaries(&[text]), &[], &[]);
            assert_eq!((c.focus_type, c.focus_style), (ft, fs), "{text}");
        }
    }

    #[test]
    fn recent_two_styles_are_avoided() {
        let sel = selector();
        let d = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let s = summaries(&["标准上调"]);
        let c = sel.choose(
            d,
            &s,
            &[FocusStyle::WhatChanged, FocusStyle::DataSnapshot, FocusStyle::Timeline],
            &[],
        );
        // third day back is not avoided
        assert_eq!(c.focus_style, FocusStyle::Timeline);
    }

    #[test]
    fn style_rotation_over_consecutive_days_never_repeats_last_two() {
        let sel = selector();
        let s = summaries(&["标准上调"]);
        let mut history: Vec<FocusStyle> = Vec::new();
        for day in 1..=9 {
            let d = NaiveDate::from_ymd_opt(2025, 6, day).unwrap();
            let c = sel.choose(d, &s, &history, &[]);
            assert!(!history.iter().take(2).any(|h| *h == c.focus_style), "day {day}");
            history.insert(0, c.focus_style);
        }
    }

    #[test]
    fn lead_variant_is_stable_and_skips_yesterday() {
        let d = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let a = pick_lead_variant(d, FocusStyle::Timeline, None);
        assert_eq!(a, pick_lead_variant(d, FocusStyle::Timeline, None));
        let b = pick_lead_variant(d, FocusStyle::Timeline, Some(a));
        assert_eq!(b.index(), (a.index() + 1) % 10);
    }

    #[test]
    fn invalid_pattern_disables_only_that_signal() {
        let mut sig = StyleSignals::default();
        sig.change_verb = "(".into();
        let sel = StyleSelector::new(&sig);
        let s = sel.signals(&summaries(&["标准上调，共3项"]));
        assert!(!s.has_change_verb);
        assert!(s.has_number);
    }
}
