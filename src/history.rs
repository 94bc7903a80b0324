//! history.rs: in-memory log of generated briefings, feeding style rotation and
//! topic dedupe on later dates.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::model::{FinalBriefing, FocusStyle, LeadVariant, QualityFlag};
use crate::pipeline::RecentHistory;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryEntry {
    pub generated_at: DateTime<Utc>,
    pub target_date: NaiveDate,
    pub focus_topic: String,
    pub focus_style: FocusStyle,
    pub lead_variant: LeadVariant,
    // quick fingerprints for diagnostics
    pub sources: usize,
    pub hotspots: usize,
    pub quality_flags: Vec<QualityFlag>,
}

#[derive(Debug)]
pub struct BriefingHistory {
    inner: Mutex<Vec<HistoryEntry>>,
    cap: usize,
}

impl BriefingHistory {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::with_capacity(cap.min(10_000))),
            cap: cap.min(10_000).max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HistoryEntry>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Record a briefing. A later briefing for the same date replaces the earlier one.
    pub fn push(&self, doc: &FinalBriefing, generated_at: DateTime<Utc>) {
        let entry = HistoryEntry {
            generated_at,
            target_date: doc.target_date,
            focus_topic: doc.focus_topic.clone(),
            focus_style: doc.focus_style,
            lead_variant: doc.lead_variant,
            sources: doc.sources.len(),
            hotspots: doc.recent_hotspots.len(),
            quality_flags: doc.quality_flags.clone(),
        };

        let mut v = self.lock();
        v.retain(|e| e.target_date != entry.target_date);
        v.push(entry);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    pub fn snapshot_last_n(&self, n: usize) -> Vec<HistoryEntry> {
        let v = self.lock();
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }

    /// Briefings dated before `date`, newest date first, at most `days` of them.
    pub fn recent_before(&self, date: NaiveDate, days: usize) -> RecentHistory {
        let mut rows: Vec<HistoryEntry> = self
            .lock()
            .iter()
            .filter(|e| e.target_date < date)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.target_date.cmp(&a.target_date));
        rows.truncate(days);

        RecentHistory {
            focus_styles: rows.iter().map(|e| e.focus_style).collect(),
            lead_variants: rows.iter().map(|e| e.lead_variant).collect(),
            focus_topics: rows
                .iter()
                .map(|e| e.focus_topic.clone())
                .filter(|t| !t.trim().is_empty())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations::tests::empty_doc;

    fn doc(day: u32, topic: &str, style: FocusStyle) -> FinalBriefing {
        let mut d = empty_doc();
        d.target_date = NaiveDate::from_ymd_opt(2025, 6, day).unwrap();
        d.focus_topic = topic.into();
        d.focus_style = style;
        d
    }

    #[test]
    fn recent_is_newest_first_and_excludes_target_date() {
        let h = BriefingHistory::with_capacity(10);
        h.push(&doc(1, "一", FocusStyle::Timeline), Utc::now());
        h.push(&doc(3, "三", FocusStyle::QnaGaps), Utc::now());
        h.push(&doc(2, "二", FocusStyle::WhatChanged), Utc::now());
        h.push(&doc(4, "四", FocusStyle::DataSnapshot), Utc::now());

        let r = h.recent_before(NaiveDate::from_ymd_opt(2025, 6, 4).unwrap(), 2);
        assert_eq!(r.focus_topics, vec!["三", "二"]);
        assert_eq!(r.focus_styles, vec![FocusStyle::QnaGaps, FocusStyle::WhatChanged]);
    }

    #[test]
    fn same_date_replaces_and_cap_evicts_oldest() {
        let h = BriefingHistory::with_capacity(2);
        h.push(&doc(1, "一", FocusStyle::Timeline), Utc::now());
        h.push(&doc(1, "一改", FocusStyle::Timeline), Utc::now());
        assert_eq!(h.snapshot_last_n(10).len(), 1);
        h.push(&doc(2, "二", FocusStyle::Timeline), Utc::now());
        h.push(&doc(3, "三", FocusStyle::Timeline), Utc::now());
        let rows = h.snapshot_last_n(10);
        let topics: Vec<&str> = rows.iter().map(|e| e.focus_topic.as_str()).collect();
        assert_eq!(topics, vec!["二", "三"]);
    }
}
