// src/guardrails.rs
//! Deterministic post-processing checks. Nothing here calls the model: sensitive
//! phrases are masked in place, unsupported number rows are removed whole.

use std::collections::HashSet;

use metrics::counter;
use tracing::warn;

use crate::config::GuardrailConfig;
use crate::metrics::{ensure_metrics_described, GUARDRAIL_MASKED, GUARDRAIL_ROWS_DROPPED};
use crate::model::{FinalBriefing, NumberRow};
use crate::text::{extract_number_spans, extract_number_spans_loose, normalize_number};

/// Replace every configured phrase in the visible text fields. Returns the phrases that fired.
pub fn mask_sensitive(doc: &mut FinalBriefing, cfg: &GuardrailConfig) -> Vec<String> {
    ensure_metrics_described();
    let phrases: Vec<&str> = cfg
        .sensitive_phrases
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if phrases.is_empty() {
        return Vec::new();
    }

    let mut fired: Vec<String> = Vec::new();
    let mut replaced = 0usize;
    let mut mask = |field: &mut String| {
        for p in phrases.iter().copied() {
            let n = field.matches(p).count();
            if n > 0 {
                *field = field.replace(p, &cfg.mask_token);
                replaced += n;
                if !fired.iter().any(|f| f == p) {
                    fired.push(p.to_string());
                }
            }
        }
    };

    mask(&mut doc.header.title);
    mask(&mut doc.header.lede);
    mask(&mut doc.why_it_matters);
    mask(&mut doc.big_picture);
    for row in &mut doc.by_the_numbers {
        mask(&mut row.indicator);
        mask(&mut row.value);
        mask(&mut row.note);
    }
    for hw in &mut doc.recent_hotwords {
        mask(&mut hw.word);
    }

    if replaced > 0 {
        counter!(GUARDRAIL_MASKED).increment(replaced as u64);
        warn!(target: "guardrails", phrases = ?fired, replaced, "sensitive phrases masked");
    }
    fired
}

/// Normalized number spans found in the source material.
pub fn allowed_numbers(material: &str) -> HashSet<String> {
    extract_number_spans(material, usize::MAX)
        .iter()
        .map(|s| normalize_number(s))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Numbers in `row.value` that the material does not contain.
pub fn unsupported_numbers(row: &NumberRow, allowed: &HashSet<String>) -> Vec<String> {
    extract_number_spans_loose(&row.value)
        .iter()
        .map(|s| normalize_number(s))
        .filter(|n| !allowed.contains(n))
        .collect()
}

/// Drop every `by_the_numbers` row whose value cites a number absent from the material.
/// Returns how many rows were removed.
pub fn strip_unsupported_rows(doc: &mut FinalBriefing, material: &str) -> usize {
    ensure_metrics_described();
    let allowed = allowed_numbers(material);
    let before = doc.by_the_numbers.len();
    doc.by_the_numbers.retain(|row| {
        let bad = unsupported_numbers(row, &allowed);
        if bad.is_empty() {
            return true;
        }
        warn!(
            target: "guardrails",
            indicator = %row.indicator,
            value = %row.value,
            unsupported = ?bad,
            "number row dropped"
        );
        false
    });
    let dropped = before - doc.by_the_numbers.len();
    if dropped > 0 {
        counter!(GUARDRAIL_ROWS_DROPPED).increment(dropped as u64);
    }
    dropped
}
