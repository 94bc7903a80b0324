// src/citations.rs
//! Global citation renumbering.
//!
//! One left-to-right pass over a fixed field order assigns new ids 1..N by first
//! appearance. Ids without a source entry are dropped from the list that holds them,
//! and `sources` is rebuilt from the referenced entries only, in the new order.
//! Article summaries follow their source: renumbered if it is cited, dropped otherwise.

use std::collections::HashMap;

use tracing::debug;

use crate::model::{FinalBriefing, SourceEntry};

/// Old id -> new id, built in traversal order.
#[derive(Debug, Default)]
struct Renumbering {
    map: HashMap<u32, u32>,
    order: Vec<u32>,
}

impl Renumbering {
    fn visit(&mut self, ids: &[u32], known: &HashMap<u32, &SourceEntry>) {
        for id in ids {
            if known.contains_key(id) && !self.map.contains_key(id) {
                self.order.push(*id);
                self.map.insert(*id, self.order.len() as u32);
            }
        }
    }

    /// Remap in place: unknown ids removed, duplicates collapsed to the first occurrence.
    fn apply(&self, ids: &mut Vec<u32>) {
        let mut out: Vec<u32> = Vec::with_capacity(ids.len());
        for id in ids.iter() {
            if let Some(new) = self.map.get(id) {
                if !out.contains(new) {
                    out.push(*new);
                }
            }
        }
        *ids = out;
    }
}

/// Renumber every citation array of `doc` against `pool` and rebuild `doc.sources`.
pub fn normalize_citations(doc: &mut FinalBriefing, pool: &[SourceEntry]) {
    let known: HashMap<u32, &SourceEntry> = pool.iter().map(|e| (e.id, e)).collect();
    let mut r = Renumbering::default();

    r.visit(&doc.header.lede_citations, &known);
    r.visit(&doc.why_citations, &known);
    r.visit(&doc.big_picture_citations, &known);
    for row in &doc.by_the_numbers {
        r.visit(&row.citations, &known);
    }
    for kw in &doc.keywords {
        r.visit(&kw.source_ids, &known);
    }
    for hw in &doc.recent_hotwords {
        r.visit(&hw.source_ids, &known);
    }
    for hs in &doc.recent_hotspots {
        r.visit(&hs.source_ids, &known);
    }

    r.apply(&mut doc.header.lede_citations);
    r.apply(&mut doc.why_citations);
    r.apply(&mut doc.big_picture_citations);
    doc.by_the_numbers.iter_mut().for_each(|row| r.apply(&mut row.citations));
    doc.keywords.iter_mut().for_each(|kw| r.apply(&mut kw.source_ids));
    doc.recent_hotwords.iter_mut().for_each(|hw| r.apply(&mut hw.source_ids));
    doc.recent_hotspots.iter_mut().for_each(|hs| r.apply(&mut hs.source_ids));
    doc.article_summaries.retain_mut(|s| match r.map.get(&s.source_id) {
        Some(new) => {
            s.source_id = *new;
            true
        }
        None => false,
    });

    doc.sources = r
        .order
        .iter()
        .filter_map(|old| known.get(old).map(|e| (old, e)))
        .map(|(old, e)| SourceEntry {
            id: r.map[old],
            ..(*e).clone()
        })
        .collect();

    debug!(target: "briefing", pool = pool.len(), referenced = doc.sources.len(), "citations normalized");
}

/// Every id referenced anywhere in `doc`, in traversal order, with repeats.
pub fn referenced_ids(doc: &FinalBriefing) -> Vec<u32> {
    let mut ids = Vec::new();
    ids.extend(&doc.header.lede_citations);
    ids.extend(&doc.why_citations);
    ids.extend(&doc.big_picture_citations);
    doc.by_the_numbers.iter().for_each(|r| ids.extend(&r.citations));
    doc.keywords.iter().for_each(|k| ids.extend(&k.source_ids));
    doc.recent_hotwords.iter().for_each(|h| ids.extend(&h.source_ids));
    doc.recent_hotspots.iter().for_each(|h| ids.extend(&h.source_ids));
    ids
}
