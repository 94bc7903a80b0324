// src/keywords.rs
use crate::model::{HotspotEvent, Keyword};
use crate::pool::SourcePool;

const TOP_KEYWORDS: usize = 3;
const MAX_KEYWORD_SOURCES: usize = 6;
const SNIPPET_SOURCES: usize = 2;
const MAX_SNIPPETS: usize = 4;

/// Top hotspots (already sorted by hotness) as keywords; snippets are titles of the
/// first cited articles.
pub fn keywords_from_hotspots(hotspots: &[HotspotEvent], pool: &SourcePool<'_>) -> Vec<Keyword> {
    hotspots
        .iter()
        .take(TOP_KEYWORDS)
        .map(|h| {
            let snippets: Vec<String> = h
                .source_ids
                .iter()
                .take(SNIPPET_SOURCES)
                .filter_map(|id| pool.entry(*id))
                .map(|e| e.title.trim().to_string())
                .filter(|t| !t.is_empty())
                .take(MAX_SNIPPETS)
                .collect();
            Keyword {
                word: h.event.clone(),
                weight: h.hotness,
                hotness: h.hotness,
                citations: h.source_ids.len(),
                source_ids: h.source_ids.iter().take(MAX_KEYWORD_SOURCES).copied().collect(),
                snippets,
            }
        })
        .collect()
}
