// src/pool.rs
//! Prefilter and source pools: which articles the briefing may cite, under which ids.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, FixedOffset, Utc};
use tracing::debug;

use crate::config::BriefingConfig;
use crate::model::{Article, SourceEntry};
use crate::text::{clean_text, extract_key_snippets, extract_number_spans, keyword_hits, truncate_chars};

const BLOCK_SEPARATOR: &str = "\n\n---\n\n";
const MAX_BLOCK_NUMBERS: usize = 12;

/// Citable sources with their backing articles, keyed by citation id.
#[derive(Debug, Clone, Default)]
pub struct SourcePool<'a> {
    pub entries: Vec<SourceEntry>,
    pub articles: BTreeMap<u32, &'a Article>,
}

impl<'a> SourcePool<'a> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, id: u32) -> Option<&SourceEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn article(&self, id: u32) -> Option<&'a Article> {
        self.articles.get(&id).copied()
    }

    pub fn max_id(&self) -> u32 {
        self.entries.iter().map(|e| e.id).max().unwrap_or(0)
    }

    fn push(&mut self, id: u32, article: &'a Article, offset: FixedOffset) {
        self.entries.push(SourceEntry {
            id,
            account: article.account.trim().to_string(),
            title: article.title.trim().to_string(),
            url: article.url.trim().to_string(),
            date: local_date(&article.published_at, offset),
        });
        self.articles.insert(id, article);
    }
}

/// Finance material handed to the model, plus the pool its ids refer to.
#[derive(Debug, Clone, Default)]
pub struct Material<'a> {
    pub text: String,
    pub pool: SourcePool<'a>,
}

pub fn local_date(dt: &DateTime<Utc>, offset: FixedOffset) -> String {
    dt.with_timezone(&offset).format("%Y-%m-%d").to_string()
}

/// Rank by finance keyword hits over title+content. Articles at or above the minimum
/// are kept; if too few qualify, the top-N by hits are kept regardless.
pub fn prefilter<'a>(articles: &'a [Article], cfg: &BriefingConfig) -> Vec<&'a Article> {
    let vocab = &cfg.vocabulary.finance_keywords;
    let mut scored: Vec<(usize, &'a Article)> = articles
        .iter()
        .map(|a| (keyword_hits(&format!("{}\n{}", a.title, a.content), vocab), a))
        .collect();
    // stable: ties keep input order
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let kept: Vec<&'a Article> = scored
        .iter()
        .filter(|(h, _)| *h >= cfg.min_finance_kw_hits)
        .map(|(_, a)| *a)
        .collect();

    if kept.len() >= cfg.min_prefilter_keep {
        debug!(target: "briefing", kept = kept.len(), total = articles.len(), "prefilter by threshold");
        return kept;
    }
    let fallback: Vec<&'a Article> = scored
        .into_iter()
        .take(cfg.prefilter_fallback_top_n)
        .map(|(_, a)| a)
        .collect();
    debug!(target: "briefing", kept = fallback.len(), qualified = kept.len(), "prefilter fell back to top-n");
    fallback
}

/// Build material blocks under the total and per-article budgets and assign ids 1..N in
/// insertion order. The first article that would overflow the total budget ends the pool.
pub fn build_material<'a>(
    articles: &[&'a Article],
    cfg: &BriefingConfig,
) -> Material<'a> {
    let offset = cfg.local_offset();
    let per_article = cfg.per_article_chars;
    let mut blocks: Vec<String> = Vec::new();
    let mut pool = SourcePool::default();
    let mut total = 0usize;

    for (idx, a) in articles.iter().enumerate() {
        let id = (idx + 1) as u32;
        let block = material_block(id, a, per_article, cfg, offset);
        let len = block.chars().count();
        if total + len > cfg.max_input_chars {
            debug!(target: "briefing", id, total, "material budget reached");
            break;
        }
        total += len;
        blocks.push(block);
        pool.push(id, a, offset);
    }

    Material {
        text: blocks.join(BLOCK_SEPARATOR),
        pool,
    }
}

fn material_block(
    id: u32,
    a: &Article,
    per_article: usize,
    cfg: &BriefingConfig,
    offset: FixedOffset,
) -> String {
    let mut body = clean_text(&a.content);
    if body.chars().count() > per_article {
        let head = truncate_chars(&body, per_article * 7 / 10).trim_end().to_string();
        let snippets = extract_key_snippets(
            &body,
            &cfg.vocabulary.snippet_signals,
            cfg.max_snippets_per_article,
        );
        let mut merged = head;
        if !snippets.is_empty() {
            merged.push_str("\n\n关键句（原文摘录）：\n- ");
            merged.push_str(&snippets.join("\n- "));
        }
        body = truncate_chars(merged.trim(), per_article).trim_end().to_string();
    }

    let mut lines = vec![
        format!("[{id}] 标题: {}", a.title.trim()),
        format!("公众号: {}", non_empty_or_unknown(&a.account)),
        format!("URL: {}", non_empty_or_unknown(&a.url)),
        format!(
            "发布时间: {}",
            a.published_at.with_timezone(&offset).format("%Y-%m-%d %H:%M")
        ),
        format!("正文: {body}"),
    ];
    let nums = extract_number_spans(&body, MAX_BLOCK_NUMBERS);
    if !nums.is_empty() {
        lines.push(format!("关键数字（原文摘录）：\n- {}", nums.join("\n- ")));
    }
    lines.join("\n").trim().to_string()
}

fn non_empty_or_unknown(s: &str) -> &str {
    let t = s.trim();
    if t.is_empty() {
        "（未知）"
    } else {
        t
    }
}

/// Finance pool first with its ids unchanged, then every other article with a URL not
/// yet present, continuing the id sequence.
pub fn combined_pool<'a>(
    finance: &SourcePool<'a>,
    all_articles: &'a [Article],
    offset: FixedOffset,
) -> SourcePool<'a> {
    let mut pool = finance.clone();
    let mut seen: HashSet<String> = finance
        .entries
        .iter()
        .filter(|e| !e.url.is_empty())
        .map(|e| e.url.clone())
        .collect();
    let mut next_id = finance.max_id() + 1;

    for a in all_articles {
        let url = a.url.trim();
        if url.is_empty() || !seen.insert(url.to_string()) {
            continue;
        }
        pool.push(next_id, a, offset);
        next_id += 1;
    }
    debug!(target: "briefing", finance = finance.len(), combined = pool.len(), "combined pool built");
    pool
}
