// src/text.rs
//! Pure text helpers shared by the pipeline stages: boilerplate cleanup, keyword hit
//! counting, key-sentence extraction, number-span extraction, and short-label
//! normalization. Vocabulary is always passed in by the caller.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

// Boilerplate lines commonly found in WeChat / gov-media articles.
static RE_BOILERPLATE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?m)^[ \t]*阅读原文.*$",
        r"(?m)^[ \t]*点击.*?阅读原文.*$",
        r"(?m)^[ \t]*长按.*?识别.*?二维码.*$",
        r"(?m)^[ \t]*(?:扫码|扫描).{0,6}二维码.*$",
        r"(?m)^[ \t]*(?:关注|关注我们|点亮|在看|点赞|分享|转发).{0,30}$",
        r"(?m)^[ \t]*(?:来源|编辑|责任编辑|审核|校对|监制|通讯员|记者|摄影|供图)[ \t]*[:：].*$",
        r"(?m)^[ \t]*本文.*?转载.*$",
        r"(?m)^[ \t]*版权.*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("boilerplate regex"))
    .collect()
});

const CREDIT_MARKERS: [&str; 10] = [
    "编辑", "责任编辑", "审核", "校对", "监制", "通讯员", "记者", "摄影", "供图", "来源",
];

static RE_HSPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("hspace regex"));
static RE_MANY_NL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("newline regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));
static RE_DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").expect("digit regex"));
static RE_SENTENCE_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[。！？；;\n]").expect("sentence regex"));
static RE_THOUSANDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d),(\d{3})(\D|$)").expect("thousands regex"));
static RE_TRAILING_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[。！？；;：:，,]+$").expect("trailing punct regex"));

static RE_FOCUS_BRACKETS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"【\s*(?:为何重要|为什么重要|大局)\s*】").expect("marker regex"));
static RE_FOCUS_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:为何重要|为什么重要|大局)\s*[:：]\s*").expect("prefix regex")
});

/// Number spans with currency/percentage/unit suffixes, plus Chinese dates.
static RE_NUMBER_SPANS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?:¥|￥|RMB|CNY)?\s*\d+(?:\.\d+)?\s*(?:万亿元|亿元|万元|元|%|％|万|亿)?",
        r"\d+(?:\.\d+)?\s*(?:个百分点|%|％)",
        r"\d{4}年\d{1,2}月\d{1,2}日",
        r"\d{4}年\d{1,2}月",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("number span regex"))
    .collect()
});

static RE_NUMBER_LOOSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:¥|￥|RMB|CNY)?\s*\d+(?:\.\d+)?\s*(?:万亿元|亿元|万元|元|%|％|万|亿|个百分点)?")
        .expect("loose number regex")
});

const MAX_NUMBER_SPAN_CHARS: usize = 40;

/// Clean scraped article text: decode entities, drop boilerplate lines and a trailing
/// credits block, collapse horizontal whitespace and runs of blank lines.
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let mut t = html_escape::decode_html_entities(text)
        .replace("\r\n", "\n")
        .replace('\r', "\n");

    // Credits block near the end: cut at the earliest credit line within the last 15 lines.
    // Must run before line-level boilerplate removal, which would blank those lines.
    if let Some(head) = cut_credits_tail(&t) {
        t = head;
    }

    for re in RE_BOILERPLATE.iter() {
        t = re.replace_all(&t, "").into_owned();
    }

    let t = RE_HSPACE.replace_all(&t, " ");
    let t = RE_MANY_NL.replace_all(&t, "\n\n");
    t.trim().to_string()
}

fn cut_credits_tail(t: &str) -> Option<String> {
    let lines: Vec<&str> = t.lines().collect();
    if lines.len() < 8 {
        return None;
    }
    let tail_start = lines.len().saturating_sub(15);
    let cut_at = (tail_start..lines.len()).find(|&i| {
        let ln = lines[i].trim();
        CREDIT_MARKERS
            .iter()
            .any(|m| ln.starts_with(&format!("{m}：")) || ln.starts_with(&format!("{m}:")))
    })?;
    Some(lines[..cut_at].join("\n").trim_end().to_string())
}

/// Remove legacy section markers ("为何重要：", "【大局】") and collapse to one paragraph.
pub fn strip_focus_markers(text: &str) -> String {
    let t = RE_FOCUS_BRACKETS.replace_all(text.trim(), "");
    let t = RE_FOCUS_PREFIX.replace(&t, "");
    RE_WS.replace_all(&t, " ").trim().to_string()
}

/// Number of distinct vocabulary entries occurring as substrings of `text`.
pub fn keyword_hits(text: &str, keywords: &[String]) -> usize {
    keywords
        .iter()
        .filter(|k| !k.is_empty() && text.contains(k.as_str()))
        .count()
}

/// Short, high-signal sentences: at least 12 chars and containing a digit or a signal word.
/// Long sentences are clipped to 140 chars with an ellipsis.
pub fn extract_key_snippets(text: &str, signals: &[String], max_snippets: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for part in RE_SENTENCE_SPLIT.split(text) {
        if out.len() >= max_snippets {
            break;
        }
        let s = part.trim();
        if s.chars().count() < 12 {
            continue;
        }
        if !(RE_DIGIT.is_match(s) || signals.iter().any(|k| !k.is_empty() && s.contains(k.as_str())))
        {
            continue;
        }
        let s = if s.chars().count() > 140 {
            format!("{}…", truncate_chars(s, 140).trim_end())
        } else {
            s.to_string()
        };
        if seen.insert(s.clone()) {
            out.push(s);
        }
    }
    out
}

/// Remove thousands separators inside numbers (`1,000,000` -> `1000000`).
pub fn strip_thousands_separators(text: &str) -> String {
    let mut cur = text.to_string();
    // Each pass can only consume every other separator of a long run.
    loop {
        let next = RE_THOUSANDS.replace_all(&cur, "$1$2$3").into_owned();
        if next == cur {
            return cur;
        }
        cur = next;
    }
}

/// Extract number spans (amounts, percentages, dates) in first-seen order, deduplicated.
pub fn extract_number_spans(text: &str, max_items: usize) -> Vec<String> {
    let t = strip_thousands_separators(text);
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for re in RE_NUMBER_SPANS.iter() {
        for m in re.find_iter(&t) {
            let s = m.as_str().trim();
            if !accept_span(s) || !seen.insert(s.to_string()) {
                continue;
            }
            out.push(s.to_string());
            if out.len() >= max_items {
                return out;
            }
        }
    }
    out
}

/// Looser variant used on model-written values: a single pattern, every numeric run counts.
pub fn extract_number_spans_loose(text: &str) -> Vec<String> {
    let t = strip_thousands_separators(text);
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for m in RE_NUMBER_LOOSE.find_iter(&t) {
        let s = m.as_str().trim();
        if accept_span(s) && seen.insert(s.to_string()) {
            out.push(s.to_string());
        }
    }
    out
}

fn accept_span(s: &str) -> bool {
    !s.is_empty() && RE_DIGIT.is_match(s) && s.chars().count() <= MAX_NUMBER_SPAN_CHARS
}

/// Canonical form for number comparison: no whitespace, no thousands separators,
/// unified currency symbols.
pub fn normalize_number(s: &str) -> String {
    let t = RE_WS.replace_all(s.trim(), "");
    strip_thousands_separators(&t)
        .replace('￥', "¥")
        .replace("RMB", "CNY")
}

/// Normalize a short model label (one-liner, event name): no whitespace, no trailing
/// punctuation, hard-clipped to `max_chars`.
pub fn normalize_label(s: &str, max_chars: usize) -> String {
    let t = RE_WS.replace_all(s.trim(), "");
    let t = RE_TRAILING_PUNCT.replace(&t, "");
    truncate_chars(t.trim(), max_chars).trim().to_string()
}

/// Char-boundary-safe prefix of at most `max` chars.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
