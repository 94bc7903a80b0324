// src/config/briefing.rs
//! Pipeline tuning knobs and injectable vocabulary, loaded from `config/briefing.toml`.
//!
//! Every field has a default, so a partial (or missing) file is fine. Numeric knobs can
//! be overridden from the environment; out-of-range values are clamped, never rejected.

use anyhow::Context;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tracing::{info, warn};

pub const DEFAULT_BRIEFING_CONFIG_PATH: &str = "config/briefing.toml";
pub const ENV_BRIEFING_CONFIG_PATH: &str = "BRIEFING_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BriefingConfig {
    /// Display name of the briefing, used in prompts and fallback titles.
    pub briefing_name: String,
    pub min_finance_kw_hits: usize,
    /// Below this many threshold-passing articles the prefilter falls back to top-N.
    pub min_prefilter_keep: usize,
    pub prefilter_fallback_top_n: usize,
    pub max_input_chars: usize,
    pub per_article_chars: usize,
    pub max_snippets_per_article: usize,
    /// Offset used to render article dates (`last_seen`, `sources[].date`).
    pub local_utc_offset_hours: i32,
    pub max_focus_attempts: u32,
    pub summary_concurrency: usize,
    pub hotspots: HotspotConfig,
    pub guardrails: GuardrailConfig,
    pub vocabulary: Vocabulary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotspotConfig {
    pub window_days: u32,
    pub tag_sum_threshold: u32,
    pub cluster_max_items: usize,
    pub oneliner_batch: usize,
    pub oneliner_concurrency: usize,
    pub top_k: usize,
    pub prompt_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    pub sensitive_phrases: Vec<String>,
    pub mask_token: String,
}

/// Region- and domain-specific word lists. Nothing in the pipeline hardcodes these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    pub finance_keywords: Vec<String>,
    /// Words that make a sentence a "key snippet" even without digits.
    pub snippet_signals: Vec<String>,
    /// Title markers that bump an article when clustering input has to be truncated.
    pub policy_markers: Vec<String>,
    /// Prefecture-level cities used by the "too local" drafting check.
    pub cities: Vec<String>,
    /// Headline markers of county/district-level anchoring.
    pub local_markers: Vec<String>,
    /// Headline markers of province-wide framing.
    pub broad_markers: Vec<String>,
    pub style_signals: StyleSignals,
}

/// Regex sources for the style selector's boolean signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleSignals {
    pub number: String,
    pub time_marker: String,
    pub change_verb: String,
    pub process_verb: String,
    pub question: String,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for BriefingConfig {
    fn default() -> Self {
        Self {
            briefing_name: "浙江财政信息摘要".to_string(),
            min_finance_kw_hits: 2,
            min_prefilter_keep: 8,
            prefilter_fallback_top_n: 20,
            max_input_chars: 180_000,
            per_article_chars: 8_000,
            max_snippets_per_article: 10,
            local_utc_offset_hours: 8,
            max_focus_attempts: 3,
            summary_concurrency: 4,
            hotspots: HotspotConfig::default(),
            guardrails: GuardrailConfig::default(),
            vocabulary: Vocabulary::default(),
        }
    }
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            window_days: 3,
            tag_sum_threshold: 2,
            cluster_max_items: 120,
            oneliner_batch: 8,
            oneliner_concurrency: 2,
            top_k: 8,
            prompt_version: "v1".to_string(),
        }
    }
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            sensitive_phrases: strings(&["绝密", "机密", "内部资料"]),
            mask_token: "（已脱敏）".to_string(),
        }
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            finance_keywords: strings(&[
                "财政", "预算", "决算", "预算执行", "转移支付", "专项债", "国债", "债券", "税收",
                "税务", "减税", "降费", "收费", "补贴", "补助", "津贴", "救助", "低保", "医保",
                "社保", "公积金", "政府采购", "招标", "投标", "中标", "审计", "国资", "国企",
                "财政资金", "专项资金", "经费", "拨款", "绩效",
            ]),
            snippet_signals: strings(&[
                "财政", "资金", "补贴", "补助", "专项", "债", "税", "预算", "采购", "招标",
                "中标", "拨付", "下达", "绩效",
            ]),
            policy_markers: strings(&[
                "补贴", "补助", "津贴", "退税", "减免", "专项债", "消费券", "以旧换新", "报销",
                "医保", "社保", "托育", "研发", "专利", "高新",
            ]),
            cities: strings(&[
                "杭州", "宁波", "温州", "嘉兴", "湖州", "绍兴", "金华", "衢州", "舟山", "台州",
                "丽水",
            ]),
            local_markers: strings(&[
                "县", "区", "镇", "乡", "街道", "开发区", "新区", "园区", "经开", "高新",
            ]),
            broad_markers: strings(&["全省", "浙江", "省级"]),
            style_signals: StyleSignals::default(),
        }
    }
}

impl Default for StyleSignals {
    fn default() -> Self {
        Self {
            number: r"\d".to_string(),
            time_marker: r"(即日起|日起|截至|截止|目标|到\d{4}年|\d{4}年|\d{1,2}月|\d{1,2}日)"
                .to_string(),
            change_verb: r"(新增|调整|扩大|提高|下调|上调|优化|完善|修订|更新|取消|暂停)"
                .to_string(),
            process_verb: r"(申报|申请|审核|发放|补贴|补助|办理|材料|渠道|流程|公示|兑付)"
                .to_string(),
            question: r"(如何|怎么|什么条件|怎么领|是否|能否|哪里办|需要什么)".to_string(),
        }
    }
}

impl BriefingConfig {
    /// Load from `$BRIEFING_CONFIG_PATH` or `config/briefing.toml`, then apply env
    /// overrides. A missing file yields defaults; a malformed one is an error.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_BRIEFING_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_BRIEFING_CONFIG_PATH));

        let mut cfg = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading briefing config from {}", path.display()))?;
            let cfg = Self::from_toml_str(&content)
                .with_context(|| format!("parsing briefing config {}", path.display()))?;
            info!(target: "briefing", path = %path.display(), "briefing config loaded");
            cfg
        } else {
            warn!(target: "briefing", path = %path.display(), "briefing config missing, using defaults");
            Self::default()
        };

        cfg.apply_env_overrides();
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let mut cfg: BriefingConfig = toml::from_str(s)?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Env overrides for the knobs operators tune most often.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_usize("DAILY_REPORT_MAX_INPUT_CHARS") {
            self.max_input_chars = v;
        }
        if let Some(v) = env_usize("DAILY_REPORT_PER_ARTICLE_MAX_CHARS") {
            self.per_article_chars = v;
        }
        if let Some(v) = env_usize("RECENT_HOTSPOTS_TOP_K") {
            self.hotspots.top_k = v;
        }
        if let Some(v) = env_usize("RECENT_HOTSPOTS_TAG_SUM_THRESHOLD") {
            self.hotspots.tag_sum_threshold = v.min(u32::MAX as usize) as u32;
        }
        if let Some(v) = env_usize("RECENT_HOTSPOTS_CLUSTER_MAX_ITEMS") {
            self.hotspots.cluster_max_items = v;
        }
        if let Some(v) = env_usize("RECENT_HOTSPOTS_ONELINER_BATCH") {
            self.hotspots.oneliner_batch = v;
        }
        if let Ok(v) = std::env::var("RECENT_HOTSPOTS_ONELINER_PROMPT_VERSION") {
            if !v.trim().is_empty() {
                self.hotspots.prompt_version = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("BRIEFING_SENSITIVE_PHRASES") {
            let phrases: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if !phrases.is_empty() {
                self.guardrails.sensitive_phrases = phrases;
            }
        }
    }

    /// Clamp every knob into its supported range.
    pub fn sanitize(&mut self) {
        self.max_input_chars = self.max_input_chars.max(1_000);
        self.per_article_chars = self.per_article_chars.clamp(200, self.max_input_chars);
        self.prefilter_fallback_top_n = self.prefilter_fallback_top_n.max(1);
        self.max_focus_attempts = self.max_focus_attempts.clamp(1, 5);
        self.summary_concurrency = self.summary_concurrency.clamp(1, 16);
        self.local_utc_offset_hours = self.local_utc_offset_hours.clamp(-12, 14);

        let h = &mut self.hotspots;
        h.window_days = h.window_days.max(1);
        h.tag_sum_threshold = h.tag_sum_threshold.clamp(1, 6);
        h.cluster_max_items = h.cluster_max_items.clamp(40, 220);
        h.oneliner_batch = h.oneliner_batch.clamp(1, 12);
        h.oneliner_concurrency = h.oneliner_concurrency.clamp(1, 8);
        h.top_k = h.top_k.clamp(3, 8);
        if h.prompt_version.trim().is_empty() {
            h.prompt_version = "v1".to_string();
        }
        if self.guardrails.mask_token.is_empty() {
            self.guardrails.mask_token = GuardrailConfig::default().mask_token;
        }
    }

    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.local_utc_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"))
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
}
