// src/pipeline.rs
//! # Briefing generation
//! Runs the stages in dependency order for one target date:
//!
//! 1. prefilter and finance material (citation ids 1..N)
//! 2. per-article summaries
//! 3. style selection
//! 4. focus drafting loop
//! 5. combined pool, one-liners and hotspots
//! 6. keywords, numeric guard, citation normalization, sensitive masking
//!
//! Stage failures degrade inside the stage. The only "no report" outcomes are an empty
//! finance pool and a first draft call that yields nothing usable.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::citations::normalize_citations;
use crate::clock::Clock;
use crate::config::{BriefingConfig, LlmConfig};
use crate::focus::{draft_focus, finalize_draft, FocusContext};
use crate::guardrails::{mask_sensitive, strip_unsupported_rows};
use crate::hotspots::HotspotExtractor;
use crate::keywords::keywords_from_hotspots;
use crate::llm::DynChatClient;
use crate::metrics::{ensure_metrics_described, EMPTY, GENERATED};
use crate::model::{
    Article, FinalBriefing, FocusStyle, HotspotsMeta, LeadVariant, BRIEFING_SCHEMA,
};
use crate::oneliner::{DynOneLinerStore, OneLinerService};
use crate::pool::{build_material, combined_pool, prefilter};
use crate::style::StyleSelector;
use crate::summarize::summarize_pool;

/// Input for one target date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefingRequest {
    pub target_date: NaiveDate,
    /// Candidates for the finance-grounded focus.
    #[serde(default)]
    pub finance_articles: Vec<Article>,
    /// Broader cross-day set the hotspots may cite.
    #[serde(default)]
    pub all_articles: Vec<Article>,
    /// End of the hotspot window; the clock's "now" when absent.
    #[serde(default)]
    pub window_end_utc: Option<DateTime<Utc>>,
}

/// What earlier briefings looked like, most recent first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecentHistory {
    pub focus_styles: Vec<FocusStyle>,
    pub lead_variants: Vec<LeadVariant>,
    pub focus_topics: Vec<String>,
}

/// Built once per process; holds the injected client, one-liner cache and clock.
pub struct BriefingGenerator {
    client: DynChatClient,
    oneliners: OneLinerService,
    clock: Arc<dyn Clock>,
    styles: StyleSelector,
    cfg: BriefingConfig,
    draft_model: String,
    keywords_model: String,
}

impl BriefingGenerator {
    pub fn new(
        client: DynChatClient,
        store: DynOneLinerStore,
        clock: Arc<dyn Clock>,
        cfg: BriefingConfig,
        llm: &LlmConfig,
    ) -> Self {
        let oneliners = OneLinerService::new(
            client.clone(),
            store,
            clock.clone(),
            llm.keywords_model.clone(),
            &cfg.hotspots,
            cfg.briefing_name.clone(),
            cfg.vocabulary.snippet_signals.clone(),
        );
        Self {
            client,
            oneliners,
            clock,
            styles: StyleSelector::new(&cfg.vocabulary.style_signals),
            cfg,
            draft_model: llm.draft_model.clone(),
            keywords_model: llm.keywords_model.clone(),
        }
    }

    pub fn config(&self) -> &BriefingConfig {
        &self.cfg
    }

    pub fn oneliners(&self) -> &OneLinerService {
        &self.oneliners
    }

    /// Current time from the injected clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The briefing for `req.target_date`, or `None` for "no report for this date".
    pub async fn generate(&self, req: &BriefingRequest, recent: &RecentHistory) -> Option<FinalBriefing> {
        ensure_metrics_described();
        let date = req.target_date;
        let cfg = &self.cfg;

        let candidates = prefilter(&req.finance_articles, cfg);
        let material = build_material(&candidates, cfg);
        if material.pool.is_empty() {
            info!(target: "briefing", %date, articles = req.finance_articles.len(), "no finance sources, skipping");
            counter!(EMPTY, "reason" => "empty_pool").increment(1);
            return None;
        }

        let summaries = summarize_pool(self.client.as_ref(), &self.keywords_model, &material.pool, cfg).await;
        let style = self.styles.choose(date, &summaries, &recent.focus_styles, &recent.lead_variants);

        let ctx = FocusContext {
            client: self.client.as_ref(),
            draft_model: &self.draft_model,
            check_model: &self.keywords_model,
            cfg,
        };
        let Some(outcome) = draft_focus(&ctx, date, &summaries, style, &recent.focus_topics, &material.pool).await
        else {
            warn!(target: "briefing", %date, "no usable focus draft");
            counter!(EMPTY, "reason" => "no_draft").increment(1);
            return None;
        };
        let draft = finalize_draft(outcome.draft, date, &cfg.briefing_name, style);

        let combined = combined_pool(&material.pool, &req.all_articles, cfg.local_offset());
        let end_utc = req.window_end_utc.unwrap_or_else(|| self.clock.now());
        let hotspots = HotspotExtractor {
            client: self.client.as_ref(),
            model: &self.keywords_model,
            oneliners: &self.oneliners,
            cfg,
        }
        .extract(&combined, end_utc)
        .await;
        let keywords = keywords_from_hotspots(&hotspots, &combined);

        let mut doc = FinalBriefing {
            schema: BRIEFING_SCHEMA.to_string(),
            target_date: date,
            focus_topic: draft.focus_topic,
            visual_focus: draft.visual_focus,
            header: draft.header,
            why_it_matters: draft.why_it_matters,
            why_citations: draft.why_citations,
            big_picture: draft.big_picture,
            big_picture_citations: draft.big_picture_citations,
            by_the_numbers: draft.by_the_numbers,
            recent_hotwords: draft.recent_hotwords,
            keywords,
            recent_hotspots_meta: HotspotsMeta {
                window_days: cfg.hotspots.window_days,
                total_hotspots: hotspots.len(),
                window_end_utc: Some(end_utc),
            },
            recent_hotspots: hotspots,
            article_summaries: summaries,
            focus_type: style.focus_type,
            focus_style: style.focus_style,
            lead_variant: style.lead_variant,
            sources: Vec::new(),
            quality_flags: outcome.flags,
        };

        // rows go before renumbering so their citations never leave orphan sources
        strip_unsupported_rows(&mut doc, &material.text);
        normalize_citations(&mut doc, &combined.entries);
        mask_sensitive(&mut doc, &cfg.guardrails);

        counter!(GENERATED).increment(1);
        info!(
            target: "briefing",
            %date,
            attempts = outcome.attempts,
            focus_topic = %doc.focus_topic,
            focus_style = doc.focus_style.as_str(),
            sources = doc.sources.len(),
            hotspots = doc.recent_hotspots.len(),
            flags = ?doc.quality_flags,
            "briefing generated"
        );
        Some(doc)
    }
}
