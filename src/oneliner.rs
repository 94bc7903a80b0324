// src/oneliner.rs
//! Per-article one-liners with topic tags, persisted by (article_id, prompt_version).
//!
//! Only cache misses reach the model, in batches aligned by article id. Rows are
//! created once per key; a lost create race degrades to read-then-update.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use futures::stream::{self, StreamExt};
use metrics::counter;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::HotspotConfig;
use crate::llm::{self, CallPurpose, ChatMessage, ChatRequest, DynChatClient, ParsedReply};
use crate::metrics::{ensure_metrics_described, ONELINER_CACHE_HITS, ONELINER_CACHE_MISSES};
use crate::model::{string_from_value, Article, OneLinerResult, TagScores};
use crate::prompts;
use crate::text::{clean_text, extract_key_snippets, normalize_label, truncate_chars};

const ONELINER_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ONELINER_CHARS: usize = 20;
const MAX_CLIP_CHARS: usize = 1_600;
const CLIP_SNIPPETS: usize = 6;
const MAX_MODEL_NAME_CHARS: usize = 100;

// ------------------------------------------------------------
// Store abstraction
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row for the key already exists; nothing was written.
    Conflict,
}

#[async_trait::async_trait]
pub trait OneLinerStore: Send + Sync {
    async fn get(&self, article_id: i64, prompt_version: &str) -> anyhow::Result<Option<OneLinerResult>>;
    /// Create-only write.
    async fn insert_new(&self, row: &OneLinerResult) -> anyhow::Result<InsertOutcome>;
    /// Overwrite an existing row.
    async fn update(&self, row: &OneLinerResult) -> anyhow::Result<()>;
}

pub type DynOneLinerStore = Arc<dyn OneLinerStore>;

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryOneLinerStore {
    rows: Mutex<HashMap<(i64, String), OneLinerResult>>,
}

impl MemoryOneLinerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl OneLinerStore for MemoryOneLinerStore {
    async fn get(&self, article_id: i64, prompt_version: &str) -> anyhow::Result<Option<OneLinerResult>> {
        let g = self.rows.lock().map_err(|_| anyhow::anyhow!("one-liner store poisoned"))?;
        Ok(g.get(&(article_id, prompt_version.to_string())).cloned())
    }

    async fn insert_new(&self, row: &OneLinerResult) -> anyhow::Result<InsertOutcome> {
        let mut g = self.rows.lock().map_err(|_| anyhow::anyhow!("one-liner store poisoned"))?;
        let key = (row.article_id, row.prompt_version.clone());
        if g.contains_key(&key) {
            return Ok(InsertOutcome::Conflict);
        }
        g.insert(key, row.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn update(&self, row: &OneLinerResult) -> anyhow::Result<()> {
        let mut g = self.rows.lock().map_err(|_| anyhow::anyhow!("one-liner store poisoned"))?;
        g.insert((row.article_id, row.prompt_version.clone()), row.clone());
        Ok(())
    }
}

/// One JSON file per key under `dir`. Creates use a hard link so an existing file is
/// never replaced; updates go through tmp + rename.
#[derive(Debug, Clone)]
pub struct FileOneLinerStore {
    dir: PathBuf,
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

impl FileOneLinerStore {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating one-liner cache dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, article_id: i64, prompt_version: &str) -> PathBuf {
        let ver: String = prompt_version
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{article_id}__{ver}.json"))
    }

    async fn write_tmp(&self, path: &Path, row: &OneLinerResult) -> anyhow::Result<PathBuf> {
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.{seq}.tmp", std::process::id()));
        let json = serde_json::to_vec_pretty(row)?;
        tokio::fs::write(&tmp, json).await?;
        Ok(tmp)
    }
}

#[async_trait::async_trait]
impl OneLinerStore for FileOneLinerStore {
    async fn get(&self, article_id: i64, prompt_version: &str) -> anyhow::Result<Option<OneLinerResult>> {
        let path = self.path_for(article_id, prompt_version);
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(
                serde_json::from_str(&s).with_context(|| format!("decoding {}", path.display()))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_new(&self, row: &OneLinerResult) -> anyhow::Result<InsertOutcome> {
        let path = self.path_for(row.article_id, &row.prompt_version);
        let tmp = self.write_tmp(&path, row).await?;
        let linked = tokio::fs::hard_link(&tmp, &path).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => Ok(InsertOutcome::Inserted),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(InsertOutcome::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, row: &OneLinerResult) -> anyhow::Result<()> {
        let path = self.path_for(row.article_id, &row.prompt_version);
        let tmp = self.write_tmp(&path, row).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

// ------------------------------------------------------------
// Service
// ------------------------------------------------------------

/// Cache service: injected client, store and clock; built once per process.
pub struct OneLinerService {
    client: DynChatClient,
    store: DynOneLinerStore,
    clock: Arc<dyn Clock>,
    model: String,
    prompt_version: String,
    batch_size: usize,
    concurrency: usize,
    tag_sum_threshold: u32,
    briefing_name: String,
    snippet_signals: Vec<String>,
}

impl OneLinerService {
    pub fn new(
        client: DynChatClient,
        store: DynOneLinerStore,
        clock: Arc<dyn Clock>,
        model: impl Into<String>,
        hotspots: &HotspotConfig,
        briefing_name: impl Into<String>,
        snippet_signals: Vec<String>,
    ) -> Self {
        Self {
            client,
            store,
            clock,
            model: model.into(),
            prompt_version: hotspots.prompt_version.clone(),
            batch_size: hotspots.oneliner_batch.clamp(1, 12),
            concurrency: hotspots.oneliner_concurrency.max(1),
            tag_sum_threshold: hotspots.tag_sum_threshold,
            briefing_name: briefing_name.into(),
            snippet_signals,
        }
    }

    pub fn prompt_version(&self) -> &str {
        &self.prompt_version
    }

    /// One-liners for every article with a persisted id, keyed by article id.
    pub async fn get_or_compute(&self, articles: &[&Article]) -> HashMap<i64, OneLinerResult> {
        ensure_metrics_described();
        let mut seen = HashSet::new();
        let unique: Vec<&Article> = articles
            .iter()
            .copied()
            .filter(|a| a.persisted_id().is_some_and(|id| seen.insert(id)))
            .collect();

        let mut out = HashMap::new();
        let mut misses: Vec<&Article> = Vec::new();
        for a in unique {
            let Some(id) = a.persisted_id() else { continue };
            match self.store.get(id, &self.prompt_version).await {
                Ok(Some(row)) => {
                    out.insert(id, row);
                }
                Ok(None) => misses.push(a),
                Err(e) => {
                    warn!(target: "oneliner", article_id = id, error = %e, "store read failed, recomputing");
                    misses.push(a);
                }
            }
        }
        counter!(ONELINER_CACHE_HITS).increment(out.len() as u64);
        counter!(ONELINER_CACHE_MISSES).increment(misses.len() as u64);
        debug!(target: "oneliner", hits = out.len(), misses = misses.len(), version = %self.prompt_version, "one-liner cache lookup");

        let jobs: Vec<_> = misses
            .chunks(self.batch_size)
            .map(|batch| self.compute_batch(batch))
            .collect();
        let computed: Vec<Vec<OneLinerResult>> = stream::iter(jobs)
            .buffered(self.concurrency)
            .collect()
            .await;
        for row in computed.into_iter().flatten() {
            out.insert(row.article_id, row);
        }
        out
    }

    async fn compute_batch(&self, batch: &[&Article]) -> Vec<OneLinerResult> {
        let items: Vec<Value> = batch
            .iter()
            .enumerate()
            .filter_map(|(i, a)| {
                a.persisted_id().map(|id| {
                    json!({"n": i + 1, "article_id": id, "text": clip_for_model(a, &self.snippet_signals)})
                })
            })
            .collect();

        let req = ChatRequest {
            purpose: CallPurpose::OneLiner,
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(prompts::oneliner_system(&self.briefing_name)),
                ChatMessage::user(json!({ "items": items }).to_string()),
            ],
            temperature: 0.0,
            timeout: ONELINER_TIMEOUT,
            json_mode: true,
        };

        let replies = match llm::call(self.client.as_ref(), &req)
            .await
            .map(|raw| llm::parse_reply::<Value>(&raw))
        {
            Some(ParsedReply::Parsed(v)) => Some(items_by_article_id(&v)),
            Some(ParsedReply::Malformed(_)) => {
                warn!(target: "oneliner", size = batch.len(), "one-liner reply was not json");
                None
            }
            _ => None,
        };

        let mut out = Vec::with_capacity(batch.len());
        for a in batch {
            let Some(id) = a.persisted_id() else { continue };
            match replies.as_ref().and_then(|m| m.get(&id)) {
                Some(item) => {
                    let row = self.row_from_item(a, id, item);
                    self.persist(&row).await;
                    out.push(row);
                }
                // transient: a later run retries this article
                None => out.push(self.fallback_row(a, id)),
            }
        }
        out
    }

    fn row_from_item(&self, a: &Article, id: i64, item: &Value) -> OneLinerResult {
        let mut one = normalize_label(
            &item.get("one_liner").map(string_from_value).unwrap_or_default(),
            MAX_ONELINER_CHARS,
        );
        if one.is_empty() {
            one = normalize_label(&a.title, MAX_ONELINER_CHARS);
        }
        let tag = |k: &str| {
            item.get("tags")
                .and_then(|t| t.get(k))
                .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
                .unwrap_or(0)
        };
        let tags = TagScores::clamped(tag("finance"), tag("minsheng"), tag("tech"));
        let keep = match item.get("keep") {
            Some(Value::Bool(b)) => *b,
            _ => tags.sum() >= self.tag_sum_threshold,
        };
        let now = self.clock.now();
        OneLinerResult {
            article_id: id,
            one_liner: one,
            tags,
            keep,
            model: truncate_chars(&self.model, MAX_MODEL_NAME_CHARS).to_string(),
            prompt_version: self.prompt_version.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    fn fallback_row(&self, a: &Article, id: i64) -> OneLinerResult {
        let now = self.clock.now();
        OneLinerResult {
            article_id: id,
            one_liner: normalize_label(&a.title, MAX_ONELINER_CHARS),
            tags: TagScores::default(),
            keep: false,
            model: truncate_chars(&self.model, MAX_MODEL_NAME_CHARS).to_string(),
            prompt_version: self.prompt_version.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    async fn persist(&self, row: &OneLinerResult) {
        match self.store.insert_new(row).await {
            Ok(InsertOutcome::Inserted) => {}
            Ok(InsertOutcome::Conflict) => {
                warn!(target: "oneliner", article_id = row.article_id, "concurrent insert, updating existing row");
                let mut updated = row.clone();
                if let Ok(Some(existing)) = self.store.get(row.article_id, &row.prompt_version).await {
                    updated.created_at = existing.created_at;
                }
                if let Err(e) = self.store.update(&updated).await {
                    warn!(target: "oneliner", article_id = row.article_id, error = %e, "one-liner update failed");
                }
            }
            Err(e) => {
                warn!(target: "oneliner", article_id = row.article_id, error = %e, "one-liner insert failed");
            }
        }
    }
}

fn items_by_article_id(v: &Value) -> HashMap<i64, Value> {
    let arr = match v {
        Value::Array(a) => a.as_slice(),
        other => other.get("items").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]),
    };
    arr.iter()
        .filter_map(|it| {
            let id = it.get("article_id").and_then(|x| {
                x.as_i64().or_else(|| x.as_str().and_then(|s| s.trim().parse().ok()))
            })?;
            (id > 0).then(|| (id, it.clone()))
        })
        .collect()
}

/// Title plus a few key sentences (or the head of the body), at most 1600 chars.
pub fn clip_for_model(a: &Article, signals: &[String]) -> String {
    let body = clean_text(&a.content);
    let snippets = extract_key_snippets(&body, signals, CLIP_SNIPPETS);
    let tail = if snippets.is_empty() {
        truncate_chars(&body, MAX_CLIP_CHARS).to_string()
    } else {
        snippets.join("\n")
    };
    let merged = format!("{}\n{}", a.title.trim(), tail);
    truncate_chars(merged.trim(), MAX_CLIP_CHARS).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::llm::ScriptedClient;
    use chrono::{TimeZone, Utc};

    fn art(id: i64, title: &str) -> Article {
        Article {
            id: Some(id),
            title: title.into(),
            content: "全省下达专项资金500万元，用于防汛救灾。".into(),
            url: format!("u{id}"),
            account: "a".into(),
            published_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    fn service(client: Arc<ScriptedClient>, store: DynOneLinerStore) -> OneLinerService {
        OneLinerService::new(
            client,
            store,
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap())),
            "m",
            &HotspotConfig::default(),
            "简报",
            vec![],
        )
    }

    #[tokio::test]
    async fn reply_items_are_normalized_and_clamped() {
        let client = Arc::new(ScriptedClient::new(|_| {
            Some(r#"{"items":[
                {"article_id": 1, "one_liner": " 发放 防汛补助资金到全省各地市县区街道乡镇社区。", "tags": {"finance": 5, "minsheng": "2", "tech": -1}},
                {"article_id": "2", "one_liner": "", "tags": {"finance": 0}, "keep": true}
            ]}"#.to_string())
        }));
        let store = Arc::new(MemoryOneLinerStore::new());
        let svc = service(client.clone(), store.clone());
        let (a1, a2) = (art(1, "标题一"), art(2, "标题二。"));
        let out = svc.get_or_compute(&[&a1, &a2]).await;

        let r1 = &out[&1];
        assert_eq!(r1.one_liner.chars().count(), 20);
        assert!(!r1.one_liner.contains(' '));
        assert_eq!((r1.tags.finance, r1.tags.minsheng, r1.tags.tech), (3, 2, 0));
        assert!(r1.keep);
        let r2 = &out[&2];
        assert_eq!(r2.one_liner, "标题二");
        assert!(r2.keep);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn failed_batch_is_not_persisted() {
        let client = Arc::new(ScriptedClient::new(|_| None));
        let store = Arc::new(MemoryOneLinerStore::new());
        let svc = service(client.clone(), store.clone());
        let a = art(5, "标题五");
        let out = svc.get_or_compute(&[&a]).await;
        assert_eq!(out[&5].one_liner, "标题五");
        assert!(!out[&5].keep);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn batches_respect_configured_size() {
        let client = Arc::new(ScriptedClient::new(|_| Some(r#"{"items":[]}"#.into())));
        let store = Arc::new(MemoryOneLinerStore::new());
        let mut cfg = HotspotConfig::default();
        cfg.oneliner_batch = 3;
        let svc = OneLinerService::new(
            client.clone(),
            store,
            Arc::new(FixedClock(Utc::now())),
            "m",
            &cfg,
            "简报",
            vec![],
        );
        let arts: Vec<Article> = (1..=7).map(|i| art(i, "t")).collect();
        let refs: Vec<&Article> = arts.iter().collect();
        svc.get_or_compute(&refs).await;
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn articles_without_persisted_id_are_skipped() {
        let client = Arc::new(ScriptedClient::new(|_| Some(r#"{"items":[]}"#.into())));
        let svc = service(client.clone(), Arc::new(MemoryOneLinerStore::new()));
        let mut a = art(0, "t");
        a.id = None;
        assert!(svc.get_or_compute(&[&a]).await.is_empty());
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn file_store_create_is_exclusive() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileOneLinerStore::new(tmp.path()).unwrap();
        let now = Utc::now();
        let row = OneLinerResult {
            article_id: 9,
            one_liner: "发放补助".into(),
            tags: TagScores::clamped(2, 1, 0),
            keep: true,
            model: "m".into(),
            prompt_version: "v1".into(),
            created_at: now,
            updated_at: now,
        };
        assert_eq!(store.insert_new(&row).await.unwrap(), InsertOutcome::Inserted);
        let mut second = row.clone();
        second.one_liner = "别的".into();
        assert_eq!(store.insert_new(&second).await.unwrap(), InsertOutcome::Conflict);
        assert_eq!(store.get(9, "v1").await.unwrap().unwrap().one_liner, "发放补助");

        store.update(&second).await.unwrap();
        assert_eq!(store.get(9, "v1").await.unwrap().unwrap().one_liner, "别的");
        assert!(store.get(9, "v2").await.unwrap().is_none());
        let leftovers = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
