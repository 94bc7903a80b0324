// tests/oneliner_cache.rs
//
// One-liner cache keyed by (article_id, prompt_version).
//
// Covered:
// - second computation for the same article and version never reaches the model
// - file-backed rows survive a new service instance
// - a new prompt version recomputes and keeps the old row
// - a lost create race degrades to read-then-update

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use daily_briefing::clock::FixedClock;
use daily_briefing::config::HotspotConfig;
use daily_briefing::llm::{CallPurpose, ScriptedClient};
use daily_briefing::oneliner::{
    DynOneLinerStore, FileOneLinerStore, InsertOutcome, MemoryOneLinerStore, OneLinerService, OneLinerStore,
};
use daily_briefing::{Article, OneLinerResult, TagScores};
use serde_json::json;

fn article_42() -> Article {
    Article {
        id: Some(42),
        title: "全省发放育儿补贴".into(),
        content: "省财政下达育儿补贴资金3.2亿元，每孩每年3600元。".into(),
        url: "https://mp.example.com/s/42".into(),
        account: "浙江财政".into(),
        published_at: Utc.with_ymd_and_hms(2025, 6, 4, 2, 0, 0).unwrap(),
    }
}

fn scripted() -> Arc<ScriptedClient> {
    Arc::new(ScriptedClient::new(|req| {
        assert_eq!(req.purpose, CallPurpose::OneLiner);
        Some(
            json!({"items": [{"article_id": 42, "one_liner": "全省发放育儿补贴", "tags": {"finance": 3, "minsheng": 3, "tech": 0}}]})
                .to_string(),
        )
    }))
}

fn service(client: Arc<ScriptedClient>, store: DynOneLinerStore, version: &str) -> OneLinerService {
    let cfg = HotspotConfig {
        prompt_version: version.to_string(),
        ..HotspotConfig::default()
    };
    OneLinerService::new(
        client,
        store,
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 6, 5, 0, 0, 0).unwrap())),
        "gpt-4o-mini",
        &cfg,
        "浙江财政信息摘要",
        vec![],
    )
}

#[tokio::test]
async fn second_lookup_hits_the_cache() {
    let client = scripted();
    let svc = service(client.clone(), Arc::new(MemoryOneLinerStore::new()), "v1");
    let a = article_42();

    let first = svc.get_or_compute(&[&a]).await;
    assert_eq!(client.call_count(), 1);
    let second = svc.get_or_compute(&[&a, &a]).await;
    assert_eq!(client.call_count(), 1, "cached article must not call the model again");
    assert_eq!(first[&42], second[&42]);
    assert_eq!(second[&42].prompt_version, "v1");
    assert!(second[&42].keep);
}

#[tokio::test]
async fn file_rows_survive_a_new_service() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let a = article_42();

    let client = scripted();
    let store: DynOneLinerStore = Arc::new(FileOneLinerStore::new(tmp.path()).expect("store"));
    service(client.clone(), store, "v1").get_or_compute(&[&a]).await;
    assert_eq!(client.call_count(), 1);

    let client2 = scripted();
    let store2: DynOneLinerStore = Arc::new(FileOneLinerStore::new(tmp.path()).expect("store"));
    let out = service(client2.clone(), store2, "v1").get_or_compute(&[&a]).await;
    assert_eq!(client2.call_count(), 0);
    assert_eq!(out[&42].one_liner, "全省发放育儿补贴");
}

#[tokio::test]
async fn new_prompt_version_recomputes_and_keeps_old_row() {
    let client = scripted();
    let store = Arc::new(MemoryOneLinerStore::new());
    let a = article_42();

    service(client.clone(), store.clone(), "v1").get_or_compute(&[&a]).await;
    service(client.clone(), store.clone(), "v2").get_or_compute(&[&a]).await;
    assert_eq!(client.call_count(), 2);
    assert_eq!(store.len(), 2);
    assert!(store.get(42, "v1").await.expect("get").is_some());
}

/// Reports a conflict on every create, as if another writer won the race.
#[derive(Default)]
struct RacingStore {
    inner: MemoryOneLinerStore,
}

#[async_trait::async_trait]
impl OneLinerStore for RacingStore {
    async fn get(&self, article_id: i64, prompt_version: &str) -> anyhow::Result<Option<OneLinerResult>> {
        self.inner.get(article_id, prompt_version).await
    }
    async fn insert_new(&self, _row: &OneLinerResult) -> anyhow::Result<InsertOutcome> {
        Ok(InsertOutcome::Conflict)
    }
    async fn update(&self, row: &OneLinerResult) -> anyhow::Result<()> {
        self.inner.update(row).await
    }
}

#[tokio::test]
async fn lost_create_race_falls_back_to_update() {
    let client = scripted();
    let store = Arc::new(RacingStore::default());
    let a = article_42();
    let out = service(client, store.clone(), "v1").get_or_compute(&[&a]).await;

    let row = store.inner.get(42, "v1").await.expect("get").expect("row written via update");
    assert_eq!(row.one_liner, out[&42].one_liner);
    assert_eq!(row.tags, TagScores::clamped(3, 3, 0));
}
