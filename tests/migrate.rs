//! Whole-run behaviour of the migrator against in-memory fakes.

mod common;

use async_trait::async_trait;
use common::{init_tracing, tiny_png, MemoryRecords, Reply, ScriptedStore, StaticFetcher};
use contentful2strapi::output::RecordResult;
use contentful2strapi::source::EntryCollection;
use contentful2strapi::{
    EntryBatch, EntrySource, MigrateError, MigrationConfig, MigrationProgressCallback, Migrator,
    ModelMapping, PacingPolicy, RecordOutcome, StepSummary,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ── Fixtures ─────────────────────────────────────────────────────────────

/// Serves one canned page per content type; `hang_on` never answers.
struct FakeSource {
    pages: HashMap<String, Value>,
    hang_on: Option<String>,
}

impl FakeSource {
    fn new(pages: &[(&str, Value)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(ct, page)| (ct.to_string(), page.clone()))
                .collect(),
            hang_on: None,
        }
    }

    fn hanging_on(mut self, content_type: &str) -> Self {
        self.hang_on = Some(content_type.to_string());
        self
    }
}

#[async_trait]
impl EntrySource for FakeSource {
    async fn fetch_entries(
        &self,
        content_type: &str,
        _page_size: usize,
        _include: u8,
    ) -> Result<EntryBatch, MigrateError> {
        if self.hang_on.as_deref() == Some(content_type) {
            tokio::time::sleep(Duration::from_secs(86_400)).await;
        }
        let Some(page) = self.pages.get(content_type) else {
            return Ok(EntryBatch::default());
        };
        let collection: EntryCollection = serde_json::from_value(page.clone())
            .map_err(|e| MigrateError::SourceDecode(e.to_string()))?;
        Ok(EntryBatch::from(collection))
    }
}

fn link(kind: &str, id: &str) -> Value {
    json!({ "sys": { "type": "Link", "linkType": kind, "id": id } })
}

fn png_asset(id: &str) -> Value {
    json!({
        "sys": { "id": id, "type": "Asset" },
        "fields": {
            "title": id,
            "file": {
                "url": format!("//images.ctfassets.net/space/{id}/{id}.png"),
                "fileName": format!("{id}.png"),
                "contentType": "image/png",
                "details": { "size": 100, "image": { "width": 4, "height": 4 } }
            }
        }
    })
}

fn post(id: &str, slug: &str) -> Value {
    json!({
        "sys": { "id": id, "type": "Entry", "contentType": { "sys": { "id": "blogPost" } } },
        "fields": {
            "slug": slug,
            "title": format!("Post {slug}"),
            "body": {
                "nodeType": "document", "data": {},
                "content": [
                    { "nodeType": "paragraph", "data": {}, "content": [
                        { "nodeType": "text", "value": "Intro", "marks": [], "data": {} }
                    ] },
                    { "nodeType": "embedded-asset-block", "content": [],
                      "data": { "target": link("Asset", "inline") } },
                    { "nodeType": "embedded-asset-block", "content": [],
                      "data": { "target": link("Asset", "ghost") } }
                ]
            },
            "hero": link("Asset", "hero"),
            "gallery": [link("Asset", "g1"), link("Asset", "g2")],
            "tags": [link("Entry", "t-rust")]
        }
    })
}

fn posts_page(items: Vec<Value>) -> Value {
    let total = items.len();
    json!({
        "total": total, "skip": 0, "limit": 100,
        "items": items,
        "includes": {
            "Asset": [png_asset("inline"), png_asset("hero"), png_asset("g1"), png_asset("g2")],
            "Entry": [
                { "sys": { "id": "t-rust", "type": "Entry", "contentType": { "sys": { "id": "tag" } } },
                  "fields": { "name": "rust" } }
            ]
        }
    })
}

fn posts_mapping() -> ModelMapping {
    serde_json::from_value(json!({
        "content_type": "blogPost",
        "collection": "articles",
        "natural_key": "slug",
        "fields": [
            { "from": "slug", "to": "slug" },
            { "from": "title", "to": "title" },
            { "from": "body", "to": "content", "kind": { "type": "rich_text" } },
            { "from": "hero", "to": "cover", "kind": { "type": "media" } },
            { "from": "gallery", "to": "gallery", "kind": { "type": "gallery" } },
            { "from": "tags", "to": "tags", "kind": {
                "type": "relation", "content_type": "tag", "collection": "tags",
                "source_field": "name", "match_field": "name", "many": true } }
        ]
    }))
    .unwrap()
}

fn config(pacing: PacingPolicy) -> MigrationConfig {
    MigrationConfig::builder().pacing(pacing).build().unwrap()
}

struct Harness {
    fetcher: Arc<StaticFetcher>,
    store: Arc<ScriptedStore>,
    records: Arc<MemoryRecords>,
    migrator: Migrator,
}

fn harness(config: MigrationConfig, store: Arc<ScriptedStore>, records: MemoryRecords) -> Harness {
    init_tracing();
    let fetcher = StaticFetcher::new(tiny_png());
    let records = Arc::new(records);
    let migrator = Migrator::new(config, fetcher.clone(), store.clone(), records.clone());
    Harness {
        fetcher,
        store,
        records,
        migrator,
    }
}

fn tag_lookup() -> MemoryRecords {
    MemoryRecords::new().with_lookup("tags", "name", &[("rust", 9)])
}

// ── Full record ──────────────────────────────────────────────────────────

#[tokio::test]
async fn full_record_is_assembled_in_order() {
    let h = harness(config(PacingPolicy::none()), ScriptedStore::always_ok(), tag_lookup());
    let source = FakeSource::new(&[("blogPost", posts_page(vec![post("p1", "hello")]))]);

    let stats = h.migrator.run(&source, &[posts_mapping()]).await.unwrap();

    assert_eq!(stats.created(), 1);
    assert_eq!(stats.failed(), 0);
    // embedded, then singular media, then gallery
    assert_eq!(
        h.store.file_names(),
        vec!["inline.png", "hero.png", "g1.png", "g2.png"]
    );
    assert_eq!(
        h.fetcher.urls()[0],
        "https://images.ctfassets.net/space/inline/inline.png"
    );

    let created = h.records.created();
    assert_eq!(created.len(), 1);
    let (collection, payload) = &created[0];
    assert_eq!(collection, "articles");
    assert_eq!(
        payload,
        &json!({
            "slug": "hello",
            "title": "Post hello",
            "content": "Intro\n\n![inline.png](https://cms.example/uploads/inline.png)",
            "cover": 2,
            "gallery": [3, 4],
            "tags": [9]
        })
    );

    let result = &stats.records[0];
    assert_eq!(result.source_id, "p1");
    assert_eq!(result.uploads_attempted, 4);
    assert_eq!(result.uploads_failed, 0);
    // the unresolved "ghost" embed
    assert_eq!(result.diagnostics, 1);
}

#[tokio::test]
async fn uploads_are_paced_within_a_record() {
    let pacing = PacingPolicy {
        base: Duration::from_millis(40),
        step: Duration::from_millis(20),
        max: Duration::from_millis(100),
    };
    let h = harness(config(pacing), ScriptedStore::always_ok(), tag_lookup());
    let source = FakeSource::new(&[("blogPost", posts_page(vec![post("p1", "hello")]))]);

    let started = Instant::now();
    h.migrator.run(&source, &[posts_mapping()]).await.unwrap();

    // four uploads: 0 + 40 + 60 + 80 ms of pauses
    assert!(started.elapsed() >= Duration::from_millis(180));
    assert_eq!(h.store.calls(), 4);
}

// ── Failure scopes ───────────────────────────────────────────────────────

#[tokio::test]
async fn existing_records_are_skipped_without_uploads() {
    let records = tag_lookup().with_existing("articles", "slug", "hello", 7);
    let h = harness(config(PacingPolicy::none()), ScriptedStore::always_ok(), records);
    let source = FakeSource::new(&[("blogPost", posts_page(vec![post("p1", "hello")]))]);

    let stats = h.migrator.run(&source, &[posts_mapping()]).await.unwrap();

    assert_eq!(stats.skipped(), 1);
    assert!(matches!(
        &stats.records[0].outcome,
        RecordOutcome::Skipped { existing_id } if existing_id.to_string() == "7"
    ));
    assert_eq!(h.fetcher.calls(), 0);
    assert_eq!(h.store.calls(), 0);
    assert!(h.records.created().is_empty());
}

#[tokio::test]
async fn failed_create_does_not_stop_the_step() {
    let records = tag_lookup().rejecting("slug", json!("bad"));
    let h = harness(config(PacingPolicy::none()), ScriptedStore::always_ok(), records);
    let source = FakeSource::new(&[(
        "blogPost",
        posts_page(vec![post("p1", "bad"), post("p2", "good")]),
    )]);

    let stats = h.migrator.run(&source, &[posts_mapping()]).await.unwrap();

    assert_eq!(stats.failed(), 1);
    assert_eq!(stats.created(), 1);
    assert!(stats.records[0].is_failed());
    assert!(matches!(&stats.records[1].outcome, RecordOutcome::Created { .. }));
    let created = h.records.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].1["slug"], "good");
    // media uploaded for the failed record stay uploaded
    assert_eq!(h.store.calls(), 8);
}

#[tokio::test]
async fn failed_upload_leaves_field_empty() {
    let mapping: ModelMapping = serde_json::from_value(json!({
        "content_type": "blogPost",
        "collection": "articles",
        "fields": [
            { "from": "slug", "to": "slug" },
            { "from": "hero", "to": "cover", "kind": { "type": "media" } }
        ]
    }))
    .unwrap();
    let store = ScriptedStore::new(vec![Reply::Status(400)]);
    let h = harness(config(PacingPolicy::none()), store, MemoryRecords::new());
    let source = FakeSource::new(&[("blogPost", posts_page(vec![post("p1", "hello")]))]);

    let stats = h.migrator.run(&source, &[mapping]).await.unwrap();

    assert_eq!(stats.created(), 1);
    assert_eq!(stats.uploads_failed(), 1);
    assert_eq!(h.records.created()[0].1, json!({ "slug": "hello", "cover": null }));
}

#[tokio::test]
async fn lookup_failure_aborts_the_run() {
    let h = harness(
        config(PacingPolicy::none()),
        ScriptedStore::always_ok(),
        MemoryRecords::new().failing_lookups(),
    );
    let source = FakeSource::new(&[("blogPost", posts_page(vec![post("p1", "hello")]))]);

    let err = h.migrator.run(&source, &[posts_mapping()]).await.unwrap_err();

    assert!(matches!(err, MigrateError::Destination(_)), "got {err:?}");
    assert!(h.records.created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_budget_stops_a_stuck_run() {
    let tags: ModelMapping = serde_json::from_value(json!({
        "content_type": "tag",
        "collection": "tags",
        "fields": [ { "from": "name", "to": "name" } ]
    }))
    .unwrap();
    let tag_page = json!({
        "items": [
            { "sys": { "id": "t1" }, "fields": { "name": "rust" } },
            { "sys": { "id": "t2" }, "fields": { "name": "go" } }
        ]
    });
    let source = FakeSource::new(&[("tag", tag_page)]).hanging_on("blogPost");
    let config = MigrationConfig::builder()
        .pacing(PacingPolicy::none())
        .run_budget_secs(240)
        .build()
        .unwrap();
    let h = harness(config, ScriptedStore::always_ok(), tag_lookup());

    let err = h
        .migrator
        .run(&source, &[tags, posts_mapping()])
        .await
        .unwrap_err();

    match err {
        MigrateError::RunTimeout {
            budget_secs,
            completed,
            created,
            skipped,
            failed,
        } => {
            assert_eq!(budget_secs, 240);
            assert_eq!(completed, 2);
            assert_eq!((created, skipped, failed), (2, 0, 0));
        }
        other => panic!("expected RunTimeout, got {other:?}"),
    }
    assert_eq!(h.records.created().len(), 2);
}

// ── Progress ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl MigrationProgressCallback for Recorder {
    fn on_step_start(&self, content_type: &str, total_records: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("step {content_type} {total_records}"));
    }

    fn on_upload(&self, _source_id: &str, file_name: &str, succeeded: bool) {
        self.events
            .lock()
            .unwrap()
            .push(format!("upload {file_name} {succeeded}"));
    }

    fn on_record_complete(&self, index: usize, total: usize, result: &RecordResult) {
        self.events
            .lock()
            .unwrap()
            .push(format!("record {index}/{total} {}", result.source_id));
    }

    fn on_step_complete(&self, summary: &StepSummary) {
        self.events
            .lock()
            .unwrap()
            .push(format!("done {} created={}", summary.content_type, summary.created));
    }
}

#[tokio::test]
async fn progress_events_follow_the_run() {
    let recorder = Arc::new(Recorder::default());
    let config = MigrationConfig::builder()
        .pacing(PacingPolicy::none())
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let h = harness(config, ScriptedStore::always_ok(), tag_lookup());
    let source = FakeSource::new(&[("blogPost", posts_page(vec![post("p1", "hello")]))]);

    h.migrator.run(&source, &[posts_mapping()]).await.unwrap();

    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec![
            "step blogPost 1",
            "upload inline.png true",
            "upload hero.png true",
            "upload g1.png true",
            "upload g2.png true",
            "record 1/1 p1",
            "done blogPost created=1",
        ]
    );
}
