//! Migration runner: one mapped content model at a time, one record at a
//! time.
//!
//! ## Per-record sequence
//!
//! ```text
//! existence check ─▶ parse rich text ─▶ uploads ─▶ convert ─▶ assemble ─▶ create
//!   (natural key)                        │
//!                                        ├─ 1. media embedded in rich-text fields
//!                                        ├─ 2. singular media fields
//!                                        └─ 3. gallery fields
//! ```
//!
//! Uploads run strictly one after another, in the order above and in field
//! declaration order within each group, with a pause between them that grows
//! with the number of uploads already made for the record.
//!
//! ## Failure scopes
//!
//! * A failed upload leaves its field empty; the record is still written.
//! * A failed record write is stored as [`RecordOutcome::Failed`] and the
//!   run continues with the next record. Media already uploaded for it stay
//!   in the destination, unattached.
//! * A failed lookup-map build or source fetch aborts the run.
//! * Exceeding the run budget aborts the run with
//!   [`MigrateError::RunTimeout`].

use crate::config::MigrationConfig;
use crate::destination::{DestinationId, RecordStore};
use crate::document::Node;
use crate::error::MigrateError;
use crate::output::{MigrationStats, RecordOutcome, RecordResult, StepSummary};
use crate::pipeline::download::MediaFetcher;
use crate::pipeline::markdown::{convert_with_diagnostics, ResolvedMedia};
use crate::pipeline::resolve::{
    resolve_asset_link, resolve_embedded, resolve_linked_entity, InclusionIndex, Link,
    MediaReference,
};
use crate::pipeline::upload::{MediaStore, UploadPipeline, UploadResult};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::source::{Entry, EntryBatch, EntrySource};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

// ── Mapping ──────────────────────────────────────────────────────────────

/// Ordered list of content models to migrate, usually loaded from JSON.
///
/// ```json
/// { "steps": [
///   { "content_type": "tag", "collection": "tags", "natural_key": "name",
///     "fields": [ { "from": "name", "to": "name" } ] },
///   { "content_type": "blogPost", "collection": "articles", "natural_key": "slug",
///     "fields": [
///       { "from": "slug", "to": "slug" },
///       { "from": "body", "to": "content", "kind": { "type": "rich_text" } },
///       { "from": "heroImage", "to": "cover", "kind": { "type": "media" } },
///       { "from": "tags", "to": "tags", "kind": { "type": "relation",
///         "content_type": "tag", "collection": "tags",
///         "source_field": "name", "match_field": "name", "many": true } }
///     ] }
/// ] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingFile {
    pub steps: Vec<ModelMapping>,
}

impl MappingFile {
    pub fn load(path: &Path) -> Result<Self, MigrateError> {
        let text = std::fs::read_to_string(path).map_err(|e| MigrateError::MappingLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let file: MappingFile =
            serde_json::from_str(&text).map_err(|e| MigrateError::MappingLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        file.validate()?;
        Ok(file)
    }

    pub fn validate(&self) -> Result<(), MigrateError> {
        for step in &self.steps {
            step.validate()?;
        }
        Ok(())
    }

    /// Steps to run: all of them, or only those for `content_type`.
    pub fn select(&self, only: Option<&str>) -> Vec<ModelMapping> {
        self.steps
            .iter()
            .filter(|s| only.is_none_or(|ct| s.content_type == ct))
            .cloned()
            .collect()
    }
}

/// How one source content model maps onto one destination collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMapping {
    /// Source content type id, e.g. `blogPost`.
    pub content_type: String,
    /// Destination collection API path, e.g. `articles`.
    pub collection: String,
    /// Destination field used to detect records migrated by an earlier run.
    #[serde(default)]
    pub natural_key: Option<String>,
    pub fields: Vec<FieldRule>,
}

impl ModelMapping {
    fn validate(&self) -> Result<(), MigrateError> {
        if self.content_type.is_empty() || self.collection.is_empty() {
            return Err(MigrateError::InvalidConfig(
                "every step needs a content_type and a collection".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for rule in &self.fields {
            if !seen.insert(rule.to.as_str()) {
                return Err(MigrateError::InvalidConfig(format!(
                    "'{}' maps two fields onto '{}'",
                    self.content_type, rule.to
                )));
            }
        }
        if let Some(key) = &self.natural_key {
            let plain = self
                .fields
                .iter()
                .any(|r| &r.to == key && r.kind == FieldKind::Plain);
            if !plain {
                return Err(MigrateError::InvalidConfig(format!(
                    "natural key '{}' of '{}' must be a plain field",
                    key, self.content_type
                )));
            }
        }
        Ok(())
    }

    /// Source value of the natural key, as a string.
    pub fn natural_key_value(&self, entry: &Entry) -> Option<String> {
        let key = self.natural_key.as_deref()?;
        let rule = self.fields.iter().find(|r| r.to == key)?;
        entry.field(&rule.from).and_then(value_as_key)
    }
}

/// One source field → one destination field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub kind: FieldKind,
}

/// How a field value is translated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// Copied unchanged.
    #[default]
    Plain,
    /// Rich-text document rendered to Markdown.
    RichText,
    /// Single asset link → destination media id.
    Media,
    /// Array of asset links → destination media ids.
    Gallery,
    /// Entry link(s) → destination record id(s) via a lookup map.
    Relation(RelationRule),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRule {
    /// Content type the linked entries must have.
    pub content_type: String,
    /// Destination collection holding the related records.
    pub collection: String,
    /// Field of the linked source entry carrying the match value.
    pub source_field: String,
    /// Field of the destination records compared against it.
    pub match_field: String,
    #[serde(default)]
    pub many: bool,
}

fn value_as_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ── Lookups ──────────────────────────────────────────────────────────────

/// Read-only `(collection, field) → value → id` maps, built once per step.
#[derive(Debug, Clone, Default)]
pub struct Lookups {
    maps: HashMap<(String, String), HashMap<String, DestinationId>>,
}

impl Lookups {
    pub fn insert(
        &mut self,
        collection: impl Into<String>,
        field: impl Into<String>,
        map: HashMap<String, DestinationId>,
    ) {
        self.maps.insert((collection.into(), field.into()), map);
    }

    pub fn get(&self, collection: &str, field: &str, key: &str) -> Option<&DestinationId> {
        self.maps
            .get(&(collection.to_string(), field.to_string()))?
            .get(key)
    }

    fn contains(&self, collection: &str, field: &str) -> bool {
        self.maps
            .contains_key(&(collection.to_string(), field.to_string()))
    }
}

// ── Migrator ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RecordTally {
    uploads_attempted: usize,
    uploads_failed: usize,
    diagnostics: usize,
}

/// Drives the per-record sequence against the destination.
pub struct Migrator {
    config: MigrationConfig,
    uploads: UploadPipeline,
    records: Arc<dyn RecordStore>,
    progress: ProgressCallback,
}

impl Migrator {
    pub fn new(
        config: MigrationConfig,
        fetcher: Arc<dyn MediaFetcher>,
        media: Arc<dyn MediaStore>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        let uploads = UploadPipeline::new(fetcher, media, &config);
        let progress = config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));
        Self {
            config,
            uploads,
            records,
            progress,
        }
    }

    /// Fetch and migrate every step in order, within the run budget.
    pub async fn run(
        &self,
        source: &dyn EntrySource,
        steps: &[ModelMapping],
    ) -> Result<MigrationStats, MigrateError> {
        let started = Instant::now();
        let mut stats = MigrationStats::default();

        let outcome = tokio::time::timeout(
            self.config.run_budget(),
            self.run_steps(source, steps, &mut stats),
        )
        .await;
        stats.total_duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(())) => {
                info!(
                    "Migration finished: {} created, {} skipped, {} failed in {}ms",
                    stats.created(),
                    stats.skipped(),
                    stats.failed(),
                    stats.total_duration_ms
                );
                Ok(stats)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    "Run budget of {}s exhausted after {} records: {} created, {} skipped, {} failed",
                    self.config.run_budget_secs,
                    stats.processed(),
                    stats.created(),
                    stats.skipped(),
                    stats.failed()
                );
                Err(MigrateError::RunTimeout {
                    budget_secs: self.config.run_budget_secs,
                    completed: stats.processed(),
                    created: stats.created(),
                    skipped: stats.skipped(),
                    failed: stats.failed(),
                })
            }
        }
    }

    async fn run_steps(
        &self,
        source: &dyn EntrySource,
        steps: &[ModelMapping],
        stats: &mut MigrationStats,
    ) -> Result<(), MigrateError> {
        for mapping in steps {
            info!(
                "Step '{}' → '{}'",
                mapping.content_type, mapping.collection
            );
            let batch = source
                .fetch_entries(
                    &mapping.content_type,
                    self.config.page_size,
                    self.config.include_depth,
                )
                .await?;
            let summary = self.migrate_batch(mapping, &batch, &mut stats.records).await?;
            stats.steps.push(summary);
        }
        Ok(())
    }

    async fn migrate_batch(
        &self,
        mapping: &ModelMapping,
        batch: &EntryBatch,
        results: &mut Vec<RecordResult>,
    ) -> Result<StepSummary, MigrateError> {
        let lookups = self.build_lookups(mapping).await?;
        let total = batch.records.len();
        let mut summary = StepSummary::new(&mapping.content_type, &mapping.collection);
        self.progress.on_step_start(&mapping.content_type, total);

        for (i, entry) in batch.records.iter().enumerate() {
            self.progress.on_record_start(i + 1, total, &entry.sys.id);
            let result = self
                .migrate_record(mapping, entry, &batch.includes, &lookups)
                .await;
            summary.record(&result);
            self.progress.on_record_complete(i + 1, total, &result);
            results.push(result);
        }

        info!(
            "Step '{}': {} created, {} skipped, {} failed, {} upload(s) failed",
            mapping.content_type,
            summary.created,
            summary.skipped,
            summary.failed,
            summary.uploads_failed
        );
        self.progress.on_step_complete(&summary);
        Ok(summary)
    }

    /// Load every lookup map the step's relation fields need.
    pub async fn build_lookups(&self, mapping: &ModelMapping) -> Result<Lookups, MigrateError> {
        let mut lookups = Lookups::default();
        for rule in &mapping.fields {
            let FieldKind::Relation(rel) = &rule.kind else {
                continue;
            };
            if lookups.contains(&rel.collection, &rel.match_field) {
                continue;
            }
            let map = self
                .records
                .lookup_map(&rel.collection, &rel.match_field)
                .await?;
            lookups.insert(&rel.collection, &rel.match_field, map);
        }
        Ok(lookups)
    }

    /// Migrate one source record. Never fails: the outcome says what
    /// happened.
    pub async fn migrate_record(
        &self,
        mapping: &ModelMapping,
        entry: &Entry,
        index: &InclusionIndex,
        lookups: &Lookups,
    ) -> RecordResult {
        let started = Instant::now();
        let source_id = entry.sys.id.as_str();
        let mut tally = RecordTally::default();

        let outcome = self
            .migrate_record_inner(mapping, entry, index, lookups, &mut tally)
            .await;

        match &outcome {
            RecordOutcome::Created { destination_id } => {
                info!("Created {} {} from {}", mapping.collection, destination_id, source_id)
            }
            RecordOutcome::Skipped { existing_id } => {
                info!("Skipped {}: already exists as {}", source_id, existing_id)
            }
            RecordOutcome::Failed { error } => warn!("Record {} failed: {}", source_id, error),
        }

        RecordResult {
            source_id: source_id.to_string(),
            outcome,
            uploads_attempted: tally.uploads_attempted,
            uploads_failed: tally.uploads_failed,
            diagnostics: tally.diagnostics,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn migrate_record_inner(
        &self,
        mapping: &ModelMapping,
        entry: &Entry,
        index: &InclusionIndex,
        lookups: &Lookups,
        tally: &mut RecordTally,
    ) -> RecordOutcome {
        let source_id = entry.sys.id.as_str();

        // ── Existence check ──
        if let Some(key_field) = &mapping.natural_key {
            match mapping.natural_key_value(entry) {
                Some(value) => {
                    match self
                        .records
                        .find_by_field(&mapping.collection, key_field, &value)
                        .await
                    {
                        Ok(Some(existing_id)) => return RecordOutcome::Skipped { existing_id },
                        Ok(None) => {}
                        Err(error) => return RecordOutcome::Failed { error },
                    }
                }
                None => warn!(
                    "Record {} has no '{}'; existence check skipped",
                    source_id, key_field
                ),
            }
        }

        // ── Rich text ──
        let mut documents: HashMap<usize, Node> = HashMap::new();
        for (i, rule) in mapping.fields.iter().enumerate() {
            if rule.kind != FieldKind::RichText {
                continue;
            }
            match entry.field(&rule.from) {
                None | Some(Value::Null) => {}
                Some(value) => match serde_json::from_value::<Node>(value.clone()) {
                    Ok(doc) => {
                        documents.insert(i, doc);
                    }
                    Err(e) => {
                        warn!(
                            "Record {}: '{}' is not a rich-text document: {}",
                            source_id, rule.from, e
                        );
                        tally.diagnostics += 1;
                    }
                },
            }
        }

        // ── Uploads, in fixed order ──
        let mut resolved = ResolvedMedia::new();
        for (i, rule) in mapping.fields.iter().enumerate() {
            let Some(doc) = documents.get(&i) else {
                continue;
            };
            for reference in resolve_embedded(doc, index) {
                if resolved.get(&reference.asset_id).is_some() {
                    continue;
                }
                // Unresolved ids are reported by the converter.
                let Some(media) = reference.media else {
                    continue;
                };
                let uploaded = self.upload_paced(&media, &rule.to, source_id, tally).await;
                resolved.insert(
                    media.asset_id.clone(),
                    media.file_name.clone(),
                    uploaded.map(|u| u.url),
                );
            }
        }

        let mut media_values: HashMap<usize, Value> = HashMap::new();
        for (i, rule) in mapping.fields.iter().enumerate() {
            if rule.kind != FieldKind::Media {
                continue;
            }
            let Some(link) = entry.field(&rule.from).and_then(Link::from_value) else {
                continue;
            };
            let value = match resolve_asset_link(&link, index) {
                Some(media) => self
                    .upload_paced(&media, &rule.to, source_id, tally)
                    .await
                    .map(|u| media_id_value(&u))
                    .unwrap_or(Value::Null),
                None => {
                    tally.diagnostics += 1;
                    Value::Null
                }
            };
            media_values.insert(i, value);
        }

        for (i, rule) in mapping.fields.iter().enumerate() {
            if rule.kind != FieldKind::Gallery {
                continue;
            }
            let links = entry
                .field(&rule.from)
                .map(Link::many_from_value)
                .unwrap_or_default();
            let mut ids = Vec::with_capacity(links.len());
            for link in &links {
                match resolve_asset_link(link, index) {
                    Some(media) => {
                        if let Some(u) = self.upload_paced(&media, &rule.to, source_id, tally).await
                        {
                            ids.push(media_id_value(&u));
                        }
                    }
                    None => tally.diagnostics += 1,
                }
            }
            media_values.insert(i, Value::Array(ids));
        }

        // ── Payload ──
        let mut payload = Map::new();
        for (i, rule) in mapping.fields.iter().enumerate() {
            let value = match &rule.kind {
                FieldKind::Plain => entry.field(&rule.from).cloned().unwrap_or(Value::Null),
                FieldKind::RichText => match documents.get(&i) {
                    Some(doc) => {
                        let conversion = convert_with_diagnostics(doc, &resolved);
                        tally.diagnostics += conversion.diagnostics.len();
                        Value::String(conversion.markdown)
                    }
                    None => Value::Null,
                },
                FieldKind::Media => media_values.remove(&i).unwrap_or(Value::Null),
                FieldKind::Gallery => media_values
                    .remove(&i)
                    .unwrap_or_else(|| Value::Array(vec![])),
                FieldKind::Relation(rel) => {
                    relation_value(rel, entry.field(&rule.from), index, lookups, tally)
                }
            };
            payload.insert(rule.to.clone(), value);
        }

        debug!("Record {}: payload has {} field(s)", source_id, payload.len());
        match self
            .records
            .create(&mapping.collection, Value::Object(payload))
            .await
        {
            Ok(destination_id) => RecordOutcome::Created { destination_id },
            Err(error) => RecordOutcome::Failed { error },
        }
    }

    async fn upload_paced(
        &self,
        media: &MediaReference,
        field_hint: &str,
        source_id: &str,
        tally: &mut RecordTally,
    ) -> Option<UploadResult> {
        let pause = self.config.pacing.delay_before(tally.uploads_attempted);
        if !pause.is_zero() {
            debug!("Pausing {}ms before next upload", pause.as_millis());
            sleep(pause).await;
        }
        tally.uploads_attempted += 1;

        let uploaded = self
            .uploads
            .upload(
                &media.url,
                &media.file_name,
                &media.content_type,
                Some(field_hint),
            )
            .await;
        if uploaded.is_none() {
            tally.uploads_failed += 1;
            warn!(
                "Record {}: '{}' could not be uploaded; field '{}' left without it",
                source_id, media.file_name, field_hint
            );
        }
        self.progress
            .on_upload(source_id, &media.file_name, uploaded.is_some());
        uploaded
    }
}

fn media_id_value(uploaded: &UploadResult) -> Value {
    DestinationId::parse(&uploaded.destination_id).to_value()
}

fn relation_value(
    rel: &RelationRule,
    field: Option<&Value>,
    index: &InclusionIndex,
    lookups: &Lookups,
    tally: &mut RecordTally,
) -> Value {
    let links = field.map(Link::many_from_value).unwrap_or_default();
    let mut ids = Vec::with_capacity(links.len());

    for link in &links {
        let key = resolve_linked_entity(link, index, &rel.content_type)
            .and_then(|linked| linked.field(&rel.source_field))
            .and_then(value_as_key);
        let Some(key) = key else {
            tally.diagnostics += 1;
            continue;
        };
        match lookups.get(&rel.collection, &rel.match_field, &key) {
            Some(id) => ids.push(id.to_value()),
            None => {
                warn!(
                    "No '{}' record with {} = '{}'",
                    rel.collection, rel.match_field, key
                );
                tally.diagnostics += 1;
            }
        }
    }

    if rel.many {
        Value::Array(ids)
    } else {
        ids.into_iter().next().unwrap_or(Value::Null)
    }
}
