//! # contentful2strapi
//!
//! Move content from a Contentful space into a Strapi instance: rich text
//! is rendered to Markdown, referenced media are re-uploaded, and relations
//! are re-established by id.
//!
//! ## Why this crate?
//!
//! Copying plain fields between two CMSs is trivial. The hard parts are the
//! rich-text documents, whose embedded images live in a side-table and must
//! be uploaded before the text can point at them, and the media themselves,
//! which are often too large for the destination and whose uploads fail
//! transiently. This crate handles both with a deterministic converter and a
//! retrying, transcoding upload pipeline.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Contentful entries (+ includes side-table)
//!  │
//!  ├─ 1. Fetch     paginated delivery API, includes merged by id
//!  ├─ 2. Check     natural-key lookup; existing records are skipped
//!  ├─ 3. Resolve   embedded-media ids and media links → asset metadata
//!  ├─ 4. Upload    download → transcode → upload, retried with backoff
//!  ├─ 5. Convert   rich-text tree → Markdown with uploaded URLs
//!  └─ 6. Create    Strapi record with media ids and relation ids
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use contentful2strapi::{convert, Node, ResolvedMedia};
//!
//! let doc: Node = serde_json::from_str(r#"{
//!     "nodeType": "document", "data": {}, "content": [
//!         { "nodeType": "paragraph", "data": {}, "content": [
//!             { "nodeType": "text", "value": "Hello ", "marks": [], "data": {} },
//!             { "nodeType": "text", "value": "world", "marks": [{ "type": "bold" }], "data": {} }
//!         ] }
//!     ]
//! }"#).unwrap();
//!
//! assert_eq!(convert(&doc, &ResolvedMedia::new()), "Hello **world**");
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `cf2strapi` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod destination;
pub mod document;
pub mod error;
pub mod migrate;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod source;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{MigrationConfig, MigrationConfigBuilder};
pub use destination::{DestinationId, RecordStore, StrapiClient, StrapiConfig};
pub use document::{Marks, Node, TextRun};
pub use error::{DestinationError, MigrateError, UploadError};
pub use migrate::{FieldKind, FieldRule, Lookups, MappingFile, Migrator, ModelMapping, RelationRule};
pub use output::{MigrationStats, RecordOutcome, RecordResult, StepSummary};
pub use pipeline::download::{HttpFetcher, MediaFetcher};
pub use pipeline::markdown::{convert, convert_with_diagnostics, Conversion, Diagnostic, ResolvedMedia};
pub use pipeline::resolve::{resolve_embedded, resolve_linked_entity, InclusionIndex, MediaReference};
pub use pipeline::retry::{PacingPolicy, RetryPolicy, UploadTimeoutPolicy};
pub use pipeline::transcode::{decide, transcode, TranscodeDecision};
pub use pipeline::upload::{MediaStore, UploadPipeline, UploadReport, UploadResult};
pub use progress::{MigrationProgressCallback, NoopProgressCallback, ProgressCallback};
pub use source::{ContentfulClient, ContentfulConfig, Entry, EntryBatch, EntrySource};
