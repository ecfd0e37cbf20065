//! Pipeline stages for moving one record's rich text and media.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and the orchestration in [`crate::migrate`] stays a readable sequence.
//!
//! ## Data Flow
//!
//! ```text
//! document ──▶ resolve ──▶ upload ─────────────────────▶ markdown
//!  (tree)      (ids→assets)  │ download → transcode → retry  (tree→text)
//!                            └─ per asset, sequential
//! ```
//!
//! 1. [`resolve`]  : find embedded-media ids and look them up in the
//!    inclusion side-table
//! 2. [`download`] : fetch the asset into a scoped temp dir
//! 3. [`transcode`]: size-banded resize and re-encode of raster images
//! 4. [`retry`]    : attempt ceiling, backoff and timeout policies
//! 5. [`upload`]   : drive 2–4 for one asset and return the destination id
//! 6. [`markdown`] : render the document, substituting uploaded URLs

pub mod download;
pub mod markdown;
pub mod resolve;
pub mod retry;
pub mod transcode;
pub mod upload;
