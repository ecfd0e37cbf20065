//! Reference resolution: turn link ids into concrete payloads.
//!
//! Documents and media fields only carry ids. The inclusion side-table
//! fetched alongside the records holds the actual assets and entries; this
//! module looks ids up in it. A miss is never an error: it is logged and
//! reported as `None` so the surrounding content still migrates.

use crate::document::Node;
use crate::pipeline::download::file_name_from_url;
use crate::source::{absolute_asset_url, Asset, Entry, Includes};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Assets and entries reachable by id for one fetched batch.
#[derive(Debug, Default, Clone)]
pub struct InclusionIndex {
    assets: HashMap<String, Asset>,
    entries: HashMap<String, Entry>,
}

impl InclusionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_asset(&mut self, asset: Asset) {
        self.assets.insert(asset.sys.id.clone(), asset);
    }

    pub fn add_entry(&mut self, entry: Entry) {
        self.entries.insert(entry.sys.id.clone(), entry);
    }

    pub fn add_includes(&mut self, includes: Includes) {
        for asset in includes.assets {
            self.add_asset(asset);
        }
        for entry in includes.entries {
            self.add_entry(entry);
        }
    }

    pub fn asset(&self, id: &str) -> Option<&Asset> {
        self.assets.get(id)
    }

    pub fn entry(&self, id: &str) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// A source asset with its file metadata looked up.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaReference {
    pub asset_id: String,
    pub file_name: String,
    pub content_type: String,
    /// Declared size in bytes, when the source reported one.
    pub size_bytes: Option<u64>,
    /// Absolute download URL.
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub title: Option<String>,
}

impl MediaReference {
    fn from_asset(asset: &Asset) -> Option<Self> {
        let file = asset.fields.file.as_ref()?;
        if file.url.is_empty() {
            return None;
        }
        let url = absolute_asset_url(&file.url);
        // Assets uploaded without a name fall back to the URL's last segment.
        let file_name = if file.file_name.trim().is_empty() {
            file_name_from_url(&url).unwrap_or_else(|| asset.sys.id.clone())
        } else {
            file.file_name.clone()
        };
        let image = file.details.image;
        Some(Self {
            asset_id: asset.sys.id.clone(),
            file_name,
            content_type: file.content_type.clone(),
            size_bytes: file.details.size,
            url,
            width: image.map(|i| i.width),
            height: image.map(|i| i.height),
            title: asset.fields.title.clone(),
        })
    }
}

/// One embedded-media id found in a document and its lookup result.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedReference {
    pub asset_id: String,
    /// `None` when the id had no usable entry in the side-table.
    pub media: Option<MediaReference>,
}

/// Kind of target a link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Entry,
    Asset,
}

/// A `{"sys": {"type": "Link", "linkType": …, "id": …}}` field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub id: String,
    pub link_type: LinkType,
}

impl Link {
    /// Parse a link object; anything else yields `None`.
    pub fn from_value(value: &Value) -> Option<Link> {
        let sys = value.get("sys")?;
        if sys.get("type").and_then(Value::as_str) != Some("Link") {
            return None;
        }
        let link_type = match sys.get("linkType").and_then(Value::as_str)? {
            "Entry" => LinkType::Entry,
            "Asset" => LinkType::Asset,
            _ => return None,
        };
        let id = sys.get("id").and_then(Value::as_str)?.to_string();
        Some(Link { id, link_type })
    }

    /// Parse a single link or an array of links, skipping malformed items.
    pub fn many_from_value(value: &Value) -> Vec<Link> {
        match value {
            Value::Array(items) => items.iter().filter_map(Link::from_value).collect(),
            other => Link::from_value(other).into_iter().collect(),
        }
    }
}

/// Every embedded-asset id in `root`, depth-first, first occurrence wins.
pub fn collect_embedded_asset_ids(root: &Node) -> Vec<String> {
    fn walk(node: &Node, seen: &mut HashSet<String>, out: &mut Vec<String>) {
        if let Node::EmbeddedAsset { asset_id } = node {
            if seen.insert(asset_id.clone()) {
                out.push(asset_id.clone());
            }
        }
        for child in node.children() {
            walk(child, seen, out);
        }
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    walk(root, &mut seen, &mut out);
    out
}

/// Resolve every embedded asset in `root` against `index`.
///
/// Order follows [`collect_embedded_asset_ids`]. Unresolved ids are kept
/// with `media: None`.
pub fn resolve_embedded(root: &Node, index: &InclusionIndex) -> Vec<EmbeddedReference> {
    collect_embedded_asset_ids(root)
        .into_iter()
        .map(|asset_id| {
            let media = lookup_asset(&asset_id, index);
            EmbeddedReference { asset_id, media }
        })
        .collect()
}

/// Resolve a media field value (an asset link) to its metadata.
pub fn resolve_asset_link(link: &Link, index: &InclusionIndex) -> Option<MediaReference> {
    if link.link_type != LinkType::Asset {
        warn!("Link {} is not an asset link", link.id);
        return None;
    }
    lookup_asset(&link.id, index)
}

/// Resolve a relation field's link to the linked entry of `entity_type`.
///
/// Returns `None` (with a warning) when the link points at an asset, the
/// entry is missing from the side-table, or the entry has another content
/// type.
pub fn resolve_linked_entity<'a>(
    link: &Link,
    index: &'a InclusionIndex,
    entity_type: &str,
) -> Option<&'a Entry> {
    if link.link_type != LinkType::Entry {
        warn!("Link {} is not an entry link", link.id);
        return None;
    }
    let Some(entry) = index.entry(&link.id) else {
        warn!("Linked entry {} not found in includes", link.id);
        return None;
    };
    match entry.content_type() {
        Some(ct) if ct == entity_type => Some(entry),
        other => {
            warn!(
                "Linked entry {} has content type {:?}, expected '{}'",
                link.id, other, entity_type
            );
            None
        }
    }
}

fn lookup_asset(asset_id: &str, index: &InclusionIndex) -> Option<MediaReference> {
    match index.asset(asset_id) {
        Some(asset) => {
            let media = MediaReference::from_asset(asset);
            if media.is_none() {
                warn!("Asset {} has no file; skipping", asset_id);
            }
            media
        }
        None => {
            warn!("Asset {} not found in includes; skipping", asset_id);
            None
        }
    }
}
