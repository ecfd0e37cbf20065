//! In-memory fakes for the fetch, media and record seams.
#![allow(dead_code)]

use async_trait::async_trait;
use contentful2strapi::pipeline::download::{DownloadedFile, MediaFetcher};
use contentful2strapi::pipeline::upload::{MediaStore, MediaUpload, StoredMedia};
use contentful2strapi::{DestinationError, DestinationId, RecordStore, UploadError};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Route library logs to the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Images ───────────────────────────────────────────────────────────────

/// Encode a smooth RGB gradient in `format`.
pub fn gradient(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, format)
        .unwrap();
    buf.into_inner()
}

pub fn tiny_png() -> Vec<u8> {
    gradient(4, 4, image::ImageFormat::Png)
}

// ── Fetcher ──────────────────────────────────────────────────────────────

/// Serves the same bytes for every URL, after an optional run of failures.
pub struct StaticFetcher {
    bytes: Vec<u8>,
    failures: Mutex<VecDeque<UploadError>>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
    dests: Mutex<Vec<PathBuf>>,
}

impl StaticFetcher {
    pub fn new(bytes: Vec<u8>) -> Arc<Self> {
        Self::failing_first(bytes, vec![])
    }

    pub fn failing_first(bytes: Vec<u8>, failures: Vec<UploadError>) -> Arc<Self> {
        Arc::new(Self {
            bytes,
            failures: Mutex::new(failures.into()),
            calls: AtomicUsize::new(0),
            urls: Mutex::new(vec![]),
            dests: Mutex::new(vec![]),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    /// Every download destination handed to `fetch`, in call order.
    pub fn dests(&self) -> Vec<PathBuf> {
        self.dests.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaFetcher for StaticFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<DownloadedFile, UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        self.dests.lock().unwrap().push(dest.to_path_buf());
        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(e) = failure {
            return Err(e);
        }
        tokio::fs::write(dest, &self.bytes)
            .await
            .map_err(|e| UploadError::Io(e.to_string()))?;
        Ok(DownloadedFile {
            path: dest.to_path_buf(),
        })
    }
}

// ── Media store ──────────────────────────────────────────────────────────

/// Scripted answer of [`ScriptedStore`]; `Ok` once the script runs out.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Ok,
    Status(u16),
    /// Never answers within any sane timeout.
    Hang,
}

pub struct ScriptedStore {
    script: Mutex<VecDeque<Reply>>,
    received: Mutex<Vec<MediaUpload>>,
    calls: AtomicUsize,
    next_id: AtomicU64,
}

impl ScriptedStore {
    pub fn new(script: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            received: Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn always_ok() -> Arc<Self> {
        Self::new(vec![])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<MediaUpload> {
        self.received.lock().unwrap().clone()
    }

    pub fn file_names(&self) -> Vec<String> {
        self.received().into_iter().map(|u| u.file_name).collect()
    }
}

#[async_trait]
impl MediaStore for ScriptedStore {
    async fn upload_media(&self, upload: MediaUpload) -> Result<StoredMedia, UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let file_name = upload.file_name.clone();
        self.received.lock().unwrap().push(upload);
        let reply = self.script.lock().unwrap().pop_front().unwrap_or(Reply::Ok);

        match reply {
            Reply::Ok => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                Ok(StoredMedia {
                    id: id.to_string(),
                    url: format!("https://cms.example/uploads/{file_name}"),
                })
            }
            Reply::Status(status) => Err(UploadError::Status {
                status,
                body: format!("scripted {status}"),
            }),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Err(UploadError::Transport("hung up".into()))
            }
        }
    }
}

// ── Record store ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryRecords {
    created: Mutex<Vec<(String, Value)>>,
    existing: HashMap<(String, String, String), DestinationId>,
    lookups: HashMap<(String, String), HashMap<String, DestinationId>>,
    reject: Option<(String, Value)>,
    fail_lookups: bool,
    next_id: AtomicU64,
}

impl MemoryRecords {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(100),
            ..Self::default()
        }
    }

    pub fn with_existing(mut self, collection: &str, field: &str, value: &str, id: u64) -> Self {
        self.existing.insert(
            (collection.into(), field.into(), value.into()),
            DestinationId::Number(id),
        );
        self
    }

    pub fn with_lookup(mut self, collection: &str, field: &str, entries: &[(&str, u64)]) -> Self {
        let map = entries
            .iter()
            .map(|(k, id)| (k.to_string(), DestinationId::Number(*id)))
            .collect();
        self.lookups.insert((collection.into(), field.into()), map);
        self
    }

    /// Fail `create` whenever the payload has `field == value`.
    pub fn rejecting(mut self, field: &str, value: Value) -> Self {
        self.reject = Some((field.into(), value));
        self
    }

    pub fn failing_lookups(mut self) -> Self {
        self.fail_lookups = true;
        self
    }

    pub fn created(&self) -> Vec<(String, Value)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for MemoryRecords {
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<DestinationId>, DestinationError> {
        Ok(self
            .existing
            .get(&(collection.into(), field.into(), value.into()))
            .cloned())
    }

    async fn create(
        &self,
        collection: &str,
        data: Value,
    ) -> Result<DestinationId, DestinationError> {
        if let Some((field, value)) = &self.reject {
            if data.get(field) == Some(value) {
                return Err(DestinationError::Status {
                    operation: format!("create {collection}"),
                    status: 400,
                    body: format!("{field} is invalid"),
                });
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.created
            .lock()
            .unwrap()
            .push((collection.to_string(), data));
        Ok(DestinationId::Number(id))
    }

    async fn lookup_map(
        &self,
        collection: &str,
        key_field: &str,
    ) -> Result<HashMap<String, DestinationId>, DestinationError> {
        if self.fail_lookups {
            return Err(DestinationError::Transport {
                operation: format!("list {collection}"),
                reason: "connection refused".into(),
            });
        }
        Ok(self
            .lookups
            .get(&(collection.into(), key_field.into()))
            .cloned()
            .unwrap_or_default())
    }
}
