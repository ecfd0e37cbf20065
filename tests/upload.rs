//! Upload pipeline behaviour against scripted fakes.
//!
//! Backoff and timeout tests run on paused time, so the 3 s / 6 s waits and
//! 30 s timeouts are asserted without real waiting.

mod common;

use common::{gradient, tiny_png, Reply, ScriptedStore, StaticFetcher};
use contentful2strapi::pipeline::retry::AttemptState;
use contentful2strapi::{RetryPolicy, UploadError, UploadPipeline, UploadTimeoutPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn pipeline(fetcher: Arc<StaticFetcher>, store: Arc<ScriptedStore>) -> UploadPipeline {
    UploadPipeline::with_policies(
        fetcher,
        store,
        RetryPolicy::default(),
        UploadTimeoutPolicy::default(),
    )
}

const PDF_URL: &str = "https://assets.example/space/doc.pdf";

/// Every directory the fetcher downloaded into must be gone.
fn assert_temp_dirs_removed(fetcher: &StaticFetcher) {
    let dests = fetcher.dests();
    assert!(!dests.is_empty(), "fetcher was never called");
    for dest in dests {
        let dir = dest.parent().expect("download path has a parent");
        assert!(!dir.exists(), "{} left behind", dir.display());
    }
}

// ── Retry ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn three_503s_exhaust_attempts_with_backoff() {
    let fetcher = StaticFetcher::new(b"%PDF-1.4 minimal".to_vec());
    let store = ScriptedStore::new(vec![Reply::Status(503); 3]);
    let p = pipeline(fetcher.clone(), store.clone());

    let started = Instant::now();
    let report = p
        .upload_with_report(PDF_URL, "doc.pdf", "application/pdf", Some("attachment"))
        .await;

    assert!(report.result.is_none());
    assert_eq!(store.calls(), 3, "never a fourth attempt");
    assert_eq!(report.attempts, 3);
    assert_eq!(
        report.delays,
        vec![Duration::from_millis(3_000), Duration::from_millis(6_000)]
    );
    assert_eq!(report.final_state, AttemptState::Exhausted { attempts: 3 });
    assert!(started.elapsed() >= Duration::from_millis(9_000));
    // prepared once, reused by later attempts
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn http_400_is_not_retried() {
    let fetcher = StaticFetcher::new(b"%PDF-1.4 minimal".to_vec());
    let store = ScriptedStore::new(vec![Reply::Status(400)]);
    let p = pipeline(fetcher, store.clone());

    let started = Instant::now();
    let report = p
        .upload_with_report(PDF_URL, "doc.pdf", "application/pdf", None)
        .await;

    assert!(report.result.is_none());
    assert_eq!(store.calls(), 1);
    assert!(report.delays.is_empty());
    assert_eq!(report.final_state, AttemptState::Terminal { attempts: 1 });
    assert!(matches!(
        report.last_error,
        Some(UploadError::Status { status: 400, .. })
    ));
    assert!(started.elapsed() < Duration::from_millis(3_000));
}

#[tokio::test(start_paused = true)]
async fn http_429_is_not_retried() {
    let fetcher = StaticFetcher::new(b"%PDF-1.4 minimal".to_vec());
    let store = ScriptedStore::new(vec![Reply::Status(429), Reply::Ok]);
    let p = pipeline(fetcher, store.clone());

    let report = p
        .upload_with_report(PDF_URL, "doc.pdf", "application/pdf", None)
        .await;

    assert!(report.result.is_none());
    assert_eq!(store.calls(), 1);
    assert!(report.delays.is_empty());
    assert_eq!(report.final_state, AttemptState::Terminal { attempts: 1 });
    assert!(matches!(
        report.last_error,
        Some(UploadError::Status { status: 429, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn transient_failure_then_success() {
    let fetcher = StaticFetcher::new(b"%PDF-1.4 minimal".to_vec());
    let store = ScriptedStore::new(vec![Reply::Status(502), Reply::Ok]);
    let p = pipeline(fetcher.clone(), store.clone());

    let report = p
        .upload_with_report(PDF_URL, "doc.pdf", "application/pdf", None)
        .await;

    let result = report.result.expect("second attempt succeeds");
    assert_eq!(result.destination_id, "1");
    assert_eq!(result.url, "https://cms.example/uploads/doc.pdf");
    assert_eq!(report.attempts, 2);
    assert_eq!(report.delays, vec![Duration::from_millis(3_000)]);
    assert_eq!(report.final_state, AttemptState::Succeeded { attempts: 2 });
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_uploads_time_out_and_are_retried() {
    let fetcher = StaticFetcher::new(b"%PDF-1.4 minimal".to_vec());
    let store = ScriptedStore::new(vec![Reply::Hang; 3]);
    let p = pipeline(fetcher, store.clone());

    let report = p
        .upload_with_report(PDF_URL, "doc.pdf", "application/pdf", None)
        .await;

    assert!(report.result.is_none());
    assert_eq!(store.calls(), 3);
    assert_eq!(report.timeouts, vec![Duration::from_millis(30_000); 3]);
    assert!(matches!(
        report.last_error,
        Some(UploadError::Timeout { after_ms: 30_000 })
    ));
}

// ── Download ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn missing_source_asset_is_terminal() {
    let fetcher = StaticFetcher::failing_first(
        vec![],
        vec![UploadError::DownloadStatus {
            url: PDF_URL.into(),
            status: 404,
        }],
    );
    let store = ScriptedStore::always_ok();
    let p = pipeline(fetcher.clone(), store.clone());

    let report = p
        .upload_with_report(PDF_URL, "doc.pdf", "application/pdf", None)
        .await;

    assert!(report.result.is_none());
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(store.calls(), 0);
    assert_eq!(report.final_state, AttemptState::Terminal { attempts: 1 });
}

#[tokio::test(start_paused = true)]
async fn network_failure_during_download_retries_whole_attempt() {
    let fetcher = StaticFetcher::failing_first(
        b"%PDF-1.4 minimal".to_vec(),
        vec![UploadError::Download {
            url: PDF_URL.into(),
            reason: "connection reset by peer".into(),
            retryable: true,
        }],
    );
    let store = ScriptedStore::always_ok();
    let p = pipeline(fetcher.clone(), store.clone());

    let report = p
        .upload_with_report(PDF_URL, "doc.pdf", "application/pdf", None)
        .await;

    assert!(report.result.is_some());
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(store.calls(), 1);
    assert_eq!(report.delays, vec![Duration::from_millis(3_000)]);
}

// ── Temp files ───────────────────────────────────────────────────────────

#[tokio::test]
async fn temp_dir_removed_after_success() {
    let fetcher = StaticFetcher::new(b"%PDF-1.4 minimal".to_vec());
    let p = pipeline(fetcher.clone(), ScriptedStore::always_ok());

    let report = p
        .upload_with_report(PDF_URL, "doc.pdf", "application/pdf", None)
        .await;

    assert!(report.result.is_some());
    assert_temp_dirs_removed(&fetcher);
}

#[tokio::test]
async fn temp_dir_removed_after_terminal_failure() {
    let fetcher = StaticFetcher::new(b"%PDF-1.4 minimal".to_vec());
    let p = pipeline(fetcher.clone(), ScriptedStore::new(vec![Reply::Status(400)]));

    let report = p
        .upload_with_report(PDF_URL, "doc.pdf", "application/pdf", None)
        .await;

    assert_eq!(report.final_state, AttemptState::Terminal { attempts: 1 });
    assert_temp_dirs_removed(&fetcher);
}

#[tokio::test(start_paused = true)]
async fn temp_dir_removed_after_exhausted_retries() {
    let fetcher = StaticFetcher::new(b"%PDF-1.4 minimal".to_vec());
    let p = pipeline(fetcher.clone(), ScriptedStore::new(vec![Reply::Status(503); 3]));

    let report = p
        .upload_with_report(PDF_URL, "doc.pdf", "application/pdf", None)
        .await;

    assert_eq!(report.final_state, AttemptState::Exhausted { attempts: 3 });
    assert_temp_dirs_removed(&fetcher);
}

// ── Naming and transcoding ───────────────────────────────────────────────

#[test]
fn file_names_are_sanitised_and_hint_forwarded() {
    let fetcher = StaticFetcher::new(b"%PDF-1.4 minimal".to_vec());
    let store = ScriptedStore::always_ok();
    let p = pipeline(fetcher, store.clone());

    let result = tokio_test::block_on(p.upload(
        PDF_URL,
        "Annual report (final).pdf",
        "application/pdf",
        Some("attachment"),
    ))
    .expect("upload succeeds");

    assert_eq!(result.file_name, "Annual_report_final.pdf");
    assert!(!result.transcoded);
    let sent = store.received();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].file_name, "Annual_report_final.pdf");
    assert_eq!(sent[0].content_type, "application/pdf");
    assert_eq!(sent[0].field_hint.as_deref(), Some("attachment"));
    assert_eq!(sent[0].bytes, b"%PDF-1.4 minimal");
}

#[tokio::test]
async fn small_images_upload_unchanged() {
    let png = tiny_png();
    let fetcher = StaticFetcher::new(png.clone());
    let store = ScriptedStore::always_ok();
    let p = pipeline(fetcher, store.clone());

    let result = p
        .upload("https://assets.example/a.png", "a.png", "image/png", None)
        .await
        .expect("upload succeeds");

    assert!(!result.transcoded);
    assert_eq!(result.content_type, "image/png");
    assert_eq!(store.received()[0].bytes, png);
}

#[tokio::test]
async fn large_bmp_is_normalised_to_smaller_jpeg() {
    // 700×700×3 bytes of pixels ≈ 1.4 MB: the 95-quality band.
    let bmp = gradient(700, 700, image::ImageFormat::Bmp);
    assert!(bmp.len() > 1024 * 1024);
    let fetcher = StaticFetcher::new(bmp.clone());
    let store = ScriptedStore::always_ok();
    let p = pipeline(fetcher.clone(), store.clone());

    let result = p
        .upload("https://assets.example/photo.bmp", "photo.bmp", "image/bmp", None)
        .await
        .expect("upload succeeds");

    assert!(result.transcoded);
    assert_eq!(result.file_name, "photo.jpg");
    assert_eq!(result.content_type, "image/jpeg");

    let sent = &store.received()[0];
    assert_eq!(sent.content_type, "image/jpeg");
    assert!(sent.bytes.len() < bmp.len());
    assert_eq!(&sent.bytes[..2], &[0xFF, 0xD8], "JPEG SOI marker");
    assert!(
        sent.bytes.windows(2).any(|w| w == [0xFF, 0xC2]),
        "progressive SOF2 marker"
    );
    assert!(result.size_mb < bmp.len() as f64 / (1024.0 * 1024.0));
    // original and transcoded copies both gone
    assert_temp_dirs_removed(&fetcher);
}

#[tokio::test]
async fn undecodable_image_falls_back_to_original_bytes() {
    let junk = vec![0x42u8; 2 * 1024 * 1024];
    let fetcher = StaticFetcher::new(junk.clone());
    let store = ScriptedStore::always_ok();
    let p = pipeline(fetcher, store.clone());

    let result = p
        .upload("https://assets.example/b.jpg", "b.jpg", "image/jpeg", None)
        .await
        .expect("original is still uploaded");

    assert!(!result.transcoded);
    assert_eq!(store.received()[0].bytes.len(), junk.len());
}
