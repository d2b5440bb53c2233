//! Integration tests for HTTP API endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use cadence_metadata::models::GcJobRow;
use cadence_metadata::repos::{GcRepo, SongRepo, TombstoneRepo};
use cadence_metadata::MetadataStore;
use cadence_storage::ObjectStore;
use common::fixtures::{seeded_bytes, sha256_hash, song_row};
use common::{FlakyMetadata, FlakyStorage, TestServer, stored_keys};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

fn range_request(uri: &str, range: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(range) = range {
        builder = builder.header("Range", range);
    }
    builder.body(Body::empty()).unwrap()
}

/// Poll a GC job until it leaves the queued and running states.
async fn wait_for_job(server: &TestServer, job_id: &str) -> Value {
    for _ in 0..100 {
        let response = server
            .json("GET", &format!("/v1/admin/gc/{job_id}"), None)
            .await;
        assert_eq!(response.status, StatusCode::OK);
        let body = response.json();
        if body["state"] == "finished" || body["state"] == "failed" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("GC job {job_id} did not finish");
}

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let response = server.json("GET", "/v1/health", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["status"], "ok");
}

#[tokio::test]
async fn test_health_reports_unavailable_metadata() {
    let mut flaky: Option<Arc<FlakyMetadata>> = None;
    let server = TestServer::with_stores(|storage, metadata| {
        let wrapped = Arc::new(FlakyMetadata::new(metadata));
        flaky = Some(wrapped.clone());
        (storage, wrapped as Arc<dyn MetadataStore>)
    })
    .await;
    let flaky = flaky.unwrap();

    flaky.fail_health.store(true, Ordering::SeqCst);
    let response = server.json("GET", "/v1/health", None).await;

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json()["code"], "unavailable");
}

#[tokio::test]
async fn test_health_reports_unavailable_storage() {
    let mut flaky: Option<Arc<FlakyStorage>> = None;
    let server = TestServer::with_stores(|storage, metadata| {
        let wrapped = Arc::new(FlakyStorage::new(storage));
        flaky = Some(wrapped.clone());
        (wrapped as Arc<dyn ObjectStore>, metadata)
    })
    .await;

    flaky.unwrap().fail_health.store(true, Ordering::SeqCst);
    let response = server.json("GET", "/v1/health", None).await;

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_upload_then_range_request() {
    let server = TestServer::new().await;
    let data = seeded_bytes(7, 5_000_000);

    let response = server
        .upload("audio/mpeg", data.clone(), Some("Blue"), Some("Joni"))
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    let song = response.json();
    assert_eq!(song["title"], "Blue");
    assert_eq!(song["artist"], "Joni");
    assert_eq!(song["content_length"], 5_000_000);
    assert_eq!(song["content_type"], "audio/mpeg");
    assert_eq!(song["content_hash"], sha256_hash(&data));
    let song_id = song["id"].as_str().unwrap();

    let response = server
        .send(range_request(
            &format!("/v1/songs/{song_id}/stream"),
            Some("bytes=1000000-1999999"),
        ))
        .await;

    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.header("content-range"),
        Some("bytes 1000000-1999999/5000000")
    );
    assert_eq!(response.header("content-length"), Some("1000000"));
    assert_eq!(response.header("accept-ranges"), Some("bytes"));
    assert_eq!(response.header("content-type"), Some("audio/mpeg"));
    assert_eq!(response.body.len(), 1_000_000);
    assert_eq!(response.body, data.slice(1_000_000..2_000_000));
}

#[tokio::test]
async fn test_stream_without_range_returns_everything() {
    let server = TestServer::new().await;
    let data = seeded_bytes(8, 64 * 1024);
    let song_id = server.upload_song(data.clone(), "Coyote", "Joni").await;

    let response = server
        .send(range_request(&format!("/v1/songs/{song_id}/stream"), None))
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, data);
    assert_eq!(response.header("content-range"), None);
    assert!(
        response
            .header("content-disposition")
            .unwrap()
            .starts_with("inline")
    );
}

#[tokio::test]
async fn test_suffix_and_open_ranges() {
    let server = TestServer::new().await;
    let data = seeded_bytes(9, 10_000);
    let song_id = server.upload_song(data.clone(), "Amelia", "Joni").await;
    let uri = format!("/v1/songs/{song_id}/stream");

    let response = server.send(range_request(&uri, Some("bytes=-500"))).await;
    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.header("content-range"), Some("bytes 9500-9999/10000"));
    assert_eq!(response.body, data.slice(9_500..));

    let response = server.send(range_request(&uri, Some("bytes=9000-"))).await;
    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.body, data.slice(9_000..));

    // An end past the last byte is clamped.
    let response = server
        .send(range_request(&uri, Some("bytes=9990-20000")))
        .await;
    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.header("content-range"), Some("bytes 9990-9999/10000"));
}

#[tokio::test]
async fn test_unsatisfiable_range() {
    let server = TestServer::new().await;
    let song_id = server
        .upload_song(seeded_bytes(10, 1000), "Case of You", "Joni")
        .await;

    let response = server
        .send(range_request(
            &format!("/v1/songs/{song_id}/stream"),
            Some("bytes=5000-"),
        ))
        .await;

    assert_eq!(response.status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.header("content-range"), Some("bytes */1000"));
    assert_eq!(response.json()["code"], "range_not_satisfiable");
}

#[tokio::test]
async fn test_malformed_range_is_bad_request() {
    let server = TestServer::new().await;
    let song_id = server
        .upload_song(seeded_bytes(11, 1000), "River", "Joni")
        .await;

    let response = server
        .send(range_request(
            &format!("/v1/songs/{song_id}/stream"),
            Some("bytes=500-100"),
        ))
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_is_attachment() {
    let server = TestServer::new().await;
    let data = seeded_bytes(12, 2048);
    let song_id = server.upload_song(data.clone(), "Help Me", "Joni").await;

    let response = server
        .send(range_request(&format!("/v1/songs/{song_id}/download"), None))
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, data);
    let disposition = response.header("content-disposition").unwrap();
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains("Joni - Help Me.mp3"));
}

#[tokio::test]
async fn test_stream_unknown_song() {
    let server = TestServer::new().await;

    let response = server
        .send(range_request(
            &format!("/v1/songs/{}/stream", Uuid::new_v4()),
            None,
        ))
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = server
        .send(range_request("/v1/songs/not-a-uuid/stream", None))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stream_rejects_corrupt_length() {
    let server = TestServer::new().await;
    let mut row = song_row("Broken", "Nobody", "audio/00/00/broken", OffsetDateTime::now_utc());
    row.content_length = -1;
    server.metadata().create_song(&row).await.unwrap();

    let response = server
        .send(range_request(&format!("/v1/songs/{}/stream", row.song_id), None))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(
        response.json()["message"]
            .as_str()
            .unwrap()
            .contains("negative content length")
    );
}

#[tokio::test]
async fn test_unsupported_type_writes_nothing() {
    let server = TestServer::new().await;

    let response = server
        .upload("image/png", seeded_bytes(13, 4096), Some("Cover"), None)
        .await;

    assert_eq!(response.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(response.json()["code"], "invalid_format");
    assert!(stored_keys(server.storage().as_ref(), "").await.is_empty());

    let listing = server.json("GET", "/v1/songs", None).await;
    assert_eq!(listing.json(), json!([]));
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let server = TestServer::with_config(|config| {
        config.library.max_upload_bytes = 1024;
    })
    .await;

    let response = server
        .upload("audio/mpeg", seeded_bytes(14, 2048), None, None)
        .await;

    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(stored_keys(server.storage().as_ref(), "").await.is_empty());
}

#[tokio::test]
async fn test_upload_requires_content_length() {
    let server = TestServer::new().await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/songs")
        .header("Content-Type", "audio/mpeg")
        .body(Body::from(seeded_bytes(15, 100)))
        .unwrap();
    let response = server.send(request).await;

    assert_eq!(response.status, StatusCode::LENGTH_REQUIRED);
}

#[tokio::test]
async fn test_short_body_leaves_nothing_behind() {
    let server = TestServer::new().await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/songs")
        .header("Content-Type", "audio/flac")
        .header("Content-Length", "4096")
        .body(Body::from(seeded_bytes(16, 1024)))
        .unwrap();
    let response = server.send(request).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["code"], "incomplete_stream");
    assert!(stored_keys(server.storage().as_ref(), "").await.is_empty());
}

#[tokio::test]
async fn test_failed_record_write_removes_blob() {
    let mut flaky: Option<Arc<FlakyMetadata>> = None;
    let server = TestServer::with_stores(|storage, metadata| {
        let wrapped = Arc::new(FlakyMetadata::new(metadata));
        flaky = Some(wrapped.clone());
        (storage, wrapped as Arc<dyn MetadataStore>)
    })
    .await;
    flaky.unwrap().fail_create_song.store(true, Ordering::SeqCst);

    let response = server
        .upload("audio/mpeg", seeded_bytes(17, 8192), Some("Lost"), None)
        .await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json()["code"], "storage_write_failed");
    assert!(stored_keys(server.storage().as_ref(), "").await.is_empty());
    assert!(
        server
            .metadata()
            .get_pending_blob_tombstones(10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_untagged_upload_gets_defaults() {
    let server = TestServer::new().await;

    let response = server
        .upload("audio/ogg", seeded_bytes(18, 512), None, None)
        .await;

    assert_eq!(response.status, StatusCode::CREATED);
    let song = response.json();
    assert_eq!(song["title"], "Untitled");
    assert_eq!(song["artist"], "Unknown Artist");
    assert_eq!(song["duration_ms"], Value::Null);
}

#[tokio::test]
async fn test_catalog_sort_and_filter() {
    let server = TestServer::new().await;
    server
        .upload_song(seeded_bytes(20, 256), "Carey", "Joni Mitchell")
        .await;
    server
        .upload_song(seeded_bytes(21, 256), "all I want", "Joni Mitchell")
        .await;
    server
        .upload_song(seeded_bytes(22, 256), "Big Yellow Taxi", "Counting Crows")
        .await;

    let titles = |body: Value| -> Vec<String> {
        body.as_array()
            .unwrap()
            .iter()
            .map(|s| s["title"].as_str().unwrap().to_string())
            .collect()
    };

    let newest_first = server.json("GET", "/v1/songs", None).await;
    assert_eq!(newest_first.status, StatusCode::OK);
    assert_eq!(
        titles(newest_first.json()),
        vec!["Big Yellow Taxi", "all I want", "Carey"]
    );

    let by_title = server.json("GET", "/v1/songs?sort=title_asc", None).await;
    assert_eq!(
        titles(by_title.json()),
        vec!["all I want", "Big Yellow Taxi", "Carey"]
    );

    let filtered = server
        .json("GET", "/v1/songs?q=JONI&sort=title_asc", None)
        .await;
    assert_eq!(titles(filtered.json()), vec!["all I want", "Carey"]);

    let by_title_text = server.json("GET", "/v1/songs?q=taxi", None).await;
    assert_eq!(titles(by_title_text.json()), vec!["Big Yellow Taxi"]);

    let blank = server.json("GET", "/v1/songs?q=%20%20", None).await;
    assert_eq!(titles(blank.json()).len(), 3);

    let bad_sort = server.json("GET", "/v1/songs?sort=shuffle", None).await;
    assert_eq!(bad_sort.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_song_fields() {
    let server = TestServer::new().await;
    let song_id = server
        .upload_song(seeded_bytes(23, 256), "Untitled", "Unknown Artist")
        .await;
    let uri = format!("/v1/songs/{song_id}");

    let response = server
        .json(
            "PATCH",
            &uri,
            Some(json!({"title": "Free Man in Paris", "duration_ms": 183000})),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["title"], "Free Man in Paris");
    assert_eq!(response.json()["artist"], "Unknown Artist");
    assert_eq!(response.json()["duration_ms"], 183000);

    let response = server
        .json("PATCH", &uri, Some(json!({"artist": "   "})))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let fetched = server.json("GET", &uri, None).await;
    assert_eq!(fetched.json()["title"], "Free Man in Paris");

    let missing = server
        .json(
            "PATCH",
            &format!("/v1/songs/{}", Uuid::new_v4()),
            Some(json!({"title": "x"})),
        )
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_song_removes_record_and_blob() {
    let server = TestServer::new().await;
    let song_id = server
        .upload_song(seeded_bytes(24, 1024), "Urge for Going", "Joni")
        .await;
    let uri = format!("/v1/songs/{song_id}");

    let response = server.json("DELETE", &uri, None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["outcome"], "deleted");

    assert_eq!(
        server.json("GET", &uri, None).await.status,
        StatusCode::NOT_FOUND
    );
    assert!(stored_keys(server.storage().as_ref(), "").await.is_empty());
    assert!(
        server
            .metadata()
            .get_pending_blob_tombstones(10)
            .await
            .unwrap()
            .is_empty()
    );

    let again = server.json("DELETE", &uri, None).await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deferred_blob_delete_is_reconciled() {
    let mut flaky: Option<Arc<FlakyStorage>> = None;
    let server = TestServer::with_stores(|storage, metadata| {
        let wrapped = Arc::new(FlakyStorage::new(storage));
        flaky = Some(wrapped.clone());
        (wrapped as Arc<dyn ObjectStore>, metadata)
    })
    .await;
    let flaky = flaky.unwrap();

    let song_id = server
        .upload_song(seeded_bytes(25, 4096), "Both Sides Now", "Joni")
        .await;

    flaky.fail_deletes.store(true, Ordering::SeqCst);
    let response = server
        .json("DELETE", &format!("/v1/songs/{song_id}"), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["outcome"], "blob_cleanup_deferred");

    // The record is gone but the bytes are still stored.
    assert_eq!(
        server
            .json("GET", &format!("/v1/songs/{song_id}"), None)
            .await
            .status,
        StatusCode::NOT_FOUND
    );
    let stored = stored_keys(server.storage().as_ref(), "audio/").await;
    assert_eq!(stored.len(), 1);
    let tombstones = server
        .metadata()
        .get_pending_blob_tombstones(10)
        .await
        .unwrap();
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones[0].blob_key, stored[0]);

    flaky.fail_deletes.store(false, Ordering::SeqCst);
    let response = server
        .json("POST", "/v1/admin/gc", Some(json!({"job_type": "blob_tombstones"})))
        .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    let job_id = response.json()["job_id"].as_str().unwrap().to_string();

    let job = wait_for_job(&server, &job_id).await;
    assert_eq!(job["state"], "finished");
    assert_eq!(job["stats"]["items_deleted"], 1);
    assert_eq!(job["stats"]["bytes_reclaimed"], 4096);

    assert!(stored_keys(server.storage().as_ref(), "").await.is_empty());
    assert!(
        server
            .metadata()
            .get_pending_blob_tombstones(10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_playlist_lifecycle_with_dangling_entry() {
    let server = TestServer::new().await;
    let first = server
        .upload_song(seeded_bytes(30, 256), "California", "Joni")
        .await;
    let second = server
        .upload_song(seeded_bytes(31, 256), "This Flight Tonight", "Joni")
        .await;

    let response = server
        .json("POST", "/v1/playlists", Some(json!({"name": "  Blue side  "})))
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.json()["name"], "Blue side");
    let playlist_id = response.json()["id"].as_str().unwrap().to_string();
    let uri = format!("/v1/playlists/{playlist_id}");

    for song_id in [&first, &second, &first] {
        let response = server
            .json(
                "POST",
                &format!("{uri}/entries"),
                Some(json!({"song_id": song_id})),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK);
    }

    let response = server
        .json("DELETE", &format!("/v1/songs/{second}"), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let view = server.json("GET", &uri, None).await.json();
    assert_eq!(view["name"], "Blue side");
    let entries = view["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["kind"], "song");
    assert_eq!(entries[0]["song"]["id"], first.as_str());
    assert_eq!(entries[1]["kind"], "dangling");
    assert_eq!(entries[1]["song_id"], second.as_str());
    assert_eq!(entries[2]["kind"], "song");

    let response = server.json("POST", &format!("{uri}/prune"), None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["removed"], 1);

    let view = server.json("GET", &uri, None).await.json();
    let positions: Vec<u64> = view["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["position"].as_u64().unwrap())
        .collect();
    assert_eq!(positions, vec![0, 1]);

    let response = server
        .json("DELETE", &format!("{uri}/entries/0"), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let entries = response.json()["entries"].as_array().unwrap().clone();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["position"], 0);

    let response = server
        .json("PATCH", &uri, Some(json!({"name": "Ladies of the Canyon"})))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["name"], "Ladies of the Canyon");

    let listing = server.json("GET", "/v1/playlists", None).await;
    assert_eq!(listing.json().as_array().unwrap().len(), 1);

    let response = server.json("DELETE", &uri, None).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert_eq!(
        server.json("GET", &uri, None).await.status,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_playlist_rejects_unknown_song_and_blank_name() {
    let server = TestServer::new().await;

    let response = server
        .json("POST", "/v1/playlists", Some(json!({"name": "   "})))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = server
        .json("POST", "/v1/playlists", Some(json!({"name": "Road"})))
        .await;
    let playlist_id = response.json()["id"].as_str().unwrap().to_string();

    let response = server
        .json(
            "POST",
            &format!("/v1/playlists/{playlist_id}/entries"),
            Some(json!({"song_id": Uuid::new_v4().to_string()})),
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = server
        .json(
            "DELETE",
            &format!("/v1/playlists/{playlist_id}/entries/3"),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_gc_trigger_conflicts_with_active_job() {
    let server = TestServer::new().await;

    server
        .metadata()
        .create_gc_job(&GcJobRow {
            gc_job_id: Uuid::new_v4(),
            job_type: "storage_sweep".to_string(),
            state: "running".to_string(),
            started_at: Some(OffsetDateTime::now_utc()),
            finished_at: None,
            stats_json: None,
        })
        .await
        .unwrap();

    let response = server
        .json("POST", "/v1/admin/gc", Some(json!({"job_type": "storage_sweep"})))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    let response = server
        .json("POST", "/v1/admin/gc", Some(json!({"job_type": "chunk_gc"})))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_gc_job_listing() {
    let server = TestServer::new().await;

    let response = server
        .json("POST", "/v1/admin/gc", Some(json!({"job_type": "storage_sweep"})))
        .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    let job_id = response.json()["job_id"].as_str().unwrap().to_string();
    wait_for_job(&server, &job_id).await;

    let response = server.json("GET", "/v1/admin/gc?limit=5", None).await;
    assert_eq!(response.status, StatusCode::OK);
    let jobs = response.json();
    assert_eq!(jobs.as_array().unwrap().len(), 1);
    assert_eq!(jobs[0]["job_id"], job_id.as_str());
    assert_eq!(jobs[0]["job_type"], "storage_sweep");

    let response = server
        .json("GET", &format!("/v1/admin/gc/{}", Uuid::new_v4()), None)
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_prometheus_metrics_endpoint_enabled_by_default() {
    cadence_server::metrics::register_metrics();
    let server = TestServer::new().await;
    server
        .upload_song(seeded_bytes(40, 128), "Metrics", "Test")
        .await;

    let response = server.json("GET", "/metrics", None).await;

    assert_eq!(response.status, StatusCode::OK);
    let text = String::from_utf8_lossy(&response.body);
    assert!(text.contains("cadence_ingests_total"));
}

#[tokio::test]
async fn test_prometheus_metrics_endpoint_disabled_via_config() {
    let server = TestServer::with_config(|config| {
        config.server.metrics_enabled = false;
    })
    .await;

    let response = server.json("GET", "/metrics", None).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
