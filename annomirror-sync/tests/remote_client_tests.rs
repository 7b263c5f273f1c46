//! Remote Client against an in-process fake of the remote REST API

use annomirror_common::config::RemoteConfig;
use annomirror_common::db::{init_database, TaskStore};
use annomirror_common::{JobFilter, NormalizedJob};
use annomirror_sync::{JobSource, RemoteClient, RemoteError, RemoteJob, SyncEngine};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const TOKEN: &str = "abc123";

#[derive(Default)]
struct FakeRemote {
    fail_page: Option<u32>,
    fail_annotations_for: Option<i64>,
    logins: AtomicUsize,
    task_lookups: AtomicUsize,
    annotation_lookups: AtomicUsize,
    listing_queries: Mutex<Vec<HashMap<String, String>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == format!("Token {}", TOKEN))
}

async fn login(State(fake): State<Arc<FakeRemote>>, Json(body): Json<Value>) -> Response {
    fake.logins.fetch_add(1, Ordering::SeqCst);
    if body["username"] == "mirror" && body["password"] == "pw" {
        Json(json!({"key": TOKEN})).into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

/// Ignores filter parameters on purpose
async fn jobs(
    State(fake): State<Arc<FakeRemote>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let page: u32 = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    fake.listing_queries.lock().unwrap().push(query);

    if fake.fail_page == Some(page) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let body = match page {
        1 => json!({
            "results": [
                {"id": 1, "task_id": 10, "assignee": {"username": "ana"}, "status": "annotation"},
                {"id": 2, "task_id": 20, "assignee": null, "status": "validation"}
            ],
            "next": "http://fake/api/jobs?page=2"
        }),
        2 => json!({
            "results": [
                {"id": 3, "task_id": 10, "assignee": "bruno", "status": "completed"}
            ],
            "next": null
        }),
        _ => json!({"results": [], "next": null}),
    };
    Json(body).into_response()
}

async fn task(State(fake): State<Arc<FakeRemote>>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    fake.task_lookups.fetch_add(1, Ordering::SeqCst);
    match id {
        10 => Json(json!({"id": 10, "name": "street-cams", "project_id": 123})).into_response(),
        20 => Json(json!({"id": 20, "name": "bird-feeder", "project_id": 456})).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn project(headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match id {
        123 => Json(json!({"id": 123, "name": "Traffic"})).into_response(),
        456 => Json(json!({"id": 456, "name": "Wildlife"})).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn annotations(
    State(fake): State<Arc<FakeRemote>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    fake.annotation_lookups.fetch_add(1, Ordering::SeqCst);
    if fake.fail_annotations_for == Some(id) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!({
        "shapes": [{"type": "rectangle"}, {"type": "points"}],
        "tracks": [{"shapes": [
            {"keyframe": true, "outside": false},
            {"keyframe": false, "outside": false},
            {"keyframe": false, "outside": true}
        ]}]
    }))
    .into_response()
}

async fn spawn_fake(fake: FakeRemote) -> (SocketAddr, Arc<FakeRemote>) {
    let fake = Arc::new(fake);
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/jobs", get(jobs))
        .route("/api/jobs/:id/annotations", get(annotations))
        .route("/api/tasks/:id", get(task))
        .route("/api/projects/:id", get(project))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, fake)
}

fn config(addr: SocketAddr) -> RemoteConfig {
    RemoteConfig {
        api_url: format!("http://{}/api/", addr),
        web_url: "https://annotate.example.org".to_string(),
        username: Some("mirror".to_string()),
        password: Some("pw".to_string()),
        timeout_secs: 5,
        page_size: 2,
        ..Default::default()
    }
}

async fn collect_known(
    client: &RemoteClient,
    filter: &JobFilter,
    known: &HashSet<i64>,
) -> Vec<Result<RemoteJob, RemoteError>> {
    client.fetch_jobs(filter, known).collect().await
}

async fn collect(client: &RemoteClient, filter: &JobFilter) -> Vec<Result<RemoteJob, RemoteError>> {
    collect_known(client, filter, &HashSet::new()).await
}

fn fetched(item: Result<RemoteJob, RemoteError>) -> NormalizedJob {
    match item {
        Ok(RemoteJob::Fetched(job)) => job,
        other => panic!("expected a fetched job, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pages_through_listing_and_enriches_jobs() {
    let (addr, fake) = spawn_fake(FakeRemote::default()).await;
    let client = RemoteClient::new(&config(addr)).unwrap();

    let items = collect(&client, &JobFilter::default()).await;
    let jobs: Vec<_> = items.into_iter().map(fetched).collect();
    assert_eq!(jobs.iter().map(|j| j.job_id).collect::<Vec<_>>(), vec![1, 2, 3]);

    let first = &jobs[0];
    assert_eq!(first.task_name.as_deref(), Some("street-cams"));
    assert_eq!(first.project_id, Some(123));
    assert_eq!(first.project_name.as_deref(), Some("Traffic"));
    assert_eq!(first.assignee.as_deref(), Some("ana"));
    assert_eq!(first.manual_annotation_count, 3);
    assert_eq!(first.interpolated_annotation_count, 1);
    assert_eq!(first.remote_url, "https://annotate.example.org/tasks/10/jobs/1");

    assert_eq!(jobs[1].assignee, None);
    assert_eq!(jobs[2].assignee.as_deref(), Some("bruno"));

    // One login per stream, task 10 looked up once
    assert_eq!(fake.logins.load(Ordering::SeqCst), 1);
    assert_eq!(fake.task_lookups.load(Ordering::SeqCst), 2);

    let queries = fake.listing_queries.lock().unwrap();
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].get("page_size").map(String::as_str), Some("2"));
}

#[tokio::test]
async fn test_filter_applied_even_when_remote_ignores_it() {
    let (addr, fake) = spawn_fake(FakeRemote::default()).await;
    let client = RemoteClient::new(&config(addr)).unwrap();
    let filter = JobFilter {
        project_id: Some(123),
        ..Default::default()
    };

    let items = collect(&client, &filter).await;
    let ids: Vec<i64> = items.into_iter().map(|r| r.unwrap().job_id()).collect();
    assert_eq!(ids, vec![1, 3]);

    let queries = fake.listing_queries.lock().unwrap();
    assert_eq!(queries[0].get("project_id").map(String::as_str), Some("123"));
}

#[tokio::test]
async fn test_rejected_login_is_unavailable() {
    let (addr, _fake) = spawn_fake(FakeRemote::default()).await;
    let mut cfg = config(addr);
    cfg.password = Some("wrong".to_string());
    let client = RemoteClient::new(&cfg).unwrap();

    let items = collect(&client, &JobFilter::default()).await;
    assert_eq!(items.len(), 1);
    assert!(matches!(&items[0], Err(RemoteError::Unavailable(_))));
}

#[tokio::test]
async fn test_configured_token_skips_login() {
    let (addr, fake) = spawn_fake(FakeRemote::default()).await;
    let mut cfg = config(addr);
    cfg.username = None;
    cfg.password = None;
    cfg.token = Some(TOKEN.to_string());
    let client = RemoteClient::new(&cfg).unwrap();

    let items = collect(&client, &JobFilter::default()).await;
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(Result::is_ok));
    assert_eq!(fake.logins.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_listing_page_ends_stream() {
    let (addr, _fake) = spawn_fake(FakeRemote {
        fail_page: Some(2),
        ..Default::default()
    })
    .await;
    let client = RemoteClient::new(&config(addr)).unwrap();

    let items = collect(&client, &JobFilter::default()).await;
    assert_eq!(items.len(), 3);
    assert!(items[0].is_ok());
    assert!(items[1].is_ok());
    assert!(matches!(&items[2], Err(RemoteError::Unavailable(_))));
}

#[tokio::test]
async fn test_failed_enrichment_is_per_job() {
    let (addr, _fake) = spawn_fake(FakeRemote {
        fail_annotations_for: Some(2),
        ..Default::default()
    })
    .await;
    let client = RemoteClient::new(&config(addr)).unwrap();

    let items = collect(&client, &JobFilter::default()).await;
    assert_eq!(items.len(), 3);
    assert!(items[0].is_ok());
    assert!(matches!(&items[1], Err(RemoteError::Malformed(_))));
    assert!(items[2].is_ok());
}

#[tokio::test]
async fn test_unreachable_remote_is_unavailable() {
    // Bind then drop to get a port with nothing listening
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = RemoteClient::new(&config(addr)).unwrap();
    let items = collect(&client, &JobFilter::default()).await;
    assert_eq!(items.len(), 1);
    assert!(matches!(&items[0], Err(RemoteError::Unavailable(_))));
}

#[tokio::test]
async fn test_sync_run_against_fake_remote() {
    let (addr, _fake) = spawn_fake(FakeRemote::default()).await;
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("mirror.db")).await.unwrap();
    let store = TaskStore::new(pool);

    let client = RemoteClient::new(&config(addr)).unwrap();
    let engine = SyncEngine::new(Arc::new(client), store.clone());
    let filter = JobFilter {
        project_id: Some(123),
        ..Default::default()
    };

    let summary = engine.run(&filter, false).await.unwrap();
    assert_eq!(summary.created, 2);
    assert_eq!(summary.failed, 0);

    let record = store.get(3).await.unwrap().unwrap();
    assert_eq!(record.project_name.as_deref(), Some("Traffic"));
    assert_eq!(record.total_annotation_count, 4);
    assert!(!store.exists(2).await.unwrap());

    let again = engine.run(&filter, false).await.unwrap();
    assert_eq!(again.skipped, 2);
}

#[tokio::test]
async fn test_job_outside_filter_is_never_enriched() {
    // Job 2 belongs to project 456; its annotations endpoint is broken
    let (addr, fake) = spawn_fake(FakeRemote {
        fail_annotations_for: Some(2),
        ..Default::default()
    })
    .await;
    let client = RemoteClient::new(&config(addr)).unwrap();
    let filter = JobFilter {
        project_id: Some(123),
        ..Default::default()
    };

    let items = collect(&client, &filter).await;
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(Result::is_ok));
    assert_eq!(fake.annotation_lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_known_jobs_yield_ids_without_per_job_requests() {
    let (addr, fake) = spawn_fake(FakeRemote {
        fail_annotations_for: Some(1),
        ..Default::default()
    })
    .await;
    let client = RemoteClient::new(&config(addr)).unwrap();

    let items = collect_known(&client, &JobFilter::default(), &HashSet::from([1, 2, 3])).await;
    let items: Vec<RemoteJob> = items.into_iter().map(Result::unwrap).collect();
    assert_eq!(
        items,
        vec![
            RemoteJob::Known { job_id: 1 },
            RemoteJob::Known { job_id: 2 },
            RemoteJob::Known { job_id: 3 },
        ]
    );
    assert_eq!(fake.annotation_lookups.load(Ordering::SeqCst), 0);
    assert_eq!(fake.task_lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rerun_skips_every_mirrored_job_despite_broken_enrichment() {
    let (addr, _fake) = spawn_fake(FakeRemote::default()).await;
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("mirror.db")).await.unwrap();
    let store = TaskStore::new(pool);

    let engine = SyncEngine::new(
        Arc::new(RemoteClient::new(&config(addr)).unwrap()),
        store.clone(),
    );
    assert_eq!(engine.run(&JobFilter::default(), false).await.unwrap().created, 3);

    // Same mirror, remote now failing annotations for job 1
    let (broken_addr, _broken) = spawn_fake(FakeRemote {
        fail_annotations_for: Some(1),
        ..Default::default()
    })
    .await;
    let engine = SyncEngine::new(
        Arc::new(RemoteClient::new(&config(broken_addr)).unwrap()),
        store.clone(),
    );
    let summary = engine.run(&JobFilter::default(), false).await.unwrap();
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.failed, 0);
}
