#![deny(missing_docs)]
//! HTTP surface for axon: run control and the SSE event stream.
//!
//! Four routes anchor the surface:
//!
//! - `POST /runs` — create and start a run
//! - `POST /runs/{id}/cancel` — cancel
//! - `GET /runs/{id}/snapshot` — authoritative point-in-time state
//! - `GET /runs/{id}/events/stream` — replay-then-live SSE
//!
//! The stream endpoint replays everything after the client's last
//! applied `event_id`, then attaches to the run's live publication.
//! Subscribers are bounded (§ [`stream`]): heartbeats coalesce,
//! structural overflow terminates the subscription with a
//! `lagging_consumer` frame, and the client recovers by reconnecting
//! with `Last-Event-ID`.
//!
//! Authentication lives in front of this router; the acting owner
//! arrives in the `x-owner-id` header.

pub mod stream;

use axon_core::{EventId, RunEvent, RunPublicId, ThreadId};
use axon_log::EventLog;
use axon_orch::{OrchError, Orchestrator};
use axon_store::{Store, StoreError};
use axon_turn::provider::Provider;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use stream::{StreamEnd, StreamItem, SubscriberQueue};

/// Shared state behind every handler.
pub struct AppState<P: Provider> {
    /// Relational store.
    pub store: Store,
    /// Event log.
    pub log: Arc<EventLog>,
    /// Run orchestrator.
    pub orch: Arc<Orchestrator<P>>,
    /// Per-subscriber queue bound.
    pub queue_capacity: usize,
}

/// Build the router over the shared state.
pub fn router<P: Provider + Send + Sync + 'static>(state: Arc<AppState<P>>) -> Router {
    Router::new()
        .route("/runs", post(create_run::<P>).get(list_runs::<P>))
        .route("/runs/:id/cancel", post(cancel_run::<P>))
        .route("/runs/:id/snapshot", get(snapshot::<P>))
        .route("/runs/:id/events/stream", get(events_stream::<P>))
        .with_state(state)
}

/// Gateway-level errors, mapped onto HTTP statuses.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing or foreign resource.
    #[error("not found")]
    NotFound,

    /// The request was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Anything else.
    #[error("internal error")]
    Internal(String),
}

impl From<StoreError> for GatewayError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(_) => Self::NotFound,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<OrchError> for GatewayError {
    fn from(error: OrchError) -> Self {
        match error {
            OrchError::Store(StoreError::NotFound(_)) => Self::NotFound,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<axon_log::LogError> for GatewayError {
    fn from(error: axon_log::LogError) -> Self {
        Self::Internal(error.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(detail) => {
                tracing::error!(%detail, "gateway internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

fn owner_from(headers: &HeaderMap) -> axon_core::OwnerId {
    headers
        .get("x-owner-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(axon_core::OwnerId::new)
        .unwrap_or_else(|| axon_core::OwnerId::new("local"))
}

fn parse_run_id(raw: &str) -> Result<RunPublicId, GatewayError> {
    raw.parse()
        .map_err(|_| GatewayError::BadRequest(format!("not a run id: {raw}")))
}

// ── create / list / cancel ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateRun {
    thread_id: i64,
    model: String,
    #[serde(default)]
    reasoning_effort: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreatedRun {
    run_public_id: String,
    event_id: i64,
}

async fn create_run<P: Provider + Send + Sync + 'static>(
    State(state): State<Arc<AppState<P>>>,
    headers: HeaderMap,
    Json(body): Json<CreateRun>,
) -> Result<impl IntoResponse, GatewayError> {
    let owner = owner_from(&headers);
    let thread = state
        .store
        .get_thread(ThreadId::from(body.thread_id), &owner)
        .await?;
    let run = state
        .store
        .create_run(&owner, thread.id, &body.model, body.reasoning_effort.as_deref())
        .await?;
    let public_id = run.run_public_id()?;

    let orch = state.orch.clone();
    tokio::spawn(async move {
        if let Err(error) = orch.start_run(&public_id).await {
            tracing::error!(%error, %public_id, "run failed to start");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(CreatedRun {
            run_public_id: public_id.to_string(),
            event_id: 0,
        }),
    ))
}

#[derive(Debug, Serialize)]
struct RunSummary {
    run_public_id: String,
    status: String,
    model: String,
    created_at: String,
    finished_at: Option<String>,
}

async fn list_runs<P: Provider + Send + Sync + 'static>(
    State(state): State<Arc<AppState<P>>>,
    headers: HeaderMap,
) -> Result<Json<Vec<RunSummary>>, GatewayError> {
    let owner = owner_from(&headers);
    let runs = state.store.list_runs(&owner).await?;
    Ok(Json(
        runs.into_iter()
            .map(|run| RunSummary {
                run_public_id: run.public_id.clone(),
                status: run.status.to_string(),
                model: run.model.clone(),
                created_at: run.created_at.to_rfc3339(),
                finished_at: run.finished_at.map(|t| t.to_rfc3339()),
            })
            .collect(),
    ))
}

async fn cancel_run<P: Provider + Send + Sync + 'static>(
    State(state): State<Arc<AppState<P>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, GatewayError> {
    let owner = owner_from(&headers);
    let public_id = parse_run_id(&id)?;
    state.orch.cancel_run(&public_id, &owner).await?;
    Ok(StatusCode::ACCEPTED)
}

// ── snapshot ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct WorkerSnapshot {
    job_id: i64,
    worker_id: Option<String>,
    status: String,
    task_preview: String,
}

#[derive(Debug, Serialize)]
struct Snapshot {
    run_public_id: String,
    status: String,
    created_at: String,
    started_at: Option<String>,
    iterations: i64,
    last_assistant_content: Option<String>,
    workers: Vec<WorkerSnapshot>,
    last_event_id: i64,
    prompt_tokens: i64,
    completion_tokens: i64,
    cost: String,
}

/// Authoritative current state for late joiners: clients apply the
/// snapshot, then replay forward from its `last_event_id`.
async fn snapshot<P: Provider + Send + Sync + 'static>(
    State(state): State<Arc<AppState<P>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Snapshot>, GatewayError> {
    let owner = owner_from(&headers);
    let public_id = parse_run_id(&id)?;
    let run = state.store.get_run_scoped(&public_id, &owner).await?;

    let history = state
        .store
        .thread_history(ThreadId::from(run.thread_id))
        .await?;
    let last_assistant_content = history
        .iter()
        .rev()
        .find(|m| m.role == axon_core::ChatRole::Assistant && !m.content.is_empty())
        .map(|m| m.content.clone());

    let workers = state
        .store
        .live_jobs_for_run(run.run_id())
        .await?
        .into_iter()
        .map(|job| WorkerSnapshot {
            job_id: job.id,
            worker_id: job.worker_id.clone(),
            status: job.status.to_string(),
            task_preview: job.task.chars().take(120).collect(),
        })
        .collect();
    let last_event_id = state.store.last_event_id(&public_id).await?;

    Ok(Json(Snapshot {
        run_public_id: run.public_id.clone(),
        status: run.status.to_string(),
        created_at: run.created_at.to_rfc3339(),
        started_at: run.started_at.map(|t| t.to_rfc3339()),
        iterations: run.iterations,
        last_assistant_content,
        workers,
        last_event_id: last_event_id.as_i64(),
        prompt_tokens: run.prompt_tokens,
        completion_tokens: run.completion_tokens,
        cost: run.cost.clone(),
    }))
}

// ── event stream ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamQuery {
    #[serde(default)]
    last_event_id: Option<i64>,
}

enum SseState {
    Replay(VecDeque<RunEvent>, Arc<SubscriberQueue>),
    Live(Arc<SubscriberQueue>),
    Done,
}

/// Replay-then-live SSE. Reconnecting clients pass their last applied
/// event id via `Last-Event-ID` (or `?last_event_id=`); the gap is
/// replayed before any live event.
async fn events_stream<P: Provider + Send + Sync + 'static>(
    State(state): State<Arc<AppState<P>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, GatewayError> {
    let owner = owner_from(&headers);
    let public_id = parse_run_id(&id)?;
    // Owner scoping rides on the run row.
    state.store.get_run_scoped(&public_id, &owner).await?;

    let since = headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok())
        .or(query.last_event_id)
        .unwrap_or(0);

    // Subscribe before replaying: anything appended during the replay
    // query is either in the replay result or buffered on the channel,
    // and the pump dedupes by event id.
    let rx = state.log.subscribe(&public_id);
    let replayed = state.log.replay(&public_id, EventId::from(since)).await?;
    let replay_high_water = replayed
        .last()
        .map(|event| event.event_id)
        .unwrap_or(EventId::from(since));
    let queue = stream::pump(rx, replay_high_water, state.queue_capacity);

    let initial = SseState::Replay(replayed.into(), queue);
    let events = futures::stream::unfold(initial, |state| async move {
        match state {
            SseState::Replay(mut buffered, queue) => match buffered.pop_front() {
                Some(event) => Some((frame(&event), SseState::Replay(buffered, queue))),
                None => next_live(queue).await,
            },
            SseState::Live(queue) => next_live(queue).await,
            SseState::Done => None,
        }
    });

    let sse = Sse::new(events.map(Ok::<_, std::convert::Infallible>))
        .keep_alive(KeepAlive::default());
    let mut response = sse.into_response();
    // The path is reserved for streaming: tell reverse proxies not to
    // buffer it.
    response
        .headers_mut()
        .insert("x-accel-buffering", header::HeaderValue::from_static("no"));
    Ok(response)
}

async fn next_live(queue: Arc<SubscriberQueue>) -> Option<(Event, SseState)> {
    match queue.pop().await {
        StreamItem::Event(event) => {
            let frame = frame(&event);
            Some((frame, SseState::Live(queue)))
        }
        StreamItem::End(StreamEnd::LaggingConsumer) => {
            let frame = Event::default().event("lagging_consumer").data("{}");
            Some((frame, SseState::Done))
        }
        StreamItem::End(StreamEnd::Closed) => None,
    }
}

fn frame(event: &RunEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".into());
    Event::default()
        .id(event.event_id.to_string())
        .event(event.event_type.as_str())
        .data(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_artifact::ArtifactStore;
    use axon_core::NewMessage;
    use axon_engine::{EngineConfig, ReactEngine};
    use axon_orch::OrchConfig;
    use axon_tool::{ToolInvoker, ToolRegistry};
    use axon_turn::provider::ProviderError;
    use axon_turn::types::{AssistantMessage, ProviderRequest, TokenUsage};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::collections::VecDeque as Deque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::util::ServiceExt;

    struct MockProvider {
        responses: Mutex<Deque<AssistantMessage>>,
    }

    impl Provider for MockProvider {
        fn complete(
            &self,
            _request: ProviderRequest,
        ) -> impl std::future::Future<Output = Result<AssistantMessage, ProviderError>> + Send
        {
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("no more responses");
            async move { Ok(response) }
        }
    }

    async fn app(responses: Vec<AssistantMessage>) -> (Router, Store, i64, tempfile::TempDir) {
        let store = Store::connect_in_memory().await.unwrap();
        let owner = axon_core::OwnerId::new("alice");
        let thread = store.create_thread(&owner, None).await.unwrap();
        store
            .append_message(thread.id, &NewMessage::user("hello"))
            .await
            .unwrap();
        let log = Arc::new(EventLog::new(store.clone()));
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ToolRegistry::new());
        let invoker = Arc::new(ToolInvoker::new(
            registry.clone(),
            ArtifactStore::new(dir.path()),
            Duration::from_secs(5),
        ));
        let engine = ReactEngine::new(
            MockProvider {
                responses: Mutex::new(responses.into()),
            },
            registry,
            invoker,
            store.clone(),
            log.clone(),
            EngineConfig {
                llm_retry_base_ms: 1,
                ..EngineConfig::default()
            },
        );
        let orch = Arc::new(Orchestrator::new(
            engine,
            store.clone(),
            log.clone(),
            OrchConfig::default(),
        ));
        let state = Arc::new(AppState {
            store: store.clone(),
            log,
            orch,
            queue_capacity: 256,
        });
        (router(state), store, thread.id.as_i64(), dir)
    }

    fn final_answer(text: &str) -> AssistantMessage {
        AssistantMessage {
            content: text.into(),
            tool_calls: vec![],
            usage: TokenUsage {
                prompt_tokens: 7,
                completion_tokens: 3,
            },
            model: "test-model".into(),
            cost: None,
        }
    }

    async fn create(
        app: &Router,
        thread_id: i64,
        owner: &str,
    ) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(
                Request::post("/runs")
                    .header("content-type", "application/json")
                    .header("x-owner-id", owner)
                    .body(Body::from(
                        serde_json::json!({"thread_id": thread_id, "model": "test-model"})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn wait_for_status(store: &Store, public_id: &RunPublicId, wanted: &str) {
        for _ in 0..100 {
            let run = store.get_run(public_id).await.unwrap();
            if run.status.to_string() == wanted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run never reached {wanted}");
    }

    #[tokio::test]
    async fn create_then_snapshot_round_trip() {
        let (app, store, thread_id, _dir) = app(vec![final_answer("4")]).await;
        let (status, body) = create(&app, thread_id, "alice").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let public_id: RunPublicId = body["run_public_id"].as_str().unwrap().parse().unwrap();
        wait_for_status(&store, &public_id, "success").await;

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/runs/{public_id}/snapshot"))
                    .header("x-owner-id", "alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let snapshot: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(snapshot["status"], "success");
        assert_eq!(snapshot["last_assistant_content"], "4");
        assert_eq!(snapshot["last_event_id"], 3);
        assert!(snapshot["workers"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn foreign_owner_sees_nothing() {
        let (app, store, thread_id, _dir) = app(vec![final_answer("4")]).await;
        let (_, body) = create(&app, thread_id, "alice").await;
        let public_id: RunPublicId = body["run_public_id"].as_str().unwrap().parse().unwrap();
        wait_for_status(&store, &public_id, "success").await;

        for uri in [
            format!("/runs/{public_id}/snapshot"),
            format!("/runs/{public_id}/events/stream"),
        ] {
            let response = app
                .clone()
                .oneshot(
                    Request::get(&uri)
                        .header("x-owner-id", "mallory")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }

        // creating a run on a foreign thread also fails
        let (status, _) = create(&app, thread_id, "mallory").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_replays_the_gap_after_reconnect() {
        let (app, store, thread_id, _dir) = app(vec![final_answer("4")]).await;
        let (_, body) = create(&app, thread_id, "alice").await;
        let public_id: RunPublicId = body["run_public_id"].as_str().unwrap().parse().unwrap();
        wait_for_status(&store, &public_id, "success").await;

        // client applied event 1, reconnects: must see 2..=3 in order
        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/runs/{public_id}/events/stream"))
                    .header("x-owner-id", "alice")
                    .header("last-event-id", "1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-accel-buffering").unwrap(),
            "no"
        );

        let mut body = response.into_body();
        let mut seen = String::new();
        while !seen.contains("supervisor_complete") {
            let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
                .await
                .expect("stream stalled")
                .expect("stream ended early")
                .unwrap();
            if let Some(data) = frame.data_ref() {
                seen.push_str(&String::from_utf8_lossy(data));
            }
        }
        let id2 = seen.find("id: 2").expect("event 2 replayed");
        let id3 = seen.find("id: 3").expect("event 3 replayed");
        assert!(id2 < id3);
        assert!(!seen.contains("id: 1"), "already-applied event must not repeat");
    }

    #[tokio::test]
    async fn cancel_is_owner_scoped() {
        let (app, store, thread_id, _dir) = app(vec![final_answer("4")]).await;
        let (_, body) = create(&app, thread_id, "alice").await;
        let public_id: RunPublicId = body["run_public_id"].as_str().unwrap().parse().unwrap();
        wait_for_status(&store, &public_id, "success").await;

        let response = app
            .clone()
            .oneshot(
                Request::post(format!("/runs/{public_id}/cancel"))
                    .header("x-owner-id", "mallory")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
