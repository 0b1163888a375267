//! `/api/v1` routes. Handlers only translate HTTP to `clara-core` calls.

use crate::error::ApiError;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use clara_core::knowledge::{KnowledgeIndex, SearchProfile};
use clara_core::{ChannelBroadcaster, LiveSessionService, SessionError};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct AppState {
    pub app_name: Arc<str>,
    pub sessions: Arc<LiveSessionService>,
    pub knowledge: Arc<KnowledgeIndex>,
    pub events: Arc<ChannelBroadcaster>,
    pub lookup: SearchProfile,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/sessions", get(list_active).post(create_session))
        .route("/api/v1/sessions/:id", get(get_session))
        .route("/api/v1/sessions/:id/transcript", get(get_transcript).post(submit_transcript))
        .route("/api/v1/sessions/:id/audio", post(upload_audio))
        .route("/api/v1/sessions/:id/suggestions", get(list_suggestions).post(request_suggestions))
        .route("/api/v1/sessions/:id/end", post(end_session))
        .route("/api/v1/sessions/:id/events", get(session_events))
        .route("/api/v1/knowledge/documents", post(ingest_document))
        .route("/api/v1/knowledge/documents/:id", delete(remove_document))
        .route("/api/v1/knowledge/search", post(search_knowledge))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let chunks = state.knowledge.chunk_count().await?;
    Ok(Json(json!({
        "status": "ok",
        "app_name": &*state.app_name,
        "scheduled_sessions": state.sessions.scheduler().active_sessions(),
        "knowledge_chunks": chunks,
        "event_channels": state.events.open_channels(),
    })))
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    doctor_id: String,
    #[serde(default)]
    patient_id: Option<String>,
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Response, ApiError> {
    let session = state
        .sessions
        .start_session(&req.doctor_id, req.patient_id.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(session)).into_response())
}

async fn list_active(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(state.sessions.active_sessions().await?).into_response())
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    Ok(Json(state.sessions.get_session(&id).await?).into_response())
}

#[derive(Deserialize)]
struct TranscriptRequest {
    text: String,
    #[serde(default)]
    confidence: Option<f32>,
}

async fn submit_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TranscriptRequest>,
) -> Result<Response, ApiError> {
    match state.sessions.submit_transcript(&id, &req.text, req.confidence).await? {
        Some(line) => Ok((StatusCode::CREATED, Json(line)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[derive(Deserialize)]
struct TranscriptQuery {
    #[serde(default = "default_transcript_limit")]
    limit: usize,
}

fn default_transcript_limit() -> usize {
    50
}

async fn get_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
    axum::extract::Query(q): axum::extract::Query<TranscriptQuery>,
) -> Result<Response, ApiError> {
    Ok(Json(state.sessions.recent_transcript(&id, q.limit).await?).into_response())
}

/// Raw audio chunk in the body.
async fn upload_audio(State(state): State<AppState>, Path(id): Path<String>, body: Bytes) -> Result<Response, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty audio body".to_string()));
    }
    match state.sessions.ingest_audio(&id, &body).await? {
        Some(line) => Ok((StatusCode::CREATED, Json(line)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn request_suggestions(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    Ok(Json(state.sessions.request_suggestions(&id).await?).into_response())
}

async fn list_suggestions(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    Ok(Json(state.sessions.list_suggestions(&id).await?).into_response())
}

async fn end_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let session = state.sessions.end_session(&id).await?;
    state.events.close(&id);
    Ok(Json(session).into_response())
}

/// SSE stream of `SessionEvent`s; ends when the session ends. Ended sessions get 409.
async fn session_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if !state.sessions.get_session(&id).await?.is_active() {
        return Err(SessionError::NotActive(id).into());
    }
    let mut rx = state.events.subscribe(&id);
    // The session may have ended (and its channel closed) before we subscribed.
    if !state.sessions.get_session(&id).await?.is_active() {
        state.events.close(&id);
        return Err(SessionError::NotActive(id).into());
    }
    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(event.name()).json_data(&event) {
                    Ok(e) => yield Ok(e),
                    Err(e) => tracing::warn!("⚠ Failed to encode session event: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    yield Ok(Event::default().comment(format!("{} events dropped", n)));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

#[derive(Deserialize)]
struct IngestRequest {
    name: String,
    content: String,
    #[serde(default)]
    category: Option<String>,
}

async fn ingest_document(State(state): State<AppState>, Json(req): Json<IngestRequest>) -> Result<Response, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("document name must not be blank".to_string()));
    }
    let report = state
        .knowledge
        .ingest_document(&req.name, &req.content, req.category.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(report)).into_response())
}

async fn remove_document(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let removed = state.knowledge.remove_document(&id).await?;
    Ok(Json(json!({ "removed": removed })).into_response())
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    min_score: Option<f32>,
}

async fn search_knowledge(State(state): State<AppState>, Json(req): Json<SearchRequest>) -> Result<Response, ApiError> {
    let top_k = req.top_k.unwrap_or(state.lookup.top_k);
    let min_score = req.min_score.unwrap_or(state.lookup.min_score);
    let hits = state.knowledge.search(&req.query, top_k, min_score).await?;
    Ok(Json(hits).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use clara_core::{ClaraConfig, ClaraRuntime, StorageBackend};
    use tower::ServiceExt;

    fn test_app() -> Router {
        let cfg = ClaraConfig {
            app_name: "Clara Test".to_string(),
            storage_backend: StorageBackend::Memory,
            ..ClaraConfig::default()
        };
        let rt = ClaraRuntime::build(&cfg).unwrap();
        router(AppState {
            app_name: Arc::from(cfg.app_name.as_str()),
            sessions: rt.sessions,
            knowledge: rt.knowledge,
            events: rt.events,
            lookup: cfg.knowledge.lookup,
        })
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_app_name() {
        let res = test_app().oneshot(empty_request("GET", "/api/v1/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["app_name"], "Clara Test");
        assert_eq!(json["knowledge_chunks"], 0);
    }

    #[tokio::test]
    async fn session_lifecycle_over_http() {
        let app = test_app();
        let res = app
            .clone()
            .oneshot(json_request("POST", "/api/v1/sessions", json!({"doctor_id": "dr-9", "patient_id": "P1"})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let session = body_json(res).await;
        let id = session["id"].as_str().unwrap().to_string();
        assert_eq!(session["status"], "active");

        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/api/v1/sessions/{}/transcript", id),
                json!({"text": "What seems to be the problem?"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(body_json(res).await["speaker"], "doctor");

        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/api/v1/sessions/{}/transcript", id),
                json!({"text": "   "}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let res = app
            .clone()
            .oneshot(empty_request("POST", &format!("/api/v1/sessions/{}/end", id)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["status"], "completed");

        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/api/v1/sessions/{}/transcript", id),
                json!({"text": "one more thing"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = app
            .oneshot(empty_request("GET", &format!("/api/v1/sessions/{}/suggestions", id)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await, json!([]));
    }

    #[tokio::test]
    async fn events_for_ended_session_are_refused() {
        let app = test_app();
        let res = app
            .clone()
            .oneshot(json_request("POST", "/api/v1/sessions", json!({"doctor_id": "dr-3"})))
            .await
            .unwrap();
        let id = body_json(res).await["id"].as_str().unwrap().to_string();
        let res = app
            .clone()
            .oneshot(empty_request("POST", &format!("/api/v1/sessions/{}/end", id)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = tokio::time::timeout(
            Duration::from_secs(3),
            app.clone()
                .oneshot(empty_request("GET", &format!("/api/v1/sessions/{}/events", id))),
        )
        .await
        .expect("events request should answer promptly")
        .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);
        let body = tokio::time::timeout(Duration::from_secs(3), body_json(res))
            .await
            .expect("error body should be complete");
        assert!(body["error"].as_str().unwrap().contains("not active"));

        let res = app.oneshot(empty_request("GET", "/api/v1/health")).await.unwrap();
        assert_eq!(body_json(res).await["event_channels"], 0);
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let app = test_app();
        let res = app
            .clone()
            .oneshot(empty_request("GET", "/api/v1/sessions/nope"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(body_json(res).await["error"].as_str().unwrap().contains("nope"));

        let res = app
            .clone()
            .oneshot(json_request("POST", "/api/v1/sessions", json!({"doctor_id": " "})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app
            .clone()
            .oneshot(json_request("POST", "/api/v1/sessions", json!({"doctor_id": "dr-1"})))
            .await
            .unwrap();
        let id = body_json(res).await["id"].as_str().unwrap().to_string();
        let req = Request::builder()
            .method("POST")
            .uri(format!("/api/v1/sessions/{}/audio", id))
            .body(Body::from(vec![1u8, 2, 3]))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn ingest_then_search_knowledge() {
        let app = test_app();
        let text = "Chest pain with diaphoresis warrants an urgent ECG and troponin.";
        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/knowledge/documents",
                json!({"name": "acs.md", "content": text, "category": "cardiology"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let report = body_json(res).await;
        assert_eq!(report["chunks"], 1);

        let res = app
            .clone()
            .oneshot(json_request("POST", "/api/v1/knowledge/search", json!({"query": text})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let hits = body_json(res).await;
        assert_eq!(hits.as_array().unwrap().len(), 1);
        assert_eq!(hits[0]["document_name"], "acs.md");
        assert_eq!(hits[0]["category"], "cardiology");

        let res = app
            .oneshot(json_request("POST", "/api/v1/knowledge/documents", json!({"name": "empty", "content": "  "})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
