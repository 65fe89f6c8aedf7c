use std::convert::Infallible;

use axum::Json;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use compass_store::{OwnerId, ProjectUpdate};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::server::AppState;

pub(crate) const USER_HEADER: &str = "x-user-id";

/// Authenticated caller, as asserted by the upstream identity layer.
pub(crate) struct Caller(pub OwnerId);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|id| Self(OwnerId(id)))
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing or invalid user id"))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
}

pub(crate) async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

#[derive(Deserialize)]
pub(crate) struct CreateProject {
    pub name: String,
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub description: String,
}

pub(crate) async fn create_project(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Json(body): Json<CreateProject>,
) -> Result<Response, ApiError> {
    let project = state
        .service
        .create_project(owner, &body.name, &body.repo_url, &body.description)
        .await?;
    Ok((StatusCode::CREATED, Json(project)).into_response())
}

pub(crate) async fn list_projects(
    State(state): State<AppState>,
    Caller(owner): Caller,
) -> Result<Response, ApiError> {
    let projects = state.service.list_projects(owner).await?;
    Ok(Json(projects).into_response())
}

pub(crate) async fn get_project(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let project = state.service.project(owner, &name).await?;
    Ok(Json(project).into_response())
}

pub(crate) async fn update_project(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(name): Path<String>,
    Json(update): Json<ProjectUpdate>,
) -> Result<Response, ApiError> {
    let project = state.service.update_project(owner, &name, update).await?;
    Ok(Json(project).into_response())
}

pub(crate) async fn delete_project(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_project(owner, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct ImportResponse {
    message: &'static str,
    path: String,
    files: usize,
}

/// Ingest synchronously; the embedding build continues in the background.
pub(crate) async fn import_project(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let outcome = state.service.import(owner, &name).await?;
    Ok(Json(ImportResponse {
        message: "import complete, embedding build running in background",
        path: outcome.path.to_string_lossy().into_owned(),
        files: outcome.files,
    })
    .into_response())
}

pub(crate) async fn cancel_project(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let cancelled = state.service.cancel(owner, &name).await?;
    Ok(Json(serde_json::json!({ "cancelled": cancelled })).into_response())
}

#[derive(Deserialize)]
pub(crate) struct PathQuery {
    #[serde(default)]
    pub path: String,
}

pub(crate) async fn project_files(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(name): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Response, ApiError> {
    let tree = state.service.files(owner, &name, &query.path).await?;
    Ok(Json(tree).into_response())
}

#[derive(Serialize)]
struct ContentResponse {
    path: String,
    content: String,
}

pub(crate) async fn file_content(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(name): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Response, ApiError> {
    let content = state.service.content(owner, &name, &query.path).await?;
    Ok(Json(ContentResponse {
        path: query.path,
        content,
    })
    .into_response())
}

#[derive(Deserialize)]
pub(crate) struct AskRequest {
    pub question: String,
}

pub(crate) async fn ask(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(name): Path<String>,
    Json(body): Json<AskRequest>,
) -> Result<Response, ApiError> {
    let answer = state.service.ask(owner, &name, &body.question).await?;
    Ok(Json(serde_json::json!({ "answer": answer })).into_response())
}

/// Progress stream for one project. The session emits its own heartbeats.
pub(crate) async fn project_events(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(name): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let session = state.service.events(owner, &name).await?;
    let stream = session.into_stream().map(|frame| {
        Ok(Event::default()
            .event(frame.event)
            .data(frame.data.to_string()))
    });
    Ok(Sse::new(stream))
}

#[derive(Serialize)]
struct ApiKeyResponse {
    configured: bool,
    api_key: Option<String>,
}

pub(crate) async fn get_api_key(
    State(state): State<AppState>,
    Caller(owner): Caller,
) -> Result<Response, ApiError> {
    let masked = state.service.api_key(owner).await?;
    Ok(Json(ApiKeyResponse {
        configured: masked.is_some(),
        api_key: masked,
    })
    .into_response())
}

#[derive(Deserialize)]
pub(crate) struct SetApiKey {
    pub api_key: String,
}

pub(crate) async fn set_api_key(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Json(body): Json<SetApiKey>,
) -> Result<StatusCode, ApiError> {
    state.service.set_api_key(owner, &body.api_key).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn delete_api_key(
    State(state): State<AppState>,
    Caller(owner): Caller,
) -> Result<StatusCode, ApiError> {
    if state.service.delete_api_key(owner).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::new(StatusCode::NOT_FOUND, "no API key stored"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_serializes() {
        let resp = HealthResponse {
            status: "ok",
            uptime_secs: 42,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
    }

    #[test]
    fn create_project_defaults_optional_fields() {
        let body: CreateProject = serde_json::from_str(r#"{"name":"demo"}"#).unwrap();
        assert_eq!(body.name, "demo");
        assert!(body.repo_url.is_empty());
        assert!(body.description.is_empty());
    }

    #[test]
    fn path_query_defaults_to_root() {
        let q: PathQuery = serde_json::from_str("{}").unwrap();
        assert!(q.path.is_empty());
    }
}
