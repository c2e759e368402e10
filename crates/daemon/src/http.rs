use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use outing_core::{
    Actor, Decision, NewOutingRequest, OutingError, OutingId, OutingRequest, OutingStatus,
    OutingResult, OutingWorkflow, Role, ScanReceipt, StudentId, StudentProfile,
};
use serde::Deserialize;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[derive(Clone)]
pub struct AppState {
    workflow: Arc<OutingWorkflow>,
}

impl AppState {
    pub fn new(workflow: OutingWorkflow) -> Self {
        Self { workflow: Arc::new(workflow) }
    }

    /// Runs a workflow call on the blocking pool; the stores hold a
    /// `std::sync::Mutex` and sqlite may wait on its busy timeout.
    async fn run<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&OutingWorkflow) -> OutingResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let workflow = Arc::clone(&self.workflow);
        let res = tokio::task::spawn_blocking(move || f(&workflow))
            .await
            .map_err(|e| OutingError::Storage(anyhow::Error::new(e).context("workflow task failed")))?;
        Ok(res?)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/students/{id}", put(upsert_student))
        .route("/v1/outings", post(submit_outing).get(list_outings))
        .route("/v1/outings/{id}", get(get_outing))
        .route("/v1/outings/{id}/decision", post(decide_outing))
        .route("/v1/outings/{id}/qr", post(issue_qr))
        .route("/v1/gate/scan", post(gate_scan))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Caller identity as forwarded by the upstream identity provider.
pub struct Caller(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, ACTOR_ID_HEADER)
            .ok_or_else(|| OutingError::Unauthenticated(format!("missing {ACTOR_ID_HEADER} header")))?;
        let role = header(parts, ACTOR_ROLE_HEADER)
            .ok_or_else(|| OutingError::Unauthenticated(format!("missing {ACTOR_ROLE_HEADER} header")))?;
        let role = Role::parse(role)
            .ok_or_else(|| OutingError::Forbidden(format!("unknown actor role {role:?}")))?;
        Ok(Caller(Actor::new(id, role)))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

async fn upsert_student(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Json(mut profile): Json<StudentProfile>,
) -> Result<Json<StudentProfile>, AppError> {
    profile.id = StudentId::from_str(id);
    let profile = st
        .run(move |wf| {
            wf.students().upsert_student(&profile)?;
            Ok(profile)
        })
        .await?;
    tracing::info!(student_id = %profile.id, "student profile synced");
    Ok(Json(profile))
}

async fn submit_outing(
    State(st): State<AppState>,
    Caller(actor): Caller,
    Json(req): Json<NewOutingRequest>,
) -> Result<(StatusCode, Json<OutingRequest>), AppError> {
    let created = st.run(move |wf| wf.submit(&actor, req)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub student_id: Option<String>,
}

async fn list_outings(
    State(st): State<AppState>,
    Caller(actor): Caller,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<OutingRequest>>, AppError> {
    let listed = match (q.status, q.student_id) {
        (Some(_), Some(_)) => {
            return Err(OutingError::InvalidRequest("filter by status or student_id, not both".into()).into())
        }
        (Some(status), None) => {
            if actor.role == Role::Student {
                return Err(OutingError::Forbidden("students may only list their own requests".into()).into());
            }
            let status = OutingStatus::parse(&status)
                .ok_or_else(|| OutingError::InvalidRequest(format!("unknown status {status:?}")))?;
            st.run(move |wf| wf.list_by_status(status)).await?
        }
        (None, Some(student_id)) => {
            let student_id = StudentId::from_str(student_id);
            ensure_visible(&actor, &student_id)?;
            st.run(move |wf| wf.list_for_student(&student_id)).await?
        }
        (None, None) if actor.role == Role::Student => {
            let own = StudentId::from_str(actor.id.as_str());
            st.run(move |wf| wf.list_for_student(&own)).await?
        }
        (None, None) => {
            return Err(OutingError::InvalidRequest("status or student_id query parameter required".into()).into())
        }
    };
    Ok(Json(listed))
}

async fn get_outing(
    State(st): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<Json<OutingRequest>, AppError> {
    let id = OutingId::from_str(id);
    let req = st.run(move |wf| wf.get(&id)).await?;
    ensure_visible(&actor, &req.student_id)?;
    Ok(Json(req))
}

async fn decide_outing(
    State(st): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(decision): Json<Decision>,
) -> Result<Json<OutingRequest>, AppError> {
    let id = OutingId::from_str(id);
    let updated = st.run(move |wf| wf.decide(&actor, &id, decision)).await?;
    Ok(Json(updated))
}

async fn issue_qr(
    State(st): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<Json<OutingRequest>, AppError> {
    let id = OutingId::from_str(id);
    let issued = st.run(move |wf| wf.issue_qr(&actor, &id)).await?;
    Ok(Json(issued))
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub code: String,
    #[serde(default)]
    pub location: String,
}

async fn gate_scan(
    State(st): State<AppState>,
    Caller(actor): Caller,
    Json(scan): Json<ScanRequest>,
) -> Result<Json<ScanReceipt>, AppError> {
    let receipt = st.run(move |wf| wf.verify_scan(&actor, &scan.code, &scan.location)).await?;
    Ok(Json(receipt))
}

fn ensure_visible(actor: &Actor, owner: &StudentId) -> Result<(), OutingError> {
    if actor.role == Role::Student && actor.id.as_str() != owner.as_str() {
        return Err(OutingError::Forbidden(format!("{} may not read requests of {owner}", actor.id)));
    }
    Ok(())
}

#[derive(Debug)]
pub struct AppError(OutingError);

impl<E: Into<OutingError>> From<E> for AppError {
    fn from(value: E) -> Self {
        Self(value.into())
    }
}

pub fn status_for(err: &OutingError) -> StatusCode {
    match err {
        OutingError::InvalidTransition { .. } | OutingError::OutOfSequenceScan(_) | OutingError::Conflict(_) => {
            StatusCode::CONFLICT
        }
        OutingError::NotFullyApproved(_)
        | OutingError::RequestNotApproved { .. }
        | OutingError::UnresolvedCode
        | OutingError::StudentNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OutingError::NotFound(_) => StatusCode::NOT_FOUND,
        OutingError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        OutingError::Forbidden(_) => StatusCode::FORBIDDEN,
        OutingError::InvalidRequest(_) | OutingError::MalformedCode => StatusCode::BAD_REQUEST,
        OutingError::EncodingFailure(_) | OutingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, kind = self.0.kind(), "request failed");
        } else {
            tracing::debug!(error = %self.0, kind = self.0.kind(), "request rejected");
        }
        let body = Json(serde_json::json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        }));
        (status, body).into_response()
    }
}
