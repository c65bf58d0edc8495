use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{
    ActorId, ClassId, MappingId, SessionId, StudentId, SubjectId, TeacherId, TemplateId,
    TenantId, TermId,
};
use super::errors::EngineError;
use super::mapping::{MappingChanges, MappingDraft};
use super::promotion::PromotionDecisionInput;
use super::repository::{AcademicRepository, NotificationPublisher};
use super::service::AcademicEngine;
use super::templates::TemplateDraft;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Router builder exposing the grading, promotion and calendar endpoints.
pub fn academic_router<R, N>(engine: Arc<AcademicEngine<R, N>>) -> Router
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    Router::new()
        .route(
            "/api/v1/grading/templates",
            post(create_template_handler::<R, N>),
        )
        .route(
            "/api/v1/grading/templates/default",
            get(default_template_handler::<R, N>),
        )
        .route(
            "/api/v1/grading/templates/:template_id",
            get(fetch_template_handler::<R, N>)
                .put(update_template_handler::<R, N>)
                .delete(delete_template_handler::<R, N>),
        )
        .route(
            "/api/v1/grading/templates/:template_id/default",
            post(set_default_template_handler::<R, N>),
        )
        .route(
            "/api/v1/grading/mappings",
            post(create_mapping_handler::<R, N>).get(list_mappings_handler::<R, N>),
        )
        .route(
            "/api/v1/grading/mappings/preview",
            get(mapping_preview_handler::<R, N>),
        )
        .route(
            "/api/v1/grading/mappings/:mapping_id",
            put(update_mapping_handler::<R, N>).delete(deactivate_mapping_handler::<R, N>),
        )
        .route(
            "/api/v1/grading/exam-types",
            get(exam_types_handler::<R, N>),
        )
        .route("/api/v1/grading/results", get(result_handler::<R, N>))
        .route("/api/v1/grading/rankings", get(ranking_handler::<R, N>))
        .route(
            "/api/v1/promotions/:session_id/preview",
            get(promotion_preview_handler::<R, N>),
        )
        .route(
            "/api/v1/promotions/:session_id/candidates",
            get(promotion_candidates_handler::<R, N>),
        )
        .route(
            "/api/v1/promotions/:session_id/execute",
            post(execute_promotions_handler::<R, N>),
        )
        .route(
            "/api/v1/calendar/sessions/:session_id/current",
            post(current_session_handler::<R, N>),
        )
        .route(
            "/api/v1/calendar/terms/:term_id/current",
            post(current_term_handler::<R, N>),
        )
        .with_state(engine)
}

type Engine<R, N> = State<Arc<AcademicEngine<R, N>>>;

#[derive(Debug, Deserialize)]
pub(crate) struct SubjectTermQuery {
    subject: SubjectId,
    term: TermId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PreviewQuery {
    subject: SubjectId,
    term: TermId,
    template: TemplateId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResultQuery {
    student: StudentId,
    subject: SubjectId,
    term: TermId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RankingQuery {
    class: ClassId,
    term: TermId,
    #[serde(default)]
    subject: Option<SubjectId>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClassFilterQuery {
    #[serde(default)]
    class: Option<ClassId>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExecuteRequest {
    decisions: Vec<PromotionDecisionInput>,
}

pub(crate) async fn create_template_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Json(draft): Json<TemplateDraft>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let (tenant, actor) = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    respond(
        StatusCode::CREATED,
        engine.save_template(&tenant, &actor, draft),
    )
}

pub(crate) async fn update_template_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Path(template_id): Path<String>,
    Json(draft): Json<TemplateDraft>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let (tenant, actor) = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    let id = TemplateId(template_id);
    respond(
        StatusCode::OK,
        engine.templates().update_template(&tenant, &actor, &id, draft),
    )
}

pub(crate) async fn fetch_template_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Path(template_id): Path<String>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let tenant = match tenant_of(&headers) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine.templates().fetch(&tenant, &TemplateId(template_id)),
    )
}

pub(crate) async fn default_template_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let tenant = match tenant_of(&headers) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    respond(StatusCode::OK, engine.templates().default_for(&tenant))
}

pub(crate) async fn set_default_template_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Path(template_id): Path<String>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let (tenant, actor) = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine
            .templates()
            .set_default(&tenant, &actor, &TemplateId(template_id)),
    )
}

pub(crate) async fn delete_template_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Path(template_id): Path<String>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let (tenant, actor) = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine
            .templates()
            .delete_template(&tenant, &actor, &TemplateId(template_id)),
    )
}

pub(crate) async fn create_mapping_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Json(draft): Json<MappingDraft>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let (tenant, actor) = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    respond(
        StatusCode::CREATED,
        engine.upsert_mapping(&tenant, &teacher_of(&actor), draft),
    )
}

pub(crate) async fn update_mapping_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Path(mapping_id): Path<String>,
    Json(changes): Json<MappingChanges>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let (tenant, actor) = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine.mapper().update_mapping(
            &tenant,
            &teacher_of(&actor),
            &MappingId(mapping_id),
            changes,
        ),
    )
}

pub(crate) async fn deactivate_mapping_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Path(mapping_id): Path<String>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let (tenant, actor) = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine
            .mapper()
            .deactivate_mapping(&tenant, &teacher_of(&actor), &MappingId(mapping_id)),
    )
}

pub(crate) async fn list_mappings_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Query(query): Query<SubjectTermQuery>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let (tenant, actor) = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine
            .mapper()
            .list_mappings(&tenant, &teacher_of(&actor), &query.subject, &query.term),
    )
}

pub(crate) async fn exam_types_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Query(query): Query<SubjectTermQuery>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let (tenant, actor) = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine
            .mapper()
            .exam_types(&tenant, &teacher_of(&actor), &query.subject, &query.term),
    )
}

pub(crate) async fn mapping_preview_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Query(query): Query<PreviewQuery>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let (tenant, actor) = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine.mapper().preview(
            &tenant,
            &teacher_of(&actor),
            &query.subject,
            &query.term,
            &query.template,
        ),
    )
}

pub(crate) async fn result_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Query(query): Query<ResultQuery>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let tenant = match tenant_of(&headers) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine.compute_grade(&tenant, &query.student, &query.subject, &query.term),
    )
}

pub(crate) async fn ranking_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Query(query): Query<RankingQuery>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let tenant = match tenant_of(&headers) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine.rank_class(&tenant, &query.class, query.subject.as_ref(), &query.term),
    )
}

pub(crate) async fn promotion_preview_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(query): Query<ClassFilterQuery>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let tenant = match tenant_of(&headers) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine.preview_promotions(&tenant, &SessionId(session_id), query.class.as_ref()),
    )
}

pub(crate) async fn promotion_candidates_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(query): Query<ClassFilterQuery>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let tenant = match tenant_of(&headers) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine
            .planner()
            .candidates(&tenant, &SessionId(session_id), query.class.as_ref()),
    )
}

pub(crate) async fn execute_promotions_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let (tenant, actor) = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    let result = engine
        .execute_promotions(&tenant, &SessionId(session_id), &actor, request.decisions)
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn current_session_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let tenant = match tenant_of(&headers) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine
            .calendar()
            .set_current_session(&tenant, &SessionId(session_id)),
    )
}

pub(crate) async fn current_term_handler<R, N>(
    State(engine): Engine<R, N>,
    headers: HeaderMap,
    Path(term_id): Path<String>,
) -> Response
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let tenant = match tenant_of(&headers) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine.calendar().set_current_term(&tenant, &TermId(term_id)),
    )
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn missing_header(name: &str) -> Response {
    let payload = json!({
        "error": format!("missing required header {name}"),
        "kind": "invalid",
    });
    (StatusCode::BAD_REQUEST, Json(payload)).into_response()
}

fn tenant_of(headers: &HeaderMap) -> Result<TenantId, Response> {
    header_value(headers, TENANT_HEADER)
        .map(TenantId)
        .ok_or_else(|| missing_header(TENANT_HEADER))
}

fn caller(headers: &HeaderMap) -> Result<(TenantId, ActorId), Response> {
    let tenant = tenant_of(headers)?;
    let actor = header_value(headers, ACTOR_HEADER)
        .map(ActorId)
        .ok_or_else(|| missing_header(ACTOR_HEADER))?;
    Ok((tenant, actor))
}

/// Teachers act on their own behalf.
fn teacher_of(actor: &ActorId) -> TeacherId {
    TeacherId::new(actor.as_str())
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, EngineError>) -> Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) fn error_status(error: &EngineError) -> StatusCode {
    match error {
        EngineError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
        EngineError::Invalid(_) => StatusCode::BAD_REQUEST,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(error: &EngineError) -> Response {
    let payload = json!({
        "error": error.to_string(),
        "kind": error.kind(),
    });
    (error_status(error), Json(payload)).into_response()
}
