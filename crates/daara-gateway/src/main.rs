use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result as AnyResult};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use daara_core::{
    DomainEventKind, EngineError, EventStore, LedgerStore, MemberId, NewObligation,
    NewSettlement, Obligation, ObligationFilter, Settlement, SettlementFilter,
};
use daara_finance::{MemberBreakdown, PortfolioTotals};
use daara_ledger::{CategoryKey, CategoryTotals, ObligationView, ProgramSlots, SettlementEngine};
use daara_platform::{
    AssignSlotsRequest, BatchItem, CategoryQuery, CreateSlotsRequest, DeclareSettlementRequest,
    ErrorResponse, IssueDuesRequest, ItemsResponse, ObligationQuery, PendingQuery,
    PortfolioQuery, PgEventStore, PgLedgerStore, ReassignRequest, RedisBus,
    RejectSettlementRequest, ReviseAmountRequest, ServiceConfig, SettlementResolvedEvent,
    bootstrap_schema, connect_database,
};
use daara_store::{InMemoryEventStore, InMemoryLedgerStore};
use daara_tools::{MemberDirectory, StaticAuthority, StaticDirectory, ValidationAuthority};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};
use uuid::Uuid;

const MEMBER_HEADER: &str = "x-member-id";

#[derive(Clone)]
struct AppState {
    engine: Arc<SettlementEngine>,
    authority: Arc<dyn ValidationAuthority>,
    directory: Arc<dyn MemberDirectory>,
    redis: Option<RedisBus>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, error_kind: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error_kind: error_kind.to_string(),
                message: message.into(),
            },
        }
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden", message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BadRequest", message)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = status_for(&err);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("engine failure: {err}");
        }
        Self {
            status,
            body: ErrorResponse::from(&err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::ObligationNotFound(_)
        | EngineError::SettlementNotFound(_)
        | EngineError::SlotNotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::InvalidTransition { .. }
        | EngineError::OverpaymentDetected { .. }
        | EngineError::ObligationLocked { .. }
        | EngineError::ObligationHasSettlements { .. }
        | EngineError::DuplicateAssignment(_)
        | EngineError::DuplicateReference { .. } => StatusCode::CONFLICT,
        EngineError::InvalidAmount { .. }
        | EngineError::MissingReference { .. }
        | EngineError::InvalidPeriod(_)
        | EngineError::InvalidSlotCount { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Clone, Serialize)]
struct ObligationViewResponse {
    #[serde(flatten)]
    view: ObligationView,
    owner_display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct HistoryEntry {
    sequence: i64,
    kind: DomainEventKind,
    actor: Option<String>,
    occurred_at: DateTime<Utc>,
    payload: Value,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "daara_gateway=info,daara_ledger=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;

    let (store, events): (Arc<dyn LedgerStore>, Arc<dyn EventStore>) = match &config.database_url
    {
        Some(database_url) => {
            let pool = connect_database(database_url).await?;
            bootstrap_schema(&pool).await?;
            info!("using postgres ledger store");
            (
                Arc::new(PgLedgerStore::new(pool.clone())),
                Arc::new(PgEventStore::new(pool)),
            )
        }
        None => {
            warn!("DATABASE_URL not set; ledger lives in memory and is lost on restart");
            (
                Arc::new(InMemoryLedgerStore::new()),
                Arc::new(InMemoryEventStore::default()),
            )
        }
    };
    let redis = config
        .redis_url
        .as_deref()
        .map(RedisBus::connect)
        .transpose()?;

    if config.validators.is_empty() {
        warn!("DAARA_VALIDATORS is empty; confirm, reject and reassign will be refused");
    }
    let directory = config
        .members
        .iter()
        .fold(StaticDirectory::default(), |directory, (id, name)| {
            directory.with_member(id.as_str(), name.as_str())
        });

    let state = AppState {
        engine: Arc::new(SettlementEngine::new(store, events)),
        authority: Arc::new(StaticAuthority::new(config.validators.clone())),
        directory: Arc::new(directory),
        redis,
    };

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/obligations",
            get(list_obligations).post(create_obligation),
        )
        .route(
            "/obligations/{obligation_id}",
            get(get_obligation).delete(delete_obligation),
        )
        .route("/obligations/{obligation_id}/reassign", post(reassign))
        .route("/obligations/{obligation_id}/amount", post(revise_amount))
        .route("/obligations/{obligation_id}/history", get(history))
        .route(
            "/obligations/{obligation_id}/settlements",
            get(list_settlements).post(declare_settlement),
        )
        .route("/programs/{program_id}/slots", post(create_slots))
        .route("/programs/{program_id}/assignments", post(assign_slots))
        .route("/programs/{program_id}/dues", post(issue_dues))
        .route("/settlements/pending", get(list_pending))
        .route("/settlements/{settlement_id}/confirm", post(confirm))
        .route("/settlements/{settlement_id}/reject", post(reject))
        .route("/reports/portfolio", get(portfolio))
        .route("/reports/members/{member_id}", get(member_report))
        .route("/reports/categories", get(category_report))
        .with_state(state);

    let addr: SocketAddr = config
        .http_addr
        .parse()
        .with_context(|| format!("invalid HTTP_ADDR {}", config.http_addr))?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_obligation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewObligation>,
) -> ApiResult<Obligation> {
    let actor = acting_member(&headers);
    let obligation = state
        .engine
        .create_obligation(payload, actor.as_deref())
        .await?;
    Ok(Json(obligation))
}

async fn list_obligations(
    State(state): State<AppState>,
    Query(query): Query<ObligationQuery>,
) -> ApiResult<ItemsResponse<ObligationViewResponse>> {
    let filter = ObligationFilter {
        member: query.member,
        program_id: query.program,
        kind: query.kind,
        slot: None,
        created_from: query.from,
        created_to: query.to,
    };
    let views = state.engine.list_obligation_views(&filter).await?;

    let mut items = Vec::with_capacity(views.len());
    for view in views {
        items.push(with_display_name(&state, view).await);
    }
    Ok(Json(ItemsResponse { items }))
}

async fn get_obligation(
    State(state): State<AppState>,
    Path(obligation_id): Path<Uuid>,
) -> ApiResult<ObligationViewResponse> {
    let view = state.engine.obligation_view(obligation_id).await?;
    Ok(Json(with_display_name(&state, view).await))
}

async fn delete_obligation(
    State(state): State<AppState>,
    Path(obligation_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let actor = acting_member(&headers);
    state
        .engine
        .delete_obligation(obligation_id, actor.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reassign(
    State(state): State<AppState>,
    Path(obligation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<ReassignRequest>,
) -> ApiResult<Obligation> {
    let validator = require_validator(&state, &headers)?;
    let obligation = state
        .engine
        .reassign(
            obligation_id,
            payload.owner_member_id,
            payload.force,
            Some(&validator),
        )
        .await?;
    Ok(Json(obligation))
}

async fn revise_amount(
    State(state): State<AppState>,
    Path(obligation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<ReviseAmountRequest>,
) -> ApiResult<Obligation> {
    let validator = require_validator(&state, &headers)?;
    let obligation = state
        .engine
        .revise_amount(obligation_id, payload.amount_due, Some(&validator))
        .await?;
    Ok(Json(obligation))
}

async fn history(
    State(state): State<AppState>,
    Path(obligation_id): Path<Uuid>,
) -> ApiResult<ItemsResponse<HistoryEntry>> {
    let items = state
        .engine
        .history(obligation_id)
        .await?
        .into_iter()
        .map(|envelope| HistoryEntry {
            sequence: envelope.sequence,
            kind: envelope.event.kind,
            actor: envelope.event.actor,
            occurred_at: envelope.event.occurred_at,
            payload: envelope.event.payload,
        })
        .collect();
    Ok(Json(ItemsResponse { items }))
}

async fn declare_settlement(
    State(state): State<AppState>,
    Path(obligation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<DeclareSettlementRequest>,
) -> Result<(StatusCode, Json<Settlement>), ApiError> {
    let declared_by = payload
        .declared_by_member_id
        .or_else(|| acting_member(&headers))
        .ok_or_else(|| {
            ApiError::bad_request(format!(
                "declared_by_member_id or the {MEMBER_HEADER} header is required"
            ))
        })?;

    let settlement = state
        .engine
        .declare_settlement(NewSettlement {
            obligation_id,
            declared_by_member_id: declared_by,
            amount: payload.amount,
            method: payload.method,
            external_reference: payload.external_reference,
            idempotency_key: payload.idempotency_key,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(settlement)))
}

async fn list_settlements(
    State(state): State<AppState>,
    Path(obligation_id): Path<Uuid>,
) -> ApiResult<ItemsResponse<Settlement>> {
    let items = state.engine.list_settlements(obligation_id).await?;
    Ok(Json(ItemsResponse { items }))
}

async fn create_slots(
    State(state): State<AppState>,
    Path(program_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<CreateSlotsRequest>,
) -> ApiResult<ItemsResponse<Obligation>> {
    let actor = acting_member(&headers);
    let items = state
        .engine
        .create_program_slots(
            ProgramSlots {
                program_id,
                label_prefix: payload.label_prefix,
                count: payload.count,
                amount_due: payload.amount_due,
                due_period: payload.due_period,
            },
            actor.as_deref(),
        )
        .await?;
    Ok(Json(ItemsResponse { items }))
}

async fn assign_slots(
    State(state): State<AppState>,
    Path(program_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<AssignSlotsRequest>,
) -> ApiResult<ItemsResponse<BatchItem<u32, Obligation>>> {
    let validator = require_validator(&state, &headers)?;
    let items = state
        .engine
        .assign_slots(
            program_id,
            payload.assignments,
            payload.force,
            Some(&validator),
        )
        .await?
        .into_iter()
        .map(|outcome| BatchItem::from_result(outcome.slot, outcome.result))
        .collect();
    Ok(Json(ItemsResponse { items }))
}

async fn issue_dues(
    State(state): State<AppState>,
    Path(program_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<IssueDuesRequest>,
) -> ApiResult<ItemsResponse<BatchItem<MemberId, Obligation>>> {
    let actor = acting_member(&headers);
    let items = state
        .engine
        .issue_dues(
            program_id,
            &payload.members,
            payload.period,
            payload.amount_due,
            actor.as_deref(),
        )
        .await?
        .into_iter()
        .map(|(member, result)| BatchItem::from_result(member, result))
        .collect();
    Ok(Json(ItemsResponse { items }))
}

async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> ApiResult<ItemsResponse<Settlement>> {
    let items = state
        .engine
        .list_pending(SettlementFilter {
            declared_by: query.declared_by,
            method: query.method,
            ..SettlementFilter::default()
        })
        .await?;
    Ok(Json(ItemsResponse { items }))
}

async fn confirm(
    State(state): State<AppState>,
    Path(settlement_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Settlement> {
    let validator = require_validator(&state, &headers)?;
    let settlement = state.engine.confirm(settlement_id, &validator).await?;
    publish_resolution(&state, &settlement).await;
    Ok(Json(settlement))
}

async fn reject(
    State(state): State<AppState>,
    Path(settlement_id): Path<Uuid>,
    headers: HeaderMap,
    payload: Option<Json<RejectSettlementRequest>>,
) -> ApiResult<Settlement> {
    let validator = require_validator(&state, &headers)?;
    let note = payload.and_then(|Json(request)| request.note);
    let settlement = state
        .engine
        .reject(settlement_id, &validator, note)
        .await?;
    publish_resolution(&state, &settlement).await;
    Ok(Json(settlement))
}

async fn portfolio(
    State(state): State<AppState>,
    Query(query): Query<PortfolioQuery>,
) -> ApiResult<PortfolioTotals> {
    let filter = ObligationFilter {
        program_id: query.program,
        kind: query.kind,
        ..ObligationFilter::default()
    };
    Ok(Json(state.engine.portfolio(&filter).await?))
}

async fn member_report(
    State(state): State<AppState>,
    Path(member_id): Path<String>,
) -> ApiResult<MemberBreakdown> {
    Ok(Json(state.engine.member_report(&member_id).await?))
}

async fn category_report(
    State(state): State<AppState>,
    Query(query): Query<CategoryQuery>,
) -> ApiResult<ItemsResponse<CategoryTotals>> {
    let key = match query.group_by.as_deref() {
        None => CategoryKey::Program,
        Some(raw) => raw
            .parse::<CategoryKey>()
            .map_err(|err| ApiError::bad_request(err.to_string()))?,
    };
    let filter = ObligationFilter {
        program_id: query.program,
        kind: query.kind,
        ..ObligationFilter::default()
    };
    let items = state.engine.category_report(&filter, key).await?;
    Ok(Json(ItemsResponse { items }))
}

fn acting_member(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MEMBER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn require_validator(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let Some(member) = acting_member(headers) else {
        return Err(ApiError::forbidden(format!(
            "the {MEMBER_HEADER} header is required for validation actions"
        )));
    };
    if !state.authority.caller_can_validate(&member) {
        warn!("{member} attempted a validation action without authority");
        return Err(ApiError::forbidden(format!(
            "{member} is not allowed to validate"
        )));
    }
    Ok(member)
}

async fn with_display_name(state: &AppState, view: ObligationView) -> ObligationViewResponse {
    let owner_display_name = match &view.obligation.owner_member_id {
        Some(owner) => match state.directory.get_member(owner).await {
            Ok(member) => member.map(|member| member.display_name),
            Err(err) => {
                warn!("member directory lookup for {owner} failed: {err:#}");
                None
            }
        },
        None => None,
    };
    ObligationViewResponse {
        view,
        owner_display_name,
    }
}

async fn publish_resolution(state: &AppState, settlement: &Settlement) {
    let Some(redis) = &state.redis else {
        return;
    };
    let event = SettlementResolvedEvent::from(settlement);
    if let Err(err) = redis.publish_resolution(&event).await {
        error!("{err:#}");
    }
}
