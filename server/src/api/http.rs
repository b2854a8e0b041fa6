use axum::{
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use grandaviator_types::{
    api::{
        ActiveBetsResponse, BetRef, BetResponse, ErrorResponse, HistoryResponse, PageQuery,
        PlaceBetRequest, SubscribeRequest, UpdateSettingsResponse,
    },
    SettingsPatch,
};
use serde::Serialize;
use std::sync::Arc;

use crate::metrics::EngineMetricsSnapshot;
use crate::{Aviator, Backend, ErrorKind, ServiceError};

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

#[derive(Serialize)]
struct MetricsResponse {
    running_engines: Vec<String>,
    #[serde(flatten)]
    engine: EngineMetricsSnapshot,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if self.kind() == ErrorKind::Internal {
            match std::error::Error::source(&self) {
                Some(cause) => tracing::error!(cause = %cause, "{}", self.message()),
                None => tracing::error!("{}", self.message()),
            }
        }
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            code: status.as_u16(),
            message: self.message().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, ServiceError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Liveness probe.
pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

pub(super) async fn metrics<B: Backend>(
    AxumState(aviator): AxumState<Arc<Aviator<B>>>,
) -> Response {
    Json(MetricsResponse {
        running_engines: aviator.registry().running(),
        engine: aviator.metrics().snapshot(),
    })
    .into_response()
}

pub(super) async fn subscribe<B: Backend>(
    AxumState(aviator): AxumState<Arc<Aviator<B>>>,
    Json(request): Json<SubscribeRequest>,
) -> Response {
    respond(StatusCode::OK, aviator.subscribe(request).await)
}

pub(super) async fn unsubscribe<B: Backend>(
    AxumState(aviator): AxumState<Arc<Aviator<B>>>,
    Path(org_id): Path<String>,
) -> Response {
    Json(aviator.unsubscribe(&org_id).await).into_response()
}

pub(super) async fn get_settings<B: Backend>(
    AxumState(aviator): AxumState<Arc<Aviator<B>>>,
    Path(org_id): Path<String>,
) -> Response {
    respond(StatusCode::OK, aviator.get_settings(&org_id).await)
}

pub(super) async fn update_settings<B: Backend>(
    AxumState(aviator): AxumState<Arc<Aviator<B>>>,
    Path(org_id): Path<String>,
    Json(patch): Json<SettingsPatch>,
) -> Response {
    let result = aviator
        .update_settings(&org_id, patch)
        .await
        .map(|settings| UpdateSettingsResponse {
            message: "settings have been updated".to_string(),
            settings,
        });
    respond(StatusCode::OK, result)
}

pub(super) async fn place_bet<B: Backend>(
    AxumState(aviator): AxumState<Arc<Aviator<B>>>,
    Json(request): Json<PlaceBetRequest>,
) -> Response {
    let result = aviator.place_bet(request).await.map(|bet| BetResponse {
        message: "bet has been placed".to_string(),
        bet,
    });
    respond(StatusCode::CREATED, result)
}

pub(super) async fn cashout<B: Backend>(
    AxumState(aviator): AxumState<Arc<Aviator<B>>>,
    Json(target): Json<BetRef>,
) -> Response {
    let result = aviator.cashout(target).await.map(|bet| BetResponse {
        message: "bet has been cashed out".to_string(),
        bet,
    });
    respond(StatusCode::OK, result)
}

pub(super) async fn cancel<B: Backend>(
    AxumState(aviator): AxumState<Arc<Aviator<B>>>,
    Json(target): Json<BetRef>,
) -> Response {
    let result = aviator.cancel(target).await.map(|bet| BetResponse {
        message: "bet has been canceled".to_string(),
        bet,
    });
    respond(StatusCode::OK, result)
}

/// Player-facing view of the current flight; the risk ceiling is never exposed.
pub(super) async fn current_flight<B: Backend>(
    AxumState(aviator): AxumState<Arc<Aviator<B>>>,
    Path(org_id): Path<String>,
) -> Response {
    let result = aviator
        .current_flight(&org_id)
        .await
        .map(|flight| flight.state_event());
    respond(StatusCode::OK, result)
}

pub(super) async fn history<B: Backend>(
    AxumState(aviator): AxumState<Arc<Aviator<B>>>,
    Path(org_id): Path<String>,
) -> Response {
    let result = aviator
        .history(&org_id)
        .await
        .map(|history| HistoryResponse { history });
    respond(StatusCode::OK, result)
}

pub(super) async fn active_bets<B: Backend>(
    AxumState(aviator): AxumState<Arc<Aviator<B>>>,
    Path((org_id, user_id)): Path<(String, String)>,
) -> Response {
    let result = aviator
        .active_bets(&org_id, &user_id)
        .await
        .map(|bets| ActiveBetsResponse { bets });
    respond(StatusCode::OK, result)
}

pub(super) async fn bets_page<B: Backend>(
    AxumState(aviator): AxumState<Arc<Aviator<B>>>,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    respond(StatusCode::OK, aviator.bets_page(&user_id, query).await)
}
