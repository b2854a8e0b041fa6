use axum::{
    extract::Request,
    http::{header, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{Aviator, Backend};

mod http;

pub struct Api<B: Backend> {
    aviator: Arc<Aviator<B>>,
}

impl<B: Backend> Api<B> {
    pub fn new(aviator: Arc<Aviator<B>>) -> Self {
        Self { aviator }
    }

    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/healthz", get(http::healthz))
            .route("/metrics", get(http::metrics::<B>))
            .route("/subscriptions", post(http::subscribe::<B>))
            .route("/subscriptions/:org_id", delete(http::unsubscribe::<B>))
            .route(
                "/settings/:org_id",
                get(http::get_settings::<B>).put(http::update_settings::<B>),
            )
            .route("/bets", post(http::place_bet::<B>))
            .route("/bets/cashout", post(http::cashout::<B>))
            .route("/bets/cancel", post(http::cancel::<B>))
            .route("/orgs/:org_id/flight", get(http::current_flight::<B>))
            .route("/orgs/:org_id/history", get(http::history::<B>))
            .route(
                "/orgs/:org_id/users/:user_id/active-bets",
                get(http::active_bets::<B>),
            )
            .route("/users/:user_id/bets", get(http::bets_page::<B>));

        let router = router.layer(middleware::from_fn(request_id_middleware));
        let router = router.layer(TraceLayer::new_for_http());

        router.with_state(self.aviator.clone())
    }
}

async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(header::HeaderName::from_static("x-request-id"))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let mut response = next.run(req).await;
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            header::HeaderName::from_static("x-request-id"),
            header_value,
        );
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "http.request"
    );
    response
}
