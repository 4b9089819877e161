// src/server/handler.rs
use chrono::{DateTime, Utc};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tower::Service;

use crate::health::ServiceHealth;
use crate::metrics::MetricsRegistry;

pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub registry: MetricsRegistry,
    pub db_health: watch::Receiver<ServiceHealth>,
}

#[derive(Clone)]
pub struct AppHandler {
    state: Arc<AppState>,
}

impl AppHandler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl Service<Request<Body>> for AppHandler {
    type Response = Response<Body>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let state = self.state.clone();
        Box::pin(async move {
            let route = route_label(req.uri().path());
            let response = respond(&state, &req)
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
            state
                .registry
                .collector()
                .record_http_request(route, response.status().as_u16());
            Ok(response)
        })
    }
}

/// Fixed label set for the request counter; raw paths would blow up the
/// metric's cardinality.
fn route_label(path: &str) -> &'static str {
    match path {
        "/" => "/",
        "/healthz" => "/healthz",
        "/readyz" => "/readyz",
        "/metrics" => "/metrics",
        _ => "other",
    }
}

fn respond(state: &AppState, req: &Request<Body>) -> Result<Response<Body>, hyper::http::Error> {
    if req.method() != Method::GET {
        return Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .body(Body::from("Method Not Allowed"));
    }

    match req.uri().path() {
        "/healthz" => Response::builder()
            .status(StatusCode::OK)
            .body(Body::from("ok")),

        "/readyz" => {
            // Starting counts as ready: the server only binds after the gate
            // proved the database up, the monitor just has not voted yet.
            let db = *state.db_health.borrow();
            let (status, body) = if db == ServiceHealth::Unhealthy {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "status": "unready", "db": db.as_str() }),
                )
            } else {
                (
                    StatusCode::OK,
                    json!({ "status": "ready", "db": db.as_str() }),
                )
            };
            Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
        }

        "/metrics" => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain; version=0.0.4")
            .body(Body::from(state.registry.gather())),

        "/" => {
            let db = *state.db_health.borrow();
            let body = json!({
                "service": "bootgate",
                "version": env!("CARGO_PKG_VERSION"),
                "status": "running",
                "started_at": state.started_at.to_rfc3339(),
                "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
                "db": db.as_str(),
            });
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
        }

        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("Not Found")),
    }
}
