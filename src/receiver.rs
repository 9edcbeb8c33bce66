//! Webhook endpoint receiving alert group notifications from the prometheus
//! alertmanager and handing them to the [dispatcher](crate::dispatch).

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path},
    handler::Handler,
    http::{StatusCode, Uri},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use prometheus::IntCounterVec;
use serde::Deserialize;

use crate::{
    dispatch::{DispatchError, Dispatcher},
    settings::Settings,
};

#[derive(Debug, Deserialize, Clone)]
pub struct AlertReceiverSettings {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl AlertReceiverSettings {
    pub fn global() -> &'static Self {
        &Settings::global().alert_webhook_receiver
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

struct State {
    dispatcher: Arc<Dispatcher>,
    dispatched: IntCounterVec,
}

impl State {
    fn new(dispatcher: Arc<Dispatcher>) -> Result<Self> {
        use prometheus::{opts, register_int_counter_vec};

        let dispatched = register_int_counter_vec!(
            opts!(
                "dispatched_alert_groups",
                "total number of alert group dispatches by result"
            )
            .namespace("am2sns")
            .subsystem("webhook"),
            &["result"]
        )?;

        Ok(Self {
            dispatcher,
            dispatched,
        })
    }
}

async fn handle_alert(
    Extension(state): Extension<Arc<State>>,
    Path(topic): Path<String>,
    body: Bytes,
) -> StatusCode {
    match state.dispatcher.dispatch(&topic, &body).await {
        Ok(published) => {
            state.dispatched.with_label_values(&["published"]).inc();
            tracing::info!(
                topic = topic.as_str(),
                group_key = published.group_key.as_str(),
                message_id = published.receipt.message_id.as_str(),
                attempts = published.receipt.attempts,
                "published alert group"
            );
            StatusCode::ACCEPTED
        }
        Err(err @ DispatchError::BadRequest(_)) => {
            state.dispatched.with_label_values(&[err.kind()]).inc();
            tracing::debug!(topic = topic.as_str(), "rejected alert group: {err}");
            StatusCode::BAD_REQUEST
        }
        Err(err) => {
            state.dispatched.with_label_values(&[err.kind()]).inc();
            tracing::error!(
                topic = topic.as_str(),
                kind = err.kind(),
                "failed to dispatch alert group: {err}"
            );
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn handle_health() -> (StatusCode, &'static str) {
    tracing::debug!("health check");
    (StatusCode::OK, "OK")
}

async fn handle_not_found(uri: Uri) -> StatusCode {
    tracing::debug!("route {uri} is not handled");
    StatusCode::NOT_FOUND
}

pub async fn run_webhook_receiver(dispatcher: Arc<Dispatcher>) -> Result<()> {
    let state = Arc::new(State::new(dispatcher).context("failed to register prometheus meters")?);
    let addr = AlertReceiverSettings::global().to_socket_addr();

    let app = Router::new()
        .route("/topics/:topic", post(handle_alert))
        .route("/health", get(handle_health))
        .fallback(handle_not_found.into_service())
        .layer(Extension(state));

    tracing::info!("started listening at {addr}");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .context("alertmanager webhook receiver crashed")?;

    Ok(())
}
