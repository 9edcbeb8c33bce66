//! Here we expose prometheus metrics about am2sns
use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Response, StatusCode},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;

use crate::settings::Settings;

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryEndpointSettings {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl TelemetryEndpointSettings {
    pub fn global() -> &'static Self {
        &Settings::global().telemetry_endpoint
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

async fn metrics_handler() -> Response<Body> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];

    if let Err(err) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("failed to encode prometheus metrics: {err}");
        #[allow(clippy::expect_used)]
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::empty())
            .expect("static response");
    }

    #[allow(clippy::expect_used)]
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, encoder.format_type())
        .body(Body::from(buffer))
        .expect("static response")
}

pub async fn run_telemetry_endpoint() -> Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));

    axum::Server::bind(&TelemetryEndpointSettings::global().to_socket_addr())
        .serve(app.into_make_service())
        .await
        .context("telemetry endpoint crashed")?;

    Ok(())
}
