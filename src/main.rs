//! prometheus alertmanager receiver that republishes alert groups to AWS SNS
//! topics
//!
//! Features:
//! - per-protocol tera templates (default, email, sms) so topic subscribers
//!   see a rendering suited to their delivery medium
//! - bounded retries with exponential backoff for transient SNS errors
//! - prometheus metrics endpoint

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    dispatch::Dispatcher, publisher::Publisher, renderer::AlertRenderer, settings::Settings,
    sns::SnsApi,
};

mod alert;
mod dispatch;
mod envelope;
mod log;
mod publisher;
mod receiver;
mod renderer;
mod settings;
mod sns;
mod telemetry;

/// exit the complete program if one thread panics
fn setup_panic_handler() {
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));
}

/// the entry point of the program
#[tokio::main]
pub async fn main() -> Result<()> {
    setup_panic_handler();

    log::setup_logging().context("could not setup logging")?;

    let settings = Settings::global();

    let renderer =
        AlertRenderer::new(&settings.templates).context("failed to load protocol templates")?;

    let publisher = Publisher::new(
        Box::new(SnsApi::new(&settings.sns).await),
        settings.publish,
    );

    let dispatcher = Arc::new(Dispatcher::new(renderer, publisher));

    tokio::spawn(async move {
        #[allow(clippy::expect_used)]
        receiver::run_webhook_receiver(dispatcher)
            .await
            .expect("alertmanager webhook receiver failed to start or crashed");
    });

    telemetry::run_telemetry_endpoint().await
}
