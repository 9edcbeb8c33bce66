use anyhow::{Context, Result};
use clap::{App, Arg};
use config::Config;
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::{
    log::LogSettings, publisher::RetrySettings, receiver::AlertReceiverSettings,
    renderer::TemplateSettings, sns::SnsSettings, telemetry::TelemetryEndpointSettings,
};

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub alert_webhook_receiver: AlertReceiverSettings,
    pub telemetry_endpoint: TelemetryEndpointSettings,
    pub templates: TemplateSettings,
    pub sns: SnsSettings,
    #[serde(default)]
    pub publish: RetrySettings,
    pub log: LogSettings,
}

impl Settings {
    pub fn global() -> &'static Self {
        SETTINGS.get_or_init(|| {
            match Self::load().context("failed to load config and command line arguments") {
                Ok(settings) => settings,
                Err(err) => {
                    // tracing wasn't setup yet
                    panic!("{:#?}", err);
                }
            }
        })
    }

    fn load() -> Result<Self> {
        let opts = App::new(clap::crate_name!())
            .version(clap::crate_version!())
            .about(clap::crate_description!())
            .arg(
                Arg::new("config")
                    .help("path of config file")
                    .takes_value(true)
                    .short('c')
                    .long("config")
                    .default_value("./config.yaml"),
            )
            .arg(
                Arg::new("level")
                    .help("log level")
                    .possible_values(["Error", "Warn", "Info", "Debug", "Trace"])
                    .ignore_case(true)
                    .takes_value(true)
                    .long("log"),
            )
            .get_matches();

        let config_path = opts.value_of("config").unwrap();

        let mut conf = Config::new();
        conf.merge(config::File::with_name(config_path))
            .context("can't load config")?;

        let mut settings: Settings = conf.try_into().context("can't load config")?;

        if let Some(level) = opts.value_of("level") {
            settings.log.level = level.to_string();
        }

        Ok(settings)
    }
}
