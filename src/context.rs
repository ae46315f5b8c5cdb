use crate::config::EngineSettings;
use crate::service::ForecastService;
use anyhow::{Context, Result};
use log::info;

pub struct AppContext {
    settings: EngineSettings,
    service: ForecastService,
}

impl AppContext {
    pub fn initialize() -> Result<Self> {
        let settings = EngineSettings::from_env().context("Invalid engine settings")?;
        Self::with_settings(settings)
    }

    pub fn with_settings(settings: EngineSettings) -> Result<Self> {
        info!(
            "Using cache dir {} and model dirs {} / {}",
            settings.cache_dir.display(),
            settings.prophet_model_dir.display(),
            settings.lstm_model_dir.display()
        );
        let service =
            ForecastService::from_settings(&settings).context("Failed to build market data source")?;
        Ok(Self { settings, service })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn service(&self) -> &ForecastService {
        &self.service
    }
}
