//! Console configuration, loaded from the environment (and `.env` if present).

use std::env;

use realtime_console::client::Config as TransportConfig;
use secrecy::{ExposeSecret, SecretString};

#[derive(Debug)]
pub struct Config {
    pub api_key: SecretString,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
}

impl Config {
    /// Reads:
    ///
    /// *   `OPENAI_API_KEY`: required.
    /// *   `REALTIME_MODEL`: (Optional) realtime model name.
    /// *   `REALTIME_BASE_URL`: (Optional) websocket endpoint, e.g. for a relay.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        Ok(Self {
            api_key: SecretString::from(api_key),
            model: non_empty_var("REALTIME_MODEL"),
            base_url: non_empty_var("REALTIME_BASE_URL"),
        })
    }

    pub fn transport(&self) -> TransportConfig {
        let mut builder = TransportConfig::builder().with_api_key(self.api_key.expose_secret());
        if let Some(model) = &self.model {
            builder = builder.with_model(model);
        }
        if let Some(base_url) = &self.base_url {
            builder = builder.with_base_url(base_url);
        }
        builder.build()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}
