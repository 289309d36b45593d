mod parsing;
mod settings;
mod types;

pub(crate) use types::{lease_ttl, ConfigError, PollingSettings, Settings};
