use std::{collections::HashMap, fs};

use shared::DEFAULT_FALLBACK_MESSAGE;

const SETTINGS_FILE: &str = "relay.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: String,
    pub upstream_url: String,
    pub upstream_timeout_secs: u64,
    pub fallback_message: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".into(),
            upstream_url: "http://localhost:8000/api/interpret".into(),
            upstream_timeout_secs: 120,
            fallback_message: DEFAULT_FALLBACK_MESSAGE.into(),
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_file_overrides(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());

    settings
}

pub(crate) fn apply_file_overrides(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        return;
    };

    if let Some(v) = file_cfg.get("bind_addr").and_then(toml::Value::as_str) {
        settings.bind_addr = v.to_string();
    }
    if let Some(v) = file_cfg.get("upstream_url").and_then(toml::Value::as_str) {
        settings.upstream_url = v.to_string();
    }
    if let Some(v) = file_cfg
        .get("upstream_timeout_secs")
        .and_then(toml::Value::as_integer)
        .and_then(|secs| u64::try_from(secs).ok())
    {
        settings.upstream_timeout_secs = v;
    }
    if let Some(v) = file_cfg.get("fallback_message").and_then(toml::Value::as_str) {
        settings.fallback_message = v.to_string();
    }
}

pub(crate) fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("RELAY_BIND") {
        settings.bind_addr = v;
    }
    if let Some(v) = lookup("APP__BIND_ADDR") {
        settings.bind_addr = v;
    }

    if let Some(v) = lookup("UPSTREAM_URL") {
        settings.upstream_url = v;
    }
    if let Some(v) = lookup("APP__UPSTREAM_URL") {
        settings.upstream_url = v;
    }

    if let Some(v) = lookup("APP__UPSTREAM_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.upstream_timeout_secs = parsed;
        }
    }

    if let Some(v) = lookup("APP__FALLBACK_MESSAGE") {
        settings.fallback_message = v;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
