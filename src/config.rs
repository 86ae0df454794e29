//! # Feature: Configuration System
//!
//! Storefront configuration from a YAML file (with environment variable
//! interpolation) or plain environment variables.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Evolution API transport settings and inbound poll interval
//! - 1.0.0: Initial environment variable and YAML configuration

use anyhow::{Context, Result};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

/// Which outbound channel carries widget messages to WhatsApp
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    /// Workflow automation webhook (n8n style)
    Automation { url: String },
    /// Evolution API `sendText`
    Evolution(EvolutionSettings),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvolutionSettings {
    pub api_url: String,
    pub instance: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP server listens on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Automation tool webhook that forwards messages to WhatsApp
    #[serde(default)]
    pub automation_webhook_url: Option<String>,

    #[serde(default)]
    pub evolution_api_url: Option<String>,

    #[serde(default)]
    pub evolution_instance: Option<String>,

    #[serde(default)]
    pub evolution_api_key: Option<String>,

    /// WhatsApp number that receives widget messages and orders
    #[serde(default)]
    pub vendor_whatsapp_number: String,

    /// Sender name attached to widget messages when the client gives none
    #[serde(default = "default_widget_sender_name")]
    pub widget_sender_name: String,

    /// Shared secret expected in `x-webhook-secret` on the inbound webhook
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Without a key the AI assist always answers with its fallbacks
    #[serde(default)]
    pub openai_api_key: Option<String>,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_ai_timeout_secs")]
    pub ai_timeout_secs: u64,

    /// Interval of the Evolution inbox poll (milliseconds)
    #[serde(default = "default_inbox_poll_interval_ms")]
    pub inbox_poll_interval_ms: u64,

    /// Delivery cost added to orders shipped by courier
    #[serde(default = "default_shipping_cost")]
    pub shipping_cost: u32,

    /// Mount the dev panel log routes
    #[serde(default = "default_dev_logger_enabled")]
    pub dev_logger_enabled: bool,

    #[serde(default = "default_message_status_ttl_minutes")]
    pub message_status_ttl_minutes: i64,
}

// Default value functions for serde
fn default_bind_addr() -> String {
    "0.0.0.0:9002".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_widget_sender_name() -> String {
    "Chat Widget".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_timeout_secs() -> u64 {
    30
}

fn default_inbox_poll_interval_ms() -> u64 {
    5000
}

fn default_shipping_cost() -> u32 {
    250
}

fn default_dev_logger_enabled() -> bool {
    true
}

fn default_message_status_ttl_minutes() -> i64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: default_bind_addr(),
            log_level: default_log_level(),
            automation_webhook_url: None,
            evolution_api_url: None,
            evolution_instance: None,
            evolution_api_key: None,
            vendor_whatsapp_number: String::new(),
            widget_sender_name: default_widget_sender_name(),
            webhook_secret: None,
            openai_api_key: None,
            openai_model: default_openai_model(),
            openai_base_url: default_openai_base_url(),
            ai_timeout_secs: default_ai_timeout_secs(),
            inbox_poll_interval_ms: default_inbox_poll_interval_ms(),
            shipping_cost: default_shipping_cost(),
            dev_logger_enabled: default_dev_logger_enabled(),
            message_status_ttl_minutes: default_message_status_ttl_minutes(),
        }
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Config {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| default_bind_addr()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| default_log_level()),
            automation_webhook_url: env_opt("AUTOMATION_WEBHOOK_URL"),
            evolution_api_url: env_opt("EVOLUTION_API_URL"),
            evolution_instance: env_opt("EVOLUTION_INSTANCE"),
            evolution_api_key: env_opt("EVOLUTION_API_KEY"),
            vendor_whatsapp_number: env::var("VENDOR_WHATSAPP_NUMBER").unwrap_or_default(),
            widget_sender_name: env::var("WIDGET_SENDER_NAME")
                .unwrap_or_else(|_| default_widget_sender_name()),
            webhook_secret: env_opt("WEBHOOK_SECRET"),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| default_openai_model()),
            openai_base_url: env::var("OPENAI_BASE_URL").unwrap_or_else(|_| default_openai_base_url()),
            ai_timeout_secs: env_parse("AI_TIMEOUT_SECS", default_ai_timeout_secs()),
            inbox_poll_interval_ms: env_parse("INBOX_POLL_INTERVAL_MS", default_inbox_poll_interval_ms()),
            shipping_cost: env_parse("SHIPPING_COST", default_shipping_cost()),
            dev_logger_enabled: env::var("DEV_LOGGER_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                == "true",
            message_status_ttl_minutes: env_parse(
                "MESSAGE_STATUS_TTL_MINUTES",
                default_message_status_ttl_minutes(),
            ),
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable interpolation
    ///
    /// Supports `${VAR_NAME}` syntax for environment variable substitution.
    /// Example: `evolution_api_key: "${EVOLUTION_API_KEY}"`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let interpolated = interpolate_env_vars(&content)?;

        let config: Config = serde_yaml::from_str(&interpolated)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        info!("Loaded config from {}", path.display());

        Ok(config)
    }

    /// Auto-detect and load configuration
    ///
    /// Priority order:
    /// 1. If CONFIG_FILE env var is set, load from that file
    /// 2. If config.yaml exists in current directory, load from it
    /// 3. Fall back to environment variables
    pub fn auto_load() -> Result<Self> {
        if let Ok(config_path) = env::var("CONFIG_FILE") {
            info!("Loading config from CONFIG_FILE: {}", config_path);
            return Self::from_file(&config_path);
        }

        let default_config_path = "config.yaml";
        if Path::new(default_config_path).exists() {
            info!("Loading config from {}", default_config_path);
            return Self::from_file(default_config_path);
        }

        info!("No config file found, using environment variables");
        Self::from_env()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.bind_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid bind_addr '{}'", self.bind_addr))?;

        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log_level '{}'. Use: {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            );
        }

        if let Some(ref url) = self.automation_webhook_url {
            Url::parse(url).with_context(|| format!("Invalid automation_webhook_url '{url}'"))?;
        }

        Url::parse(&self.openai_base_url)
            .with_context(|| format!("Invalid openai_base_url '{}'", self.openai_base_url))?;

        let evolution = [
            &self.evolution_api_url,
            &self.evolution_instance,
            &self.evolution_api_key,
        ];
        let set = evolution.iter().filter(|v| v.is_some()).count();
        if set != 0 && set != evolution.len() {
            anyhow::bail!(
                "Evolution API needs evolution_api_url, evolution_instance and evolution_api_key together"
            );
        }
        if let Some(ref url) = self.evolution_api_url {
            Url::parse(url).with_context(|| format!("Invalid evolution_api_url '{url}'"))?;
        }

        if self.transport().is_some() && self.vendor_whatsapp_number.trim().is_empty() {
            anyhow::bail!("vendor_whatsapp_number is required when an outbound transport is configured");
        }

        if self.inbox_poll_interval_ms == 0 {
            anyhow::bail!("inbox_poll_interval_ms must be greater than zero");
        }

        if self.message_status_ttl_minutes <= 0 {
            anyhow::bail!("message_status_ttl_minutes must be greater than zero");
        }

        Ok(())
    }

    /// Evolution API settings, when all three are present
    pub fn evolution(&self) -> Option<EvolutionSettings> {
        Some(EvolutionSettings {
            api_url: self.evolution_api_url.clone()?,
            instance: self.evolution_instance.clone()?,
            api_key: self.evolution_api_key.clone()?,
        })
    }

    /// Outbound transport; the automation webhook wins when both are configured
    pub fn transport(&self) -> Option<TransportKind> {
        if let Some(ref url) = self.automation_webhook_url {
            return Some(TransportKind::Automation { url: url.clone() });
        }
        self.evolution().map(TransportKind::Evolution)
    }
}

// ============================================================================
// Environment Variable Interpolation
// ============================================================================

/// `${NAME}` or `${NAME:-fallback}`
static ENV_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid env reference pattern")
});

/// Replace `${NAME}` references with environment values
///
/// A reference without a fallback whose variable is unset is an error; all
/// such names are reported together.
fn interpolate_env_vars(content: &str) -> Result<String> {
    let mut unset: Vec<String> = Vec::new();

    let expanded = ENV_REF.replace_all(content, |cap: &regex::Captures| {
        env::var(&cap[1])
            .ok()
            .or_else(|| cap.get(2).map(|fallback| fallback.as_str().to_string()))
            .unwrap_or_else(|| {
                unset.push(cap[1].to_string());
                String::new()
            })
    });

    if !unset.is_empty() {
        anyhow::bail!("Config references unset environment variables: {}", unset.join(", "));
    }

    Ok(expanded.into_owned())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_interpolate_env_vars() {
        env::set_var("TRAMA_TEST_VENDOR", "5491100000000");
        env::remove_var("TRAMA_TEST_UNSET");

        assert_eq!(
            interpolate_env_vars("vendor_whatsapp_number: \"${TRAMA_TEST_VENDOR}\"").unwrap(),
            "vendor_whatsapp_number: \"5491100000000\""
        );
        assert_eq!(
            interpolate_env_vars("log_level: ${TRAMA_TEST_UNSET:-debug}").unwrap(),
            "log_level: debug"
        );

        let err = interpolate_env_vars("a: ${TRAMA_TEST_UNSET}\nb: ${TRAMA_TEST_UNSET_TOO}").unwrap_err();
        assert!(err.to_string().contains("TRAMA_TEST_UNSET, TRAMA_TEST_UNSET_TOO"));

        env::remove_var("TRAMA_TEST_VENDOR");
    }

    #[test]
    fn test_config_from_yaml() {
        env::set_var("TRAMA_TEST_EVOLUTION_KEY", "evo-key");

        let yaml = r#"
bind_addr: "127.0.0.1:8080"
evolution_api_url: "https://evo.example.com"
evolution_instance: "trama"
evolution_api_key: "${TRAMA_TEST_EVOLUTION_KEY}"
vendor_whatsapp_number: "5491100000000"
shipping_cost: 300
"#;

        let interpolated = interpolate_env_vars(yaml).unwrap();
        let config: Config = serde_yaml::from_str(&interpolated).unwrap();
        config.validate().unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.shipping_cost, 300);
        assert_eq!(config.inbox_poll_interval_ms, 5000);
        assert_eq!(config.openai_model, "gpt-4o-mini");
        assert_eq!(
            config.transport(),
            Some(TransportKind::Evolution(EvolutionSettings {
                api_url: "https://evo.example.com".to_string(),
                instance: "trama".to_string(),
                api_key: "evo-key".to_string(),
            }))
        );

        env::remove_var("TRAMA_TEST_EVOLUTION_KEY");
    }

    #[test]
    fn test_automation_transport_wins() {
        let config = Config {
            automation_webhook_url: Some("https://n8n.example.com/webhook/wa".to_string()),
            evolution_api_url: Some("https://evo.example.com".to_string()),
            evolution_instance: Some("trama".to_string()),
            evolution_api_key: Some("k".to_string()),
            vendor_whatsapp_number: "549".to_string(),
            ..Config::default()
        };

        assert!(config.validate().is_ok());
        assert!(matches!(config.transport(), Some(TransportKind::Automation { .. })));
    }

    #[test]
    fn test_validation_partial_evolution() {
        let config = Config {
            evolution_api_url: Some("https://evo.example.com".to_string()),
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("evolution_instance"));
    }

    #[test]
    fn test_validation_requires_vendor_number() {
        let config = Config {
            automation_webhook_url: Some("https://n8n.example.com/webhook/wa".to_string()),
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("vendor_whatsapp_number"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let bad_addr = Config {
            bind_addr: "not-an-address".to_string(),
            ..Config::default()
        };
        assert!(bad_addr.validate().is_err());

        let bad_level = Config {
            log_level: "loud".to_string(),
            ..Config::default()
        };
        assert!(bad_level.validate().is_err());

        let zero_poll = Config {
            inbox_poll_interval_ms: 0,
            ..Config::default()
        };
        assert!(zero_poll.validate().is_err());
    }

    #[test]
    fn test_defaults_are_valid_without_transport() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.transport().is_none());
    }
}
