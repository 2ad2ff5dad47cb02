//! Configuration module for environment variable parsing.
//!
//! Every setting has a default, so the worker starts against a local broker
//! and SMTP relay with no environment at all.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::queue::{dead_letter_queue, EMAIL_QUEUE, MAX_RETRIES};
use crate::transport::SmtpSettings;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// RabbitMQ connection URL
    pub rabbitmq_url: String,

    /// Primary queue name; the dead-letter queue is derived from it
    pub email_queue: String,

    /// Unacknowledged deliveries the consumer may hold
    pub prefetch_count: u16,

    /// Retry ceiling for a single job, never above [`MAX_RETRIES`]
    pub max_retries: u32,

    /// Backoff unit in milliseconds
    pub retry_base_delay_ms: u64,

    /// Delay before the worker re-runs its startup sequence
    pub worker_restart_delay_ms: u64,

    /// Dead-letter jobs that exhaust their retries or have an unknown type
    pub dead_letter_exhausted: bool,

    pub smtp: SmtpSettings,

    pub from_name: String,
    pub from_address: String,

    /// Directory holding `<template>.hbs` files
    pub templates_dir: String,

    /// Base URL for links in outgoing mail
    pub frontend_url: String,

    /// Port for the intake server to listen on
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let max_retries: u32 = parse_var("EMAIL_MAX_RETRIES", MAX_RETRIES);
        if max_retries > MAX_RETRIES {
            warn!(
                requested = max_retries,
                ceiling = MAX_RETRIES,
                "email_max_retries_clamped"
            );
        }

        Config {
            rabbitmq_url: env::var("RABBITMQ_URL")
                .unwrap_or_else(|_| "amqp://localhost:5672/%2f".to_string()),

            email_queue: env::var("EMAIL_QUEUE").unwrap_or_else(|_| EMAIL_QUEUE.to_string()),

            prefetch_count: parse_var("WORKER_PREFETCH", 1),

            max_retries: max_retries.min(MAX_RETRIES),

            retry_base_delay_ms: parse_var("EMAIL_RETRY_BASE_MS", 1000),

            worker_restart_delay_ms: parse_var("WORKER_RESTART_DELAY_MS", 5000),

            dead_letter_exhausted: parse_flag("EMAIL_DEAD_LETTER_EXHAUSTED", false),

            smtp: SmtpSettings {
                host: env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()),
                port: parse_var("SMTP_PORT", 587),
                username: first_var(&["SMTP_USERNAME", "EMAIL_USER"]).unwrap_or_default(),
                password: first_var(&["SMTP_PASSWORD", "EMAIL_PASS"]).unwrap_or_default(),
                use_tls: parse_flag("SMTP_USE_TLS", true),
            },

            from_name: env::var("EMAIL_FROM_NAME").unwrap_or_else(|_| "Notifications".to_string()),

            from_address: env::var("EMAIL_FROM_ADDRESS")
                .unwrap_or_else(|_| "noreply@localhost".to_string()),

            templates_dir: env::var("EMAIL_TEMPLATES_DIR").unwrap_or_else(|_| "templates".to_string()),

            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            port: parse_var("PORT", 8080),
        }
    }

    /// Sender mailbox, `"Name" <address>`.
    pub fn sender(&self) -> String {
        format!("\"{}\" <{}>", self.from_name, self.from_address)
    }

    pub fn dead_letter_queue(&self) -> String {
        dead_letter_queue(&self.email_queue)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn worker_restart_delay(&self) -> Duration {
        Duration::from_millis(self.worker_restart_delay_ms)
    }
}

/// Parse a variable, falling back to `default` when unset or malformed.
fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(env_var = name, value = %raw, "config_value_invalid");
            default
        }),
        Err(_) => default,
    }
}

/// Parse a boolean flag. Accepts `true/false`, `1/0`, `yes/no`.
fn parse_flag(name: &str, default: bool) -> bool {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => {
            warn!(env_var = name, value = %raw, "config_flag_invalid");
            default
        }
    }
}

/// First non-empty variable among `names`.
fn first_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_valid() {
        env::set_var("TEST_POSTBOX_PREFETCH", " 16 ");
        assert_eq!(parse_var::<u16>("TEST_POSTBOX_PREFETCH", 1), 16);
        env::remove_var("TEST_POSTBOX_PREFETCH");
    }

    #[test]
    fn test_parse_var_invalid_falls_back() {
        env::set_var("TEST_POSTBOX_PORT", "eighty");
        assert_eq!(parse_var::<u16>("TEST_POSTBOX_PORT", 8080), 8080);
        env::remove_var("TEST_POSTBOX_PORT");
    }

    #[test]
    fn test_parse_var_default() {
        assert_eq!(parse_var::<u64>("NONEXISTENT_POSTBOX_VAR", 5000), 5000);
    }

    #[test]
    fn test_parse_flag() {
        env::set_var("TEST_POSTBOX_FLAG_ON", "Yes");
        env::set_var("TEST_POSTBOX_FLAG_OFF", "0");
        env::set_var("TEST_POSTBOX_FLAG_BAD", "maybe");

        assert!(parse_flag("TEST_POSTBOX_FLAG_ON", false));
        assert!(!parse_flag("TEST_POSTBOX_FLAG_OFF", true));
        assert!(parse_flag("TEST_POSTBOX_FLAG_BAD", true));
        assert!(!parse_flag("NONEXISTENT_POSTBOX_FLAG", false));

        env::remove_var("TEST_POSTBOX_FLAG_ON");
        env::remove_var("TEST_POSTBOX_FLAG_OFF");
        env::remove_var("TEST_POSTBOX_FLAG_BAD");
    }

    #[test]
    fn test_first_var_skips_empty() {
        env::set_var("TEST_POSTBOX_PRIMARY", "");
        env::set_var("TEST_POSTBOX_FALLBACK", "mailer@example.com");
        assert_eq!(
            first_var(&["TEST_POSTBOX_PRIMARY", "TEST_POSTBOX_FALLBACK"]),
            Some("mailer@example.com".to_string())
        );
        assert_eq!(first_var(&["NONEXISTENT_POSTBOX_A", "NONEXISTENT_POSTBOX_B"]), None);
        env::remove_var("TEST_POSTBOX_PRIMARY");
        env::remove_var("TEST_POSTBOX_FALLBACK");
    }

    #[test]
    fn test_derived_values() {
        let mut config = Config::from_env();
        config.email_queue = "email_queue".to_string();
        config.from_name = "PromptHub".to_string();
        config.from_address = "noreply@prompthub.dev".to_string();
        config.retry_base_delay_ms = 250;
        config.worker_restart_delay_ms = 5000;

        assert_eq!(config.sender(), "\"PromptHub\" <noreply@prompthub.dev>");
        assert_eq!(config.dead_letter_queue(), "email_queue_failed");
        assert_eq!(config.retry_base_delay(), Duration::from_millis(250));
        assert_eq!(config.worker_restart_delay(), Duration::from_secs(5));
        assert!(config.max_retries <= MAX_RETRIES);
    }
}
