use super::{types::Config, ConfigError, RelayBackend, TELEGRAM_PUBLIC_UPLOAD_LIMIT};

/// Largest accepted timeout (30 days).
const MAX_TIMEOUT_SECS: u64 = 30 * 24 * 60 * 60;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Fulfillment intervals and timeouts are not 0 and not absurdly large
/// - An enabled pipeline has a distribution target and a relay backend
/// - The payload limit fits the hosted Telegram Bot API
/// - The reclaim grace period outlasts a whole attempt
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    let f = &config.fulfillment;

    for (name, value) in [
        ("fulfillment.scan_interval_ms", f.scan_interval_ms),
        ("fulfillment.load_tick_interval_ms", f.load_tick_interval_ms),
        ("fulfillment.metadata_timeout_secs", f.metadata_timeout_secs),
        ("fulfillment.download_timeout_secs", f.download_timeout_secs),
        ("fulfillment.delivery_timeout_secs", f.delivery_timeout_secs),
        ("fulfillment.max_payload_size_bytes", f.max_payload_size_bytes),
    ] {
        if value == 0 {
            return Err(invalid(&format!("{} cannot be 0", name)));
        }
    }

    for (name, value) in [
        ("fulfillment.metadata_timeout_secs", f.metadata_timeout_secs),
        ("fulfillment.download_timeout_secs", f.download_timeout_secs),
        ("fulfillment.delivery_timeout_secs", f.delivery_timeout_secs),
        ("fulfillment.drain_timeout_secs", f.drain_timeout_secs),
    ] {
        if value > MAX_TIMEOUT_SECS {
            return Err(invalid(&format!(
                "{} cannot exceed {} seconds",
                name, MAX_TIMEOUT_SECS
            )));
        }
    }

    if let Some(reclaim_after) = f.reclaim_after_secs {
        let attempt_bound = f
            .metadata_timeout_secs
            .saturating_add(f.download_timeout_secs)
            .saturating_add(f.delivery_timeout_secs);
        if reclaim_after <= attempt_bound {
            return Err(invalid(&format!(
                "fulfillment.reclaim_after_secs ({}) must exceed metadata + download + delivery timeouts ({})",
                reclaim_after, attempt_bound
            )));
        }
    }

    if f.enabled {
        if f.distribution_target.trim().is_empty() {
            return Err(invalid(
                "fulfillment.distribution_target is required when fulfillment is enabled",
            ));
        }

        let relay = config.relay.as_ref().ok_or_else(|| {
            invalid("[relay] section is required when fulfillment is enabled")
        })?;

        match relay.backend {
            RelayBackend::Telegram => match relay.telegram.as_ref() {
                None => return Err(invalid("relay.telegram is required for the telegram backend")),
                Some(t) if t.bot_token.is_empty() => {
                    return Err(invalid("relay.telegram.bot_token cannot be empty"))
                }
                Some(t) if t.timeout_secs == 0 => {
                    return Err(invalid("relay.telegram.timeout_secs cannot be 0"))
                }
                Some(t)
                    if t.uses_public_api()
                        && f.max_payload_size_bytes > TELEGRAM_PUBLIC_UPLOAD_LIMIT =>
                {
                    return Err(invalid(&format!(
                        "fulfillment.max_payload_size_bytes ({}) exceeds the {} byte upload limit of {}; use a local Bot API server for larger payloads",
                        f.max_payload_size_bytes, TELEGRAM_PUBLIC_UPLOAD_LIMIT, t.api_url
                    )))
                }
                Some(_) => {}
            },
        }
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RelayConfig, ServerConfig, TelegramConfig};
    use crate::fulfillment::FulfillmentConfig;
    use std::net::IpAddr;

    fn enabled_config() -> Config {
        Config {
            fulfillment: FulfillmentConfig {
                enabled: true,
                distribution_target: "-100123".to_string(),
                ..Default::default()
            },
            relay: Some(RelayConfig {
                backend: RelayBackend::Telegram,
                telegram: Some(TelegramConfig {
                    api_url: "https://api.telegram.org".to_string(),
                    bot_token: "123:abc".to_string(),
                    timeout_secs: 600,
                    caption_template: None,
                }),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_enabled_config() {
        assert!(validate_config(&enabled_config()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = Config {
            server: ServerConfig {
                host: "0.0.0.0".parse::<IpAddr>().unwrap(),
                port: 0,
            },
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_zero_tick_fails() {
        let mut config = Config::default();
        config.fulfillment.load_tick_interval_ms = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("load_tick_interval_ms"));
    }

    #[test]
    fn test_validate_enabled_requires_target() {
        let mut config = enabled_config();
        config.fulfillment.distribution_target = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_enabled_requires_relay() {
        let mut config = enabled_config();
        config.relay = None;
        assert!(validate_config(&config).is_err());

        let mut config = enabled_config();
        if let Some(relay) = config.relay.as_mut() {
            relay.telegram = None;
        }
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_reclaim_must_outlast_attempt() {
        let mut config = Config::default();
        // 60 + 3600 + 600 by default
        config.fulfillment.reclaim_after_secs = Some(4260);
        assert!(validate_config(&config).is_err());

        config.fulfillment.reclaim_after_secs = Some(4261);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_public_bot_api_caps_payload_size() {
        let mut config = enabled_config();
        config.fulfillment.max_payload_size_bytes = TELEGRAM_PUBLIC_UPLOAD_LIMIT;
        assert!(validate_config(&config).is_ok());

        config.fulfillment.max_payload_size_bytes = 2_000_000_000;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("max_payload_size_bytes"));

        if let Some(t) = config.relay.as_mut().and_then(|r| r.telegram.as_mut()) {
            t.api_url = "https://api.telegram.org/".to_string();
        }
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_local_bot_api_allows_large_payloads() {
        let mut config = enabled_config();
        config.fulfillment.max_payload_size_bytes = 2_000_000_000;
        if let Some(t) = config.relay.as_mut().and_then(|r| r.telegram.as_mut()) {
            t.api_url = "http://127.0.0.1:8081".to_string();
        }
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_huge_timeouts_fail() {
        let mut config = Config::default();
        config.fulfillment.download_timeout_secs = u64::MAX;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("download_timeout_secs"));

        let mut config = Config::default();
        config.fulfillment.drain_timeout_secs = MAX_TIMEOUT_SECS + 1;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.fulfillment.delivery_timeout_secs = MAX_TIMEOUT_SECS;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_reclaim_bound_does_not_overflow() {
        let mut config = Config::default();
        config.fulfillment.metadata_timeout_secs = MAX_TIMEOUT_SECS;
        config.fulfillment.download_timeout_secs = MAX_TIMEOUT_SECS;
        config.fulfillment.delivery_timeout_secs = MAX_TIMEOUT_SECS;
        config.fulfillment.reclaim_after_secs = Some(u64::MAX);
        assert!(validate_config(&config).is_ok());

        config.fulfillment.reclaim_after_secs = Some(3 * MAX_TIMEOUT_SECS);
        assert!(validate_config(&config).is_err());
    }
}
