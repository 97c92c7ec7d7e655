//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

use crate::config::schema::{LogFormat, ProxyConfig, Secret, TlsConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Names the optional TOML file layered under the environment.
pub const CONFIG_PATH_VAR: &str = "PROXY_CONFIG";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TOML file. Sections and fields it omits keep their defaults.
fn read_config_file(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Build configuration from the process environment.
///
/// Starts from defaults, layers the file named by `PROXY_CONFIG` if set,
/// then applies environment overrides and validates the result.
pub fn load_from_env() -> Result<ProxyConfig, ConfigError> {
    load_with(|var| std::env::var(var).ok())
}

/// Same as [`load_from_env`], reading variables through `lookup`.
pub fn load_with<F>(lookup: F) -> Result<ProxyConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match lookup(CONFIG_PATH_VAR) {
        Some(path) => read_config_file(Path::new(&path))?,
        None => ProxyConfig::default(),
    };

    apply_env_overrides(&mut config, &lookup)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply environment overrides on top of an existing configuration.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("OAUTH_CLIENT_ID") {
        config.oauth.client_id = Some(v);
    }
    if let Some(v) = get("OAUTH_CLIENT_SECRET") {
        config.oauth.client_secret = Some(Secret::new(v));
    }
    if let Some(v) = get("OAUTH_REDIRECT_URI") {
        config.oauth.redirect_uri = Some(v);
    }
    if let Some(v) = get("OAUTH_TOKEN_URL") {
        config.oauth.token_url = v;
    }
    if let Some(v) = get("EXCHANGE_PATH") {
        config.oauth.exchange_path = v;
    }
    if let Some(v) = get("ALLOWED_ORIGIN") {
        config.cors.allowed_origin = v;
    }
    if let Some(v) = get("BIND_ADDRESS") {
        config.listener.bind_address = v;
    }

    let cert = get("TLS_CERT_PATH");
    let key = get("TLS_KEY_PATH");
    if cert.is_some() || key.is_some() {
        config.listener.tls = Some(TlsConfig {
            cert_path: cert.unwrap_or_default(),
            key_path: key.unwrap_or_default(),
        });
    }

    parse_into(&get, "UPSTREAM_TIMEOUT_MS", &mut config.timeouts.upstream_ms)?;
    parse_into(&get, "REQUEST_TIMEOUT_MS", &mut config.timeouts.request_ms)?;
    parse_into(&get, "RETRY_MAX_RETRIES", &mut config.retries.max_retries)?;
    parse_into(&get, "RETRY_INITIAL_DELAY_MS", &mut config.retries.initial_delay_ms)?;
    parse_into(&get, "RETRY_MAX_DELAY_MS", &mut config.retries.max_delay_ms)?;
    parse_into(
        &get,
        "CIRCUIT_FAILURE_THRESHOLD",
        &mut config.circuit_breaker.failure_threshold,
    )?;
    parse_into(
        &get,
        "CIRCUIT_SUCCESS_THRESHOLD",
        &mut config.circuit_breaker.success_threshold,
    )?;
    parse_into(
        &get,
        "CIRCUIT_RESET_TIMEOUT_MS",
        &mut config.circuit_breaker.reset_timeout_ms,
    )?;
    parse_into(&get, "MAX_BODY_BYTES", &mut config.security.max_body_size)?;

    if let Some(v) = get("CODE_PATTERN") {
        config.security.code_pattern = v;
    }
    if let Some(v) = get("LOG_LEVEL") {
        config.observability.log_level = v;
    }
    if let Some(v) = get("LOG_FORMAT") {
        config.observability.log_format = match v.to_ascii_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            _ => return Err(ConfigError::Env { var: "LOG_FORMAT", value: v }),
        };
    }
    parse_into(&get, "METRICS_ENABLED", &mut config.observability.metrics_enabled)?;
    if let Some(v) = get("METRICS_ADDRESS") {
        config.observability.metrics_address = v;
    }

    Ok(())
}

fn parse_into<T, G>(get: &G, var: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(value) = get(var) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { var, value })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_env_overrides_defaults() {
        let config = load_with(env(&[
            ("OAUTH_CLIENT_ID", "client-1"),
            ("OAUTH_CLIENT_SECRET", "s3cret"),
            ("OAUTH_REDIRECT_URI", "https://app.example.com/callback"),
            ("ALLOWED_ORIGIN", "https://app.example.com"),
            ("UPSTREAM_TIMEOUT_MS", "1500"),
            ("RETRY_MAX_RETRIES", "0"),
            ("CIRCUIT_FAILURE_THRESHOLD", "3"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        let (id, secret) = config.oauth.credentials().unwrap();
        assert_eq!(id, "client-1");
        assert_eq!(secret.expose(), "s3cret");
        assert_eq!(
            config.oauth.redirect_uri.as_deref(),
            Some("https://app.example.com/callback")
        );
        assert_eq!(config.cors.allowed_origin, "https://app.example.com");
        assert_eq!(config.timeouts.upstream_ms, 1500);
        assert_eq!(config.retries.max_retries, 0);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        // untouched values keep their defaults
        assert_eq!(config.retries.initial_delay_ms, 200);
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = load_with(env(&[("OAUTH_CLIENT_ID", "  "), ("ALLOWED_ORIGIN", "")])).unwrap();
        assert!(config.oauth.client_id.is_none());
        assert_eq!(config.cors.allowed_origin, "*");
    }

    #[test]
    fn test_malformed_number_names_variable() {
        let err = load_with(env(&[("RETRY_MAX_DELAY_MS", "soon")])).unwrap_err();
        match err {
            ConfigError::Env { var, value } => {
                assert_eq!(var, "RETRY_MAX_DELAY_MS");
                assert_eq!(value, "soon");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_overrides_are_validated() {
        let err = load_with(env(&[("UPSTREAM_TIMEOUT_MS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("timeouts.upstream_ms"));
    }

    #[test]
    fn test_half_tls_config_is_rejected() {
        let err = load_with(env(&[("TLS_CERT_PATH", "/etc/cert.pem")])).unwrap_err();
        assert!(err.to_string().contains("listener.tls"));
    }

    #[test]
    fn test_file_is_layered_under_env() {
        let path = std::env::temp_dir().join(format!("proxy-config-{}.toml", uuid::Uuid::new_v4()));
        fs::write(
            &path,
            r#"
            [oauth]
            client_id = "from-file"
            client_secret = "file-secret"

            [cors]
            allowed_origin = "https://file.example.com"
            "#,
        )
        .unwrap();

        let path_str = path.to_string_lossy().to_string();
        let config = load_with(env(&[
            (CONFIG_PATH_VAR, path_str.as_str()),
            ("OAUTH_CLIENT_ID", "from-env"),
        ]))
        .unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(config.oauth.client_id.as_deref(), Some("from-env"));
        assert_eq!(config.oauth.client_secret.unwrap().expose(), "file-secret");
        assert_eq!(config.cors.allowed_origin, "https://file.example.com");
    }
}
