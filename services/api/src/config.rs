use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub chat_model: String,
    pub deepgram_api_key: String,
    pub deepgram_url: String,
    pub deepgram_model: String,
    pub deepgram_language: String,
    pub endpointing_ms: u64,
    pub utterance_end_ms: u64,
    pub inventory_api_base: String,
    pub keepalive_interval: Duration,
    pub reconnect_backoff: Duration,
    pub connect_timeout: Duration,
    pub history_turns: usize,
    pub log_level: Level,
    /// Optional directory whose `system_prompt.md` overrides the built-in prompt.
    pub prompts_path: Option<PathBuf>,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = var_or(name, default);
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{}': {}", raw, e)))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address = parse_var::<SocketAddr>("BIND_ADDRESS", "0.0.0.0:3001")?;

        let openai_api_key = required("OPENAI_API_KEY")?;
        let openai_api_base = var_or("OPENAI_API_BASE", "https://api.openai.com/v1");
        let chat_model = var_or("CHAT_MODEL", "gpt-4o-mini");

        let deepgram_api_key = required("DEEPGRAM_API_KEY")?;
        let deepgram_url = var_or("DEEPGRAM_URL", "wss://api.deepgram.com/v1/listen");
        let deepgram_model = var_or("DEEPGRAM_MODEL", "nova-2");
        let deepgram_language = var_or("DEEPGRAM_LANGUAGE", "en-US");
        let endpointing_ms = parse_var("STT_ENDPOINTING_MS", "300")?;
        let utterance_end_ms = parse_var("STT_UTTERANCE_END_MS", "1000")?;

        let inventory_api_base = var_or("API_BASE_URL", "http://localhost:3000");

        let keepalive_secs: u64 = parse_var("KEEPALIVE_INTERVAL_SECS", "8")?;
        if keepalive_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "KEEPALIVE_INTERVAL_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let reconnect_backoff_ms: u64 = parse_var("RECONNECT_BACKOFF_MS", "1000")?;
        let connect_timeout_secs: u64 = parse_var("STT_CONNECT_TIMEOUT_SECS", "10")?;
        if connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "STT_CONNECT_TIMEOUT_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let history_turns = parse_var("HISTORY_TURNS", "10")?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH").ok().map(PathBuf::from);

        Ok(Self {
            bind_address,
            openai_api_key,
            openai_api_base,
            chat_model,
            deepgram_api_key,
            deepgram_url,
            deepgram_model,
            deepgram_language,
            endpointing_ms,
            utterance_end_ms,
            inventory_api_base,
            keepalive_interval: Duration::from_secs(keepalive_secs),
            reconnect_backoff: Duration::from_millis(reconnect_backoff_ms),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            history_turns,
            log_level,
            prompts_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ALL_VARS: &[&str] = &[
        "BIND_ADDRESS",
        "OPENAI_API_KEY",
        "OPENAI_API_BASE",
        "CHAT_MODEL",
        "DEEPGRAM_API_KEY",
        "DEEPGRAM_URL",
        "DEEPGRAM_MODEL",
        "DEEPGRAM_LANGUAGE",
        "STT_ENDPOINTING_MS",
        "STT_UTTERANCE_END_MS",
        "API_BASE_URL",
        "KEEPALIVE_INTERVAL_SECS",
        "RECONNECT_BACKOFF_MS",
        "STT_CONNECT_TIMEOUT_SECS",
        "HISTORY_TURNS",
        "RUST_LOG",
        "PROMPTS_PATH",
    ];

    fn clear_env_vars() {
        for name in ALL_VARS {
            unsafe { env::remove_var(name) };
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("OPENAI_API_KEY", "test-openai-key");
            env::set_var("DEEPGRAM_API_KEY", "test-deepgram-key");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3001");
        assert_eq!(config.openai_api_key, "test-openai-key");
        assert_eq!(config.openai_api_base, "https://api.openai.com/v1");
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.deepgram_url, "wss://api.deepgram.com/v1/listen");
        assert_eq!(config.deepgram_model, "nova-2");
        assert_eq!(config.deepgram_language, "en-US");
        assert_eq!(config.endpointing_ms, 300);
        assert_eq!(config.utterance_end_ms, 1000);
        assert_eq!(config.inventory_api_base, "http://localhost:3000");
        assert_eq!(config.keepalive_interval, Duration::from_secs(8));
        assert_eq!(config.reconnect_backoff, Duration::from_millis(1000));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.history_turns, 10);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.prompts_path, None);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("CHAT_MODEL", "gpt-4o");
            env::set_var("DEEPGRAM_MODEL", "nova-3");
            env::set_var("KEEPALIVE_INTERVAL_SECS", "5");
            env::set_var("RECONNECT_BACKOFF_MS", "250");
            env::set_var("STT_CONNECT_TIMEOUT_SECS", "3");
            env::set_var("HISTORY_TURNS", "4");
            env::set_var("RUST_LOG", "debug");
            env::set_var("PROMPTS_PATH", "/custom/prompts");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.deepgram_model, "nova-3");
        assert_eq!(config.keepalive_interval, Duration::from_secs(5));
        assert_eq!(config.reconnect_backoff, Duration::from_millis(250));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.history_turns, 4);
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.prompts_path, Some(PathBuf::from("/custom/prompts")));
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        set_minimal_env();
        unsafe { env::set_var("BIND_ADDRESS", "not-a-valid-address") };

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe { env::set_var("RUST_LOG", "not-a-level") };

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_config_rejects_zero_keepalive() {
        clear_env_vars();
        set_minimal_env();
        unsafe { env::set_var("KEEPALIVE_INTERVAL_SECS", "0") };

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "KEEPALIVE_INTERVAL_SECS"),
            _ => panic!("Expected InvalidValue for KEEPALIVE_INTERVAL_SECS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_rejects_zero_connect_timeout() {
        clear_env_vars();
        set_minimal_env();
        unsafe { env::set_var("STT_CONNECT_TIMEOUT_SECS", "0") };

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "STT_CONNECT_TIMEOUT_SECS"));
    }

    #[test]
    #[serial]
    fn test_config_rejects_non_numeric_history() {
        clear_env_vars();
        set_minimal_env();
        unsafe { env::set_var("HISTORY_TURNS", "ten") };

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "HISTORY_TURNS"));
    }

    #[test]
    #[serial]
    fn test_config_missing_openai_key() {
        clear_env_vars();
        unsafe { env::set_var("DEEPGRAM_API_KEY", "test-deepgram-key") };

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("OPENAI_API_KEY")),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_deepgram_key() {
        clear_env_vars();
        unsafe { env::set_var("OPENAI_API_KEY", "test-openai-key") };

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("DEEPGRAM_API_KEY")),
            _ => panic!("Expected MissingVar for DEEPGRAM_API_KEY"),
        }
    }
}
