use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Debug, Clone)]
pub struct DashConfig {
    pub bind_addr: SocketAddr,
    pub auth_mode: AuthMode,
    pub auth_secret: Option<String>,
    pub upload_limit: RateLimitPolicy,
    pub api_limit: RateLimitPolicy,
    pub rate_limit_max_keys: usize,
    pub processing_delay_ms: u64,
    pub model_delay_ms: u64,
    pub ws_ping_secs: u64,
}

/// One rate-limit category: at most `max_requests` per `window_secs` sliding
/// window per client address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Any non-empty bearer token is accepted and mapped to a fixed
    /// development principal.
    Dev,
    /// Bearer tokens are verified as HS256 JWTs against `auth_secret`.
    Jwt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl DashConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("DASH_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_socket_addr(
            kv.get("DASH_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8082),
            "DASH_BIND_ADDR",
        )?;

        let auth_mode = parse_auth_mode(kv.get("DASH_AUTH_MODE"))?;

        let auth_secret = kv
            .get("DASH_AUTH_SECRET")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        if auth_mode == AuthMode::Jwt && auth_secret.is_none() {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "jwt auth mode requires DASH_AUTH_SECRET".to_string(),
            });
        }

        let upload_limit = RateLimitPolicy {
            max_requests: parse_u32(
                kv.get("DASH_UPLOAD_MAX_REQUESTS"),
                5,
                "DASH_UPLOAD_MAX_REQUESTS",
            )?,
            window_secs: parse_u64(
                kv.get("DASH_UPLOAD_WINDOW_SECS"),
                60,
                "DASH_UPLOAD_WINDOW_SECS",
            )?,
        };

        let api_limit = RateLimitPolicy {
            max_requests: parse_u32(
                kv.get("DASH_API_MAX_REQUESTS"),
                100,
                "DASH_API_MAX_REQUESTS",
            )?,
            window_secs: parse_u64(kv.get("DASH_API_WINDOW_SECS"), 60, "DASH_API_WINDOW_SECS")?,
        };

        if upload_limit.window_secs == 0 || api_limit.window_secs == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "rate limit windows must be >= 1 second".to_string(),
            });
        }

        let rate_limit_max_keys = parse_usize(
            kv.get("DASH_RATE_LIMIT_MAX_KEYS"),
            16_384,
            "DASH_RATE_LIMIT_MAX_KEYS",
        )?;

        let processing_delay_ms = parse_u64(
            kv.get("DASH_PROCESSING_DELAY_MS"),
            1000,
            "DASH_PROCESSING_DELAY_MS",
        )?;

        let model_delay_ms = parse_u64(kv.get("DASH_MODEL_DELAY_MS"), 2000, "DASH_MODEL_DELAY_MS")?;

        let ws_ping_secs = parse_u64(kv.get("DASH_WS_PING_SECS"), 15, "DASH_WS_PING_SECS")?;
        if ws_ping_secs == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "DASH_WS_PING_SECS must be >= 1".to_string(),
            });
        }

        Ok(Self {
            bind_addr,
            auth_mode,
            auth_secret,
            upload_limit,
            api_limit,
            rate_limit_max_keys,
            processing_delay_ms,
            model_delay_ms,
            ws_ping_secs,
        })
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file {}", path),
    })?;

    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()));
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..bytes.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value {
        None => Ok(default),
        Some(v) => v.parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_usize(
    value: Option<&String>,
    default: usize,
    key: &'static str,
) -> Result<usize, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.parse::<usize>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u32(value: Option<&String>, default: u32, key: &'static str) -> Result<u32, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.parse::<u32>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_auth_mode(value: Option<&String>) -> Result<AuthMode, StartupError> {
    let mode = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("dev");

    match mode {
        "dev" => Ok(AuthMode::Dev),
        "jwt" => Ok(AuthMode::Jwt),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "DASH_AUTH_MODE must be dev or jwt".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_limits() {
        let config = DashConfig::from_kv(&HashMap::new()).unwrap();

        assert_eq!(config.bind_addr.port(), 8082);
        assert_eq!(config.auth_mode, AuthMode::Dev);
        assert_eq!(config.upload_limit.max_requests, 5);
        assert_eq!(config.upload_limit.window_secs, 60);
        assert_eq!(config.api_limit.max_requests, 100);
        assert_eq!(config.processing_delay_ms, 1000);
        assert_eq!(config.model_delay_ms, 2000);
    }

    #[test]
    fn jwt_mode_requires_a_secret() {
        let env = HashMap::from([("DASH_AUTH_MODE".to_string(), "jwt".to_string())]);
        let err = DashConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");

        let env = HashMap::from([
            ("DASH_AUTH_MODE".to_string(), "jwt".to_string()),
            ("DASH_AUTH_SECRET".to_string(), "secret".to_string()),
        ]);
        let config = DashConfig::from_kv(&env).unwrap();
        assert_eq!(config.auth_mode, AuthMode::Jwt);
        assert_eq!(config.auth_secret.as_deref(), Some("secret"));
    }

    #[test]
    fn zero_window_is_rejected() {
        let env = HashMap::from([("DASH_API_WINDOW_SECS".to_string(), "0".to_string())]);
        let err = DashConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");
    }

    #[test]
    fn unknown_auth_mode_is_rejected() {
        let env = HashMap::from([("DASH_AUTH_MODE".to_string(), "oauth".to_string())]);
        let err = DashConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");
    }
}
