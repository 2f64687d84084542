use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Debug, Clone)]
pub struct PilotConfig {
    pub bind_addr: SocketAddr,
    pub db_url: String,
    pub secret_key: String,
    pub token_ttl_secs: u64,
    pub db_write_timeout_ms: u64,
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

impl PilotConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("PILOT_CONFIG_PATH") {
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
            kv.get("PILOT_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000),
            "PILOT_BIND_ADDR",
        )?;

        let db_url = kv
            .get("PILOT_DB_URL")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or("sqlite://data_pilot.db")
            .to_string();

        // Development fallback; deployments override it.
        let secret_key = kv
            .get("PILOT_SECRET_KEY")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or("super-secret-key")
            .to_string();

        let token_ttl_secs = parse_u64(kv.get("PILOT_TOKEN_TTL_SECS"), 30 * 60, "PILOT_TOKEN_TTL_SECS")?;
        if token_ttl_secs == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "PILOT_TOKEN_TTL_SECS must be >= 1".to_string(),
            });
        }

        let db_write_timeout_ms = parse_u64(
            kv.get("PILOT_DB_WRITE_TIMEOUT_MS"),
            2000,
            "PILOT_DB_WRITE_TIMEOUT_MS",
        )?;

        Ok(Self {
            bind_addr,
            db_url,
            secret_key,
            token_ttl_secs,
            db_write_timeout_ms,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_local_development() {
        let config = PilotConfig::from_kv(&HashMap::new()).unwrap();
        assert_eq!(config.bind_addr.port(), 8000);
        assert_eq!(config.db_url, "sqlite://data_pilot.db");
        assert_eq!(config.token_ttl_secs, 1800);
        assert_eq!(config.db_write_timeout_ms, 2000);
    }

    #[test]
    fn zero_token_ttl_is_rejected() {
        let env = HashMap::from([("PILOT_TOKEN_TTL_SECS".to_string(), "0".to_string())]);
        let err = PilotConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");
    }

    #[test]
    fn invalid_bind_addr_is_rejected() {
        let env = HashMap::from([("PILOT_BIND_ADDR".to_string(), "not-an-addr".to_string())]);
        let err = PilotConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");
    }
}
