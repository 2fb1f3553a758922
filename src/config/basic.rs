use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use tracing::warn;

/// Basic (core) configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicConfig {
    /// HTTP server listen address (e.g., "0.0.0.0", "127.0.0.1").
    /// TOML: `basic.listen_addr`. Default: `0.0.0.0`.
    #[serde(default = "default_listen_ip")]
    pub listen_addr: IpAddr,

    /// HTTP server listen port.
    /// TOML: `basic.listen_port`. Default: `8317`.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Log level for tracing subscriber initialization (e.g., "error", "warn", "info", "debug", "trace").
    /// TOML: `basic.loglevel`. Default: `info`.
    #[serde(default = "default_loglevel")]
    pub loglevel: String,

    /// Directory for persisted state (account blob, salt, quota and
    /// blocked-IP side files). TOML: `basic.data_dir`. Default: `data`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Caller authentication key. Env: `API_KEY`. Autogenerated (and warned
    /// about) when absent.
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_string_lax")]
    pub api_key: String,

    /// Admin credentials and JWT secret consumed by the external management
    /// surface; recognized here only so they can be autogenerated and
    /// surfaced once at startup.
    #[serde(default)]
    pub admin_username: String,

    #[serde(default)]
    pub admin_password: String,

    #[serde(default)]
    pub jwt_secret: String,

    /// Dump converted upstream requests/responses at debug level.
    /// Env: `DEBUG_DUMP_REQUEST_RESPONSE`.
    #[serde(default, deserialize_with = "deserialize_flag_lax")]
    pub debug_dump: bool,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_ip(),
            listen_port: default_listen_port(),
            loglevel: default_loglevel(),
            data_dir: default_data_dir(),
            api_key: String::new(),
            admin_username: String::new(),
            admin_password: String::new(),
            jwt_secret: String::new(),
            debug_dump: false,
        }
    }
}

impl BasicConfig {
    /// Fill in any missing secret with a random value, warning once so the
    /// operator can find (and then pin) it.
    pub fn ensure_secrets(&mut self) {
        for (name, slot, len) in [
            ("API_KEY", &mut self.api_key, 24usize),
            ("ADMIN_USERNAME", &mut self.admin_username, 6),
            ("ADMIN_PASSWORD", &mut self.admin_password, 18),
            ("JWT_SECRET", &mut self.jwt_secret, 32),
        ] {
            if slot.trim().is_empty() {
                *slot = random_token(len);
                warn!("{name} not configured; generated for this run: {slot}");
            }
        }
    }
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

fn deserialize_string_lax<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;

    match v {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom(
            "expected a string or a number for basic.api_key",
        )),
    }
}

fn deserialize_flag_lax<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;

    match v {
        Value::Bool(b) => Ok(b),
        Value::String(s) => Ok(matches!(s.as_str(), "1" | "true" | "yes" | "on")),
        Value::Number(n) => Ok(n.as_i64() == Some(1)),
        _ => Ok(false),
    }
}

/// Default IP address for the HTTP server listen address.
fn default_listen_ip() -> IpAddr {
    Ipv4Addr::new(0, 0, 0, 0).into()
}

/// Default port for the HTTP server.
fn default_listen_port() -> u16 {
    8317
}

fn default_loglevel() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_secrets_fills_blanks_only() {
        let mut cfg = BasicConfig {
            api_key: "pinned".to_string(),
            ..BasicConfig::default()
        };
        cfg.ensure_secrets();
        assert_eq!(cfg.api_key, "pinned");
        assert!(!cfg.admin_username.is_empty());
        assert!(!cfg.admin_password.is_empty());
        assert!(!cfg.jwt_secret.is_empty());
    }
}
