use std::env;
use std::path::PathBuf;

use chrono::Duration;
use tracing_subscriber::EnvFilter;

use crate::parser::UploadOptions;

const DEFAULT_SESSION_IDLE_MINUTES: i64 = 12 * 60;

/// Server settings read from the environment
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: PathBuf,
    /// Marks the session cookie `Secure`; only enable behind HTTPS
    pub secure_cookies: bool,
    /// Editing sessions idle for longer than this are dropped
    pub session_idle: Duration,
    pub upload: UploadOptions,
}

impl ServerConfig {
    /// Reads `HOST`, `PORT`, `STATIC_DIR`, `COOKIE_SECURE`, `SESSION_IDLE_MINUTES`
    /// and `TIMETABLE_DERIVE_INITIALS`.
    /// An explicit port (from the command line) wins over `PORT`.
    pub fn from_env(port_override: Option<u16>) -> Self {
        Self::from_lookup(|key| env::var(key).ok(), port_override)
    }

    fn from_lookup<F>(lookup: F, port_override: Option<u16>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = port_override
            .or_else(|| lookup("PORT").and_then(|p| p.parse().ok()))
            .unwrap_or(8080);
        let static_dir = lookup("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/static")));

        ServerConfig {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            static_dir,
            secure_cookies: lookup("COOKIE_SECURE")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            session_idle: Duration::minutes(
                lookup("SESSION_IDLE_MINUTES")
                    .and_then(|m| m.parse::<u32>().ok())
                    .filter(|m| *m > 0)
                    .map_or(DEFAULT_SESSION_IDLE_MINUTES, i64::from),
            ),
            upload: UploadOptions {
                derive_initials: lookup("TIMETABLE_DERIVE_INITIALS")
                    .map(|v| parse_flag(&v))
                    .unwrap_or(false),
            },
        }
    }
}

fn parse_flag(value: &str) -> bool {
    let lower = value.trim().to_lowercase();
    lower == "yes" || lower == "true" || lower == "1"
}

/// Log filter from `RUST_LOG` directives such as `info,actix_web=warn`,
/// defaulting to INFO when unset or unparseable
pub fn log_filter() -> EnvFilter {
    filter_from(env::var("RUST_LOG").ok().as_deref())
}

fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}
