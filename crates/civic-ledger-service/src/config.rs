//! Service configuration.

use std::path::Path;

use serde::Deserialize;

use civic_ledger_core::{LedgerError, LevelCurve, PointSchedule};

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file path.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for the expected shape.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// The file path.
        path: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The values parsed but are not usable.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] LedgerError),
}

/// Gamification rules: the level curve and the discussion point schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GamificationConfig {
    /// The versioned XP thresholds per level.
    pub level_curve: LevelCurve,
    /// XP per discussion activity.
    pub points: PointSchedule,
}

impl GamificationConfig {
    /// Load rules from a JSON file and validate them.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the curve
    /// or schedule is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = load_json_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Check the curve and schedule.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` if either is invalid.
    pub fn validate(&self) -> Result<(), LedgerError> {
        self.level_curve.validate()?;
        self.points.validate()
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection URL. Without one the service runs on the
    /// in-memory store.
    pub database_url: Option<String>,

    /// Maximum database pool size (default: 10).
    pub database_max_connections: u32,

    /// JWT issuer base URL; JWKS is fetched from here (default: `<http://localhost:9000>`).
    pub auth_base_url: String,

    /// Expected JWT audience (default: "civic-ledger").
    pub auth_audience: String,

    /// Shared secret for HS256 user tokens. When unset, tokens are RS256 and
    /// validated against the issuer's JWKS.
    pub auth_jwt_secret: Option<String>,

    /// Service API key for collaborator services.
    pub service_api_key: Option<String>,

    /// Admin API key for operator endpoints.
    pub admin_api_key: Option<String>,

    /// HMAC secret collaborators sign event bodies with (optional).
    pub event_signing_secret: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// How long a computed leaderboard is served from cache (0 disables).
    pub leaderboard_cache_ttl_seconds: u64,

    /// Largest leaderboard page a caller may request.
    pub leaderboard_max_limit: usize,

    /// Level curve and point schedule.
    pub gamification: GamificationConfig,
}

/// Secrets file structure.
#[derive(Debug, Default, Deserialize)]
struct Secrets {
    #[serde(default)]
    service_api_key: Option<String>,
    #[serde(default)]
    admin_api_key: Option<String>,
    #[serde(default)]
    auth_jwt_secret: Option<String>,
    #[serde(default)]
    event_signing_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    ///
    /// # Errors
    ///
    /// Returns an error if `GAMIFICATION_CONFIG` names a file that cannot be
    /// loaded.
    pub fn from_env() -> Result<Self, ConfigError> {
        let secrets = load_secrets();
        let defaults = Self::default();

        let gamification = match std::env::var("GAMIFICATION_CONFIG") {
            Ok(path) => {
                let config = GamificationConfig::load(&path)?;
                tracing::info!(
                    path = %path,
                    curve_version = config.level_curve.version,
                    "Loaded gamification rules"
                );
                config
            }
            Err(_) => defaults.gamification,
        };

        Ok(Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            database_url: std::env::var("DATABASE_URL").ok(),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            auth_base_url: std::env::var("AUTH_BASE_URL").unwrap_or(defaults.auth_base_url),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            auth_jwt_secret: secrets
                .auth_jwt_secret
                .or_else(|| std::env::var("AUTH_JWT_SECRET").ok()),
            service_api_key: secrets
                .service_api_key
                .or_else(|| std::env::var("SERVICE_API_KEY").ok()),
            admin_api_key: secrets
                .admin_api_key
                .or_else(|| std::env::var("ADMIN_API_KEY").ok()),
            event_signing_secret: secrets
                .event_signing_secret
                .or_else(|| std::env::var("EVENT_SIGNING_SECRET").ok()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|origins| parse_list(&origins))
                .unwrap_or(defaults.cors_origins),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            leaderboard_cache_ttl_seconds: env_parse("LEADERBOARD_CACHE_TTL_SECONDS")
                .unwrap_or(defaults.leaderboard_cache_ttl_seconds),
            leaderboard_max_limit: env_parse("LEADERBOARD_MAX_LIMIT")
                .unwrap_or(defaults.leaderboard_max_limit),
            gamification,
        })
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            auth_base_url: "http://localhost:9000".into(),
            auth_audience: "civic-ledger".into(),
            auth_jwt_secret: None,
            service_api_key: None,
            admin_api_key: None,
            event_signing_secret: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024, // 1MB
            request_timeout_seconds: 30,
            leaderboard_cache_ttl_seconds: 30,
            leaderboard_max_limit: 100,
            gamification: GamificationConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Load secrets from the first secrets file found. Missing files are not an
/// error; the environment is consulted for anything the file leaves out.
fn load_secrets() -> Secrets {
    let secret_paths = [".secrets/civic-ledger.json", "../.secrets/civic-ledger.json"];

    for path in secret_paths {
        if !Path::new(path).exists() {
            continue;
        }
        match load_json_file::<Secrets>(Path::new(path)) {
            Ok(secrets) => {
                tracing::info!(path = %path, "Loaded secrets from file");
                return secrets;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring unreadable secrets file"),
        }
    }

    tracing::debug!("Secrets file not found, using environment variables");
    Secrets::default()
}

/// Load a JSON file.
fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let display = path.display().to_string();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: display,
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_curve_and_schedule() {
        let file = write_file(
            r#"{
                "level_curve": { "version": 2, "thresholds": [0, 50, 150, 400] },
                "points": { "discussion_post": 12, "discussion_reply": 4, "like": 2 }
            }"#,
        );

        let config = GamificationConfig::load(file.path()).unwrap();
        assert_eq!(config.level_curve.version, 2);
        assert_eq!(config.level_curve.level_for(160), 3);
        assert_eq!(config.points.discussion_post, 12);
        assert_eq!(config.points.like, 2);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let file = write_file(r#"{ "points": { "like": 3 } }"#);

        let config = GamificationConfig::load(file.path()).unwrap();
        assert_eq!(config.level_curve, LevelCurve::default());
        assert_eq!(config.points.like, 3);
        assert_eq!(
            config.points.discussion_post,
            PointSchedule::default().discussion_post
        );
    }

    #[test]
    fn rejects_invalid_curve() {
        let file = write_file(r#"{ "level_curve": { "version": 3, "thresholds": [0, 100, 50] } }"#);

        let err = GamificationConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn reports_parse_and_io_errors() {
        let file = write_file("not json");
        assert!(matches!(
            GamificationConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            GamificationConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn parses_origin_lists() {
        assert_eq!(
            parse_list("https://a.example, https://b.example,,"),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }
}
