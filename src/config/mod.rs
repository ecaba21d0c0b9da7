//! Typed configuration.
//!
//! [`QueueOptions`] describes one queue and can be read from TOML.
//! [`Config`] is the process-level view loaded once from environment
//! variables; sensitive values are wrapped in `SecretString` to keep them
//! out of logs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::ordering::{OrderingStrategy, QueueKind};

// ---------------------------------------------------------------------------
// Queue options
// ---------------------------------------------------------------------------

/// Options for opening one queue. Every field has a default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueOptions {
    /// Appended to the kind's table prefix, e.g. `queue_default`.
    pub name: String,
    pub kind: QueueKind,
    /// `true`: `get` deletes the row. `false`: rows stay until `task_done`.
    pub auto_commit: bool,
    /// Upper bound on one blocking wait slice in `get`.
    pub poll_interval_secs: f64,
    /// How long SQLite waits on a lock held by another connection.
    pub busy_timeout_secs: f64,
    pub db_file_name: String,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            kind: QueueKind::Fifo,
            auto_commit: true,
            poll_interval_secs: 10.0,
            busy_timeout_secs: 10.0,
            db_file_name: "data.db".to_string(),
        }
    }
}

impl QueueOptions {
    pub fn new(kind: QueueKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_secs = interval.as_secs_f64();
        self
    }

    /// Parse options from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let options: Self =
            toml::from_str(s).map_err(|e| Error::Config(format!("invalid queue options: {e}")))?;
        options
            .validate()
            .map_err(|e| Error::Config(format!("invalid queue options: {e}")))?;
        Ok(options)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Table backing this queue: `<kind prefix>_<name>`.
    pub fn table_name(&self) -> Result<String> {
        self.table_name_for(self.kind.strategy().as_ref())
    }

    /// Table for this queue's name under an arbitrary strategy's prefix.
    /// Use it to build the store passed to `Queue::with_strategy`.
    pub fn table_name_for(&self, strategy: &dyn OrderingStrategy) -> Result<String> {
        let table = format!("{}_{}", strategy.table_prefix(), self.name);
        validate_identifier(&table)?;
        Ok(table)
    }

    pub fn poll_interval_duration(&self) -> Result<Duration> {
        positive_duration("poll_interval_secs", self.poll_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        self.table_name()?;
        self.poll_interval_duration()?;
        Duration::try_from_secs_f64(self.busy_timeout_secs)
            .map_err(|e| Error::InvalidArgument(format!("busy_timeout_secs: {e}")))?;
        if self.db_file_name.is_empty() {
            return Err(Error::InvalidArgument("db_file_name is empty".to_string()));
        }
        Ok(())
    }
}

fn positive_duration(field: &str, secs: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(Error::InvalidArgument(format!(
            "{field} must be a positive number of seconds, got {secs}"
        ))),
    }
}

/// Table names are interpolated into SQL, so only `[A-Za-z0-9_]` is allowed.
pub fn validate_identifier(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "invalid table name {name:?}: use letters, digits and underscores"
        )))
    }
}

// ---------------------------------------------------------------------------
// Process config
// ---------------------------------------------------------------------------

/// Where queue tables live.
#[derive(Debug)]
pub enum Backend {
    /// Embedded SQLite file under this directory.
    Sqlite { dir: PathBuf },
    /// Client/server Postgres.
    Postgres { url: SecretString },
}

#[derive(Debug)]
pub struct Config {
    pub backend: Backend,
    pub queue: QueueOptions,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// `DATABASE_URL` selects Postgres; otherwise `SQLQ_PATH` (default `.`)
    /// holds the SQLite file.
    pub fn from_env() -> Result<Self> {
        let backend = match std::env::var("DATABASE_URL") {
            Ok(url) if !url.is_empty() => Backend::Postgres {
                url: SecretString::from(url),
            },
            _ => Backend::Sqlite {
                dir: PathBuf::from(std::env::var("SQLQ_PATH").unwrap_or_else(|_| ".".to_string())),
            },
        };

        let mut queue = QueueOptions::default();
        if let Ok(name) = std::env::var("SQLQ_NAME") {
            queue.name = name;
        }
        if let Ok(kind) = std::env::var("SQLQ_KIND") {
            queue.kind = kind
                .parse()
                .map_err(|_| Error::Config(format!("SQLQ_KIND: unknown queue kind {kind:?}")))?;
        }
        if let Some(auto_commit) = optional_var::<bool>("SQLQ_AUTO_COMMIT")? {
            queue.auto_commit = auto_commit;
        }
        if let Some(secs) = optional_var::<f64>("SQLQ_POLL_INTERVAL_SECS")? {
            queue.poll_interval_secs = secs;
        }
        queue
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            backend,
            queue,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn optional_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_combines_kind_and_name() {
        let opts = QueueOptions::new(QueueKind::Unique).name("jobs");
        assert_eq!(opts.table_name().unwrap(), "unique_queue_jobs");
        assert_eq!(QueueOptions::default().table_name().unwrap(), "queue_default");
    }

    #[test]
    fn identifiers_reject_sql() {
        assert!(validate_identifier("queue_1").is_ok());
        assert!(validate_identifier("1queue").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("q\"; DROP").is_err());
    }

    #[test]
    fn toml_fills_defaults() {
        let opts = QueueOptions::from_toml_str(
            r#"
            name = "mail"
            kind = "filo"
            auto_commit = false
            "#,
        )
        .unwrap();
        assert_eq!(opts.kind, QueueKind::Filo);
        assert!(!opts.auto_commit);
        assert_eq!(opts.poll_interval_secs, 10.0);
        assert_eq!(opts.table_name().unwrap(), "filo_queue_mail");
    }

    #[test]
    fn toml_rejects_unknown_and_invalid_fields() {
        for doc in ["colour = 'red'", "poll_interval_secs = 0.0", "name = 'a-b'"] {
            let err = QueueOptions::from_toml_str(doc).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{doc}: got {err:?}");
        }
    }

    #[test]
    fn table_name_for_uses_strategy_prefix() {
        use crate::ordering::Filo;
        let opts = QueueOptions::default().name("jobs");
        assert_eq!(opts.table_name_for(&Filo).unwrap(), "filo_queue_jobs");
    }
}
