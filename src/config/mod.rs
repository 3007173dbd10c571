use crate::error::{Result, UploadError};
use crate::services::sequencer::FileSequencer;
use std::env;
use std::fmt;
use std::path::PathBuf;
use validator::Validate;

pub const DEFAULT_SEQUENCE_FORMAT: &str = "%03d.%02d";
pub const DEFAULT_MAX_CONNECTION_RETRY: u32 = 10;
pub const DEFAULT_INITIAL_RETRY_WAIT_MS: u64 = 500;
pub const DEFAULT_MAX_RETRY_WAIT_MS: u64 = 30 * 1000;
pub const DEFAULT_REGION: &str = "us-east-1";

/// Access credentials for the object store account.
#[derive(Clone, Validate)]
pub struct StorageCredentials {
    #[validate(length(min = 1, message = "account_name must not be empty"))]
    pub account_name: String,

    #[validate(length(min = 1, message = "account_key must not be empty"))]
    pub account_key: String,
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("account_name", &self.account_name)
            .field("account_key", &"<redacted>")
            .finish()
    }
}

/// Output configuration for one upload job
#[derive(Debug, Clone, Validate)]
pub struct OutputConfig {
    #[validate(nested)]
    pub credentials: StorageCredentials,

    /// Custom endpoint URL (e.g. a MinIO server). Provider default when unset.
    #[validate(url(message = "endpoint must be a valid URL"))]
    pub endpoint: Option<String>,

    /// Region (default: "us-east-1")
    pub region: String,

    /// Target container (bucket)
    #[validate(length(min = 1, message = "container must not be empty"))]
    pub container: String,

    /// Prepended verbatim to every remote key
    pub path_prefix: String,

    /// File extension, with or without the leading dot
    #[validate(length(min = 1, message = "file_ext must not be empty"))]
    pub file_ext: String,

    /// Two-integer pattern applied to (task index, file index) (default: "%03d.%02d")
    pub sequence_format: String,

    /// Upload attempts per file (default: 10)
    #[validate(range(min = 1, message = "max_connection_retry must be at least 1"))]
    pub max_connection_retry: u32,

    /// Wait before the first retry in milliseconds (default: 500)
    pub initial_retry_wait_ms: u64,

    /// Ceiling for the wait between retries in milliseconds (default: 30000)
    pub max_retry_wait_ms: u64,

    /// Scratch directory for staging files. Host temp dir when unset.
    pub temp_dir: Option<PathBuf>,
}

impl OutputConfig {
    pub fn new(
        credentials: StorageCredentials,
        container: impl Into<String>,
        path_prefix: impl Into<String>,
        file_ext: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
            container: container.into(),
            path_prefix: path_prefix.into(),
            file_ext: file_ext.into(),
            sequence_format: DEFAULT_SEQUENCE_FORMAT.to_string(),
            max_connection_retry: DEFAULT_MAX_CONNECTION_RETRY,
            initial_retry_wait_ms: DEFAULT_INITIAL_RETRY_WAIT_MS,
            max_retry_wait_ms: DEFAULT_MAX_RETRY_WAIT_MS,
            temp_dir: None,
        }
    }

    /// Load configuration from `BLOB_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            get(key).ok_or_else(|| UploadError::Configuration(format!("{} must be set", key)))
        };

        let credentials = StorageCredentials {
            account_name: required("BLOB_ACCOUNT_NAME")?,
            account_key: required("BLOB_ACCOUNT_KEY")?,
        };
        let mut config = Self::new(
            credentials,
            required("BLOB_CONTAINER")?,
            required("BLOB_PATH_PREFIX")?,
            required("BLOB_FILE_EXT")?,
        );

        config.endpoint = get("BLOB_ENDPOINT").filter(|v| !v.is_empty());
        if let Some(region) = get("BLOB_REGION") {
            config.region = region;
        }
        if let Some(format) = get("BLOB_SEQUENCE_FORMAT") {
            config.sequence_format = format;
        }
        config.max_connection_retry = parse_or(
            get("BLOB_MAX_CONNECTION_RETRY"),
            "BLOB_MAX_CONNECTION_RETRY",
            DEFAULT_MAX_CONNECTION_RETRY,
        )?;
        config.initial_retry_wait_ms = parse_or(
            get("BLOB_INITIAL_RETRY_WAIT_MS"),
            "BLOB_INITIAL_RETRY_WAIT_MS",
            DEFAULT_INITIAL_RETRY_WAIT_MS,
        )?;
        config.max_retry_wait_ms = parse_or(
            get("BLOB_MAX_RETRY_WAIT_MS"),
            "BLOB_MAX_RETRY_WAIT_MS",
            DEFAULT_MAX_RETRY_WAIT_MS,
        )?;
        config.temp_dir = get("BLOB_TEMP_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        config.ensure_valid()?;
        Ok(config)
    }

    /// Field constraints plus a parse of the sequence format.
    pub fn ensure_valid(&self) -> Result<()> {
        self.validate()
            .map_err(|e| UploadError::Configuration(e.to_string()))?;

        if self.max_retry_wait_ms < self.initial_retry_wait_ms {
            return Err(UploadError::Configuration(format!(
                "max_retry_wait_ms ({}) is lower than initial_retry_wait_ms ({})",
                self.max_retry_wait_ms, self.initial_retry_wait_ms
            )));
        }

        self.sequencer().map(|_| ())
    }

    pub fn sequencer(&self) -> Result<FileSequencer> {
        FileSequencer::new(&self.path_prefix, &self.sequence_format, &self.file_ext)
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| {
            UploadError::Configuration(format!("{} has an invalid value '{}'", key, v))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("BLOB_ACCOUNT_NAME", "account"),
            ("BLOB_ACCOUNT_KEY", "c2VjcmV0"),
            ("BLOB_CONTAINER", "embulk"),
            ("BLOB_PATH_PREFIX", "my-prefix"),
            ("BLOB_FILE_EXT", ".csv"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<OutputConfig> {
        OutputConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_default_values() {
        let config = load(&base_vars()).unwrap();
        assert_eq!(config.credentials.account_name, "account");
        assert_eq!(config.container, "embulk");
        assert_eq!(config.sequence_format, "%03d.%02d");
        assert_eq!(config.max_connection_retry, 10);
        assert_eq!(config.initial_retry_wait_ms, 500);
        assert_eq!(config.max_retry_wait_ms, 30_000);
        assert_eq!(config.region, "us-east-1");
        assert!(config.endpoint.is_none());
        assert!(config.temp_dir.is_none());
    }

    #[test]
    fn test_overrides() {
        let mut vars = base_vars();
        vars.insert("BLOB_MAX_CONNECTION_RETRY", "3");
        vars.insert("BLOB_SEQUENCE_FORMAT", "%d-%d");
        vars.insert("BLOB_ENDPOINT", "http://127.0.0.1:9000");
        vars.insert("BLOB_TEMP_DIR", "/var/tmp");
        let config = load(&vars).unwrap();
        assert_eq!(config.max_connection_retry, 3);
        assert_eq!(config.sequence_format, "%d-%d");
        assert_eq!(config.endpoint.as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(config.temp_dir, Some(PathBuf::from("/var/tmp")));
    }

    #[test]
    fn test_missing_required_variable() {
        let mut vars = base_vars();
        vars.remove("BLOB_CONTAINER");
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, UploadError::Configuration(ref m) if m.contains("BLOB_CONTAINER")));
    }

    #[test]
    fn test_rejects_invalid_values() {
        for (key, value) in [
            ("BLOB_MAX_CONNECTION_RETRY", "0"),
            ("BLOB_MAX_CONNECTION_RETRY", "many"),
            ("BLOB_SEQUENCE_FORMAT", "%d"),
            ("BLOB_FILE_EXT", ""),
            ("BLOB_ACCOUNT_KEY", ""),
            ("BLOB_MAX_RETRY_WAIT_MS", "100"),
            ("BLOB_ENDPOINT", "not a url"),
            ("BLOB_ENDPOINT", "127.0.0.1:9000"),
        ] {
            let mut vars = base_vars();
            vars.insert(key, value);
            assert!(
                matches!(load(&vars), Err(UploadError::Configuration(_))),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_debug_redacts_account_key() {
        let config = load(&base_vars()).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("c2VjcmV0"));
        assert!(debug.contains("<redacted>"));
    }
}
