use crate::common::constants::{
    DEFAULT_COLLECTION, DEFAULT_DAG_ID, DEFAULT_DETAILED_REPORT_NAME, DEFAULT_REPORT_NAME,
    MAX_DOCUMENT_BYTES,
};
use crate::common::error::{EtlError, Result};
use crate::pipeline::clean::CleaningPolicy;
use crate::pipeline::extract::SourceFormat;
use crate::pipeline::orchestrator::RetryPolicy;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub dag: DagConfig,
    pub source: SourceConfig,
    pub cleaning: CleaningPolicy,
    pub relational: RelationalConfig,
    pub documents: DocumentConfig,
    pub reports: ReportConfig,
    pub staging: StagingConfig,
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DagConfig {
    pub dag_id: String,
    /// Informational; an external scheduler triggers runs
    pub schedule: String,
    pub retries: u32,
    pub retry_delay_secs: u64,
    pub exponential_backoff: bool,
    pub max_retry_delay_secs: u64,
    pub task_timeout_secs: Option<u64>,
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            dag_id: DEFAULT_DAG_ID.to_string(),
            schedule: "@daily".to_string(),
            retries: 3,
            retry_delay_secs: 300,
            exponential_backoff: true,
            max_retry_delay_secs: 900,
            task_timeout_secs: Some(3600),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// File path or http(s) URL
    pub location: String,
    pub format: Option<SourceFormat>,
    pub http_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            location: "data/raw/meetingbank.csv".to_string(),
            format: None,
            http_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    /// SQLite database file; `:memory:` for a throwaway store
    pub sqlite_path: String,
    pub apply_migrations: bool,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "data/warehouse/meetingbank.db".to_string(),
            apply_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    pub root: PathBuf,
    pub collection: String,
    pub max_document_bytes: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/documents"),
            collection: DEFAULT_COLLECTION.to_string(),
            max_document_bytes: MAX_DOCUMENT_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub dir: PathBuf,
    pub report_name: String,
    pub detailed_report_name: String,
    pub overwrite: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("reports"),
            report_name: DEFAULT_REPORT_NAME.to_string(),
            detailed_report_name: DEFAULT_DETAILED_REPORT_NAME.to_string(),
            overwrite: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    pub root: PathBuf,
    pub enabled: bool,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/staging"),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub top_terms: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self { top_terms: 10 }
    }
}

impl EtlConfig {
    /// Load `.env`, then the TOML file (if present), then environment overrides.
    ///
    /// An explicitly named file must exist; the default `config.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenv::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => {
                debug!("No {} found, using defaults", DEFAULT_CONFIG_PATH);
                Self::default()
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: EtlConfig = toml::from_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        if let Some(v) = var("ETL_SOURCE") {
            self.source.location = v;
        }
        if let Some(v) = var("ETL_SQLITE_PATH") {
            self.relational.sqlite_path = v;
        }
        if let Some(v) = var("ETL_DOCUMENT_ROOT") {
            self.documents.root = PathBuf::from(v);
        }
        if let Some(v) = var("ETL_REPORT_DIR") {
            self.reports.dir = PathBuf::from(v);
        }
        if let Some(v) = var("ETL_STAGING_ROOT") {
            self.staging.root = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dag.dag_id.trim().is_empty() {
            return Err(EtlError::Config("dag.dag_id must not be empty".to_string()));
        }
        if self.source.location.trim().is_empty() {
            return Err(EtlError::Config("source.location must not be empty".to_string()));
        }
        if self.documents.collection.trim().is_empty() {
            return Err(EtlError::Config("documents.collection must not be empty".to_string()));
        }
        if self.documents.max_document_bytes == 0 {
            return Err(EtlError::Config("documents.max_document_bytes must be positive".to_string()));
        }
        if self.reports.report_name == self.reports.detailed_report_name {
            return Err(EtlError::Config(
                "reports.report_name and reports.detailed_report_name must differ".to_string(),
            ));
        }
        if self.cleaning.min_year > self.cleaning.max_year {
            return Err(EtlError::Config("cleaning.min_year is after cleaning.max_year".to_string()));
        }
        if self.dag.task_timeout_secs == Some(0) {
            return Err(EtlError::Config("dag.task_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.dag.retries,
            retry_delay: Duration::from_secs(self.dag.retry_delay_secs),
            exponential_backoff: self.dag.exponential_backoff,
            max_retry_delay: Duration::from_secs(self.dag.max_retry_delay_secs),
            timeout: self.dag.task_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_mirror_the_daily_dag() {
        let config = EtlConfig::default();
        assert_eq!(config.dag.dag_id, "meetingbank_etl_pipeline");
        assert_eq!(config.dag.schedule, "@daily");
        let policy = config.retry_policy();
        assert_eq!(policy.retries, 3);
        assert_eq!(policy.retry_delay, Duration::from_secs(300));
        assert_eq!(policy.max_retry_delay, Duration::from_secs(900));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[source]\nlocation = \"meetings.json\"\nformat = \"json\"\n\n[reports]\noverwrite = true\n\n[cleaning]\nmax_year = 2030"
        )
        .unwrap();
        let config = EtlConfig::from_file(file.path()).unwrap();
        assert_eq!(config.source.location, "meetings.json");
        assert_eq!(config.source.format, Some(SourceFormat::Json));
        assert!(config.reports.overwrite);
        assert_eq!(config.reports.report_name, "meetingbank_report");
        assert_eq!(config.cleaning.max_year, 2030);
        assert_eq!(config.cleaning.min_year, 1900);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = EtlConfig::default();
        config.reports.detailed_report_name = config.reports.report_name.clone();
        assert!(matches!(config.validate(), Err(EtlError::Config(_))));
    }
}
