use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use trust_engine::PipelineConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    /// Shared Postgres state; without it the server keeps everything in memory
    pub database_url: Option<String>,
    pub extractor_url: String,
    pub analyzer_base_url: String,
    /// Optional TOML weight table replacing the built-in scoring defaults
    pub scoring_config: Option<PathBuf>,
    pub max_concurrent_jobs: usize,
    pub job_deadline: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = PipelineConfig::default();

        Ok(Self {
            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            database_url: var("DATABASE_URL"),
            extractor_url: var("EXTRACTOR_URL").context("EXTRACTOR_URL must be set")?,
            analyzer_base_url: var("ANALYZER_BASE_URL")
                .context("ANALYZER_BASE_URL must be set")?,
            scoring_config: var("SCORING_CONFIG").map(PathBuf::from),
            max_concurrent_jobs: match var("MAX_CONCURRENT_JOBS") {
                Some(v) => v
                    .parse()
                    .context("MAX_CONCURRENT_JOBS must be a valid number")?,
                None => defaults.max_concurrent_jobs,
            },
            job_deadline: match var("JOB_DEADLINE_SECS") {
                Some(v) => Duration::from_secs(
                    v.parse()
                        .context("JOB_DEADLINE_SECS must be a valid number")?,
                ),
                None => defaults.job_deadline(),
            },
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_max_concurrent_jobs(self.max_concurrent_jobs)
            .with_job_deadline(self.job_deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("EXTRACTOR_URL", "http://scraper:9000"),
            ("ANALYZER_BASE_URL", "http://models:8080"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.database_url, None);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.job_deadline, Duration::from_secs(120));
        assert_eq!(config.pipeline_config(), PipelineConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORT", "3000"),
            ("DATABASE_URL", "postgres://localhost/trust"),
            ("EXTRACTOR_URL", "http://scraper:9000"),
            ("ANALYZER_BASE_URL", "http://models:8080"),
            ("SCORING_CONFIG", "/etc/trust/scoring.toml"),
            ("MAX_CONCURRENT_JOBS", "16"),
            ("JOB_DEADLINE_SECS", "45"),
        ]))
        .unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/trust"));
        assert_eq!(config.scoring_config, Some(PathBuf::from("/etc/trust/scoring.toml")));
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.max_concurrent_jobs, 16);
        assert_eq!(pipeline.job_deadline(), Duration::from_secs(45));
    }

    #[test]
    fn test_missing_collaborators_is_an_error() {
        let err = ServerConfig::from_lookup(lookup(&[("EXTRACTOR_URL", "http://scraper")]))
            .unwrap_err();
        assert!(err.to_string().contains("ANALYZER_BASE_URL"));
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let result = ServerConfig::from_lookup(lookup(&[
            ("EXTRACTOR_URL", "http://scraper:9000"),
            ("ANALYZER_BASE_URL", "http://models:8080"),
            ("PORT", "eighty"),
        ]));
        assert!(result.is_err());
    }
}
