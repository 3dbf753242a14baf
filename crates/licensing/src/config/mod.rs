use std::collections::BTreeMap;
use std::env;
use std::fmt;

use crate::workflows::requests::CycleResetPolicy;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub telemetry: TelemetryConfig,
    pub review: ReviewConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let default_cycle_policy = match env::var("LICENSING_CYCLE_POLICY") {
            Ok(raw) => CycleResetPolicy::parse(&raw)
                .ok_or(ConfigError::InvalidCyclePolicy { value: raw })?,
            Err(_) => CycleResetPolicy::default(),
        };

        let overrides = match env::var("LICENSING_CYCLE_POLICY_OVERRIDES") {
            Ok(raw) => parse_overrides(&raw)?,
            Err(_) => BTreeMap::new(),
        };

        Ok(Self {
            environment,
            telemetry: TelemetryConfig { log_level },
            review: ReviewConfig {
                default_cycle_policy,
                overrides,
            },
        })
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Review-cycle behavior applied when a returned request is resubmitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewConfig {
    pub default_cycle_policy: CycleResetPolicy,
    /// Keyed by service type id.
    pub overrides: BTreeMap<String, CycleResetPolicy>,
}

/// Parse `service=policy` pairs separated by commas.
fn parse_overrides(raw: &str) -> Result<BTreeMap<String, CycleResetPolicy>, ConfigError> {
    let mut overrides = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let invalid = || ConfigError::InvalidOverride {
            entry: entry.to_string(),
        };
        let (service_type, policy) = entry.split_once('=').ok_or_else(invalid)?;
        let service_type = service_type.trim();
        if service_type.is_empty() {
            return Err(invalid());
        }
        let policy = CycleResetPolicy::parse(policy).ok_or_else(invalid)?;
        overrides.insert(service_type.to_string(), policy);
    }
    Ok(overrides)
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidCyclePolicy { value: String },
    InvalidOverride { entry: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidCyclePolicy { value } => write!(
                f,
                "LICENSING_CYCLE_POLICY must be 'preserve' or 'revalidate', got '{value}'"
            ),
            ConfigError::InvalidOverride { entry } => write!(
                f,
                "LICENSING_CYCLE_POLICY_OVERRIDES entry '{entry}' must look like service=policy"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
