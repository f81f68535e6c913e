//! Configuration types.
//!
//! `DispatchConfig` is the immutable organisational metadata the pipeline
//! runs with. It is passed explicitly into each component so tests can
//! substitute their own. `AppConfig` adds the deployment settings read from
//! the environment by the binary.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::Serialize;

use crate::error::ConfigError;

/// Upper bound accepted for `CASE_DISPATCH_LOOKBACK_DAYS`.
pub const MAX_LOOKBACK_DAYS: i64 = 366;

/// A caseworker identity in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Caseworker {
    pub name: String,
    pub ident: String,
    pub uuid: String,
}

/// A department in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: i64,
    pub name: String,
    pub user_key: String,
}

/// Filter passed to the case list query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateQuery {
    /// Lifecycle state of the cases to list (closed cases only).
    pub case_state: String,
    /// Decision status of the cases to list.
    pub case_status: String,
}

/// Metadata attached to the digital-post message.
#[derive(Debug, Clone)]
pub struct DeliveryMetadata {
    pub label: String,
    pub sender_id: String,
    pub sender_label: String,
    pub file_name: String,
    pub language: String,
}

/// Metadata used when filing the letter in the registry.
#[derive(Debug, Clone)]
pub struct RegistryMetadata {
    pub case_title: String,
    /// Classification code.
    pub kle_number: String,
    pub proceeding_facet: String,
    pub sensitivity: String,
    pub progress_state: String,
    pub document_title: String,
    pub document_type: String,
    pub document_description: String,
    pub caseworker: Caseworker,
    pub responsible_department: Department,
    pub security_unit: Department,
}

/// Static letterhead text printed on every letter.
#[derive(Debug, Clone)]
pub struct Letterhead {
    pub organisation: String,
    pub unit: String,
    /// Contact block printed below the organisation name.
    pub contact_lines: Vec<String>,
    pub signature: String,
    /// Image drawn in the top-right corner. No logo when unset.
    pub logo_path: Option<PathBuf>,
}

/// Immutable pipeline configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Name of the durable work queue.
    pub queue_name: String,
    /// Marker written to the case log once a letter is sent.
    pub audit_marker: String,
    /// Activity label used for the case log entry.
    pub audit_activity: String,
    /// Case types that never get a letter.
    pub excluded_case_types: BTreeSet<String>,
    /// Status a summary must carry to be eligible.
    pub approved_status: String,
    pub candidate_query: CandidateQuery,
    /// How many days back the candidate query looks.
    pub lookback_days: i64,
    /// Dispatch attempts allowed per case, the first one included. A case
    /// that has used them all is held for manual review.
    pub max_attempts: u32,
    /// Consecutive case failures tolerated before the run stops.
    pub max_consecutive_failures: u32,
    /// Whether stopping on the failure threshold fails the run.
    pub fail_run_on_too_many_errors: bool,
    /// Mark stale queue records Done when the audit log shows the case was handled.
    pub mark_stale_done: bool,
    pub delivery: DeliveryMetadata,
    pub registry: RegistryMetadata,
    pub letterhead: Letterhead,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let excluded_case_types = [
            "Børneflytning 1",
            "Børneflytning 2",
            "Børneflytning 3",
            "Mindreårig",
            "Barn",
            "Udland",
            "Tilflytning høj vejkode",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self {
            queue_name: "Udsendelse af orienteringsbrev om godkendelse af flyttesager".to_string(),
            audit_marker: "Orientering om godkendelse sendt til anmelder".to_string(),
            audit_activity: "Afsendt".to_string(),
            excluded_case_types,
            approved_status: "Godkendt".to_string(),
            candidate_query: CandidateQuery {
                case_state: "Afsluttet".to_string(),
                case_status: "Godkendt".to_string(),
            },
            lookback_days: 5,
            max_attempts: 2,
            max_consecutive_failures: 3,
            fail_run_on_too_many_errors: true,
            mark_stale_done: true,
            delivery: DeliveryMetadata {
                label: "Godkendelse af flyttesag".to_string(),
                sender_id: "55133018".to_string(),
                sender_label: "Aarhus Kommune".to_string(),
                file_name: "Brev.pdf".to_string(),
                language: "da".to_string(),
            },
            registry: RegistryMetadata {
                case_title: "Udsendelse af orienteringsbrev om flyttesag".to_string(),
                kle_number: "23.00.00".to_string(),
                proceeding_facet: "G01".to_string(),
                sensitivity: "Følsomme".to_string(),
                progress_state: "Afsluttet".to_string(),
                document_title: "Orienteringsbrev om flyttesag".to_string(),
                document_type: "Udgående".to_string(),
                document_description:
                    "Dokument til orientering om godkendelse af flyttesag i eFlyt".to_string(),
                caseworker: Caseworker {
                    name: "Rpabruger Rpa78 - MÅ IKKE SLETTES RITM0283472".to_string(),
                    ident: "azrpa78".to_string(),
                    uuid: "203e17a1-0032-4f1d-be98-9386e4f2f336".to_string(),
                },
                responsible_department: Department {
                    id: 70403,
                    name: "Folkeregister og Sygesikring".to_string(),
                    user_key: "4BFOLKEREG".to_string(),
                },
                security_unit: Department {
                    id: 818485,
                    name: "Borgerservice".to_string(),
                    user_key: "4BBORGER".to_string(),
                },
            },
            letterhead: Letterhead {
                organisation: "Aarhus Kommune".to_string(),
                unit: "Borgerservice".to_string(),
                contact_lines: vec![
                    "Folkeregister/Sygesikring".to_string(),
                    "Dokk1".to_string(),
                    "Hack Kampmanns Plads 2".to_string(),
                    "8000 Aarhus C".to_string(),
                    String::new(),
                    "Telefon 8940 2000".to_string(),
                    String::new(),
                    "aarhus.dk".to_string(),
                ],
                signature: "Aarhus Folkeregister".to_string(),
                logo_path: None,
            },
        }
    }
}

/// Connection settings for the case-management system.
#[derive(Debug, Clone)]
pub struct CaseSystemConfig {
    pub base_url: String,
    pub username: String,
    pub password: SecretString,
}

/// Connection settings for the digital-post gateway.
#[derive(Debug, Clone)]
pub struct PostalConfig {
    pub base_url: String,
    pub certificate_path: PathBuf,
    pub key_path: PathBuf,
}

/// Connection settings for the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// When set, logs are also written to daily files in this directory.
    pub log_dir: Option<PathBuf>,
}

/// Everything the binary needs to run one batch.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub dispatch: DispatchConfig,
    pub db_path: PathBuf,
    pub http_timeout: Duration,
    pub case_system: CaseSystemConfig,
    pub postal: PostalConfig,
    pub registry: RegistryConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Build config from environment variables, loading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let mut dispatch = DispatchConfig::default();
        if let Some(days) = parse_optional::<i64>(&lookup, "CASE_DISPATCH_LOOKBACK_DAYS")? {
            if !(0..=MAX_LOOKBACK_DAYS).contains(&days) {
                return Err(ConfigError::InvalidValue {
                    key: "CASE_DISPATCH_LOOKBACK_DAYS".to_string(),
                    message: format!("must be between 0 and {MAX_LOOKBACK_DAYS}"),
                });
            }
            dispatch.lookback_days = days;
        }
        if let Some(attempts) = parse_optional::<u32>(&lookup, "CASE_DISPATCH_MAX_ATTEMPTS")? {
            if attempts == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "CASE_DISPATCH_MAX_ATTEMPTS".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            dispatch.max_attempts = attempts;
        }
        dispatch.letterhead.logo_path = lookup("CASE_DISPATCH_LOGO_PATH").map(PathBuf::from);
        if let Some(max) = parse_optional::<u32>(&lookup, "CASE_DISPATCH_MAX_FAILURES")? {
            dispatch.max_consecutive_failures = max;
        }
        if let Some(fail) = parse_optional::<bool>(&lookup, "CASE_DISPATCH_FAIL_ON_TOO_MANY_ERRORS")? {
            dispatch.fail_run_on_too_many_errors = fail;
        }

        let timeout_secs =
            parse_optional::<u64>(&lookup, "CASE_DISPATCH_HTTP_TIMEOUT_SECS")?.unwrap_or(60);

        Ok(Self {
            dispatch,
            db_path: lookup("CASE_DISPATCH_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/case-dispatch.db")),
            http_timeout: Duration::from_secs(timeout_secs),
            case_system: CaseSystemConfig {
                base_url: required("CASE_SYSTEM_URL")?,
                username: required("CASE_SYSTEM_USERNAME")?,
                password: SecretString::from(required("CASE_SYSTEM_PASSWORD")?),
            },
            postal: PostalConfig {
                base_url: required("POSTAL_URL")?,
                certificate_path: PathBuf::from(required("POSTAL_CERT_PATH")?),
                key_path: PathBuf::from(required("POSTAL_KEY_PATH")?),
            },
            registry: RegistryConfig {
                base_url: required("REGISTRY_URL")?,
                client_id: required("REGISTRY_CLIENT_ID")?,
                client_secret: SecretString::from(required("REGISTRY_CLIENT_SECRET")?),
            },
            telemetry: TelemetryConfig {
                log_level: lookup("CASE_DISPATCH_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
                log_dir: lookup("CASE_DISPATCH_LOG_DIR").map(PathBuf::from),
            },
        })
    }
}

fn parse_optional<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("CASE_SYSTEM_URL", "https://cases.example"),
            ("CASE_SYSTEM_USERNAME", "robot"),
            ("CASE_SYSTEM_PASSWORD", "hunter2"),
            ("POSTAL_URL", "https://post.example"),
            ("POSTAL_CERT_PATH", "/etc/dispatch/cert.pem"),
            ("POSTAL_KEY_PATH", "/etc/dispatch/key.pem"),
            ("REGISTRY_URL", "https://registry.example"),
            ("REGISTRY_CLIENT_ID", "client"),
            ("REGISTRY_CLIENT_SECRET", "secret"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn loads_defaults() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.dispatch.lookback_days, 5);
        assert_eq!(config.dispatch.max_attempts, 2);
        assert_eq!(config.dispatch.max_consecutive_failures, 3);
        assert_eq!(config.dispatch.letterhead.logo_path, None);
        assert!(config.dispatch.fail_run_on_too_many_errors);
        assert_eq!(config.http_timeout, Duration::from_secs(60));
        assert_eq!(config.db_path, PathBuf::from("./data/case-dispatch.db"));
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.case_system.password.expose_secret(), "hunter2");
    }

    #[test]
    fn missing_required_value_is_reported() {
        let mut env = base_env();
        env.remove("POSTAL_URL");
        let err = load(&env).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "POSTAL_URL"));
    }

    #[test]
    fn blank_required_value_counts_as_missing() {
        let mut env = base_env();
        env.insert("REGISTRY_CLIENT_ID", "   ");
        assert!(matches!(load(&env), Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn overrides_thresholds() {
        let mut env = base_env();
        env.insert("CASE_DISPATCH_LOOKBACK_DAYS", "10");
        env.insert("CASE_DISPATCH_MAX_FAILURES", "7");
        env.insert("CASE_DISPATCH_FAIL_ON_TOO_MANY_ERRORS", "false");
        env.insert("CASE_DISPATCH_MAX_ATTEMPTS", "3");
        env.insert("CASE_DISPATCH_LOGO_PATH", "/etc/dispatch/logo.png");
        let config = load(&env).unwrap();
        assert_eq!(config.dispatch.lookback_days, 10);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(
            config.dispatch.letterhead.logo_path,
            Some(PathBuf::from("/etc/dispatch/logo.png"))
        );
        assert_eq!(config.dispatch.max_consecutive_failures, 7);
        assert!(!config.dispatch.fail_run_on_too_many_errors);
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let mut env = base_env();
        env.insert("CASE_DISPATCH_MAX_FAILURES", "lots");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn rejects_negative_lookback() {
        let mut env = base_env();
        env.insert("CASE_DISPATCH_LOOKBACK_DAYS", "-1");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn rejects_lookback_beyond_a_year() {
        let mut env = base_env();
        env.insert("CASE_DISPATCH_LOOKBACK_DAYS", "100000000");
        let err = load(&env).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "CASE_DISPATCH_LOOKBACK_DAYS")
        );

        env.insert("CASE_DISPATCH_LOOKBACK_DAYS", "366");
        assert_eq!(load(&env).unwrap().dispatch.lookback_days, MAX_LOOKBACK_DAYS);
    }

    #[test]
    fn rejects_zero_attempts() {
        let mut env = base_env();
        env.insert("CASE_DISPATCH_MAX_ATTEMPTS", "0");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn default_exclusions_cover_minor_and_transfer_types() {
        let config = DispatchConfig::default();
        assert!(config.excluded_case_types.contains("Barn"));
        assert!(config.excluded_case_types.contains("Udland"));
        assert!(config.excluded_case_types.contains("Tilflytning høj vejkode"));
        assert_eq!(config.excluded_case_types.len(), 7);
    }
}
