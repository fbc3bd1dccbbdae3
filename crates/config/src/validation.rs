//! Configuration validation
//!
//! Validation runs over the JSON form of a tree: a hand-edited file with a
//! wrong type yields a `type` issue for that field alongside every other
//! problem instead of aborting on the first deserialization error. All issues
//! of a pass are collected before the result is returned.

use crate::schema::AuditConfig;
use chrono::DateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use types::{ConfigValidationError, Environment, ValidationIssue, ValidationKind};

use crate::paths;

/// JSON type a field must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl RuleType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            RuleType::String => value.is_string(),
            RuleType::Integer => value.is_i64() || value.is_u64(),
            RuleType::Number => value.is_number(),
            RuleType::Boolean => value.is_boolean(),
            RuleType::Array => value.is_array(),
            RuleType::Object => value.is_object(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            RuleType::String => "string",
            RuleType::Integer => "integer",
            RuleType::Number => "number",
            RuleType::Boolean => "boolean",
            RuleType::Array => "array",
            RuleType::Object => "object",
        }
    }
}

/// Custom predicate: `Ok(())` or a human-readable failure reason
pub type CustomCheck = fn(&Value) -> Result<(), String>;

/// Declarative rule for one dotted path
///
/// `min`/`max` bound the value of numbers and the length of strings and arrays.
#[derive(Debug, Clone)]
pub struct ValidationRule {
    pub path: &'static str,
    pub required: bool,
    pub rule_type: RuleType,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub pattern: Option<Regex>,
    pub allowed: Option<&'static [&'static str]>,
    pub custom: Option<CustomCheck>,
}

impl ValidationRule {
    pub fn new(path: &'static str, rule_type: RuleType) -> Self {
        Self {
            path,
            required: false,
            rule_type,
            min: None,
            max: None,
            pattern: None,
            allowed: None,
            custom: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn range(self, min: f64, max: f64) -> Self {
        self.min(min).max(max)
    }

    pub fn pattern(mut self, pattern: &Regex) -> Self {
        self.pattern = Some(pattern.clone());
        self
    }

    pub fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = Some(allowed);
        self
    }

    pub fn custom(mut self, check: CustomCheck) -> Self {
        self.custom = Some(check);
        self
    }

    fn check(&self, root: &Value, report: &mut ValidationReport) {
        let value = match paths::get(root, self.path) {
            Some(Value::Null) | None => {
                if self.required {
                    report.add_error(self.path, ValidationKind::Required, "Field is required");
                }
                return;
            }
            Some(value) => value,
        };

        if !self.rule_type.matches(value) {
            report.add_error(
                self.path,
                ValidationKind::Type,
                &format!("Expected {}, found {}", self.rule_type.name(), json_type(value)),
            );
            return;
        }

        if let Some(measure) = measure(value) {
            if let Some(min) = self.min {
                if measure < min {
                    report.add_error(self.path, ValidationKind::Min, &bound_message(value, "at least", min));
                }
            }
            if let Some(max) = self.max {
                if measure > max {
                    report.add_error(self.path, ValidationKind::Max, &bound_message(value, "at most", max));
                }
            }
        }

        if let (Some(pattern), Some(text)) = (&self.pattern, value.as_str()) {
            if !pattern.is_match(text) {
                report.add_error(
                    self.path,
                    ValidationKind::Pattern,
                    &format!("Value does not match pattern {}", pattern.as_str()),
                );
            }
        }

        if let (Some(allowed), Some(text)) = (self.allowed, value.as_str()) {
            if !allowed.contains(&text) {
                report.add_error(
                    self.path,
                    ValidationKind::Enum,
                    &format!("Invalid value '{}'. Valid values: {:?}", text, allowed),
                );
            }
        }

        if let Some(check) = self.custom {
            if let Err(reason) = check(value) {
                report.add_error(self.path, ValidationKind::Custom, &reason);
            }
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn measure(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(items) => Some(items.len() as f64),
        _ => None,
    }
}

fn bound_message(value: &Value, relation: &str, bound: f64) -> String {
    match value {
        Value::Number(_) => format!("Value {} must be {} {}", value, relation, bound),
        _ => format!("Length must be {} {}", relation, bound),
    }
}

// Static patterns
static POSTGRES_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^postgres(ql)?://[^\s]+$").expect("valid postgres url pattern"));
static REDIS_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^rediss?://[^\s]+$").expect("valid redis url pattern"));
static QUEUE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9:_-]+$").expect("valid queue name pattern"));
static KEY_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9:_-]*$").expect("valid key prefix pattern"));
static HEX_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{32,}$").expect("valid hex key pattern"));
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+$").expect("valid email pattern"));

const ENVIRONMENTS: &[&str] = &["development", "staging", "test", "production"];
const LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error"];
const SIGNING_ALGORITHMS: &[&str] = &["hmac-sha256", "hmac-sha512", "ed25519"];
const HASH_ALGORITHMS: &[&str] = &["sha256", "sha512"];
const REPORT_FREQUENCIES: &[&str] = &["daily", "weekly", "monthly"];
const COMPRESSION_ALGORITHMS: &[&str] = &["none", "gzip", "brotli"];

fn check_timestamp(value: &Value) -> Result<(), String> {
    let text = value.as_str().unwrap_or_default();
    DateTime::parse_from_rfc3339(text)
        .map(|_| ())
        .map_err(|e| format!("Not an ISO-8601 timestamp: {}", e))
}

fn check_error_codes(value: &Value) -> Result<(), String> {
    let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
    for (index, item) in items.iter().enumerate() {
        match item.as_str() {
            Some(code) if !code.trim().is_empty() => {}
            _ => return Err(format!("Entry {} must be a non-empty string", index)),
        }
    }
    Ok(())
}

fn check_recipients(value: &Value) -> Result<(), String> {
    let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
    for item in items {
        match item.as_str() {
            Some(address) if EMAIL.is_match(address) => {}
            _ => return Err(format!("Invalid recipient address: {}", item)),
        }
    }
    Ok(())
}

fn audit_schema() -> Vec<ValidationRule> {
    use RuleType::*;
    type R = ValidationRule;

    vec![
        R::new("environment", String).required().one_of(ENVIRONMENTS),
        R::new("version", String).min(1.0),
        R::new("lastUpdated", String).custom(check_timestamp),
        // database
        R::new("database.url", String).required().pattern(&POSTGRES_URL),
        R::new("database.pool.min", Integer).required().range(0.0, 1_000.0),
        R::new("database.pool.max", Integer).required().range(1.0, 1_000.0),
        R::new("database.pool.idleTimeout", Integer).required().range(1_000.0, 3_600_000.0),
        R::new("database.pool.acquireTimeout", Integer).required().range(100.0, 300_000.0),
        R::new("database.ssl", Boolean).required(),
        R::new("database.statementTimeout", Integer).required().range(100.0, 3_600_000.0),
        // redis
        R::new("redis.url", String).required().pattern(&REDIS_URL),
        R::new("redis.keyPrefix", String).required().max(64.0).pattern(&KEY_PREFIX),
        R::new("redis.maxRetriesPerRequest", Integer).required().range(0.0, 20.0),
        R::new("redis.connectTimeout", Integer).required().range(100.0, 300_000.0),
        // worker
        R::new("worker.concurrency", Integer).required().range(1.0, 256.0),
        R::new("worker.batchSize", Integer).required().range(1.0, 10_000.0),
        R::new("worker.pollInterval", Integer).required().range(10.0, 60_000.0),
        R::new("worker.shutdownTimeout", Integer).required().range(1_000.0, 300_000.0),
        R::new("worker.queueName", String).required().min(1.0).pattern(&QUEUE_NAME),
        // retry
        R::new("retry.maxAttempts", Integer).required().range(0.0, 50.0),
        R::new("retry.baseDelay", Integer).required().range(1.0, 600_000.0),
        R::new("retry.maxDelay", Integer).required().range(1.0, 3_600_000.0),
        R::new("retry.backoffMultiplier", Number).required().range(1.0, 10.0),
        R::new("retry.jitter", Boolean).required(),
        R::new("retry.retryableErrors", Array).required().custom(check_error_codes),
        // circuit breaker
        R::new("circuitBreaker.failureThreshold", Integer).required().range(1.0, 1_000.0),
        R::new("circuitBreaker.successThreshold", Integer).required().range(1.0, 100.0),
        R::new("circuitBreaker.timeout", Integer).required().range(1_000.0, 600_000.0),
        R::new("circuitBreaker.monitoringPeriod", Integer).required().range(1_000.0, 3_600_000.0),
        R::new("circuitBreaker.halfOpenMaxCalls", Integer).required().range(1.0, 100.0),
        // dead letter
        R::new("deadLetter.enabled", Boolean).required(),
        R::new("deadLetter.maxRetries", Integer).required().range(0.0, 100.0),
        R::new("deadLetter.retentionDays", Integer).required().range(1.0, 3_650.0),
        R::new("deadLetter.alertThreshold", Integer).required().range(1.0, 1_000_000.0),
        R::new("deadLetter.queueName", String).required().min(1.0).pattern(&QUEUE_NAME),
        // monitoring
        R::new("monitoring.enabled", Boolean).required(),
        R::new("monitoring.metricsInterval", Integer).required().range(1_000.0, 3_600_000.0),
        R::new("monitoring.healthCheckInterval", Integer).required().range(1_000.0, 3_600_000.0),
        R::new("monitoring.alertThresholds.errorRate", Number).required(),
        R::new("monitoring.alertThresholds.queueDepth", Integer).required().min(1.0),
        R::new("monitoring.alertThresholds.processingLatency", Integer).required().min(1.0),
        R::new("monitoring.alertThresholds.memoryUsage", Number).required().range(0.0, 1.0),
        // security
        R::new("security.enableIntegrityVerification", Boolean).required(),
        R::new("security.enableEventSigning", Boolean).required(),
        R::new("security.enableLogEncryption", Boolean).required(),
        R::new("security.encryptionKey", String).pattern(&HEX_KEY),
        R::new("security.signingAlgorithm", String).required().one_of(SIGNING_ALGORITHMS),
        R::new("security.hashAlgorithm", String).required().one_of(HASH_ALGORITHMS),
        // compliance
        R::new("compliance.gdprEnabled", Boolean).required(),
        R::new("compliance.dataRetentionDays", Integer).required().range(1.0, 3_650.0),
        R::new("compliance.enablePseudonymization", Boolean).required(),
        R::new("compliance.autoArchival", Boolean).required(),
        R::new("compliance.reportingSchedule.enabled", Boolean).required(),
        R::new("compliance.reportingSchedule.frequency", String).required().one_of(REPORT_FREQUENCIES),
        R::new("compliance.reportingSchedule.recipients", Array).required().custom(check_recipients),
        // validation limits
        R::new("validation.maxEventSize", Integer).required().range(1.0, 10_485_760.0),
        R::new("validation.maxBatchSize", Integer).required().range(1.0, 10_000.0),
        R::new("validation.maxFieldLength", Integer).required().range(1.0, 65_536.0),
        R::new("validation.maxMetadataDepth", Integer).required().range(1.0, 32.0),
        R::new("validation.strictMode", Boolean).required(),
        // archive
        R::new("archive.enabled", Boolean).required(),
        R::new("archive.compressionAlgorithm", String).required().one_of(COMPRESSION_ALGORITHMS),
        R::new("archive.archiveAfterDays", Integer).required().range(1.0, 3_650.0),
        R::new("archive.deleteAfterDays", Integer).required().range(1.0, 36_500.0),
        R::new("archive.storagePath", String).required().min(1.0),
        // logging
        R::new("logging.level", String).required().one_of(LOG_LEVELS),
        R::new("logging.structured", Boolean).required(),
        R::new("logging.includeStackTrace", Boolean).required(),
        R::new("logging.maxFileSize", Integer).required().min(1_024.0),
    ]
}

static AUDIT_SCHEMA: Lazy<Arc<[ValidationRule]>> = Lazy::new(|| audit_schema().into());

/// Validation engine: per-field schema rules followed by cross-field invariants
#[derive(Debug, Clone)]
pub struct ValidationEngine {
    rules: Arc<[ValidationRule]>,
}

impl ValidationEngine {
    /// Engine over the audit configuration schema
    pub fn new() -> Self {
        Self {
            rules: AUDIT_SCHEMA.clone(),
        }
    }

    /// Engine with additional rules appended to the audit schema
    pub fn with_extra_rules(extra: Vec<ValidationRule>) -> Self {
        let rules: Vec<ValidationRule> = AUDIT_SCHEMA.iter().cloned().chain(extra).collect();
        Self {
            rules: rules.into(),
        }
    }

    pub fn rules(&self) -> &[ValidationRule] {
        &self.rules
    }

    /// Validate a typed tree
    pub fn validate(&self, config: &AuditConfig) -> Result<ValidationReport, ConfigValidationError> {
        let value = serde_json::to_value(config).map_err(|e| {
            ConfigValidationError::new(vec![ValidationIssue::new(
                "",
                ValidationKind::Type,
                format!("Configuration is not serializable: {}", e),
            )])
        })?;
        self.validate_value(&value)
    }

    /// Validate the JSON form of a tree
    pub fn validate_value(&self, value: &Value) -> Result<ValidationReport, ConfigValidationError> {
        self.check(value).into_result()
    }

    /// Run every rule and collect all errors and warnings
    pub fn check(&self, value: &Value) -> ValidationReport {
        let mut report = ValidationReport::new();

        if !value.is_object() {
            report.add_error("", ValidationKind::Type, "Configuration root must be an object");
            return report;
        }

        for rule in self.rules.iter() {
            rule.check(value, &mut report);
        }

        Self::validate_cross_fields(value, &mut report);
        Self::validate_environment(value, &mut report);
        Self::collect_warnings(value, &mut report);

        report
    }

    fn validate_cross_fields(value: &Value, report: &mut ValidationReport) {
        if let (Some(base), Some(max)) = (number(value, "retry.baseDelay"), number(value, "retry.maxDelay")) {
            if max < base {
                report.add_error(
                    "retry.maxDelay",
                    ValidationKind::CrossField,
                    &format!("retry.maxDelay ({}) must be >= retry.baseDelay ({})", max, base),
                );
            }
        }

        if let Some(rate) = number(value, "monitoring.alertThresholds.errorRate") {
            if !(0.0..=1.0).contains(&rate) {
                report.add_error(
                    "monitoring.alertThresholds.errorRate",
                    ValidationKind::CrossField,
                    &format!("Error rate threshold {} must be between 0 and 1", rate),
                );
            }
        }

        if boolean(value, "security.enableLogEncryption") == Some(true) {
            let has_key = paths::get(value, "security.encryptionKey")
                .and_then(Value::as_str)
                .map(|key| !key.is_empty())
                .unwrap_or(false);
            if !has_key {
                report.add_error(
                    "security.encryptionKey",
                    ValidationKind::CrossField,
                    "Encryption key is required when log encryption is enabled",
                );
            }
        }

        if boolean(value, "compliance.reportingSchedule.enabled") == Some(true) {
            let has_recipients = paths::get(value, "compliance.reportingSchedule.recipients")
                .and_then(Value::as_array)
                .map(|items| !items.is_empty())
                .unwrap_or(false);
            if !has_recipients {
                report.add_error(
                    "compliance.reportingSchedule.recipients",
                    ValidationKind::CrossField,
                    "At least one recipient is required when reporting is enabled",
                );
            }
        }

        if let (Some(min), Some(max)) = (number(value, "database.pool.min"), number(value, "database.pool.max")) {
            if max < min {
                report.add_error(
                    "database.pool.max",
                    ValidationKind::CrossField,
                    &format!("Pool max ({}) must be >= pool min ({})", max, min),
                );
            }
        }

        if boolean(value, "archive.enabled") == Some(true) {
            if let (Some(archive), Some(delete)) = (
                number(value, "archive.archiveAfterDays"),
                number(value, "archive.deleteAfterDays"),
            ) {
                if delete < archive {
                    report.add_error(
                        "archive.deleteAfterDays",
                        ValidationKind::CrossField,
                        "Archived events cannot be deleted before they are archived",
                    );
                }
            }
        }
    }

    fn validate_environment(value: &Value, report: &mut ValidationReport) {
        if environment(value) != Some(Environment::Production) {
            return;
        }

        if boolean(value, "security.enableIntegrityVerification") != Some(true) {
            report.add_error(
                "security.enableIntegrityVerification",
                ValidationKind::ProductionRequired,
                "Integrity verification must be enabled in production",
            );
        }

        if boolean(value, "database.ssl") != Some(true) {
            report.add_error(
                "database.ssl",
                ValidationKind::ProductionRequired,
                "Database TLS must be enabled in production",
            );
        }

        if string(value, "logging.level") == Some("debug") {
            report.add_error(
                "logging.level",
                ValidationKind::ProductionConstraint,
                "Debug logging is not allowed in production",
            );
        }
    }

    fn collect_warnings(value: &Value, report: &mut ValidationReport) {
        let env = environment(value);

        if env == Some(Environment::Staging) && string(value, "logging.level") == Some("debug") {
            report.add_warning("logging.level", "Debug logging may impact performance outside development");
        }

        if matches!(env, Some(Environment::Staging) | Some(Environment::Production))
            && boolean(value, "security.enableEventSigning") == Some(false)
        {
            report.add_warning("security.enableEventSigning", "Audit events are not signed");
        }

        if let Some(attempts) = number(value, "retry.maxAttempts") {
            if attempts > 10.0 {
                report.add_warning("retry.maxAttempts", "Max attempts is very high, failing jobs will linger");
            }
        }

        if let (Some(concurrency), Some(pool)) = (number(value, "worker.concurrency"), number(value, "database.pool.max")) {
            if concurrency > pool {
                report.add_warning("worker.concurrency", "Worker concurrency exceeds the database pool size");
            }
        }
    }
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn number(value: &Value, path: &str) -> Option<f64> {
    paths::get(value, path).and_then(Value::as_f64)
}

fn boolean(value: &Value, path: &str) -> Option<bool> {
    paths::get(value, path).and_then(Value::as_bool)
}

fn string<'a>(value: &'a Value, path: &str) -> Option<&'a str> {
    paths::get(value, path).and_then(Value::as_str)
}

fn environment(value: &Value) -> Option<Environment> {
    string(value, "environment").and_then(|s| s.parse().ok())
}

/// Validation report containing errors and warnings
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationWarning>,
}

/// Non-fatal finding
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, path: &str, kind: ValidationKind, message: &str) {
        self.errors.push(ValidationIssue::new(path, kind, message));
    }

    pub fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            path: path.to_string(),
            message: message.to_string(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }

    pub fn summary(&self) -> String {
        format!("Validation: {} errors, {} warnings", self.errors.len(), self.warnings.len())
    }

    /// Ok with the warnings, or the aggregated error
    pub fn into_result(self) -> Result<ValidationReport, ConfigValidationError> {
        if self.has_errors() {
            Err(ConfigValidationError::new(self.errors))
        } else {
            Ok(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn baseline() -> Value {
        serde_json::to_value(AuditConfig::default()).unwrap()
    }

    fn errors(value: &Value) -> ConfigValidationError {
        ValidationEngine::new().validate_value(value).unwrap_err()
    }

    #[test]
    fn test_baseline_is_valid() {
        let report = ValidationEngine::new().validate(&AuditConfig::default()).unwrap();
        assert!(report.is_valid());
    }

    #[test]
    fn test_missing_required_field() {
        let mut value = baseline();
        value["worker"].as_object_mut().unwrap().remove("concurrency");
        let err = errors(&value);
        assert!(err.has("worker.concurrency", ValidationKind::Required));
    }

    #[test]
    fn test_type_mismatch_skips_remaining_checks() {
        let mut value = baseline();
        value["worker"]["concurrency"] = json!("lots");
        let err = errors(&value);
        assert!(err.has("worker.concurrency", ValidationKind::Type));
        assert_eq!(err.issues.iter().filter(|i| i.path == "worker.concurrency").count(), 1);
    }

    #[test]
    fn test_numeric_bounds() {
        let mut value = baseline();
        value["worker"]["concurrency"] = json!(0);
        value["circuitBreaker"]["halfOpenMaxCalls"] = json!(1_000);
        let err = errors(&value);
        assert!(err.has("worker.concurrency", ValidationKind::Min));
        assert!(err.has("circuitBreaker.halfOpenMaxCalls", ValidationKind::Max));
    }

    #[test]
    fn test_pattern_enum_and_custom_kinds() {
        let mut value = baseline();
        value["database"]["url"] = json!("mysql://localhost/audit");
        value["logging"]["level"] = json!("verbose");
        value["compliance"]["reportingSchedule"]["recipients"] = json!(["not-an-address"]);
        let err = errors(&value);
        assert!(err.has("database.url", ValidationKind::Pattern));
        assert!(err.has("logging.level", ValidationKind::Enum));
        assert!(err.has("compliance.reportingSchedule.recipients", ValidationKind::Custom));
    }

    #[test]
    fn test_all_failures_are_collected() {
        let mut value = baseline();
        value["worker"]["concurrency"] = json!(0);
        value["logging"]["level"] = json!("loud");
        value["retry"]["maxDelay"] = json!(10);
        let err = errors(&value);
        assert_eq!(err.paths().len(), 3);
    }

    #[test]
    fn test_max_delay_below_base_delay_is_cross_field() {
        let mut value = baseline();
        value["retry"]["baseDelay"] = json!(5_000);
        value["retry"]["maxDelay"] = json!(1_000);
        let err = errors(&value);
        assert!(err.has("retry.maxDelay", ValidationKind::CrossField));
    }

    #[test]
    fn test_error_rate_outside_unit_interval() {
        let mut value = baseline();
        value["monitoring"]["alertThresholds"]["errorRate"] = json!(1.5);
        let err = errors(&value);
        assert!(err.has("monitoring.alertThresholds.errorRate", ValidationKind::CrossField));

        value["monitoring"]["alertThresholds"]["errorRate"] = json!(-0.1);
        let err = errors(&value);
        assert!(err.has("monitoring.alertThresholds.errorRate", ValidationKind::CrossField));
    }

    #[test]
    fn test_log_encryption_requires_key() {
        let mut value = baseline();
        value["security"]["enableLogEncryption"] = json!(true);
        let err = errors(&value);
        assert!(err.has("security.encryptionKey", ValidationKind::CrossField));

        value["security"]["encryptionKey"] = json!("ab".repeat(32));
        assert!(ValidationEngine::new().validate_value(&value).is_ok());
    }

    #[test]
    fn test_reporting_requires_recipients() {
        let mut value = baseline();
        value["compliance"]["reportingSchedule"]["enabled"] = json!(true);
        let err = errors(&value);
        assert!(err.has("compliance.reportingSchedule.recipients", ValidationKind::CrossField));
    }

    #[test]
    fn test_production_requirements() {
        let mut value = baseline();
        value["environment"] = json!("production");
        value["database"]["ssl"] = json!(true);
        value["logging"]["level"] = json!("info");
        value["security"]["enableIntegrityVerification"] = json!(false);
        let err = errors(&value);
        assert!(err.has("security.enableIntegrityVerification", ValidationKind::ProductionRequired));

        value["security"]["enableIntegrityVerification"] = json!(true);
        value["database"]["ssl"] = json!(false);
        value["logging"]["level"] = json!("debug");
        let err = errors(&value);
        assert!(err.has("database.ssl", ValidationKind::ProductionRequired));
        assert!(err.has("logging.level", ValidationKind::ProductionConstraint));
    }

    #[test]
    fn test_debug_logging_allowed_outside_production() {
        let value = baseline();
        assert_eq!(value["logging"]["level"], json!("debug"));
        assert!(ValidationEngine::new().validate_value(&value).is_ok());
    }

    #[test]
    fn test_warnings_do_not_fail_validation() {
        let mut value = baseline();
        value["retry"]["maxAttempts"] = json!(20);
        let report = ValidationEngine::new().validate_value(&value).unwrap();
        assert!(report.has_warnings());
        assert!(report.warnings.iter().any(|w| w.path == "retry.maxAttempts"));
    }

    #[test]
    fn test_extra_rules_are_applied() {
        let engine = ValidationEngine::with_extra_rules(vec![ValidationRule::new(
            "worker.concurrency",
            RuleType::Integer,
        )
        .custom(|v| {
            if v.as_u64().unwrap_or(0) % 2 == 0 {
                Ok(())
            } else {
                Err("Concurrency must be even".to_string())
            }
        })]);

        let mut value = baseline();
        value["worker"]["concurrency"] = json!(3);
        let err = engine.validate_value(&value).unwrap_err();
        assert!(err.has("worker.concurrency", ValidationKind::Custom));
    }

    #[test]
    fn test_non_object_root() {
        let err = errors(&json!([1, 2, 3]));
        assert!(err.has("", ValidationKind::Type));
    }
}
