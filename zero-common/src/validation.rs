//! Configuration validation for the scanner.
//!
//! Every section is checked and all problems are reported together, so a bad
//! config file fails start-up once with the complete list.

use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;

use crate::config::{
    CircuitBreakerSettings, Config, ObservabilityConfig, ScannerConfig, ScheduleConfig,
    StatusServerConfig, TaskConfig, UniverseConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

fn positive(value: u64, field: &str) -> ValidationResult<()> {
    if value == 0 {
        return Err(ValidationError::InvalidValue {
            field: field.into(),
            reason: "must be greater than 0".into(),
        });
    }
    Ok(())
}

/// Longest duration any interval, timeout or TTL may be configured to.
pub const MAX_DURATION_SECS: u64 = 86_400;

/// Positive and at most one day.
fn duration_secs(value: u64, field: &str) -> ValidationResult<()> {
    positive(value, field)?;
    at_most_a_day(value, field)
}

fn at_most_a_day(value: u64, field: &str) -> ValidationResult<()> {
    if value > MAX_DURATION_SECS {
        return Err(ValidationError::InvalidValue {
            field: field.into(),
            reason: format!("must be at most {MAX_DURATION_SECS} seconds"),
        });
    }
    Ok(())
}

fn collapse(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.scanner.validate() {
            errors.push(e);
        }
        if let Err(e) = self.status.validate() {
            errors.push(e);
        }
        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }
        if let Err(e) = duration_secs(
            self.provider.request_timeout_secs,
            "provider.request_timeout_secs",
        ) {
            errors.push(e);
        }
        if self.provider.requests_per_minute == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "provider.requests_per_minute".into(),
                reason: "must be greater than 0".into(),
            });
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.name.to_lowercase()) {
                errors.push(ValidationError::Conflict {
                    reason: format!("task name {} is registered twice", task.name),
                });
            }
            if let Err(e) = task.validate() {
                errors.push(e);
            }
        }

        collapse(errors)
    }
}

impl Validate for ScannerConfig {
    fn validate(&self) -> ValidationResult<()> {
        duration_secs(self.tick_interval_secs, "scanner.tick_interval_secs")?;
        duration_secs(self.task_timeout_secs, "scanner.task_timeout_secs")?;
        positive(self.max_concurrency as u64, "scanner.max_concurrency")?;
        positive(self.runtime_history_len as u64, "scanner.runtime_history_len")?;

        if chrono_tz::Tz::from_str(&self.timezone).is_err() {
            return Err(ValidationError::InvalidValue {
                field: "scanner.timezone".into(),
                reason: format!("unknown time zone: {}", self.timezone),
            });
        }

        self.universe.validate()?;
        self.circuit_breaker.validate()
    }
}

impl Validate for UniverseConfig {
    fn validate(&self) -> ValidationResult<()> {
        positive(self.hard_cap as u64, "scanner.universe.hard_cap")?;
        duration_secs(self.ttl_secs, "scanner.universe.ttl_secs")?;
        at_most_a_day(self.stale_ttl_secs, "scanner.universe.stale_ttl_secs")?;
        duration_secs(self.fetch_timeout_secs, "scanner.universe.fetch_timeout_secs")?;

        if self.emergency_symbols.is_empty() {
            return Err(ValidationError::MissingField {
                field: "scanner.universe.emergency_symbols".into(),
            });
        }
        if self.min_size > self.hard_cap {
            return Err(ValidationError::Conflict {
                reason: format!(
                    "scanner.universe.min_size ({}) exceeds hard_cap ({})",
                    self.min_size, self.hard_cap
                ),
            });
        }
        Ok(())
    }
}

impl Validate for CircuitBreakerSettings {
    fn validate(&self) -> ValidationResult<()> {
        positive(
            u64::from(self.failure_threshold),
            "scanner.circuit_breaker.failure_threshold",
        )?;
        duration_secs(self.cooldown_secs, "scanner.circuit_breaker.cooldown_secs")
    }
}

impl Validate for TaskConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "tasks[].name".into(),
            });
        }
        if self.entrypoint.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: format!("tasks[{}].entrypoint", self.name),
            });
        }
        if let Some(timeout) = self.timeout_secs {
            duration_secs(timeout, &format!("tasks[{}].timeout_secs", self.name))?;
        }
        at_most_a_day(self.interval_secs, &format!("tasks[{}].interval_secs", self.name))?;
        if let Some(cap) = self.universe_cap {
            positive(cap as u64, &format!("tasks[{}].universe_cap", self.name))?;
        }
        if let Some(coverage) = self.volume_coverage {
            if !(coverage > 0.0 && coverage <= 1.0) {
                return Err(ValidationError::InvalidValue {
                    field: format!("tasks[{}].volume_coverage", self.name),
                    reason: format!("must be in (0, 1], got {coverage}"),
                });
            }
        }

        match &self.schedule {
            ScheduleConfig::Continuous => {}
            ScheduleConfig::WindowGated { windows } => {
                if windows.is_empty() {
                    return Err(ValidationError::MissingField {
                        field: format!("tasks[{}].schedule.windows", self.name),
                    });
                }
                for window in windows {
                    match window.parse() {
                        Some((start, end)) if start < end => {}
                        _ => {
                            return Err(ValidationError::InvalidValue {
                                field: format!("tasks[{}].schedule.windows", self.name),
                                reason: format!(
                                    "invalid window {}-{} (expected HH:MM with start before end)",
                                    window.start, window.end
                                ),
                            })
                        }
                    }
                }
            }
            ScheduleConfig::Slotted { slots } => {
                if slots.is_empty() {
                    return Err(ValidationError::MissingField {
                        field: format!("tasks[{}].schedule.slots", self.name),
                    });
                }
                for slot in slots {
                    if cron::Schedule::from_str(slot).is_err() {
                        return Err(ValidationError::InvalidValue {
                            field: format!("tasks[{}].schedule.slots", self.name),
                            reason: format!("invalid cron expression: {slot}"),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

impl Validate for StatusServerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.enabled && self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "status.port".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

impl Config {
    /// Load, apply environment overrides, and validate configuration.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    fn task(name: &str, schedule: ScheduleConfig) -> TaskConfig {
        TaskConfig {
            name: name.into(),
            entrypoint: "heartbeat".into(),
            interval_secs: 60,
            schedule,
            enabled: true,
            test_mode: false,
            timeout_secs: None,
            universe_cap: None,
            volume_coverage: None,
        }
    }

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.observability.log_level = "invalid".into();
        let result = config.validate();
        if let Err(ValidationError::InvalidValue { field, .. }) = result {
            assert_eq!(field, "observability.log_level");
        } else {
            panic!("expected invalid value error");
        }
    }

    #[test]
    fn test_unknown_timezone() {
        let mut config = Config::default();
        config.scanner.timezone = "Mars/Olympus_Mons".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_task_names() {
        let mut config = Config::default();
        config.tasks = vec![
            task("rsi", ScheduleConfig::Continuous),
            task("RSI", ScheduleConfig::Continuous),
        ];
        let result = config.validate();
        assert!(matches!(result, Err(ValidationError::Conflict { .. })));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let mut config = Config::default();
        config.tasks = vec![task(
            "late",
            ScheduleConfig::WindowGated {
                windows: vec![WindowConfig {
                    start: "16:00".into(),
                    end: "09:30".into(),
                }],
            },
        )];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_cron_slot_rejected() {
        let mut config = Config::default();
        config.tasks = vec![task(
            "ideas",
            ScheduleConfig::Slotted {
                slots: vec!["every morning".into()],
            },
        )];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = Config::default();
        config.scanner.max_concurrency = 0;
        config.observability.log_format = "xml".into();
        let result = config.validate();
        assert!(matches!(result, Err(ValidationError::Multiple(ref v)) if v.len() == 2));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let mut config = Config::default();
        config.scanner.task_timeout_secs = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidValue { ref field, .. }) if field == "scanner.task_timeout_secs"
        ));

        let mut config = Config::default();
        config.scanner.universe.ttl_secs = MAX_DURATION_SECS + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        let mut slow = task("slow", ScheduleConfig::Continuous);
        slow.timeout_secs = Some(u64::MAX);
        config.tasks = vec![slow];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scanner.task_timeout_secs = MAX_DURATION_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_per_task_universe_bounds() {
        let mut config = Config::default();
        let mut gap = task("gap", ScheduleConfig::Continuous);
        gap.universe_cap = Some(150);
        gap.volume_coverage = Some(0.9);
        config.tasks = vec![gap.clone()];
        assert!(config.validate().is_ok());

        gap.universe_cap = Some(0);
        config.tasks = vec![gap.clone()];
        assert!(config.validate().is_err());

        gap.universe_cap = None;
        gap.volume_coverage = Some(1.5);
        config.tasks = vec![gap];
        assert!(config.validate().is_err());
    }
}
