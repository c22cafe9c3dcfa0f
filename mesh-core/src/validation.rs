//! Shape checks for configuration and command payloads.
//!
//! Validation collects every offending field before failing so callers can
//! report them all at once. Nothing is sent unless the whole payload passes.

use mesh_types::{
    MeshConfig, NetworkConfig, RelayConfig, SecurityConfig, Sequence, SystemConfig,
};

use crate::{FieldError, ValidationError};

/// A payload that can be checked before it is sent.
pub trait Validate {
    /// Check every field, reporting all failures.
    fn validate(&self) -> Result<(), ValidationError>;
}

#[derive(Default)]
struct Checks {
    errors: Vec<FieldError>,
}

impl Checks {
    fn fail(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    fn length(&mut self, field: &'static str, value: &str, min: usize, max: usize) {
        let len = value.chars().count();
        if len < min || len > max {
            self.fail(field, format!("must be {}-{} characters", min, max));
        }
    }

    fn min_length(&mut self, field: &'static str, value: &str, min: usize) {
        if value.chars().count() < min {
            self.fail(field, format!("must be at least {} characters", min));
        }
    }

    fn range<T: PartialOrd + std::fmt::Display>(
        &mut self,
        field: &'static str,
        value: T,
        min: T,
        max: T,
    ) {
        if !(value >= min && value <= max) {
            self.fail(field, format!("must be between {} and {}", min, max));
        }
    }

    fn finish(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                errors: self.errors,
            })
        }
    }
}

impl Validate for RelayConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut c = Checks::default();
        c.length("name", &self.name, 1, 32);
        if !(self.safety_delay.is_finite() && self.safety_delay >= 0.0) {
            c.fail("safetyDelay", "must be zero or more");
        }
        c.range("maxTemperature", self.max_temperature, 50.0, 120.0);
        c.range("voltage", self.voltage, 5.0, 24.0);
        c.range("currentLimit", self.current_limit, 1.0, 20.0);
        c.finish()
    }
}

impl Validate for NetworkConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut c = Checks::default();
        c.length("ssid", &self.ssid, 1, 32);
        c.range("channel", self.channel, 1, 13);
        c.range("txPower", self.tx_power, 0, 20);
        c.range("meshChannel", self.mesh_channel, 1, 13);
        if let Some(password) = &self.mesh_password {
            c.min_length("meshPassword", password, 8);
        }
        c.finish()
    }
}

impl Validate for MeshConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut c = Checks::default();
        c.length("nodeName", &self.node_name, 1, 32);
        c.range("maxConnections", self.max_connections, 1, 32);
        c.range(
            "signalStrengthThreshold",
            self.signal_strength_threshold,
            -100,
            -30,
        );
        c.finish()
    }
}

impl Validate for SecurityConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut c = Checks::default();
        c.min_length("adminPassword", &self.admin_password, 8);
        c.min_length("encryptionKey", &self.encryption_key, 16);
        c.range("autoLockTimeout", self.auto_lock_timeout, 0, 60);
        if self.firing_pin.len() != 6 || !self.firing_pin.chars().all(|ch| ch.is_ascii_digit()) {
            c.fail("firingPin", "must be exactly 6 digits");
        }
        c.finish()
    }
}

impl Validate for SystemConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut c = Checks::default();
        if ![80, 160, 240].contains(&self.cpu_frequency) {
            c.fail("cpuFrequency", "must be 80, 160 or 240");
        }
        c.range("fanThreshold", self.fan_threshold, 20, 100);
        c.range("logRetentionDays", self.log_retention_days, 1, 30);
        c.finish()
    }
}

/// Check a fire delay against the configured maximum (s).
pub fn validate_fire_delay(delay: f64, max_delay: f64) -> Result<(), ValidationError> {
    let mut c = Checks::default();
    if !delay.is_finite() {
        c.fail("delay", "must be a number");
    } else {
        c.range("delay", delay, 0.0, max_delay);
    }
    c.finish()
}

/// Check a sequence before it is run or sent to the device.
pub fn validate_sequence(sequence: &Sequence, max_steps: usize) -> Result<(), ValidationError> {
    let mut c = Checks::default();
    if sequence.name.trim().is_empty() {
        c.fail("name", "must not be empty");
    }
    if sequence.steps.len() > max_steps {
        c.fail("steps", format!("must have at most {} steps", max_steps));
    }
    if sequence
        .steps
        .iter()
        .any(|s| !s.delay_seconds.is_finite() || s.delay_seconds < 0.0)
    {
        c.fail("steps", "every delay must be zero or more");
    }
    c.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_types::SequenceStep;

    fn security() -> SecurityConfig {
        SecurityConfig {
            admin_password: "correct-horse".into(),
            encryption_key: "0123456789abcdef".into(),
            two_factor_enabled: false,
            auto_lock_timeout: 10,
            require_pin_for_firing: true,
            firing_pin: "482913".into(),
        }
    }

    // ========================================================================
    // Settings payloads
    // ========================================================================

    #[test]
    fn defaults_are_valid() {
        assert!(RelayConfig::factory(1u32).validate().is_ok());
        assert!(NetworkConfig::default().validate().is_ok());
        assert!(MeshConfig::default().validate().is_ok());
        assert!(SystemConfig::default().validate().is_ok());
        assert!(security().validate().is_ok());
    }

    #[test]
    fn relay_limits() {
        let mut config = RelayConfig::factory(1u32);
        config.voltage = 30.0;
        config.current_limit = 0.5;
        config.max_temperature = 40.0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.errors.len(), 3);
        assert!(err.has_field("voltage"));
        assert!(err.has_field("currentLimit"));
        assert!(err.has_field("maxTemperature"));
    }

    #[test]
    fn network_reports_every_bad_field() {
        let config = NetworkConfig {
            ssid: String::new(),
            channel: 14,
            tx_power: 21,
            mesh_enabled: true,
            mesh_channel: 0,
            mesh_password: Some("short".into()),
        };
        let err = config.validate().unwrap_err();
        let fields: Vec<&str> = err.errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["ssid", "channel", "txPower", "meshChannel", "meshPassword"]
        );
    }

    #[test]
    fn firing_pin_must_be_six_digits() {
        for pin in ["12345", "1234567", "12a456", ""] {
            let mut config = security();
            config.firing_pin = pin.into();
            assert!(config.validate().unwrap_err().has_field("firingPin"), "{}", pin);
        }
    }

    #[test]
    fn short_secrets_rejected() {
        let mut config = security();
        config.admin_password = "short".into();
        config.encryption_key = "too-short".into();
        let err = config.validate().unwrap_err();
        assert!(err.has_field("adminPassword"));
        assert!(err.has_field("encryptionKey"));
    }

    #[test]
    fn system_frequency_and_ranges() {
        let mut config = SystemConfig::default();
        config.cpu_frequency = 200;
        config.log_retention_days = 0;
        let err = config.validate().unwrap_err();
        assert!(err.has_field("cpuFrequency"));
        assert!(err.has_field("logRetentionDays"));
    }

    #[test]
    fn mesh_threshold_range() {
        let mut config = MeshConfig::default();
        config.signal_strength_threshold = -20;
        assert!(config.validate().unwrap_err().has_field("signalStrengthThreshold"));
    }

    // ========================================================================
    // Command payloads
    // ========================================================================

    #[test]
    fn fire_delay_bounds() {
        assert!(validate_fire_delay(0.0, 10.0).is_ok());
        assert!(validate_fire_delay(10.0, 10.0).is_ok());
        assert!(validate_fire_delay(10.5, 10.0).is_err());
        assert!(validate_fire_delay(-1.0, 10.0).is_err());
        assert!(validate_fire_delay(f64::NAN, 10.0)
            .unwrap_err()
            .has_field("delay"));
    }

    #[test]
    fn sequence_limits() {
        let mut seq = Sequence::new("finale", 0);
        for i in 0..3u32 {
            seq.steps.push(SequenceStep::new("local", i + 1, 1.0));
        }
        assert!(validate_sequence(&seq, 3).is_ok());
        assert!(validate_sequence(&seq, 2).unwrap_err().has_field("steps"));

        seq.steps[1].delay_seconds = -0.5;
        assert!(validate_sequence(&seq, 3).unwrap_err().has_field("steps"));
    }
}
