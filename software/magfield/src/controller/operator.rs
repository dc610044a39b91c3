//! Raw text input from the operator's tuning controls

use crate::calc::{Gains, TuningHandle};
use crate::error::ConfigurationError;

/// Gains and setpoint as typed by the operator.
#[derive(Clone, Copy, Debug)]
pub struct OperatorInput<'a> {
    pub kp: &'a str,
    pub ki: &'a str,
    pub kd: &'a str,
    pub setpoint: &'a str,
}

fn parse_field(field: &'static str, text: &str) -> Result<f64, ConfigurationError> {
    let v: f64 = text
        .trim()
        .parse()
        .map_err(|_| ConfigurationError::NotANumber {
            field,
            text: text.to_owned(),
        })?;
    if !v.is_finite() {
        return Err(ConfigurationError::NonFinite { field });
    }
    Ok(v)
}

impl OperatorInput<'_> {
    /// Parse every field, stopping at the first one that is not a finite number.
    pub fn parse(&self) -> Result<(Gains, f64), ConfigurationError> {
        let gains = Gains::new(
            parse_field("kp", self.kp)?,
            parse_field("ki", self.ki)?,
            parse_field("kd", self.kd)?,
        );
        let setpoint = parse_field("setpoint", self.setpoint)?;
        Ok((gains, setpoint))
    }

    /// Apply all four values, or none of them.
    pub fn apply(&self, tuning: &TuningHandle) -> Result<(), ConfigurationError> {
        let (gains, setpoint) = self.parse()?;
        tuning.set_gains(gains)?;
        tuning.set_setpoint(setpoint)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn input<'a>(kp: &'a str, ki: &'a str, kd: &'a str, setpoint: &'a str) -> OperatorInput<'a> {
        OperatorInput {
            kp,
            ki,
            kd,
            setpoint,
        }
    }

    #[test]
    fn applies_all_fields() {
        let tuning = TuningHandle::default();
        input("2.5", " 0.1 ", "0", "0.8").apply(&tuning).unwrap();
        assert_eq!(tuning.gains(), Gains::new(2.5, 0.1, 0.0));
        assert_eq!(tuning.setpoint(), 0.8);
    }

    #[test]
    fn bad_field_keeps_prior_values() {
        let tuning = TuningHandle::new(Gains::new(1.0, 2.0, 3.0), 0.5);

        let err = input("4", "5", "6", "high").apply(&tuning).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::NotANumber {
                field: "setpoint",
                text: "high".into()
            }
        );
        assert_eq!(tuning.gains(), Gains::new(1.0, 2.0, 3.0));
        assert_eq!(tuning.setpoint(), 0.5);

        let err = input("4", "inf", "6", "1").apply(&tuning).unwrap_err();
        assert_eq!(err, ConfigurationError::NonFinite { field: "ki" });
        assert_eq!(tuning.gains(), Gains::new(1.0, 2.0, 3.0));

        assert!(input("", "0", "0", "1").apply(&tuning).is_err());
        assert_eq!(tuning.setpoint(), 0.5);
    }
}
