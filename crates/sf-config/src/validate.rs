//! Configuration validation logic.
//!
//! Checks everything that can be decided from the file alone. Reference
//! cycles between fans and driver-specific options are checked when the
//! controller is built.

use std::time::Duration;

use sf_controls::{AlgorithmRegistry, Ast, ParseError, RefKind, parse_ast};

use crate::schema::{Config, FanDef, InterfaceRef, SensorDef};

/// Shortest accepted sensor polling interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("No {section} configured")]
    Empty { section: &'static str },

    #[error("Invalid ID: '{id}' in {context} (use letters, digits and '_', not starting with a digit)")]
    InvalidId { id: String, context: String },

    #[error("Missing reference: {id} in {context}")]
    MissingReference { id: String, context: String },

    #[error("Invalid value: {field} = {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unknown algorithm '{name}' in {context}")]
    UnknownAlgorithm { name: String, context: String },

    #[error("Invalid expression in {context}: {source}")]
    Expression { context: String, source: ParseError },
}

/// Whether `id` can be referenced as `sensors.<id>` / `fans.<id>`.
pub fn is_identifier(id: &str) -> bool {
    let mut chars = id.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn validate_config(config: &Config) -> Result<(), ValidationError> {
    validate_with_registry(config, &AlgorithmRegistry::with_defaults())
}

/// Validate against a custom set of algorithms.
pub fn validate_with_registry(
    config: &Config,
    registry: &AlgorithmRegistry,
) -> Result<(), ValidationError> {
    if config.sensors.is_empty() {
        return Err(ValidationError::Empty { section: "sensors" });
    }
    if config.fans.is_empty() {
        return Err(ValidationError::Empty { section: "fans" });
    }

    for (id, interface) in &config.interfaces {
        if id.trim().is_empty() {
            return Err(ValidationError::InvalidId {
                id: id.clone(),
                context: "interfaces".to_string(),
            });
        }
        if interface.driver.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: format!("interfaces.{id}.driver"),
                value: String::new(),
                reason: "driver must not be empty".to_string(),
            });
        }
    }

    for (id, sensor) in &config.sensors {
        if !is_identifier(id) {
            return Err(ValidationError::InvalidId {
                id: id.clone(),
                context: "sensors".to_string(),
            });
        }
        check_interface(config, &sensor.interface, &format!("sensor '{id}'"))?;
        sensor_interval(id, sensor)?;
    }

    for (id, fan) in &config.fans {
        if !is_identifier(id) {
            return Err(ValidationError::InvalidId {
                id: id.clone(),
                context: "fans".to_string(),
            });
        }
        check_interface(config, &fan.interface, &format!("fan '{id}'"))?;
        validate_fan(config, registry, id, fan)?;
    }

    Ok(())
}

/// Polling interval of sensor `id` as a [`Duration`].
///
/// Fails unless the interval is at least [`MIN_INTERVAL`] and representable.
pub fn sensor_interval(id: &str, sensor: &SensorDef) -> Result<Duration, ValidationError> {
    Duration::try_from_secs_f64(sensor.interval_s)
        .ok()
        .filter(|interval| *interval >= MIN_INTERVAL)
        .ok_or_else(|| ValidationError::InvalidValue {
            field: format!("sensors.{id}.interval_s"),
            value: sensor.interval_s.to_string(),
            reason: format!(
                "interval must be at least {} ms and fit a duration",
                MIN_INTERVAL.as_millis()
            ),
        })
}

fn check_interface(
    config: &Config,
    interface: &InterfaceRef,
    context: &str,
) -> Result<(), ValidationError> {
    if config.interfaces.contains_key(interface.id()) {
        Ok(())
    } else {
        Err(ValidationError::MissingReference {
            id: interface.id().to_string(),
            context: format!("{context} interface"),
        })
    }
}

fn validate_fan(
    config: &Config,
    registry: &AlgorithmRegistry,
    id: &str,
    fan: &FanDef,
) -> Result<(), ValidationError> {
    for (field, value) in [("min_duty", fan.min_duty), ("max_duty", fan.max_duty)] {
        if !(0..=100).contains(&value) {
            return Err(ValidationError::InvalidValue {
                field: format!("fans.{id}.{field}"),
                value: value.to_string(),
                reason: "duty must be within 0..=100".to_string(),
            });
        }
    }
    if fan.min_duty > fan.max_duty {
        return Err(ValidationError::InvalidValue {
            field: format!("fans.{id}.min_duty"),
            value: fan.min_duty.to_string(),
            reason: format!("min_duty must not exceed max_duty ({})", fan.max_duty),
        });
    }
    if fan.algorithms.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: format!("fans.{id}.algorithms"),
            value: "{}".to_string(),
            reason: "at least one algorithm is required".to_string(),
        });
    }

    for (name, text) in &fan.algorithms {
        let context = format!("fan '{id}' algorithm '{name}'");
        let ast = parse_ast(text).map_err(|source| ValidationError::Expression {
            context: context.clone(),
            source,
        })?;
        check_names(config, registry, &ast, &context)?;
    }
    Ok(())
}

fn check_names(
    config: &Config,
    registry: &AlgorithmRegistry,
    ast: &Ast,
    context: &str,
) -> Result<(), ValidationError> {
    match ast {
        Ast::Number(_) => Ok(()),
        Ast::Neg(inner) => check_names(config, registry, inner, context),
        Ast::Add(a, b) | Ast::Sub(a, b) | Ast::Mul(a, b) => {
            check_names(config, registry, a, context)?;
            check_names(config, registry, b, context)
        }
        Ast::Reference { kind, name, .. } => {
            let known = match kind {
                RefKind::Sensor => config.sensors.contains_key(name),
                RefKind::Fan => config.fans.contains_key(name),
            };
            if known {
                Ok(())
            } else {
                Err(ValidationError::MissingReference {
                    id: format!("{kind} '{name}'"),
                    context: context.to_string(),
                })
            }
        }
        Ast::Call {
            name,
            args,
            keywords,
            ..
        } => {
            if registry.get(name).is_none() {
                return Err(ValidationError::UnknownAlgorithm {
                    name: name.clone(),
                    context: context.to_string(),
                });
            }
            for arg in args.iter().chain(keywords.iter().map(|(_, a)| a)) {
                check_names(config, registry, arg, context)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers() {
        assert!(is_identifier("cpu"));
        assert!(is_identifier("_disk2"));
        assert!(!is_identifier("2disk"));
        assert!(!is_identifier("hdd-bay"));
        assert!(!is_identifier(""));
    }
}
