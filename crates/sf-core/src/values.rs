//! Control values: labelled temperatures and duty percentages.
//!
//! A [`Temperature`] is either a single reading or a value derived from
//! several readings. Derived values keep their contributors so status output
//! can show every underlying reading:
//! - **Aggregated** (e.g. a mean) yields itself followed by its contributors
//! - **Selected** (e.g. a maximum) yields only its contributors, since the
//!   selected value is one of them

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Real, SfError, SfResult};

/// A temperature measurement in degrees Celsius together with its label.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum Temperature {
    Single {
        value: Real,
        label: String,
    },
    Aggregated {
        value: Real,
        label: String,
        contributors: Vec<Temperature>,
    },
    Selected {
        value: Real,
        label: String,
        contributors: Vec<Temperature>,
    },
}

impl Temperature {
    /// Create a single reading.
    pub fn new(value: Real, label: impl Into<String>) -> Self {
        Self::Single {
            value,
            label: label.into(),
        }
    }

    /// Select the hottest of `readings`.
    pub fn max_of(label: impl Into<String>, readings: Vec<Temperature>) -> SfResult<Self> {
        let label = label.into();
        let value = readings
            .iter()
            .map(Temperature::value)
            .fold(None, |acc: Option<Real>, v| Some(acc.map_or(v, |a| a.max(v))))
            .ok_or_else(|| SfError::EmptyAggregate {
                label: label.clone(),
            })?;
        Ok(Self::Selected {
            value,
            label,
            contributors: readings,
        })
    }

    /// Average `readings`. A single reading is returned unchanged.
    pub fn mean_of(label: impl Into<String>, mut readings: Vec<Temperature>) -> SfResult<Self> {
        let label = label.into();
        match readings.len() {
            0 => Err(SfError::EmptyAggregate { label }),
            1 => Ok(readings.remove(0)),
            n => {
                let value = readings.iter().map(Temperature::value).sum::<Real>() / n as Real;
                Ok(Self::Aggregated {
                    value,
                    label,
                    contributors: readings,
                })
            }
        }
    }

    pub fn value(&self) -> Real {
        match self {
            Self::Single { value, .. }
            | Self::Aggregated { value, .. }
            | Self::Selected { value, .. } => *value,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Single { label, .. }
            | Self::Aggregated { label, .. }
            | Self::Selected { label, .. } => label,
        }
    }

    /// Flattened `(label, value)` readings for display.
    pub fn readings(&self) -> Readings<'_> {
        Readings { stack: vec![self] }
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:.1}°C", self.label(), self.value())
    }
}

/// One labelled value yielded by [`Temperature::readings`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading<'a> {
    pub label: &'a str,
    pub value: Real,
}

/// Depth-first iterator over a temperature and its contributors.
pub struct Readings<'a> {
    stack: Vec<&'a Temperature>,
}

impl<'a> Iterator for Readings<'a> {
    type Item = Reading<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let temperature = self.stack.pop()?;
            match temperature {
                Temperature::Single { value, label } => {
                    return Some(Reading {
                        label,
                        value: *value,
                    });
                }
                Temperature::Aggregated {
                    value,
                    label,
                    contributors,
                } => {
                    self.stack.extend(contributors.iter().rev());
                    return Some(Reading {
                        label,
                        value: *value,
                    });
                }
                Temperature::Selected { contributors, .. } => {
                    self.stack.extend(contributors.iter().rev());
                }
            }
        }
    }
}

/// Fan duty in percent, always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Duty(u8);

impl Duty {
    pub const MIN: Duty = Duty(0);
    pub const MAX: Duty = Duty(100);

    pub fn new(percent: i64) -> SfResult<Self> {
        if (0..=100).contains(&percent) {
            Ok(Self(percent as u8))
        } else {
            Err(SfError::DutyOutOfRange { value: percent })
        }
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    pub fn as_real(self) -> Real {
        Real::from(self.0)
    }
}

impl fmt::Display for Duty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Inclusive `[min, max]` duty range of one fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DutyRange {
    min: Duty,
    max: Duty,
}

impl DutyRange {
    pub const FULL: DutyRange = DutyRange {
        min: Duty::MIN,
        max: Duty::MAX,
    };

    pub fn new(min: Duty, max: Duty) -> SfResult<Self> {
        if min > max {
            return Err(SfError::InvalidArg {
                what: "min_duty must not exceed max_duty",
            });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> Duty {
        self.min
    }

    pub fn max(&self) -> Duty {
        self.max
    }

    /// Round a raw algorithm output and clamp it into the range.
    ///
    /// NaN maps to `max` so an undefined result never slows a fan down.
    pub fn clamp_raw(&self, raw: Real) -> Duty {
        if raw.is_nan() {
            return self.max;
        }
        let clamped = raw.round().clamp(self.min.as_real(), self.max.as_real());
        Duty(clamped as u8)
    }
}

impl Default for DutyRange {
    fn default() -> Self {
        Self::FULL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(t: &Temperature) -> Vec<String> {
        t.readings().map(|r| r.label.to_string()).collect()
    }

    #[test]
    fn single_yields_itself() {
        let t = Temperature::new(42.0, "CPU");
        assert_eq!(labels(&t), vec!["CPU"]);
        assert_eq!(t.to_string(), "CPU: 42.0°C");
    }

    #[test]
    fn aggregated_yields_itself_then_contributors() {
        let mean = Temperature::mean_of(
            "⌀",
            vec![Temperature::new(30.0, "ada0"), Temperature::new(40.0, "ada1")],
        )
        .unwrap();
        assert_eq!(mean.value(), 35.0);
        assert_eq!(labels(&mean), vec!["⌀", "ada0", "ada1"]);
    }

    #[test]
    fn selected_yields_only_contributors() {
        let max = Temperature::max_of(
            "Max CPU",
            vec![Temperature::new(50.0, "core0"), Temperature::new(61.5, "core1")],
        )
        .unwrap();
        assert_eq!(max.value(), 61.5);
        assert_eq!(labels(&max), vec!["core0", "core1"]);
    }

    #[test]
    fn nested_composites_flatten_in_order() {
        let inner = Temperature::mean_of(
            "disks",
            vec![Temperature::new(30.0, "a"), Temperature::new(34.0, "b")],
        )
        .unwrap();
        let outer = Temperature::max_of("hottest", vec![inner, Temperature::new(20.0, "c")]).unwrap();
        assert_eq!(labels(&outer), vec!["disks", "a", "b", "c"]);
    }

    #[test]
    fn mean_of_single_reading_is_unchanged() {
        let t = Temperature::mean_of("⌀", vec![Temperature::new(33.0, "ada0")]).unwrap();
        assert_eq!(t, Temperature::new(33.0, "ada0"));
    }

    #[test]
    fn empty_aggregates_fail() {
        assert!(Temperature::max_of("x", vec![]).is_err());
        assert!(Temperature::mean_of("x", vec![]).is_err());
    }

    #[test]
    fn duty_bounds() {
        assert!(Duty::new(-1).is_err());
        assert!(Duty::new(101).is_err());
        assert_eq!(Duty::new(100).unwrap(), Duty::MAX);
        assert_eq!(Duty::new(15).unwrap().to_string(), "15%");
    }

    #[test]
    fn range_clamps_and_rounds() {
        let range = DutyRange::new(Duty::new(15).unwrap(), Duty::new(90).unwrap()).unwrap();
        assert_eq!(range.clamp_raw(-20.0).percent(), 15);
        assert_eq!(range.clamp_raw(250.0).percent(), 90);
        assert_eq!(range.clamp_raw(59.6).percent(), 60);
        assert_eq!(range.clamp_raw(Real::NAN).percent(), 90);
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(DutyRange::new(Duty::new(50).unwrap(), Duty::new(10).unwrap()).is_err());
    }
}
