//! Duty algorithms.
//!
//! Each variant carries its own configuration and state:
//! - **Static**: a fixed duty
//! - **Polynomial**: linear or quadratic ramp from `start_temperature` to
//!   `full_duty_temperature`
//! - **LinearDecrease**: lets the wrapped duty rise at once but fall by at most
//!   `max_decrease` per evaluation
//! - **PID**: adjusts the fan's last duty towards a set point (see [`crate::pid`])

use core::fmt;
use std::collections::BTreeSet;

use sf_core::{Duty, DutyRange, FanId, Real, SensorId, Tolerances, ensure_finite, nearly_equal};

use crate::context::Evaluation;
use crate::error::{ControlError, ControlResult};
use crate::expression::Expression;
use crate::pid::Pid;

static NO_REFERENCES: BTreeSet<sf_core::Id> = BTreeSet::new();

/// A duty algorithm attached to a fan.
#[derive(Debug)]
pub enum Algorithm {
    Static(Static),
    Polynomial(Polynomial),
    LinearDecrease(LinearDecrease),
    Pid(Pid),
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Static(_) => "Static",
            Algorithm::Polynomial(p) => p.name(),
            Algorithm::LinearDecrease(_) => "LinearDecrease",
            Algorithm::Pid(_) => "PID",
        }
    }

    /// The wrapped input expression, if the algorithm has one.
    pub fn input(&self) -> Option<&Expression> {
        match self {
            Algorithm::Static(_) => None,
            Algorithm::Polynomial(p) => Some(&p.input),
            Algorithm::LinearDecrease(l) => Some(&l.inner),
            Algorithm::Pid(p) => Some(p.input()),
        }
    }

    pub fn referenced_sensors(&self) -> &BTreeSet<SensorId> {
        self.input()
            .map_or(&NO_REFERENCES, Expression::referenced_sensors)
    }

    pub fn referenced_fans(&self) -> &BTreeSet<FanId> {
        self.input().map_or(&NO_REFERENCES, Expression::referenced_fans)
    }

    /// Compute the raw (unclamped) duty.
    pub fn evaluate(&mut self, eval: &Evaluation<'_>) -> ControlResult<Real> {
        match self {
            Algorithm::Static(s) => Ok(s.duty.as_real()),
            Algorithm::Polynomial(p) => {
                let temperature = p.input.value(eval)?;
                Ok(p.duty_for(temperature))
            }
            Algorithm::LinearDecrease(l) => {
                let duty = l.inner.value(eval)?;
                Ok(l.step(duty))
            }
            Algorithm::Pid(p) => p.evaluate(eval),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Static(s) => write!(f, "Static({})", s.duty.percent()),
            Algorithm::Polynomial(p) => write!(
                f,
                "{}({}, start_temperature={}, full_duty_temperature={}, min_duty={}, max_duty={})",
                p.name(),
                p.input,
                p.start_temperature,
                p.full_duty_temperature,
                p.range.min().percent(),
                p.range.max().percent()
            ),
            Algorithm::LinearDecrease(l) => write!(
                f,
                "LinearDecrease({}, max_decrease={})",
                l.inner, l.max_decrease
            ),
            Algorithm::Pid(p) => write!(f, "{p}"),
        }
    }
}

/// Fixed duty, independent of any input.
#[derive(Debug, Clone, PartialEq)]
pub struct Static {
    duty: Duty,
}

impl Static {
    pub fn new(duty: Real) -> ControlResult<Self> {
        let duty = ensure_finite(duty, "static duty")?;
        if !(0.0..=100.0).contains(&duty) {
            return Err(ControlError::algorithm("Static", "duty must be within 0..=100"));
        }
        Ok(Self {
            duty: Duty::new(duty.round() as i64)?,
        })
    }

    pub fn duty(&self) -> Duty {
        self.duty
    }
}

/// Polynomial ramp between `min_duty` and `max_duty`.
#[derive(Debug)]
pub struct Polynomial {
    input: Expression,
    degree: u32,
    start_temperature: Real,
    full_duty_temperature: Real,
    /// `(full_duty_temperature - start_temperature) ^ degree`
    span_pow: Real,
    range: DutyRange,
}

impl Polynomial {
    pub fn new(
        degree: u32,
        input: Expression,
        start_temperature: Real,
        full_duty_temperature: Real,
        range: DutyRange,
    ) -> ControlResult<Self> {
        if degree == 0 {
            return Err(ControlError::InvalidArg {
                what: "polynomial degree must be at least 1",
            });
        }
        let start_temperature = ensure_finite(start_temperature, "start_temperature")?;
        let full_duty_temperature = ensure_finite(full_duty_temperature, "full_duty_temperature")?;
        if full_duty_temperature <= start_temperature {
            return Err(ControlError::algorithm(
                Self::name_for(degree),
                "full_duty_temperature must be greater than start_temperature",
            ));
        }
        Ok(Self {
            input,
            degree,
            start_temperature,
            full_duty_temperature,
            span_pow: (full_duty_temperature - start_temperature).powi(degree as i32),
            range,
        })
    }

    pub fn linear(
        input: Expression,
        start_temperature: Real,
        full_duty_temperature: Real,
        range: DutyRange,
    ) -> ControlResult<Self> {
        Self::new(1, input, start_temperature, full_duty_temperature, range)
    }

    pub fn quadratic(
        input: Expression,
        start_temperature: Real,
        full_duty_temperature: Real,
        range: DutyRange,
    ) -> ControlResult<Self> {
        Self::new(2, input, start_temperature, full_duty_temperature, range)
    }

    fn name_for(degree: u32) -> &'static str {
        match degree {
            1 => "Linear",
            2 => "Quadratic",
            _ => "Polynomial",
        }
    }

    pub fn name(&self) -> &'static str {
        Self::name_for(self.degree)
    }

    pub fn degree(&self) -> u32 {
        self.degree
    }

    /// Duty for a given input temperature.
    ///
    /// The ramp is floored to whole percent; results within float noise of a
    /// whole number snap to it, so `full_duty_temperature` yields `max_duty`.
    pub fn duty_for(&self, temperature: Real) -> Real {
        let min = self.range.min().as_real();
        let max = self.range.max().as_real();
        if temperature < self.start_temperature {
            return min;
        }
        let scaled =
            (temperature - self.start_temperature).powi(self.degree as i32) * (max - min) / self.span_pow;
        let steps = if nearly_equal(scaled, scaled.round(), Tolerances::default()) {
            scaled.round()
        } else {
            scaled.floor()
        };
        (min + steps).clamp(min, max)
    }
}

/// Rate limiter on falling duty.
#[derive(Debug)]
pub struct LinearDecrease {
    inner: Expression,
    max_decrease: Real,
    floor: Real,
}

impl LinearDecrease {
    pub fn new(inner: Expression, max_decrease: Real) -> ControlResult<Self> {
        let max_decrease = ensure_finite(max_decrease, "max_decrease")?;
        if max_decrease < 0.0 {
            return Err(ControlError::algorithm(
                "LinearDecrease",
                "max_decrease must not be negative",
            ));
        }
        Ok(Self {
            inner,
            max_decrease,
            floor: 0.0,
        })
    }

    /// Current floor, i.e. the last returned duty.
    pub fn floor(&self) -> Real {
        self.floor
    }

    /// Feed one inner duty and return the limited duty.
    pub fn step(&mut self, duty: Real) -> Real {
        if duty < self.floor {
            self.floor -= self.max_decrease;
        } else {
            self.floor = duty;
        }
        self.floor
    }
}
