//! PID duty adjustment.
//!
//! The PID output is a *delta* applied to the fan's last duty, not an
//! absolute curve: `last_duty - round(kp*e + ki*I + kd*D)`. It therefore
//! reads `last_duty` from the [`AlgorithmContext`](crate::context::AlgorithmContext)
//! before the fan overwrites it for the cycle.

use core::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sf_core::{Duty, Real, ensure_finite};

use crate::context::Evaluation;
use crate::error::{ControlError, ControlResult};
use crate::expression::Expression;

/// PID gains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    /// Proportional gain.
    pub kp: Real,
    /// Integral gain.
    pub ki: Real,
    /// Derivative gain.
    pub kd: Real,
    /// Bound on the integrator contribution of a single step.
    pub windup_guard: Real,
}

impl PidGains {
    pub fn new(kp: Real, ki: Real, kd: Real, windup_guard: Real) -> ControlResult<Self> {
        let gains = Self {
            kp: ensure_finite(kp, "p")?,
            ki: ensure_finite(ki, "i")?,
            kd: ensure_finite(kd, "d")?,
            windup_guard: ensure_finite(windup_guard, "windup_guard")?,
        };
        if gains.windup_guard < 0.0 {
            return Err(ControlError::InvalidArg {
                what: "windup_guard must be non-negative",
            });
        }
        Ok(gains)
    }

    /// Advance `state` by one step and return the correction to subtract
    /// from the current duty.
    pub fn update(&self, state: &PidState, error: Real, dt: Real) -> (PidState, Real) {
        let integral = state.integral
            + (error * dt).clamp(-self.windup_guard, self.windup_guard);
        let derivative = if dt > 0.0 {
            (error - state.last_error) / dt
        } else {
            0.0
        };
        let correction = self.kp * error + self.ki * integral + self.kd * derivative;
        (
            PidState {
                integral,
                last_error: error,
            },
            correction,
        )
    }
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 4.0,
            ki: 0.0,
            kd: 40.0,
            windup_guard: 20.0,
        }
    }
}

/// PID state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PidState {
    /// Integral accumulator.
    pub integral: Real,
    /// Error of the previous evaluation.
    pub last_error: Real,
}

/// PID algorithm node.
#[derive(Debug)]
pub struct Pid {
    input: Expression,
    set_point: Real,
    gains: PidGains,
    state: PidState,
    last_time: Option<Instant>,
}

impl Pid {
    pub fn new(input: Expression, set_point: Real, gains: PidGains) -> ControlResult<Self> {
        Ok(Self {
            input,
            set_point: ensure_finite(set_point, "set_point")?,
            gains,
            state: PidState::default(),
            last_time: None,
        })
    }

    pub fn input(&self) -> &Expression {
        &self.input
    }

    pub fn set_point(&self) -> Real {
        self.set_point
    }

    pub fn gains(&self) -> &PidGains {
        &self.gains
    }

    pub fn state(&self) -> &PidState {
        &self.state
    }

    pub fn evaluate(&mut self, eval: &Evaluation<'_>) -> ControlResult<Real> {
        let temperature = self.input.value(eval)?;
        // First evaluation has no elapsed time.
        let dt = self
            .last_time
            .map_or(0.0, |t| eval.now.saturating_duration_since(t).as_secs_f64());
        let error = self.set_point - temperature;

        let (state, correction) = self.gains.update(&self.state, error, dt);
        self.state = state;
        self.last_time = Some(eval.now);

        let baseline = eval.context.last_duty.unwrap_or(Duty::MAX).as_real();
        Ok(baseline - correction.round())
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PID({}, set_point={}, p={}, i={}, d={}, windup_guard={})",
            self.input,
            self.set_point,
            self.gains.kp,
            self.gains.ki,
            self.gains.kd,
            self.gains.windup_guard
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sf_core::{DutyRange, Temperature};

    use super::*;
    use crate::context::AlgorithmContext;
    use crate::store::ValueStore;

    fn setup(temp: Real) -> ValueStore {
        let store = ValueStore::new(["disk"], ["case"]).unwrap();
        store
            .set_sensor_temperature("disk", Temperature::new(temp, "disk"))
            .unwrap();
        store
    }

    #[test]
    fn gains_validation() {
        assert!(PidGains::new(1.0, 0.0, 0.0, -1.0).is_err());
        assert!(PidGains::new(Real::NAN, 0.0, 0.0, 1.0).is_err());
        assert_eq!(PidGains::default().kp, 4.0);
    }

    #[test]
    fn integrator_step_is_clamped_by_windup_guard() {
        let gains = PidGains::new(0.0, 1.0, 0.0, 5.0).unwrap();
        let (state, correction) = gains.update(&PidState::default(), 10.0, 2.0);
        assert_eq!(state.integral, 5.0);
        assert_eq!(correction, 5.0);
        let (state, _) = gains.update(&state, -1.0, 2.0);
        assert_eq!(state.integral, 3.0);
    }

    #[test]
    fn derivative_is_zero_without_elapsed_time() {
        let gains = PidGains::new(0.0, 0.0, 10.0, 20.0).unwrap();
        let (_, correction) = gains.update(&PidState::default(), 3.0, 0.0);
        assert_eq!(correction, 0.0);
        let (_, correction) = gains.update(&PidState::default(), 3.0, 1.5);
        assert_eq!(correction, 20.0);
    }

    #[test]
    fn first_evaluation_adjusts_from_full_duty() {
        let store = setup(42.0);
        let ctx = AlgorithmContext::new(DutyRange::FULL);
        let input = Expression::sensor(&store, "disk").unwrap();
        let mut pid = Pid::new(input, 40.0, PidGains::default()).unwrap();

        // error = -2, P only on the first step: 100 - round(4 * -2) = 108
        let eval = Evaluation::new(&store, &ctx, Instant::now());
        assert_eq!(pid.evaluate(&eval).unwrap(), 108.0);
        assert_eq!(pid.state().last_error, -2.0);
    }

    #[test]
    fn later_evaluations_use_last_duty_and_elapsed_time() {
        let store = setup(42.0);
        let mut ctx = AlgorithmContext::new(DutyRange::FULL);
        let input = Expression::sensor(&store, "disk").unwrap();
        let gains = PidGains::new(1.0, 0.0, 2.0, 20.0).unwrap();
        let mut pid = Pid::new(input, 40.0, gains).unwrap();

        let t0 = Instant::now();
        pid.evaluate(&Evaluation::new(&store, &ctx, t0)).unwrap();

        ctx.last_duty = Some(Duty::new(50).unwrap());
        store
            .set_sensor_temperature("disk", Temperature::new(44.0, "disk"))
            .unwrap();
        let t1 = t0 + Duration::from_secs(2);
        // error = -4, derivative = (-4 - -2) / 2 = -1
        // 50 - round(1 * -4 + 2 * -1) = 56
        let out = pid.evaluate(&Evaluation::new(&store, &ctx, t1)).unwrap();
        assert_eq!(out, 56.0);
    }
}
