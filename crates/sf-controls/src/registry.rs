//! Registry of algorithm signatures.
//!
//! The expression parser resolves every call against this registry. Each
//! [`AlgorithmSpec`] lists its parameters in positional order; arguments are
//! bound positionally first, then by keyword, then from defaults.

use core::fmt;

use sf_core::{Duty, DutyRange, Real};

use crate::algorithm::{Algorithm, LinearDecrease, Polynomial, Static};
use crate::context::AlgorithmContext;
use crate::error::{ControlError, ControlResult};
use crate::expression::Expression;
use crate::pid::{Pid, PidGains};

/// What a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Any expression, including references and nested algorithms.
    Expression,
    /// An expression that folds to a constant.
    Number,
}

/// Value of a parameter that was not given.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDefault {
    Required,
    Value(Real),
    /// The fan's `min_duty`.
    MinDuty,
    /// The fan's `max_duty`.
    MaxDuty,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: ParamDefault,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            default: ParamDefault::Required,
        }
    }

    pub const fn number(name: &'static str, default: ParamDefault) -> Self {
        Self {
            name,
            kind: ParamKind::Number,
            default,
        }
    }
}

impl fmt::Display for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.default {
            ParamDefault::Required => write!(f, "{}", self.name),
            ParamDefault::Value(v) => write!(f, "{}={v}", self.name),
            ParamDefault::MinDuty => write!(f, "{}=<fan min_duty>", self.name),
            ParamDefault::MaxDuty => write!(f, "{}=<fan max_duty>", self.name),
        }
    }
}

/// Constructor of an algorithm from bound arguments.
pub type BuildFn = fn(&mut BoundArgs<'_>) -> ControlResult<Algorithm>;

/// Signature and constructor of one algorithm.
#[derive(Clone, Copy)]
pub struct AlgorithmSpec {
    pub name: &'static str,
    pub params: &'static [ParamSpec],
    pub summary: &'static str,
    pub build: BuildFn,
}

impl fmt::Debug for AlgorithmSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgorithmSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for AlgorithmSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

impl AlgorithmSpec {
    fn error(&self, what: impl Into<String>) -> ControlError {
        ControlError::algorithm(self.name, what)
    }

    /// Bind call arguments and construct the algorithm.
    pub fn bind(
        &self,
        positional: Vec<Expression>,
        keywords: Vec<(String, Expression)>,
        context: &AlgorithmContext,
    ) -> ControlResult<Algorithm> {
        if positional.len() > self.params.len() {
            return Err(self.error(format!(
                "takes at most {} arguments but {} were given",
                self.params.len(),
                positional.len()
            )));
        }
        let mut values: Vec<Option<Expression>> = self.params.iter().map(|_| None).collect();
        for (slot, value) in values.iter_mut().zip(positional) {
            *slot = Some(value);
        }
        for (name, value) in keywords {
            let index = self
                .params
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| self.error(format!("unexpected keyword argument '{name}'")))?;
            if values[index].is_some() {
                return Err(self.error(format!("multiple values for argument '{name}'")));
            }
            values[index] = Some(value);
        }

        for (param, value) in self.params.iter().zip(&values) {
            match value {
                None if param.default == ParamDefault::Required => {
                    return Err(self.error(format!("missing required argument '{}'", param.name)));
                }
                Some(expr) if param.kind == ParamKind::Number && expr.constant_value().is_none() => {
                    return Err(self.error(format!(
                        "argument '{}' must be a constant number",
                        param.name
                    )));
                }
                _ => {}
            }
        }

        let mut args = BoundArgs {
            spec: self,
            values,
            context,
        };
        (self.build)(&mut args)
    }
}

/// Arguments bound to the parameters of one [`AlgorithmSpec`].
pub struct BoundArgs<'a> {
    spec: &'a AlgorithmSpec,
    values: Vec<Option<Expression>>,
    context: &'a AlgorithmContext,
}

impl BoundArgs<'_> {
    pub fn context(&self) -> &AlgorithmContext {
        self.context
    }

    /// Take the argument bound to `name`, or its default.
    pub fn expression(&mut self, name: &str) -> ControlResult<Expression> {
        let index = self
            .spec
            .params
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| self.spec.error(format!("no parameter named '{name}'")))?;
        if let Some(value) = self.values[index].take() {
            return Ok(value);
        }
        match self.spec.params[index].default {
            ParamDefault::Required => Err(self
                .spec
                .error(format!("missing required argument '{name}'"))),
            ParamDefault::Value(v) => Ok(Expression::constant(v)),
            ParamDefault::MinDuty => Ok(Expression::constant(self.context.min_duty().as_real())),
            ParamDefault::MaxDuty => Ok(Expression::constant(self.context.max_duty().as_real())),
        }
    }

    pub fn number(&mut self, name: &str) -> ControlResult<Real> {
        self.expression(name)?
            .constant_value()
            .ok_or_else(|| self.spec.error(format!("argument '{name}' must be a constant number")))
    }

    /// A whole percentage in `0..=100`.
    pub fn duty(&mut self, name: &str) -> ControlResult<Duty> {
        let value = self.number(name)?;
        if value.fract() != 0.0 || !(0.0..=100.0).contains(&value) {
            return Err(self
                .spec
                .error(format!("argument '{name}' must be a whole percentage, got {value}")));
        }
        Ok(Duty::new(value as i64)?)
    }

    fn range(&mut self) -> ControlResult<DutyRange> {
        let min = self.duty("min_duty")?;
        let max = self.duty("max_duty")?;
        DutyRange::new(min, max).map_err(|_| {
            self.spec
                .error(format!("min_duty {min} must not exceed max_duty {max}"))
        })
    }
}

const CURVE_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("input", ParamKind::Expression),
    ParamSpec::required("start_temperature", ParamKind::Number),
    ParamSpec::required("full_duty_temperature", ParamKind::Number),
    ParamSpec::number("min_duty", ParamDefault::MinDuty),
    ParamSpec::number("max_duty", ParamDefault::MaxDuty),
];

fn build_static(args: &mut BoundArgs<'_>) -> ControlResult<Algorithm> {
    Ok(Algorithm::Static(Static::new(args.number("duty")?)?))
}

fn build_polynomial(degree: u32, args: &mut BoundArgs<'_>) -> ControlResult<Algorithm> {
    let input = args.expression("input")?;
    let start = args.number("start_temperature")?;
    let full = args.number("full_duty_temperature")?;
    let range = args.range()?;
    Ok(Algorithm::Polynomial(Polynomial::new(
        degree, input, start, full, range,
    )?))
}

fn build_linear(args: &mut BoundArgs<'_>) -> ControlResult<Algorithm> {
    build_polynomial(1, args)
}

fn build_quadratic(args: &mut BoundArgs<'_>) -> ControlResult<Algorithm> {
    build_polynomial(2, args)
}

fn build_linear_decrease(args: &mut BoundArgs<'_>) -> ControlResult<Algorithm> {
    let inner = args.expression("algorithm")?;
    let max_decrease = args.number("max_decrease")?;
    Ok(Algorithm::LinearDecrease(LinearDecrease::new(
        inner,
        max_decrease,
    )?))
}

fn build_pid(args: &mut BoundArgs<'_>) -> ControlResult<Algorithm> {
    let input = args.expression("input")?;
    let set_point = args.number("set_point")?;
    let gains = PidGains::new(
        args.number("p")?,
        args.number("i")?,
        args.number("d")?,
        args.number("windup_guard")?,
    )?;
    Ok(Algorithm::Pid(Pid::new(input, set_point, gains)?))
}

/// Built-in algorithms.
pub const STATIC: AlgorithmSpec = AlgorithmSpec {
    name: "Static",
    params: &[ParamSpec::required("duty", ParamKind::Number)],
    summary: "fixed duty",
    build: build_static,
};

pub const LINEAR: AlgorithmSpec = AlgorithmSpec {
    name: "Linear",
    params: CURVE_PARAMS,
    summary: "linear ramp from start_temperature to full_duty_temperature",
    build: build_linear,
};

pub const QUADRATIC: AlgorithmSpec = AlgorithmSpec {
    name: "Quadratic",
    params: CURVE_PARAMS,
    summary: "quadratic ramp from start_temperature to full_duty_temperature",
    build: build_quadratic,
};

pub const LINEAR_DECREASE: AlgorithmSpec = AlgorithmSpec {
    name: "LinearDecrease",
    params: &[
        ParamSpec::required("algorithm", ParamKind::Expression),
        ParamSpec::number("max_decrease", ParamDefault::Value(1.0)),
    ],
    summary: "follow the wrapped duty upwards, fall by at most max_decrease per update",
    build: build_linear_decrease,
};

pub const PID: AlgorithmSpec = AlgorithmSpec {
    name: "PID",
    params: &[
        ParamSpec::required("input", ParamKind::Expression),
        ParamSpec::required("set_point", ParamKind::Number),
        ParamSpec::number("p", ParamDefault::Value(4.0)),
        ParamSpec::number("i", ParamDefault::Value(0.0)),
        ParamSpec::number("d", ParamDefault::Value(40.0)),
        ParamSpec::number("windup_guard", ParamDefault::Value(20.0)),
    ],
    summary: "adjust the current duty towards set_point",
    build: build_pid,
};

/// Algorithms available to the expression parser, in registration order.
#[derive(Debug, Clone, Default)]
pub struct AlgorithmRegistry {
    specs: Vec<AlgorithmSpec>,
}

impl AlgorithmRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for spec in [STATIC, LINEAR, QUADRATIC, LINEAR_DECREASE, PID] {
            registry.register(spec);
        }
        registry
    }

    /// Add `spec`, replacing any algorithm of the same name.
    pub fn register(&mut self, spec: AlgorithmSpec) {
        match self.specs.iter_mut().find(|s| s.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.specs.push(spec),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AlgorithmSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlgorithmSpec> {
        self.specs.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.specs.iter().map(|s| s.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AlgorithmContext {
        AlgorithmContext::new(DutyRange::new(Duty::new(15).unwrap(), Duty::new(90).unwrap()).unwrap())
    }

    fn c(v: Real) -> Expression {
        Expression::constant(v)
    }

    #[test]
    fn signatures_render_defaults() {
        assert_eq!(
            QUADRATIC.to_string(),
            "Quadratic(input, start_temperature, full_duty_temperature, min_duty=<fan min_duty>, max_duty=<fan max_duty>)"
        );
        assert_eq!(
            PID.to_string(),
            "PID(input, set_point, p=4, i=0, d=40, windup_guard=20)"
        );
    }

    #[test]
    fn defaults_come_from_context() {
        let algo = LINEAR
            .bind(vec![c(40.0), c(50.0), c(80.0)], vec![], &ctx())
            .unwrap();
        match algo {
            Algorithm::Polynomial(p) => {
                assert_eq!(p.duty_for(0.0), 15.0);
                assert_eq!(p.duty_for(100.0), 90.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn keywords_override_defaults() {
        let algo = LINEAR
            .bind(
                vec![c(40.0), c(50.0), c(80.0)],
                vec![("min_duty".to_string(), c(30.0))],
                &ctx(),
            )
            .unwrap();
        match algo {
            Algorithm::Polynomial(p) => assert_eq!(p.duty_for(0.0), 30.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn binding_errors_are_descriptive() {
        let err = STATIC.bind(vec![], vec![], &ctx()).unwrap_err();
        assert_eq!(err.to_string(), "Static: missing required argument 'duty'");

        let err = STATIC
            .bind(vec![c(10.0), c(20.0)], vec![], &ctx())
            .unwrap_err();
        assert!(err.to_string().contains("at most 1 arguments"));

        let err = STATIC
            .bind(vec![c(10.0)], vec![("duty".to_string(), c(20.0))], &ctx())
            .unwrap_err();
        assert!(err.to_string().contains("multiple values"));

        let err = PID
            .bind(vec![c(40.0)], vec![("q".to_string(), c(1.0))], &ctx())
            .unwrap_err();
        assert!(err.to_string().contains("unexpected keyword argument 'q'"));

        let err = LINEAR
            .bind(
                vec![c(40.0), c(50.0), c(80.0)],
                vec![("min_duty".to_string(), c(12.5))],
                &ctx(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("whole percentage"));
    }

    #[test]
    fn registry_lookup() {
        let registry = AlgorithmRegistry::with_defaults();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["Static", "Linear", "Quadratic", "LinearDecrease", "PID"]
        );
        assert!(registry.get("Cubic").is_none());
        assert_eq!(registry.get("PID").map(|s| s.name), Some("PID"));
    }
}
