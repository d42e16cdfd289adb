//! Expression trees producing a requested duty.
//!
//! An [`Expression`] is an immutable tree of value producers:
//! - **Constants** and arithmetic **sums** / **products**
//! - **References** to a sensor temperature or another fan's duty
//! - **Algorithms** (see [`crate::algorithm`]), the only nodes with state
//!
//! The sets of sensors and fans an expression reads are computed once when
//! the node is built, by unioning the sets of its children.

use core::fmt;
use std::collections::BTreeSet;
use std::ops;

use sf_core::{FanId, Real, SensorId};

use crate::algorithm::Algorithm;
use crate::context::Evaluation;
use crate::error::{ControlError, ControlResult, RefKind};
use crate::store::ValueStore;

/// Node variants of an expression tree.
#[derive(Debug)]
pub enum Node {
    Constant(Real),
    Sum(Vec<Expression>),
    Product(Vec<Expression>),
    Sensor { id: SensorId, name: String },
    FanDuty { id: FanId, name: String },
    Algorithm(Box<Algorithm>),
}

/// A value-producing expression with its transitive references.
#[derive(Debug)]
pub struct Expression {
    node: Node,
    sensors: BTreeSet<SensorId>,
    fans: BTreeSet<FanId>,
}

impl Expression {
    fn leaf(node: Node) -> Self {
        Self {
            node,
            sensors: BTreeSet::new(),
            fans: BTreeSet::new(),
        }
    }

    fn composite(children: Vec<Expression>, wrap: fn(Vec<Expression>) -> Node) -> Self {
        let sensors = children
            .iter()
            .flat_map(|c| c.sensors.iter().copied())
            .collect();
        let fans = children.iter().flat_map(|c| c.fans.iter().copied()).collect();
        Self {
            node: wrap(children),
            sensors,
            fans,
        }
    }

    pub fn constant(value: Real) -> Self {
        Self::leaf(Node::Constant(value))
    }

    /// Reference the temperature of a declared sensor.
    pub fn sensor(store: &ValueStore, name: &str) -> ControlResult<Self> {
        let id = store
            .sensor_id(name)
            .map_err(|_| ControlError::UnknownReference {
                kind: RefKind::Sensor,
                id: name.to_string(),
            })?;
        let mut expr = Self::leaf(Node::Sensor {
            id,
            name: name.to_string(),
        });
        expr.sensors.insert(id);
        Ok(expr)
    }

    /// Reference the duty of a declared fan.
    pub fn fan(store: &ValueStore, name: &str) -> ControlResult<Self> {
        let id = store.fan_id(name).map_err(|_| ControlError::UnknownReference {
            kind: RefKind::Fan,
            id: name.to_string(),
        })?;
        let mut expr = Self::leaf(Node::FanDuty {
            id,
            name: name.to_string(),
        });
        expr.fans.insert(id);
        Ok(expr)
    }

    /// Sum of `terms`. Nested sums are flattened.
    pub fn sum<T: Into<Expression>>(terms: impl IntoIterator<Item = T>) -> Self {
        let mut flat = Vec::new();
        for term in terms {
            match term.into() {
                Expression {
                    node: Node::Sum(inner),
                    ..
                } => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Self::composite(flat, Node::Sum)
    }

    /// Product of `factors`. Nested products are flattened.
    pub fn product<T: Into<Expression>>(factors: impl IntoIterator<Item = T>) -> Self {
        let mut flat = Vec::new();
        for factor in factors {
            match factor.into() {
                Expression {
                    node: Node::Product(inner),
                    ..
                } => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Self::composite(flat, Node::Product)
    }

    pub fn negate(self) -> Self {
        Self::product([self, Self::constant(-1.0)])
    }

    pub fn subtract(self, other: impl Into<Expression>) -> Self {
        Self::sum([self, other.into().negate()])
    }

    pub fn algorithm(algorithm: Algorithm) -> Self {
        let sensors = algorithm.referenced_sensors().clone();
        let fans = algorithm.referenced_fans().clone();
        Self {
            node: Node::Algorithm(Box::new(algorithm)),
            sensors,
            fans,
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn referenced_sensors(&self) -> &BTreeSet<SensorId> {
        &self.sensors
    }

    pub fn referenced_fans(&self) -> &BTreeSet<FanId> {
        &self.fans
    }

    /// Fold the expression to a number if it contains no references or state.
    pub fn constant_value(&self) -> Option<Real> {
        match &self.node {
            Node::Constant(v) => Some(*v),
            Node::Sum(terms) => terms.iter().map(Expression::constant_value).sum(),
            Node::Product(factors) => factors.iter().map(Expression::constant_value).product(),
            Node::Sensor { .. } | Node::FanDuty { .. } | Node::Algorithm(_) => None,
        }
    }

    /// Evaluate the expression, advancing the state of any algorithm nodes.
    pub fn value(&mut self, eval: &Evaluation<'_>) -> ControlResult<Real> {
        match &mut self.node {
            Node::Constant(v) => Ok(*v),
            Node::Sum(terms) => {
                let mut total = 0.0;
                for term in terms {
                    total += term.value(eval)?;
                }
                Ok(total)
            }
            Node::Product(factors) => {
                let mut total = 1.0;
                for factor in factors {
                    total *= factor.value(eval)?;
                }
                Ok(total)
            }
            Node::Sensor { id, name } => {
                eval.store
                    .sensor_value(*id)?
                    .ok_or_else(|| ControlError::MissingValue {
                        kind: RefKind::Sensor,
                        id: name.clone(),
                    })
            }
            Node::FanDuty { id, name } => eval
                .store
                .fan_duty(*id)?
                .map(|d| d.as_real())
                .ok_or_else(|| ControlError::MissingValue {
                    kind: RefKind::Fan,
                    id: name.clone(),
                }),
            Node::Algorithm(algorithm) => algorithm.evaluate(eval),
        }
    }
}

impl From<Real> for Expression {
    fn from(value: Real) -> Self {
        Expression::constant(value)
    }
}

impl From<Algorithm> for Expression {
    fn from(algorithm: Algorithm) -> Self {
        Expression::algorithm(algorithm)
    }
}

impl<T: Into<Expression>> ops::Add<T> for Expression {
    type Output = Expression;

    fn add(self, rhs: T) -> Expression {
        Expression::sum([self, rhs.into()])
    }
}

impl<T: Into<Expression>> ops::Sub<T> for Expression {
    type Output = Expression;

    fn sub(self, rhs: T) -> Expression {
        self.subtract(rhs)
    }
}

impl<T: Into<Expression>> ops::Mul<T> for Expression {
    type Output = Expression;

    fn mul(self, rhs: T) -> Expression {
        Expression::product([self, rhs.into()])
    }
}

impl ops::Neg for Expression {
    type Output = Expression;

    fn neg(self) -> Expression {
        self.negate()
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Expression], op: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " {op} ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Node::Constant(v) => write!(f, "{v}"),
            Node::Sum(terms) => write_joined(f, terms, "+"),
            Node::Product(factors) => write_joined(f, factors, "*"),
            Node::Sensor { name, .. } => write!(f, "sensors.{name}"),
            Node::FanDuty { name, .. } => write!(f, "fans.{name}"),
            Node::Algorithm(algorithm) => write!(f, "{algorithm}"),
        }
    }
}
