//! Duty control engine for spinflow.
//!
//! This crate turns sensor temperatures into fan duties. It has no I/O of its
//! own; the application layer feeds it readings and applies its decisions.
//!
//! # Architecture
//!
//! - [`store::ValueStore`] holds the last known temperature of every sensor
//!   and duty of every fan
//! - [`expression::Expression`] trees combine store values with constants and
//!   [`algorithm::Algorithm`] nodes into a requested duty
//! - [`parser::ExpressionParser`] builds expressions from text such as
//!   `Quadratic(sensors.cpu, 50, 85)`, resolving calls through an
//!   [`registry::AlgorithmRegistry`]
//! - [`schedule::Schedule`] wires the publish/subscribe [`graph::DependencyGraph`]
//!   and orders fans into waves
//! - [`fan::DutyCalculator`] picks the highest request of a fan's algorithms
//!   and clamps it to the fan's duty range

pub mod algorithm;
pub mod context;
pub mod error;
pub mod expression;
pub mod fan;
pub mod graph;
pub mod parser;
pub mod pid;
pub mod registry;
pub mod schedule;
pub mod store;

pub use algorithm::{Algorithm, LinearDecrease, Polynomial, Static};
pub use context::{AlgorithmContext, Evaluation};
pub use error::{ControlError, ControlResult, RefKind};
pub use expression::{Expression, Node};
pub use fan::{AlgorithmSlot, DutyCalculator, DutyDecision};
pub use graph::{DependencyGraph, GraphBuilder, Memo, NodeKind};
pub use parser::{Ast, ExpressionParser, MAX_EXPRESSION_LEN, ParseError, parse_ast};
pub use pid::{Pid, PidGains, PidState};
pub use registry::{AlgorithmRegistry, AlgorithmSpec, BoundArgs, ParamDefault, ParamKind, ParamSpec};
pub use schedule::{FanGraph, FanPlan, Schedule};
pub use store::{Displayed, ValueStore};
