//! Per-fan algorithm context and the evaluation environment.

use std::time::Instant;

use sf_core::{Duty, DutyRange};

use crate::store::ValueStore;

/// Parameters shared by every algorithm attached to one fan.
///
/// `last_duty` is the duty the fan was last driven at. It is updated by the
/// fan after each decision; algorithms read it before that happens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlgorithmContext {
    pub range: DutyRange,
    pub last_duty: Option<Duty>,
}

impl AlgorithmContext {
    pub fn new(range: DutyRange) -> Self {
        Self {
            range,
            last_duty: None,
        }
    }

    pub fn min_duty(&self) -> Duty {
        self.range.min()
    }

    pub fn max_duty(&self) -> Duty {
        self.range.max()
    }
}

impl Default for AlgorithmContext {
    fn default() -> Self {
        Self::new(DutyRange::FULL)
    }
}

/// Everything an expression reads while it is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct Evaluation<'a> {
    pub store: &'a ValueStore,
    pub context: &'a AlgorithmContext,
    pub now: Instant,
}

impl<'a> Evaluation<'a> {
    pub fn new(store: &'a ValueStore, context: &'a AlgorithmContext, now: Instant) -> Self {
        Self {
            store,
            context,
            now,
        }
    }
}
