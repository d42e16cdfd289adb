//! Duty curve of a single algorithm over a temperature sweep.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use sf_controls::{
    AlgorithmContext, Ast, ControlError, ExpressionParser, FanPlan, RefKind, Schedule, ValueStore,
    parse_ast,
};
use sf_core::{Duty, DutyRange, Temperature};

use crate::error::{AppError, AppResult};

/// Name of the simulated fan.
const FAN: &str = "simulated";

/// Simulated time between two sweep points.
const STEP_TIME: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub temperature: f64,
    pub raw: f64,
    pub duty: Duty,
}

fn collect_sensors(ast: &Ast, out: &mut BTreeSet<String>) {
    match ast {
        Ast::Number(_) => {}
        Ast::Neg(inner) => collect_sensors(inner, out),
        Ast::Add(a, b) | Ast::Sub(a, b) | Ast::Mul(a, b) => {
            collect_sensors(a, out);
            collect_sensors(b, out);
        }
        Ast::Reference { kind, name, .. } => {
            if *kind == RefKind::Sensor {
                out.insert(name.clone());
            }
        }
        Ast::Call { args, keywords, .. } => {
            for arg in args.iter().chain(keywords.iter().map(|(_, a)| a)) {
                collect_sensors(arg, out);
            }
        }
    }
}

/// Evaluate `text` once per temperature, feeding it to every referenced
/// sensor. Successive points are one simulated second apart and the fan keeps
/// its last duty, so stateful algorithms behave as in a running controller.
pub fn simulate_curve(
    parser: &ExpressionParser,
    text: &str,
    range: DutyRange,
    temperatures: impl IntoIterator<Item = f64>,
) -> AppResult<Vec<CurvePoint>> {
    let configuration = |source: ControlError| AppError::Configuration {
        context: "simulated algorithm".to_string(),
        source,
    };

    let mut sensors = BTreeSet::new();
    collect_sensors(&parse_ast(text).map_err(|e| configuration(e.into()))?, &mut sensors);

    let store = ValueStore::new(sensors.iter().cloned(), [FAN]).map_err(configuration)?;
    let expression = parser
        .parse(text, &store, &AlgorithmContext::new(range))
        .map_err(configuration)?;
    let plan = FanPlan::new(FAN, range).with_algorithm(text, expression);
    let Schedule {
        graph,
        mut calculators,
        ..
    } = Schedule::build(&store, vec![plan]).map_err(configuration)?;
    let Some(mut calculator) = calculators.pop() else {
        return Ok(Vec::new());
    };

    let start = Instant::now();
    let mut points = Vec::new();
    for (step, temperature) in temperatures.into_iter().enumerate() {
        for id in store.sensor_ids() {
            let reading = Temperature::new(temperature, store.sensor_name(id));
            store.set_sensor(id, reading).map_err(configuration)?;
            if let Some(node) = graph.sensor_node(id) {
                graph.publish(node);
            }
        }
        let now = start + STEP_TIME * step as u32;
        let decision = calculator
            .calculate(&store, &graph, now)
            .map_err(|source| AppError::Evaluation {
                fan: FAN.to_string(),
                source,
            })?;
        calculator.commit(&store, decision.duty).map_err(configuration)?;
        points.push(CurvePoint {
            temperature,
            raw: decision.raw,
            duty: decision.duty,
        });
    }
    Ok(points)
}

/// Most temperatures a single sweep may produce.
pub const MAX_SWEEP_POINTS: usize = 10_000;

/// Temperatures from `from` to `to` inclusive in steps of `step`.
///
/// Fails for sweeps longer than [`MAX_SWEEP_POINTS`].
pub fn sweep(from: f64, to: f64, step: f64) -> AppResult<Vec<f64>> {
    if !(from.is_finite() && to.is_finite() && step.is_finite() && step > 0.0) || to < from {
        return Err(AppError::Configuration {
            context: "temperature sweep".to_string(),
            source: ControlError::InvalidArg {
                what: "sweep needs finite bounds with from <= to and a positive step",
            },
        });
    }
    let steps = ((to - from) / step + 1e-9).floor();
    if steps >= MAX_SWEEP_POINTS as f64 {
        return Err(AppError::Configuration {
            context: "temperature sweep".to_string(),
            source: ControlError::InvalidArg {
                what: "sweep step too small for the temperature range",
            },
        });
    }
    let count = steps as usize;
    Ok((0..=count).map(|i| from + step * i as f64).collect())
}
