//! Builds a wired [`Controller`] from a configuration.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sf_config::{
    Config, ConfigError, InterfaceRef, ValidationError, sensor_interval, validate_with_registry,
};
use sf_controls::{
    AlgorithmContext, AlgorithmRegistry, ControlError, ExpressionParser, FanPlan, RefKind,
    Schedule, ValueStore,
};
use sf_core::{Duty, DutyRange};
use tracing::{debug, info};

use crate::controller::{Controller, ControllerParts};
use crate::drivers::{self, DryRunActuator};
use crate::error::{AppError, AppResult};
use crate::fan::FanController;
use crate::interface::{FanActuator, Interface};
use crate::sensor::Sensor;

/// Cycle interval used when no sensor interval is known.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

pub struct ControllerBuilder {
    config: Config,
    parser: ExpressionParser,
    interfaces: BTreeMap<String, Arc<dyn Interface>>,
    dry_run: bool,
}

impl ControllerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            parser: ExpressionParser::default(),
            interfaces: BTreeMap::new(),
            dry_run: false,
        }
    }

    /// Resolve algorithm calls against `registry` instead of the defaults.
    pub fn with_registry(mut self, registry: AlgorithmRegistry) -> Self {
        self.parser = ExpressionParser::new(registry);
        self
    }

    /// Use `interface` for `id` instead of creating it from its driver name.
    pub fn with_interface(mut self, id: impl Into<String>, interface: Arc<dyn Interface>) -> Self {
        self.interfaces.insert(id.into(), interface);
        self
    }

    /// Log duty changes instead of applying them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn build(self) -> AppResult<Controller> {
        let Self {
            config,
            parser,
            mut interfaces,
            dry_run,
        } = self;
        validate_with_registry(&config, parser.registry()).map_err(ConfigError::from)?;

        for (id, def) in &config.interfaces {
            if !interfaces.contains_key(id) {
                let interface = drivers::create(def).map_err(|source| AppError::Interface {
                    interface: id.clone(),
                    stage: "create",
                    source,
                })?;
                debug!(interface = %id, driver = %def.driver, "interface created");
                interfaces.insert(id.clone(), interface);
            }
        }

        let store = ValueStore::new(config.sensors.keys().cloned(), config.fans.keys().cloned())?;

        let mut sources = Vec::with_capacity(config.sensors.len());
        for (name, def) in &config.sensors {
            let interface = lookup(&interfaces, &def.interface, &format!("sensor '{name}'"))?;
            let source = interface
                .sensor(&def.interface.params())
                .map_err(|source| AppError::Interface {
                    interface: def.interface.id().to_string(),
                    stage: "sensor channel",
                    source,
                })?;
            let interval = sensor_interval(name, def).map_err(ConfigError::from)?;
            sources.push((name, interval, source));
        }

        let mut plans = Vec::with_capacity(config.fans.len());
        let mut actuators = Vec::with_capacity(config.fans.len());
        for (name, def) in &config.fans {
            let interface = lookup(&interfaces, &def.interface, &format!("fan '{name}'"))?;
            let mut actuator: Arc<dyn FanActuator> = interface
                .fan(&def.interface.params())
                .map_err(|source| AppError::Interface {
                    interface: def.interface.id().to_string(),
                    stage: "fan channel",
                    source,
                })?;
            if dry_run {
                actuator = Arc::new(DryRunActuator::new(name.clone(), actuator));
            }

            let range = duty_range(def.min_duty, def.max_duty).map_err(|source| {
                AppError::Configuration {
                    context: format!("fan '{name}'"),
                    source,
                }
            })?;
            let context = AlgorithmContext::new(range);
            let mut plan = FanPlan::new(name.clone(), range);
            for (algorithm, text) in &def.algorithms {
                let expression = parser.parse(text, &store, &context).map_err(|source| {
                    AppError::Configuration {
                        context: format!("fan '{name}' algorithm '{algorithm}'"),
                        source,
                    }
                })?;
                plan = plan.with_algorithm(algorithm.clone(), expression);
            }
            plans.push(plan);
            actuators.push(actuator);
        }

        let Schedule {
            graph,
            waves,
            calculators,
        } = Schedule::build(&store, plans).map_err(|source| AppError::Configuration {
            context: "fan dependencies".to_string(),
            source,
        })?;

        let fans: Vec<FanController> = calculators
            .into_iter()
            .zip(actuators)
            .map(|(calculator, actuator)| FanController::new(calculator, actuator))
            .collect();

        let interval = sources
            .iter()
            .map(|(_, interval, _)| *interval)
            .min()
            .unwrap_or(DEFAULT_INTERVAL);

        let sensors = sources
            .into_iter()
            .map(|(name, interval, source)| {
                let id = store.sensor_id(name)?;
                let node = graph.sensor_node(id).ok_or_else(|| ControlError::UnknownId {
                    kind: RefKind::Sensor,
                    id: name.clone(),
                })?;
                Ok(Arc::new(Sensor::new(id, name.clone(), node, interval, source)))
            })
            .collect::<AppResult<Vec<_>>>()?;

        info!(
            sensors = sensors.len(),
            fans = fans.len(),
            waves = waves.len(),
            dry_run,
            "controller built"
        );
        Ok(Controller::new(ControllerParts {
            store: Arc::new(store),
            graph: Arc::new(graph),
            waves,
            sensors,
            fans,
            interfaces: interfaces.into_iter().collect(),
            shutdown: config.shutdown,
            interval,
        }))
    }
}

fn duty_range(min: i64, max: i64) -> Result<DutyRange, ControlError> {
    Ok(DutyRange::new(Duty::new(min)?, Duty::new(max)?)?)
}

fn lookup<'a>(
    interfaces: &'a BTreeMap<String, Arc<dyn Interface>>,
    reference: &InterfaceRef,
    context: &str,
) -> AppResult<&'a Arc<dyn Interface>> {
    interfaces.get(reference.id()).ok_or_else(|| {
        ConfigError::Validation(ValidationError::MissingReference {
            id: reference.id().to_string(),
            context: format!("{context} interface"),
        })
        .into()
    })
}
