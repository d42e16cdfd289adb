//! The controller: sets up interfaces, polls sensors and drives fans.
//!
//! Lifecycle: constructed -> set up -> running -> stopped. Sensors poll on
//! their own tasks; the main loop processes fan waves in dependency order,
//! with the dirty fans of one wave updated concurrently.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use sf_config::ShutdownPolicy;
use sf_controls::{DependencyGraph, DutyDecision, ValueStore};
use sf_core::{Duty, FanId};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::fan::FanController;
use crate::interface::{FanActuator, Interface, Teardown};
use crate::sensor::Sensor;
use crate::status::{ControllerStatus, StatusHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Constructed,
    SetUp,
    Running,
    Stopped,
}

impl ControllerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ControllerState::Constructed => "constructed",
            ControllerState::SetUp => "set up",
            ControllerState::Running => "running",
            ControllerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fan whose duty was recomputed during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FanUpdate {
    pub fan: String,
    pub decision: DutyDecision,
}

/// Outcome of one pass over every wave.
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    pub number: u64,
    pub updates: Vec<FanUpdate>,
}

/// Called after every cycle.
///
/// Errors are logged and ignored, except [`AppError::Cancelled`] which stops
/// the controller and is returned from [`Controller::run`].
#[async_trait]
pub trait CycleObserver: Send {
    async fn on_cycle(&mut self, cycle: &Cycle, status: &StatusHandle) -> AppResult<()>;
}

#[async_trait]
impl CycleObserver for () {
    async fn on_cycle(&mut self, _cycle: &Cycle, _status: &StatusHandle) -> AppResult<()> {
        Ok(())
    }
}

/// Parts of a controller assembled by the builder.
pub(crate) struct ControllerParts {
    pub store: Arc<ValueStore>,
    pub graph: Arc<DependencyGraph>,
    pub waves: Vec<Vec<FanId>>,
    pub sensors: Vec<Arc<Sensor>>,
    pub fans: Vec<FanController>,
    pub interfaces: Vec<(String, Arc<dyn Interface>)>,
    pub shutdown: ShutdownPolicy,
    pub interval: Duration,
}

pub struct Controller {
    state: ControllerState,
    store: Arc<ValueStore>,
    graph: Arc<DependencyGraph>,
    waves: Vec<Vec<FanId>>,
    sensors: Vec<Arc<Sensor>>,
    fans: Vec<FanController>,
    interfaces: Vec<(String, Arc<dyn Interface>)>,
    teardowns: Vec<(String, Teardown)>,
    shutdown: ShutdownPolicy,
    interval: Duration,
    token: CancellationToken,
    cycles: u64,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state)
            .field("interval", &self.interval)
            .field("cycles", &self.cycles)
            .finish_non_exhaustive()
    }
}

fn joined(result: Result<AppResult<()>, JoinError>) -> AppResult<()> {
    result.map_err(|e| AppError::Task(e.to_string()))?
}

impl Controller {
    pub(crate) fn new(parts: ControllerParts) -> Self {
        Self {
            state: ControllerState::Constructed,
            store: parts.store,
            graph: parts.graph,
            waves: parts.waves,
            sensors: parts.sensors,
            fans: parts.fans,
            interfaces: parts.interfaces,
            teardowns: Vec::new(),
            shutdown: parts.shutdown,
            interval: parts.interval,
            token: CancellationToken::new(),
            cycles: 0,
        }
    }

    pub fn state(&self) -> ControllerState {
        match self.state {
            // `run` borrows the controller mutably, so a visible `Running`
            // means its future was dropped and the hardware was released.
            ControllerState::Running => ControllerState::Stopped,
            state => state,
        }
    }

    pub fn store(&self) -> &Arc<ValueStore> {
        &self.store
    }

    pub fn waves(&self) -> &[Vec<FanId>] {
        &self.waves
    }

    /// Pause between cycles: the shortest sensor interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Token that stops the controller when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Ask the main loop to stop. In-flight actuator calls complete first.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn status_handle(&self) -> StatusHandle {
        let fans = self
            .fans
            .iter()
            .map(|fan| (fan.id(), Arc::clone(fan.actuator())))
            .collect();
        StatusHandle::new(Arc::clone(&self.store), fans)
    }

    pub fn status(&self) -> ControllerStatus {
        self.status_handle().snapshot()
    }

    fn expect_state(&self, expected: ControllerState, action: &'static str) -> AppResult<()> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(AppError::InvalidState {
                state: state.as_str(),
                action,
            })
        }
    }

    /// Set up every interface, then every fan and sensor.
    ///
    /// On failure, or when the stop token is cancelled meanwhile, the
    /// interfaces already set up are torn down again.
    pub async fn setup(&mut self) -> AppResult<()> {
        self.expect_state(ControllerState::Constructed, "set up")?;
        info!(interfaces = self.interfaces.len(), "setting up interfaces");

        let results = join_all(self.interfaces.iter().map(|(id, interface)| async move {
            (id.clone(), interface.setup().await)
        }))
        .await;
        let mut errors = Vec::new();
        for (interface, result) in results {
            match result {
                Ok(teardown) => self.teardowns.push((interface, teardown)),
                Err(source) => errors.push(AppError::Interface {
                    interface,
                    stage: "setup",
                    source,
                }),
            }
        }
        if let Err(err) = AppError::from_failures(errors) {
            return Err(self.abort_setup(err).await);
        }
        if self.token.is_cancelled() {
            return Err(self.abort_setup(AppError::Cancelled).await);
        }

        let store = &self.store;
        let graph = &self.graph;
        let fans = join_all(self.fans.iter_mut().map(|fan| fan.setup(store)));
        let sensors = join_all(self.sensors.iter().map(|sensor| sensor.update(store, graph)));
        let (fan_results, sensor_results) = tokio::join!(fans, sensors);
        let errors: Vec<AppError> = fan_results
            .into_iter()
            .filter_map(Result::err)
            .chain(sensor_results.into_iter().filter_map(Result::err))
            .collect();
        if let Err(err) = AppError::from_failures(errors) {
            return Err(self.abort_setup(err).await);
        }
        if self.token.is_cancelled() {
            return Err(self.abort_setup(AppError::Cancelled).await);
        }

        self.state = ControllerState::SetUp;
        info!(
            sensors = self.sensors.len(),
            fans = self.fans.len(),
            waves = self.waves.len(),
            "controller set up"
        );
        Ok(())
    }

    async fn abort_setup(&mut self, err: AppError) -> AppError {
        error!(error = %err, "setup failed");
        self.teardown().await;
        self.state = ControllerState::Stopped;
        err
    }

    /// Run until stopped or a sensor, fan or interface fails.
    ///
    /// Whichever way the loop ends, the shutdown policy is applied and every
    /// interface is torn down before returning. If the returned future is
    /// dropped first, both happen on a background task instead.
    pub async fn run<O: CycleObserver>(&mut self, observer: &mut O) -> AppResult<()> {
        self.expect_state(ControllerState::SetUp, "run")?;
        self.state = ControllerState::Running;
        info!(interval_s = self.interval.as_secs_f64(), "controller running");

        let sensor_token = self.token.child_token();
        let mut tasks = JoinSet::new();
        for sensor in &self.sensors {
            let sensor = Arc::clone(sensor);
            let store = Arc::clone(&self.store);
            let graph = Arc::clone(&self.graph);
            let token = sensor_token.clone();
            tasks.spawn(async move { sensor.run(&store, &graph, token).await });
        }
        let mut guard = ShutdownGuard {
            teardowns: std::mem::take(&mut self.teardowns),
            maxed: self.max_duties(),
            sensors: sensor_token.clone(),
        };

        let result = self.main_loop(&mut tasks, observer).await;

        sensor_token.cancel();
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = joined(result) {
                warn!(error = %err, "sensor task failed while stopping");
            }
        }
        guard.maxed.clear();
        self.apply_shutdown_policy().await;
        run_teardowns(&mut guard.teardowns).await;
        self.state = ControllerState::Stopped;

        match &result {
            Ok(()) => info!(cycles = self.cycles, "controller stopped"),
            Err(err) => error!(error = %err, cycles = self.cycles, "controller stopped"),
        }
        result
    }

    /// Tear down a controller that was set up but never run.
    pub async fn close(&mut self) -> AppResult<()> {
        self.expect_state(ControllerState::SetUp, "close")?;
        self.teardown().await;
        self.state = ControllerState::Stopped;
        Ok(())
    }

    async fn main_loop<O: CycleObserver>(
        &mut self,
        tasks: &mut JoinSet<AppResult<()>>,
        observer: &mut O,
    ) -> AppResult<()> {
        let status = self.status_handle();
        loop {
            if self.token.is_cancelled() {
                return Ok(());
            }
            while let Some(result) = tasks.try_join_next() {
                joined(result)?;
            }

            self.update_interfaces().await?;
            let cycle = self.run_cycle().await?;
            match observer.on_cycle(&cycle, &status).await {
                Ok(()) => {}
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(err) => warn!(error = %err, cycle = cycle.number, "cycle callback failed"),
            }

            tokio::select! {
                _ = self.token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => {}
                Some(result) = tasks.join_next() => joined(result)?,
            }
        }
    }

    async fn update_interfaces(&self) -> AppResult<()> {
        let results = join_all(self.interfaces.iter().map(|(id, interface)| async move {
            interface
                .update()
                .await
                .map_err(|source| AppError::Interface {
                    interface: id.clone(),
                    stage: "update",
                    source,
                })
        }))
        .await;
        AppError::from_failures(results.into_iter().filter_map(Result::err).collect())
    }

    /// Update every dirty fan, wave by wave.
    pub async fn run_cycle(&mut self) -> AppResult<Cycle> {
        self.cycles += 1;
        let number = self.cycles;
        let now = tokio::time::Instant::now().into_std();
        let store: &ValueStore = &self.store;
        let graph: &DependencyGraph = &self.graph;
        let fans = &mut self.fans;

        let mut updates = Vec::new();
        for wave in &self.waves {
            let pending = fans
                .iter_mut()
                .filter(|fan| wave.contains(&fan.id()))
                .map(|fan| async move {
                    let result = fan.update(store, graph, now).await;
                    (fan.name().to_string(), result)
                });
            let mut errors = Vec::new();
            for (fan, result) in join_all(pending).await {
                match result {
                    Ok(Some(decision)) => updates.push(FanUpdate { fan, decision }),
                    Ok(None) => {}
                    Err(err) => errors.push(err),
                }
            }
            AppError::from_failures(errors)?;
        }
        debug!(cycle = number, updated = updates.len(), "cycle complete");
        Ok(Cycle { number, updates })
    }

    /// Maximum duty per fan when the policy forces it on shutdown.
    fn max_duties(&self) -> Vec<(String, Arc<dyn FanActuator>, Duty)> {
        if self.shutdown == ShutdownPolicy::Release {
            return Vec::new();
        }
        self.fans
            .iter()
            .map(|fan| {
                let max = fan.calculator().context().max_duty();
                (fan.name().to_string(), Arc::clone(fan.actuator()), max)
            })
            .collect()
    }

    async fn apply_shutdown_policy(&mut self) {
        if self.shutdown == ShutdownPolicy::Release {
            info!("leaving fans at their last duty");
            return;
        }
        info!("forcing fans to maximum duty");
        let store: &ValueStore = &self.store;
        let results = join_all(self.fans.iter_mut().map(|fan| fan.force_max(store))).await;
        for err in results.into_iter().filter_map(Result::err) {
            warn!(error = %err, "failed to force fan to maximum duty");
        }
    }

    async fn teardown(&mut self) {
        run_teardowns(&mut self.teardowns).await;
    }
}

/// Consume every teardown, newest first; errors are logged and do not stop
/// the others.
async fn run_teardowns(teardowns: &mut Vec<(String, Teardown)>) {
    while let Some((interface, teardown)) = teardowns.pop() {
        match teardown.await {
            Ok(()) => debug!(%interface, "interface torn down"),
            Err(err) => warn!(%interface, error = %err, "interface teardown failed"),
        }
    }
}

/// Hardware still owed a release by a running controller.
///
/// `run` drains it on the normal path. Whatever is left when it is dropped
/// is spawned onto the runtime: fans forced to maximum, then teardowns.
struct ShutdownGuard {
    teardowns: Vec<(String, Teardown)>,
    maxed: Vec<(String, Arc<dyn FanActuator>, Duty)>,
    sensors: CancellationToken,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if self.teardowns.is_empty() && self.maxed.is_empty() {
            return;
        }
        self.sensors.cancel();
        let mut teardowns = std::mem::take(&mut self.teardowns);
        let maxed = std::mem::take(&mut self.maxed);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(
                interfaces = teardowns.len(),
                "controller dropped outside a runtime, interfaces left as they are"
            );
            return;
        };
        warn!("controller dropped while running, releasing hardware in the background");
        handle.spawn(async move {
            let results = join_all(maxed.iter().map(|(fan, actuator, max)| async move {
                (fan, actuator.set_duty(*max).await)
            }))
            .await;
            for (fan, result) in results {
                if let Err(err) = result {
                    warn!(%fan, error = %err, "failed to force fan to maximum duty");
                }
            }
            run_teardowns(&mut teardowns).await;
        });
    }
}
