use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sf_app::drivers::DummyInterface;
use sf_app::*;
use sf_config::{Config, ConfigError};
use sf_controls::ControlError;
use sf_core::Duty;
use tokio_util::sync::CancellationToken;

const ZONES: &str = r#"
shutdown: release
interfaces:
  sim: { driver: dummy }
sensors:
  cpu: { interface: { id: sim, channel: cpu }, interval_s: 1 }
fans:
  aux:
    interface: { id: sim, channel: aux }
    algorithms: { fixed: "Static(50)" }
  main:
    interface: { id: sim, channel: main }
    min_duty: 20
    max_duty: 55
    algorithms: { follow: "fans.aux + 10" }
  cpu_zone:
    interface: { id: sim, channel: cpu_zone }
    min_duty: 15
    algorithms: { curve: "Quadratic(sensors.cpu, 50, 85)" }
"#;

fn config(yaml: &str) -> Config {
    sf_config::from_yaml_str(yaml).unwrap()
}

fn simulated(cpu: f64) -> Arc<DummyInterface> {
    Arc::new(DummyInterface::with_temperatures([("cpu", cpu)]))
}

fn build(config: Config, interface: &Arc<DummyInterface>) -> Controller {
    ControllerBuilder::new(config)
        .with_interface("sim", interface.clone())
        .build()
        .unwrap()
}

fn duty(percent: i64) -> Option<Duty> {
    Some(Duty::new(percent).unwrap())
}

/// Records cycles and stops the controller after `limit` of them.
struct StopAfter {
    limit: u64,
    token: CancellationToken,
    cycles: Vec<Cycle>,
}

impl StopAfter {
    fn new(limit: u64, controller: &Controller) -> Self {
        Self {
            limit,
            token: controller.stop_token(),
            cycles: Vec::new(),
        }
    }
}

#[async_trait]
impl CycleObserver for StopAfter {
    async fn on_cycle(&mut self, cycle: &Cycle, _status: &StatusHandle) -> AppResult<()> {
        self.cycles.push(cycle.clone());
        if cycle.number >= self.limit {
            self.token.cancel();
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn zones_follow_their_algorithms() {
    let interface = simulated(67.5);
    let mut controller = build(config(ZONES), &interface);

    let store = Arc::clone(controller.store());
    let wave_names: Vec<Vec<&str>> = controller
        .waves()
        .iter()
        .map(|wave| wave.iter().map(|id| store.fan_name(*id)).collect())
        .collect();
    assert_eq!(wave_names, vec![vec!["aux", "cpu_zone"], vec!["main"]]);

    controller.setup().await.unwrap();
    assert_eq!(controller.state(), ControllerState::SetUp);
    let cpu = store.sensor_id("cpu").unwrap();
    assert_eq!(store.sensor_value(cpu).unwrap(), Some(67.5));

    let mut observer = StopAfter::new(3, &controller);
    controller.run(&mut observer).await.unwrap();
    assert_eq!(controller.state(), ControllerState::Stopped);

    let first = &observer.cycles[0];
    let updated: Vec<(&str, u8)> = first
        .updates
        .iter()
        .map(|u| (u.fan.as_str(), u.decision.duty.percent()))
        .collect();
    assert_eq!(updated, vec![("aux", 50), ("cpu_zone", 36), ("main", 55)]);
    assert_eq!(observer.cycles.len(), 3);

    for (channel, expected) in [("aux", 50), ("cpu_zone", 36), ("main", 55)] {
        let fan = interface.fan_channel(channel).unwrap();
        assert_eq!(fan.current(), duty(expected), "{channel}");
        assert_eq!(fan.writes(), 1, "{channel} is only written when its duty changes");
    }

    assert_eq!(interface.setup_count(), 1);
    assert_eq!(interface.update_count(), 3);
    assert_eq!(interface.teardown_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn temperature_changes_reach_the_fans() {
    let interface = simulated(50.0);
    let mut controller = build(config(ZONES), &interface);
    controller.setup().await.unwrap();

    struct Heat {
        interface: Arc<DummyInterface>,
        token: CancellationToken,
        duties: Vec<Option<u8>>,
    }

    #[async_trait]
    impl CycleObserver for Heat {
        async fn on_cycle(&mut self, cycle: &Cycle, status: &StatusHandle) -> AppResult<()> {
            let snapshot = status.snapshot();
            let zone = snapshot.fans.iter().find(|f| f.name == "cpu_zone");
            self.duties.push(zone.and_then(|f| f.duty));
            if cycle.number == 1 {
                self.interface.sensor_channel("cpu").unwrap().set_temperature(85.0);
            }
            if cycle.number >= 4 {
                self.token.cancel();
            }
            Ok(())
        }
    }

    let mut observer = Heat {
        interface: Arc::clone(&interface),
        token: controller.stop_token(),
        duties: Vec::new(),
    };
    controller.run(&mut observer).await.unwrap();

    assert_eq!(observer.duties.first(), Some(&Some(15)));
    assert_eq!(observer.duties.last(), Some(&Some(100)));
}

#[tokio::test(start_paused = true)]
async fn shutdown_forces_maximum_duty_by_default() {
    let interface = simulated(40.0);
    let yaml = ZONES.replace("shutdown: release", "shutdown: force_max");
    let mut controller = build(config(&yaml), &interface);
    controller.setup().await.unwrap();
    controller.stop();
    controller.run(&mut ()).await.unwrap();

    assert_eq!(controller.cycles(), 0);
    assert_eq!(interface.fan_channel("aux").unwrap().current(), duty(100));
    assert_eq!(interface.fan_channel("main").unwrap().current(), duty(55));
    assert_eq!(interface.fan_channel("cpu_zone").unwrap().current(), duty(100));
    assert_eq!(interface.teardown_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_run_still_releases_the_hardware() {
    let interface = simulated(40.0);
    let yaml = ZONES.replace("shutdown: release", "shutdown: force_max");
    let mut controller = build(config(&yaml), &interface);
    controller.setup().await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), controller.run(&mut ())).await;
    assert!(outcome.is_err(), "run only ends when stopped");
    assert!(controller.cycles() > 1);

    // let the background release finish
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(interface.teardown_count(), 1);
    assert_eq!(interface.fan_channel("aux").unwrap().current(), duty(100));
    assert_eq!(interface.fan_channel("main").unwrap().current(), duty(55));
    assert_eq!(controller.state(), ControllerState::Stopped);
    assert!(matches!(
        controller.run(&mut ()).await,
        Err(AppError::InvalidState { state: "stopped", .. })
    ));
    assert_eq!(interface.teardown_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_during_setup_rolls_back() {
    let interface = simulated(40.0);
    let mut controller = build(config(ZONES), &interface);
    controller.stop();

    let err = controller.setup().await.unwrap_err();
    assert!(matches!(err, AppError::Cancelled));
    assert_eq!(interface.setup_count(), 1);
    assert_eq!(interface.teardown_count(), 1);
    assert_eq!(controller.state(), ControllerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn setup_reads_current_fan_duty() {
    let interface = simulated(40.0);
    let mut controller = build(config(ZONES), &interface);
    interface.fan_channel("aux").unwrap().preset(Duty::new(30).unwrap());
    controller.setup().await.unwrap();

    let status = controller.status();
    let aux = status.fans.iter().find(|f| f.name == "aux").unwrap();
    assert_eq!(aux.duty, Some(30));
    let main = status.fans.iter().find(|f| f.name == "main").unwrap();
    assert_eq!(main.duty, None);

    controller.close().await.unwrap();
    assert_eq!(interface.teardown_count(), 1);
    assert!(matches!(
        controller.run(&mut ()).await,
        Err(AppError::InvalidState { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn sensor_failure_stops_the_controller() {
    let interface = simulated(40.0);
    let mut controller = build(config(ZONES), &interface);
    controller.setup().await.unwrap();
    interface
        .sensor_channel("cpu")
        .unwrap()
        .fail_with(Some("unplugged"));

    let err = controller.run(&mut ()).await.unwrap_err();
    assert!(matches!(err, AppError::SourceRead { ref sensor, .. } if sensor == "cpu"));
    assert_eq!(controller.state(), ControllerState::Stopped);
    assert_eq!(interface.teardown_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failures_in_one_wave_are_aggregated() {
    let interface = simulated(40.0);
    let mut controller = build(config(ZONES), &interface);
    controller.setup().await.unwrap();
    interface.fan_channel("aux").unwrap().fail_with(Some("stalled"));
    interface.fan_channel("cpu_zone").unwrap().fail_with(Some("stalled"));

    let err = controller.run(&mut ()).await.unwrap_err();
    match err {
        AppError::Aggregate(errors) => {
            assert_eq!(errors.len(), 2);
            assert!(
                errors
                    .iter()
                    .all(|e| matches!(e, AppError::Actuation { .. }))
            );
        }
        other => panic!("expected an aggregate error, got {other}"),
    }
    assert_eq!(interface.teardown_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn callback_errors_are_swallowed_but_cancellation_stops() {
    struct Flaky {
        token: CancellationToken,
    }

    #[async_trait]
    impl CycleObserver for Flaky {
        async fn on_cycle(&mut self, cycle: &Cycle, _status: &StatusHandle) -> AppResult<()> {
            if cycle.number >= 2 {
                self.token.cancel();
            }
            Err(AppError::Task("display failed".to_string()))
        }
    }

    let interface = simulated(40.0);
    let mut controller = build(config(ZONES), &interface);
    controller.setup().await.unwrap();
    let mut observer = Flaky {
        token: controller.stop_token(),
    };
    controller.run(&mut observer).await.unwrap();
    assert_eq!(controller.cycles(), 2);

    struct Cancel;

    #[async_trait]
    impl CycleObserver for Cancel {
        async fn on_cycle(&mut self, _cycle: &Cycle, _status: &StatusHandle) -> AppResult<()> {
            Err(AppError::Cancelled)
        }
    }

    let interface = simulated(40.0);
    let mut controller = build(config(ZONES), &interface);
    controller.setup().await.unwrap();
    let err = controller.run(&mut Cancel).await.unwrap_err();
    assert!(matches!(err, AppError::Cancelled));
    assert_eq!(controller.cycles(), 1);
    assert_eq!(interface.teardown_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_setup_tears_down_ready_interfaces() {
    let yaml = r#"
interfaces:
  good: { driver: dummy }
  bad: { driver: dummy }
sensors:
  cpu: { interface: { id: good, channel: cpu }, interval_s: 1 }
fans:
  case:
    interface: bad
    algorithms: { fixed: "Static(40)" }
"#;
    let good = simulated(40.0);
    let bad = Arc::new(DummyInterface::new());
    bad.fail_setup(Some("no such device"));

    let mut controller = ControllerBuilder::new(config(yaml))
        .with_interface("good", good.clone())
        .with_interface("bad", bad.clone())
        .build()
        .unwrap();
    let err = controller.setup().await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Interface { ref interface, stage: "setup", .. } if interface == "bad"
    ));
    assert_eq!(good.setup_count(), 1);
    assert_eq!(good.teardown_count(), 1);
    assert_eq!(controller.state(), ControllerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn dry_run_never_writes() {
    let interface = simulated(85.0);
    let mut controller = ControllerBuilder::new(config(ZONES))
        .with_interface("sim", interface.clone())
        .dry_run(true)
        .build()
        .unwrap();
    controller.setup().await.unwrap();
    let mut observer = StopAfter::new(2, &controller);
    controller.run(&mut observer).await.unwrap();

    assert_eq!(observer.cycles[0].updates.len(), 3);
    for channel in ["aux", "main", "cpu_zone"] {
        assert_eq!(interface.fan_channel(channel).unwrap().writes(), 0);
    }
}

#[tokio::test]
async fn build_reports_configuration_errors() {
    let cyclic = ZONES.replace("Static(50)", "fans.main - 5");
    let err = ControllerBuilder::new(config(&cyclic)).build().unwrap_err();
    match err {
        AppError::Configuration {
            source: ControlError::CyclicDependency { fans },
            ..
        } => assert_eq!(fans, vec!["aux".to_string(), "main".to_string()]),
        other => panic!("expected a cycle, got {other}"),
    }

    let unknown = ZONES.replace("driver: dummy", "driver: ipmi");
    let err = ControllerBuilder::new(config(&unknown)).build().unwrap_err();
    assert!(matches!(
        err,
        AppError::Interface { stage: "create", .. }
    ));

    let bad_args = ZONES.replace("Static(50)", "Static(150)");
    let err = ControllerBuilder::new(config(&bad_args)).build().unwrap_err();
    assert!(matches!(err, AppError::Configuration { ref context, .. } if context.contains("aux")));

    let mut huge = config(ZONES);
    huge.sensors.get_mut("cpu").unwrap().interval_s = 1e20;
    assert!(matches!(
        ControllerBuilder::new(huge).build(),
        Err(AppError::Config(ConfigError::Validation(_)))
    ));
}

/// An interface whose single fan ignores writes.
struct Stuck;

#[async_trait]
impl FanActuator for Stuck {
    async fn duty(&self) -> DriverResult<Option<Duty>> {
        Ok(None)
    }

    async fn set_duty(&self, _duty: Duty) -> DriverResult<()> {
        Ok(())
    }
}

#[async_trait]
impl Interface for Stuck {
    fn driver(&self) -> &str {
        "stuck"
    }

    async fn setup(&self) -> DriverResult<Teardown> {
        Ok(no_teardown())
    }

    fn sensor(&self, _params: &sf_config::Options) -> DriverResult<Arc<dyn TemperatureSource>> {
        Err(DriverError::Device("no sensors".to_string()))
    }

    fn fan(&self, _params: &sf_config::Options) -> DriverResult<Arc<dyn FanActuator>> {
        Ok(Arc::new(Stuck))
    }
}

#[tokio::test(start_paused = true)]
async fn custom_interfaces_can_be_injected() {
    let yaml = r#"
interfaces:
  sim: { driver: dummy }
  board: { driver: custom }
sensors:
  cpu: { interface: { id: sim, channel: cpu }, interval_s: 2 }
fans:
  case:
    interface: board
    algorithms: { curve: "Linear(sensors.cpu, 30, 50)" }
"#;
    let sim = simulated(40.0);
    let mut controller = ControllerBuilder::new(config(yaml))
        .with_interface("sim", sim.clone())
        .with_interface("board", Arc::new(Stuck))
        .build()
        .unwrap();
    assert_eq!(controller.interval(), std::time::Duration::from_secs(2));
    controller.setup().await.unwrap();
    let mut observer = StopAfter::new(1, &controller);
    controller.run(&mut observer).await.unwrap();
    assert_eq!(observer.cycles[0].updates[0].decision.duty.percent(), 50);
}
