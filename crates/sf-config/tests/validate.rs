use std::collections::BTreeMap;

use sf_config::*;
use sf_controls::ParseError;

fn base_config() -> Config {
    let mut interfaces = BTreeMap::new();
    interfaces.insert(
        "sim".to_string(),
        InterfaceDef {
            driver: "dummy".to_string(),
            options: Options::new(),
        },
    );
    let mut sensors = BTreeMap::new();
    sensors.insert(
        "cpu".to_string(),
        SensorDef {
            interface: "sim".into(),
            interval_s: 1.0,
        },
    );
    let mut algorithms = BTreeMap::new();
    algorithms.insert(
        "curve".to_string(),
        "Quadratic(sensors.cpu, 50, 85)".to_string(),
    );
    let mut fans = BTreeMap::new();
    fans.insert(
        "case".to_string(),
        FanDef {
            interface: "sim".into(),
            min_duty: 15,
            max_duty: 100,
            algorithms,
        },
    );
    Config {
        shutdown: ShutdownPolicy::default(),
        interfaces,
        sensors,
        fans,
    }
}

fn case(config: &mut Config) -> &mut FanDef {
    config.fans.get_mut("case").unwrap()
}

#[test]
fn base_config_is_valid() {
    validate_config(&base_config()).unwrap();
}

#[test]
fn empty_sections_are_rejected() {
    let mut config = base_config();
    config.fans.clear();
    assert_eq!(
        validate_config(&config),
        Err(ValidationError::Empty { section: "fans" })
    );
    config.sensors.clear();
    assert_eq!(
        validate_config(&config),
        Err(ValidationError::Empty { section: "sensors" })
    );
}

#[test]
fn unknown_interface_is_rejected() {
    let mut config = base_config();
    config.sensors.get_mut("cpu").unwrap().interface = "board".into();
    let err = validate_config(&config).unwrap_err();
    assert_eq!(
        err,
        ValidationError::MissingReference {
            id: "board".to_string(),
            context: "sensor 'cpu' interface".to_string()
        }
    );
}

#[test]
fn interval_must_be_positive() {
    let mut config = base_config();
    config.sensors.get_mut("cpu").unwrap().interval_s = 0.0;
    assert!(matches!(
        validate_config(&config),
        Err(ValidationError::InvalidValue { field, .. }) if field == "sensors.cpu.interval_s"
    ));
}

#[test]
fn interval_must_fit_a_duration() {
    for interval in [1e20, f64::INFINITY, 1e-10, -1.0] {
        let mut config = base_config();
        config.sensors.get_mut("cpu").unwrap().interval_s = interval;
        assert!(
            matches!(
                validate_config(&config),
                Err(ValidationError::InvalidValue { ref field, .. }) if field == "sensors.cpu.interval_s"
            ),
            "{interval} accepted"
        );
    }

    let yaml = r#"
interfaces:
  sim: { driver: dummy }
sensors:
  cpu: { interface: sim, interval_s: 1e20 }
fans:
  case:
    interface: sim
    algorithms: { curve: "Quadratic(sensors.cpu, 50, 85)" }
"#;
    assert!(matches!(
        sf_config::from_yaml_str(yaml),
        Err(ConfigError::Validation(ValidationError::InvalidValue { .. }))
    ));

    let mut config = base_config();
    config.sensors.get_mut("cpu").unwrap().interval_s = 0.001;
    assert!(validate_config(&config).is_ok());
    assert_eq!(
        sensor_interval("cpu", &config.sensors["cpu"]).unwrap(),
        MIN_INTERVAL
    );
}

#[test]
fn duty_bounds_are_checked() {
    let mut config = base_config();
    case(&mut config).max_duty = 120;
    assert!(validate_config(&config).is_err());

    let mut config = base_config();
    case(&mut config).min_duty = 60;
    case(&mut config).max_duty = 50;
    let err = validate_config(&config).unwrap_err();
    assert!(err.to_string().contains("min_duty must not exceed max_duty"));
}

#[test]
fn fan_needs_an_algorithm() {
    let mut config = base_config();
    case(&mut config).algorithms.clear();
    assert!(matches!(
        validate_config(&config),
        Err(ValidationError::InvalidValue { field, .. }) if field == "fans.case.algorithms"
    ));
}

#[test]
fn ids_must_be_identifiers() {
    let mut config = base_config();
    let sensor = config.sensors.remove("cpu").unwrap();
    config.sensors.insert("cpu-temp".to_string(), sensor);
    assert!(matches!(
        validate_config(&config),
        Err(ValidationError::InvalidId { .. })
    ));
}

#[test]
fn expressions_are_parsed_and_resolved() {
    let mut config = base_config();
    case(&mut config)
        .algorithms
        .insert("bad".to_string(), "Linear(sensors.cpu, 40".to_string());
    assert!(matches!(
        validate_config(&config),
        Err(ValidationError::Expression { .. })
    ));

    let mut config = base_config();
    case(&mut config)
        .algorithms
        .insert("gpu".to_string(), "Linear(sensors.gpu, 40, 80)".to_string());
    assert_eq!(
        validate_config(&config),
        Err(ValidationError::MissingReference {
            id: "sensor 'gpu'".to_string(),
            context: "fan 'case' algorithm 'gpu'".to_string()
        })
    );

    let mut config = base_config();
    case(&mut config)
        .algorithms
        .insert("cubic".to_string(), "Cubic(sensors.cpu)".to_string());
    assert!(matches!(
        validate_config(&config),
        Err(ValidationError::UnknownAlgorithm { name, .. }) if name == "Cubic"
    ));
}

#[test]
fn overlong_expression_is_rejected() {
    let mut config = base_config();
    case(&mut config)
        .algorithms
        .insert("long".to_string(), format!("Static(50){}", " ".repeat(491)));
    assert!(matches!(
        validate_config(&config),
        Err(ValidationError::Expression {
            source: ParseError::TooLong { len: 501, .. },
            ..
        })
    ));
}
