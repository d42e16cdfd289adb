use std::path::PathBuf;

use sf_config::{ConfigError, InterfaceRef, ShutdownPolicy, ValidationError};

fn configs_dir() -> PathBuf {
    let crate_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    crate_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .join("configs")
}

#[test]
fn sample_configs_load_and_validate() {
    for name in ["simulated.yaml", "spinflow.sample.yaml"] {
        let path = configs_dir().join(name);
        let result = sf_config::load(&path);
        assert!(
            result.is_ok(),
            "sample config failed validation: {} => {:?}",
            path.display(),
            result.err()
        );
    }
}

#[test]
fn interface_references_accept_both_forms() {
    let config = sf_config::from_yaml_str(
        r#"
interfaces:
  sim: { driver: dummy }
sensors:
  cpu: { interface: sim, interval_s: 2 }
fans:
  case:
    interface: { id: sim, channel: case }
    algorithms: { fixed: "Static(40)" }
"#,
    )
    .unwrap();

    assert_eq!(config.shutdown, ShutdownPolicy::ForceMax);
    assert_eq!(config.sensors["cpu"].interface, InterfaceRef::Id("sim".to_string()));
    let fan = &config.fans["case"];
    assert_eq!(fan.interface.id(), "sim");
    assert_eq!(
        fan.interface.params().get("channel").and_then(|v| v.as_str()),
        Some("case")
    );
    assert_eq!((fan.min_duty, fan.max_duty), (0, 100));
    assert_eq!(config.min_interval_s(), Some(2.0));
}

#[test]
fn json_is_supported() {
    let config = sf_config::from_json_str(
        r#"{
            "shutdown": "release",
            "interfaces": { "sim": { "driver": "dummy", "temperatures": { "cpu": 40.0 } } },
            "sensors": { "cpu": { "interface": { "id": "sim", "channel": "cpu" }, "interval_s": 0.5 } },
            "fans": { "case": { "interface": "sim", "min_duty": 10, "algorithms": { "c": "Linear(sensors.cpu, 30, 60)" } } }
        }"#,
    )
    .unwrap();
    assert_eq!(config.shutdown, ShutdownPolicy::Release);
    assert!(config.interfaces["sim"].options.contains_key("temperatures"));
}

#[test]
fn invalid_files_report_validation_errors() {
    let err = sf_config::from_yaml_str(
        r#"
sensors:
  cpu: { interface: missing, interval_s: 2 }
fans:
  case: { interface: missing, algorithms: { a: "Static(10)" } }
"#,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Validation(ValidationError::MissingReference { .. })
    ));

    let err = sf_config::from_yaml_str("sensors: [").unwrap_err();
    assert!(matches!(err, ConfigError::Yaml(_)));
}

#[test]
fn yaml_roundtrip() {
    let path = configs_dir().join("simulated.yaml");
    let config = sf_config::load_yaml(&path).unwrap();

    let out = std::env::temp_dir().join("sf_config_roundtrip.yaml");
    sf_config::save_yaml(&out, &config).unwrap();
    let loaded = sf_config::load_yaml(&out).unwrap();
    assert_eq!(config, loaded);
}
