use std::fs;
use std::path::{Path, PathBuf};

use sf_app::drivers::HwmonInterface;
use sf_app::{FanActuator, FanSpeed, Interface};
use sf_config::Options;
use sf_core::Duty;

/// A fake hwmon directory with two temperature inputs and one fan.
fn hwmon_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sf_app_hwmon_{}_{name}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    for (file, content) in [
        ("temp1_input", "45000\n"),
        ("temp1_label", "Package id 0\n"),
        ("temp2_input", "52500\n"),
        ("pwm1", "128\n"),
        ("pwm1_enable", "2\n"),
        ("fan1_input", "1210\n"),
    ] {
        fs::write(dir.join(file), content).unwrap();
    }
    dir
}

fn path_value(path: &Path) -> serde_yaml::Value {
    serde_yaml::Value::String(path.display().to_string())
}

fn params(entries: &[(&str, serde_yaml::Value)]) -> Options {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn read(path: PathBuf) -> String {
    fs::read_to_string(path).unwrap().trim().to_string()
}

#[tokio::test]
async fn sensors_aggregate_inputs() {
    let dir = hwmon_dir("sensors");
    let interface = HwmonInterface::new();
    let inputs = serde_yaml::Value::Sequence(vec![
        path_value(&dir.join("temp1_input")),
        path_value(&dir.join("temp2_input")),
    ]);

    let hottest = interface
        .sensor(&params(&[("inputs", inputs.clone()), ("label", "cpu".into())]))
        .unwrap();
    let temperature = hottest.temperature().await.unwrap();
    assert_eq!(temperature.value(), 52.5);
    assert_eq!(temperature.label(), "cpu");
    let labels: Vec<&str> = temperature.readings().map(|r| r.label).collect();
    assert_eq!(labels, vec!["Package id 0", "temp2"]);

    let mean = interface
        .sensor(&params(&[("inputs", inputs), ("aggregate", "mean".into())]))
        .unwrap();
    assert_eq!(mean.temperature().await.unwrap().value(), 48.75);

    let single = interface
        .sensor(&params(&[("inputs", path_value(&dir.join("temp2_input")))]))
        .unwrap();
    let temperature = single.temperature().await.unwrap();
    assert_eq!(temperature.label(), "temp2");
    assert_eq!(temperature.value(), 52.5);

    let missing = interface
        .sensor(&params(&[("inputs", path_value(&dir.join("temp9_input")))]))
        .unwrap();
    assert!(missing.temperature().await.is_err());
}

#[tokio::test]
async fn fans_switch_to_manual_and_back() {
    let dir = hwmon_dir("fans");
    let interface = HwmonInterface::new();
    let fan = interface
        .fan(&params(&[
            ("pwm", path_value(&dir.join("pwm1"))),
            (
                "fan_inputs",
                serde_yaml::Value::Sequence(vec![path_value(&dir.join("fan1_input"))]),
            ),
        ]))
        .unwrap();

    assert_eq!(fan.duty().await.unwrap(), Some(Duty::new(50).unwrap()));

    let teardown = interface.setup().await.unwrap();
    assert_eq!(read(dir.join("pwm1_enable")), "1");

    fan.set_duty(Duty::MAX).await.unwrap();
    assert_eq!(read(dir.join("pwm1")), "255");

    fan.refresh().await.unwrap();
    assert_eq!(
        fan.speeds(),
        vec![FanSpeed {
            label: "fan1".to_string(),
            rpm: 1210
        }]
    );

    teardown.await.unwrap();
    assert_eq!(read(dir.join("pwm1_enable")), "2");
}

#[tokio::test]
async fn setup_fails_without_enable_file() {
    let dir = hwmon_dir("no_enable");
    fs::remove_file(dir.join("pwm1_enable")).unwrap();
    let interface = HwmonInterface::new();
    interface
        .fan(&params(&[("pwm", path_value(&dir.join("pwm1")))]))
        .unwrap();
    assert!(interface.setup().await.is_err());
}
