//! sf-app: runtime layer for spinflow.
//!
//! Connects the duty engine in `sf-controls` to real (or simulated) hardware:
//! - [`interface`] defines the traits drivers implement
//! - [`drivers`] ships the `dummy` and `hwmon` drivers plus a dry-run wrapper
//! - [`builder::ControllerBuilder`] turns a configuration into a [`Controller`]
//! - [`controller::Controller`] polls sensors and drives fans until stopped
//! - [`status`] renders live status; [`simulate`] sweeps a single algorithm

pub mod builder;
pub mod controller;
pub mod drivers;
pub mod error;
pub mod fan;
pub mod interface;
pub mod sensor;
pub mod simulate;
pub mod status;

pub use builder::ControllerBuilder;
pub use controller::{Controller, ControllerState, Cycle, CycleObserver, FanUpdate};
pub use error::{AppError, AppResult, DriverError, DriverResult};
pub use fan::FanController;
pub use interface::{FanActuator, FanSpeed, Interface, Teardown, TemperatureSource, no_teardown};
pub use sensor::Sensor;
pub use simulate::{CurvePoint, MAX_SWEEP_POINTS, simulate_curve, sweep};
pub use status::{ControllerStatus, FanStatus, SensorStatus, StatusHandle};
