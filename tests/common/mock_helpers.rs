//! Mock construction helpers

use super::builders::ConfigBuilder;
use telemetry_rs::link::ScriptedDevice;
use telemetry_rs::session::{RunningSession, Session};

/// Launch a session against a scripted device with test-friendly settings
pub fn launch(device: &ScriptedDevice, builder: ConfigBuilder) -> RunningSession {
    Session::new(builder.build())
        .launch(Box::new(device.connector()))
        .expect("scripted session should launch")
}

/// Launch with event publishing enabled
pub fn launch_with_events(device: &ScriptedDevice, builder: ConfigBuilder) -> RunningSession {
    Session::new(builder.build())
        .with_events()
        .launch(Box::new(device.connector()))
        .expect("scripted session should launch")
}
