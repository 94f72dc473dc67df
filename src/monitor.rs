//! Live window consumer
//!
//! Polls the store's live window at a fixed interval and tracks the visible
//! time range a plot of it would show. The range starts at `[0, max_time]`;
//! each time the newest sample passes the current horizon the range jumps to
//! `[horizon, horizon + step]` and the horizon advances by one step.

use crate::config::{BufferConfig, MonitorConfig};
use crate::coordinator::ShutdownSignal;
use crate::store::{StoreReader, WindowSnapshot};
use std::time::Duration;

/// Visible time range of the live display, in device milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayHorizon {
    horizon: u64,
    step: u64,
    visible: (u64, u64),
}

impl DisplayHorizon {
    pub fn new(max_time_ms: u64, step_ms: u64) -> Self {
        Self {
            horizon: max_time_ms,
            step: step_ms,
            visible: (0, max_time_ms),
        }
    }

    /// Current horizon
    pub fn horizon(&self) -> u64 {
        self.horizon
    }

    /// Current visible range
    pub fn visible(&self) -> (u64, u64) {
        self.visible
    }

    /// Advance at most one step if `snapshot` has crossed the horizon
    pub fn update(&mut self, snapshot: &WindowSnapshot) -> bool {
        if !snapshot.crossed(self.horizon) {
            return false;
        }
        let end = self.horizon.saturating_add(self.step);
        self.visible = (self.horizon, end);
        self.horizon = end;
        true
    }
}

/// One poll's view of the live window
#[derive(Debug, Clone, PartialEq)]
pub struct LiveFrame {
    pub window: WindowSnapshot,
    pub visible: (u64, u64),
    /// The visible range moved on this poll
    pub advanced: bool,
}

/// Periodic reader of the live window
pub struct Monitor {
    reader: StoreReader,
    horizon: DisplayHorizon,
    poll_interval: Duration,
}

impl Monitor {
    pub fn new(reader: StoreReader, buffer: &BufferConfig, monitor: &MonitorConfig) -> Self {
        Self {
            reader,
            horizon: DisplayHorizon::new(buffer.max_time_ms, buffer.horizon_step_ms),
            poll_interval: monitor.poll_interval(),
        }
    }

    pub fn horizon(&self) -> &DisplayHorizon {
        &self.horizon
    }

    /// Take one snapshot and update the visible range
    pub fn poll(&mut self) -> LiveFrame {
        let window = self.reader.snapshot_window();
        let advanced = self.horizon.update(&window);
        if advanced {
            let (from, to) = self.horizon.visible();
            tracing::debug!("Display range moved to [{}, {}] ms", from, to);
        }
        LiveFrame {
            window,
            visible: self.horizon.visible(),
            advanced,
        }
    }

    /// Poll until `shutdown` is raised, handing every frame to `on_frame`
    ///
    /// A last frame is taken after shutdown so the callback sees the final
    /// window. Returns the number of frames delivered.
    pub fn run<F>(mut self, shutdown: &ShutdownSignal, mut on_frame: F) -> usize
    where
        F: FnMut(&LiveFrame),
    {
        let mut frames = 0;
        loop {
            let done = shutdown.wait_timeout(self.poll_interval);
            let frame = self.poll();
            on_frame(&frame);
            frames += 1;
            if done {
                break;
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SampleStore;
    use crate::types::Sample;

    fn snapshot_at(timer: Option<u64>) -> WindowSnapshot {
        WindowSnapshot {
            samples: Vec::new(),
            latest_timer: timer,
            capacity: 200,
        }
    }

    #[test]
    fn test_initial_range() {
        let horizon = DisplayHorizon::new(10_000, 20_000);
        assert_eq!(horizon.visible(), (0, 10_000));
        assert_eq!(horizon.horizon(), 10_000);
    }

    #[test]
    fn test_horizon_advances_once_per_update() {
        let mut horizon = DisplayHorizon::new(10_000, 20_000);

        assert!(!horizon.update(&snapshot_at(None)));
        assert!(!horizon.update(&snapshot_at(Some(10_000))));

        assert!(horizon.update(&snapshot_at(Some(10_050))));
        assert_eq!(horizon.visible(), (10_000, 30_000));
        assert_eq!(horizon.horizon(), 30_000);

        // Far past two horizons still moves only one step per poll
        assert!(horizon.update(&snapshot_at(Some(75_000))));
        assert_eq!(horizon.visible(), (30_000, 50_000));
        assert!(horizon.update(&snapshot_at(Some(75_000))));
        assert_eq!(horizon.visible(), (50_000, 70_000));
        assert!(horizon.update(&snapshot_at(Some(75_000))));
        assert_eq!(horizon.visible(), (70_000, 90_000));
        assert_eq!(horizon.horizon(), 90_000);

        // Caught up: the newest timer is inside the visible range
        assert!(!horizon.update(&snapshot_at(Some(75_000))));
        assert!(!horizon.update(&snapshot_at(Some(90_000))));
        assert_eq!(horizon.visible(), (70_000, 90_000));
    }

    #[test]
    fn test_poll_reflects_store() {
        let buffer = BufferConfig::default();
        let (mut writer, reader) = SampleStore::open(&buffer).unwrap();
        let mut monitor = Monitor::new(reader, &buffer, &MonitorConfig::default());

        writer.append(Sample::new(1.0, 2.0, 50));
        writer.append(Sample::new(1.0, 2.0, 10_010));

        let frame = monitor.poll();
        assert_eq!(frame.window.len(), 1);
        assert!(frame.advanced);
        assert_eq!(frame.visible, (10_000, 30_000));

        let frame = monitor.poll();
        assert!(!frame.advanced);
    }
}
