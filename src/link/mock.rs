//! Scripted in-memory device for testing and simulation
//!
//! A [`ScriptedDevice`] replays a list of [`ScriptStep`]s through the same
//! [`Transport`] interface the serial link uses, so the acquisition loop and
//! coordinator can be exercised without hardware.
//!
//! # Features
//!
//! - **Open failures**: fail the first N opens to exercise retry
//! - **Stale input**: bytes present before open that the link manager must discard
//! - **Start gating**: hold back the stream until the start command arrives
//! - **Stop reaction**: steps appended when the stop command arrives
//! - **Command capture**: every byte written to the device is recorded
//!
//! # Example
//!
//! ```ignore
//! let device = ScriptedDevice::new()
//!     .failing_opens(2)
//!     .with_lines(["10.0,20.0,0", "10.5,21.0,50", "Fim"]);
//!
//! let mut manager = LinkManager::new(Box::new(device.connector()), policy);
//! let link = manager.open("sim", 921_600)?;
//! assert_eq!(device.open_attempts(), 3);
//! ```

use super::{CommandSink, Connector, ReadStatus, Transport};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Start command byte
const START_COMMAND: u8 = b's';

/// Stop command byte
const STOP_COMMAND: u8 = b'e';

/// How long a read blocks when the script has nothing to deliver
const IDLE_READ_DELAY: Duration = Duration::from_millis(1);

/// One scripted transport event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Deliver a complete line (terminator added if missing)
    Line(Vec<u8>),
    /// Deliver a read timeout
    Pending,
    /// Fail the read with this message
    Fail(String),
    /// Report end of stream
    Eof,
}

impl ScriptStep {
    /// Create a line step from text
    pub fn line(text: impl AsRef<str>) -> Self {
        let mut bytes = text.as_ref().as_bytes().to_vec();
        if bytes.last() != Some(&b'\n') {
            bytes.push(b'\n');
        }
        ScriptStep::Line(bytes)
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    steps: VecDeque<ScriptStep>,
    stale: VecDeque<ScriptStep>,
    on_stop: Vec<ScriptStep>,
    commands: Vec<u8>,
    open_failures: u32,
    open_attempts: u32,
    require_start: bool,
    halt_on_stop: bool,
    started: bool,
    stopped: bool,
    fail_writes: bool,
    line_delay: Duration,
}

/// Handle to a scripted device; clones share the same device
#[derive(Debug, Clone, Default)]
pub struct ScriptedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl ScriptedDevice {
    /// Create an empty device that idles forever once its script is consumed
    pub fn new() -> Self {
        Self::default()
    }

    /// Append lines to the script
    pub fn with_lines<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        {
            let mut state = self.lock();
            state.steps.extend(lines.into_iter().map(ScriptStep::line));
        }
        self
    }

    /// Append a single step to the script
    pub fn with_step(self, step: ScriptStep) -> Self {
        self.lock().steps.push_back(step);
        self
    }

    /// Input already buffered when the port is opened
    pub fn with_stale_input<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        {
            let mut state = self.lock();
            state.stale.extend(lines.into_iter().map(ScriptStep::line));
        }
        self
    }

    /// Fail the first `count` open attempts
    pub fn failing_opens(self, count: u32) -> Self {
        self.lock().open_failures = count;
        self
    }

    /// Hold the script back until the start command is received
    pub fn requiring_start(self) -> Self {
        self.lock().require_start = true;
        self
    }

    /// Drop the rest of the script when the stop command is received
    ///
    /// Matches firmware that goes silent on stop without an end-of-run marker.
    pub fn halting_on_stop(self) -> Self {
        self.lock().halt_on_stop = true;
        self
    }

    /// Steps appended to the script when the stop command is received
    pub fn on_stop<I>(self, steps: I) -> Self
    where
        I: IntoIterator<Item = ScriptStep>,
    {
        self.lock().on_stop.extend(steps);
        self
    }

    /// Make every command write fail
    pub fn failing_writes(self) -> Self {
        self.lock().fail_writes = true;
        self
    }

    /// Delay before each scripted line is delivered
    pub fn with_line_delay(self, delay: Duration) -> Self {
        self.lock().line_delay = delay;
        self
    }

    /// Script a run the way the device firmware reports it
    ///
    /// One record every `step_ms` of device time up to `duration_ms`, a constant
    /// duty cycle, a slowly turning angle, and the end-of-run marker. A stop
    /// command silences the rest of the run.
    pub fn simulated_run(duration_ms: u64, step_ms: u64) -> Self {
        let step_ms = step_ms.max(1);
        let lines = (0..=duration_ms).step_by(step_ms as usize).map(|t| {
            let angle = -(t as f64) * 0.036;
            format!("{:.4},{:.4},{},", angle, 30.0, t)
        });
        Self::new()
            .requiring_start()
            .halting_on_stop()
            .with_lines(lines)
            .with_lines(["I (0) encoder: Fim"])
    }

    /// Get a connector that opens this device
    pub fn connector(&self) -> ScriptedConnector {
        ScriptedConnector {
            device: self.clone(),
        }
    }

    /// All command bytes received so far
    pub fn commands(&self) -> Vec<u8> {
        self.lock().commands.clone()
    }

    /// Number of open attempts made
    pub fn open_attempts(&self) -> u32 {
        self.lock().open_attempts
    }

    /// Number of script steps not yet delivered
    pub fn remaining_steps(&self) -> usize {
        self.lock().steps.len()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn receive_command(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted write failure"));
        }
        state.commands.extend_from_slice(bytes);
        for &byte in bytes {
            match byte {
                START_COMMAND => state.started = true,
                STOP_COMMAND if !state.stopped => {
                    state.stopped = true;
                    if state.halt_on_stop {
                        state.steps.clear();
                    }
                    let reaction = std::mem::take(&mut state.on_stop);
                    state.steps.extend(reaction);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn next_step(&self) -> (Option<ScriptStep>, Duration) {
        let mut state = self.lock();
        if let Some(stale) = state.stale.pop_front() {
            return (Some(stale), Duration::ZERO);
        }
        if state.require_start && !state.started {
            return (None, IDLE_READ_DELAY);
        }
        let delay = state.line_delay;
        (state.steps.pop_front(), delay)
    }
}

/// Connector for a [`ScriptedDevice`]
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    device: ScriptedDevice,
}

impl Connector for ScriptedConnector {
    fn open(&mut self, address: &str, _baud_rate: u32) -> io::Result<Box<dyn Transport>> {
        let mut state = self.device.lock();
        state.open_attempts += 1;
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("scripted device {} not present", address),
            ));
        }
        drop(state);

        Ok(Box::new(ScriptedTransport {
            device: self.device.clone(),
        }))
    }
}

/// Transport over a [`ScriptedDevice`]
struct ScriptedTransport {
    device: ScriptedDevice,
}

impl Transport for ScriptedTransport {
    fn read_line(&mut self) -> io::Result<ReadStatus> {
        let (step, delay) = self.device.next_step();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        match step {
            Some(ScriptStep::Line(bytes)) => Ok(ReadStatus::Line(bytes)),
            Some(ScriptStep::Pending) => Ok(ReadStatus::Pending),
            Some(ScriptStep::Fail(message)) => Err(io::Error::new(io::ErrorKind::BrokenPipe, message)),
            Some(ScriptStep::Eof) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "scripted end of stream",
            )),
            None => {
                std::thread::sleep(IDLE_READ_DELAY);
                Ok(ReadStatus::Pending)
            }
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.device.lock().stale.clear();
        Ok(())
    }

    fn command_sink(&self) -> io::Result<Box<dyn CommandSink>> {
        Ok(Box::new(ScriptedCommandSink {
            device: self.device.clone(),
        }))
    }
}

struct ScriptedCommandSink {
    device: ScriptedDevice,
}

impl CommandSink for ScriptedCommandSink {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.device.receive_command(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(device: &ScriptedDevice) -> Box<dyn Transport> {
        device.connector().open("sim", 9600).unwrap()
    }

    #[test]
    fn test_lines_get_terminators() {
        assert_eq!(ScriptStep::line("a"), ScriptStep::Line(b"a\n".to_vec()));
        assert_eq!(ScriptStep::line("a\n"), ScriptStep::Line(b"a\n".to_vec()));
    }

    #[test]
    fn test_failing_opens() {
        let device = ScriptedDevice::new().failing_opens(2);
        let mut connector = device.connector();
        assert!(connector.open("sim", 9600).is_err());
        assert!(connector.open("sim", 9600).is_err());
        assert!(connector.open("sim", 9600).is_ok());
        assert_eq!(device.open_attempts(), 3);
    }

    #[test]
    fn test_start_gating() {
        let device = ScriptedDevice::new().requiring_start().with_lines(["1,2,3"]);
        let mut transport = open(&device);
        let mut sink = transport.command_sink().unwrap();

        assert_eq!(transport.read_line().unwrap(), ReadStatus::Pending);
        sink.send(b"s").unwrap();
        assert_eq!(
            transport.read_line().unwrap(),
            ReadStatus::Line(b"1,2,3\n".to_vec())
        );
    }

    #[test]
    fn test_stop_reaction_runs_once() {
        let device = ScriptedDevice::new().on_stop([ScriptStep::line("Fim")]);
        let mut sink = open(&device).command_sink().unwrap();

        sink.send(b"e").unwrap();
        sink.send(b"e").unwrap();
        assert_eq!(device.remaining_steps(), 1);
        assert_eq!(device.commands(), b"ee".to_vec());
    }

    #[test]
    fn test_halting_on_stop() {
        let device = ScriptedDevice::new()
            .halting_on_stop()
            .with_lines(["1,2,3", "4,5,6"])
            .on_stop([ScriptStep::Eof]);
        let mut transport = open(&device);

        transport.command_sink().unwrap().send(b"e").unwrap();
        assert_eq!(device.remaining_steps(), 1);
        assert!(transport.read_line().is_err());
    }

    #[test]
    fn test_simulated_run_shape() {
        let device = ScriptedDevice::simulated_run(100, 50);
        // 0, 50, 100 and the end marker
        assert_eq!(device.remaining_steps(), 4);
    }

    #[test]
    fn test_failing_writes() {
        let device = ScriptedDevice::new().failing_writes();
        let mut sink = open(&device).command_sink().unwrap();
        assert!(sink.send(b"s").is_err());
        assert!(device.commands().is_empty());
    }
}
