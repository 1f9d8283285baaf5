//! Mock Hardware Implementations
//!
//! Simulated instruments for running the sweep without a bench.
//!
//! # Available Mocks
//!
//! - [`ScriptedTransport`] - SCPI transport that records commands and replays canned
//!   responses, for driver unit tests
//! - [`MockAnalogOutput`] - DAQ analog output with bipolar/unipolar range validation
//! - [`SimulatedBench`] - an [`InstrumentConnector`] wiring a source unit, two
//!   multimeters and the coil output to one shared coil model, with fault injection
//!
//! The bench model: multimeter X reads a Hall probe linear in the coil drive
//! (`0.02 * V`), multimeter Y reads a saturating sample response
//! (`0.05 * tanh(V / 2)`). Optional uniform noise is added to both.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::hardware::capabilities::AnalogOutput;
use crate::hardware::scpi::ScpiTransport;
use crate::hardware::InstrumentConnector;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// ScriptedTransport
// =============================================================================

#[derive(Default)]
struct Script {
    responses: VecDeque<Result<String, String>>,
    sent: Vec<String>,
    failing_prefixes: Vec<String>,
}

/// SCPI transport with canned responses.
///
/// Clones share the same script, so a test can hand one clone to a driver and keep
/// another to inspect what was sent.
///
/// ```rust,ignore
/// let transport = ScriptedTransport::new("GPIB0::02::INSTR").with_response("+1.0E-03");
/// let dmm = Multimeter::new(Box::new(transport.clone()));
/// dmm.read().await?;
/// assert_eq!(transport.sent(), vec!["READ?"]);
/// ```
#[derive(Clone)]
pub struct ScriptedTransport {
    address: String,
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    /// Empty script for `address`.
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// Queue a response for the next query.
    pub fn with_response(self, response: &str) -> Self {
        lock(&self.script)
            .responses
            .push_back(Ok(response.to_string()));
        self
    }

    /// Queue a failure for the next query.
    pub fn with_failure(self, message: &str) -> Self {
        lock(&self.script)
            .responses
            .push_back(Err(message.to_string()));
        self
    }

    /// Reject every command or query starting with `prefix`.
    pub fn failing_command(self, prefix: &str) -> Self {
        lock(&self.script).failing_prefixes.push(prefix.to_string());
        self
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.script).sent.clone()
    }

    fn record(&self, command: &str) -> Result<()> {
        let mut script = lock(&self.script);
        script.sent.push(command.to_string());
        if script
            .failing_prefixes
            .iter()
            .any(|prefix| command.starts_with(prefix.as_str()))
        {
            bail!("{}: instrument rejected '{}'", self.address, command);
        }
        Ok(())
    }
}

#[async_trait]
impl ScpiTransport for ScriptedTransport {
    async fn query(&self, command: &str) -> Result<String> {
        self.record(command)?;
        match lock(&self.script).responses.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!(
                "{}: no scripted response for '{}'",
                self.address,
                command
            )),
        }
    }

    async fn command(&self, command: &str) -> Result<()> {
        self.record(command)
    }

    fn address(&self) -> &str {
        &self.address
    }
}

// =============================================================================
// VoltageRange
// =============================================================================

/// Voltage range for analog output.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum VoltageRange {
    /// -10V to +10V
    #[default]
    Bipolar10V,
    /// -5V to +5V
    Bipolar5V,
    /// 0V to +10V
    Unipolar10V,
    /// 0V to +5V
    Unipolar5V,
}

impl VoltageRange {
    /// Get the minimum voltage for this range.
    pub fn min(&self) -> f64 {
        match self {
            Self::Bipolar10V => -10.0,
            Self::Bipolar5V => -5.0,
            Self::Unipolar10V | Self::Unipolar5V => 0.0,
        }
    }

    /// Get the maximum voltage for this range.
    pub fn max(&self) -> f64 {
        match self {
            Self::Bipolar10V | Self::Unipolar10V => 10.0,
            Self::Bipolar5V | Self::Unipolar5V => 5.0,
        }
    }

    /// Check if a voltage is within this range.
    pub fn contains(&self, voltage: f64) -> bool {
        voltage >= self.min() && voltage <= self.max()
    }

    /// Get a human-readable description of this range.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Bipolar10V => "±10V",
            Self::Bipolar5V => "±5V",
            Self::Unipolar10V => "0-10V",
            Self::Unipolar5V => "0-5V",
        }
    }
}

// =============================================================================
// Shared bench state
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Source,
    MeterX,
    MeterY,
}

#[derive(Default)]
struct BenchState {
    coil_volts: f64,
    output_history: Vec<f64>,
    output_writes: usize,
    failing_output_writes: HashSet<usize>,
    meter_reads: usize,
    failing_reads: HashSet<usize>,
    source_enabled: bool,
    journal: Vec<(String, String)>,
    rejected: Vec<(String, String)>,
    open_handles: usize,
}

/// Counts an open instrument handle for as long as it lives.
struct HandleGuard {
    state: Arc<Mutex<BenchState>>,
}

impl HandleGuard {
    fn acquire(state: &Arc<Mutex<BenchState>>) -> Self {
        lock(state).open_handles += 1;
        Self {
            state: state.clone(),
        }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.open_handles = state.open_handles.saturating_sub(1);
    }
}

// =============================================================================
// MockAnalogOutput - Simulated Analog Output
// =============================================================================

/// Mock DAQ analog output with voltage range validation.
///
/// Writes outside the configured range are rejected like a real DAC driver would.
/// Outputs created by a [`SimulatedBench`] drive the bench's coil model.
pub struct MockAnalogOutput {
    channel: String,
    range: VoltageRange,
    state: Arc<Mutex<BenchState>>,
    _handle: HandleGuard,
}

impl MockAnalogOutput {
    /// Standalone output on `channel`.
    pub fn new(channel: &str, range: VoltageRange) -> Self {
        Self::attached(channel, range, Arc::new(Mutex::new(BenchState::default())))
    }

    fn attached(channel: &str, range: VoltageRange, state: Arc<Mutex<BenchState>>) -> Self {
        let handle = HandleGuard::acquire(&state);
        Self {
            channel: channel.to_string(),
            range,
            state,
            _handle: handle,
        }
    }

    /// Last value successfully written.
    pub fn voltage(&self) -> f64 {
        lock(&self.state).coil_volts
    }

    /// Configured output range.
    pub fn range(&self) -> VoltageRange {
        self.range
    }
}

#[async_trait]
impl AnalogOutput for MockAnalogOutput {
    async fn write_voltage(&self, volts: f64) -> Result<()> {
        let mut state = lock(&self.state);
        state.output_writes += 1;
        let attempt = state.output_writes;
        if state.failing_output_writes.contains(&attempt) {
            bail!("{}: simulated DAC write failure", self.channel);
        }
        if !self.range.contains(volts) {
            bail!(
                "{}: voltage {} V outside range {}",
                self.channel,
                volts,
                self.range.description()
            );
        }
        state.coil_volts = volts;
        state.output_history.push(volts);
        Ok(())
    }

    fn channel(&self) -> &str {
        &self.channel
    }
}

// =============================================================================
// SimulatedTransport
// =============================================================================

struct SimulatedTransport {
    address: String,
    role: Role,
    noise: f64,
    state: Arc<Mutex<BenchState>>,
    _handle: HandleGuard,
}

impl SimulatedTransport {
    fn check_rejected(&self, state: &BenchState, command: &str) -> Result<()> {
        let rejected = state
            .rejected
            .iter()
            .any(|(address, prefix)| address == &self.address && command.starts_with(prefix));
        if rejected {
            bail!("{}: -113 undefined header '{}'", self.address, command);
        }
        Ok(())
    }

    fn measure(&self, coil_volts: f64) -> f64 {
        let ideal = match self.role {
            Role::MeterX => 0.02 * coil_volts,
            Role::MeterY => 0.05 * (coil_volts / 2.0).tanh(),
            Role::Source => 0.0,
        };
        if self.noise > 0.0 {
            ideal + rand::thread_rng().gen_range(-self.noise..self.noise)
        } else {
            ideal
        }
    }
}

#[async_trait]
impl ScpiTransport for SimulatedTransport {
    async fn query(&self, command: &str) -> Result<String> {
        let mut state = lock(&self.state);
        state
            .journal
            .push((self.address.clone(), command.to_string()));
        self.check_rejected(&state, command)?;

        match (self.role, command) {
            (_, "*IDN?") => Ok(format!("SIMULATED,{:?},0,1.0", self.role)),
            (Role::MeterX | Role::MeterY, "READ?") => {
                state.meter_reads += 1;
                if state.failing_reads.contains(&state.meter_reads) {
                    bail!("{}: simulated read timeout", self.address);
                }
                Ok(format!("{:+.6E}", self.measure(state.coil_volts)))
            }
            _ => bail!("{}: unsupported query '{}'", self.address, command),
        }
    }

    async fn command(&self, command: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state
            .journal
            .push((self.address.clone(), command.to_string()));
        self.check_rejected(&state, command)?;

        if self.role == Role::Source {
            match command {
                ":OUTP ON" => state.source_enabled = true,
                ":OUTP OFF" => state.source_enabled = false,
                _ => {}
            }
        }
        Ok(())
    }

    fn address(&self) -> &str {
        &self.address
    }
}

// =============================================================================
// SimulatedBench
// =============================================================================

/// A complete simulated bench.
///
/// Clones share state, so tests keep one clone for inspection after handing the
/// other to a run. Read and write failures are injected by 1-based attempt number
/// counted across the whole run: with paired reads, step `i` performs reads `2i + 1`
/// (meter X) and `2i + 2` (meter Y).
#[derive(Clone)]
pub struct SimulatedBench {
    roles: HashMap<String, Role>,
    unreachable: HashSet<String>,
    output_available: bool,
    range: VoltageRange,
    noise: f64,
    state: Arc<Mutex<BenchState>>,
}

impl SimulatedBench {
    /// Bench answering on the three given addresses.
    pub fn new(source: &str, meter_x: &str, meter_y: &str) -> Self {
        let roles = HashMap::from([
            (source.to_string(), Role::Source),
            (meter_x.to_string(), Role::MeterX),
            (meter_y.to_string(), Role::MeterY),
        ]);
        Self {
            roles,
            unreachable: HashSet::new(),
            output_available: true,
            range: VoltageRange::default(),
            noise: 0.0,
            state: Arc::new(Mutex::new(BenchState::default())),
        }
    }

    /// Make `address` fail to open.
    pub fn with_unreachable(mut self, address: &str) -> Self {
        self.unreachable.insert(address.to_string());
        self
    }

    /// Make the analog output channel fail to open.
    pub fn without_output(mut self) -> Self {
        self.output_available = false;
        self
    }

    /// Voltage range enforced by the coil output.
    pub fn with_range(mut self, range: VoltageRange) -> Self {
        self.range = range;
        self
    }

    /// Uniform measurement noise amplitude in volts.
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude.abs();
        self
    }

    /// Fail the `n`th `READ?` on either meter.
    pub fn fail_read(self, n: usize) -> Self {
        lock(&self.state).failing_reads.insert(n);
        self
    }

    /// Fail the `n`th analog output write.
    pub fn fail_output_write(self, n: usize) -> Self {
        lock(&self.state).failing_output_writes.insert(n);
        self
    }

    /// Reject commands to `address` starting with `prefix`.
    pub fn reject_command(self, address: &str, prefix: &str) -> Self {
        lock(&self.state)
            .rejected
            .push((address.to_string(), prefix.to_string()));
        self
    }

    /// Every value written to the coil output, in order.
    pub fn output_history(&self) -> Vec<f64> {
        lock(&self.state).output_history.clone()
    }

    /// Value currently driven on the coil output.
    pub fn coil_volts(&self) -> f64 {
        lock(&self.state).coil_volts
    }

    /// True while the source output is on.
    pub fn source_enabled(&self) -> bool {
        lock(&self.state).source_enabled
    }

    /// Number of instrument handles currently open.
    pub fn open_handles(&self) -> usize {
        lock(&self.state).open_handles
    }

    /// `READ?` queries answered or failed so far.
    pub fn meter_reads(&self) -> usize {
        lock(&self.state).meter_reads
    }

    /// All `(address, command)` pairs in the order the bench received them.
    pub fn journal(&self) -> Vec<(String, String)> {
        lock(&self.state).journal.clone()
    }

    /// Commands received by one address.
    pub fn commands_to(&self, address: &str) -> Vec<String> {
        lock(&self.state)
            .journal
            .iter()
            .filter(|(to, _)| to == address)
            .map(|(_, command)| command.clone())
            .collect()
    }
}

#[async_trait]
impl InstrumentConnector for SimulatedBench {
    async fn open_transport(&self, address: &str) -> Result<Box<dyn ScpiTransport>> {
        if self.unreachable.contains(address) {
            bail!("VI_ERROR_RSRC_NFOUND: {} did not respond", address);
        }
        let role = *self
            .roles
            .get(address)
            .ok_or_else(|| anyhow!("VI_ERROR_RSRC_NFOUND: no instrument at {}", address))?;
        debug!(address, ?role, "Simulated instrument opened");
        Ok(Box::new(SimulatedTransport {
            address: address.to_string(),
            role,
            noise: self.noise,
            state: self.state.clone(),
            _handle: HandleGuard::acquire(&self.state),
        }))
    }

    async fn open_output(&self, channel_id: &str) -> Result<Box<dyn AnalogOutput>> {
        if !self.output_available {
            bail!("{}: device is reserved by another task", channel_id);
        }
        Ok(Box::new(MockAnalogOutput::attached(
            channel_id,
            self.range,
            self.state.clone(),
        )))
    }
}
