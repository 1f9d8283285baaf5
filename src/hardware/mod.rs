//! Hardware layer
//!
//! Capability traits, SCPI instrument drivers and the transports they run over
//! (VISA on the bench, simulation in tests and dry runs).

/// SCPI-programmed coil output
pub mod analog_output;
/// Capability traits
pub mod capabilities;
/// Simulated instruments
pub mod mock;
/// DC voltmeter driver
pub mod multimeter;
/// SCPI transport seam
pub mod scpi;
/// Source unit driver
pub mod source_meter;
/// VISA transport
pub mod visa;

use anyhow::Result;
use async_trait::async_trait;

pub use capabilities::{AnalogOutput, Readable, SourceMode, SourceOutput, Voltmeter};
pub use mock::SimulatedBench;
pub use scpi::ScpiTransport;
pub use visa::VisaConnector;

/// Opens the physical resources a session needs.
///
/// Addresses and channel identifiers are opaque strings passed through unchanged.
#[async_trait]
pub trait InstrumentConnector: Send + Sync {
    /// Open a SCPI instrument at `address`.
    async fn open_transport(&self, address: &str) -> Result<Box<dyn ScpiTransport>>;

    /// Reserve the analog output channel `channel_id`.
    async fn open_output(&self, channel_id: &str) -> Result<Box<dyn AnalogOutput>>;
}
