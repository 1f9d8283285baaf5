//! Operator form model.
//!
//! The control surface collects every value as text, exactly as typed, and only
//! turns it into a [`RunConfig`] when a run is started. Non-numeric input is rejected
//! before any instrument is touched. [`RunSlot`] keeps a second run from starting
//! while one is active.

use crate::config::RunConfig;
use crate::error::{SweepError, SweepResult};
use crate::hardware::capabilities::SourceMode;
use crate::sequence::RangeSpec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const NUMERIC_ERROR: &str = "Please enter valid numeric values.";

/// Text contents of the operator form.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepForm {
    /// Voltage or current radio selection
    pub source_mode: SourceMode,
    /// Sourcemeter address
    pub source_address: String,
    /// Multimeter 1 address
    pub meter_x_address: String,
    /// Multimeter 2 address
    pub meter_y_address: String,
    /// Source level, volts or amps
    pub source_value: String,
    /// Coarse range start
    pub coarse_min: String,
    /// Coarse range end
    pub coarse_max: String,
    /// Coarse step
    pub coarse_step: String,
    /// Fine range start
    pub fine_start: String,
    /// Fine range end
    pub fine_end: String,
    /// Fine step
    pub fine_step: String,
}

impl Default for SweepForm {
    fn default() -> Self {
        Self::from_config(&RunConfig::default())
    }
}

impl SweepForm {
    /// Prefill the form from a loaded configuration.
    pub fn from_config(config: &RunConfig) -> Self {
        let coarse = config.sweep.coarse;
        let fine = config.sweep.fine;
        Self {
            source_mode: config.source.mode,
            source_address: config.instruments.source.clone(),
            meter_x_address: config.instruments.meter_x.clone(),
            meter_y_address: config.instruments.meter_y.clone(),
            source_value: config.source.value.to_string(),
            coarse_min: format!("{:?}", coarse.start),
            coarse_max: format!("{:?}", coarse.end),
            coarse_step: format!("{:?}", coarse.step),
            fine_start: format!("{:?}", fine.start),
            fine_end: format!("{:?}", fine.end),
            fine_step: format!("{:?}", fine.step),
        }
    }

    /// Labelled numeric fields in display order.
    pub fn numeric_fields_mut(&mut self) -> [(&'static str, &mut String); 7] {
        [
            ("Source Value (V or A):", &mut self.source_value),
            ("Coil Min Voltage (V):", &mut self.coarse_min),
            ("Coil Max Voltage (V):", &mut self.coarse_max),
            ("Coil Voltage Step (V):", &mut self.coarse_step),
            ("Fine Range Start (V):", &mut self.fine_start),
            ("Fine Range End (V):", &mut self.fine_end),
            ("Fine Voltage Step (V):", &mut self.fine_step),
        ]
    }

    /// Labelled address fields in display order.
    pub fn address_fields_mut(&mut self) -> [(&'static str, &mut String); 3] {
        [
            ("Sourcemeter Address:", &mut self.source_address),
            ("Multimeter 1 Address:", &mut self.meter_x_address),
            ("Multimeter 2 Address:", &mut self.meter_y_address),
        ]
    }

    /// Apply the form on top of `base`.
    ///
    /// # Errors
    /// `InputValidation` if any numeric field does not parse, or the resulting
    /// configuration fails validation.
    pub fn to_config(&self, base: &RunConfig) -> SweepResult<RunConfig> {
        let mut config = base.clone();
        config.source.mode = self.source_mode;
        config.source.value = parse_number(&self.source_value)?;
        config.instruments.source = self.source_address.trim().to_string();
        config.instruments.meter_x = self.meter_x_address.trim().to_string();
        config.instruments.meter_y = self.meter_y_address.trim().to_string();
        config.sweep.coarse = RangeSpec::new(
            parse_number(&self.coarse_min)?,
            parse_number(&self.coarse_max)?,
            parse_number(&self.coarse_step)?,
        );
        config.sweep.fine = RangeSpec::new(
            parse_number(&self.fine_start)?,
            parse_number(&self.fine_end)?,
            parse_number(&self.fine_step)?,
        );
        config.validate()?;
        Ok(config)
    }
}

fn parse_number(text: &str) -> SweepResult<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| SweepError::InputValidation(NUMERIC_ERROR.to_string()))
}

/// Admits one run at a time.
#[derive(Debug, Clone, Default)]
pub struct RunSlot {
    busy: Arc<AtomicBool>,
}

/// Held for the length of a run; frees the slot when dropped.
#[derive(Debug)]
pub struct RunTicket {
    busy: Arc<AtomicBool>,
}

impl RunSlot {
    /// An empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot, or `None` if a run is already active.
    pub fn try_begin(&self) -> Option<RunTicket> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunTicket {
                busy: self.busy.clone(),
            })
    }

    /// True while a ticket is held.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
