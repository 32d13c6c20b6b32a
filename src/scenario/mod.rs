//! The scenario engine: a `Scenario` trait, a static catalog mapping
//! registered names to constructors, and the orchestration loop shared by
//! every concrete scenario (§4.5, §9 — "each concrete scenario is a value,
//! never a subclass").

mod catalog;
mod engine;
mod soc;

pub use catalog::{catalog, lookup};
pub use engine::run;
pub use soc::SocIntegrator;

use crate::config::Mode;
use crate::domain::events::Event;

/// Inputs available to a scenario when it is asked for one step's readings
/// or id_tag choice. `step` is 0-based; `cp_index` is this CP's position in
/// the run's CP list, stable for the whole run.
#[derive(Debug, Clone, Copy)]
pub struct StepContext {
    pub mode: Mode,
    pub step: u32,
    pub duration: u32,
    pub cp_index: usize,
}

/// One MeterValues sample set. `current_a` and `voltage_v` are derived by
/// most scenarios from `power_kw` via [`current_from_power`]; scenarios that
/// manipulate voltage or current independently (voltage sag, MITM) set them
/// directly.
#[derive(Debug, Clone, Copy)]
pub struct Readings {
    pub power_kw: f64,
    pub current_a: f64,
    pub voltage_v: f64,
}

pub fn current_from_power(power_kw: f64, voltage_v: f64) -> f64 {
    if voltage_v.abs() < f64::EPSILON {
        return 0.0;
    }
    (power_kw * 1000.0) / voltage_v
}

/// A named scenario: configuration plus the two behaviors described in
/// §4.5 — produce readings for a step, and label an observed event.
pub trait Scenario: Send + Sync {
    fn name(&self) -> &'static str;

    fn battery_capacity_kwh(&self) -> f64;

    fn nominal_voltage(&self) -> f64 {
        230.0
    }

    /// Produces this step's MeterValues reading for one CP.
    fn readings(&self, ctx: &StepContext) -> Readings;

    /// Classifies an already-observed event for the unified CSV table.
    /// Normal mode is always `"normal"`, per §4.6; scenarios only need to
    /// implement [`Scenario::attack_label`].
    fn label(&self, event: &Event, mode: Mode) -> String {
        match mode {
            Mode::Normal => "normal".to_string(),
            Mode::Attack => self.attack_label(event),
        }
    }

    fn attack_label(&self, event: &Event) -> String;

    /// The step (0-based) at which this scenario synchronously stops every
    /// active transaction, if any (mass-stop / remote-command-spoof style
    /// scenarios). `None` means transactions run their natural course.
    fn sync_stop_step(&self, _duration: u32) -> Option<u32> {
        None
    }

    /// Delay to sleep before issuing this step's MeterValues send.
    /// Used by latency/DoS-style scenarios to model a degrading link.
    fn send_delay(&self, _ctx: &StepContext) -> std::time::Duration {
        std::time::Duration::ZERO
    }

    /// The id_tag this CP should authorize and start a transaction with.
    /// Dark-profile-style scenarios rotate across several tags; everything
    /// else uses a fixed one.
    fn id_tag_for(&self, _cp_index: usize, _step: u32) -> String {
        "DRIVER_ALPHA".to_string()
    }
}
