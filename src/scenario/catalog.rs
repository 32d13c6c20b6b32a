//! The scenario catalog (§4.6): one value type per registered name, each
//! implementing [`Scenario`]. `catalog()` is the static registry the CLI and
//! the engine resolve `--scenario` names against.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

use crate::config::Mode;
use crate::domain::events::Event;

use super::{current_from_power, Readings, Scenario, StepContext};

/// Bounded, zero-mean noise approximating the "small Gaussian-like jitter"
/// called for in §4.6's normal-mode description, without pulling in
/// `rand_distr` for a single use site.
fn jitter(scale: f64) -> f64 {
    let mut rng = rand::thread_rng();
    (rng.gen::<f64>() + rng.gen::<f64>() + rng.gen::<f64>() - 1.5) * scale
}

/// Oscillatory load (`dalgali_yuk`): `P(t) = P0 + A*sin(2*pi*f*t) + noise`.
pub struct OscillatoryLoad {
    pub base_power_kw: f64,
    pub attack_amplitude_kw: f64,
    pub attack_frequency_hz: f64,
    pub voltage_v: f64,
    pub battery_capacity_kwh: f64,
}

impl Default for OscillatoryLoad {
    fn default() -> Self {
        Self {
            base_power_kw: 7.0,
            attack_amplitude_kw: 3.0,
            attack_frequency_hz: 0.25,
            voltage_v: 230.0,
            battery_capacity_kwh: 40.0,
        }
    }
}

impl Scenario for OscillatoryLoad {
    fn name(&self) -> &'static str {
        "dalgali_yuk"
    }

    fn battery_capacity_kwh(&self) -> f64 {
        self.battery_capacity_kwh
    }

    fn nominal_voltage(&self) -> f64 {
        self.voltage_v
    }

    fn readings(&self, ctx: &StepContext) -> Readings {
        let power_kw = match ctx.mode {
            Mode::Normal => self.base_power_kw + jitter(0.3),
            Mode::Attack => {
                let phase = 2.0 * std::f64::consts::PI * self.attack_frequency_hz * ctx.step as f64;
                self.base_power_kw + self.attack_amplitude_kw * phase.sin() + jitter(0.2)
            }
        };
        let voltage_v = self.voltage_v + jitter(0.5);
        Readings {
            power_kw,
            current_a: current_from_power(power_kw, voltage_v),
            voltage_v,
        }
    }

    fn attack_label(&self, _event: &Event) -> String {
        "oscillatory_load_attack".to_string()
    }
}

/// Voltage sag (`seher_anomali`): random drops to 0.7*V_nominal.
pub struct VoltageSag {
    pub base_power_kw: f64,
    pub voltage_v: f64,
    pub attack_trigger_ratio: f64,
    pub battery_capacity_kwh: f64,
}

impl Default for VoltageSag {
    fn default() -> Self {
        Self {
            base_power_kw: 7.0,
            voltage_v: 230.0,
            attack_trigger_ratio: 0.15,
            battery_capacity_kwh: 40.0,
        }
    }
}

impl Scenario for VoltageSag {
    fn name(&self) -> &'static str {
        "seher_anomali"
    }

    fn battery_capacity_kwh(&self) -> f64 {
        self.battery_capacity_kwh
    }

    fn nominal_voltage(&self) -> f64 {
        self.voltage_v
    }

    fn readings(&self, ctx: &StepContext) -> Readings {
        let power_kw = self.base_power_kw + jitter(0.3);
        let voltage_v = match ctx.mode {
            Mode::Normal => self.voltage_v + jitter(1.0),
            Mode::Attack => {
                if rand::thread_rng().gen_bool(self.attack_trigger_ratio) {
                    self.voltage_v * 0.7
                } else {
                    self.voltage_v + jitter(1.0)
                }
            }
        };
        Readings {
            power_kw,
            current_a: current_from_power(power_kw, voltage_v),
            voltage_v,
        }
    }

    fn attack_label(&self, _event: &Event) -> String {
        "voltage_sag_attack".to_string()
    }
}

/// Stealthy drift (`sfed`): each CP picks one per-run multiplicative drift
/// ratio and keeps it for the whole run.
pub struct StealthyDrift {
    pub base_power_kw: f64,
    pub voltage_v: f64,
    pub drift_min: f64,
    pub drift_max: f64,
    pub battery_capacity_kwh: f64,
    drift_ratios: Mutex<HashMap<usize, f64>>,
}

impl Default for StealthyDrift {
    fn default() -> Self {
        Self {
            base_power_kw: 7.0,
            voltage_v: 230.0,
            drift_min: 0.005,
            drift_max: 0.02,
            battery_capacity_kwh: 40.0,
            drift_ratios: Mutex::new(HashMap::new()),
        }
    }
}

impl StealthyDrift {
    fn drift_for(&self, cp_index: usize) -> f64 {
        *self
            .drift_ratios
            .lock()
            .unwrap()
            .entry(cp_index)
            .or_insert_with(|| rand::thread_rng().gen_range(self.drift_min..self.drift_max))
    }
}

impl Scenario for StealthyDrift {
    fn name(&self) -> &'static str {
        "sfed"
    }

    fn battery_capacity_kwh(&self) -> f64 {
        self.battery_capacity_kwh
    }

    fn nominal_voltage(&self) -> f64 {
        self.voltage_v
    }

    fn readings(&self, ctx: &StepContext) -> Readings {
        let power_kw = match ctx.mode {
            Mode::Normal => self.base_power_kw + jitter(0.3),
            Mode::Attack => {
                let drift = self.drift_for(ctx.cp_index);
                self.base_power_kw * (1.0 + drift) + jitter(0.1)
            }
        };
        let voltage_v = self.voltage_v + jitter(0.5);
        Readings {
            power_kw,
            current_a: current_from_power(power_kw, voltage_v),
            voltage_v,
        }
    }

    fn attack_label(&self, _event: &Event) -> String {
        "sfed_attack".to_string()
    }
}

/// Shared body for the mass-stop / remote-command-spoof pair: identical
/// power model and sync-stop timing, differing only in registered name and
/// attack label (§4.6).
struct SyncStopBody {
    base_power_kw: f64,
    voltage_v: f64,
    battery_capacity_kwh: f64,
}

impl Default for SyncStopBody {
    fn default() -> Self {
        Self {
            base_power_kw: 7.0,
            voltage_v: 230.0,
            battery_capacity_kwh: 40.0,
        }
    }
}

impl SyncStopBody {
    fn readings(&self, _ctx: &StepContext) -> Readings {
        let power_kw = self.base_power_kw + jitter(0.3);
        let voltage_v = self.voltage_v + jitter(0.5);
        Readings {
            power_kw,
            current_a: current_from_power(power_kw, voltage_v),
            voltage_v,
        }
    }

    fn sync_stop_step(&self, duration: u32) -> Option<u32> {
        Some((duration as f64 * 0.6).ceil() as u32)
    }
}

/// Mass transaction termination (`sebeke_istikrarsizligi`).
#[derive(Default)]
pub struct MassStop(SyncStopBody);

impl Scenario for MassStop {
    fn name(&self) -> &'static str {
        "sebeke_istikrarsizligi"
    }

    fn battery_capacity_kwh(&self) -> f64 {
        self.0.battery_capacity_kwh
    }

    fn nominal_voltage(&self) -> f64 {
        self.0.voltage_v
    }

    fn readings(&self, ctx: &StepContext) -> Readings {
        self.0.readings(ctx)
    }

    fn sync_stop_step(&self, duration: u32) -> Option<u32> {
        self.0.sync_stop_step(duration)
    }

    fn attack_label(&self, _event: &Event) -> String {
        "mass_transaction_termination_attack".to_string()
    }
}

/// Remote command spoofing (`uzaktan_komut_taklidi`).
#[derive(Default)]
pub struct RemoteCommandSpoof(SyncStopBody);

impl Scenario for RemoteCommandSpoof {
    fn name(&self) -> &'static str {
        "uzaktan_komut_taklidi"
    }

    fn battery_capacity_kwh(&self) -> f64 {
        self.0.battery_capacity_kwh
    }

    fn nominal_voltage(&self) -> f64 {
        self.0.voltage_v
    }

    fn readings(&self, ctx: &StepContext) -> Readings {
        self.0.readings(ctx)
    }

    fn sync_stop_step(&self, duration: u32) -> Option<u32> {
        self.0.sync_stop_step(duration)
    }

    fn attack_label(&self, _event: &Event) -> String {
        "remote_command_spoofing_attack".to_string()
    }
}

/// Reverse power / relay attack (`reverse_charging`): negative power plus
/// induced send latency.
pub struct ReverseCharging {
    pub base_power_kw: f64,
    pub voltage_v: f64,
    pub relay_latency_ms: u64,
    pub battery_capacity_kwh: f64,
}

impl Default for ReverseCharging {
    fn default() -> Self {
        Self {
            base_power_kw: 7.0,
            voltage_v: 230.0,
            relay_latency_ms: 500,
            battery_capacity_kwh: 40.0,
        }
    }
}

impl Scenario for ReverseCharging {
    fn name(&self) -> &'static str {
        "reverse_charging"
    }

    fn battery_capacity_kwh(&self) -> f64 {
        self.battery_capacity_kwh
    }

    fn nominal_voltage(&self) -> f64 {
        self.voltage_v
    }

    fn readings(&self, ctx: &StepContext) -> Readings {
        let power_kw = match ctx.mode {
            Mode::Normal => self.base_power_kw + jitter(0.3),
            Mode::Attack => -self.base_power_kw + jitter(0.5),
        };
        let voltage_v = self.voltage_v + jitter(0.5);
        Readings {
            power_kw,
            current_a: current_from_power(power_kw, voltage_v),
            voltage_v,
        }
    }

    fn send_delay(&self, ctx: &StepContext) -> Duration {
        match ctx.mode {
            Mode::Normal => Duration::ZERO,
            Mode::Attack => Duration::from_millis(self.relay_latency_ms),
        }
    }

    fn attack_label(&self, event: &Event) -> String {
        match event {
            Event::MeterValues(e) if e.power_kw().unwrap_or(0.0) < 0.0 => {
                "reverse_charging_anomaly".to_string()
            }
            _ => "relay_attack_latency".to_string(),
        }
    }
}

/// Latency/DoS (`latency_dos`): a growing sleep before every send.
pub struct LatencyDos {
    pub base_power_kw: f64,
    pub voltage_v: f64,
    pub battery_capacity_kwh: f64,
}

impl Default for LatencyDos {
    fn default() -> Self {
        Self {
            base_power_kw: 7.0,
            voltage_v: 230.0,
            battery_capacity_kwh: 40.0,
        }
    }
}

impl Scenario for LatencyDos {
    fn name(&self) -> &'static str {
        "latency_dos"
    }

    fn battery_capacity_kwh(&self) -> f64 {
        self.battery_capacity_kwh
    }

    fn nominal_voltage(&self) -> f64 {
        self.voltage_v
    }

    fn readings(&self, _ctx: &StepContext) -> Readings {
        let power_kw = self.base_power_kw + jitter(0.3);
        let voltage_v = self.voltage_v + jitter(0.5);
        Readings {
            power_kw,
            current_a: current_from_power(power_kw, voltage_v),
            voltage_v,
        }
    }

    fn send_delay(&self, ctx: &StepContext) -> Duration {
        match ctx.mode {
            Mode::Normal => Duration::ZERO,
            Mode::Attack => Duration::from_millis(1500 + 150 * ctx.step as u64),
        }
    }

    fn attack_label(&self, _event: &Event) -> String {
        "latency_dos_attack".to_string()
    }
}

/// Dark profile (`karanlik_profil`): rotates charging identity across
/// several id_tags; the physical trace is untouched, so MeterValues stays
/// `normal` even in attack mode.
pub struct DarkProfile {
    pub base_power_kw: f64,
    pub voltage_v: f64,
    pub battery_capacity_kwh: f64,
    pub id_tags: Vec<String>,
}

impl Default for DarkProfile {
    fn default() -> Self {
        Self {
            base_power_kw: 7.0,
            voltage_v: 230.0,
            battery_capacity_kwh: 40.0,
            id_tags: vec![
                "DRIVER_ALPHA".to_string(),
                "DRIVER_BRAVO".to_string(),
                "TEST123".to_string(),
            ],
        }
    }
}

impl Scenario for DarkProfile {
    fn name(&self) -> &'static str {
        "karanlik_profil"
    }

    fn battery_capacity_kwh(&self) -> f64 {
        self.battery_capacity_kwh
    }

    fn nominal_voltage(&self) -> f64 {
        self.voltage_v
    }

    fn readings(&self, _ctx: &StepContext) -> Readings {
        let power_kw = self.base_power_kw + jitter(0.3);
        let voltage_v = self.voltage_v + jitter(0.5);
        Readings {
            power_kw,
            current_a: current_from_power(power_kw, voltage_v),
            voltage_v,
        }
    }

    fn id_tag_for(&self, cp_index: usize, step: u32) -> String {
        let idx = (cp_index as u32 + step) as usize % self.id_tags.len();
        self.id_tags[idx].clone()
    }

    fn label(&self, event: &Event, mode: Mode) -> String {
        if mode == Mode::Normal {
            return "normal".to_string();
        }
        match event {
            Event::Authorize(_) | Event::StartTransaction(_) | Event::StopTransaction(_) => {
                "dark_profile_attack".to_string()
            }
            _ => "normal".to_string(),
        }
    }

    fn attack_label(&self, _event: &Event) -> String {
        "dark_profile_attack".to_string()
    }
}

/// MITM manipulation (`mitm_attack`): replaces a sample with a spike or a
/// zero at a configured probability; untouched samples stay `normal`.
pub struct MitmAttack {
    pub base_power_kw: f64,
    pub voltage_v: f64,
    pub manipulation_probability: f64,
    pub battery_capacity_kwh: f64,
}

impl Default for MitmAttack {
    fn default() -> Self {
        Self {
            base_power_kw: 7.0,
            voltage_v: 230.0,
            manipulation_probability: 0.2,
            battery_capacity_kwh: 40.0,
        }
    }
}

impl Scenario for MitmAttack {
    fn name(&self) -> &'static str {
        "mitm_attack"
    }

    fn battery_capacity_kwh(&self) -> f64 {
        self.battery_capacity_kwh
    }

    fn nominal_voltage(&self) -> f64 {
        self.voltage_v
    }

    fn readings(&self, ctx: &StepContext) -> Readings {
        let nominal_power = self.base_power_kw + jitter(0.3);
        let nominal_voltage = self.voltage_v + jitter(0.5);

        if ctx.mode == Mode::Normal
            || !rand::thread_rng().gen_bool(self.manipulation_probability)
        {
            return Readings {
                power_kw: nominal_power,
                current_a: current_from_power(nominal_power, nominal_voltage),
                voltage_v: nominal_voltage,
            };
        }

        if rand::thread_rng().gen_bool(0.5) {
            let spike_factor = rand::thread_rng().gen_range(5.0..10.0);
            let power_kw = self.base_power_kw * spike_factor;
            let voltage_v = self.voltage_v * 1.5;
            Readings {
                power_kw,
                current_a: current_from_power(power_kw, voltage_v),
                voltage_v,
            }
        } else {
            Readings {
                power_kw: 0.0,
                current_a: 0.0,
                voltage_v: 0.0,
            }
        }
    }

    /// A sample is only flagged if its observed values are outside the
    /// nominal band; most attack-mode rows are untouched and stay `normal`.
    fn label(&self, event: &Event, mode: Mode) -> String {
        if mode == Mode::Normal {
            return "normal".to_string();
        }
        match event {
            Event::MeterValues(e) => {
                let power_kw = e.power_kw().unwrap_or(0.0);
                let voltage_v = e.voltage_v().unwrap_or(self.voltage_v);
                let is_spike = power_kw > self.base_power_kw * 3.0 || voltage_v > self.voltage_v * 1.3;
                let is_zeroed = power_kw.abs() < 1e-9 && voltage_v.abs() < 1e-9;
                if is_spike || is_zeroed {
                    "mitm_attack".to_string()
                } else {
                    "normal".to_string()
                }
            }
            _ => "normal".to_string(),
        }
    }

    fn attack_label(&self, _event: &Event) -> String {
        "mitm_attack".to_string()
    }
}

/// All registered scenarios, keyed by their CLI name.
pub fn catalog() -> Vec<Box<dyn Scenario>> {
    vec![
        Box::new(OscillatoryLoad::default()),
        Box::new(VoltageSag::default()),
        Box::new(StealthyDrift::default()),
        Box::new(MassStop::default()),
        Box::new(RemoteCommandSpoof::default()),
        Box::new(ReverseCharging::default()),
        Box::new(LatencyDos::default()),
        Box::new(DarkProfile::default()),
        Box::new(MitmAttack::default()),
    ]
}

/// Resolves a registered name to a fresh scenario instance.
pub fn lookup(name: &str) -> Option<Box<dyn Scenario>> {
    catalog().into_iter().find(|s| s.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_nine_scenarios_with_unique_names() {
        let scenarios = catalog();
        assert_eq!(scenarios.len(), 9);
        let mut names: Vec<&str> = scenarios.iter().map(|s| s.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 9);
    }

    #[test]
    fn lookup_finds_a_registered_scenario() {
        assert!(lookup("dalgali_yuk").is_some());
        assert!(lookup("not_a_scenario").is_none());
    }

    #[test]
    fn normal_mode_label_is_always_normal() {
        let scenario = OscillatoryLoad::default();
        let event = Event::Heartbeat(crate::domain::events::HeartbeatEvent {
            cp_id: "CP_001".to_string(),
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(scenario.label(&event, Mode::Normal), "normal");
    }

    #[test]
    fn attack_mode_power_swings_at_least_five_kw_peak_to_peak_over_ten_steps() {
        let scenario = OscillatoryLoad::default();
        let (mut min_kw, mut max_kw) = (f64::INFINITY, f64::NEG_INFINITY);
        for step in 0..10u32 {
            let ctx = StepContext {
                mode: Mode::Attack,
                step,
                duration: 10,
                cp_index: 0,
            };
            let power_kw = scenario.readings(&ctx).power_kw;
            min_kw = min_kw.min(power_kw);
            max_kw = max_kw.max(power_kw);
        }
        assert!(
            max_kw - min_kw >= 5.0,
            "peak-to-peak swing {} fell short of the 2*A - 1 = 5 kW acceptance floor",
            max_kw - min_kw
        );
    }

    #[test]
    fn mass_stop_and_remote_spoof_share_timing_but_differ_in_label() {
        let mass_stop = MassStop::default();
        let spoof = RemoteCommandSpoof::default();
        assert_eq!(mass_stop.sync_stop_step(10), Some(6));
        assert_eq!(spoof.sync_stop_step(10), Some(6));
        assert_ne!(mass_stop.attack_label(&dummy_meter_event()), spoof.attack_label(&dummy_meter_event()));
    }

    fn dummy_meter_event() -> Event {
        Event::MeterValues(crate::domain::events::MeterValuesEvent {
            cp_id: "CP_001".to_string(),
            connector_id: 1,
            transaction_id: Some(1),
            samples: vec![],
            timestamp: chrono::Utc::now(),
        })
    }
}
