//! Append-only CSV log writers.
//!
//! Six tables per run: one unified, labeled table for ML consumption, and
//! five "realistic" CSMS-log tables (`events_raw` plus four typed tables).
//! Every `write_*` call flushes immediately — per §5, dangling writes are
//! avoided because a writer never holds unflushed rows across a suspension
//! point.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::events::Event;

#[derive(Debug, Serialize)]
pub struct UnifiedRow {
    pub timestamp: String,
    pub charge_point_id: String,
    pub scenario: String,
    pub mode: String,
    pub step: u64,
    pub message_type: String,
    pub transaction_id: Option<i32>,
    pub connector_id: Option<u32>,
    pub id_tag: Option<String>,
    pub power_kw: Option<f64>,
    pub current_a: Option<f64>,
    pub voltage_v: Option<f64>,
    pub soc_percent: Option<f64>,
    pub label: String,
    pub raw_payload: String,
}

#[derive(Debug, Serialize)]
pub struct MeterValueRow {
    pub timestamp: String,
    pub cp_id: String,
    pub transaction_id: Option<i32>,
    pub connector_id: u32,
    pub power_kw: Option<f64>,
    pub current_a: Option<f64>,
    pub voltage_v: Option<f64>,
    pub soc_percent: Option<f64>,
    pub raw_payload: String,
}

#[derive(Debug, Serialize)]
pub struct StatusRow {
    pub timestamp: String,
    pub cp_id: String,
    pub connector_id: u32,
    pub status: String,
    pub error_code: Option<String>,
    pub raw_payload: String,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatRow {
    pub timestamp: String,
    pub cp_id: String,
    pub raw_payload: String,
}

#[derive(Debug, Serialize)]
pub struct TransactionRow {
    pub timestamp: String,
    pub cp_id: String,
    pub event_type: String,
    pub transaction_id: i32,
    pub id_tag: Option<String>,
    pub meter_start: Option<i32>,
    pub meter_stop: Option<i32>,
    pub reason: Option<String>,
    pub raw_payload: String,
}

#[derive(Debug, Serialize)]
pub struct RawEventRow {
    pub timestamp: String,
    pub cp_id: String,
    pub message_type: String,
    pub raw_payload: String,
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Where the six CSV files for one run live on disk.
pub struct LogPaths {
    pub unified: PathBuf,
    pub meter_values: PathBuf,
    pub status_notifications: PathBuf,
    pub heartbeats: PathBuf,
    pub transactions: PathBuf,
    pub events_raw: PathBuf,
}

impl LogPaths {
    /// `logs/ocpp/{scenario}_{mode}_{timestamp}.csv` plus
    /// `logs/raw/{mode_dir}/{scenario}/{timestamp}/{table}.csv`, per §6.
    pub fn for_run(
        scenario: &str,
        mode: &str,
        started_at: DateTime<Utc>,
        output_override: Option<&Path>,
    ) -> Self {
        let stamp = started_at.format("%Y%m%d_%H%M%S").to_string();
        let mode_dir = if mode == "attack" { "attack" } else { "normal" };

        let unified = match output_override {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from("logs/ocpp").join(format!("{scenario}_{mode}_{stamp}.csv")),
        };

        let raw_dir = PathBuf::from("logs/raw")
            .join(mode_dir)
            .join(scenario)
            .join(&stamp);

        Self {
            meter_values: raw_dir.join("meter_values.csv"),
            status_notifications: raw_dir.join("status_notifications.csv"),
            heartbeats: raw_dir.join("heartbeats.csv"),
            transactions: raw_dir.join("transactions.csv"),
            events_raw: raw_dir.join("events_raw.csv"),
            unified,
        }
    }
}

fn create_writer(path: &Path) -> io::Result<csv::Writer<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(io::Error::other)
}

pub struct LogWriters {
    unified: csv::Writer<File>,
    meter_values: csv::Writer<File>,
    status_notifications: csv::Writer<File>,
    heartbeats: csv::Writer<File>,
    transactions: csv::Writer<File>,
    events_raw: csv::Writer<File>,
    scenario: String,
    mode: String,
    step: u64,
}

impl LogWriters {
    pub fn create(scenario: &str, mode: &str, paths: &LogPaths) -> io::Result<Self> {
        Ok(Self {
            unified: create_writer(&paths.unified)?,
            meter_values: create_writer(&paths.meter_values)?,
            status_notifications: create_writer(&paths.status_notifications)?,
            heartbeats: create_writer(&paths.heartbeats)?,
            transactions: create_writer(&paths.transactions)?,
            events_raw: create_writer(&paths.events_raw)?,
            scenario: scenario.to_string(),
            mode: mode.to_string(),
            step: 0,
        })
    }

    /// Record one event: always to `events_raw`, then to its typed table,
    /// then (unless it's a Heartbeat) to the unified labeled table. The
    /// `label` callback is the scenario's classifier for this event.
    pub fn record(&mut self, event: &Event, label: &str) -> io::Result<()> {
        let ts = iso(event.timestamp());
        let cp_id = event.cp_id().to_string();
        let raw_payload =
            serde_json::to_string(event).map_err(io::Error::other)?;

        self.events_raw.serialize(RawEventRow {
            timestamp: ts.clone(),
            cp_id: cp_id.clone(),
            message_type: event.message_type().to_string(),
            raw_payload: raw_payload.clone(),
        })?;
        self.events_raw.flush()?;

        self.write_typed_table(event, &ts, &cp_id, &raw_payload)?;

        if !matches!(event, Event::Heartbeat(_)) {
            self.step += 1;
            self.write_unified_row(event, &ts, &cp_id, &raw_payload, label)?;
        }

        Ok(())
    }

    fn write_typed_table(
        &mut self,
        event: &Event,
        ts: &str,
        cp_id: &str,
        raw_payload: &str,
    ) -> io::Result<()> {
        use crate::domain::events::Event::*;

        match event {
            Heartbeat(_) => {
                self.heartbeats.serialize(HeartbeatRow {
                    timestamp: ts.to_string(),
                    cp_id: cp_id.to_string(),
                    raw_payload: raw_payload.to_string(),
                })?;
                self.heartbeats.flush()?;
            }
            StatusNotification(e) => {
                self.status_notifications.serialize(StatusRow {
                    timestamp: ts.to_string(),
                    cp_id: cp_id.to_string(),
                    connector_id: e.connector_id,
                    status: e.status.clone(),
                    error_code: e.error_code.clone(),
                    raw_payload: raw_payload.to_string(),
                })?;
                self.status_notifications.flush()?;
            }
            MeterValues(e) => {
                self.meter_values.serialize(MeterValueRow {
                    timestamp: ts.to_string(),
                    cp_id: cp_id.to_string(),
                    transaction_id: e.transaction_id,
                    connector_id: e.connector_id,
                    power_kw: e.power_kw(),
                    current_a: e.current_a(),
                    voltage_v: e.voltage_v(),
                    soc_percent: e.soc_percent(),
                    raw_payload: raw_payload.to_string(),
                })?;
                self.meter_values.flush()?;
            }
            StartTransaction(e) => {
                self.transactions.serialize(TransactionRow {
                    timestamp: ts.to_string(),
                    cp_id: cp_id.to_string(),
                    event_type: "StartTransaction".to_string(),
                    transaction_id: e.transaction_id,
                    id_tag: Some(e.id_tag.clone()),
                    meter_start: Some(e.meter_start),
                    meter_stop: None,
                    reason: None,
                    raw_payload: raw_payload.to_string(),
                })?;
                self.transactions.flush()?;
            }
            StopTransaction(e) => {
                self.transactions.serialize(TransactionRow {
                    timestamp: ts.to_string(),
                    cp_id: cp_id.to_string(),
                    event_type: "StopTransaction".to_string(),
                    transaction_id: e.transaction_id,
                    id_tag: e.id_tag.clone(),
                    meter_start: None,
                    meter_stop: Some(e.meter_stop),
                    reason: e.reason.clone(),
                    raw_payload: raw_payload.to_string(),
                })?;
                self.transactions.flush()?;
            }
            // BootNotification, Authorize, StartTransactionRejected, CPOffline
            // have no dedicated typed table; they still land in events_raw
            // and (except Heartbeat, which never reaches here) the unified
            // table.
            _ => {}
        }

        Ok(())
    }

    fn write_unified_row(
        &mut self,
        event: &Event,
        ts: &str,
        cp_id: &str,
        raw_payload: &str,
        label: &str,
    ) -> io::Result<()> {
        use crate::domain::events::Event::*;

        let (transaction_id, connector_id, id_tag, power_kw, current_a, voltage_v, soc_percent) =
            match event {
                StatusNotification(e) => (None, Some(e.connector_id), None, None, None, None, None),
                Authorize(e) => (None, None, Some(e.id_tag.clone()), None, None, None, None),
                StartTransaction(e) => (
                    Some(e.transaction_id),
                    Some(e.connector_id),
                    Some(e.id_tag.clone()),
                    None,
                    None,
                    None,
                    None,
                ),
                StartTransactionRejected(e) => {
                    (None, Some(e.connector_id), Some(e.id_tag.clone()), None, None, None, None)
                }
                MeterValues(e) => (
                    e.transaction_id,
                    Some(e.connector_id),
                    None,
                    e.power_kw(),
                    e.current_a(),
                    e.voltage_v(),
                    e.soc_percent(),
                ),
                StopTransaction(e) => {
                    (Some(e.transaction_id), None, e.id_tag.clone(), None, None, None, None)
                }
                BootNotification(_) | CpOffline(_) | Heartbeat(_) => {
                    (None, None, None, None, None, None, None)
                }
            };

        self.unified.serialize(UnifiedRow {
            timestamp: ts.to_string(),
            charge_point_id: cp_id.to_string(),
            scenario: self.scenario.clone(),
            mode: self.mode.clone(),
            step: self.step,
            message_type: event.message_type().to_string(),
            transaction_id,
            connector_id,
            id_tag,
            power_kw,
            current_a,
            voltage_v,
            soc_percent,
            label: label.to_string(),
            raw_payload: raw_payload.to_string(),
        })?;
        self.unified.flush()
    }

    pub fn close(mut self) -> io::Result<()> {
        self.unified.flush()?;
        self.meter_values.flush()?;
        self.status_notifications.flush()?;
        self.heartbeats.flush()?;
        self.transactions.flush()?;
        self.events_raw.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_paths_follow_the_documented_layout() {
        let started_at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let paths = LogPaths::for_run("dalgali_yuk", "attack", started_at, None);

        assert_eq!(
            paths.unified,
            PathBuf::from("logs/ocpp/dalgali_yuk_attack_20260102_030405.csv")
        );
        assert_eq!(
            paths.meter_values,
            PathBuf::from("logs/raw/attack/dalgali_yuk/20260102_030405/meter_values.csv")
        );
    }

    #[test]
    fn output_override_replaces_only_the_unified_path() {
        let started_at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let paths = LogPaths::for_run(
            "dalgali_yuk",
            "normal",
            started_at,
            Some(Path::new("custom/out.csv")),
        );
        assert_eq!(paths.unified, PathBuf::from("custom/out.csv"));
        assert_eq!(
            paths.events_raw,
            PathBuf::from("logs/raw/normal/dalgali_yuk/20260102_030405/events_raw.csv")
        );
    }
}
