//! Structured events produced by CSMS dispatch and consumed by the event bus.
//!
//! Every accepted OCPP message produces exactly one `Event`. The variant set
//! here is the CSMS-observable subset needed to drive the CSV log writers;
//! it intentionally excludes concerns (billing, reservations, device
//! firmware) that do not apply to this simulator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterSample {
    pub measurand: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    BootNotification(BootNotificationEvent),
    Heartbeat(HeartbeatEvent),
    StatusNotification(StatusNotificationEvent),
    Authorize(AuthorizeEvent),
    StartTransaction(StartTransactionEvent),
    StartTransactionRejected(StartTransactionRejectedEvent),
    MeterValues(MeterValuesEvent),
    StopTransaction(StopTransactionEvent),
    CpOffline(CpOfflineEvent),
}

impl Event {
    /// The wire-level OCPP action name this event was derived from, used as
    /// the `message_type` column in every CSV table.
    pub fn message_type(&self) -> &'static str {
        match self {
            Event::BootNotification(_) => "BootNotification",
            Event::Heartbeat(_) => "Heartbeat",
            Event::StatusNotification(_) => "StatusNotification",
            Event::Authorize(_) => "Authorize",
            Event::StartTransaction(_) => "StartTransaction",
            Event::StartTransactionRejected(_) => "StartTransactionRejected",
            Event::MeterValues(_) => "MeterValues",
            Event::StopTransaction(_) => "StopTransaction",
            Event::CpOffline(_) => "CPOffline",
        }
    }

    pub fn cp_id(&self) -> &str {
        match self {
            Event::BootNotification(e) => &e.cp_id,
            Event::Heartbeat(e) => &e.cp_id,
            Event::StatusNotification(e) => &e.cp_id,
            Event::Authorize(e) => &e.cp_id,
            Event::StartTransaction(e) => &e.cp_id,
            Event::StartTransactionRejected(e) => &e.cp_id,
            Event::MeterValues(e) => &e.cp_id,
            Event::StopTransaction(e) => &e.cp_id,
            Event::CpOffline(e) => &e.cp_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::BootNotification(e) => e.timestamp,
            Event::Heartbeat(e) => e.timestamp,
            Event::StatusNotification(e) => e.timestamp,
            Event::Authorize(e) => e.timestamp,
            Event::StartTransaction(e) => e.timestamp,
            Event::StartTransactionRejected(e) => e.timestamp,
            Event::MeterValues(e) => e.timestamp,
            Event::StopTransaction(e) => e.timestamp,
            Event::CpOffline(e) => e.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootNotificationEvent {
    pub cp_id: String,
    pub vendor: String,
    pub model: String,
    pub accepted: bool,
    pub interval: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    pub cp_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusNotificationEvent {
    pub cp_id: String,
    pub connector_id: u32,
    pub status: String,
    pub error_code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeEvent {
    pub cp_id: String,
    pub id_tag: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTransactionEvent {
    pub cp_id: String,
    pub connector_id: u32,
    pub transaction_id: i32,
    pub id_tag: String,
    pub meter_start: i32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTransactionRejectedEvent {
    pub cp_id: String,
    pub connector_id: u32,
    pub id_tag: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterValuesEvent {
    pub cp_id: String,
    pub connector_id: u32,
    pub transaction_id: Option<i32>,
    pub samples: Vec<MeterSample>,
    pub timestamp: DateTime<Utc>,
}

impl MeterValuesEvent {
    pub fn measurand(&self, name: &str) -> Option<f64> {
        self.samples
            .iter()
            .find(|s| s.measurand == name)
            .map(|s| s.value)
    }

    pub fn power_kw(&self) -> Option<f64> {
        self.measurand("Power.Active.Import")
    }

    pub fn current_a(&self) -> Option<f64> {
        self.measurand("Current.Import")
    }

    pub fn voltage_v(&self) -> Option<f64> {
        self.measurand("Voltage")
    }

    pub fn soc_percent(&self) -> Option<f64> {
        self.measurand("SoC")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopTransactionEvent {
    pub cp_id: String,
    pub transaction_id: i32,
    pub id_tag: Option<String>,
    pub meter_stop: i32,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpOfflineEvent {
    pub cp_id: String,
    pub timestamp: DateTime<Utc>,
}
