//! Per-action OCPP handlers, mirroring the wire contracts in §4.3.
//!
//! Every handler takes the already-parsed payload, mutates the CP's session
//! entry, publishes exactly one [`Event`], and returns the CALLRESULT
//! payload. A deserialization failure becomes a `FormationViolation`
//! CALLERROR rather than panicking; an unrecognized action is
//! `NotImplemented`.

use std::time::Instant;

use chrono::Utc;
use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::messages::heart_beat::HeartbeatResponse;
use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use rust_ocpp::v1_6::messages::stop_transaction::{
    StopTransactionRequest, StopTransactionResponse,
};
use rust_ocpp::v1_6::types::{
    AuthorizationStatus, ChargePointErrorCode, ChargePointStatus, IdTagInfo, RegistrationStatus,
};
use serde_json::Value;

use crate::domain::events::{
    AuthorizeEvent, BootNotificationEvent, Event, MeterSample, MeterValuesEvent,
    StartTransactionEvent, StartTransactionRejectedEvent, StatusNotificationEvent,
    StopTransactionEvent,
};
use crate::domain::session::ConnectorStatus;
use crate::eventbus::EventBus;

use super::registry::SessionRegistry;

const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// A CALLERROR's `(errorCode, errorDescription)` pair.
pub type DispatchError = (String, String);

fn formation_violation(action: &str, err: impl std::fmt::Display) -> DispatchError {
    (
        "FormationViolation".to_string(),
        format!("malformed {action} payload: {err}"),
    )
}

/// Routes one inbound CALL to its handler. Returns the CALLRESULT payload,
/// or a CALLERROR pair for a malformed payload or unrecognized action.
pub fn dispatch(
    registry: &SessionRegistry,
    bus: &EventBus,
    cp_id: &str,
    action: &str,
    payload: Value,
) -> Result<Value, DispatchError> {
    match action {
        "BootNotification" => handle_boot_notification(registry, bus, cp_id, payload),
        "Heartbeat" => handle_heartbeat(registry, bus, cp_id, payload),
        "StatusNotification" => handle_status_notification(registry, bus, cp_id, payload),
        "Authorize" => handle_authorize(registry, bus, cp_id, payload),
        "StartTransaction" => handle_start_transaction(registry, bus, cp_id, payload),
        "MeterValues" => handle_meter_values(registry, bus, cp_id, payload),
        "StopTransaction" => handle_stop_transaction(registry, bus, cp_id, payload),
        other => Err((
            "NotImplemented".to_string(),
            format!("action '{other}' is not supported by this CSMS"),
        )),
    }
}

fn handle_boot_notification(
    registry: &SessionRegistry,
    bus: &EventBus,
    cp_id: &str,
    payload: Value,
) -> Result<Value, DispatchError> {
    let req: BootNotificationRequest =
        serde_json::from_value(payload).map_err(|e| formation_violation("BootNotification", e))?;

    let interval = 10u64;
    if let Some(mut session) = registry.sessions.get_mut(cp_id) {
        session.boot_accepted = true;
        session.heartbeat_interval = interval;
        session.last_heartbeat = Instant::now();
    }

    bus.publish(Event::BootNotification(BootNotificationEvent {
        cp_id: cp_id.to_string(),
        vendor: req.charge_point_vendor.clone(),
        model: req.charge_point_model.clone(),
        accepted: true,
        interval,
        timestamp: Utc::now(),
    }));

    let response = BootNotificationResponse {
        current_time: Utc::now(),
        interval: interval as i32,
        status: RegistrationStatus::Accepted,
    };
    Ok(serde_json::to_value(response).unwrap())
}

fn handle_heartbeat(
    registry: &SessionRegistry,
    bus: &EventBus,
    cp_id: &str,
    _payload: Value,
) -> Result<Value, DispatchError> {
    if let Some(mut session) = registry.sessions.get_mut(cp_id) {
        session.last_heartbeat = Instant::now();
    }

    bus.publish(Event::Heartbeat(crate::domain::events::HeartbeatEvent {
        cp_id: cp_id.to_string(),
        timestamp: Utc::now(),
    }));

    let response = HeartbeatResponse {
        current_time: Utc::now(),
    };
    Ok(serde_json::to_value(response).unwrap())
}

fn to_domain_status(status: ChargePointStatus) -> ConnectorStatus {
    match status {
        ChargePointStatus::Available | ChargePointStatus::Reserved => ConnectorStatus::Available,
        ChargePointStatus::Preparing => ConnectorStatus::Preparing,
        ChargePointStatus::Charging
        | ChargePointStatus::SuspendedEV
        | ChargePointStatus::SuspendedEVSE => ConnectorStatus::Charging,
        ChargePointStatus::Finishing => ConnectorStatus::Finishing,
        ChargePointStatus::Unavailable => ConnectorStatus::Unavailable,
        ChargePointStatus::Faulted => ConnectorStatus::Faulted,
    }
}

fn handle_status_notification(
    registry: &SessionRegistry,
    bus: &EventBus,
    cp_id: &str,
    payload: Value,
) -> Result<Value, DispatchError> {
    let req: StatusNotificationRequest = serde_json::from_value(payload)
        .map_err(|e| formation_violation("StatusNotification", e))?;

    let error_code = match req.error_code {
        ChargePointErrorCode::NoError => None,
        other => Some(format!("{other:?}")),
    };

    if let Some(mut session) = registry.sessions.get_mut(cp_id) {
        let connector = session.connector_mut(req.connector_id);
        connector.status = to_domain_status(req.status);
        connector.error_code = error_code.clone();
    }

    bus.publish(Event::StatusNotification(StatusNotificationEvent {
        cp_id: cp_id.to_string(),
        connector_id: req.connector_id,
        status: to_domain_status(req.status).as_str().to_string(),
        error_code,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
    }));

    Ok(serde_json::to_value(StatusNotificationResponse {}).unwrap())
}

fn handle_authorize(
    registry: &SessionRegistry,
    bus: &EventBus,
    cp_id: &str,
    payload: Value,
) -> Result<Value, DispatchError> {
    let req: AuthorizeRequest =
        serde_json::from_value(payload).map_err(|e| formation_violation("Authorize", e))?;

    let valid = registry.authorized_tags.is_valid(&req.id_tag);
    let status = if valid {
        AuthorizationStatus::Accepted
    } else {
        AuthorizationStatus::Invalid
    };

    if valid {
        if let Some(mut session) = registry.sessions.get_mut(cp_id) {
            session.authorized_tags.insert(req.id_tag.clone());
        }
    }

    bus.publish(Event::Authorize(AuthorizeEvent {
        cp_id: cp_id.to_string(),
        id_tag: req.id_tag.clone(),
        status: format!("{status:?}"),
        timestamp: Utc::now(),
    }));

    let response = AuthorizeResponse {
        id_tag_info: IdTagInfo {
            status,
            expiry_date: None,
            parent_id_tag: None,
        },
    };
    Ok(serde_json::to_value(response).unwrap())
}

fn handle_start_transaction(
    registry: &SessionRegistry,
    bus: &EventBus,
    cp_id: &str,
    payload: Value,
) -> Result<Value, DispatchError> {
    let req: StartTransactionRequest = serde_json::from_value(payload)
        .map_err(|e| formation_violation("StartTransaction", e))?;

    let Some(mut session) = registry.sessions.get_mut(cp_id) else {
        return Err(("InternalError".to_string(), "unknown session".to_string()));
    };

    if !session.authorized_tags.contains(&req.id_tag) {
        bus.publish(Event::StartTransactionRejected(StartTransactionRejectedEvent {
            cp_id: cp_id.to_string(),
            connector_id: req.connector_id,
            id_tag: req.id_tag.clone(),
            timestamp: Utc::now(),
        }));

        let response = StartTransactionResponse {
            transaction_id: 0,
            id_tag_info: IdTagInfo {
                status: AuthorizationStatus::Invalid,
                expiry_date: None,
                parent_id_tag: None,
            },
        };
        return Ok(serde_json::to_value(response).unwrap());
    }

    let transaction_id = session.allocate_transaction_id();
    let connector = session.connector_mut(req.connector_id);
    connector.status = ConnectorStatus::Charging;
    connector.last_tx_id = Some(transaction_id);
    drop(session);

    bus.publish(Event::StartTransaction(StartTransactionEvent {
        cp_id: cp_id.to_string(),
        connector_id: req.connector_id,
        transaction_id,
        id_tag: req.id_tag.clone(),
        meter_start: req.meter_start,
        timestamp: req.timestamp,
    }));

    let response = StartTransactionResponse {
        transaction_id,
        id_tag_info: IdTagInfo {
            status: AuthorizationStatus::Accepted,
            expiry_date: None,
            parent_id_tag: None,
        },
    };
    Ok(serde_json::to_value(response).unwrap())
}

fn handle_meter_values(
    _registry: &SessionRegistry,
    bus: &EventBus,
    cp_id: &str,
    payload: Value,
) -> Result<Value, DispatchError> {
    let req: MeterValuesRequest =
        serde_json::from_value(payload).map_err(|e| formation_violation("MeterValues", e))?;

    let timestamp = req
        .meter_value
        .first()
        .map(|mv| mv.timestamp)
        .unwrap_or_else(Utc::now);

    let samples = req
        .meter_value
        .iter()
        .flat_map(|mv| mv.sampled_value.iter())
        .filter_map(|sampled| {
            let value: f64 = sampled.value.parse().ok()?;
            let measurand_name = match &sampled.measurand {
                Some(m) => measurand_name(m),
                None => "Energy.Active.Import.Register",
            };
            Some(MeterSample {
                measurand: measurand_name.to_string(),
                value,
            })
        })
        .collect();

    bus.publish(Event::MeterValues(MeterValuesEvent {
        cp_id: cp_id.to_string(),
        connector_id: req.connector_id,
        transaction_id: req.transaction_id,
        samples,
        timestamp,
    }));

    Ok(serde_json::to_value(MeterValuesResponse {}).unwrap())
}

fn measurand_name(measurand: &rust_ocpp::v1_6::types::Measurand) -> &'static str {
    use rust_ocpp::v1_6::types::Measurand::*;
    match measurand {
        Voltage => "Voltage",
        CurrentImport => "Current.Import",
        PowerActiveImport => "Power.Active.Import",
        SoC => "SoC",
        EnergyActiveImportRegister => "Energy.Active.Import.Register",
        _ => "Other",
    }
}

fn handle_stop_transaction(
    registry: &SessionRegistry,
    bus: &EventBus,
    cp_id: &str,
    payload: Value,
) -> Result<Value, DispatchError> {
    let req: StopTransactionRequest =
        serde_json::from_value(payload).map_err(|e| formation_violation("StopTransaction", e))?;

    if let Some(mut session) = registry.sessions.get_mut(cp_id) {
        for connector in session.connectors.values_mut() {
            if connector.last_tx_id == Some(req.transaction_id) {
                connector.status = ConnectorStatus::Available;
            }
        }
    }

    bus.publish(Event::StopTransaction(StopTransactionEvent {
        cp_id: cp_id.to_string(),
        transaction_id: req.transaction_id,
        id_tag: req.id_tag.clone(),
        meter_stop: req.meter_stop,
        reason: req.reason.map(|r| format!("{r:?}")),
        timestamp: req.timestamp,
    }));

    let response = StopTransactionResponse { id_tag_info: None };
    Ok(serde_json::to_value(response).unwrap())
}
