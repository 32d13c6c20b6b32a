//! The orchestration loop shared by every scenario (§4.5): prepares CSV
//! writers, starts the CSMS, connects CPs in batches, drives the
//! authorize/start/meter-loop/stop state machine, then tears everything
//! down.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rust_ocpp::v1_6::types::{ChargePointErrorCode, ChargePointStatus, Measurand, UnitOfMeasure};
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::cp_client::CpClient;
use crate::csms::{spawn_heartbeat_watchdog, CsmsServer, SessionRegistry};
use crate::csv_log::{LogPaths, LogWriters};
use crate::domain::events::Event;
use crate::eventbus::EventBus;
use crate::support::errors::{SimError, SimResult};
use crate::support::shutdown::ShutdownSignal;

use super::{Scenario, SocIntegrator, StepContext};

const CONNECT_BATCH_SIZE: usize = 5;
const CONNECT_MAX_ATTEMPTS: u32 = 3;
const STEP_CADENCE: Duration = Duration::from_secs(1);

/// Runs one scenario to completion against a freshly bound CSMS on
/// `127.0.0.1:{config.port}` (or an OS-assigned port when `config.port ==
/// 0`, as integration tests use).
pub async fn run(config: &RunConfig, scenario: Arc<dyn Scenario>) -> SimResult<()> {
    let started_at = Utc::now();
    let paths = LogPaths::for_run(
        &config.scenario,
        config.mode.as_str(),
        started_at,
        config.output.as_deref(),
    );
    let writers = LogWriters::create(&config.scenario, config.mode.as_str(), &paths)
        .map_err(|e| SimError::Scenario {
            scenario: config.scenario.clone(),
            message: format!("preparing CSV writers: {e}"),
        })?;
    let writers = Arc::new(Mutex::new(writers));

    let bus = EventBus::new();
    {
        let writers = writers.clone();
        let scenario = scenario.clone();
        let mode = config.mode;
        bus.subscribe(move |event: &Event| {
            let label = scenario.label(event, mode);
            if let Err(e) = writers.lock().unwrap().record(event, &label) {
                warn!(error = %e, "failed writing event to CSV log");
            }
        });
    }

    let registry = Arc::new(SessionRegistry::default());
    let shutdown = ShutdownSignal::new();
    let server = CsmsServer::bind(
        &format!("127.0.0.1:{}", config.port),
        registry.clone(),
        bus.clone(),
        shutdown.clone(),
    )
    .await?;
    let bound_addr = server.local_addr().map_err(|e| SimError::Transport {
        cp_id: "csms".to_string(),
        message: e.to_string(),
    })?;
    info!(scenario = config.scenario.as_str(), addr = %bound_addr, "CSMS bound");

    let server_task = tokio::spawn(server.run());
    let watchdog_task = spawn_heartbeat_watchdog(registry.clone(), bus.clone(), shutdown.clone());

    let url_base = format!("ws://{bound_addr}");
    let clients = connect_all(&config.cp_ids, &url_base).await;
    if clients.is_empty() {
        warn!(scenario = config.scenario.as_str(), "no charge points connected; nothing to drive");
    }

    let drive_result = drive(scenario.as_ref(), &clients, config).await;
    if let Err(e) = &drive_result {
        error!(scenario = config.scenario.as_str(), error = %e, "scenario drive failed; cleaning up");
    }

    for (_, client) in &clients {
        client.close().await;
    }
    shutdown.trigger();
    let _ = server_task.await;
    watchdog_task.abort();

    let writers = Arc::try_unwrap(writers)
        .map_err(|_| SimError::Scenario {
            scenario: config.scenario.clone(),
            message: "log writers still referenced at shutdown".to_string(),
        })?
        .into_inner()
        .unwrap();
    writers.close().map_err(|e| SimError::Scenario {
        scenario: config.scenario.clone(),
        message: format!("closing CSV writers: {e}"),
    })?;

    drive_result
}

/// Connects every CP id in batches of [`CONNECT_BATCH_SIZE`], retrying each
/// dial up to [`CONNECT_MAX_ATTEMPTS`] times with a linear back-off. A CP
/// that never connects is dropped; the run proceeds with the rest.
async fn connect_all(cp_ids: &[String], url_base: &str) -> Vec<(String, CpClient)> {
    let mut clients = Vec::new();

    for batch in cp_ids.chunks(CONNECT_BATCH_SIZE) {
        let mut handles = Vec::new();
        for cp_id in batch {
            let cp_id = cp_id.clone();
            let url = format!("{url_base}/{cp_id}");
            handles.push(tokio::spawn(async move {
                let mut attempt = 0u32;
                loop {
                    attempt += 1;
                    match CpClient::connect(cp_id.clone(), &url, "cp-anomaly-sim", "simulated-cp").await {
                        Ok(client) => return Some((cp_id, client)),
                        Err(e) if attempt < CONNECT_MAX_ATTEMPTS => {
                            warn!(cp_id = cp_id.as_str(), attempt, error = %e, "connect failed, retrying");
                            tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                        }
                        Err(e) => {
                            warn!(cp_id = cp_id.as_str(), error = %e, "connect failed; giving up");
                            return None;
                        }
                    }
                }
            }));
        }
        for handle in handles {
            if let Ok(Some(pair)) = handle.await {
                clients.push(pair);
            }
        }
    }

    clients
}

struct CpRunState {
    transaction_id: Option<i32>,
    soc: SocIntegrator,
    stopped: bool,
}

/// The per-CP state machine described in §4.5 point 4: Available →
/// Authorize → Preparing → StartTransaction → Charging → meter loop →
/// Finishing → StopTransaction → Available. A scenario's synchronized stop
/// step (mass-stop / remote-spoof style) is honored mid-loop.
async fn drive(
    scenario: &dyn Scenario,
    clients: &[(String, CpClient)],
    config: &RunConfig,
) -> SimResult<()> {
    let mut states: Vec<CpRunState> = clients
        .iter()
        .map(|_| CpRunState {
            transaction_id: None,
            soc: SocIntegrator::new(scenario.battery_capacity_kwh(), 20.0),
            stopped: false,
        })
        .collect();

    for (cp_index, (cp_id, client)) in clients.iter().enumerate() {
        if let Err(e) = client
            .status_notification(1, ChargePointStatus::Available, ChargePointErrorCode::NoError)
            .await
        {
            warn!(cp_id = cp_id.as_str(), error = %e, "StatusNotification(Available) failed");
        }

        let id_tag = scenario.id_tag_for(cp_index, 0);
        let auth_status = match client.authorize(&id_tag).await {
            Ok(status) => status,
            Err(e) => {
                warn!(cp_id = cp_id.as_str(), error = %e, "Authorize failed");
                continue;
            }
        };
        if auth_status != "Accepted" {
            warn!(
                cp_id = cp_id.as_str(),
                id_tag = id_tag.as_str(),
                status = auth_status.as_str(),
                "id_tag not authorized; skipping transaction for this CP"
            );
            continue;
        }

        if let Err(e) = client
            .status_notification(1, ChargePointStatus::Preparing, ChargePointErrorCode::NoError)
            .await
        {
            warn!(cp_id = cp_id.as_str(), error = %e, "StatusNotification(Preparing) failed");
        }

        match client.start_transaction(1, &id_tag, 0).await {
            Ok((transaction_id, status)) if transaction_id != 0 && status == "Accepted" => {
                states[cp_index].transaction_id = Some(transaction_id);
                if let Err(e) = client
                    .status_notification(1, ChargePointStatus::Charging, ChargePointErrorCode::NoError)
                    .await
                {
                    warn!(cp_id = cp_id.as_str(), error = %e, "StatusNotification(Charging) failed");
                }
            }
            Ok((_, status)) => {
                warn!(cp_id = cp_id.as_str(), status = status.as_str(), "StartTransaction rejected");
            }
            Err(e) => {
                warn!(cp_id = cp_id.as_str(), error = %e, "StartTransaction failed");
            }
        }
    }

    let sync_stop_step = scenario.sync_stop_step(config.duration);

    for step in 0..config.duration {
        if sync_stop_step == Some(step) {
            for (cp_index, (cp_id, client)) in clients.iter().enumerate() {
                let Some(transaction_id) = states[cp_index].transaction_id else {
                    continue;
                };
                if states[cp_index].stopped {
                    continue;
                }
                if let Err(e) = client.stop_transaction(transaction_id, 0, None).await {
                    warn!(cp_id = cp_id.as_str(), error = %e, "synchronized StopTransaction failed");
                }
                states[cp_index].stopped = true;
            }
        }

        for (cp_index, (cp_id, client)) in clients.iter().enumerate() {
            let Some(transaction_id) = states[cp_index].transaction_id else {
                continue;
            };

            let ctx = StepContext {
                mode: config.mode,
                step,
                duration: config.duration,
                cp_index,
            };
            let delay = scenario.send_delay(&ctx);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let mut readings = scenario.readings(&ctx);
            if states[cp_index].stopped {
                readings.power_kw = 0.0;
                readings.current_a = 0.0;
            }
            let soc_percent = states[cp_index].soc.advance(readings.power_kw, STEP_CADENCE.as_secs_f64());

            let samples = vec![
                (Measurand::PowerActiveImport, readings.power_kw, UnitOfMeasure::Kw),
                (Measurand::CurrentImport, readings.current_a, UnitOfMeasure::A),
                (Measurand::Voltage, readings.voltage_v, UnitOfMeasure::V),
                (Measurand::SoC, soc_percent, UnitOfMeasure::Percent),
            ];

            if let Err(e) = client.meter_values(1, Some(transaction_id), samples).await {
                warn!(cp_id = cp_id.as_str(), step, error = %e, "MeterValues failed");
            }
        }

        tokio::time::sleep(STEP_CADENCE).await;
    }

    for (cp_index, (cp_id, client)) in clients.iter().enumerate() {
        let Some(transaction_id) = states[cp_index].transaction_id else {
            continue;
        };
        if states[cp_index].stopped {
            continue;
        }

        if let Err(e) = client
            .status_notification(1, ChargePointStatus::Finishing, ChargePointErrorCode::NoError)
            .await
        {
            warn!(cp_id = cp_id.as_str(), error = %e, "StatusNotification(Finishing) failed");
        }
        if let Err(e) = client.stop_transaction(transaction_id, 0, None).await {
            warn!(cp_id = cp_id.as_str(), error = %e, "StopTransaction failed");
        }
        if let Err(e) = client
            .status_notification(1, ChargePointStatus::Available, ChargePointErrorCode::NoError)
            .await
        {
            warn!(cp_id = cp_id.as_str(), error = %e, "StatusNotification(Available) failed");
        }
    }

    Ok(())
}
