//! A scripted OCPP 1.6-J charge point speaking to one CSMS connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::messages::meter_values::MeterValuesRequest;
use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::messages::status_notification::StatusNotificationRequest;
use rust_ocpp::v1_6::messages::stop_transaction::StopTransactionRequest;
use rust_ocpp::v1_6::types::{
    ChargePointErrorCode, ChargePointStatus, Measurand, MeterValue, SampledValue, UnitOfMeasure,
};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ocpp_session::{CallOutcome, PendingReplies};
use crate::support::errors::{SimError, SimResult};
use crate::support::ocpp_frame::OcppFrame;
use crate::transport;

const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// One simulated charge point's connection to the CSMS.
///
/// Owns its own outgoing message-id namespace and pending-reply map (§3
/// "Ownership"); the CSMS never sees either.
pub struct CpClient {
    pub cp_id: String,
    outbound: mpsc::UnboundedSender<String>,
    pending: Arc<PendingReplies>,
    heartbeat_interval_secs: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    recv_task: JoinHandle<()>,
    heartbeat_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CpClient {
    /// Dial `url`, negotiate the `ocpp1.6` subprotocol, send BootNotification,
    /// and start the heartbeat loop. Only a dial failure is a hard error; a
    /// rejected BootNotification just logs a warning and the rest proceeds
    /// (§4.2 — reproducing a misconfigured fleet is a feature, not a bug).
    pub async fn connect(
        cp_id: impl Into<String>,
        url: &str,
        vendor: &str,
        model: &str,
    ) -> SimResult<Self> {
        let cp_id = cp_id.into();
        let mut request = url
            .into_client_request()
            .map_err(|e| SimError::Transport {
                cp_id: cp_id.clone(),
                message: format!("invalid websocket url: {e}"),
            })?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("ocpp1.6"));

        let ws_stream = Self::dial(&cp_id, request).await?;
        let (mut ws_sink, mut ws_source) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let pending = Arc::new(PendingReplies::new());
        let closed = Arc::new(AtomicBool::new(false));

        // Write task: drains the outbound queue onto the socket.
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if ws_sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        // Read task: resolves pending CALLs, ignores/rejects inbound CALLs
        // (this simulator never implements CS-initiated commands).
        let recv_pending = pending.clone();
        let recv_cp_id = cp_id.clone();
        let recv_closed = closed.clone();
        let recv_task = tokio::spawn(async move {
            while let Some(msg) = ws_source.next().await {
                match msg {
                    Ok(Message::Text(text)) => match OcppFrame::parse(&text) {
                        Ok(OcppFrame::CallResult { unique_id, payload }) => {
                            recv_pending.resolve_result(&unique_id, payload);
                        }
                        Ok(OcppFrame::CallError {
                            unique_id,
                            error_code,
                            error_description,
                            ..
                        }) => {
                            recv_pending.resolve_error(&unique_id, error_code, error_description);
                        }
                        Ok(OcppFrame::Call { unique_id, action, .. }) => {
                            warn!(
                                cp_id = recv_cp_id.as_str(),
                                action = action.as_str(),
                                "ignoring CS-initiated call, no remote commands implemented"
                            );
                            let _ = unique_id;
                        }
                        Err(e) => {
                            warn!(cp_id = recv_cp_id.as_str(), error = %e, "malformed OCPP frame from CSMS");
                        }
                    },
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(Message::Binary(_)) | Ok(Message::Frame(_)) => {}
                }
            }
            recv_closed.store(true, Ordering::SeqCst);
            debug!(cp_id = recv_cp_id.as_str(), "inbound dispatch task ended");
        });

        let client = Self {
            cp_id: cp_id.clone(),
            outbound: outbound_tx,
            pending,
            heartbeat_interval_secs: Arc::new(AtomicU64::new(DEFAULT_HEARTBEAT_INTERVAL_SECS)),
            closed,
            recv_task,
            heartbeat_task: std::sync::Mutex::new(None),
        };

        if let Err(e) = client.boot_notification(vendor, model).await {
            warn!(cp_id = cp_id.as_str(), error = %e, "BootNotification failed or was rejected; continuing anyway");
        }
        client.start_heartbeat_loop();

        Ok(client)
    }

    async fn dial(
        cp_id: &str,
        request: tokio_tungstenite::tungstenite::http::Request<()>,
    ) -> SimResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let wants_tls = transport::cp_wants_tls(request.uri().to_string().as_str());

        let result = if wants_tls {
            let connector = transport::client_tls_connector().map_err(|e| SimError::Transport {
                cp_id: cp_id.to_string(),
                message: format!("building TLS connector: {e}"),
            })?;
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, Some(connector))
                .await
        } else {
            tokio_tungstenite::connect_async(request).await
        };

        result
            .map(|(stream, _response)| stream)
            .map_err(|e| SimError::Transport {
                cp_id: cp_id.to_string(),
                message: format!("dialing: {e}"),
            })
    }

    fn next_unique_id() -> String {
        Uuid::new_v4().to_string()
    }

    async fn send_call(&self, action: &str, payload: Value) -> SimResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SimError::Transport {
                cp_id: self.cp_id.clone(),
                message: "connection already closed".to_string(),
            });
        }

        let unique_id = Self::next_unique_id();
        let rx = self.pending.register(unique_id.clone());
        let frame = OcppFrame::Call {
            unique_id: unique_id.clone(),
            action: action.to_string(),
            payload,
        };

        self.outbound
            .send(frame.serialize())
            .map_err(|_| SimError::Transport {
                cp_id: self.cp_id.clone(),
                message: "outbound channel closed".to_string(),
            })?;

        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(CallOutcome::Result(payload))) => Ok(payload),
            Ok(Ok(CallOutcome::Error {
                error_code,
                error_description,
            })) => Err(SimError::Protocol(format!(
                "{action} rejected: {error_code}: {error_description}"
            ))),
            Ok(Err(_)) => Err(SimError::Transport {
                cp_id: self.cp_id.clone(),
                message: "connection closed before reply arrived".to_string(),
            }),
            Err(_) => Err(SimError::Timeout {
                action: action.to_string(),
                unique_id,
            }),
        }
    }

    pub async fn boot_notification(&self, vendor: &str, model: &str) -> SimResult<()> {
        let request = BootNotificationRequest {
            charge_point_vendor: vendor.to_string(),
            charge_point_model: model.to_string(),
            charge_point_serial_number: None,
            charge_box_serial_number: None,
            firmware_version: None,
            iccid: None,
            imsi: None,
            meter_type: None,
            meter_serial_number: None,
        };
        let payload = self
            .send_call("BootNotification", serde_json::to_value(&request).unwrap())
            .await?;
        let response: BootNotificationResponse =
            serde_json::from_value(payload).map_err(|e| SimError::Protocol(e.to_string()))?;

        info!(
            cp_id = self.cp_id.as_str(),
            status = ?response.status,
            interval = response.interval,
            "BootNotification"
        );

        if response.interval > 0 {
            self.heartbeat_interval_secs
                .store(response.interval as u64, Ordering::SeqCst);
        }

        Ok(())
    }

    fn start_heartbeat_loop(&self) {
        let outbound = self.outbound.clone();
        let pending = self.pending.clone();
        let cp_id = self.cp_id.clone();
        let interval_secs = self.heartbeat_interval_secs.clone();
        let closed = self.closed.clone();

        let handle = tokio::spawn(async move {
            loop {
                let wait = Duration::from_secs(interval_secs.load(Ordering::SeqCst));
                tokio::time::sleep(wait).await;
                if closed.load(Ordering::SeqCst) {
                    break;
                }

                let unique_id = Self::next_unique_id();
                let rx = pending.register(unique_id.clone());
                let frame = OcppFrame::Call {
                    unique_id: unique_id.clone(),
                    action: "Heartbeat".to_string(),
                    payload: serde_json::json!({}),
                };
                if outbound.send(frame.serialize()).is_err() {
                    warn!(cp_id = cp_id.as_str(), "heartbeat loop ending: outbound channel closed");
                    break;
                }

                match tokio::time::timeout(CALL_TIMEOUT, rx).await {
                    Ok(Ok(_)) => {}
                    _ => {
                        warn!(cp_id = cp_id.as_str(), "heartbeat failed; stopping heartbeat loop");
                        break;
                    }
                }
            }
        });

        *self.heartbeat_task.lock().unwrap() = Some(handle);
    }

    pub async fn status_notification(
        &self,
        connector_id: u32,
        status: ChargePointStatus,
        error_code: ChargePointErrorCode,
    ) -> SimResult<()> {
        let request = StatusNotificationRequest {
            connector_id,
            error_code,
            info: None,
            status,
            timestamp: Some(Utc::now()),
            vendor_id: None,
            vendor_error_code: None,
        };
        self.send_call("StatusNotification", serde_json::to_value(&request).unwrap())
            .await?;
        Ok(())
    }

    /// Returns the CSMS's `IdTagInfo.status` as a string (`"Accepted"`, …).
    pub async fn authorize(&self, id_tag: &str) -> SimResult<String> {
        let request = AuthorizeRequest {
            id_tag: id_tag.to_string(),
        };
        let payload = self
            .send_call("Authorize", serde_json::to_value(&request).unwrap())
            .await?;
        let response: AuthorizeResponse =
            serde_json::from_value(payload).map_err(|e| SimError::Protocol(e.to_string()))?;
        Ok(format!("{:?}", response.id_tag_info.status))
    }

    /// Returns `(transaction_id, status)`. A `transaction_id` of 0 or a
    /// status other than `"Accepted"` is a hard rejection per §4.2.
    pub async fn start_transaction(
        &self,
        connector_id: u32,
        id_tag: &str,
        meter_start: i32,
    ) -> SimResult<(i32, String)> {
        let request = StartTransactionRequest {
            connector_id,
            id_tag: id_tag.to_string(),
            meter_start,
            timestamp: Utc::now(),
            reservation_id: None,
        };
        let payload = self
            .send_call("StartTransaction", serde_json::to_value(&request).unwrap())
            .await?;
        let response: StartTransactionResponse =
            serde_json::from_value(payload).map_err(|e| SimError::Protocol(e.to_string()))?;
        Ok((
            response.transaction_id,
            format!("{:?}", response.id_tag_info.status),
        ))
    }

    /// `samples` is `(measurand, value, unit)`; the CP is permitted to send
    /// a subset of the four measurands named in §3.
    pub async fn meter_values(
        &self,
        connector_id: u32,
        transaction_id: Option<i32>,
        samples: Vec<(Measurand, f64, UnitOfMeasure)>,
    ) -> SimResult<()> {
        let sampled_value = samples
            .into_iter()
            .map(|(measurand, value, unit)| SampledValue {
                value: value.to_string(),
                context: None,
                format: None,
                measurand: Some(measurand),
                phase: None,
                location: None,
                unit: Some(unit),
            })
            .collect();

        let request = MeterValuesRequest {
            connector_id,
            transaction_id,
            meter_value: vec![MeterValue {
                timestamp: Utc::now(),
                sampled_value,
            }],
        };
        self.send_call("MeterValues", serde_json::to_value(&request).unwrap())
            .await?;
        Ok(())
    }

    pub async fn stop_transaction(
        &self,
        transaction_id: i32,
        meter_stop: i32,
        id_tag: Option<String>,
    ) -> SimResult<()> {
        let request = StopTransactionRequest {
            transaction_id,
            meter_stop,
            id_tag,
            reason: None,
            timestamp: Utc::now(),
            transaction_data: None,
        };
        self.send_call("StopTransaction", serde_json::to_value(&request).unwrap())
            .await?;
        Ok(())
    }

    /// Stops the heartbeat loop and inbound dispatcher. Idempotent.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.heartbeat_task.lock().unwrap().take() {
            handle.abort();
        }
        self.recv_task.abort();
    }
}
