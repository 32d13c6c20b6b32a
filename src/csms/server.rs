//! WebSocket accept loop: one task per accepted CP, dispatching frames
//! through [`handlers::dispatch`]. Adapted from this workspace's
//! `interfaces::ws::ocpp_server` accept/dispatch/cleanup shape, minus the
//! REST/billing-specific pieces this crate has no use for.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::eventbus::EventBus;
use crate::support::errors::{SimError, SimResult};
use crate::support::ocpp_frame::OcppFrame;
use crate::support::shutdown::ShutdownSignal;
use crate::transport::{self, CsmsStream};

use super::handlers;
use super::registry::SessionRegistry;

pub struct CsmsServer {
    registry: Arc<SessionRegistry>,
    bus: EventBus,
    shutdown: ShutdownSignal,
    listener: TcpListener,
    tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
}

impl CsmsServer {
    /// Binds immediately so callers (including tests using `127.0.0.1:0`)
    /// can read back the OS-assigned port before spawning `run`.
    pub async fn bind(
        addr: &str,
        registry: Arc<SessionRegistry>,
        bus: EventBus,
        shutdown: ShutdownSignal,
    ) -> SimResult<Arc<Self>> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SimError::Transport {
                cp_id: "csms".to_string(),
                message: format!("binding {addr}: {e}"),
            })?;
        let tls_acceptor = transport::server_tls_acceptor();

        Ok(Arc::new(Self {
            registry,
            bus,
            shutdown,
            listener,
            tls_acceptor,
        }))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until shutdown is triggered, then drops any
    /// sessions still registered (their own connection tasks unwind via the
    /// same shutdown signal).
    pub async fn run(self: Arc<Self>) {
        info!(port = ?self.local_addr().ok(), "CSMS accept loop starting");
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let server = self.clone();
                            tokio::spawn(async move { server.handle_connection(stream, peer).await; });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                _ = self.shutdown.notified().wait() => {
                    info!("CSMS accept loop shutting down");
                    break;
                }
            }
        }
        self.registry.sessions.clear();
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let stream = match &self.tls_acceptor {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(tls) => CsmsStream::Tls(Box::new(tls)),
                Err(e) => {
                    warn!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
            },
            None => CsmsStream::Plain(stream),
        };

        let cp_id_cell: Arc<std::sync::Mutex<String>> = Arc::new(std::sync::Mutex::new(String::new()));
        let cp_id_for_cb = cp_id_cell.clone();
        let callback = move |req: &Request, mut response: Response| {
            let cp_id = extract_charge_point_id(req.uri().path());
            *cp_id_for_cb.lock().unwrap() = cp_id;

            let offers_ocpp = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(',').any(|p| p.trim() == "ocpp1.6"))
                .unwrap_or(false);

            if offers_ocpp {
                response
                    .headers_mut()
                    .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("ocpp1.6"));
            } else {
                warn!(%peer, "client did not offer the ocpp1.6 subprotocol");
            }

            Ok(response)
        };

        let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(s) => s,
            Err(e) => {
                warn!(%peer, error = %e, "websocket handshake failed");
                return;
            }
        };

        let cp_id = cp_id_cell.lock().unwrap().clone();
        if cp_id.is_empty() {
            warn!(%peer, "rejecting connection with no charge point id in the path");
            return;
        }

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        self.registry.register(cp_id.clone(), outbound_tx);
        info!(cp_id = cp_id.as_str(), %peer, "CP connected");

        let mut send_task = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if ws_sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let registry = self.registry.clone();
        let bus = self.bus.clone();
        let recv_cp_id = cp_id.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(msg) = ws_source.next().await {
                match msg {
                    Ok(Message::Text(text)) => match OcppFrame::parse(&text) {
                        Ok(OcppFrame::Call {
                            unique_id,
                            action,
                            payload,
                        }) => {
                            let response_frame =
                                match handlers::dispatch(&registry, &bus, &recv_cp_id, &action, payload) {
                                    Ok(result_payload) => OcppFrame::CallResult {
                                        unique_id,
                                        payload: result_payload,
                                    },
                                    Err((error_code, error_description)) => {
                                        OcppFrame::error_response(unique_id, error_code, error_description)
                                    }
                                };
                            registry.send_to(&recv_cp_id, response_frame.serialize());
                        }
                        Ok(OcppFrame::CallResult { .. }) | Ok(OcppFrame::CallError { .. }) => {
                            debug!(
                                cp_id = recv_cp_id.as_str(),
                                "this CSMS never issues CALLs; ignoring unsolicited reply"
                            );
                        }
                        Err(e) => {
                            warn!(cp_id = recv_cp_id.as_str(), error = %e, "malformed OCPP frame");
                        }
                    },
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(Message::Binary(_)) | Ok(Message::Frame(_)) => {}
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => {}
            _ = &mut recv_task => {}
            _ = self.shutdown.notified().wait() => {}
        }
        send_task.abort();
        recv_task.abort();

        self.registry.unregister(&cp_id);
        info!(cp_id = cp_id.as_str(), "CP disconnected");
    }
}

fn extract_charge_point_id(path: &str) -> String {
    path.trim_start_matches('/')
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_cp_id_from_path() {
        assert_eq!(extract_charge_point_id("/CP_001"), "CP_001");
    }

    #[test]
    fn extracts_last_segment_from_nested_path() {
        assert_eq!(extract_charge_point_id("/ocpp/CP_002"), "CP_002");
    }
}
