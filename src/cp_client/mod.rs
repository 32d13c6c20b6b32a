//! The simulated charge point: connection lifecycle, OCPP calls, heartbeat
//! loop. See §4.2.

mod client;

pub use client::CpClient;
