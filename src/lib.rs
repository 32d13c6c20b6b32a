//! # cp-anomaly-sim
//!
//! A controllable OCPP 1.6-J charge-point simulator and labeled
//! anomaly-dataset generator.
//!
//! ## Architecture
//!
//! - **support**: cross-cutting utilities (error taxonomy, OCPP-J framing,
//!   shutdown coordination)
//! - **transport**: WebSocket dial/accept plumbing, optional TLS
//! - **ocpp_session**: outgoing-call correlation (message id → reply)
//! - **domain**: session/connector/event/auth types shared by both sides
//! - **cp_client**: the scripted charge point
//! - **csms**: the central system management service
//! - **eventbus**: synchronous fan-out from CSMS dispatch to log writers
//! - **csv_log**: the six append-only CSV tables a run produces
//! - **scenario**: the `Scenario` trait, the catalog, and the drive loop
//! - **config** / **cli**: layered run configuration

pub mod cli;
pub mod config;
pub mod cp_client;
pub mod csms;
pub mod csv_log;
pub mod domain;
pub mod eventbus;
pub mod ocpp_session;
pub mod scenario;
pub mod support;
pub mod transport;

pub use config::{Mode, RunConfig};
pub use support::errors::{SimError, SimResult};
