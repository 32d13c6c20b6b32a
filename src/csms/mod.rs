//! The CSMS: accepts CP connections, dispatches OCPP actions, runs the
//! heartbeat watchdog. See §4.3.

mod handlers;
mod registry;
mod server;
mod watchdog;

pub use registry::SessionRegistry;
pub use server::CsmsServer;
pub use watchdog::spawn_heartbeat_watchdog;
