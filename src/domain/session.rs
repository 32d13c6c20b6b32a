//! CSMS-side per-CP session state.

use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Instant;

use tokio::sync::mpsc;

/// Connector status as carried by StatusNotification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorStatus {
    Available,
    Preparing,
    Charging,
    Finishing,
    Faulted,
    Unavailable,
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Preparing => "Preparing",
            Self::Charging => "Charging",
            Self::Finishing => "Finishing",
            Self::Faulted => "Faulted",
            Self::Unavailable => "Unavailable",
        }
    }
}

impl std::fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ConnectorRecord {
    pub status: ConnectorStatus,
    pub error_code: Option<String>,
    pub last_tx_id: Option<i32>,
}

impl Default for ConnectorRecord {
    fn default() -> Self {
        Self {
            status: ConnectorStatus::Available,
            error_code: None,
            last_tx_id: None,
        }
    }
}

/// Live state the CSMS holds for one connected charge point.
///
/// Created on WebSocket accept, destroyed on close or watchdog eviction.
/// The outbound sender is used to push CALLRESULT/CALLERROR frames back to
/// the connection's write half; it is independent of the pending-reply
/// bookkeeping the CP client side owns for its own outgoing CALLs.
pub struct CpSession {
    pub cp_id: String,
    pub outbound: mpsc::UnboundedSender<String>,
    pub boot_accepted: bool,
    pub heartbeat_interval: u64,
    pub last_heartbeat: Instant,
    pub connectors: HashMap<u32, ConnectorRecord>,
    pub authorized_tags: HashSet<String>,
    pub next_tx_id: i32,
}

impl CpSession {
    pub fn new(cp_id: String, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            cp_id,
            outbound,
            boot_accepted: false,
            heartbeat_interval: 10,
            last_heartbeat: Instant::now(),
            connectors: HashMap::new(),
            authorized_tags: HashSet::new(),
            next_tx_id: 1,
        }
    }

    pub fn connector_mut(&mut self, connector_id: u32) -> &mut ConnectorRecord {
        self.connectors.entry(connector_id).or_default()
    }

    pub fn allocate_transaction_id(&mut self) -> i32 {
        let id = self.next_tx_id;
        self.next_tx_id += 1;
        id
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        now.duration_since(self.last_heartbeat).as_secs() > 3 * self.heartbeat_interval
    }
}
