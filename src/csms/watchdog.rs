//! Heartbeat watchdog: evicts sessions that have gone silent past 3x their
//! negotiated interval. Adapted from this workspace's
//! `application::services::heartbeat_monitor` polling-loop shape.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::domain::events::{CpOfflineEvent, Event};
use crate::domain::session::ConnectorStatus;
use crate::eventbus::EventBus;
use crate::support::shutdown::ShutdownSignal;

use super::registry::SessionRegistry;

const TICK: Duration = Duration::from_secs(5);

/// Spawns the watchdog tick loop. Runs until `shutdown` fires.
pub fn spawn_heartbeat_watchdog(
    registry: Arc<SessionRegistry>,
    bus: EventBus,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    evict_stale(&registry, &bus, Instant::now());
                }
                _ = shutdown.notified().wait() => {
                    break;
                }
            }
        }
    })
}

fn evict_stale(registry: &SessionRegistry, bus: &EventBus, now: Instant) {
    let stale_ids: Vec<String> = registry
        .sessions
        .iter()
        .filter(|entry| entry.value().is_stale(now))
        .map(|entry| entry.key().clone())
        .collect();

    for cp_id in stale_ids {
        if let Some(mut session) = registry.sessions.get_mut(&cp_id) {
            for connector in session.connectors.values_mut() {
                connector.status = ConnectorStatus::Unavailable;
            }
        }
        registry.unregister(&cp_id);
        info!(cp_id = cp_id.as_str(), "CP evicted by heartbeat watchdog");
        bus.publish(Event::CpOffline(CpOfflineEvent {
            cp_id,
            timestamp: Utc::now(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::auth::AuthorizedTags;
    use tokio::sync::mpsc;

    #[test]
    fn evicts_sessions_past_three_times_their_interval() {
        let registry = SessionRegistry::new(AuthorizedTags::default_fixture());
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("CP_001".to_string(), tx);
        {
            let mut session = registry.sessions.get_mut("CP_001").unwrap();
            session.heartbeat_interval = 1;
            session.last_heartbeat = Instant::now() - Duration::from_secs(10);
        }

        let bus = EventBus::new();
        evict_stale(&registry, &bus, Instant::now());

        assert!(registry.sessions.is_empty());
    }

    #[test]
    fn leaves_fresh_sessions_alone() {
        let registry = SessionRegistry::new(AuthorizedTags::default_fixture());
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("CP_001".to_string(), tx);

        let bus = EventBus::new();
        evict_stale(&registry, &bus, Instant::now());

        assert_eq!(registry.sessions.len(), 1);
    }
}
