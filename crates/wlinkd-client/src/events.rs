use tracing::debug;
use wlinkd_core::ipc::{NetworkState, StateCode};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonEvent {
    Connecting,
    Connected,
    ConnectFailed,
    /// The daemon closed the connection or it broke.
    Disconnected,
}

/// Changes in the network state pushed by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    SupplicantConnected,
    SupplicantDisconnected,
}

/// Everything a [`LinkClient`](crate::LinkClient) subscriber receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Daemon(DaemonEvent),
    Network(NetworkEvent),
}

/// Last network state seen, diffed against each push.
///
/// Starts all-unknown, so the first push always counts as a change.
#[derive(Debug, Default, Clone)]
pub struct NetworkStateTracker {
    current: NetworkState,
}

impl NetworkStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> NetworkState {
        self.current
    }

    /// Take a new state. An identical state yields nothing; otherwise a
    /// supplicant transition yields its event and the whole cache is
    /// replaced either way.
    pub fn update(&mut self, next: NetworkState) -> Option<NetworkEvent> {
        if next == self.current {
            debug!("network state unchanged");
            return None;
        }
        let event = (next.supplicant.state != self.current.supplicant.state).then(|| {
            if next.supplicant.is(StateCode::Active) {
                NetworkEvent::SupplicantConnected
            } else {
                NetworkEvent::SupplicantDisconnected
            }
        });
        self.current = next;
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wlinkd_core::ipc::StatePair;

    fn state(supplicant: StateCode, dhcp4: StateCode) -> NetworkState {
        NetworkState {
            supplicant: StatePair::new(supplicant, 0),
            dhcp4: StatePair::new(dhcp4, 0),
        }
    }

    #[test]
    fn test_identical_states_are_silent() {
        let mut tracker = NetworkStateTracker::new();
        let s = state(StateCode::Active, StateCode::Inactive);
        assert_eq!(tracker.update(s), Some(NetworkEvent::SupplicantConnected));
        assert_eq!(tracker.update(s), None);
        assert_eq!(tracker.update(s), None);
    }

    #[test]
    fn test_active_to_other_is_one_disconnect() {
        let mut tracker = NetworkStateTracker::new();
        tracker.update(state(StateCode::Active, StateCode::Active));
        assert_eq!(
            tracker.update(state(StateCode::Inactive, StateCode::Active)),
            Some(NetworkEvent::SupplicantDisconnected)
        );
        // Error code change only: cache updated, no event.
        assert_eq!(
            tracker.update(NetworkState {
                supplicant: StatePair::new(StateCode::Inactive, 1),
                ..tracker.current()
            }),
            None
        );
        assert_eq!(tracker.current().supplicant.error, 1);
    }

    #[test]
    fn test_dhcp_only_change_updates_cache() {
        let mut tracker = NetworkStateTracker::new();
        tracker.update(state(StateCode::Active, StateCode::Inactive));
        assert_eq!(tracker.update(state(StateCode::Active, StateCode::Active)), None);
        assert!(tracker.current().dhcp4.is(StateCode::Active));
    }

    #[test]
    fn test_first_push_counts_as_change() {
        let mut tracker = NetworkStateTracker::new();
        assert_eq!(
            tracker.update(state(StateCode::Inactive, StateCode::Inactive)),
            Some(NetworkEvent::SupplicantDisconnected)
        );
    }
}
