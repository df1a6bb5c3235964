//! Message, field, and state codes of the control-socket protocol.
//!
//! Shared by the daemon (`ipc::server`) and the client library.

/// Message type byte of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// App → daemon: health of one app.
    AppStateUpdate = 0,
    /// Daemon → app: current network state.
    NetworkStateUpdate = 1,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(MessageType::AppStateUpdate),
            1 => Some(MessageType::NetworkStateUpdate),
            _ => None,
        }
    }
}

/// Field kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Terminator = 0,
    /// `v0` = app index.
    AppIndex = 1,
    /// `v0` = state, `v1` = error.
    AppState = 2,
    /// `v0` = state, `v1` = error.
    Connectivity = 3,
    /// `v0` = state, `v1` = error.
    SupplicantState = 4,
    /// `v0` = state, `v1` = error.
    Dhcp4State = 5,
}

impl FieldKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => FieldKind::Terminator,
            1 => FieldKind::AppIndex,
            2 => FieldKind::AppState,
            3 => FieldKind::Connectivity,
            4 => FieldKind::SupplicantState,
            5 => FieldKind::Dhcp4State,
            _ => return None,
        })
    }
}

/// Values carried in a state slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCode {
    Unknown = 0,
    Ok = 1,
    Err = 2,
    Active = 3,
    Inactive = 4,
}

impl StateCode {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => StateCode::Unknown,
            1 => StateCode::Ok,
            2 => StateCode::Err,
            3 => StateCode::Active,
            4 => StateCode::Inactive,
            _ => return None,
        })
    }
}

impl From<StateCode> for u32 {
    fn from(code: StateCode) -> u32 {
        code as u32
    }
}

/// One wire field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Field {
    pub kind: u8,
    pub v0: u32,
    pub v1: u32,
    pub payload: Vec<u8>,
}

impl Field {
    pub fn new(kind: FieldKind, v0: u32, v1: u32) -> Self {
        Self {
            kind: kind as u8,
            v0,
            v1,
            payload: Vec::new(),
        }
    }

    pub fn terminator() -> Self {
        Self::default()
    }

    pub fn is_terminator(&self) -> bool {
        self.kind == FieldKind::Terminator as u8
    }
}

/// A `(state, error)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatePair {
    pub state: u32,
    pub error: u32,
}

impl StatePair {
    pub fn new(state: StateCode, error: u32) -> Self {
        Self {
            state: state.into(),
            error,
        }
    }

    pub fn is(&self, code: StateCode) -> bool {
        self.state == code as u32
    }
}

/// Accumulated app-state update. Only fields present on the wire are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppStateUpdate {
    pub index: Option<u32>,
    pub app: Option<StatePair>,
    pub connectivity: Option<StatePair>,
}

/// Network state pushed from the daemon to its clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkState {
    pub supplicant: StatePair,
    pub dhcp4: StatePair,
}

/// A decoded message of a known type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    AppState(AppStateUpdate),
    NetworkState(NetworkState),
}

impl Message {
    /// Empty accumulator for `msg_type`, or `None` for unknown types.
    pub(crate) fn accumulator(msg_type: u8) -> Option<Self> {
        match MessageType::from_u8(msg_type)? {
            MessageType::AppStateUpdate => Some(Message::AppState(AppStateUpdate::default())),
            MessageType::NetworkStateUpdate => {
                Some(Message::NetworkState(NetworkState::default()))
            }
        }
    }

    /// Fold one non-terminator field into the message. Returns `false` when
    /// the field kind means nothing for this message type.
    pub(crate) fn apply(&mut self, field: &Field) -> bool {
        let pair = StatePair {
            state: field.v0,
            error: field.v1,
        };
        match (self, FieldKind::from_u8(field.kind)) {
            (Message::AppState(update), Some(FieldKind::AppIndex)) => {
                update.index = Some(field.v0);
            }
            (Message::AppState(update), Some(FieldKind::AppState)) => {
                update.app = Some(pair);
            }
            (Message::AppState(update), Some(FieldKind::Connectivity)) => {
                update.connectivity = Some(pair);
            }
            (Message::NetworkState(state), Some(FieldKind::SupplicantState)) => {
                state.supplicant = pair;
            }
            (Message::NetworkState(state), Some(FieldKind::Dhcp4State)) => {
                state.dhcp4 = pair;
            }
            _ => return false,
        }
        true
    }
}

/// Non-fatal irregularities found while reading one frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("header declared {declared} fields but {read} were read")]
    CountMismatch { declared: u8, read: u8 },

    #[error("expected terminator, found field kind {kind}")]
    MissingTerminator { kind: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_app_fields() {
        let mut msg = Message::accumulator(0).unwrap();
        assert!(msg.apply(&Field::new(FieldKind::AppIndex, 2, 0)));
        assert!(msg.apply(&Field::new(FieldKind::AppState, StateCode::Err as u32, 7)));
        assert!(!msg.apply(&Field::new(FieldKind::Dhcp4State, 3, 0)));
        assert_eq!(
            msg,
            Message::AppState(AppStateUpdate {
                index: Some(2),
                app: Some(StatePair::new(StateCode::Err, 7)),
                connectivity: None,
            })
        );
    }

    #[test]
    fn test_unknown_type_has_no_accumulator() {
        assert!(Message::accumulator(9).is_none());
    }

    #[test]
    fn test_state_code_roundtrip() {
        for v in 0..5 {
            assert_eq!(StateCode::from_u32(v).map(u32::from), Some(v));
        }
        assert_eq!(StateCode::from_u32(5), None);
    }
}
