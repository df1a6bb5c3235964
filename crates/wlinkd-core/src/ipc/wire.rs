//! Binary framing of the control-socket protocol.
//!
//! All integers are big-endian.
//!
//! ```text
//! header     type:u8  num_fields:u8
//! field      kind:u8  payload_len:u16  v0:u32  v1:u32  payload[payload_len]
//! message    header  field{num_fields}  terminator
//! ```
//!
//! The terminator is a field of kind 0 and is not counted in `num_fields`.
//! Readers tolerate peers that get the count wrong: a short count, an early
//! terminator or a missing terminator is reported on the [`Frame`] and
//! logged, and the message is still delivered. Fields past an understated
//! count are read up to the terminator so the next frame starts cleanly.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::types::{Field, FieldKind, FramingError, Message, MessageType, NetworkState, StatePair};

pub const HEADER_LEN: usize = 2;
pub const FIELD_HEADER_LEN: usize = 11;

/// One message as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u8,
    /// `None` for message types this side does not know.
    pub message: Option<Message>,
    pub issues: Vec<FramingError>,
}

/// Serialize a message: header, `fields`, terminator.
pub fn encode_frame(msg_type: u8, fields: &[Field]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + (fields.len() + 1) * FIELD_HEADER_LEN);
    buf.push(msg_type);
    buf.push(fields.len().min(u8::MAX as usize) as u8);
    for field in fields {
        encode_field(&mut buf, field);
    }
    encode_field(&mut buf, &Field::terminator());
    buf
}

fn encode_field(buf: &mut Vec<u8>, field: &Field) {
    let len = field.payload.len().min(u16::MAX as usize);
    buf.push(field.kind);
    buf.extend_from_slice(&(len as u16).to_be_bytes());
    buf.extend_from_slice(&field.v0.to_be_bytes());
    buf.extend_from_slice(&field.v1.to_be_bytes());
    buf.extend_from_slice(&field.payload[..len]);
}

/// Fields of a network-state update.
pub fn network_state_fields(state: &NetworkState) -> [Field; 2] {
    let pair = |kind, p: StatePair| Field::new(kind, p.state, p.error);
    [
        pair(FieldKind::SupplicantState, state.supplicant),
        pair(FieldKind::Dhcp4State, state.dhcp4),
    ]
}

/// Reads frames from a byte stream.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next frame.
    ///
    /// `Ok(None)` on a clean end of stream before a header. Running out of
    /// bytes inside a message is an error; the stream is unusable after it.
    pub async fn read_frame(&mut self) -> std::io::Result<Option<Frame>> {
        let mut header = [0u8; HEADER_LEN];
        if self.inner.read(&mut header[..1]).await? == 0 {
            return Ok(None);
        }
        self.inner.read_exact(&mut header[1..]).await?;
        let [msg_type, declared] = header;

        let mut message = Message::accumulator(msg_type);
        if message.is_none() {
            debug!(msg_type, "discarding message of unknown type");
        }

        let mut issues = Vec::new();
        let mut read = 0u8;
        let mut terminated = false;
        while read < declared {
            let field = self.read_field().await?;
            if field.is_terminator() {
                terminated = true;
                break;
            }
            if let Some(msg) = message.as_mut() {
                if !msg.apply(&field) {
                    debug!(msg_type, kind = field.kind, "ignoring field");
                }
            }
            read += 1;
        }

        if read != declared {
            issues.push(FramingError::CountMismatch { declared, read });
        }
        if !terminated {
            let mut field = self.read_field().await?;
            if !field.is_terminator() {
                issues.push(FramingError::MissingTerminator { kind: field.kind });
            }
            while !field.is_terminator() {
                if let Some(msg) = message.as_mut() {
                    if !msg.apply(&field) {
                        debug!(msg_type, kind = field.kind, "ignoring field");
                    }
                }
                field = self.read_field().await?;
            }
        }
        for issue in &issues {
            warn!(msg_type, %issue, "framing irregularity");
        }

        Ok(Some(Frame {
            msg_type,
            message,
            issues,
        }))
    }

    async fn read_field(&mut self) -> std::io::Result<Field> {
        let mut head = [0u8; FIELD_HEADER_LEN];
        self.inner.read_exact(&mut head).await?;
        let len = u16::from_be_bytes([head[1], head[2]]) as usize;
        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await?;
        Ok(Field {
            kind: head[0],
            v0: u32::from_be_bytes([head[3], head[4], head[5], head[6]]),
            v1: u32::from_be_bytes([head[7], head[8], head[9], head[10]]),
            payload,
        })
    }
}

/// Writes frames to a byte stream, flushing after each message.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_message(&mut self, msg_type: MessageType, fields: &[Field]) -> std::io::Result<()> {
        let bytes = encode_frame(msg_type as u8, fields);
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await
    }

    pub async fn write_app_state(&mut self, index: u32, state: u32, error: u32) -> std::io::Result<()> {
        self.write_message(
            MessageType::AppStateUpdate,
            &[
                Field::new(FieldKind::AppIndex, index, 0),
                Field::new(FieldKind::AppState, state, error),
            ],
        )
        .await
    }

    pub async fn write_connectivity(
        &mut self,
        index: u32,
        state: u32,
        error: u32,
    ) -> std::io::Result<()> {
        self.write_message(
            MessageType::AppStateUpdate,
            &[
                Field::new(FieldKind::AppIndex, index, 0),
                Field::new(FieldKind::Connectivity, state, error),
            ],
        )
        .await
    }

    pub async fn write_network_state(&mut self, state: &NetworkState) -> std::io::Result<()> {
        self.write_message(MessageType::NetworkStateUpdate, &network_state_fields(state))
            .await
    }
}
