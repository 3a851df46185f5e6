//! Serialization of state mappings into checkpoint files

use bytes::{BufMut, Bytes, BytesMut};
use runtime_core::{Error, MapLocation, Result, StateDict, StateKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Turns state mappings into file contents and back.
///
/// The checkpointer treats the bytes as opaque; only a codec knows the format.
pub trait StateCodec: Send + Sync {
    /// Serialize one half of a checkpoint
    fn encode(&self, kind: StateKind, state: &StateDict) -> Result<Bytes>;

    /// Deserialize file contents read from `source`, materialising values at
    /// `location`
    fn decode(
        &self,
        kind: StateKind,
        source: &str,
        data: &[u8],
        location: MapLocation,
    ) -> Result<StateDict>;
}

/// Checkpoint file header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub kind: StateKind,
    pub payload_len: u64,
}

/// Magic bytes for checkpoint files
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"CKPT";

/// Checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Bincode header followed by a JSON payload.
///
/// Values are plain host data, so every [`MapLocation`] decodes the same way.
#[derive(Debug, Clone, Copy, Default)]
pub struct FramedJsonCodec;

impl FramedJsonCodec {
    fn corrupted(source: &str, reason: impl Into<String>) -> Error {
        Error::CheckpointCorrupted {
            path: source.to_string(),
            reason: reason.into(),
        }
    }
}

impl StateCodec for FramedJsonCodec {
    fn encode(&self, kind: StateKind, state: &StateDict) -> Result<Bytes> {
        let payload = serde_json::to_vec(state)?;
        let header = CheckpointHeader {
            magic: CHECKPOINT_MAGIC,
            version: CHECKPOINT_VERSION,
            kind,
            payload_len: payload.len() as u64,
        };
        let header = bincode::serialize(&header)?;

        let mut buf = BytesMut::with_capacity(header.len() + payload.len());
        buf.put_slice(&header);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    fn decode(
        &self,
        kind: StateKind,
        source: &str,
        data: &[u8],
        location: MapLocation,
    ) -> Result<StateDict> {
        let mut reader = data;
        let header: CheckpointHeader = bincode::deserialize_from(&mut reader)
            .map_err(|e| Self::corrupted(source, format!("unreadable header: {}", e)))?;

        if header.magic != CHECKPOINT_MAGIC {
            return Err(Self::corrupted(source, "invalid checkpoint magic"));
        }

        if header.version != CHECKPOINT_VERSION {
            warn!(
                source = source,
                "Checkpoint version mismatch: expected {}, got {}",
                CHECKPOINT_VERSION,
                header.version
            );
        }

        if header.kind != kind {
            return Err(Self::corrupted(
                source,
                format!("expected {:?} state, found {:?}", kind, header.kind),
            ));
        }

        if header.payload_len != reader.len() as u64 {
            return Err(Self::corrupted(
                source,
                format!(
                    "payload is {} bytes, header says {}",
                    reader.len(),
                    header.payload_len
                ),
            ));
        }

        debug!(source = source, ?location, size = reader.len(), "Decoding state");
        serde_json::from_slice(reader).map_err(|e| Self::corrupted(source, e.to_string()))
    }
}
