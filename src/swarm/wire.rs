/// Wire format for peer weight exchange.
///
/// Frames are `[u32 message type][u64 payload length][payload]`, all
/// little-endian. Only params frames carry a payload:
/// `[u32 node id][u64 step][u32 count][count x f32]`.
use std::io::{Read, Write};

const MSG_PING: u32 = 1;
const MSG_PONG: u32 = 2;
const MSG_PULL: u32 = 3;
const MSG_PARAMS: u32 = 4;
const MSG_NOT_READY: u32 = 5;

const HEADER_BYTES: usize = 12;
const PARAMS_PREFIX_BYTES: usize = 16;

/// Upper bound on a frame payload; a params frame for a 400K-parameter
/// model is under 2 MB, so this caps runaway peers well above any
/// legitimate snapshot.
pub const MAX_PAYLOAD_BYTES: u64 = 256 * 1024 * 1024;

/// A parameter snapshot as it travels between peers.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamsMsg {
    /// Originating node id
    pub node_id: u32,
    /// Optimizer step at which the snapshot was published
    pub step: u64,
    /// Flattened model parameters in sorted-name order
    pub values: Vec<f32>,
}

/// One protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Liveness probe
    Ping,
    /// Liveness reply
    Pong,
    /// Request for the peer's latest snapshot
    Pull,
    /// A parameter snapshot
    Params(ParamsMsg),
    /// Pull reply when no snapshot has been published yet
    NotReady,
}

impl Frame {
    fn msg_type(&self) -> u32 {
        match self {
            Frame::Ping => MSG_PING,
            Frame::Pong => MSG_PONG,
            Frame::Pull => MSG_PULL,
            Frame::Params(_) => MSG_PARAMS,
            Frame::NotReady => MSG_NOT_READY,
        }
    }

    /// Serialize the frame onto a writer
    pub fn write_to<W: Write>(&self, w: &mut W) -> crate::Result<()> {
        let payload = match self {
            Frame::Params(msg) => encode_params(msg),
            _ => Vec::new(),
        };

        w.write_all(&self.msg_type().to_le_bytes())?;
        w.write_all(&(payload.len() as u64).to_le_bytes())?;
        w.write_all(&payload)?;
        w.flush()?;
        Ok(())
    }

    /// Read one frame from a reader
    pub fn read_from<R: Read>(r: &mut R) -> crate::Result<Frame> {
        let mut header = [0u8; HEADER_BYTES];
        r.read_exact(&mut header)?;

        let msg_type = read_u32(&header[0..4]);
        let payload_len = read_u64(&header[4..12]);
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(crate::SwarmError::Sync(format!(
                "frame payload of {} bytes exceeds the {} byte limit",
                payload_len, MAX_PAYLOAD_BYTES
            )));
        }

        let mut payload = vec![0u8; payload_len as usize];
        r.read_exact(&mut payload)?;

        match msg_type {
            MSG_PARAMS => Ok(Frame::Params(decode_params(&payload)?)),
            MSG_PING | MSG_PONG | MSG_PULL | MSG_NOT_READY => {
                if !payload.is_empty() {
                    return Err(crate::SwarmError::Sync(format!(
                        "message type {} carries an unexpected {} byte payload",
                        msg_type,
                        payload.len()
                    )));
                }
                Ok(match msg_type {
                    MSG_PING => Frame::Ping,
                    MSG_PONG => Frame::Pong,
                    MSG_PULL => Frame::Pull,
                    _ => Frame::NotReady,
                })
            }
            other => Err(crate::SwarmError::Sync(format!(
                "unknown message type {}",
                other
            ))),
        }
    }
}

fn encode_params(msg: &ParamsMsg) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PARAMS_PREFIX_BYTES + msg.values.len() * 4);
    buf.extend_from_slice(&msg.node_id.to_le_bytes());
    buf.extend_from_slice(&msg.step.to_le_bytes());
    buf.extend_from_slice(&(msg.values.len() as u32).to_le_bytes());
    for v in &msg.values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

fn decode_params(payload: &[u8]) -> crate::Result<ParamsMsg> {
    if payload.len() < PARAMS_PREFIX_BYTES {
        return Err(crate::SwarmError::Sync(format!(
            "params payload truncated: {} bytes",
            payload.len()
        )));
    }

    let node_id = read_u32(&payload[0..4]);
    let step = read_u64(&payload[4..12]);
    let count = read_u32(&payload[12..16]) as usize;

    let expected = PARAMS_PREFIX_BYTES + count * 4;
    if payload.len() != expected {
        return Err(crate::SwarmError::Sync(format!(
            "params payload declares {} values but is {} bytes, expected {}",
            count,
            payload.len(),
            expected
        )));
    }

    let values = payload[PARAMS_PREFIX_BYTES..]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Ok(ParamsMsg {
        node_id,
        step,
        values,
    })
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn read_u64(buf: &[u8]) -> u64 {
    u64::from_le_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ])
}
