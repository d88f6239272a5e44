use crate::comm::error::CommError;
use crate::comm::types::{Envelope, MsgType};
use rmp_serde::decode::Deserializer;
use rmp_serde::encode::Serializer;
use serde::Deserialize;
use std::io::Cursor;
use std::result::Result as StdResult;

/// Encode a packet with given type, sequence, and envelope
pub fn encode_packet(
    msg_type: MsgType,
    seq: u32,
    payload: Option<&impl serde::Serialize>,
) -> StdResult<Vec<u8>, CommError> {
    let mut buf = Vec::new();

    // Write msg type (1 byte)
    buf.push(msg_type as u8);

    // Write seq (4 bytes, big-endian)
    buf.extend_from_slice(&seq.to_be_bytes());

    // Write payload if present
    if let Some(p) = payload {
        let mut ser = Serializer::new(&mut buf).with_struct_map();
        p.serialize(&mut ser)
            .map_err(|e| CommError::EncodeError(e.to_string()))?;
    }

    Ok(buf)
}

/// Decode packet type and seq from raw bytes
pub fn decode_header(data: &[u8]) -> StdResult<(MsgType, u32), CommError> {
    if data.len() < 5 {
        return Err(CommError::DecodeError("Packet too short".to_string()));
    }

    let msg_type = MsgType::from_u8(data[0])
        .ok_or_else(|| CommError::DecodeError(format!("Unknown msg type: {}", data[0])))?;

    let seq = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);

    Ok((msg_type, seq))
}

/// Decode an envelope from packet payload bytes
pub fn decode_envelope(data: &[u8]) -> StdResult<Envelope, CommError> {
    let mut de = Deserializer::new(Cursor::new(data));
    Envelope::deserialize(&mut de).map_err(|e| CommError::DecodeError(e.to_string()))
}

/// Encode request ack (no payload)
pub fn encode_request_ack(seq: u32) -> StdResult<Vec<u8>, CommError> {
    encode_packet(MsgType::RequestAck, seq, None::<&()>)
}

/// Encode a response envelope
pub fn encode_response(seq: u32, envelope: &Envelope) -> StdResult<Vec<u8>, CommError> {
    encode_packet(MsgType::Response, seq, Some(envelope))
}
