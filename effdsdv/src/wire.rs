//! Byte layout of the control messages.
//!
//! Every message is prefixed by a 2 byte big-endian type, a datagram is a concatenation of
//! messages. A datagram is decoded completely before anything is applied, so a malformed
//! message anywhere drops the whole datagram.

use std::time::Duration;

use crate::concepts::packet::{DistanceVector, Message, Packet, RouteAck, RouteRequest};
use crate::feedback::CodecError;
use crate::framework::{RoutingSystem, WireAddress};

pub const TYPE_SIZE: usize = 2;
/// destination(4) + hops(2) + seqno(4)
pub const UPDATE_SIZE: usize = 10;
/// destination(4) + reserved(2)
pub const REQUEST_SIZE: usize = 6;
/// destination(4) + hops(2) + elapsed ms(4)
pub const ACK_SIZE: usize = 10;

pub const TYPE_UPDATE: u16 = 1;
pub const TYPE_REQUEST: u16 = 2;
pub const TYPE_ACK: u16 = 3;

pub fn encode<T: RoutingSystem + ?Sized>(packet: &Packet<T>) -> Vec<u8> {
    let mut out = Vec::with_capacity(packet.messages.len() * (TYPE_SIZE + UPDATE_SIZE));
    for msg in &packet.messages {
        encode_into(msg, &mut out);
    }
    out
}

pub fn decode<T: RoutingSystem + ?Sized>(mut raw: &[u8]) -> Result<Packet<T>, CodecError> {
    let mut packet = Packet::default();
    while !raw.is_empty() {
        let (msg, rest) = decode_message(raw)?;
        packet.push(msg);
        raw = rest;
    }
    Ok(packet)
}

/// Appends one type-prefixed message to `out`
pub fn encode_into<T: RoutingSystem + ?Sized>(msg: &Message<T>, out: &mut Vec<u8>) {
    match msg {
        Message::Update(dv) => {
            out.extend_from_slice(&TYPE_UPDATE.to_be_bytes());
            out.extend_from_slice(&dv.destination.to_wire());
            out.extend_from_slice(&dv.hops.to_be_bytes());
            out.extend_from_slice(&dv.seqno.to_be_bytes());
        }
        Message::Request(req) => {
            out.extend_from_slice(&TYPE_REQUEST.to_be_bytes());
            out.extend_from_slice(&req.destination.to_wire());
            out.extend_from_slice(&0u16.to_be_bytes());
        }
        Message::Ack(ack) => {
            // elapsed times beyond u32 milliseconds (~49 days) saturate
            let elapsed = u32::try_from(ack.elapsed.as_millis()).unwrap_or(u32::MAX);
            out.extend_from_slice(&TYPE_ACK.to_be_bytes());
            out.extend_from_slice(&ack.destination.to_wire());
            out.extend_from_slice(&ack.hops.to_be_bytes());
            out.extend_from_slice(&elapsed.to_be_bytes());
        }
    }
}

/// Decodes the message at the start of `raw`, returning it with the remaining bytes
pub fn decode_message<T: RoutingSystem + ?Sized>(
    raw: &[u8],
) -> Result<(Message<T>, &[u8]), CodecError> {
    let kind = read_u16(raw, 0)?;
    let body = &raw[TYPE_SIZE..];
    match kind {
        TYPE_UPDATE => {
            ensure_len(body, UPDATE_SIZE)?;
            let msg = Message::Update(DistanceVector {
                destination: T::NodeAddress::from_wire(read_addr(body, 0)?),
                hops: read_u16(body, 4)?,
                seqno: read_u32(body, 6)?,
            });
            Ok((msg, &body[UPDATE_SIZE..]))
        }
        TYPE_REQUEST => {
            ensure_len(body, REQUEST_SIZE)?;
            let reserved = read_u16(body, 4)?;
            if reserved != 0 {
                return Err(CodecError::ReservedNotZero(reserved));
            }
            let msg = Message::Request(RouteRequest {
                destination: T::NodeAddress::from_wire(read_addr(body, 0)?),
            });
            Ok((msg, &body[REQUEST_SIZE..]))
        }
        TYPE_ACK => {
            ensure_len(body, ACK_SIZE)?;
            let msg = Message::Ack(RouteAck {
                destination: T::NodeAddress::from_wire(read_addr(body, 0)?),
                hops: read_u16(body, 4)?,
                elapsed: Duration::from_millis(read_u32(body, 6)? as u64),
            });
            Ok((msg, &body[ACK_SIZE..]))
        }
        other => Err(CodecError::UnknownType(other)),
    }
}

fn ensure_len(raw: &[u8], needed: usize) -> Result<(), CodecError> {
    if raw.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            actual: raw.len(),
        });
    }
    Ok(())
}

fn read_array<const N: usize>(raw: &[u8], at: usize) -> Result<[u8; N], CodecError> {
    raw.get(at..at + N)
        .and_then(|s| s.try_into().ok())
        .ok_or(CodecError::Truncated {
            needed: at + N,
            actual: raw.len(),
        })
}

fn read_addr(raw: &[u8], at: usize) -> Result<[u8; 4], CodecError> {
    read_array::<4>(raw, at)
}

fn read_u16(raw: &[u8], at: usize) -> Result<u16, CodecError> {
    read_array::<2>(raw, at).map(u16::from_be_bytes)
}

fn read_u32(raw: &[u8], at: usize) -> Result<u32, CodecError> {
    read_array::<4>(raw, at).map(u32::from_be_bytes)
}
