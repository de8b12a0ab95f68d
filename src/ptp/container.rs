//! PTP container framing: the 12-byte header plus payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_traits::FromPrimitive;

use super::codes::{ContainerType, OperationCode, ResponseCode};
use crate::error::{Error, Result};

/// Size of the container header: length (u32), type (u16), code (u16),
/// transaction id (u32).
pub const CONTAINER_HEADER_LEN: usize = 12;

/// Length value used by devices that stream a data phase of unknown size;
/// the transfer then ends on a short or zero-length packet.
pub const UNKNOWN_CONTAINER_LEN: u32 = 0xFFFF_FFFF;

/// Containers above this size are assembled in memory (commands, responses,
/// info records, property lists). Data phases stream and are not subject to
/// the cap. A device declaring more than this outside a data phase is
/// malfunctioning.
pub const MAX_ASSEMBLED_CONTAINER: u32 = 4 * 1024 * 1024;

/// A decoded container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub length: u32,
    pub kind: ContainerType,
    pub code: u16,
    pub transaction_id: u32,
}

impl ContainerHeader {
    /// Parses the 12-byte header off the front of `buf`.
    pub fn parse(buf: &[u8]) -> Result<ContainerHeader> {
        if buf.len() < CONTAINER_HEADER_LEN {
            return Err(Error::invalid_data(format!(
                "container header truncated: {} bytes",
                buf.len()
            )));
        }
        let mut b = buf;
        let length = b.get_u32_le();
        let raw_kind = b.get_u16_le();
        let code = b.get_u16_le();
        let transaction_id = b.get_u32_le();

        let kind = ContainerType::from_u16(raw_kind)
            .ok_or_else(|| Error::invalid_data(format!("unknown container type {raw_kind}")))?;
        if length != UNKNOWN_CONTAINER_LEN && (length as usize) < CONTAINER_HEADER_LEN {
            return Err(Error::invalid_data(format!("container length {length} below header size")));
        }
        Ok(ContainerHeader {
            length,
            kind,
            code,
            transaction_id,
        })
    }

    /// Encodes a header. `payload_len` of `None` encodes the streaming
    /// unknown-length marker.
    pub fn encode(kind: ContainerType, code: u16, transaction_id: u32, payload_len: Option<u64>) -> [u8; 12] {
        let length = match payload_len {
            Some(n) => match u32::try_from(n + CONTAINER_HEADER_LEN as u64) {
                Ok(total) if total != UNKNOWN_CONTAINER_LEN => total,
                // Payloads at or above 4 GiB fall back to the streaming marker.
                _ => UNKNOWN_CONTAINER_LEN,
            },
            None => UNKNOWN_CONTAINER_LEN,
        };
        let mut out = [0u8; 12];
        let mut b = &mut out[..];
        b.put_u32_le(length);
        b.put_u16_le(kind as u16);
        b.put_u16_le(code);
        b.put_u32_le(transaction_id);
        out
    }

    /// Declared payload length, or `None` for the streaming marker.
    pub fn payload_len(&self) -> Option<u64> {
        if self.length == UNKNOWN_CONTAINER_LEN {
            None
        } else {
            Some(u64::from(self.length) - CONTAINER_HEADER_LEN as u64)
        }
    }
}

/// A fully assembled container.
#[derive(Debug, Clone)]
pub struct Container {
    pub kind: ContainerType,
    pub code: u16,
    pub transaction_id: u32,
    pub payload: Bytes,
}

impl Container {
    /// Encodes a command container with up to five `u32` parameters.
    pub fn command(code: OperationCode, transaction_id: u32, params: &[u32]) -> Vec<u8> {
        debug_assert!(params.len() <= 5, "PTP commands carry at most 5 parameters");
        let mut out = BytesMut::with_capacity(CONTAINER_HEADER_LEN + params.len() * 4);
        out.put_slice(&ContainerHeader::encode(
            ContainerType::Command,
            code.0,
            transaction_id,
            Some(params.len() as u64 * 4),
        ));
        for p in params {
            out.put_u32_le(*p);
        }
        out.to_vec()
    }

    /// Encodes any container kind with an opaque payload. Used by tests and
    /// by the data-phase writer for small payloads.
    pub fn encode(kind: ContainerType, code: u16, transaction_id: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(CONTAINER_HEADER_LEN + payload.len());
        out.put_slice(&ContainerHeader::encode(kind, code, transaction_id, Some(payload.len() as u64)));
        out.put_slice(payload);
        out.to_vec()
    }

    /// Decodes a complete container from `buf`, validating the declared
    /// length against the actual byte count.
    pub fn decode(buf: Bytes) -> Result<Container> {
        let header = ContainerHeader::parse(&buf)?;
        if header.length != UNKNOWN_CONTAINER_LEN && header.length as usize != buf.len() {
            return Err(Error::invalid_data(format!(
                "container length {} does not match {} received bytes",
                header.length,
                buf.len()
            )));
        }
        Ok(Container {
            kind: header.kind,
            code: header.code,
            transaction_id: header.transaction_id,
            payload: buf.slice(CONTAINER_HEADER_LEN..),
        })
    }

    /// Decodes the payload as `u32` parameters (commands, responses, events).
    pub fn params(&self) -> Result<Vec<u32>> {
        if self.payload.len() % 4 != 0 {
            return Err(Error::invalid_data(format!(
                "parameter payload of {} bytes is not a multiple of 4",
                self.payload.len()
            )));
        }
        let mut buf = &self.payload[..];
        let mut params = Vec::with_capacity(buf.len() / 4);
        while buf.has_remaining() {
            params.push(buf.get_u32_le());
        }
        Ok(params)
    }

    /// Interprets this container as the response terminating `operation`.
    /// Non-OK codes become [`Error::Protocol`]; a transaction id other than
    /// `transaction_id` is a protocol violation.
    pub fn expect_response(&self, operation: OperationCode, transaction_id: u32) -> Result<Vec<u32>> {
        if self.kind != ContainerType::Response {
            return Err(Error::invalid_data(format!(
                "expected response container for {operation:?}, got {:?}",
                self.kind
            )));
        }
        if self.transaction_id != transaction_id {
            return Err(Error::invalid_data(format!(
                "response transaction id {} does not match expected {}",
                self.transaction_id, transaction_id
            )));
        }
        let code = ResponseCode(self.code);
        if code != ResponseCode::Ok {
            return Err(Error::Protocol { code, operation });
        }
        self.params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_roundtrip() {
        // Property 1: encoding then decoding a command preserves
        // (code, transaction id, params).
        let cases: &[(OperationCode, u32, &[u32])] = &[
            (OperationCode::OpenSession, 0, &[1]),
            (OperationCode::GetObjectHandles, 7, &[0xFFFF_FFFF, 0, 0xFFFF_FFFF]),
            (OperationCode::CloseSession, 42, &[]),
            (OperationCode::GetObjectPropList, 9, &[5, 0, 0xDC07, 0, 1]),
        ];
        for (code, tid, params) in cases {
            let encoded = Container::command(*code, *tid, params);
            assert_eq!(encoded.len(), 12 + params.len() * 4);
            let decoded = Container::decode(Bytes::from(encoded)).unwrap();
            assert_eq!(decoded.kind, ContainerType::Command);
            assert_eq!(decoded.code, code.0);
            assert_eq!(decoded.transaction_id, *tid);
            assert_eq!(decoded.params().unwrap(), *params);
        }
    }

    #[test]
    fn test_header_layout() {
        let encoded = Container::command(OperationCode::OpenSession, 0, &[1]);
        // length=16, type=1 (command), code=0x1002, tid=0, param=1
        assert_eq!(
            encoded,
            vec![
                0x10, 0x00, 0x00, 0x00, // length
                0x01, 0x00, // type
                0x02, 0x10, // code
                0x00, 0x00, 0x00, 0x00, // transaction id
                0x01, 0x00, 0x00, 0x00, // session id parameter
            ]
        );
    }

    #[test]
    fn test_rejects_unknown_type() {
        let mut raw = Container::command(OperationCode::GetDeviceInfo, 0, &[]);
        raw[4] = 9;
        let err = Container::decode(Bytes::from(raw)).unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }), "got {err:?}");
    }

    #[test]
    fn test_rejects_undersized_length() {
        let mut raw = Container::command(OperationCode::GetDeviceInfo, 0, &[]);
        raw[0] = 4;
        assert!(Container::decode(Bytes::from(raw)).is_err());
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let mut raw = Container::command(OperationCode::GetDeviceInfo, 0, &[]);
        raw[0] = 20; // claims 8 payload bytes that are not there
        assert!(Container::decode(Bytes::from(raw)).is_err());
    }

    #[test]
    fn test_response_transaction_id_mismatch() {
        let raw = Container::encode(ContainerType::Response, ResponseCode::Ok.0, 3, &[]);
        let container = Container::decode(Bytes::from(raw)).unwrap();
        let err = container.expect_response(OperationCode::GetObject, 4).unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }), "got {err:?}");
    }

    #[test]
    fn test_response_error_code_preserved() {
        let raw = Container::encode(ContainerType::Response, 0x200C, 5, &[]);
        let container = Container::decode(Bytes::from(raw)).unwrap();
        match container.expect_response(OperationCode::SendObject, 5) {
            Err(Error::Protocol { code, operation }) => {
                assert_eq!(code, ResponseCode::StoreFull);
                assert_eq!(operation, OperationCode::SendObject);
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn test_streaming_marker_header() {
        let header = ContainerHeader::encode(ContainerType::Data, 0x1009, 2, None);
        let parsed = ContainerHeader::parse(&header).unwrap();
        assert_eq!(parsed.length, UNKNOWN_CONTAINER_LEN);
        assert_eq!(parsed.payload_len(), None);
    }

    #[test]
    fn test_huge_payload_falls_back_to_streaming_marker() {
        let header = ContainerHeader::encode(ContainerType::Data, 0x100D, 2, Some(u64::from(u32::MAX)));
        let parsed = ContainerHeader::parse(&header).unwrap();
        assert_eq!(parsed.length, UNKNOWN_CONTAINER_LEN);
    }
}
