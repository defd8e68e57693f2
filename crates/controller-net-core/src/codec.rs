//! Length-prefixed framed codec (§4.1).
//!
//! A message on the stream is `[header: HEADER_SIZE bytes][body: N bytes]`.
//! The header is a little-endian `u32` holding `N`. Datagram telemetry
//! frames reuse the exact same header inside a single UDP packet.

use crate::error::CodecError;

/// Size in bytes of the length prefix shared by the stream and datagram
/// framing. Fixed at compile time and must match the client.
pub const HEADER_SIZE: usize = core::mem::size_of::<u32>();

/// Default ceiling on a single stream message body, before header.
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

/// Default ceiling on a single datagram telemetry frame body. Chosen well
/// under a safe UDP MTU (1500 byte Ethernet frame minus IP/UDP headers)
/// minus `HEADER_SIZE`.
pub const MAX_DATA_FRAME_MESSAGE_SIZE: u16 = 1400;

/// Parses the `HEADER_SIZE`-byte length prefix. Pure; does not touch any
/// buffer beyond the header itself.
#[inline]
pub fn decode_header(header: &[u8; HEADER_SIZE], max_message_size: u32) -> Result<u32, CodecError> {
    let len = u32::from_le_bytes(*header);
    if len > max_message_size {
        return Err(CodecError::BodyTooLarge { len, max: max_message_size });
    }
    Ok(len)
}

#[inline]
pub fn encode_header(len: u32) -> [u8; HEADER_SIZE] {
    len.to_le_bytes()
}

/// Prepends a `HEADER_SIZE` header to `body` and returns the full frame.
/// Fails iff `body.len()` does not fit in the header's `u32` or exceeds
/// `max_len` (used for the datagram path, where `max_len` is
/// `MAX_DATA_FRAME_MESSAGE_SIZE`).
#[inline]
pub fn pack(body: &[u8], max_len: u32) -> Result<Vec<u8>, CodecError> {
    let len = u32::try_from(body.len())
        .map_err(|_| CodecError::BodyTooLarge { len: u32::MAX, max: max_len })?;
    if len > max_len {
        return Err(CodecError::BodyTooLarge { len, max: max_len });
    }
    let mut framed = Vec::with_capacity(HEADER_SIZE + body.len());
    framed.extend_from_slice(&encode_header(len));
    framed.extend_from_slice(body);
    Ok(framed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_header_roundtrips_with_encode() {
        let header = encode_header(42);
        assert_eq!(decode_header(&header, MAX_MESSAGE_SIZE).unwrap(), 42);
    }

    #[test]
    fn decode_header_rejects_oversized_length() {
        let header = encode_header(100);
        assert_eq!(
            decode_header(&header, 99),
            Err(CodecError::BodyTooLarge { len: 100, max: 99 })
        );
    }

    #[test]
    fn pack_prepends_header() {
        let framed = pack(&[1, 2, 3], MAX_MESSAGE_SIZE).unwrap();
        assert_eq!(&framed[..HEADER_SIZE], &encode_header(3));
        assert_eq!(&framed[HEADER_SIZE..], &[1, 2, 3]);
    }

    #[test]
    fn pack_rejects_body_over_max_len() {
        let body = vec![0_u8; 10];
        assert_eq!(pack(&body, 5), Err(CodecError::BodyTooLarge { len: 10, max: 5 }));
    }

    #[test]
    fn pack_exactly_at_max_len_succeeds() {
        let body = vec![0_u8; 5];
        assert!(pack(&body, 5).is_ok());
    }
}
