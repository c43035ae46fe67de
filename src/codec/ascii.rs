// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ASCII framing.
//!
//! A frame starts with `:` and ends with CR LF. In between, every byte of
//! the address, the PDU and the LRC is sent as two uppercase hex digits.

use tokio_util::codec::{Decoder, Encoder};

use super::{FrameError, MAX_PDU_SIZE};
use crate::{
    bytes::{Buf as _, BufMut as _, BytesMut},
    frame::{Adu, Header, Pdu},
    slave::Slave,
};

const START: u8 = b':';
const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// ':' + 2 * (addr + PDU + LRC) + CR LF
pub const MAX_FRAME_LEN: usize = 1 + 2 * (1 + MAX_PDU_SIZE + 1) + 2;

/// addr + function + lrc
const MIN_BINARY_LEN: usize = 3;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Longitudinal redundancy check: two's complement of the byte sum.
#[must_use]
pub fn calc_lrc(buf: &[u8]) -> u8 {
    buf.iter()
        .fold(0u8, |lrc, b| lrc.wrapping_add(*b))
        .wrapping_neg()
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        _ => None,
    }
}

fn decode_hex(hex: &[u8]) -> Result<Vec<u8>, FrameError> {
    if hex.len() % 2 != 0 {
        return Err(FrameError::format("odd number of hex digits"));
    }
    hex.chunks_exact(2)
        .map(|pair| match (hex_value(pair[0]), hex_value(pair[1])) {
            (Some(hi), Some(lo)) => Ok(hi << 4 | lo),
            _ => Err(FrameError::format("invalid hex digit")),
        })
        .collect()
}

fn put_hex(buf: &mut BytesMut, byte: u8) {
    buf.put_u8(HEX_DIGITS[usize::from(byte >> 4)]);
    buf.put_u8(HEX_DIGITS[usize::from(byte & 0x0F)]);
}

/// Codec for ASCII frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct AsciiCodec;

impl Decoder for AsciiCodec {
    type Item = Adu;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Adu>, FrameError> {
        // Skip everything before the start of a frame.
        let Some(start) = buf.iter().position(|b| *b == START) else {
            buf.clear();
            return Ok(None);
        };
        buf.advance(start);

        // A new start character restarts the frame.
        let end = buf.iter().position(|b| *b == LF).unwrap_or(buf.len());
        if let Some(restart) = buf[1..end].iter().rposition(|b| *b == START) {
            log::debug!("Restarting partially received ASCII frame");
            buf.advance(restart + 1);
        }

        let Some(lf) = buf.iter().position(|b| *b == LF) else {
            if buf.len() > MAX_FRAME_LEN {
                return Err(FrameError::Overflow);
            }
            return Ok(None);
        };
        let frame = buf.split_to(lf + 1);
        if frame.len() > MAX_FRAME_LEN {
            return Err(FrameError::Overflow);
        }
        if frame[lf - 1] != CR {
            return Err(FrameError::format("LF without preceding CR"));
        }

        let mut bytes = decode_hex(&frame[1..lf - 1])?;
        if bytes.len() < MIN_BINARY_LEN {
            return Err(FrameError::format("frame too short"));
        }
        let received = bytes.pop().unwrap_or_default();
        let expected = calc_lrc(&bytes);
        if expected != received {
            return Err(FrameError::Checksum {
                expected: expected.into(),
                received: received.into(),
            });
        }
        let slave = bytes[0];
        let function = bytes[1];
        bytes.drain(..2);
        Ok(Some(Adu {
            hdr: Header::serial(Slave(slave)),
            pdu: Pdu::new(function, bytes),
        }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Adu>, FrameError> {
        let res = self.decode(buf)?;
        if res.is_none() {
            buf.clear();
        }
        Ok(res)
    }
}

impl<'a> Encoder<&'a Adu> for AsciiCodec {
    type Error = FrameError;

    fn encode(&mut self, adu: &'a Adu, buf: &mut BytesMut) -> Result<(), FrameError> {
        let Adu { hdr, pdu } = adu;
        if pdu.wire_len() > MAX_PDU_SIZE {
            return Err(FrameError::Overflow);
        }
        let slave = u8::from(hdr.slave);
        let lrc = calc_lrc(&[slave, pdu.function]).wrapping_add(calc_lrc(&pdu.data));
        buf.reserve(1 + 2 * (pdu.wire_len() + 2) + 2);
        buf.put_u8(START);
        put_hex(buf, slave);
        put_hex(buf, pdu.function);
        for b in pdu.data.iter() {
            put_hex(buf, *b);
        }
        put_hex(buf, lrc);
        buf.put_u8(CR);
        buf.put_u8(LF);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_coils_request() -> Adu {
        Adu {
            hdr: Header::serial(Slave(0x03)),
            pdu: Pdu::new(0x01, vec![0x00, 0x0A, 0x00, 0x02]),
        }
    }

    #[test]
    fn lrc() {
        assert_eq!(calc_lrc(&[]), 0);
        assert_eq!(calc_lrc(&[0x03, 0x01, 0x00, 0x0A, 0x00, 0x02]), 0xF0);
        assert_eq!(calc_lrc(&[0xFF, 0x01]), 0x00);
    }

    #[test]
    fn encode_read_coils() {
        let mut buf = BytesMut::new();
        AsciiCodec.encode(&read_coils_request(), &mut buf).unwrap();
        assert_eq!(&buf[..], b":0301000A0002F0\r\n");
    }

    #[test]
    fn decode_read_coils() {
        let mut buf = BytesMut::from(&b":0301000A0002F0\r\n"[..]);
        let adu = AsciiCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu, read_coils_request());
        assert!(buf.is_empty());
    }

    #[test]
    fn lowercase_hex_is_accepted() {
        let mut buf = BytesMut::from(&b":0301000a0002f0\r\n"[..]);
        assert_eq!(
            AsciiCodec.decode(&mut buf).unwrap(),
            Some(read_coils_request())
        );
    }

    #[test]
    fn decode_in_pieces() {
        let mut codec = AsciiCodec;
        let mut buf = BytesMut::from(&b":0301000A"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"0002F0\r");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\n");
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn garbage_before_start_is_skipped() {
        let mut buf = BytesMut::from(&b"xx\r\n:0301000A0002F0\r\n"[..]);
        assert!(AsciiCodec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn start_character_restarts_frame() {
        let mut buf = BytesMut::from(&b":0301:0301000A0002F0\r\n"[..]);
        assert_eq!(
            AsciiCodec.decode(&mut buf).unwrap(),
            Some(read_coils_request())
        );
    }

    #[test]
    fn wrong_lrc() {
        let mut buf = BytesMut::from(&b":0301000A0002BE\r\n"[..]);
        let err = AsciiCodec.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Checksum {
                expected: 0xF0,
                received: 0xBE
            }
        ));
    }

    #[test]
    fn invalid_hex_digit() {
        let mut buf = BytesMut::from(&b":03010G0A0002F0\r\n"[..]);
        assert!(matches!(
            AsciiCodec.decode(&mut buf),
            Err(FrameError::Format(_))
        ));
    }

    #[test]
    fn missing_cr() {
        let mut buf = BytesMut::from(&b":0301000A0002F0\n"[..]);
        assert!(matches!(
            AsciiCodec.decode(&mut buf),
            Err(FrameError::Format(_))
        ));
    }

    #[test]
    fn overflow_without_end_of_frame() {
        let mut buf = BytesMut::from(&b":"[..]);
        buf.extend_from_slice(&[b'0'; MAX_FRAME_LEN]);
        assert!(matches!(
            AsciiCodec.decode(&mut buf),
            Err(FrameError::Overflow)
        ));
    }

    #[test]
    fn eof_discards_partial_frame() {
        let mut buf = BytesMut::from(&b":0301"[..]);
        assert!(AsciiCodec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }
}
