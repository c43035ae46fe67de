// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU framing.
//!
//! An RTU frame has no delimiters: it ends with a silence of 3.5 character
//! times on the line. The engine detects the silence with the port timer and
//! calls [`Decoder::decode_eof`], which is where frames are validated.

use tokio_util::codec::{Decoder, Encoder};

use super::{FrameError, MAX_PDU_SIZE};
use crate::{
    bytes::{BufMut as _, BytesMut},
    frame::{Adu, Header, Pdu},
    slave::Slave,
};

/// addr + function + crc
pub(crate) const MIN_ADU_LEN: usize = 1 + 1 + 2;

/// addr + PDU + crc
pub const MAX_FRAME_LEN: usize = 1 + MAX_PDU_SIZE + 2;

/// CRC-16/MODBUS (polynomial 0xA001 reflected, initial value 0xFFFF).
///
/// The value is transmitted low byte first.
#[must_use]
pub fn calc_crc(buf: &[u8]) -> u16 {
    let mut crc = 0xFFFF;
    for x in buf {
        crc ^= u16::from(*x);
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Codec for RTU frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct RtuCodec;

impl Decoder for RtuCodec {
    type Item = Adu;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Adu>, FrameError> {
        if buf.len() > MAX_FRAME_LEN {
            return Err(FrameError::Overflow);
        }
        // Frames are only complete after the inter-frame silence.
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Adu>, FrameError> {
        if buf.is_empty() {
            return Ok(None);
        }
        if buf.len() > MAX_FRAME_LEN {
            buf.clear();
            return Err(FrameError::Overflow);
        }
        let mut adu = buf.split();
        if adu.len() < MIN_ADU_LEN {
            log::trace!("Dropping {} bytes of line noise", adu.len());
            return Ok(None);
        }
        let crc = adu.split_off(adu.len() - 2);
        let received = u16::from_le_bytes([crc[0], crc[1]]);
        let expected = calc_crc(&adu);
        if expected != received {
            return Err(FrameError::Checksum { expected, received });
        }
        let slave = adu.split_to(1)[0];
        let function = adu.split_to(1)[0];
        Ok(Some(Adu {
            hdr: Header::serial(Slave(slave)),
            pdu: Pdu::new(function, adu.freeze()),
        }))
    }
}

impl<'a> Encoder<&'a Adu> for RtuCodec {
    type Error = FrameError;

    fn encode(&mut self, adu: &'a Adu, buf: &mut BytesMut) -> Result<(), FrameError> {
        let Adu { hdr, pdu } = adu;
        if pdu.wire_len() > MAX_PDU_SIZE {
            return Err(FrameError::Overflow);
        }
        let offset = buf.len();
        buf.reserve(pdu.wire_len() + 3);
        buf.put_u8(hdr.slave.into());
        buf.put_u8(pdu.function);
        buf.put_slice(&pdu.data);
        let crc = calc_crc(&buf[offset..]);
        buf.put_u16_le(crc);
        Ok(())
    }
}
