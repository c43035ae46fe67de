// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP framing with the MBAP header.
//!
//! The length field counts the unit identifier and the PDU, so frames are
//! delimited without any timing. Bytes following a complete frame stay in
//! the buffer for the next call.

use byteorder::{BigEndian, ByteOrder as _};
use tokio_util::codec::{Decoder, Encoder};

use super::{u16_len, FrameError, MAX_PDU_SIZE};
use crate::{
    bytes::{BufMut as _, BytesMut},
    frame::{Adu, Header, Pdu},
    slave::Slave,
};

pub(crate) const HEADER_SIZE: usize = 7;

const PROTOCOL_ID: u16 = 0x0000; // TCP

/// unit id + function code
const MIN_LENGTH: usize = 2;

/// unit id + PDU
const MAX_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Codec for Modbus TCP frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpCodec;

impl Decoder for TcpCodec {
    type Item = Adu;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Adu>, FrameError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let protocol_id = BigEndian::read_u16(&buf[2..4]);
        if protocol_id != PROTOCOL_ID {
            return Err(FrameError::format(format!(
                "invalid protocol identifier: 0x{protocol_id:04X}"
            )));
        }

        // len = bytes of PDU + one byte (unit ID)
        let len = usize::from(BigEndian::read_u16(&buf[4..6]));
        if !(MIN_LENGTH..=MAX_LENGTH).contains(&len) {
            return Err(FrameError::format(format!("invalid length field: {len}")));
        }
        if buf.len() < HEADER_SIZE + len - 1 {
            return Ok(None);
        }

        let header_data = buf.split_to(HEADER_SIZE);
        let mut pdu_data = buf.split_to(len - 1);

        let transaction_id = BigEndian::read_u16(&header_data[0..2]);
        let unit_id = header_data[6];
        let function = pdu_data.split_to(1)[0];

        Ok(Some(Adu {
            hdr: Header::tcp(transaction_id, Slave(unit_id)),
            pdu: Pdu::new(function, pdu_data.freeze()),
        }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Adu>, FrameError> {
        let res = self.decode(buf)?;
        if res.is_none() && !buf.is_empty() {
            log::debug!("Discarding {} bytes of an incomplete frame", buf.len());
            buf.clear();
        }
        Ok(res)
    }
}

impl<'a> Encoder<&'a Adu> for TcpCodec {
    type Error = FrameError;

    fn encode(&mut self, adu: &'a Adu, buf: &mut BytesMut) -> Result<(), FrameError> {
        let Adu { hdr, pdu } = adu;
        if pdu.wire_len() > MAX_PDU_SIZE {
            return Err(FrameError::Overflow);
        }
        buf.reserve(HEADER_SIZE + pdu.wire_len() - 1);
        buf.put_u16(hdr.transaction_id.unwrap_or_default());
        buf.put_u16(PROTOCOL_ID);
        buf.put_u16(u16_len(pdu.wire_len() + 1));
        buf.put_u8(hdr.slave.into());
        buf.put_u8(pdu.function);
        buf.put_slice(&pdu.data);
        Ok(())
    }
}
