// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport codecs.
//!
//! Each transport implements [`Decoder`] and [`Encoder`] from `tokio-util`
//! for whole [`Adu`]s. [`FrameCodec`] owns the frame buffer of one stack
//! instance and turns decoder results into [`Decoded`] outcomes for the
//! protocol engine.

use std::{
    borrow::Cow,
    convert::TryFrom,
    io::{self, BufRead as _, Cursor, Error, ErrorKind},
};

use byteorder::{BigEndian, ReadBytesExt as _};
use thiserror::Error;
use tokio_util::codec::{Decoder as _, Encoder as _};

use crate::{
    bytes::{Buf as _, BufMut as _, Bytes, BytesMut},
    config::Mode,
    frame::{Adu, Coil, Pdu, Request, Response},
};

pub mod ascii;
pub mod rtu;
pub mod tcp;

pub use self::{ascii::AsciiCodec, rtu::RtuCodec, tcp::TcpCodec};

/// Maximum request/response PDU size.
///
/// As defined by the Modbus application protocol for all transports.
pub const MAX_PDU_SIZE: usize = 253;

/// Transport level failure while decoding or encoding a frame.
///
/// These errors never leave the stack: the frame is discarded and the
/// corresponding diagnostic counter is incremented.
#[derive(Debug, Error)]
pub enum FrameError {
    /// CRC (RTU) or LRC (ASCII) mismatch.
    #[error("checksum mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    Checksum { expected: u16, received: u16 },

    /// Malformed frame, e.g. a non-hex character or an invalid MBAP header.
    #[error("invalid frame: {0}")]
    Format(Cow<'static, str>),

    /// More bytes than the largest valid frame of the transport.
    #[error("frame buffer overflow")]
    Overflow,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FrameError {
    pub(crate) fn format(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Format(message.into())
    }
}

/// Outcome of feeding bytes or a timing event into a [`FrameCodec`].
#[derive(Debug)]
pub enum Decoded {
    /// A complete frame with a valid error check.
    Complete(Adu),
    /// More bytes are needed; nothing has been discarded.
    Incomplete,
    /// The frame buffer has been discarded because of a checksum or format error.
    Invalid(FrameError),
    /// The frame buffer has been discarded because of an inter-character timeout.
    Timeout,
}

#[derive(Debug)]
enum Transport {
    Rtu(RtuCodec),
    Ascii(AsciiCodec),
    Tcp(TcpCodec),
}

/// Transport codec together with the frame buffer it exclusively owns.
#[derive(Debug)]
pub struct FrameCodec {
    transport: Transport,
    buf: BytesMut,
}

impl FrameCodec {
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        let transport = match mode {
            Mode::Rtu => Transport::Rtu(RtuCodec),
            Mode::Ascii => Transport::Ascii(AsciiCodec),
            Mode::Tcp => Transport::Tcp(TcpCodec),
        };
        Self {
            transport,
            buf: BytesMut::with_capacity(rtu::MAX_FRAME_LEN),
        }
    }

    /// Append received bytes and try to decode a frame.
    pub fn push(&mut self, bytes: &[u8]) -> Decoded {
        self.extend(bytes);
        self.decode()
    }

    /// Append received bytes without decoding them yet.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Try to decode a frame from bytes that are already buffered.
    pub fn decode(&mut self) -> Decoded {
        let res = match &mut self.transport {
            Transport::Rtu(codec) => codec.decode(&mut self.buf),
            Transport::Ascii(codec) => codec.decode(&mut self.buf),
            Transport::Tcp(codec) => codec.decode(&mut self.buf),
        };
        self.outcome(res)
    }

    /// No more bytes will arrive for the current frame.
    ///
    /// For RTU this is the 3.5 character silence that terminates a frame,
    /// for TCP the closed connection. Incomplete remainders are discarded.
    pub fn end_of_frame(&mut self) -> Decoded {
        let res = match &mut self.transport {
            Transport::Rtu(codec) => codec.decode_eof(&mut self.buf),
            Transport::Ascii(codec) => codec.decode_eof(&mut self.buf),
            Transport::Tcp(codec) => codec.decode_eof(&mut self.buf),
        };
        self.outcome(res)
    }

    /// An inter-character timeout occurred in the middle of a frame.
    pub fn timeout(&mut self) -> Decoded {
        if self.buf.is_empty() {
            return Decoded::Incomplete;
        }
        self.buf.clear();
        Decoded::Timeout
    }

    /// Discard all buffered bytes.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Number of buffered bytes.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Encode an ADU into the wire representation of the transport.
    pub fn encode(&mut self, adu: &Adu) -> Result<Bytes, FrameError> {
        let mut out = BytesMut::new();
        match &mut self.transport {
            Transport::Rtu(codec) => codec.encode(adu, &mut out)?,
            Transport::Ascii(codec) => codec.encode(adu, &mut out)?,
            Transport::Tcp(codec) => codec.encode(adu, &mut out)?,
        }
        Ok(out.freeze())
    }

    fn outcome(&mut self, res: Result<Option<Adu>, FrameError>) -> Decoded {
        match res {
            Ok(Some(adu)) => Decoded::Complete(adu),
            Ok(None) => Decoded::Incomplete,
            Err(err) => {
                self.buf.clear();
                Decoded::Invalid(err)
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn u16_len(len: usize) -> u16 {
    // This type conversion should always be safe, because either
    // the caller is responsible to pass a valid usize or the
    // possible values are limited by the protocol.
    debug_assert!(len <= u16::MAX.into());
    len as u16
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn u8_len(len: usize) -> u8 {
    // This type conversion should always be safe, because either
    // the caller is responsible to pass a valid usize or the
    // possible values are limited by the protocol.
    debug_assert!(len <= u8::MAX.into());
    len as u8
}

/// Serialize a request into a PDU.
///
/// # Errors
///
/// Fails if the encoded request would exceed [`MAX_PDU_SIZE`].
pub fn encode_request_pdu(request: &Request<'_>) -> io::Result<Pdu> {
    use crate::frame::Request::*;

    let size = request_pdu_size(request)?;
    let mut buf = BytesMut::with_capacity(size - 1);
    match request {
        ReadCoils(address, quantity)
        | ReadDiscreteInputs(address, quantity)
        | ReadInputRegisters(address, quantity)
        | ReadHoldingRegisters(address, quantity) => {
            buf.put_u16(*address);
            buf.put_u16(*quantity);
        }
        WriteSingleCoil(address, state) => {
            buf.put_u16(*address);
            buf.put_u16(bool_to_coil(*state));
        }
        WriteMultipleCoils(address, coils) => {
            buf.put_u16(*address);
            buf.put_u16(u16_len(coils.len()));
            buf.put_u8(u8_len(packed_coils_size(coils)));
            encode_packed_coils(&mut buf, coils);
        }
        WriteSingleRegister(address, word) => {
            buf.put_u16(*address);
            buf.put_u16(*word);
        }
        WriteMultipleRegisters(address, words) => {
            buf.put_u16(*address);
            let len = words.len();
            buf.put_u16(u16_len(len));
            buf.put_u8(u8_len(len * 2));
            for w in words.as_ref() {
                buf.put_u16(*w);
            }
        }
        ReportSlaveId => {}
        ReadWriteMultipleRegisters(read_address, quantity, write_address, words) => {
            buf.put_u16(*read_address);
            buf.put_u16(*quantity);
            buf.put_u16(*write_address);
            let len = words.len();
            buf.put_u16(u16_len(len));
            buf.put_u8(u8_len(len * 2));
            for w in words.as_ref() {
                buf.put_u16(*w);
            }
        }
        Custom(_, custom_data) => {
            buf.put_slice(custom_data.as_ref());
        }
    }
    Ok(Pdu::new(request.function_code().value(), buf.freeze()))
}

/// Serialize a response into a PDU.
///
/// The response must fit into [`MAX_PDU_SIZE`], see [`response_pdu_size`].
#[must_use]
pub fn encode_response_pdu(response: &Response) -> Pdu {
    use crate::frame::Response::*;

    let mut buf = BytesMut::new();
    match response {
        ReadCoils(coils) | ReadDiscreteInputs(coils) => {
            buf.put_u8(u8_len(packed_coils_size(coils)));
            encode_packed_coils(&mut buf, coils);
        }
        ReadInputRegisters(registers)
        | ReadHoldingRegisters(registers)
        | ReadWriteMultipleRegisters(registers) => {
            buf.put_u8(u8_len(registers.len() * 2));
            for r in registers {
                buf.put_u16(*r);
            }
        }
        WriteSingleCoil(address, state) => {
            buf.put_u16(*address);
            buf.put_u16(bool_to_coil(*state));
        }
        WriteMultipleCoils(address, quantity) | WriteMultipleRegisters(address, quantity) => {
            buf.put_u16(*address);
            buf.put_u16(*quantity);
        }
        ReportSlaveId(slave_id, run_indication, additional_data) => {
            buf.put_u8(u8_len(2 + additional_data.len()));
            buf.put_u8(*slave_id);
            buf.put_u8(if *run_indication { 0xFF } else { 0x00 });
            buf.put_slice(additional_data);
        }
        WriteSingleRegister(address, word) => {
            buf.put_u16(*address);
            buf.put_u16(*word);
        }
        Custom(_, custom_data) => {
            buf.put_slice(custom_data);
        }
    }
    Pdu::new(response.function_code().value(), buf.freeze())
}

fn read_u16_be(reader: &mut impl io::Read) -> io::Result<u16> {
    reader.read_u16::<BigEndian>()
}

impl TryFrom<&Pdu> for Request<'static> {
    type Error = Error;

    fn try_from(pdu: &Pdu) -> Result<Self, Self::Error> {
        use crate::frame::Request::*;

        let bytes = &pdu.data;
        if pdu.wire_len() > MAX_PDU_SIZE {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "request PDU size exceeded",
            ));
        }
        let rdr = &mut Cursor::new(bytes);
        let req = match pdu.function {
            0x01 => ReadCoils(read_u16_be(rdr)?, read_u16_be(rdr)?),
            0x02 => ReadDiscreteInputs(read_u16_be(rdr)?, read_u16_be(rdr)?),
            0x05 => WriteSingleCoil(read_u16_be(rdr)?, coil_to_bool(read_u16_be(rdr)?)?),
            0x0F => {
                let address = read_u16_be(rdr)?;
                let quantity = read_u16_be(rdr)?;
                let byte_count = usize::from(rdr.read_u8()?);
                if byte_count != (usize::from(quantity) + 7) / 8 {
                    return Err(io::Error::new(ErrorKind::InvalidData, "invalid byte count"));
                }
                if bytes.len() < 5 + byte_count {
                    return Err(io::Error::new(ErrorKind::InvalidData, "too short"));
                }
                rdr.consume(byte_count);
                let packed_coils = &bytes[5..5 + byte_count];
                WriteMultipleCoils(address, decode_packed_coils(packed_coils, quantity).into())
            }
            0x04 => ReadInputRegisters(read_u16_be(rdr)?, read_u16_be(rdr)?),
            0x03 => ReadHoldingRegisters(read_u16_be(rdr)?, read_u16_be(rdr)?),
            0x06 => WriteSingleRegister(read_u16_be(rdr)?, read_u16_be(rdr)?),
            0x10 => {
                let address = read_u16_be(rdr)?;
                let quantity = read_u16_be(rdr)?;
                let byte_count = rdr.read_u8()?;
                if u32::from(byte_count) != u32::from(quantity) * 2 {
                    return Err(io::Error::new(ErrorKind::InvalidData, "invalid quantity"));
                }
                let mut data = Vec::with_capacity(quantity.into());
                for _ in 0..quantity {
                    data.push(read_u16_be(rdr)?);
                }
                WriteMultipleRegisters(address, data.into())
            }
            0x11 => ReportSlaveId,
            0x17 => {
                let read_address = read_u16_be(rdr)?;
                let read_quantity = read_u16_be(rdr)?;
                let write_address = read_u16_be(rdr)?;
                let write_quantity = read_u16_be(rdr)?;
                let write_count = rdr.read_u8()?;
                if u32::from(write_count) != u32::from(write_quantity) * 2 {
                    return Err(io::Error::new(
                        ErrorKind::InvalidData,
                        "invalid write quantity",
                    ));
                }
                let mut data = Vec::with_capacity(write_quantity.into());
                for _ in 0..write_quantity {
                    data.push(read_u16_be(rdr)?);
                }
                ReadWriteMultipleRegisters(read_address, read_quantity, write_address, data.into())
            }
            fn_code if fn_code < 0x80 => {
                // Consume all remaining bytes as custom data.
                return Ok(Custom(fn_code, bytes.to_vec().into()));
            }
            fn_code => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("invalid function code: 0x{fn_code:02X}"),
                ));
            }
        };
        // Verify that all data has been consumed and decoded.
        if rdr.has_remaining() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "undecoded request data",
            ));
        }
        Ok(req)
    }
}

impl TryFrom<&Pdu> for Response {
    type Error = Error;

    fn try_from(pdu: &Pdu) -> Result<Self, Self::Error> {
        use crate::frame::Response::*;

        let bytes = &pdu.data;
        if pdu.wire_len() > MAX_PDU_SIZE {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "response PDU size exceeded",
            ));
        }
        let rdr = &mut Cursor::new(bytes);
        let rsp = match pdu.function {
            fn_code @ (0x01 | 0x02) => {
                let byte_count = rdr.read_u8()?;
                if bytes.len() < 1 + usize::from(byte_count) {
                    return Err(io::Error::new(ErrorKind::InvalidData, "too short"));
                }
                let packed_coils = &bytes[1..1 + usize::from(byte_count)];
                rdr.consume(byte_count.into());
                // Here we have no information about the exact requested quantity so we just
                // unpack the whole byte.
                let quantity = u16::from(byte_count) * 8;
                let coils = decode_packed_coils(packed_coils, quantity);
                if fn_code == 0x01 {
                    ReadCoils(coils)
                } else {
                    ReadDiscreteInputs(coils)
                }
            }
            0x05 => WriteSingleCoil(read_u16_be(rdr)?, coil_to_bool(read_u16_be(rdr)?)?),
            0x0F => WriteMultipleCoils(read_u16_be(rdr)?, read_u16_be(rdr)?),
            fn_code @ (0x03 | 0x04 | 0x17) => {
                let byte_count = rdr.read_u8()?;
                if byte_count % 2 != 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "invalid quantity",
                    ));
                }
                let quantity = byte_count / 2;
                let mut data = Vec::with_capacity(quantity.into());
                for _ in 0..quantity {
                    data.push(read_u16_be(rdr)?);
                }
                match fn_code {
                    0x03 => ReadHoldingRegisters(data),
                    0x04 => ReadInputRegisters(data),
                    _ => ReadWriteMultipleRegisters(data),
                }
            }
            0x06 => WriteSingleRegister(read_u16_be(rdr)?, read_u16_be(rdr)?),
            0x10 => WriteMultipleRegisters(read_u16_be(rdr)?, read_u16_be(rdr)?),
            0x11 => {
                let byte_count = rdr.read_u8()?;
                if byte_count < 2 {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "too short"));
                }
                let data_len = (byte_count - 2).into();
                let slave_id = rdr.read_u8()?;
                let run_indication_status = match rdr.read_u8()? {
                    0x00 => false,
                    0xFF => true,
                    status => {
                        return Err(Error::new(
                            ErrorKind::InvalidData,
                            format!("invalid run indication status: 0x{status:02X}"),
                        ));
                    }
                };
                let mut data = Vec::with_capacity(data_len);
                for _ in 0..data_len {
                    data.push(rdr.read_u8()?);
                }
                ReportSlaveId(slave_id, run_indication_status, data)
            }
            fn_code if fn_code < 0x80 => {
                // Consume all remaining bytes as custom data.
                return Ok(Custom(fn_code, bytes.clone()));
            }
            fn_code => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("unexpected exception function code: 0x{fn_code:02X}"),
                ));
            }
        };
        // Verify that all data has been consumed and decoded.
        if rdr.has_remaining() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "undecoded response data",
            ));
        }
        Ok(rsp)
    }
}

fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

fn coil_to_bool(coil: u16) -> io::Result<bool> {
    match coil {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        _ => Err(Error::new(
            ErrorKind::InvalidData,
            format!("invalid coil value: 0x{coil:04X}"),
        )),
    }
}

pub(crate) fn packed_coils_size(coils: &[Coil]) -> usize {
    (coils.len() + 7) / 8
}

pub(crate) fn encode_packed_coils(buf: &mut BytesMut, coils: &[Coil]) -> usize {
    let packed_coils_size = packed_coils_size(coils);
    let offset = buf.len();
    buf.resize(offset + packed_coils_size, 0);
    let buf = &mut buf[offset..];
    for (i, b) in coils.iter().enumerate() {
        let v = u8::from(*b); // 0 or 1
        buf[i / 8] |= v << (i % 8);
    }
    packed_coils_size
}

/// Unpack `count` bits, LSB first. Bits beyond `bytes` read as `false`.
pub(crate) fn decode_packed_coils(bytes: &[u8], count: u16) -> Vec<Coil> {
    let mut res = Vec::with_capacity(count.into());
    for i in 0usize..count.into() {
        let byte = bytes.get(i / 8).copied().unwrap_or_default();
        res.push((byte >> (i % 8)) & 0b1 > 0);
    }
    res
}

fn request_pdu_size(req: &Request<'_>) -> io::Result<usize> {
    use crate::frame::Request::*;

    let size = match req {
        ReadCoils(_, _)
        | ReadDiscreteInputs(_, _)
        | ReadInputRegisters(_, _)
        | ReadHoldingRegisters(_, _)
        | WriteSingleRegister(_, _)
        | WriteSingleCoil(_, _) => 5,
        WriteMultipleCoils(_, coils) => 6 + packed_coils_size(coils),
        WriteMultipleRegisters(_, data) => 6 + data.len() * 2,
        ReportSlaveId => 1,
        ReadWriteMultipleRegisters(_, _, _, data) => 10 + data.len() * 2,
        Custom(_, data) => 1 + data.len(),
    };
    if size > MAX_PDU_SIZE {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "request PDU size exceeded",
        ));
    }
    Ok(size)
}

/// Number of PDU bytes the encoded response occupies.
#[must_use]
pub fn response_pdu_size(rsp: &Response) -> usize {
    use crate::frame::Response::*;

    match rsp {
        ReadCoils(coils) | ReadDiscreteInputs(coils) => 2 + packed_coils_size(coils),
        WriteSingleCoil(_, _)
        | WriteMultipleCoils(_, _)
        | WriteSingleRegister(_, _)
        | WriteMultipleRegisters(_, _) => 5,
        ReadInputRegisters(words)
        | ReadHoldingRegisters(words)
        | ReadWriteMultipleRegisters(words) => 2 + words.len() * 2,
        ReportSlaveId(_, _, data) => 4 + data.len(),
        Custom(_, data) => 1 + data.len(),
    }
}
