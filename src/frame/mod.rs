// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

mod adu;

pub use self::adu::{Adu, Header, Pdu, TransactionId};

use std::{
    borrow::Cow,
    error,
    fmt::{self, Display},
};

use crate::bytes::Bytes;

/// A Modbus function code.
///
/// The function codes understood by the built-in dispatch table. Any other
/// code is carried as [`FunctionCode::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
    ReportSlaveId,
    ReadWriteMultipleRegisters,
    Custom(u8),
}

impl FunctionCode {
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            0x01 => Self::ReadCoils,
            0x02 => Self::ReadDiscreteInputs,
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            0x05 => Self::WriteSingleCoil,
            0x06 => Self::WriteSingleRegister,
            0x0F => Self::WriteMultipleCoils,
            0x10 => Self::WriteMultipleRegisters,
            0x11 => Self::ReportSlaveId,
            0x17 => Self::ReadWriteMultipleRegisters,
            code => Self::Custom(code),
        }
    }

    /// The code as sent on the wire.
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::ReportSlaveId => 0x11,
            Self::ReadWriteMultipleRegisters => 0x17,
            Self::Custom(code) => code,
        }
    }
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value().fmt(f)
    }
}

/// Zero-based register or coil number as sent on the wire.
pub type Address = u16;

/// A single bit, `0xFF00` on the wire when set.
pub type Coil = bool;

/// A 16 bit register value, big-endian on the wire.
pub type Word = u16;

pub type Quantity = u16;

/// A request sent by a master.
///
/// Read requests carry the start address and the number of items; write
/// requests carry the start address and the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    ReadCoils(Address, Quantity),
    ReadDiscreteInputs(Address, Quantity),
    WriteSingleCoil(Address, Coil),
    WriteMultipleCoils(Address, Cow<'a, [Coil]>),
    ReadInputRegisters(Address, Quantity),
    ReadHoldingRegisters(Address, Quantity),
    WriteSingleRegister(Address, Word),
    WriteMultipleRegisters(Address, Cow<'a, [Word]>),
    /// Serial lines only.
    ReportSlaveId,
    /// Read address and quantity, then write address and values. The
    /// write is performed first.
    ReadWriteMultipleRegisters(Address, Quantity, Address, Cow<'a, [Word]>),
    /// Function code and payload of any other function.
    Custom(u8, Cow<'a, [u8]>),
}

impl Request<'_> {
    /// Detach the request from borrowed data.
    #[must_use]
    pub fn into_owned(self) -> Request<'static> {
        use Request::*;

        match self {
            ReadCoils(addr, qty) => ReadCoils(addr, qty),
            ReadDiscreteInputs(addr, qty) => ReadDiscreteInputs(addr, qty),
            WriteSingleCoil(addr, coil) => WriteSingleCoil(addr, coil),
            WriteMultipleCoils(addr, coils) => {
                WriteMultipleCoils(addr, Cow::Owned(coils.into_owned()))
            }
            ReadInputRegisters(addr, qty) => ReadInputRegisters(addr, qty),
            ReadHoldingRegisters(addr, qty) => ReadHoldingRegisters(addr, qty),
            WriteSingleRegister(addr, word) => WriteSingleRegister(addr, word),
            WriteMultipleRegisters(addr, words) => {
                WriteMultipleRegisters(addr, Cow::Owned(words.into_owned()))
            }
            ReportSlaveId => ReportSlaveId,
            ReadWriteMultipleRegisters(addr, qty, write_addr, words) => {
                ReadWriteMultipleRegisters(addr, qty, write_addr, Cow::Owned(words.into_owned()))
            }
            Custom(func, bytes) => Custom(func, Cow::Owned(bytes.into_owned())),
        }
    }

    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Request::*;

        match self {
            ReadCoils(..) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(..) => FunctionCode::ReadDiscreteInputs,
            WriteSingleCoil(..) => FunctionCode::WriteSingleCoil,
            WriteMultipleCoils(..) => FunctionCode::WriteMultipleCoils,
            ReadInputRegisters(..) => FunctionCode::ReadInputRegisters,
            ReadHoldingRegisters(..) => FunctionCode::ReadHoldingRegisters,
            WriteSingleRegister(..) => FunctionCode::WriteSingleRegister,
            WriteMultipleRegisters(..) => FunctionCode::WriteMultipleRegisters,
            ReportSlaveId => FunctionCode::ReportSlaveId,
            ReadWriteMultipleRegisters(..) => FunctionCode::ReadWriteMultipleRegisters,
            Custom(code, _) => FunctionCode::Custom(*code),
        }
    }

    /// The response a slave would echo for a write request.
    ///
    /// Broadcast requests are never answered, so the master completes them
    /// with this value once the turnaround delay has elapsed. Returns `None`
    /// for requests that read data.
    #[must_use]
    pub fn broadcast_echo(&self) -> Option<Response> {
        use Request::*;

        let echo = match self {
            WriteSingleCoil(addr, coil) => Response::WriteSingleCoil(*addr, *coil),
            WriteSingleRegister(addr, word) => Response::WriteSingleRegister(*addr, *word),
            WriteMultipleCoils(addr, coils) => {
                Response::WriteMultipleCoils(*addr, crate::codec::u16_len(coils.len()))
            }
            WriteMultipleRegisters(addr, words) => {
                Response::WriteMultipleRegisters(*addr, crate::codec::u16_len(words.len()))
            }
            Custom(code, _) => Response::Custom(*code, Bytes::new()),
            _ => return None,
        };
        Some(echo)
    }
}

/// The data of a successful request.
///
/// ReadCoils/ReadDiscreteInputs: once verified against the outstanding
/// request, the result Vec holds exactly the requested number of bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<Coil>),
    ReadDiscreteInputs(Vec<Coil>),
    /// Echo of the written coil.
    WriteSingleCoil(Address, Coil),
    /// Start address and number of written coils.
    WriteMultipleCoils(Address, Quantity),
    ReadInputRegisters(Vec<Word>),
    ReadHoldingRegisters(Vec<Word>),
    /// Echo of the written register.
    WriteSingleRegister(Address, Word),
    /// Start address and number of written registers.
    WriteMultipleRegisters(Address, Quantity),
    /// Slave id, run indicator and device specific data.
    ReportSlaveId(u8, bool, Vec<u8>),
    ReadWriteMultipleRegisters(Vec<Word>),
    /// Function code and the bytes following it.
    Custom(u8, Bytes),
}

impl Response {
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Response::*;

        match self {
            ReadCoils(..) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(..) => FunctionCode::ReadDiscreteInputs,
            WriteSingleCoil(..) => FunctionCode::WriteSingleCoil,
            WriteMultipleCoils(..) => FunctionCode::WriteMultipleCoils,
            ReadInputRegisters(..) => FunctionCode::ReadInputRegisters,
            ReadHoldingRegisters(..) => FunctionCode::ReadHoldingRegisters,
            WriteSingleRegister(..) => FunctionCode::WriteSingleRegister,
            WriteMultipleRegisters(..) => FunctionCode::WriteMultipleRegisters,
            ReportSlaveId(..) => FunctionCode::ReportSlaveId,
            ReadWriteMultipleRegisters(..) => FunctionCode::ReadWriteMultipleRegisters,
            Custom(code, _) => FunctionCode::Custom(*code),
        }
    }
}

/// Exception code of an exception response, `0x01..=0x0B` except `0x07`
/// and `0x09`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetDevice,
    /// Any other code. [`ExceptionCode::new`] never returns this for one of
    /// the codes above.
    Custom(u8),
}

impl From<ExceptionCode> for u8 {
    fn from(from: ExceptionCode) -> Self {
        use crate::frame::ExceptionCode::*;
        match from {
            IllegalFunction => 0x01,
            IllegalDataAddress => 0x02,
            IllegalDataValue => 0x03,
            ServerDeviceFailure => 0x04,
            Acknowledge => 0x05,
            ServerDeviceBusy => 0x06,
            MemoryParityError => 0x08,
            GatewayPathUnavailable => 0x0A,
            GatewayTargetDevice => 0x0B,
            Custom(code) => code,
        }
    }
}

impl ExceptionCode {
    #[must_use]
    pub const fn new(value: u8) -> Self {
        use crate::frame::ExceptionCode::*;

        match value {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => ServerDeviceFailure,
            0x05 => Acknowledge,
            0x06 => ServerDeviceBusy,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            other => Custom(other),
        }
    }

    pub(crate) fn description(&self) -> &str {
        use crate::frame::ExceptionCode::*;

        match *self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            Acknowledge => "Acknowledge",
            ServerDeviceBusy => "Server device busy",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDevice => "Gateway target device failed to respond",
            Custom(_) => "Custom",
        }
    }
}

/// A slave exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: ExceptionCode,
}

/// The outcome of a request as seen by the master: either the response data
/// or the exception reported by the slave.
pub type ModbusResult = Result<Response, ExceptionCode>;

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for ExceptionCode {}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}
