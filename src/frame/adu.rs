// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;

use super::{ExceptionCode, ExceptionResponse, FunctionCode};
use crate::{bytes::Bytes, slave::Slave};

pub type TransactionId = u16;

/// Addressing part of an [`Adu`].
///
/// Serial transports only carry the slave address. TCP additionally carries
/// the MBAP transaction identifier; the unit identifier is stored as `slave`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    pub slave: Slave,
    pub transaction_id: Option<TransactionId>,
}

impl Header {
    #[must_use]
    pub const fn serial(slave: Slave) -> Self {
        Self {
            slave,
            transaction_id: None,
        }
    }

    #[must_use]
    pub const fn tcp(transaction_id: TransactionId, unit_id: Slave) -> Self {
        Self {
            slave: unit_id,
            transaction_id: Some(transaction_id),
        }
    }
}

/// A raw Modbus PDU: function code and the bytes that follow it.
///
/// The function code is kept as the raw wire byte, so exception responses
/// (high bit set) pass through the codecs unchanged.
#[derive(Clone, PartialEq, Eq)]
pub struct Pdu {
    pub function: u8,
    pub data: Bytes,
}

impl Pdu {
    #[must_use]
    pub fn new(function: u8, data: impl Into<Bytes>) -> Self {
        Self {
            function,
            data: data.into(),
        }
    }

    #[must_use]
    pub fn exception(response: ExceptionResponse) -> Self {
        let ExceptionResponse {
            function,
            exception,
        } = response;
        debug_assert!(function.value() < 0x80);
        Self::new(function.value() | 0x80, vec![exception.into()])
    }

    /// The function code with the exception bit masked out.
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        FunctionCode::new(self.function & 0x7F)
    }

    #[must_use]
    pub const fn is_exception(&self) -> bool {
        self.function & 0x80 != 0
    }

    /// The exception carried by an exception response, if any.
    #[must_use]
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        if !self.is_exception() {
            return None;
        }
        self.data.first().copied().map(ExceptionCode::new)
    }

    /// Number of bytes on the wire: function code plus data.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        1 + self.data.len()
    }
}

impl fmt::Debug for Pdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pdu(0x{:02X}, {:02X?})", self.function, self.data.as_ref())
    }
}

/// Application Data Unit: the transport independent part of a frame.
///
/// The error check (CRC for RTU, LRC for ASCII) is computed by the codec
/// when encoding and verified when decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adu {
    pub hdr: Header,
    pub pdu: Pdu,
}
