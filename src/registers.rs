// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Register storage seam of the slave role.

use std::ops::Range;

use thiserror::Error;

use crate::frame::{Address, ExceptionCode, Quantity};

/// Direction of a register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// The four Modbus data tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterType {
    /// Read/write single bits.
    Coil,
    /// Read-only single bits.
    DiscreteInput,
    /// Read/write 16-bit words.
    Holding,
    /// Read-only 16-bit words.
    Input,
}

impl RegisterType {
    /// Whether values of this table are single bits.
    #[must_use]
    pub const fn is_bit(self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }
}

/// Failure reported by the register storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    /// The requested range is not backed by storage.
    #[error("no such register")]
    NoRegister,

    /// The storage is temporarily unavailable.
    #[error("register storage busy")]
    Busy,

    #[error("register storage failure: {0}")]
    Fault(String),
}

impl From<RegisterError> for ExceptionCode {
    fn from(from: RegisterError) -> Self {
        match from {
            RegisterError::NoRegister => Self::IllegalDataAddress,
            RegisterError::Busy => Self::ServerDeviceBusy,
            RegisterError::Fault(_) => Self::ServerDeviceFailure,
        }
    }
}

/// Read/write callback into the register storage of a slave.
///
/// The buffer layout depends on the table:
///
/// - [`RegisterType::Coil`] and [`RegisterType::DiscreteInput`]: bits packed
///   LSB first, `(quantity + 7) / 8` bytes. On read, unused high bits of the
///   last byte must be left zero.
/// - [`RegisterType::Holding`] and [`RegisterType::Input`]: big-endian words,
///   `2 * quantity` bytes.
///
/// On [`AccessMode::Read`] the implementation fills `buf`, on
/// [`AccessMode::Write`] it stores the contents of `buf`. The call happens
/// while the stack is locked and may block.
pub trait RegisterAccess: Send {
    fn access(
        &mut self,
        mode: AccessMode,
        register: RegisterType,
        start: Address,
        quantity: Quantity,
        buf: &mut [u8],
    ) -> Result<(), RegisterError>;

    /// The addresses of a table that may be accessed.
    ///
    /// Requests reaching beyond this range are answered with
    /// [`ExceptionCode::IllegalDataAddress`] without calling
    /// [`access`](Self::access).
    fn addressable(&self, register: RegisterType) -> Range<u32> {
        let _ = register;
        0..0x1_0000
    }
}

/// Storage without any registers.
///
/// Every request is answered with [`ExceptionCode::IllegalDataAddress`].
/// Useful for a master, which never accesses registers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRegisters;

impl RegisterAccess for NoRegisters {
    fn access(
        &mut self,
        _: AccessMode,
        _: RegisterType,
        _: Address,
        _: Quantity,
        _: &mut [u8],
    ) -> Result<(), RegisterError> {
        Err(RegisterError::NoRegister)
    }

    fn addressable(&self, _: RegisterType) -> Range<u32> {
        0..0
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for Box<T> {
    fn access(
        &mut self,
        mode: AccessMode,
        register: RegisterType,
        start: Address,
        quantity: Quantity,
        buf: &mut [u8],
    ) -> Result<(), RegisterError> {
        (**self).access(mode, register, start, quantity, buf)
    }

    fn addressable(&self, register: RegisterType) -> Range<u32> {
        (**self).addressable(register)
    }
}
