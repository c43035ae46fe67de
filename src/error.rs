// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use std::io;

use thiserror::Error;

/// Errors returned by the stack API.
///
/// Transport errors (checksum, framing) and slave exceptions never surface
/// here: the former are discarded and counted, the latter are reported to
/// the peer or, on the master side, returned as
/// [`ModbusResult`](crate::ModbusResult).
#[derive(Debug, Error)]
pub enum Error {
    /// Illegal register address.
    #[error("illegal register address")]
    NoRegister,

    /// Illegal argument, e.g. a slave address outside of `1..=247`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The porting layer could not acquire its resources.
    #[error("porting layer error: {0}")]
    PortError(#[source] io::Error),

    /// Insufficient resources.
    #[error("insufficient resources")]
    NoResources,

    /// I/O error while sending or receiving.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The operation is not allowed in the current state of the stack.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    /// No response arrived before the response timeout expired.
    #[error("timed out")]
    TimedOut,
}

impl Error {
    /// The numeric error code of `eMBErrorCode`.
    ///
    /// `0` means no error and is never returned. Port errors and timeouts
    /// have no code in `eMBErrorCode` and take the next free values.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::NoRegister => 1,
            Self::InvalidArgument(_) => 2,
            Self::NoResources => 3,
            Self::Io(_) => 4,
            Self::IllegalState(_) => 5,
            Self::PortError(_) => 6,
            Self::TimedOut => 7,
        }
    }
}

/// Specialized [`std::result::Result`] type for the stack API.
pub type Result<T> = std::result::Result<T, Error>;
