// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A [Modbus](https://en.wikipedia.org/wiki/Modbus) protocol stack for
//! the master and the slave role over RTU, ASCII and TCP.
//!
//! The stack is a state machine driven by events: the porting layer
//! reports received bytes and timer expiries through the event entry points
//! of [`Stack`], and [`Stack::poll`] processes completed frames. Hardware
//! access and register storage are injected at [`Stack::init`] through the
//! [`Port`] and [`RegisterAccess`] traits.
//!
//! The optional [`link`] module drives a stack from any tokio byte stream,
//! e.g. a TCP socket or a serial port.
//!
//! ## Installation
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! modbus-stack = "*"
//! ```
//!
//! Enable the `serial` feature to open serial ports with `tokio-serial`.

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unsafe_code)]

/// Re-export the `bytes` crate
///
/// Needed to prevent version conflicts with types that are exposed by this crate.
pub mod bytes {
    pub use bytes::*;
}

pub mod codec;

mod config;
pub use self::config::{
    Config, Mode, Role, SlaveIdentity, DEFAULT_ASCII_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT,
    DEFAULT_TCP_PORT, DEFAULT_TURNAROUND_DELAY,
};

pub mod dispatch;

mod engine;
pub use self::engine::{Counters, State};

mod error;
pub use self::error::{Error, Result};

mod frame;
pub use self::frame::{
    Address, Adu, Coil, ExceptionCode, ExceptionResponse, FunctionCode, Header, ModbusResult, Pdu,
    Quantity, Request, Response, TransactionId, Word,
};

#[cfg(feature = "link")]
pub mod link;

mod port;
pub use self::port::Port;

mod registers;
pub use self::registers::{AccessMode, NoRegisters, RegisterAccess, RegisterError, RegisterType};

mod slave;
pub use self::slave::{Slave, SlaveId};

mod stack;
pub use self::stack::{PendingResponse, Stack};
