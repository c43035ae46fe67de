// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stack configuration.

use std::time::Duration;

use crate::{
    dispatch::{DispatchEntry, Handler},
    frame::{ExceptionCode, Pdu, Response},
    registers::RegisterAccess,
    slave::Slave,
};

/// The registered port for Modbus TCP.
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Maximum gap between two characters of an ASCII frame.
pub const DEFAULT_ASCII_TIMEOUT: Duration = Duration::from_secs(1);

/// Time a master waits for a response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Time a master waits after a broadcast before the bus is considered idle.
pub const DEFAULT_TURNAROUND_DELAY: Duration = Duration::from_millis(100);

/// Whether the stack sends requests or answers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

/// The transport used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Rtu,
    Ascii,
    Tcp,
}

impl Mode {
    /// RTU and ASCII run on a serial line.
    #[must_use]
    pub const fn is_serial(self) -> bool {
        matches!(self, Self::Rtu | Self::Ascii)
    }
}

/// Payload of the Report Slave ID (0x11) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveIdentity {
    pub id: u8,
    pub running: bool,
    pub additional_data: Vec<u8>,
}

/// Configuration of one stack instance.
///
/// Immutable once the stack is initialized.
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub mode: Mode,
    /// Own address in the slave role. Unused by a master.
    pub slave: Slave,
    pub ascii_timeout: Duration,
    pub response_timeout: Duration,
    pub turnaround_delay: Duration,
    pub report_slave_id: Option<SlaveIdentity>,
    pub handlers: Vec<DispatchEntry>,
}

impl Config {
    #[must_use]
    pub fn slave(mode: Mode, slave: Slave) -> Self {
        Self::new(Role::Slave, mode, slave)
    }

    #[must_use]
    pub fn master(mode: Mode) -> Self {
        Self::new(Role::Master, mode, Slave::broadcast())
    }

    fn new(role: Role, mode: Mode, slave: Slave) -> Self {
        Self {
            role,
            mode,
            slave,
            ascii_timeout: DEFAULT_ASCII_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            turnaround_delay: DEFAULT_TURNAROUND_DELAY,
            report_slave_id: None,
            handlers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_ascii_timeout(mut self, timeout: Duration) -> Self {
        self.ascii_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_turnaround_delay(mut self, delay: Duration) -> Self {
        self.turnaround_delay = delay;
        self
    }

    /// Answer Report Slave ID (0x11) requests with the given identity.
    #[must_use]
    pub fn with_report_slave_id(
        mut self,
        id: u8,
        running: bool,
        additional_data: impl Into<Vec<u8>>,
    ) -> Self {
        self.report_slave_id = Some(SlaveIdentity {
            id,
            running,
            additional_data: additional_data.into(),
        });
        self
    }

    /// Register a handler for a function code.
    ///
    /// Replaces the built-in handler of that code, if any.
    #[must_use]
    pub fn with_handler<F>(mut self, function: u8, handler: F) -> Self
    where
        F: Fn(&Pdu, &mut dyn RegisterAccess) -> Result<Response, ExceptionCode>
            + Send
            + Sync
            + 'static,
    {
        let handler: Handler = std::sync::Arc::new(handler);
        self.handlers.retain(|entry| entry.function != function);
        self.handlers.push(DispatchEntry { function, handler });
        self
    }
}
