// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Function code dispatch.
//!
//! A slave routes every received PDU through a [`DispatchTable`] built once
//! from the [`Config`]. A master checks responses with [`verify_response`].

use std::{fmt, sync::Arc};

use crate::{
    codec::{encode_response_pdu, response_pdu_size, MAX_PDU_SIZE},
    config::Config,
    frame::{ExceptionCode, ExceptionResponse, FunctionCode, Pdu, Response},
    registers::RegisterAccess,
};

mod handlers;
mod verify;

pub use self::verify::verify_response;

/// A function code handler of the slave role.
pub type Handler = Arc<
    dyn Fn(&Pdu, &mut dyn RegisterAccess) -> Result<Response, ExceptionCode> + Send + Sync,
>;

/// Binding of a function code to its handler.
#[derive(Clone)]
pub struct DispatchEntry {
    pub function: u8,
    pub handler: Handler,
}

impl fmt::Debug for DispatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchEntry")
            .field("function", &format_args!("0x{:02X}", self.function))
            .finish_non_exhaustive()
    }
}

/// Lookup table from function code to handler.
#[derive(Debug, Clone)]
pub struct DispatchTable {
    entries: Vec<DispatchEntry>,
}

impl DispatchTable {
    /// The built-in handlers, Report Slave ID if configured, and the
    /// handlers of the configuration which take precedence.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let mut table = Self {
            entries: Vec::with_capacity(10 + config.handlers.len()),
        };
        table.insert(0x01, Arc::new(handlers::read_coils));
        table.insert(0x02, Arc::new(handlers::read_discrete_inputs));
        table.insert(0x03, Arc::new(handlers::read_holding_registers));
        table.insert(0x04, Arc::new(handlers::read_input_registers));
        table.insert(0x05, Arc::new(handlers::write_single_coil));
        table.insert(0x06, Arc::new(handlers::write_single_register));
        table.insert(0x0F, Arc::new(handlers::write_multiple_coils));
        table.insert(0x10, Arc::new(handlers::write_multiple_registers));
        table.insert(0x17, Arc::new(handlers::read_write_multiple_registers));
        if let Some(identity) = config.report_slave_id.clone() {
            table.insert(
                0x11,
                Arc::new(move |pdu: &Pdu, _: &mut dyn RegisterAccess| {
                    handlers::report_slave_id(pdu, &identity)
                }),
            );
        }
        for entry in &config.handlers {
            table.insert(entry.function, Arc::clone(&entry.handler));
        }
        table
    }

    fn insert(&mut self, function: u8, handler: Handler) {
        debug_assert!(function < 0x80);
        if let Some(entry) = self.entries.iter_mut().find(|e| e.function == function) {
            entry.handler = handler;
        } else {
            self.entries.push(DispatchEntry { function, handler });
        }
    }

    #[must_use]
    pub fn lookup(&self, function: u8) -> Option<&Handler> {
        self.entries
            .iter()
            .find(|entry| entry.function == function)
            .map(|entry| &entry.handler)
    }

    /// Run the handler of the request and build the response PDU.
    ///
    /// Every outcome is a PDU: handler failures become exception responses.
    pub fn dispatch(&self, request: &Pdu, registers: &mut dyn RegisterAccess) -> Pdu {
        let function = FunctionCode::new(request.function);
        let result = match self.lookup(request.function) {
            Some(handler) => handler(request, registers),
            None => {
                log::debug!("No handler for function code {function}");
                Err(ExceptionCode::IllegalFunction)
            }
        };
        let exception = match result {
            Ok(response) if response_pdu_size(&response) <= MAX_PDU_SIZE => {
                return encode_response_pdu(&response);
            }
            Ok(_) => {
                log::warn!("Response to function code {function} exceeds the PDU size");
                ExceptionCode::ServerDeviceFailure
            }
            Err(exception) => exception,
        };
        log::debug!("Function code {function} failed: {exception}");
        Pdu::exception(ExceptionResponse {
            function: FunctionCode::new(request.function & 0x7F),
            exception,
        })
    }
}
