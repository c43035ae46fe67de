// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stack facade.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{
    config::Config,
    engine::{Counters, Engine, State},
    error::{Error, Result},
    frame::{ModbusResult, Request},
    port::Port,
    registers::RegisterAccess,
    slave::Slave,
};

/// Handle of one Modbus stack instance.
///
/// Clones share the same instance. Every call locks the instance, so the
/// event entry points can be called from an interrupt-like context such as
/// a reader task while another task calls [`disable`](Self::disable).
#[derive(Clone)]
pub struct Stack {
    config: Arc<Config>,
    engine: Arc<Mutex<Option<Engine>>>,
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("role", &self.config.role)
            .field("mode", &self.config.mode)
            .field("state", &self.state())
            .finish()
    }
}

impl Stack {
    /// Create a disabled stack instance.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if a slave address is outside of `1..=247`
    /// or the Report Slave ID data does not fit into a response, and
    /// [`Error::PortError`] if the port cannot be opened.
    pub fn init<P, R>(config: Config, port: P, registers: R) -> Result<Self>
    where
        P: Port + 'static,
        R: RegisterAccess + 'static,
    {
        let config = Arc::new(config);
        let engine = Engine::new(Arc::clone(&config), Box::new(port), Box::new(registers))?;
        Ok(Self {
            config,
            engine: Arc::new(Mutex::new(Some(engine))),
        })
    }

    fn with_engine<T>(&self, f: impl FnOnce(&mut Engine) -> Result<T>) -> Result<T> {
        let mut engine = self.engine.lock();
        let engine = engine
            .as_mut()
            .ok_or(Error::IllegalState("stack has been closed"))?;
        f(engine)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The current state. A closed stack reports [`State::Disabled`].
    #[must_use]
    pub fn state(&self) -> State {
        self.engine
            .lock()
            .as_ref()
            .map_or(State::Disabled, Engine::state)
    }

    #[must_use]
    pub fn counters(&self) -> Counters {
        self.engine
            .lock()
            .as_ref()
            .map(Engine::counters)
            .unwrap_or_default()
    }

    /// Start receiving.
    pub fn enable(&self) -> Result<()> {
        self.with_engine(Engine::enable)
    }

    /// Stop receiving.
    ///
    /// A partially received or unprocessed frame is dropped and an
    /// outstanding request fails with [`Error::IllegalState`]. Disabling a
    /// disabled stack has no effect.
    pub fn disable(&self) -> Result<()> {
        self.with_engine(|engine| {
            engine.disable();
            Ok(())
        })
    }

    /// Process a completed frame: dispatch and answer a request, or complete
    /// the outstanding request with the response.
    pub fn poll(&self) -> Result<()> {
        self.with_engine(Engine::poll)
    }

    /// Release the port. The stack must be disabled.
    ///
    /// Every later call on this or a cloned handle fails with
    /// [`Error::IllegalState`].
    pub fn close(&self) -> Result<()> {
        let mut engine = self.engine.lock();
        engine
            .as_mut()
            .ok_or(Error::IllegalState("stack has been closed"))?
            .close()?;
        *engine = None;
        Ok(())
    }

    /// Bytes received by the port.
    pub fn on_bytes_received(&self, bytes: &[u8]) {
        if let Some(engine) = self.engine.lock().as_mut() {
            engine.on_bytes_received(bytes);
        }
    }

    /// The timer armed by the last [`Port::start_timer`] call expired.
    pub fn on_timer_expired(&self) {
        if let Some(engine) = self.engine.lock().as_mut() {
            engine.on_timer_expired();
        }
    }

    /// The TCP connection has been closed by the peer.
    pub fn on_connection_closed(&self) {
        if let Some(engine) = self.engine.lock().as_mut() {
            engine.on_connection_closed();
        }
    }

    /// Send a request to a slave.
    ///
    /// The request is on the wire when this returns. Only one request may be
    /// outstanding at a time. Over a serial line a request to
    /// [`Slave::broadcast`] is allowed for write functions; it completes
    /// with the echo of the request once the turnaround delay elapsed.
    ///
    /// # Errors
    ///
    /// [`Error::IllegalState`] if the stack is not an enabled master or is
    /// busy, [`Error::InvalidArgument`] for a request that cannot be sent.
    pub fn submit_request(
        &self,
        slave: Slave,
        request: Request<'_>,
        timeout: Duration,
    ) -> Result<PendingResponse> {
        let (tx, rx) = oneshot::channel();
        self.with_engine(|engine| engine.submit(slave, request.into_owned(), timeout, tx))?;
        Ok(PendingResponse { rx })
    }

    /// Send a request with the configured response timeout and wait for the
    /// result.
    pub async fn call(&self, slave: Slave, request: Request<'_>) -> Result<ModbusResult> {
        self.submit_request(slave, request, self.config.response_timeout)?
            .await
    }
}

/// The response to a submitted request.
///
/// Resolves to the response or the exception reported by the slave, or to
/// an [`Error`] if no valid response arrived.
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<ModbusResult>>,
}

impl Future for PendingResponse {
    type Output = Result<ModbusResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.unwrap_or_else(|_| Err(Error::IllegalState("stack has been closed")))
        })
    }
}
