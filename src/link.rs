// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tokio driver connecting a byte stream with a [`Stack`].
//!
//! [`channel`] creates a [`LinkPort`] to initialize the stack with and the
//! [`Link`] that pumps bytes, frames and timer expiries between the stack
//! and a TCP socket or serial stream.
//!
//! ```no_run
//! # async fn serve() -> Result<(), Box<dyn std::error::Error>> {
//! use modbus_stack::{link, Config, Mode, NoRegisters, Slave, Stack, DEFAULT_TCP_PORT};
//!
//! let (port, mut link) = link::channel();
//! let stack = Stack::init(Config::slave(Mode::Tcp, Slave(1)), port, NoRegisters)?;
//! stack.enable()?;
//! let listener = tokio::net::TcpListener::bind(("0.0.0.0", DEFAULT_TCP_PORT)).await?;
//! link.serve(listener, &stack).await?;
//! # Ok(())
//! # }
//! ```

use std::{io, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _},
    net::TcpListener,
    sync::{mpsc, Notify},
    time::{sleep_until, Instant},
};

use crate::{bytes::Bytes, bytes::BytesMut, port::Port, stack::Stack};

#[derive(Debug, Default)]
struct Timer {
    deadline: Mutex<Option<Instant>>,
    changed: Notify,
}

/// [`Port`] implementation backed by a [`Link`].
#[derive(Debug)]
pub struct LinkPort {
    outgoing: mpsc::UnboundedSender<Bytes>,
    timer: Arc<Timer>,
    baud_rate: u32,
}

impl LinkPort {
    /// Set the baud rate of the serial line the link is connected to.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    fn set_deadline(&self, deadline: Option<Instant>) {
        *self.timer.deadline.lock() = deadline;
        self.timer.changed.notify_one();
    }
}

impl Port for LinkPort {
    fn open(&mut self) -> io::Result<()> {
        if self.outgoing.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "link has been dropped",
            ));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.set_deadline(None);
    }

    fn enable(&mut self) {
        log::debug!("Link enabled");
    }

    fn disable(&mut self) {
        log::debug!("Link disabled");
        self.set_deadline(None);
    }

    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.outgoing
            .send(Bytes::copy_from_slice(frame))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "link has been dropped"))
    }

    fn start_timer(&mut self, timeout: Duration) {
        self.set_deadline(Some(Instant::now() + timeout));
    }

    fn stop_timer(&mut self) {
        self.set_deadline(None);
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

/// Pumps bytes between a stream and a [`Stack`].
#[derive(Debug)]
pub struct Link {
    outgoing: mpsc::UnboundedReceiver<Bytes>,
    timer: Arc<Timer>,
}

/// Create a connected port and link.
#[must_use]
pub fn channel() -> (LinkPort, Link) {
    let (tx, rx) = mpsc::unbounded_channel();
    let timer = Arc::new(Timer::default());
    let port = LinkPort {
        outgoing: tx,
        timer: Arc::clone(&timer),
        baud_rate: 19_200,
    };
    let link = Link {
        outgoing: rx,
        timer,
    };
    (port, link)
}

impl Link {
    /// Run until the stream reaches EOF or fails.
    pub async fn run<T>(&mut self, mut stream: T, stack: &Stack) -> io::Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::with_capacity(1024);
        loop {
            let deadline = *self.timer.deadline.lock();
            tokio::select! {
                res = stream.read_buf(&mut buf) => {
                    if res? == 0 {
                        stack.on_connection_closed();
                        poll(stack);
                        return Ok(());
                    }
                    stack.on_bytes_received(&buf);
                    buf.clear();
                    poll(stack);
                }
                Some(frame) = self.outgoing.recv() => {
                    stream.write_all(&frame).await?;
                    stream.flush().await?;
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let expired = {
                        let mut current = self.timer.deadline.lock();
                        if *current == deadline {
                            *current = None;
                            true
                        } else {
                            false
                        }
                    };
                    if expired {
                        stack.on_timer_expired();
                        poll(stack);
                    }
                }
                () = self.timer.changed.notified() => {}
            }
        }
    }

    /// Accept TCP connections one at a time and run each until it closes.
    ///
    /// Frames the stack sent while no connection was open are dropped.
    pub async fn serve(&mut self, listener: TcpListener, stack: &Stack) -> io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            log::debug!("Accepted connection from {peer}");
            while let Ok(frame) = self.outgoing.try_recv() {
                log::debug!("Dropping {} bytes sent without a connection", frame.len());
            }
            if let Err(err) = self.run(stream, stack).await {
                log::warn!("Connection to {peer} failed: {err}");
                stack.on_connection_closed();
            }
        }
    }
}

fn poll(stack: &Stack) {
    if let Err(err) = stack.poll() {
        log::debug!("Failed to process frame: {err}");
    }
}

/// Open a serial port for use with [`Link::run`].
#[cfg(feature = "serial")]
pub fn open_serial(
    path: impl AsRef<std::path::Path>,
    baud_rate: u32,
) -> tokio_serial::Result<tokio_serial::SerialStream> {
    tokio_serial::SerialStream::open(&tokio_serial::new(
        path.as_ref().to_string_lossy(),
        baud_rate,
    ))
}
