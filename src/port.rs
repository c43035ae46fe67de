// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Porting layer seam.

use std::{io, time::Duration};

/// Hardware or OS specific services a stack instance depends on.
///
/// The port reports events back by calling the event entry points of
/// [`Stack`](crate::Stack): received bytes, expiry of the timer, and for
/// TCP the loss of the connection. A port must not call back into the stack
/// from within one of these methods.
pub trait Port: Send {
    /// Acquire the resources of the port, e.g. open the serial device.
    fn open(&mut self) -> io::Result<()>;

    /// Release the resources acquired by [`open`](Self::open).
    fn close(&mut self);

    /// Start delivering received bytes.
    fn enable(&mut self);

    /// Stop delivering received bytes and stop the timer.
    fn disable(&mut self);

    /// Transmit a complete frame.
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Arm the timer, replacing a running one.
    ///
    /// Expiry is reported through
    /// [`Stack::on_timer_expired`](crate::Stack::on_timer_expired).
    fn start_timer(&mut self, timeout: Duration);

    fn stop_timer(&mut self);

    /// Line speed of a serial port. Determines the RTU character timing.
    fn baud_rate(&self) -> u32 {
        19_200
    }
}

impl<T: Port + ?Sized> Port for Box<T> {
    fn open(&mut self) -> io::Result<()> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn enable(&mut self) {
        (**self).enable();
    }

    fn disable(&mut self) {
        (**self).disable();
    }

    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        (**self).send(frame)
    }

    fn start_timer(&mut self, timeout: Duration) {
        (**self).start_timer(timeout);
    }

    fn stop_timer(&mut self) {
        (**self).stop_timer();
    }

    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }
}
