// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

/// Above this baud rate the character timeouts are fixed.
const FIXED_TIMING_BAUD_RATE: u32 = 19_200;

/// Serial character timing derived from the baud rate.
///
/// One character is 11 bits on the wire (start, 8 data, parity or second
/// stop bit, stop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Timing {
    /// 1.5 character times: the longest gap allowed inside a frame.
    pub(crate) t15: Duration,
    /// 3.5 character times: the silence that ends a frame.
    pub(crate) t35: Duration,
}

impl Timing {
    pub(crate) fn from_baud_rate(baud_rate: u32) -> Self {
        if baud_rate == 0 || baud_rate > FIXED_TIMING_BAUD_RATE {
            return Self {
                t15: Duration::from_micros(750),
                t35: Duration::from_micros(1750),
            };
        }
        let char_us = 11_000_000 / u64::from(baud_rate);
        Self {
            t15: Duration::from_micros(char_us * 3 / 2),
            t35: Duration::from_micros(char_us * 7 / 2),
        }
    }

    /// Remaining silence after the inter-character timeout expired.
    pub(crate) fn t15_to_t35(self) -> Duration {
        self.t35.saturating_sub(self.t15)
    }
}
