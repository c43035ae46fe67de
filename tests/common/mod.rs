// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{io, ops::Range, sync::Arc, time::Duration};

use parking_lot::Mutex;

use modbus_stack::{
    codec::rtu::calc_crc, AccessMode, Address, Port, Quantity, RegisterAccess, RegisterError,
    RegisterType, Stack,
};

pub const TABLE_SIZE: usize = 64;

#[derive(Debug, Default)]
pub struct Wire {
    pub sent: Vec<Vec<u8>>,
    pub timer: Option<Duration>,
    pub enabled: bool,
    pub closed: bool,
}

/// Port recording everything the stack does. Timers are expired by hand
/// through [`Stack::on_timer_expired`].
#[derive(Debug, Clone)]
pub struct MockPort {
    pub wire: Arc<Mutex<Wire>>,
    pub baud_rate: u32,
    pub fail_open: bool,
}

impl Default for MockPort {
    fn default() -> Self {
        Self {
            wire: Arc::default(),
            baud_rate: 19_200,
            fail_open: false,
        }
    }
}

impl MockPort {
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.wire.lock().sent)
    }

    pub fn timer(&self) -> Option<Duration> {
        self.wire.lock().timer
    }
}

impl Port for MockPort {
    fn open(&mut self) -> io::Result<()> {
        if self.fail_open {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.wire.lock().closed = true;
    }

    fn enable(&mut self) {
        self.wire.lock().enabled = true;
    }

    fn disable(&mut self) {
        let mut wire = self.wire.lock();
        wire.enabled = false;
        wire.timer = None;
    }

    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.wire.lock().sent.push(frame.to_vec());
        Ok(())
    }

    fn start_timer(&mut self, timeout: Duration) {
        self.wire.lock().timer = Some(timeout);
    }

    fn stop_timer(&mut self) {
        self.wire.lock().timer = None;
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[derive(Debug)]
pub struct Tables {
    pub coils: [bool; TABLE_SIZE],
    pub discrete_inputs: [bool; TABLE_SIZE],
    pub holding: [u16; TABLE_SIZE],
    pub input: [u16; TABLE_SIZE],
    pub accesses: Vec<(AccessMode, RegisterType, Address, Quantity)>,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            coils: [false; TABLE_SIZE],
            discrete_inputs: [false; TABLE_SIZE],
            holding: [0; TABLE_SIZE],
            input: [0; TABLE_SIZE],
            accesses: Vec::new(),
        }
    }
}

/// In-memory registers shared between the test and the stack.
#[derive(Debug, Clone, Default)]
pub struct Memory(pub Arc<Mutex<Tables>>);

impl RegisterAccess for Memory {
    fn access(
        &mut self,
        mode: AccessMode,
        register: RegisterType,
        start: Address,
        quantity: Quantity,
        buf: &mut [u8],
    ) -> Result<(), RegisterError> {
        let mut tables = self.0.lock();
        tables.accesses.push((mode, register, start, quantity));
        let range = usize::from(start)..usize::from(start) + usize::from(quantity);
        match (mode, register) {
            (AccessMode::Read, RegisterType::Coil) => read_bits(&tables.coils[range], buf),
            (AccessMode::Read, RegisterType::DiscreteInput) => {
                read_bits(&tables.discrete_inputs[range], buf);
            }
            (AccessMode::Write, RegisterType::Coil) => {
                for (i, coil) in tables.coils[range].iter_mut().enumerate() {
                    *coil = buf[i / 8] & (1 << (i % 8)) != 0;
                }
            }
            (AccessMode::Read, RegisterType::Holding) => read_words(&tables.holding[range], buf),
            (AccessMode::Read, RegisterType::Input) => read_words(&tables.input[range], buf),
            (AccessMode::Write, RegisterType::Holding) => {
                for (word, bytes) in tables.holding[range].iter_mut().zip(buf.chunks(2)) {
                    *word = u16::from_be_bytes([bytes[0], bytes[1]]);
                }
            }
            (AccessMode::Write, RegisterType::DiscreteInput | RegisterType::Input) => {
                return Err(RegisterError::NoRegister);
            }
        }
        Ok(())
    }

    fn addressable(&self, _: RegisterType) -> Range<u32> {
        0..TABLE_SIZE as u32
    }
}

fn read_bits(bits: &[bool], buf: &mut [u8]) {
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            buf[i / 8] |= 1 << (i % 8);
        }
    }
}

fn read_words(words: &[u16], buf: &mut [u8]) {
    for (word, bytes) in words.iter().zip(buf.chunks_mut(2)) {
        bytes.copy_from_slice(&word.to_be_bytes());
    }
}

/// Append the CRC to an RTU frame.
pub fn rtu_frame(bytes: &[u8]) -> Vec<u8> {
    let mut frame = bytes.to_vec();
    frame.extend_from_slice(&calc_crc(bytes).to_le_bytes());
    frame
}

/// Let the line fall silent: t1.5 and then t3.5 expire.
pub fn rtu_silence(stack: &Stack) {
    stack.on_timer_expired();
    stack.on_timer_expired();
}
