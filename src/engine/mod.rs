// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol state machine.
//!
//! Port events only buffer bytes, re-arm the single port timer and record a
//! completed frame. Dispatching and sending happen in [`Engine::poll`].

use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::oneshot;

use crate::{
    codec::{encode_request_pdu, Decoded, FrameCodec, FrameError, MAX_PDU_SIZE},
    config::{Config, Mode, Role},
    dispatch::{verify_response, DispatchTable},
    error::{Error, Result},
    frame::{Adu, Header, ModbusResult, Request, TransactionId},
    port::Port,
    registers::RegisterAccess,
    slave::Slave,
};

mod timing;

use self::timing::Timing;

/// State of a stack instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Initialized or disabled; no bytes are accepted.
    Disabled,
    /// Waiting for the first byte of a frame or, for a master, for the next
    /// request to send.
    Idle,
    /// Part of a frame has been received.
    Receiving,
    /// A complete frame waits to be processed by [`poll`](crate::Stack::poll).
    Processing,
    /// RTU only: the stack has just been enabled, or a character timeout
    /// or overflow occurred. All bytes are ignored until the line has been
    /// silent for 3.5 characters.
    ///
    /// Checksum and format errors of a complete frame, and ASCII character
    /// timeouts, are only detected after the line went silent. These go
    /// straight back to [`State::Idle`].
    ExceptionDiscard,
    /// A frame has been sent. Serial transports stay here until the
    /// turnaround delay elapsed.
    Transmitting,
    /// Master only: a request has been sent and no response byte has
    /// arrived yet.
    AwaitingReply,
}

/// Diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Valid frames seen on the bus.
    pub bus_messages: u32,
    pub checksum_errors: u32,
    /// Malformed frames and buffer overflows.
    pub format_errors: u32,
    pub char_timeouts: u32,
    /// Exception responses sent by a slave.
    pub exception_responses: u32,
    /// Frames addressed to another slave, or responses that do not belong
    /// to the request of a master.
    pub other_slave_frames: u32,
    pub broadcasts: u32,
    pub master_timeouts: u32,
}

fn bump(counter: &mut u32) {
    *counter = counter.wrapping_add(1);
}

/// Meaning of the armed port timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    /// RTU: 1.5 characters after the last byte.
    InterChar,
    /// RTU: until 3.5 characters after the last byte.
    InterFrame,
    /// ASCII inter-character timeout.
    Character,
    /// Serial guard time after sending a response.
    Turnaround,
    /// Master response timeout.
    Response,
    /// Master turnaround delay after a broadcast.
    Broadcast,
}

pub(crate) type Reply = oneshot::Sender<Result<ModbusResult>>;

#[derive(Debug)]
struct Outstanding {
    slave: Slave,
    transaction_id: Option<TransactionId>,
    request: Request<'static>,
    deadline: Instant,
    reply: Reply,
}

pub(crate) struct Engine {
    config: Arc<Config>,
    port: Box<dyn Port>,
    registers: Box<dyn RegisterAccess>,
    codec: FrameCodec,
    table: DispatchTable,
    timing: Timing,
    state: State,
    timer: Option<Timer>,
    frame: Option<Adu>,
    counters: Counters,
    outstanding: Option<Outstanding>,
    transaction_id: TransactionId,
}

impl Engine {
    pub(crate) fn new(
        config: Arc<Config>,
        mut port: Box<dyn Port>,
        registers: Box<dyn RegisterAccess>,
    ) -> Result<Self> {
        if config.role == Role::Slave && !config.slave.is_single_device() {
            return Err(Error::InvalidArgument(format!(
                "invalid slave address {}",
                config.slave
            )));
        }
        if let Some(identity) = &config.report_slave_id {
            // Function code, byte count, id and run indicator
            if 4 + identity.additional_data.len() > MAX_PDU_SIZE {
                return Err(Error::InvalidArgument(format!(
                    "{} bytes of slave id data exceed the PDU size",
                    identity.additional_data.len()
                )));
            }
        }
        let baud_rate = port.baud_rate();
        if config.mode.is_serial() && baud_rate == 0 {
            return Err(Error::InvalidArgument("baud rate must not be 0".into()));
        }
        port.open().map_err(Error::PortError)?;
        log::debug!(
            "Initialized {:?} {:?} stack at {} baud",
            config.role,
            config.mode,
            baud_rate
        );
        Ok(Self {
            codec: FrameCodec::new(config.mode),
            table: DispatchTable::new(&config),
            timing: Timing::from_baud_rate(baud_rate),
            config,
            port,
            registers,
            state: State::Disabled,
            timer: None,
            frame: None,
            counters: Counters::default(),
            outstanding: None,
            transaction_id: 0,
        })
    }

    pub(crate) const fn state(&self) -> State {
        self.state
    }

    pub(crate) const fn counters(&self) -> Counters {
        self.counters
    }

    pub(crate) fn enable(&mut self) -> Result<()> {
        if self.state != State::Disabled {
            return Err(Error::IllegalState("stack is already enabled"));
        }
        self.codec.reset();
        self.port.enable();
        if self.config.mode == Mode::Rtu {
            // A frame may only start after 3.5 characters of silence.
            self.state = State::ExceptionDiscard;
            self.arm(Timer::InterFrame, self.timing.t35);
        } else {
            self.state = State::Idle;
        }
        Ok(())
    }

    pub(crate) fn disable(&mut self) {
        if self.state == State::Disabled {
            return;
        }
        self.stop_timer();
        self.port.disable();
        self.codec.reset();
        if let Some(adu) = self.frame.take() {
            log::debug!("Abandoning unprocessed frame {adu:?}");
        }
        self.complete(Err(Error::IllegalState("stack has been disabled")));
        self.state = State::Disabled;
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        if self.state != State::Disabled {
            return Err(Error::IllegalState("stack must be disabled before closing"));
        }
        self.port.close();
        Ok(())
    }

    pub(crate) fn on_bytes_received(&mut self, bytes: &[u8]) {
        log::trace!("Received {bytes:02X?}");
        match self.state {
            State::Disabled => return,
            State::Transmitting => {
                log::debug!("Ignoring {} bytes during turnaround", bytes.len());
                return;
            }
            State::ExceptionDiscard => {
                // The silence is measured from the last byte.
                self.arm_receive(Timer::InterFrame, self.timing.t35);
                return;
            }
            State::Processing => {
                if self.config.mode == Mode::Tcp {
                    self.codec.extend(bytes);
                } else {
                    log::debug!("Ignoring {} bytes while processing", bytes.len());
                }
                return;
            }
            State::Idle | State::Receiving | State::AwaitingReply => {}
        }
        match self.config.mode {
            Mode::Rtu => self.receive_rtu(bytes),
            Mode::Ascii => {
                let decoded = self.codec.push(bytes);
                if matches!(decoded, Decoded::Incomplete) && self.codec.buffered() > 0 {
                    self.state = State::Receiving;
                    self.arm_receive(Timer::Character, self.config.ascii_timeout);
                    return;
                }
                self.accept(decoded);
            }
            Mode::Tcp => {
                let decoded = self.codec.push(bytes);
                self.accept(decoded);
            }
        }
    }

    fn receive_rtu(&mut self, bytes: &[u8]) {
        if self.state == State::Receiving && self.timer == Some(Timer::InterFrame) {
            log::debug!("Character timeout inside RTU frame");
            bump(&mut self.counters.char_timeouts);
            self.codec.reset();
            self.state = State::ExceptionDiscard;
            self.arm_receive(Timer::InterFrame, self.timing.t35);
            return;
        }
        if let Decoded::Invalid(err) = self.codec.push(bytes) {
            self.frame_error(&err);
            self.state = State::ExceptionDiscard;
            self.arm_receive(Timer::InterFrame, self.timing.t35);
            return;
        }
        self.state = State::Receiving;
        self.arm_receive(Timer::InterChar, self.timing.t15);
    }

    /// Take over the outcome of a decode attempt.
    fn accept(&mut self, decoded: Decoded) {
        match decoded {
            Decoded::Complete(adu) => {
                self.stop_timer();
                self.frame = Some(adu);
                self.state = State::Processing;
            }
            Decoded::Incomplete => {
                if self.codec.buffered() > 0 && self.state != State::Receiving {
                    self.state = State::Receiving;
                } else if self.codec.buffered() == 0 && self.state == State::Receiving {
                    self.frame_done();
                }
            }
            Decoded::Invalid(err) => {
                self.frame_error(&err);
                self.frame_done();
            }
            Decoded::Timeout => {
                log::debug!("Character timeout inside frame");
                bump(&mut self.counters.char_timeouts);
                self.frame_done();
            }
        }
    }

    pub(crate) fn on_timer_expired(&mut self) {
        let Some(timer) = self.timer.take() else {
            log::trace!("Ignoring expiry of a stopped timer");
            return;
        };
        match (timer, self.state) {
            (_, State::Disabled) => {}
            (Timer::InterChar, State::Receiving) => {
                self.arm_receive(Timer::InterFrame, self.timing.t15_to_t35());
            }
            (Timer::InterFrame, State::Receiving) => {
                let decoded = self.codec.end_of_frame();
                self.accept(decoded);
            }
            (Timer::InterFrame, State::ExceptionDiscard) => {
                self.codec.reset();
                self.frame_done();
            }
            (Timer::Character, State::Receiving) => {
                let decoded = self.codec.timeout();
                self.accept(decoded);
            }
            (Timer::Turnaround, State::Transmitting) => {
                self.state = State::Idle;
            }
            (Timer::Broadcast, State::Transmitting) => {
                let result = self
                    .outstanding
                    .as_ref()
                    .and_then(|outstanding| outstanding.request.broadcast_echo())
                    .map(Ok)
                    .ok_or(Error::IllegalState("request cannot be broadcast"));
                self.state = State::Idle;
                self.complete(result);
            }
            (
                Timer::Response,
                State::AwaitingReply | State::Receiving | State::ExceptionDiscard,
            ) => self.response_timeout(),
            (timer, state) => {
                log::debug!("Ignoring expiry of {timer:?} timer in state {state:?}");
            }
        }
    }

    pub(crate) fn on_connection_closed(&mut self) {
        if self.state == State::Disabled {
            return;
        }
        if self.config.mode != Mode::Tcp {
            log::debug!("Ignoring closed connection on a serial line");
            return;
        }
        if let Decoded::Complete(adu) = self.codec.end_of_frame() {
            log::debug!("Dropping frame {adu:?} of closed connection");
        }
        if let Some(adu) = self.frame.take() {
            log::debug!("Dropping unprocessed frame {adu:?} of closed connection");
        }
        if self.outstanding.is_some() {
            self.stop_timer();
            self.complete(Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection closed while waiting for a response",
            ))));
        }
        self.state = State::Idle;
    }

    pub(crate) fn poll(&mut self) -> Result<()> {
        if self.state == State::Disabled {
            return Err(Error::IllegalState("stack is disabled"));
        }
        loop {
            if self.state == State::Processing {
                match (self.frame.take(), self.config.role) {
                    (Some(adu), Role::Slave) => self.process_request(adu)?,
                    (Some(adu), Role::Master) => self.process_response(adu),
                    (None, _) => self.frame_done(),
                }
            }
            // Pipelined TCP frames stay in the buffer.
            let ready = matches!(self.state, State::Idle | State::AwaitingReply);
            if self.config.mode == Mode::Tcp && ready && self.codec.buffered() > 0 {
                let decoded = self.codec.decode();
                self.accept(decoded);
                if self.state == State::Processing {
                    continue;
                }
            }
            return Ok(());
        }
    }

    fn process_request(&mut self, adu: Adu) -> Result<()> {
        let Adu { hdr, pdu } = adu;
        bump(&mut self.counters.bus_messages);
        let own = self.config.slave;
        let respond = match self.config.mode {
            Mode::Tcp => hdr.slave == own || hdr.slave == Slave::tcp_device() || hdr.slave.is_broadcast(),
            Mode::Rtu | Mode::Ascii => hdr.slave == own,
        };
        let broadcast = self.config.mode.is_serial() && hdr.slave.is_broadcast();
        if !respond && !broadcast {
            log::trace!("Ignoring frame addressed to slave {}", hdr.slave);
            bump(&mut self.counters.other_slave_frames);
            self.frame_done();
            return Ok(());
        }

        let response = self.table.dispatch(&pdu, &mut *self.registers);
        if broadcast {
            bump(&mut self.counters.broadcasts);
            self.frame_done();
            return Ok(());
        }
        if response.is_exception() {
            bump(&mut self.counters.exception_responses);
        }
        self.transmit(&Adu {
            hdr,
            pdu: response,
        })
    }

    fn process_response(&mut self, adu: Adu) {
        let Some(outstanding) = &self.outstanding else {
            log::debug!("Ignoring unsolicited frame {adu:?}");
            self.frame_done();
            return;
        };
        if adu.hdr.slave != outstanding.slave
            || adu.hdr.transaction_id != outstanding.transaction_id
        {
            log::debug!(
                "Ignoring response {:?}, expected slave {} transaction {:?}",
                adu.hdr,
                outstanding.slave,
                outstanding.transaction_id
            );
            bump(&mut self.counters.other_slave_frames);
            self.frame_done();
            return;
        }
        bump(&mut self.counters.bus_messages);
        let result = verify_response(&outstanding.request, &adu.pdu);
        if let Err(exception) = &result {
            log::debug!("Request failed with exception: {exception}");
        }
        self.stop_timer();
        self.state = State::Idle;
        self.complete(Ok(result));
    }

    fn transmit(&mut self, adu: &Adu) -> Result<()> {
        let frame = match self.codec.encode(adu) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("Failed to encode response: {err}");
                self.frame_done();
                return Ok(());
            }
        };
        log::trace!("Sending {:02X?}", frame.as_ref());
        self.state = State::Transmitting;
        if let Err(err) = self.port.send(&frame) {
            self.state = State::Idle;
            return Err(Error::Io(err));
        }
        if self.config.mode.is_serial() {
            self.codec.reset();
            self.arm(Timer::Turnaround, self.timing.t35);
        } else {
            self.state = State::Idle;
        }
        Ok(())
    }

    pub(crate) fn submit(
        &mut self,
        slave: Slave,
        request: Request<'static>,
        timeout: Duration,
        reply: Reply,
    ) -> Result<()> {
        if self.config.role != Role::Master {
            return Err(Error::IllegalState("requests can only be sent by a master"));
        }
        match self.state {
            State::Disabled => return Err(Error::IllegalState("stack is disabled")),
            // Without an outstanding request nothing on the line can be a
            // response, so the master need not wait for silence.
            State::Idle | State::ExceptionDiscard if self.outstanding.is_none() => {}
            _ => return Err(Error::IllegalState("stack is busy")),
        }
        let serial = self.config.mode.is_serial();
        let broadcast = serial && slave.is_broadcast();
        if broadcast && request.broadcast_echo().is_none() {
            return Err(Error::InvalidArgument(format!(
                "function code {} cannot be broadcast",
                request.function_code()
            )));
        }
        if serial && slave.is_reserved() {
            return Err(Error::InvalidArgument(format!(
                "invalid slave address {slave}"
            )));
        }

        let pdu = encode_request_pdu(&request)
            .map_err(|err| Error::InvalidArgument(err.to_string()))?;
        let transaction_id = (self.config.mode == Mode::Tcp).then(|| {
            let transaction_id = self.transaction_id;
            self.transaction_id = transaction_id.wrapping_add(1);
            transaction_id
        });
        let adu = Adu {
            hdr: Header {
                slave,
                transaction_id,
            },
            pdu,
        };
        let frame = self
            .codec
            .encode(&adu)
            .map_err(|err| Error::InvalidArgument(err.to_string()))?;
        self.codec.reset();
        log::trace!("Sending {:02X?}", frame.as_ref());
        self.port.send(&frame)?;

        let delay = if broadcast {
            self.config.turnaround_delay
        } else {
            timeout
        };
        self.outstanding = Some(Outstanding {
            slave,
            transaction_id,
            request,
            deadline: Instant::now() + delay,
            reply,
        });
        if broadcast {
            self.state = State::Transmitting;
            self.arm(Timer::Broadcast, delay);
        } else {
            self.state = State::AwaitingReply;
            self.arm(Timer::Response, delay);
        }
        Ok(())
    }

    /// Back to idle after a frame, or keep waiting for the response.
    fn frame_done(&mut self) {
        if self.config.mode.is_serial() {
            self.codec.reset();
        }
        let Some(outstanding) = &self.outstanding else {
            self.state = State::Idle;
            return;
        };
        let remaining = outstanding.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            self.response_timeout();
            return;
        }
        self.state = State::AwaitingReply;
        if self.timer != Some(Timer::Response) {
            self.arm(Timer::Response, remaining);
        }
    }

    fn response_timeout(&mut self) {
        log::debug!("No response within the response timeout");
        bump(&mut self.counters.master_timeouts);
        self.stop_timer();
        self.codec.reset();
        self.state = State::Idle;
        self.complete(Err(Error::TimedOut));
    }

    fn complete(&mut self, result: Result<ModbusResult>) {
        let Some(outstanding) = self.outstanding.take() else {
            return;
        };
        if outstanding.reply.send(result).is_err() {
            log::debug!("Response to {:?} has been dropped", outstanding.request);
        }
    }

    fn frame_error(&mut self, err: &FrameError) {
        log::debug!("Discarding frame: {err}");
        match err {
            FrameError::Checksum { .. } => bump(&mut self.counters.checksum_errors),
            FrameError::Format(_) | FrameError::Overflow | FrameError::Io(_) => {
                bump(&mut self.counters.format_errors);
            }
        }
    }

    /// Arm a receive timer, or the response timer if the response deadline
    /// of the outstanding request comes first.
    fn arm_receive(&mut self, timer: Timer, timeout: Duration) {
        let remaining = self
            .outstanding
            .as_ref()
            .map(|outstanding| outstanding.deadline.saturating_duration_since(Instant::now()));
        match remaining {
            Some(remaining) if remaining <= timeout => self.arm(Timer::Response, remaining),
            _ => self.arm(timer, timeout),
        }
    }

    fn arm(&mut self, timer: Timer, timeout: Duration) {
        self.timer = Some(timer);
        self.port.start_timer(timeout);
    }

    fn stop_timer(&mut self) {
        if self.timer.take().is_some() {
            self.port.stop_timer();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        codec::rtu::calc_crc,
        dispatch::tests::Memory,
    };

    #[derive(Debug, Default)]
    struct Recorded {
        sent: Vec<Vec<u8>>,
        timers: Vec<Duration>,
        stopped: usize,
    }

    #[derive(Clone, Default)]
    struct RecordingPort(Arc<Mutex<Recorded>>);

    impl Port for RecordingPort {
        fn open(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn close(&mut self) {}

        fn enable(&mut self) {}

        fn disable(&mut self) {}

        fn send(&mut self, frame: &[u8]) -> io::Result<()> {
            self.0.lock().sent.push(frame.to_vec());
            Ok(())
        }

        fn start_timer(&mut self, timeout: Duration) {
            self.0.lock().timers.push(timeout);
        }

        fn stop_timer(&mut self) {
            self.0.lock().stopped += 1;
        }

        fn baud_rate(&self) -> u32 {
            9600
        }
    }

    fn rtu_slave() -> (Engine, RecordingPort) {
        let port = RecordingPort::default();
        let mut engine = Engine::new(
            Arc::new(Config::slave(Mode::Rtu, Slave(3))),
            Box::new(port.clone()),
            Box::<Memory>::default(),
        )
        .unwrap();
        engine.enable().unwrap();
        engine.on_timer_expired();
        port.0.lock().timers.clear();
        (engine, port)
    }

    fn master(mode: Mode) -> (Engine, RecordingPort) {
        let port = RecordingPort::default();
        let mut engine = Engine::new(
            Arc::new(Config::master(mode)),
            Box::new(port.clone()),
            Box::<Memory>::default(),
        )
        .unwrap();
        engine.enable().unwrap();
        (engine, port)
    }

    fn with_crc(bytes: &[u8]) -> Vec<u8> {
        let mut frame = bytes.to_vec();
        frame.extend_from_slice(&calc_crc(bytes).to_le_bytes());
        frame
    }

    #[test]
    fn rtu_frame_ends_after_silence() {
        let (mut engine, port) = rtu_slave();
        engine.on_bytes_received(&with_crc(&[0x03, 0x01, 0x00, 0x00, 0x00, 0x08]));
        assert_eq!(engine.state(), State::Receiving);
        assert_eq!(engine.timer, Some(Timer::InterChar));
        engine.on_timer_expired();
        assert_eq!(engine.timer, Some(Timer::InterFrame));
        engine.on_timer_expired();
        assert_eq!(engine.state(), State::Processing);
        engine.poll().unwrap();
        assert_eq!(engine.state(), State::Transmitting);
        assert_eq!(port.0.lock().sent.len(), 1);
        engine.on_timer_expired();
        assert_eq!(engine.state(), State::Idle);

        let timers = port.0.lock().timers.clone();
        assert_eq!(
            timers,
            vec![
                Duration::from_micros(1717),
                Duration::from_micros(2290),
                Duration::from_micros(4007),
            ]
        );
    }

    #[test]
    fn rtu_gap_inside_frame_discards_it() {
        let (mut engine, port) = rtu_slave();
        let frame = with_crc(&[0x03, 0x01, 0x00, 0x00, 0x00, 0x08]);
        engine.on_bytes_received(&frame[..3]);
        engine.on_timer_expired();
        engine.on_bytes_received(&frame[3..]);
        assert_eq!(engine.state(), State::ExceptionDiscard);
        assert_eq!(engine.counters().char_timeouts, 1);

        // Further bytes only restart the silence.
        engine.on_bytes_received(&[0x00]);
        assert_eq!(engine.state(), State::ExceptionDiscard);
        engine.on_timer_expired();
        assert_eq!(engine.state(), State::Idle);
        engine.poll().unwrap();
        assert!(port.0.lock().sent.is_empty());
    }

    #[test]
    fn disable_abandons_frame() {
        let (mut engine, port) = rtu_slave();
        engine.on_bytes_received(&with_crc(&[0x03, 0x01, 0x00, 0x00, 0x00, 0x08]));
        engine.on_timer_expired();
        engine.on_timer_expired();
        assert_eq!(engine.state(), State::Processing);
        engine.disable();
        assert_eq!(engine.state(), State::Disabled);
        assert!(matches!(engine.poll(), Err(Error::IllegalState(_))));
        engine.enable().unwrap();
        engine.poll().unwrap();
        assert!(port.0.lock().sent.is_empty());
    }

    #[test]
    fn close_requires_disabled_stack() {
        let (mut engine, _port) = rtu_slave();
        assert!(matches!(engine.close(), Err(Error::IllegalState(_))));
        assert!(matches!(engine.enable(), Err(Error::IllegalState(_))));
        engine.disable();
        engine.close().unwrap();
    }

    #[test]
    fn invalid_slave_address() {
        for address in [0, 248, 255] {
            let address = Slave(address);
            let res = Engine::new(
                Arc::new(Config::slave(Mode::Rtu, address)),
                Box::new(RecordingPort::default()),
                Box::<Memory>::default(),
            );
            assert!(matches!(res, Err(Error::InvalidArgument(_))));
        }
    }

    #[test]
    fn rtu_enable_waits_for_silence() {
        let port = RecordingPort::default();
        let mut engine = Engine::new(
            Arc::new(Config::slave(Mode::Rtu, Slave(3))),
            Box::new(port.clone()),
            Box::<Memory>::default(),
        )
        .unwrap();
        engine.enable().unwrap();
        assert_eq!(engine.state(), State::ExceptionDiscard);
        assert_eq!(engine.timer, Some(Timer::InterFrame));

        // Tail of a frame that was on the line before
        engine.on_bytes_received(&[0x00, 0x08]);
        assert_eq!(engine.state(), State::ExceptionDiscard);
        engine.on_timer_expired();
        assert_eq!(engine.state(), State::Idle);
        assert_eq!(
            port.0.lock().timers,
            vec![Duration::from_micros(4007), Duration::from_micros(4007)]
        );

        engine.on_bytes_received(&with_crc(&[0x03, 0x01, 0x00, 0x00, 0x00, 0x08]));
        engine.on_timer_expired();
        engine.on_timer_expired();
        engine.poll().unwrap();
        assert_eq!(port.0.lock().sent.len(), 1);
    }

    #[test]
    fn rtu_checksum_error_needs_no_extra_silence() {
        let (mut engine, port) = rtu_slave();
        let mut frame = with_crc(&[0x03, 0x01, 0x00, 0x00, 0x00, 0x08]);
        frame[7] ^= 0xFF;
        engine.on_bytes_received(&frame);
        engine.on_timer_expired();
        engine.on_timer_expired();
        assert_eq!(engine.state(), State::Idle);
        assert_eq!(engine.counters().checksum_errors, 1);

        frame[7] ^= 0xFF;
        engine.on_bytes_received(&frame);
        assert_eq!(engine.state(), State::Receiving);
        engine.on_timer_expired();
        engine.on_timer_expired();
        engine.poll().unwrap();
        assert_eq!(port.0.lock().sent.len(), 1);
    }

    #[test]
    fn stalled_ascii_reply_times_out_at_deadline() {
        let (mut engine, port) = master(Mode::Ascii);
        let (tx, mut rx) = oneshot::channel();
        let timeout = Duration::from_millis(200);
        engine
            .submit(Slave(1), Request::ReadCoils(0, 8), timeout, tx)
            .unwrap();
        assert_eq!(port.0.lock().timers, vec![timeout]);

        engine.on_bytes_received(b":01");
        assert_eq!(engine.state(), State::Receiving);
        assert_eq!(engine.timer, Some(Timer::Response));
        let armed = port.0.lock().timers[1];
        assert!(armed <= timeout);

        engine.on_timer_expired();
        assert_eq!(engine.state(), State::Idle);
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::TimedOut)));
        assert_eq!(engine.counters().master_timeouts, 1);
    }

    #[test]
    fn ascii_reply_within_deadline_uses_character_timeout() {
        let (mut engine, port) = master(Mode::Ascii);
        let (tx, _rx) = oneshot::channel();
        engine
            .submit(Slave(1), Request::ReadCoils(0, 8), Duration::from_secs(10), tx)
            .unwrap();
        engine.on_bytes_received(b":01");
        assert_eq!(engine.timer, Some(Timer::Character));
        assert_eq!(port.0.lock().timers[1], engine.config.ascii_timeout);

        // A character timeout keeps waiting for the response.
        engine.on_timer_expired();
        assert_eq!(engine.state(), State::AwaitingReply);
        assert_eq!(engine.timer, Some(Timer::Response));
        assert_eq!(engine.counters().char_timeouts, 1);
    }

    #[test]
    fn master_discards_response_of_other_slave() {
        let (mut engine, _port) = master(Mode::Rtu);
        let (tx, mut rx) = oneshot::channel();
        engine
            .submit(
                Slave(1),
                Request::ReadHoldingRegisters(0, 1),
                Duration::from_secs(10),
                tx,
            )
            .unwrap();
        assert_eq!(engine.state(), State::AwaitingReply);

        // Response from slave 2
        engine.on_bytes_received(&with_crc(&[0x02, 0x03, 0x02, 0x12, 0x34]));
        engine.on_timer_expired();
        engine.on_timer_expired();
        engine.poll().unwrap();
        assert_eq!(engine.state(), State::AwaitingReply);
        assert_eq!(engine.timer, Some(Timer::Response));
        assert!(rx.try_recv().is_err());

        engine.on_bytes_received(&with_crc(&[0x01, 0x03, 0x02, 0x12, 0x34]));
        engine.on_timer_expired();
        engine.on_timer_expired();
        engine.poll().unwrap();
        assert_eq!(engine.state(), State::Idle);
        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(
            response,
            Ok(crate::frame::Response::ReadHoldingRegisters(vec![0x1234]))
        );
        assert_eq!(engine.counters().other_slave_frames, 1);
    }
}
