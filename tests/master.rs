// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Master role: request submission, response matching and timeouts.

#[allow(unused)]
mod common;

use std::{io, time::Duration};

use modbus_stack::{
    Config, Error, ExceptionCode, Mode, NoRegisters, Request, Response, Slave, Stack, State,
};

use crate::common::{rtu_frame, rtu_silence, Memory, MockPort};

const TIMEOUT: Duration = Duration::from_millis(500);

fn master(mode: Mode) -> anyhow::Result<(Stack, MockPort)> {
    let port = MockPort::default();
    let config = Config::master(mode).with_turnaround_delay(Duration::from_millis(50));
    let stack = Stack::init(config, port.clone(), NoRegisters)?;
    stack.enable()?;
    if mode == Mode::Rtu {
        rtu_silence(&stack);
    }
    Ok((stack, port))
}

#[tokio::test]
async fn rtu_read_holding_registers() -> anyhow::Result<()> {
    let (stack, port) = master(Mode::Rtu)?;

    let pending = stack.submit_request(Slave(1), Request::ReadHoldingRegisters(0x6B, 3), TIMEOUT)?;
    assert_eq!(
        port.take_sent(),
        vec![rtu_frame(&[0x01, 0x03, 0x00, 0x6B, 0x00, 0x03])]
    );
    assert_eq!(stack.state(), State::AwaitingReply);
    assert_eq!(port.timer(), Some(TIMEOUT));

    stack.on_bytes_received(&rtu_frame(&[
        0x01, 0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64,
    ]));
    rtu_silence(&stack);
    stack.poll()?;

    assert_eq!(
        pending.await?,
        Ok(Response::ReadHoldingRegisters(vec![0x022B, 0x0000, 0x0064]))
    );
    assert_eq!(stack.state(), State::Idle);
    assert_eq!(port.timer(), None);
    Ok(())
}

#[tokio::test]
async fn exception_response() -> anyhow::Result<()> {
    let (stack, _port) = master(Mode::Rtu)?;

    let pending = stack.submit_request(Slave(1), Request::ReadCoils(0xFFFF, 2), TIMEOUT)?;
    stack.on_bytes_received(&rtu_frame(&[0x01, 0x81, 0x02]));
    rtu_silence(&stack);
    stack.poll()?;

    assert_eq!(pending.await?, Err(ExceptionCode::IllegalDataAddress));
    Ok(())
}

#[tokio::test]
async fn coils_are_truncated_to_quantity() -> anyhow::Result<()> {
    let (stack, _port) = master(Mode::Rtu)?;

    let pending = stack.submit_request(Slave(1), Request::ReadCoils(0, 3), TIMEOUT)?;
    stack.on_bytes_received(&rtu_frame(&[0x01, 0x01, 0x01, 0xFD]));
    rtu_silence(&stack);
    stack.poll()?;

    assert_eq!(
        pending.await?,
        Ok(Response::ReadCoils(vec![true, false, true]))
    );
    Ok(())
}

#[tokio::test]
async fn timeout_then_next_request() -> anyhow::Result<()> {
    let (stack, port) = master(Mode::Rtu)?;

    let pending = stack.submit_request(Slave(2), Request::ReadInputRegisters(0, 1), TIMEOUT)?;
    stack.on_timer_expired();
    assert!(matches!(pending.await, Err(Error::TimedOut)));
    assert_eq!(stack.state(), State::Idle);
    assert_eq!(stack.counters().master_timeouts, 1);

    let pending = stack.submit_request(Slave(2), Request::WriteSingleCoil(4, true), TIMEOUT)?;
    let sent = port.take_sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1], rtu_frame(&[0x02, 0x05, 0x00, 0x04, 0xFF, 0x00]));

    // The slave echoes the request.
    stack.on_bytes_received(&sent[1]);
    rtu_silence(&stack);
    stack.poll()?;
    assert_eq!(pending.await?, Ok(Response::WriteSingleCoil(4, true)));
    Ok(())
}

#[tokio::test]
async fn stalled_ascii_reply_times_out_at_deadline() -> anyhow::Result<()> {
    let (stack, port) = master(Mode::Ascii)?;
    let timeout = Duration::from_millis(200);

    let pending = stack.submit_request(Slave(1), Request::ReadCoils(0, 8), timeout)?;
    stack.on_bytes_received(b":0101");
    assert_eq!(stack.state(), State::Receiving);
    // The character timeout would fire later than the response deadline.
    assert!(port.timer().is_some_and(|armed| armed <= timeout));

    stack.on_timer_expired();
    assert!(matches!(pending.await, Err(Error::TimedOut)));
    assert_eq!(stack.state(), State::Idle);
    assert_eq!(stack.counters().master_timeouts, 1);
    Ok(())
}

#[tokio::test]
async fn only_one_outstanding_request() -> anyhow::Result<()> {
    let (stack, port) = master(Mode::Rtu)?;

    let _pending = stack.submit_request(Slave(1), Request::ReadCoils(0, 1), TIMEOUT)?;
    let res = stack.submit_request(Slave(1), Request::ReadCoils(0, 1), TIMEOUT);
    assert!(matches!(res, Err(Error::IllegalState(_))));
    assert_eq!(port.take_sent().len(), 1);
    Ok(())
}

#[tokio::test]
async fn broadcast() -> anyhow::Result<()> {
    let (stack, port) = master(Mode::Rtu)?;

    let res = stack.submit_request(Slave::broadcast(), Request::ReadCoils(0, 1), TIMEOUT);
    assert!(matches!(res, Err(Error::InvalidArgument(_))));
    assert!(port.take_sent().is_empty());
    assert_eq!(stack.state(), State::Idle);

    let pending = stack.submit_request(
        Slave::broadcast(),
        Request::WriteSingleRegister(1, 0x0003),
        TIMEOUT,
    )?;
    assert_eq!(
        port.take_sent(),
        vec![rtu_frame(&[0x00, 0x06, 0x00, 0x01, 0x00, 0x03])]
    );
    assert_eq!(stack.state(), State::Transmitting);
    assert_eq!(port.timer(), Some(Duration::from_millis(50)));

    stack.on_timer_expired();
    assert_eq!(pending.await?, Ok(Response::WriteSingleRegister(1, 0x0003)));
    assert_eq!(stack.state(), State::Idle);
    Ok(())
}

#[tokio::test]
async fn reserved_slave_address() -> anyhow::Result<()> {
    let (stack, _port) = master(Mode::Ascii)?;
    let res = stack.submit_request(Slave(248), Request::ReadCoils(0, 1), TIMEOUT);
    assert!(matches!(res, Err(Error::InvalidArgument(_))));
    Ok(())
}

#[tokio::test]
async fn slave_cannot_submit_requests() -> anyhow::Result<()> {
    let stack = Stack::init(
        Config::slave(Mode::Rtu, Slave(1)),
        MockPort::default(),
        Memory::default(),
    )?;
    stack.enable()?;
    let res = stack.submit_request(Slave(2), Request::ReadCoils(0, 1), TIMEOUT);
    assert!(matches!(res, Err(Error::IllegalState(_))));
    Ok(())
}

#[tokio::test]
async fn tcp_transaction_ids() -> anyhow::Result<()> {
    let (stack, port) = master(Mode::Tcp)?;

    let pending = stack.submit_request(Slave(1), Request::ReadHoldingRegisters(0, 1), TIMEOUT)?;
    let pending_id = {
        let sent = port.take_sent();
        assert_eq!(
            sent,
            vec![vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01]]
        );
        [sent[0][0], sent[0][1]]
    };

    // Late response to an earlier transaction
    stack.on_bytes_received(&[0xFF, 0xFF, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x01]);
    stack.poll()?;
    assert_eq!(stack.state(), State::AwaitingReply);
    assert_eq!(stack.counters().other_slave_frames, 1);

    stack.on_bytes_received(&[
        pending_id[0],
        pending_id[1],
        0x00,
        0x00,
        0x00,
        0x05,
        0x01,
        0x03,
        0x02,
        0x00,
        0x02,
    ]);
    stack.poll()?;
    assert_eq!(pending.await?, Ok(Response::ReadHoldingRegisters(vec![2])));

    // The next request uses the next transaction id.
    let _pending = stack.submit_request(Slave(1), Request::ReadHoldingRegisters(0, 1), TIMEOUT)?;
    assert_eq!(&port.take_sent()[0][..2], &[0x00, 0x01]);
    Ok(())
}

#[tokio::test]
async fn tcp_connection_closed_while_waiting() -> anyhow::Result<()> {
    let (stack, _port) = master(Mode::Tcp)?;

    let pending = stack.submit_request(Slave(1), Request::ReadCoils(0, 1), TIMEOUT)?;
    stack.on_bytes_received(&[0x00, 0x00, 0x00]);
    stack.on_connection_closed();

    match pending.await {
        Err(Error::Io(err)) => assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted),
        res => panic!("unexpected result: {res:?}"),
    }
    assert_eq!(stack.state(), State::Idle);
    Ok(())
}

#[tokio::test]
async fn disable_fails_outstanding_request() -> anyhow::Result<()> {
    let (stack, _port) = master(Mode::Rtu)?;

    let pending = stack.submit_request(Slave(1), Request::ReadCoils(0, 1), TIMEOUT)?;
    stack.disable()?;
    assert!(matches!(pending.await, Err(Error::IllegalState(_))));

    let res = stack.submit_request(Slave(1), Request::ReadCoils(0, 1), TIMEOUT);
    assert!(matches!(res, Err(Error::IllegalState(_))));
    Ok(())
}

#[tokio::test]
async fn call_uses_configured_timeout() -> anyhow::Result<()> {
    let port = MockPort::default();
    let config = Config::master(Mode::Rtu).with_response_timeout(Duration::from_millis(250));
    let stack = Stack::init(config, port.clone(), NoRegisters)?;
    stack.enable()?;
    rtu_silence(&stack);
    port.wire.lock().timer = None;

    let call = {
        let stack = stack.clone();
        tokio::spawn(async move { stack.call(Slave(9), Request::ReadCoils(0, 1)).await })
    };
    while port.timer().is_none() {
        tokio::task::yield_now().await;
    }
    assert_eq!(port.timer(), Some(Duration::from_millis(250)));
    stack.on_timer_expired();
    assert!(matches!(call.await?, Err(Error::TimedOut)));
    Ok(())
}
