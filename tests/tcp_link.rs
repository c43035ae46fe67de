// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Master and slave stacks talking to each other over a TCP socket.

#![cfg(feature = "link")]

#[allow(unused)]
mod common;

use std::{net::SocketAddr, time::Duration};

use tokio::net::{TcpListener, TcpStream};

use modbus_stack::{
    link, Config, ExceptionCode, Mode, NoRegisters, Request, Response, Slave, Stack,
};

use crate::common::Memory;

#[tokio::test]
async fn master_and_slave_over_tcp() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let server_addr = listener.local_addr()?;
    let memory = Memory::default();

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(10)) => panic!("timeout - perhaps we have a lockup"),
        r = slave_context(listener, memory.clone()) => r?,
        r = master_context(server_addr) => r?,
    }

    assert_eq!(memory.0.lock().holding[..3], [1, 2, 3]);
    Ok(())
}

async fn slave_context(listener: TcpListener, memory: Memory) -> anyhow::Result<()> {
    let (port, mut link) = link::channel();
    let stack = Stack::init(Config::slave(Mode::Tcp, Slave(1)), port, memory)?;
    stack.enable()?;
    link.serve(listener, &stack).await?;
    Ok(())
}

async fn master_context(server_addr: SocketAddr) -> anyhow::Result<()> {
    let (port, mut link) = link::channel();
    let stack = Stack::init(Config::master(Mode::Tcp), port, NoRegisters)?;
    stack.enable()?;

    let stream = TcpStream::connect(server_addr).await?;
    let driver = {
        let stack = stack.clone();
        tokio::spawn(async move { link.run(stream, &stack).await })
    };

    let response = stack
        .call(Slave(1), Request::WriteMultipleRegisters(0, vec![1, 2, 3].into()))
        .await?;
    assert_eq!(response, Ok(Response::WriteMultipleRegisters(0, 3)));

    let response = stack
        .call(Slave(1), Request::ReadHoldingRegisters(1, 2))
        .await?;
    assert_eq!(response, Ok(Response::ReadHoldingRegisters(vec![2, 3])));

    let response = stack
        .call(Slave(1), Request::ReadInputRegisters(0x1000, 1))
        .await?;
    assert_eq!(response, Err(ExceptionCode::IllegalDataAddress));

    let response = stack
        .call(Slave(1), Request::Custom(0x41, vec![0x00].into()))
        .await?;
    assert_eq!(response, Err(ExceptionCode::IllegalFunction));

    stack.disable()?;
    driver.abort();
    Ok(())
}
