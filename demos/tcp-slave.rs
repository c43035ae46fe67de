// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # TCP slave example
//!
//! This example starts a slave backed by a few registers in a `HashMap` and
//! queries it with a master stack over a local TCP connection.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::net::{TcpListener, TcpStream};

use modbus_stack::{
    link, AccessMode, Address, Config, Mode, NoRegisters, Quantity, RegisterAccess,
    RegisterError, RegisterType, Request, Slave, Stack,
};

#[derive(Clone)]
struct ExampleRegisters {
    input_registers: Arc<Mutex<HashMap<u16, u16>>>,
    holding_registers: Arc<Mutex<HashMap<u16, u16>>>,
}

impl ExampleRegisters {
    fn new() -> Self {
        // Insert some test data as register values.
        let mut input_registers = HashMap::new();
        input_registers.insert(0, 1234);
        input_registers.insert(1, 5678);
        let mut holding_registers = HashMap::new();
        holding_registers.insert(0, 10);
        holding_registers.insert(1, 20);
        holding_registers.insert(2, 30);
        holding_registers.insert(3, 40);
        Self {
            input_registers: Arc::new(Mutex::new(input_registers)),
            holding_registers: Arc::new(Mutex::new(holding_registers)),
        }
    }
}

impl RegisterAccess for ExampleRegisters {
    fn access(
        &mut self,
        mode: AccessMode,
        register: RegisterType,
        start: Address,
        quantity: Quantity,
        buf: &mut [u8],
    ) -> Result<(), RegisterError> {
        let registers = match register {
            RegisterType::Input if mode == AccessMode::Read => &self.input_registers,
            RegisterType::Holding => &self.holding_registers,
            _ => return Err(RegisterError::NoRegister),
        };
        let mut registers = registers.lock().unwrap();
        for (i, bytes) in (0..quantity).zip(buf.chunks_mut(2)) {
            let addr = start + i;
            let Some(value) = registers.get_mut(&addr) else {
                println!("SLAVE: no register at address {addr}");
                return Err(RegisterError::NoRegister);
            };
            match mode {
                AccessMode::Read => bytes.copy_from_slice(&value.to_be_bytes()),
                AccessMode::Write => *value = u16::from_be_bytes([bytes[0], bytes[1]]),
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let socket_addr = "127.0.0.1:5502".parse().unwrap();

    tokio::select! {
        _ = slave_context(socket_addr) => unreachable!(),
        r = master_context(socket_addr) => r?,
    }
    println!("Exiting");

    Ok(())
}

async fn slave_context(socket_addr: SocketAddr) -> anyhow::Result<()> {
    println!("Starting up slave on {socket_addr}");
    let listener = TcpListener::bind(socket_addr).await?;
    let (port, mut link) = link::channel();
    let stack = Stack::init(
        Config::slave(Mode::Tcp, Slave(1)),
        port,
        ExampleRegisters::new(),
    )?;
    stack.enable()?;
    link.serve(listener, &stack).await?;
    Ok(())
}

async fn master_context(socket_addr: SocketAddr) -> anyhow::Result<()> {
    // Give the slave some time for starting up
    tokio::time::sleep(Duration::from_secs(1)).await;

    println!("MASTER: Connecting...");
    let stream = TcpStream::connect(socket_addr).await?;
    let (port, mut link) = link::channel();
    let stack = Stack::init(Config::master(Mode::Tcp), port, NoRegisters)?;
    stack.enable()?;
    let driver = {
        let stack = stack.clone();
        tokio::spawn(async move { link.run(stream, &stack).await })
    };
    let slave = Slave(1);

    println!("MASTER: Reading 2 input registers...");
    let response = stack
        .call(slave, Request::ReadInputRegisters(0x00, 2))
        .await?;
    println!("MASTER: The result is '{response:?}'");

    println!("MASTER: Writing 2 holding registers...");
    let response = stack
        .call(
            slave,
            Request::WriteMultipleRegisters(0x01, vec![7777, 8888].into()),
        )
        .await?;
    println!("MASTER: The result is '{response:?}'");

    // Read back a block including the two registers we wrote.
    println!("MASTER: Reading 4 holding registers...");
    let response = stack
        .call(slave, Request::ReadHoldingRegisters(0x00, 4))
        .await?;
    println!("MASTER: The result is '{response:?}'");

    // Now we try to read with an invalid register address.
    // This should return a Modbus exception response with the code
    // IllegalDataAddress.
    println!("MASTER: Reading nonexistent holding register address... (should return IllegalDataAddress)");
    let response = stack
        .call(slave, Request::ReadHoldingRegisters(0x100, 1))
        .await?;
    println!("MASTER: The result is '{response:?}'");

    stack.disable()?;
    driver.abort();
    println!("MASTER: Done.");
    Ok(())
}
