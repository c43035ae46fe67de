// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # RTU master example
//!
//! Reads a sensor value from a slave on a serial line.

#[cfg(feature = "serial")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use modbus_stack::{link, Config, Mode, NoRegisters, Request, Slave, Stack};

    env_logger::init();

    let tty_path = "/dev/ttyUSB0";
    let baud_rate = 19200;
    let slave = Slave(0x17);

    let serial = link::open_serial(tty_path, baud_rate)?;
    let (port, mut link) = link::channel();
    let stack = Stack::init(
        Config::master(Mode::Rtu),
        port.with_baud_rate(baud_rate),
        NoRegisters,
    )?;
    stack.enable()?;
    let driver = {
        let stack = stack.clone();
        tokio::spawn(async move { link.run(serial, &stack).await })
    };

    println!("Reading a sensor value");
    let rsp = stack
        .call(slave, Request::ReadHoldingRegisters(0x082B, 2))
        .await?;
    println!("Sensor value is: {rsp:?}");

    stack.disable()?;
    driver.abort();
    Ok(())
}

#[cfg(not(feature = "serial"))]
pub fn main() {
    println!("feature `serial` is required to run this example");
    std::process::exit(1);
}
