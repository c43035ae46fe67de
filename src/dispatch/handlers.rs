// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Built-in slave handlers.
//!
//! Each handler validates the request payload and quantity first
//! (`IllegalDataValue`), then the address range (`IllegalDataAddress`), and
//! only then calls into the register storage.

use smallvec::{smallvec, SmallVec};

use crate::{
    bytes::BytesMut,
    codec::{decode_packed_coils, encode_packed_coils},
    config::SlaveIdentity,
    frame::{Address, Coil, ExceptionCode, Pdu, Quantity, Request, Response, Word},
    registers::{AccessMode, RegisterAccess, RegisterType},
};

const MAX_READ_BITS: Quantity = 2000;
const MAX_WRITE_BITS: Quantity = 1968;
const MAX_READ_REGISTERS: Quantity = 125;
const MAX_WRITE_REGISTERS: Quantity = 123;
const MAX_READ_WRITE_REGISTERS: Quantity = 121;

type Buffer = SmallVec<[u8; 256]>;

fn parse(pdu: &Pdu) -> Result<Request<'static>, ExceptionCode> {
    Request::try_from(pdu).map_err(|err| {
        log::debug!("Malformed request {pdu:?}: {err}");
        ExceptionCode::IllegalDataValue
    })
}

fn check_quantity(quantity: Quantity, max: Quantity) -> Result<(), ExceptionCode> {
    if quantity == 0 || quantity > max {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

fn check_range(
    registers: &dyn RegisterAccess,
    register: RegisterType,
    start: Address,
    quantity: Quantity,
) -> Result<(), ExceptionCode> {
    let range = registers.addressable(register);
    let start = u32::from(start);
    let end = start + u32::from(quantity);
    if start < range.start || end > range.end {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(())
}

fn read_bits(
    registers: &mut dyn RegisterAccess,
    register: RegisterType,
    address: Address,
    quantity: Quantity,
) -> Result<Vec<Coil>, ExceptionCode> {
    check_quantity(quantity, MAX_READ_BITS)?;
    check_range(registers, register, address, quantity)?;
    let mut buf: Buffer = smallvec![0; (usize::from(quantity) + 7) / 8];
    registers.access(AccessMode::Read, register, address, quantity, &mut buf)?;
    Ok(decode_packed_coils(&buf, quantity))
}

fn read_words(
    registers: &mut dyn RegisterAccess,
    register: RegisterType,
    address: Address,
    quantity: Quantity,
) -> Result<Vec<Word>, ExceptionCode> {
    let mut buf: Buffer = smallvec![0; 2 * usize::from(quantity)];
    registers.access(AccessMode::Read, register, address, quantity, &mut buf)?;
    Ok(buf
        .chunks_exact(2)
        .map(|word| u16::from_be_bytes([word[0], word[1]]))
        .collect())
}

fn write_words(
    registers: &mut dyn RegisterAccess,
    address: Address,
    words: &[Word],
) -> Result<(), ExceptionCode> {
    let mut buf: Buffer = words.iter().flat_map(|word| word.to_be_bytes()).collect();
    let quantity = crate::codec::u16_len(words.len());
    registers.access(
        AccessMode::Write,
        RegisterType::Holding,
        address,
        quantity,
        &mut buf,
    )?;
    Ok(())
}

pub(super) fn read_coils(
    pdu: &Pdu,
    registers: &mut dyn RegisterAccess,
) -> Result<Response, ExceptionCode> {
    let Request::ReadCoils(address, quantity) = parse(pdu)? else {
        return Err(ExceptionCode::IllegalFunction);
    };
    let coils = read_bits(registers, RegisterType::Coil, address, quantity)?;
    Ok(Response::ReadCoils(coils))
}

pub(super) fn read_discrete_inputs(
    pdu: &Pdu,
    registers: &mut dyn RegisterAccess,
) -> Result<Response, ExceptionCode> {
    let Request::ReadDiscreteInputs(address, quantity) = parse(pdu)? else {
        return Err(ExceptionCode::IllegalFunction);
    };
    let inputs = read_bits(registers, RegisterType::DiscreteInput, address, quantity)?;
    Ok(Response::ReadDiscreteInputs(inputs))
}

pub(super) fn read_holding_registers(
    pdu: &Pdu,
    registers: &mut dyn RegisterAccess,
) -> Result<Response, ExceptionCode> {
    let Request::ReadHoldingRegisters(address, quantity) = parse(pdu)? else {
        return Err(ExceptionCode::IllegalFunction);
    };
    check_quantity(quantity, MAX_READ_REGISTERS)?;
    check_range(registers, RegisterType::Holding, address, quantity)?;
    let words = read_words(registers, RegisterType::Holding, address, quantity)?;
    Ok(Response::ReadHoldingRegisters(words))
}

pub(super) fn read_input_registers(
    pdu: &Pdu,
    registers: &mut dyn RegisterAccess,
) -> Result<Response, ExceptionCode> {
    let Request::ReadInputRegisters(address, quantity) = parse(pdu)? else {
        return Err(ExceptionCode::IllegalFunction);
    };
    check_quantity(quantity, MAX_READ_REGISTERS)?;
    check_range(registers, RegisterType::Input, address, quantity)?;
    let words = read_words(registers, RegisterType::Input, address, quantity)?;
    Ok(Response::ReadInputRegisters(words))
}

pub(super) fn write_single_coil(
    pdu: &Pdu,
    registers: &mut dyn RegisterAccess,
) -> Result<Response, ExceptionCode> {
    // Coil values other than 0x0000 and 0xFF00 are rejected while parsing.
    let Request::WriteSingleCoil(address, state) = parse(pdu)? else {
        return Err(ExceptionCode::IllegalFunction);
    };
    check_range(registers, RegisterType::Coil, address, 1)?;
    let mut buf = [u8::from(state)];
    registers.access(AccessMode::Write, RegisterType::Coil, address, 1, &mut buf)?;
    Ok(Response::WriteSingleCoil(address, state))
}

pub(super) fn write_single_register(
    pdu: &Pdu,
    registers: &mut dyn RegisterAccess,
) -> Result<Response, ExceptionCode> {
    let Request::WriteSingleRegister(address, word) = parse(pdu)? else {
        return Err(ExceptionCode::IllegalFunction);
    };
    check_range(registers, RegisterType::Holding, address, 1)?;
    write_words(registers, address, &[word])?;
    Ok(Response::WriteSingleRegister(address, word))
}

pub(super) fn write_multiple_coils(
    pdu: &Pdu,
    registers: &mut dyn RegisterAccess,
) -> Result<Response, ExceptionCode> {
    let Request::WriteMultipleCoils(address, coils) = parse(pdu)? else {
        return Err(ExceptionCode::IllegalFunction);
    };
    let quantity = crate::codec::u16_len(coils.len());
    check_quantity(quantity, MAX_WRITE_BITS)?;
    check_range(registers, RegisterType::Coil, address, quantity)?;
    let mut buf = BytesMut::new();
    encode_packed_coils(&mut buf, &coils);
    registers.access(
        AccessMode::Write,
        RegisterType::Coil,
        address,
        quantity,
        &mut buf,
    )?;
    Ok(Response::WriteMultipleCoils(address, quantity))
}

pub(super) fn write_multiple_registers(
    pdu: &Pdu,
    registers: &mut dyn RegisterAccess,
) -> Result<Response, ExceptionCode> {
    let Request::WriteMultipleRegisters(address, words) = parse(pdu)? else {
        return Err(ExceptionCode::IllegalFunction);
    };
    let quantity = crate::codec::u16_len(words.len());
    check_quantity(quantity, MAX_WRITE_REGISTERS)?;
    check_range(registers, RegisterType::Holding, address, quantity)?;
    write_words(registers, address, &words)?;
    Ok(Response::WriteMultipleRegisters(address, quantity))
}

pub(super) fn read_write_multiple_registers(
    pdu: &Pdu,
    registers: &mut dyn RegisterAccess,
) -> Result<Response, ExceptionCode> {
    let Request::ReadWriteMultipleRegisters(read_address, read_quantity, write_address, words) =
        parse(pdu)?
    else {
        return Err(ExceptionCode::IllegalFunction);
    };
    let write_quantity = crate::codec::u16_len(words.len());
    check_quantity(read_quantity, MAX_READ_REGISTERS)?;
    check_quantity(write_quantity, MAX_READ_WRITE_REGISTERS)?;
    check_range(registers, RegisterType::Holding, read_address, read_quantity)?;
    check_range(registers, RegisterType::Holding, write_address, write_quantity)?;
    // The write takes place before the read.
    write_words(registers, write_address, &words)?;
    let words = read_words(registers, RegisterType::Holding, read_address, read_quantity)?;
    Ok(Response::ReadWriteMultipleRegisters(words))
}

pub(super) fn report_slave_id(
    pdu: &Pdu,
    identity: &SlaveIdentity,
) -> Result<Response, ExceptionCode> {
    if !pdu.data.is_empty() {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(Response::ReportSlaveId(
        identity.id,
        identity.running,
        identity.additional_data.clone(),
    ))
}
