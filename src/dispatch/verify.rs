// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::frame::{Coil, ExceptionCode, ModbusResult, Pdu, Quantity, Request, Response, Word};

/// Check a response PDU against the request a master is waiting for.
///
/// An exception response to the same function is returned as `Err` with the
/// reported exception. Any response that does not fit the request yields
/// [`ExceptionCode::IllegalDataValue`].
pub fn verify_response(request: &Request<'_>, pdu: &Pdu) -> ModbusResult {
    let function = request.function_code();
    if pdu.function_code().value() != function.value() {
        log::debug!("Response function code {} does not match {function}", pdu.function);
        return Err(ExceptionCode::IllegalDataValue);
    }
    if pdu.is_exception() {
        return match pdu.data.as_ref() {
            [exception] => Err(ExceptionCode::new(*exception)),
            _ => Err(ExceptionCode::IllegalDataValue),
        };
    }
    let response = Response::try_from(pdu).map_err(|err| {
        log::debug!("Malformed response {pdu:?}: {err}");
        ExceptionCode::IllegalDataValue
    })?;

    let verified = match (request, response) {
        (Request::ReadCoils(_, quantity), Response::ReadCoils(coils)) => {
            Response::ReadCoils(truncate_bits(coils, *quantity)?)
        }
        (Request::ReadDiscreteInputs(_, quantity), Response::ReadDiscreteInputs(inputs)) => {
            Response::ReadDiscreteInputs(truncate_bits(inputs, *quantity)?)
        }
        (Request::ReadHoldingRegisters(_, quantity), Response::ReadHoldingRegisters(words)) => {
            Response::ReadHoldingRegisters(expect_words(words, *quantity)?)
        }
        (Request::ReadInputRegisters(_, quantity), Response::ReadInputRegisters(words)) => {
            Response::ReadInputRegisters(expect_words(words, *quantity)?)
        }
        (
            Request::ReadWriteMultipleRegisters(_, quantity, _, _),
            Response::ReadWriteMultipleRegisters(words),
        ) => Response::ReadWriteMultipleRegisters(expect_words(words, *quantity)?),
        (Request::WriteSingleCoil(address, state), rsp @ Response::WriteSingleCoil(..)) => {
            expect_echo(rsp, Response::WriteSingleCoil(*address, *state))?
        }
        (Request::WriteSingleRegister(address, word), rsp @ Response::WriteSingleRegister(..)) => {
            expect_echo(rsp, Response::WriteSingleRegister(*address, *word))?
        }
        (Request::WriteMultipleCoils(address, coils), rsp @ Response::WriteMultipleCoils(..)) => {
            let quantity = crate::codec::u16_len(coils.len());
            expect_echo(rsp, Response::WriteMultipleCoils(*address, quantity))?
        }
        (
            Request::WriteMultipleRegisters(address, words),
            rsp @ Response::WriteMultipleRegisters(..),
        ) => {
            let quantity = crate::codec::u16_len(words.len());
            expect_echo(rsp, Response::WriteMultipleRegisters(*address, quantity))?
        }
        (Request::ReportSlaveId, rsp @ Response::ReportSlaveId(..))
        | (Request::Custom(..), rsp @ Response::Custom(..)) => rsp,
        (_, rsp) => {
            log::debug!("Unexpected response {rsp:?} to {request:?}");
            return Err(ExceptionCode::IllegalDataValue);
        }
    };
    Ok(verified)
}

/// Bits arrive in whole bytes; keep the requested number.
fn truncate_bits(mut bits: Vec<Coil>, quantity: Quantity) -> Result<Vec<Coil>, ExceptionCode> {
    let quantity = usize::from(quantity);
    if bits.len() != (quantity + 7) / 8 * 8 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    bits.truncate(quantity);
    Ok(bits)
}

fn expect_words(words: Vec<Word>, quantity: Quantity) -> Result<Vec<Word>, ExceptionCode> {
    if words.len() != usize::from(quantity) {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(words)
}

fn expect_echo(response: Response, expected: Response) -> Result<Response, ExceptionCode> {
    if response != expected {
        log::debug!("Response {response:?} does not echo {expected:?}");
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(response)
}
