//! Default function handlers
//!
//! | Code | Function | Bank |
//! |------|----------|------|
//! | 0x01 | Read Coils | coils |
//! | 0x02 | Read Discrete Inputs | discrete inputs |
//! | 0x03 | Read Holding Registers | holding registers |
//! | 0x04 | Read Input Registers | input registers |
//! | 0x05 | Write Single Coil | coils |
//! | 0x06 | Write Single Register | holding registers |
//! | 0x0F | Write Multiple Coils | coils |
//! | 0x10 | Write Multiple Registers | holding registers |
//!
//! Validation order follows the Modbus application protocol: quantity and
//! byte count first (`IllegalDataValue`), then the address range
//! (`IllegalDataAddress`).

use crate::config::RequestLimits;
use crate::constants::{COIL_OFF, COIL_ON};
use crate::dispatch::{HandlerResult, ServerState};
use crate::exception::Exception;
use crate::frame::Frame;
use crate::pdu::{pack_bits, unpack_bits, PduBuilder, PduReader};
use crate::registers::Bank;

/// Quantity check taken from [`RequestLimits`].
type QuantityCheck = fn(&RequestLimits, u16) -> bool;

fn read_bits(bank: &Bank<bool>, limits: &RequestLimits, within: QuantityCheck, frame: &Frame) -> HandlerResult {
    let mut reader = PduReader::new(frame.payload());
    let address = reader.read_u16()?;
    let quantity = reader.read_u16()?;
    if !within(limits, quantity) {
        return Err(Exception::IllegalDataValue);
    }

    let bits = pack_bits(bank.read(address, quantity)?);
    Ok(PduBuilder::with_capacity(1 + bits.len())
        .byte(bits.len() as u8)
        .data(&bits)
        .build())
}

fn read_words(bank: &Bank<u16>, limits: &RequestLimits, within: QuantityCheck, frame: &Frame) -> HandlerResult {
    let mut reader = PduReader::new(frame.payload());
    let address = reader.read_u16()?;
    let quantity = reader.read_u16()?;
    if !within(limits, quantity) {
        return Err(Exception::IllegalDataValue);
    }

    let words = bank.read(address, quantity)?;
    Ok(PduBuilder::with_capacity(1 + words.len() * 2)
        .byte((words.len() * 2) as u8)
        .words(words)
        .build())
}

/// FC01
pub fn read_coils(state: &mut ServerState, frame: &Frame) -> HandlerResult {
    read_bits(
        &state.registers.coils,
        &state.limits,
        RequestLimits::is_coil_read_within_limits,
        frame,
    )
}

/// FC02
pub fn read_discrete_inputs(state: &mut ServerState, frame: &Frame) -> HandlerResult {
    read_bits(
        &state.registers.discrete_inputs,
        &state.limits,
        RequestLimits::is_coil_read_within_limits,
        frame,
    )
}

/// FC03
pub fn read_holding_registers(state: &mut ServerState, frame: &Frame) -> HandlerResult {
    read_words(
        &state.registers.holding_registers,
        &state.limits,
        RequestLimits::is_read_within_limits,
        frame,
    )
}

/// FC04
pub fn read_input_registers(state: &mut ServerState, frame: &Frame) -> HandlerResult {
    read_words(
        &state.registers.input_registers,
        &state.limits,
        RequestLimits::is_read_within_limits,
        frame,
    )
}

/// FC05. The response echoes the request.
pub fn write_single_coil(state: &mut ServerState, frame: &Frame) -> HandlerResult {
    let mut reader = PduReader::new(frame.payload());
    let address = reader.read_u16()?;
    let value = match reader.read_u16()? {
        COIL_ON => true,
        COIL_OFF => false,
        _ => return Err(Exception::IllegalDataValue),
    };

    state.registers.coils.set(address, value)?;
    Ok(frame.payload()[..4].to_vec())
}

/// FC06. The response echoes the request.
pub fn write_single_register(state: &mut ServerState, frame: &Frame) -> HandlerResult {
    let mut reader = PduReader::new(frame.payload());
    let address = reader.read_u16()?;
    let value = reader.read_u16()?;

    state.registers.holding_registers.set(address, value)?;
    Ok(frame.payload()[..4].to_vec())
}

/// FC15
pub fn write_multiple_coils(state: &mut ServerState, frame: &Frame) -> HandlerResult {
    let mut reader = PduReader::new(frame.payload());
    let address = reader.read_u16()?;
    let quantity = reader.read_u16()?;
    let byte_count = reader.read_u8()? as usize;
    if !state.limits.is_coil_write_within_limits(quantity)
        || byte_count != (quantity as usize).div_ceil(8)
        || reader.remaining() != byte_count
    {
        return Err(Exception::IllegalDataValue);
    }

    let values = unpack_bits(reader.read_bytes(byte_count)?, quantity as usize);
    state.registers.coils.write(address, &values)?;
    Ok(PduBuilder::with_capacity(4).word(address).word(quantity).build())
}

/// FC16
pub fn write_multiple_registers(state: &mut ServerState, frame: &Frame) -> HandlerResult {
    let mut reader = PduReader::new(frame.payload());
    let address = reader.read_u16()?;
    let quantity = reader.read_u16()?;
    let byte_count = reader.read_u8()? as usize;
    if !state.limits.is_write_within_limits(quantity)
        || byte_count != quantity as usize * 2
        || reader.remaining() != byte_count
    {
        return Err(Exception::IllegalDataValue);
    }

    let values = (0..quantity)
        .map(|_| reader.read_u16())
        .collect::<Result<Vec<u16>, Exception>>()?;
    state.registers.holding_registers.write(address, &values)?;
    Ok(PduBuilder::with_capacity(4).word(address).word(quantity).build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestLimits;
    use crate::constants::*;
    use crate::registers::RegisterBank;

    type HandlerFn = fn(&mut ServerState, &Frame) -> HandlerResult;

    fn state() -> ServerState {
        ServerState::new(RegisterBank::new(), RequestLimits::default())
    }

    fn request(fc: u8, payload: &[u8]) -> Frame {
        Frame::tcp(1, 1, fc, payload.to_vec())
    }

    fn read_request(fc: u8, address: u16, quantity: u16) -> Frame {
        request(fc, &PduBuilder::new().word(address).word(quantity).build())
    }

    #[test]
    fn test_read_holding_registers_scenario() {
        let mut state = state();
        state.registers.holding_registers.write(0, &[10, 20, 30, 40]).unwrap();

        let payload = read_holding_registers(&mut state, &read_request(0x03, 0, 2)).unwrap();
        assert_eq!(payload, vec![0x04, 0x00, 0x0A, 0x00, 0x14]);
    }

    #[test]
    fn test_read_input_registers() {
        let mut state = state();
        state.registers.input_registers.write(100, &[0x1234]).unwrap();

        let payload = read_input_registers(&mut state, &read_request(0x04, 100, 1)).unwrap();
        assert_eq!(payload, vec![0x02, 0x12, 0x34]);
    }

    #[test]
    fn test_read_coils_packing() {
        let mut state = state();
        state
            .registers
            .coils
            .write(20, &[true, false, true, true, false, false, true, true, true, false])
            .unwrap();

        let payload = read_coils(&mut state, &read_request(0x01, 20, 10)).unwrap();
        assert_eq!(payload, vec![0x02, 0xCD, 0x01]);
    }

    #[test]
    fn test_read_discrete_inputs() {
        let mut state = state();
        state.registers.discrete_inputs.set(3, true).unwrap();

        let payload = read_discrete_inputs(&mut state, &read_request(0x02, 0, 4)).unwrap();
        assert_eq!(payload, vec![0x01, 0x08]);
    }

    #[test]
    fn test_read_quantity_limits() {
        let mut state = state();
        assert_eq!(
            read_holding_registers(&mut state, &read_request(0x03, 0, 0)),
            Err(Exception::IllegalDataValue)
        );
        assert_eq!(
            read_holding_registers(&mut state, &read_request(0x03, 0, 126)),
            Err(Exception::IllegalDataValue)
        );
        assert_eq!(
            read_coils(&mut state, &read_request(0x01, 0, 2001)),
            Err(Exception::IllegalDataValue)
        );
        assert!(read_coils(&mut state, &read_request(0x01, 0, 2000)).is_ok());

        state.limits = RequestLimits::new().with_max_read_registers(10);
        assert_eq!(
            read_input_registers(&mut state, &read_request(0x04, 0, 11)),
            Err(Exception::IllegalDataValue)
        );
    }

    #[test]
    fn test_read_limits_follow_configuration() {
        let mut state = state();
        state.limits = RequestLimits::new()
            .with_max_read_registers(4)
            .with_max_read_coils(16);

        for (handler, fc, max) in [
            (read_holding_registers as HandlerFn, 0x03, 4),
            (read_input_registers as HandlerFn, 0x04, 4),
            (read_coils as HandlerFn, 0x01, 16),
            (read_discrete_inputs as HandlerFn, 0x02, 16),
        ] {
            assert!(handler(&mut state, &read_request(fc, 0, max)).is_ok(), "FC{:02X}", fc);
            assert_eq!(
                handler(&mut state, &read_request(fc, 0, max + 1)),
                Err(Exception::IllegalDataValue),
                "FC{:02X}",
                fc
            );
        }
    }

    #[test]
    fn test_truncated_payload() {
        let mut state = state();
        assert_eq!(
            read_holding_registers(&mut state, &request(0x03, &[0x00, 0x01, 0x00])),
            Err(Exception::IllegalDataValue)
        );
        assert_eq!(
            write_single_register(&mut state, &request(0x06, &[0x00])),
            Err(Exception::IllegalDataValue)
        );
    }

    #[test]
    fn test_write_single_coil() {
        let mut state = state();
        let frame = request(0x05, &[0x00, 0xAC, 0xFF, 0x00]);
        assert_eq!(write_single_coil(&mut state, &frame), Ok(vec![0x00, 0xAC, 0xFF, 0x00]));
        assert_eq!(state.registers.coils.get(0xAC), Ok(true));

        let frame = request(0x05, &[0x00, 0xAC, 0x00, 0x00]);
        assert!(write_single_coil(&mut state, &frame).is_ok());
        assert_eq!(state.registers.coils.get(0xAC), Ok(false));

        let frame = request(0x05, &[0x00, 0xAC, 0x12, 0x34]);
        assert_eq!(write_single_coil(&mut state, &frame), Err(Exception::IllegalDataValue));
    }

    #[test]
    fn test_write_single_register() {
        let mut state = state();
        let frame = request(0x06, &[0x00, 0x01, 0x00, 0x03]);
        assert_eq!(
            write_single_register(&mut state, &frame),
            Ok(vec![0x00, 0x01, 0x00, 0x03])
        );
        assert_eq!(state.registers.holding_registers.get(1), Ok(3));
    }

    #[test]
    fn test_write_multiple_coils() {
        let mut state = state();
        // 10 coils starting at 19: CD 01
        let frame = request(0x0F, &[0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]);
        assert_eq!(
            write_multiple_coils(&mut state, &frame),
            Ok(vec![0x00, 0x13, 0x00, 0x0A])
        );
        assert_eq!(
            state.registers.coils.read(19, 10).unwrap(),
            &[true, false, true, true, false, false, true, true, true, false]
        );

        // byte count disagrees with quantity
        let frame = request(0x0F, &[0x00, 0x13, 0x00, 0x0A, 0x01, 0xCD]);
        assert_eq!(write_multiple_coils(&mut state, &frame), Err(Exception::IllegalDataValue));

        // byte count disagrees with the data present
        let frame = request(0x0F, &[0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD]);
        assert_eq!(write_multiple_coils(&mut state, &frame), Err(Exception::IllegalDataValue));
    }

    #[test]
    fn test_write_multiple_registers() {
        let mut state = state();
        let frame = request(0x10, &[0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]);
        assert_eq!(
            write_multiple_registers(&mut state, &frame),
            Ok(vec![0x00, 0x01, 0x00, 0x02])
        );
        assert_eq!(state.registers.holding_registers.read(1, 2).unwrap(), &[0x000A, 0x0102]);

        let frame = request(0x10, &[0x00, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(
            write_multiple_registers(&mut state, &frame),
            Err(Exception::IllegalDataValue)
        );
    }

    #[test]
    fn test_bounds_for_every_function() {
        // A bank of 10 cells: address 10 is the first illegal one
        let mut state = ServerState::new(RegisterBank::with_size(10), RequestLimits::default());
        let cases: Vec<(HandlerFn, Frame)> = vec![
            (read_coils as HandlerFn, read_request(FC_READ_COILS, 10, 1)),
            (read_discrete_inputs as HandlerFn, read_request(FC_READ_DISCRETE_INPUTS, 9, 2)),
            (read_holding_registers as HandlerFn, read_request(FC_READ_HOLDING_REGISTERS, 10, 1)),
            (read_input_registers as HandlerFn, read_request(FC_READ_INPUT_REGISTERS, 65535, 1)),
            (write_single_coil as HandlerFn, request(FC_WRITE_SINGLE_COIL, &[0x00, 0x0A, 0xFF, 0x00])),
            (write_single_register as HandlerFn, request(FC_WRITE_SINGLE_REGISTER, &[0xFF, 0xFF, 0x00, 0x01])),
            (
                write_multiple_coils as HandlerFn,
                request(FC_WRITE_MULTIPLE_COILS, &[0x00, 0x09, 0x00, 0x02, 0x01, 0x03]),
            ),
            (
                write_multiple_registers as HandlerFn,
                request(FC_WRITE_MULTIPLE_REGISTERS, &[0x00, 0x0A, 0x00, 0x01, 0x02, 0x00, 0x01]),
            ),
        ];

        for (handler, frame) in cases {
            assert_eq!(
                handler(&mut state, &frame),
                Err(Exception::IllegalDataAddress),
                "function {:02X}",
                frame.function()
            );
        }
        assert_eq!(state.registers, RegisterBank::with_size(10));
    }

    #[test]
    fn test_full_bank_range_end() {
        let mut state = state();
        assert_eq!(
            read_holding_registers(&mut state, &read_request(0x03, 65535, 2)),
            Err(Exception::IllegalDataAddress)
        );
        assert!(read_holding_registers(&mut state, &read_request(0x03, 65535, 1)).is_ok());
    }
}
