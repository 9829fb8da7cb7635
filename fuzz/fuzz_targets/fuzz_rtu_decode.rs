#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_modbus_server::Frame;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode_rtu(data) {
        assert_eq!(frame.encode(), data);
    }
});
