#![no_main]

use std::sync::{Arc, RwLock};
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use voltage_modbus_server::context::TransportKind;
use voltage_modbus_server::registers::RegisterBank;
use voltage_modbus_server::serializer::Serializer;
use voltage_modbus_server::{DispatchTable, Frame, RequestContext, RequestLimits, ServerState};

// Default handlers must answer any PDU with a payload or an exception.
fuzz_target!(|data: &[u8]| {
    let Some((&function, payload)) = data.split_first() else {
        return;
    };
    let state = ServerState::new(RegisterBank::with_size(512), RequestLimits::default());
    let dispatch = Arc::new(RwLock::new(DispatchTable::with_defaults()));
    let mut serializer = Serializer::new(state, dispatch, Duration::from_secs(1));

    let request = Frame::tcp(1, 1, function, payload.to_vec());
    let response = serializer.handle(&RequestContext::detached(TransportKind::Tcp), &request);
    assert_eq!(response.function() & 0x7F, function & 0x7F);
    assert!(response.encode().len() <= 260);
});
