//! Modbus/TCP server tests over real sockets.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use voltage_modbus_server::{Exception, Server, ServerConfig};

async fn start() -> (Server, SocketAddr) {
    let server = Server::new(ServerConfig::default()).unwrap();
    server
        .with_registers(|bank| bank.holding_registers.write(0, &[10, 20, 30, 40]))
        .await
        .unwrap()
        .unwrap();
    let addr = server.listen_tcp("127.0.0.1:0").await.unwrap();
    (server, addr)
}

fn request(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(7 + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    frame
}

async fn read_response(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 7];
    stream.read_exact(&mut header).await.unwrap();
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    let mut frame = header.to_vec();
    frame.resize(6 + length, 0);
    stream.read_exact(&mut frame[7..]).await.unwrap();
    frame
}

async fn call(stream: &mut TcpStream, transaction_id: u16, pdu: &[u8]) -> Vec<u8> {
    stream.write_all(&request(transaction_id, 1, pdu)).await.unwrap();
    let response = read_response(stream).await;
    assert_eq!(&response[..2], &transaction_id.to_be_bytes());
    response[7..].to_vec()
}

#[tokio::test]
async fn test_read_holding_registers() {
    let (_server, addr) = start().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(&request(0x0001, 0x11, &[0x03, 0x00, 0x00, 0x00, 0x02]))
        .await
        .unwrap();
    let response = read_response(&mut stream).await;
    assert_eq!(
        response,
        vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x11, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x14]
    );
}

#[tokio::test]
async fn test_write_then_read_back() {
    let (_server, addr) = start().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let echo = call(&mut stream, 1, &[0x10, 0x00, 0x10, 0x00, 0x02, 0x04, 0x12, 0x34, 0x56, 0x78]).await;
    assert_eq!(echo, vec![0x10, 0x00, 0x10, 0x00, 0x02]);

    let read = call(&mut stream, 2, &[0x03, 0x00, 0x10, 0x00, 0x02]).await;
    assert_eq!(read, vec![0x03, 0x04, 0x12, 0x34, 0x56, 0x78]);

    let coil = call(&mut stream, 3, &[0x05, 0x00, 0x03, 0xFF, 0x00]).await;
    assert_eq!(coil, vec![0x05, 0x00, 0x03, 0xFF, 0x00]);

    let coils = call(&mut stream, 4, &[0x01, 0x00, 0x00, 0x00, 0x04]).await;
    assert_eq!(coils, vec![0x01, 0x01, 0b0000_1000]);
}

#[tokio::test]
async fn test_exceptions_keep_connection_open() {
    let (_server, addr) = start().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_eq!(call(&mut stream, 1, &[0x63]).await, vec![0xE3, 0x01]);
    assert_eq!(
        call(&mut stream, 2, &[0x03, 0xFF, 0xFF, 0x00, 0x02]).await,
        vec![0x83, 0x02]
    );
    assert_eq!(
        call(&mut stream, 3, &[0x03, 0x00, 0x00, 0x00, 0x00]).await,
        vec![0x83, 0x03]
    );
    assert_eq!(
        call(&mut stream, 4, &[0x03, 0x00, 0x00, 0x00, 0x01]).await,
        vec![0x03, 0x02, 0x00, 0x0A]
    );
}

#[tokio::test]
async fn test_pipelined_requests_answered_in_order() {
    let (_server, addr) = start().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut batch = Vec::new();
    for (tid, value) in [(10u16, 0x0101u16), (11, 0x0202), (12, 0x0303)] {
        let [hi, lo] = value.to_be_bytes();
        batch.extend(request(tid, 1, &[0x06, 0x00, 0x20, hi, lo]));
    }
    batch.extend(request(13, 1, &[0x03, 0x00, 0x20, 0x00, 0x01]));
    stream.write_all(&batch).await.unwrap();

    for tid in 10u16..=12 {
        let response = read_response(&mut stream).await;
        assert_eq!(u16::from_be_bytes([response[0], response[1]]), tid);
        assert_eq!(response[7], 0x06);
    }
    let last = read_response(&mut stream).await;
    assert_eq!(u16::from_be_bytes([last[0], last[1]]), 13);
    assert_eq!(&last[7..], &[0x03, 0x02, 0x03, 0x03]);
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let (_server, addr) = start().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // protocol id 0x0001
    stream
        .write_all(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01])
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("server should close the connection");
    assert!(matches!(read, Ok(0) | Err(_)));

    // other clients are unaffected
    let mut other = TcpStream::connect(addr).await.unwrap();
    assert_eq!(
        call(&mut other, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]).await,
        vec![0x03, 0x02, 0x00, 0x0A]
    );
}

#[tokio::test]
async fn test_concurrent_clients_see_atomic_handlers() {
    let (server, addr) = start().await;
    server.register_function(0x41, |state, _| {
        let bank = &mut state.registers.holding_registers;
        let next = bank.get(100)?.wrapping_add(1);
        bank.set(100, next)?;
        Ok(next.to_be_bytes().to_vec())
    });

    let mut clients = Vec::new();
    for _ in 0..8 {
        clients.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            for tid in 0..25u16 {
                let response = call(&mut stream, tid, &[0x41]).await;
                assert_eq!(response[0], 0x41);
            }
        }));
    }
    for client in clients {
        client.await.unwrap();
    }

    let total = server
        .with_registers(|bank| bank.holding_registers.get(100))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(total, 200);
}

#[tokio::test]
async fn test_handler_panic_is_isolated() {
    let (server, addr) = start().await;
    server.register_function(0x42, |_, _| panic!("handler bug"));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    assert_eq!(call(&mut stream, 1, &[0x42]).await, vec![0xC2, 0x04]);
    assert_eq!(
        call(&mut stream, 2, &[0x03, 0x00, 0x01, 0x00, 0x01]).await,
        vec![0x03, 0x02, 0x00, 0x14]
    );
}

#[tokio::test]
async fn test_success_sentinel_and_runtime_registration() {
    let (server, addr) = start().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_eq!(call(&mut stream, 1, &[0x43]).await, vec![0xC3, 0x01]);

    server.register_context_function(0x43, |_, _| Err(Exception::Success));
    assert_eq!(call(&mut stream, 2, &[0x43]).await, vec![0x43]);

    server.register_context_function(0x44, |ctx, _| {
        assert!(ctx.peer_addr().is_some());
        assert_eq!(ctx.role(), None);
        Err(Exception::SlaveDeviceBusy)
    });
    assert_eq!(call(&mut stream, 3, &[0x44]).await, vec![0xC4, 0x06]);
}

#[tokio::test]
async fn test_close_stops_accepting() {
    let (server, addr) = start().await;
    let mut existing = TcpStream::connect(addr).await.unwrap();
    assert_eq!(
        call(&mut existing, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]).await,
        vec![0x03, 0x02, 0x00, 0x0A]
    );

    server.close();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(TcpStream::connect(addr).await.is_err());

    // accepted connections keep being served
    assert_eq!(
        call(&mut existing, 2, &[0x03, 0x00, 0x01, 0x00, 0x01]).await,
        vec![0x03, 0x02, 0x00, 0x14]
    );
}
