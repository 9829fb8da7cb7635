//! Voltage Modbus Server Demo
//!
//! Starts a Modbus slave and shows the server features:
//! - Register memory seeded before any client connects
//! - A vendor function code served by a native handler
//! - A role-gated function code served by a context-aware handler
//! - Optional mutual-TLS listener next to the plain TCP one
//!
//! Usage: cargo run --bin demo [listen_address] [cert.pem key.pem client_ca.pem]
//! Example: cargo run --bin demo 127.0.0.1:5020

use std::time::Duration;

use voltage_modbus_server::pdu::PduBuilder;
use voltage_modbus_server::{Exception, RequestLimits, Server, ServerConfig};

/// Vendor function: return the number of non-zero holding registers.
const FC_COUNT_NONZERO: u8 = 0x41;

/// Vendor function: authorize a counter reset (operators only).
const FC_AUTHORIZE_RESET: u8 = 0x42;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🚀 {}", voltage_modbus_server::info());
    println!("=============================================");

    let mut args = std::env::args().skip(1);
    let listen_address = args.next().unwrap_or_else(|| "127.0.0.1:5020".to_string());
    let tls_files: Vec<String> = args.collect();

    // =========================================================================
    // Part 1: Configuration
    // =========================================================================
    println!("\n🎛️  Part 1: Configuration");
    println!("-------------------------");

    let config = ServerConfig::new()
        .with_limits(RequestLimits::new().with_max_read_registers(100))
        .with_request_timeout(Duration::from_secs(3));
    println!("  Bank size: {}", config.bank_size);
    println!("  Max read registers: {}", config.limits.max_read_registers);
    println!("  Request timeout: {:?}", config.request_timeout);

    let server = Server::new(config)?;

    // =========================================================================
    // Part 2: Register memory
    // =========================================================================
    println!("\n📦 Part 2: Register Memory");
    println!("--------------------------");

    server
        .with_registers(|bank| -> Result<(), Exception> {
            bank.holding_registers.write(0, &[10, 20, 30, 40])?;
            bank.input_registers.write(0, &[0x4248, 0x0000])?;
            bank.coils.write(0, &[true, false, true, true])?;
            Ok(())
        })
        .await??;
    println!("  Holding registers 0-3 = [10, 20, 30, 40]");
    println!("  Input registers 0-1 = [0x4248, 0x0000] (50.0 as F32)");
    println!("  Coils 0-3 = [ON, OFF, ON, ON]");

    // =========================================================================
    // Part 3: Custom function codes
    // =========================================================================
    println!("\n🔧 Part 3: Custom Function Codes");
    println!("--------------------------------");

    server.register_function(FC_COUNT_NONZERO, |state, _frame| {
        let count = state
            .registers
            .holding_registers
            .values()
            .iter()
            .filter(|&&v| v != 0)
            .count();
        Ok(PduBuilder::new().word(u16::try_from(count).unwrap_or(u16::MAX)).build())
    });
    println!("  FC{:02X}: count non-zero holding registers", FC_COUNT_NONZERO);

    server.register_context_function(FC_AUTHORIZE_RESET, |ctx, _frame| match ctx.role() {
        Some("operator") => Err(Exception::Success),
        _ => Err(Exception::IllegalFunction),
    });
    println!("  FC{:02X}: accepted only from TLS clients with role \"operator\"", FC_AUTHORIZE_RESET);
    println!("  Served codes: {:?}", server.function_codes());

    // =========================================================================
    // Part 4: Listeners
    // =========================================================================
    println!("\n🔌 Part 4: Listeners");
    println!("--------------------");

    let tcp = server.listen_tcp(&listen_address).await?;
    println!("  ✅ Modbus/TCP on {}", tcp);

    start_tls(&server, tcp, &tls_files).await;

    println!("\n⏳ Serving until Ctrl+C...");
    tokio::signal::ctrl_c().await?;

    server.close();
    println!("\n🎉 Server stopped!");
    println!("🔗 Repository: https://github.com/EvanL1/voltage_modbus");

    Ok(())
}

#[cfg(feature = "tls")]
async fn start_tls(server: &Server, tcp: std::net::SocketAddr, files: &[String]) {
    let [cert, key, ca] = files else {
        println!("  (pass cert.pem key.pem client_ca.pem to enable TLS)");
        return;
    };
    let identity = match voltage_modbus_server::TlsIdentity::from_pem_files(cert, key, ca) {
        Ok(identity) => identity,
        Err(e) => {
            println!("  ⚠️  Unable to load TLS identity: {}", e);
            return;
        }
    };
    let tls_address = format!("{}:{}", tcp.ip(), tcp.port().saturating_add(1));
    match server.listen_tls(&tls_address, &identity).await {
        Ok(addr) => println!("  ✅ Modbus/TLS on {}", addr),
        Err(e) => println!("  ⚠️  TLS listener failed: {}", e),
    }
}

#[cfg(not(feature = "tls"))]
async fn start_tls(_server: &Server, _tcp: std::net::SocketAddr, _files: &[String]) {
    println!("  (built without the tls feature)");
}
