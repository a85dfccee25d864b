//! Host port selection for the nginx service.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

/// Lowest port the OS hands out for ephemeral binds on any supported platform.
pub const MIN_EPHEMERAL_PORT: u16 = 1024;

/// Ask the OS for a free TCP port.
///
/// Binds `0.0.0.0:0`, reads the assigned port and drops the listener. The
/// port is free at the instant of the query only; another process can take
/// it before the stack binds it.
pub fn allocate_ephemeral_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
    let port = listener.local_addr()?.port();
    tracing::debug!(port, "Allocated ephemeral port");
    Ok(port)
}
