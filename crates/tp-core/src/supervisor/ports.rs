//! Startup port preflight.

use super::plan::{ProcessSpec, SupervisorError};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, UdpSocket};
use tp_config::Protocol;
use tracing::debug;

/// Try to bind `port` on all interfaces and release it immediately.
pub fn check_port(port: u16, protocol: Protocol) -> io::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    match protocol {
        Protocol::Udp => UdpSocket::bind(addr).map(drop),
        Protocol::Tcp => TcpListener::bind(addr).map(drop),
    }
}

/// Verify every port the plan binds before anything launches.
///
/// Returns the first unavailable port in start order.
pub fn preflight<'a>(specs: impl IntoIterator<Item = &'a ProcessSpec>) -> Result<(), SupervisorError> {
    for spec in specs {
        for bind in &spec.binds {
            if let Err(e) = check_port(bind.port, bind.protocol) {
                return Err(SupervisorError::PortInUse {
                    role: spec.role,
                    port: bind.port,
                    protocol: bind.protocol,
                    reason: e.to_string(),
                });
            }
            debug!(role = %spec.role, port = bind.port, protocol = %bind.protocol, "port free");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::plan::{CommandLine, PortBinding};
    use tp_config::Role;

    fn receiver_on(port: u16, protocol: Protocol) -> ProcessSpec {
        ProcessSpec::new(Role::Receiver, CommandLine::new("true", Vec::<String>::new()))
            .with_bind(PortBinding { port, protocol })
    }

    #[test]
    fn occupied_udp_port_fails() {
        let holder = UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        let err = preflight([&receiver_on(port, Protocol::Udp)]).unwrap_err();
        assert!(matches!(err, SupervisorError::PortInUse { port: p, .. } if p == port));
    }

    #[test]
    fn occupied_tcp_port_fails() {
        let holder = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = holder.local_addr().unwrap().port();
        assert!(check_port(port, Protocol::Tcp).is_err());
    }

    #[test]
    fn released_port_passes() {
        let port = {
            let socket = UdpSocket::bind("0.0.0.0:0").unwrap();
            socket.local_addr().unwrap().port()
        };
        assert!(preflight([&receiver_on(port, Protocol::Udp)]).is_ok());
    }

    #[test]
    fn spec_without_binds_passes() {
        let spec = ProcessSpec::new(Role::Receiver, CommandLine::new("true", Vec::<String>::new()));
        assert!(preflight([&spec]).is_ok());
    }
}
