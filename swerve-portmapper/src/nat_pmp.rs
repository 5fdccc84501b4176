//! Definitions and utilities to interact with a NAT-PMP server.

use std::{
    io,
    net::{Ipv4Addr, SocketAddrV4},
    num::NonZeroU16,
};

use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::{
    config::Config,
    error::{MappingError, OpenError},
    hexdump::HexDump,
    interfaces,
    mapper::MappingRequest,
    state::External,
};

pub mod protocol;

use protocol::{MapProtocol, Opcode, Request, Response};

/// Resolves the address of the responder, preferring the configured one.
pub(crate) fn gateway(config: &Config) -> Result<SocketAddrV4, OpenError> {
    let ip = config
        .gateway
        .or_else(interfaces::default_gateway)
        .ok_or(OpenError::NoGateway)?;
    Ok(SocketAddrV4::new(ip, config.server_port))
}

/// Binds a socket connected to the responder, without an async runtime.
///
/// The socket is non blocking and ready to be registered with tokio.
pub(crate) fn bind_std(config: &Config, gateway: SocketAddrV4) -> io::Result<std::net::UdpSocket> {
    let local_ip = config.local_ip.unwrap_or(Ipv4Addr::UNSPECIFIED);
    let socket = std::net::UdpSocket::bind((local_ip, 0))?;
    socket.connect(gateway)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Binds a short lived socket connected to the responder.
async fn bind(config: &Config, gateway: SocketAddrV4) -> io::Result<UdpSocket> {
    let local_ip = config.local_ip.unwrap_or(Ipv4Addr::UNSPECIFIED);
    let socket = UdpSocket::bind((local_ip, 0)).await?;
    socket.connect(gateway).await?;
    Ok(socket)
}

/// Asks the responder for the gateway's external address, over a socket of its own.
pub async fn external_address(config: &Config) -> Result<Ipv4Addr, MappingError> {
    let gateway = gateway(config)?;
    let socket = bind(config, gateway).await?;
    query_external_address(&socket, config).await
}

/// Obtains the external address and maps the requested protocols, in that order.
///
/// Any failure fails the whole mapping. TCP is mapped first, UDP then asks for the port TCP got.
pub(crate) async fn map(
    socket: &UdpSocket,
    config: &Config,
    request: &MappingRequest,
) -> Result<External, MappingError> {
    let address = query_external_address(socket, config).await?;

    let mut tcp_port = None;
    if request.tcp() {
        let port = map_port(socket, config, MapProtocol::Tcp, request, request.desired_public_port())
            .await?;
        tcp_port = Some(port);
    }

    let mut udp_port = None;
    if request.udp() {
        let hint = tcp_port.or(request.desired_public_port());
        let port = map_port(socket, config, MapProtocol::Udp, request, hint).await?;
        udp_port = Some(port);
    }

    let (port, udp_port) = match (tcp_port, udp_port) {
        (Some(tcp), Some(udp)) if tcp != udp => {
            warn!("responder mapped tcp to {tcp} but udp to {udp}");
            (tcp, Some(udp))
        }
        (Some(tcp), _) => (tcp, None),
        (None, Some(udp)) => (udp, None),
        (None, None) => return Err(MappingError::Unexpected("no protocol requested")),
    };

    Ok(External {
        address,
        port,
        udp_port,
    })
}

async fn query_external_address(
    socket: &UdpSocket,
    config: &Config,
) -> Result<Ipv4Addr, MappingError> {
    match exchange(socket, config, &Request::ExternalAddress).await? {
        Response::PublicAddress { public_ip, .. } => {
            if public_ip.is_unspecified() {
                return Err(MappingError::NoExternalAddress);
            }
            debug!("responder reports external address {public_ip}");
            Ok(public_ip)
        }
        Response::PortMap { .. } => Err(MappingError::Unexpected(
            "port mapping reply to an external address request",
        )),
    }
}

async fn map_port(
    socket: &UdpSocket,
    config: &Config,
    proto: MapProtocol,
    request: &MappingRequest,
    hint: Option<NonZeroU16>,
) -> Result<NonZeroU16, MappingError> {
    let req = Request::Mapping {
        proto,
        local_port: request.private_port().get(),
        external_port: hint.map(NonZeroU16::get).unwrap_or(0),
        lifetime_seconds: config.lifetime_seconds(),
    };
    match exchange(socket, config, &req).await? {
        Response::PortMap {
            external_port,
            lifetime_seconds,
            ..
        } => {
            let port = NonZeroU16::new(external_port)
                .ok_or(MappingError::Unexpected("mapping granted with zero external port"))?;
            if lifetime_seconds == 0 {
                return Err(MappingError::Unexpected("mapping granted with zero lifetime"));
            }
            debug!(
                "{proto} port {} mapped to {port} for {lifetime_seconds}s",
                request.private_port()
            );
            Ok(port)
        }
        Response::PublicAddress { .. } => Err(MappingError::Unexpected(
            "external address reply to a mapping request",
        )),
    }
}

/// Whether `packet` claims to answer `request`, based on the opcode alone.
///
/// Error replies carry no body worth decoding, so this is checked before decoding to avoid
/// failing on a late error meant for an earlier request.
fn answers_opcode(request: &Request, packet: &[u8]) -> bool {
    let opcode = match request {
        Request::ExternalAddress => Opcode::DetermineExternalAddress,
        Request::Mapping { proto, .. } => Opcode::from(*proto),
    };
    packet.get(1).copied() == Some(Response::RESPONSE_INDICATOR | u8::from(opcode))
}

/// Whether `packet` is an error reply to a mapping request for another private port.
///
/// Responders may echo the private port in error replies to mapping requests. An error naming
/// another port is skipped. An error with a zeroed port, or for an external address request,
/// ends the exchange.
fn foreign_error(request: &Request, packet: &[u8]) -> bool {
    let Request::Mapping { local_port, .. } = request else {
        return false;
    };
    let field = |at: usize| packet.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]));
    matches!(
        (field(2), field(8)),
        (Some(result_code), Some(private_port))
            if result_code != 0 && private_port != 0 && private_port != *local_port
    )
}

/// Whether a decoded response matches the request it should answer.
fn answers(request: &Request, response: &Response) -> bool {
    match (request, response) {
        (Request::ExternalAddress, Response::PublicAddress { .. }) => true,
        (
            Request::Mapping {
                proto, local_port, ..
            },
            Response::PortMap {
                proto: got_proto,
                private_port,
                ..
            },
        ) => proto == got_proto && local_port == private_port,
        _ => false,
    }
}

/// Sends `request` and waits for its answer, retransmitting with a doubling timeout.
async fn exchange(
    socket: &UdpSocket,
    config: &Config,
    request: &Request,
) -> Result<Response, MappingError> {
    let packet = request.encode();
    let mut buf = [0u8; Response::MAX_SIZE + 1];
    let mut attempts = 0;

    for timeout in config.attempt_timeouts() {
        attempts += 1;
        trace!("sending {request:?} (attempt {attempts})\n{}", HexDump(&packet));
        if let Err(e) = socket.send(&packet).await {
            if e.kind() != io::ErrorKind::ConnectionRefused {
                return Err(e.into());
            }
            debug!("responder refused connection before attempt {attempts}");
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let read = match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
                Err(_elapsed) => break,
                Ok(Ok(read)) => read,
                Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    // nothing listens on the gateway (yet), keep retransmitting
                    debug!("responder refused connection on attempt {attempts}");
                    tokio::time::sleep_until(deadline).await;
                    break;
                }
                Ok(Err(e)) => return Err(e.into()),
            };
            let reply = &buf[..read];
            trace!("received {read} bytes\n{}", HexDump(reply));

            if !answers_opcode(request, reply) {
                debug!("discarding reply for another request");
                continue;
            }
            if foreign_error(request, reply) {
                debug!("discarding error reply for another mapping");
                continue;
            }
            let response = Response::decode(reply)?;
            if !answers(request, &response) {
                debug!("discarding reply for another mapping: {response:?}");
                continue;
            }
            return Ok(response);
        }
    }

    Err(MappingError::Timeout { attempts })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tracing_test::traced_test;

    use super::*;
    use crate::{
        error::CODE_TIMEOUT,
        nat_pmp::protocol::ResultCode,
        test_utils::{Grant, Responder},
    };

    fn fast_config(port: u16) -> Config {
        Config {
            gateway: Some(Ipv4Addr::LOCALHOST),
            server_port: port,
            local_ip: Some(Ipv4Addr::LOCALHOST),
            initial_timeout: Duration::from_millis(20),
            max_attempts: 3,
            ..Default::default()
        }
    }

    #[test]
    fn opcode_filter() {
        let map_tcp = Request::Mapping {
            proto: MapProtocol::Tcp,
            local_port: 1,
            external_port: 0,
            lifetime_seconds: 1,
        };
        assert!(answers_opcode(&map_tcp, &[0, 0x82, 0, 0]));
        assert!(!answers_opcode(&map_tcp, &[0, 0x81, 0, 0]));
        assert!(!answers_opcode(&map_tcp, &[0, 0x02, 0, 0]));
        assert!(!answers_opcode(&Request::ExternalAddress, &[0]));
    }

    #[test]
    fn error_for_another_port_is_foreign() {
        let map_tcp = Request::Mapping {
            proto: MapProtocol::Tcp,
            local_port: 4000,
            external_port: 0,
            lifetime_seconds: 1,
        };
        let mut error = Response::encode_error(Opcode::MapTcp, ResultCode::OutOfResources, 1);
        // zeroed port: ours
        assert!(!foreign_error(&map_tcp, &error));
        error[8..10].copy_from_slice(&4001u16.to_be_bytes());
        assert!(foreign_error(&map_tcp, &error));
        error[8..10].copy_from_slice(&4000u16.to_be_bytes());
        assert!(!foreign_error(&map_tcp, &error));
        assert!(!foreign_error(&Request::ExternalAddress, &error));
    }

    /// Serves one external address request, then answers the mapping request with `replies`.
    async fn scripted_responder(replies: Vec<Vec<u8>>) -> (u16, tokio::task::JoinHandle<()>) {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (_, from) = socket.recv_from(&mut buf).await.unwrap();
            let address = Response::PublicAddress {
                epoch_time: 1,
                public_ip: Ipv4Addr::new(203, 0, 113, 7),
            };
            socket.send_to(&address.encode(), from).await.unwrap();
            let (_, from) = socket.recv_from(&mut buf).await.unwrap();
            for reply in replies {
                socket.send_to(&reply, from).await.unwrap();
            }
        });
        (port, task)
    }

    fn grant_4000() -> Vec<u8> {
        Response::PortMap {
            proto: MapProtocol::Tcp,
            epoch_time: 1,
            private_port: 4000,
            external_port: 4000,
            lifetime_seconds: 7200,
        }
        .encode()
    }

    #[tokio::test]
    #[traced_test]
    async fn error_for_another_mapping_is_skipped() {
        let mut stray = Response::encode_error(Opcode::MapTcp, ResultCode::OutOfResources, 1);
        stray[8..10].copy_from_slice(&4001u16.to_be_bytes());
        let (port, task) = scripted_responder(vec![stray, grant_4000()]).await;

        let config = Config {
            initial_timeout: Duration::from_millis(500),
            ..fast_config(port)
        };
        let socket = bind(&config, gateway(&config).unwrap()).await.unwrap();
        let request = MappingRequest::new(NonZeroU16::new(4000).unwrap());
        let external = map(&socket, &config, &request).await.unwrap();
        assert_eq!(external.port.get(), 4000);
        task.await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn error_without_port_ends_the_mapping() {
        let error = Response::encode_error(Opcode::MapTcp, ResultCode::OutOfResources, 1);
        let (port, task) = scripted_responder(vec![error, grant_4000()]).await;

        let config = Config {
            initial_timeout: Duration::from_millis(500),
            ..fast_config(port)
        };
        let socket = bind(&config, gateway(&config).unwrap()).await.unwrap();
        let request = MappingRequest::new(NonZeroU16::new(4000).unwrap());
        let err = map(&socket, &config, &request).await.unwrap_err();
        assert!(matches!(err, MappingError::Responder(_)));
        assert_eq!(err.code(), 4);
        task.await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn external_address_query() {
        let responder = Responder::spawn(Grant::default()).await;
        let config = fast_config(responder.port());
        let ip = external_address(&config).await.unwrap();
        assert_eq!(ip, Ipv4Addr::new(203, 0, 113, 7));
    }

    #[tokio::test]
    #[traced_test]
    async fn responder_error_is_reported() {
        let responder = Responder::spawn(Grant {
            refuse: Some(protocol::ResultCode::NotAuthorizedOrRefused),
            ..Default::default()
        })
        .await;
        let config = fast_config(responder.port());
        let err = external_address(&config).await.unwrap_err();
        assert_eq!(err.code(), 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn silent_responder_times_out() {
        let responder = Responder::spawn(Grant {
            silent: true,
            ..Default::default()
        })
        .await;
        let config = fast_config(responder.port());
        let err = external_address(&config).await.unwrap_err();
        assert!(matches!(err, MappingError::Timeout { attempts: 3 }));
        assert_eq!(err.code(), CODE_TIMEOUT);
        // every attempt reached the responder
        assert_eq!(responder.requests(), 3);
    }

    #[tokio::test]
    #[traced_test]
    async fn unspecified_external_address_fails() {
        let responder = Responder::spawn(Grant {
            address: Ipv4Addr::UNSPECIFIED,
            ..Default::default()
        })
        .await;
        let config = fast_config(responder.port());
        let err = external_address(&config).await.unwrap_err();
        assert!(matches!(err, MappingError::NoExternalAddress));
    }
}
