//! Internal utilities to support testing.
//!
//! [`Responder`] is a NAT-PMP server on localhost whose answers are scripted by a [`Grant`].

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::{
    nat_pmp::protocol::{Opcode, Request, Response, ResultCode},
    util::AbortingJoinHandle,
};

/// How a [`Responder`] answers requests.
#[derive(Debug, Clone)]
pub struct Grant {
    /// External address reported to clients.
    pub address: Ipv4Addr,
    /// Added to the requested external port (or the private port when none is requested).
    pub port_offset: u16,
    /// Refuse every request with this code.
    pub refuse: Option<ResultCode>,
    /// Refuse mapping requests with this code, still answering external address requests.
    pub refuse_mapping: Option<ResultCode>,
    /// Never answer.
    pub silent: bool,
    /// Wait this long before answering.
    pub delay: Duration,
}

impl Default for Grant {
    fn default() -> Self {
        Grant {
            address: Ipv4Addr::new(203, 0, 113, 7),
            port_offset: 0,
            refuse: None,
            refuse_mapping: None,
            silent: false,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicUsize,
    mappings: AtomicUsize,
}

/// A scripted NAT-PMP server, stopped when dropped.
#[derive(Debug)]
pub struct Responder {
    port: u16,
    counters: Arc<Counters>,
    _task: AbortingJoinHandle<()>,
}

impl Responder {
    /// Bind to a random localhost port and start answering according to `grant`.
    ///
    /// Panics if the socket cannot be bound.
    pub async fn spawn(grant: Grant) -> Self {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind responder socket");
        let port = socket.local_addr().expect("bound socket").port();
        let counters = Arc::new(Counters::default());
        let task = tokio::spawn(serve(Arc::new(socket), grant, counters.clone()));
        debug!("responder listening on port {port}");
        Responder {
            port,
            counters,
            _task: task.into(),
        }
    }

    /// Port the responder listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of packets received so far.
    pub fn requests(&self) -> usize {
        self.counters.requests.load(Ordering::SeqCst)
    }

    /// Number of mapping requests received so far.
    pub fn mapping_requests(&self) -> usize {
        self.counters.mappings.load(Ordering::SeqCst)
    }
}

async fn serve(socket: Arc<UdpSocket>, grant: Grant, counters: Arc<Counters>) {
    let started = Instant::now();
    let mut buf = [0u8; 64];
    loop {
        let (read, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                debug!("responder stopped: {e}");
                return;
            }
        };
        counters.requests.fetch_add(1, Ordering::SeqCst);
        let Some(request) = Request::decode(&buf[..read]) else {
            trace!("ignoring malformed request");
            continue;
        };
        if matches!(request, Request::Mapping { .. }) {
            counters.mappings.fetch_add(1, Ordering::SeqCst);
        }
        if grant.silent {
            continue;
        }

        let epoch_time = started.elapsed().as_secs() as u32;
        let reply = answer(&grant, &request, epoch_time);
        if grant.delay.is_zero() {
            send(&socket, &reply, from).await;
        } else {
            let socket = socket.clone();
            let delay = grant.delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                send(&socket, &reply, from).await;
            });
        }
    }
}

fn answer(grant: &Grant, request: &Request, epoch_time: u32) -> Vec<u8> {
    match *request {
        Request::ExternalAddress => match grant.refuse {
            Some(code) => Response::encode_error(Opcode::DetermineExternalAddress, code, epoch_time),
            None => Response::PublicAddress {
                epoch_time,
                public_ip: grant.address,
            }
            .encode(),
        },
        Request::Mapping {
            proto,
            local_port,
            external_port,
            lifetime_seconds,
        } => match grant.refuse.or(grant.refuse_mapping) {
            Some(code) => Response::encode_error(proto.into(), code, epoch_time),
            None => {
                let base = if external_port == 0 {
                    local_port
                } else {
                    external_port
                };
                Response::PortMap {
                    proto,
                    epoch_time,
                    private_port: local_port,
                    external_port: base.wrapping_add(grant.port_offset),
                    lifetime_seconds,
                }
                .encode()
            }
        },
    }
}

async fn send(socket: &UdpSocket, reply: &[u8], to: SocketAddr) {
    if let Err(e) = socket.send_to(reply, to).await {
        debug!("responder failed to answer {to}: {e}");
    }
}
