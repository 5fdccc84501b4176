//! A single NAT mapping for a single local port.

use std::{
    fmt,
    net::Ipv4Addr,
    num::NonZeroU16,
    sync::{Arc, Mutex},
};

use tokio::{runtime::Handle, sync::watch};
use tracing::{debug, info, trace, warn};

use crate::{
    config::Config,
    error::{MappingError, OpenError},
    interfaces, nat_pmp,
    state::{External, MappingState, Phase},
    util::AbortingJoinHandle,
};

/// What to map.
///
/// By default only TCP is mapped and no public port is suggested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingRequest {
    private_port: NonZeroU16,
    desired_public_port: Option<NonZeroU16>,
    tcp: bool,
    udp: bool,
}

impl MappingRequest {
    /// Request a TCP mapping for `private_port`.
    pub fn new(private_port: NonZeroU16) -> Self {
        Self {
            private_port,
            desired_public_port: None,
            tcp: true,
            udp: false,
        }
    }

    /// Suggest a public port. The responder is free to grant another one.
    pub fn with_desired_public_port(mut self, port: Option<NonZeroU16>) -> Self {
        self.desired_public_port = port;
        self
    }

    /// Whether to map TCP.
    pub fn map_tcp(mut self, tcp: bool) -> Self {
        self.tcp = tcp;
        self
    }

    /// Whether to map UDP.
    pub fn map_udp(mut self, udp: bool) -> Self {
        self.udp = udp;
        self
    }

    /// The local port to expose.
    pub fn private_port(&self) -> NonZeroU16 {
        self.private_port
    }

    /// The suggested public port, if any.
    pub fn desired_public_port(&self) -> Option<NonZeroU16> {
        self.desired_public_port
    }

    /// Whether TCP is mapped.
    pub fn tcp(&self) -> bool {
        self.tcp
    }

    /// Whether UDP is mapped.
    pub fn udp(&self) -> bool {
        self.udp
    }
}

/// Error creating a [`PortMapper`] from an invalid [`MappingRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("at least one of tcp or udp must be mapped")]
pub struct NoProtocolError;

type Handler = dyn Fn(&MappingState) + Send + Sync + 'static;

/// Negotiates a public port for a local port with the gateway's mapping responder.
///
/// A [`PortMapper`] handles exactly one mapping attempt. [`PortMapper::open`] dispatches the
/// request and returns immediately; the outcome is published as a [`MappingState`] that can be
/// read from any thread, awaited with [`PortMapper::opened`], watched with
/// [`PortMapper::watch`], or delivered to the handler given at construction. Once an attempt
/// failed the instance is spent: a new [`PortMapper`] is needed to try again.
///
/// Dropping the [`PortMapper`] abandons any attempt in flight. No request is sent to revoke an
/// open mapping; it expires with its lease.
pub struct PortMapper {
    request: MappingRequest,
    config: Config,
    /// Latest published state. The sender's lock is the one critical section for transitions.
    state: watch::Sender<MappingState>,
    handler: Option<Arc<Handler>>,
    runtime: Option<Handle>,
    /// Task driving the current attempt. Also serializes `open` and `close`.
    driver: Mutex<Option<AbortingJoinHandle<()>>>,
}

impl fmt::Debug for PortMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortMapper")
            .field("request", &self.request)
            .field("state", &*self.state.borrow())
            .field("has_handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

impl PortMapper {
    /// Create a port mapper for `request`.
    ///
    /// The mapping is driven on the tokio runtime this is called from, if any. Use
    /// [`PortMapper::with_runtime`] when creating it from elsewhere.
    pub fn new(request: MappingRequest, config: Config) -> Result<Self, NoProtocolError> {
        if !request.tcp && !request.udp {
            return Err(NoProtocolError);
        }
        let (state, _) = watch::channel(MappingState::default());
        Ok(PortMapper {
            request,
            config,
            state,
            handler: None,
            runtime: Handle::try_current().ok(),
            driver: Mutex::new(None),
        })
    }

    /// Call `handler` once every time an attempt reaches [`Phase::Open`] or [`Phase::Failed`].
    pub fn with_handler(
        mut self,
        handler: impl Fn(&MappingState) + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Drive the mapping on the runtime behind `handle`.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// The request this port mapper negotiates.
    pub fn request(&self) -> &MappingRequest {
        &self.request
    }

    /// Start negotiating the mapping.
    ///
    /// Returns `true` once the request is dispatched, or if it already was and the attempt has
    /// not failed. Returns `false` if the attempt failed earlier, or if the request could not be
    /// dispatched at all; see [`PortMapper::try_open`] for the reason.
    pub fn open(&self) -> bool {
        match self.try_open() {
            Ok(()) => true,
            Err(e) => {
                debug!("port mapper not opened: {e}");
                false
            }
        }
    }

    /// Start negotiating the mapping, reporting why it could not start.
    ///
    /// This is a no-op while [`Phase::Opening`] or [`Phase::Open`].
    pub fn try_open(&self) -> Result<(), OpenError> {
        let mut driver = self.driver.lock().expect("poisoned");

        {
            let state = self.state.borrow();
            match state.phase() {
                Phase::Opening | Phase::Open => return Ok(()),
                Phase::Failed => return Err(OpenError::Spent),
                Phase::Closed if state.spent => return Err(OpenError::Spent),
                Phase::Closed => {}
            }
        }

        let registered = self
            .runtime
            .as_ref()
            .ok_or(OpenError::NoRuntime)
            .and_then(|runtime| Ok((runtime, self.register(runtime)?)));
        let (runtime, socket) = match registered {
            Ok(registered) => registered,
            Err(e) => {
                warn!("failed to register port mapping: {e}");
                self.state
                    .send_modify(|state| state.refuse(MappingError::Open(e.clone())));
                return Err(e);
            }
        };

        let mut attempt = 0;
        self.state.send_modify(|state| attempt = state.begin());
        debug!(attempt, "mapping {:?}", self.request);

        let task = runtime.spawn(drive(
            socket,
            self.request,
            self.config.clone(),
            attempt,
            self.state.clone(),
            self.handler.clone(),
        ));
        // replacing an old finished task aborts nothing
        *driver = Some(task.into());
        Ok(())
    }

    /// Set up the socket for a new attempt, on the runtime that will drive it.
    fn register(&self, runtime: &Handle) -> Result<tokio::net::UdpSocket, OpenError> {
        let gateway = nat_pmp::gateway(&self.config)?;
        let socket = nat_pmp::bind_std(&self.config, gateway)?;
        let _guard = runtime.enter();
        let socket = tokio::net::UdpSocket::from_std(socket)?;
        trace!("registered with responder at {gateway}");
        Ok(socket)
    }

    /// Block the current thread until the attempt settles, opening it first if closed.
    ///
    /// Returns whether the mapping is open. The wait lasts as long as the responder takes to
    /// answer, or for every retransmission to time out, so prefer [`PortMapper::opened`] or the
    /// handler. Must not be called from within an async context.
    pub fn wait_until_opened(&self) -> bool {
        futures_lite::future::block_on(self.opened())
    }

    /// Wait until the attempt settles, opening it first if closed.
    ///
    /// Returns whether the mapping is open. Returns `false` as well when closed while waiting.
    pub async fn opened(&self) -> bool {
        let mut rx = self.state.subscribe();
        let closed = rx.borrow_and_update().phase() == Phase::Closed;
        if closed && !self.open() {
            return false;
        }
        match rx.wait_for(|state| state.phase() != Phase::Opening).await {
            Ok(state) => state.is_mapped(),
            // the sender lives in self
            Err(_) => false,
        }
    }

    /// Return to [`Phase::Closed`], abandoning any attempt in flight.
    ///
    /// Forgets the public address and port. Replies to the abandoned attempt are ignored.
    pub fn close(&self) {
        let mut driver = self.driver.lock().expect("poisoned");
        let task = driver.take();
        self.state.send_if_modified(|state| {
            let changed = state.phase() != Phase::Closed;
            state.close();
            changed
        });
        if let Some(task) = task {
            if !task.is_finished() {
                debug!("abandoning mapping attempt in flight");
            }
        }
    }

    /// A consistent snapshot of the current state.
    pub fn state(&self) -> MappingState {
        self.state.borrow().clone()
    }

    /// Watch every state change.
    pub fn watch(&self) -> watch::Receiver<MappingState> {
        self.state.subscribe()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.state.borrow().phase()
    }

    /// Whether the mapping is open.
    pub fn is_mapped(&self) -> bool {
        self.state.borrow().is_mapped()
    }

    /// The public address of the mapping, when open.
    pub fn public_address(&self) -> Option<Ipv4Addr> {
        self.state.borrow().public_address()
    }

    /// Numeric form of [`PortMapper::public_address`], `0` when not open.
    pub fn raw_public_address(&self) -> u32 {
        self.state.borrow().raw_public_address()
    }

    /// The public port of the mapping, `0` when not open.
    pub fn public_port(&self) -> u16 {
        self.state.borrow().public_port()
    }

    /// Code of the last error, `0` if none. See [`crate::error`].
    pub fn last_error(&self) -> i32 {
        self.state.borrow().last_error()
    }

    /// Ask the responder for the gateway's external address.
    ///
    /// Uses a socket of its own. Returns `None` if there is no responder or it fails to answer.
    pub async fn external_address(config: &Config) -> Option<Ipv4Addr> {
        match nat_pmp::external_address(config).await {
            Ok(ip) => Some(ip),
            Err(e) => {
                debug!("external address query failed: {e}");
                None
            }
        }
    }

    /// Blocking version of [`PortMapper::external_address`] with the default [`Config`].
    ///
    /// Runs its own single threaded runtime, so it must not be called from within one.
    pub fn public_address_blocking() -> Option<Ipv4Addr> {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                warn!("failed to start runtime for external address query: {e}");
                return None;
            }
        };
        rt.block_on(Self::external_address(&Config::default()))
    }

    /// The primary local address, the one a mapping forwards to.
    pub fn local_address() -> Option<Ipv4Addr> {
        interfaces::local_address()
    }

    /// Numeric form of [`PortMapper::local_address`], `0` if unknown.
    pub fn raw_local_address() -> u32 {
        Self::local_address().map(u32::from).unwrap_or(0)
    }

    /// Whether the local address is in a private range, a strong hint of a NAT.
    pub fn local_address_is_private() -> bool {
        Self::local_address()
            .map(|ip| interfaces::is_private(&ip))
            .unwrap_or(false)
    }
}

impl Drop for PortMapper {
    fn drop(&mut self) {
        if let Ok(driver) = self.driver.get_mut() {
            if driver.take().is_some() {
                trace!("port mapper dropped");
            }
        }
    }
}

/// Runs a single attempt and publishes its outcome, unless the attempt was abandoned meanwhile.
async fn drive(
    socket: tokio::net::UdpSocket,
    request: MappingRequest,
    config: Config,
    attempt: u64,
    state: watch::Sender<MappingState>,
    handler: Option<Arc<Handler>>,
) {
    let outcome = nat_pmp::map(&socket, &config, &request).await;
    drop(socket);

    match &outcome {
        Ok(external) => info!(
            "port {} mapped to {}:{}",
            request.private_port(),
            external.address,
            external.port
        ),
        Err(e) => warn!("failed to map port {}: {e}", request.private_port()),
    }

    if !publish(&state, attempt, outcome, handler.as_deref()) {
        debug!(attempt, "discarding outcome of abandoned attempt");
    }
}

/// Settle `attempt` with `outcome` and notify `handler`, unless the attempt was closed or
/// superseded meanwhile. Returns whether the outcome was published.
fn publish(
    state: &watch::Sender<MappingState>,
    attempt: u64,
    outcome: Result<External, MappingError>,
    handler: Option<&(dyn Fn(&MappingState) + Send + Sync)>,
) -> bool {
    let mut settled = None;
    state.send_if_modified(|current| {
        if current.attempt != attempt || current.phase() != Phase::Opening {
            return false;
        }
        current.settle(outcome);
        settled = Some(current.clone());
        true
    });

    match (settled, handler) {
        (Some(settled), Some(handler)) => {
            handler(&settled);
            true
        }
        (Some(_), None) => true,
        (None, _) => false,
    }
}
