//! Observable state of a [`PortMapper`](crate::PortMapper).

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    num::NonZeroU16,
};

use crate::error::MappingError;

/// Phase of a mapping attempt.
///
/// Phases only move forward, `Closed` → `Opening` → `Open` | `Failed`, except for
/// [`PortMapper::close`](crate::PortMapper::close) which returns to `Closed` from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    /// Nothing requested, or the mapping was closed.
    #[default]
    Closed,
    /// A request was sent and the responder has not settled it yet.
    Opening,
    /// The responder granted the mapping.
    Open,
    /// The attempt failed. See [`MappingState::error`].
    Failed,
}

impl Phase {
    /// Whether this is `Open` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Open | Phase::Failed)
    }
}

/// A consistent snapshot of a mapping attempt.
///
/// Snapshots are published whole, so the phase, the external address and the error always agree
/// with each other.
#[derive(Debug, Clone, Default)]
pub struct MappingState {
    phase: Phase,
    /// Present iff `phase == Open`.
    external: Option<External>,
    /// Absent while `Open`.
    error: Option<MappingError>,
    /// Set once an attempt failed. Survives `close`.
    pub(crate) spent: bool,
    /// Incremented by every `open` and `close`, used to discard results of abandoned attempts.
    pub(crate) attempt: u64,
}

/// What the responder granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct External {
    pub(crate) address: Ipv4Addr,
    pub(crate) port: NonZeroU16,
    /// UDP port, when UDP was mapped as well and the responder granted a different port.
    pub(crate) udp_port: Option<NonZeroU16>,
}

impl MappingState {
    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the mapping is currently open.
    pub fn is_mapped(&self) -> bool {
        self.phase == Phase::Open
    }

    /// The public address and port of the mapping, when open.
    pub fn external_addr(&self) -> Option<SocketAddrV4> {
        self.external
            .map(|e| SocketAddrV4::new(e.address, e.port.get()))
    }

    /// The public address of the gateway, when open.
    pub fn public_address(&self) -> Option<Ipv4Addr> {
        self.external.map(|e| e.address)
    }

    /// Numeric form of [`MappingState::public_address`], `0` when not open.
    pub fn raw_public_address(&self) -> u32 {
        self.public_address().map(u32::from).unwrap_or(0)
    }

    /// The public port of the mapping, `0` when not open.
    pub fn public_port(&self) -> u16 {
        self.external.map(|e| e.port.get()).unwrap_or(0)
    }

    /// The public UDP port, when UDP was mapped to a different port than TCP.
    pub fn udp_port(&self) -> Option<u16> {
        self.external.and_then(|e| e.udp_port).map(NonZeroU16::get)
    }

    /// The error that ended the last attempt, or that prevented it from starting.
    pub fn error(&self) -> Option<&MappingError> {
        self.error.as_ref()
    }

    /// Numeric code of [`MappingState::error`], `0` when there is none.
    pub fn last_error(&self) -> i32 {
        self.error.as_ref().map(MappingError::code).unwrap_or(0)
    }

    /// Enter `Opening` for a new attempt, forgetting the outcome of any previous one.
    pub(crate) fn begin(&mut self) -> u64 {
        self.attempt += 1;
        self.phase = Phase::Opening;
        self.external = None;
        self.error = None;
        self.attempt
    }

    /// Settle the attempt with the given outcome.
    pub(crate) fn settle(&mut self, outcome: Result<External, MappingError>) {
        match outcome {
            Ok(external) => {
                self.phase = Phase::Open;
                self.external = Some(external);
                self.error = None;
            }
            Err(e) => {
                self.phase = Phase::Failed;
                self.external = None;
                self.error = Some(e);
                self.spent = true;
            }
        }
    }

    /// Return to `Closed`, abandoning the current attempt.
    pub(crate) fn close(&mut self) {
        self.attempt += 1;
        self.phase = Phase::Closed;
        self.external = None;
    }

    /// Record a failure to start an attempt. The phase is left untouched.
    pub(crate) fn refuse(&mut self, error: MappingError) {
        self.error = Some(error);
    }
}
