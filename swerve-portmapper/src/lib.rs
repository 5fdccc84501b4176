//! Single-use port mappings negotiated with the gateway over NAT-PMP.
//!
//! A [`PortMapper`] asks the gateway to forward a public port to a local port, over TCP, UDP
//! or both. The request is dispatched by [`PortMapper::open`], which never blocks; the outcome
//! is then awaited with [`PortMapper::opened`], waited for with
//! [`PortMapper::wait_until_opened`], or delivered to a handler.
//!
//! ```no_run
//! use std::num::NonZeroU16;
//!
//! use swerve_portmapper::{Config, MappingRequest, PortMapper};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let port = NonZeroU16::new(51413).unwrap();
//! let mapper = PortMapper::new(MappingRequest::new(port).map_udp(true), Config::default())?
//!     .with_handler(|state| println!("mapping is {}", state.phase()));
//! if mapper.opened().await {
//!     println!("reachable at {:?}", mapper.state().external_addr());
//! }
//! # Ok(())
//! # }
//! ```
#![cfg_attr(swerve_docsrs, feature(doc_auto_cfg))]

pub mod config;
pub mod error;
pub mod hexdump;
pub mod interfaces;
mod mapper;
pub mod nat_pmp;
mod state;
mod util;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::Config;
pub use error::{MappingError, OpenError};
pub use mapper::{MappingRequest, NoProtocolError, PortMapper};
pub use state::{MappingState, Phase};
