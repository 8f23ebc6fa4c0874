//! DLMS/COSEM meter-reading client
//!
//! The crate is layered around the [`ProtocolEngine`] port:
//!
//! - [`exchange`]: reliable request/reply over a transport, with resends
//! - [`reassembly`]: collection of segmented and block-wise replies
//! - [`bootstrap`]: transport open, IEC sign-on, link connect and association
//! - [`cosem`]: the concrete engine for HDLC and wrapper framing
//! - [`client`]: the [`DlmsClient`] facade used by the reader binary

pub mod bootstrap;
pub mod client;
pub mod config;
pub mod cosem;
pub mod engine;
pub mod exchange;
pub mod iec;
pub mod objects;
pub mod reassembly;
pub mod retry;
pub mod trace;

#[cfg(test)]
mod testing;

pub use bootstrap::{Bootstrap, BootstrapState, Handshake};
pub use client::{AttributeRead, DlmsClient};
pub use config::{DeviceProfile, ProfileTable, ServerAddress, SessionConfig};
pub use cosem::axdr::Value;
pub use cosem::CosemEngine;
pub use engine::{
    AttributeDescriptor, Authentication, InterfaceType, ProtocolEngine, RequestType,
    SelectiveAccess,
};
pub use exchange::PacketExchanger;
pub use reassembly::read_data_block;
pub use trace::{FileTrace, LogTrace, NoTrace, TeeTrace, TraceSink};
