//! Passive capture and session engine.
//!
//! Components:
//! - `packet_source`: libpcap handle, BPF filter, frame decoding.
//! - `types`: decoded packet, flow classification, session key.
//! - `session`: per-flow state with sequence dedup.
//! - `capturer`: session table, append semantics, finalization.
//! - `stats`: shared monotonic counters.

pub mod capturer;
pub mod packet_source;
pub mod session;
pub mod stats;
pub mod types;

pub use capturer::Capturer;
pub use packet_source::{build_bpf_filter, decode_packet, find_interface, PacketSource};
pub use session::TapSession;
pub use stats::Stats;
pub use types::{DecodedPacket, Flow, FlowDirection, SessionKey};
