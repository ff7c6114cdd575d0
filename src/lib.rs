//! # SESAM Monitor Controller Library
//!
//! This library drives the SESAM hardware monitor from the host. The monitor
//! exposes a 4-byte register window on the system bus; the host maps it,
//! writes single-byte opcodes into it and polls it for replies to list the
//! simulated components, tag and measure benchmark runs, quit the simulator
//! and forward arbitrary commands.
//!
//! The window is an explicit handle passed to every protocol call, so the
//! engine runs the same against the real mapping ([`MappedWindow`]) and the
//! in-memory [`sim::SimulatedMonitor`].

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod sim;
pub mod window;

pub use config::DeviceConfig;
pub use error::{ProtocolError, Result, SesamError, Stage};
pub use handshake::PollPolicy;
pub use protocol::{BenchmarkTag, Opcode, ParameterFrame};
pub use window::{MappedWindow, Register, Registers};
