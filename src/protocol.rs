//! # Opcode protocol
//!
//! Encodes controller requests into the byte sequences the monitor expects and
//! decodes its replies. Every request starts with an opcode written to
//! [`Register::Control`]. Strings travel one byte at a time through
//! [`Register::Data`], bracketed by field start/end opcodes; the monitor infers
//! the end of a string from the control register transition, so no terminator
//! or length is ever sent.
//!
//! The protocol has no negative acknowledgement. Input the monitor cannot
//! buffer is refused here, before the first byte is written, so the device is
//! never left halfway through a handshake.

use std::io::Write;

use crate::error::{ProtocolError, Result};
use crate::handshake::{self, PollPolicy};
use crate::window::{Register, Registers};

/// Most strings a single command may carry, the command name included.
pub const MAX_PARAMETERS: usize = 10;

/// Longest string the monitor's fixed 30-byte fields can hold.
pub const MAX_FIELD_LEN: usize = 29;

/// Control opcodes understood by the monitor. The values are its wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    List = 0x20,
    Quit = 0x42,
    StartBenchmark = 0x52,
    EndBenchmark = 0x54,
    BeginCommand = 0x58,
    BeginField = 0x62,
    EndField = 0x72,
    EndCommand = 0x78,
}

impl Opcode {
    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x20 => Some(Opcode::List),
            0x42 => Some(Opcode::Quit),
            0x52 => Some(Opcode::StartBenchmark),
            0x54 => Some(Opcode::EndBenchmark),
            0x58 => Some(Opcode::BeginCommand),
            0x62 => Some(Opcode::BeginField),
            0x72 => Some(Opcode::EndField),
            0x78 => Some(Opcode::EndCommand),
            _ => None,
        }
    }
}

/// A command name and its arguments, checked against the monitor's buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterFrame {
    params: Vec<Vec<u8>>,
}

impl ParameterFrame {
    /// Validates 1..=10 strings of at most 29 bytes each.
    pub fn new<I, S>(params: I) -> std::result::Result<Self, ProtocolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let params: Vec<Vec<u8>> = params.into_iter().map(|p| p.as_ref().to_vec()).collect();
        if params.is_empty() {
            return Err(ProtocolError::NoParameters);
        }
        if params.len() > MAX_PARAMETERS {
            return Err(ProtocolError::TooManyParameters(params.len()));
        }
        for (index, param) in params.iter().enumerate() {
            check_field(param).map_err(|e| match e {
                FieldError::TooLong(len) => ProtocolError::ParameterTooLong { index, len },
                FieldError::Nul => ProtocolError::EmbeddedNul(index),
            })?;
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &[Vec<u8>] {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Always false: a frame carries at least the command name.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// The program name a benchmark run is filed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkTag {
    name: Vec<u8>,
}

impl BenchmarkTag {
    pub fn new(name: impl AsRef<[u8]>) -> std::result::Result<Self, ProtocolError> {
        let name = name.as_ref();
        check_field(name).map_err(|e| match e {
            FieldError::TooLong(len) => ProtocolError::TagTooLong(len),
            FieldError::Nul => ProtocolError::EmbeddedNul(0),
        })?;
        Ok(Self {
            name: name.to_vec(),
        })
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }
}

enum FieldError {
    TooLong(usize),
    Nul,
}

fn check_field(bytes: &[u8]) -> std::result::Result<(), FieldError> {
    if bytes.len() > MAX_FIELD_LEN {
        return Err(FieldError::TooLong(bytes.len()));
    }
    if bytes.contains(&0) {
        return Err(FieldError::Nul);
    }
    Ok(())
}

fn send<R: Registers + ?Sized>(regs: &mut R, opcode: Opcode) {
    regs.write_byte(Register::Control, opcode.byte());
}

fn send_field<R: Registers + ?Sized>(regs: &mut R, bytes: &[u8]) {
    send(regs, Opcode::BeginField);
    for &byte in bytes {
        regs.write_byte(Register::Data, byte);
    }
    send(regs, Opcode::EndField);
}

/// Asks the simulator hosting the monitor to shut down. No reply.
pub fn quit<R: Registers + ?Sized>(regs: &mut R) {
    tracing::debug!("sending quit");
    send(regs, Opcode::Quit);
}

/// Starts performance measurement. No reply.
pub fn start_benchmark<R: Registers + ?Sized>(regs: &mut R) {
    tracing::debug!("starting benchmark measurement");
    send(regs, Opcode::StartBenchmark);
}

/// Stops performance measurement and copies the statistics the monitor
/// streams back to `out`. Returns the number of bytes copied.
pub fn end_benchmark<R, W>(regs: &mut R, policy: &PollPolicy, out: &mut W) -> Result<usize>
where
    R: Registers + ?Sized,
    W: Write + ?Sized,
{
    tracing::debug!("ending benchmark measurement");
    send(regs, Opcode::EndBenchmark);
    handshake::result_handshake(regs, policy, out)
}

/// Requests the component list and copies it to `out`, one component per
/// line. Returns the number of lines copied.
pub fn list_components<R, W>(regs: &mut R, policy: &PollPolicy, out: &mut W) -> Result<usize>
where
    R: Registers + ?Sized,
    W: Write + ?Sized,
{
    tracing::debug!("requesting component list");
    send(regs, Opcode::List);
    handshake::list_handshake(regs, policy, out)
}

/// Files the next benchmark run under `tag`.
///
/// The envelope is the command opcode, immediately overwritten by the field
/// opcode, then the name and a field end. No command end follows.
pub fn set_benchmark_tag<R: Registers + ?Sized>(regs: &mut R, tag: &BenchmarkTag) {
    tracing::debug!(name = %String::from_utf8_lossy(tag.name()), "tagging benchmark");
    send(regs, Opcode::BeginCommand);
    send_field(regs, tag.name());
}

/// Validates `name` and sends it as the benchmark tag.
pub fn tag_benchmark<R: Registers + ?Sized>(regs: &mut R, name: impl AsRef<[u8]>) -> Result<()> {
    let tag = BenchmarkTag::new(name)?;
    set_benchmark_tag(regs, &tag);
    Ok(())
}

/// Sends a validated command frame. No reply.
pub fn send_command<R: Registers + ?Sized>(regs: &mut R, frame: &ParameterFrame) {
    tracing::debug!(params = frame.len(), "sending command");
    send(regs, Opcode::BeginCommand);
    for param in frame.params() {
        send_field(regs, param);
    }
    send(regs, Opcode::EndCommand);
}

/// Validates `params` and forwards them as one command.
///
/// Invalid input fails with [`ProtocolError`] without touching the window.
pub fn exec_command<R, I, S>(regs: &mut R, params: I) -> Result<()>
where
    R: Registers + ?Sized,
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let frame = ParameterFrame::new(params)?;
    send_command(regs, &frame);
    Ok(())
}
