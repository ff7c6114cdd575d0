//! Bounded polling loops used to read replies back from the monitor.
//!
//! The monitor has no interrupt or wake-up primitive, so the host samples a
//! cell until it changes. Every loop here reads the same cells in the same
//! order a plain busy-wait would, but gives up with
//! [`SesamError::HandshakeTimeout`] instead of spinning forever on a silent
//! device.

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Result, SesamError, Stage};
use crate::window::{Register, Registers};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(50);
pub const DEFAULT_MAX_STRING_LEN: usize = 4096;
pub const DEFAULT_MAX_LINES: usize = 4096;

/// How long and how often the host samples the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Deadline for a status register to become nonzero.
    pub timeout: Duration,
    /// Pause between two unsuccessful samples. Zero spins.
    pub interval: Duration,
    /// Longest string accepted before a terminator must show up.
    pub max_string_len: usize,
    /// Most list lines accepted before `Ready` must drop.
    pub max_lines: usize,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
            max_string_len: DEFAULT_MAX_STRING_LEN,
            max_lines: DEFAULT_MAX_LINES,
        }
    }
}

impl PollPolicy {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            ..Self::default()
        }
    }

    pub fn with_max_string_len(mut self, max_string_len: usize) -> Self {
        self.max_string_len = max_string_len;
        self
    }

    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines;
        self
    }

    fn pause(&self) {
        if self.interval.is_zero() {
            std::hint::spin_loop();
        } else {
            thread::sleep(self.interval);
        }
    }
}

/// Samples `reg` until it reads nonzero and returns that value.
pub fn wait_nonzero<R: Registers + ?Sized>(
    regs: &mut R,
    reg: Register,
    policy: &PollPolicy,
    stage: Stage,
) -> Result<u8> {
    let start = Instant::now();
    let mut polls: u64 = 0;
    loop {
        let value = regs.read_byte(reg);
        polls += 1;
        if value != 0 {
            tracing::trace!(?reg, polls, "register became nonzero");
            return Ok(value);
        }
        let waited = start.elapsed();
        if waited >= policy.timeout {
            return Err(SesamError::HandshakeTimeout { stage, waited });
        }
        policy.pause();
    }
}

/// Reads `reg` until a NUL byte, forwarding every other byte to `out`.
///
/// The terminator itself is never forwarded. Every read returns a byte, so
/// there is nothing to wait for here: a stream that never terminates is cut
/// off after `max_string_len` bytes, however long `out` takes to accept them.
/// Returns the number of bytes forwarded.
pub fn drain_string<R, W>(
    regs: &mut R,
    reg: Register,
    policy: &PollPolicy,
    stage: Stage,
    out: &mut W,
) -> Result<usize>
where
    R: Registers + ?Sized,
    W: Write + ?Sized,
{
    let start = Instant::now();
    let mut len = 0;
    loop {
        let byte = regs.read_byte(reg);
        if byte == 0 {
            return Ok(len);
        }
        if len == policy.max_string_len {
            return Err(SesamError::HandshakeTimeout {
                stage,
                waited: start.elapsed(),
            });
        }
        out.write_all(&[byte])?;
        len += 1;
    }
}

/// Reads the component list once the list opcode has been written.
///
/// Waits for `Ready`, then prints one line per ready cycle: the `ListData`
/// bytes up to their terminator followed by a newline. Stops when `Ready`
/// reads zero after a line, or fails after `max_lines` lines if it never
/// does. Returns the number of lines printed.
pub fn list_handshake<R, W>(regs: &mut R, policy: &PollPolicy, out: &mut W) -> Result<usize>
where
    R: Registers + ?Sized,
    W: Write + ?Sized,
{
    wait_nonzero(regs, Register::Ready, policy, Stage::ListReady)?;

    let start = Instant::now();
    let mut lines = 0;
    loop {
        drain_string(regs, Register::ListData, policy, Stage::ListLine, out)?;
        out.write_all(b"\n")?;
        lines += 1;

        if regs.read_byte(Register::Ready) == 0 {
            break;
        }
        // A monitor stuck on Ready would otherwise produce lines forever.
        if lines == policy.max_lines {
            return Err(SesamError::HandshakeTimeout {
                stage: Stage::ListLine,
                waited: start.elapsed(),
            });
        }
    }
    out.flush()?;
    Ok(lines)
}

/// Reads the benchmark statistics once the end-benchmark opcode has been
/// written. Returns the number of bytes printed.
pub fn result_handshake<R, W>(regs: &mut R, policy: &PollPolicy, out: &mut W) -> Result<usize>
where
    R: Registers + ?Sized,
    W: Write + ?Sized,
{
    let len = drain_string(regs, Register::Data, policy, Stage::BenchmarkResult, out)?;
    out.flush()?;
    Ok(len)
}
