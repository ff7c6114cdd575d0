//! # Simulated SESAM monitor
//!
//! An in-memory stand-in for the monitor's register window. It records every
//! access the host makes and plays back scripted replies with the same
//! read-side behaviour as the hardware: list output and benchmark statistics
//! advance by one byte per read and end with a NUL.

use std::collections::VecDeque;

use crate::protocol::Opcode;
use crate::window::{Register, Registers};

/// One host access to the window, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read(Register, u8),
    Write(Register, u8),
}

// Holds the scripted device state and the access log.
#[derive(Debug, Clone, Default)]
pub struct SimulatedMonitor {
    accesses: Vec<Access>,
    // Lines served through ListData after a List opcode, without terminators.
    list_lines: VecDeque<VecDeque<u8>>,
    // Statistics served through Data after an EndBenchmark opcode.
    result: VecDeque<u8>,
    // Number of Ready polls that still read zero after a List opcode.
    ready_delay: usize,
    never_ready: bool,
    // When set, every stream read returns this byte and never terminates.
    unterminated: Option<u8>,
    // --- Internal state driven by host writes ---
    listing: bool,
    reporting: bool,
    open_field: Option<Vec<u8>>,
    fields: Vec<Vec<u8>>,
}

impl SimulatedMonitor {
    /// Creates a monitor with nothing to report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues list output, one entry per ready cycle.
    pub fn with_list_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.list_lines
            .extend(lines.into_iter().map(|l| l.as_ref().iter().copied().collect()));
        self
    }

    /// Keeps `Ready` low for `polls` samples after the list opcode.
    pub fn with_ready_delay(mut self, polls: usize) -> Self {
        self.ready_delay = polls;
        self
    }

    /// Queues the statistics streamed back after the end-benchmark opcode.
    pub fn with_benchmark_result(mut self, text: impl AsRef<[u8]>) -> Self {
        self.result.extend(text.as_ref().iter().copied());
        self
    }

    /// A device that never raises `Ready`.
    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    /// A device whose output streams never send a terminator.
    pub fn with_unterminated_stream(mut self, byte: u8) -> Self {
        self.unterminated = Some(byte);
        self
    }

    pub fn accesses(&self) -> &[Access] {
        &self.accesses
    }

    /// Every written `(register, value)` pair in order.
    pub fn writes(&self) -> Vec<(Register, u8)> {
        self.accesses
            .iter()
            .filter_map(|a| match *a {
                Access::Write(reg, value) => Some((reg, value)),
                Access::Read(..) => None,
            })
            .collect()
    }

    /// The written bytes alone, opcodes and data interleaved.
    pub fn write_trace(&self) -> Vec<u8> {
        self.writes().into_iter().map(|(_, value)| value).collect()
    }

    /// Opcodes written to `Control`.
    pub fn control_trace(&self) -> Vec<u8> {
        self.writes()
            .into_iter()
            .filter(|(reg, _)| *reg == Register::Control)
            .map(|(_, value)| value)
            .collect()
    }

    pub fn reads_of(&self, reg: Register) -> usize {
        self.accesses
            .iter()
            .filter(|a| matches!(a, Access::Read(r, _) if *r == reg))
            .count()
    }

    /// Strings received between field start and field end opcodes.
    pub fn fields(&self) -> &[Vec<u8>] {
        &self.fields
    }

    fn ready(&mut self) -> u8 {
        if !self.listing || self.never_ready {
            return 0;
        }
        if self.ready_delay > 0 {
            self.ready_delay -= 1;
            return 0;
        }
        if self.unterminated.is_some() || !self.list_lines.is_empty() {
            1
        } else {
            0
        }
    }

    fn next_list_byte(&mut self) -> u8 {
        if !self.listing {
            return 0;
        }
        if let Some(byte) = self.unterminated {
            return byte;
        }
        let Some(line) = self.list_lines.front_mut() else {
            return 0;
        };
        match line.pop_front() {
            Some(byte) => byte,
            None => {
                self.list_lines.pop_front();
                0
            }
        }
    }

    fn next_result_byte(&mut self) -> u8 {
        if !self.reporting {
            return 0;
        }
        if let Some(byte) = self.unterminated {
            return byte;
        }
        self.result.pop_front().unwrap_or(0)
    }

    fn handle_opcode(&mut self, value: u8) {
        match Opcode::from_byte(value) {
            Some(Opcode::List) => self.listing = true,
            Some(Opcode::EndBenchmark) => self.reporting = true,
            Some(Opcode::BeginField) => self.open_field = Some(Vec::new()),
            Some(Opcode::EndField) => {
                if let Some(field) = self.open_field.take() {
                    self.fields.push(field);
                }
            }
            _ => {}
        }
    }
}

impl Registers for SimulatedMonitor {
    fn read_byte(&mut self, reg: Register) -> u8 {
        let value = match reg {
            // The host never reads back opcodes; the cell holds the last one.
            Register::Control => self.control_trace().last().copied().unwrap_or(0),
            Register::Data => self.next_result_byte(),
            Register::Ready => self.ready(),
            Register::ListData => self.next_list_byte(),
        };
        self.accesses.push(Access::Read(reg, value));
        value
    }

    fn write_byte(&mut self, reg: Register, value: u8) {
        self.accesses.push(Access::Write(reg, value));
        match reg {
            Register::Control => self.handle_opcode(value),
            Register::Data => {
                if let Some(field) = self.open_field.as_mut() {
                    field.push(value);
                }
            }
            // Device-owned cells; host writes are ignored by the monitor.
            Register::Ready | Register::ListData => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_monitor_reads_zero() {
        let mut sim = SimulatedMonitor::new().with_list_lines(["x"]).with_benchmark_result("y");
        // Nothing is served before the matching opcode.
        assert_eq!(sim.read_byte(Register::Ready), 0);
        assert_eq!(sim.read_byte(Register::ListData), 0);
        assert_eq!(sim.read_byte(Register::Data), 0);
    }

    #[test]
    fn fields_are_collected_between_markers() {
        let mut sim = SimulatedMonitor::new();
        sim.write_byte(Register::Control, Opcode::BeginCommand.byte());
        sim.write_byte(Register::Control, Opcode::BeginField.byte());
        sim.write_byte(Register::Data, b'o');
        sim.write_byte(Register::Data, b'k');
        sim.write_byte(Register::Control, Opcode::EndField.byte());
        sim.write_byte(Register::Control, Opcode::EndCommand.byte());
        assert_eq!(sim.fields(), &[b"ok".to_vec()]);
        assert_eq!(sim.control_trace(), vec![0x58, 0x62, 0x72, 0x78]);
    }

    #[test]
    fn data_outside_a_field_is_dropped() {
        let mut sim = SimulatedMonitor::new();
        sim.write_byte(Register::Data, b'z');
        assert!(sim.fields().is_empty());
        assert_eq!(sim.write_trace(), vec![b'z']);
    }

    #[test]
    fn list_lines_end_with_nul() {
        let mut sim = SimulatedMonitor::new().with_list_lines(["ab"]);
        sim.write_byte(Register::Control, Opcode::List.byte());
        assert_eq!(sim.read_byte(Register::Ready), 1);
        assert_eq!(sim.read_byte(Register::ListData), b'a');
        assert_eq!(sim.read_byte(Register::ListData), b'b');
        assert_eq!(sim.read_byte(Register::ListData), 0);
        assert_eq!(sim.read_byte(Register::Ready), 0);
    }
}
