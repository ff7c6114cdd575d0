//! Command line surface of the `sesam` binary.
//!
//! Turns the operator's command into a [`Request`], checks it, and only then
//! loads the monitor address, maps the window and runs the request. The window
//! is released on every path out of [`run_with`].

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::{DeviceConfig, DEFAULT_CONFIG_PATH};
use crate::error::{Result, SesamError};
use crate::handshake::{PollPolicy, DEFAULT_MAX_LINES, DEFAULT_MAX_STRING_LEN};
use crate::protocol::{self, BenchmarkTag, ParameterFrame};
use crate::window::{MappedWindow, Registers};

/// Sesam user controller
#[derive(Parser, Debug)]
#[command(name = "sesam")]
#[command(version, about = "Sesam user controller")]
pub struct Cli {
    /// File holding the monitor's physical base address in hex
    #[arg(long, env = "SESAM_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Give up on a silent monitor after this many milliseconds
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,

    /// Pause between two polls of a status register, in microseconds
    #[arg(long, default_value_t = 50)]
    pub poll_interval_us: u64,

    /// Longest reply string accepted before its terminator
    #[arg(long, default_value_t = DEFAULT_MAX_STRING_LEN)]
    pub max_string_len: usize,

    /// Most list lines accepted before the monitor drops its ready flag
    #[arg(long, default_value_t = DEFAULT_MAX_LINES)]
    pub max_lines: usize,

    /// Enable debug logging on stderr
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Quit VPSim
    Quit,
    /// Show component status
    List,
    /// Show performance statistics of the executed program
    Benchmark {
        /// Program to run, followed by its arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        program: Vec<String>,
    },
    /// Any other command is forwarded to the monitor with its arguments
    #[command(external_subcommand)]
    Exec(Vec<String>),
}

impl Cli {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.timeout_ms),
            Duration::from_micros(self.poll_interval_us),
        )
        .with_max_string_len(self.max_string_len)
        .with_max_lines(self.max_lines)
    }
}

/// A checked request, ready to run against a mapped window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Quit,
    List,
    Benchmark {
        tag: BenchmarkTag,
        // Shell command line run between start and end; may be empty.
        shell_command: String,
    },
    Exec(ParameterFrame),
}

impl Request {
    /// Checks a parsed command. Nothing here touches the device.
    pub fn from_command(command: &Commands) -> Result<Self> {
        match command {
            Commands::Quit => Ok(Request::Quit),
            Commands::List => Ok(Request::List),
            Commands::Benchmark { program } => {
                let (name, shell_command) = resolve_benchmark(program)?;
                Ok(Request::Benchmark {
                    tag: BenchmarkTag::new(name)?,
                    shell_command,
                })
            }
            Commands::Exec(params) => {
                if params.len() < 2 {
                    return Err(SesamError::Usage(format!(
                        "Missing argument: sesam {} <parameter>...",
                        params.first().map(String::as_str).unwrap_or("<command>")
                    )));
                }
                Ok(Request::Exec(ParameterFrame::new(params)?))
            }
        }
    }

    /// Status line shown to the operator before the request runs.
    pub fn banner(&self) -> Option<&'static str> {
        match self {
            Request::Quit => Some("Quitting VPSIM environment ..."),
            Request::List => Some("Components in VPSIM: "),
            Request::Benchmark { .. } | Request::Exec(_) => None,
        }
    }

    /// Runs the request, writing device output to `out`.
    pub fn execute<R, W>(&self, regs: &mut R, policy: &PollPolicy, out: &mut W) -> Result<()>
    where
        R: Registers + ?Sized,
        W: Write + ?Sized,
    {
        match self {
            Request::Quit => protocol::quit(regs),
            Request::List => {
                protocol::list_components(regs, policy, out)?;
            }
            Request::Benchmark { tag, shell_command } => {
                run_benchmark(regs, tag, policy, out, || run_shell(shell_command))?;
            }
            Request::Exec(frame) => protocol::send_command(regs, frame),
        }
        Ok(())
    }
}

/// Splits the words after `benchmark` into the tag name and the command line.
///
/// The tag is the first word with everything up to and including `./`
/// removed. When the first word ends in `.out` it only names the run and the
/// command is made of the remaining words; otherwise all words are run.
pub fn resolve_benchmark(words: &[String]) -> Result<(String, String)> {
    let Some(program) = words.first() else {
        return Err(SesamError::Usage(String::from(
            "Please put your benchmark application...\n\
             Usage: sesam benchmark <name_of_application>",
        )));
    };

    // rsplit yields the whole word when there is no dot at all.
    let names_only = program.rsplit('.').next() == Some("out");
    let command_words = if names_only { &words[1..] } else { words };

    let name = match program.find("./") {
        Some(pos) => &program[pos + 2..],
        None => program.as_str(),
    };
    Ok((name.to_string(), command_words.join(" ")))
}

/// Tags, starts, runs and ends one benchmark.
///
/// The end opcode is sent even when `run` fails, so the monitor is never left
/// measuring.
pub fn run_benchmark<R, W, F>(
    regs: &mut R,
    tag: &BenchmarkTag,
    policy: &PollPolicy,
    out: &mut W,
    run: F,
) -> Result<()>
where
    R: Registers + ?Sized,
    W: Write + ?Sized,
    F: FnOnce() -> Result<()>,
{
    protocol::set_benchmark_tag(regs, tag);
    protocol::start_benchmark(regs);
    // The child shares stdout with us.
    out.flush()?;
    let ran = run();
    protocol::end_benchmark(regs, policy, out)?;
    ran
}

fn run_shell(command_line: &str) -> Result<()> {
    if command_line.is_empty() {
        tracing::debug!("nothing to run between start and end of benchmark");
        return Ok(());
    }
    tracing::debug!(command = command_line, "running benchmark");
    let status = Command::new("sh").arg("-c").arg(command_line).status()?;
    if !status.success() {
        tracing::warn!(%status, command = command_line, "benchmarked program failed");
    }
    Ok(())
}

/// Runs `cli` against the monitor mapped through `/dev/mem`.
pub fn run<W: Write + ?Sized>(cli: &Cli, out: &mut W) -> Result<()> {
    run_with(cli, MappedWindow::acquire, out)
}

/// Runs `cli` against the window returned by `acquire`.
///
/// The request is checked first and the configuration loaded second, so
/// neither a bad command nor a bad configuration ever leads to a mapping.
pub fn run_with<R, F, W>(cli: &Cli, acquire: F, out: &mut W) -> Result<()>
where
    R: Registers,
    F: FnOnce(u64) -> Result<R>,
    W: Write + ?Sized,
{
    let request = Request::from_command(&cli.command)?;
    let config = DeviceConfig::load(&cli.config)?;

    if let Some(banner) = request.banner() {
        eprintln!("{banner}");
    }

    let mut window = acquire(config.base_address)?;
    let outcome = request.execute(&mut window, &cli.poll_policy(), out);
    let released = window.release();

    match (outcome, released) {
        (Err(e), Err(release_err)) => {
            tracing::warn!(error = %release_err, "failed to release monitor window");
            Err(e)
        }
        (outcome, released) => outcome.and(released),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::sim::SimulatedMonitor;

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn parse_known_commands() {
        assert_eq!(parse(&["sesam", "quit"]).command, Commands::Quit);
        assert_eq!(parse(&["sesam", "list"]).command, Commands::List);
    }

    #[test]
    fn parse_benchmark_keeps_program_flags() {
        let cli = parse(&["sesam", "benchmark", "./fft", "-n", "1024"]);
        assert_eq!(
            cli.command,
            Commands::Benchmark {
                program: words(&["./fft", "-n", "1024"])
            }
        );
    }

    #[test]
    fn parse_unknown_command_as_exec() {
        let cli = parse(&["sesam", "run", "--fast"]);
        assert_eq!(cli.command, Commands::Exec(words(&["run", "--fast"])));
    }

    #[test]
    fn parse_global_options() {
        let cli = parse(&[
            "sesam",
            "--config",
            "/tmp/addr",
            "--timeout-ms",
            "10",
            "--poll-interval-us",
            "0",
            "list",
        ]);
        assert_eq!(cli.config, PathBuf::from("/tmp/addr"));
        let policy = cli.poll_policy();
        assert_eq!(policy.timeout, Duration::from_millis(10));
        assert!(policy.interval.is_zero());
        assert_eq!(policy.max_string_len, DEFAULT_MAX_STRING_LEN);
        assert_eq!(policy.max_lines, DEFAULT_MAX_LINES);
    }

    #[test]
    fn resolve_strips_dot_slash() {
        let (name, command) = resolve_benchmark(&words(&["./bin/fft", "-n", "8"])).unwrap();
        assert_eq!(name, "bin/fft");
        assert_eq!(command, "./bin/fft -n 8");
    }

    #[test]
    fn resolve_out_word_only_names_the_run() {
        let (name, command) =
            resolve_benchmark(&words(&["./matmul.out", "mpirun", "./matmul.out"])).unwrap();
        assert_eq!(name, "matmul.out");
        assert_eq!(command, "mpirun ./matmul.out");
    }

    #[test]
    fn resolve_bare_program() {
        let (name, command) = resolve_benchmark(&words(&["ls"])).unwrap();
        assert_eq!(name, "ls");
        assert_eq!(command, "ls");
    }

    #[test]
    fn resolve_without_program_is_a_usage_error() {
        assert!(matches!(resolve_benchmark(&[]), Err(SesamError::Usage(_))));
    }

    #[test]
    fn exec_needs_an_argument() {
        let err = Request::from_command(&Commands::Exec(words(&["reset"]))).unwrap_err();
        assert!(matches!(err, SesamError::Usage(_)));
    }

    #[test]
    fn exec_with_eleven_strings_is_a_protocol_error() {
        let params = vec![String::from("p"); 11];
        let err = Request::from_command(&Commands::Exec(params)).unwrap_err();
        assert!(matches!(err, SesamError::Protocol(ProtocolError::TooManyParameters(11))));
    }

    #[test]
    fn benchmark_sequence_brackets_the_run() {
        let mut sim = SimulatedMonitor::new().with_benchmark_result("ok");
        let tag = BenchmarkTag::new("fft").unwrap();
        let mut out = Vec::new();
        let mut ran = false;
        run_benchmark(&mut sim, &tag, &PollPolicy::default(), &mut out, || {
            ran = true;
            Ok(())
        })
        .unwrap();
        assert!(ran);
        assert_eq!(sim.control_trace(), vec![0x58, 0x62, 0x72, 0x52, 0x54]);
        assert_eq!(out, b"ok");
    }

    #[test]
    fn benchmark_is_ended_even_if_the_program_cannot_start() {
        let mut sim = SimulatedMonitor::new();
        let tag = BenchmarkTag::new("missing").unwrap();
        let mut out = Vec::new();
        let err = run_benchmark(&mut sim, &tag, &PollPolicy::default(), &mut out, || {
            Err(SesamError::Io(std::io::Error::from(std::io::ErrorKind::NotFound)))
        })
        .unwrap_err();
        assert!(matches!(err, SesamError::Io(_)));
        assert_eq!(sim.control_trace().last(), Some(&0x54));
    }

    #[test]
    fn bad_command_is_rejected_before_mapping() {
        let cli = parse(&["sesam", "--config", "/nonexistent/config_sesam", "reset"]);
        let mut out = Vec::new();
        let result = run_with(
            &cli,
            |_| -> Result<SimulatedMonitor> { panic!("window must not be mapped") },
            &mut out,
        );
        assert!(matches!(result, Err(SesamError::Usage(_))));
    }
}
