// glp2 test application -- CLI tool for exercising a GLP2 electrical-safety
// tester against real hardware or a mock transport.
//
// Usage:
//   glp2-test-app ports --pattern FTDI
//   glp2-test-app --port /dev/ttyUSB0 beep
//   glp2-test-app --port /dev/ttyUSB0 actual
//   glp2-test-app --port /dev/ttyUSB0 params sample_time=500 beeper=off
//   glp2-test-app --port /dev/ttyUSB0 program Kettle \
//       --step "pe:step=1,mode=AC,test_current=10,max_resistance=0.1,duration=2" \
//       --step "vis:step=2,label=Check cable"
//   glp2-test-app --mock monitor --pattern GLP2 --duration 30
//   glp2-test-app --mock stress --count 50

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use glp2::frame::{ACK, DATA_MARKER, NAK, frame, frame_data_string};
use glp2::response::TestResult;
use glp2::settings::keys;
use glp2::steps::{ProgramStep, StepKind};
use glp2::{
    Glp2Event, Glp2Manager, Glp2ManagerBuilder, Glp2Master, MasterOptions, ParameterSet, Response,
    StaticSettings, TestProgram,
};
use glp2_core::{PortDescriptor, PortLister};
use glp2_test_harness::{MockConnector, MockPortLister, MockTransport};
use glp2_transport::{SerialPortLister, SerialTransport};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// glp2 test application -- talks to a GLP2 tester from the command line.
#[derive(Parser)]
#[command(name = "glp2-test-app", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyUSB0, COM3).
    /// Required for tester commands unless --mock is used.
    #[arg(long)]
    port: Option<String>,

    /// Serial baud rate.
    #[arg(long, default_value_t = 9600)]
    baud: u32,

    /// Tester address (1-255).
    #[arg(long, default_value_t = 1)]
    address: u8,

    /// Response timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Use a scripted mock tester instead of a real serial port.
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports, marking those matching a pattern.
    Ports {
        #[arg(long)]
        pattern: Option<String>,
    },

    /// Sound the tester's beeper.
    Beep,

    /// Print the installed device options.
    Options,

    /// Fetch and print the pending actual values.
    Actual,

    /// Start the loaded test program.
    Start,

    /// Cancel the running test.
    Cancel,

    /// Answer a pending visual inspection step.
    Visual {
        /// Report the inspection as failed.
        #[arg(long)]
        fail: bool,
    },

    /// Delete the stored test results.
    ClearResults,

    /// Delete the stored test programs.
    ClearPrograms,

    /// Set instrument parameters given as name=value pairs.
    Params {
        /// Parameters, e.g. sample_time=500 beeper=off.
        pairs: Vec<String>,

        /// Push the reset defaults instead.
        #[arg(long, conflicts_with = "pairs")]
        reset: bool,
    },

    /// Upload a test program.
    Program {
        /// Program name (at most 32 characters).
        name: String,

        /// Step as KIND:key=value,key=value (KIND is pe, iso, fct or vis).
        #[arg(long = "step", required = true)]
        steps: Vec<String>,
    },

    /// Run the lifecycle manager and print its events.
    Monitor {
        /// Substring identifying the tester's port.
        #[arg(long, default_value = "")]
        pattern: String,

        /// Duration in seconds (0 = run until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },

    /// Stress test: back-to-back actual-value requests.
    Stress {
        #[arg(long, default_value_t = 100)]
        count: u32,
    },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Split a `name=value` argument.
fn split_pair(arg: &str) -> Result<(&str, &str)> {
    arg.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .with_context(|| format!("expected name=value, got {arg:?}"))
}

/// Parse a `KIND:key=value,key=value` step description.
fn parse_step(desc: &str) -> Result<ProgramStep> {
    let (kind, fields) = desc
        .split_once(':')
        .with_context(|| format!("expected KIND:fields, got {desc:?}"))?;
    let kind: StepKind = kind.parse()?;
    let fields = fields
        .split(',')
        .filter(|f| !f.trim().is_empty())
        .map(split_pair)
        .collect::<Result<Vec<_>>>()?;
    ProgramStep::from_fields(kind, &fields).with_context(|| format!("invalid step {desc:?}"))
}

fn print_values(response: &Response) {
    match response {
        Response::ActualValues(values) => {
            println!("Actual values{}", if values.self_test { " (self test)" } else { "" });
            if values.fault_status != 0 {
                println!("  Fault:          {} ({})", values.fault_status, values.fault_text);
            }
            if let Some(program) = &values.program {
                println!("  Program:        {program}");
            }
            for result in &values.results {
                let verdict = if result.evaluation() { "PASS" } else { "FAIL" };
                match result {
                    TestResult::Default(r) => println!(
                        "  {:03} {:<4} set {} actual {} {} in {} ms  {verdict}",
                        r.step, r.method, r.set_value, r.actual_value, r.unit, r.time_ms
                    ),
                    TestResult::Hv(r) => println!(
                        "  {:03} {:<4} actual {} V {} mA in {} ms  {verdict}",
                        r.step, r.method, r.actual_voltage, r.actual_current, r.time_ms
                    ),
                    TestResult::Vis(r) => {
                        println!("  {:03} {:<4} {}  {verdict}", r.step, r.method, r.label)
                    }
                }
            }
            println!("  Completed:      {}", values.completed);
        }
        other => println!("{other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Mock tester
// ---------------------------------------------------------------------------

/// A mock tester that acknowledges everything it is likely to be sent.
///
/// `extra` holds additional data strings (parameters, program steps) to
/// acknowledge.
fn mock_tester(address: u8, extra: &[String]) -> MockTransport {
    let mock = MockTransport::new();
    let request = |text: &str| frame_data_string(address, text);
    let reply = |text: &str| frame(address, DATA_MARKER, text.as_bytes());

    for text in ["TS", "TA", "DR", "DP", "BP", "VIS_1", "VIS_0"] {
        mock.rule(&request(text), &[ACK]);
    }
    mock.rule(&request(&ParameterSet::reset_defaults().to_data_string()), &[ACK]);
    for text in extra {
        mock.rule(&request(text), &[ACK]);
    }
    mock.rule(&request("OPT"), &reply("OPT PE ISO FCT HV "));
    mock
}

/// A mock tester that, once reset, reports one press of the panel start
/// button and then stays idle.
fn mock_panel_tester(address: u8) -> MockTransport {
    let mock = mock_tester(address, &[]);
    let request = |text: &str| frame_data_string(address, text);

    for text in ["TA", "DR", "DP"] {
        mock.expect(&request(text), &[ACK]);
    }
    mock.expect(&request(&ParameterSet::reset_defaults().to_data_string()), &[ACK]);
    mock.expect(&request("IW"), &[NAK]);
    mock.expect(&request("OPT"), &frame(address, DATA_MARKER, b"OPT PE ISO FCT HV "));
    mock.expect(&request("IW"), &frame(address, DATA_MARKER, b"IST F_3 "));
    mock.rule(&request("IW"), &[NAK]);
    mock
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

fn master_options(cli: &Cli) -> MasterOptions {
    MasterOptions {
        address: cli.address,
        response_timeout: Duration::from_millis(cli.timeout_ms),
        ..Default::default()
    }
}

/// Data strings the mock must acknowledge for this command.
fn mock_extras(command: &Command) -> Result<Vec<String>> {
    Ok(match command {
        Command::Params { pairs, reset: false } => {
            vec![params_from_args(pairs)?.to_data_string()]
        }
        Command::Program { name, steps } => {
            let program = program_from_args(name, steps)?;
            let mut extra = vec![program.header_data_string()];
            extra.extend(program.steps().iter().map(ProgramStep::to_data_string));
            extra
        }
        _ => Vec::new(),
    })
}

async fn open_master(cli: &Cli) -> Result<Glp2Master> {
    let master = Glp2Master::new(master_options(cli));

    if cli.mock {
        let mock = mock_tester(cli.address, &mock_extras(&cli.command)?);
        mock.rule(
            &frame_data_string(cli.address, "IW"),
            &frame(
                cli.address,
                DATA_MARKER,
                b"IST PR_Mock 001 PE 10.0 0.05 IO 1000 Ohm END ",
            ),
        );
        master.open(Box::new(mock)).await?;
        println!("Connected (mock transport), address {}", cli.address);
        return Ok(master);
    }

    let port = cli
        .port
        .as_deref()
        .context("--port is required unless --mock is given")?;
    let transport = SerialTransport::open(port, cli.baud)
        .await
        .with_context(|| format!("failed to open {port}"))?;
    master.open(Box::new(transport)).await?;
    println!("Connected to {port} at {} baud, address {}", cli.baud, cli.address);
    Ok(master)
}

fn params_from_args(pairs: &[String]) -> Result<ParameterSet> {
    let pairs = pairs
        .iter()
        .map(|p| split_pair(p))
        .collect::<Result<Vec<_>>>()?;
    Ok(ParameterSet::from_pairs(&pairs)?)
}

fn program_from_args(name: &str, steps: &[String]) -> Result<TestProgram> {
    let steps = steps
        .iter()
        .map(|s| parse_step(s))
        .collect::<Result<Vec<_>>>()?;
    Ok(TestProgram::new(name, steps)?)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_ports(pattern: Option<&str>) -> Result<()> {
    let ports = SerialPortLister.list().await?;
    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }
    for port in &ports {
        let marker = match pattern {
            Some(p) if !p.is_empty() && port.matches(p) => "*",
            _ => " ",
        };
        let fields: Vec<String> = port.fields.iter().map(|(k, v)| format!("{k}={v}")).collect();
        println!("{marker} {:<20} {}", port.name, fields.join(" "));
    }
    Ok(())
}

async fn cmd_stress(master: &Glp2Master, count: u32) -> Result<()> {
    println!("Stress test: {count} actual-value requests");

    let mut success = 0u32;
    let mut failures = 0u32;
    let start = Instant::now();

    for i in 1..=count {
        match master.get_actual_values().await {
            Ok(_) => success += 1,
            Err(e) => {
                eprintln!("[{i}/{count}] get_actual_values failed: {e}");
                failures += 1;
            }
        }
    }

    let elapsed = start.elapsed();
    let rate = if elapsed.as_secs_f64() > 0.0 {
        count as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };

    println!();
    println!("Results:");
    println!("  Total requests: {count}");
    println!("  Successes:      {success}");
    println!("  Failures:       {failures}");
    println!("  Elapsed:        {:.3} s", elapsed.as_secs_f64());
    println!("  Rate:           {rate:.1} requests/sec");

    if failures > 0 {
        bail!("{failures} out of {count} requests failed");
    }
    Ok(())
}

fn build_manager(cli: &Cli, pattern: &str) -> Glp2Manager {
    let settings = StaticSettings::new()
        .with(keys::ENABLED, true)
        .with(keys::COM_PATTERN, pattern)
        .with(keys::COM_ADDRESS, cli.address);
    let builder = Glp2ManagerBuilder::new(settings)
        .response_timeout(Duration::from_millis(cli.timeout_ms));

    if !cli.mock {
        return builder.build();
    }

    let name = if pattern.is_empty() { "mock" } else { pattern };
    let lister = MockPortLister::new(vec![
        PortDescriptor::new("/dev/mock0").with_field("product", name),
    ]);
    let connector = MockConnector::new();
    connector.push(mock_panel_tester(cli.address));
    builder.port_lister(lister).connector(connector).build()
}

async fn cmd_monitor(cli: &Cli, pattern: &str, duration_secs: u64) -> Result<()> {
    let manager = build_manager(cli, pattern);
    let mut event_rx = manager.subscribe();

    if let Err(e) = manager.start().await {
        println!("Start failed ({}): {e}; the health check keeps retrying.", e.code());
    }
    println!("State: {}", manager.state());
    println!("Monitoring tester events (Ctrl-C to stop)...");

    let deadline = if duration_secs > 0 {
        Some(Instant::now() + Duration::from_secs(duration_secs))
    } else {
        None
    };

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = tokio::time::timeout(timeout, event_rx.recv()) => event,
        };
        match event {
            // Raw traffic is too chatty for the console.
            Ok(Ok(Glp2Event::Tx(_) | Glp2Event::Rx(_))) => {}
            Ok(Ok(event)) => println!("[event] {event:?}"),
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(n))) => {
                println!("[warning] missed {n} events (consumer too slow)");
            }
            Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => {
                println!("Event channel closed.");
                break;
            }
            Err(_) => {
                if deadline.is_some() {
                    println!("Monitor duration elapsed.");
                }
                break;
            }
        }
    }

    manager.stop().await;
    println!("State: {}", manager.state());
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that do not need a tester connection.
    match &cli.command {
        Command::Ports { pattern } => return cmd_ports(pattern.as_deref()).await,
        Command::Monitor { pattern, duration } => {
            return cmd_monitor(&cli, pattern, *duration).await;
        }
        _ => {}
    }

    let master = open_master(&cli).await?;

    let result = match &cli.command {
        Command::Beep => master.beep().await.map_err(Into::into),
        Command::Options => match master.get_device_options().await {
            Ok(options) => {
                println!("Device options: {}", options.options.join(" "));
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        Command::Actual => match master.get_actual_values().await {
            Ok(Some(response)) => {
                print_values(&response);
                Ok(())
            }
            Ok(None) => {
                println!("No actual values pending.");
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        Command::Start => master.start_test().await.map_err(Into::into),
        Command::Cancel => master.cancel_test().await.map_err(Into::into),
        Command::Visual { fail } => master.ack_visual_test(!fail).await.map_err(Into::into),
        Command::ClearResults => master.remove_test_results().await.map_err(Into::into),
        Command::ClearPrograms => master.remove_test_programs().await.map_err(Into::into),
        Command::Params { pairs, reset } => {
            let params = if *reset {
                ParameterSet::reset_defaults()
            } else {
                params_from_args(pairs)?
            };
            println!("Sending {}", params.to_data_string());
            master.set_parameters(&params).await.map_err(Into::into)
        }
        Command::Program { name, steps } => {
            let program = program_from_args(name, steps)?;
            println!(
                "Uploading {} ({} steps, {:.1} s planned)",
                program.name(),
                program.steps().len(),
                program.total_ms() as f64 / 1000.0
            );
            master.set_test_program(&program).await.map_err(Into::into)
        }
        Command::Stress { count } => cmd_stress(&master, *count).await,
        Command::Ports { .. } | Command::Monitor { .. } => unreachable!("handled above"),
    };

    master.close().await;
    if result.is_ok() {
        println!("OK");
    }
    result
}
