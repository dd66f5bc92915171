//! Benchmark server daemon.
//!
//! Binds one UDP receive thread per port in the requested range and prints
//! a latency line for every probe datagram received.
//!
//! # Usage
//!
//! ```sh
//! netlat-server [-d] [-t thread_priority] [-p first_port last_port]
//! ```
//!
//! With `-t`, receive threads are launched at that FIFO realtime priority
//! (1-99, higher is more urgent); running unprivileged degrades them to
//! standard scheduling with a warning. Ctrl-C (or SIGTERM) shuts down
//! cleanly with exit code 0.

use std::process;

use netlat::server::{ServerConfig, ServerError, ServerList};
use netlat::thread::MAX_RT_PRIORITY;
use netlat::{signal, DEFAULT_FIRST_PORT, DEFAULT_PORT_COUNT};

struct Args {
    first_port: u16,
    last_port: u16,
    priority: u8,
    debug: bool,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let args = match parse_args(&args) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("netlat-server: {msg}");
            eprintln!("try: {} -help", program_name());
            process::exit(2);
        }
    };

    if args.debug && std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "netlat=debug");
    }
    netlat::init_tracing();

    if let Err(e) = run(&args) {
        eprintln!("netlat-server: {e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), ServerError> {
    // Block shutdown signals before any thread exists so every spawned
    // thread inherits the mask and sigwait below is the sole consumer.
    signal::block_shutdown_signals().map_err(ServerError::Signal)?;

    let config = ServerConfig {
        priority: args.priority,
        recv_buffer_size: None,
    };
    let mut servers = ServerList::bind_range(args.first_port, args.last_port, config)?;

    eprintln!(
        "netlat-server: listening on ports {} through {}",
        args.first_port, args.last_port
    );

    servers.start_all()?;

    if !servers.all_started_with_requested_attributes() {
        eprintln!("** Warning: some receive threads were not created with the requested attributes **");
        eprintln!("   You probably need to run as root.");
    }

    let sig = signal::wait_for_shutdown().map_err(ServerError::Signal)?;
    eprintln!("netlat-server: received signal {sig}, exiting...");

    servers.stop_all()?;
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args {
        first_port: DEFAULT_FIRST_PORT,
        last_port: DEFAULT_FIRST_PORT + DEFAULT_PORT_COUNT - 1,
        priority: 0,
        debug: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-help" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-t" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for -t")?;
                let priority: u8 = value
                    .parse()
                    .map_err(|_| format!("invalid thread priority: {value}"))?;
                if priority > MAX_RT_PRIORITY {
                    return Err(format!(
                        "thread priority {priority} out of range 0-{MAX_RT_PRIORITY}"
                    ));
                }
                parsed.priority = priority;
            }
            "-p" => {
                let first = args.get(i + 1).ok_or("missing first port for -p")?;
                let last = args.get(i + 2).ok_or("missing last port for -p")?;
                i += 2;
                parsed.first_port = first
                    .parse()
                    .map_err(|_| format!("invalid first port: {first}"))?;
                parsed.last_port = last
                    .parse()
                    .map_err(|_| format!("invalid last port: {last}"))?;
                if parsed.first_port == 0 || parsed.first_port > parsed.last_port {
                    return Err(format!("invalid port range: {first} {last}"));
                }
            }
            "-d" => parsed.debug = true,
            arg => return Err(format!("unknown argument: {arg}")),
        }
        i += 1;
    }

    Ok(parsed)
}

fn program_name() -> String {
    std::env::args()
        .next()
        .unwrap_or_else(|| "netlat-server".to_owned())
}

fn print_usage() {
    let name = program_name();
    eprintln!("Usage: {name} [-d] [-t thread_priority] [-p first_port last_port]");
    eprintln!("  -t: launch receive threads at this FIFO realtime priority (1-99,");
    eprintln!("      99 highest). Requires privilege; degrades to standard");
    eprintln!("      scheduling with a warning otherwise.");
    eprintln!("  -p: one receive thread is created for each port in the range");
    eprintln!("      first_port..=last_port (default {DEFAULT_FIRST_PORT}..={})",
        DEFAULT_FIRST_PORT + DEFAULT_PORT_COUNT - 1);
    eprintln!("  -d: raise the default log filter to netlat=debug");
}
