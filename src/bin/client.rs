//! Benchmark client daemon.
//!
//! Emits timestamped probe datagrams at a fixed cadence to every target in
//! its list: either one target per port of a host/port range, or the
//! records of a host-list file.
//!
//! # Usage
//!
//! ```sh
//! netlat-client [-d] [-h host_ip | -f host_list_file] [-p first_port]
//!               [-n num_targets] [-i interval_ms]
//! ```
//!
//! Provide `-h` or `-f`, not both. A host-list file holds one
//! `ip [port]` record per line; records without a port auto-increment from
//! the default first port. Ctrl-C (or SIGTERM) shuts down cleanly with exit
//! code 0.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use netlat::client::{ClientError, ClientList, DEFAULT_EMIT_INTERVAL};
use netlat::{signal, DEFAULT_FIRST_PORT, DEFAULT_PORT_COUNT};

struct Args {
    host: IpAddr,
    host_file: Option<PathBuf>,
    first_port: u16,
    last_port: u16,
    num_targets: u16,
    interval: Duration,
    debug: bool,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let args = match parse_args(&args) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("netlat-client: {msg}");
            eprintln!("try: {} -help", program_name());
            process::exit(2);
        }
    };

    if args.debug && std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "netlat=debug");
    }
    netlat::init_tracing();

    if let Err(e) = run(&args) {
        eprintln!("netlat-client: {e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), ClientError> {
    // Block shutdown signals before any thread exists so every spawned
    // thread inherits the mask and sigwait below is the sole consumer.
    signal::block_shutdown_signals().map_err(ClientError::Signal)?;

    let mut clients = ClientList::new(args.interval);
    match &args.host_file {
        Some(path) => clients.populate_from_file(path)?,
        None => {
            clients.populate_range(args.host, args.first_port, args.last_port)?;
        }
    }

    for client in clients.clients() {
        eprintln!("netlat-client: targeting {}", client.dest());
    }

    clients.start_all()?;

    let sig = signal::wait_for_shutdown().map_err(ClientError::Signal)?;
    eprintln!("netlat-client: received signal {sig}, exiting...");

    clients.stop_all()?;
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args {
        host: IpAddr::from([10, 0, 0, 1]),
        host_file: None,
        first_port: DEFAULT_FIRST_PORT,
        last_port: DEFAULT_FIRST_PORT + DEFAULT_PORT_COUNT - 1,
        num_targets: DEFAULT_PORT_COUNT,
        interval: DEFAULT_EMIT_INTERVAL,
        debug: false,
    };
    let mut host_given = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-help" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-h" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for -h")?;
                parsed.host = value
                    .parse()
                    .map_err(|_| format!("invalid host address: {value}"))?;
                host_given = true;
            }
            "-f" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for -f")?;
                parsed.host_file = Some(PathBuf::from(value));
            }
            "-p" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for -p")?;
                parsed.first_port = value
                    .parse()
                    .map_err(|_| format!("invalid first port: {value}"))?;
                if parsed.first_port == 0 {
                    return Err(format!("invalid first port: {value}"));
                }
            }
            "-n" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for -n")?;
                parsed.num_targets = value
                    .parse()
                    .map_err(|_| format!("invalid target count: {value}"))?;
                if parsed.num_targets == 0 {
                    return Err(format!("invalid target count: {value}"));
                }
            }
            "-i" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for -i")?;
                let millis: u64 = value
                    .parse()
                    .map_err(|_| format!("invalid interval: {value}"))?;
                if millis == 0 {
                    return Err(format!("invalid interval: {value}"));
                }
                parsed.interval = Duration::from_millis(millis);
            }
            "-d" => parsed.debug = true,
            arg => return Err(format!("unknown argument: {arg}")),
        }
        i += 1;
    }

    if host_given && parsed.host_file.is_some() {
        return Err("provide either -h or -f, not both".to_owned());
    }

    parsed.last_port = parsed
        .first_port
        .checked_add(parsed.num_targets - 1)
        .ok_or_else(|| {
            format!(
                "port range {} + {} targets exceeds 65535",
                parsed.first_port, parsed.num_targets
            )
        })?;

    Ok(parsed)
}

fn program_name() -> String {
    std::env::args()
        .next()
        .unwrap_or_else(|| "netlat-client".to_owned())
}

fn print_usage() {
    let name = program_name();
    eprintln!(
        "Usage: {name} [-d] [-h host_ip | -f host_list_file] [-p first_port] [-n num_targets] [-i interval_ms]"
    );
    eprintln!("  -h: target host IP; one emitter per port starting at first_port");
    eprintln!("  -f: host-list file of `ip [port]` records; records without a");
    eprintln!("      port auto-increment from {DEFAULT_FIRST_PORT}");
    eprintln!("  -p: first target port (default {DEFAULT_FIRST_PORT})");
    eprintln!("  -n: number of targets (default {DEFAULT_PORT_COUNT})");
    eprintln!("  -i: emit interval in milliseconds (default 1000)");
    eprintln!("  -d: raise the default log filter to netlat=debug");
}
