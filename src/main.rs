//! Command line entry point of the stub server.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use boltstub::{Address, Script, Service, ServiceConfig};

/// Run a Bolt stub server.
///
/// The stub server listens for an incoming client connection and attempts
/// to play through a pre-scripted exchange with that client. Any deviation
/// from the script results in a non-zero exit code.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Address to listen on as INTERFACE:PORT. INTERFACE defaults to
    /// localhost, PORT to 17687.
    #[arg(short = 'l', long, env = "BOLT_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Seconds to wait for a client before giving up (default 30).
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Show the client-server exchange.
    #[arg(short, long)]
    verbose: bool,

    /// Script files. The first one is served, the others are only checked.
    #[arg(required = true)]
    script: Vec<PathBuf>,
}

const EXIT_MISMATCH: u8 = 1;
const EXIT_TIMED_OUT: u8 = 2;
const EXIT_NEVER_STARTED: u8 = 3;
const EXIT_START_FAILED: u8 = 99;
const EXIT_INTERRUPTED: u8 = 130;

/// Log to stderr; `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let level = if verbose { "info" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_service(cli: &Cli) -> anyhow::Result<Service> {
    let mut scripts = cli
        .script
        .iter()
        .map(|path| {
            Script::parse_file(path).with_context(|| format!("loading {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?
        .into_iter();
    let script = scripts.next().context("no script given")?;
    for ignored in scripts {
        info!("not serving {:?}, only one script is served", ignored.filename);
    }

    let mut builder = ServiceConfig::builder();
    if let Some(addr) = cli.listen_addr.as_deref() {
        builder = builder.with_listen_addr(Address::parse(addr)?);
    }
    if let Some(timeout) = cli.timeout {
        builder = builder.with_timeout_secs(timeout)?;
    }
    Ok(Service::new(script, builder.build()))
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let service = build_service(&cli)?;
    let handle = service.handle();

    let serve = service.start();
    tokio::pin!(serve);
    let mut sigints = 0;
    let served = loop {
        tokio::select! {
            served = &mut serve => break served,
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for SIGINT")?;
                sigints += 1;
                match sigints {
                    1 => {
                        println!("1st SIGINT received. Trying to finish all running scripts.");
                        handle.try_skip_to_end();
                    }
                    2 => {
                        println!("2nd SIGINT received. Closing all connections.");
                        handle.close_all_connections();
                    }
                    _ => {
                        println!("3rd SIGINT received. Hard exit.");
                        return Ok(ExitCode::from(EXIT_INTERRUPTED));
                    }
                }
            }
        }
    };
    served.context("serving")?;

    let failures = service.failures();
    if !failures.is_empty() {
        for failure in failures.iter() {
            println!("{}\n", failure);
        }
        return Ok(ExitCode::from(EXIT_MISMATCH));
    }
    if service.timed_out() {
        println!("Timed out");
        return Ok(ExitCode::from(EXIT_TIMED_OUT));
    }
    if !service.ever_acted() {
        println!("Script never started");
        return Ok(ExitCode::from(EXIT_NEVER_STARTED));
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(EXIT_START_FAILED)
        }
    }
}
