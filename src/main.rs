//! calcmux: a readiness-driven TCP expression calculator.
//!
//! Two roles share one single-threaded connection multiplexer:
//! - `serve` accepts any number of connections, accumulates each request
//!   until the peer half-closes, evaluates it, and writes the reply back.
//! - `send` opens many concurrent connections, streams a generated
//!   request per connection in randomized fragments, and checks every
//!   reply against local evaluation.

mod config;
mod expr;
mod gen;
mod mux;

use std::net::{SocketAddr, ToSocketAddrs};
use std::process;

use clap::Parser;
use config::{CliArgs, Command, Config};
use gen::ExprGenerator;
use mux::client::RequestCtx;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = CliArgs::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        process::exit(if e.use_stderr() { 1 } else { 0 });
    });
    let config = match Config::resolve(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match config.command.clone() {
        Command::Serve { port, host } => run_server(&config, &host, port),
        Command::Send {
            expr_length,
            connections,
            server_addr,
            server_port,
            max_exprs,
            seed,
        } => run_client(
            &config,
            expr_length,
            connections,
            &server_addr,
            server_port,
            max_exprs.unwrap_or(1),
            seed,
        ),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "fatal");
        process::exit(1);
    }
}

fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| format!("address '{host}:{port}' did not resolve").into())
}

fn run_server(config: &Config, host: &str, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = resolve_addr(host, port)?;
    let listener = mux::server::bind(addr, config.backlog)?;
    mux::server::run(listener, config.max_events, expr::respond)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_client(
    config: &Config,
    expr_length: usize,
    connections: usize,
    server_addr: &str,
    server_port: u16,
    max_exprs: usize,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = resolve_addr(server_addr, server_port)?;

    let mut generator = ExprGenerator::new(seed);
    let requests: Vec<String> = (0..connections)
        .map(|_| generator.batch(expr_length, max_exprs))
        .collect();

    info!(
        connections,
        expr_length,
        max_exprs,
        server = %addr,
        "sending expressions"
    );

    let mut completed = 0usize;
    let mut mismatches = 0usize;
    mux::client::run(
        addr,
        requests,
        seed,
        config.max_events,
        |ctx: &RequestCtx, reply: &[u8]| {
            completed += 1;
            let reply = String::from_utf8_lossy(reply);
            let expected = expr::respond(&ctx.expr);
            if reply.trim() == expected {
                debug!(id = ctx.id, "reply verified");
            } else {
                mismatches += 1;
                warn!(
                    id = ctx.id,
                    request = %ctx.expr,
                    got = %reply,
                    want = %expected,
                    "reply mismatch"
                );
            }
        },
    )?;

    let failed = connections - completed;
    info!(completed, failed, mismatches, "run finished");
    Ok(())
}
