//! fedshell Agent
//!
//! Pod-side `ShellService` server. Consoles open `Exec` streams to it.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tonic::transport::Server;
use tracing::info;

use fedshell_agent::exec::ExecPolicy;
use fedshell_agent::server::{ShellServiceImpl, token_interceptor};
use fedshell_core::tracing_init::init_tracing;
use fedshell_proto::v1::shell_service_server::ShellServiceServer;

#[derive(Parser, Debug)]
#[command(name = "fedshell-agent")]
#[command(version, about = "fedshell agent - shell exec server inside a pod")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:50080", env = "FEDSHELL_AGENT_ADDR")]
    addr: SocketAddr,

    /// Name of the pod this agent serves; requests for other pods are refused.
    #[arg(long, env = "POD_NAME")]
    pod_name: Option<String>,

    /// Programs consoles may start (comma separated). Empty allows any.
    #[arg(long, value_delimiter = ',', env = "FEDSHELL_ALLOWED_PROGRAMS")]
    allow: Vec<String>,

    /// Bearer token consoles must present.
    #[arg(long, env = "FEDSHELL_AGENT_TOKEN")]
    token: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("fedshell_agent=info", args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        pod = ?args.pod_name,
        allowed = ?args.allow,
        token_required = args.token.is_some(),
        "Starting fedshell-agent"
    );

    let shell_svc = ShellServiceImpl::new(ExecPolicy {
        pod_name: args.pod_name,
        allowed_programs: args.allow,
    });

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<ShellServiceServer<ShellServiceImpl>>()
        .await;

    let grpc_router = Server::builder()
        .http2_keepalive_interval(Some(Duration::from_secs(30)))
        .http2_keepalive_timeout(Some(Duration::from_secs(10)))
        .add_service(health_service)
        .add_service(ShellServiceServer::with_interceptor(
            shell_svc,
            token_interceptor(args.token),
        ));

    tokio::select! {
        result = grpc_router.serve(args.addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Agent stopped");
    Ok(())
}
