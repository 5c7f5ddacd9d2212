//! fedshell Console
//!
//! Serves browser terminals over WebSocket and bridges each one to a pod
//! shell through the pod's agent.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tonic::transport::Server;
use tracing::{info, warn};

use fedshell_core::config::{ConsoleConfig, load_config};
use fedshell_core::tracing_init::init_tracing;
use fedshell_proto::v1::session_admin_service_server::SessionAdminServiceServer;

use fedshell_console::auth::{JwtAuthenticator, JwtManager};
use fedshell_console::bridge::BridgeSettings;
use fedshell_console::registry::SessionRegistry;
use fedshell_console::server::{
    ConsoleState, SessionAdminServiceImpl, admin_interceptor, build_router,
};
use fedshell_console::shell::GrpcShellConnector;
use fedshell_console::supervisor::{
    RetryPolicy, RetryingConnector, SessionSupervisor, StaticTargetResolver,
};
use fedshell_console::transport::TransportConfig;

#[derive(Parser, Debug)]
#[command(name = "fedshell-console")]
#[command(version, about = "fedshell console - browser terminals into pod shells")]
struct Args {
    /// Explicit config file (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the WebSocket and admin listeners (default).
    Serve {
        /// WebSocket/HTTP listen address.
        #[arg(long, env = "FEDSHELL_LISTEN_ADDR")]
        listen: Option<SocketAddr>,

        /// Admin gRPC listen address.
        #[arg(long, env = "FEDSHELL_ADMIN_ADDR")]
        admin: Option<SocketAddr>,
    },
    /// Mint an access token signed with the configured secret.
    IssueToken {
        #[arg(long)]
        user_id: String,

        #[arg(long)]
        username: String,

        /// `operator` or `admin`.
        #[arg(long, default_value = "operator")]
        role: String,

        /// Token TTL in seconds.
        #[arg(long, default_value_t = 3600)]
        ttl: i64,
    },
}

#[tokio::main]
#[allow(clippy::print_stdout)]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Serve {
        listen: None,
        admin: None,
    }) {
        Command::Serve { listen, admin } => {
            init_tracing("fedshell_console=info", args.log_json);
            if let Some(addr) = listen {
                config.server.listen_addr = addr;
            }
            if let Some(addr) = admin {
                config.server.admin_addr = addr;
            }
            serve(config).await
        }
        Command::IssueToken {
            user_id,
            username,
            role,
            ttl,
        } => {
            let jwt = JwtManager::new(config.auth.jwt_secret.as_bytes(), ttl);
            let token = jwt.issue_access_token(&user_id, &username, &role)?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(config: ConsoleConfig) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        admin = %config.server.admin_addr,
        "Starting fedshell-console"
    );

    let resolver = match &config.targets.targets_file {
        Some(path) => StaticTargetResolver::from_file(path, config.targets.default_shell.clone())?,
        None => {
            warn!("No targets file configured; every target will be reported missing");
            StaticTargetResolver::new(Vec::new(), config.targets.default_shell.clone())
        }
    };

    let settings = BridgeSettings::from(&config.bridge);
    let grpc = GrpcShellConnector::new(
        Duration::from_secs(config.targets.connect_timeout_secs),
        settings.open_timeout,
    )
    .with_token(config.targets.agent_token.clone())
    .with_output_limit(config.bridge.watermark_bytes);
    let connector = RetryingConnector::new(
        Arc::new(grpc),
        RetryPolicy {
            max_retries: config.targets.open_retries,
            ..RetryPolicy::default()
        },
    );

    let jwt = JwtManager::new(config.auth.jwt_secret.as_bytes(), 3600);
    let registry = SessionRegistry::new(config.server.max_sessions);
    let supervisor = Arc::new(SessionSupervisor::new(
        registry.clone(),
        Arc::new(JwtAuthenticator::new(jwt.clone())),
        Arc::new(resolver),
        Arc::new(connector),
        settings.clone(),
    ));

    let app = build_router(ConsoleState {
        supervisor,
        transport: TransportConfig::from(&config.bridge),
    });
    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    let http = async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    };

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<SessionAdminServiceServer<SessionAdminServiceImpl>>()
        .await;
    let admin_svc = SessionAdminServiceImpl::new(registry.clone());
    let admin_check = admin_interceptor(Arc::new(jwt));
    let grpc_router = Server::builder()
        .http2_keepalive_interval(Some(Duration::from_secs(30)))
        .http2_keepalive_timeout(Some(Duration::from_secs(10)))
        .add_service(health_service)
        .add_service(SessionAdminServiceServer::with_interceptor(
            admin_svc,
            admin_check,
        ));

    tokio::select! {
        result = http => {
            result?;
        }
        result = grpc_router.serve(config.server.admin_addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    let terminated = registry.terminate_all("console shutting down").await;
    if terminated > 0 {
        info!(sessions = terminated, "Waiting for sessions to close");
        drain(&registry, settings.close_timeout).await;
    }

    info!("Console stopped");
    Ok(())
}

async fn drain(registry: &SessionRegistry, timeout: Duration) {
    let wait = async {
        while !registry.is_empty().await {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    if tokio::time::timeout(timeout, wait).await.is_err() {
        warn!(remaining = registry.len().await, "Sessions still open at shutdown");
    }
}
