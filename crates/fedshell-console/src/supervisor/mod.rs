//! Session supervisor: admission of new connections.
//!
//! Authenticates the client, resolves its target, registers a session and
//! runs the bridge. Rejected connections get a `Close` with the reason and
//! never reach the registry.

pub mod resolver;
pub mod retry;

use std::fmt;
use std::sync::Arc;

use tracing::{info, instrument, warn};

pub use resolver::{PodEntry, ResolveError, StaticTargetResolver, TargetRequest, TargetResolver};
pub use retry::{RetryPolicy, RetryingConnector};

use crate::auth::{AuthError, Authenticator, ConnectionContext};
use crate::bridge::{BridgeSession, BridgeSettings, CloseReason};
use crate::registry::SessionRegistry;
use crate::shell::ShellConnector;
use crate::transport::{CloseCode, TransportEndpoint};

/// Why a connection was turned away before a session existed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Auth(AuthError),
    /// Unknown or forbidden target; both read the same to the client.
    NotFound,
    Invalid(String),
    Full,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(e) => write!(f, "authentication failed: {e}"),
            Self::NotFound => f.write_str("target not found"),
            Self::Invalid(msg) => write!(f, "invalid target request: {msg}"),
            Self::Full => f.write_str("too many active sessions"),
        }
    }
}

/// Accepts connections and runs their bridge sessions.
pub struct SessionSupervisor {
    registry: SessionRegistry,
    authenticator: Arc<dyn Authenticator>,
    resolver: Arc<dyn TargetResolver>,
    connector: Arc<dyn ShellConnector>,
    settings: BridgeSettings,
}

impl SessionSupervisor {
    pub fn new(
        registry: SessionRegistry,
        authenticator: Arc<dyn Authenticator>,
        resolver: Arc<dyn TargetResolver>,
        connector: Arc<dyn ShellConnector>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            registry,
            authenticator,
            resolver,
            connector,
            settings,
        }
    }

    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Admit one connection and run it to completion.
    ///
    /// Returns the bridge's close reason, or the rejection sent to the
    /// client when no session was created.
    #[instrument(skip_all, fields(namespace = %request.namespace, pod = %request.pod, peer = ?ctx.peer))]
    pub async fn accept(
        &self,
        ctx: ConnectionContext,
        request: TargetRequest,
        transport: TransportEndpoint,
    ) -> Result<CloseReason, Rejection> {
        let identity = match self.authenticator.authenticate(&ctx).await {
            Ok(identity) => identity,
            Err(e) => return Err(self.reject(transport, Rejection::Auth(e)).await),
        };

        let target = match self.resolver.resolve(&identity, &request).await {
            Ok(target) => target,
            Err(ResolveError::NotFound(what) | ResolveError::Forbidden(what)) => {
                info!(user = %identity.username, target = %what, "Target not resolved");
                return Err(self.reject(transport, Rejection::NotFound).await);
            }
            Err(ResolveError::Invalid(msg)) => {
                return Err(self.reject(transport, Rejection::Invalid(msg)).await);
            }
        };

        let session = match self.registry.create(target, identity).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Cannot register session");
                return Err(self.reject(transport, Rejection::Full).await);
            }
        };

        let bridge = BridgeSession::new(
            Arc::clone(&session),
            transport,
            Arc::clone(&self.connector),
            self.settings.clone(),
        )
        .with_size(request.size());
        let reason = bridge.run().await;

        self.registry.remove(session.id()).await;
        Ok(reason)
    }

    async fn reject(&self, transport: TransportEndpoint, rejection: Rejection) -> Rejection {
        info!(reason = %rejection, "Rejecting connection");
        let (sender, receiver, writer) = transport.into_parts();
        drop(receiver);
        let close = sender.close(rejection.to_string(), CloseCode::Policy);
        if tokio::time::timeout(self.settings.close_timeout, close)
            .await
            .is_err()
        {
            warn!("Timed out queueing rejection");
        }
        drop(sender);
        writer.finish(self.settings.close_timeout).await;
        rejection
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::{JwtAuthenticator, JwtManager};
    use crate::shell::ShellEvent;
    use crate::test_support::{FakeConnector, target, transport_config, transport_pair};

    const SECRET: &[u8] = b"supervisor-test-secret";

    fn supervisor(connector: FakeConnector, max_sessions: usize) -> SessionSupervisor {
        supervisor_with_idle(connector, max_sessions, Duration::from_secs(3600))
    }

    fn supervisor_with_idle(
        connector: FakeConnector,
        max_sessions: usize,
        idle_timeout: Duration,
    ) -> SessionSupervisor {
        let resolver = StaticTargetResolver::new(
            [PodEntry {
                namespace: "fl-jobs".into(),
                pod: "pod-7".into(),
                containers: vec!["worker".into()],
                endpoint: target("pod-7").endpoint,
                allowed_users: Vec::new(),
            }],
            vec!["/bin/sh".into()],
        );
        SessionSupervisor::new(
            SessionRegistry::new(max_sessions),
            Arc::new(JwtAuthenticator::new(JwtManager::new(SECRET, 3600))),
            Arc::new(resolver),
            Arc::new(connector),
            BridgeSettings {
                idle_timeout,
                open_timeout: Duration::from_secs(5),
                close_timeout: Duration::from_secs(1),
            },
        )
    }

    fn ctx() -> ConnectionContext {
        let token = JwtManager::new(SECRET, 3600)
            .issue_access_token("u-1", "alice", "operator")
            .unwrap();
        ConnectionContext {
            bearer: Some(token),
            peer: None,
        }
    }

    fn request(pod: &str) -> TargetRequest {
        TargetRequest {
            namespace: "fl-jobs".into(),
            pod: pod.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unknown_target_creates_no_session() {
        let (connector, _shells) = FakeConnector::new();
        let supervisor = supervisor(connector, 8);
        let (endpoint, mut client) = transport_pair(&transport_config(1024), 16);

        let result = supervisor.accept(ctx(), request("pod-9"), endpoint).await;
        assert_eq!(result, Err(Rejection::NotFound));
        assert_eq!(supervisor.registry().len().await, 0);

        let transcript = client.transcript().await;
        assert_eq!(transcript.closes(), vec!["target not found"]);
        assert_eq!(transcript.close_code, Some(1008));
    }

    #[tokio::test]
    async fn bad_credentials_rejected() {
        let (connector, _shells) = FakeConnector::new();
        let supervisor = supervisor(connector, 8);
        let (endpoint, mut client) = transport_pair(&transport_config(1024), 16);

        let result = supervisor
            .accept(ConnectionContext::default(), request("pod-7"), endpoint)
            .await;
        assert_eq!(result, Err(Rejection::Auth(AuthError::MissingCredentials)));

        let transcript = client.transcript().await;
        assert_eq!(
            transcript.closes(),
            vec!["authentication failed: missing credentials"]
        );
        assert!(supervisor.registry().is_empty().await);
    }

    #[tokio::test]
    async fn full_registry_rejects() {
        let (connector, mut shells) = FakeConnector::new();
        let supervisor = Arc::new(supervisor(connector, 1));

        let (first, _first_client) = transport_pair(&transport_config(1024), 16);
        let running = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.accept(ctx(), request("pod-7"), first).await })
        };
        let shell = shells.recv().await.unwrap();

        let (second, mut second_client) = transport_pair(&transport_config(1024), 16);
        let result = supervisor.accept(ctx(), request("pod-7"), second).await;
        assert_eq!(result, Err(Rejection::Full));
        assert_eq!(
            second_client.transcript().await.closes(),
            vec!["too many active sessions"]
        );

        shell.emit(ShellEvent::Exited(0)).await;
        assert_eq!(running.await.unwrap(), Ok(CloseReason::Exited(0)));
    }

    #[tokio::test]
    async fn finished_session_is_removed() {
        let (connector, mut shells) = FakeConnector::new();
        let supervisor = Arc::new(supervisor(connector, 8));
        let (endpoint, mut client) = transport_pair(&transport_config(1024), 16);

        let running = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.accept(ctx(), request("pod-7"), endpoint).await })
        };
        let shell = shells.recv().await.unwrap();
        assert_eq!(supervisor.registry().len().await, 1);
        let summary = &supervisor.registry().snapshot().await[0];
        assert_eq!(summary.target.container, "worker");
        assert_eq!(summary.user, "alice");

        shell.emit(ShellEvent::Exited(3)).await;
        assert_eq!(client.transcript().await.closes(), vec!["exit 3"]);
        assert_eq!(running.await.unwrap(), Ok(CloseReason::Exited(3)));
        assert!(supervisor.registry().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_is_removed() {
        let (connector, mut shells) = FakeConnector::new();
        let supervisor = Arc::new(supervisor_with_idle(connector, 8, Duration::from_secs(60)));
        let (endpoint, mut client) = transport_pair(&transport_config(1024), 16);

        let running = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.accept(ctx(), request("pod-7"), endpoint).await })
        };
        let _shell = shells.recv().await.unwrap();
        assert_eq!(supervisor.registry().len().await, 1);

        assert_eq!(client.transcript().await.closes(), vec!["idle timeout"]);
        assert_eq!(running.await.unwrap(), Ok(CloseReason::IdleTimeout));
        assert!(supervisor.registry().is_empty().await);
    }
}
