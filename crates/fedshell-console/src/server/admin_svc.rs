//! `SessionAdminService` gRPC implementation.

use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use fedshell_proto::methods::{METHOD_LIST_SESSIONS, METHOD_TERMINATE_SESSION};
use fedshell_proto::v1::session_admin_service_server::SessionAdminService;
use fedshell_proto::v1::{
    self as pb, ListSessionsRequest, ListSessionsResponse, TerminateSessionRequest,
    TerminateSessionResponse,
};

use crate::registry::{SessionId, SessionRegistry, SessionState, SessionSummary};
use crate::server::interceptor::extract_claims;

pub struct SessionAdminServiceImpl {
    registry: SessionRegistry,
}

impl SessionAdminServiceImpl {
    pub const fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }
}

const fn state_to_proto(state: SessionState) -> pb::SessionState {
    match state {
        SessionState::Connecting => pb::SessionState::Connecting,
        SessionState::Active => pb::SessionState::Active,
        SessionState::Closing => pb::SessionState::Closing,
        SessionState::Closed => pb::SessionState::Closed,
    }
}

fn summary_to_proto(s: &SessionSummary) -> pb::SessionSummary {
    pb::SessionSummary {
        id: s.id.to_string(),
        namespace: s.target.namespace.clone(),
        pod: s.target.pod.clone(),
        container: s.target.container.clone(),
        command: s.target.command.clone(),
        user: s.user.clone(),
        state: state_to_proto(s.state).into(),
        last_activity: Some(prost_types::Timestamp::from(s.last_activity)),
        created_at: Some(prost_types::Timestamp::from(s.created_at)),
        bytes_in: s.bytes_in,
        bytes_out: s.bytes_out,
    }
}

#[tonic::async_trait]
impl SessionAdminService for SessionAdminServiceImpl {
    #[instrument(skip(self, request), fields(rpc = METHOD_LIST_SESSIONS))]
    async fn list_sessions(
        &self,
        request: Request<ListSessionsRequest>,
    ) -> Result<Response<ListSessionsResponse>, Status> {
        extract_claims(&request)?;

        let mut summaries = self.registry.snapshot().await;
        summaries.sort_by_key(|s| s.created_at);

        Ok(Response::new(ListSessionsResponse {
            sessions: summaries.iter().map(summary_to_proto).collect(),
        }))
    }

    #[instrument(skip(self, request), fields(rpc = METHOD_TERMINATE_SESSION))]
    async fn terminate_session(
        &self,
        request: Request<TerminateSessionRequest>,
    ) -> Result<Response<TerminateSessionResponse>, Status> {
        let admin = extract_claims(&request)?.username.clone();
        let req = request.into_inner();

        let id: SessionId = req
            .id
            .parse()
            .map_err(|_| Status::invalid_argument(format!("Malformed session id: {}", req.id)))?;

        let reason = if req.reason.is_empty() {
            format!("terminated by {admin}")
        } else {
            req.reason
        };

        if !self.registry.terminate(id, &reason).await {
            return Err(Status::not_found("Session not found"));
        }

        info!(session_id = %id, admin = %admin, reason = %reason, "Session terminated by admin");
        Ok(Response::new(TerminateSessionResponse { terminated: true }))
    }
}
