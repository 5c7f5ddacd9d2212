//! `ShellService` implementation.

use std::pin::Pin;
use std::sync::Arc;

use fedshell_proto::methods::METHOD_EXEC;
use fedshell_proto::v1::shell_service_server::ShellService;
use fedshell_proto::v1::{ExecRequest, ExecResponse, ExecStarted, exec_request, exec_response};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tonic::codec::Streaming;
use tonic::{Request, Response, Status};
use tracing::{info, instrument, warn};

use crate::exec::{ExecPolicy, OUTPUT_BUFFER, SpawnedShell};

pub type ExecResponseStream =
    Pin<Box<dyn Stream<Item = Result<ExecResponse, Status>> + Send + 'static>>;

/// Spawns one process per `Exec` stream.
pub struct ShellServiceImpl {
    policy: Arc<ExecPolicy>,
}

impl ShellServiceImpl {
    pub fn new(policy: ExecPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }
}

#[tonic::async_trait]
impl ShellService for ShellServiceImpl {
    type ExecStream = ExecResponseStream;

    #[instrument(skip(self, request), fields(rpc = METHOD_EXEC))]
    async fn exec(
        &self,
        request: Request<Streaming<ExecRequest>>,
    ) -> Result<Response<Self::ExecStream>, Status> {
        let mut requests = request.into_inner();

        let start = match requests.message().await? {
            Some(ExecRequest {
                payload: Some(exec_request::Payload::Start(start)),
            }) => start,
            Some(_) => return Err(Status::invalid_argument("First request must be start")),
            None => return Err(Status::invalid_argument("Stream closed before start")),
        };

        if let Err(e) = self.policy.check(&start) {
            warn!(pod = %start.pod, error = %e, "Exec rejected");
            return Err(e.into());
        }
        let shell = SpawnedShell::spawn(&start)?;
        info!(
            pod = %start.pod,
            session_id = %start.session_id,
            pid = shell.pid(),
            "Exec started"
        );

        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        let started = ExecResponse {
            payload: Some(exec_response::Payload::Started(ExecStarted { pid: shell.pid() })),
        };
        tx.send(Ok(started))
            .await
            .map_err(|_| Status::internal("Response channel closed"))?;
        tokio::spawn(shell.run(requests, tx));

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}
