//! gRPC connector towards pod shell agents.

use std::time::Duration;

use async_trait::async_trait;
use fedshell_proto::methods::METHOD_EXEC;
use fedshell_proto::v1::shell_service_client::ShellServiceClient;
use fedshell_proto::v1::{self as pb, exec_request, exec_response};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Request;
use tonic::codec::Streaming;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, instrument};

use super::client::{ShellConnector, ShellEvent, ShellStream};
use super::error::ShellError;
use super::target::{TargetRef, TerminalSize};
use crate::registry::SessionId;

/// Requests queued towards the agent before input sends start waiting.
const INPUT_BUFFER: usize = 64;

/// Agents read process output in 8 KiB chunks; never refuse those.
const MIN_OUTPUT_LIMIT: usize = 64 * 1024;
/// Protobuf framing around one output chunk.
const MESSAGE_OVERHEAD: usize = 64;

/// Opens `ShellService/Exec` streams over a fresh channel per session.
#[derive(Debug, Clone)]
pub struct GrpcShellConnector {
    connect_timeout: Duration,
    open_timeout: Duration,
    token: Option<String>,
    max_message_size: usize,
}

impl GrpcShellConnector {
    pub const fn new(connect_timeout: Duration, open_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            open_timeout,
            token: None,
            max_message_size: 256 * 1024 + MESSAGE_OVERHEAD,
        }
    }

    /// Present `token` as a bearer credential to agents.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Refuse agent responses carrying more than `bytes` of output, so one
    /// buffered output event stays within the transport watermark.
    #[must_use]
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes.max(MIN_OUTPUT_LIMIT) + MESSAGE_OVERHEAD;
        self
    }

    async fn connect(&self, endpoint: &str) -> Result<Channel, ShellError> {
        let endpoint = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| {
                ShellError::TargetUnreachable(format!("invalid agent endpoint {endpoint}: {e}"))
            })?
            .connect_timeout(self.connect_timeout)
            .http2_keep_alive_interval(Duration::from_secs(30))
            .keep_alive_timeout(Duration::from_secs(10))
            .keep_alive_while_idle(true);

        tokio::time::timeout(self.connect_timeout, endpoint.connect())
            .await
            .map_err(|_| ShellError::TargetUnreachable("connect timed out".into()))?
            .map_err(|e| ShellError::TargetUnreachable(format!("connect failed: {e}")))
    }

    async fn start(
        &self,
        channel: Channel,
        requests: mpsc::Receiver<pb::ExecRequest>,
    ) -> Result<(Streaming<pb::ExecResponse>, pb::ExecStarted), ShellError> {
        let mut client =
            ShellServiceClient::new(channel).max_decoding_message_size(self.max_message_size);
        let mut request = Request::new(ReceiverStream::new(requests));
        if let Some(token) = &self.token
            && let Ok(value) = format!("Bearer {token}").parse()
        {
            request.metadata_mut().insert("authorization", value);
        }

        let mut inbound = client
            .exec(request)
            .await
            .map_err(|status| ShellError::from_open_status(&status))?
            .into_inner();

        match inbound.message().await {
            Ok(Some(pb::ExecResponse {
                payload: Some(exec_response::Payload::Started(started)),
            })) => Ok((inbound, started)),
            Ok(Some(other)) => Err(ShellError::TargetRejected(format!(
                "agent sent {other:?} before starting the shell"
            ))),
            Ok(None) => Err(ShellError::TargetRejected(
                "agent closed the stream before starting the shell".into(),
            )),
            Err(status) => Err(ShellError::from_open_status(&status)),
        }
    }
}

#[async_trait]
impl ShellConnector for GrpcShellConnector {
    #[instrument(skip(self, target, size), fields(rpc = METHOD_EXEC, %session_id, pod = %target))]
    async fn open(
        &self,
        session_id: SessionId,
        target: &TargetRef,
        size: TerminalSize,
    ) -> Result<ShellStream, ShellError> {
        let channel = self.connect(&target.endpoint).await?;

        let (tx, rx) = mpsc::channel(INPUT_BUFFER);
        let start = pb::ExecStart {
            namespace: target.namespace.clone(),
            pod: target.pod.clone(),
            container: target.container.clone(),
            command: target.command.clone(),
            initial_size: Some(size.into()),
            session_id: session_id.to_string(),
        };
        tx.send(pb::ExecRequest {
            payload: Some(exec_request::Payload::Start(start)),
        })
        .await
        .map_err(|_| ShellError::Stream("shell input closed".into()))?;

        let (inbound, started) = tokio::time::timeout(self.open_timeout, self.start(channel, rx))
            .await
            .map_err(|_| {
                ShellError::TargetUnreachable(format!(
                    "shell did not start within {}s",
                    self.open_timeout.as_secs()
                ))
            })??;

        info!(pid = started.pid, "Shell stream opened");
        Ok(ShellStream::new(tx, response_events(inbound)))
    }
}

fn response_events(
    mut inbound: Streaming<pb::ExecResponse>,
) -> impl futures_util::Stream<Item = ShellEvent> + Send + 'static {
    async_stream::stream! {
        loop {
            match inbound.message().await {
                Ok(Some(response)) => match response.payload {
                    Some(exec_response::Payload::Stdout(data)) => yield ShellEvent::Stdout(data),
                    Some(exec_response::Payload::Stderr(data)) => yield ShellEvent::Stderr(data),
                    Some(exec_response::Payload::Exit(exit)) => {
                        if !exit.message.is_empty() {
                            debug!(code = exit.code, message = %exit.message, "Shell exited");
                        }
                        yield ShellEvent::Exited(exit.code);
                        break;
                    }
                    Some(exec_response::Payload::Started(_)) | None => {
                        debug!("Ignoring unexpected shell response");
                    }
                },
                Ok(None) => break,
                Err(status) => {
                    yield ShellEvent::Error(ShellError::from_stream_status(&status));
                    break;
                }
            }
        }
    }
}
