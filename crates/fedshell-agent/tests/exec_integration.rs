#![allow(clippy::unwrap_used, clippy::panic)] // Integration tests use unwrap for brevity

//! End-to-end `Exec` streams against an in-process agent on a loopback port.

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::codec::Streaming;
use tonic::transport::Server;
use tonic::{Code, Request, Status};

use fedshell_agent::exec::ExecPolicy;
use fedshell_agent::server::{ShellServiceImpl, token_interceptor};
use fedshell_proto::v1::shell_service_client::ShellServiceClient;
use fedshell_proto::v1::shell_service_server::ShellServiceServer;
use fedshell_proto::v1::{
    ExecRequest, ExecResponse, ExecStart, Signal, exec_request, exec_response,
};

async fn start_agent(policy: ExecPolicy, token: Option<&str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = ShellServiceServer::with_interceptor(
        ShellServiceImpl::new(policy),
        token_interceptor(token.map(ToString::to_string)),
    );
    tokio::spawn(async move {
        Server::builder()
            .add_service(service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    format!("http://{addr}")
}

fn start(pod: &str, command: &[&str]) -> ExecRequest {
    ExecRequest {
        payload: Some(exec_request::Payload::Start(ExecStart {
            namespace: "fl-jobs".into(),
            pod: pod.into(),
            container: "worker".into(),
            command: command.iter().map(ToString::to_string).collect(),
            initial_size: None,
            session_id: "test-session".into(),
        })),
    }
}

async fn exec(
    endpoint: String,
    first: ExecRequest,
    token: Option<&str>,
) -> (
    mpsc::Sender<ExecRequest>,
    Result<Streaming<ExecResponse>, Status>,
) {
    let mut client = ShellServiceClient::connect(endpoint).await.unwrap();
    let (tx, rx) = mpsc::channel(16);
    tx.send(first).await.unwrap();
    let mut request = Request::new(ReceiverStream::new(rx));
    if let Some(token) = token {
        request
            .metadata_mut()
            .insert("authorization", format!("Bearer {token}").parse().unwrap());
    }
    let result = client.exec(request).await.map(tonic::Response::into_inner);
    (tx, result)
}

async fn next_payload(stream: &mut Streaming<ExecResponse>) -> exec_response::Payload {
    stream.message().await.unwrap().unwrap().payload.unwrap()
}

/// Read until `len` stdout bytes arrived.
async fn read_stdout(stream: &mut Streaming<ExecResponse>, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    while out.len() < len {
        match next_payload(stream).await {
            exec_response::Payload::Stdout(data) => out.extend(data),
            other => panic!("unexpected {other:?}"),
        }
    }
    out
}

fn stdin(data: &[u8]) -> ExecRequest {
    ExecRequest {
        payload: Some(exec_request::Payload::Stdin(data.to_vec())),
    }
}

#[tokio::test]
async fn cat_echoes_and_terminates_on_signal() {
    let endpoint = start_agent(ExecPolicy::default(), None).await;
    let (tx, result) = exec(endpoint, start("pod-7", &["cat"]), None).await;
    let mut stream = result.unwrap();

    assert!(matches!(
        next_payload(&mut stream).await,
        exec_response::Payload::Started(s) if s.pid > 0
    ));

    tx.send(stdin(b"hello\n")).await.unwrap();
    assert_eq!(read_stdout(&mut stream, 6).await, b"hello\n");
    tx.send(stdin(b"again\n")).await.unwrap();
    assert_eq!(read_stdout(&mut stream, 6).await, b"again\n");

    tx.send(ExecRequest {
        payload: Some(exec_request::Payload::Signal(Signal::Terminate.into())),
    })
    .await
    .unwrap();
    match next_payload(&mut stream).await {
        exec_response::Payload::Exit(exit) => assert_eq!(exit.code, 143),
        other => panic!("unexpected {other:?}"),
    }
    assert!(stream.message().await.unwrap().is_none());
}

#[tokio::test]
async fn stderr_and_exit_code_relayed() {
    let endpoint = start_agent(ExecPolicy::default(), None).await;
    let (_tx, result) = exec(
        endpoint,
        start("pod-7", &["/bin/sh", "-c", "echo oops >&2; exit 3"]),
        None,
    )
    .await;
    let mut stream = result.unwrap();

    assert!(matches!(
        next_payload(&mut stream).await,
        exec_response::Payload::Started(_)
    ));
    assert_eq!(
        next_payload(&mut stream).await,
        exec_response::Payload::Stderr(b"oops\n".to_vec())
    );
    match next_payload(&mut stream).await {
        exec_response::Payload::Exit(exit) => assert_eq!(exit.code, 3),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn disallowed_program_is_permission_denied() {
    let policy = ExecPolicy {
        pod_name: None,
        allowed_programs: vec!["cat".into()],
    };
    let endpoint = start_agent(policy, None).await;
    let (_tx, result) = exec(endpoint, start("pod-7", &["/bin/sh"]), None).await;
    assert_eq!(result.unwrap_err().code(), Code::PermissionDenied);
}

#[tokio::test]
async fn other_pod_is_not_found() {
    let policy = ExecPolicy {
        pod_name: Some("pod-7".into()),
        allowed_programs: Vec::new(),
    };
    let endpoint = start_agent(policy, None).await;
    let (_tx, result) = exec(endpoint, start("pod-8", &["cat"]), None).await;
    assert_eq!(result.unwrap_err().code(), Code::NotFound);
}

#[tokio::test]
async fn first_request_must_be_start() {
    let endpoint = start_agent(ExecPolicy::default(), None).await;
    let (_tx, result) = exec(endpoint, stdin(b"ls\n"), None).await;
    assert_eq!(result.unwrap_err().code(), Code::InvalidArgument);
}

#[tokio::test]
async fn token_required_when_configured() {
    let endpoint = start_agent(ExecPolicy::default(), Some("s3cret")).await;

    let (_tx, result) = exec(endpoint.clone(), start("pod-7", &["cat"]), None).await;
    assert_eq!(result.unwrap_err().code(), Code::Unauthenticated);

    let (_tx, result) = exec(endpoint, start("pod-7", &["cat"]), Some("s3cret")).await;
    let mut stream = result.unwrap();
    assert!(matches!(
        next_payload(&mut stream).await,
        exec_response::Payload::Started(_)
    ));
}
