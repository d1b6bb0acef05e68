//! Browser bridge: gRPC-web over HTTP and gRPC over WebSocket.

mod common;

use common::{grpc_web_frame, split_grpc_web_frames, Harness, TestApp};
use futures::{SinkExt, StreamExt};
use portico_gateway::rpc::pb::AppGetVersionResponse;
use portico_gateway::StaticCredential;
use prost::Message as _;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tonic::Status;

const VERSION_PATH: &str = "/portico.ClientCommands/AppGetVersion";

#[tokio::test]
async fn test_grpc_web_unary_call() {
    let harness = Harness::start(TestApp::default(), StaticCredential::new("tok")).await;

    let response = reqwest::Client::new()
        .post(harness.bridge_url(VERSION_PATH))
        .header("content-type", "application/grpc-web+proto")
        .header("x-grpc-web", "1")
        .body(grpc_web_frame(0x00, &[]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("application/grpc-web"));

    let body = response.bytes().await.unwrap();
    let frames = split_grpc_web_frames(&body);
    let (_, message) = frames.iter().find(|(flag, _)| *flag == 0x00).unwrap();
    let decoded = AppGetVersionResponse::decode(message.as_slice()).unwrap();
    assert_eq!(decoded.version, "1.2.3");

    let (_, trailers) = frames.iter().find(|(flag, _)| *flag == 0x80).unwrap();
    let trailers = String::from_utf8_lossy(trailers).to_lowercase();
    assert!(trailers.contains("grpc-status:0"), "trailers: {trailers}");

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_grpc_web_denied_call_reports_status() {
    let harness = Harness::start(
        TestApp::denying(Status::unauthenticated("pair first")),
        StaticCredential::new("tok"),
    )
    .await;

    let response = reqwest::Client::new()
        .post(harness.bridge_url(VERSION_PATH))
        .header("content-type", "application/grpc-web+proto")
        .body(grpc_web_frame(0x00, &[]))
        .send()
        .await
        .unwrap();

    // Trailers-only responses carry the status in headers
    let status = response
        .headers()
        .get("grpc-status")
        .map(|v| v.to_str().unwrap().to_string());
    let body = response.bytes().await.unwrap();
    let in_body = split_grpc_web_frames(&body)
        .into_iter()
        .any(|(flag, payload)| {
            flag == 0x80 && String::from_utf8_lossy(&payload).contains("grpc-status:16")
        });
    assert!(status.as_deref() == Some("16") || in_body);
    assert_eq!(harness.app.handled(), 0);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_cors_preflight_is_permissive() {
    let harness = Harness::start(TestApp::default(), StaticCredential::new("tok")).await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, harness.bridge_url(VERSION_PATH))
        .header("origin", "http://localhost:3000")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type,x-grpc-web")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    harness.gateway.stop().await;
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect_grpc_websocket(harness: &Harness) -> Socket {
    let mut request = format!("ws://{}{}", harness.addrs.bridge, VERSION_PATH)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "sec-websocket-protocol",
        HeaderValue::from_static("grpc-websockets"),
    );
    let (socket, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(
        response.headers()["sec-websocket-protocol"],
        "grpc-websockets"
    );
    socket
}

/// Wait for the server to end the session without sending call data.
async fn expect_closed(socket: &mut Socket, within: Duration) {
    let next = tokio::time::timeout(within, socket.next())
        .await
        .expect("session still open");
    match next {
        None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {}
        Some(Ok(other)) => panic!("expected close, got {other:?}"),
    }
}

#[tokio::test]
async fn test_websocket_unary_call() {
    let harness = Harness::start(TestApp::default(), StaticCredential::new("tok")).await;
    let mut socket = connect_grpc_websocket(&harness).await;

    socket
        .send(Message::Text(
            "content-type: application/grpc-web+proto\r\nx-grpc-web: 1\r\n".into(),
        ))
        .await
        .unwrap();
    let mut data = vec![0x00];
    data.extend(grpc_web_frame(0x00, &[]));
    socket.send(Message::Binary(data)).await.unwrap();
    socket.send(Message::Binary(vec![0x01])).await.unwrap();

    let mut messages = Vec::new();
    while let Some(message) = socket.next().await {
        match message.unwrap() {
            Message::Binary(bytes) => messages.push(bytes),
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Header frame first
    let header = &messages[0];
    assert_eq!(header[0], 0x80);
    let header_text = String::from_utf8_lossy(&header[5..]).to_lowercase();
    assert!(header_text.contains("content-type: application/grpc-web"));

    let body: Vec<u8> = messages[1..].concat();
    let frames = split_grpc_web_frames(&body);
    let (_, message) = frames.iter().find(|(flag, _)| *flag == 0x00).unwrap();
    let decoded = AppGetVersionResponse::decode(message.as_slice()).unwrap();
    assert_eq!(decoded.version, "1.2.3");
    assert!(frames.iter().any(|(flag, payload)| {
        *flag == 0x80 && String::from_utf8_lossy(payload).contains("grpc-status:0")
    }));

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_websocket_without_subprotocol_is_rejected() {
    let harness = Harness::start(TestApp::default(), StaticCredential::new("tok")).await;

    let request = format!("ws://{}{}", harness.addrs.bridge, VERSION_PATH)
        .into_client_request()
        .unwrap();
    let err = tokio_tungstenite::connect_async(request).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 400);
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
    assert_eq!(harness.app.handled(), 0);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_websocket_without_headers_times_out() {
    let harness = Harness::start_with(TestApp::default(), StaticCredential::new("tok"), |c| {
        c.timeouts.read_header = Duration::from_millis(200);
    })
    .await;
    let mut socket = connect_grpc_websocket(&harness).await;

    expect_closed(&mut socket, Duration::from_secs(5)).await;
    assert_eq!(harness.app.handled(), 0);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_stop_closes_idle_websocket_session() {
    let harness = Harness::start(TestApp::default(), StaticCredential::new("tok")).await;
    let mut socket = connect_grpc_websocket(&harness).await;

    // Let the upgrade settle before shutting down
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.gateway.stop().await;

    expect_closed(&mut socket, Duration::from_secs(2)).await;
}
