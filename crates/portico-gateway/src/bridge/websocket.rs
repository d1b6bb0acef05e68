//! gRPC over WebSocket (`grpc-websockets` subprotocol).
//!
//! Client → server:
//! - first message: request headers, `name: value\r\n` lines
//! - then binary messages: `0x00` + gRPC-web framed payload, or a single `0x01`
//!   to half-close the request stream
//!
//! Server → client: one header frame (`0x80`, u32 BE length, header lines), the
//! gRPC-web response body as-is (data frames and the trailer frame), then close.

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Uri};
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use portico_telemetry::metrics::WEBSOCKET_SESSIONS;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceExt;
use tracing::{debug, warn};

use super::GrpcWeb;
use crate::server::UpgradeSignal;

/// Subprotocol negotiated during the upgrade.
pub const GRPC_WEBSOCKETS_PROTOCOL: &str = "grpc-websockets";

const FRAME_DATA: u8 = 0x00;
const FRAME_FINISH_SEND: u8 = 0x01;
const FRAME_HEADER: u8 = 0x80;

const DEFAULT_CONTENT_TYPE: &str = "application/grpc-web+proto";

/// Whether the upgrade request offers the `grpc-websockets` subprotocol.
pub fn offers_grpc_websockets(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|proto| proto.trim() == GRPC_WEBSOCKETS_PROTOCOL)
}

/// Parse a `name: value\r\n` header block. Malformed lines are skipped.
pub fn parse_header_block(block: &[u8]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for line in String::from_utf8_lossy(block).split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = HeaderName::from_bytes(name.trim().to_ascii_lowercase().as_bytes());
        let value = HeaderValue::from_str(value.trim());
        if let (Ok(name), Ok(value)) = (name, value) {
            headers.append(name, value);
        }
    }
    headers
}

/// Encode headers as a `0x80` frame.
pub fn encode_header_frame(headers: &HeaderMap) -> Bytes {
    let mut block = BytesMut::new();
    for (name, value) in headers {
        block.put_slice(name.as_str().as_bytes());
        block.put_slice(b": ");
        block.put_slice(value.as_bytes());
        block.put_slice(b"\r\n");
    }

    let mut frame = BytesMut::with_capacity(5 + block.len());
    frame.put_u8(FRAME_HEADER);
    frame.put_u32(block.len() as u32);
    frame.put_slice(&block);
    frame.freeze()
}

/// One upgraded connection waiting to be served.
pub struct Session {
    pub uri: Uri,
    pub grpc_web: GrpcWeb,
    /// Bound on the wait for the header block
    pub header_timeout: Duration,
    pub shutdown: UpgradeSignal,
}

type SocketSink = SplitSink<WebSocket, Message>;
type SocketStream = SplitStream<WebSocket>;

/// Aborts the request reader when the call is over or abandoned.
struct ReaderGuard(JoinHandle<()>);

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Serve one gRPC call carried over `socket`.
///
/// The socket is closed when the call finishes, when no header block arrives in
/// time, or when the bridge shuts down.
pub async fn serve_socket(socket: WebSocket, session: Session) {
    WEBSOCKET_SESSIONS.inc();
    let Session {
        uri,
        grpc_web,
        header_timeout,
        mut shutdown,
    } = session;
    let (mut sink, stream) = socket.split();

    tokio::select! {
        _ = shutdown.closed() => {
            debug!(path = %uri.path(), "Closing WebSocket session on shutdown");
        }
        _ = bridge_call(&mut sink, stream, &uri, grpc_web, header_timeout) => {
            debug!(path = %uri.path(), "WebSocket call finished");
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}

async fn bridge_call(
    sink: &mut SocketSink,
    mut stream: SocketStream,
    uri: &Uri,
    grpc_web: GrpcWeb,
    header_timeout: Duration,
) {
    // First message is the header block
    let header_block = match tokio::time::timeout(header_timeout, stream.next()).await {
        Err(_) => {
            debug!(path = %uri.path(), "No WebSocket headers within {:?}", header_timeout);
            return;
        }
        Ok(Some(Ok(Message::Text(text)))) => text.into_bytes(),
        Ok(Some(Ok(Message::Binary(bytes)))) => bytes,
        Ok(Some(Ok(_)) | None) => {
            debug!(path = %uri.path(), "WebSocket closed before headers");
            return;
        }
        Ok(Some(Err(e))) => {
            debug!(path = %uri.path(), error = %e, "WebSocket read failed");
            return;
        }
    };
    let mut headers = parse_header_block(&header_block);
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(DEFAULT_CONTENT_TYPE),
        );
    }

    // Request body is fed from later socket messages
    let (body_tx, body_rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);
    let _reader = ReaderGuard(tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Binary(bytes)) => match bytes.split_first() {
                    Some((&FRAME_DATA, payload)) => {
                        if body_tx
                            .send(Ok(Bytes::copy_from_slice(payload)))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some((&FRAME_FINISH_SEND, _)) => break,
                    _ => {
                        warn!("Ignoring unknown WebSocket frame");
                    }
                },
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        // Dropping the sender ends the request body
    }));

    let mut request = Request::new(Body::from_stream(ReceiverStream::new(body_rx)));
    *request.method_mut() = Method::POST;
    *request.uri_mut() = uri.clone();
    *request.headers_mut() = headers;

    let response = match grpc_web.oneshot(request.map(tonic::body::boxed)).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let (parts, mut body) = response.into_parts();
    if sink
        .send(Message::Binary(encode_header_frame(&parts.headers).to_vec()))
        .await
        .is_err()
    {
        return;
    }

    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(path = %uri.path(), error = %e, "gRPC-web response body failed");
                break;
            }
        };
        let message = match frame.into_data() {
            Ok(data) => data.to_vec(),
            Err(frame) => match frame.into_trailers() {
                Ok(trailers) => encode_header_frame(&trailers).to_vec(),
                Err(_) => continue,
            },
        };
        if sink.send(Message::Binary(message)).await.is_err() {
            break;
        }
    }
}
