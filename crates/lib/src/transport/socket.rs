//! WebSocket plumbing: handshake, reader task and writer task.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Weak;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest, http, Message};

use super::{Inner, Outbound, TransportEvent};
use crate::codec::Frame;
use crate::error::ConnectionError;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Close code reported when the stream ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported when the peer's close frame carried no code.
const NO_STATUS: u16 = 1005;

/// Perform the WebSocket handshake, presenting `token` as the sub-protocol.
pub(super) async fn open(url: &str, token: Option<&str>) -> Result<WsStream, ConnectionError> {
    let mut request = url.into_client_request().map_err(|e| ConnectionError {
        code: None,
        reason: format!("invalid gateway url {}: {}", url, e),
    })?;
    if let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) {
        let value = http::HeaderValue::from_str(token).map_err(|_| ConnectionError {
            code: None,
            reason: "token is not a valid header value".to_string(),
        })?;
        request
            .headers_mut()
            .insert(http::header::SEC_WEBSOCKET_PROTOCOL, value);
    }
    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(handshake_error)?;
    Ok(stream)
}

fn handshake_error(e: tungstenite::Error) -> ConnectionError {
    match e {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            let reason = response
                .body()
                .as_deref()
                .and_then(|b| std::str::from_utf8(b).ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("handshake rejected")
                        .to_string()
                });
            ConnectionError {
                code: Some(status.as_u16()),
                reason,
            }
        }
        other => ConnectionError {
            code: None,
            reason: other.to_string(),
        },
    }
}

/// Drain the outbound queue into the socket until a close is requested or every sender is gone,
/// then send a close frame.
pub(super) async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send(frame.into_message()).await {
                    log::warn!("websocket send failed: {}", e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    if let Err(e) = sink.close().await {
        log::debug!("websocket close: {}", e);
    }
}

/// Read frames one at a time and hand them to the transport until the stream ends.
pub(super) async fn read_loop(mut stream: SplitStream<WsStream>, inner: Weak<Inner>) {
    let mut close: Option<(u16, String)> = None;
    while let Some(next) = stream.next().await {
        match next {
            Ok(Message::Text(text)) => deliver(&inner, Frame::Text(text)),
            Ok(Message::Binary(data)) => deliver(&inner, Frame::Binary(data)),
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.to_string()))
                    .unwrap_or((NO_STATUS, String::new()));
                log::debug!("gateway closed the connection: {} {}", code, reason);
                // Keep reading so the close reply gets flushed.
                close = Some((code, reason));
            }
            Ok(_) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => break,
            Err(e) => {
                log::warn!("websocket read error: {}", e);
                if let Some(inner) = inner.upgrade() {
                    inner.emit(TransportEvent::Error(e.to_string()));
                }
                close.get_or_insert((ABNORMAL_CLOSURE, e.to_string()));
                break;
            }
        }
    }
    let (code, reason) = close.unwrap_or((ABNORMAL_CLOSURE, "stream ended".to_string()));
    if let Some(inner) = inner.upgrade() {
        inner.shutdown();
        inner.emit(TransportEvent::Closed { code, reason });
    }
}

fn deliver(inner: &Weak<Inner>, frame: Frame) {
    if let Some(inner) = inner.upgrade() {
        inner.receive(frame);
    }
}
