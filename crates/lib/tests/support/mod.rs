//! In-process fake gateway: accepts one WebSocket client, records the envelopes it sends
//! and lets the test push envelopes, raw frames or a close back to it.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use soss_transport::{Encoding, Envelope, Frame};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{self, header::SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::protocol::frame::{coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

enum Command {
    Send(Envelope),
    Raw(Message),
    Close(u16),
}

pub struct FakeGateway {
    pub url: String,
    pub encoding: Encoding,
    received: mpsc::UnboundedReceiver<Envelope>,
    commands: mpsc::UnboundedSender<Command>,
    protocol: Arc<Mutex<Option<String>>>,
}

pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
    }
}

impl FakeGateway {
    pub async fn start(encoding: Encoding) -> Self {
        Self::start_with_token(encoding, None).await
    }

    /// When `required_token` is set, handshakes presenting any other sub-protocol get 401.
    pub async fn start_with_token(encoding: Encoding, required_token: Option<&str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind gateway");
        let addr = listener.local_addr().expect("gateway addr");
        let (received_tx, received) = mpsc::unbounded_channel();
        let (commands, mut commands_rx) = mpsc::unbounded_channel();
        let protocol = Arc::new(Mutex::new(None));
        let seen_protocol = Arc::clone(&protocol);
        let required_token = required_token.map(str::to_string);

        tokio::spawn(async move {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let callback =
                move |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
                    let offered = req.headers().get(SEC_WEBSOCKET_PROTOCOL).cloned();
                    let offered_str = offered
                        .as_ref()
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    *seen_protocol.lock().unwrap() = offered_str.clone();
                    if let Some(required) = required_token {
                        if offered_str.as_deref() != Some(required.as_str()) {
                            let reject = http::Response::builder()
                                .status(http::StatusCode::UNAUTHORIZED)
                                .body(Some("invalid token".to_string()))
                                .unwrap();
                            return Err(reject);
                        }
                    }
                    if let Some(value) = offered {
                        resp.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
                    }
                    Ok(resp)
                };
            let Ok(ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await else {
                return;
            };
            let (mut sink, mut stream) = ws.split();
            loop {
                tokio::select! {
                    msg = stream.next() => {
                        let frame = match msg {
                            Some(Ok(Message::Text(text))) => Frame::Text(text),
                            Some(Ok(Message::Binary(data))) => Frame::Binary(data),
                            Some(Ok(_)) => continue,
                            Some(Err(_)) | None => break,
                        };
                        let envelope = encoding
                            .decode(&frame)
                            .expect("client sent a malformed envelope");
                        let _ = received_tx.send(envelope);
                    }
                    cmd = commands_rx.recv() => {
                        let message = match cmd {
                            Some(Command::Send(envelope)) => {
                                to_message(encoding.encode(&envelope).expect("encode envelope"))
                            }
                            Some(Command::Raw(message)) => message,
                            Some(Command::Close(code)) => Message::Close(Some(CloseFrame {
                                code: CloseCode::from(code),
                                reason: "closed by gateway".into(),
                            })),
                            None => break,
                        };
                        if sink.send(message).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            url: format!("ws://{}", addr),
            encoding,
            received,
            commands,
            protocol,
        }
    }

    /// Next envelope sent by the client; panics after a few seconds without one.
    pub async fn recv(&mut self) -> Envelope {
        tokio::time::timeout(RECV_TIMEOUT, self.received.recv())
            .await
            .expect("timed out waiting for client envelope")
            .expect("client connection ended")
    }

    /// Next envelope within `wait`, or `None` if nothing (or end of connection) arrives.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<Envelope> {
        tokio::time::timeout(wait, self.received.recv())
            .await
            .ok()
            .flatten()
    }

    /// Wait until the client side of the connection is gone.
    pub async fn disconnected(&mut self) {
        tokio::time::timeout(RECV_TIMEOUT, async {
            while self.received.recv().await.is_some() {}
        })
        .await
        .expect("client did not disconnect");
    }

    pub fn send(&self, envelope: Envelope) {
        let _ = self.commands.send(Command::Send(envelope));
    }

    pub fn send_raw(&self, message: Message) {
        let _ = self.commands.send(Command::Raw(message));
    }

    pub fn close(&self, code: u16) {
        let _ = self.commands.send(Command::Close(code));
    }

    /// Sub-protocol offered by the client during the handshake.
    pub fn protocol(&self) -> Option<String> {
        self.protocol.lock().unwrap().clone()
    }
}
