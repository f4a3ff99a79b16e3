//! Session Connection: one WebSocket to the analysis service.
//!
//! The socket runs on its own task and reports back through a channel of
//! [`ConnectionEvent`]s tagged with the connection id, so events from a
//! replaced connection are recognisable and dropped.

use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, ClientResult};
use crate::protocol::{decode_inbound, encode_outbound, InboundEnvelope, OutboundEnvelope};
use crate::streaming::FrameSink;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug)]
pub enum ConnectionEventKind {
    Opened,
    Message(InboundEnvelope),
    /// A text frame that did not decode; it still counts as a response.
    Malformed(String),
    Error(String),
    Closed { reason: String },
}

#[derive(Debug)]
pub struct ConnectionEvent {
    pub connection_id: u64,
    pub kind: ConnectionEventKind,
}

pub type ConnectionEventSender = mpsc::UnboundedSender<ConnectionEvent>;

/// Result of applying a [`ConnectionEvent`] to its connection.
#[derive(Debug)]
pub enum ConnectionUpdate {
    Opened,
    Inbound(InboundEnvelope),
    Malformed(ClientError),
    Error(ClientError),
    Closed { reason: String },
}

pub struct SessionConnection {
    id: u64,
    endpoint: String,
    state: ConnectionState,
    outbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
    last_error: Option<String>,
}

impl SessionConnection {
    /// Starts connecting to `endpoint`. Must be called inside a tokio runtime.
    pub fn connect(endpoint: &str, events: ConnectionEventSender) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        info!("[ws] #{id} connecting to {endpoint}");
        tokio::spawn(socket_task(id, endpoint.to_string(), outbound_rx, events, cancel.clone()));

        Self {
            id,
            endpoint: endpoint.to_string(),
            state: ConnectionState::Connecting,
            outbound,
            cancel,
            last_error: None,
        }
    }

    /// A connection with no socket behind it. Outbound frames land in the
    /// returned receiver; state is driven through [`handle_event`](Self::handle_event).
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let conn = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            endpoint: "ws://detached".into(),
            state: ConnectionState::Connecting,
            outbound,
            cancel: CancellationToken::new(),
            last_error: None,
        };
        (conn, outbound_rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True only while the transport is open.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Applies an event from the socket task. Events for another connection
    /// id, or arriving after a local close, yield `None`.
    pub fn handle_event(&mut self, event: ConnectionEvent) -> Option<ConnectionUpdate> {
        if event.connection_id != self.id {
            debug!("[ws] dropping event for stale connection #{}", event.connection_id);
            return None;
        }
        if self.state == ConnectionState::Closed {
            return None;
        }

        match event.kind {
            ConnectionEventKind::Opened => {
                info!("[ws] #{} open", self.id);
                self.state = ConnectionState::Open;
                self.last_error = None;
                Some(ConnectionUpdate::Opened)
            }
            ConnectionEventKind::Message(envelope) => Some(ConnectionUpdate::Inbound(envelope)),
            ConnectionEventKind::Malformed(detail) => {
                warn!("[ws] #{} dropped envelope: {detail}", self.id);
                Some(ConnectionUpdate::Malformed(ClientError::MalformedInboundEnvelope(detail)))
            }
            ConnectionEventKind::Error(message) => {
                warn!("[ws] #{} error: {message}", self.id);
                self.last_error = Some(message.clone());
                Some(ConnectionUpdate::Error(ClientError::ConnectionError(message)))
            }
            ConnectionEventKind::Closed { reason } => {
                info!("[ws] #{} closed: {reason}", self.id);
                self.state = ConnectionState::Closed;
                Some(ConnectionUpdate::Closed { reason })
            }
        }
    }

    /// Queues one envelope. `Ok(false)` (nothing sent) unless the transport is open.
    pub fn send(&mut self, envelope: &OutboundEnvelope) -> ClientResult<bool> {
        if self.state != ConnectionState::Open {
            debug!("[ws] #{} not open, dropping {}", self.id, envelope.tag());
            return Ok(false);
        }
        let text = encode_outbound(envelope)?;
        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| ClientError::ConnectionError("socket task has stopped".into()))?;
        Ok(true)
    }

    /// Closes the socket and stops delivering its events. Idempotent.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            info!("[ws] #{} closing", self.id);
            self.state = ConnectionState::Closed;
        }
        self.cancel.cancel();
    }
}

impl FrameSink for SessionConnection {
    fn send(&mut self, envelope: &OutboundEnvelope) -> ClientResult<bool> {
        SessionConnection::send(self, envelope)
    }
}

impl Drop for SessionConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn socket_task(
    id: u64,
    endpoint: String,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: ConnectionEventSender,
    cancel: CancellationToken,
) {
    let emit = |kind: ConnectionEventKind| {
        let _ = events.send(ConnectionEvent { connection_id: id, kind });
    };

    let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        result = connect_async(endpoint.as_str()) => result,
    };
    let ws = match connected {
        Ok((ws, _)) => ws,
        Err(e) => {
            emit(ConnectionEventKind::Error(format!("connect to {endpoint} failed: {e}")));
            emit(ConnectionEventKind::Closed {
                reason: "connect failed".into(),
            });
            return;
        }
    };
    emit(ConnectionEventKind::Opened);

    let (mut write, mut read) = ws.split();
    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break "closed locally".to_string();
            }
            message = outbound.recv() => match message {
                Some(message) => {
                    if let Err(e) = write.send(message).await {
                        emit(ConnectionEventKind::Error(e.to_string()));
                        break "write failed".to_string();
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break "connection dropped".to_string();
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match decode_inbound(&text) {
                    Ok(envelope) => emit(ConnectionEventKind::Message(envelope)),
                    Err(ClientError::MalformedInboundEnvelope(detail)) => emit(ConnectionEventKind::Malformed(detail)),
                    Err(e) => emit(ConnectionEventKind::Malformed(e.to_string())),
                },
                Some(Ok(Message::Binary(data))) => warn!("[ws] #{id} ignoring {} byte binary frame", data.len()),
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(f) => format!("closed by server ({} {})", u16::from(f.code), f.reason.as_str()),
                        None => "closed by server".to_string(),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(ConnectionEventKind::Error(e.to_string()));
                    break "transport error".to_string();
                }
                None => break "stream ended".to_string(),
            },
        }
    };
    emit(ConnectionEventKind::Closed { reason });
}
