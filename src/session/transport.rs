use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{connection_error, Error};
use crate::session::protocol::{encode_client_message, parse_server_message, ClientMessage, ServerMessage};

/// Establishes one bidirectional connection and hands back its two halves,
/// so the session task can read and write concurrently.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(Box<dyn MessageSink>, Box<dyn MessageStream>), Error>;
}

#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, message: ClientMessage) -> Result<(), Error>;
    async fn close(&mut self);
}

#[async_trait]
pub trait MessageStream: Send {
    /// Next inbound message. `Ok(None)` means the peer closed the
    /// connection cleanly.
    async fn next_message(&mut self) -> Result<Option<ServerMessage>, Error>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport. Authentication is carried as a bearer token query
/// parameter on the connection URL.
pub struct WsTransport {
    url: String,
    auth_token: String,
}

impl WsTransport {
    pub fn new(url: String, auth_token: String) -> Self {
        Self { url, auth_token }
    }

    fn connect_url(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}token={}", self.url, separator, self.auth_token)
    }
}

#[async_trait]
impl Transport for WsTransport {
    #[tracing::instrument(skip(self))]
    async fn connect(&self) -> Result<(Box<dyn MessageSink>, Box<dyn MessageStream>), Error> {
        let (stream, _response) = connect_async(self.connect_url())
            .await
            .map_err(connection_error)?;

        let (sink, stream) = stream.split();

        Ok((
            Box::new(WsSink { sink }),
            Box::new(WsMessageStream { stream }),
        ))
    }
}

struct WsSink {
    sink: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&mut self, message: ClientMessage) -> Result<(), Error> {
        let json = encode_client_message(&message)?;
        self.sink
            .send(WsMessage::Text(json))
            .await
            .map_err(connection_error)
    }

    async fn close(&mut self) {
        let _ = self.sink.send(WsMessage::Close(None)).await;
    }
}

struct WsMessageStream {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl MessageStream for WsMessageStream {
    async fn next_message(&mut self) -> Result<Option<ServerMessage>, Error> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => match parse_server_message(&text) {
                    Ok(message) => return Ok(Some(message)),
                    Err(err) => {
                        // unknown or malformed frames are dropped, not fatal
                        tracing::debug!(%err, "ignoring unparseable session frame");
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {
                    // ping/pong/binary
                }
                Some(Err(err)) => return Err(connection_error(err)),
            }
        }
    }
}
