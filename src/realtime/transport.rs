//! Broker transport abstraction
//!
//! The channel talks to the push broker through [`BrokerTransport`] /
//! [`BrokerConnection`] so the connection lifecycle logic can be exercised
//! against an in-memory double. The production implementation is a
//! WebSocket carrying UTF-8 JSON text frames.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};

use crate::error::{Error, Result};

/// Frames the client sends to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Send { topic: String, body: serde_json::Value },
}

/// Push frame the broker delivers: a JSON payload published on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushFrame {
    pub topic: String,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Open a connection, presenting the bearer credential when one is
    /// available.
    async fn connect(&self, url: &str, bearer: Option<&str>)
        -> Result<Box<dyn BrokerConnection>>;
}

#[async_trait]
pub trait BrokerConnection: Send {
    async fn send(&mut self, text: String) -> Result<()>;

    /// Next inbound text frame; `None` once the connection has closed.
    async fn next(&mut self) -> Option<Result<String>>;

    async fn close(&mut self);
}

/// WebSocket transport over `ws://` / `wss://`.
pub struct WsTransport;

#[async_trait]
impl BrokerTransport for WsTransport {
    async fn connect(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<Box<dyn BrokerConnection>> {
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::Realtime(format!("Invalid broker URL: {e}")))?;
        if let Some(token) = bearer {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::Realtime(format!("Invalid bearer credential: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| Error::Realtime(format!("Broker handshake failed: {e}")))?;
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl BrokerConnection for WsConnection {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::Realtime(format!("Broker send failed: {e}")))
    }

    async fn next(&mut self) -> Option<Result<String>> {
        while let Some(item) = self.stream.next().await {
            match item {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                // Control frames are handled by the protocol layer.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
                Ok(Message::Close(_)) => return None,
                Err(e) => return Some(Err(Error::Realtime(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
