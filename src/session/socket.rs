//! Streaming socket transport. The connection manager owns exactly one
//! [`StreamingSocket`] at a time and reaches it through the
//! [`SocketConnector`] seam so tests can script deliveries.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, USER_AGENT};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use super::SocketError;

/// One live upstream socket. Text deliveries come back raw; framing and
/// parsing happen downstream in the demultiplexer.
#[async_trait]
pub trait StreamingSocket: Send {
    async fn send_text(&mut self, text: &str) -> Result<(), SocketError>;

    /// Next raw delivery. `None` means the peer closed the stream.
    async fn next_chunk(&mut self) -> Option<Result<String, SocketError>>;

    async fn close(&mut self);
}

#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(
        &self,
        url: &Url,
        cookie: Option<&str>,
    ) -> Result<Box<dyn StreamingSocket>, SocketError>;
}

/// Production connector over `tokio-tungstenite`.
pub struct TungsteniteConnector {
    user_agent: String,
}

impl TungsteniteConnector {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(
        &self,
        url: &Url,
        cookie: Option<&str>,
    ) -> Result<Box<dyn StreamingSocket>, SocketError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|err| SocketError::BadRequest(err.to_string()))?;
        let agent = HeaderValue::from_str(&self.user_agent)
            .map_err(|err| SocketError::BadRequest(err.to_string()))?;
        request.headers_mut().insert(USER_AGENT, agent);
        if let Some(cookie) = cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|err| SocketError::BadRequest(err.to_string()))?;
            request.headers_mut().insert(COOKIE, value);
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|err| SocketError::Transport(err.to_string()))?;
        debug!(target = "pitwall::session", host = %url.host_str().unwrap_or(""), "socket open");
        Ok(Box::new(TungsteniteSocket { inner: stream }))
    }
}

struct TungsteniteSocket {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamingSocket for TungsteniteSocket {
    async fn send_text(&mut self, text: &str) -> Result<(), SocketError> {
        self.inner
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|err| SocketError::Transport(err.to_string()))
    }

    async fn next_chunk(&mut self) -> Option<Result<String, SocketError>> {
        while let Some(message) = self.inner.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Ok(Message::Close(_)) => return None,
                // Pings and pongs are transport noise.
                Ok(_) => continue,
                Err(err) => return Some(Err(SocketError::Transport(err.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}
