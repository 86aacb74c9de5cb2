//! One-shot HTTP handshake that exchanges a plain GET for the connection
//! token and session cookie required to open the stream.
//!
//! Retry policy lives in the connection manager; a failed attempt here is
//! final for that attempt.

use async_trait::async_trait;
use reqwest::header::{SET_COOKIE, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::NegotiationError;
use crate::config::{LiveTimingConfig, CLIENT_PROTOCOL, CONNECTION_DATA};

/// Raw negotiation response body. The feed sends more fields; only the
/// token matters here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NegotiateBody {
    #[serde(rename = "ConnectionToken", default)]
    pub connection_token: Option<String>,
    #[serde(rename = "ConnectionId", default)]
    pub connection_id: Option<String>,
}

/// Body plus the session cookie the upstream may set, which must ride along
/// on the socket upgrade.
#[derive(Debug, Clone, Default)]
pub struct NegotiateReply {
    pub body: NegotiateBody,
    pub cookie: Option<String>,
}

/// Everything needed to open the stream.
#[derive(Debug, Clone)]
pub struct NegotiatedSession {
    pub socket_url: Url,
    pub cookie: Option<String>,
}

/// Transport seam for the handshake, so the state machine can be exercised
/// against scripted responses.
#[async_trait]
pub trait NegotiationBackend: Send + Sync {
    async fn fetch(&self, url: &Url, user_agent: &str) -> Result<NegotiateReply, NegotiationError>;
}

pub struct ReqwestNegotiationBackend {
    client: reqwest::Client,
}

impl ReqwestNegotiationBackend {
    pub fn new() -> Result<Self, NegotiationError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NegotiationBackend for ReqwestNegotiationBackend {
    async fn fetch(&self, url: &Url, user_agent: &str) -> Result<NegotiateReply, NegotiationError> {
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, user_agent)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NegotiationError::HttpStatus(status));
        }
        let cookie = {
            let pairs: Vec<&str> = response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .filter_map(|value| value.split(';').next())
                .collect();
            if pairs.is_empty() {
                None
            } else {
                Some(pairs.join("; "))
            }
        };
        let body = response.json::<NegotiateBody>().await?;
        Ok(NegotiateReply { body, cookie })
    }
}

/// Perform the handshake and derive the socket URL from the negotiated
/// token plus the fixed transport query string.
pub async fn negotiate(
    backend: &dyn NegotiationBackend,
    config: &LiveTimingConfig,
) -> Result<NegotiatedSession, NegotiationError> {
    let mut url = config.negotiate_url().clone();
    url.query_pairs_mut()
        .append_pair("clientProtocol", CLIENT_PROTOCOL)
        .append_pair("connectionData", CONNECTION_DATA);

    let reply = backend.fetch(&url, &config.user_agent).await?;
    let token = reply
        .body
        .connection_token
        .filter(|token| !token.is_empty())
        .ok_or(NegotiationError::MissingToken)?;

    let mut socket_url = config
        .socket_base_url()
        .join("connect")
        .map_err(|err| NegotiationError::InvalidEndpoint(err.to_string()))?;
    socket_url
        .query_pairs_mut()
        .append_pair("transport", "webSockets")
        .append_pair("clientProtocol", CLIENT_PROTOCOL)
        .append_pair("connectionToken", &token)
        .append_pair("connectionData", CONNECTION_DATA);

    debug!(
        target = "pitwall::session",
        cookie_present = reply.cookie.is_some(),
        "negotiation complete"
    );
    Ok(NegotiatedSession {
        socket_url,
        cookie: reply.cookie,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedBackend {
        reply: Mutex<Option<Result<NegotiateReply, NegotiationError>>>,
        seen_url: Mutex<Option<Url>>,
    }

    impl ScriptedBackend {
        fn new(reply: Result<NegotiateReply, NegotiationError>) -> Self {
            Self {
                reply: Mutex::new(Some(reply)),
                seen_url: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl NegotiationBackend for ScriptedBackend {
        async fn fetch(
            &self,
            url: &Url,
            _user_agent: &str,
        ) -> Result<NegotiateReply, NegotiationError> {
            *self.seen_url.lock().unwrap() = Some(url.clone());
            self.reply.lock().unwrap().take().expect("single fetch")
        }
    }

    fn config() -> LiveTimingConfig {
        LiveTimingConfig::new("https://feed.test/signalr/negotiate", "wss://feed.test/signalr")
            .unwrap()
    }

    #[tokio::test]
    async fn builds_socket_url_from_token_and_forwards_cookie() {
        let backend = ScriptedBackend::new(Ok(NegotiateReply {
            body: NegotiateBody {
                connection_token: Some("abc/+123".into()),
                connection_id: None,
            },
            cookie: Some("GCLB=xyz".into()),
        }));

        let session = negotiate(&backend, &config()).await.unwrap();
        assert_eq!(session.cookie.as_deref(), Some("GCLB=xyz"));
        assert!(session.socket_url.as_str().starts_with("wss://feed.test/signalr/connect?"));
        // The token must be percent-encoded into the query string.
        let token = session
            .socket_url
            .query_pairs()
            .find(|(key, _)| key == "connectionToken")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        assert_eq!(token, "abc/+123");

        let seen = backend.seen_url.lock().unwrap().clone().unwrap();
        assert!(seen.query().unwrap().contains("clientProtocol=1.5"));
        assert!(seen.query().unwrap().contains("connectionData="));
    }

    #[tokio::test]
    async fn missing_token_is_a_hard_failure() {
        let backend = ScriptedBackend::new(Ok(NegotiateReply::default()));
        let err = negotiate(&backend, &config()).await.unwrap_err();
        assert!(matches!(err, NegotiationError::MissingToken));
    }

    #[tokio::test]
    async fn empty_token_is_treated_as_missing() {
        let backend = ScriptedBackend::new(Ok(NegotiateReply {
            body: NegotiateBody {
                connection_token: Some(String::new()),
                connection_id: None,
            },
            cookie: None,
        }));
        let err = negotiate(&backend, &config()).await.unwrap_err();
        assert!(matches!(err, NegotiationError::MissingToken));
    }
}
