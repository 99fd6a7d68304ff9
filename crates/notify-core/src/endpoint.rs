use std::fmt;

use thiserror::Error;
use url::Url;

pub const DEFAULT_PUSH_PATH: &str = "/ws/notifications/";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("invalid api base url {url}: {reason}")]
    InvalidBase { url: String, reason: String },
    #[error("unsupported api scheme {0}")]
    UnsupportedScheme(String),
    #[error("api base url {0} has no host")]
    MissingHost(String),
}

/// Session credential handed to [`crate::connection::ConnectionMachine`].
/// `Debug` and `Display` never show the raw value.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Returns `None` for blank input so callers cannot connect without a credential.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(***)")
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// WebSocket address for the push channel. Carries the session token in its
/// query string; only [`PushEndpoint::url`] exposes it.
#[derive(Clone, PartialEq, Eq)]
pub struct PushEndpoint {
    url: Url,
}

impl PushEndpoint {
    /// Same host and port as the REST base, scheme upgraded (`http`→`ws`,
    /// `https`→`wss`), path replaced by `path`, token as the only query parameter.
    pub fn derive(api_base: &str, path: &str, token: &SessionToken) -> Result<Self, EndpointError> {
        let base = Url::parse(api_base).map_err(|err| EndpointError::InvalidBase {
            url: api_base.to_string(),
            reason: err.to_string(),
        })?;
        if base.host_str().is_none() {
            return Err(EndpointError::MissingHost(api_base.to_string()));
        }
        let scheme = match base.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        };

        let mut url = base.clone();
        url.set_scheme(scheme)
            .map_err(|_| EndpointError::UnsupportedScheme(base.scheme().to_string()))?;
        url.set_path(path);
        url.set_fragment(None);
        url.query_pairs_mut()
            .clear()
            .append_pair("token", token.expose());
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The address with the token masked; the only form that goes into logs.
    pub fn redacted(&self) -> String {
        let mut masked = self.url.clone();
        masked.set_query(Some("token=***"));
        masked.to_string()
    }
}

impl fmt::Display for PushEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for PushEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PushEndpoint").field(&self.redacted()).finish()
    }
}
