//! Fetching remote resources.
//!
//! Remote detection and the conformance check only talk to the network
//! through [`Transport`]. [`HttpTransport`] is the blocking HTTP(S)
//! implementation, available with the `http` feature.

use std::fmt;

use url::Url;

use crate::error::TransportError;

/// Blocking GET of a URI.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Fetch the body of `uri`. Non-success responses are errors.
    fn get(&self, uri: &Url) -> Result<Vec<u8>, TransportError>;
}

#[cfg(feature = "http")]
pub use http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use reqwest::blocking::Client;
    use tracing::debug;
    use url::Url;

    use super::Transport;
    use crate::error::TransportError;

    const USER_AGENT: &str = concat!("typesniff/", env!("CARGO_PKG_VERSION"));

    /// `reqwest` blocking client. No retries.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: Client,
    }

    impl HttpTransport {
        pub fn new() -> Result<Self, TransportError> {
            Self::with_timeout(None)
        }

        /// A transport whose requests give up after `timeout`.
        pub fn with_timeout(timeout: Option<Duration>) -> Result<Self, TransportError> {
            let mut builder = Client::builder().user_agent(USER_AGENT);
            if let Some(timeout) = timeout {
                builder = builder.timeout(timeout);
            }
            let client = builder.build().map_err(|e| TransportError::Client {
                message: e.to_string(),
            })?;
            Ok(Self { client })
        }
    }

    impl Transport for HttpTransport {
        fn get(&self, uri: &Url) -> Result<Vec<u8>, TransportError> {
            debug!(uri = %uri, "GET");
            let request_error = |e: reqwest::Error| TransportError::Request {
                uri: uri.to_string(),
                message: e.to_string(),
            };

            let response = self
                .client
                .get(uri.as_str())
                .send()
                .map_err(request_error)?;
            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status {
                    uri: uri.to_string(),
                    status: status.as_u16(),
                });
            }
            Ok(response.bytes().map_err(request_error)?.to_vec())
        }
    }
}


#[cfg(all(test, feature = "http"))]
mod tests {
    use super::*;

    #[test]
    fn http_transport_builds_with_timeout() {
        let transport = HttpTransport::with_timeout(Some(std::time::Duration::from_secs(5)));
        assert!(transport.is_ok());
    }
}
