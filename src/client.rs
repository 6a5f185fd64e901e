//! HTTP client construction.
//!
//! Every run gets its own [`reqwest::Client`], shared by all of the run's
//! workers so they share one connection pool. The [`TransportOptions`] control
//! how that client talks to the server.

use http::header::{self, HeaderMap, HeaderValue};
use reqwest::{redirect, Client, Proxy};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::GoslingError;

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Connection-level behavior of the HTTP client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportOptions {
    /// Don't ask the server for gzip-compressed responses.
    pub disable_compression: bool,
    /// Open a new connection for every request.
    pub disable_keepalive: bool,
    /// Don't follow redirects, record the 3xx response instead.
    pub disable_redirects: bool,
    /// Speak HTTP/2 without negotiating it first.
    pub http2: bool,
    /// Send all requests through this proxy.
    pub proxy: Option<Url>,
}

/// Build the client used by all workers of a single run.
///
/// A `timeout` of zero disables the per-request timeout.
pub(crate) fn build_client(
    transport: &TransportOptions,
    timeout: Duration,
) -> Result<Client, GoslingError> {
    let mut builder = Client::builder().user_agent(APP_USER_AGENT);

    if !timeout.is_zero() {
        builder = builder.timeout(timeout);
    }
    if transport.disable_compression {
        builder = builder.no_gzip();
    }
    if transport.disable_keepalive {
        builder = builder.pool_max_idle_per_host(0);
        // Connection is a hop-by-hop header HTTP/2 forbids.
        if !transport.http2 {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
            builder = builder.default_headers(headers);
        }
    }
    if transport.disable_redirects {
        builder = builder.redirect(redirect::Policy::none());
    }
    if transport.http2 {
        builder = builder.http2_prior_knowledge();
    }
    if let Some(proxy) = transport.proxy.as_ref() {
        let proxy = Proxy::all(proxy.as_str()).map_err(|e| GoslingError::InvalidOption {
            option: "--proxy".to_string(),
            value: proxy.to_string(),
            detail: e.to_string(),
        })?;
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(|e| GoslingError::Resource {
        detail: format!("failed to build http client: {}", e),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_client() {
        assert!(build_client(&TransportOptions::default(), Duration::from_secs(10)).is_ok());
        // No timeout.
        assert!(build_client(&TransportOptions::default(), Duration::ZERO).is_ok());
    }

    #[test]
    fn all_options() {
        let transport = TransportOptions {
            disable_compression: true,
            disable_keepalive: true,
            disable_redirects: true,
            http2: false,
            proxy: Some(Url::parse("http://127.0.0.1:3128").unwrap()),
        };
        assert!(build_client(&transport, Duration::from_millis(500)).is_ok());

        let transport = TransportOptions {
            disable_keepalive: true,
            http2: true,
            ..Default::default()
        };
        assert!(build_client(&transport, Duration::from_secs(1)).is_ok());
    }
}
