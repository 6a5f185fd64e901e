//! Request templates.
//!
//! A [`RequestTemplate`] is built once per target, before any load is generated,
//! and is then used as the stamp for every request the workers send to that
//! target. Building the template is where a target's URL, method and headers
//! are validated: a target that can't be turned into a template is skipped
//! without ever starting its run.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use url::Url;

use crate::scenario::{Header, TargetDescriptor};
use crate::util;
use crate::GoslingError;

/// An immutable description of the request sent to one target.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    /// The target's display name.
    pub name: String,
    pub method: Method,
    pub url: Url,
    /// Global headers merged with the target's headers.
    pub headers: HeaderMap,
    /// The request body, empty if there is none.
    pub body: Vec<u8>,
}
impl RequestTemplate {
    /// Build the request template for `target`.
    ///
    /// Global headers are applied first, then the target's headers: when both
    /// define the same header the target's value is the one that is sent.
    pub fn build(
        target: &TargetDescriptor,
        global_headers: &[Header],
    ) -> Result<RequestTemplate, GoslingError> {
        let name = target.display_name();
        let invalid = |detail: String| GoslingError::InvalidTarget {
            target: name.clone(),
            detail,
        };

        let url = util::is_valid_url(&target.url)
            .map_err(|e| invalid(format!("invalid url {:?}: {}", target.url, e)))?;

        let method_name = target.method.trim().to_uppercase();
        if method_name.is_empty() {
            return Err(invalid("method is empty".to_string()));
        }
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|e| invalid(format!("invalid method {:?}: {}", target.method, e)))?;

        let mut headers = HeaderMap::new();
        for header in global_headers.iter().chain(target.headers.iter()) {
            let (key, value) = parse_header(header).map_err(invalid)?;
            // `insert` replaces any earlier value, so the last definition wins.
            if let Some(previous) = headers.insert(key, value) {
                trace!("{}: header {} overrides {:?}", name, header.key, previous);
            }
        }

        debug!("{}: built {} {} template", name, method, url);
        Ok(RequestTemplate {
            name,
            method,
            url,
            headers,
            body: target.body.as_bytes().to_vec(),
        })
    }

    /// Stamp out one request from this template.
    pub(crate) fn request_builder(&self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let builder = client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        if self.body.is_empty() {
            builder
        } else {
            builder.body(self.body.clone())
        }
    }
}

// Convert a configured header into a valid HTTP header.
fn parse_header(header: &Header) -> Result<(HeaderName, HeaderValue), String> {
    let key = HeaderName::from_bytes(header.key.trim().as_bytes())
        .map_err(|e| format!("invalid header name {:?}: {}", header.key, e))?;
    let value = HeaderValue::from_str(&header.value)
        .map_err(|e| format!("invalid value for header {}: {}", header.key, e))?;
    Ok((key, value))
}
