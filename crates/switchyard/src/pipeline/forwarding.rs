//! Reverse-proxy forwarding for the `proxy` and `balancing` actions.

use super::client::HttpClient;
use super::context::RequestContext;
use crate::error::ActionError;
use crate::headers::X_SWITCHYARD_VERSION;
use http_body_util::BodyExt;
use hyper::header::HOST;
use hyper::{HeaderMap, Request, Response, Uri};
use tracing::{debug, warn};

/// Scheme and authority of a backend address such as `http://10.0.0.5:8080`.
/// Any path on the address is ignored; the inbound path is used instead.
pub fn parse_backend(address: &str) -> Result<(String, String), ActionError> {
    let uri: Uri = address
        .parse()
        .map_err(|_| ActionError::InvalidAddress(address.to_string()))?;
    match (uri.scheme_str(), uri.authority()) {
        (Some(scheme), Some(authority)) => Ok((scheme.to_string(), authority.to_string())),
        _ => Err(ActionError::InvalidAddress(address.to_string())),
    }
}

/// Forward the inbound request to `address` and commit the backend response
/// into the context. One attempt, no retries.
///
/// Every inbound header except `host` is copied; the client sets `host` to
/// the backend authority. The backend response keeps its status and headers,
/// minus any sentinel header, and its body is streamed to the client.
pub async fn forward(
    client: &HttpClient,
    address: &str,
    ctx: &mut RequestContext,
) -> Result<(), ActionError> {
    let (scheme, authority) = parse_backend(address)?;

    let inbound = ctx.request();
    let path = inbound
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let full_uri = format!("{scheme}://{authority}{path}");
    debug!("Forwarding to: {}", full_uri);

    let mut upstream_req = Request::builder()
        .method(inbound.method().clone())
        .uri(full_uri.as_str());
    for (key, value) in inbound.headers() {
        if key != HOST {
            upstream_req = upstream_req.header(key, value);
        }
    }
    let upstream_req = upstream_req.body(ctx.take_body())?;

    let upstream_response = client.request(upstream_req).await?;
    let (parts, body) = upstream_response.into_parts();

    let mut headers = HeaderMap::with_capacity(parts.headers.len());
    for (key, value) in parts.headers.iter() {
        if key != X_SWITCHYARD_VERSION {
            headers.append(key.clone(), value.clone());
        }
    }

    // Bytes already sent cannot be recalled; a broken stream is only logged.
    let body = body
        .map_err(move |e| {
            warn!(upstream = %full_uri, "Upstream body stream failed: {}", e);
            e
        })
        .boxed();

    let mut response = Response::new(body);
    *response.status_mut() = parts.status;
    *response.headers_mut() = headers;
    ctx.finish(response);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend() {
        assert_eq!(
            parse_backend("http://127.0.0.1:8000").unwrap(),
            ("http".to_string(), "127.0.0.1:8000".to_string())
        );
        assert_eq!(
            parse_backend("https://api.test/ignored/path").unwrap(),
            ("https".to_string(), "api.test".to_string())
        );
    }

    #[test]
    fn test_parse_backend_requires_scheme_and_host() {
        for address in ["127.0.0.1:8000", "/just/a/path", "", "http://"] {
            assert!(
                matches!(parse_backend(address), Err(ActionError::InvalidAddress(_))),
                "{address:?} should be rejected"
            );
        }
    }
}
