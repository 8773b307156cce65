//! Shared upstream HTTP client.

use super::response::GatewayBody;
use crate::error::StartupError;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

/// Type alias for the HTTP client used by `proxy` and `balancing`.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, GatewayBody>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Create the pooled HTTP/1.1 client, able to reach both `http` and `https`
/// backends.
pub fn create_http_client() -> Result<HttpClient, StartupError> {
    let mut http_connector = HttpConnector::new();
    http_connector.set_connect_timeout(Some(CONNECT_TIMEOUT));
    http_connector.set_nodelay(true);
    http_connector.enforce_http(false);

    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())?
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    Ok(Client::builder(TokioExecutor::new())
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .build(https_connector))
}
