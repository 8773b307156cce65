//! Gateway header helpers.
//!
//! Static header names avoid runtime `.parse().unwrap()` calls at the
//! insertion sites.

use hyper::header::{HeaderName, HeaderValue};
use hyper::Response;

/// Sentinel header identifying traffic that passed through the gateway.
pub static X_SWITCHYARD_VERSION: HeaderName = HeaderName::from_static("x-switchyard-version");

pub static VALUE_CLOSE: HeaderValue = HeaderValue::from_static("close");

/// Extension trait for setting gateway headers on responses.
pub trait GatewayHeadersExt {
    /// Insert a header, replacing every existing value under that name.
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue);
}

impl<B> GatewayHeadersExt for Response<B> {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.headers_mut().insert(name.clone(), value.clone());
    }
}
