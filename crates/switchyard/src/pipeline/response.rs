//! Response construction helpers shared by actions and the server loop.

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Response, StatusCode};
use std::convert::Infallible;

/// Body type of every request and response handled by the gateway.
pub type GatewayBody = BoxBody<Bytes, hyper::Error>;

/// Extension trait for `Response<Full<Bytes>>` providing common transformations.
pub trait ResponseExt {
    /// Box the body so the response can be returned from a gateway handler.
    fn into_boxed(self) -> Response<GatewayBody>;
}

impl ResponseExt for Response<Full<Bytes>> {
    fn into_boxed(self) -> Response<GatewayBody> {
        self.map(|b| BoxBody::new(b.map_err(|never: Infallible| match never {})))
    }
}

pub fn empty_body() -> GatewayBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed()
}

#[cfg(test)]
pub(crate) fn full_body(data: impl Into<Bytes>) -> GatewayBody {
    Full::new(data.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

/// Response with a fixed content type and a complete body.
pub fn content_response(content_type: &str, body: impl Into<Bytes>) -> Response<GatewayBody> {
    let mut response = Response::new(Full::new(body.into())).into_boxed();
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

/// `application/json` response carrying `literal` byte-for-byte.
pub fn json_response(literal: &str) -> Response<GatewayBody> {
    content_response("application/json", literal.to_string())
}

/// Gateway-generated error response with a small JSON body.
pub fn error_response(status: StatusCode, message: &str) -> Response<GatewayBody> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = content_response("application/json", body);
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_string(response: Response<GatewayBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_into_boxed_preserves_status_and_headers() {
        let response = Response::builder()
            .status(404)
            .header("X-Custom", "value")
            .body(Full::new(Bytes::from("not found")))
            .unwrap();

        let boxed = response.into_boxed();
        assert_eq!(boxed.status(), 404);
        assert_eq!(boxed.headers().get("x-custom").unwrap(), "value");
    }

    #[tokio::test]
    async fn test_json_response_is_verbatim() {
        let literal = r#"{ "a" : [1, 2] }"#;
        let response = json_response(literal);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(body_string(response).await, literal);
    }

    #[tokio::test]
    async fn test_json_response_does_not_validate() {
        let response = json_response("not json");
        assert_eq!(body_string(response).await, "not json");
    }

    #[tokio::test]
    async fn test_error_response_escapes_message() {
        let response = error_response(StatusCode::INTERNAL_SERVER_ERROR, r#"bad "quote""#);
        assert_eq!(response.status(), 500);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["error"], r#"bad "quote""#);
    }

    #[tokio::test]
    async fn test_empty_body_has_no_data() {
        let response = Response::new(empty_body());
        assert_eq!(body_string(response).await, "");
    }
}
