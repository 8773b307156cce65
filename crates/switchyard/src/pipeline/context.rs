//! Per-request state carried through an action pipeline.

use super::response::{empty_body, error_response, GatewayBody};
use crate::headers::VALUE_CLOSE;
use hyper::header::CONNECTION;
use hyper::{HeaderMap, Request, Response, StatusCode};
use std::mem;
use tracing::debug;

/// Response being assembled for the client.
#[derive(Debug)]
struct ResponseSink {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<GatewayBody>,
}

impl Default for ResponseSink {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// The inbound request plus the response sink, threaded through the steps of
/// one pipeline run. Exclusively owned by the task serving the request.
#[derive(Debug)]
pub struct RequestContext {
    request: Request<GatewayBody>,
    sink: ResponseSink,
    finished: bool,
}

impl RequestContext {
    pub fn new(request: Request<GatewayBody>) -> Self {
        Self {
            request,
            sink: ResponseSink::default(),
            finished: false,
        }
    }

    pub fn request(&self) -> &Request<GatewayBody> {
        &self.request
    }

    /// Take the request body, leaving an empty one behind. A body can be
    /// consumed once; later steps see an empty body.
    pub fn take_body(&mut self) -> GatewayBody {
        mem::replace(self.request.body_mut(), empty_body())
    }

    /// Headers written to the client response so far.
    #[cfg(test)]
    pub(crate) fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.sink.headers
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Commit `response` to the client. Headers are appended to those already
    /// accumulated. Returns false, dropping the response, if the context was
    /// already finished.
    pub fn finish(&mut self, response: Response<GatewayBody>) -> bool {
        if self.finished {
            debug!("Response already committed, dropping later response");
            return false;
        }

        let (parts, body) = response.into_parts();
        self.sink.status = parts.status;
        let mut last_name = None;
        for (name, value) in parts.headers {
            // HeaderMap yields None for repeated values of the same name
            if let Some(name) = name {
                last_name = Some(name);
            }
            if let Some(name) = &last_name {
                self.sink.headers.append(name.clone(), value);
            }
        }
        self.sink.body = Some(body);
        self.finished = true;
        true
    }

    /// Finish with a gateway-generated 500.
    pub fn fail(&mut self, message: &str) -> bool {
        self.finish(error_response(StatusCode::INTERNAL_SERVER_ERROR, message))
    }

    /// Turn the context into the response sent to the client.
    ///
    /// A pipeline that ended without finishing commits whatever was
    /// accumulated (status 200 unless set, empty body) and asks the client
    /// to close the connection.
    pub fn into_response(self) -> Response<GatewayBody> {
        let finished = self.finished;
        let ResponseSink {
            status,
            headers,
            body,
        } = self.sink;

        let mut response = Response::new(body.unwrap_or_else(empty_body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        if !finished {
            response
                .headers_mut()
                .insert(CONNECTION, VALUE_CLOSE.clone());
        }
        response
    }
}
