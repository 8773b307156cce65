use super::demux::{Classified, Demultiplexer};
use super::fan_in::ListenerFanIn;
use crate::headers::{GatewayHeadersExt, X_SWITCHYARD_VERSION};
use crate::pipeline::{error_response, GatewayBody, Pipeline, RequestContext};
use crate::rules::Router;
use http_body_util::BodyExt;
use hyper::header::HeaderValue;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The gateway: routes every request on every port through the rule table.
pub struct Gateway {
    router: Router,
    pipeline: Pipeline,
    tls_acceptor: Option<TlsAcceptor>,
    version: HeaderValue,
}

impl Gateway {
    pub fn new(
        router: Router,
        pipeline: Pipeline,
        tls_acceptor: Option<TlsAcceptor>,
        version: HeaderValue,
    ) -> Self {
        Self {
            router,
            pipeline,
            tls_acceptor,
            version,
        }
    }

    /// Serve connections from `fan_in` until `shutdown` fires.
    pub async fn run(self, fan_in: ListenerFanIn, shutdown: CancellationToken) {
        if self.router.is_empty() {
            warn!("No rules loaded, every request will be answered with a 500");
        } else {
            info!("Loaded {} rules", self.router.len());
        }
        if self.tls_acceptor.is_none() {
            warn!("No certificates configured, non-HTTP connections will be dropped");
        }

        let gateway = Arc::new(self);
        let (mut http, mut other, demux) = Demultiplexer::spawn(fan_in, shutdown.clone());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                conn = http.accept() => match conn {
                    Some(conn) => gateway.spawn_http(conn),
                    None => break,
                },
                conn = other.accept() => match conn {
                    Some(conn) => gateway.spawn_tls(conn),
                    None => break,
                },
            }
        }

        if let Err(e) = demux.await {
            error!("Demultiplexer task failed: {}", e);
        }
        info!("Gateway stopped");
    }

    fn spawn_http(self: &Arc<Self>, conn: Classified) {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            gateway.serve_connection(conn.stream, conn.peer).await;
        });
    }

    fn spawn_tls(self: &Arc<Self>, conn: Classified) {
        let Some(acceptor) = self.tls_acceptor.clone() else {
            debug!("Dropping non-HTTP connection from {}", conn.peer);
            return;
        };
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            match acceptor.accept(conn.stream).await {
                Ok(tls_stream) => gateway.serve_connection(tls_stream, conn.peer).await,
                Err(err) => warn!("TLS handshake failed from {}: {}", conn.peer, err),
            }
        });
    }

    async fn serve_connection<S>(self: Arc<Self>, stream: S, remote_addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = TokioIo::new(stream);
        let service = service_fn(move |req: Request<hyper::body::Incoming>| {
            let gateway = Arc::clone(&self);
            async move { gateway.handle_request(req.map(|body| body.boxed())).await }
        });

        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            debug!("Error serving connection from {}: {}", remote_addr, err);
        }
    }

    /// Route one request and run its pipeline. Every response carries the
    /// sentinel header exactly once.
    pub async fn handle_request(
        &self,
        req: Request<GatewayBody>,
    ) -> Result<Response<GatewayBody>, Infallible> {
        let mut response = match self.router.match_request(&req) {
            Some(handler) => {
                debug!(rule = handler.index, "Matched {} {}", req.method(), req.uri());
                let mut ctx = RequestContext::new(req);
                self.pipeline.execute(handler, &mut ctx).await;
                ctx.into_response()
            }
            None => {
                warn!("No rule matches {} {}", req.method(), req.uri());
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "no matching rule")
            }
        };

        response.set_header(&X_SWITCHYARD_VERSION, &self.version);
        Ok(response)
    }
}
