//! Listener fan-in: many bound ports behind one `accept`.

use super::network::create_listener;
use crate::error::StartupError;
use futures::future::join_all;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ACCEPT_QUEUE: usize = 128;
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// An accepted TCP connection and where it came in.
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    /// Address of the listener that accepted the connection
    pub local: SocketAddr,
}

/// Merges the accept streams of several listeners.
///
/// Each listener runs its own accept task; connections from all of them are
/// delivered through [`ListenerFanIn::accept`] in arrival order.
#[derive(Debug)]
pub struct ListenerFanIn {
    local_addrs: Vec<SocketAddr>,
    receiver: mpsc::Receiver<io::Result<Accepted>>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ListenerFanIn {
    /// Bind every address. Fails on the first address that cannot be bound,
    /// releasing the ones bound before it.
    pub fn bind(addrs: &[SocketAddr]) -> Result<Self, StartupError> {
        let listeners = addrs
            .iter()
            .map(|&addr| {
                create_listener(addr).map_err(|source| StartupError::Bind { addr, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_listeners(listeners)
    }

    /// Fan in already bound listeners.
    pub fn from_listeners(listeners: Vec<TcpListener>) -> Result<Self, StartupError> {
        let (sender, receiver) = mpsc::channel(ACCEPT_QUEUE);
        let shutdown = CancellationToken::new();

        let mut local_addrs = Vec::with_capacity(listeners.len());
        let mut tasks = Vec::with_capacity(listeners.len());
        for listener in listeners {
            let local = listener.local_addr().map_err(|source| StartupError::Bind {
                addr: SocketAddr::from(([0, 0, 0, 0], 0)),
                source,
            })?;
            info!("Listening on {}", local);
            local_addrs.push(local);
            tasks.push(tokio::spawn(accept_loop(
                listener,
                local,
                sender.clone(),
                shutdown.clone(),
            )));
        }

        Ok(Self {
            local_addrs,
            receiver,
            shutdown,
            tasks,
        })
    }

    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Next connection from any listener, or an accept error from one of
    /// them. Returns `None` once the fan-in is closed.
    pub async fn accept(&mut self) -> Option<io::Result<Accepted>> {
        self.receiver.recv().await
    }

    /// Stop every listener. Connections queued but not yet accepted are
    /// dropped. Returns the last error seen while shutting the accept tasks
    /// down.
    pub async fn close(mut self) -> io::Result<()> {
        self.shutdown.cancel();
        self.receiver.close();

        let mut result = Ok(());
        for joined in join_all(self.tasks.drain(..)).await {
            if let Err(e) = joined {
                result = Err(io::Error::other(e));
            }
        }
        debug!("Closed {} listeners", self.local_addrs.len());
        result
    }
}

async fn accept_loop(
    listener: TcpListener,
    local: SocketAddr,
    sender: mpsc::Sender<io::Result<Accepted>>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let item = match accepted {
            Ok((stream, peer)) => Ok(Accepted {
                stream,
                peer,
                local,
            }),
            Err(e) => {
                warn!("Accept failed on {}: {}", local, e);
                Err(e)
            }
        };
        let failed = item.is_err();

        if sender.send(item).await.is_err() {
            break;
        }
        if failed {
            // Resource exhaustion (EMFILE) would otherwise spin.
            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
        }
    }
    debug!("Listener {} stopped", local);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_accepts_from_every_listener() {
        let mut fan_in = ListenerFanIn::bind(&[loopback(), loopback()]).unwrap();
        let addrs = fan_in.local_addrs().to_vec();
        assert_eq!(addrs.len(), 2);
        assert_ne!(addrs[0], addrs[1]);

        for addr in &addrs {
            let _client = TcpStream::connect(addr).await.unwrap();
            let accepted = fan_in.accept().await.unwrap().unwrap();
            assert_eq!(accepted.local, *addr);
        }

        fan_in.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_names_address() {
        let taken = ListenerFanIn::bind(&[loopback()]).unwrap();
        let addr = taken.local_addrs()[0];

        let err = ListenerFanIn::bind(&[loopback(), addr]).unwrap_err();
        match err {
            StartupError::Bind { addr: failed, .. } => assert_eq!(failed, addr),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_close_stops_listening() {
        let fan_in = ListenerFanIn::bind(&[loopback()]).unwrap();
        let addr = fan_in.local_addrs()[0];
        fan_in.close().await.unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
    }
}
