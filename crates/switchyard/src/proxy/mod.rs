//! Listening side of the gateway.
//!
//! - `network` - listener socket setup
//! - `fan_in` - one accept stream over many ports
//! - `demux` - HTTP vs catch-all classification of new connections
//! - `tls` - SNI certificate selection for the catch-all listener
//! - `server` - per-connection HTTP/1.1 serving and request dispatch

mod demux;
mod fan_in;
mod network;
mod server;
mod tls;

pub use demux::{
    classify, sniff, Classified, Demultiplexer, PeekedStream, Protocol, VirtualListener,
};
pub use fan_in::{Accepted, ListenerFanIn};
pub use network::create_listener;
pub use server::Gateway;
pub use tls::{create_tls_acceptor, load_certificate_pair, LoadedCertificate, SniCertResolver};
