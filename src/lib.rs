//! Asynchronous RESP3 client core.
//!
//! The crate provides the plumbing a client needs to talk to a RESP3 server
//! over a long-lived connection:
//!
//! - a streaming wire codec ([`parser`], [`codec`]) that decodes the
//!   self-describing reply format into a flat node stream,
//! - an adapter layer ([`adapter`]) that binds that stream to caller-chosen
//!   destinations: integers, strings, options, vectors, maps, sets, tuples,
//!   or raw nodes,
//! - a pipelined request model ([`request`]),
//! - a multiplexed connection engine ([`connection`], [`runner`]) that
//!   batches writes, demultiplexes replies in FIFO order, routes server
//!   pushes to a separate queue, health-checks the peer, and reconnects with
//!   request replay.
//!
//! ```no_run
//! use redic::{Config, Connection, Request};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), redic::Error> {
//!     let (conn, runner) = Connection::new(Config::default());
//!     tokio::spawn(runner.run());
//!
//!     let mut req = Request::new();
//!     req.push("PING", ());
//!     let (pong, _) = conn.exec::<String>(req).await?;
//!     println!("{pong}");
//!
//!     conn.cancel();
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod node;
pub mod parser;
pub mod request;
pub mod runner;
pub mod transport;

pub use adapter::{Adapter, AdapterError, ElementIndex, FromBytes, Ignore, Response};
pub use config::{Address, Config};
pub use connection::Connection;
pub use error::Error;
pub use node::{DataType, Node};
pub use parser::ProtocolError;
pub use request::{Request, RequestConfig};
pub use runner::Runner;
pub use transport::{Connector, TcpConnector};

pub type Result<T> = std::result::Result<T, Error>;
