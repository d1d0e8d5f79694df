use tokio::sync::{mpsc, oneshot};

use crate::adapter::{adapt_frame, Adapter, Cooked, ElementIndex, Feeder, Response};
use crate::config::Config;
use crate::error::Error;
use crate::node::{DataType, Node};
use crate::request::Request;
use crate::runner::{Engine, Runner};
use crate::transport::{Connector, TcpConnector};

/// Handle to a multiplexed connection.
///
/// The handle is cheap to clone and safe to share across tasks; all state
/// lives in the [`Runner`], which the caller spawns:
///
/// ```no_run
/// use redic::{Config, Connection, Request};
///
/// # async fn example() -> Result<(), redic::Error> {
/// let (conn, runner) = Connection::new(Config::default());
/// tokio::spawn(runner.run());
///
/// let mut req = Request::new();
/// req.push("SET", ("key", "value"));
/// req.push("GET", ("key",));
/// let (value, _) = conn.exec::<(String, Option<String>)>(req).await?;
/// assert_eq!(value.1.as_deref(), Some("value"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connection {
    ops: mpsc::UnboundedSender<EngineOp>,
}

impl Connection {
    /// A connection over plain TCP.
    pub fn new(config: Config) -> (Connection, Runner<TcpConnector>) {
        Connection::with_connector(config, TcpConnector)
    }

    /// A connection over a custom transport.
    pub fn with_connector<C: Connector>(config: Config, connector: C) -> (Connection, Runner<C>) {
        let (ops, rx) = mpsc::unbounded_channel();
        let runner = Runner::new(connector, Engine::new(config, rx));
        (Connection { ops }, runner)
    }

    /// Execute a request, reading its replies into `R`.
    ///
    /// Requests are written in submission order and demultiplexed in the same
    /// order. Completes with the populated destination and the number of
    /// reply bytes consumed.
    pub async fn exec<R: Response>(&self, request: Request) -> Result<(R, usize), Error> {
        let (tx, rx) = oneshot::channel();
        let adapter = TypedAdapter::<R>::new(tx);
        self.ops
            .send(EngineOp::Exec {
                request,
                adapter: Box::new(adapter),
            })
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::OperationCanceled)?
    }

    /// Receive the next server push frame, reading it into `R`.
    ///
    /// Pushes queue up to a fixed capacity; once it is full the connection
    /// stops reading until a frame is taken, so subscribers must call this in
    /// a loop.
    pub async fn read_push<R: Response>(&self) -> Result<(R, usize), Error> {
        let (tx, rx) = oneshot::channel();
        self.ops
            .send(EngineOp::ReadPush { tx })
            .map_err(|_| Error::NotConnected)?;
        let frame = rx.await.map_err(|_| Error::OperationCanceled)??;
        let value = adapt_frame::<R>(&frame.nodes).map_err(Error::Adapter)?;
        Ok((value, frame.bytes))
    }

    /// Close the connection.
    ///
    /// Idempotent. Every queued waiter fails with `OperationCanceled`, queued
    /// pushes are dropped, and the runner returns.
    pub fn cancel(&self) {
        let _ = self.ops.send(EngineOp::Cancel);
    }
}

/// Work posted from handles to the engine task.
pub(crate) enum EngineOp {
    Exec {
        request: Request,
        adapter: Box<dyn ReplyAdapter>,
    },
    ReadPush {
        tx: oneshot::Sender<Result<PushFrame, Error>>,
    },
    Cancel,
}

/// A fully parsed server push frame.
#[derive(Debug, Default)]
pub(crate) struct PushFrame {
    pub nodes: Vec<Node>,
    pub bytes: usize,
}

/// Type-erased reply consumer held by the engine per in-flight request.
pub(crate) trait ReplyAdapter: Send {
    /// Feed one node of the reply to command `command` of the pipeline.
    fn on_node(&mut self, command: usize, node: &Node);

    /// Resolve the waiter. `Ok` carries the bytes consumed; a failure
    /// recorded during `on_node` takes precedence over a success.
    fn complete(&mut self, result: Result<usize, Error>);
}

/// Bridges the engine's node stream to a typed destination adapter.
///
/// A type mismatch or a server error reply does not stop the engine from
/// draining the rest of the reply off the wire; the failure is recorded here
/// and delivered when the request completes, keeping the multiplexer aligned.
struct TypedAdapter<R: Response> {
    adapter: Option<R::Adapter>,
    feeder: Feeder,
    failure: Option<Error>,
    tx: Option<oneshot::Sender<Result<(R, usize), Error>>>,
}

impl<R: Response> TypedAdapter<R> {
    fn new(tx: oneshot::Sender<Result<(R, usize), Error>>) -> TypedAdapter<R> {
        TypedAdapter {
            adapter: Some(R::adapter()),
            feeder: Feeder::new(),
            failure: None,
            tx: Some(tx),
        }
    }
}

impl<R: Response> ReplyAdapter for TypedAdapter<R> {
    fn on_node(&mut self, command: usize, node: &Node) {
        if self.failure.is_some() {
            return;
        }
        let Cooked::Emit { element, node } =
            self.feeder.cook(<R::Adapter as Adapter>::RAW_NODES, node)
        else {
            return;
        };

        let is_error_reply = node.depth == 0
            && matches!(node.data_type, DataType::SimpleError | DataType::BlobError);
        if is_error_reply && !<R::Adapter as Adapter>::ERROR_AWARE {
            let message = String::from_utf8_lossy(&node.value).into_owned();
            self.failure = Some(Error::Server(message));
            return;
        }

        if let Some(adapter) = self.adapter.as_mut() {
            let index = ElementIndex::Reply { command, element };
            if let Err(err) = adapter.on_node(index, &node) {
                self.failure = Some(Error::Adapter(err));
            }
        }
    }

    fn complete(&mut self, result: Result<usize, Error>) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let outcome = match (result, self.failure.take(), self.adapter.take()) {
            (Err(err), _, _) => Err(err),
            (Ok(_), Some(err), _) => Err(err),
            (Ok(bytes), None, Some(adapter)) => adapter
                .finish()
                .map(|value| (value, bytes))
                .map_err(Error::Adapter),
            (Ok(_), None, None) => Err(Error::OperationCanceled),
        };
        let _ = tx.send(outcome);
    }
}

/// An in-flight request and its reply bookkeeping.
pub(crate) struct ReqInfo {
    pub request: Request,
    /// Replies not yet fully consumed.
    pub remaining: usize,
    /// Payload copied into the write staging buffer.
    pub staged: bool,
    /// Payload flushed to the stream.
    pub written: bool,
    pub bytes_read: usize,
    pub kind: ReqKind,
}

pub(crate) enum ReqKind {
    User(Box<dyn ReplyAdapter>),
    /// The protocol handshake; a server error here fails the session.
    Hello { error: Option<String> },
    /// Internal health check; the reply is absorbed.
    Ping,
}

impl ReqInfo {
    pub fn user(request: Request, adapter: Box<dyn ReplyAdapter>) -> ReqInfo {
        ReqInfo::with_kind(request, ReqKind::User(adapter))
    }

    pub fn hello(config: &Config) -> ReqInfo {
        ReqInfo::with_kind(Request::hello(config), ReqKind::Hello { error: None })
    }

    pub fn ping(config: &Config) -> ReqInfo {
        ReqInfo::with_kind(Request::ping(&config.health_check_id), ReqKind::Ping)
    }

    fn with_kind(request: Request, kind: ReqKind) -> ReqInfo {
        ReqInfo {
            remaining: request.expected_replies(),
            request,
            staged: false,
            written: false,
            bytes_read: 0,
            kind,
        }
    }

    pub fn expected(&self) -> usize {
        self.request.expected_replies()
    }

    pub fn is_hello(&self) -> bool {
        matches!(self.kind, ReqKind::Hello { .. })
    }

    pub fn is_user(&self) -> bool {
        matches!(self.kind, ReqKind::User(_))
    }

    /// A reply of this request was at least partially consumed.
    pub fn observed_reply(&self) -> bool {
        self.written && self.remaining < self.expected()
    }

    pub fn on_node(&mut self, node: &Node) {
        let command = self.expected() - self.remaining;
        match &mut self.kind {
            ReqKind::User(adapter) => adapter.on_node(command, node),
            ReqKind::Hello { error } => {
                let is_error_reply = node.depth == 0
                    && matches!(node.data_type, DataType::SimpleError | DataType::BlobError);
                if is_error_reply && error.is_none() {
                    *error = Some(String::from_utf8_lossy(&node.value).into_owned());
                }
            }
            ReqKind::Ping => {}
        }
    }

    pub fn succeed(&mut self) {
        if let ReqKind::User(adapter) = &mut self.kind {
            adapter.complete(Ok(self.bytes_read));
        }
    }

    pub fn fail(&mut self, err: Error) {
        if let ReqKind::User(adapter) = &mut self.kind {
            adapter.complete(Err(err));
        }
    }

    /// Make the request eligible for staging again after a reconnect.
    pub fn reset_for_replay(&mut self) {
        self.staged = false;
        self.written = false;
        self.bytes_read = 0;
        self.remaining = self.expected();
    }
}
