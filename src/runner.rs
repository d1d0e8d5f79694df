use std::collections::VecDeque;
use std::fmt;
use std::pin::pin;
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, timeout, Instant as TokioInstant};
use tokio_util::codec::Decoder;
use tracing::{debug, info, instrument, warn};

use crate::codec::NodeCodec;
use crate::config::Config;
use crate::connection::{EngineOp, PushFrame, ReplyAdapter, ReqInfo, ReqKind};
use crate::error::Error;
use crate::node::DataType;
use crate::parser::ProtocolError;
use crate::request::Request;
use crate::transport::Connector;

/// Push frames buffered before the reader stops consuming the stream.
const PUSH_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Resolving,
    Connecting,
    Handshaking,
    Running,
    Draining,
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Where the nodes of the tree currently being decoded go.
enum Route {
    /// To the adapter of the head-of-queue request.
    Head,
    /// Collected into a push frame.
    Frame,
    /// Nowhere; an unsolicited attribute frame.
    Discard,
}

enum SessionEnd {
    Reconnect,
    Shutdown,
}

/// Drives a [`Connection`](crate::Connection): resolves, connects, performs
/// the handshake, multiplexes requests and pushes, runs the health checks,
/// and reconnects after failures until cancelled.
pub struct Runner<C: Connector> {
    connector: C,
    engine: Engine,
}

impl<C: Connector> Runner<C> {
    pub(crate) fn new(connector: C, engine: Engine) -> Runner<C> {
        Runner { connector, engine }
    }

    /// Run the connection until it is cancelled or every handle is dropped.
    ///
    /// Connection failures are not fatal: the runner waits
    /// `reconnect_wait_interval` and starts over, replaying retained
    /// requests.
    #[instrument(name = "connection", skip(self), fields(addr))]
    pub async fn run(mut self) -> Result<(), Error> {
        tracing::Span::current().record(
            "addr",
            format!("{}:{}", self.engine.config.addr.host, self.engine.config.addr.port),
        );

        loop {
            match self.establish().await {
                Ok(Some(stream)) => {
                    info!("connected");
                    if let SessionEnd::Shutdown = self.engine.session(stream).await {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(SessionEnd::Shutdown) => return Ok(()),
                Err(SessionEnd::Reconnect) => unreachable!(),
            }
            if let SessionEnd::Shutdown = self.engine.wait_reconnect().await {
                return Ok(());
            }
        }
    }

    /// Resolve and connect, processing submissions throughout.
    ///
    /// `Ok(None)` means the attempt failed and a reconnect wait should
    /// follow; `Err` means the connection was cancelled.
    async fn establish(&mut self) -> Result<Option<C::Stream>, SessionEnd> {
        let host = self.engine.config.addr.host.clone();
        let port = self.engine.config.addr.port;

        self.engine.set_state(State::Resolving);
        let endpoints = {
            let mut resolve = pin!(timeout(
                self.engine.config.resolve_timeout,
                self.connector.resolve(&host, port),
            ));
            loop {
                tokio::select! {
                    result = &mut resolve => break result,
                    op = self.engine.ops.recv() => self.engine.handle_op_disconnected(op)?,
                }
            }
        };
        let endpoints = match endpoints {
            Ok(Ok(endpoints)) => endpoints,
            Ok(Err(err)) => {
                warn!("resolve failed: {err}");
                return Ok(None);
            }
            Err(_) => {
                warn!("{}", Error::ResolveTimeout);
                return Ok(None);
            }
        };
        if endpoints.is_empty() {
            warn!("resolver returned no endpoints for {host}");
            return Ok(None);
        }

        self.engine.set_state(State::Connecting);
        let stream = {
            let connector = &mut self.connector;
            let mut connect = pin!(timeout(self.engine.config.connect_timeout, async move {
                let mut last_err = None;
                for addr in endpoints {
                    match connector.connect(addr).await {
                        Ok(stream) => return Ok(stream),
                        Err(err) => last_err = Some(err),
                    }
                }
                Err(last_err.expect("resolver returned at least one endpoint"))
            }));
            loop {
                tokio::select! {
                    result = &mut connect => break result,
                    op = self.engine.ops.recv() => self.engine.handle_op_disconnected(op)?,
                }
            }
        };
        match stream {
            Ok(Ok(stream)) => Ok(Some(stream)),
            Ok(Err(err)) => {
                warn!("connect failed: {err}");
                Ok(None)
            }
            Err(_) => {
                warn!("{}", Error::ConnectTimeout);
                Ok(None)
            }
        }
    }
}

/// The connection engine: a single cooperative task owning every piece of
/// mutable state, fed through the ops channel. No locks anywhere.
pub(crate) struct Engine {
    config: Config,
    ops: mpsc::UnboundedReceiver<EngineOp>,
    /// FIFO of submitted requests; the front is the one whose replies are
    /// being consumed.
    reqs: VecDeque<ReqInfo>,
    pushes: VecDeque<PushFrame>,
    push_waiters: VecDeque<oneshot::Sender<Result<PushFrame, Error>>>,
    state: State,
}

impl Engine {
    pub(crate) fn new(config: Config, ops: mpsc::UnboundedReceiver<EngineOp>) -> Engine {
        Engine {
            config,
            ops,
            reqs: VecDeque::new(),
            pushes: VecDeque::new(),
            push_waiters: VecDeque::new(),
            state: State::Idle,
        }
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!("state {} -> {}", self.state, state);
            self.state = state;
        }
    }

    /// One connected session: handshake, then multiplex until the stream or
    /// the health checks fail.
    async fn session<S>(&mut self, stream: S) -> SessionEnd
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut read_buf = BytesMut::with_capacity(4096);
        let mut codec = NodeCodec::new(self.config.max_read_size);

        // Write side: one staged batch at a time.
        let mut staging = BytesMut::new();
        let mut flushed = 0usize;
        let mut in_flight = 0usize;

        // Read side: routing of the tree currently being decoded.
        let mut route: Option<Route> = None;
        let mut root = DataType::Null;
        let mut push_acc: Option<PushFrame> = None;
        let mut pending_push: Option<PushFrame> = None;
        let mut last_data = Instant::now();

        let period = self.config.health_check_interval;
        let mut ping_timer = interval_at(TokioInstant::now() + period, period);
        let mut idle_timer = interval_at(TokioInstant::now() + period, period);

        self.set_state(State::Handshaking);
        self.reqs.push_front(ReqInfo::hello(&self.config));
        self.stage(&mut staging, in_flight);

        loop {
            // Drain everything decodable before suspending. Stops while a
            // push frame waits for queue capacity; responses stall with it.
            while pending_push.is_none() {
                let before = read_buf.len();
                let node = match codec.decode(&mut read_buf) {
                    Ok(Some(node)) => node,
                    Ok(None) => break,
                    Err(err) => {
                        let mid_reply = matches!(route, Some(Route::Head));
                        return self.teardown(Error::Protocol(err), mid_reply);
                    }
                };
                let consumed = before - read_buf.len();

                if node.depth == 0 {
                    root = node.data_type;
                    let head_waiting = self
                        .reqs
                        .front()
                        .map(|req| req.written && req.remaining > 0)
                        .unwrap_or(false);
                    route = Some(if node.data_type == DataType::Push {
                        push_acc = Some(PushFrame::default());
                        Route::Frame
                    } else if head_waiting {
                        Route::Head
                    } else if node.data_type == DataType::Attribute {
                        Route::Discard
                    } else {
                        // An unsolicited reply, e.g. a server notice sent
                        // with an empty queue. Handled like a push.
                        debug!("unsolicited {} reply treated as push", node.data_type);
                        push_acc = Some(PushFrame::default());
                        Route::Frame
                    });
                }

                match route {
                    Some(Route::Head) => {
                        let req = self.reqs.front_mut().expect("head request present");
                        req.bytes_read += consumed;
                        req.on_node(&node);
                    }
                    Some(Route::Frame) => {
                        let acc = push_acc.as_mut().expect("push frame accumulator");
                        acc.bytes += consumed;
                        acc.nodes.push(node);
                    }
                    Some(Route::Discard) => {}
                    None => unreachable!("nodes only arrive inside a tree"),
                }

                if codec.depth() > 0 {
                    continue;
                }
                // A top-level tree completed.
                match route.take() {
                    Some(Route::Frame) => {
                        let frame = push_acc.take().expect("push frame accumulator");
                        self.deliver_push(frame, &mut pending_push);
                    }
                    Some(Route::Head) if root != DataType::Attribute => {
                        in_flight -= 1;
                        let req = self.reqs.front_mut().expect("head request present");
                        req.remaining -= 1;
                        if req.remaining == 0 {
                            let mut req = self.reqs.pop_front().expect("head request present");
                            match &req.kind {
                                ReqKind::Hello { error: Some(msg) } => {
                                    let msg = msg.clone();
                                    return self.teardown(Error::HandshakeFailed(msg), false);
                                }
                                ReqKind::Hello { error: None } => {
                                    self.set_state(State::Running);
                                }
                                _ => req.succeed(),
                            }
                            if in_flight == 0 && staging.is_empty() {
                                self.stage(&mut staging, in_flight);
                            }
                        }
                    }
                    _ => {}
                }
            }

            tokio::select! {
                op = self.ops.recv() => match op {
                    None | Some(EngineOp::Cancel) => {
                        self.cancel_all();
                        return SessionEnd::Shutdown;
                    }
                    Some(EngineOp::Exec { request, adapter }) => {
                        self.enqueue_exec(request, adapter);
                        if in_flight == 0 && staging.is_empty() {
                            self.stage(&mut staging, in_flight);
                        }
                    }
                    Some(EngineOp::ReadPush { tx }) => {
                        self.serve_push_waiter(tx, &mut pending_push);
                    }
                },
                result = writer.write(&staging[flushed..]), if flushed < staging.len() => {
                    match result {
                        Ok(0) => {
                            let mid_reply = matches!(route, Some(Route::Head));
                            return self.teardown(Error::NotConnected, mid_reply);
                        }
                        Ok(n) => {
                            flushed += n;
                            if flushed == staging.len() {
                                in_flight += self.on_write();
                                staging.clear();
                                flushed = 0;
                                if in_flight == 0 {
                                    self.stage(&mut staging, in_flight);
                                }
                            }
                        }
                        Err(err) => {
                            let mid_reply = matches!(route, Some(Route::Head));
                            return self.teardown(err.into(), mid_reply);
                        }
                    }
                },
                result = reader.read_buf(&mut read_buf), if pending_push.is_none() => match result {
                    Ok(0) => {
                        let cause = if codec.depth() > 0 || !read_buf.is_empty() {
                            Error::Protocol(ProtocolError::UnexpectedEof)
                        } else {
                            Error::NotConnected
                        };
                        let mid_reply = matches!(route, Some(Route::Head));
                        return self.teardown(cause, mid_reply);
                    }
                    Ok(_) => last_data = Instant::now(),
                    Err(err) => {
                        let mid_reply = matches!(route, Some(Route::Head));
                        return self.teardown(err.into(), mid_reply);
                    }
                },
                _ = ping_timer.tick() => {
                    if self.reqs.is_empty() && in_flight == 0 {
                        self.reqs.push_back(ReqInfo::ping(&self.config));
                        if staging.is_empty() {
                            self.stage(&mut staging, in_flight);
                        }
                    }
                },
                _ = idle_timer.tick() => {
                    if last_data.elapsed() > 2 * period {
                        warn!("no data for {:?}, declaring the connection stalled", last_data.elapsed());
                        let mid_reply = matches!(route, Some(Route::Head));
                        return self.teardown(Error::IdleTimeout, mid_reply);
                    }
                },
            }
        }
    }

    /// Copy queued payloads into the staging buffer. Only called between
    /// batches: a request submitted while a flush is in progress rides the
    /// next one.
    fn stage(&mut self, staging: &mut BytesMut, in_flight: usize) {
        debug_assert!(staging.is_empty() && in_flight == 0);
        let batch = if self.config.coalesce_requests {
            self.reqs.len()
        } else {
            1
        };
        for req in self.reqs.iter_mut().take(batch) {
            debug_assert!(!req.staged);
            req.staged = true;
            staging.extend_from_slice(req.request.payload());
        }
    }

    /// Bookkeeping after a staged batch was fully flushed. Returns the
    /// number of replies now in flight; fire-and-forget requests complete
    /// here.
    fn on_write(&mut self) -> usize {
        let mut replies = 0;
        for req in self.reqs.iter_mut() {
            if req.staged && !req.written {
                req.written = true;
                replies += req.expected();
            }
        }
        self.reqs.retain_mut(|req| {
            if req.written && req.expected() == 0 {
                req.succeed();
                return false;
            }
            true
        });
        replies
    }

    fn enqueue_exec(&mut self, request: Request, adapter: Box<dyn ReplyAdapter>) {
        let mut req = ReqInfo::user(request, adapter);
        // Nothing to write and nothing to wait for.
        if req.request.payload().is_empty() {
            req.succeed();
            return;
        }
        self.reqs.push_back(req);
    }

    /// Hand a completed push frame to a waiter, the queue, or park it; a
    /// parked frame stalls the reader until someone calls `read_push`.
    fn deliver_push(&mut self, frame: PushFrame, pending_push: &mut Option<PushFrame>) {
        let mut frame = Some(frame);
        while let Some(waiter) = self.push_waiters.pop_front() {
            match waiter.send(Ok(frame.take().expect("frame still undelivered"))) {
                Ok(()) => return,
                // Receiver gave up; try the next waiter.
                Err(Ok(returned)) => frame = Some(returned),
                Err(Err(_)) => unreachable!(),
            }
        }
        let frame = frame.expect("frame still undelivered");
        if self.pushes.len() < PUSH_QUEUE_CAPACITY {
            self.pushes.push_back(frame);
        } else {
            debug!("push queue full, pausing reads until it drains");
            *pending_push = Some(frame);
        }
    }

    fn serve_push_waiter(
        &mut self,
        tx: oneshot::Sender<Result<PushFrame, Error>>,
        pending_push: &mut Option<PushFrame>,
    ) {
        if let Some(frame) = self.pushes.pop_front() {
            let _ = tx.send(Ok(frame));
            // A parked frame can take the freed slot.
            if let Some(parked) = pending_push.take() {
                self.pushes.push_back(parked);
            }
        } else if let Some(parked) = pending_push.take() {
            let _ = tx.send(Ok(parked));
        } else {
            self.push_waiters.push_back(tx);
        }
    }

    /// Close the session and sort the queue: partially consumed requests
    /// fail, replayable ones are retained in order, the rest fail with the
    /// cause.
    fn teardown(&mut self, cause: Error, mid_reply: bool) -> SessionEnd {
        warn!("session ended: {cause}");
        self.set_state(State::Draining);

        let mut head = true;
        let mut retained = VecDeque::new();
        for mut req in std::mem::take(&mut self.reqs) {
            let partial = req.observed_reply() || (head && mid_reply && req.written);
            head = false;
            if partial {
                req.fail(Error::ReadInterrupted);
            } else if req.is_hello() {
                // A fresh handshake is prepended on reconnect.
            } else if req.is_user() && req.request.config().retry_on_disconnect {
                req.reset_for_replay();
                retained.push_back(req);
            } else {
                req.fail(cause.clone());
            }
        }
        self.reqs = retained;
        SessionEnd::Reconnect
    }

    /// Back off before the next connection attempt, still serving
    /// submissions and cancellation.
    async fn wait_reconnect(&mut self) -> SessionEnd {
        self.set_state(State::Draining);
        let mut sleep = pin!(tokio::time::sleep(self.config.reconnect_wait_interval));
        loop {
            tokio::select! {
                _ = &mut sleep => return SessionEnd::Reconnect,
                op = self.ops.recv() => {
                    if self.handle_op_disconnected(op).is_err() {
                        return SessionEnd::Shutdown;
                    }
                }
            }
        }
    }

    /// Serve an op while no stream is up. Submissions queue for the next
    /// session.
    fn handle_op_disconnected(&mut self, op: Option<EngineOp>) -> Result<(), SessionEnd> {
        match op {
            None | Some(EngineOp::Cancel) => {
                self.cancel_all();
                Err(SessionEnd::Shutdown)
            }
            Some(EngineOp::Exec { request, adapter }) => {
                self.enqueue_exec(request, adapter);
                Ok(())
            }
            Some(EngineOp::ReadPush { tx }) => {
                self.serve_push_waiter(tx, &mut None);
                Ok(())
            }
        }
    }

    fn cancel_all(&mut self) {
        info!("connection closed");
        for mut req in std::mem::take(&mut self.reqs) {
            req.fail(Error::OperationCanceled);
        }
        self.pushes.clear();
        for waiter in std::mem::take(&mut self.push_waiters) {
            let _ = waiter.send(Err(Error::OperationCanceled));
        }
        self.set_state(State::Closed);
    }
}
