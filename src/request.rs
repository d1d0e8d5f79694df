use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use bytes::{BufMut, BytesMut};

use crate::config::Config;

/// Per-request behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestConfig {
    /// Re-send this request after a reconnect if no reply was observed for
    /// it. Off by default: a write whose idempotency is unknown fails with
    /// `not_connected` instead of being silently repeated.
    pub retry_on_disconnect: bool,
    /// When `false` the pipeline is fire-and-forget: no reply slots are
    /// reserved and the waiter completes once the bytes are flushed. Useful
    /// for the subscribe family, whose confirmations arrive as pushes.
    pub expects_response: bool,
    /// Marks the protocol handshake. Handshake requests are created
    /// internally and jump the queue on every (re)connect.
    pub hello: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        RequestConfig {
            retry_on_disconnect: false,
            expects_response: true,
            hello: false,
        }
    }
}

/// A pipeline of commands, serialized eagerly into wire format.
///
/// Commands accumulate into one byte payload; the server answers them in
/// order, one reply per command.
///
/// ```
/// use redic::Request;
///
/// let mut req = Request::new();
/// req.push("SET", ("key", "value", "EX", 2));
/// req.push("GET", ("key",));
/// assert_eq!(req.commands(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Request {
    payload: BytesMut,
    commands: usize,
    config: RequestConfig,
    // Scratch buffer for argument serialization, reused across pushes.
    scratch: Vec<u8>,
}

impl Request {
    pub fn new() -> Request {
        Request::default()
    }

    pub fn with_config(config: RequestConfig) -> Request {
        Request {
            config,
            ..Request::default()
        }
    }

    /// Append one command with a fixed set of arguments.
    pub fn push<A: Args>(&mut self, cmd: &str, args: A) {
        self.begin_command(1 + args.count());
        self.write_arg_raw(cmd.as_bytes());
        args.write(self);
        self.commands += 1;
    }

    /// Append one command whose arguments come from a container, with an
    /// optional leading key. Pair-shaped containers (maps, slices of pairs)
    /// contribute two arguments per entry, flat containers one per element.
    pub fn push_range<R: RangeArgs>(&mut self, cmd: &str, key: Option<&str>, range: R) {
        let arity = 1 + usize::from(key.is_some()) + range.count();
        self.begin_command(arity);
        self.write_arg_raw(cmd.as_bytes());
        if let Some(key) = key {
            self.write_arg_raw(key.as_bytes());
        }
        range.write(self);
        self.commands += 1;
    }

    /// Number of commands pushed so far.
    pub fn commands(&self) -> usize {
        self.commands
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    /// Replies the server will send for this pipeline.
    pub(crate) fn expected_replies(&self) -> usize {
        if self.config.expects_response {
            self.commands
        } else {
            0
        }
    }

    /// The handshake sent first on every (re)connect: `HELLO 3`, with
    /// authentication and a client name when configured.
    pub(crate) fn hello(config: &Config) -> Request {
        let mut req = Request::with_config(RequestConfig {
            retry_on_disconnect: false,
            expects_response: true,
            hello: true,
        });
        let auth = !config.username.is_empty() || !config.password.is_empty();
        match (auth, config.clientname.is_empty()) {
            (false, true) => req.push("HELLO", ("3",)),
            (false, false) => req.push("HELLO", ("3", "SETNAME", config.clientname.as_str())),
            (true, true) => req.push(
                "HELLO",
                (
                    "3",
                    "AUTH",
                    config.username.as_str(),
                    config.password.as_str(),
                ),
            ),
            (true, false) => req.push(
                "HELLO",
                (
                    "3",
                    "AUTH",
                    config.username.as_str(),
                    config.password.as_str(),
                    "SETNAME",
                    config.clientname.as_str(),
                ),
            ),
        }
        req
    }

    /// The health check probe; its reply is absorbed by the connection.
    pub(crate) fn ping(id: &str) -> Request {
        let mut req = Request::new();
        req.push("PING", (id,));
        req
    }

    fn begin_command(&mut self, arity: usize) {
        self.payload.put_u8(b'*');
        self.payload
            .extend_from_slice(arity.to_string().as_bytes());
        self.payload.extend_from_slice(b"\r\n");
    }

    fn write_arg_raw(&mut self, bytes: &[u8]) {
        self.payload.put_u8(b'$');
        self.payload
            .extend_from_slice(bytes.len().to_string().as_bytes());
        self.payload.extend_from_slice(b"\r\n");
        self.payload.extend_from_slice(bytes);
        self.payload.extend_from_slice(b"\r\n");
    }

    fn write_arg<T: ToBytes + ?Sized>(&mut self, arg: &T) {
        self.scratch.clear();
        arg.write_bytes(&mut self.scratch);
        // Move the scratch out so the borrow checker lets us write into the
        // payload while the serialized argument is alive.
        let scratch = std::mem::take(&mut self.scratch);
        self.write_arg_raw(&scratch);
        self.scratch = scratch;
    }
}

/// Serialization of a single command argument.
///
/// Implement this for your own types to send them directly:
///
/// ```
/// use redic::request::ToBytes;
///
/// struct Meters(f64);
///
/// impl ToBytes for Meters {
///     fn write_bytes(&self, buf: &mut Vec<u8>) {
///         buf.extend_from_slice(format!("{}m", self.0).as_bytes());
///     }
/// }
/// ```
pub trait ToBytes {
    fn write_bytes(&self, buf: &mut Vec<u8>);
}

impl ToBytes for str {
    fn write_bytes(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }
}

impl ToBytes for String {
    fn write_bytes(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }
}

impl ToBytes for [u8] {
    fn write_bytes(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }
}

impl ToBytes for Vec<u8> {
    fn write_bytes(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }
}

impl ToBytes for bytes::Bytes {
    fn write_bytes(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }
}

impl<T: ToBytes + ?Sized> ToBytes for &T {
    fn write_bytes(&self, buf: &mut Vec<u8>) {
        (*self).write_bytes(buf);
    }
}

macro_rules! to_bytes_via_display {
    ($($t:ty),*) => {$(
        impl ToBytes for $t {
            fn write_bytes(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(self.to_string().as_bytes());
            }
        }
    )*};
}

to_bytes_via_display!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

/// A fixed tuple of command arguments, up to arity eight.
pub trait Args {
    fn count(&self) -> usize;
    fn write(&self, req: &mut Request);
}

impl Args for () {
    fn count(&self) -> usize {
        0
    }
    fn write(&self, _req: &mut Request) {}
}

macro_rules! tuple_args {
    ($($name:ident . $idx:tt),+ ; $len:expr) => {
        impl<$($name: ToBytes),+> Args for ($($name,)+) {
            fn count(&self) -> usize {
                $len
            }
            fn write(&self, req: &mut Request) {
                $(req.write_arg(&self.$idx);)+
            }
        }
    };
}

tuple_args!(A.0; 1);
tuple_args!(A.0, B.1; 2);
tuple_args!(A.0, B.1, C.2; 3);
tuple_args!(A.0, B.1, C.2, D.3; 4);
tuple_args!(A.0, B.1, C.2, D.3, E.4; 5);
tuple_args!(A.0, B.1, C.2, D.3, E.4, F.5; 6);
tuple_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6; 7);
tuple_args!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7; 8);

/// A container of command arguments for [`Request::push_range`].
pub trait RangeArgs {
    /// Arguments this container contributes to the command arity.
    fn count(&self) -> usize;
    fn write(&self, req: &mut Request);
}

impl<T: ToBytes> RangeArgs for &[T] {
    fn count(&self) -> usize {
        self.len()
    }
    fn write(&self, req: &mut Request) {
        for item in self.iter() {
            req.write_arg(item);
        }
    }
}

impl<T: ToBytes> RangeArgs for &Vec<T> {
    fn count(&self) -> usize {
        self.len()
    }
    fn write(&self, req: &mut Request) {
        self.as_slice().write(req);
    }
}

impl<T: ToBytes, const N: usize> RangeArgs for &[T; N] {
    fn count(&self) -> usize {
        N
    }
    fn write(&self, req: &mut Request) {
        self.as_slice().write(req);
    }
}

impl<T: ToBytes> RangeArgs for &HashSet<T> {
    fn count(&self) -> usize {
        self.len()
    }
    fn write(&self, req: &mut Request) {
        for item in self.iter() {
            req.write_arg(item);
        }
    }
}

impl<T: ToBytes> RangeArgs for &BTreeSet<T> {
    fn count(&self) -> usize {
        self.len()
    }
    fn write(&self, req: &mut Request) {
        for item in self.iter() {
            req.write_arg(item);
        }
    }
}

impl<K: ToBytes, V: ToBytes> RangeArgs for &[(K, V)] {
    fn count(&self) -> usize {
        self.len() * 2
    }
    fn write(&self, req: &mut Request) {
        for (key, value) in self.iter() {
            req.write_arg(key);
            req.write_arg(value);
        }
    }
}

impl<K: ToBytes, V: ToBytes> RangeArgs for &HashMap<K, V> {
    fn count(&self) -> usize {
        self.len() * 2
    }
    fn write(&self, req: &mut Request) {
        for (key, value) in self.iter() {
            req.write_arg(key);
            req.write_arg(value);
        }
    }
}

impl<K: ToBytes, V: ToBytes> RangeArgs for &BTreeMap<K, V> {
    fn count(&self) -> usize {
        self.len() * 2
    }
    fn write(&self, req: &mut Request) {
        for (key, value) in self.iter() {
            req.write_arg(key);
            req.write_arg(value);
        }
    }
}
