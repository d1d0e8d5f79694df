#![allow(dead_code)]

use std::time::Duration;

use redic::{Address, Config};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// The handshake sent first on every connection, for the test config (no
/// auth, no client name).
pub const HELLO: &[u8] = b"*2\r\n$5\r\nHELLO\r\n$1\r\n3\r\n";
pub const HELLO_REPLY: &[u8] = b"%1\r\n$5\r\nproto\r\n:3\r\n";

/// A scripted stand-in for the server: accepts connections, verifies the
/// exact bytes the client writes, and plays back canned replies.
pub struct MockServer {
    listener: TcpListener,
}

impl MockServer {
    pub async fn bind() -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        MockServer { listener }
    }

    /// Connection parameters pointing at this mock, tuned so tests are not
    /// disturbed by health checks and reconnect fast.
    pub fn config(&self) -> Config {
        let addr = self.listener.local_addr().unwrap();
        Config {
            addr: Address {
                host: addr.ip().to_string(),
                port: addr.port(),
            },
            health_check_interval: Duration::from_secs(60),
            reconnect_wait_interval: Duration::from_millis(50),
            ..Config::default()
        }
    }

    /// Accept a connection and perform the handshake exchange.
    pub async fn accept(&self) -> MockConn {
        let mut conn = self.accept_raw().await;
        conn.expect(HELLO).await;
        conn.send(HELLO_REPLY).await;
        conn
    }

    /// Accept a connection without handshaking.
    pub async fn accept_raw(&self) -> MockConn {
        let (stream, _) = self.listener.accept().await.unwrap();
        MockConn { stream }
    }
}

pub struct MockConn {
    stream: TcpStream,
}

impl MockConn {
    /// Read exactly `expected.len()` bytes and assert they match, regardless
    /// of how the client chunked its writes.
    pub async fn expect(&mut self, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        self.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(
            buf,
            expected,
            "client sent {:?}, expected {:?}",
            String::from_utf8_lossy(&buf),
            String::from_utf8_lossy(expected)
        );
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Close the connection from the server side.
    pub async fn close(mut self) {
        self.stream.shutdown().await.unwrap();
    }
}

/// Serialized payload of a single-command request, for server-side expects.
pub fn payload_of(req: &redic::Request) -> Vec<u8> {
    req.payload().to_vec()
}
