use std::time::Duration;

/// Address of the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Default for Address {
    fn default() -> Self {
        Address {
            host: "127.0.0.1".to_string(),
            port: 6379,
        }
    }
}

/// Parameters recognized by the connection.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address of the server.
    pub addr: Address,

    /// Username passed to the HELLO command. HELLO is sent without
    /// authentication when both username and password are empty.
    pub username: String,

    /// Password passed to the HELLO command.
    pub password: String,

    /// Client name set with HELLO SETNAME; omitted when empty.
    pub clientname: String,

    /// Payload of the periodic health check PING.
    pub health_check_id: String,

    /// Time the resolve step is allowed to take.
    pub resolve_timeout: Duration,

    /// Time the connect step is allowed to take.
    pub connect_timeout: Duration,

    /// Time a TLS handshake is allowed to take, for transports that
    /// perform one.
    pub ssl_handshake_timeout: Duration,

    /// Period of the health check PING. The connection is declared stalled
    /// when no data arrives for twice this interval.
    pub health_check_interval: Duration,

    /// Time waited before a reconnect attempt.
    pub reconnect_wait_interval: Duration,

    /// Hard cap on the bytes buffered by read operations.
    pub max_read_size: usize,

    /// Batch every queued request into a single write instead of flushing
    /// them one at a time.
    pub coalesce_requests: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            addr: Address::default(),
            username: String::new(),
            password: String::new(),
            clientname: String::new(),
            health_check_id: "redic".to_string(),
            resolve_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            ssl_handshake_timeout: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(2),
            reconnect_wait_interval: Duration::from_secs(1),
            max_read_size: usize::MAX,
            coalesce_requests: true,
        }
    }
}
