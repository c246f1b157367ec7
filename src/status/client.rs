// src/status/client.rs

//! Worker-side status poster.
//!
//! Connects lazily to a status service URI (TCP or Unix socket) and writes
//! one JSON line per message. Connection attempts retry with exponential
//! backoff: base 100 ms, factor 2, cap 10 s, at most 6 attempts, after
//! which posting fails with a [`TestdagError::Communication`] and the
//! worker gives up (the coordinator will synthesize an error result for
//! the missing `finished` message).

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, warn};

use crate::errors::{Result, TestdagError};
use crate::status::message::Message;
use crate::status::server::is_unix_uri;

const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 6;

enum Connection {
    Tcp(TcpStream),
    Unix(UnixStream),
}

/// A lazy connection to one status service endpoint.
pub struct StatusClient {
    uri: String,
    connection: Option<Connection>,
}

impl StatusClient {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            connection: None,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    async fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        let mut delay = BACKOFF_BASE;
        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let result = if is_unix_uri(&self.uri) {
                UnixStream::connect(&self.uri).await.map(Connection::Unix)
            } else {
                TcpStream::connect(&self.uri).await.map(Connection::Tcp)
            };
            match result {
                Ok(conn) => {
                    debug!(uri = %self.uri, attempt, "connected to status service");
                    self.connection = Some(conn);
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        uri = %self.uri,
                        attempt,
                        error = %e,
                        "status service connection failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(BACKOFF_CAP);
                }
            }
        }

        Err(TestdagError::Communication(format!(
            "could not reach status service at {} after {} attempts: {}",
            self.uri, MAX_ATTEMPTS, last_error
        )))
    }

    /// Post one message as a JSON line.
    pub async fn post(&mut self, msg: &Message) -> Result<()> {
        self.connect().await?;

        let mut line = msg.to_wire();
        line.push('\n');

        let write_result = match self.connection.as_mut() {
            Some(Connection::Tcp(stream)) => stream.write_all(line.as_bytes()).await,
            Some(Connection::Unix(stream)) => stream.write_all(line.as_bytes()).await,
            None => unreachable!("connect() establishes a connection or errors"),
        };

        write_result.map_err(|e| {
            // Drop the broken connection so the next post reconnects.
            self.connection = None;
            TestdagError::Communication(format!("posting to {}: {e}", self.uri))
        })
    }

    pub async fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            let _ = match conn {
                Connection::Tcp(mut s) => s.shutdown().await,
                Connection::Unix(mut s) => s.shutdown().await,
            };
        }
    }
}
