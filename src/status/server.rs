// src/status/server.rs

//! Newline-delimited-JSON status service.
//!
//! Workers connect over TCP (`host:port`) or a Unix-domain socket (absolute
//! path) and write one JSON message object per line. Every connection is
//! read by its own task, but all parsed messages are funneled through one
//! mpsc channel into a single ingest task, which is the only writer of the
//! status repository.
//!
//! Malformed lines are dropped with an audit log entry; they never abort
//! the coordinator.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{Result, TestdagError};
use crate::status::message::Message;
use crate::status::repo::StatusRepo;

enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// The status service endpoint.
pub struct StatusServer {
    listener: Listener,
    local_uri: String,
    repo: Arc<Mutex<StatusRepo>>,
    cancel: CancellationToken,
}

/// Whether a status URI names a Unix-domain socket (absolute path) rather
/// than a TCP `host:port`.
pub fn is_unix_uri(uri: &str) -> bool {
    uri.starts_with('/')
}

impl StatusServer {
    /// Bind the service to `uri`.
    ///
    /// TCP URIs may use port 0; the effective address is then available via
    /// [`StatusServer::local_uri`].
    pub async fn bind(
        uri: &str,
        repo: Arc<Mutex<StatusRepo>>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        if is_unix_uri(uri) {
            // A stale socket file from a previous job would fail the bind.
            let _ = std::fs::remove_file(uri);
            let listener = UnixListener::bind(uri)
                .map_err(|e| TestdagError::Communication(format!("bind {uri}: {e}")))?;
            info!(uri = %uri, "status service listening on unix socket");
            Ok(Self {
                listener: Listener::Unix(listener),
                local_uri: uri.to_string(),
                repo,
                cancel,
            })
        } else {
            let listener = TcpListener::bind(uri)
                .await
                .map_err(|e| TestdagError::Communication(format!("bind {uri}: {e}")))?;
            let local_uri = listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| uri.to_string());
            info!(uri = %local_uri, "status service listening on tcp");
            Ok(Self {
                listener: Listener::Tcp(listener),
                local_uri,
                repo,
                cancel,
            })
        }
    }

    /// The effective URI of the bound endpoint.
    pub fn local_uri(&self) -> &str {
        &self.local_uri
    }

    /// Run the accept loop until cancelled.
    ///
    /// Returns the handle of the background accept task.
    pub fn spawn(self) -> JoinHandle<()> {
        let (tx, rx) = mpsc::channel::<Message>(256);

        // Single ingest consumer: the only writer of the repository.
        let repo = Arc::clone(&self.repo);
        tokio::spawn(ingest_loop(rx, repo));

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                match &self.listener {
                    Listener::Tcp(listener) => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            accepted = listener.accept() => match accepted {
                                Ok((stream, peer)) => {
                                    debug!(peer = %peer, "status connection accepted");
                                    tokio::spawn(read_connection(stream, tx.clone(), cancel.clone()));
                                }
                                Err(e) => {
                                    warn!(error = %e, "status service accept failed");
                                }
                            },
                        }
                    }
                    Listener::Unix(listener) => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            accepted = listener.accept() => match accepted {
                                Ok((stream, _addr)) => {
                                    debug!("status connection accepted on unix socket");
                                    tokio::spawn(read_connection(stream, tx.clone(), cancel.clone()));
                                }
                                Err(e) => {
                                    warn!(error = %e, "status service accept failed");
                                }
                            },
                        }
                    }
                }
            }
            info!("status service accept loop stopped");
        })
    }
}

/// Read one connection line by line, forwarding parsed messages.
async fn read_connection<S>(stream: S, tx: mpsc::Sender<Message>, cancel: CancellationToken)
where
    S: AsyncRead + Unpin + Send + 'static,
{
    let reader = BufReader::new(stream);
    let mut lines = reader.lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Message>(&line) {
                    Ok(msg) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "malformed status message line; discarding");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "status connection read error");
                break;
            }
        }
    }
}

/// The single consumer of the message stream.
async fn ingest_loop(mut rx: mpsc::Receiver<Message>, repo: Arc<Mutex<StatusRepo>>) {
    while let Some(msg) = rx.recv().await {
        match repo.lock() {
            Ok(mut repo) => repo.process_message(msg),
            Err(_) => {
                warn!("status repository lock poisoned; dropping message");
            }
        }
    }
    debug!("status ingest loop finished (channel closed)");
}
