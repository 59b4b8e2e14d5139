//! TCP transport adapter: newline-delimited JSON envelopes.
//!
//! Each connection gets a session id; inbound frames are parsed and fed to
//! the router, and register messages passing through teach the adapter which
//! zone address lives behind which connection. When a connection closes, the
//! adapter performs the explicit route teardown the core router deliberately
//! does not infer from traffic.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zonegrid_router::{Router, TransportSend};
use zonegrid_types::{Envelope, ZoneGridError, ZoneGridResult};

/// TCP transport for a hub or proxy node.
pub struct TcpTransport {
    router: Arc<Router>,
    /// Session id -> outbound frame sender.
    connections: DashMap<String, mpsc::UnboundedSender<String>>,
    /// Zone address -> session id, learned from register messages.
    aliases: DashMap<String, String>,
}

impl TcpTransport {
    pub fn new(router: Arc<Router>) -> Arc<Self> {
        Arc::new(Self {
            router,
            connections: DashMap::new(),
            aliases: DashMap::new(),
        })
    }

    /// Accept connections on `listener` until the task is dropped.
    pub fn start(self: &Arc<Self>, listener: TcpListener) -> tokio::task::JoinHandle<()> {
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let session_id = format!("conn-{}", Uuid::new_v4());
                        debug!(%addr, session = %session_id, "Accepted connection");
                        transport.track(stream, session_id);
                    }
                    Err(error) => {
                        error!(error = %error, "Accept failed");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        })
    }

    /// Dial a peer; returns the session id of the new connection.
    pub async fn connect(self: &Arc<Self>, endpoint: &str) -> ZoneGridResult<String> {
        let stream = TcpStream::connect(endpoint).await?;
        let session_id = format!("conn-{}", Uuid::new_v4());
        info!(endpoint = %endpoint, session = %session_id, "Connected to peer");
        self.track(stream, session_id.clone());
        Ok(session_id)
    }

    /// Map a zone address onto an existing session, so next-hop resolution by
    /// address finds the connection.
    pub fn alias(&self, address: impl Into<String>, session_id: impl Into<String>) {
        self.aliases.insert(address.into(), session_id.into());
    }

    fn track(self: &Arc<Self>, stream: TcpStream, session_id: String) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(session_id.clone(), tx);
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            transport.run_connection(stream, session_id, rx).await;
        });
    }

    async fn run_connection(
        self: Arc<Self>,
        stream: TcpStream,
        session_id: String,
        mut outbound: mpsc::UnboundedReceiver<String>,
    ) {
        let (reader, mut writer) = stream.into_split();

        let write_task = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if writer.write_all(frame.as_bytes()).await.is_err() {
                    break;
                }
                if writer.write_all(b"\n").await.is_err() {
                    break;
                }
            }
        });

        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Envelope>(line) {
                        Ok(envelope) => {
                            if envelope.register {
                                if let Some(from) =
                                    envelope.from.clone().filter(|f| !f.is_empty())
                                {
                                    self.alias(from, session_id.clone());
                                }
                            }
                            self.router
                                .on_message_received(envelope, Some(&session_id))
                                .await;
                        }
                        Err(error) => {
                            warn!(session = %session_id, error = %error, "Discarding unparseable frame");
                        }
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    debug!(session = %session_id, error = %error, "Connection read failed");
                    break;
                }
            }
        }

        // disconnect-triggered teardown: the session table holds no entry for
        // this connection once we are done
        write_task.abort();
        self.connections.remove(&session_id);
        let mut gone = Vec::new();
        self.aliases.retain(|address, session| {
            if session == &session_id {
                gone.push(address.clone());
                false
            } else {
                true
            }
        });
        let mut removed = self.router.remove_routes_via(&session_id);
        for address in &gone {
            removed += self.router.remove_routes_via(address);
            self.router.mark_local_disconnected(address);
        }
        info!(session = %session_id, removed, "Connection closed, routes torn down");
    }
}

#[async_trait]
impl TransportSend for TcpTransport {
    async fn send(&self, message: Envelope, next_hop: &str) -> ZoneGridResult<()> {
        // next hop is either a zone address learned from a register message
        // or a raw session id
        let session = self
            .aliases
            .get(next_hop)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| next_hop.to_string());

        let frame = serde_json::to_string(&message)?;
        let Some(connection) = self.connections.get(&session) else {
            // no reliable reverse channel for unreachable hops: drop silently
            debug!(next_hop = %next_hop, "No connection for next hop, dropping message");
            return Ok(());
        };
        connection
            .value()
            .send(frame)
            .map_err(|_| ZoneGridError::Transport(format!("connection {session} closed")))
    }
}
