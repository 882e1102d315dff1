//! Peer discovery over TCP.
//!
//! Accepted and dialed sockets are queued as candidates. `find` negotiates
//! candidates concurrently with the caller's catalogue and returns the first
//! pipe that agrees on an item.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::catalogue::ProcedureCatalogue;
use crate::config::P2pConfig;
use crate::error::NetworkError;
use crate::handshake::negotiate;
use crate::pipe::{Pipe, PipeInfo, StreamPipe};
use crate::types::{PipeRole, RemotePeer};

const CANDIDATE_QUEUE: usize = 32;

/// Source of negotiated pipes.
#[async_trait]
pub trait NetworkProvider: Send + Sync {
    /// Wait for a peer whose catalogue complements `catalogue`.
    async fn find(&self, catalogue: Arc<dyn ProcedureCatalogue>) -> Result<Box<dyn Pipe>, NetworkError>;

    /// Stop accepting and dialing. Pending and later `find` calls fail with
    /// [`NetworkError::Stopped`]; pipes already handed out keep working.
    fn stop_server(&self);
}

struct Candidate {
    stream: TcpStream,
    addr: SocketAddr,
    role: PipeRole,
}

pub struct TcpNetworkProvider {
    config: P2pConfig,
    local_addr: Option<SocketAddr>,
    candidates: AsyncMutex<mpsc::Receiver<Candidate>>,
    shutdown: watch::Sender<bool>,
}

impl TcpNetworkProvider {
    /// Bind the listener (if configured) and start dialing seeds.
    pub async fn bind(config: P2pConfig) -> Result<Self, NetworkError> {
        let (tx, rx) = mpsc::channel(CANDIDATE_QUEUE);
        let (shutdown, _) = watch::channel(false);

        let local_addr = match config.listen {
            Some(listen) => {
                let listener = TcpListener::bind(listen).await?;
                let local_addr = listener.local_addr()?;
                info!(addr = %local_addr, "p2p listening");
                tokio::spawn(accept_loop(listener, tx.clone(), shutdown.subscribe()));
                Some(local_addr)
            }
            None => None,
        };

        for seed in &config.seeds {
            tokio::spawn(dial_loop(
                *seed,
                config.dial_interval,
                tx.clone(),
                shutdown.subscribe(),
            ));
        }

        Ok(Self {
            config,
            local_addr,
            candidates: AsyncMutex::new(rx),
            shutdown,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> &P2pConfig {
        &self.config
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn search(&self, catalogue: Arc<dyn ProcedureCatalogue>) -> Result<Box<dyn Pipe>, NetworkError> {
        let mut shutdown = self.shutdown.subscribe();
        let mut candidates = self.candidates.lock().await;
        let mut pending = JoinSet::new();
        loop {
            tokio::select! {
                _ = wait_stopped(&mut shutdown) => return Err(NetworkError::Stopped),
                candidate = candidates.recv() => {
                    let Some(candidate) = candidate else {
                        return Err(NetworkError::Stopped);
                    };
                    pending.spawn(establish(candidate, catalogue.clone(), self.config.clone()));
                }
                Some(joined) = pending.join_next(), if !pending.is_empty() => {
                    match joined {
                        Ok(Ok(pipe)) => return Ok(Box::new(pipe)),
                        Ok(Err(err)) => debug!(error = ?err, "candidate rejected"),
                        Err(err) => warn!(error = ?err, "negotiation task failed"),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl NetworkProvider for TcpNetworkProvider {
    async fn find(&self, catalogue: Arc<dyn ProcedureCatalogue>) -> Result<Box<dyn Pipe>, NetworkError> {
        if self.is_stopped() {
            return Err(NetworkError::Stopped);
        }
        match self.config.find_timeout {
            Some(limit) => tokio::time::timeout(limit, self.search(catalogue))
                .await
                .map_err(|_| NetworkError::NoCompatiblePeer)?,
            None => self.search(catalogue).await,
        }
    }

    fn stop_server(&self) {
        if !self.shutdown.send_replace(true) {
            info!("p2p provider stopped");
        }
    }
}

async fn establish(
    candidate: Candidate,
    catalogue: Arc<dyn ProcedureCatalogue>,
    config: P2pConfig,
) -> Result<StreamPipe, NetworkError> {
    let Candidate {
        mut stream,
        addr,
        role,
    } = candidate;
    let local = catalogue.current_catalogue();
    let negotiated = negotiate(
        &mut stream,
        role,
        local,
        &[],
        config.max_message_size,
        config.handshake_timeout,
    )
    .await?;
    let peer = RemotePeer::new(addr);
    debug!(%peer, item = %negotiated.item, remote = %negotiated.other_catalogue, "negotiated");
    let pipe = StreamPipe::spawn(
        stream,
        PipeInfo {
            peer,
            role,
            local_catalogue: negotiated.local_catalogue,
            initiation_data: negotiated.initiation_data,
        },
        config.max_message_size,
        config.queue_depth,
    );
    pipe.set_other_catalogue(negotiated.other_catalogue);
    Ok(pipe)
}

async fn wait_stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

async fn accept_loop(
    listener: TcpListener,
    candidates: mpsc::Sender<Candidate>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = wait_stopped(&mut shutdown) => return,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, addr)) => {
                debug!(remote = %addr, "accepted connection");
                let _ = stream.set_nodelay(true);
                let candidate = Candidate {
                    stream,
                    addr,
                    role: PipeRole::Responder,
                };
                if candidates.send(candidate).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!(error = ?err, "listener accept failed");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn dial_loop(
    seed: SocketAddr,
    interval: Duration,
    candidates: mpsc::Sender<Candidate>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let connected = tokio::select! {
            _ = wait_stopped(&mut shutdown) => return,
            connected = TcpStream::connect(seed) => connected,
        };
        match connected {
            Ok(stream) => {
                debug!(%seed, "outbound connection established");
                let _ = stream.set_nodelay(true);
                let candidate = Candidate {
                    stream,
                    addr: seed,
                    role: PipeRole::Initiator,
                };
                if candidates.send(candidate).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!(%seed, error = ?err, "outbound connect failed");
            }
        }
        tokio::select! {
            _ = wait_stopped(&mut shutdown) => return,
            _ = sleep(interval) => {}
        }
    }
}
