use std::net::SocketAddr;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use parley_session::{LineChannel, Session, SessionError, SessionSettings, Store};

/// Accepts connections and runs one session per client.
pub struct Supervisor {
    store: Store,
    settings: SessionSettings,
    shutdown: CancellationToken,
    sessions: TaskTracker,
}

impl Supervisor {
    pub fn new(store: Store, settings: SessionSettings, shutdown: CancellationToken) -> Self {
        Self {
            store,
            settings,
            shutdown,
            sessions: TaskTracker::new(),
        }
    }

    /// Accept until shutdown, then wait for every session to finish.
    pub async fn run(self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => self.spawn_session(stream, addr),
                Err(e) => error!("Accept error: {}", e),
            }
        }

        self.sessions.close();
        info!("Waiting for {} sessions to finish", self.sessions.len());
        self.sessions.wait().await;
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, addr: SocketAddr) {
        info!("New connection from {}", addr);
        if let Err(e) = socket2::SockRef::from(&stream).set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let (reader, writer) = stream.into_split();
        let channel = LineChannel::new(BufReader::new(reader), writer);
        let session = Session::new(channel, self.store.clone(), self.settings.clone());
        let shutdown = self.shutdown.clone();

        self.sessions.spawn(async move {
            match session.run(shutdown).await {
                Ok(()) | Err(SessionError::Shutdown) => info!("Connection from {} closed", addr),
                Err(e) => warn!("Session for {} ended: {}", addr, e),
            }
        });
    }
}
