//! Background delivery of a peer's chat messages.
//!
//! There is no push channel between sessions, so while a user sits in a chat
//! the poller asks the store on a fixed interval for messages the peer wrote
//! after the last one delivered, and writes them to the shared line writer.

use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use parley_types::{ChatMessage, ChatPair};

use crate::channel::LineWriter;
use crate::error::SessionError;
use crate::menu;
use crate::store::Store;

pub struct ChatPoller<W> {
    store: Store,
    out: LineWriter<W>,
    pair: ChatPair,
    peer: Uuid,
    peer_name: String,
    /// Cursor of the newest message already shown; 0 when none.
    last_seen: i64,
    interval: Duration,
}

impl<W> ChatPoller<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        store: Store,
        out: LineWriter<W>,
        me: Uuid,
        peer: Uuid,
        peer_name: String,
        last_seen: i64,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            out,
            pair: ChatPair::new(me, peer),
            peer,
            peer_name,
            last_seen,
            interval,
        }
    }

    #[cfg(test)]
    fn last_seen(&self) -> i64 {
        self.last_seen
    }

    /// Start polling on a background task.
    pub fn spawn(self) -> PollerHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(token.clone()));
        PollerHandle {
            token,
            task: Some(task),
        }
    }

    /// One fetch-and-deliver round. Returns how many messages were written.
    pub async fn poll_once(&mut self) -> Result<usize, SessionError> {
        let fresh = self.fetch().await?;
        self.deliver(&fresh, None).await
    }

    async fn run(mut self, token: CancellationToken) -> Result<i64, SessionError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        debug!("Chat poller started for {} / {}", self.pair.low(), self.pair.high());
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let fresh = match self.fetch().await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!("Chat poller fetch failed, stopping: {}", e);
                    if !token.is_cancelled() {
                        let _ = self.out.write(menu::CHAT_UPDATES_STOPPED).await;
                    }
                    return Err(e);
                }
            };
            self.deliver(&fresh, Some(&token)).await?;
        }

        debug!("Chat poller stopped at cursor {}", self.last_seen);
        Ok(self.last_seen)
    }

    async fn fetch(&self) -> Result<Vec<ChatMessage>, SessionError> {
        let (pair, peer, after) = (self.pair, self.peer, self.last_seen);
        Ok(self.store.call(move |db| db.messages_since(pair, peer, after)).await?)
    }

    /// Write messages in order, advancing the cursor past each one. Stops
    /// without writing once `token` is cancelled.
    async fn deliver(
        &mut self,
        messages: &[ChatMessage],
        token: Option<&CancellationToken>,
    ) -> Result<usize, SessionError> {
        let mut delivered = 0;
        for message in messages {
            if token.is_some_and(CancellationToken::is_cancelled) {
                break;
            }
            self.out.write(&menu::chat_line(&self.peer_name, message)).await?;
            self.last_seen = self.last_seen.max(message.cursor());
            delivered += 1;
        }
        if delivered > 0 {
            trace!("Delivered {} chat messages, cursor now {}", delivered, self.last_seen);
        }
        Ok(delivered)
    }
}

/// Owner side of a running poller. Dropping it cancels the poller without
/// waiting; [`stop`](Self::stop) cancels and waits for it to finish.
pub struct PollerHandle {
    token: CancellationToken,
    task: Option<JoinHandle<Result<i64, SessionError>>>,
}

impl PollerHandle {
    /// Cancel the poller and wait until it has exited. No delivery happens
    /// after this returns. Yields the final cursor.
    pub async fn stop(mut self) -> Result<i64, SessionError> {
        self.token.cancel();
        match self.task.take() {
            Some(task) => task.await?,
            None => Ok(0),
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::io::{AsyncReadExt, DuplexStream};

    use parley_db::{Database, NewUser};

    use super::*;

    struct Fixture {
        store: Store,
        me: Uuid,
        peer: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Store::new(Arc::new(Database::open_in_memory().unwrap()));
        let [me, peer] = ["me@x.com", "peer@x.com"].map(|email| {
            store
                .database()
                .create_user(&NewUser {
                    first_name: "F".into(),
                    last_name: "L".into(),
                    email: email.into(),
                    password_hash: "x".into(),
                })
                .unwrap()
                .id
        });
        Fixture { store, me, peer }
    }

    impl Fixture {
        fn say(&self, sender: Uuid, text: &str) -> ChatMessage {
            let message = ChatMessage {
                sender_id: sender,
                text: text.into(),
                sent_at: Utc::now(),
            };
            self.store.database().append_message(self.me, self.peer, &message).unwrap()
        }

        fn poller(
            &self,
            out: DuplexStream,
            last_seen: i64,
            interval: Duration,
        ) -> ChatPoller<DuplexStream> {
            ChatPoller::new(
                self.store.clone(),
                LineWriter::new(out),
                self.me,
                self.peer,
                "Peer".into(),
                last_seen,
                interval,
            )
        }
    }

    async fn read_all(mut client: DuplexStream) -> String {
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn delivers_only_newer_peer_messages_once() {
        let fx = fixture();
        let old = fx.say(fx.peer, "old");
        fx.say(fx.me, "from me");
        fx.say(fx.peer, "new one");
        fx.say(fx.peer, "new two");

        let (client, server) = tokio::io::duplex(4096);
        let mut poller = fx.poller(server, old.cursor(), Duration::from_secs(60));

        assert_eq!(poller.poll_once().await.unwrap(), 2);
        assert_eq!(poller.poll_once().await.unwrap(), 0);

        let latest = fx.say(fx.peer, "later");
        assert_eq!(poller.poll_once().await.unwrap(), 1);
        assert_eq!(poller.last_seen(), latest.cursor());
        drop(poller);

        let out = read_all(client).await;
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(": new one"));
        assert!(lines[1].ends_with(": new two"));
        assert!(lines[2].ends_with(": later"));
        assert!(!out.contains("old") && !out.contains("from me"));
    }

    #[tokio::test]
    async fn cancelled_before_first_tick_delivers_nothing() {
        let fx = fixture();
        fx.say(fx.peer, "waiting in the store");

        let (client, server) = tokio::io::duplex(4096);
        let handle = fx.poller(server, 0, Duration::from_millis(20)).spawn();
        let cursor = handle.stop().await.unwrap();
        assert_eq!(cursor, 0);

        // Well past several ticks: nothing may arrive after stop()
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(read_all(client).await, "");
    }

    #[tokio::test]
    async fn background_task_delivers_on_interval() {
        let fx = fixture();
        let (mut client, server) = tokio::io::duplex(4096);
        let handle = fx.poller(server, 0, Duration::from_millis(10)).spawn();

        fx.say(fx.peer, "ping");

        let mut buf = vec![0u8; 256];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("Peer ["));

        let cursor = handle.stop().await.unwrap();
        assert!(cursor > 0);
    }

    #[tokio::test]
    async fn dropping_the_handle_cancels_the_task() {
        let fx = fixture();
        let (client, server) = tokio::io::duplex(4096);
        let handle = fx.poller(server, 0, Duration::from_millis(10)).spawn();
        drop(handle);

        tokio::time::sleep(Duration::from_millis(50)).await;
        fx.say(fx.peer, "too late");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(read_all(client).await, "");
    }
}
