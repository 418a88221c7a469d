use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_db::StoreError;
use parley_types::{ChatMessage, User};

use crate::error::SessionError;
use crate::menu;
use crate::poller::ChatPoller;
use crate::session::Session;

impl<R, W> Session<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// List online friends and let the user pick one. `None` when there is
    /// nobody to chat with or the selection was invalid.
    pub(crate) async fn pick_online_friend(&mut self) -> Result<Option<User>, SessionError> {
        let mut online: Vec<User> =
            self.friends().await?.into_iter().filter(|f| f.logged_in).collect();
        if online.is_empty() {
            self.channel.send(menu::NO_ONLINE_FRIENDS).await?;
            return Ok(None);
        }

        let lines: Vec<String> = std::iter::once(menu::ONLINE_FRIENDS_HEADER.to_string())
            .chain(online.iter().enumerate().map(|(i, f)| menu::numbered(i + 1, f)))
            .collect();
        self.channel.writer().write_lines(lines).await?;

        Ok(self
            .pick_index(menu::SELECT_FRIEND_PROMPT, online.len())
            .await?
            .map(|index| online.swap_remove(index)))
    }

    /// The chat screen: transcript, then live delivery of the peer's messages
    /// while the user types. The poller is always stopped before returning.
    pub(crate) async fn chat_with(&mut self, peer: User) -> Result<(), SessionError> {
        let me = self.current_user()?.clone();
        let (my_id, peer_id) = (me.id, peer.id);

        let transcript = match self.store.call(move |db| db.get_chat(my_id, peer_id)).await {
            Ok(chat) => chat.messages,
            Err(StoreError::NotFound) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let last_seen = transcript.last().map_or(0, ChatMessage::cursor);

        let lines: Vec<String> = std::iter::once(menu::chat_header(&peer))
            .chain(transcript.iter().map(|m| {
                let author = if m.sender_id == my_id {
                    "You"
                } else {
                    peer.first_name.as_str()
                };
                menu::chat_line(author, m)
            }))
            .collect();
        self.channel.writer().write_lines(lines).await?;

        info!("{} opened chat with {}", me.email, peer.email);
        let poller = ChatPoller::new(
            self.store.clone(),
            self.channel.writer().clone(),
            my_id,
            peer_id,
            peer.first_name.clone(),
            last_seen,
            self.settings.poll_interval,
        )
        .spawn();

        let outcome = self.chat_input(my_id, peer_id).await;

        match poller.stop().await {
            Ok(cursor) => debug!("Chat poller for {} ended at {}", me.email, cursor),
            Err(e) => warn!("Chat poller for {} ended with error: {}", me.email, e),
        }
        info!("{} left chat with {}", me.email, peer.email);
        outcome
    }

    async fn chat_input(&mut self, my_id: Uuid, peer_id: Uuid) -> Result<(), SessionError> {
        loop {
            let line = self.channel.read_line().await?;
            let text = line.trim();
            if text.eq_ignore_ascii_case("q") {
                return Ok(());
            }
            if text.is_empty() {
                self.channel.send(menu::EMPTY_MESSAGE).await?;
                continue;
            }

            let message = ChatMessage {
                sender_id: my_id,
                text: text.to_string(),
                sent_at: Utc::now(),
            };
            match self.store.call(move |db| db.append_message(my_id, peer_id, &message)).await {
                Ok(stored) => self.channel.send(&menu::chat_line("You", &stored)).await?,
                Err(e @ (StoreError::NoDocumentUpdate(_) | StoreError::Invalid(_))) => {
                    warn!("Message from {} not stored: {}", my_id, e);
                    self.channel.send(menu::MESSAGE_NOT_SENT).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
