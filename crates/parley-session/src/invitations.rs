use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::warn;

use parley_db::StoreError;
use parley_types::InvitationKind::{self, Accepted, Cancelled, Received, Rejected, Sent};
use parley_types::User;

use crate::auth::{is_valid_email, normalize_email};
use crate::error::{SessionError, WorkflowError};
use crate::menu;
use crate::session::Session;

impl<R, W> Session<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub(crate) async fn send_invitation(&mut self) -> Result<(), SessionError> {
        let answer = self.channel.prompt_required(menu::INVITE_EMAIL_PROMPT).await?;
        let email = normalize_email(&answer);
        if !is_valid_email(&email) {
            return self.channel.send(menu::INVALID_EMAIL).await;
        }

        let target = match self.store.call(move |db| db.get_user_by_email(&email)).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => return self.channel.send(menu::NO_SUCH_USER).await,
            Err(e) => return Err(e.into()),
        };

        let me = self.current_user()?.id;
        let result = self.workflow.send_invitation(me, target.id).await;
        self.report(result, menu::invitation_sent(&target)).await
    }

    /// Invitations sub-menu; returns to the dashboard on `0`.
    pub(crate) async fn manage_invitations(&mut self) -> Result<(), SessionError> {
        loop {
            let answer = self.channel.prompt(menu::INVITATIONS_MENU).await?;
            match answer.parse::<u8>() {
                Ok(0) => return Ok(()),
                Ok(1) => self.respond_to_received().await?,
                Ok(2) => self.cancel_sent().await?,
                Ok(3) => self.show_history(&[Accepted, Rejected]).await?,
                Ok(4) => self.show_history(&[Cancelled]).await?,
                _ => self.channel.send(menu::INVALID_INPUT).await?,
            }
        }
    }

    async fn respond_to_received(&mut self) -> Result<(), SessionError> {
        let Some(peer) = self.choose_pending(Received, menu::RESPOND_PROMPT).await? else {
            return Ok(());
        };

        let answer = self.channel.prompt_required(menu::ACCEPT_OR_REJECT_PROMPT).await?;
        let me = self.current_user()?.id;
        match answer.to_ascii_lowercase().as_str() {
            "a" => {
                let result = self.workflow.add_friend(me, peer.id).await;
                self.report(result, menu::friend_added(&peer)).await
            }
            "r" => {
                let result = self.workflow.reject_invitation(me, peer.id).await;
                self.report(result, menu::invitation_rejected(&peer)).await
            }
            _ => self.channel.send(menu::INVALID_INPUT).await,
        }
    }

    async fn cancel_sent(&mut self) -> Result<(), SessionError> {
        let Some(peer) = self.choose_pending(Sent, menu::CANCEL_PROMPT).await? else {
            return Ok(());
        };

        let me = self.current_user()?.id;
        let result = self.workflow.cancel_invitation(me, peer.id).await;
        self.report(result, menu::invitation_cancelled(&peer)).await
    }

    /// Number the pending invitations of `kind` and read a choice; `0` backs
    /// out.
    async fn choose_pending(
        &mut self,
        kind: InvitationKind,
        prompt: &str,
    ) -> Result<Option<User>, SessionError> {
        let mut peers = self.invitation_peers(kind).await?;
        if peers.is_empty() {
            self.channel.send(menu::NO_INVITATIONS).await?;
            return Ok(None);
        }

        let lines: Vec<String> = peers
            .iter()
            .enumerate()
            .map(|(i, p)| menu::numbered(i + 1, p))
            .collect();
        self.channel.writer().write_lines(lines).await?;

        let answer = self.channel.prompt_required(prompt).await?;
        if answer == "0" {
            return Ok(None);
        }
        Ok(self.index_from(&answer, peers.len()).await?.map(|i| peers.swap_remove(i)))
    }

    async fn show_history(&mut self, kinds: &[InvitationKind]) -> Result<(), SessionError> {
        let mut lines = Vec::new();
        for &kind in kinds {
            for peer in self.invitation_peers(kind).await? {
                lines.push(menu::history_entry(kind.as_str(), &peer));
            }
        }

        if lines.is_empty() {
            return self.channel.send(menu::NO_INVITATIONS).await;
        }
        Ok(self.channel.writer().write_lines(lines).await?)
    }

    async fn invitation_peers(&self, kind: InvitationKind) -> Result<Vec<User>, SessionError> {
        let me = self.current_user()?.id;
        let peers = self
            .store
            .call(move |db| db.get_users_by_ids(&db.get_invitations(me, kind)?))
            .await?;
        Ok(peers)
    }

    /// Tell the user how a relationship change went. Workflow failures are
    /// never fatal to the session.
    async fn report(
        &mut self,
        result: Result<(), WorkflowError>,
        done: String,
    ) -> Result<(), SessionError> {
        match result {
            Ok(()) => self.channel.send(&done).await,
            Err(WorkflowError::Store(e)) => {
                warn!("Relationship update rolled back: {}", e);
                self.channel.send(menu::ACTION_FAILED).await
            }
            Err(e) => self.channel.send(&format!("{}\n", e)).await,
        }
    }
}
