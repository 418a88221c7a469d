use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{info, warn};

use parley_db::StoreError;
use parley_types::InvitationKind::{Received, Sent};
use parley_types::Profile;

use crate::auth::{check_new_password, hash_password, verify_password};
use crate::error::SessionError;
use crate::menu;
use crate::session::{ProfileEdit, Session};

impl<R, W> Session<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub(crate) async fn edit_profile(&mut self, edit: ProfileEdit) -> Result<(), SessionError> {
        match edit {
            ProfileEdit::Password => self.change_password().await,
            ProfileEdit::Name => self.change_name().await,
            ProfileEdit::View => self.view_profile().await,
        }
    }

    async fn change_password(&mut self) -> Result<(), SessionError> {
        let current = self.channel.prompt_required(menu::CURRENT_PASSWORD_PROMPT).await?;
        let stored_hash = self.current_user()?.password_hash.clone();
        if !verify_password(current, stored_hash).await? {
            return self.channel.send(menu::WRONG_PASSWORD).await;
        }

        let password = self.channel.prompt_required(menu::NEW_PASSWORD_PROMPT).await?;
        let confirm = self.channel.prompt_required(menu::CONFIRM_NEW_PASSWORD_PROMPT).await?;
        let min_len = self.settings.min_password_len;
        if let Err(problem) = check_new_password(&password, &confirm, min_len) {
            return self.channel.send(&problem.message()).await;
        }

        let hash = hash_password(password).await?;
        let id = self.current_user()?.id;
        let stored = hash.clone();
        match self.store.call(move |db| db.update_password(id, &stored)).await {
            Ok(()) => {}
            Err(e @ StoreError::NoDocumentUpdate(_)) => {
                warn!("Password change for {} not applied: {}", id, e);
                return self.channel.send(menu::ACTION_FAILED).await;
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(user) = self.user.as_mut() {
            user.password_hash = hash;
            info!("{} changed their password", user.email);
        }
        self.channel.send(menu::PASSWORD_CHANGED).await
    }

    /// Blank answers keep the current value.
    async fn change_name(&mut self) -> Result<(), SessionError> {
        let first = self.channel.prompt(menu::FIRST_NAME_KEEP_PROMPT).await?;
        let last = self.channel.prompt(menu::LAST_NAME_KEEP_PROMPT).await?;
        if first.is_empty() && last.is_empty() {
            return self.channel.send(menu::NOTHING_TO_CHANGE).await;
        }

        let user = self.current_user()?;
        let id = user.id;
        let first = if first.is_empty() { user.first_name.clone() } else { first };
        let last = if last.is_empty() { user.last_name.clone() } else { last };

        let (f, l) = (first.clone(), last.clone());
        match self.store.call(move |db| db.update_name(id, &f, &l)).await {
            Ok(()) => {}
            Err(e @ StoreError::NoDocumentUpdate(_)) => {
                warn!("Name change for {} not applied: {}", id, e);
                return self.channel.send(menu::ACTION_FAILED).await;
            }
            Err(e) => return Err(e.into()),
        }

        let Some(user) = self.user.as_mut() else {
            return Err(SessionError::SignedOut);
        };
        user.first_name = first;
        user.last_name = last;
        let text = menu::name_changed(user);
        self.channel.send(&text).await
    }

    async fn view_profile(&mut self) -> Result<(), SessionError> {
        let id = self.current_user()?.id;
        let profile = self
            .store
            .call(move |db| {
                let relationship = db.get_relationship(id)?;
                Ok(Profile {
                    user: db.get_user_by_id(id)?,
                    friend_count: db.get_friend_ids(id)?.len(),
                    pending_sent: relationship.set(Sent).len(),
                    pending_received: relationship.set(Received).len(),
                })
            })
            .await?;
        self.channel.send(&menu::profile(&profile)).await
    }
}
