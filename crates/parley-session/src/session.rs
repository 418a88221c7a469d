use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_types::User;

use crate::channel::LineChannel;
use crate::error::SessionError;
use crate::menu;
use crate::store::Store;
use crate::workflow::RelationshipWorkflow;

/// Per-session knobs, taken from the server configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub poll_interval: Duration,
    /// Bounded retries for the email and password prompts.
    pub max_attempts: u32,
    pub min_password_len: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_attempts: 3,
            min_password_len: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProfileEdit {
    Password,
    Name,
    View,
}

enum State {
    Authenticating,
    Dashboard,
    ChattingWithPeer(User),
    ManagingInvitations,
    EditingProfile(ProfileEdit),
    LoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuChoice {
    Exit,
    Chat,
    ListFriends,
    SendInvitation,
    ManageInvitations,
    ChangePassword,
    ChangeName,
    ViewProfile,
}

impl MenuChoice {
    fn parse(line: &str) -> Option<Self> {
        let choice = match line.trim().parse::<i64>().ok()? {
            0 => Self::Exit,
            1 => Self::Chat,
            2 => Self::ListFriends,
            3 => Self::SendInvitation,
            4 => Self::ManageInvitations,
            5 => Self::ChangePassword,
            6 => Self::ChangeName,
            7 => Self::ViewProfile,
            _ => return None,
        };
        Some(choice)
    }
}

/// One client connection from greeting to farewell.
pub struct Session<R, W> {
    pub(crate) channel: LineChannel<R, W>,
    pub(crate) store: Store,
    pub(crate) workflow: RelationshipWorkflow,
    pub(crate) settings: SessionSettings,
    pub(crate) user: Option<User>,
}

impl<R, W> Session<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(channel: LineChannel<R, W>, store: Store, settings: SessionSettings) -> Self {
        Self {
            channel,
            workflow: RelationshipWorkflow::new(store.clone()),
            store,
            settings,
            user: None,
        }
    }

    /// Drive the session until the user exits, the connection fails, or
    /// `shutdown` fires. The user is signed out in every case.
    ///
    /// A client hanging up is a normal end and yields `Ok`.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), SessionError> {
        let outcome = tokio::select! {
            result = self.drive() => result,
            _ = shutdown.cancelled() => Err(SessionError::Shutdown),
        };

        if matches!(outcome, Err(SessionError::Shutdown)) {
            let _ = self.channel.send(menu::SHUTDOWN_NOTICE).await;
        }
        self.sign_out().await;
        let _ = self.channel.writer().shutdown().await;

        match outcome {
            Err(SessionError::Closed) => {
                debug!("Client hung up");
                Ok(())
            }
            other => other,
        }
    }

    async fn drive(&mut self) -> Result<(), SessionError> {
        self.channel.send(menu::GREETING).await?;

        let mut state = State::Authenticating;
        loop {
            state = match state {
                State::Authenticating => match self.authenticate().await? {
                    Some(user) => {
                        self.user = Some(user);
                        State::Dashboard
                    }
                    None => State::Authenticating,
                },
                State::Dashboard => self.dashboard().await?,
                State::ChattingWithPeer(peer) => {
                    self.chat_with(peer).await?;
                    State::Dashboard
                }
                State::ManagingInvitations => {
                    self.manage_invitations().await?;
                    State::Dashboard
                }
                State::EditingProfile(edit) => {
                    self.edit_profile(edit).await?;
                    State::Dashboard
                }
                State::LoggedOut => {
                    self.channel.send(menu::FAREWELL).await?;
                    return Ok(());
                }
            };
        }
    }

    /// Menu loop. Returns the next state; items that need no screen of
    /// their own run inline and loop back here.
    async fn dashboard(&mut self) -> Result<State, SessionError> {
        loop {
            let line = self.channel.prompt(menu::DASHBOARD).await?;
            let Some(choice) = MenuChoice::parse(&line) else {
                self.channel.send(menu::INVALID_INPUT).await?;
                continue;
            };

            let next = match choice {
                MenuChoice::Exit => State::LoggedOut,
                MenuChoice::Chat => match self.pick_online_friend().await? {
                    Some(peer) => State::ChattingWithPeer(peer),
                    None => continue,
                },
                MenuChoice::ListFriends => {
                    self.list_friends().await?;
                    continue;
                }
                MenuChoice::SendInvitation => {
                    self.send_invitation().await?;
                    continue;
                }
                MenuChoice::ManageInvitations => State::ManagingInvitations,
                MenuChoice::ChangePassword => State::EditingProfile(ProfileEdit::Password),
                MenuChoice::ChangeName => State::EditingProfile(ProfileEdit::Name),
                MenuChoice::ViewProfile => State::EditingProfile(ProfileEdit::View),
            };
            return Ok(next);
        }
    }

    pub(crate) fn current_user(&self) -> Result<&User, SessionError> {
        self.user.as_ref().ok_or(SessionError::SignedOut)
    }

    pub(crate) async fn friends(&self) -> Result<Vec<User>, SessionError> {
        let id = self.current_user()?.id;
        Ok(self.store.call(move |db| db.get_friends(id)).await?)
    }

    async fn list_friends(&mut self) -> Result<(), SessionError> {
        let friends = self.friends().await?;
        if friends.is_empty() {
            return self.channel.send(menu::NO_FRIENDS).await;
        }

        let lines: Vec<String> = std::iter::once(menu::FRIENDS_HEADER.to_string())
            .chain(friends.iter().enumerate().map(|(i, f)| menu::friend_entry(i + 1, f)))
            .collect();
        Ok(self.channel.writer().write_lines(lines).await?)
    }

    /// Read a 1-based index into a list of `len` entries. `Ok(None)` on bad
    /// input, after telling the user.
    pub(crate) async fn pick_index(
        &mut self,
        prompt: &str,
        len: usize,
    ) -> Result<Option<usize>, SessionError> {
        let answer = self.channel.prompt(prompt).await?;
        self.index_from(&answer, len).await
    }

    pub(crate) async fn index_from(
        &mut self,
        answer: &str,
        len: usize,
    ) -> Result<Option<usize>, SessionError> {
        match answer.parse::<usize>() {
            Ok(n) if (1..=len).contains(&n) => Ok(Some(n - 1)),
            Ok(_) => {
                self.channel.send(menu::INVALID_SELECTION).await?;
                Ok(None)
            }
            Err(_) => {
                self.channel.send(menu::INVALID_INPUT).await?;
                Ok(None)
            }
        }
    }

    async fn sign_out(&mut self) {
        let Some(user) = self.user.take() else {
            return;
        };
        let id = user.id;
        match self.store.call(move |db| db.set_logged_in(id, false)).await {
            Ok(()) => info!("{} ({}) logged out", user.email, user.id),
            Err(e) => warn!("Failed to sign out {}: {}", user.email, e),
        }
    }
}
