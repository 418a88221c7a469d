//! Multi-document invitation and friendship mutations.
//!
//! Each operation is built as a list of [`Step`]s and handed to the store in
//! one call, so it either applies completely or not at all.

use tracing::info;
use uuid::Uuid;

use parley_db::{ListName, Step, StoreError};
use parley_types::InvitationKind::{self, Accepted, Cancelled, Received, Rejected, Sent};

use crate::error::WorkflowError;
use crate::store::Store;

fn push(owner: Uuid, kind: InvitationKind, peer: Uuid) -> Step {
    Step::Push {
        owner,
        list: ListName::Invitations(kind),
        peer,
    }
}

fn pull(owner: Uuid, kind: InvitationKind, peer: Uuid) -> Step {
    Step::Pull { owner, kind, peer }
}

fn befriend(owner: Uuid, peer: Uuid) -> Step {
    Step::Push {
        owner,
        list: ListName::Friends,
        peer,
    }
}

fn absent(owner: Uuid, list: ListName, peer: Uuid) -> Step {
    Step::RequireAbsent { owner, list, peer }
}

/// The guards are part of the batch, so two crossing invitations cannot
/// both pass them.
pub fn send_steps(sender: Uuid, receiver: Uuid) -> Vec<Step> {
    let pending = ListName::Invitations;
    vec![
        Step::RequireUser(receiver),
        absent(sender, ListName::Friends, receiver),
        absent(receiver, ListName::Friends, sender),
        absent(sender, pending(Sent), receiver),
        absent(sender, pending(Received), receiver),
        absent(receiver, pending(Sent), sender),
        absent(receiver, pending(Received), sender),
        push(sender, Sent, receiver),
        push(receiver, Received, sender),
    ]
}

pub fn accept_steps(acceptor: Uuid, peer: Uuid) -> Vec<Step> {
    vec![
        Step::RequireUser(peer),
        pull(acceptor, Received, peer),
        pull(peer, Sent, acceptor),
        befriend(acceptor, peer),
        befriend(peer, acceptor),
        push(acceptor, Accepted, peer),
    ]
}

pub fn reject_steps(user: Uuid, peer: Uuid) -> Vec<Step> {
    vec![
        Step::RequireUser(peer),
        pull(user, Received, peer),
        pull(peer, Sent, user),
        push(user, Rejected, peer),
    ]
}

pub fn cancel_steps(user: Uuid, peer: Uuid) -> Vec<Step> {
    vec![
        Step::RequireUser(peer),
        pull(user, Sent, peer),
        push(user, Cancelled, peer),
        pull(peer, Received, user),
    ]
}

#[derive(Clone)]
pub struct RelationshipWorkflow {
    store: Store,
}

impl RelationshipWorkflow {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record an invitation from `sender` to `receiver` on both sides.
    pub async fn send_invitation(
        &self,
        sender: Uuid,
        receiver: Uuid,
    ) -> Result<(), WorkflowError> {
        if sender == receiver {
            return Err(WorkflowError::SelfInvite);
        }

        self.apply(send_steps(sender, receiver)).await?;
        info!("Invitation {} -> {} sent", sender, receiver);
        Ok(())
    }

    /// Accept the pending invitation from `peer`: both pending entries go
    /// away and each user lands on the other's friend list.
    pub async fn add_friend(&self, acceptor: Uuid, peer: Uuid) -> Result<(), WorkflowError> {
        self.apply(accept_steps(acceptor, peer)).await?;
        info!("Invitation {} -> {} accepted", peer, acceptor);
        Ok(())
    }

    pub async fn reject_invitation(&self, user: Uuid, peer: Uuid) -> Result<(), WorkflowError> {
        self.apply(reject_steps(user, peer)).await?;
        info!("Invitation {} -> {} rejected", peer, user);
        Ok(())
    }

    pub async fn cancel_invitation(&self, user: Uuid, peer: Uuid) -> Result<(), WorkflowError> {
        self.apply(cancel_steps(user, peer)).await?;
        info!("Invitation {} -> {} cancelled", user, peer);
        Ok(())
    }

    async fn apply(&self, steps: Vec<Step>) -> Result<(), WorkflowError> {
        self.store
            .call(move |db| db.apply_atomically(&steps))
            .await
            .map_err(|e| match e {
                StoreError::NotFound => WorkflowError::UnknownUser,
                StoreError::AlreadyPresent(ListName::Friends) => WorkflowError::AlreadyFriends,
                StoreError::AlreadyPresent(ListName::Invitations(_)) => {
                    WorkflowError::AlreadyPending
                }
                other => WorkflowError::Store(other),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_db::{Database, NewUser};

    use super::*;

    fn setup() -> (Store, RelationshipWorkflow) {
        let store = Store::new(Arc::new(Database::open_in_memory().unwrap()));
        let workflow = RelationshipWorkflow::new(store.clone());
        (store, workflow)
    }

    fn user(store: &Store, email: &str) -> Uuid {
        store
            .database()
            .create_user(&NewUser {
                first_name: "Test".into(),
                last_name: email.into(),
                email: email.into(),
                password_hash: "x".into(),
            })
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn invite_then_accept_is_symmetric() {
        let (store, wf) = setup();
        let a = user(&store, "a@x.com");
        let b = user(&store, "b@x.com");

        wf.send_invitation(a, b).await.unwrap();
        wf.add_friend(b, a).await.unwrap();

        let db = store.database();
        assert_eq!(db.get_friend_ids(a).unwrap(), vec![b]);
        assert_eq!(db.get_friend_ids(b).unwrap(), vec![a]);
        assert!(db.get_invitations(b, Received).unwrap().is_empty());
        assert!(db.get_invitations(a, Sent).unwrap().is_empty());
        assert_eq!(db.get_invitations(b, Accepted).unwrap(), vec![a]);
    }

    #[tokio::test]
    async fn failed_second_write_leaves_nothing_behind() {
        let (store, wf) = setup();
        let a = user(&store, "a@x.com");
        let b = user(&store, "b@x.com");

        // Drop b's relationship record so the receiver-side push finds nothing
        store
            .database()
            .with_conn_mut(|conn| {
                conn.execute("DELETE FROM relationships WHERE owner_id = ?1", [b.to_string()])?;
                Ok(())
            })
            .unwrap();

        let err = wf.send_invitation(a, b).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Store(StoreError::NoDocumentUpdate(_))
        ));
        assert!(store.database().get_invitations(a, Sent).unwrap().is_empty());
    }

    #[tokio::test]
    async fn accept_without_invitation_changes_nothing() {
        let (store, wf) = setup();
        let a = user(&store, "a@x.com");
        let b = user(&store, "b@x.com");

        let err = wf.add_friend(b, a).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Store(StoreError::NoDocumentUpdate(_))
        ));
        assert!(store.database().get_friend_ids(a).unwrap().is_empty());
        assert!(store.database().get_friend_ids(b).unwrap().is_empty());
    }

    #[tokio::test]
    async fn guards_refuse_bad_invitations() {
        let (store, wf) = setup();
        let a = user(&store, "a@x.com");
        let b = user(&store, "b@x.com");

        let ghost = Uuid::new_v4();
        assert!(matches!(
            wf.send_invitation(a, a).await,
            Err(WorkflowError::SelfInvite)
        ));
        assert!(matches!(
            wf.send_invitation(a, ghost).await,
            Err(WorkflowError::UnknownUser)
        ));

        wf.send_invitation(a, b).await.unwrap();
        assert!(matches!(
            wf.send_invitation(a, b).await,
            Err(WorkflowError::AlreadyPending)
        ));
        assert!(matches!(
            wf.send_invitation(b, a).await,
            Err(WorkflowError::AlreadyPending)
        ));

        wf.add_friend(b, a).await.unwrap();
        assert!(matches!(
            wf.send_invitation(a, b).await,
            Err(WorkflowError::AlreadyFriends)
        ));
        assert!(matches!(
            wf.send_invitation(b, a).await,
            Err(WorkflowError::AlreadyFriends)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn crossing_invitations_leave_one_pending_pair() {
        let (store, wf) = setup();

        for round in 0..20 {
            let a = user(&store, &format!("a{round}@x.com"));
            let b = user(&store, &format!("b{round}@x.com"));

            let forward = tokio::spawn({
                let wf = wf.clone();
                async move { wf.send_invitation(a, b).await }
            });
            let backward = tokio::spawn({
                let wf = wf.clone();
                async move { wf.send_invitation(b, a).await }
            });
            let results = [forward.await.unwrap(), backward.await.unwrap()];

            assert_eq!(
                results.iter().filter(|r| r.is_ok()).count(),
                1,
                "round {round}"
            );
            assert!(
                results.iter().any(|r| matches!(r, Err(WorkflowError::AlreadyPending))),
                "round {round}"
            );

            let db = store.database();
            for (me, peer) in [(a, b), (b, a)] {
                let sent = db.get_invitations(me, Sent).unwrap();
                let received = db.get_invitations(me, Received).unwrap();
                assert!(
                    !(sent.contains(&peer) && received.contains(&peer)),
                    "round {round}"
                );
                assert_eq!(sent.len() + received.len(), 1, "round {round}");
            }
        }
    }

    #[tokio::test]
    async fn reject_and_cancel_move_entries_to_history() {
        let (store, wf) = setup();
        let a = user(&store, "a@x.com");
        let b = user(&store, "b@x.com");
        let c = user(&store, "c@x.com");
        let db = store.database();

        wf.send_invitation(a, b).await.unwrap();
        wf.reject_invitation(b, a).await.unwrap();
        assert!(db.get_invitations(b, Received).unwrap().is_empty());
        assert!(db.get_invitations(a, Sent).unwrap().is_empty());
        assert_eq!(db.get_invitations(b, Rejected).unwrap(), vec![a]);

        wf.send_invitation(a, c).await.unwrap();
        wf.cancel_invitation(a, c).await.unwrap();
        assert!(db.get_invitations(c, Received).unwrap().is_empty());
        assert_eq!(db.get_invitations(a, Cancelled).unwrap(), vec![c]);

        // Cancelling twice finds no pending entry
        assert!(wf.cancel_invitation(a, c).await.is_err());
        assert!(db.get_friend_ids(a).unwrap().is_empty());
    }
}
