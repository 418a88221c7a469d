use std::fmt;

use chrono::Utc;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_types::{InvitationKind, Relationship, User};

use crate::error::OptionalExt;
use crate::models::{USER_COLUMNS, UserRow, parse_uuid};
use crate::{Database, StoreError, expect_one};

/// Which per-user list a step touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListName {
    Invitations(InvitationKind),
    Friends,
}

impl fmt::Display for ListName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invitations(kind) => write!(f, "{}", kind),
            Self::Friends => f.write_str("friends"),
        }
    }
}

/// One step of an atomic multi-document update.
///
/// Every step must affect exactly one document. A step that affects none
/// fails with `NoDocumentUpdate` and the whole batch is rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Read inside the transaction: the user must exist.
    RequireUser(Uuid),
    /// Read inside the transaction: `owner`'s list must not hold `peer`.
    /// Fails with `AlreadyPresent` naming the list.
    RequireAbsent {
        owner: Uuid,
        list: ListName,
        peer: Uuid,
    },
    /// Add `peer` to `owner`'s list.
    Push {
        owner: Uuid,
        list: ListName,
        peer: Uuid,
    },
    /// Remove `peer` from one of `owner`'s invitation sets.
    Pull {
        owner: Uuid,
        kind: InvitationKind,
        peer: Uuid,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequireUser(id) => write!(f, "require user {}", id),
            Self::RequireAbsent { owner, list, peer } => {
                write!(f, "require {} absent from {}.{}", peer, owner, list)
            }
            Self::Push { owner, list, peer } => write!(f, "push {} onto {}.{}", peer, owner, list),
            Self::Pull { owner, kind, peer } => write!(f, "pull {} from {}.{}", peer, owner, kind),
        }
    }
}

impl Database {
    /// Load the full relationship record of `owner`.
    pub fn get_relationship(&self, owner: Uuid) -> Result<Relationship, StoreError> {
        self.with_conn(|conn| {
            let rel_id = relationship_id(conn, owner)?.ok_or(StoreError::NotFound)?;
            let mut rel = Relationship {
                id: parse_uuid(&rel_id)?,
                owner_id: owner,
                ..Relationship::default()
            };

            let mut stmt = conn.prepare(
                "SELECT kind, peer_id FROM relationship_entries WHERE relationship_id = ?1",
            )?;
            let rows = stmt
                .query_map([&rel_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            for (kind, peer) in rows {
                let kind: InvitationKind = kind.parse().map_err(StoreError::Corrupt)?;
                rel.set_mut(kind).insert(parse_uuid(&peer)?);
            }
            Ok(rel)
        })
    }

    /// Peer ids in one invitation set of `owner`, oldest first.
    pub fn get_invitations(
        &self,
        owner: Uuid,
        kind: InvitationKind,
    ) -> Result<Vec<Uuid>, StoreError> {
        self.with_conn(|conn| {
            let rel_id = relationship_id(conn, owner)?.ok_or(StoreError::NotFound)?;
            let mut stmt = conn.prepare(
                "SELECT peer_id FROM relationship_entries
                 WHERE relationship_id = ?1 AND kind = ?2
                 ORDER BY added_at, peer_id",
            )?;
            let ids = stmt
                .query_map((&rel_id, kind.as_str()), |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids.iter().map(|id| parse_uuid(id)).collect()
        })
    }

    pub fn get_friend_ids(&self, user: Uuid) -> Result<Vec<Uuid>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT friend_id FROM friends WHERE user_id = ?1 ORDER BY since, friend_id",
            )?;
            let ids = stmt
                .query_map([user.to_string()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids.iter().map(|id| parse_uuid(id)).collect()
        })
    }

    /// Friends of `user` as full records, in the order they were added.
    pub fn get_friends(&self, user: Uuid) -> Result<Vec<User>, StoreError> {
        self.with_conn(|conn| {
            // JOIN users to fetch the records in a single query
            let columns = USER_COLUMNS
                .split(", ")
                .map(|c| format!("u.{}", c))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT {} FROM friends f JOIN users u ON u.id = f.friend_id
                 WHERE f.user_id = ?1 ORDER BY f.since, f.friend_id",
                columns
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user.to_string()], UserRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(User::try_from).collect()
        })
    }

    /// Apply every step in one immediate transaction, or none of them.
    pub fn apply_atomically(&self, steps: &[Step]) -> Result<(), StoreError> {
        let now = Utc::now().timestamp_micros();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            for (i, step) in steps.iter().enumerate() {
                if let Err(e) = apply_step(&tx, step, now) {
                    // Dropping `tx` rolls back everything applied so far
                    warn!("Step {}/{} failed ({}), rolling back: {}", i + 1, steps.len(), step, e);
                    return Err(e);
                }
            }

            tx.commit()?;
            debug!("Applied {} relationship steps", steps.len());
            Ok(())
        })
    }
}

fn apply_step(tx: &Transaction<'_>, step: &Step, now: i64) -> Result<(), StoreError> {
    let changed = match *step {
        Step::RequireUser(id) => {
            let found: Option<String> = tx
                .query_row(
                    "SELECT id FROM users WHERE id = ?1",
                    [id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            return found.map(|_| ()).ok_or(StoreError::NotFound);
        }

        Step::RequireAbsent { owner, list, peer } => {
            let present: bool = match list {
                ListName::Invitations(kind) => tx.query_row(
                    "SELECT EXISTS (
                         SELECT 1 FROM relationship_entries e
                         JOIN relationships r ON r.id = e.relationship_id
                         WHERE r.owner_id = ?1 AND e.kind = ?2 AND e.peer_id = ?3
                     )",
                    (owner.to_string(), kind.as_str(), peer.to_string()),
                    |row| row.get(0),
                )?,
                ListName::Friends => tx.query_row(
                    "SELECT EXISTS (SELECT 1 FROM friends WHERE user_id = ?1 AND friend_id = ?2)",
                    (owner.to_string(), peer.to_string()),
                    |row| row.get(0),
                )?,
            };
            return if present {
                Err(StoreError::AlreadyPresent(list))
            } else {
                Ok(())
            };
        }

        Step::Push { owner, list: ListName::Invitations(kind), peer } => {
            // History sets refresh the timestamp of an existing entry; pending
            // sets must not already contain the peer.
            let on_conflict = if kind.is_history() {
                "ON CONFLICT (relationship_id, kind, peer_id)
                 DO UPDATE SET added_at = excluded.added_at"
            } else {
                "ON CONFLICT DO NOTHING"
            };
            let sql = format!(
                "INSERT INTO relationship_entries (relationship_id, kind, peer_id, added_at)
                 SELECT r.id, ?2, ?3, ?4 FROM relationships r WHERE r.owner_id = ?1
                 {}",
                on_conflict
            );
            tx.execute(&sql, (owner.to_string(), kind.as_str(), peer.to_string(), now))?
        }

        Step::Pull { owner, kind, peer } => tx.execute(
            "DELETE FROM relationship_entries
             WHERE relationship_id = (SELECT id FROM relationships WHERE owner_id = ?1)
               AND kind = ?2 AND peer_id = ?3",
            (owner.to_string(), kind.as_str(), peer.to_string()),
        )?,

        Step::Push { owner, list: ListName::Friends, peer } => tx.execute(
            "INSERT INTO friends (user_id, friend_id, since)
             SELECT ?1, ?2, ?3 WHERE EXISTS (SELECT 1 FROM users WHERE id = ?1)
             ON CONFLICT DO NOTHING",
            (owner.to_string(), peer.to_string(), now),
        )?,
    };

    expect_one(changed, step.to_string())
}

fn relationship_id(conn: &Connection, owner: Uuid) -> Result<Option<String>, StoreError> {
    conn.query_row(
        "SELECT id FROM relationships WHERE owner_id = ?1",
        [owner.to_string()],
        |row| row.get(0),
    )
    .optional()
}
