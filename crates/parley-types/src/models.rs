use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    /// Unique key for login lookups.
    pub email: String,
    pub password_hash: String,
    pub logged_in: bool,
    pub last_login: Option<DateTime<Utc>>,
    /// Set once the user's relationship record exists. Never `None` for a
    /// user that finished registration.
    pub relationship_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// The five invitation sets kept on every relationship record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvitationKind {
    Sent,
    Received,
    Accepted,
    Rejected,
    Cancelled,
}

impl InvitationKind {
    pub const ALL: [InvitationKind; 5] = [
        Self::Sent,
        Self::Received,
        Self::Accepted,
        Self::Rejected,
        Self::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Received => "received",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// Pending sets hold at most one entry per peer; history sets are
    /// refreshed when the same peer lands in them again.
    pub fn is_history(self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Cancelled)
    }
}

impl fmt::Display for InvitationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvitationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "received" => Ok(Self::Received),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown invitation kind '{}'", other)),
        }
    }
}

/// One per user. Invitation state is positional: it is whichever set the
/// peer id currently lives in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relationship {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub sent: BTreeSet<Uuid>,
    pub received: BTreeSet<Uuid>,
    pub accepted: BTreeSet<Uuid>,
    pub rejected: BTreeSet<Uuid>,
    pub cancelled: BTreeSet<Uuid>,
}

impl Relationship {
    pub fn set(&self, kind: InvitationKind) -> &BTreeSet<Uuid> {
        match kind {
            InvitationKind::Sent => &self.sent,
            InvitationKind::Received => &self.received,
            InvitationKind::Accepted => &self.accepted,
            InvitationKind::Rejected => &self.rejected,
            InvitationKind::Cancelled => &self.cancelled,
        }
    }

    pub fn set_mut(&mut self, kind: InvitationKind) -> &mut BTreeSet<Uuid> {
        match kind {
            InvitationKind::Sent => &mut self.sent,
            InvitationKind::Received => &mut self.received,
            InvitationKind::Accepted => &mut self.accepted,
            InvitationKind::Rejected => &mut self.rejected,
            InvitationKind::Cancelled => &mut self.cancelled,
        }
    }
}

/// Unordered user pair in canonical order, so both participants resolve to
/// the same chat record whoever writes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatPair {
    low: Uuid,
    high: Uuid,
}

impl ChatPair {
    pub fn new(a: Uuid, b: Uuid) -> Self {
        // Compare the textual form: that is the order the pair is keyed by.
        if a.hyphenated().to_string() <= b.hyphenated().to_string() {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn low(&self) -> Uuid {
        self.low
    }

    pub fn high(&self) -> Uuid {
        self.high
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.low == id || self.high == id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender_id: Uuid,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Poll cursor value for this message.
    pub fn cursor(&self) -> i64 {
        self.sent_at.timestamp_micros()
    }
}

#[derive(Debug, Clone)]
pub struct Chat {
    pub id: Uuid,
    pub pair: ChatPair,
    pub messages: Vec<ChatMessage>,
}

/// Summary rendered by the "view profile" dashboard entry.
#[derive(Debug, Clone)]
pub struct Profile {
    pub user: User,
    pub friend_count: usize,
    pub pending_sent: usize,
    pub pending_received: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_pair_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(ChatPair::new(a, b), ChatPair::new(b, a));

        let pair = ChatPair::new(a, b);
        assert!(pair.low().to_string() <= pair.high().to_string());
        assert!(pair.contains(a) && pair.contains(b));
    }

    #[test]
    fn invitation_kind_parses_its_own_names() {
        for kind in InvitationKind::ALL {
            assert_eq!(kind.as_str().parse::<InvitationKind>().unwrap(), kind);
        }
        assert!("friends".parse::<InvitationKind>().is_err());
    }

    #[test]
    fn relationship_accessors_return_the_named_set() {
        let mut rel = Relationship::default();
        let peer = Uuid::new_v4();
        rel.set_mut(InvitationKind::Accepted).insert(peer);

        assert!(rel.accepted.contains(&peer));
        assert!(rel.set(InvitationKind::Accepted).contains(&peer));
        assert!(rel.set(InvitationKind::Sent).is_empty());
    }
}
