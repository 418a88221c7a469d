use rusqlite::{Connection, TransactionBehavior};
use tracing::trace;
use uuid::Uuid;

use parley_types::{Chat, ChatMessage, ChatPair};

use crate::error::OptionalExt;
use crate::models::{parse_uuid, time_from_micros};
use crate::{Database, StoreError, expect_one};

impl Database {
    /// The chat record of the pair with its full transcript in stored order.
    pub fn get_chat(&self, a: Uuid, b: Uuid) -> Result<Chat, StoreError> {
        let pair = ChatPair::new(a, b);
        self.with_conn(|conn| {
            let chat_id = chat_id(conn, pair)?.ok_or(StoreError::NotFound)?;
            let messages = query_messages(
                conn,
                "SELECT sender_id, body, sent_at FROM messages WHERE chat_id = ?1 ORDER BY seq",
                [&chat_id],
            )?;
            Ok(Chat {
                id: parse_uuid(&chat_id)?,
                pair,
                messages,
            })
        })
    }

    /// Append a message to the pair's chat, creating the record on first use.
    ///
    /// Timestamps are strictly increasing within one chat: a message stamped
    /// at or before the latest stored one is moved just past it. The stored
    /// message is returned.
    pub fn append_message(
        &self,
        a: Uuid,
        b: Uuid,
        message: &ChatMessage,
    ) -> Result<ChatMessage, StoreError> {
        let pair = ChatPair::new(a, b);
        if !pair.contains(message.sender_id) {
            return Err(StoreError::Invalid(format!(
                "sender {} is not part of chat {} / {}",
                message.sender_id,
                pair.low(),
                pair.high()
            )));
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            tx.execute(
                "INSERT INTO chats (id, user_low, user_high) VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_low, user_high) DO NOTHING",
                (Uuid::new_v4().to_string(), pair.low().to_string(), pair.high().to_string()),
            )?;
            let chat_id = chat_id(&tx, pair)?.ok_or(StoreError::NotFound)?;

            let latest: Option<i64> = tx.query_row(
                "SELECT MAX(sent_at) FROM messages WHERE chat_id = ?1",
                [&chat_id],
                |row| row.get(0),
            )?;
            let sent_at = match latest {
                Some(latest) if latest >= message.cursor() => latest + 1,
                _ => message.cursor(),
            };

            let inserted = tx.execute(
                "INSERT INTO messages (chat_id, sender_id, body, sent_at) VALUES (?1, ?2, ?3, ?4)",
                (&chat_id, message.sender_id.to_string(), &message.text, sent_at),
            )?;
            expect_one(inserted, format!("append message to chat {}", chat_id))?;
            tx.commit()?;

            trace!("Stored message in chat {} at {}", chat_id, sent_at);
            Ok(ChatMessage {
                sender_id: message.sender_id,
                text: message.text.clone(),
                sent_at: time_from_micros(sent_at)?,
            })
        })
    }

    /// Messages written by `author` in the pair's chat after the `after`
    /// cursor, oldest first. A pair without a chat record has none.
    pub fn messages_since(
        &self,
        pair: ChatPair,
        author: Uuid,
        after: i64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.with_conn(|conn| {
            query_messages(
                conn,
                "SELECT m.sender_id, m.body, m.sent_at
                 FROM messages m
                 JOIN chats c ON c.id = m.chat_id
                 WHERE c.user_low = ?1 AND c.user_high = ?2
                   AND m.sender_id = ?3 AND m.sent_at > ?4
                 ORDER BY m.sent_at, m.seq",
                (pair.low().to_string(), pair.high().to_string(), author.to_string(), after),
            )
        })
    }
}

fn chat_id(conn: &Connection, pair: ChatPair) -> Result<Option<String>, StoreError> {
    conn.query_row(
        "SELECT id FROM chats WHERE user_low = ?1 AND user_high = ?2",
        (pair.low().to_string(), pair.high().to_string()),
        |row| row.get(0),
    )
    .optional()
}

fn query_messages<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<ChatMessage>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(sender, text, sent_at)| {
            Ok(ChatMessage {
                sender_id: parse_uuid(&sender)?,
                text,
                sent_at: time_from_micros(sent_at)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::test_support::new_user;

    fn msg(sender: Uuid, text: &str) -> ChatMessage {
        ChatMessage {
            sender_id: sender,
            text: text.into(),
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn both_directions_share_one_chat_record() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_user(&new_user("a@x.com")).unwrap().id;
        let b = db.create_user(&new_user("b@x.com")).unwrap().id;

        db.append_message(a, b, &msg(a, "hi")).unwrap();
        db.append_message(b, a, &msg(b, "hello")).unwrap();

        let from_a = db.get_chat(a, b).unwrap();
        let from_b = db.get_chat(b, a).unwrap();
        assert_eq!(from_a.id, from_b.id);
        assert_eq!(from_a.messages.len(), 2);
        assert_eq!(from_a.messages[0].text, "hi");
        assert_eq!(from_a.messages[1].text, "hello");

        let chats: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM chats", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(chats, 1);
    }

    #[test]
    fn missing_chat_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_chat(Uuid::new_v4(), Uuid::new_v4()).unwrap_err().is_not_found());
    }

    #[test]
    fn timestamps_strictly_increase_within_a_chat() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_user(&new_user("a@x.com")).unwrap().id;
        let b = db.create_user(&new_user("b@x.com")).unwrap().id;

        let fixed = Utc::now();
        let stamped = |sender_id, text: &str| ChatMessage {
            sender_id,
            text: text.into(),
            sent_at: fixed,
        };
        let first = db.append_message(a, b, &stamped(a, "1")).unwrap();
        let second = db.append_message(a, b, &stamped(b, "2")).unwrap();
        assert!(second.cursor() > first.cursor());
    }

    #[test]
    fn messages_since_filters_author_and_cursor() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_user(&new_user("a@x.com")).unwrap().id;
        let b = db.create_user(&new_user("b@x.com")).unwrap().id;
        let pair = ChatPair::new(a, b);

        let first = db.append_message(a, b, &msg(b, "one")).unwrap();
        db.append_message(a, b, &msg(a, "mine")).unwrap();
        db.append_message(a, b, &msg(b, "two")).unwrap();

        let all = db.messages_since(pair, b, 0).unwrap();
        assert_eq!(
            all.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(),
            ["one", "two"]
        );

        let newer = db.messages_since(pair, b, first.cursor()).unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].text, "two");
    }

    #[test]
    fn outsider_cannot_append() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let err = db.append_message(a, b, &msg(Uuid::new_v4(), "x")).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }
}
