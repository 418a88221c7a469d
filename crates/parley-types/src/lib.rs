pub mod models;

pub use models::{Chat, ChatMessage, ChatPair, InvitationKind, Profile, Relationship, User};
