//! Text sent to clients.

use chrono::{DateTime, Utc};

use parley_types::{ChatMessage, Profile, User};

pub const GREETING: &str = "Welcome to Parley.\n";
pub const FAREWELL: &str = "Goodbye!\n";
pub const SHUTDOWN_NOTICE: &str = "\nThe server is shutting down. Goodbye!\n";

pub const EMPTY_INPUT: &str = "Input cannot be empty.\n";
pub const INVALID_INPUT: &str = "Invalid input, try again.\n";
pub const INVALID_SELECTION: &str = "No such entry.\n";
pub const ACTION_FAILED: &str = "Something went wrong, please try again later.\n";

// -- Authentication --

pub const EMAIL_PROMPT: &str = "Email: ";
pub const INVALID_EMAIL: &str = "That doesn't look like a valid email address.\n";
pub const TOO_MANY_ATTEMPTS: &str = "Too many attempts, closing the connection.\n";
pub const PASSWORD_PROMPT: &str = "Password: ";
pub const WRONG_PASSWORD: &str = "Incorrect password.\n";
pub const READING_PASSWORD_FAILED: &str = "Reading password failed.\n";
pub const FIRST_NAME_PROMPT: &str = "First name: ";
pub const LAST_NAME_PROMPT: &str = "Last name: ";
pub const CONFIRM_PASSWORD_PROMPT: &str = "Confirm password: ";
pub const PASSWORD_MISMATCH: &str = "Passwords do not match.\n";
pub const USER_EXISTS: &str = "Registration failed: user exists.\n";

pub fn new_account(email: &str) -> String {
    format!("No account found for {}. Let's create one.\n", email)
}

pub fn password_too_short(min: usize) -> String {
    format!("Password must be at least {} characters.\n", min)
}

pub fn welcome(user: &User) -> String {
    format!("Welcome, {}!\n", user.first_name)
}

// -- Dashboard --

pub const DASHBOARD: &str = "\n\
    ==== Dashboard ====\n\
    1. Chat with an online friend\n\
    2. List friends\n\
    3. Send an invitation\n\
    4. Manage invitations\n\
    5. Change password\n\
    6. Change name\n\
    7. View profile\n\
    0. Exit\n\
    Choose an option: ";

pub const NO_FRIENDS: &str = "You have no friends yet. Send an invitation!\n";
pub const NO_ONLINE_FRIENDS: &str = "None of your friends are online.\n";
pub const ONLINE_FRIENDS_HEADER: &str = "Online friends:\n";
pub const FRIENDS_HEADER: &str = "Your friends:\n";
pub const SELECT_FRIEND_PROMPT: &str = "Select a friend: ";

pub fn numbered(index: usize, user: &User) -> String {
    format!("  {}. {} <{}>\n", index, user.full_name(), user.email)
}

pub fn friend_entry(index: usize, user: &User) -> String {
    let status = if user.logged_in { " (online)" } else { "" };
    format!("  {}. {} <{}>{}\n", index, user.full_name(), user.email, status)
}

// -- Invitations --

pub const INVITE_EMAIL_PROMPT: &str = "Email of the person to invite: ";
pub const NO_SUCH_USER: &str = "No user with that email.\n";

pub fn invitation_sent(to: &User) -> String {
    format!("Invitation sent to {}.\n", to.full_name())
}

pub const INVITATIONS_MENU: &str = "\n\
    ==== Invitations ====\n\
    1. Received, waiting for you\n\
    2. Sent, waiting for them\n\
    3. Received history\n\
    4. Sent history\n\
    0. Back\n\
    Choose an option: ";

pub const NO_INVITATIONS: &str = "Nothing here.\n";
pub const RESPOND_PROMPT: &str = "Enter a number to respond, or 0 to go back: ";
pub const ACCEPT_OR_REJECT_PROMPT: &str = "Accept (a) or reject (r)? ";
pub const CANCEL_PROMPT: &str = "Enter a number to cancel, or 0 to go back: ";

pub fn friend_added(peer: &User) -> String {
    format!("You and {} are now friends.\n", peer.full_name())
}

pub fn invitation_rejected(peer: &User) -> String {
    format!("Rejected the invitation from {}.\n", peer.full_name())
}

pub fn invitation_cancelled(peer: &User) -> String {
    format!("Cancelled the invitation to {}.\n", peer.full_name())
}

pub fn history_entry(label: &str, user: &User) -> String {
    format!("  [{}] {} <{}>\n", label, user.full_name(), user.email)
}

// -- Profile --

pub const CURRENT_PASSWORD_PROMPT: &str = "Current password: ";
pub const NEW_PASSWORD_PROMPT: &str = "New password: ";
pub const CONFIRM_NEW_PASSWORD_PROMPT: &str = "Confirm new password: ";
pub const PASSWORD_CHANGED: &str = "Password changed.\n";
pub const FIRST_NAME_KEEP_PROMPT: &str = "First name (blank to keep): ";
pub const LAST_NAME_KEEP_PROMPT: &str = "Last name (blank to keep): ";
pub const NOTHING_TO_CHANGE: &str = "Nothing to change.\n";

pub fn name_changed(user: &User) -> String {
    format!("Your name is now {}.\n", user.full_name())
}

pub fn profile(profile: &Profile) -> String {
    let user = &profile.user;
    let last_login = user
        .last_login
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    format!(
        "\n==== Profile ====\n\
         Name: {}\n\
         Email: {}\n\
         Last login: {}\n\
         Friends: {}\n\
         Pending invitations: {} sent, {} received\n",
        user.full_name(),
        user.email,
        last_login,
        profile.friend_count,
        profile.pending_sent,
        profile.pending_received,
    )
}

// -- Chat --

pub const EMPTY_MESSAGE: &str = "(empty message not sent)\n";
pub const MESSAGE_NOT_SENT: &str = "(message could not be sent)\n";
pub const CHAT_UPDATES_STOPPED: &str = "(live updates stopped)\n";

pub fn chat_header(peer: &User) -> String {
    format!("\n==== Chat with {} (type q to leave) ====\n", peer.full_name())
}

pub fn chat_line(author: &str, message: &ChatMessage) -> String {
    format!("{} [{}]: {}\n", author, clock(message.sent_at), message.text)
}

fn clock(at: DateTime<Utc>) -> String {
    at.format("%H:%M:%S").to_string()
}
