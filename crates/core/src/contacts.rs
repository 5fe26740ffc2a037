//! User-contact lookup
//!
//! Resolving `user_id -> {email, phone, telegram chat id}` is an external
//! collaborator: the core only depends on a fixed directory interface.
//! `StaticContactDirectory` is an in-memory fixture implementation; a real
//! deployment would swap this for a lookup against the user service.

use std::collections::HashMap;

/// Contact details resolved for a single user.
#[derive(Debug, Clone, Default)]
pub struct UserContact {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub telegram_chat_id: Option<i64>,
}

/// Resolves a `user_id` to its delivery contact details.
///
/// Implementations may fail to resolve a field (missing phone, etc); a
/// missing field yields a null payload slot rather than an error, and the
/// channel sender is responsible for failing that attempt.
pub trait ContactDirectory: Send + Sync {
    fn lookup(&self, user_id: i64) -> UserContact;
}

/// An in-memory directory, keyed by user id.
#[derive(Debug, Clone, Default)]
pub struct StaticContactDirectory {
    contacts: HashMap<i64, UserContact>,
}

impl StaticContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contact(mut self, user_id: i64, contact: UserContact) -> Self {
        self.contacts.insert(user_id, contact);
        self
    }
}

impl ContactDirectory for StaticContactDirectory {
    fn lookup(&self, user_id: i64) -> UserContact {
        self.contacts.get(&user_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_resolves_to_empty_contact() {
        let dir = StaticContactDirectory::new();
        let contact = dir.lookup(42);
        assert!(contact.email.is_none());
        assert!(contact.phone.is_none());
        assert!(contact.telegram_chat_id.is_none());
    }

    #[test]
    fn known_user_resolves_contact() {
        let dir = StaticContactDirectory::new().with_contact(
            1,
            UserContact {
                email: Some("a@example.com".to_string()),
                phone: Some("+15551234567".to_string()),
                telegram_chat_id: Some(987654321),
            },
        );
        let contact = dir.lookup(1);
        assert_eq!(contact.email.as_deref(), Some("a@example.com"));
        assert_eq!(contact.telegram_chat_id, Some(987654321));
    }
}
