//! Source of notification targets

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::config::NotificationTarget;

/// Lookup of everyone who should receive alerts.
///
/// Called on every dispatch; implementations must not cache on the caller's
/// behalf.
pub trait TargetDirectory: Send + Sync {
    fn targets(&self) -> Result<Vec<NotificationTarget>, DirectoryError>;
}

/// A user account as far as alerting is concerned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub email: String,
    pub external_id: Option<String>,
}

/// In-memory user directory. Users without an external id are skipped.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<Vec<DirectoryUser>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory holding one user per external id
    pub fn with_external_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let directory = Self::new();
        for (i, id) in ids.into_iter().enumerate() {
            directory.add_user(DirectoryUser {
                email: format!("target-{}@local", i + 1),
                external_id: Some(id.into()),
            });
        }
        directory
    }

    pub fn add_user(&self, user: DirectoryUser) {
        self.users.write().push(user);
    }

    /// Link or unlink a user's external id. Returns false if no such user.
    pub fn set_external_id(&self, email: &str, external_id: Option<String>) -> bool {
        let mut users = self.users.write();
        match users.iter_mut().find(|u| u.email == email) {
            Some(user) => {
                user.external_id = external_id;
                true
            }
            None => false,
        }
    }

    pub fn remove_user(&self, email: &str) -> bool {
        let mut users = self.users.write();
        let before = users.len();
        users.retain(|u| u.email != email);
        users.len() != before
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

impl TargetDirectory for InMemoryDirectory {
    fn targets(&self) -> Result<Vec<NotificationTarget>, DirectoryError> {
        Ok(self
            .users
            .read()
            .iter()
            .filter_map(|u| u.external_id.as_deref())
            .filter(|id| !id.is_empty())
            .map(NotificationTarget::new)
            .collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_users_without_external_id() {
        let directory = InMemoryDirectory::new();
        directory.add_user(DirectoryUser {
            email: "a@example.com".to_string(),
            external_id: Some("111".to_string()),
        });
        directory.add_user(DirectoryUser {
            email: "b@example.com".to_string(),
            external_id: None,
        });

        let targets = directory.targets().unwrap();
        assert_eq!(targets, vec![NotificationTarget::new("111")]);
    }

    #[test]
    fn test_changes_are_visible_on_next_lookup() {
        let directory = InMemoryDirectory::with_external_ids(["1"]);
        directory.add_user(DirectoryUser {
            email: "late@example.com".to_string(),
            external_id: None,
        });
        assert_eq!(directory.targets().unwrap().len(), 1);

        assert!(directory.set_external_id("late@example.com", Some("2".to_string())));
        assert_eq!(directory.targets().unwrap().len(), 2);

        assert!(directory.remove_user("target-1@local"));
        assert_eq!(directory.targets().unwrap(), vec![NotificationTarget::new("2")]);
    }

    #[test]
    fn test_empty_external_id_is_skipped() {
        let directory = InMemoryDirectory::with_external_ids(["", "7"]);
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.targets().unwrap(), vec![NotificationTarget::new("7")]);
    }
}
