//! User records and the directory lookup trait.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ClipperError, Result};

/// Identity of a user; also names the user's mailbox directory.
pub type UserId = i64;

/// A user as stored in the directory file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User ID.
    pub id: UserId,
    /// Name shown to friends.
    pub display_name: String,
    /// Bearer credential, compared verbatim.
    pub password: String,
    /// IDs this user may send media to.
    #[serde(default)]
    pub friends: Vec<UserId>,
}

impl User {
    /// Create a user with no friends.
    pub fn new(id: UserId, display_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            password: password.into(),
            friends: Vec::new(),
        }
    }

    /// Set the friend list.
    pub fn with_friends(mut self, friends: impl IntoIterator<Item = UserId>) -> Self {
        self.friends = friends.into_iter().collect();
        self
    }

    /// Check whether `id` is in this user's friend list.
    pub fn is_friend(&self, id: UserId) -> bool {
        self.friends.contains(&id)
    }
}

/// Public view of a friend, as returned by the contacts endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Contact {
    /// User ID.
    pub id: UserId,
    /// Display name.
    pub display_name: String,
}

impl From<&User> for Contact {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            display_name: user.display_name.clone(),
        }
    }
}

/// Read-only lookup of users by credential.
///
/// Implementations return the full user list; credential resolution and
/// friend filtering are provided on top of it.
pub trait UserDirectory: Send + Sync {
    /// Load every user, in directory order.
    fn users(&self) -> Result<Vec<User>>;

    /// Resolve a credential to its user.
    ///
    /// Returns [`ClipperError::Unauthorized`] when no user matches.
    fn authenticate(&self, credential: &str) -> Result<User> {
        if credential.is_empty() {
            return Err(ClipperError::Unauthorized("invalid user password".to_string()));
        }
        self.users()?
            .into_iter()
            .find(|u| u.password == credential)
            .ok_or_else(|| ClipperError::Unauthorized("invalid user password".to_string()))
    }

    /// The friends of `user` that exist in the directory, in directory order.
    fn contacts_of(&self, user: &User) -> Result<Vec<Contact>> {
        Ok(self
            .users()?
            .iter()
            .filter(|u| user.is_friend(u.id))
            .map(Contact::from)
            .collect())
    }
}

/// Directory backed by a JSON file containing an array of users.
///
/// The file is re-read on every lookup, so edits apply without a restart.
#[derive(Debug, Clone)]
pub struct JsonUserDirectory {
    path: PathBuf,
}

impl JsonUserDirectory {
    /// Create a directory reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UserDirectory for JsonUserDirectory {
    fn users(&self) -> Result<Vec<User>> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ClipperError::Config(format!(
                    "user directory {} does not exist",
                    self.path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&content)?)
    }
}

/// In-memory directory, used by tests and embedders.
#[derive(Debug, Clone, Default)]
pub struct MemoryUserDirectory {
    users: Vec<User>,
}

impl MemoryUserDirectory {
    /// Create a directory holding `users`.
    pub fn new(users: Vec<User>) -> Self {
        Self { users }
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn users(&self) -> Result<Vec<User>> {
        Ok(self.users.clone())
    }
}
