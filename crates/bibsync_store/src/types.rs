//! Core type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a library.
///
/// Every user has exactly one personal library; group libraries are shared
/// and identified by the server-assigned group id. Each library carries its
/// own version sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LibraryId {
    /// The user's personal library.
    User,
    /// A shared group library.
    Group(u64),
}

impl LibraryId {
    /// Returns the API path prefix for this library (`users/<id>` or `groups/<id>`).
    #[must_use]
    pub fn api_prefix(&self, user_id: u64) -> String {
        match self {
            LibraryId::User => format!("users/{user_id}"),
            LibraryId::Group(group_id) => format!("groups/{group_id}"),
        }
    }

    /// Returns true for group libraries.
    #[must_use]
    pub fn is_group(&self) -> bool {
        matches!(self, LibraryId::Group(_))
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryId::User => write!(f, "my library"),
            LibraryId::Group(id) => write!(f, "group {id}"),
        }
    }
}

/// Fully qualified reference to an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityRef {
    /// Owning library.
    pub library_id: LibraryId,
    /// Entity key, unique within the library.
    pub key: String,
}

impl EntityRef {
    /// Creates a new entity reference.
    pub fn new(library_id: LibraryId, key: impl Into<String>) -> Self {
        Self {
            library_id,
            key: key.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.library_id, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_prefix() {
        assert_eq!(LibraryId::User.api_prefix(42), "users/42");
        assert_eq!(LibraryId::Group(9).api_prefix(42), "groups/9");
    }

    #[test]
    fn library_ordering_puts_user_first() {
        let mut ids = vec![LibraryId::Group(3), LibraryId::User, LibraryId::Group(1)];
        ids.sort();
        assert_eq!(ids, vec![LibraryId::User, LibraryId::Group(1), LibraryId::Group(3)]);
    }
}
