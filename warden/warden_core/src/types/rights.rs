//! Ordered lists of right names.

use super::flags::AuthorizationFlags;

/// One entry of a [`RightsList`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Right {
    name: String,
    flags: AuthorizationFlags,
}

impl Right {
    /// Create a new entry.
    pub fn new(name: impl Into<String>, flags: AuthorizationFlags) -> Self {
        Self {
            name: name.into(),
            flags,
        }
    }

    /// Get the right name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the flags attached to this entry.
    pub fn flags(&self) -> AuthorizationFlags {
        self.flags
    }
}

/// An ordered sequence of rights.
///
/// Appending never deduplicates. Lookups return the first entry with a
/// matching name; removal deletes every matching entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RightsList {
    rights: Vec<Right>,
}

impl RightsList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a right with no flags.
    pub fn add(&mut self, name: impl Into<String>) {
        self.add_with_flags(name, AuthorizationFlags::empty());
    }

    /// Append a right with the given flags.
    pub fn add_with_flags(&mut self, name: impl Into<String>, flags: AuthorizationFlags) {
        self.rights.push(Right::new(name, flags));
    }

    /// Get the first entry named `name`.
    pub fn get(&self, name: &str) -> Option<&Right> {
        self.rights.iter().find(|r| r.name == name)
    }

    /// Check whether any entry is named `name`.
    pub fn exists(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove every entry named `name`.
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.rights.len();
        self.rights.retain(|r| r.name != name);
        before - self.rights.len()
    }

    /// Add flags to the first entry named `name`.
    pub fn set_flags(&mut self, name: &str, flags: AuthorizationFlags) {
        if let Some(right) = self.rights.iter_mut().find(|r| r.name == name) {
            right.flags |= flags;
        }
    }

    /// Get the flags of the first entry named `name`.
    pub fn get_flags(&self, name: &str) -> AuthorizationFlags {
        self.get(name).map(|r| r.flags).unwrap_or_default()
    }

    /// Iterate in order.
    pub fn iter(&self) -> impl Iterator<Item = &Right> {
        self.rights.iter()
    }

    /// Iterate over names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rights.iter().map(|r| r.name.as_str())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.rights.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.rights.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.rights.clear();
    }
}

impl<S: Into<String>> FromIterator<S> for RightsList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = RightsList::new();
        for name in iter {
            list.add(name);
        }
        list
    }
}
