//! Typed, flagged key/value stores.
//!
//! An [`ItemStore`] is the unit of data exchanged between the engine and
//! authentication agents: hints flow in, context flows back. Every value is
//! stored as raw bytes together with a type tag, so reading a value as a
//! different type than it was written degrades to a coercion or a default
//! rather than failing.
//!
//! Numeric values are stored little-endian. Strings are stored as UTF-8
//! without a terminator.
//!
//! # Examples
//!
//! ```
//! use warden_core::types::{ItemFlags, ItemStore};
//!
//! let mut hints = ItemStore::new();
//! hints.set_int("tries", 2);
//! hints.set_string("reason", "3");
//!
//! assert_eq!(hints.get_int("tries"), 2);
//! // Strings are parsed when read as numbers.
//! assert_eq!(hints.get_int("reason"), 3);
//! // Missing keys read as zero.
//! assert_eq!(hints.get_uint64("missing"), 0);
//!
//! hints.set_flags("tries", ItemFlags::VOLATILE);
//! assert!(hints.check_flags("tries", ItemFlags::VOLATILE | ItemFlags::STICKY));
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use zeroize::Zeroize;

use super::{Uid, UID_NONE};

/// Type tag of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    /// Untyped value.
    #[default]
    Unknown,
    /// A right name.
    Right,
    /// UTF-8 string.
    String,
    /// Signed 32-bit integer.
    Int,
    /// Unsigned 32-bit integer.
    UInt,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 64-bit integer.
    UInt64,
    /// 64-bit float.
    Double,
    /// Boolean.
    Bool,
    /// Opaque bytes.
    Data,
}

bitflags! {
    /// Per-item flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ItemFlags: u32 {
        /// May be copied to the caller's token after evaluation.
        const EXTRACTABLE = 1 << 0;

        /// Only valid for the current evaluation.
        const VOLATILE    = 1 << 1;

        /// Survives a denied attempt and re-seeds the next one.
        const STICKY      = 1 << 2;

        /// Secret. Carried out-of-band and zeroed after use.
        const SENSITIVE   = 1 << 3;

        /// Scoped to the right currently being evaluated.
        const TEMPORARY   = 1 << 30;
    }
}

/// A single named value.
#[derive(Clone)]
pub struct Item {
    name: String,
    item_type: ItemType,
    flags: ItemFlags,
    value: Vec<u8>,
}

impl Item {
    /// Create a new item.
    pub fn new(
        name: impl Into<String>,
        item_type: ItemType,
        flags: ItemFlags,
        value: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            item_type,
            flags,
            value,
        }
    }

    /// Get the item name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the type tag.
    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    /// Get the flags.
    pub fn flags(&self) -> ItemFlags {
        self.flags
    }

    /// Get the raw value bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Whether the item is flagged sensitive.
    pub fn is_sensitive(&self) -> bool {
        self.flags.contains(ItemFlags::SENSITIVE)
    }

    /// Move the value out, leaving the item empty.
    ///
    /// Used by transports that carry the value out-of-band.
    pub fn take_value(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.value)
    }

    /// Zero and discard the value.
    pub fn scrub(&mut self) {
        self.value.zeroize();
    }

    /// Render the value for display. Sensitive values are masked.
    pub fn display_value(&self) -> String {
        if self.is_sensitive() {
            return format!("<{} bytes>", self.value.len());
        }
        match self.item_type {
            ItemType::String | ItemType::Right => String::from_utf8_lossy(&self.value).into_owned(),
            ItemType::Int => decode_i32(&self.value).to_string(),
            ItemType::UInt => decode_u32(&self.value).to_string(),
            ItemType::Int64 => decode_i64(&self.value).to_string(),
            ItemType::UInt64 => decode_u64(&self.value).to_string(),
            ItemType::Double => decode_f64(&self.value).to_string(),
            ItemType::Bool => decode_bool(&self.value).to_string(),
            ItemType::Data | ItemType::Unknown => format!("<{} bytes>", self.value.len()),
        }
    }

    fn overwrite(&mut self, item_type: ItemType, bytes: &[u8]) {
        if self.item_type == item_type && self.value.capacity() >= bytes.len() {
            // Zero the previous contents, then refill the same allocation.
            for b in self.value.iter_mut() {
                *b = 0;
            }
            self.value.clear();
            self.value.extend_from_slice(bytes);
        } else {
            self.value.zeroize();
            self.item_type = item_type;
            self.value = bytes.to_vec();
        }
    }
}

impl Drop for Item {
    fn drop(&mut self) {
        if self.flags.contains(ItemFlags::SENSITIVE) {
            self.value.zeroize();
        }
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("name", &self.name)
            .field("type", &self.item_type)
            .field("flags", &self.flags)
            .field("value", &self.display_value())
            .finish()
    }
}

fn decode_i32(bytes: &[u8]) -> i32 {
    bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_le_bytes)
        .unwrap_or(0)
}

fn decode_u32(bytes: &[u8]) -> u32 {
    bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .unwrap_or(0)
}

fn decode_i64(bytes: &[u8]) -> i64 {
    bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .map(i64::from_le_bytes)
        .unwrap_or(0)
}

fn decode_u64(bytes: &[u8]) -> u64 {
    bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .unwrap_or(0)
}

fn decode_f64(bytes: &[u8]) -> f64 {
    bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .map(f64::from_le_bytes)
        .unwrap_or(0.0)
}

fn decode_bool(bytes: &[u8]) -> bool {
    bytes.first().is_some_and(|b| *b != 0)
}

/// An unordered map from name to [`Item`].
#[derive(Clone, Default)]
pub struct ItemStore {
    items: HashMap<String, Item>,
}

impl ItemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn set_raw(&mut self, key: &str, item_type: ItemType, bytes: &[u8]) {
        match self.items.get_mut(key) {
            Some(item) => item.overwrite(item_type, bytes),
            None => {
                self.items.insert(
                    key.to_string(),
                    Item::new(key, item_type, ItemFlags::empty(), bytes.to_vec()),
                );
            }
        }
    }

    fn typed(&self, key: &str) -> Option<&Item> {
        self.items.get(key)
    }

    /// Insert a fully formed item, replacing any item with the same name.
    pub fn insert(&mut self, item: Item) {
        self.items.insert(item.name.clone(), item);
    }

    /// Get an item by name.
    pub fn get(&self, key: &str) -> Option<&Item> {
        self.items.get(key)
    }

    /// Set a string value.
    pub fn set_string(&mut self, key: &str, value: &str) {
        self.set_raw(key, ItemType::String, value.as_bytes());
    }

    /// Get a string value.
    ///
    /// # Returns
    ///
    /// The value if the item exists, is string-typed, and is valid UTF-8.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.typed(key) {
            Some(item) if item.item_type == ItemType::String => {
                std::str::from_utf8(&item.value).ok()
            }
            _ => None,
        }
    }

    /// Set a boolean value.
    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.set_raw(key, ItemType::Bool, &[u8::from(value)]);
    }

    /// Get a boolean value.
    ///
    /// String items read as `true` when they spell `true` or a non-zero
    /// number. Any other type mismatch reads as `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        match self.typed(key) {
            Some(item) => match item.item_type {
                ItemType::Bool => decode_bool(&item.value),
                ItemType::String => {
                    let text = String::from_utf8_lossy(&item.value);
                    let text = text.trim();
                    text.eq_ignore_ascii_case("true")
                        || text.parse::<i64>().map(|n| n != 0).unwrap_or(false)
                }
                _ => false,
            },
            None => false,
        }
    }

    /// Set a signed 32-bit value.
    pub fn set_int(&mut self, key: &str, value: i32) {
        self.set_raw(key, ItemType::Int, &value.to_le_bytes());
    }

    /// Get a signed 32-bit value, or 0.
    pub fn get_int(&self, key: &str) -> i32 {
        self.numeric(key, ItemType::Int, decode_i32)
    }

    /// Set an unsigned 32-bit value.
    pub fn set_uint(&mut self, key: &str, value: u32) {
        self.set_raw(key, ItemType::UInt, &value.to_le_bytes());
    }

    /// Get an unsigned 32-bit value, or 0.
    pub fn get_uint(&self, key: &str) -> u32 {
        self.numeric(key, ItemType::UInt, decode_u32)
    }

    /// Set a signed 64-bit value.
    pub fn set_int64(&mut self, key: &str, value: i64) {
        self.set_raw(key, ItemType::Int64, &value.to_le_bytes());
    }

    /// Get a signed 64-bit value, or 0.
    pub fn get_int64(&self, key: &str) -> i64 {
        self.numeric(key, ItemType::Int64, decode_i64)
    }

    /// Set an unsigned 64-bit value.
    pub fn set_uint64(&mut self, key: &str, value: u64) {
        self.set_raw(key, ItemType::UInt64, &value.to_le_bytes());
    }

    /// Get an unsigned 64-bit value, or 0.
    pub fn get_uint64(&self, key: &str) -> u64 {
        self.numeric(key, ItemType::UInt64, decode_u64)
    }

    /// Read a user id without coercing to a default.
    ///
    /// Accepts any integer type and numeric strings as long as the value is
    /// a non-negative `i32`. Everything else, including a missing key, reads
    /// as [`UID_NONE`] so a malformed value never turns into uid 0.
    pub fn get_uid(&self, key: &str) -> Uid {
        let Some(item) = self.typed(key) else {
            return UID_NONE;
        };
        let value: Option<i64> = match item.item_type {
            ItemType::Int => Some(i64::from(decode_i32(&item.value))),
            ItemType::UInt => Some(i64::from(decode_u32(&item.value))),
            ItemType::Int64 => Some(decode_i64(&item.value)),
            ItemType::UInt64 => i64::try_from(decode_u64(&item.value)).ok(),
            ItemType::String => std::str::from_utf8(&item.value)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok()),
            _ => None,
        };
        value
            .filter(|uid| *uid >= 0)
            .and_then(|uid| Uid::try_from(uid).ok())
            .unwrap_or(UID_NONE)
    }

    /// Set a double value.
    pub fn set_double(&mut self, key: &str, value: f64) {
        self.set_raw(key, ItemType::Double, &value.to_le_bytes());
    }

    /// Get a double value, or 0.0.
    pub fn get_double(&self, key: &str) -> f64 {
        self.numeric(key, ItemType::Double, decode_f64)
    }

    /// Set an opaque byte value.
    pub fn set_data(&mut self, key: &str, value: &[u8]) {
        self.set_raw(key, ItemType::Data, value);
    }

    /// Get the raw bytes of any item.
    pub fn get_data(&self, key: &str) -> Option<&[u8]> {
        self.typed(key).map(|item| item.value.as_slice())
    }

    fn numeric<T>(&self, key: &str, expected: ItemType, decode: fn(&[u8]) -> T) -> T
    where
        T: Default + std::str::FromStr,
    {
        match self.typed(key) {
            Some(item) if item.item_type == expected => decode(&item.value),
            Some(item) if item.item_type == ItemType::String => {
                String::from_utf8_lossy(&item.value)
                    .trim()
                    .parse::<T>()
                    .unwrap_or_default()
            }
            Some(item) => {
                tracing::trace!(
                    key,
                    stored = ?item.item_type,
                    requested = ?expected,
                    "item type mismatch, reading default"
                );
                T::default()
            }
            None => T::default(),
        }
    }

    /// Check whether an item exists.
    pub fn exists(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// Get the flags of an item (empty if missing).
    pub fn get_flags(&self, key: &str) -> ItemFlags {
        self.items
            .get(key)
            .map(|item| item.flags)
            .unwrap_or_default()
    }

    /// Add flags to an item. No effect if the item is missing.
    pub fn set_flags(&mut self, key: &str, flags: ItemFlags) {
        if let Some(item) = self.items.get_mut(key) {
            item.flags |= flags;
        }
    }

    /// Remove flags from an item.
    ///
    /// Clearing `SENSITIVE` zeroes nothing; the value stays as is.
    pub fn clear_flags(&mut self, key: &str, flags: ItemFlags) {
        if let Some(item) = self.items.get_mut(key) {
            item.flags &= !flags;
        }
    }

    /// Check whether an item carries ANY of the given flags.
    pub fn check_flags(&self, key: &str, flags: ItemFlags) -> bool {
        self.items
            .get(key)
            .is_some_and(|item| item.flags.intersects(flags))
    }

    /// Remove an item.
    pub fn remove(&mut self, key: &str) -> bool {
        self.items.remove(key).is_some()
    }

    /// Remove every item carrying ANY of the given flags.
    pub fn remove_with_flags(&mut self, flags: ItemFlags) {
        self.items.retain(|_, item| !item.flags.intersects(flags));
    }

    /// Remove every item.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Copy every item of `src` into this store, replacing same-named items.
    pub fn copy(&mut self, src: &ItemStore) {
        for item in src.items.values() {
            self.insert(item.clone());
        }
    }

    /// Copy the items of `src` carrying ANY of the given flags.
    pub fn copy_with_flags(&mut self, src: &ItemStore, flags: ItemFlags) {
        for item in src.items.values() {
            if item.flags.intersects(flags) {
                self.insert(item.clone());
            }
        }
    }

    /// Visit every item until the visitor returns `false`.
    ///
    /// # Returns
    ///
    /// `true` if every item was visited.
    pub fn iterate<F>(&self, mut visitor: F) -> bool
    where
        F: FnMut(&Item) -> bool,
    {
        for item in self.items.values() {
            if !visitor(item) {
                return false;
            }
        }
        true
    }

    /// Iterate over the items.
    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// Consume the store, yielding its items.
    pub fn into_items(self) -> impl Iterator<Item = Item> {
        self.items.into_values()
    }

    /// Iterate over the item names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Debug for ItemStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.values()).finish()
    }
}

impl FromIterator<Item> for ItemStore {
    fn from_iter<I: IntoIterator<Item = Item>>(iter: I) -> Self {
        let mut store = ItemStore::new();
        for item in iter {
            store.insert(item);
        }
        store
    }
}
