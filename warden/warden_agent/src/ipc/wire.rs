//! Item wire encoding.
//!
//! Each item travels as its name, type tag, flags and value. Values of
//! items flagged sensitive never travel inline: the bytes are moved into a
//! separate attachment and the item carries only the attachment slot and
//! the byte length. Attachments zero themselves when dropped.

use serde::{Deserialize, Serialize};
use warden_core::error::TransportError;
use warden_core::types::{Item, ItemFlags, ItemStore, ItemType};
use zeroize::Zeroizing;

/// Out-of-band values accompanying a message.
pub type Attachments = Vec<Zeroizing<Vec<u8>>>;

/// The value part of a wire item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireValue {
    /// The bytes themselves.
    Inline(Vec<u8>),

    /// A reference into the message attachments.
    OutOfBand {
        /// Attachment index.
        slot: usize,
        /// Expected byte length.
        length: usize,
    },
}

/// An item as carried in a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireItem {
    /// Item name.
    pub name: String,

    /// Type tag.
    pub item_type: ItemType,

    /// Raw flag bits.
    pub flags: u32,

    /// Value.
    pub value: WireValue,
}

/// Encode a store, moving sensitive values into `attachments`.
///
/// The store is consumed; sensitive source buffers are moved rather than
/// copied, and everything left behind is zeroed as the items drop.
pub fn encode_items(store: ItemStore, attachments: &mut Attachments) -> Vec<WireItem> {
    store
        .into_items()
        .map(|mut item| {
            let value = if item.is_sensitive() {
                let bytes = item.take_value();
                let length = bytes.len();
                attachments.push(Zeroizing::new(bytes));
                WireValue::OutOfBand {
                    slot: attachments.len() - 1,
                    length,
                }
            } else {
                WireValue::Inline(item.value().to_vec())
            };
            WireItem {
                name: item.name().to_string(),
                item_type: item.item_type(),
                flags: item.flags().bits(),
                value,
            }
        })
        .collect()
}

/// Decode wire items, taking out-of-band values from `attachments`.
///
/// Each attachment may be claimed once; the slot is left empty afterwards.
pub fn decode_items(
    items: Vec<WireItem>,
    attachments: &mut Attachments,
) -> Result<ItemStore, TransportError> {
    let mut store = ItemStore::new();
    for wire in items {
        let flags = ItemFlags::from_bits_retain(wire.flags);
        let value = match wire.value {
            WireValue::Inline(bytes) => bytes,
            WireValue::OutOfBand { slot, length } => {
                let attachment =
                    attachments
                        .get_mut(slot)
                        .ok_or_else(|| TransportError::InvalidAttachment {
                            name: wire.name.clone(),
                            reason: format!("no attachment in slot {}", slot),
                        })?;
                if attachment.len() != length {
                    return Err(TransportError::InvalidAttachment {
                        name: wire.name,
                        reason: format!(
                            "length {} does not match attachment of {} bytes",
                            length,
                            attachment.len()
                        ),
                    });
                }
                std::mem::take(&mut **attachment)
            }
        };
        store.insert(Item::new(wire.name, wire.item_type, flags, value));
    }
    Ok(store)
}
