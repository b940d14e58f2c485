//! Dictionary store for BEJ decoding.
//!
//! Dictionaries arrive in chunks over multipart transfers, so each entry
//! tracks whether its data is complete. Only complete entries are handed to
//! the decoder. Buffers of invalidated entries are retained; they are flushed
//! when a new transfer starts on the same resource ID.

use std::collections::HashMap;

/// Resource ID carrying the annotation dictionary.
pub const ANNOTATION_RESOURCE_ID: u32 = 0;

#[derive(Debug)]
struct DictionaryEntry {
    valid: bool,
    data: Vec<u8>,
}

/// Keyed store of dictionaries by PDR resource ID.
///
/// `valid_count` always equals the number of complete entries; the three
/// mutators maintain it.
#[derive(Debug, Default)]
pub struct DictionaryManager {
    dictionaries: HashMap<u32, DictionaryEntry>,
    valid_count: u32,
}

impl DictionaryManager {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a dictionary entry for `resource_id` with its first data chunk.
    ///
    /// An existing entry (complete or not) is reset and its buffer replaced.
    pub fn start_entry(&mut self, resource_id: u32, data: &[u8]) {
        match self.dictionaries.get_mut(&resource_id) {
            None => {
                self.dictionaries.insert(
                    resource_id,
                    DictionaryEntry {
                        valid: false,
                        data: data.to_vec(),
                    },
                );
            }
            Some(entry) => {
                if entry.valid {
                    self.valid_count -= 1;
                }
                entry.valid = false;
                entry.data.clear();
                entry.data.extend_from_slice(data);
            }
        }
    }

    /// Mark the entry for `resource_id` complete.
    ///
    /// Returns `false` if no transfer was started for that resource.
    pub fn mark_complete(&mut self, resource_id: u32) -> bool {
        match self.dictionaries.get_mut(&resource_id) {
            None => {
                tracing::warn!(resource_id, "cannot complete unknown dictionary");
                false
            }
            Some(entry) => {
                if !entry.valid {
                    self.valid_count += 1;
                }
                entry.valid = true;
                true
            }
        }
    }

    /// Append another data chunk to the entry for `resource_id`.
    ///
    /// The entry becomes incomplete again until the next
    /// [`mark_complete`](Self::mark_complete). Returns `false` if no transfer
    /// was started for that resource.
    pub fn add_data(&mut self, resource_id: u32, data: &[u8]) -> bool {
        match self.dictionaries.get_mut(&resource_id) {
            None => {
                tracing::warn!(resource_id, "cannot append to unknown dictionary");
                false
            }
            Some(entry) => {
                if entry.valid {
                    self.valid_count -= 1;
                }
                entry.valid = false;
                entry.data.extend_from_slice(data);
                true
            }
        }
    }

    /// Read-only view of a complete dictionary, `None` if absent or
    /// incomplete.
    pub fn get(&self, resource_id: u32) -> Option<&[u8]> {
        match self.dictionaries.get(&resource_id) {
            Some(entry) if entry.valid => Some(&entry.data),
            _ => None,
        }
    }

    /// The annotation dictionary (resource ID 0).
    pub fn annotation(&self) -> Option<&[u8]> {
        self.get(ANNOTATION_RESOURCE_ID)
    }

    /// Number of complete dictionaries.
    pub fn count(&self) -> u32 {
        self.valid_count
    }

    /// Mark every entry incomplete.
    ///
    /// Buffers are retained; a subsequent `start_entry` on the same resource
    /// flushes them.
    pub fn invalidate_all(&mut self) {
        for entry in self.dictionaries.values_mut() {
            entry.valid = false;
        }
        self.valid_count = 0;
    }
}
