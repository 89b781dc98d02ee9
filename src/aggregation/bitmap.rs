//! Dense bitmap over record ids
//!
//! Each dimension keeps one bitmap of the records its current filter
//! excludes, so "does record r fail dimension D" is a single bit test.
//! Record ids are dense (`0..n`), which suits a flat vector of u64 words.

use crate::types::RecordId;

/// A growable bitmap of record ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordBitmap {
    /// Bitmap words (64 bits each)
    words: Vec<u64>,

    /// Number of bits set (cached for fast cardinality)
    cardinality: usize,
}

impl RecordBitmap {
    /// Create an empty bitmap
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bitmap with pre-allocated capacity for N records
    pub fn with_capacity(num_records: usize) -> Self {
        Self {
            words: vec![0; num_records.div_ceil(64)],
            cardinality: 0,
        }
    }

    /// Set a bit; returns true if it was previously clear
    pub fn set(&mut self, id: RecordId) -> bool {
        let (word_idx, mask) = Self::locate(id);

        if word_idx >= self.words.len() {
            self.words.resize(word_idx + 1, 0);
        }

        if self.words[word_idx] & mask == 0 {
            self.words[word_idx] |= mask;
            self.cardinality += 1;
            true
        } else {
            false
        }
    }

    /// Clear a bit; returns true if it was previously set
    pub fn clear(&mut self, id: RecordId) -> bool {
        let (word_idx, mask) = Self::locate(id);

        match self.words.get_mut(word_idx) {
            Some(word) if *word & mask != 0 => {
                *word &= !mask;
                self.cardinality -= 1;
                true
            }
            _ => false,
        }
    }

    /// Check if a bit is set
    pub fn contains(&self, id: RecordId) -> bool {
        let (word_idx, mask) = Self::locate(id);
        self.words
            .get(word_idx)
            .map(|word| word & mask != 0)
            .unwrap_or(false)
    }

    /// Number of bits set
    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    /// Check if bitmap is empty
    pub fn is_empty(&self) -> bool {
        self.cardinality == 0
    }

    fn locate(id: RecordId) -> (usize, u64) {
        let id = id as usize;
        (id / 64, 1u64 << (id % 64))
    }
}
