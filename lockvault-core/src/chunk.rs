//! Storage chunks: capacity-bounded containers of packed encrypted records.
//!
//! A chunk owns a growable byte region and an ordered list of entry headers
//! addressing non-overlapping `(offset, size)` ranges within it. Deletion
//! removes only the header; the bytes stay as internal fragmentation until a
//! future compaction repacks live entries (out of scope here, but the layout
//! permits it).

// Chunk sizes are bounded well below u32::MAX, so length casts are lossless.
#![allow(clippy::cast_possible_truncation)]

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::types::{ChunkDescriptor, EntryHeader, EntryId};

/// Maximum number of entries a single chunk may hold.
pub const MAX_ENTRIES_PER_CHUNK: usize = 100;

/// Base capacity for a freshly allocated chunk, in bytes.
pub const BASE_CHUNK_CAPACITY: u32 = 1024;

/// Absolute maximum capacity of one chunk, in bytes.
pub const MAX_CHUNK_SIZE: u32 = 10_240;

/// Maximum capacity growth per `expand` call, in bytes.
pub const MAX_REALLOC_INCREMENT: u32 = 10_240;

/// One storage chunk.
///
/// Invariants, re-checked on every mutation:
/// - header ranges never overlap and never extend past the data region;
/// - `used` equals the data region length (live bytes plus fragmentation);
/// - `used <= max_capacity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageChunk {
    /// Index of this chunk within its vault.
    pub chunk_index: u16,
    /// Maximum capacity in bytes.
    pub max_capacity: u32,
    /// Packed ciphertext region.
    pub data: Vec<u8>,
    /// Headers for live entries, in insertion order.
    pub headers: Vec<EntryHeader>,
    /// Unix timestamp when the chunk was created.
    pub created_at: u64,
    /// Unix timestamp of the last mutation.
    pub last_modified: u64,
}

impl StorageChunk {
    /// Creates an empty chunk.
    #[must_use]
    pub const fn new(chunk_index: u16, max_capacity: u32, now: u64) -> Self {
        Self {
            chunk_index,
            max_capacity,
            data: Vec::new(),
            headers: Vec::new(),
            created_at: now,
            last_modified: now,
        }
    }

    /// Bytes currently used, including internal fragmentation.
    #[must_use]
    pub fn used(&self) -> u32 {
        self.data.len() as u32
    }

    /// Free bytes remaining.
    #[must_use]
    pub fn available(&self) -> u32 {
        self.max_capacity - self.used()
    }

    /// True when `size` more bytes fit.
    #[must_use]
    pub fn can_fit(&self, size: u32) -> bool {
        self.available() >= size && self.headers.len() < MAX_ENTRIES_PER_CHUNK
    }

    /// The descriptor mirror of this chunk's state.
    #[must_use]
    pub fn descriptor(&self) -> ChunkDescriptor {
        ChunkDescriptor {
            chunk_index: self.chunk_index,
            max_capacity: self.max_capacity,
            used: self.used(),
            created_at: self.created_at,
            last_modified: self.last_modified,
        }
    }

    /// Appends an entry's ciphertext and header.
    ///
    /// The header's `(offset, size)` is computed here; callers supply the
    /// remaining metadata.
    ///
    /// # Errors
    ///
    /// [`VaultError::EntryLimit`] at the per-chunk entry cap,
    /// [`VaultError::ChunkCapacity`] when the bytes do not fit.
    pub fn add_entry(
        &mut self,
        mut header: EntryHeader,
        ciphertext: &[u8],
        now: u64,
    ) -> VaultResult<EntryHeader> {
        if self.headers.len() >= MAX_ENTRIES_PER_CHUNK {
            return Err(VaultError::EntryLimit {
                chunk_index: self.chunk_index,
            });
        }

        let size = ciphertext.len() as u32;
        let new_used = self
            .used()
            .checked_add(size)
            .ok_or_else(|| VaultError::corruption("chunk size overflow"))?;
        if new_used > self.max_capacity {
            return Err(VaultError::ChunkCapacity {
                needed: size,
                available: self.available(),
            });
        }

        header.offset = self.used();
        header.size = size;
        self.data.extend_from_slice(ciphertext);
        self.headers.push(header.clone());
        self.last_modified = now;
        self.check_invariants()?;
        Ok(header)
    }

    /// Returns the ciphertext bytes of an entry.
    ///
    /// # Errors
    ///
    /// [`VaultError::EntryNotFound`] for unknown ids;
    /// [`VaultError::DataCorruption`] when the header range escapes the
    /// data region.
    pub fn entry_bytes(&self, entry_id: EntryId) -> VaultResult<&[u8]> {
        let header = self.header(entry_id)?;
        let start = header.offset as usize;
        let end = start + header.size as usize;
        if end > self.data.len() {
            return Err(VaultError::corruption(format!(
                "entry {entry_id} range {start}..{end} escapes chunk data"
            )));
        }
        Ok(&self.data[start..end])
    }

    /// Finds an entry's header.
    ///
    /// # Errors
    ///
    /// [`VaultError::EntryNotFound`] for unknown ids.
    pub fn header(&self, entry_id: EntryId) -> VaultResult<&EntryHeader> {
        self.headers
            .iter()
            .find(|h| h.entry_id == entry_id)
            .ok_or(VaultError::EntryNotFound(entry_id))
    }

    /// Finds an entry's header (mutable).
    ///
    /// # Errors
    ///
    /// [`VaultError::EntryNotFound`] for unknown ids.
    pub fn header_mut(&mut self, entry_id: EntryId) -> VaultResult<&mut EntryHeader> {
        self.headers
            .iter_mut()
            .find(|h| h.entry_id == entry_id)
            .ok_or(VaultError::EntryNotFound(entry_id))
    }

    /// Replaces an entry's ciphertext in place.
    ///
    /// Same-size replacements overwrite the range directly. Different sizes
    /// splice the data region and shift the offsets of every header whose
    /// range starts after the replaced one, under checked arithmetic.
    ///
    /// # Errors
    ///
    /// [`VaultError::EntryNotFound`], [`VaultError::ChunkCapacity`] when a
    /// grown entry no longer fits, or [`VaultError::DataCorruption`] on
    /// offset under/overflow.
    pub fn update_entry(
        &mut self,
        entry_id: EntryId,
        ciphertext: &[u8],
        now: u64,
    ) -> VaultResult<()> {
        let idx = self
            .headers
            .iter()
            .position(|h| h.entry_id == entry_id)
            .ok_or(VaultError::EntryNotFound(entry_id))?;

        let old_offset = self.headers[idx].offset as usize;
        let old_size = self.headers[idx].size;
        let new_size = ciphertext.len() as u32;

        let new_used = if new_size >= old_size {
            let grown = self
                .used()
                .checked_add(new_size - old_size)
                .ok_or_else(|| VaultError::corruption("chunk size overflow"))?;
            if grown > self.max_capacity {
                return Err(VaultError::ChunkCapacity {
                    needed: new_size - old_size,
                    available: self.available(),
                });
            }
            grown
        } else {
            self.used() - (old_size - new_size)
        };

        if new_size == old_size {
            self.data[old_offset..old_offset + new_size as usize].copy_from_slice(ciphertext);
        } else {
            let mut spliced = Vec::with_capacity(new_used as usize);
            spliced.extend_from_slice(&self.data[..old_offset]);
            spliced.extend_from_slice(ciphertext);
            spliced.extend_from_slice(&self.data[old_offset + old_size as usize..]);
            self.data = spliced;

            // Shift every header whose range starts after the replaced one.
            for header in &mut self.headers {
                if header.entry_id != entry_id && header.offset as usize > old_offset {
                    header.offset = if new_size > old_size {
                        header
                            .offset
                            .checked_add(new_size - old_size)
                            .ok_or_else(|| VaultError::corruption("header offset overflow"))?
                    } else {
                        header
                            .offset
                            .checked_sub(old_size - new_size)
                            .ok_or_else(|| VaultError::corruption("header offset underflow"))?
                    };
                }
            }
        }

        let header = &mut self.headers[idx];
        header.size = new_size;
        header.last_modified = now;
        self.last_modified = now;
        self.check_invariants()
    }

    /// Removes an entry's header.
    ///
    /// The ciphertext bytes stay in the data region as fragmentation; no
    /// free list is maintained.
    ///
    /// # Errors
    ///
    /// [`VaultError::EntryNotFound`] for unknown ids.
    pub fn delete_entry(&mut self, entry_id: EntryId, now: u64) -> VaultResult<EntryHeader> {
        let idx = self
            .headers
            .iter()
            .position(|h| h.entry_id == entry_id)
            .ok_or(VaultError::EntryNotFound(entry_id))?;
        let header = self.headers.remove(idx);
        self.last_modified = now;
        self.check_invariants()?;
        Ok(header)
    }

    /// Grows `max_capacity`, bounded per call and absolutely.
    ///
    /// This is an explicit capacity operation invoked by policy layers; the
    /// allocator never expands autonomously.
    ///
    /// # Errors
    ///
    /// [`VaultError::ExpansionTooLarge`] over the per-call cap,
    /// [`VaultError::StorageLimitReached`] past [`MAX_CHUNK_SIZE`].
    pub fn expand(&mut self, additional: u32, now: u64) -> VaultResult<()> {
        if additional > MAX_REALLOC_INCREMENT {
            return Err(VaultError::ExpansionTooLarge {
                requested: additional,
                cap: MAX_REALLOC_INCREMENT,
            });
        }
        let grown = self
            .max_capacity
            .checked_add(additional)
            .ok_or_else(|| VaultError::corruption("chunk capacity overflow"))?;
        if grown > MAX_CHUNK_SIZE {
            return Err(VaultError::limit(format!(
                "chunk {} expansion to {grown} exceeds max size {MAX_CHUNK_SIZE}",
                self.chunk_index
            )));
        }
        self.max_capacity = grown;
        self.last_modified = now;
        Ok(())
    }

    /// Verifies the chunk invariants.
    ///
    /// # Errors
    ///
    /// [`VaultError::DataCorruption`] naming the violated invariant.
    pub fn check_invariants(&self) -> VaultResult<()> {
        if self.used() > self.max_capacity {
            return Err(VaultError::corruption(format!(
                "chunk {}: used {} exceeds capacity {}",
                self.chunk_index,
                self.used(),
                self.max_capacity
            )));
        }

        let mut ranges = Vec::with_capacity(self.headers.len());
        for header in &self.headers {
            let end = header.end().ok_or_else(|| {
                VaultError::corruption(format!(
                    "chunk {}: entry {} byte range overflows",
                    self.chunk_index, header.entry_id
                ))
            })?;
            ranges.push((header.offset, end));
        }
        ranges.sort_unstable();
        for window in ranges.windows(2) {
            if window[0].1 > window[1].0 {
                return Err(VaultError::corruption(format!(
                    "chunk {}: overlapping entry ranges {:?} and {:?}",
                    self.chunk_index, window[0], window[1]
                )));
            }
        }
        if let Some(&(_, end)) = ranges.last() {
            let max_end = ranges.iter().map(|r| r.1).max().unwrap_or(end);
            if max_end > self.used() {
                return Err(VaultError::corruption(format!(
                    "chunk {}: entry range ends at {max_end} past used {}",
                    self.chunk_index,
                    self.used()
                )));
            }
        }
        Ok(())
    }
}
