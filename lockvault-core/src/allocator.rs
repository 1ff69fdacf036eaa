//! Chunk allocation policy: where entry ciphertext lands and when new
//! chunks come into existence.
//!
//! Placement is first-fit in chunk-index order. A new chunk is allocated
//! only when no existing chunk fits, and every allocation is gated by the
//! chunk-count cap and the owner's capacity tier. Capacity expansion is
//! always an explicit call, never a side effect of placement.

use std::collections::BTreeMap;

use crate::chunk::{StorageChunk, BASE_CHUNK_CAPACITY, MAX_CHUNK_SIZE};
use crate::error::{VaultError, VaultResult};
use crate::types::{EntryHeader, EntryId, MasterVault};

/// Maximum number of chunks a single vault may allocate.
pub const MAX_CHUNKS: usize = 100;

/// The chunk set of one vault together with its allocation policy.
///
/// The allocator owns the chunk payloads; aggregate bookkeeping (entry
/// locations, usage totals, tier limits) lives in the [`MasterVault`] ledger
/// the caller passes into each operation.
#[derive(Debug, Default, Clone)]
pub struct ChunkAllocator {
    chunks: BTreeMap<u16, StorageChunk>,
}

impl ChunkAllocator {
    /// Creates an empty allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            chunks: BTreeMap::new(),
        }
    }

    /// Rebuilds an allocator from previously persisted chunks.
    #[must_use]
    pub fn from_chunks(chunks: impl IntoIterator<Item = StorageChunk>) -> Self {
        Self {
            chunks: chunks.into_iter().map(|c| (c.chunk_index, c)).collect(),
        }
    }

    /// Returns a chunk by index.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::ChunkNotFound`] for an unknown index.
    pub fn chunk(&self, chunk_index: u16) -> VaultResult<&StorageChunk> {
        self.chunks
            .get(&chunk_index)
            .ok_or(VaultError::ChunkNotFound(chunk_index))
    }

    /// Returns a chunk by index (mutable).
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::ChunkNotFound`] for an unknown index.
    pub fn chunk_mut(&mut self, chunk_index: u16) -> VaultResult<&mut StorageChunk> {
        self.chunks
            .get_mut(&chunk_index)
            .ok_or(VaultError::ChunkNotFound(chunk_index))
    }

    /// Iterates over all chunks in index order.
    pub fn chunks(&self) -> impl Iterator<Item = &StorageChunk> {
        self.chunks.values()
    }

    /// Number of allocated chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Places an entry, allocating a new chunk when no existing one fits.
    ///
    /// Returns the index of the chunk that received the entry. The ledger is
    /// updated in the same call: location map, entry count, usage totals and,
    /// for a fresh chunk, the registered descriptor.
    ///
    /// # Errors
    ///
    /// [`VaultError::StorageLimitReached`] when the tier budget or the chunk
    /// count cap is exhausted, [`VaultError::ChunkCapacity`] when the entry
    /// exceeds the maximum chunk size outright.
    pub fn place(
        &mut self,
        master: &mut MasterVault,
        header: EntryHeader,
        ciphertext: &[u8],
        now: u64,
    ) -> VaultResult<u16> {
        let size = u32::try_from(ciphertext.len())
            .map_err(|_| VaultError::corruption("entry ciphertext exceeds u32 range"))?;
        if size > MAX_CHUNK_SIZE {
            return Err(VaultError::ChunkCapacity {
                needed: size,
                available: MAX_CHUNK_SIZE,
            });
        }
        if !master.has_capacity_for(u64::from(size)) {
            return Err(VaultError::limit(format!(
                "tier {:?} budget exhausted: {} used of {}",
                master.tier,
                master.storage_used,
                master.tier.max_total_capacity()
            )));
        }

        let target = self
            .chunks
            .values()
            .find(|c| c.can_fit(size))
            .map(|c| c.chunk_index);

        let chunk_index = match target {
            Some(index) => index,
            None => self.allocate_chunk(master, size, now)?,
        };

        let entry_id = header.entry_id;
        let chunk = self
            .chunks
            .get_mut(&chunk_index)
            .ok_or(VaultError::ChunkNotFound(chunk_index))?;
        chunk.add_entry(header, ciphertext, now)?;
        let new_used = chunk.used();

        master.entry_locations.insert(entry_id.0, chunk_index);
        master.entry_count += 1;
        master.update_chunk_usage(chunk_index, new_used)?;
        self.sync_descriptor(master, chunk_index)?;
        Ok(chunk_index)
    }

    /// Replaces an entry's ciphertext within its current chunk.
    ///
    /// # Errors
    ///
    /// [`VaultError::EntryNotFound`] for unknown ids,
    /// [`VaultError::StorageLimitReached`] when growth would exceed the tier
    /// budget, [`VaultError::ChunkCapacity`] when the grown entry no longer
    /// fits its chunk.
    pub fn update(
        &mut self,
        master: &mut MasterVault,
        entry_id: EntryId,
        ciphertext: &[u8],
        now: u64,
    ) -> VaultResult<()> {
        let chunk_index = master.locate(entry_id)?;
        let chunk = self
            .chunks
            .get_mut(&chunk_index)
            .ok_or(VaultError::ChunkNotFound(chunk_index))?;

        let old_size = chunk.header(entry_id)?.size;
        let new_size = u32::try_from(ciphertext.len())
            .map_err(|_| VaultError::corruption("entry ciphertext exceeds u32 range"))?;
        if new_size > old_size && !master.has_capacity_for(u64::from(new_size - old_size)) {
            return Err(VaultError::limit(format!(
                "tier {:?} budget exhausted during update of entry {entry_id}",
                master.tier
            )));
        }

        chunk.update_entry(entry_id, ciphertext, now)?;
        let new_used = chunk.used();
        master.update_chunk_usage(chunk_index, new_used)?;
        self.sync_descriptor(master, chunk_index)?;
        Ok(())
    }

    /// Deletes an entry, leaving its bytes behind as fragmentation.
    ///
    /// # Errors
    ///
    /// [`VaultError::EntryNotFound`] for unknown ids.
    pub fn delete(
        &mut self,
        master: &mut MasterVault,
        entry_id: EntryId,
        now: u64,
    ) -> VaultResult<EntryHeader> {
        let chunk_index = master.locate(entry_id)?;
        let chunk = self
            .chunks
            .get_mut(&chunk_index)
            .ok_or(VaultError::ChunkNotFound(chunk_index))?;
        let header = chunk.delete_entry(entry_id, now)?;

        master.entry_locations.remove(&entry_id.0);
        master.entry_count -= 1;
        self.sync_descriptor(master, chunk_index)?;
        Ok(header)
    }

    /// Returns the ciphertext bytes of an entry.
    ///
    /// # Errors
    ///
    /// [`VaultError::EntryNotFound`] for unknown ids.
    pub fn entry_bytes(&self, master: &MasterVault, entry_id: EntryId) -> VaultResult<&[u8]> {
        let chunk_index = master.locate(entry_id)?;
        self.chunk(chunk_index)?.entry_bytes(entry_id)
    }

    /// Bumps an entry's access counter.
    ///
    /// # Errors
    ///
    /// [`VaultError::EntryNotFound`] for unknown ids.
    pub fn record_access(&mut self, master: &MasterVault, entry_id: EntryId) -> VaultResult<u32> {
        let chunk_index = master.locate(entry_id)?;
        let chunk = self
            .chunks
            .get_mut(&chunk_index)
            .ok_or(VaultError::ChunkNotFound(chunk_index))?;
        let header = chunk.header_mut(entry_id)?;
        header.access_count = header.access_count.saturating_add(1);
        Ok(header.access_count)
    }

    /// Explicitly grows a chunk's capacity.
    ///
    /// # Errors
    ///
    /// [`VaultError::ExpansionTooLarge`] over the per-call cap,
    /// [`VaultError::StorageLimitReached`] when the tier's total capacity
    /// budget would be exceeded.
    pub fn expand_chunk(
        &mut self,
        master: &mut MasterVault,
        chunk_index: u16,
        additional: u32,
        now: u64,
    ) -> VaultResult<()> {
        let grown_total = master.total_capacity + u64::from(additional);
        if grown_total > master.tier.max_total_capacity() {
            return Err(VaultError::limit(format!(
                "tier {:?} caps total capacity at {}",
                master.tier,
                master.tier.max_total_capacity()
            )));
        }

        let chunk = self
            .chunks
            .get_mut(&chunk_index)
            .ok_or(VaultError::ChunkNotFound(chunk_index))?;
        chunk.expand(additional, now)?;

        master.total_capacity = grown_total;
        let descriptor = master
            .descriptor_mut(chunk_index)
            .ok_or(VaultError::ChunkNotFound(chunk_index))?;
        descriptor.max_capacity = chunk.max_capacity;
        descriptor.last_modified = now;
        Ok(())
    }

    fn allocate_chunk(
        &mut self,
        master: &mut MasterVault,
        needed: u32,
        now: u64,
    ) -> VaultResult<u16> {
        if self.chunks.len() >= MAX_CHUNKS {
            return Err(VaultError::limit(format!(
                "chunk count cap of {MAX_CHUNKS} reached"
            )));
        }

        let capacity = needed.max(BASE_CHUNK_CAPACITY).min(MAX_CHUNK_SIZE);
        let grown_total = master.total_capacity + u64::from(capacity);
        if grown_total > master.tier.max_total_capacity() {
            return Err(VaultError::limit(format!(
                "tier {:?} caps total capacity at {}",
                master.tier,
                master.tier.max_total_capacity()
            )));
        }

        let chunk_index = self
            .chunks
            .keys()
            .next_back()
            .map_or(0, |last| last + 1);
        let chunk = StorageChunk::new(chunk_index, capacity, now);
        master.register_chunk(chunk.descriptor());
        self.chunks.insert(chunk_index, chunk);

        tracing::debug!(chunk_index, capacity, "allocated storage chunk");
        Ok(chunk_index)
    }

    fn sync_descriptor(&self, master: &mut MasterVault, chunk_index: u16) -> VaultResult<()> {
        let chunk = self.chunk(chunk_index)?;
        let descriptor = master
            .descriptor_mut(chunk_index)
            .ok_or(VaultError::ChunkNotFound(chunk_index))?;
        descriptor.used = chunk.used();
        descriptor.last_modified = chunk.last_modified;
        Ok(())
    }
}
