//! The vault facade.
//!
//! [`PasswordVault`] composes the codec, the AEAD layer, the chunk allocator
//! and the recovery coordinator over a host-provided [`DurableStore`] and
//! [`LogicalClock`]. The store is scoped to a single vault, so keys are the
//! bare `master`, `chunk/<n>` and `recovery` names.
//!
//! Every mutation is applied to working copies of the in-memory state and
//! committed to the store as one atomic batch; only after the commit
//! succeeds are the copies swapped in. A failed operation therefore leaves
//! both the durable and the in-memory state exactly as they were.

use crate::allocator::ChunkAllocator;
use crate::category::CategoryRegistry;
use crate::chunk::StorageChunk;
use crate::codec::{self, SerializedRecord};
use crate::crypto::{self, LABEL_ENTRY};
use crate::error::{VaultError, VaultResult};
use crate::platform::{
    decode_snapshot, encode_snapshot, DurableStore, LogicalClock, WriteOp, KIND_CATEGORIES,
    KIND_CHUNK, KIND_MASTER, KIND_RECOVERY,
};
use crate::recovery::{ConfirmOutcome, RecoveryCoordinator, SealedChallenge};
use crate::session::SessionKey;
use crate::types::{
    CapacityTier, EntryFlags, EntryHeader, EntryId, MasterVault, OwnerId,
};
use crate::PasswordRecord;

const KEY_MASTER: &str = "master";
const KEY_RECOVERY: &str = "recovery";
const KEY_CATEGORIES: &str = "categories";

fn key_chunk(chunk_index: u16) -> String {
    format!("chunk/{chunk_index}")
}

/// An owner's password vault.
pub struct PasswordVault<S, C> {
    store: S,
    clock: C,
    master: MasterVault,
    allocator: ChunkAllocator,
    recovery: RecoveryCoordinator,
    categories: CategoryRegistry,
}

impl<S: DurableStore, C: LogicalClock> PasswordVault<S, C> {
    /// Creates a fresh vault and persists its initial state.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Store`] when the backing store refuses the
    /// initial commit, or [`VaultError::Serialization`] on snapshot
    /// encoding failure.
    pub fn create(store: S, clock: C, owner: OwnerId, tier: CapacityTier) -> VaultResult<Self> {
        let now = clock.unix_now();
        let master = MasterVault::new(owner, tier, now);
        let recovery = RecoveryCoordinator::new(owner);
        let categories = CategoryRegistry::new();

        store
            .commit(vec![
                WriteOp::Put {
                    key: KEY_MASTER.to_owned(),
                    value: encode_snapshot(KIND_MASTER, &master)?,
                },
                WriteOp::Put {
                    key: KEY_RECOVERY.to_owned(),
                    value: encode_snapshot(KIND_RECOVERY, &recovery)?,
                },
                WriteOp::Put {
                    key: KEY_CATEGORIES.to_owned(),
                    value: encode_snapshot(KIND_CATEGORIES, &categories)?,
                },
            ])
            .map_err(VaultError::Store)?;

        tracing::info!(owner = %owner, ?tier, "created vault");
        Ok(Self {
            store,
            clock,
            master,
            allocator: ChunkAllocator::new(),
            recovery,
            categories,
        })
    }

    /// Opens a previously created vault from its store.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Store`] when the store has no vault or fails,
    /// and [`VaultError::DataCorruption`] when a snapshot fails validation.
    pub fn open(store: S, clock: C) -> VaultResult<Self> {
        let master_bytes = store
            .read(KEY_MASTER)
            .map_err(VaultError::Store)?
            .ok_or_else(|| VaultError::Store("no vault in store".to_owned()))?;
        let master: MasterVault = decode_snapshot(KIND_MASTER, &master_bytes)?;

        let mut chunks = Vec::with_capacity(master.chunks.len());
        for descriptor in &master.chunks {
            let bytes = store
                .read(&key_chunk(descriptor.chunk_index))
                .map_err(VaultError::Store)?
                .ok_or_else(|| {
                    VaultError::corruption(format!(
                        "chunk {} listed in master but missing from store",
                        descriptor.chunk_index
                    ))
                })?;
            let chunk: StorageChunk = decode_snapshot(KIND_CHUNK, &bytes)?;
            chunk.check_invariants()?;
            chunks.push(chunk);
        }

        let recovery_bytes = store
            .read(KEY_RECOVERY)
            .map_err(VaultError::Store)?
            .ok_or_else(|| VaultError::corruption("recovery snapshot missing from store"))?;
        let recovery: RecoveryCoordinator = decode_snapshot(KIND_RECOVERY, &recovery_bytes)?;

        let category_bytes = store
            .read(KEY_CATEGORIES)
            .map_err(VaultError::Store)?
            .ok_or_else(|| VaultError::corruption("category snapshot missing from store"))?;
        let categories: CategoryRegistry = decode_snapshot(KIND_CATEGORIES, &category_bytes)?;

        Ok(Self {
            store,
            clock,
            master,
            allocator: ChunkAllocator::from_chunks(chunks),
            recovery,
            categories,
        })
    }

    /// The master ledger.
    #[must_use]
    pub const fn master(&self) -> &MasterVault {
        &self.master
    }

    /// The recovery state.
    #[must_use]
    pub const fn recovery(&self) -> &RecoveryCoordinator {
        &self.recovery
    }

    /// The category table.
    #[must_use]
    pub const fn categories(&self) -> &CategoryRegistry {
        &self.categories
    }

    /// Encrypts and stores a record, returning its assigned id.
    ///
    /// # Errors
    ///
    /// Capacity errors from the allocator,
    /// [`VaultError::CategoryNotFound`] for an unregistered category,
    /// [`VaultError::EncryptionFailed`], [`VaultError::Serialization`] and
    /// [`VaultError::Store`].
    pub fn store_entry(
        &mut self,
        key: &SessionKey,
        record: &PasswordRecord,
    ) -> VaultResult<EntryId> {
        let now = self.clock.unix_now();
        let wire = codec::encode(record)?.to_bytes();
        let sealed = crypto::seal(key, &self.master.owner, LABEL_ENTRY, &wire)?;

        let mut master = self.master.clone();
        let mut allocator = self.allocator.clone();
        let mut categories = self.categories.clone();
        categories.record_filed(record.category_id)?;
        let entry_id = master.take_entry_id();
        let header = EntryHeader {
            entry_id,
            offset: 0,
            size: 0,
            kind: record.kind,
            category_id: record.category_id,
            title_hash: crypto::title_index(key, &record.title),
            created_at: now,
            last_modified: now,
            access_count: 0,
            flags: EntryFlags::default(),
        };
        let chunk_index = allocator.place(&mut master, header, &sealed, now)?;
        master.touch(now);

        self.commit(&master, &allocator, Some(&categories), &[chunk_index])?;
        self.master = master;
        self.allocator = allocator;
        self.categories = categories;

        tracing::debug!(entry_id = %entry_id, chunk_index, "stored entry");
        Ok(entry_id)
    }

    /// Decrypts and returns a record, bumping its access counter.
    ///
    /// # Errors
    ///
    /// [`VaultError::EntryNotFound`], [`VaultError::DecryptionFailed`] with
    /// a wrong key, corruption and store errors.
    pub fn retrieve_entry(
        &mut self,
        key: &SessionKey,
        entry_id: EntryId,
    ) -> VaultResult<PasswordRecord> {
        let now = self.clock.unix_now();
        let record = self.decrypt_entry(key, entry_id)?;

        let mut master = self.master.clone();
        let mut allocator = self.allocator.clone();
        allocator.record_access(&master, entry_id)?;
        master.touch(now);
        let chunk_index = master.locate(entry_id)?;

        self.commit(&master, &allocator, None, &[chunk_index])?;
        self.master = master;
        self.allocator = allocator;
        Ok(record)
    }

    /// Re-encrypts a record under a new payload, keeping its id.
    ///
    /// The entry stays in its chunk when the new ciphertext fits; otherwise
    /// it is relocated to a chunk that can hold it. Either way the entry id
    /// is stable.
    ///
    /// # Errors
    ///
    /// As for [`Self::store_entry`], plus [`VaultError::EntryNotFound`] for
    /// unknown ids.
    pub fn update_entry(
        &mut self,
        key: &SessionKey,
        entry_id: EntryId,
        record: &PasswordRecord,
    ) -> VaultResult<()> {
        let now = self.clock.unix_now();
        let wire = codec::encode(record)?.to_bytes();
        let sealed = crypto::seal(key, &self.master.owner, LABEL_ENTRY, &wire)?;

        let mut master = self.master.clone();
        let mut allocator = self.allocator.clone();
        let mut categories = self.categories.clone();
        let old_chunk = master.locate(entry_id)?;
        let old_category = allocator.chunk(old_chunk)?.header(entry_id)?.category_id;
        if old_category != record.category_id {
            categories.record_filed(record.category_id)?;
            categories.record_unfiled(old_category)?;
        }
        let mut touched = vec![old_chunk];

        match allocator.update(&mut master, entry_id, &sealed, now) {
            Ok(()) => {}
            Err(VaultError::ChunkCapacity { .. }) => {
                // The grown blob no longer fits its chunk: relocate.
                let header = allocator.delete(&mut master, entry_id, now)?;
                let new_chunk = allocator.place(&mut master, header, &sealed, now)?;
                touched.push(new_chunk);
                tracing::debug!(entry_id = %entry_id, old_chunk, new_chunk, "relocated entry");
            }
            Err(other) => return Err(other),
        }

        // Refresh the header metadata the new payload carries.
        {
            let chunk = allocator_chunk_mut(&mut allocator, &master, entry_id)?;
            let header = chunk.header_mut(entry_id)?;
            header.kind = record.kind;
            header.category_id = record.category_id;
            header.title_hash = crypto::title_index(key, &record.title);
            header.last_modified = now;
        }
        master.touch(now);

        self.commit(&master, &allocator, Some(&categories), &touched)?;
        self.master = master;
        self.allocator = allocator;
        self.categories = categories;

        tracing::debug!(entry_id = %entry_id, "updated entry");
        Ok(())
    }

    /// Deletes an entry.
    ///
    /// # Errors
    ///
    /// [`VaultError::EntryNotFound`] and store errors.
    pub fn delete_entry(&mut self, entry_id: EntryId) -> VaultResult<()> {
        let now = self.clock.unix_now();
        let chunk_index = self.master.locate(entry_id)?;

        let mut master = self.master.clone();
        let mut allocator = self.allocator.clone();
        let mut categories = self.categories.clone();
        let header = allocator.delete(&mut master, entry_id, now)?;
        categories.record_unfiled(header.category_id)?;
        master.touch(now);

        self.commit(&master, &allocator, Some(&categories), &[chunk_index])?;
        self.master = master;
        self.allocator = allocator;
        self.categories = categories;

        tracing::debug!(entry_id = %entry_id, "deleted entry");
        Ok(())
    }

    /// Decrypts every entry, reporting per-entry failures in place.
    ///
    /// A corrupt or undecryptable entry never hides the rest of the vault;
    /// its `Err` sits alongside the successes. Access counters are not
    /// bumped by listing.
    #[must_use]
    pub fn list_entries(&self, key: &SessionKey) -> Vec<(EntryId, VaultResult<PasswordRecord>)> {
        self.master
            .entry_locations
            .keys()
            .map(|&id| {
                let entry_id = EntryId(id);
                (entry_id, self.decrypt_entry(key, entry_id))
            })
            .collect()
    }

    /// Explicitly grows a chunk.
    ///
    /// # Errors
    ///
    /// As for [`ChunkAllocator::expand_chunk`], plus store errors.
    pub fn expand_chunk(&mut self, chunk_index: u16, additional: u32) -> VaultResult<()> {
        let now = self.clock.unix_now();
        let mut master = self.master.clone();
        let mut allocator = self.allocator.clone();
        allocator.expand_chunk(&mut master, chunk_index, additional, now)?;

        self.commit(&master, &allocator, None, &[chunk_index])?;
        self.master = master;
        self.allocator = allocator;
        Ok(())
    }

    /// Moves the vault to a higher capacity tier.
    ///
    /// # Errors
    ///
    /// [`VaultError::Unauthorized`] for a downgrade or sideways move, plus
    /// store errors.
    pub fn upgrade_tier(&mut self, target: CapacityTier) -> VaultResult<()> {
        if !self.master.tier.can_upgrade_to(target) {
            return Err(VaultError::Unauthorized);
        }
        let mut master = self.master.clone();
        master.tier = target;
        master.touch(self.clock.unix_now());

        self.commit(&master, &self.allocator, None, &[])?;
        self.master = master;
        tracing::info!(?target, "upgraded capacity tier");
        Ok(())
    }

    /// Registers a category and returns its id.
    ///
    /// `name` is opaque to the vault; clients encrypt it before handing it
    /// over.
    ///
    /// # Errors
    ///
    /// As for [`CategoryRegistry::create`], plus store errors.
    pub fn create_category(&mut self, name: Vec<u8>) -> VaultResult<u32> {
        let now = self.clock.unix_now();
        let mut categories = self.categories.clone();
        let category_id = categories.create(name, now)?;
        self.commit_categories(&categories)?;
        self.categories = categories;
        Ok(category_id)
    }

    /// Replaces a category's name.
    ///
    /// # Errors
    ///
    /// As for [`CategoryRegistry::rename`], plus store errors.
    pub fn rename_category(&mut self, category_id: u32, name: Vec<u8>) -> VaultResult<()> {
        let now = self.clock.unix_now();
        let mut categories = self.categories.clone();
        categories.rename(category_id, name, now)?;
        self.commit_categories(&categories)?;
        self.categories = categories;
        Ok(())
    }

    /// Deletes an empty category.
    ///
    /// # Errors
    ///
    /// As for [`CategoryRegistry::delete`], plus store errors.
    pub fn delete_category(&mut self, category_id: u32) -> VaultResult<()> {
        let mut categories = self.categories.clone();
        categories.delete(category_id)?;
        self.commit_categories(&categories)?;
        self.categories = categories;
        Ok(())
    }

    /// Permanently deletes the vault from its store. Owner only.
    ///
    /// Every snapshot the vault ever wrote is removed in one batch. There
    /// is no undo.
    ///
    /// # Errors
    ///
    /// [`VaultError::Unauthorized`] for a non-owner caller, plus store
    /// errors.
    pub fn close(self, caller: &OwnerId) -> VaultResult<()> {
        if caller != &self.master.owner {
            return Err(VaultError::Unauthorized);
        }
        let mut batch = vec![
            WriteOp::Delete {
                key: KEY_MASTER.to_owned(),
            },
            WriteOp::Delete {
                key: KEY_RECOVERY.to_owned(),
            },
            WriteOp::Delete {
                key: KEY_CATEGORIES.to_owned(),
            },
        ];
        for descriptor in &self.master.chunks {
            batch.push(WriteOp::Delete {
                key: key_chunk(descriptor.chunk_index),
            });
        }
        self.store.commit(batch).map_err(VaultError::Store)?;
        tracing::info!(owner = %self.master.owner, "vault closed and deleted");
        Ok(())
    }

    // Recovery operations. Each runs on a working copy and commits the
    // recovery snapshot (and, on completion, the master) atomically.

    /// Registers a recovery guardian.
    ///
    /// # Errors
    ///
    /// As for [`RecoveryCoordinator::add_guardian`], plus store errors.
    pub fn add_guardian(
        &mut self,
        identity: OwnerId,
        share_index: u8,
        commitment: [u8; 32],
    ) -> VaultResult<()> {
        let now = self.clock.unix_now();
        let mut recovery = self.recovery.clone();
        recovery.add_guardian(identity, share_index, commitment, now)?;
        self.commit_recovery(&recovery)?;
        self.recovery = recovery;
        Ok(())
    }

    /// Activates a pending guardian.
    ///
    /// # Errors
    ///
    /// As for [`RecoveryCoordinator::accept_guardianship`], plus store
    /// errors.
    pub fn accept_guardianship(&mut self, identity: &OwnerId) -> VaultResult<()> {
        let now = self.clock.unix_now();
        let mut recovery = self.recovery.clone();
        recovery.accept_guardianship(identity, now)?;
        self.commit_recovery(&recovery)?;
        self.recovery = recovery;
        Ok(())
    }

    /// Removes a recovery guardian.
    ///
    /// # Errors
    ///
    /// As for [`RecoveryCoordinator::remove_guardian`], plus store errors.
    pub fn remove_guardian(&mut self, identity: &OwnerId) -> VaultResult<()> {
        let now = self.clock.unix_now();
        let mut recovery = self.recovery.clone();
        recovery.remove_guardian(identity, now)?;
        self.commit_recovery(&recovery)?;
        self.recovery = recovery;
        Ok(())
    }

    /// Fixes the recovery threshold and delay.
    ///
    /// # Errors
    ///
    /// As for [`RecoveryCoordinator::configure`], plus store errors.
    pub fn configure_recovery(
        &mut self,
        threshold: u8,
        delay_secs: u64,
        master_secret_hash: [u8; 32],
    ) -> VaultResult<()> {
        let now = self.clock.unix_now();
        let mut recovery = self.recovery.clone();
        recovery.configure(threshold, delay_secs, master_secret_hash, now)?;
        self.commit_recovery(&recovery)?;
        self.recovery = recovery;
        Ok(())
    }

    /// Starts a recovery request.
    ///
    /// # Errors
    ///
    /// As for [`RecoveryCoordinator::initiate`], plus store errors.
    pub fn initiate_recovery(
        &mut self,
        guardian: &OwnerId,
        candidate: OwnerId,
        sealed: SealedChallenge,
    ) -> VaultResult<u64> {
        let now = self.clock.unix_now();
        let mut recovery = self.recovery.clone();
        let request_id = recovery.initiate(guardian, candidate, sealed, now)?;
        self.commit_recovery(&recovery)?;
        self.recovery = recovery;
        Ok(request_id)
    }

    /// Records a guardian confirmation.
    ///
    /// # Errors
    ///
    /// As for [`RecoveryCoordinator::confirm`], plus store errors.
    pub fn confirm_recovery(
        &mut self,
        guardian: &OwnerId,
        request_id: u64,
    ) -> VaultResult<ConfirmOutcome> {
        let now = self.clock.unix_now();
        let mut recovery = self.recovery.clone();
        let outcome = recovery.confirm(guardian, request_id, now)?;
        self.commit_recovery(&recovery)?;
        self.recovery = recovery;
        Ok(outcome)
    }

    /// Completes a recovery, transferring vault ownership.
    ///
    /// The recovery state and the master ledger change together in one
    /// batch.
    ///
    /// # Errors
    ///
    /// As for [`RecoveryCoordinator::complete`], plus store errors.
    pub fn complete_recovery(&mut self, request_id: u64, proof: &[u8]) -> VaultResult<OwnerId> {
        let now = self.clock.unix_now();
        let mut recovery = self.recovery.clone();
        let mut master = self.master.clone();
        let new_owner = recovery.complete(request_id, proof, &mut master, now)?;

        self.store
            .commit(vec![
                WriteOp::Put {
                    key: KEY_MASTER.to_owned(),
                    value: encode_snapshot(KIND_MASTER, &master)?,
                },
                WriteOp::Put {
                    key: KEY_RECOVERY.to_owned(),
                    value: encode_snapshot(KIND_RECOVERY, &recovery)?,
                },
            ])
            .map_err(VaultError::Store)?;
        self.master = master;
        self.recovery = recovery;
        Ok(new_owner)
    }

    /// Cancels a live recovery request. Owner only.
    ///
    /// # Errors
    ///
    /// As for [`RecoveryCoordinator::cancel`], plus store errors.
    pub fn cancel_recovery(&mut self, caller: &OwnerId, request_id: u64) -> VaultResult<()> {
        let now = self.clock.unix_now();
        let mut recovery = self.recovery.clone();
        recovery.cancel(caller, request_id, now)?;
        self.commit_recovery(&recovery)?;
        self.recovery = recovery;
        Ok(())
    }

    fn decrypt_entry(&self, key: &SessionKey, entry_id: EntryId) -> VaultResult<PasswordRecord> {
        let sealed = self.allocator.entry_bytes(&self.master, entry_id)?;
        let wire = crypto::open(key, &self.master.owner, LABEL_ENTRY, sealed)?;
        let serialized = SerializedRecord::from_bytes(&wire)?;
        codec::decode(&serialized)
    }

    fn commit(
        &self,
        master: &MasterVault,
        allocator: &ChunkAllocator,
        categories: Option<&CategoryRegistry>,
        touched_chunks: &[u16],
    ) -> VaultResult<()> {
        let mut batch = vec![WriteOp::Put {
            key: KEY_MASTER.to_owned(),
            value: encode_snapshot(KIND_MASTER, master)?,
        }];
        if let Some(categories) = categories {
            batch.push(WriteOp::Put {
                key: KEY_CATEGORIES.to_owned(),
                value: encode_snapshot(KIND_CATEGORIES, categories)?,
            });
        }
        for &chunk_index in touched_chunks {
            batch.push(WriteOp::Put {
                key: key_chunk(chunk_index),
                value: encode_snapshot(KIND_CHUNK, allocator.chunk(chunk_index)?)?,
            });
        }
        self.store.commit(batch).map_err(VaultError::Store)
    }

    fn commit_categories(&self, categories: &CategoryRegistry) -> VaultResult<()> {
        let batch = vec![WriteOp::Put {
            key: KEY_CATEGORIES.to_owned(),
            value: encode_snapshot(KIND_CATEGORIES, categories)?,
        }];
        self.store.commit(batch).map_err(VaultError::Store)
    }

    fn commit_recovery(&self, recovery: &RecoveryCoordinator) -> VaultResult<()> {
        let batch = vec![WriteOp::Put {
            key: KEY_RECOVERY.to_owned(),
            value: encode_snapshot(KIND_RECOVERY, recovery)?,
        }];
        self.store.commit(batch).map_err(VaultError::Store)
    }
}

fn allocator_chunk_mut<'a>(
    allocator: &'a mut ChunkAllocator,
    master: &MasterVault,
    entry_id: EntryId,
) -> VaultResult<&'a mut StorageChunk> {
    let chunk_index = master.locate(entry_id)?;
    allocator.chunk_mut(chunk_index)
}
