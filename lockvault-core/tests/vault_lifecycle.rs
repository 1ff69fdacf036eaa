//! End-to-end lifecycle tests against the in-memory platform.

use std::sync::Arc;

use lockvault_core::platform::memory::{ManualClock, MemoryStore};
use lockvault_core::session::{SessionContext, SessionLimits, SigningOracle};
use lockvault_core::types::EntryId;
use lockvault_core::{
    CapacityTier, EntryKind, OwnerId, PasswordRecord, PasswordVault, SessionKey, VaultError,
};

struct FixedOracle(Vec<u8>);

impl SigningOracle for FixedOracle {
    fn sign(&self, _message: &[u8]) -> Result<Vec<u8>, String> {
        Ok(self.0.clone())
    }
}

fn owner() -> OwnerId {
    OwnerId::new([0x11u8; 32])
}

fn session_key() -> SessionKey {
    let ctx = SessionContext::new(owner(), SessionLimits::default());
    ctx.authenticate(&FixedOracle(vec![0x55u8; 64]), b"device-salt", 0)
        .unwrap()
}

fn new_vault(
    tier: CapacityTier,
) -> (
    PasswordVault<Arc<MemoryStore>, Arc<ManualClock>>,
    Arc<MemoryStore>,
    Arc<ManualClock>,
) {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::starting_at(1_000));
    let vault = PasswordVault::create(Arc::clone(&store), Arc::clone(&clock), owner(), tier)
        .unwrap();
    (vault, store, clock)
}

fn login(title: &str, now: u64) -> PasswordRecord {
    let mut record = PasswordRecord::new(
        title.to_owned(),
        "user@example.com".to_owned(),
        "hunter2-but-longer".to_owned(),
        EntryKind::Login,
        now,
    );
    record.url = Some("https://example.com".to_owned());
    record
}

#[test]
fn test_store_retrieve_update_delete() {
    let (mut vault, _store, clock) = new_vault(CapacityTier::Basic);
    let key = session_key();

    let id = vault.store_entry(&key, &login("email", 1_000)).unwrap();
    assert_eq!(id, EntryId(1));

    clock.advance(60);
    let fetched = vault.retrieve_entry(&key, id).unwrap();
    assert_eq!(fetched.title, "email");
    assert_eq!(fetched.secret, "hunter2-but-longer");

    let mut updated = fetched.clone();
    updated.secret = "rotated-secret-value".to_owned();
    updated.updated_at = 1_060;
    vault.update_entry(&key, id, &updated).unwrap();
    assert_eq!(
        vault.retrieve_entry(&key, id).unwrap().secret,
        "rotated-secret-value"
    );

    vault.delete_entry(id).unwrap();
    assert!(matches!(
        vault.retrieve_entry(&key, id),
        Err(VaultError::EntryNotFound(_))
    ));
    assert_eq!(vault.master().entry_count, 0);
}

#[test]
fn test_entry_ids_never_reused() {
    let (mut vault, _store, _clock) = new_vault(CapacityTier::Basic);
    let key = session_key();

    let first = vault.store_entry(&key, &login("a", 1_000)).unwrap();
    vault.delete_entry(first).unwrap();
    let second = vault.store_entry(&key, &login("b", 1_000)).unwrap();
    assert_eq!(second, EntryId(2));
}

#[test]
fn test_reopen_preserves_state() {
    let (mut vault, store, clock) = new_vault(CapacityTier::Basic);
    let key = session_key();

    let id = vault.store_entry(&key, &login("persisted", 1_000)).unwrap();
    vault.retrieve_entry(&key, id).unwrap();
    drop(vault);

    let mut reopened = PasswordVault::open(Arc::clone(&store), clock).unwrap();
    assert_eq!(reopened.master().entry_count, 1);
    let record = reopened.retrieve_entry(&key, id).unwrap();
    assert_eq!(record.title, "persisted");
}

#[test]
fn test_wrong_key_fails_closed() {
    let (mut vault, _store, _clock) = new_vault(CapacityTier::Basic);
    let key = session_key();
    let id = vault.store_entry(&key, &login("site", 1_000)).unwrap();

    let wrong = SessionKey::from_bytes([0xEEu8; 32]);
    assert!(matches!(
        vault.retrieve_entry(&wrong, id),
        Err(VaultError::DecryptionFailed { .. })
    ));
}

#[test]
fn test_listing_reports_partial_failure() {
    let (mut vault, _store, _clock) = new_vault(CapacityTier::Basic);
    let key = session_key();
    let other = SessionKey::from_bytes([0x99u8; 32]);

    let good = vault.store_entry(&key, &login("readable", 1_000)).unwrap();
    // Sealed under a different session key: undecryptable with `key`.
    let bad = vault.store_entry(&other, &login("opaque", 1_000)).unwrap();

    let listed = vault.list_entries(&key);
    assert_eq!(listed.len(), 2);
    let (_, good_result) = listed.iter().find(|(id, _)| *id == good).unwrap();
    let (_, bad_result) = listed.iter().find(|(id, _)| *id == bad).unwrap();
    assert_eq!(good_result.as_ref().unwrap().title, "readable");
    assert!(matches!(
        bad_result,
        Err(VaultError::DecryptionFailed { .. })
    ));
}

#[test]
fn test_free_tier_capacity_enforced() {
    let (mut vault, _store, _clock) = new_vault(CapacityTier::Free);
    let key = session_key();

    let mut stored = 0u32;
    let mut hit_limit = false;
    for n in 0..32 {
        let mut record = login(&format!("entry-{n}"), 1_000);
        record.notes = Some("n".repeat(64));
        match vault.store_entry(&key, &record) {
            Ok(_) => stored += 1,
            Err(VaultError::StorageLimitReached { .. }) => {
                hit_limit = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert!(hit_limit, "free tier never hit its 1 KiB budget");
    assert!(stored >= 1);
    assert!(vault.master().storage_used <= CapacityTier::Free.max_total_capacity());
}

#[test]
fn test_tier_upgrade_unlocks_capacity() {
    let (mut vault, _store, _clock) = new_vault(CapacityTier::Free);
    let key = session_key();

    loop {
        let mut record = login("filler", 1_000);
        record.notes = Some("n".repeat(64));
        if vault.store_entry(&key, &record).is_err() {
            break;
        }
    }

    assert!(matches!(
        vault.upgrade_tier(CapacityTier::Free),
        Err(VaultError::Unauthorized)
    ));
    vault.upgrade_tier(CapacityTier::Basic).unwrap();
    vault.store_entry(&key, &login("post-upgrade", 1_000)).unwrap();
}

#[test]
fn test_large_record_compresses_and_roundtrips() {
    let (mut vault, _store, _clock) = new_vault(CapacityTier::Premium);
    let key = session_key();

    let mut record = login("compressible", 1_000);
    record.notes = Some("the same phrase over and over ".repeat(100));
    let id = vault.store_entry(&key, &record).unwrap();

    let fetched = vault.retrieve_entry(&key, id).unwrap();
    assert_eq!(fetched.notes, record.notes);
    // 3000 bytes of notes compressed to well under the chunk budget.
    assert!(vault.master().storage_used < 1_500);
}

#[test]
fn test_update_relocates_when_chunk_is_full() {
    let (mut vault, _store, _clock) = new_vault(CapacityTier::Basic);
    let key = session_key();

    let id = vault.store_entry(&key, &login("movable", 1_000)).unwrap();
    assert_eq!(vault.master().locate(id).unwrap(), 0);

    // Grow the entry past the whole base chunk's capacity. The notes are
    // pseudorandom hex so compression cannot shrink them back under it.
    let mut state = 0x243F_6A88_85A3_08D3_u64;
    let mut notes = String::with_capacity(2_400);
    while notes.len() < 2_400 {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        notes.push_str(&format!("{state:016x}"));
    }
    let mut grown = login("movable", 1_000);
    grown.notes = Some(notes);
    vault.update_entry(&key, id, &grown).unwrap();

    assert_ne!(vault.master().locate(id).unwrap(), 0);
    assert_eq!(vault.retrieve_entry(&key, id).unwrap().notes, grown.notes);
}

#[test]
fn test_close_requires_owner_and_wipes_store() {
    let (mut vault, store, _clock) = new_vault(CapacityTier::Basic);
    let key = session_key();
    vault.store_entry(&key, &login("doomed", 1_000)).unwrap();

    let stranger = OwnerId::new([0xAAu8; 32]);
    let vault = match vault.close(&stranger) {
        Err(VaultError::Unauthorized) => {
            // Closing consumed nothing; reopen from the intact store.
            PasswordVault::open(Arc::clone(&store), Arc::new(ManualClock::starting_at(2_000)))
                .unwrap()
        }
        other => panic!("non-owner close should fail: {other:?}"),
    };

    vault.close(&owner()).unwrap();
    assert!(store.is_empty());
    assert!(PasswordVault::open(store, Arc::new(ManualClock::starting_at(3_000))).is_err());
}

#[test]
fn test_category_lifecycle() {
    let (mut vault, store, clock) = new_vault(CapacityTier::Basic);
    let key = session_key();

    let work = vault.create_category(b"work-sealed-name".to_vec()).unwrap();

    let mut record = login("payroll", 1_000);
    record.category_id = work;
    let id = vault.store_entry(&key, &record).unwrap();
    assert_eq!(vault.categories().category(work).unwrap().entry_count, 1);

    // Unknown category ids are rejected at filing time.
    let mut stray = login("stray", 1_000);
    stray.category_id = work + 1;
    assert!(matches!(
        vault.store_entry(&key, &stray),
        Err(VaultError::CategoryNotFound(_))
    ));

    // A non-empty category cannot be deleted.
    assert!(matches!(
        vault.delete_category(work),
        Err(VaultError::CategoryNotEmpty(_))
    ));

    // Refiling the entry as uncategorized empties the category.
    let mut refiled = vault.retrieve_entry(&key, id).unwrap();
    refiled.category_id = 0;
    vault.update_entry(&key, id, &refiled).unwrap();
    assert_eq!(vault.categories().category(work).unwrap().entry_count, 0);

    vault.rename_category(work, b"renamed-sealed".to_vec()).unwrap();
    drop(vault);

    // The registry survives a reopen, then deletion of the empty category.
    let mut reopened = PasswordVault::open(store, clock).unwrap();
    let category = reopened.categories().category(work).unwrap();
    assert_eq!(category.name, b"renamed-sealed");
    reopened.delete_category(work).unwrap();
    assert!(reopened.categories().category(work).is_none());
}

#[test]
fn test_expand_chunk_round_trip() {
    let (mut vault, _store, _clock) = new_vault(CapacityTier::Basic);
    let key = session_key();

    vault.store_entry(&key, &login("a", 1_000)).unwrap();
    vault.expand_chunk(0, 512).unwrap();
    assert_eq!(vault.master().descriptor(0).unwrap().max_capacity, 1_536);
}
