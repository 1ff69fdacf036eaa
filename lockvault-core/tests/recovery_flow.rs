//! Full recovery protocol exercised through the vault facade.

use std::sync::Arc;

use lockvault_core::platform::memory::{ManualClock, MemoryStore};
use lockvault_core::recovery::{
    create_challenge, open_challenge, reconstruct_secret, share_commitment, split_secret,
    verify_share_commitment, ConfirmOutcome, RecoveryStatus, SecretShare,
};
use lockvault_core::{
    CapacityTier, EntryKind, OwnerId, PasswordRecord, PasswordVault, SessionKey, VaultError,
};

const DAY: u64 = 86_400;

fn owner() -> OwnerId {
    OwnerId::new([0x01u8; 32])
}

fn guardian(n: u8) -> OwnerId {
    OwnerId::new([0x10 + n; 32])
}

fn candidate() -> OwnerId {
    OwnerId::new([0xC0u8; 32])
}

fn master_secret() -> SessionKey {
    SessionKey::from_bytes([0x3Cu8; 32])
}

/// Vault with five guardians holding shares of the master secret,
/// threshold 3, delay 7 days.
fn recovery_vault() -> (
    PasswordVault<Arc<MemoryStore>, Arc<ManualClock>>,
    Arc<MemoryStore>,
    Arc<ManualClock>,
    Vec<SecretShare>,
) {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::starting_at(1_000));
    let mut vault = PasswordVault::create(
        Arc::clone(&store),
        Arc::clone(&clock),
        owner(),
        CapacityTier::Basic,
    )
    .unwrap();

    let secret = master_secret();
    let shares = split_secret(secret.as_bytes(), 3, &[1, 2, 3, 4, 5]).unwrap();
    for (i, share) in shares.iter().enumerate() {
        let n = u8::try_from(i).unwrap() + 1;
        let identity = guardian(n);
        vault
            .add_guardian(identity, share.index, share_commitment(&share.bytes, &identity))
            .unwrap();
        vault.accept_guardianship(&identity).unwrap();
    }
    let secret_hash = lockvault_core::recovery::hash_proof(secret.as_bytes());
    vault.configure_recovery(3, 7 * DAY, secret_hash).unwrap();

    (vault, store, clock, shares)
}

#[test]
fn test_share_commitments_verify() {
    let (vault, _store, _clock, shares) = recovery_vault();
    for (share, registered) in shares.iter().zip(&vault.recovery().guardians) {
        assert!(verify_share_commitment(share, registered));
    }
    // A share handed to the wrong guardian fails its commitment.
    assert!(!verify_share_commitment(
        &shares[1],
        &vault.recovery().guardians[0]
    ));
}

#[test]
fn test_full_recovery_transfers_ownership() {
    let (mut vault, store, clock, shares) = recovery_vault();
    let key = session_key_for_old_owner();

    let entry = vault
        .store_entry(&key, &record("email account"))
        .unwrap();

    // A guardian initiates on behalf of the candidate identity.
    let sealed = create_challenge(&master_secret(), &owner()).unwrap();
    let request = vault
        .initiate_recovery(&guardian(1), candidate(), sealed.clone())
        .unwrap();

    // Day 1: two more guardians confirm, reaching the threshold.
    clock.advance(DAY);
    assert_eq!(
        vault.confirm_recovery(&guardian(2), request).unwrap(),
        ConfirmOutcome::Confirmed
    );
    assert_eq!(
        vault.confirm_recovery(&guardian(3), request).unwrap(),
        ConfirmOutcome::Confirmed
    );
    assert_eq!(
        vault.confirm_recovery(&guardian(3), request).unwrap(),
        ConfirmOutcome::AlreadyConfirmed
    );

    // The candidate's side: gather three shares, rebuild the secret, open
    // the challenge.
    let subset = [shares[0].clone(), shares[2].clone(), shares[4].clone()];
    let rebuilt = reconstruct_secret(&subset).unwrap();
    let rebuilt_key = SessionKey::from_bytes(rebuilt.try_into().unwrap());
    let proof = open_challenge(&rebuilt_key, &owner(), &sealed.envelope).unwrap();

    // Day 2: threshold met, proof in hand, but the delay gate holds.
    clock.advance(DAY);
    assert!(matches!(
        vault.complete_recovery(request, &proof),
        Err(VaultError::RecoveryNotReady)
    ));

    // Day 8: all three gates pass.
    clock.advance(6 * DAY);
    assert_eq!(
        vault
            .recovery()
            .request_status(request, clock_now(&clock))
            .unwrap(),
        RecoveryStatus::ReadyAfterDelay
    );
    let new_owner = vault.complete_recovery(request, &proof).unwrap();
    assert_eq!(new_owner, candidate());
    assert_eq!(vault.master().owner, candidate());

    // The transfer is durable.
    let reopened = PasswordVault::open(Arc::clone(&store), Arc::clone(&clock)).unwrap();
    assert_eq!(reopened.master().owner, candidate());
    assert_eq!(reopened.master().entry_count, 1);

    // Entries sealed before the transfer were bound to the old owner's
    // associated data; the candidate must re-seal them after taking over.
    assert!(matches!(
        vault.retrieve_entry(&key, entry),
        Err(VaultError::DecryptionFailed { .. })
    ));
}

#[test]
fn test_two_shares_cannot_open_challenge() {
    let (_vault, _store, _clock, shares) = recovery_vault();
    let sealed = create_challenge(&master_secret(), &owner()).unwrap();

    let partial = [shares[0].clone(), shares[1].clone()];
    let garbage = reconstruct_secret(&partial).unwrap();
    let garbage_key = SessionKey::from_bytes(garbage.try_into().unwrap());
    assert!(matches!(
        open_challenge(&garbage_key, &owner(), &sealed.envelope),
        Err(VaultError::DecryptionFailed { .. })
    ));
}

#[test]
fn test_owner_cancellation_sticks() {
    let (mut vault, _store, clock, _shares) = recovery_vault();
    let sealed = create_challenge(&master_secret(), &owner()).unwrap();
    let request = vault
        .initiate_recovery(&guardian(1), candidate(), sealed)
        .unwrap();

    vault.cancel_recovery(&owner(), request).unwrap();

    clock.advance(10 * DAY);
    assert!(matches!(
        vault.confirm_recovery(&guardian(2), request),
        Err(VaultError::RequestAlreadyTerminal)
    ));
    assert_eq!(vault.master().owner, owner());
}

#[test]
fn test_non_guardian_cannot_participate() {
    let (mut vault, _store, _clock, _shares) = recovery_vault();
    let sealed = create_challenge(&master_secret(), &owner()).unwrap();

    assert!(matches!(
        vault.initiate_recovery(&OwnerId::new([0xFFu8; 32]), candidate(), sealed.clone()),
        Err(VaultError::NotActiveGuardian)
    ));

    let request = vault
        .initiate_recovery(&guardian(1), candidate(), sealed)
        .unwrap();
    assert!(matches!(
        vault.confirm_recovery(&OwnerId::new([0xFFu8; 32]), request),
        Err(VaultError::NotActiveGuardian)
    ));
}

#[test]
fn test_guardian_edits_blocked_during_recovery() {
    let (mut vault, _store, _clock, shares) = recovery_vault();
    let sealed = create_challenge(&master_secret(), &owner()).unwrap();
    vault
        .initiate_recovery(&guardian(1), candidate(), sealed)
        .unwrap();

    let extra = guardian(9);
    assert!(matches!(
        vault.add_guardian(extra, 9, share_commitment(&shares[0].bytes, &extra)),
        Err(VaultError::ActiveRecoveryExists)
    ));
    assert!(matches!(
        vault.remove_guardian(&guardian(5)),
        Err(VaultError::ActiveRecoveryExists)
    ));
}

#[test]
fn test_pending_guardian_must_accept_first() {
    let (mut vault, store, clock, shares) = recovery_vault();
    let extra = guardian(6);
    vault
        .add_guardian(extra, 6, share_commitment(&shares[0].bytes, &extra))
        .unwrap();

    // Registered but not yet accepted: no protocol participation.
    let sealed = create_challenge(&master_secret(), &owner()).unwrap();
    assert!(matches!(
        vault.initiate_recovery(&extra, candidate(), sealed),
        Err(VaultError::NotActiveGuardian)
    ));
    assert_eq!(vault.recovery().active_guardian_count(), 5);

    vault.accept_guardianship(&extra).unwrap();
    assert_eq!(vault.recovery().active_guardian_count(), 6);

    // Acceptance is durable.
    let reopened = PasswordVault::open(Arc::clone(&store), Arc::clone(&clock)).unwrap();
    assert!(reopened.recovery().is_active_guardian(&extra));
}

fn session_key_for_old_owner() -> SessionKey {
    SessionKey::from_bytes([0xABu8; 32])
}

fn record(title: &str) -> PasswordRecord {
    PasswordRecord::new(
        title.to_owned(),
        "user".to_owned(),
        "secret".to_owned(),
        EntryKind::Login,
        1_000,
    )
}

fn clock_now(clock: &ManualClock) -> u64 {
    use lockvault_core::platform::LogicalClock;
    clock.unix_now()
}
