//! Guardian-based M-of-N recovery.
//!
//! The owner splits the vault master secret into shares held by guardians
//! off-protocol; the coordinator stores only per-guardian commitments. A
//! recovery request moves through Initiated, Confirming, ReadyAfterDelay and
//! the terminal Completed or Cancelled states. Completion is gated on three
//! independent conditions: the time delay has elapsed, at least the
//! threshold of guardians have confirmed, and the caller presents the
//! challenge plaintext only the reconstructed master secret can reveal.

pub mod challenge;
pub mod shamir;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{VaultError, VaultResult};
use crate::types::{MasterVault, OwnerId};

pub use challenge::{create_challenge, hash_proof, open_challenge, SealedChallenge};
pub use shamir::{reconstruct_secret, split_secret, SecretShare};

/// Maximum number of guardians per vault.
pub const MAX_GUARDIANS: usize = 10;

/// Shortest permitted recovery delay: one day.
pub const MIN_RECOVERY_DELAY_SECS: u64 = 86_400;

/// Longest permitted recovery delay: thirty days.
pub const MAX_RECOVERY_DELAY_SECS: u64 = 30 * 86_400;

/// How long a request stays completable after its delay elapses.
pub const REQUEST_TTL_SECS: u64 = 30 * 86_400;

/// Minimum spacing between recovery initiations.
pub const INITIATION_COOLDOWN_SECS: u64 = 3_600;

/// Lifecycle of a guardian registration.
///
/// A guardian registered by the owner starts pending and only counts toward
/// the threshold once they have explicitly accepted the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardianStatus {
    /// Registered by the owner, not yet accepted by the guardian.
    PendingAcceptance,
    /// Accepted; participates in recovery.
    Active,
    /// Removed by the owner. The record stays so the share index remains
    /// retired.
    Removed,
}

/// A registered guardian.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guardian {
    /// The guardian's identity.
    pub identity: OwnerId,
    /// Shamir evaluation point handed to this guardian, unique per vault.
    pub share_index: u8,
    /// `SHA256(share_bytes || identity)`; the share itself is never stored.
    pub commitment: [u8; 32],
    /// Unix timestamp of registration.
    pub added_at: u64,
    /// Where the guardian stands in the acceptance lifecycle.
    pub status: GuardianStatus,
}

/// Threshold and delay policy fixed at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Minimum confirming guardians (M).
    pub threshold: u8,
    /// Seconds between initiation and earliest completion.
    pub delay_secs: u64,
    /// `SHA256` of the master secret, for off-protocol sanity checks.
    pub master_secret_hash: [u8; 32],
    /// Unix timestamp of configuration.
    pub configured_at: u64,
}

/// Lifecycle of a recovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryStatus {
    /// Created by a guardian; only the initiator has confirmed.
    Initiated,
    /// At least one further guardian has confirmed.
    Confirming,
    /// Delay elapsed and threshold met; awaiting proof.
    ReadyAfterDelay,
    /// Ownership was transferred. Terminal.
    Completed,
    /// Cancelled by the owner. Terminal.
    Cancelled,
}

impl RecoveryStatus {
    /// True for states no transition may leave.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Outcome of a guardian confirmation.
///
/// Confirmations are set-adds: commutative and idempotent. A repeat is
/// reported, not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The guardian was added to the participant set.
    Confirmed,
    /// The guardian had already confirmed this request.
    AlreadyConfirmed,
}

/// One in-flight recovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    /// Monotonic per-vault request id.
    pub request_id: u64,
    /// Identity that will own the vault on completion.
    pub candidate: OwnerId,
    /// Guardian who initiated the request.
    pub initiator: OwnerId,
    /// Unix timestamp of initiation.
    pub created_at: u64,
    /// Delay captured from the config at initiation.
    pub delay_secs: u64,
    /// Unix timestamp after which the request can no longer complete.
    pub expires_at: u64,
    /// Sealed challenge envelope.
    #[serde(with = "BigArray")]
    pub envelope: [u8; challenge::ENVELOPE_SIZE],
    /// `SHA256` of the challenge plaintext.
    pub challenge_hash: [u8; 32],
    /// Guardians who have confirmed participation. The initiator is counted.
    pub confirmed: BTreeSet<OwnerId>,
    status: RecoveryStatus,
}

impl RecoveryRequest {
    /// Earliest Unix time at which completion is permitted.
    #[must_use]
    pub const fn ready_at(&self) -> u64 {
        self.created_at + self.delay_secs
    }

    /// True once the request can never complete.
    #[must_use]
    pub const fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// The request's status as of `now`.
    ///
    /// ReadyAfterDelay is derived rather than stored: a request becomes
    /// ready the moment both the delay and the threshold gate pass, with no
    /// write required.
    #[must_use]
    pub fn status(&self, now: u64, threshold: u8) -> RecoveryStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        if !self.is_expired(now)
            && now >= self.ready_at()
            && self.confirmed.len() >= usize::from(threshold)
        {
            return RecoveryStatus::ReadyAfterDelay;
        }
        self.status
    }
}

/// Computes the stored commitment for a guardian's share.
#[must_use]
pub fn share_commitment(share_bytes: &[u8], identity: &OwnerId) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(share_bytes);
    hasher.update(identity.as_bytes());
    hasher.finalize().into()
}

/// Checks a share received off-protocol against a guardian's commitment.
#[must_use]
pub fn verify_share_commitment(share: &SecretShare, guardian: &Guardian) -> bool {
    let computed = share_commitment(&share.bytes, &guardian.identity);
    bool::from(computed.ct_eq(&guardian.commitment))
}

/// Recovery state for one vault: guardian registry, policy and the current
/// request, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryCoordinator {
    /// Current vault owner; updated on completion.
    pub owner: OwnerId,
    /// Policy fixed by [`Self::configure`]; `None` until setup.
    pub config: Option<RecoveryConfig>,
    /// Registered guardians.
    pub guardians: Vec<Guardian>,
    request: Option<RecoveryRequest>,
    next_request_id: u64,
    last_initiation_at: Option<u64>,
}

impl RecoveryCoordinator {
    /// Creates a coordinator with no guardians and no policy.
    #[must_use]
    pub const fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            config: None,
            guardians: Vec::new(),
            request: None,
            next_request_id: 1,
            last_initiation_at: None,
        }
    }

    /// Registers a guardian in the pending state.
    ///
    /// The guardian must call [`Self::accept_guardianship`] before they
    /// count toward the threshold or may touch a request.
    ///
    /// # Errors
    ///
    /// [`VaultError::StorageLimitReached`] at the guardian cap,
    /// [`VaultError::GuardianAlreadyExists`] for a repeated identity,
    /// [`VaultError::DuplicateShareIndex`] / [`VaultError::InvalidShareIndex`]
    /// for a bad evaluation point, [`VaultError::ActiveRecoveryExists`] while
    /// a request is live.
    pub fn add_guardian(
        &mut self,
        identity: OwnerId,
        share_index: u8,
        commitment: [u8; 32],
        now: u64,
    ) -> VaultResult<()> {
        self.ensure_no_live_request(now)?;
        let registered = self
            .guardians
            .iter()
            .filter(|g| g.status != GuardianStatus::Removed)
            .count();
        if registered >= MAX_GUARDIANS {
            return Err(VaultError::limit(format!(
                "guardian cap of {MAX_GUARDIANS} reached"
            )));
        }
        if share_index == 0 {
            return Err(VaultError::InvalidShareIndex(0));
        }
        if self
            .guardians
            .iter()
            .any(|g| g.identity == identity && g.status != GuardianStatus::Removed)
        {
            return Err(VaultError::GuardianAlreadyExists);
        }
        // Evaluation points are retired for good: a removed guardian still
        // holds the share that was handed out at their index.
        if self.guardians.iter().any(|g| g.share_index == share_index) {
            return Err(VaultError::DuplicateShareIndex(share_index));
        }

        self.guardians.push(Guardian {
            identity,
            share_index,
            commitment,
            added_at: now,
            status: GuardianStatus::PendingAcceptance,
        });
        Ok(())
    }

    /// Activates a pending guardian. Called by the guardian themself.
    ///
    /// # Errors
    ///
    /// [`VaultError::GuardianNotFound`] for an unknown identity,
    /// [`VaultError::GuardianAlreadyAccepted`] unless the guardian is
    /// pending, [`VaultError::ActiveRecoveryExists`] while a request is
    /// live.
    pub fn accept_guardianship(&mut self, identity: &OwnerId, now: u64) -> VaultResult<()> {
        self.ensure_no_live_request(now)?;
        let guardian = self
            .guardians
            .iter_mut()
            .find(|g| &g.identity == identity && g.status != GuardianStatus::Removed)
            .ok_or(VaultError::GuardianNotFound)?;
        if guardian.status != GuardianStatus::PendingAcceptance {
            return Err(VaultError::GuardianAlreadyAccepted);
        }
        guardian.status = GuardianStatus::Active;
        tracing::debug!(guardian = %identity, "guardianship accepted");
        Ok(())
    }

    /// Removes a guardian.
    ///
    /// # Errors
    ///
    /// [`VaultError::GuardianNotFound`] for an unknown identity,
    /// [`VaultError::ActiveRecoveryExists`] while a request is live,
    /// [`VaultError::InsufficientGuardians`] when removal would leave fewer
    /// guardians than the configured threshold.
    pub fn remove_guardian(&mut self, identity: &OwnerId, now: u64) -> VaultResult<()> {
        self.ensure_no_live_request(now)?;
        let position = self
            .guardians
            .iter()
            .position(|g| &g.identity == identity && g.status != GuardianStatus::Removed)
            .ok_or(VaultError::GuardianNotFound)?;
        if let Some(config) = &self.config {
            let active_after = self.active_guardian_count()
                - usize::from(self.guardians[position].status == GuardianStatus::Active);
            if active_after < usize::from(config.threshold) {
                return Err(VaultError::InsufficientGuardians);
            }
        }
        self.guardians[position].status = GuardianStatus::Removed;
        Ok(())
    }

    /// Fixes the recovery policy.
    ///
    /// # Errors
    ///
    /// [`VaultError::ThresholdMisconfigured`] unless
    /// `1 <= threshold <= active guardian count`,
    /// [`VaultError::InvalidRecoveryDelay`] for a delay outside
    /// 1 to 30 days, [`VaultError::ActiveRecoveryExists`] while a request
    /// is live.
    pub fn configure(
        &mut self,
        threshold: u8,
        delay_secs: u64,
        master_secret_hash: [u8; 32],
        now: u64,
    ) -> VaultResult<()> {
        self.ensure_no_live_request(now)?;
        let active = self.active_guardian_count();
        let total = u8::try_from(active).unwrap_or(u8::MAX);
        if threshold == 0 || usize::from(threshold) > active {
            return Err(VaultError::ThresholdMisconfigured { threshold, total });
        }
        if !(MIN_RECOVERY_DELAY_SECS..=MAX_RECOVERY_DELAY_SECS).contains(&delay_secs) {
            return Err(VaultError::InvalidRecoveryDelay {
                seconds: delay_secs,
            });
        }

        self.config = Some(RecoveryConfig {
            threshold,
            delay_secs,
            master_secret_hash,
            configured_at: now,
        });
        tracing::info!(threshold, delay_secs, "recovery policy configured");
        Ok(())
    }

    /// The current request, live or terminal.
    #[must_use]
    pub const fn request(&self) -> Option<&RecoveryRequest> {
        self.request.as_ref()
    }

    /// Number of guardians in the Active state.
    #[must_use]
    pub fn active_guardian_count(&self) -> usize {
        self.guardians
            .iter()
            .filter(|g| g.status == GuardianStatus::Active)
            .count()
    }

    /// True when `identity` is a guardian in the Active state.
    #[must_use]
    pub fn is_active_guardian(&self, identity: &OwnerId) -> bool {
        self.guardians
            .iter()
            .any(|g| &g.identity == identity && g.status == GuardianStatus::Active)
    }

    /// Starts a recovery request on behalf of `candidate`.
    ///
    /// The initiating guardian is counted as the first participant.
    ///
    /// # Errors
    ///
    /// [`VaultError::RecoveryNotConfigured`] before setup,
    /// [`VaultError::NotActiveGuardian`] unless the caller is an Active
    /// guardian,
    /// [`VaultError::InsufficientGuardians`] when fewer Active guardians than the
    /// threshold remain, [`VaultError::ActiveRecoveryExists`] while another
    /// request is live, [`VaultError::RateLimited`] within the initiation
    /// cooldown.
    pub fn initiate(
        &mut self,
        guardian: &OwnerId,
        candidate: OwnerId,
        sealed: SealedChallenge,
        now: u64,
    ) -> VaultResult<u64> {
        let config = self
            .config
            .as_ref()
            .ok_or(VaultError::RecoveryNotConfigured)?;
        let threshold = config.threshold;
        let delay_secs = config.delay_secs;
        if !self.is_active_guardian(guardian) {
            return Err(VaultError::NotActiveGuardian);
        }
        if self.active_guardian_count() < usize::from(threshold) {
            return Err(VaultError::InsufficientGuardians);
        }
        self.ensure_no_live_request(now)?;
        if let Some(last) = self.last_initiation_at {
            let retry_at = last + INITIATION_COOLDOWN_SECS;
            if now < retry_at {
                return Err(VaultError::RateLimited { retry_at });
            }
        }

        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let mut confirmed = BTreeSet::new();
        confirmed.insert(*guardian);
        self.request = Some(RecoveryRequest {
            request_id,
            candidate,
            initiator: *guardian,
            created_at: now,
            delay_secs,
            expires_at: now + delay_secs + REQUEST_TTL_SECS,
            envelope: sealed.envelope,
            challenge_hash: sealed.challenge_hash,
            confirmed,
            status: RecoveryStatus::Initiated,
        });
        self.last_initiation_at = Some(now);

        tracing::info!(request_id, candidate = %candidate, "recovery initiated");
        Ok(request_id)
    }

    /// Records a guardian's confirmation of participation.
    ///
    /// # Errors
    ///
    /// [`VaultError::RequestNotFound`] for an unknown id,
    /// [`VaultError::RequestAlreadyTerminal`] after completion or
    /// cancellation, [`VaultError::RecoveryExpired`] past the deadline,
    /// [`VaultError::NotActiveGuardian`] unless the caller is an Active
    /// guardian.
    pub fn confirm(
        &mut self,
        guardian: &OwnerId,
        request_id: u64,
        now: u64,
    ) -> VaultResult<ConfirmOutcome> {
        if !self.is_active_guardian(guardian) {
            return Err(VaultError::NotActiveGuardian);
        }
        let request = self.request_mut(request_id)?;
        if request.status.is_terminal() {
            return Err(VaultError::RequestAlreadyTerminal);
        }
        if request.is_expired(now) {
            return Err(VaultError::RecoveryExpired);
        }

        if !request.confirmed.insert(*guardian) {
            return Ok(ConfirmOutcome::AlreadyConfirmed);
        }
        request.status = RecoveryStatus::Confirming;
        tracing::debug!(
            request_id,
            participants = request.confirmed.len(),
            "guardian confirmed recovery"
        );
        Ok(ConfirmOutcome::Confirmed)
    }

    /// Completes a recovery, transferring ownership to the candidate.
    ///
    /// All three gates are checked: elapsed delay, participant threshold and
    /// the challenge proof, in that order, after the expiry check. The proof
    /// comparison is constant-time.
    ///
    /// # Errors
    ///
    /// [`VaultError::RequestNotFound`], [`VaultError::RequestAlreadyTerminal`],
    /// [`VaultError::RecoveryExpired`], [`VaultError::RecoveryNotReady`]
    /// before the delay elapses,
    /// [`VaultError::InsufficientParticipants`] below the threshold and
    /// [`VaultError::InvalidProof`] for a wrong proof.
    pub fn complete(
        &mut self,
        request_id: u64,
        proof: &[u8],
        master: &mut MasterVault,
        now: u64,
    ) -> VaultResult<OwnerId> {
        let threshold = self
            .config
            .as_ref()
            .ok_or(VaultError::RecoveryNotConfigured)?
            .threshold;
        let request = self.request_mut(request_id)?;
        if request.status.is_terminal() {
            return Err(VaultError::RequestAlreadyTerminal);
        }
        if request.is_expired(now) {
            return Err(VaultError::RecoveryExpired);
        }
        if now < request.ready_at() {
            return Err(VaultError::RecoveryNotReady);
        }
        if request.confirmed.len() < usize::from(threshold) {
            return Err(VaultError::InsufficientParticipants {
                confirmed: request.confirmed.len(),
                threshold,
            });
        }
        let presented = challenge::hash_proof(proof);
        if !bool::from(presented.ct_eq(&request.challenge_hash)) {
            return Err(VaultError::InvalidProof);
        }

        request.status = RecoveryStatus::Completed;
        let candidate = request.candidate;
        let previous = self.owner;
        self.owner = candidate;
        master.owner = candidate;
        master.touch(now);

        tracing::info!(
            request_id,
            previous = %previous,
            new_owner = %candidate,
            "recovery completed, ownership transferred"
        );
        Ok(candidate)
    }

    /// Cancels a live request. Owner only.
    ///
    /// # Errors
    ///
    /// [`VaultError::Unauthorized`] for a non-owner caller,
    /// [`VaultError::RequestNotFound`] and
    /// [`VaultError::RequestAlreadyTerminal`] as for the other transitions.
    pub fn cancel(&mut self, caller: &OwnerId, request_id: u64, now: u64) -> VaultResult<()> {
        if caller != &self.owner {
            return Err(VaultError::Unauthorized);
        }
        let request = self.request_mut(request_id)?;
        if request.status.is_terminal() {
            return Err(VaultError::RequestAlreadyTerminal);
        }
        request.status = RecoveryStatus::Cancelled;
        tracing::info!(request_id, at = now, "recovery cancelled by owner");
        Ok(())
    }

    /// The effective status of a request as of `now`.
    ///
    /// # Errors
    ///
    /// [`VaultError::RequestNotFound`] for an unknown id.
    pub fn request_status(&self, request_id: u64, now: u64) -> VaultResult<RecoveryStatus> {
        let threshold = self.config.as_ref().map_or(0, |c| c.threshold);
        self.request
            .as_ref()
            .filter(|r| r.request_id == request_id)
            .map(|r| r.status(now, threshold))
            .ok_or(VaultError::RequestNotFound(request_id))
    }

    fn request_mut(&mut self, request_id: u64) -> VaultResult<&mut RecoveryRequest> {
        self.request
            .as_mut()
            .filter(|r| r.request_id == request_id)
            .ok_or(VaultError::RequestNotFound(request_id))
    }

    fn ensure_no_live_request(&self, now: u64) -> VaultResult<()> {
        if let Some(request) = &self.request {
            if !request.status.is_terminal() && !request.is_expired(now) {
                return Err(VaultError::ActiveRecoveryExists);
            }
        }
        Ok(())
    }
}
