use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CircleConfig;
use crate::error::{CircleError, StateViolation};
use crate::events::{CircleEvent, EventLog, EventRecord, EventSink};
use crate::guard::TransitionGuard;
use crate::history::ContributionHistory;
use crate::reputation::{self, ReputationChange, Standing};
use crate::transfer::AssetTransfer;
use crate::types::{
    Amount, AttestationRef, CircleId, CircleState, CircleStatus, ContributionRecord,
    CustodyAccount, Member, ParticipantId, TransferReceipt,
};

/// Outcome of a committed payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSummary {
    pub cycle: u64,
    pub recipient: ParticipantId,
    pub amount: Amount,
    pub contributors: u32,
    pub changes: Vec<ReputationChange>,
    pub receipt: TransferReceipt,
}

#[derive(Debug)]
struct LedgerState {
    phase: CircleState,
    current_cycle: u64,
    next_payout_index: u32,
    members: HashMap<ParticipantId, Member>,
    payout_queue: Vec<ParticipantId>,
    history: ContributionHistory,
    custody_balance: Amount,
    cycle_started_at: DateTime<Utc>,
    events: EventLog,
}

impl LedgerState {
    fn members_count(&self) -> u32 {
        self.payout_queue.len() as u32
    }

    fn is_member(&self, participant: &ParticipantId) -> bool {
        self.members
            .get(participant)
            .is_some_and(|member| member.active)
    }
}

/// Everything a payout will write, computed before the asset push.
struct PayoutPlan {
    cycle: u64,
    recipient: ParticipantId,
    amount: Amount,
    contributors: u32,
    changes: Vec<ReputationChange>,
}

/// One rotating savings circle.
///
/// Owns membership, the payout queue, the per-cycle contribution record,
/// reputation, and custody accounting for a single circle. Mutating operations
/// hold an in-flight guard from precondition check to commit; the asset-transfer
/// collaborator is called without holding the state lock, so reads issued from
/// inside that call see the state as it was before the operation began.
pub struct CircleLedger {
    id: CircleId,
    config: CircleConfig,
    custody: CustodyAccount,
    transfer: Arc<dyn AssetTransfer>,
    sink: Option<Arc<dyn EventSink>>,
    guard: TransitionGuard,
    state: RwLock<LedgerState>,
}

impl fmt::Debug for CircleLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircleLedger")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("rail", &self.transfer.rail())
            .field("in_flight", &self.guard.is_held())
            .finish_non_exhaustive()
    }
}

impl CircleLedger {
    pub fn new(
        id: CircleId,
        config: CircleConfig,
        transfer: Arc<dyn AssetTransfer>,
    ) -> Result<Self, CircleError> {
        config.validate()?;

        let state = LedgerState {
            phase: CircleState::Open,
            current_cycle: 0,
            next_payout_index: 0,
            members: HashMap::new(),
            payout_queue: Vec::new(),
            history: ContributionHistory::new(config.history_retention),
            custody_balance: 0,
            cycle_started_at: Utc::now(),
            events: EventLog::new(id),
        };

        debug!(
            circle = %id,
            asset = %config.asset,
            contribution = %config.contribution_amount,
            max_members = config.max_members,
            "circle created"
        );

        Ok(Self {
            id,
            custody: id.custody_account(),
            config,
            transfer,
            sink: None,
            guard: TransitionGuard::default(),
            state: RwLock::new(state),
        })
    }

    /// Mirror every committed event record to `sink`.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    // ─── Transitions ────────────────────────────────────────────────

    /// Admit a participant and give them the next payout slot.
    pub fn join(
        &self,
        participant: ParticipantId,
        attestation: AttestationRef,
    ) -> Result<Member, CircleError> {
        let _permit = self.guard.enter()?;
        let mut state = self.state.write();

        if state.members.contains_key(&participant) {
            return Err(CircleError::AlreadyMember(participant));
        }
        if state.members_count() >= self.config.max_members {
            return Err(CircleError::CircleFull {
                max_members: self.config.max_members,
            });
        }
        if attestation.is_empty() {
            return Err(CircleError::InvalidAttestation);
        }

        let slot = state.members_count();
        let member = Member {
            participant: participant.clone(),
            active: true,
            reputation: 0,
            joined_at: slot,
            attestation: attestation.clone(),
            payouts_received: 0,
            total_received: 0,
        };
        state.members.insert(participant.clone(), member.clone());
        state.payout_queue.push(participant.clone());

        let cycle = state.current_cycle;
        if state.members_count() == self.config.max_members {
            state.phase = CircleState::Locked;
            info!(circle = %self.id, members = slot + 1, "circle full, payout rotation locked");
        }

        let record = state.events.append(CircleEvent::Joined {
            participant: participant.clone(),
            slot,
            cycle,
            attestation,
        });
        drop(state);

        info!(circle = %self.id, participant = %participant, slot, "member joined");
        self.publish(&[record]);
        Ok(member)
    }

    /// Pull the fixed contribution from `participant` for the current cycle.
    ///
    /// The paid flag is set only after the pull succeeds.
    pub fn contribute(&self, participant: &ParticipantId) -> Result<ContributionRecord, CircleError> {
        let _permit = self.guard.enter()?;

        let cycle = {
            let state = self.state.read();
            if !state.is_member(participant) {
                return Err(CircleError::NotMember(participant.clone()));
            }
            if state.history.has_paid(participant, state.current_cycle) {
                return Err(CircleError::AlreadyPaid {
                    participant: participant.clone(),
                    cycle: state.current_cycle,
                });
            }
            state.current_cycle
        };

        let amount = self.config.contribution_amount;
        let receipt = self
            .transfer
            .pull(&self.config.asset, participant, &self.custody, amount)
            .map_err(|err| {
                warn!(
                    circle = %self.id,
                    participant = %participant,
                    cycle,
                    error = %err,
                    "contribution pull failed, nothing recorded"
                );
                CircleError::from(err)
            })?;

        let record = {
            let mut state = self.state.write();
            state.history.record_payment(participant.clone(), cycle);
            state.custody_balance = state.custody_balance.saturating_add(amount);
            state.events.append(CircleEvent::Contribution {
                participant: participant.clone(),
                cycle,
                amount,
            })
        };

        info!(
            circle = %self.id,
            participant = %participant,
            cycle,
            amount = %amount,
            settlement = %receipt.settlement_id,
            "contribution recorded"
        );
        self.publish(&[record]);

        Ok(ContributionRecord {
            participant: participant.clone(),
            cycle,
            amount,
            receipt,
        })
    }

    /// Pay this cycle's pot to the member at the head of the rotation.
    ///
    /// Reputation, the queue pointer, and the cycle counter move only if the push
    /// succeeds; on failure nothing changes.
    pub fn execute_payout(&self) -> Result<PayoutSummary, CircleError> {
        let _permit = self.guard.enter()?;

        let plan = {
            let state = self.state.read();
            self.plan_payout(&state)?
        };

        let receipt = self
            .transfer
            .push(&self.config.asset, &self.custody, &plan.recipient, plan.amount)
            .map_err(|err| {
                warn!(
                    circle = %self.id,
                    recipient = %plan.recipient,
                    cycle = plan.cycle,
                    error = %err,
                    "payout push failed, cycle left open"
                );
                CircleError::from(err)
            })?;

        let records = {
            let mut state = self.state.write();
            self.commit_payout(&mut state, &plan)
        };

        info!(
            circle = %self.id,
            recipient = %plan.recipient,
            cycle = plan.cycle,
            amount = %plan.amount,
            contributors = plan.contributors,
            settlement = %receipt.settlement_id,
            "payout executed"
        );
        self.publish(&records);

        Ok(PayoutSummary {
            cycle: plan.cycle,
            recipient: plan.recipient,
            amount: plan.amount,
            contributors: plan.contributors,
            changes: plan.changes,
            receipt,
        })
    }

    /// Spare `participant` the missed-contribution penalty for the current cycle.
    ///
    /// Credits nothing. Returns `false` when the member was already excused.
    pub fn excuse_missed(
        &self,
        caller: &ParticipantId,
        participant: &ParticipantId,
    ) -> Result<bool, CircleError> {
        let _permit = self.guard.enter()?;
        let mut state = self.state.write();

        if caller != &self.config.admin {
            return Err(CircleError::Unauthorized(caller.clone()));
        }
        if !state.is_member(participant) {
            return Err(CircleError::NotMember(participant.clone()));
        }
        let cycle = state.current_cycle;
        if state.history.has_paid(participant, cycle) {
            return Err(CircleError::AlreadyPaid {
                participant: participant.clone(),
                cycle,
            });
        }
        if !state.history.record_excuse(participant.clone(), cycle) {
            return Ok(false);
        }

        let record = state.events.append(CircleEvent::Excused {
            participant: participant.clone(),
            cycle,
            admin: caller.clone(),
        });
        drop(state);

        info!(circle = %self.id, participant = %participant, cycle, "missed contribution excused");
        self.publish(&[record]);
        Ok(true)
    }

    fn plan_payout(&self, state: &LedgerState) -> Result<PayoutPlan, CircleError> {
        let members = state.members_count();
        if state.phase != CircleState::Locked || members < self.config.max_members {
            return Err(CircleError::InvalidState(StateViolation::NotFull {
                members,
                max_members: self.config.max_members,
            }));
        }

        let cycle = state.current_cycle;
        let contributors = state.history.paid_count(cycle) as u32;
        if contributors == 0 {
            return Err(CircleError::InvalidState(StateViolation::NothingCollected(
                cycle,
            )));
        }

        // contributors <= max_members and the full pot was checked at construction
        let amount = self.config.contribution_amount * Amount::from(contributors);
        if state.custody_balance < amount {
            return Err(CircleError::InvalidState(StateViolation::CustodyShortfall {
                balance: state.custody_balance,
                collected: amount,
            }));
        }

        let recipient = state
            .payout_queue
            .get(state.next_payout_index as usize)
            .cloned()
            .ok_or(CircleError::InvalidState(StateViolation::NotFull {
                members,
                max_members: self.config.max_members,
            }))?;

        let changes = reputation::plan_changes(
            state.payout_queue.iter().map(|participant| {
                let current = state
                    .members
                    .get(participant)
                    .map_or(0, |member| member.reputation);
                let standing = Standing::classify(
                    state.history.has_paid(participant, cycle),
                    state.history.is_excused(participant, cycle),
                );
                (participant, current, standing)
            }),
            &recipient,
        );

        Ok(PayoutPlan {
            cycle,
            recipient,
            amount,
            contributors,
            changes,
        })
    }

    fn commit_payout(&self, state: &mut LedgerState, plan: &PayoutPlan) -> Vec<EventRecord> {
        for change in &plan.changes {
            if let Some(member) = state.members.get_mut(&change.participant) {
                member.reputation = change.reputation;
            }
        }
        if let Some(member) = state.members.get_mut(&plan.recipient) {
            member.payouts_received += 1;
            member.total_received = member.total_received.saturating_add(plan.amount);
        }

        state.custody_balance = state.custody_balance.saturating_sub(plan.amount);
        state.next_payout_index = (state.next_payout_index + 1) % self.config.max_members;
        state.current_cycle += 1;
        state.cycle_started_at = Utc::now();

        let pruned = state.history.prune(state.current_cycle);
        if pruned > 0 {
            debug!(
                circle = %self.id,
                pruned,
                oldest = ?state.history.oldest_cycle(),
                retained = state.history.retained_cycles(),
                "contribution history pruned"
            );
        }

        let mut records = Vec::with_capacity(plan.changes.len() + 2);
        records.push(state.events.append(CircleEvent::Payout {
            recipient: plan.recipient.clone(),
            cycle: plan.cycle,
            amount: plan.amount,
            contributors: plan.contributors,
        }));
        for change in plan
            .changes
            .iter()
            .filter(|change| change.standing == Standing::Missed)
        {
            debug!(circle = %self.id, participant = %change.participant, cycle = plan.cycle, "contribution missed");
            records.push(state.events.append(CircleEvent::Missed {
                participant: change.participant.clone(),
                cycle: plan.cycle,
            }));
        }
        records.push(state.events.append(CircleEvent::ReputationUpdated {
            cycle: plan.cycle,
            changes: plan.changes.clone(),
        }));
        records
    }

    fn publish(&self, records: &[EventRecord]) {
        let Some(sink) = &self.sink else {
            return;
        };
        for record in records {
            if let Err(err) = sink.publish(record) {
                warn!(
                    circle = %self.id,
                    sink = sink.name(),
                    index = record.index,
                    cycle = record.event.cycle(),
                    error = %err,
                    "event sink rejected record"
                );
            }
        }
    }

    // ─── Views ──────────────────────────────────────────────────────

    pub fn id(&self) -> CircleId {
        self.id
    }

    pub fn config(&self) -> &CircleConfig {
        &self.config
    }

    pub fn custody_account(&self) -> &CustodyAccount {
        &self.custody
    }

    pub fn state(&self) -> CircleState {
        self.state.read().phase
    }

    pub fn current_cycle(&self) -> u64 {
        self.state.read().current_cycle
    }

    pub fn next_payout_index(&self) -> u32 {
        self.state.read().next_payout_index
    }

    pub fn members_count(&self) -> u32 {
        self.state.read().members_count()
    }

    pub fn member(&self, participant: &ParticipantId) -> Option<Member> {
        self.state.read().members.get(participant).cloned()
    }

    pub fn reputation(&self, participant: &ParticipantId) -> Option<i64> {
        self.state
            .read()
            .members
            .get(participant)
            .map(|member| member.reputation)
    }

    pub fn attestation(&self, participant: &ParticipantId) -> Option<AttestationRef> {
        self.state
            .read()
            .members
            .get(participant)
            .map(|member| member.attestation.clone())
    }

    pub fn payout_queue(&self) -> Vec<ParticipantId> {
        self.state.read().payout_queue.clone()
    }

    pub fn payout_slot(&self, slot: u32) -> Option<ParticipantId> {
        self.state.read().payout_queue.get(slot as usize).cloned()
    }

    /// Recipient of the next payout; `None` while the circle is still open.
    pub fn current_recipient(&self) -> Option<ParticipantId> {
        let state = self.state.read();
        current_recipient(&state)
    }

    pub fn has_paid(&self, participant: &ParticipantId, cycle: u64) -> bool {
        self.state.read().history.has_paid(participant, cycle)
    }

    pub fn is_excused(&self, participant: &ParticipantId, cycle: u64) -> bool {
        self.state.read().history.is_excused(participant, cycle)
    }

    pub fn collected_this_cycle(&self) -> Amount {
        let state = self.state.read();
        self.collected(&state)
    }

    pub fn custody_balance(&self) -> Amount {
        self.state.read().custody_balance
    }

    pub fn is_transition_in_flight(&self) -> bool {
        self.guard.is_held()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.state.read().events.records().to_vec()
    }

    pub fn events_since(&self, from: u64) -> Vec<EventRecord> {
        self.state.read().events.since(from).to_vec()
    }

    pub fn verify_event_chain(&self) -> bool {
        self.state.read().events.verify_chain()
    }

    pub fn status(&self) -> CircleStatus {
        let state = self.state.read();
        let cycle_deadline = i64::try_from(self.config.cycle_duration_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|length| state.cycle_started_at.checked_add_signed(length))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        CircleStatus {
            circle: self.id,
            state: state.phase,
            asset: self.config.asset.clone(),
            current_cycle: state.current_cycle,
            next_payout_index: state.next_payout_index,
            contribution_amount: self.config.contribution_amount,
            members_count: state.members_count(),
            max_members: self.config.max_members,
            collected_this_cycle: self.collected(&state),
            custody_balance: state.custody_balance,
            current_recipient: current_recipient(&state),
            cycle_started_at: state.cycle_started_at,
            cycle_deadline,
        }
    }

    fn collected(&self, state: &LedgerState) -> Amount {
        let paid = state.history.paid_count(state.current_cycle) as Amount;
        self.config.contribution_amount * paid
    }
}

fn current_recipient(state: &LedgerState) -> Option<ParticipantId> {
    if state.phase != CircleState::Locked {
        return None;
    }
    state
        .payout_queue
        .get(state.next_payout_index as usize)
        .cloned()
}
