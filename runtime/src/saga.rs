//! Bookkeeping for bundle reservation sagas.
//!
//! A [`BundleReservationSaga`] has one step per SKU. Each completed step
//! records the reservation it produced; that id is the data needed to undo
//! it. On failure, [`BundleReservationSaga::compensation_plan`] yields the
//! undo actions for completed steps, newest first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use stockpile_core::quantity::Quantity;
use stockpile_core::types::{OrderId, ReservationId, SkuId};
use uuid::Uuid;

/// Unique identifier for a saga
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SagaId(Uuid);

impl SagaId {
    /// Creates a new random `SagaId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SagaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SagaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Overall saga status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaStatus {
    /// Created, locks not yet held.
    Started,
    /// Forward steps running.
    InProgress,
    /// Every step completed.
    Completed,
    /// Undoing completed steps.
    Compensating,
    /// Every completed step was undone.
    Compensated,
    /// Aborted, or compensation could not finish.
    Failed,
}

impl SagaStatus {
    /// `Completed`, `Compensated`, or `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Compensated | Self::Failed)
    }

    /// Compensation may only begin from `InProgress` or continue from `Compensating`.
    #[must_use]
    pub const fn can_compensate(self) -> bool {
        matches!(self, Self::InProgress | Self::Compensating)
    }
}

/// Status of one saga step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// Not yet run.
    Pending,
    /// Ran successfully.
    Completed,
    /// Ran and failed.
    Failed,
    /// Completed, then undone.
    Compensated,
}

/// Reservation of one SKU within a bundle saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStep {
    /// SKU this step reserves.
    pub sku_id: SkuId,
    /// Quantity this step reserves.
    pub quantity: Quantity,
    /// Current status.
    pub status: StepStatus,
    /// Reservation produced by the step; needed to undo it.
    pub reservation_id: Option<ReservationId>,
    /// Failure detail, for failed steps or failed compensations.
    pub error: Option<String>,
}

impl SagaStep {
    fn pending(sku_id: SkuId, quantity: Quantity) -> Self {
        Self {
            sku_id,
            quantity,
            status: StepStatus::Pending,
            reservation_id: None,
            error: None,
        }
    }

    /// Completed and carrying the reservation needed to undo it.
    #[must_use]
    pub const fn is_compensatable(&self) -> bool {
        matches!(self.status, StepStatus::Completed) && self.reservation_id.is_some()
    }
}

/// An undo action for a completed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensatingAction {
    /// Release a reservation made by a forward step.
    ReleaseReservation {
        /// SKU whose step is being undone.
        sku_id: SkuId,
        /// Reservation to release.
        reservation_id: ReservationId,
    },
}

/// Record of one multi-SKU reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleReservationSaga {
    saga_id: SagaId,
    order_id: OrderId,
    sets: u32,
    status: SagaStatus,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    steps: Vec<SagaStep>,
    failure_reason: Option<String>,
}

impl BundleReservationSaga {
    /// One pending step per SKU, in the map's (sorted) order.
    #[must_use]
    pub fn new(
        order_id: OrderId,
        required: &BTreeMap<SkuId, Quantity>,
        sets: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            saga_id: SagaId::new(),
            order_id,
            sets,
            status: SagaStatus::Started,
            started_at: now,
            completed_at: None,
            steps: required
                .iter()
                .map(|(sku, qty)| SagaStep::pending(sku.clone(), *qty))
                .collect(),
            failure_reason: None,
        }
    }

    /// Saga id.
    #[must_use]
    pub const fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    /// Order the saga reserves for.
    #[must_use]
    pub const fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    /// Number of bundle sets requested.
    #[must_use]
    pub const fn sets(&self) -> u32 {
        self.sets
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> SagaStatus {
        self.status
    }

    /// When the saga was created.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the saga reached a terminal status.
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }

    /// Why the saga did not complete.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// `Started → InProgress`.
    pub fn start(&mut self) {
        if self.status == SagaStatus::Started {
            self.status = SagaStatus::InProgress;
        }
    }

    /// Mark the step for `sku_id` completed. Completes the saga once every step has.
    pub fn record_step_success(
        &mut self,
        sku_id: &SkuId,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) {
        if let Some(step) = self.step_mut(sku_id) {
            step.status = StepStatus::Completed;
            step.reservation_id = Some(reservation_id);
        }
        if self
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Completed)
        {
            self.status = SagaStatus::Completed;
            self.completed_at = Some(now);
        }
    }

    /// Mark the step for `sku_id` failed and begin compensating.
    pub fn record_step_failure(&mut self, sku_id: &SkuId, reason: impl Into<String>) {
        let reason = reason.into();
        if let Some(step) = self.step_mut(sku_id) {
            step.status = StepStatus::Failed;
            step.error = Some(reason.clone());
        }
        self.failure_reason = Some(reason);
        if self.status.can_compensate() {
            self.status = SagaStatus::Compensating;
        }
    }

    /// Undo actions for every compensatable step, most recent first.
    #[must_use]
    pub fn compensation_plan(&self) -> Vec<CompensatingAction> {
        self.steps
            .iter()
            .rev()
            .filter(|step| step.is_compensatable())
            .filter_map(|step| {
                step.reservation_id
                    .map(|reservation_id| CompensatingAction::ReleaseReservation {
                        sku_id: step.sku_id.clone(),
                        reservation_id,
                    })
            })
            .collect()
    }

    /// Mark the step for `sku_id` undone. The saga becomes `Compensated`
    /// once no compensatable step remains.
    pub fn record_compensation(&mut self, sku_id: &SkuId, now: DateTime<Utc>) {
        if let Some(step) = self.step_mut(sku_id) {
            if step.is_compensatable() {
                step.status = StepStatus::Compensated;
            }
        }
        if self.status == SagaStatus::Compensating
            && !self.steps.iter().any(SagaStep::is_compensatable)
        {
            self.status = SagaStatus::Compensated;
            self.completed_at = Some(now);
        }
    }

    /// Note that undoing the step for `sku_id` failed; the step stays completed.
    pub fn record_compensation_failure(&mut self, sku_id: &SkuId, reason: impl Into<String>) {
        if let Some(step) = self.step_mut(sku_id) {
            step.error = Some(reason.into());
        }
    }

    /// Close out compensation: `Compensated` if every completed step was
    /// undone, otherwise `Failed`.
    pub fn finish_compensation(&mut self, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = if self.steps.iter().any(SagaStep::is_compensatable) {
            SagaStatus::Failed
        } else {
            SagaStatus::Compensated
        };
        self.completed_at = Some(now);
    }

    /// Abort with `reason`. Terminal.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = SagaStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.completed_at = Some(now);
    }

    /// Whether the saga reached a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn step_mut(&mut self, sku_id: &SkuId) -> Option<&mut SagaStep> {
        self.steps.iter_mut().find(|step| &step.sku_id == sku_id)
    }
}
