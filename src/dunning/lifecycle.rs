//! State machine over a collection plan's lifecycle: create, pause, resume,
//! stop, and policy switch. Every transition validates freshly-read state
//! and fails closed before touching the aggregate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use tracing::info;

use super::balance::{BalanceCalculator, BalanceError};
use super::billing::{CustomerAccount, Invoice};
use super::domain::{
    ActionMode, DunningCollectionPlan, DunningPolicy, InstanceStatus, PlanId, PlanScope,
    PlanStatus,
};
use super::factory::{InstantiationContext, LevelInstanceFactory};
use super::repository::{AccountOperationRepository, RepositoryError};

/// Stop reason recorded on the replaced plan when a policy switch occurs.
pub const POLICY_SWITCH_STOP_REASON: &str = "switched to a new dunning policy";

static PLAN_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_plan_id() -> PlanId {
    PlanId(PLAN_SEQUENCE.fetch_add(1, Ordering::Relaxed))
}

/// Illegal transition attempts against a plan's state machine.
#[derive(Debug, thiserror::Error)]
pub enum PlanTransitionError {
    #[error("plan {plan} is {found}, expected {expected}")]
    InvalidState {
        plan: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("pause-until date {until} is in the past")]
    PauseUntilInPast { until: NaiveDate },
    #[error("pause-until date {until} falls after the last scheduled level ({last_scheduled})")]
    PauseBeyondSchedule {
        until: NaiveDate,
        last_scheduled: NaiveDate,
    },
    #[error("plan {plan} has no level instances")]
    NoLevelInstances { plan: String },
}

/// Error raised by the plan lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Transition(#[from] PlanTransitionError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error("invoice-mode plan requires at least one related invoice")]
    MissingInvoices,
    #[error("policy '{policy}' has no level at sequence {sequence}")]
    LevelNotFound { policy: String, sequence: u32 },
}

/// Target of the stop cascade: a pending level instance, or one of its
/// pending actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeTarget {
    pub level_index: usize,
    pub action_index: Option<usize>,
}

/// Walk the plan's instance tree and collect everything not yet settled.
/// Applying the result ignores all of it in one step, which is what makes
/// stop absorbing.
pub fn pending_cascade(plan: &DunningCollectionPlan) -> Vec<CascadeTarget> {
    let mut targets = Vec::new();
    for (level_index, instance) in plan.levels.iter().enumerate() {
        if !instance.status.is_settled() {
            targets.push(CascadeTarget {
                level_index,
                action_index: None,
            });
        }
        for (action_index, action) in instance.actions.iter().enumerate() {
            if !action.status.is_settled() {
                targets.push(CascadeTarget {
                    level_index,
                    action_index: Some(action_index),
                });
            }
        }
    }
    targets
}

fn apply_cascade(plan: &mut DunningCollectionPlan, targets: &[CascadeTarget]) {
    for target in targets {
        match target.action_index {
            None => {
                let instance = &mut plan.levels[target.level_index];
                instance.status = InstanceStatus::Ignored;
                instance.execution_date = None;
            }
            Some(action_index) => {
                let action = &mut plan.levels[target.level_index].actions[action_index];
                action.status = InstanceStatus::Ignored;
                action.execution_date = None;
            }
        }
    }
}

fn shift_schedule(plan: &mut DunningCollectionPlan, delta_days: i64) {
    if delta_days == 0 {
        return;
    }
    let delta = Duration::days(delta_days);
    if let Some(date) = plan.next_action_date {
        plan.next_action_date = Some(date + delta);
    }
    for instance in plan
        .levels
        .iter_mut()
        .filter(|instance| instance.status == InstanceStatus::ToBeDone)
    {
        if let Some(date) = instance.execution_date {
            instance.execution_date = Some(date + delta);
        }
        for action in instance
            .actions
            .iter_mut()
            .filter(|action| !action.status.is_settled())
        {
            if let Some(date) = action.execution_date {
                action.execution_date = Some(date + delta);
            }
        }
    }
}

/// Service owning the plan state machine. Callers re-read the plan from
/// storage before handing it in; the operations assume current state.
pub struct CollectionPlanLifecycle {
    factory: LevelInstanceFactory,
    calculator: BalanceCalculator,
    operations: Arc<dyn AccountOperationRepository>,
}

impl CollectionPlanLifecycle {
    pub fn new(
        factory: LevelInstanceFactory,
        calculator: BalanceCalculator,
        operations: Arc<dyn AccountOperationRepository>,
    ) -> Self {
        Self {
            factory,
            calculator,
            operations,
        }
    }

    /// Open a plan dunning a single invoice. The balance is the invoice's
    /// recorded unmatched amount.
    pub fn create_from_invoice(
        &self,
        policy: &DunningPolicy,
        invoice: &Invoice,
        today: NaiveDate,
    ) -> Result<DunningCollectionPlan, LifecycleError> {
        let scope = PlanScope::Invoice {
            billing_account: invoice.billing_account.clone(),
            customer_account: invoice.customer_account.clone(),
            invoice_ids: vec![invoice.id],
        };
        self.create(
            policy,
            scope,
            invoice.unmatched_amount,
            invoice.currency.clone(),
            Some(invoice.due_date),
            today,
        )
    }

    /// Open a plan dunning a whole customer account. The balance comes from
    /// the balance calculator as of `today`.
    pub fn create_from_customer(
        &self,
        policy: &DunningPolicy,
        customer: &CustomerAccount,
        today: NaiveDate,
    ) -> Result<DunningCollectionPlan, LifecycleError> {
        let balance =
            self.calculator
                .due_balance(self.operations.as_ref(), &customer.code, Some(today))?;
        let scope = PlanScope::Customer {
            customer_account: customer.code.clone(),
        };
        self.create(
            policy,
            scope,
            balance,
            customer.trading_currency.clone(),
            None,
            today,
        )
    }

    /// Customer-account balance as the calculator sees it; used by the batch
    /// engine to qualify customer-level plans before opening them.
    pub fn customer_balance(
        &self,
        customer_account: &str,
        today: NaiveDate,
    ) -> Result<Decimal, LifecycleError> {
        Ok(self
            .calculator
            .due_balance(self.operations.as_ref(), customer_account, Some(today))?)
    }

    fn create(
        &self,
        policy: &DunningPolicy,
        scope: PlanScope,
        balance: Decimal,
        currency: String,
        due_date: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<DunningCollectionPlan, LifecycleError> {
        let trigger = scope.trigger_scope().ok_or(LifecycleError::MissingInvoices)?;

        let id = next_plan_id();
        let mut plan = DunningCollectionPlan {
            id,
            number: format!("C{}", id.0),
            policy_code: policy.code.clone(),
            scope,
            status: PlanStatus::Active,
            balance,
            currency,
            start_date: today,
            close_date: None,
            days_open: 1,
            current_level_sequence: 0,
            total_levels: policy.levels.len() as u32,
            pause_reason: None,
            paused_until: None,
            pause_duration_days: 0,
            retry_payment_on_resume: false,
            stop_reason: None,
            last_action: None,
            last_action_date: None,
            next_action: None,
            next_action_date: None,
            initial_plan: None,
            levels: Vec::new(),
        };

        for policy_level in policy.levels_in_sequence() {
            let ctx = InstantiationContext {
                today,
                plan_start: today,
                due_date,
                scope: trigger.clone(),
                forced_status: None,
            };
            self.factory.instantiate(&mut plan, policy_level, &ctx)?;
        }

        resolve_first_levels(&mut plan);

        info!(plan = %plan.number, policy = %policy.code, "collection plan created");
        Ok(plan)
    }

    /// Suspend an active plan until `pause_until`, shifting every pending
    /// level (and its actions) forward by the planned pause length.
    pub fn pause(
        &self,
        plan: &mut DunningCollectionPlan,
        force: bool,
        pause_until: NaiveDate,
        reason: &str,
        retry_payment_on_resume: bool,
        today: NaiveDate,
    ) -> Result<(), LifecycleError> {
        if plan.status != PlanStatus::Active {
            return Err(PlanTransitionError::InvalidState {
                plan: plan.number.clone(),
                expected: PlanStatus::Active.label(),
                found: plan.status.label(),
            }
            .into());
        }
        if pause_until < today {
            return Err(PlanTransitionError::PauseUntilInPast { until: pause_until }.into());
        }
        if !force {
            let last_scheduled = plan
                .levels
                .iter()
                .rev()
                .find_map(|instance| instance.execution_date);
            if let Some(last_scheduled) = last_scheduled {
                if pause_until > last_scheduled {
                    return Err(PlanTransitionError::PauseBeyondSchedule {
                        until: pause_until,
                        last_scheduled,
                    }
                    .into());
                }
            }
        }

        let delta = (pause_until - today).num_days();
        plan.status = PlanStatus::Paused;
        plan.pause_reason = Some(reason.to_string());
        plan.paused_until = Some(pause_until);
        plan.retry_payment_on_resume = retry_payment_on_resume;
        plan.pause_duration_days += delta;
        shift_schedule(plan, delta);

        info!(plan = %plan.number, until = %pause_until, "collection plan paused");
        Ok(())
    }

    /// Reactivate a paused plan. The schedule was already shifted by the
    /// planned pause length at pause time; this applies the signed
    /// difference between the real and the planned resume date, so the net
    /// shift across the pause/resume pair equals the actual elapsed time.
    /// Returns whether a payment retry was requested when pausing.
    pub fn resume(
        &self,
        plan: &mut DunningCollectionPlan,
        validate: bool,
        today: NaiveDate,
    ) -> Result<bool, LifecycleError> {
        if validate && plan.status != PlanStatus::Paused {
            return Err(PlanTransitionError::InvalidState {
                plan: plan.number.clone(),
                expected: PlanStatus::Paused.label(),
                found: plan.status.label(),
            }
            .into());
        }
        if plan.levels.is_empty() {
            return Err(PlanTransitionError::NoLevelInstances {
                plan: plan.number.clone(),
            }
            .into());
        }
        let until = plan.paused_until.ok_or_else(|| {
            PlanTransitionError::InvalidState {
                plan: plan.number.clone(),
                expected: PlanStatus::Paused.label(),
                found: plan.status.label(),
            }
        })?;

        let delta = (today - until).num_days();
        plan.pause_duration_days += delta;
        shift_schedule(plan, delta);

        plan.status = PlanStatus::Active;
        plan.pause_reason = None;
        plan.paused_until = None;
        let retry_payment = plan.retry_payment_on_resume;
        plan.retry_payment_on_resume = false;

        info!(plan = %plan.number, "collection plan resumed");
        Ok(retry_payment)
    }

    /// Close the plan for good: every pending level and action instance is
    /// ignored, the schedule is cleared, and the status becomes STOPPED.
    pub fn stop(
        &self,
        plan: &mut DunningCollectionPlan,
        reason: &str,
        today: NaiveDate,
    ) -> Result<(), LifecycleError> {
        if plan.status.is_terminal() {
            return Err(PlanTransitionError::InvalidState {
                plan: plan.number.clone(),
                expected: "active or paused",
                found: plan.status.label(),
            }
            .into());
        }

        let targets = pending_cascade(plan);
        apply_cascade(plan, &targets);

        plan.close_date = Some(today);
        plan.days_open = (today - plan.start_date).num_days().abs() + 1;
        plan.stop_reason = Some(reason.to_string());
        plan.status = PlanStatus::Stopped;
        plan.next_action = None;
        plan.next_action_date = None;
        plan.pause_reason = None;
        plan.paused_until = None;

        info!(plan = %plan.number, reason, "collection plan stopped");
        Ok(())
    }

    /// Replace `old` with a plan following `new_policy`, resuming escalation
    /// at `selected_sequence`. Levels before the selected one are recorded
    /// DONE, the rest TO_BE_DONE; the old plan is stopped with the switch
    /// sentinel and chained through `initial_plan`.
    pub fn switch_collection_plan(
        &self,
        old: &mut DunningCollectionPlan,
        new_policy: &DunningPolicy,
        selected_sequence: u32,
        today: NaiveDate,
    ) -> Result<DunningCollectionPlan, LifecycleError> {
        if new_policy.level_at(selected_sequence).is_none() {
            return Err(LifecycleError::LevelNotFound {
                policy: new_policy.code.clone(),
                sequence: selected_sequence,
            });
        }

        self.stop(old, POLICY_SWITCH_STOP_REASON, today)?;

        let id = next_plan_id();
        let mut plan = DunningCollectionPlan {
            id,
            number: format!("C{}", id.0),
            policy_code: new_policy.code.clone(),
            scope: old.scope.clone(),
            status: PlanStatus::Active,
            balance: old.balance,
            currency: old.currency.clone(),
            start_date: old.start_date,
            close_date: None,
            days_open: (today - old.start_date).num_days().abs() + 1,
            current_level_sequence: selected_sequence,
            total_levels: new_policy.levels.len() as u32,
            pause_reason: None,
            paused_until: None,
            pause_duration_days: 0,
            retry_payment_on_resume: false,
            stop_reason: None,
            last_action: old.last_action.clone(),
            last_action_date: old.last_action_date,
            next_action: None,
            next_action_date: None,
            initial_plan: Some(old.id),
            levels: Vec::new(),
        };

        let trigger = plan
            .scope
            .trigger_scope()
            .ok_or(LifecycleError::MissingInvoices)?;

        for policy_level in new_policy.levels_in_sequence() {
            let forced = if policy_level.sequence < selected_sequence {
                InstanceStatus::Done
            } else {
                InstanceStatus::ToBeDone
            };
            let ctx = InstantiationContext {
                today,
                plan_start: plan.start_date,
                due_date: None,
                scope: trigger.clone(),
                forced_status: Some(forced),
            };
            self.factory.instantiate(&mut plan, policy_level, &ctx)?;
        }

        if let Some(next_level) = new_policy.level_at(selected_sequence + 1) {
            let promoted = next_level
                .level
                .actions
                .iter()
                .find(|action| action.mode == ActionMode::Automatic)
                .or_else(|| next_level.level.actions.first());
            if let Some(action) = promoted {
                plan.next_action = Some(action.code.clone());
                plan.next_action_date =
                    Some(plan.start_date + Duration::days(next_level.level.days_overdue));
            }
        }

        info!(
            old_plan = %old.number,
            new_plan = %plan.number,
            policy = %new_policy.code,
            "collection plan switched"
        );
        Ok(plan)
    }
}

/// First-level resolution after creation: a DONE or IGNORED opening level
/// advances the current sequence, and a pending second level becomes the
/// plan's next action.
fn resolve_first_levels(plan: &mut DunningCollectionPlan) {
    let first = plan
        .level_instance(0)
        .map(|instance| {
            (
                instance.status,
                instance.actions.first().map(|action| action.code.clone()),
                instance.execution_date,
            )
        });

    match first {
        Some((InstanceStatus::Done, action, date)) => {
            plan.last_action = action;
            plan.last_action_date = date;
            plan.current_level_sequence = 1;
        }
        Some((InstanceStatus::Ignored, _, _)) => {
            plan.last_action = None;
            plan.last_action_date = None;
            plan.current_level_sequence = 1;
        }
        _ => {}
    }

    let second = plan
        .level_instance(1)
        .filter(|instance| instance.status == InstanceStatus::ToBeDone)
        .map(|instance| {
            (
                instance.actions.first().map(|action| action.code.clone()),
                instance.execution_date,
            )
        });
    if let Some((action, date)) = second {
        plan.next_action = action;
        plan.next_action_date = date;
    }
}
