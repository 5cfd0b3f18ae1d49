//! Builds level and action instances from policy level templates. Creation
//! is idempotent per (dunned entity, level): an instance already recorded
//! for that pair is reused, never duplicated.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};

use super::domain::{
    DunningActionInstance, DunningCollectionPlan, DunningLevelInstance, DunningPolicyLevel,
    InstanceStatus, TriggerScope,
};
use super::repository::{LevelInstanceLedger, RepositoryError};

/// Everything `instantiate` needs besides the plan and the level template.
#[derive(Debug, Clone)]
pub struct InstantiationContext {
    pub today: NaiveDate,
    pub plan_start: NaiveDate,
    /// Due date of the triggering invoice; reminder levels compare against
    /// it. Customer-mode plans have none, so their reminder levels are
    /// ignored.
    pub due_date: Option<NaiveDate>,
    pub scope: TriggerScope,
    /// Set by the policy-switch path to pin the instance status regardless
    /// of the usual disposition rules.
    pub forced_status: Option<InstanceStatus>,
}

/// Whether `instantiate` created a fresh instance or found an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstantiationOutcome {
    Created,
    Reused,
}

#[derive(Clone)]
pub struct LevelInstanceFactory {
    ledger: Arc<dyn LevelInstanceLedger>,
}

impl LevelInstanceFactory {
    pub fn new(ledger: Arc<dyn LevelInstanceLedger>) -> Self {
        Self { ledger }
    }

    /// Attach an instance of `policy_level` to `plan`. Looks for an existing
    /// instance within the plan and in the ledger before building one; the
    /// freshly built instance is recorded so later passes reuse it.
    pub fn instantiate(
        &self,
        plan: &mut DunningCollectionPlan,
        policy_level: &DunningPolicyLevel,
        ctx: &InstantiationContext,
    ) -> Result<InstantiationOutcome, RepositoryError> {
        if plan.has_instance_for(&policy_level.level.code) {
            return Ok(InstantiationOutcome::Reused);
        }

        // The switch path re-instantiates with a pinned status and must not
        // pick up instances recorded under the replaced plan.
        if ctx.forced_status.is_none() {
            if let Some(existing) = self.ledger.find(&ctx.scope, &policy_level.level.code)? {
                plan.levels.push(existing);
                return Ok(InstantiationOutcome::Reused);
            }
        }

        let instance = build_instance(policy_level, ctx);
        self.ledger.record(&ctx.scope, &instance)?;
        plan.levels.push(instance);
        Ok(InstantiationOutcome::Created)
    }

    /// Build a plan-less reminder instance when the reminder's exact day
    /// matches and it has not fired for this entity yet. The caller
    /// dispatches the actions and then records the result.
    pub fn instantiate_detached(
        &self,
        policy_level: &DunningPolicyLevel,
        scope: &TriggerScope,
        due_date: NaiveDate,
        today: NaiveDate,
    ) -> Result<Option<DunningLevelInstance>, RepositoryError> {
        if !policy_level.level.is_reminder {
            return Ok(None);
        }
        if self.ledger.find(scope, &policy_level.level.code)?.is_some() {
            return Ok(None);
        }
        if due_date + Duration::days(policy_level.level.days_overdue) != today {
            return Ok(None);
        }

        let ctx = InstantiationContext {
            today,
            plan_start: today,
            due_date: Some(due_date),
            scope: scope.clone(),
            forced_status: None,
        };
        Ok(Some(build_instance(policy_level, &ctx)))
    }

    /// Persist a detached instance after its actions ran.
    pub fn record_detached(
        &self,
        scope: &TriggerScope,
        instance: &DunningLevelInstance,
    ) -> Result<(), RepositoryError> {
        self.ledger.record(scope, instance)
    }
}

fn build_instance(
    policy_level: &DunningPolicyLevel,
    ctx: &InstantiationContext,
) -> DunningLevelInstance {
    let level = &policy_level.level;
    let scheduled = ctx.plan_start + Duration::days(level.days_overdue);

    let (status, execution_date) = match ctx.forced_status {
        Some(InstanceStatus::Done) => (InstanceStatus::Done, Some(ctx.today)),
        Some(InstanceStatus::InProgress) => (InstanceStatus::InProgress, Some(ctx.today)),
        Some(InstanceStatus::Ignored) => (InstanceStatus::Ignored, None),
        Some(InstanceStatus::ToBeDone) => (InstanceStatus::ToBeDone, Some(scheduled)),
        None if level.is_reminder => match ctx.due_date {
            // A reminder fires only on its exact day; reaching this point
            // means it was not triggered before.
            Some(due) if due + Duration::days(level.days_overdue) == ctx.today => {
                (InstanceStatus::ToBeDone, Some(ctx.today))
            }
            _ => (InstanceStatus::Ignored, None),
        },
        // The sequence-0 level is what triggered the plan; it is executed as
        // part of creation.
        None if policy_level.sequence == 0 => (InstanceStatus::Done, Some(ctx.plan_start)),
        None => (InstanceStatus::ToBeDone, Some(scheduled)),
    };

    let actions = level
        .actions
        .iter()
        .map(|template| {
            let (action_status, action_date) = match status {
                InstanceStatus::Done | InstanceStatus::InProgress => {
                    (status, Some(ctx.today))
                }
                InstanceStatus::Ignored => (InstanceStatus::Ignored, None),
                InstanceStatus::ToBeDone => (InstanceStatus::ToBeDone, None),
            };
            DunningActionInstance {
                code: template.code.clone(),
                kind: template.kind,
                mode: template.mode,
                status: action_status,
                execution_date: action_date,
            }
        })
        .collect();

    DunningLevelInstance {
        sequence: policy_level.sequence,
        level_code: level.code.clone(),
        days_overdue: level.days_overdue,
        is_reminder: level.is_reminder,
        status,
        execution_date,
        actions,
    }
}
