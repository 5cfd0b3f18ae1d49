use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::billing::InvoiceId;

/// Identifier wrapper for collection plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanId(pub u64);

/// Lifecycle status of a collection plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStatus {
    Active,
    Paused,
    Stopped,
    Success,
    Failed,
}

impl PlanStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PlanStatus::Active => "active",
            PlanStatus::Paused => "paused",
            PlanStatus::Stopped => "stopped",
            PlanStatus::Success => "success",
            PlanStatus::Failed => "failed",
        }
    }

    /// Terminal statuses reject every further transition, including stop.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            PlanStatus::Stopped | PlanStatus::Success | PlanStatus::Failed
        )
    }
}

/// Status shared by level instances and action instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    ToBeDone,
    InProgress,
    Done,
    Ignored,
}

impl InstanceStatus {
    pub const fn label(self) -> &'static str {
        match self {
            InstanceStatus::ToBeDone => "to_be_done",
            InstanceStatus::InProgress => "in_progress",
            InstanceStatus::Done => "done",
            InstanceStatus::Ignored => "ignored",
        }
    }

    /// Done and Ignored instances are terminal and never re-scheduled.
    pub const fn is_settled(self) -> bool {
        matches!(self, InstanceStatus::Done | InstanceStatus::Ignored)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionMode {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    SendEmail,
    SendLetter,
    PhoneCall,
    RetryPayment,
}

impl ActionKind {
    pub const fn label(self) -> &'static str {
        match self {
            ActionKind::SendEmail => "send_email",
            ActionKind::SendLetter => "send_letter",
            ActionKind::PhoneCall => "phone_call",
            ActionKind::RetryPayment => "retry_payment",
        }
    }
}

/// Whether a policy dunns individual invoices or whole customer accounts.
/// An external settings collaborator keeps one mode active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyMode {
    InvoiceLevel,
    CustomerLevel,
}

/// Action template attached to a dunning level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningAction {
    pub code: String,
    pub kind: ActionKind,
    pub mode: ActionMode,
    pub assignee: Option<String>,
}

/// Escalation step template. Reminder levels fire only on the exact day
/// offset from the invoice due date, never on a rolling window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningLevel {
    pub code: String,
    pub days_overdue: i64,
    pub is_reminder: bool,
    pub actions: Vec<DunningAction>,
}

/// Position of a level template inside a policy's escalation ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningPolicyLevel {
    pub sequence: u32,
    pub level: DunningLevel,
}

/// Invoice/account field a policy rule line compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetField {
    CreditCategory,
    CustomerCategory,
    PaymentMethod,
    IsCompany,
    InvoiceAmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
}

/// One comparison inside a policy rule. The joint string ties this line to
/// the previous one and is validated at compile time ("AND"/"OR" only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningPolicyRuleLine {
    pub field: TargetField,
    pub operator: RuleOperator,
    pub value: String,
    pub line_joint: Option<String>,
}

/// Group of rule lines; rules are themselves joined by `rule_joint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningPolicyRule {
    pub id: u64,
    pub rule_joint: Option<String>,
    pub lines: Vec<DunningPolicyRuleLine>,
}

/// Ordered escalation policy with its eligibility rule tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DunningPolicy {
    pub code: String,
    pub name: String,
    pub mode: PolicyMode,
    pub active: bool,
    pub min_balance_trigger: Decimal,
    pub min_balance_currency: Option<String>,
    pub levels: Vec<DunningPolicyLevel>,
    pub rules: Vec<DunningPolicyRule>,
}

impl DunningPolicy {
    /// Levels in ascending sequence order.
    pub fn levels_in_sequence(&self) -> Vec<&DunningPolicyLevel> {
        let mut levels: Vec<&DunningPolicyLevel> = self.levels.iter().collect();
        levels.sort_by_key(|policy_level| policy_level.sequence);
        levels
    }

    /// The level whose days-overdue threshold triggers plan creation.
    pub fn first_non_reminder_level(&self) -> Option<&DunningPolicyLevel> {
        self.levels_in_sequence()
            .into_iter()
            .find(|policy_level| !policy_level.level.is_reminder)
    }

    pub fn level_at(&self, sequence: u32) -> Option<&DunningPolicyLevel> {
        self.levels
            .iter()
            .find(|policy_level| policy_level.sequence == sequence)
    }
}

/// Entity a level instance was triggered for, used to keep instantiation
/// idempotent across batch passes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerScope {
    Invoice(InvoiceId),
    Customer(String),
}

/// What a collection plan dunns: one invoice group under a billing account,
/// or a whole customer account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanScope {
    Invoice {
        billing_account: String,
        customer_account: String,
        invoice_ids: Vec<InvoiceId>,
    },
    Customer {
        customer_account: String,
    },
}

impl PlanScope {
    pub fn customer_account(&self) -> &str {
        match self {
            PlanScope::Invoice {
                customer_account, ..
            } => customer_account,
            PlanScope::Customer { customer_account } => customer_account,
        }
    }

    pub fn invoice_ids(&self) -> &[InvoiceId] {
        match self {
            PlanScope::Invoice { invoice_ids, .. } => invoice_ids,
            PlanScope::Customer { .. } => &[],
        }
    }

    /// Idempotency scope of the plan's level instances. None only for an
    /// invoice-mode scope carrying no invoices, which create() rejects.
    pub fn trigger_scope(&self) -> Option<TriggerScope> {
        match self {
            PlanScope::Invoice { invoice_ids, .. } => {
                invoice_ids.first().copied().map(TriggerScope::Invoice)
            }
            PlanScope::Customer { customer_account } => {
                Some(TriggerScope::Customer(customer_account.clone()))
            }
        }
    }
}

/// Concrete occurrence of an action template within a level instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningActionInstance {
    pub code: String,
    pub kind: ActionKind,
    pub mode: ActionMode,
    pub status: InstanceStatus,
    pub execution_date: Option<NaiveDate>,
}

/// Concrete scheduled occurrence of a policy level within a plan. Owned by
/// value inside the plan aggregate; `level_code` is a lookup back-link only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningLevelInstance {
    pub sequence: u32,
    pub level_code: String,
    pub days_overdue: i64,
    pub is_reminder: bool,
    pub status: InstanceStatus,
    pub execution_date: Option<NaiveDate>,
    pub actions: Vec<DunningActionInstance>,
}

/// Aggregate root tracking a dunning policy applied to one invoice group or
/// one customer account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DunningCollectionPlan {
    pub id: PlanId,
    /// Human-readable plan number, `"C" + id`.
    pub number: String,
    pub policy_code: String,
    pub scope: PlanScope,
    pub status: PlanStatus,
    pub balance: Decimal,
    pub currency: String,
    pub start_date: NaiveDate,
    pub close_date: Option<NaiveDate>,
    pub days_open: i64,
    pub current_level_sequence: u32,
    pub total_levels: u32,
    pub pause_reason: Option<String>,
    pub paused_until: Option<NaiveDate>,
    /// Cumulative days of pause applied to the schedule so far.
    pub pause_duration_days: i64,
    pub retry_payment_on_resume: bool,
    pub stop_reason: Option<String>,
    pub last_action: Option<String>,
    pub last_action_date: Option<NaiveDate>,
    pub next_action: Option<String>,
    pub next_action_date: Option<NaiveDate>,
    /// Back-reference to the plan this one replaced on a policy switch.
    pub initial_plan: Option<PlanId>,
    pub levels: Vec<DunningLevelInstance>,
}

impl DunningCollectionPlan {
    pub fn level_instance(&self, sequence: u32) -> Option<&DunningLevelInstance> {
        self.levels
            .iter()
            .find(|instance| instance.sequence == sequence)
    }

    pub fn level_instance_mut(&mut self, sequence: u32) -> Option<&mut DunningLevelInstance> {
        self.levels
            .iter_mut()
            .find(|instance| instance.sequence == sequence)
    }

    /// Last instance on the schedule (instances are appended in ascending
    /// sequence order).
    pub fn last_level_instance(&self) -> Option<&DunningLevelInstance> {
        self.levels.last()
    }

    pub fn has_instance_for(&self, level_code: &str) -> bool {
        self.levels
            .iter()
            .any(|instance| instance.level_code == level_code)
    }
}

/// Named set of OCC template codes with an optional per-operation boolean
/// filter expression; at most one definition is marked default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerBalance {
    pub code: String,
    pub occ_template_codes: Vec<String>,
    pub filter_expression: Option<String>,
    pub is_default: bool,
}
