//! Compiles a policy's rule tree into a typed predicate and selects the
//! invoices eligible to enter a collection plan.

use rust_decimal::Decimal;
use tracing::debug;

use super::billing::{CustomerAccount, Invoice, PaymentStatus};
use super::domain::{DunningPolicy, DunningPolicyLevel, RuleOperator, TargetField};
use super::repository::{InvoiceRepository, RepositoryError};

/// Payment statuses that keep an invoice inside the dunning funnel.
pub const ELIGIBLE_PAYMENT_STATUSES: [PaymentStatus; 3] = [
    PaymentStatus::Unpaid,
    PaymentStatus::PartiallyPaid,
    PaymentStatus::Pending,
];

/// Validation errors raised while compiling a policy's rule tree.
#[derive(Debug, thiserror::Error)]
pub enum PolicyValidationError {
    #[error("rule joint must be AND or OR, found '{value}'")]
    InvalidRuleJoint { value: String },
    #[error("dunning policy rule {rule_id} has no lines")]
    EmptyRule { rule_id: u64 },
    #[error("value '{value}' cannot be compared against field {field:?}")]
    InvalidRuleValue { field: TargetField, value: String },
    #[error("operator {operator:?} is not applicable to field {field:?}")]
    UnsupportedOperator {
        field: TargetField,
        operator: RuleOperator,
    },
    #[error("dunning policy '{policy}' has no non-reminder level to trigger on")]
    NoTriggerLevel { policy: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Joint {
    And,
    Or,
}

fn parse_joint(raw: Option<&str>) -> Result<Joint, PolicyValidationError> {
    match raw {
        None => Ok(Joint::And),
        Some(value) => match value.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(Joint::And),
            "OR" => Ok(Joint::Or),
            _ => Err(PolicyValidationError::InvalidRuleJoint {
                value: value.to_string(),
            }),
        },
    }
}

/// Rule-line value parsed once at compile time into the type its target
/// field compares with.
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonValue {
    Text(String),
    Boolean(bool),
    Amount(Decimal),
}

/// One compiled field comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub field: TargetField,
    pub operator: RuleOperator,
    pub value: ComparisonValue,
}

/// Compiled rule tree. Evaluation walks the tree per invoice; no string
/// parsing happens after compile.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleExpr {
    Comparison(Comparison),
    And(Box<RuleExpr>, Box<RuleExpr>),
    Or(Box<RuleExpr>, Box<RuleExpr>),
}

/// Invoice plus its owning customer account, the unit rule trees evaluate
/// against.
#[derive(Debug, Clone, Copy)]
pub struct EligibilityTarget<'a> {
    pub invoice: &'a Invoice,
    pub customer: &'a CustomerAccount,
}

impl Comparison {
    fn matches(&self, target: &EligibilityTarget<'_>) -> bool {
        match (&self.field, &self.value) {
            // A null credit category counts as "not equal to X" and never as
            // "equal to X".
            (TargetField::CreditCategory, ComparisonValue::Text(expected)) => {
                let actual = target.customer.credit_category.as_deref();
                match self.operator {
                    RuleOperator::Equals => actual == Some(expected.as_str()),
                    RuleOperator::NotEquals => actual != Some(expected.as_str()),
                    _ => false,
                }
            }
            (TargetField::CustomerCategory, ComparisonValue::Text(expected)) => {
                let actual = target.customer.customer_category.as_str();
                match self.operator {
                    RuleOperator::Equals => actual == expected,
                    RuleOperator::NotEquals => actual != expected,
                    _ => false,
                }
            }
            (TargetField::PaymentMethod, ComparisonValue::Text(expected)) => {
                let actual = target
                    .customer
                    .preferred_payment_method()
                    .map(|method| method.kind.label());
                match self.operator {
                    RuleOperator::Equals => actual == Some(expected.as_str()),
                    RuleOperator::NotEquals => actual != Some(expected.as_str()),
                    _ => false,
                }
            }
            (TargetField::IsCompany, ComparisonValue::Boolean(expected)) => {
                match self.operator {
                    RuleOperator::Equals => target.customer.is_company == *expected,
                    RuleOperator::NotEquals => target.customer.is_company != *expected,
                    _ => false,
                }
            }
            (TargetField::InvoiceAmount, ComparisonValue::Amount(expected)) => {
                let actual = target.invoice.amount_with_tax;
                match self.operator {
                    RuleOperator::Equals => actual == *expected,
                    RuleOperator::NotEquals => actual != *expected,
                    RuleOperator::GreaterThan => actual > *expected,
                    RuleOperator::LessThan => actual < *expected,
                }
            }
            // Compile pairs fields with their value variant; anything else
            // cannot be constructed through compile().
            _ => false,
        }
    }
}

impl RuleExpr {
    pub fn matches(&self, target: &EligibilityTarget<'_>) -> bool {
        match self {
            RuleExpr::Comparison(comparison) => comparison.matches(target),
            RuleExpr::And(left, right) => left.matches(target) && right.matches(target),
            RuleExpr::Or(left, right) => left.matches(target) || right.matches(target),
        }
    }
}

/// Compiled filter handed to `InvoiceRepository::find_eligible`: the base
/// predicate plus the policy's rule tree.
#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    pub expr: RuleExpr,
    pub payment_statuses: Vec<PaymentStatus>,
    pub exclude_plan_triggered: bool,
}

impl EligibilityFilter {
    pub fn matches(&self, invoice: &Invoice, customer: &CustomerAccount) -> bool {
        if !self.payment_statuses.contains(&invoice.payment_status) {
            return false;
        }
        if self.exclude_plan_triggered && invoice.collection_plan_triggered {
            return false;
        }
        self.expr.matches(&EligibilityTarget { invoice, customer })
    }
}

fn compile_value(
    field: TargetField,
    operator: RuleOperator,
    raw: &str,
) -> Result<ComparisonValue, PolicyValidationError> {
    let ordering_allowed = matches!(field, TargetField::InvoiceAmount);
    if !ordering_allowed
        && matches!(operator, RuleOperator::GreaterThan | RuleOperator::LessThan)
    {
        return Err(PolicyValidationError::UnsupportedOperator { field, operator });
    }

    match field {
        TargetField::CreditCategory
        | TargetField::CustomerCategory
        | TargetField::PaymentMethod => Ok(ComparisonValue::Text(raw.to_string())),
        TargetField::IsCompany => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(ComparisonValue::Boolean(true)),
            "false" | "0" => Ok(ComparisonValue::Boolean(false)),
            _ => Err(PolicyValidationError::InvalidRuleValue {
                field,
                value: raw.to_string(),
            }),
        },
        TargetField::InvoiceAmount => raw
            .trim()
            .parse::<Decimal>()
            .map(ComparisonValue::Amount)
            .map_err(|_| PolicyValidationError::InvalidRuleValue {
                field,
                value: raw.to_string(),
            }),
    }
}

fn join(joint: Joint, left: RuleExpr, right: RuleExpr) -> RuleExpr {
    match joint {
        Joint::And => RuleExpr::And(Box::new(left), Box::new(right)),
        Joint::Or => RuleExpr::Or(Box::new(left), Box::new(right)),
    }
}

/// Compile a policy's rules into one predicate tree. Rules are sorted by id
/// first so the tree shape is deterministic. An empty rules collection
/// compiles to `None`: such a policy selects no invoices at all.
pub fn compile_rules(policy: &DunningPolicy) -> Result<Option<RuleExpr>, PolicyValidationError> {
    let mut rules: Vec<_> = policy.rules.iter().collect();
    rules.sort_by_key(|rule| rule.id);

    let mut tree: Option<RuleExpr> = None;
    for rule in rules {
        let mut lines = rule.lines.iter();
        let first = lines
            .next()
            .ok_or(PolicyValidationError::EmptyRule { rule_id: rule.id })?;
        let mut rule_expr = RuleExpr::Comparison(Comparison {
            field: first.field,
            operator: first.operator,
            value: compile_value(first.field, first.operator, &first.value)?,
        });

        for line in lines {
            let joint = parse_joint(line.line_joint.as_deref())?;
            let comparison = RuleExpr::Comparison(Comparison {
                field: line.field,
                operator: line.operator,
                value: compile_value(line.field, line.operator, &line.value)?,
            });
            rule_expr = join(joint, rule_expr, comparison);
        }

        tree = Some(match tree {
            None => rule_expr,
            Some(existing) => {
                let joint = parse_joint(rule.rule_joint.as_deref())?;
                join(joint, existing, rule_expr)
            }
        });
    }

    Ok(tree)
}

/// Selects the invoices a policy may open a collection plan for.
pub struct PolicyRuleEvaluator;

impl PolicyRuleEvaluator {
    /// The escalation level whose days-overdue threshold gates plan
    /// creation (reminder levels fire on their own exact-day schedule).
    pub fn trigger_level<'a>(
        policy: &'a DunningPolicy,
    ) -> Result<&'a DunningPolicyLevel, PolicyValidationError> {
        policy
            .first_non_reminder_level()
            .ok_or_else(|| PolicyValidationError::NoTriggerLevel {
                policy: policy.code.clone(),
            })
    }

    /// Invoices matching the compiled rule tree and the base predicate, with
    /// no date or balance gating applied yet. Reminder dispatch works off
    /// this set, since reminders fire before the plan trigger threshold.
    pub fn find_candidates(
        policy: &DunningPolicy,
        invoices: &dyn InvoiceRepository,
    ) -> Result<Vec<Invoice>, EligibilityError> {
        let expr = match compile_rules(policy)? {
            Some(expr) => expr,
            None => {
                debug!(policy = %policy.code, "policy has no rules, selecting nothing");
                return Ok(Vec::new());
            }
        };

        let filter = EligibilityFilter {
            expr,
            payment_statuses: ELIGIBLE_PAYMENT_STATUSES.to_vec(),
            exclude_plan_triggered: true,
        };

        let candidates = invoices
            .find_eligible(&filter)?
            .into_iter()
            // Concurrent writers may have flipped advisory state since the
            // repository query ran; re-check it here.
            .filter(|invoice| {
                invoice.payment_status.eligible_for_dunning()
                    && !invoice.collection_plan_triggered
            })
            .collect();

        Ok(candidates)
    }

    /// Selection-time checks applied on top of the rule filter: overdue
    /// beyond the trigger level, minimum balance against the invoice's
    /// recorded unmatched amount, and the optional trigger currency.
    pub fn filter_eligible(
        policy: &DunningPolicy,
        candidates: Vec<Invoice>,
        today: chrono::NaiveDate,
    ) -> Result<Vec<Invoice>, PolicyValidationError> {
        let trigger_level = Self::trigger_level(policy)?;

        Ok(candidates
            .into_iter()
            .filter(|invoice| {
                trigger_level.level.days_overdue <= invoice.days_since_due(today)
            })
            .filter(|invoice| invoice.unmatched_amount >= policy.min_balance_trigger)
            .filter(|invoice| match &policy.min_balance_currency {
                Some(currency) => invoice.currency == *currency,
                None => true,
            })
            .collect())
    }

    /// Invoices a policy may open a collection plan for.
    pub fn find_eligible(
        policy: &DunningPolicy,
        invoices: &dyn InvoiceRepository,
        today: chrono::NaiveDate,
    ) -> Result<Vec<Invoice>, EligibilityError> {
        let candidates = Self::find_candidates(policy, invoices)?;
        Ok(Self::filter_eligible(policy, candidates, today)?)
    }
}

/// Error raised while selecting eligible invoices.
#[derive(Debug, thiserror::Error)]
pub enum EligibilityError {
    #[error(transparent)]
    Validation(#[from] PolicyValidationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
