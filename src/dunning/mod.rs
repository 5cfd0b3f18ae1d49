//! Dunning collection engine: policy-driven eligibility, plan lifecycle,
//! balance computation, reminder dispatch, and payment hand-off.

pub mod balance;
pub mod billing;
pub mod domain;
pub mod engine;
pub mod factory;
pub mod lifecycle;
pub mod payment;
pub mod repository;
pub mod rules;

#[cfg(test)]
mod tests;

pub use balance::{validate_customer_balances, BalanceCalculator, BalanceError};
pub use billing::{
    AccountOperation, BillingAccount, CustomerAccount, Invoice, InvoiceId, MatchingStatus,
    OperationSign, PaymentMethod, PaymentMethodKind, PaymentStatus,
};
pub use domain::{
    ActionKind, ActionMode, CustomerBalance, DunningAction, DunningActionInstance,
    DunningCollectionPlan, DunningLevel, DunningLevelInstance, DunningPolicy, DunningPolicyLevel,
    DunningPolicyRule, DunningPolicyRuleLine, InstanceStatus, PlanId, PlanScope, PlanStatus,
    PolicyMode, RuleOperator, TargetField, TriggerScope,
};
pub use engine::{DunningPolicyEngine, ScanFailure, ScanReport, SkippedPolicy};
pub use factory::{InstantiationContext, InstantiationOutcome, LevelInstanceFactory};
pub use lifecycle::{
    pending_cascade, CascadeTarget, CollectionPlanLifecycle, LifecycleError, PlanTransitionError,
    POLICY_SWITCH_STOP_REASON,
};
pub use payment::{PaymentLauncher, PaymentLaunchError};
pub use repository::{
    AccountOperationRepository, CustomerAccountRepository, ExpressionEvaluationError,
    ExpressionEvaluator, ExpressionScope, ExpressionValue, InvoiceRepository,
    LevelInstanceLedger, NotificationError, NotificationSender, OutboundNotification,
    PaymentError, PaymentGateway, PaymentGatewayRegistry, PaymentResult, RepositoryError,
};
pub use rules::{
    compile_rules, EligibilityError, EligibilityFilter, PolicyRuleEvaluator,
    PolicyValidationError, RuleExpr,
};

/// Top-level error for engine operations, wrapping the per-module errors.
#[derive(Debug, thiserror::Error)]
pub enum DunningError {
    #[error(transparent)]
    Validation(#[from] PolicyValidationError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Payment(#[from] PaymentLaunchError),
    #[error(transparent)]
    Notification(#[from] NotificationError),
}

impl From<EligibilityError> for DunningError {
    fn from(value: EligibilityError) -> Self {
        match value {
            EligibilityError::Validation(err) => Self::Validation(err),
            EligibilityError::Repository(err) => Self::Repository(err),
        }
    }
}
