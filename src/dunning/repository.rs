//! Contracts for the external collaborators the engine talks to. Concrete
//! protocols (persistence, wire-level payments, mail transport) live behind
//! these traits so the engine can be exercised in isolation.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::billing::{AccountOperation, CustomerAccount, Invoice, InvoiceId, PaymentMethod, PaymentMethodKind};
use super::domain::{DunningLevelInstance, PlanId, TriggerScope};
use super::rules::EligibilityFilter;

/// Error enumeration for storage collaborator failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Storage abstraction over invoices.
pub trait InvoiceRepository: Send + Sync {
    /// Invoices matching the compiled eligibility filter (base predicate plus
    /// the policy's rule tree).
    fn find_eligible(&self, filter: &EligibilityFilter) -> Result<Vec<Invoice>, RepositoryError>;
    /// Latest persisted state of one invoice; collaborators may have written
    /// it since the batch pass started.
    fn refresh(&self, id: InvoiceId) -> Result<Invoice, RepositoryError>;
    fn mark_collection_plan_triggered(
        &self,
        id: InvoiceId,
        plan: PlanId,
    ) -> Result<(), RepositoryError>;
}

/// Storage abstraction over customer accounts.
pub trait CustomerAccountRepository: Send + Sync {
    fn fetch(&self, code: &str) -> Result<Option<CustomerAccount>, RepositoryError>;
}

/// Storage abstraction over account operations.
pub trait AccountOperationRepository: Send + Sync {
    fn list_by_customer_account(
        &self,
        customer_account: &str,
        currency: Option<&str>,
        occ_template_codes: &[String],
        exclude_ids: &[u64],
    ) -> Result<Vec<AccountOperation>, RepositoryError>;
}

/// Record of level instances already triggered per dunned entity, keeping
/// `LevelInstanceFactory::instantiate` idempotent across batch passes.
pub trait LevelInstanceLedger: Send + Sync {
    fn find(
        &self,
        scope: &TriggerScope,
        level_code: &str,
    ) -> Result<Option<DunningLevelInstance>, RepositoryError>;
    fn record(
        &self,
        scope: &TriggerScope,
        instance: &DunningLevelInstance,
    ) -> Result<(), RepositoryError>;
}

/// Correlation outcome reported by the payment collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub reference: String,
    pub accepted: bool,
}

/// Payment collaborator failure.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment declined (reference {reference})")]
    Declined { reference: String },
    #[error("payment transport unavailable: {0}")]
    Transport(String),
}

/// External protocol client executing a payment against a tokenized method.
/// Card/SEPA payload construction happens entirely behind this trait.
pub trait PaymentGateway: Send + Sync {
    fn pay(
        &self,
        method: &PaymentMethod,
        amount_minor_units: i64,
        account_operation_ids: &[u64],
    ) -> Result<PaymentResult, PaymentError>;
}

/// Resolves the gateway serving a (customer account, method kind) pair.
pub trait PaymentGatewayRegistry: Send + Sync {
    fn resolve(
        &self,
        customer_account: &str,
        kind: PaymentMethodKind,
    ) -> Option<Arc<dyn PaymentGateway>>;
}

/// Outbound message payload handed to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundNotification {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub attachments: Vec<String>,
}

/// Notification dispatch error.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Trait describing outbound notification hooks (reminder mails, escalation
/// notices).
pub trait NotificationSender: Send + Sync {
    fn send(&self, notification: OutboundNotification) -> Result<(), NotificationError>;
}

/// Value representation for expression variables so evaluators can consume
/// structured data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpressionValue {
    Decimal(Decimal),
    Date(NaiveDate),
    Text(String),
    Boolean(bool),
}

/// Variables visible to a balance filter expression.
pub type ExpressionScope = BTreeMap<String, ExpressionValue>;

/// Raised when a balance filter expression cannot be evaluated; the caller
/// must fail closed and apply no filter at all.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionEvaluationError {
    #[error("malformed filter expression '{expression}': {detail}")]
    Malformed { expression: String, detail: String },
    #[error("filter expression references unknown variable '{name}'")]
    UnknownVariable { name: String },
}

/// Boolean expression evaluator collaborator used by the balance calculator.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        expression: &str,
        scope: &ExpressionScope,
    ) -> Result<bool, ExpressionEvaluationError>;
}
