use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identifier wrapper for invoices held by the billing collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvoiceId(pub u64);

/// Payment state reported by the billing collaborator. External payment
/// processing may update this concurrently; the engine treats it as advisory
/// state to re-check, never as a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    PartiallyPaid,
    Pending,
    Paid,
    Refunded,
    Disputed,
}

impl PaymentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::PartiallyPaid => "partially_paid",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Disputed => "disputed",
        }
    }

    /// Statuses that keep an invoice inside the dunning funnel.
    pub const fn eligible_for_dunning(self) -> bool {
        matches!(
            self,
            PaymentStatus::Unpaid | PaymentStatus::PartiallyPaid | PaymentStatus::Pending
        )
    }
}

/// Matching state of an account operation against payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchingStatus {
    Open,
    PartiallyMatched,
    Matched,
}

/// Accounting direction of an account operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationSign {
    Debit,
    Credit,
}

/// Invoice snapshot as exposed by the billing collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub number: String,
    pub billing_account: String,
    pub customer_account: String,
    pub currency: String,
    pub due_date: NaiveDate,
    pub amount_with_tax: Decimal,
    /// Open amount recorded on the invoice at the last matching run.
    pub unmatched_amount: Decimal,
    pub net_to_pay: Decimal,
    pub payment_status: PaymentStatus,
    pub collection_plan_triggered: bool,
    /// Ledger entry recording this invoice on the customer account, while
    /// still unmatched.
    pub account_operation_id: Option<u64>,
}

impl Invoice {
    /// Whole days elapsed since the due date; negative before it.
    pub fn days_since_due(&self, today: NaiveDate) -> i64 {
        (today - self.due_date).num_days()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethodKind {
    Card,
    SepaDirectDebit,
    WireTransfer,
}

impl PaymentMethodKind {
    pub const fn label(self) -> &'static str {
        match self {
            PaymentMethodKind::Card => "card",
            PaymentMethodKind::SepaDirectDebit => "sepa_direct_debit",
            PaymentMethodKind::WireTransfer => "wire_transfer",
        }
    }
}

/// Tokenized payment instrument attached to a customer account. The token is
/// opaque here; the gateway collaborator owns its meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub alias: String,
    pub kind: PaymentMethodKind,
    pub preferred: bool,
}

/// Customer account snapshot used by rule evaluation and payment launching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerAccount {
    pub code: String,
    pub name: String,
    pub customer_category: String,
    /// Unset for accounts that were never credit-scored.
    pub credit_category: Option<String>,
    pub is_company: bool,
    pub trading_currency: String,
    pub contact_email: Option<String>,
    pub payment_methods: Vec<PaymentMethod>,
}

impl CustomerAccount {
    pub fn preferred_payment_method(&self) -> Option<&PaymentMethod> {
        self.payment_methods.iter().find(|method| method.preferred)
    }
}

/// Billing account snapshot; invoices hang off billing accounts, which in
/// turn belong to a customer account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingAccount {
    pub code: String,
    pub customer_account: String,
    pub contact_email: Option<String>,
}

/// A single ledger entry on a customer account (invoice debit, payment
/// credit, or a manual OCC entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountOperation {
    pub id: u64,
    pub customer_account: String,
    pub occ_template_code: String,
    pub sign: OperationSign,
    pub amount: Decimal,
    pub un_matching_amount: Decimal,
    pub matching_status: MatchingStatus,
    pub transaction_date: NaiveDate,
    pub due_date: NaiveDate,
    pub currency: String,
}
