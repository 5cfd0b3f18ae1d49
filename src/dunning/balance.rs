//! Due/credit balance computation over customer-account operations, plus
//! application of named customer-balance filters.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::config::BalanceConfig;

use super::billing::{AccountOperation, MatchingStatus, OperationSign};
use super::domain::CustomerBalance;
use super::repository::{
    AccountOperationRepository, ExpressionEvaluationError, ExpressionEvaluator, ExpressionScope,
    ExpressionValue, RepositoryError,
};

/// Variable a filter expression uses to reference the evaluation date. The
/// date is only injected into the scope when the expression mentions it.
pub const CURRENT_DATE_VARIABLE: &str = "currentDate";

/// Matching statuses contributing to an open (due) balance.
pub const OPEN_MATCHING_STATUSES: [MatchingStatus; 2] =
    [MatchingStatus::Open, MatchingStatus::PartiallyMatched];

#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Expression(#[from] ExpressionEvaluationError),
    #[error("customer balance '{code}' defines neither occ template codes nor a filter expression")]
    EmptyDefinition { code: String },
    #[error("more than one customer balance is marked default")]
    DuplicateDefault,
}

/// A customer balance set is valid when every definition carries either OCC
/// template codes or a filter expression, and at most one is the default.
pub fn validate_customer_balances(balances: &[CustomerBalance]) -> Result<(), BalanceError> {
    for balance in balances {
        if balance.occ_template_codes.is_empty() && balance.filter_expression.is_none() {
            return Err(BalanceError::EmptyDefinition {
                code: balance.code.clone(),
            });
        }
    }
    if balances.iter().filter(|balance| balance.is_default).count() > 1 {
        return Err(BalanceError::DuplicateDefault);
    }
    Ok(())
}

/// Computes customer-account balances from account operations, normalizing
/// signs (debit positive, credit negative) and applying the configured
/// global multiplier.
pub struct BalanceCalculator {
    config: BalanceConfig,
}

impl BalanceCalculator {
    pub fn new(config: BalanceConfig) -> Self {
        Self { config }
    }

    /// Sum of unmatched amounts over the account's operations with a
    /// matching status in `statuses`, cut off at `to_date` (inclusive, day
    /// granularity) on the due date or the transaction date.
    pub fn balance(
        &self,
        operations: &dyn AccountOperationRepository,
        customer_account: &str,
        to_date: Option<NaiveDate>,
        use_due_date: bool,
        statuses: &[MatchingStatus],
    ) -> Result<Decimal, BalanceError> {
        let entries = operations.list_by_customer_account(customer_account, None, &[], &[])?;
        let total = entries
            .iter()
            .filter(|operation| statuses.contains(&operation.matching_status))
            .filter(|operation| match to_date {
                Some(cutoff) => cutoff_date(operation, use_due_date) <= cutoff,
                None => true,
            })
            .map(signed_amount)
            .sum::<Decimal>();
        Ok(total * self.config.sign_multiplier)
    }

    /// Open balance the customer owes as of `to_date`.
    pub fn due_balance(
        &self,
        operations: &dyn AccountOperationRepository,
        customer_account: &str,
        to_date: Option<NaiveDate>,
    ) -> Result<Decimal, BalanceError> {
        self.balance(
            operations,
            customer_account,
            to_date,
            self.config.use_due_date,
            &OPEN_MATCHING_STATUSES,
        )
    }

    /// Negated credit-only balance: what the customer holds against the
    /// account (payments, refunds) as a positive figure.
    pub fn credit_balance(
        &self,
        operations: &dyn AccountOperationRepository,
        customer_account: &str,
        to_date: Option<NaiveDate>,
    ) -> Result<Decimal, BalanceError> {
        let entries = operations.list_by_customer_account(customer_account, None, &[], &[])?;
        let total = entries
            .iter()
            .filter(|operation| operation.sign == OperationSign::Credit)
            .filter(|operation| OPEN_MATCHING_STATUSES.contains(&operation.matching_status))
            .filter(|operation| match to_date {
                Some(cutoff) => cutoff_date(operation, self.config.use_due_date) <= cutoff,
                None => true,
            })
            .map(signed_amount)
            .sum::<Decimal>();
        Ok(-(total * self.config.sign_multiplier))
    }

    /// Keep the operations selected by a customer-balance definition. With a
    /// filter expression, every operation is evaluated through the
    /// collaborator and a single malformed evaluation aborts the whole
    /// filter; without one, the OCC template whitelist applies.
    pub fn filter_by_customer_balance(
        &self,
        evaluator: &dyn ExpressionEvaluator,
        operations: Vec<AccountOperation>,
        balance: &CustomerBalance,
        today: NaiveDate,
    ) -> Result<Vec<AccountOperation>, BalanceError> {
        if balance.occ_template_codes.is_empty() && balance.filter_expression.is_none() {
            return Err(BalanceError::EmptyDefinition {
                code: balance.code.clone(),
            });
        }

        match &balance.filter_expression {
            Some(expression) => {
                let wants_date = expression.contains(CURRENT_DATE_VARIABLE);
                let mut kept = Vec::new();
                for operation in operations {
                    let mut scope = operation_scope(&operation);
                    if wants_date {
                        scope.insert(
                            CURRENT_DATE_VARIABLE.to_string(),
                            ExpressionValue::Date(today),
                        );
                    }
                    if evaluator.evaluate(expression, &scope)? {
                        kept.push(operation);
                    }
                }
                Ok(kept)
            }
            None => Ok(operations
                .into_iter()
                .filter(|operation| {
                    balance
                        .occ_template_codes
                        .contains(&operation.occ_template_code)
                })
                .collect()),
        }
    }
}

fn cutoff_date(operation: &AccountOperation, use_due_date: bool) -> NaiveDate {
    if use_due_date {
        operation.due_date
    } else {
        operation.transaction_date
    }
}

fn signed_amount(operation: &AccountOperation) -> Decimal {
    match operation.sign {
        OperationSign::Debit => operation.un_matching_amount,
        OperationSign::Credit => -operation.un_matching_amount,
    }
}

fn operation_scope(operation: &AccountOperation) -> ExpressionScope {
    let mut scope = ExpressionScope::new();
    scope.insert(
        "amount".to_string(),
        ExpressionValue::Decimal(operation.amount),
    );
    scope.insert(
        "unMatchingAmount".to_string(),
        ExpressionValue::Decimal(operation.un_matching_amount),
    );
    scope.insert(
        "occTemplateCode".to_string(),
        ExpressionValue::Text(operation.occ_template_code.clone()),
    );
    scope.insert(
        "isDebit".to_string(),
        ExpressionValue::Boolean(operation.sign == OperationSign::Debit),
    );
    scope.insert(
        "transactionDate".to_string(),
        ExpressionValue::Date(operation.transaction_date),
    );
    scope.insert(
        "dueDate".to_string(),
        ExpressionValue::Date(operation.due_date),
    );
    scope
}
