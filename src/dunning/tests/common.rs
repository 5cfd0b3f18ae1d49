use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::BalanceConfig;
use crate::dunning::balance::BalanceCalculator;
use crate::dunning::billing::{
    AccountOperation, CustomerAccount, Invoice, InvoiceId, MatchingStatus, OperationSign,
    PaymentMethod, PaymentMethodKind, PaymentStatus,
};
use crate::dunning::domain::{
    ActionKind, ActionMode, DunningAction, DunningLevel, DunningLevelInstance, DunningPolicy,
    DunningPolicyLevel, DunningPolicyRule, DunningPolicyRuleLine, PlanId, PolicyMode,
    RuleOperator, TargetField, TriggerScope,
};
use crate::dunning::factory::LevelInstanceFactory;
use crate::dunning::lifecycle::CollectionPlanLifecycle;
use crate::dunning::repository::{
    AccountOperationRepository, CustomerAccountRepository, ExpressionEvaluationError,
    ExpressionEvaluator, ExpressionScope, ExpressionValue, InvoiceRepository,
    LevelInstanceLedger, NotificationError, NotificationSender, OutboundNotification,
    PaymentError, PaymentGateway, PaymentGatewayRegistry, PaymentResult, RepositoryError,
};
use crate::dunning::rules::EligibilityFilter;

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn email_action(code: &str) -> DunningAction {
    DunningAction {
        code: code.to_string(),
        kind: ActionKind::SendEmail,
        mode: ActionMode::Automatic,
        assignee: None,
    }
}

pub(super) fn manual_action(code: &str, kind: ActionKind) -> DunningAction {
    DunningAction {
        code: code.to_string(),
        kind,
        mode: ActionMode::Manual,
        assignee: Some("collections-agent".to_string()),
    }
}

pub(super) fn level(
    code: &str,
    days_overdue: i64,
    is_reminder: bool,
    actions: Vec<DunningAction>,
) -> DunningLevel {
    DunningLevel {
        code: code.to_string(),
        days_overdue,
        is_reminder,
        actions,
    }
}

pub(super) fn policy_level(sequence: u32, level: DunningLevel) -> DunningPolicyLevel {
    DunningPolicyLevel { sequence, level }
}

pub(super) fn rule_line(
    field: TargetField,
    operator: RuleOperator,
    value: &str,
    line_joint: Option<&str>,
) -> DunningPolicyRuleLine {
    DunningPolicyRuleLine {
        field,
        operator,
        value: value.to_string(),
        line_joint: line_joint.map(str::to_string),
    }
}

pub(super) fn single_line_rule(
    id: u64,
    field: TargetField,
    operator: RuleOperator,
    value: &str,
) -> DunningPolicyRule {
    DunningPolicyRule {
        id,
        rule_joint: Some("AND".to_string()),
        lines: vec![rule_line(field, operator, value, None)],
    }
}

/// Three-step escalation: immediate notice, day-10 follow-up, day-30
/// payment retry.
pub(super) fn standard_policy() -> DunningPolicy {
    DunningPolicy {
        code: "POL-STD".to_string(),
        name: "Standard escalation".to_string(),
        mode: PolicyMode::InvoiceLevel,
        active: true,
        min_balance_trigger: dec!(50),
        min_balance_currency: None,
        levels: vec![
            policy_level(0, level("L0-NOTICE", 0, false, vec![email_action("A-NOTICE")])),
            policy_level(
                1,
                level(
                    "L1-FOLLOWUP",
                    10,
                    false,
                    vec![
                        email_action("A-FOLLOWUP"),
                        manual_action("A-CALL", ActionKind::PhoneCall),
                    ],
                ),
            ),
            policy_level(
                2,
                level(
                    "L2-RETRY",
                    30,
                    false,
                    vec![
                        DunningAction {
                            code: "A-RETRY".to_string(),
                            kind: ActionKind::RetryPayment,
                            mode: ActionMode::Automatic,
                            assignee: None,
                        },
                        manual_action("A-LETTER", ActionKind::SendLetter),
                    ],
                ),
            ),
        ],
        rules: vec![single_line_rule(
            1,
            TargetField::CustomerCategory,
            RuleOperator::Equals,
            "BUSINESS",
        )],
    }
}

/// Reminder two days after the due date, escalation from day 10.
pub(super) fn reminder_policy() -> DunningPolicy {
    let mut policy = standard_policy();
    policy.code = "POL-REMIND".to_string();
    policy.levels = vec![
        policy_level(0, level("L0-REMIND", 2, true, vec![email_action("A-REMIND")])),
        policy_level(1, level("L1-NOTICE", 10, false, vec![email_action("A-NOTICE")])),
        policy_level(
            2,
            level("L2-FOLLOWUP", 20, false, vec![email_action("A-FOLLOWUP")]),
        ),
    ];
    policy
}

pub(super) fn customer(code: &str) -> CustomerAccount {
    CustomerAccount {
        code: code.to_string(),
        name: format!("{code} Ltd"),
        customer_category: "BUSINESS".to_string(),
        credit_category: Some("STANDARD".to_string()),
        is_company: true,
        trading_currency: "EUR".to_string(),
        contact_email: Some(format!("billing@{}.example", code.to_lowercase())),
        payment_methods: vec![PaymentMethod {
            alias: format!("{code}-card"),
            kind: PaymentMethodKind::Card,
            preferred: true,
        }],
    }
}

pub(super) fn invoice(
    id: u64,
    customer_account: &str,
    due_date: NaiveDate,
    unmatched: Decimal,
) -> Invoice {
    Invoice {
        id: InvoiceId(id),
        number: format!("INV-{id:04}"),
        billing_account: format!("{customer_account}-BA"),
        customer_account: customer_account.to_string(),
        currency: "EUR".to_string(),
        due_date,
        amount_with_tax: unmatched,
        unmatched_amount: unmatched,
        net_to_pay: unmatched,
        payment_status: PaymentStatus::Unpaid,
        collection_plan_triggered: false,
        account_operation_id: Some(9000 + id),
    }
}

pub(super) fn debit_operation(
    id: u64,
    customer_account: &str,
    amount: Decimal,
    due_date: NaiveDate,
) -> AccountOperation {
    AccountOperation {
        id,
        customer_account: customer_account.to_string(),
        occ_template_code: "INV_STD".to_string(),
        sign: OperationSign::Debit,
        amount,
        un_matching_amount: amount,
        matching_status: MatchingStatus::Open,
        transaction_date: due_date,
        due_date,
        currency: "EUR".to_string(),
    }
}

pub(super) fn credit_operation(
    id: u64,
    customer_account: &str,
    amount: Decimal,
    due_date: NaiveDate,
) -> AccountOperation {
    AccountOperation {
        sign: OperationSign::Credit,
        occ_template_code: "PAY_STD".to_string(),
        ..debit_operation(id, customer_account, amount, due_date)
    }
}

/// In-memory invoice and customer store backing the collaborator traits.
#[derive(Default)]
pub(super) struct MemoryBilling {
    pub invoices: Mutex<BTreeMap<InvoiceId, Invoice>>,
    pub customers: Mutex<BTreeMap<String, CustomerAccount>>,
}

impl MemoryBilling {
    pub fn with(invoices: Vec<Invoice>, customers: Vec<CustomerAccount>) -> Arc<Self> {
        let store = Self::default();
        {
            let mut guard = store.invoices.lock().expect("invoice mutex poisoned");
            for invoice in invoices {
                guard.insert(invoice.id, invoice);
            }
        }
        {
            let mut guard = store.customers.lock().expect("customer mutex poisoned");
            for customer in customers {
                guard.insert(customer.code.clone(), customer);
            }
        }
        Arc::new(store)
    }
}

impl InvoiceRepository for MemoryBilling {
    fn find_eligible(&self, filter: &EligibilityFilter) -> Result<Vec<Invoice>, RepositoryError> {
        let customers = self.customers.lock().expect("customer mutex poisoned");
        let invoices = self.invoices.lock().expect("invoice mutex poisoned");
        Ok(invoices
            .values()
            .filter(|invoice| {
                customers
                    .get(&invoice.customer_account)
                    .map(|customer| filter.matches(invoice, customer))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    fn refresh(&self, id: InvoiceId) -> Result<Invoice, RepositoryError> {
        self.invoices
            .lock()
            .expect("invoice mutex poisoned")
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    fn mark_collection_plan_triggered(
        &self,
        id: InvoiceId,
        _plan: PlanId,
    ) -> Result<(), RepositoryError> {
        let mut invoices = self.invoices.lock().expect("invoice mutex poisoned");
        let invoice = invoices.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        invoice.collection_plan_triggered = true;
        Ok(())
    }
}

impl CustomerAccountRepository for MemoryBilling {
    fn fetch(&self, code: &str) -> Result<Option<CustomerAccount>, RepositoryError> {
        Ok(self
            .customers
            .lock()
            .expect("customer mutex poisoned")
            .get(code)
            .cloned())
    }
}

/// In-memory account-operation store.
#[derive(Default)]
pub(super) struct MemoryOperations {
    pub entries: Mutex<Vec<AccountOperation>>,
}

impl MemoryOperations {
    pub fn with(entries: Vec<AccountOperation>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(entries),
        })
    }
}

impl AccountOperationRepository for MemoryOperations {
    fn list_by_customer_account(
        &self,
        customer_account: &str,
        currency: Option<&str>,
        occ_template_codes: &[String],
        exclude_ids: &[u64],
    ) -> Result<Vec<AccountOperation>, RepositoryError> {
        Ok(self
            .entries
            .lock()
            .expect("operation mutex poisoned")
            .iter()
            .filter(|operation| operation.customer_account == customer_account)
            .filter(|operation| currency.map_or(true, |wanted| operation.currency == wanted))
            .filter(|operation| {
                occ_template_codes.is_empty()
                    || occ_template_codes.contains(&operation.occ_template_code)
            })
            .filter(|operation| !exclude_ids.contains(&operation.id))
            .cloned()
            .collect())
    }
}

/// In-memory trigger ledger keeping instantiation idempotent.
#[derive(Default)]
pub(super) struct MemoryLedger {
    pub entries: Mutex<HashMap<(TriggerScope, String), DunningLevelInstance>>,
}

impl LevelInstanceLedger for MemoryLedger {
    fn find(
        &self,
        scope: &TriggerScope,
        level_code: &str,
    ) -> Result<Option<DunningLevelInstance>, RepositoryError> {
        Ok(self
            .entries
            .lock()
            .expect("ledger mutex poisoned")
            .get(&(scope.clone(), level_code.to_string()))
            .cloned())
    }

    fn record(
        &self,
        scope: &TriggerScope,
        instance: &DunningLevelInstance,
    ) -> Result<(), RepositoryError> {
        self.entries
            .lock()
            .expect("ledger mutex poisoned")
            .insert(
                (scope.clone(), instance.level_code.clone()),
                instance.clone(),
            );
        Ok(())
    }
}

/// Captures notifications instead of sending them.
#[derive(Default)]
pub(super) struct MemoryNotifier {
    pub sent: Mutex<Vec<OutboundNotification>>,
}

impl MemoryNotifier {
    pub fn messages(&self) -> Vec<OutboundNotification> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }
}

impl NotificationSender for MemoryNotifier {
    fn send(&self, notification: OutboundNotification) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification);
        Ok(())
    }
}

/// Captures gateway calls and accepts every payment.
#[derive(Default)]
pub(super) struct MemoryGateway {
    pub calls: Mutex<Vec<(String, i64, Vec<u64>)>>,
}

impl PaymentGateway for MemoryGateway {
    fn pay(
        &self,
        method: &PaymentMethod,
        amount_minor_units: i64,
        account_operation_ids: &[u64],
    ) -> Result<PaymentResult, PaymentError> {
        self.calls.lock().expect("gateway mutex poisoned").push((
            method.alias.clone(),
            amount_minor_units,
            account_operation_ids.to_vec(),
        ));
        Ok(PaymentResult {
            reference: format!("pay-{:03}", amount_minor_units),
            accepted: true,
        })
    }
}

pub(super) struct MemoryGatewayRegistry {
    pub gateway: Arc<MemoryGateway>,
}

impl PaymentGatewayRegistry for MemoryGatewayRegistry {
    fn resolve(
        &self,
        _customer_account: &str,
        _kind: PaymentMethodKind,
    ) -> Option<Arc<dyn PaymentGateway>> {
        Some(self.gateway.clone())
    }
}

/// Evaluator keeping operations whose `isDebit` variable is true.
pub(super) struct KeepDebitsEvaluator;

impl ExpressionEvaluator for KeepDebitsEvaluator {
    fn evaluate(
        &self,
        _expression: &str,
        scope: &ExpressionScope,
    ) -> Result<bool, ExpressionEvaluationError> {
        match scope.get("isDebit") {
            Some(ExpressionValue::Boolean(value)) => Ok(*value),
            _ => Err(ExpressionEvaluationError::UnknownVariable {
                name: "isDebit".to_string(),
            }),
        }
    }
}

/// Evaluator rejecting every expression as malformed.
pub(super) struct MalformedEvaluator;

impl ExpressionEvaluator for MalformedEvaluator {
    fn evaluate(
        &self,
        expression: &str,
        _scope: &ExpressionScope,
    ) -> Result<bool, ExpressionEvaluationError> {
        Err(ExpressionEvaluationError::Malformed {
            expression: expression.to_string(),
            detail: "unexpected token".to_string(),
        })
    }
}

pub(super) fn factory_with_ledger() -> (LevelInstanceFactory, Arc<MemoryLedger>) {
    let ledger = Arc::new(MemoryLedger::default());
    (LevelInstanceFactory::new(ledger.clone()), ledger)
}

pub(super) fn lifecycle_with_operations(
    operations: Arc<MemoryOperations>,
) -> CollectionPlanLifecycle {
    let (factory, _ledger) = factory_with_ledger();
    CollectionPlanLifecycle::new(
        factory,
        BalanceCalculator::new(BalanceConfig::default()),
        operations,
    )
}

pub(super) fn lifecycle() -> CollectionPlanLifecycle {
    lifecycle_with_operations(MemoryOperations::with(Vec::new()))
}
