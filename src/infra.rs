use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tracing::info;

use dunning_engine::dunning::{
    AccountOperation, AccountOperationRepository, CustomerAccount, CustomerAccountRepository,
    DunningLevelInstance, EligibilityFilter, Invoice, InvoiceId, InvoiceRepository,
    LevelInstanceLedger, NotificationError, NotificationSender, OutboundNotification,
    PaymentError, PaymentGateway, PaymentGatewayRegistry, PaymentMethod, PaymentMethodKind,
    PaymentResult, PlanId, RepositoryError, TriggerScope,
};

/// In-memory stand-in for the billing collaborators, backing the CLI runs.
#[derive(Default)]
pub(crate) struct InMemoryBillingStore {
    invoices: Mutex<BTreeMap<InvoiceId, Invoice>>,
    customers: Mutex<BTreeMap<String, CustomerAccount>>,
    operations: Mutex<Vec<AccountOperation>>,
}

impl InMemoryBillingStore {
    pub(crate) fn seed(
        invoices: Vec<Invoice>,
        customers: Vec<CustomerAccount>,
        operations: Vec<AccountOperation>,
    ) -> Arc<Self> {
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
        *store.operations.lock().expect("operation mutex poisoned") = operations;
        Arc::new(store)
    }
}

impl InvoiceRepository for InMemoryBillingStore {
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

impl CustomerAccountRepository for InMemoryBillingStore {
    fn fetch(&self, code: &str) -> Result<Option<CustomerAccount>, RepositoryError> {
        Ok(self
            .customers
            .lock()
            .expect("customer mutex poisoned")
            .get(code)
            .cloned())
    }
}

impl AccountOperationRepository for InMemoryBillingStore {
    fn list_by_customer_account(
        &self,
        customer_account: &str,
        currency: Option<&str>,
        occ_template_codes: &[String],
        exclude_ids: &[u64],
    ) -> Result<Vec<AccountOperation>, RepositoryError> {
        Ok(self
            .operations
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

/// In-memory trigger ledger shared by the factory and the engine.
#[derive(Default)]
pub(crate) struct InMemoryTriggerLedger {
    entries: Mutex<HashMap<(TriggerScope, String), DunningLevelInstance>>,
}

impl LevelInstanceLedger for InMemoryTriggerLedger {
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

/// Notification hook logging instead of delivering.
pub(crate) struct LoggingNotifier;

impl NotificationSender for LoggingNotifier {
    fn send(&self, notification: OutboundNotification) -> Result<(), NotificationError> {
        info!(
            to = %notification.to,
            subject = %notification.subject,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Gateway accepting every payment with a synthetic reference.
#[derive(Default)]
pub(crate) struct AcceptingGateway {
    sequence: Mutex<u64>,
}

impl PaymentGateway for AcceptingGateway {
    fn pay(
        &self,
        method: &PaymentMethod,
        amount_minor_units: i64,
        _account_operation_ids: &[u64],
    ) -> Result<PaymentResult, PaymentError> {
        let mut sequence = self.sequence.lock().expect("gateway mutex poisoned");
        *sequence += 1;
        info!(
            method = %method.alias,
            amount_minor_units,
            "payment forwarded to gateway"
        );
        Ok(PaymentResult {
            reference: format!("demo-{:04}", *sequence),
            accepted: true,
        })
    }
}

pub(crate) struct SingleGatewayRegistry {
    pub(crate) gateway: Arc<AcceptingGateway>,
}

impl PaymentGatewayRegistry for SingleGatewayRegistry {
    fn resolve(
        &self,
        _customer_account: &str,
        _kind: PaymentMethodKind,
    ) -> Option<Arc<dyn PaymentGateway>> {
        Some(self.gateway.clone())
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
