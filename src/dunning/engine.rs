//! Batch orchestration: scans active policies, dispatches exact-day
//! reminders, and opens collection plans for eligible invoices or customer
//! accounts. A failure on one item never aborts its siblings.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::billing::Invoice;
use super::domain::{
    ActionKind, ActionMode, DunningCollectionPlan, DunningLevelInstance, DunningPolicy,
    InstanceStatus, PolicyMode, TriggerScope,
};
use super::factory::LevelInstanceFactory;
use super::lifecycle::CollectionPlanLifecycle;
use super::payment::PaymentLauncher;
use super::repository::{
    CustomerAccountRepository, InvoiceRepository, NotificationSender, OutboundNotification,
    PaymentResult, RepositoryError,
};
use super::rules::PolicyRuleEvaluator;
use super::DunningError;

/// A policy the batch pass could not process at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPolicy {
    pub policy: String,
    pub reason: String,
}

/// An individual plan creation or dispatch that failed inside the pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanFailure {
    pub subject: String,
    pub reason: String,
}

/// Outcome of one batch pass over the active policies.
#[derive(Debug, Default, Serialize)]
pub struct ScanReport {
    pub policies_scanned: usize,
    pub reminders_sent: usize,
    pub plans: Vec<DunningCollectionPlan>,
    pub skipped_policies: Vec<SkippedPolicy>,
    pub failures: Vec<ScanFailure>,
}

/// Orchestrates eligibility scanning and plan creation across policies.
pub struct DunningPolicyEngine {
    invoices: Arc<dyn InvoiceRepository>,
    customers: Arc<dyn CustomerAccountRepository>,
    notifier: Arc<dyn NotificationSender>,
    factory: LevelInstanceFactory,
    lifecycle: CollectionPlanLifecycle,
    payments: PaymentLauncher,
    notification_from: String,
}

impl DunningPolicyEngine {
    pub fn new(
        invoices: Arc<dyn InvoiceRepository>,
        customers: Arc<dyn CustomerAccountRepository>,
        notifier: Arc<dyn NotificationSender>,
        factory: LevelInstanceFactory,
        lifecycle: CollectionPlanLifecycle,
        payments: PaymentLauncher,
        notification_from: String,
    ) -> Self {
        Self {
            invoices,
            customers,
            notifier,
            factory,
            lifecycle,
            payments,
            notification_from,
        }
    }

    /// One batch pass: for every active policy, send due reminders and open
    /// plans for whatever became eligible since the last pass.
    pub fn scan(&self, policies: &[DunningPolicy], today: NaiveDate) -> ScanReport {
        let mut report = ScanReport::default();

        for policy in policies.iter().filter(|policy| policy.active) {
            report.policies_scanned += 1;

            let candidates =
                match PolicyRuleEvaluator::find_candidates(policy, self.invoices.as_ref()) {
                    Ok(candidates) => candidates,
                    Err(err) => {
                        warn!(policy = %policy.code, %err, "skipping unprocessable policy");
                        report.skipped_policies.push(SkippedPolicy {
                            policy: policy.code.clone(),
                            reason: err.to_string(),
                        });
                        continue;
                    }
                };

            self.dispatch_reminders(policy, &candidates, today, &mut report);

            let eligible = match PolicyRuleEvaluator::filter_eligible(policy, candidates, today) {
                Ok(eligible) => eligible,
                Err(err) => {
                    // Typically a policy without a non-reminder level: no
                    // trigger threshold can be resolved for it.
                    warn!(policy = %policy.code, %err, "skipping unprocessable policy");
                    report.skipped_policies.push(SkippedPolicy {
                        policy: policy.code.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            match policy.mode {
                PolicyMode::InvoiceLevel => {
                    for invoice in eligible {
                        match self.open_invoice_plan(policy, &invoice, today) {
                            Ok(Some(plan)) => report.plans.push(plan),
                            Ok(None) => {}
                            Err(err) => {
                                error!(invoice = %invoice.number, %err, "plan creation failed");
                                report.failures.push(ScanFailure {
                                    subject: invoice.number.clone(),
                                    reason: err.to_string(),
                                });
                            }
                        }
                    }
                }
                PolicyMode::CustomerLevel => {
                    let mut groups: BTreeMap<String, Vec<Invoice>> = BTreeMap::new();
                    for invoice in eligible {
                        groups
                            .entry(invoice.customer_account.clone())
                            .or_default()
                            .push(invoice);
                    }
                    for (customer_code, group) in groups {
                        match self.open_customer_plan(policy, &customer_code, &group, today) {
                            Ok(Some(plan)) => report.plans.push(plan),
                            Ok(None) => {}
                            Err(err) => {
                                error!(customer = %customer_code, %err, "plan creation failed");
                                report.failures.push(ScanFailure {
                                    subject: customer_code,
                                    reason: err.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }

        info!(
            policies = report.policies_scanned,
            plans = report.plans.len(),
            reminders = report.reminders_sent,
            failures = report.failures.len(),
            "dunning scan finished"
        );
        report
    }

    /// Resume one plan in isolation. A payment retry requested at pause time
    /// runs after the state change; its failure is logged and does not undo
    /// the resume.
    pub fn resume_collection_plan(
        &self,
        plan: &mut DunningCollectionPlan,
        validate: bool,
        today: NaiveDate,
    ) -> Result<Option<PaymentResult>, DunningError> {
        let retry_payment = self.lifecycle.resume(plan, validate, today)?;
        if !retry_payment {
            return Ok(None);
        }
        match self.payments.launch(plan) {
            Ok(result) => Ok(Some(result)),
            Err(err) => {
                error!(plan = %plan.number, %err, "payment retry on resume failed");
                Ok(None)
            }
        }
    }

    fn open_invoice_plan(
        &self,
        policy: &DunningPolicy,
        invoice: &Invoice,
        today: NaiveDate,
    ) -> Result<Option<DunningCollectionPlan>, DunningError> {
        // Re-read before mutating: payment processing may have settled the
        // invoice or another pass may have triggered it meanwhile.
        let invoice = self.invoices.refresh(invoice.id)?;
        if invoice.collection_plan_triggered || !invoice.payment_status.eligible_for_dunning() {
            debug!(invoice = %invoice.number, "no longer eligible, skipping");
            return Ok(None);
        }

        let plan = self.lifecycle.create_from_invoice(policy, &invoice, today)?;
        self.invoices
            .mark_collection_plan_triggered(invoice.id, plan.id)?;
        Ok(Some(plan))
    }

    fn open_customer_plan(
        &self,
        policy: &DunningPolicy,
        customer_code: &str,
        group: &[Invoice],
        today: NaiveDate,
    ) -> Result<Option<DunningCollectionPlan>, DunningError> {
        let customer = self
            .customers
            .fetch(customer_code)?
            .ok_or(RepositoryError::NotFound)?;

        let balance = self.lifecycle.customer_balance(customer_code, today)?;
        if balance < policy.min_balance_trigger {
            debug!(customer = %customer_code, %balance, "below balance trigger");
            return Ok(None);
        }
        if let Some(currency) = &policy.min_balance_currency {
            if customer.trading_currency != *currency {
                return Ok(None);
            }
        }

        let plan = self.lifecycle.create_from_customer(policy, &customer, today)?;
        for invoice in group {
            self.invoices
                .mark_collection_plan_triggered(invoice.id, plan.id)?;
        }
        Ok(Some(plan))
    }

    /// Fire every reminder level whose exact day matches today for the
    /// policy's candidate invoices. Reminders run before any plan exists;
    /// the ledger keeps them from firing twice.
    fn dispatch_reminders(
        &self,
        policy: &DunningPolicy,
        candidates: &[Invoice],
        today: NaiveDate,
        report: &mut ScanReport,
    ) {
        let reminder_levels: Vec<_> = policy
            .levels_in_sequence()
            .into_iter()
            .filter(|policy_level| policy_level.level.is_reminder)
            .collect();
        if reminder_levels.is_empty() {
            return;
        }

        for invoice in candidates {
            let scope = TriggerScope::Invoice(invoice.id);
            for policy_level in &reminder_levels {
                match self
                    .factory
                    .instantiate_detached(policy_level, &scope, invoice.due_date, today)
                {
                    Ok(Some(mut instance)) => {
                        self.send_reminder_actions(invoice, &mut instance, today);
                        instance.status = InstanceStatus::Done;
                        instance.execution_date = Some(today);
                        if let Err(err) = self.factory.record_detached(&scope, &instance) {
                            error!(invoice = %invoice.number, %err, "failed to record reminder");
                            report.failures.push(ScanFailure {
                                subject: invoice.number.clone(),
                                reason: err.to_string(),
                            });
                            continue;
                        }
                        report.reminders_sent += 1;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        error!(invoice = %invoice.number, %err, "reminder dispatch failed");
                        report.failures.push(ScanFailure {
                            subject: invoice.number.clone(),
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }
    }

    fn send_reminder_actions(
        &self,
        invoice: &Invoice,
        instance: &mut DunningLevelInstance,
        today: NaiveDate,
    ) {
        let recipient = match self.customers.fetch(&invoice.customer_account) {
            Ok(Some(customer)) => customer.contact_email,
            _ => None,
        };
        let Some(recipient) = recipient else {
            warn!(invoice = %invoice.number, "no contact email, reminder actions left pending");
            return;
        };

        for action in instance.actions.iter_mut() {
            if action.mode != ActionMode::Automatic || action.kind != ActionKind::SendEmail {
                continue;
            }
            let notification = OutboundNotification {
                from: self.notification_from.clone(),
                to: recipient.clone(),
                subject: format!("Payment reminder for invoice {}", invoice.number),
                text_body: format!(
                    "Invoice {} over {} {} is due on {}.",
                    invoice.number, invoice.amount_with_tax, invoice.currency, invoice.due_date
                ),
                html_body: None,
                attachments: Vec::new(),
            };
            match self.notifier.send(notification) {
                Ok(()) => {
                    action.status = InstanceStatus::Done;
                    action.execution_date = Some(today);
                }
                Err(err) => {
                    warn!(invoice = %invoice.number, action = %action.code, %err, "reminder send failed");
                }
            }
        }
    }
}
