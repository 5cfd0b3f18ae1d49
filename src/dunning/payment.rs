//! Resolves the preferred payment method for a plan and delegates execution
//! to the payment gateway collaborator.

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::info;

use super::billing::PaymentMethodKind;
use super::domain::DunningCollectionPlan;
use super::repository::{
    CustomerAccountRepository, InvoiceRepository, PaymentError, PaymentGatewayRegistry,
    PaymentResult, RepositoryError,
};

/// Error raised while launching a payment for a plan.
#[derive(Debug, thiserror::Error)]
pub enum PaymentLaunchError {
    #[error("customer account '{customer}' has no preferred payment method")]
    NoPaymentMethod { customer: String },
    #[error("no payment gateway registered for customer '{customer}' and method {kind:?}")]
    NoGateway {
        customer: String,
        kind: PaymentMethodKind,
    },
    #[error("collection plan {plan} has no open invoice amounts to collect")]
    NothingToCollect { plan: String },
    #[error("net amount {amount} cannot be expressed in minor units")]
    AmountNotRepresentable { amount: Decimal },
    #[error(transparent)]
    Gateway(#[from] PaymentError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone)]
pub struct PaymentLauncher {
    customers: Arc<dyn CustomerAccountRepository>,
    invoices: Arc<dyn InvoiceRepository>,
    gateways: Arc<dyn PaymentGatewayRegistry>,
}

impl PaymentLauncher {
    pub fn new(
        customers: Arc<dyn CustomerAccountRepository>,
        invoices: Arc<dyn InvoiceRepository>,
        gateways: Arc<dyn PaymentGatewayRegistry>,
    ) -> Self {
        Self {
            customers,
            invoices,
            gateways,
        }
    }

    /// Collect the plan's open invoice amounts through the customer's
    /// preferred payment method. Amounts are aggregated in minor units
    /// (cents) together with the invoices' unmatched account-operation ids.
    pub fn launch(
        &self,
        plan: &DunningCollectionPlan,
    ) -> Result<PaymentResult, PaymentLaunchError> {
        let customer_code = plan.scope.customer_account();
        let customer = self
            .customers
            .fetch(customer_code)?
            .ok_or(RepositoryError::NotFound)?;
        let method =
            customer
                .preferred_payment_method()
                .ok_or_else(|| PaymentLaunchError::NoPaymentMethod {
                    customer: customer_code.to_string(),
                })?;

        let mut total = Decimal::ZERO;
        let mut operation_ids = Vec::new();
        for invoice_id in plan.scope.invoice_ids() {
            // Payment processing may have settled the invoice since the plan
            // was last touched.
            let invoice = self.invoices.refresh(*invoice_id)?;
            if !invoice.payment_status.eligible_for_dunning() {
                continue;
            }
            total += invoice.net_to_pay;
            if let Some(operation_id) = invoice.account_operation_id {
                operation_ids.push(operation_id);
            }
        }

        if total <= Decimal::ZERO {
            return Err(PaymentLaunchError::NothingToCollect {
                plan: plan.number.clone(),
            });
        }

        let amount_minor_units = (total * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .ok_or(PaymentLaunchError::AmountNotRepresentable { amount: total })?;

        let gateway = self.gateways.resolve(customer_code, method.kind).ok_or(
            PaymentLaunchError::NoGateway {
                customer: customer_code.to_string(),
                kind: method.kind,
            },
        )?;

        let result = gateway.pay(method, amount_minor_units, &operation_ids)?;
        info!(
            plan = %plan.number,
            reference = %result.reference,
            accepted = result.accepted,
            "payment launched"
        );
        Ok(result)
    }
}
