use std::sync::Arc;

use chrono::{Duration, Local, NaiveDate};
use clap::Args;
use rust_decimal_macros::dec;

use dunning_engine::config::AppConfig;
use dunning_engine::dunning::{
    AccountOperation, ActionKind, ActionMode, BalanceCalculator, CollectionPlanLifecycle,
    CustomerAccount, DunningAction, DunningCollectionPlan, DunningLevel, DunningPolicy,
    DunningPolicyEngine, DunningPolicyLevel, DunningPolicyRule, DunningPolicyRuleLine, Invoice,
    InvoiceId, LevelInstanceFactory, MatchingStatus, OperationSign, PaymentLauncher,
    PaymentMethod, PaymentMethodKind, PaymentStatus, PlanScope, PolicyMode, RuleOperator,
    ScanReport, TargetField,
};
use dunning_engine::error::AppError;
use dunning_engine::telemetry;

use crate::infra::{
    AcceptingGateway, InMemoryBillingStore, InMemoryTriggerLedger, LoggingNotifier,
    SingleGatewayRegistry,
};

#[derive(Args, Debug, Default)]
pub(crate) struct ScanArgs {
    /// Evaluation date for the pass (defaults to today)
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Date anchoring the demo timeline (defaults to today)
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

struct Stack {
    engine: DunningPolicyEngine,
    lifecycle: CollectionPlanLifecycle,
}

fn build_stack(config: &AppConfig, store: Arc<InMemoryBillingStore>) -> Stack {
    let ledger = Arc::new(InMemoryTriggerLedger::default());
    let factory = LevelInstanceFactory::new(ledger);
    let payments = PaymentLauncher::new(
        store.clone(),
        store.clone(),
        Arc::new(SingleGatewayRegistry {
            gateway: Arc::new(AcceptingGateway::default()),
        }),
    );
    let engine = DunningPolicyEngine::new(
        store.clone(),
        store.clone(),
        Arc::new(LoggingNotifier),
        factory.clone(),
        CollectionPlanLifecycle::new(
            factory.clone(),
            BalanceCalculator::new(config.balance.clone()),
            store.clone(),
        ),
        payments,
        "collections@vendor.example".to_string(),
    );
    let lifecycle = CollectionPlanLifecycle::new(
        factory,
        BalanceCalculator::new(config.balance.clone()),
        store,
    );
    Stack { engine, lifecycle }
}

fn email_action(code: &str) -> DunningAction {
    DunningAction {
        code: code.to_string(),
        kind: ActionKind::SendEmail,
        mode: ActionMode::Automatic,
        assignee: None,
    }
}

/// Reminder two days past due, then escalation at day 5, 15, and 30 for
/// business customers owing at least 50 EUR.
fn escalation_policy() -> DunningPolicy {
    DunningPolicy {
        code: "POL-STD".to_string(),
        name: "Standard business escalation".to_string(),
        mode: PolicyMode::InvoiceLevel,
        active: true,
        min_balance_trigger: dec!(50),
        min_balance_currency: Some("EUR".to_string()),
        levels: vec![
            DunningPolicyLevel {
                sequence: 0,
                level: DunningLevel {
                    code: "L0-REMINDER".to_string(),
                    days_overdue: 2,
                    is_reminder: true,
                    actions: vec![email_action("A-REMINDER")],
                },
            },
            DunningPolicyLevel {
                sequence: 1,
                level: DunningLevel {
                    code: "L1-NOTICE".to_string(),
                    days_overdue: 5,
                    is_reminder: false,
                    actions: vec![email_action("A-NOTICE")],
                },
            },
            DunningPolicyLevel {
                sequence: 2,
                level: DunningLevel {
                    code: "L2-FOLLOWUP".to_string(),
                    days_overdue: 15,
                    is_reminder: false,
                    actions: vec![
                        email_action("A-FOLLOWUP"),
                        DunningAction {
                            code: "A-CALL".to_string(),
                            kind: ActionKind::PhoneCall,
                            mode: ActionMode::Manual,
                            assignee: Some("collections-agent".to_string()),
                        },
                    ],
                },
            },
            DunningPolicyLevel {
                sequence: 3,
                level: DunningLevel {
                    code: "L3-RETRY".to_string(),
                    days_overdue: 30,
                    is_reminder: false,
                    actions: vec![DunningAction {
                        code: "A-RETRY".to_string(),
                        kind: ActionKind::RetryPayment,
                        mode: ActionMode::Automatic,
                        assignee: None,
                    }],
                },
            },
        ],
        rules: vec![DunningPolicyRule {
            id: 1,
            rule_joint: None,
            lines: vec![DunningPolicyRuleLine {
                field: TargetField::CustomerCategory,
                operator: RuleOperator::Equals,
                value: "BUSINESS".to_string(),
                line_joint: None,
            }],
        }],
    }
}

/// Tighter ladder used by the policy-switch part of the demo.
fn intensive_policy() -> DunningPolicy {
    let mut policy = escalation_policy();
    policy.code = "POL-INTENSIVE".to_string();
    policy.name = "Intensive recovery".to_string();
    policy.levels = vec![
        DunningPolicyLevel {
            sequence: 0,
            level: DunningLevel {
                code: "I0-NOTICE".to_string(),
                days_overdue: 0,
                is_reminder: false,
                actions: vec![email_action("A-FORMAL-NOTICE")],
            },
        },
        DunningPolicyLevel {
            sequence: 1,
            level: DunningLevel {
                code: "I1-RETRY".to_string(),
                days_overdue: 7,
                is_reminder: false,
                actions: vec![DunningAction {
                    code: "A-RETRY-NOW".to_string(),
                    kind: ActionKind::RetryPayment,
                    mode: ActionMode::Automatic,
                    assignee: None,
                }],
            },
        },
        DunningPolicyLevel {
            sequence: 2,
            level: DunningLevel {
                code: "I2-HANDOVER".to_string(),
                days_overdue: 14,
                is_reminder: false,
                actions: vec![DunningAction {
                    code: "A-AGENCY".to_string(),
                    kind: ActionKind::SendLetter,
                    mode: ActionMode::Manual,
                    assignee: Some("recovery-desk".to_string()),
                }],
            },
        },
    ];
    policy
}

fn seed_customer(code: &str, category: &str, email: &str) -> CustomerAccount {
    CustomerAccount {
        code: code.to_string(),
        name: format!("{code} Ltd"),
        customer_category: category.to_string(),
        credit_category: Some("STANDARD".to_string()),
        is_company: true,
        trading_currency: "EUR".to_string(),
        contact_email: Some(email.to_string()),
        payment_methods: vec![PaymentMethod {
            alias: format!("{code}-card"),
            kind: PaymentMethodKind::Card,
            preferred: true,
        }],
    }
}

fn seed_invoice(
    id: u64,
    customer: &str,
    due_date: NaiveDate,
    amount: rust_decimal::Decimal,
) -> Invoice {
    Invoice {
        id: InvoiceId(id),
        number: format!("INV-{id}"),
        billing_account: format!("{customer}-BA"),
        customer_account: customer.to_string(),
        currency: "EUR".to_string(),
        due_date,
        amount_with_tax: amount,
        unmatched_amount: amount,
        net_to_pay: amount,
        payment_status: PaymentStatus::Unpaid,
        collection_plan_triggered: false,
        account_operation_id: Some(9000 + id),
    }
}

fn seed_operation(invoice: &Invoice) -> AccountOperation {
    AccountOperation {
        id: invoice.account_operation_id.unwrap_or_default(),
        customer_account: invoice.customer_account.clone(),
        occ_template_code: "INV_STD".to_string(),
        sign: OperationSign::Debit,
        amount: invoice.amount_with_tax,
        un_matching_amount: invoice.unmatched_amount,
        matching_status: MatchingStatus::Open,
        transaction_date: invoice.due_date,
        due_date: invoice.due_date,
        currency: invoice.currency.clone(),
    }
}

/// A small receivables book anchored on the evaluation date: one invoice far
/// enough overdue to open a plan, one on its exact reminder day, and one
/// belonging to a customer the policy rules exclude.
fn seed_portfolio(today: NaiveDate) -> Arc<InMemoryBillingStore> {
    let invoices = vec![
        seed_invoice(1001, "ACME", today - Duration::days(12), dec!(480.00)),
        seed_invoice(1002, "ACME", today - Duration::days(2), dec!(120.00)),
        seed_invoice(1003, "GLOBEX", today - Duration::days(40), dec!(900.00)),
    ];
    let operations = invoices.iter().map(seed_operation).collect();
    let customers = vec![
        seed_customer("ACME", "BUSINESS", "billing@acme.example"),
        seed_customer("GLOBEX", "RESIDENTIAL", "billing@globex.example"),
    ];
    InMemoryBillingStore::seed(invoices, customers, operations)
}

pub(crate) fn run_scan(args: ScanArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let today = args.today.unwrap_or_else(|| Local::now().date_naive());
    let store = seed_portfolio(today);
    let stack = build_stack(&config, store);

    let report = stack.engine.scan(&[escalation_policy()], today);
    render_scan_report(&report, today);
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let today = args.today.unwrap_or_else(|| Local::now().date_naive());
    let store = seed_portfolio(today);
    let stack = build_stack(&config, store);

    println!("Collections engine demo (evaluated {today})");

    println!("\n[1] Batch scan");
    let mut report = stack.engine.scan(&[escalation_policy()], today);
    render_scan_report(&report, today);

    let Some(mut plan) = report.plans.pop() else {
        println!("\nNo plan was created; nothing further to demonstrate.");
        return Ok(());
    };

    println!("\n[2] Pause ({} until {})", plan.number, today + Duration::days(14));
    stack
        .lifecycle
        .pause(
            &mut plan,
            false,
            today + Duration::days(14),
            "customer promised payment",
            true,
            today,
        )
        .map_err(dunning_engine::dunning::DunningError::from)?;
    render_plan(&plan);

    let resume_day = today + Duration::days(7);
    println!("\n[3] Early resume on {resume_day} (with payment retry)");
    stack
        .engine
        .resume_collection_plan(&mut plan, true, resume_day)
        .map_err(dunning_engine::error::AppError::from)?;
    println!(
        "Paused for {} real days; schedule shifted accordingly.",
        plan.pause_duration_days
    );
    render_plan(&plan);

    println!("\n[4] Switch to {}", intensive_policy().code);
    let switched = stack
        .lifecycle
        .switch_collection_plan(&mut plan, &intensive_policy(), 1, resume_day)
        .map_err(dunning_engine::dunning::DunningError::from)?;
    println!(
        "Old plan {} stopped ({}).",
        plan.number,
        plan.stop_reason.as_deref().unwrap_or("-")
    );
    render_plan(&switched);

    Ok(())
}

fn scope_label(scope: &PlanScope) -> String {
    match scope {
        PlanScope::Invoice { invoice_ids, .. } => {
            let ids: Vec<String> = invoice_ids.iter().map(|id| id.0.to_string()).collect();
            format!("invoice {}", ids.join(", "))
        }
        PlanScope::Customer { customer_account } => format!("customer {customer_account}"),
    }
}

fn render_scan_report(report: &ScanReport, today: NaiveDate) {
    println!("Dunning scan report ({today})");
    println!(
        "Policies scanned: {}, reminders sent: {}, plans created: {}",
        report.policies_scanned,
        report.reminders_sent,
        report.plans.len()
    );

    if !report.plans.is_empty() {
        println!("\nCollection plans");
        for plan in &report.plans {
            let next = match (&plan.next_action, plan.next_action_date) {
                (Some(action), Some(date)) => format!("{action} on {date}"),
                _ => "none".to_string(),
            };
            println!(
                "- {} | policy {} | {} | balance {} {} | next action: {}",
                plan.number,
                plan.policy_code,
                scope_label(&plan.scope),
                plan.balance,
                plan.currency,
                next
            );
        }
    }

    if !report.skipped_policies.is_empty() {
        println!("\nSkipped policies");
        for skipped in &report.skipped_policies {
            println!("- {}: {}", skipped.policy, skipped.reason);
        }
    }

    if !report.failures.is_empty() {
        println!("\nFailures");
        for failure in &report.failures {
            println!("- {}: {}", failure.subject, failure.reason);
        }
    }
}

fn render_plan(plan: &DunningCollectionPlan) {
    println!(
        "Plan {} [{}] | policy {} | {} | balance {} {}",
        plan.number,
        plan.status.label(),
        plan.policy_code,
        scope_label(&plan.scope),
        plan.balance,
        plan.currency
    );
    for instance in &plan.levels {
        let date = instance
            .execution_date
            .map(|date| date.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  level {} {} [{}] scheduled {}",
            instance.sequence,
            instance.level_code,
            instance.status.label(),
            date
        );
    }
}
