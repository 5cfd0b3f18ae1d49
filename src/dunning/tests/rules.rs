use super::common::*;
use crate::dunning::billing::PaymentStatus;
use crate::dunning::domain::{DunningPolicyRule, RuleOperator, TargetField};
use crate::dunning::rules::{
    compile_rules, EligibilityError, PolicyRuleEvaluator, PolicyValidationError, RuleExpr,
};
use rust_decimal_macros::dec;

#[test]
fn malformed_joint_fails_compilation() {
    let mut policy = standard_policy();
    policy.rules = vec![DunningPolicyRule {
        id: 1,
        rule_joint: Some("XOR".to_string()),
        lines: vec![
            rule_line(TargetField::CustomerCategory, RuleOperator::Equals, "BUSINESS", None),
        ],
    }];
    // A single rule never consults its own joint; add a second one so the
    // bad joint is reached.
    policy.rules.insert(
        0,
        single_line_rule(0, TargetField::IsCompany, RuleOperator::Equals, "true"),
    );

    match compile_rules(&policy) {
        Err(PolicyValidationError::InvalidRuleJoint { value }) => assert_eq!(value, "XOR"),
        other => panic!("expected invalid joint error, got {other:?}"),
    }
}

#[test]
fn rule_without_lines_fails_fast() {
    let mut policy = standard_policy();
    policy.rules = vec![DunningPolicyRule {
        id: 7,
        rule_joint: None,
        lines: Vec::new(),
    }];

    match compile_rules(&policy) {
        Err(PolicyValidationError::EmptyRule { rule_id }) => assert_eq!(rule_id, 7),
        other => panic!("expected empty rule error, got {other:?}"),
    }
}

#[test]
fn empty_rules_collection_selects_nothing() {
    let mut policy = standard_policy();
    policy.rules = Vec::new();

    assert_eq!(compile_rules(&policy).expect("compiles"), None);

    let billing = MemoryBilling::with(
        vec![invoice(1, "ACME", date(2026, 3, 1), dec!(100))],
        vec![customer("ACME")],
    );
    let candidates = PolicyRuleEvaluator::find_candidates(&policy, billing.as_ref())
        .expect("selection succeeds");
    assert!(candidates.is_empty());
}

#[test]
fn rules_are_sorted_by_id_before_compilation() {
    let mut policy = standard_policy();
    policy.rules = vec![
        single_line_rule(2, TargetField::IsCompany, RuleOperator::Equals, "true"),
        single_line_rule(1, TargetField::CustomerCategory, RuleOperator::Equals, "BUSINESS"),
    ];

    let expr = compile_rules(&policy).expect("compiles").expect("non-empty");
    match expr {
        RuleExpr::And(left, _) => match *left {
            RuleExpr::Comparison(comparison) => {
                assert_eq!(comparison.field, TargetField::CustomerCategory)
            }
            other => panic!("expected comparison on the left, got {other:?}"),
        },
        other => panic!("expected AND root, got {other:?}"),
    }
}

#[test]
fn null_credit_category_matches_not_equals_but_never_equals() {
    let mut policy = standard_policy();
    policy.rules = vec![single_line_rule(
        1,
        TargetField::CreditCategory,
        RuleOperator::NotEquals,
        "BLOCKED",
    )];

    let mut unrated = customer("ACME");
    unrated.credit_category = None;
    let billing = MemoryBilling::with(
        vec![invoice(1, "ACME", date(2026, 3, 1), dec!(100))],
        vec![unrated.clone()],
    );

    let candidates = PolicyRuleEvaluator::find_candidates(&policy, billing.as_ref())
        .expect("selection succeeds");
    assert_eq!(candidates.len(), 1, "null category counts as not-equal");

    policy.rules = vec![single_line_rule(
        1,
        TargetField::CreditCategory,
        RuleOperator::Equals,
        "BLOCKED",
    )];
    let candidates = PolicyRuleEvaluator::find_candidates(&policy, billing.as_ref())
        .expect("selection succeeds");
    assert!(candidates.is_empty(), "null category never matches equals");
}

#[test]
fn or_joint_widens_the_selection() {
    let mut policy = standard_policy();
    policy.rules = vec![DunningPolicyRule {
        id: 1,
        rule_joint: None,
        lines: vec![
            rule_line(TargetField::CustomerCategory, RuleOperator::Equals, "RESIDENTIAL", None),
            rule_line(TargetField::InvoiceAmount, RuleOperator::GreaterThan, "500", Some("OR")),
        ],
    }];

    let billing = MemoryBilling::with(
        vec![
            invoice(1, "ACME", date(2026, 3, 1), dec!(600)),
            invoice(2, "ACME", date(2026, 3, 1), dec!(100)),
        ],
        vec![customer("ACME")],
    );

    let candidates = PolicyRuleEvaluator::find_candidates(&policy, billing.as_ref())
        .expect("selection succeeds");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].number, "INV-0001");
}

#[test]
fn base_predicate_excludes_settled_and_triggered_invoices() {
    let policy = standard_policy();

    let mut paid = invoice(1, "ACME", date(2026, 3, 1), dec!(100));
    paid.payment_status = PaymentStatus::Paid;
    let mut triggered = invoice(2, "ACME", date(2026, 3, 1), dec!(100));
    triggered.collection_plan_triggered = true;
    let open = invoice(3, "ACME", date(2026, 3, 1), dec!(100));

    let billing = MemoryBilling::with(vec![paid, triggered, open], vec![customer("ACME")]);
    let candidates = PolicyRuleEvaluator::find_candidates(&policy, billing.as_ref())
        .expect("selection succeeds");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].number, "INV-0003");
}

#[test]
fn selection_gates_on_overdue_days_balance_and_currency() {
    let mut policy = standard_policy();
    policy.levels[0].level.days_overdue = 5;
    policy.min_balance_currency = Some("EUR".to_string());
    let today = date(2026, 3, 10);

    let not_overdue_enough = invoice(1, "ACME", date(2026, 3, 7), dec!(100));
    let below_trigger = invoice(2, "ACME", date(2026, 3, 1), dec!(10));
    let mut wrong_currency = invoice(3, "ACME", date(2026, 3, 1), dec!(100));
    wrong_currency.currency = "USD".to_string();
    let eligible = invoice(4, "ACME", date(2026, 3, 5), dec!(100));

    let selected = PolicyRuleEvaluator::filter_eligible(
        &policy,
        vec![not_overdue_enough, below_trigger, wrong_currency, eligible],
        today,
    )
    .expect("filtering succeeds");

    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].number, "INV-0004");
}

#[test]
fn find_eligible_combines_rule_filter_and_selection_checks() {
    let policy = standard_policy();
    let today = date(2026, 3, 10);
    let billing = MemoryBilling::with(
        vec![
            invoice(1, "ACME", date(2026, 3, 1), dec!(100)),
            invoice(2, "ACME", date(2026, 3, 1), dec!(10)),
        ],
        vec![customer("ACME")],
    );

    let eligible = PolicyRuleEvaluator::find_eligible(&policy, billing.as_ref(), today)
        .expect("selection succeeds");
    assert_eq!(eligible.len(), 1, "the below-trigger invoice drops out");
    assert_eq!(eligible[0].number, "INV-0001");
}

#[test]
fn policy_without_non_reminder_level_has_no_trigger() {
    let mut policy = reminder_policy();
    policy.levels.truncate(1);

    match PolicyRuleEvaluator::trigger_level(&policy) {
        Err(PolicyValidationError::NoTriggerLevel { policy: code }) => {
            assert_eq!(code, "POL-REMIND")
        }
        other => panic!("expected missing trigger level error, got {other:?}"),
    }
}

#[test]
fn ordering_operator_on_text_field_is_rejected() {
    let mut policy = standard_policy();
    policy.rules = vec![single_line_rule(
        1,
        TargetField::CustomerCategory,
        RuleOperator::GreaterThan,
        "BUSINESS",
    )];

    match PolicyRuleEvaluator::find_candidates(
        &policy,
        MemoryBilling::with(Vec::new(), Vec::new()).as_ref(),
    ) {
        Err(EligibilityError::Validation(PolicyValidationError::UnsupportedOperator {
            field,
            ..
        })) => assert_eq!(field, TargetField::CustomerCategory),
        other => panic!("expected unsupported operator error, got {other:?}"),
    }
}
