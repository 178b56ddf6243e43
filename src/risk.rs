//! Transaction decision engine.
//!
//! Layers balance and high-value checks on top of the anomaly detector and
//! answers with a strict allow / verify-via-email / block decision.

use serde::Serialize;

use crate::anomaly::{self, RiskLevel};
use crate::store::Expense;

/// Amounts above this fraction of the current balance trigger verification.
pub const HIGH_VALUE_BALANCE_RATIO: f64 = 0.5;

/// Amounts above this multiple of the mean spend trigger verification.
pub const HIGH_VALUE_AVERAGE_MULTIPLIER: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Allow,
    VerifyViaEmail,
    Block,
}

/// Strict output shape: action, reason, and the email prompt when
/// verification is required.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub action: Action,
    pub reason: String,
    pub email_subject: Option<String>,
    pub email_body_message: Option<String>,
}

impl Decision {
    fn allow(reason: &str) -> Self {
        Decision {
            action: Action::Allow,
            reason: reason.to_string(),
            email_subject: None,
            email_body_message: None,
        }
    }

    fn block(reason: &str) -> Self {
        Decision {
            action: Action::Block,
            reason: reason.to_string(),
            email_subject: None,
            email_body_message: None,
        }
    }

    fn verify(reason: &str, subject: &str, body: String) -> Self {
        Decision {
            action: Action::VerifyViaEmail,
            reason: reason.to_string(),
            email_subject: Some(subject.to_string()),
            email_body_message: Some(body),
        }
    }
}

/// Evaluate a candidate payment of `amount` in `category` against the
/// current balance and the user's expense history. `now` is unix seconds.
pub fn evaluate(
    balance: f64,
    amount: f64,
    category: &str,
    history: &[Expense],
    now: i64,
) -> Decision {
    // 1) Insufficient funds.
    if amount > balance {
        return Decision::verify(
            "insufficient funds: transaction amount exceeds current balance",
            "Action required: verify payment (insufficient funds)",
            format!(
                "We detected a payment request of {amount:.2} but your available balance \
                 is {balance:.2}. Please verify the payment or add funds to proceed."
            ),
        );
    }

    // 2) Averages for the high-value checks.
    let stats = anomaly::category_stats(history);
    let category_average = stats.get(category).map(|s| s.average);
    let overall_average = if stats.is_empty() {
        None
    } else {
        Some(stats.values().map(|s| s.average).sum::<f64>() / stats.len() as f64)
    };

    // 3) Hard stop on critical anomalies.
    let assessment = anomaly::detect(history, amount, category, now);
    if assessment.risk_level == RiskLevel::Critical {
        return Decision::block("transaction flagged as critical risk by the anomaly engine");
    }

    // 4) High-value verification.
    let high_by_balance = amount > balance * HIGH_VALUE_BALANCE_RATIO;
    let high_by_average = category_average
        .map(|avg| avg > 0.0 && amount > avg * HIGH_VALUE_AVERAGE_MULTIPLIER)
        .unwrap_or(false)
        || overall_average
            .map(|avg| avg > 0.0 && amount > avg * HIGH_VALUE_AVERAGE_MULTIPLIER)
            .unwrap_or(false);

    if high_by_balance || high_by_average || assessment.risk_level == RiskLevel::High {
        return Decision::verify(
            "high value security check triggered",
            "Confirm your high-value payment",
            format!(
                "We noticed a high-value payment of {amount:.2} from your account. For \
                 your security, please confirm this transaction via the link sent to \
                 your registered email."
            ),
        );
    }

    Decision::allow("within normal thresholds and balance")
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn history(amounts: &[f64]) -> Vec<Expense> {
        amounts
            .iter()
            .map(|&amount| Expense {
                amount,
                category: "food".to_string(),
                timestamp: NOW - 86_400,
            })
            .collect()
    }

    #[test]
    fn insufficient_funds_requires_verification() {
        let decision = evaluate(50.0, 100.0, "food", &history(&[40.0, 60.0]), NOW);
        assert_eq!(decision.action, Action::VerifyViaEmail);
        assert!(decision.email_subject.is_some());
        assert!(decision.reason.contains("insufficient funds"));
    }

    #[test]
    fn critical_anomaly_blocks() {
        // 100 is both >2.5x the mean and >1.5x the max: score 60, critical.
        let decision = evaluate(1000.0, 100.0, "food", &history(&[10.0, 10.0, 10.0]), NOW);
        assert_eq!(decision.action, Action::Block);
        assert!(decision.email_subject.is_none());
    }

    #[test]
    fn majority_of_balance_requires_verification() {
        let decision = evaluate(1000.0, 600.0, "food", &history(&[500.0, 550.0]), NOW);
        assert_eq!(decision.action, Action::VerifyViaEmail);
        assert!(decision.reason.contains("high value"));
    }

    #[test]
    fn far_above_overall_average_requires_verification() {
        // New category, so only the overall mean (30.0) applies; 400 is >10x
        // that but well under half the balance.
        let decision = evaluate(10_000.0, 400.0, "travel", &history(&[20.0, 30.0, 40.0]), NOW);
        assert_eq!(decision.action, Action::VerifyViaEmail);
        assert!(decision.reason.contains("high value"));
    }

    #[test]
    fn ordinary_payment_is_allowed() {
        let decision = evaluate(1000.0, 30.0, "food", &history(&[50.0, 60.0]), NOW);
        assert_eq!(decision.action, Action::Allow);
        assert!(decision.email_subject.is_none());
        assert!(decision.email_body_message.is_none());
    }

    #[test]
    fn no_history_still_applies_balance_checks() {
        let decision = evaluate(1000.0, 30.0, "food", &[], NOW);
        assert_eq!(decision.action, Action::Allow);

        let decision = evaluate(1000.0, 900.0, "food", &[], NOW);
        assert_eq!(decision.action, Action::VerifyViaEmail);
    }
}
