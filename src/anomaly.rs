//! Rule-based anomaly detection over a user's spending history.
//!
//! Statistics are closed-form arithmetic over the in-memory expense list;
//! each triggered rule adds to a numeric risk score which is then graded.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::store::Expense;

/// Amounts above this multiple of the category mean are flagged.
pub const AMOUNT_MULTIPLIER: f64 = 2.5;

/// Amounts above this multiple of the category max are flagged.
pub const NEW_RECORD_MULTIPLIER: f64 = 1.5;

/// More than this many expenses in the trailing hour is flagged.
pub const HIGH_VELOCITY_COUNT: usize = 10;

const VELOCITY_WINDOW_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    AmountSpike,
    NewRecord,
    NewCategory,
    HighVelocity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub message: String,
}

/// Summary statistics for one spending category.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryStats {
    pub count: usize,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub anomalies: Vec<Anomaly>,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub message: String,
}

/// Group expenses by category and compute per-category summary statistics
/// (population standard deviation).
pub fn category_stats(expenses: &[Expense]) -> BTreeMap<String, CategoryStats> {
    let mut by_category: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for expense in expenses {
        by_category
            .entry(expense.category.as_str())
            .or_default()
            .push(expense.amount);
    }

    let mut stats = BTreeMap::new();
    for (category, amounts) in by_category {
        let count = amounts.len();
        let average = amounts.iter().sum::<f64>() / count as f64;
        let variance =
            amounts.iter().map(|a| (a - average).powi(2)).sum::<f64>() / count as f64;
        stats.insert(
            category.to_string(),
            CategoryStats {
                count,
                average,
                min: amounts.iter().cloned().fold(f64::INFINITY, f64::min),
                max: amounts.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                std_dev: variance.sqrt(),
            },
        );
    }
    stats
}

/// Map a cumulative score to a risk grade.
pub fn grade(score: u32) -> RiskLevel {
    match score {
        60.. => RiskLevel::Critical,
        40..=59 => RiskLevel::High,
        20..=39 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

/// Score a candidate transaction against the user's spending history.
/// `now` is unix seconds; it anchors the trailing velocity window.
pub fn detect(expenses: &[Expense], amount: f64, category: &str, now: i64) -> Assessment {
    if expenses.is_empty() {
        return Assessment {
            anomalies: vec![],
            risk_score: 0,
            risk_level: RiskLevel::Low,
            message: "no spending history to compare".to_string(),
        };
    }

    let stats = category_stats(expenses);
    let mut anomalies = vec![];
    let mut risk_score = 0u32;

    match stats.get(category) {
        Some(cat) => {
            if cat.average > 0.0 && amount > cat.average * AMOUNT_MULTIPLIER {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::AmountSpike,
                    severity: Severity::High,
                    message: format!(
                        "amount {amount} is {:.1}x the average for {category}",
                        amount / cat.average
                    ),
                });
                risk_score += 40;
            }
            if amount > cat.max * NEW_RECORD_MULTIPLIER {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::NewRecord,
                    severity: Severity::Medium,
                    message: format!(
                        "amount {amount} exceeds the previous max {} for {category}",
                        cat.max
                    ),
                });
                risk_score += 20;
            }
        }
        None => {
            anomalies.push(Anomaly {
                kind: AnomalyKind::NewCategory,
                severity: Severity::Low,
                message: format!("first recorded spending in {category}"),
            });
            risk_score += 10;
        }
    }

    let recent = expenses
        .iter()
        .filter(|e| e.timestamp >= now - VELOCITY_WINDOW_SECS)
        .count();
    if recent > HIGH_VELOCITY_COUNT {
        anomalies.push(Anomaly {
            kind: AnomalyKind::HighVelocity,
            severity: Severity::Medium,
            message: format!("{recent} transactions in the last hour"),
        });
        risk_score += 25;
    }

    let message = if anomalies.is_empty() {
        "OK".to_string()
    } else {
        format!("{} anomalies detected", anomalies.len())
    };

    Assessment {
        anomalies,
        risk_score,
        risk_level: grade(risk_score),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn expense(amount: f64, category: &str, age_secs: i64) -> Expense {
        Expense {
            amount,
            category: category.to_string(),
            timestamp: NOW - age_secs,
        }
    }

    #[test]
    fn stats_cover_mean_extremes_and_spread() {
        let history = vec![
            expense(10.0, "food", 86_400),
            expense(20.0, "food", 86_400),
            expense(30.0, "food", 86_400),
            expense(500.0, "rent", 86_400),
        ];
        let stats = category_stats(&history);

        let food = &stats["food"];
        assert_eq!(food.count, 3);
        assert_eq!(food.average, 20.0);
        assert_eq!(food.min, 10.0);
        assert_eq!(food.max, 30.0);
        assert!((food.std_dev - (200.0f64 / 3.0).sqrt()).abs() < 1e-9);

        assert_eq!(stats["rent"].count, 1);
        assert_eq!(stats["rent"].std_dev, 0.0);
    }

    #[test]
    fn no_history_scores_low() {
        let assessment = detect(&[], 999.0, "food", NOW);
        assert!(assessment.anomalies.is_empty());
        assert_eq!(assessment.risk_score, 0);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
    }

    #[test]
    fn spike_above_average_and_max_is_critical() {
        let history = vec![
            expense(10.0, "food", 86_400),
            expense(10.0, "food", 86_400),
            expense(10.0, "food", 86_400),
        ];
        let assessment = detect(&history, 100.0, "food", NOW);

        let kinds: Vec<_> = assessment.anomalies.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&AnomalyKind::AmountSpike));
        assert!(kinds.contains(&AnomalyKind::NewRecord));
        assert_eq!(assessment.risk_score, 60);
        assert_eq!(assessment.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn unseen_category_is_low_risk() {
        let history = vec![expense(50.0, "food", 86_400)];
        let assessment = detect(&history, 40.0, "travel", NOW);

        assert_eq!(assessment.anomalies.len(), 1);
        assert_eq!(assessment.anomalies[0].kind, AnomalyKind::NewCategory);
        assert_eq!(assessment.risk_score, 10);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
    }

    #[test]
    fn burst_of_recent_expenses_trips_velocity() {
        let mut history: Vec<Expense> = (0..11).map(|i| expense(5.0, "food", i * 60)).collect();
        history.push(expense(5.0, "food", 7_200));

        let assessment = detect(&history, 5.0, "food", NOW);
        assert!(assessment
            .anomalies
            .iter()
            .any(|a| a.kind == AnomalyKind::HighVelocity));
        assert_eq!(assessment.risk_score, 25);
        assert_eq!(assessment.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn grade_thresholds() {
        assert_eq!(grade(0), RiskLevel::Low);
        assert_eq!(grade(19), RiskLevel::Low);
        assert_eq!(grade(20), RiskLevel::Medium);
        assert_eq!(grade(40), RiskLevel::High);
        assert_eq!(grade(60), RiskLevel::Critical);
        assert_eq!(grade(105), RiskLevel::Critical);
    }
}
