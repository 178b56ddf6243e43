//! Cash-flow projection and shortfall forecasting.
//!
//! Projects monthly income against debt obligations and the trailing 30 days
//! of spending, grades the resulting cash flow, and produces actionable
//! recommendations plus a multi-month trend.

use std::collections::BTreeMap;

use rand::Rng;
use serde::Serialize;

use crate::anomaly::RiskLevel;
use crate::store::{Debt, Expense, Frequency, IncomeSource};

/// Trailing window used to estimate daily spending.
pub const ANALYSIS_WINDOW_DAYS: i64 = 30;

const SECS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub priority: RiskLevel,
    pub action: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShortfallReport {
    pub timeframe: &'static str,
    pub monthly_income: f64,
    pub monthly_expenses: f64,
    pub monthly_debt_payment: f64,
    pub total_monthly_obligations: f64,
    pub monthly_cash_flow: f64,
    pub has_shortfall: bool,
    pub shortfall_amount: f64,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<Recommendation>,
    pub expense_breakdown: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthProjection {
    pub months_ahead: u32,
    pub projected_income: f64,
    pub projected_expenses: f64,
    pub projected_debt: f64,
    pub projected_cash_flow: f64,
    pub has_shortfall: bool,
    pub shortfall_amount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    pub baseline: ShortfallReport,
    pub trend: Vec<MonthProjection>,
}

/// Grade monthly cash flow relative to monthly income.
pub fn cash_flow_grade(cash_flow: f64, monthly_income: f64) -> RiskLevel {
    if cash_flow >= monthly_income * 0.2 {
        RiskLevel::Low // surplus or a good cushion
    } else if cash_flow >= 0.0 {
        RiskLevel::Medium // breaking even
    } else if cash_flow >= -monthly_income * 0.1 {
        RiskLevel::High // small shortfall
    } else {
        RiskLevel::Critical
    }
}

/// Project the next 30 days of cash flow from active income sources, active
/// debt obligations and the trailing window of expenses. `now` is unix
/// seconds.
pub fn predict(
    incomes: &[IncomeSource],
    debts: &[Debt],
    expenses: &[Expense],
    now: i64,
) -> ShortfallReport {
    let monthly_income: f64 = incomes
        .iter()
        .filter(|i| i.active && i.frequency == Frequency::Monthly)
        .map(|i| i.monthly_amount)
        .sum();

    let monthly_debt_payment: f64 = debts
        .iter()
        .filter(|d| d.active)
        .map(|d| d.monthly_payment)
        .sum();

    let cutoff = now - ANALYSIS_WINDOW_DAYS * SECS_PER_DAY;
    let recent: Vec<&Expense> = expenses.iter().filter(|e| e.timestamp >= cutoff).collect();

    let total_recent: f64 = recent.iter().map(|e| e.amount).sum();
    let average_daily = total_recent / ANALYSIS_WINDOW_DAYS as f64;
    let monthly_expenses = average_daily * ANALYSIS_WINDOW_DAYS as f64;

    let mut expense_breakdown: BTreeMap<String, f64> = BTreeMap::new();
    for expense in &recent {
        *expense_breakdown.entry(expense.category.clone()).or_default() += expense.amount;
    }

    let total_monthly_obligations = monthly_debt_payment + monthly_expenses;
    let monthly_cash_flow = monthly_income - total_monthly_obligations;

    ShortfallReport {
        timeframe: "next-30-days",
        monthly_income,
        monthly_expenses,
        monthly_debt_payment,
        total_monthly_obligations,
        monthly_cash_flow,
        has_shortfall: monthly_cash_flow < 0.0,
        shortfall_amount: if monthly_cash_flow < 0.0 {
            monthly_cash_flow.abs()
        } else {
            0.0
        },
        risk_level: cash_flow_grade(monthly_cash_flow, monthly_income),
        recommendations: recommend(monthly_cash_flow, monthly_income, &expense_breakdown),
        expense_breakdown,
    }
}

/// Actionable recommendations for the given cash-flow situation.
pub fn recommend(
    cash_flow: f64,
    monthly_income: f64,
    expense_breakdown: &BTreeMap<String, f64>,
) -> Vec<Recommendation> {
    let mut recommendations = vec![];

    if cash_flow < 0.0 {
        let shortfall_percentage = if monthly_income > 0.0 {
            (cash_flow / monthly_income).abs() * 100.0
        } else {
            100.0
        };

        if shortfall_percentage > 50.0 {
            recommendations.push(Recommendation {
                priority: RiskLevel::Critical,
                action: "Seek additional income sources".to_string(),
                reason: "Expenses exceed income by more than 50%. Consider freelance work \
                         or part-time income."
                    .to_string(),
            });
        } else if shortfall_percentage > 25.0 {
            recommendations.push(Recommendation {
                priority: RiskLevel::High,
                action: "Reduce discretionary spending".to_string(),
                reason: "Expenses exceed income by more than 25%. Focus on cutting \
                         non-essential costs."
                    .to_string(),
            });
        } else {
            recommendations.push(Recommendation {
                priority: RiskLevel::Medium,
                action: "Track spending closely".to_string(),
                reason: "You have a minor shortfall. Monitor expenses and adjust as needed."
                    .to_string(),
            });
        }
    }

    let total_expenses: f64 = expense_breakdown.values().sum();
    if total_expenses > 0.0 {
        for (category, amount) in expense_breakdown {
            let percentage = amount / total_expenses * 100.0;
            if percentage > 40.0 && category != "food" && category != "rent" {
                recommendations.push(Recommendation {
                    priority: RiskLevel::Medium,
                    action: format!("Review {category} expenses"),
                    reason: format!(
                        "{category} represents {percentage:.1}% of your spending. Consider \
                         if all purchases are necessary."
                    ),
                });
            }
        }
    }

    recommendations.push(Recommendation {
        priority: RiskLevel::Low,
        action: "Diversify income sources".to_string(),
        reason: "Consider adding multiple income streams to improve financial stability."
            .to_string(),
    });

    if cash_flow > 0.0 {
        let suggested = (cash_flow * 0.2).min(monthly_income * 0.05);
        recommendations.push(Recommendation {
            priority: RiskLevel::Low,
            action: "Build emergency fund".to_string(),
            reason: format!("You have positive cash flow. Save {suggested:.2} monthly as an \
                             emergency fund."),
        });
    }

    recommendations
}

/// One month of the trend, with `variance` applied to projected expenses
/// (the random walk passes a value in ±10%).
fn project_month(baseline: &ShortfallReport, months_ahead: u32, variance: f64) -> MonthProjection {
    let projected_expenses = baseline.monthly_expenses * (1.0 + variance);
    let projected_cash_flow =
        baseline.monthly_income - projected_expenses - baseline.monthly_debt_payment;

    MonthProjection {
        months_ahead,
        projected_income: baseline.monthly_income,
        projected_expenses,
        projected_debt: baseline.monthly_debt_payment,
        projected_cash_flow,
        has_shortfall: projected_cash_flow < 0.0,
        shortfall_amount: if projected_cash_flow < 0.0 {
            projected_cash_flow.abs()
        } else {
            0.0
        },
    }
}

/// Project `months` ahead from the baseline report, jittering expenses by
/// ±10% per month to sketch a plausible spread rather than a flat line.
pub fn trend(baseline: ShortfallReport, months: u32) -> TrendReport {
    let mut rng = rand::thread_rng();
    let trend = (0..months)
        .map(|i| project_month(&baseline, i, rng.gen_range(-0.1..=0.1)))
        .collect();
    TrendReport { baseline, trend }
}
