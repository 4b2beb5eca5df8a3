//! Dashboard read model: a pure projection over ticket views.

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::instrument;

use crate::entities::TicketStatus;
use crate::errors::ServiceError;
use crate::services::ledger::{RepairLedger, RepairTicketView};

const TOP_N: usize = 5;
const UNKNOWN_LABEL: &str = "Unknown";

/// Window of ticket creation dates the totals and rankings cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DateRange {
    /// Same UTC calendar day as now
    Today,
    /// Trailing 7 days
    ThisWeek,
    /// Trailing 30 days
    #[default]
    ThisMonth,
}

impl DateRange {
    pub fn contains(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            DateRange::Today => created_at.date_naive() == now.date_naive(),
            DateRange::ThisWeek => created_at >= now - Duration::days(7),
            DateRange::ThisMonth => created_at >= now - Duration::days(30),
        }
    }
}

/// Share of parts price and labor counted as cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostPolicy {
    pub parts_cost_ratio: Decimal,
    pub labor_cost_ratio: Decimal,
}

impl Default for CostPolicy {
    fn default() -> Self {
        Self {
            parts_cost_ratio: dec!(0.7),
            labor_cost_ratio: dec!(0.5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekdayProfit {
    pub weekday: String,
    pub profit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub range: DateRange,
    pub total_revenue: Decimal,
    pub total_cost: Decimal,
    pub net_profit: Decimal,
    pub total_repairs: usize,
    /// Monday through Sunday
    pub weekly_profit: Vec<WeekdayProfit>,
    pub popular_models: Vec<RankedCount>,
    pub common_issues: Vec<RankedCount>,
    pub generated_at: DateTime<Utc>,
}

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Most frequent names first; equal counts sort by name.
fn top_counts<'a>(names: impl Iterator<Item = &'a str>) -> Vec<RankedCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in names {
        *counts.entry(name).or_default() += 1;
    }
    let mut ranked: Vec<RankedCount> = counts
        .into_iter()
        .map(|(name, count)| RankedCount {
            name: name.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    ranked.truncate(TOP_N);
    ranked
}

fn totals_overflow() -> ServiceError {
    ServiceError::InternalError("dashboard totals overflow".to_string())
}

/// Cost share of one ticket under `policy`.
fn ticket_cost(view: &RepairTicketView, policy: &CostPolicy) -> Option<Decimal> {
    let parts = view.parts_price()?.checked_mul(policy.parts_cost_ratio)?;
    let labor = view.ticket.labor_cost.checked_mul(policy.labor_cost_ratio)?;
    parts.checked_add(labor)
}

/// Projects the dashboard from every ticket.
///
/// Totals and rankings cover tickets created inside `range`. The weekday
/// profit series always covers completed tickets created in the trailing
/// 7 days, bucketed by creation weekday. Totals too large for `Decimal`
/// are an error.
pub fn project(
    views: &[RepairTicketView],
    range: DateRange,
    policy: &CostPolicy,
    now: DateTime<Utc>,
) -> Result<DashboardSummary, ServiceError> {
    let in_range: Vec<&RepairTicketView> = views
        .iter()
        .filter(|v| range.contains(v.ticket.created_at, now))
        .collect();

    let total_revenue = in_range
        .iter()
        .try_fold(Decimal::ZERO, |sum, v| sum.checked_add(v.ticket.total_cost))
        .ok_or_else(totals_overflow)?;
    let total_cost = in_range
        .iter()
        .try_fold(Decimal::ZERO, |sum, v| sum.checked_add(ticket_cost(v, policy)?))
        .ok_or_else(totals_overflow)?;
    let net_profit = total_revenue
        .checked_sub(total_cost)
        .ok_or_else(totals_overflow)?;

    let week_start = now - Duration::days(7);
    let mut by_day: HashMap<Weekday, Decimal> = HashMap::new();
    for view in views.iter().filter(|v| {
        v.ticket.status == TicketStatus::Completed && v.ticket.created_at >= week_start
    }) {
        let day = by_day.entry(view.ticket.created_at.weekday()).or_default();
        *day = day
            .checked_add(view.ticket.profit)
            .ok_or_else(totals_overflow)?;
    }
    let weekly_profit = WEEKDAYS
        .iter()
        .map(|day| WeekdayProfit {
            weekday: weekday_name(*day).to_string(),
            profit: by_day.get(day).copied().unwrap_or(Decimal::ZERO),
        })
        .collect();

    let popular_models = top_counts(in_range.iter().map(|v| {
        v.model
            .as_ref()
            .map(|m| m.name.as_str())
            .unwrap_or(UNKNOWN_LABEL)
    }));
    let common_issues = top_counts(in_range.iter().map(|v| {
        let issue = v.ticket.issue_type.as_str();
        if issue.trim().is_empty() {
            UNKNOWN_LABEL
        } else {
            issue
        }
    }));

    Ok(DashboardSummary {
        range,
        total_revenue,
        total_cost,
        net_profit,
        total_repairs: in_range.len(),
        weekly_profit,
        popular_models,
        common_issues,
        generated_at: now,
    })
}

#[derive(Clone)]
pub struct DashboardService {
    ledger: RepairLedger,
    policy: CostPolicy,
}

impl DashboardService {
    pub fn new(ledger: RepairLedger, policy: CostPolicy) -> Self {
        Self { ledger, policy }
    }

    #[instrument(skip(self))]
    pub async fn summary(&self, range: DateRange) -> Result<DashboardSummary, ServiceError> {
        let views = self.ledger.list_tickets().await?;
        project(&views, range, &self.policy, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{device_model, repair_part_usage, repair_ticket};
    use crate::services::ledger::PartUsageView;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn view(
        created_at: DateTime<Utc>,
        status: TicketStatus,
        model: Option<&str>,
        issue: &str,
        labor: Decimal,
        parts: &[(i32, Decimal)],
        profit: Decimal,
    ) -> RepairTicketView {
        let id = Uuid::new_v4();
        let repair_parts: Vec<PartUsageView> = parts
            .iter()
            .map(|(qty, price)| PartUsageView {
                usage: repair_part_usage::Model {
                    id: Uuid::new_v4(),
                    repair_id: id,
                    spare_part_id: Uuid::new_v4(),
                    quantity_used: *qty,
                    price_at_time: *price,
                    created_at,
                },
                spare_part_name: None,
            })
            .collect();
        let parts_price: Decimal = repair_parts
            .iter()
            .filter_map(|p| p.usage.line_total())
            .sum();
        RepairTicketView {
            ticket: repair_ticket::Model {
                id,
                customer_name: "c".into(),
                customer_phone: "p".into(),
                device_brand_id: Uuid::new_v4(),
                device_model_id: Uuid::new_v4(),
                issue_type: issue.into(),
                description: String::new(),
                labor_cost: labor,
                total_cost: labor + parts_price,
                profit,
                status,
                created_at,
                updated_at: created_at,
                completed_at: None,
            },
            brand: None,
            model: model.map(|name| device_model::Model {
                id: Uuid::new_v4(),
                name: name.into(),
                brand_id: Uuid::new_v4(),
                created_at,
            }),
            repair_parts,
        }
    }

    fn wednesday_noon() -> DateTime<Utc> {
        // 2024-06-12 was a Wednesday
        Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap()
    }

    #[test]
    fn totals_apply_cost_policy() {
        let now = wednesday_noon();
        let views = vec![view(
            now - Duration::hours(1),
            TicketStatus::Pending,
            Some("iPhone 12"),
            "screen",
            dec!(20),
            &[(2, dec!(50))],
            dec!(0),
        )];

        let summary = project(&views, DateRange::Today, &CostPolicy::default(), now).unwrap();
        assert_eq!(summary.total_revenue, dec!(120));
        // 0.7 * 100 + 0.5 * 20
        assert_eq!(summary.total_cost, dec!(80));
        assert_eq!(summary.net_profit, dec!(40));
        assert_eq!(summary.total_repairs, 1);
    }

    #[test]
    fn weekly_profit_counts_only_recent_completed_tickets_by_creation_day() {
        let now = wednesday_noon();
        let monday = now - Duration::days(2);
        let views = vec![
            view(monday, TicketStatus::Completed, None, "battery", dec!(0), &[], dec!(30)),
            view(monday, TicketStatus::InProgress, None, "battery", dec!(0), &[], dec!(99)),
            // Created eight days ago, completed recently: excluded
            view(now - Duration::days(8), TicketStatus::Completed, None, "x", dec!(0), &[], dec!(500)),
            view(now - Duration::hours(2), TicketStatus::Completed, None, "x", dec!(0), &[], dec!(5)),
        ];

        let summary = project(&views, DateRange::ThisMonth, &CostPolicy::default(), now).unwrap();
        let by_name: HashMap<_, _> = summary
            .weekly_profit
            .iter()
            .map(|d| (d.weekday.as_str(), d.profit))
            .collect();
        assert_eq!(summary.weekly_profit.len(), 7);
        assert_eq!(summary.weekly_profit[0].weekday, "monday");
        assert_eq!(by_name["monday"], dec!(30));
        assert_eq!(by_name["wednesday"], dec!(5));
        assert_eq!(by_name["tuesday"], dec!(0));
    }

    #[test]
    fn rankings_are_range_filtered_and_tie_broken_by_name() {
        let now = wednesday_noon();
        let recent = now - Duration::days(1);
        let views = vec![
            view(recent, TicketStatus::Pending, Some("Redmi 9"), "screen", dec!(0), &[], dec!(0)),
            view(recent, TicketStatus::Pending, Some("Galaxy A12"), "battery", dec!(0), &[], dec!(0)),
            view(recent, TicketStatus::Pending, Some("Redmi 9"), "screen", dec!(0), &[], dec!(0)),
            view(recent, TicketStatus::Pending, None, "", dec!(0), &[], dec!(0)),
            view(now - Duration::days(20), TicketStatus::Pending, Some("Old"), "water", dec!(0), &[], dec!(0)),
        ];

        let summary = project(&views, DateRange::ThisWeek, &CostPolicy::default(), now).unwrap();
        let models: Vec<_> = summary
            .popular_models
            .iter()
            .map(|r| (r.name.as_str(), r.count))
            .collect();
        assert_eq!(models, vec![("Redmi 9", 2), ("Galaxy A12", 1), ("Unknown", 1)]);
        assert_eq!(summary.common_issues[0].name, "screen");
        assert_eq!(summary.total_repairs, 4);
    }

    #[test]
    fn oversized_totals_are_an_error_not_a_panic() {
        let now = wednesday_noon();
        let huge = Decimal::MAX - dec!(1);
        let views = vec![
            view(now, TicketStatus::Completed, None, "x", huge, &[], dec!(0)),
            view(now, TicketStatus::Completed, None, "x", huge, &[], dec!(0)),
        ];

        let result = project(&views, DateRange::ThisMonth, &CostPolicy::default(), now);
        assert!(matches!(result, Err(ServiceError::InternalError(_))));
    }

    #[test]
    fn top_lists_keep_five_entries() {
        let ranked = top_counts(["a", "b", "c", "d", "e", "f", "a"].into_iter());
        assert_eq!(ranked.len(), 5);
        assert_eq!(ranked[0].name, "a");
        assert_eq!(ranked[4].name, "e");
    }
}
