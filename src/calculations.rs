// src/calculations.rs - Per-quarter aggregation of portfolio constituents
use std::collections::HashMap;

use crate::models::{PortfolioConstituent, QuarterSummary};

#[derive(Debug, Default)]
struct QuarterAccumulator {
    count: usize,
    returns_sum: f64,
    weight_sum: f64,
}

pub struct QuarterAggregator;

impl QuarterAggregator {
    /// Group constituents by quarter in a single pass.
    ///
    /// Output order is the order in which each quarter is first seen in the
    /// input, independent of how the remote store sorted the rows.
    pub fn summarize(constituents: &[PortfolioConstituent]) -> Vec<QuarterSummary> {
        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, QuarterAccumulator> = HashMap::new();

        for item in constituents {
            let acc = groups.entry(item.quarter.as_str()).or_insert_with(|| {
                order.push(item.quarter.as_str());
                QuarterAccumulator::default()
            });
            acc.count += 1;
            acc.returns_sum += item.returns;
            acc.weight_sum += item.weight;
        }

        order
            .into_iter()
            .filter_map(|quarter| {
                groups.remove(quarter).map(|acc| QuarterSummary {
                    quarter: quarter.to_string(),
                    total_stocks: acc.count,
                    avg_returns: acc.returns_sum / acc.count as f64,
                    total_weight: acc.weight_sum,
                })
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    pub(crate) fn constituent(
        id: i64,
        quarter: &str,
        weight: f64,
        returns: f64,
    ) -> PortfolioConstituent {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        PortfolioConstituent {
            id,
            user_id: None,
            quarter: quarter.to_string(),
            stock_name: format!("Stock {}", id),
            stock_code: format!("S{}", id),
            logo_url: None,
            weight,
            returns,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let rows = vec![
            constituent(1, "Q1", 0.5, 10.0),
            constituent(2, "Q1", 0.3, 20.0),
            constituent(3, "Q2", 1.0, 5.0),
        ];

        let summary = QuarterAggregator::summarize(&rows);

        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].quarter, "Q1");
        assert_eq!(summary[0].total_stocks, 2);
        assert!((summary[0].avg_returns - 15.0).abs() < 1e-10);
        assert!((summary[0].total_weight - 0.8).abs() < 1e-10);
        assert_eq!(summary[1].quarter, "Q2");
        assert_eq!(summary[1].total_stocks, 1);
        assert!((summary[1].avg_returns - 5.0).abs() < 1e-10);
        assert!((summary[1].total_weight - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_interleaved_quarters_keep_first_occurrence() {
        let rows = vec![
            constituent(1, "2024Q2", 0.2, 1.0),
            constituent(2, "2024Q1", 0.4, 3.0),
            constituent(3, "2024Q2", 0.2, 2.0),
        ];

        let quarters: Vec<String> = QuarterAggregator::summarize(&rows)
            .into_iter()
            .map(|s| s.quarter)
            .collect();
        assert_eq!(quarters, vec!["2024Q2", "2024Q1"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(QuarterAggregator::summarize(&[]).is_empty());
    }
}
