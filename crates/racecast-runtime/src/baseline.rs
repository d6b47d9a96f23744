//! County baseline aggregation.
//!
//! The backend returns one row per division and candidate, sometimes with
//! repeats (one per reporting unit). Rows are folded into one
//! [`CountyBaselineResult`] per division, keeping first-seen order.

use std::collections::HashMap;
use std::sync::Arc;

use racecast_core::{BaselineVotes, CountyBaselineResult};

use crate::store::{BaselineRow, BaselineSource};

/// Fetches and folds baseline rows for a race.
#[derive(Clone)]
pub struct BaselineAggregator {
    source: Arc<dyn BaselineSource>,
}

impl BaselineAggregator {
    pub fn new(source: Arc<dyn BaselineSource>) -> Self {
        Self { source }
    }

    /// County baselines for a race.
    ///
    /// A failed read is logged and treated as "no baseline available":
    /// synthesis then falls back to state-level results.
    pub async fn fetch(&self, race_id: &str) -> Vec<CountyBaselineResult> {
        match self.source.fetch_county_rows(race_id).await {
            Ok(rows) => {
                let counties = aggregate_rows(&rows);
                if counties.is_empty() {
                    tracing::debug!(race_id, "No county baseline for race");
                } else {
                    tracing::debug!(
                        race_id,
                        rows = rows.len(),
                        counties = counties.len(),
                        "Loaded county baseline"
                    );
                }
                counties
            }
            Err(e) => {
                tracing::warn!(
                    race_id,
                    error = %e,
                    "County baseline read failed, continuing without baseline"
                );
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for BaselineAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaselineAggregator").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct DivisionAccumulator {
    division_id: String,
    division_name: String,
    reported_total: Option<u64>,
    precincts_reporting: u32,
    precincts_total: u32,
    candidates: Vec<BaselineVotes>,
    candidate_index: HashMap<String, usize>,
}

impl DivisionAccumulator {
    fn add(&mut self, row: &BaselineRow) {
        if self.division_name.trim().is_empty() {
            self.division_name = row.division_name.clone();
        }
        if let Some(total) = row.total_votes {
            self.reported_total = Some(self.reported_total.map_or(total, |t| t.max(total)));
        }
        if let Some(reporting) = row.precincts_reporting {
            self.precincts_reporting = self.precincts_reporting.max(reporting);
        }
        if let Some(total) = row.precincts_total {
            self.precincts_total = self.precincts_total.max(total);
        }

        match self.candidate_index.get(&row.candidate_source_id) {
            Some(&index) => self.candidates[index].votes += row.votes,
            None => {
                self.candidate_index
                    .insert(row.candidate_source_id.clone(), self.candidates.len());
                self.candidates.push(BaselineVotes {
                    source_id: row.candidate_source_id.clone(),
                    votes: row.votes,
                });
            }
        }
    }

    fn finish(self) -> CountyBaselineResult {
        let total_votes = self
            .reported_total
            .unwrap_or_else(|| self.candidates.iter().map(|c| c.votes).sum());

        CountyBaselineResult {
            division_name: if self.division_name.trim().is_empty() {
                self.division_id.clone()
            } else {
                self.division_name
            },
            division_id: self.division_id,
            precincts_reporting: self.precincts_reporting,
            precincts_total: self.precincts_total,
            total_votes,
            candidates: self.candidates,
        }
    }
}

/// Fold raw rows into one result per division.
///
/// Repeated rows for a division and candidate are summed. A division's total
/// is the largest total reported for it, or the sum of its candidates' votes
/// when none is reported.
pub fn aggregate_rows(rows: &[BaselineRow]) -> Vec<CountyBaselineResult> {
    let mut order: Vec<DivisionAccumulator> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for row in rows {
        let slot = *index.entry(row.division_id.as_str()).or_insert_with(|| {
            order.push(DivisionAccumulator {
                division_id: row.division_id.clone(),
                ..Default::default()
            });
            order.len() - 1
        });
        order[slot].add(row);
    }

    order.into_iter().map(DivisionAccumulator::finish).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBaselineSource;

    fn rows() -> Vec<BaselineRow> {
        vec![
            BaselineRow::new("c-2", "Berks", "src-a", 100),
            BaselineRow::new("c-1", "Adams", "src-b", 40),
            BaselineRow {
                total_votes: Some(200),
                precincts_reporting: Some(3),
                precincts_total: Some(5),
                ..BaselineRow::new("c-2", "Berks", "src-b", 60)
            },
            BaselineRow {
                total_votes: Some(150),
                precincts_reporting: Some(5),
                ..BaselineRow::new("c-2", "Berks", "src-a", 10)
            },
            BaselineRow::new("c-1", "Adams", "src-a", 35),
        ]
    }

    #[test]
    fn test_aggregate_keeps_first_seen_order() {
        let counties = aggregate_rows(&rows());
        let ids: Vec<_> = counties.iter().map(|c| c.division_id.as_str()).collect();
        assert_eq!(ids, vec!["c-2", "c-1"]);

        let berks_candidates: Vec<_> = counties[0]
            .candidates
            .iter()
            .map(|c| c.source_id.as_str())
            .collect();
        assert_eq!(berks_candidates, vec!["src-a", "src-b"]);
    }

    #[test]
    fn test_aggregate_sums_repeats_and_takes_largest_total() {
        let counties = aggregate_rows(&rows());
        let berks = &counties[0];

        assert_eq!(berks.votes_for("src-a"), Some(110));
        assert_eq!(berks.votes_for("src-b"), Some(60));
        assert_eq!(berks.total_votes, 200);
        assert_eq!(berks.precincts_reporting, 5);
        assert_eq!(berks.precincts_total, 5);
    }

    #[test]
    fn test_aggregate_sums_candidates_without_reported_total() {
        let counties = aggregate_rows(&rows());
        assert_eq!(counties[1].total_votes, 75);
        assert_eq!(counties[1].precincts_total, 0);
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(aggregate_rows(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_means_no_baseline() {
        let aggregator = BaselineAggregator::new(Arc::new(MemoryBaselineSource::failing()));
        assert!(aggregator.fetch("race-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_aggregates() {
        let source = MemoryBaselineSource::new().with_rows("race-1", rows());
        let aggregator = BaselineAggregator::new(Arc::new(source));

        assert_eq!(aggregator.fetch("race-1").await.len(), 2);
        assert!(aggregator.fetch("race-2").await.is_empty());
    }
}
