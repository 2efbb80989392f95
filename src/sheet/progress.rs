//! Aggregation of per-unit progress into one overall value

use serde::{Deserialize, Serialize};

use super::CARDS_PER_PAGE;
use super::request::StatusMessage;

/// How per-unit progress folds into the overall percentage.
///
/// The two policies disagree whenever units have unequal page counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPolicy {
    /// Tickets rendered over tickets requested
    #[default]
    TicketCount,
    /// Mean of every unit's own page fraction
    WorkerAverage,
}

/// Overall progress snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    /// 0–100, rounded
    pub percent: u8,
    pub tickets_rendered: u64,
    pub tickets_total: u64,
}

impl Progress {
    #[must_use]
    pub fn percent_message(&self) -> StatusMessage {
        StatusMessage::Progress {
            value: self.percent,
        }
    }

    #[must_use]
    pub fn ticket_count_message(&self) -> StatusMessage {
        StatusMessage::TicketCount {
            value: self.tickets_rendered,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct UnitProgress {
    pages_done: usize,
    pages_total: usize,
}

/// Tracks what every unit has reported so far
#[derive(Debug)]
pub struct ProgressTracker {
    policy: ProgressPolicy,
    units: Vec<UnitProgress>,
    tickets_total: u64,
}

impl ProgressTracker {
    /// `unit_pages[i]` is the page count assigned to worker `i`.
    #[must_use]
    pub fn new(policy: ProgressPolicy, unit_pages: &[usize]) -> Self {
        let units = unit_pages
            .iter()
            .map(|&pages_total| UnitProgress {
                pages_done: 0,
                pages_total,
            })
            .collect();
        let tickets_total = unit_pages.iter().sum::<usize>() as u64 * CARDS_PER_PAGE as u64;

        Self {
            policy,
            units,
            tickets_total,
        }
    }

    /// Record that `unit` has finished `pages_done` pages and return the new
    /// overall snapshot. Unknown units are ignored.
    pub fn record(&mut self, unit: usize, pages_done: usize) -> Progress {
        if let Some(state) = self.units.get_mut(unit) {
            state.pages_done = pages_done.min(state.pages_total);
        }
        self.snapshot()
    }

    #[must_use]
    pub fn snapshot(&self) -> Progress {
        let tickets_rendered = self
            .units
            .iter()
            .map(|u| u.pages_done as u64 * CARDS_PER_PAGE as u64)
            .sum();

        let fraction = match self.policy {
            ProgressPolicy::TicketCount => {
                if self.tickets_total == 0 {
                    0.0
                } else {
                    tickets_rendered as f64 / self.tickets_total as f64
                }
            }
            ProgressPolicy::WorkerAverage => {
                let active: Vec<_> = self.units.iter().filter(|u| u.pages_total > 0).collect();
                if active.is_empty() {
                    0.0
                } else {
                    active
                        .iter()
                        .map(|u| u.pages_done as f64 / u.pages_total as f64)
                        .sum::<f64>()
                        / active.len() as f64
                }
            }
        };

        Progress {
            percent: (fraction * 100.0).round() as u8,
            tickets_rendered,
            tickets_total: self.tickets_total,
        }
    }
}
