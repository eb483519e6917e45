//! Pager - one page of query results plus the total count

use crate::collection::EntitySet;

/// Snapshot of a paginated query
///
/// Pages are 1-based. The total is counted once, when the pager is built.
#[derive(Debug, Clone)]
pub struct Pager {
    page: u64,
    per_page: u64,
    total: u64,
    results: EntitySet,
}

impl Pager {
    pub fn new(page: u64, per_page: u64, total: u64, results: EntitySet) -> Self {
        Self {
            page,
            per_page,
            total,
            results,
        }
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn per_page(&self) -> u64 {
        self.per_page
    }

    /// Number of rows matching the query, across all pages
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn results(&self) -> &EntitySet {
        &self.results
    }

    pub fn into_results(self) -> EntitySet {
        self.results
    }

    pub fn first_page(&self) -> u64 {
        1
    }

    /// Zero when there are no results
    pub fn last_page(&self) -> u64 {
        if self.per_page == 0 {
            return 0;
        }
        self.total.div_ceil(self.per_page)
    }

    pub fn previous_page(&self) -> Option<u64> {
        (self.page > 1).then(|| self.page - 1)
    }

    pub fn next_page(&self) -> Option<u64> {
        (self.page < self.last_page()).then(|| self.page + 1)
    }

    /// More rows exist than fit on one page
    pub fn have_to_paginate(&self) -> bool {
        self.total > self.per_page
    }

    /// Up to `count` page numbers centered on the current page
    pub fn links(&self, count: u64) -> Vec<u64> {
        let last = self.last_page();
        if count == 0 || last == 0 {
            return Vec::new();
        }

        let highest_start = last.saturating_sub(count).saturating_add(1).max(1);
        let centered = self.page.saturating_sub(count / 2).max(1);
        let begin = centered.min(highest_start);

        (begin..begin + count).take_while(|p| *p <= last).collect()
    }
}
