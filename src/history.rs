// src/history.rs
//! In-memory ring of recent cycle reports, served on `/cycles`.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::pipeline::{CycleReport, CycleScope};

#[derive(Debug)]
pub struct CycleHistory {
    inner: Mutex<VecDeque<CycleReport>>,
    cap: usize,
}

impl CycleHistory {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    pub fn push(&self, report: CycleReport) {
        let mut v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        v.push_back(report);
        while v.len() > self.cap {
            v.pop_front();
        }
    }

    /// Newest last.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<CycleReport> {
        let v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let start = v.len().saturating_sub(n);
        v.iter().skip(start).cloned().collect()
    }

    pub fn last(&self, scope: CycleScope) -> Option<CycleReport> {
        let v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        v.iter().rev().find(|r| r.scope == scope).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
