//! joints.rs
//! Joint selection patterns and the inactive-joint override table.
//!
//! Pattern grammar (comma separated union of tokens):
//!   `"3"` single joint, `"3-7"` inclusive range, `"-3"` = `0-3`,
//!   `"10-"` = `10-(dof-1)`, `"-"` = every joint.
//! Unparseable tokens and indices outside `[0, dof)` are skipped, never rejected.

use std::collections::BTreeSet;

use log::warn;

use crate::config::InactiveJointConfig;

/// Resolves `pattern` to a sorted, de-duplicated list of joint indices.
pub fn parse_lenient(pattern: &str, dof: usize) -> Vec<usize> {
    let mut selected = BTreeSet::new();
    if dof == 0 {
        return Vec::new();
    }
    let last = dof - 1;

    for token in pattern.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.split_once('-') {
            Some((lo, hi)) => {
                let lo = match lo.trim() {
                    "" => Some(0),
                    s => s.parse::<usize>().ok(),
                };
                let hi = match hi.trim() {
                    "" => Some(last),
                    s => s.parse::<usize>().ok(),
                };
                if let (Some(lo), Some(hi)) = (lo, hi) {
                    selected.extend(lo..=hi.min(last));
                }
            }
            None => {
                if let Ok(i) = token.parse::<usize>() {
                    if i < dof {
                        selected.insert(i);
                    }
                }
            }
        }
    }
    selected.into_iter().collect()
}

/// Override pressures applied to a joint instead of its feedback command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InactiveJoint {
    pub index: usize,
    pub pa: f64,
    pub pb: f64,
}

/// Unique by index; the most recent assignment for an index wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InactiveJointTable {
    dof: usize,
    rows: Vec<InactiveJoint>,
}

impl InactiveJointTable {
    pub fn new(dof: usize) -> Self {
        Self { dof, rows: Vec::new() }
    }

    pub fn dof(&self) -> usize {
        self.dof
    }

    pub fn rows(&self) -> &[InactiveJoint] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn reset(&mut self) {
        self.rows.clear();
    }

    /// Replaces the table with the joints matched by `pattern`.
    pub fn set(&mut self, pattern: &str, pressure: f64) {
        self.reset();
        self.add(pattern, pressure);
    }

    /// Adds (or overwrites) the joints matched by `pattern`.
    pub fn add(&mut self, pattern: &str, pressure: f64) {
        let indices = parse_lenient(pattern, self.dof);
        self.insert_all(&indices, pressure);
    }

    /// Marks every joint NOT matched by `pattern` inactive.
    pub fn set_active(&mut self, pattern: &str, pressure: f64) {
        let active = parse_lenient(pattern, self.dof);
        let inactive: Vec<usize> = (0..self.dof).filter(|i| !active.contains(i)).collect();
        self.reset();
        self.insert_all(&inactive, pressure);
    }

    /// Removes the joints matched by `pattern` from the table.
    pub fn add_active(&mut self, pattern: &str) {
        let active = parse_lenient(pattern, self.dof);
        self.rows.retain(|r| !active.contains(&r.index));
    }

    pub fn load(&mut self, entries: &[InactiveJointConfig]) {
        for entry in entries {
            match entry.index.as_pattern() {
                Some(pattern) => self.add(&pattern, entry.pressure),
                None => warn!("inactive joint index ignored: {:?}", entry.index),
            }
        }
    }

    fn insert_all(&mut self, indices: &[usize], pressure: f64) {
        self.rows.retain(|r| !indices.contains(&r.index));
        self.rows.extend(indices.iter().map(|&index| InactiveJoint {
            index,
            pa: pressure,
            pb: pressure,
        }));
    }

    pub fn indices(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.index).collect()
    }

    pub fn active_indices(&self) -> Vec<usize> {
        (0..self.dof)
            .filter(|i| !self.rows.iter().any(|r| r.index == *i))
            .collect()
    }

    /// Overwrites the commands of inactive joints with their override pressures.
    pub fn mask(&self, ca: &mut [f64], cb: &mut [f64]) {
        for r in &self.rows {
            if let (Some(a), Some(b)) = (ca.get_mut(r.index), cb.get_mut(r.index)) {
                *a = r.pa;
                *b = r.pb;
            }
        }
    }
}
