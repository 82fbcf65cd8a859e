//! Per-target outcome counts.
//!
//! Counts are kept per target, in the order targets were first seen, and
//! rendered two ways: a recap table for humans and a status-keyed
//! transposition for the consumer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome counts for one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCounts {
    pub ok: u64,
    pub changed: u64,
    pub unreachable: u64,
    pub failed: u64,
    pub skipped: u64,
    pub ignored: u64,
}

/// Status-keyed view of the counts. Zero entries are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransposedStats {
    pub ok: BTreeMap<String, u64>,
    pub changed: BTreeMap<String, u64>,
    pub failures: BTreeMap<String, u64>,
    pub dark: BTreeMap<String, u64>,
    pub skipped: BTreeMap<String, u64>,
}

/// Accumulates [`HostCounts`] per target.
#[derive(Debug, Clone, Default)]
pub struct StatsCounter {
    hosts: Vec<(String, HostCounts)>,
}

impl StatsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one outcome into the target's counts.
    ///
    /// Failures are also counted as ignored: automation carries on past them.
    pub fn fold(&mut self, target: &str, success: bool, changed: bool) {
        let counts = self.entry(target);
        if success {
            counts.ok += 1;
            if changed {
                counts.changed += 1;
            }
        } else {
            counts.failed += 1;
            counts.ignored += 1;
        }
    }

    pub fn get(&self, target: &str) -> Option<&HostCounts> {
        self.hosts
            .iter()
            .find(|(name, _)| name == target)
            .map(|(_, counts)| counts)
    }

    /// Targets with their counts, in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostCounts)> {
        self.hosts.iter().map(|(name, counts)| (name.as_str(), counts))
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        self.hosts.iter().any(|(_, counts)| counts.failed > 0)
    }

    pub fn transpose(&self) -> TransposedStats {
        let mut out = TransposedStats::default();
        for (host, counts) in &self.hosts {
            for (bucket, count) in [
                (&mut out.ok, counts.ok),
                (&mut out.changed, counts.changed),
                (&mut out.failures, counts.failed),
                (&mut out.dark, counts.unreachable),
                (&mut out.skipped, counts.skipped),
            ] {
                if count > 0 {
                    bucket.insert(host.clone(), count);
                }
            }
        }
        out
    }

    /// The `PLAY RECAP` block, one line per target.
    pub fn render_recap(&self) -> String {
        let mut lines = vec![format!("\nPLAY RECAP {}", "*".repeat(65))];
        for (host, c) in &self.hosts {
            lines.push(format!(
                "{host:<26}: ok={:<4} changed={:<4} unreachable={:<4} failed={:<4} skipped={:<4}",
                c.ok, c.changed, c.unreachable, c.failed, c.skipped
            ));
        }
        lines.join("\n")
    }

    fn entry(&mut self, target: &str) -> &mut HostCounts {
        let index = match self.hosts.iter().position(|(name, _)| name == target) {
            Some(index) => index,
            None => {
                self.hosts.push((target.to_string(), HostCounts::default()));
                self.hosts.len() - 1
            }
        };
        &mut self.hosts[index].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changed_counts_only_on_success() {
        let mut stats = StatsCounter::new();
        stats.fold("h1", true, true);
        stats.fold("h1", false, true);

        let counts = stats.get("h1").unwrap();
        assert_eq!(counts.ok, 1);
        assert_eq!(counts.changed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.ignored, 1);
        assert!(stats.has_failures());
    }

    #[test]
    fn transpose_omits_zero_entries() {
        let mut stats = StatsCounter::new();
        stats.fold("h1", true, true);
        stats.fold("h1", true, false);
        stats.fold("h2", false, false);

        let t = stats.transpose();
        assert_eq!(t.ok, BTreeMap::from([("h1".to_string(), 2)]));
        assert_eq!(t.changed, BTreeMap::from([("h1".to_string(), 1)]));
        assert_eq!(t.failures, BTreeMap::from([("h2".to_string(), 1)]));
        assert!(t.dark.is_empty());
        assert!(t.skipped.is_empty());
    }

    #[test]
    fn transposed_stats_serialize_as_buckets() {
        let mut stats = StatsCounter::new();
        stats.fold("localhost", true, false);

        let value = serde_json::to_value(stats.transpose()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "ok": {"localhost": 1},
                "changed": {},
                "failures": {},
                "dark": {},
                "skipped": {},
            })
        );
    }

    #[test]
    fn recap_columns_are_padded() {
        let mut stats = StatsCounter::new();
        stats.fold("localhost", true, false);

        let recap = stats.render_recap();
        let lines: Vec<&str> = recap.lines().collect();
        assert_eq!(lines[0], "");
        assert_eq!(lines[1], format!("PLAY RECAP {}", "*".repeat(65)));
        assert_eq!(
            lines[2],
            format!(
                "{}: ok=1    changed=0    unreachable=0    failed=0    skipped=0   ",
                "localhost".to_string() + &" ".repeat(17)
            )
        );
    }

    #[test]
    fn targets_keep_first_seen_order() {
        let mut stats = StatsCounter::new();
        stats.fold("zeta", true, false);
        stats.fold("alpha", true, false);
        stats.fold("zeta", true, false);

        let order: Vec<&str> = stats.iter().map(|(name, _)| name).collect();
        assert_eq!(order, vec!["zeta", "alpha"]);
    }
}
