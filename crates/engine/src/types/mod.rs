//! Core types shared across the synchronization engine.

use serde::{Deserialize, Serialize};

pub mod error;

pub use error::{ApiClientError, SettingsError, StoreError, SyncError};

/// The three record streams pulled from the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Vulnerabilities,
    Remediations,
    Assets,
}

impl StreamKind {
    /// Plural name used in events and journal rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Vulnerabilities => "vulnerabilities",
            StreamKind::Remediations => "remediations",
            StreamKind::Assets => "assets",
        }
    }

    /// Singular name used when wrapping flush errors.
    pub fn singular(&self) -> &'static str {
        match self {
            StreamKind::Vulnerabilities => "vulnerability",
            StreamKind::Remediations => "remediation",
            StreamKind::Assets => "asset",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinal severity classification reported by scanner integrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
    Unknown,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
            Severity::Unknown => "UNKNOWN",
        }
    }

    /// Sort rank: CRITICAL orders first, unrecognized values last.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 1,
            Severity::High => 2,
            Severity::Medium => 3,
            Severity::Low => 4,
            Severity::Info => 5,
            Severity::Unknown => 6,
        }
    }

    /// Case-insensitive parse; anything unrecognized maps to `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" => Severity::Medium,
            "LOW" => Severity::Low,
            "INFO" => Severity::Info,
            _ => Severity::Unknown,
        }
    }
}

/// Classification counters returned by a batch upsert.
///
/// `remediated` stays zero for streams that have no deactivation concept
/// (remediations, assets).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub new: u64,
    pub updated: u64,
    pub remediated: u64,
    pub total: u64,
}

impl BatchStats {
    /// Fold another batch's counters into this running total.
    pub fn absorb(&mut self, other: BatchStats) {
        self.new += other.new;
        self.updated += other.updated;
        self.remediated += other.remediated;
        self.total += other.total;
    }
}

/// Final per-stream counters returned by a completed sync session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub vulnerabilities: BatchStats,
    pub remediations: BatchStats,
    pub assets: BatchStats,
}

/// Lifecycle state of the sync orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Running,
    Paused,
    Stopping,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Running => "running",
            SyncState::Paused => "paused",
            SyncState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_parse_is_case_insensitive() {
        assert_eq!(Severity::parse("critical"), Severity::Critical);
        assert_eq!(Severity::parse(" HIGH "), Severity::High);
        assert_eq!(Severity::parse("bogus"), Severity::Unknown);
        assert_eq!(Severity::parse(""), Severity::Unknown);
    }

    #[test]
    fn severity_rank_orders_critical_first() {
        assert!(Severity::Critical.rank() < Severity::High.rank());
        assert!(Severity::Info.rank() < Severity::Unknown.rank());
    }

    #[test]
    fn batch_stats_absorb_accumulates() {
        let mut total = BatchStats::default();
        total.absorb(BatchStats {
            new: 3,
            updated: 1,
            remediated: 1,
            total: 4,
        });
        total.absorb(BatchStats {
            new: 0,
            updated: 2,
            remediated: 0,
            total: 2,
        });
        assert_eq!(total.new, 3);
        assert_eq!(total.updated, 3);
        assert_eq!(total.remediated, 1);
        assert_eq!(total.total, 6);
    }

    #[test]
    fn stream_kind_names() {
        assert_eq!(StreamKind::Vulnerabilities.as_str(), "vulnerabilities");
        assert_eq!(StreamKind::Vulnerabilities.singular(), "vulnerability");
        assert_eq!(StreamKind::Assets.singular(), "asset");
    }
}
