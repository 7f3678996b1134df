//! Quota guard: admission control for new jobs.
//!
//! Admission is authoritative for job creation but only advisory for
//! usage: the per-page debit happens when pages are actually processed,
//! through the same `UsageTracker` collaborator, so estimates never
//! double-count against charged usage.

use crate::error::AdmissionError;
use crate::store::{FileSpec, JobSpec};

pub const MIN_PRIORITY: i64 = 1;
pub const MAX_PRIORITY: i64 = 10;

/// External usage/plan collaborator. The orchestrator never mutates an
/// owner's balance directly.
pub trait UsageTracker: Send + Sync {
    /// Pages the owner may still process under the current plan.
    fn remaining_pages(&self, owner_id: &str) -> std::result::Result<u64, String>;

    /// Whether the owner is on the lowest plan tier (drives the
    /// upgrade hint on denial).
    fn on_lowest_tier(&self, owner_id: &str) -> bool;

    /// Debits actually processed pages. Called per completed file.
    fn debit_pages(&self, owner_id: &str, pages: u64);
}

impl<T: UsageTracker + ?Sized> UsageTracker for std::sync::Arc<T> {
    fn remaining_pages(&self, owner_id: &str) -> std::result::Result<u64, String> {
        (**self).remaining_pages(owner_id)
    }

    fn on_lowest_tier(&self, owner_id: &str) -> bool {
        (**self).on_lowest_tier(owner_id)
    }

    fn debit_pages(&self, owner_id: &str, pages: u64) {
        (**self).debit_pages(owner_id, pages)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub pages_remaining: u64,
    pub requires_upgrade: bool,
}

/// Validates a prospective job against shape rules and the owner's
/// remaining page allowance.
pub struct QuotaGuard<U> {
    usage: U,
}

impl<U: UsageTracker> QuotaGuard<U> {
    pub fn new(usage: U) -> Self {
        Self { usage }
    }

    pub fn usage(&self) -> &U {
        &self.usage
    }

    /// Admission check: estimates the page cost of the job and denies
    /// creation when it would exceed the owner's allowance. Degenerate
    /// submissions (no files, bad priority, merge without a format)
    /// are rejected here rather than defaulting downstream.
    pub fn admit(
        &self,
        spec: &JobSpec,
        files: &[FileSpec],
    ) -> std::result::Result<Admission, AdmissionError> {
        if files.is_empty() {
            return Err(AdmissionError::EmptyJob);
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&spec.priority) {
            return Err(AdmissionError::InvalidPriority(spec.priority));
        }
        if spec.merge_requested && spec.merge_format.is_none() {
            return Err(AdmissionError::MissingMergeFormat);
        }

        // Same heuristic the store uses for total_pages, so admission
        // estimates and stored totals cannot drift apart.
        let estimated: u64 = files.iter().map(FileSpec::estimate_pages).sum();

        let remaining = self
            .usage
            .remaining_pages(&spec.owner_id)
            .map_err(|reason| AdmissionError::UsageLookup {
                owner: spec.owner_id.clone(),
                reason,
            })?;

        if estimated > remaining {
            let requires_upgrade = self.usage.on_lowest_tier(&spec.owner_id);
            log::info!(
                "Denied job for owner {}: {} pages estimated, {} remaining",
                spec.owner_id,
                estimated,
                remaining
            );
            return Err(AdmissionError::QuotaExceeded {
                requested: estimated,
                remaining,
                requires_upgrade,
            });
        }

        Ok(Admission {
            allowed: true,
            pages_remaining: remaining - estimated,
            requires_upgrade: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    pub(crate) struct FixedUsage {
        pub remaining: u64,
        pub lowest_tier: bool,
        pub debited: AtomicU64,
    }

    impl FixedUsage {
        pub fn new(remaining: u64) -> Self {
            Self {
                remaining,
                lowest_tier: false,
                debited: AtomicU64::new(0),
            }
        }
    }

    impl UsageTracker for FixedUsage {
        fn remaining_pages(&self, _owner_id: &str) -> std::result::Result<u64, String> {
            Ok(self.remaining)
        }

        fn on_lowest_tier(&self, _owner_id: &str) -> bool {
            self.lowest_tier
        }

        fn debit_pages(&self, _owner_id: &str, pages: u64) {
            self.debited.fetch_add(pages, Ordering::SeqCst);
        }
    }

    fn spec(priority: i64) -> JobSpec {
        JobSpec {
            owner_id: "owner-1".to_string(),
            name: "batch".to_string(),
            priority,
            merge_requested: false,
            merge_format: None,
        }
    }

    fn files(pages: &[u64]) -> Vec<FileSpec> {
        pages
            .iter()
            .enumerate()
            .map(|(i, p)| FileSpec {
                filename: format!("doc-{}.pdf", i),
                byte_size: 1000,
                estimated_pages: Some(*p),
            })
            .collect()
    }

    #[test]
    fn test_admit_within_quota() {
        let guard = QuotaGuard::new(FixedUsage::new(100));
        let admission = guard.admit(&spec(5), &files(&[10, 20])).unwrap();
        assert!(admission.allowed);
        assert_eq!(admission.pages_remaining, 70);
        assert!(!admission.requires_upgrade);
    }

    #[test]
    fn test_deny_over_quota() {
        let guard = QuotaGuard::new(FixedUsage::new(25));
        let err = guard.admit(&spec(5), &files(&[10, 20])).unwrap_err();
        match err {
            AdmissionError::QuotaExceeded {
                requested,
                remaining,
                requires_upgrade,
            } => {
                assert_eq!(requested, 30);
                assert_eq!(remaining, 25);
                assert!(!requires_upgrade);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_deny_signals_upgrade_on_lowest_tier() {
        let mut usage = FixedUsage::new(5);
        usage.lowest_tier = true;
        let guard = QuotaGuard::new(usage);
        let err = guard.admit(&spec(5), &files(&[10])).unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::QuotaExceeded {
                requires_upgrade: true,
                ..
            }
        ));
    }

    #[test]
    fn test_reject_empty_job() {
        let guard = QuotaGuard::new(FixedUsage::new(100));
        assert!(matches!(
            guard.admit(&spec(5), &[]).unwrap_err(),
            AdmissionError::EmptyJob
        ));
    }

    #[test]
    fn test_reject_priority_out_of_range() {
        let guard = QuotaGuard::new(FixedUsage::new(100));
        assert!(matches!(
            guard.admit(&spec(0), &files(&[1])).unwrap_err(),
            AdmissionError::InvalidPriority(0)
        ));
        assert!(matches!(
            guard.admit(&spec(11), &files(&[1])).unwrap_err(),
            AdmissionError::InvalidPriority(11)
        ));
    }

    #[test]
    fn test_reject_merge_without_format() {
        let guard = QuotaGuard::new(FixedUsage::new(100));
        let mut s = spec(5);
        s.merge_requested = true;
        assert!(matches!(
            guard.admit(&s, &files(&[1])).unwrap_err(),
            AdmissionError::MissingMergeFormat
        ));
    }

    #[test]
    fn test_byte_size_heuristic_when_no_estimate() {
        let guard = QuotaGuard::new(FixedUsage::new(2));
        let file = FileSpec {
            filename: "big.pdf".to_string(),
            byte_size: 200_000,
            estimated_pages: None,
        };
        // 200 KB -> 3 pages, over the 2 remaining.
        assert!(guard.admit(&spec(5), &[file]).is_err());
    }
}
