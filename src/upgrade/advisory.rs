use crate::upgrade::catalog::VersionStep;
use crate::version::{UpgradeWindow, Version};

/// A release span across which the web UI's cached assets go stale.
#[derive(Debug, Clone)]
pub struct CacheInterval {
    pub from: Version,
    pub to: Version,
}

impl VersionStep for CacheInterval {
    fn from_version(&self) -> &Version {
        &self.from
    }

    fn to_version(&self) -> &Version {
        &self.to
    }
}

pub static CLEAR_BROWSER_CACHE: &[CacheInterval] = &[
    CacheInterval {
        from: Version::new(0, 15, 0),
        to: Version::new(0, 16, 0),
    },
    CacheInterval {
        from: Version::new(0, 16, 0),
        to: Version::new(0, 17, 0),
    },
];

/// Decides whether operators must clear their browser cache after an upgrade.
pub struct BrowserCacheAdvisory<'a> {
    intervals: &'a [CacheInterval],
}

impl<'a> BrowserCacheAdvisory<'a> {
    pub fn new(intervals: &'a [CacheInterval]) -> Self {
        Self { intervals }
    }

    /// True when any interval lies entirely inside the upgrade window.
    pub fn needed(&self, window: &UpgradeWindow) -> bool {
        self.intervals
            .iter()
            .any(|interval| window.covers(interval.from_version(), interval.to_version()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::catalog::select_applicable;
    use proptest::prelude::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn window(from: &str, to: &str) -> UpgradeWindow {
        UpgradeWindow::new(v(from), v(to)).unwrap()
    }

    fn interval(from: &str, to: &str) -> CacheInterval {
        CacheInterval {
            from: v(from),
            to: v(to),
        }
    }

    #[test]
    fn test_empty_list_never_advises() {
        let advisory = BrowserCacheAdvisory::new(&[]);
        assert!(!advisory.needed(&window("1.0.0", "2.0.0")));
    }

    #[test]
    fn test_covered_interval_advises() {
        let intervals = [interval("1.0.0", "2.0.0")];
        let advisory = BrowserCacheAdvisory::new(&intervals);
        assert!(advisory.needed(&window("1.0.0", "2.0.0")));
        assert!(advisory.needed(&window("0.9.0", "2.1.0")));
    }

    #[test]
    fn test_partially_covered_interval_does_not_advise() {
        let intervals = [interval("1.0.0", "2.0.0")];
        let advisory = BrowserCacheAdvisory::new(&intervals);
        assert!(!advisory.needed(&window("1.0.0", "1.5.0")));
        assert!(!advisory.needed(&window("1.5.0", "2.0.0")));
        assert!(!advisory.needed(&window("1.0.0", "1.0.0")));
    }

    proptest! {
        #[test]
        fn prop_needed_matches_catalog_predicate(
            spans in prop::collection::vec((0u64..10, 1u64..4), 0..6),
            old in 0u64..12,
            len in 0u64..12,
        ) {
            let intervals: Vec<CacheInterval> = spans
                .iter()
                .map(|(from, n)| interval(&format!("0.{}.0", from), &format!("0.{}.0", from + n)))
                .collect();
            let w = window(&format!("0.{}.0", old), &format!("0.{}.0", old + len));
            let advisory = BrowserCacheAdvisory::new(&intervals);
            prop_assert_eq!(advisory.needed(&w), !select_applicable(&intervals, &w).is_empty());
        }
    }
}
