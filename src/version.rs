//! Component versions
//!
//! `VersionKey` makes "no version", semantic versions and arbitrary strings
//! mutually orderable so a catalog can resolve the newest entry for a key.

use semver::{Prerelease, Version};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Numeric release segments plus an optional pre-release tag
///
/// Trailing zero segments are dropped, so `1`, `1.0` and `1.0.0` are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    parts: Vec<u64>,
    pre: Prerelease,
}

impl Release {
    fn new(mut parts: Vec<u64>, pre: Prerelease) -> Self {
        while parts.len() > 1 && parts.last() == Some(&0) {
            parts.pop();
        }
        Self { parts, pre }
    }

    /// Parse strict SemVer, then any dotted run of integers with an optional
    /// `-pre` and `+build` suffix. Leading zeros are accepted.
    fn parse(raw: &str) -> Option<Self> {
        if let Ok(v) = Version::parse(raw) {
            return Some(Self::new(vec![v.major, v.minor, v.patch], v.pre));
        }

        let (rest, _build) = raw.split_once('+').unwrap_or((raw, ""));
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => (core, Prerelease::new(pre).ok()?),
            None => (rest, Prerelease::EMPTY),
        };
        let parts = core
            .split('.')
            .map(|p| {
                if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                p.parse::<u64>().ok()
            })
            .collect::<Option<Vec<u64>>>()?;
        Some(Self::new(parts, pre))
    }
}

impl Ord for Release {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.parts.len().max(other.parts.len());
        let segment = |parts: &[u64], i: usize| parts.get(i).copied().unwrap_or(0);
        (0..width)
            .map(|i| segment(&self.parts, i).cmp(&segment(&other.parts, i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.pre.cmp(&other.pre))
    }
}

impl PartialOrd for Release {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.parts.iter().map(u64::to_string).collect();
        write!(f, "{}", parts.join("."))?;
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre)?;
        }
        Ok(())
    }
}

/// Comparable wrapper around an optional version string
///
/// Ordering: `Unversioned` < `Numeric` < `Text` (lexicographic on the raw
/// string).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionKey {
    Unversioned,
    Numeric(Release),
    Text(String),
}

impl VersionKey {
    /// Derive a key from an optional version string
    pub fn new(version: Option<&str>) -> Self {
        match version {
            None => Self::Unversioned,
            Some(raw) => match Release::parse(raw.trim_start_matches('v')) {
                Some(release) => Self::Numeric(release),
                None => Self::Text(raw.to_string()),
            },
        }
    }

    pub fn is_unversioned(&self) -> bool {
        matches!(self, Self::Unversioned)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Unversioned => 0,
            Self::Numeric(_) => 1,
            Self::Text(_) => 2,
        }
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Numeric(a), Self::Numeric(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unversioned => write!(f, "<unversioned>"),
            Self::Numeric(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Compare two optional version strings
pub fn compare_versions(a: Option<&str>, b: Option<&str>) -> Ordering {
    VersionKey::new(a).cmp(&VersionKey::new(b))
}

/// Version constraint used by lookups and version-range transforms
///
/// An empty spec matches everything. Unversioned components always match
/// range bounds but never an exact pin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionSpec {
    /// Exact version pin
    pub eq: Option<String>,
    /// Inclusive lower bound
    pub gte: Option<String>,
    /// Exclusive upper bound
    pub lt: Option<String>,
}

impl VersionSpec {
    pub fn exact(version: impl Into<String>) -> Self {
        Self {
            eq: Some(version.into()),
            ..Default::default()
        }
    }

    pub fn range(gte: Option<String>, lt: Option<String>) -> Self {
        Self { eq: None, gte, lt }
    }

    pub fn is_empty(&self) -> bool {
        self.eq.is_none() && self.gte.is_none() && self.lt.is_none()
    }

    pub fn matches(&self, version: Option<&str>) -> bool {
        let key = VersionKey::new(version);
        if let Some(eq) = &self.eq {
            if key != VersionKey::new(Some(eq)) {
                return false;
            }
        }
        if key.is_unversioned() {
            return true;
        }
        if let Some(gte) = &self.gte {
            if key < VersionKey::new(Some(gte)) {
                return false;
            }
        }
        if let Some(lt) = &self.lt {
            if key >= VersionKey::new(Some(lt)) {
                return false;
            }
        }
        true
    }

    /// Narrow this spec by another: the tighter bound wins on each side.
    pub fn intersect(&self, other: &VersionSpec) -> VersionSpec {
        let gte = match (&self.gte, &other.gte) {
            (Some(a), Some(b)) => Some(if compare_versions(Some(a), Some(b)).is_ge() {
                a.clone()
            } else {
                b.clone()
            }),
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        let lt = match (&self.lt, &other.lt) {
            (Some(a), Some(b)) => Some(if compare_versions(Some(a), Some(b)).is_le() {
                a.clone()
            } else {
                b.clone()
            }),
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        VersionSpec {
            eq: self.eq.clone().or_else(|| other.eq.clone()),
            gte,
            lt,
        }
    }
}

/// Anything that lives in a catalog under a key and optional version
pub trait Versioned {
    fn key(&self) -> &str;
    fn version(&self) -> Option<&str>;

    fn version_key(&self) -> VersionKey {
        VersionKey::new(self.version())
    }
}

/// Pick the highest version among candidates
pub fn select_latest<T: Versioned>(candidates: impl IntoIterator<Item = T>) -> Option<T> {
    candidates
        .into_iter()
        .max_by(|a, b| a.version_key().cmp(&b.version_key()))
}

/// Keep only the highest version of each key, in first-seen key order
pub fn dedupe_latest<T: Versioned>(items: Vec<T>) -> Vec<T> {
    let mut slots: Vec<Option<T>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for item in items {
        match index.get(item.key()) {
            Some(&i) => {
                let newer = slots[i]
                    .as_ref()
                    .map(|current| item.version_key() > current.version_key())
                    .unwrap_or(true);
                if newer {
                    slots[i] = Some(item);
                }
            }
            None => {
                index.insert(item.key().to_string(), slots.len());
                slots.push(Some(item));
            }
        }
    }

    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Entry(&'static str, Option<&'static str>);

    impl Versioned for Entry {
        fn key(&self) -> &str {
            self.0
        }
        fn version(&self) -> Option<&str> {
            self.1
        }
    }

    #[test]
    fn test_compare_basic() {
        assert_eq!(compare_versions(Some("1.0"), Some("2.0")), Ordering::Less);
        assert_eq!(compare_versions(Some("2.0"), Some("1.0")), Ordering::Greater);
        assert_eq!(compare_versions(None, Some("1.0")), Ordering::Less);
        assert_eq!(compare_versions(None, None), Ordering::Equal);
    }

    #[test]
    fn test_v_prefix_and_padding() {
        assert_eq!(VersionKey::new(Some("v1.0")), VersionKey::new(Some("1.0")));
        assert_eq!(VersionKey::new(Some("1")), VersionKey::new(Some("1.0.0")));
        assert_eq!(VersionKey::new(Some("1.0-beta")), VersionKey::new(Some("1.0.0-beta")));
        assert_eq!(VersionKey::new(Some("1.0-beta")).to_string(), "1-beta");
    }

    #[test]
    fn test_leading_zeros_and_long_releases() {
        assert_eq!(compare_versions(Some("1.01"), Some("1.2")), Ordering::Less);
        assert_eq!(compare_versions(Some("2024.01"), Some("2025.1")), Ordering::Less);
        assert_eq!(compare_versions(Some("1.2.3.4"), Some("2.0")), Ordering::Less);
        assert_eq!(compare_versions(Some("1.2.3.4"), Some("1.2.3")), Ordering::Greater);
        assert_eq!(compare_versions(Some("01.0"), Some("1")), Ordering::Equal);
    }

    #[test]
    fn test_text_keeps_raw_string() {
        assert_eq!(VersionKey::new(Some("vnext")), VersionKey::Text("vnext".to_string()));
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        assert_eq!(compare_versions(Some("1.10"), Some("1.9")), Ordering::Greater);
        assert_eq!(compare_versions(Some("1.0.0-alpha"), Some("1.0.0")), Ordering::Less);
    }

    #[test]
    fn test_none_sorts_lowest() {
        for v in ["0.0.1", "1.0", "latest", "zzz", ""] {
            assert!(VersionKey::Unversioned < VersionKey::new(Some(v)), "{v}");
        }
    }

    #[test]
    fn test_semantic_below_text() {
        assert!(VersionKey::new(Some("99.0")) < VersionKey::new(Some("alpha")));
        assert!(VersionKey::new(Some("alpha")) < VersionKey::new(Some("beta")));
        assert_ne!(VersionKey::new(Some("1.0")), VersionKey::new(Some("one")));
    }

    #[test]
    fn test_spec_matching() {
        let below_two = VersionSpec::range(None, Some("2.0".into()));
        assert!(below_two.matches(Some("1.5")));
        assert!(!below_two.matches(Some("2.0")));
        assert!(below_two.matches(None));

        let from_one = VersionSpec::range(Some("1.0".into()), None);
        assert!(from_one.matches(Some("v1.0")));
        assert!(!from_one.matches(Some("0.9")));

        let pinned = VersionSpec::exact("1.0");
        assert!(pinned.matches(Some("1.0.0")));
        assert!(!pinned.matches(None));
        assert!(VersionSpec::default().is_empty());
    }

    #[test]
    fn test_intersect_takes_tighter_bounds() {
        let a = VersionSpec::range(Some("1.0".into()), Some("3.0".into()));
        let b = VersionSpec::range(Some("1.5".into()), Some("4.0".into()));
        let both = a.intersect(&b);
        assert_eq!(both.gte.as_deref(), Some("1.5"));
        assert_eq!(both.lt.as_deref(), Some("3.0"));
    }

    #[test]
    fn test_dedupe_latest_keeps_order() {
        let items = vec![
            Entry("b", Some("1.0")),
            Entry("a", Some("2.0")),
            Entry("b", Some("3.0")),
            Entry("a", None),
        ];
        let latest = dedupe_latest(items);
        assert_eq!(latest.len(), 2);
        assert_eq!((latest[0].0, latest[0].1), ("b", Some("3.0")));
        assert_eq!((latest[1].0, latest[1].1), ("a", Some("2.0")));
    }

    #[test]
    fn test_select_latest() {
        let best = select_latest(vec![Entry("a", Some("1.0")), Entry("a", Some("1.2"))]);
        assert_eq!(best.unwrap().1, Some("1.2"));
        assert!(select_latest(Vec::<Entry>::new()).is_none());
    }
}
