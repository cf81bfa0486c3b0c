use std::ops::RangeInclusive;

/// A set of inclusive HTTP status code ranges.
///
/// Used to classify responses: which statuses carry JSON, which are errors,
/// which are acceptable and which may be cached.
///
/// # Example
/// ```
/// use connector_kit::http::StatusRanges;
///
/// let ranges = StatusRanges::new([200..=204, 304..=304]);
/// assert!(ranges.contains(204));
/// assert!(!ranges.contains(301));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusRanges(Vec<RangeInclusive<u16>>);

impl StatusRanges {
    pub fn new(ranges: impl IntoIterator<Item = RangeInclusive<u16>>) -> Self {
        Self(ranges.into_iter().collect())
    }

    /// Matches exactly one status.
    pub fn single(status: u16) -> Self {
        Self(vec![status..=status])
    }

    /// Matches nothing.
    pub fn none() -> Self {
        Self(Vec::new())
    }

    /// Matches all 2xx statuses.
    pub fn success() -> Self {
        Self(vec![200..=299])
    }

    /// Matches all 4xx and 5xx statuses.
    pub fn failure() -> Self {
        Self(vec![400..=599])
    }

    /// Adds another range.
    pub fn with(mut self, range: RangeInclusive<u16>) -> Self {
        self.0.push(range);
        self
    }

    pub fn contains(&self, status: u16) -> bool {
        self.0.iter().any(|range| range.contains(&status))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
