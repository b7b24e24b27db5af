use repcrec_common::{Timestamp, Value, VariableId};
use serde::Serialize;

/// One committed value of a variable at one site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Version {
    pub variable: VariableId,
    pub value: Value,
    pub commit_ts: Timestamp,
}

impl Version {
    #[inline]
    pub fn new(variable: VariableId, value: Value, commit_ts: Timestamp) -> Self {
        Self {
            variable,
            value,
            commit_ts,
        }
    }

    /// The version every copy of `variable` starts with.
    #[inline]
    pub fn initial(variable: VariableId) -> Self {
        Self::new(variable, variable.initial_value(), Timestamp::ZERO)
    }
}

/// Versions of one variable at one site, oldest first.
///
/// Commit times are strictly increasing, so the history is sorted by both insertion and time.
#[derive(Debug, Clone)]
pub struct VersionHistory {
    versions: Vec<Version>,
}

impl VersionHistory {
    pub fn new(initial: Version) -> Self {
        Self {
            versions: vec![initial],
        }
    }

    /// The most recent version committed at or before `ts`.
    pub fn at(&self, ts: Timestamp) -> Option<&Version> {
        self.versions.iter().rev().find(|v| v.commit_ts <= ts)
    }

    #[inline]
    pub fn latest(&self) -> Option<&Version> {
        self.versions.last()
    }

    /// Returns the commit time a new version has to exceed, if any.
    pub fn accepts(&self, ts: Timestamp) -> Result<(), Timestamp> {
        match self.latest() {
            Some(last) if last.commit_ts >= ts => Err(last.commit_ts),
            _ => Ok(()),
        }
    }

    /// Callers must check [`VersionHistory::accepts`] first.
    pub(crate) fn push(&mut self, version: Version) {
        debug_assert!(self.accepts(version.commit_ts).is_ok());
        self.versions.push(version);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Version> {
        self.versions.iter()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x(index: u32) -> VariableId {
        VariableId::new(index).unwrap()
    }

    fn ts(tick: u64) -> Timestamp {
        Timestamp::with_ts(tick)
    }

    #[test]
    fn test_at_returns_latest_not_after() {
        let mut history = VersionHistory::new(Version::initial(x(2)));
        history.push(Version::new(x(2), 100, ts(3)));
        history.push(Version::new(x(2), 200, ts(7)));

        assert_eq!(history.at(ts(0)).unwrap().value, 20);
        assert_eq!(history.at(ts(2)).unwrap().value, 20);
        assert_eq!(history.at(ts(3)).unwrap().value, 100);
        assert_eq!(history.at(ts(6)).unwrap().value, 100);
        assert_eq!(history.at(ts(100)).unwrap().value, 200);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_accepts_only_later_commits() {
        let mut history = VersionHistory::new(Version::initial(x(2)));
        history.push(Version::new(x(2), 1, ts(4)));
        assert_eq!(history.accepts(ts(4)), Err(ts(4)));
        assert_eq!(history.accepts(ts(3)), Err(ts(4)));
        assert_eq!(history.accepts(ts(5)), Ok(()));
    }
}
