//! Cross-site routing over the whole site table.
//!
//! The data manager owns every [`Site`] and answers the questions that need more than one of
//! them: where a variable lives, which copies are up, and whether a committed version is still
//! readable for a snapshot given the failure history of the site it sits on.

use repcrec_common::{SiteId, Timestamp, TxnId, Value, VariableId};

use crate::error::{StorageError, StorageResult};
use crate::site::Site;
use crate::version::Version;

/// A version together with the site it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteVersion {
    pub site: SiteId,
    pub version: Version,
}

pub struct DataManager {
    num_variables: u32,
    sites: Vec<Site>,
}

impl DataManager {
    pub fn new(num_sites: u32, num_variables: u32) -> Self {
        let sites = (1..=num_sites)
            .filter_map(SiteId::new)
            .map(|id| Site::new(id, num_sites, num_variables))
            .collect();
        Self {
            num_variables,
            sites,
        }
    }

    #[inline]
    pub fn num_sites(&self) -> u32 {
        self.sites.len() as u32
    }

    #[inline]
    pub fn num_variables(&self) -> u32 {
        self.num_variables
    }

    pub fn sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter()
    }

    pub fn site(&self, id: SiteId) -> StorageResult<&Site> {
        self.sites
            .get(id.index())
            .ok_or(StorageError::UnknownSite(id))
    }

    pub fn site_mut(&mut self, id: SiteId) -> StorageResult<&mut Site> {
        self.sites
            .get_mut(id.index())
            .ok_or(StorageError::UnknownSite(id))
    }

    pub fn check_variable(&self, variable: VariableId) -> StorageResult<()> {
        if variable.raw() > self.num_variables {
            return Err(StorageError::UnknownVariable(variable));
        }
        Ok(())
    }

    /// Every site holding a copy of `variable`, in ascending id order.
    pub fn sites_for(&self, variable: VariableId) -> StorageResult<Vec<SiteId>> {
        self.check_variable(variable)?;
        Ok(self
            .sites
            .iter()
            .filter(|s| s.holds(variable))
            .map(Site::id)
            .collect())
    }

    pub fn up_sites_for(&self, variable: VariableId) -> StorageResult<Vec<SiteId>> {
        self.check_variable(variable)?;
        Ok(self
            .sites
            .iter()
            .filter(|s| s.is_up() && s.holds(variable))
            .map(Site::id)
            .collect())
    }

    pub fn is_up(&self, site: SiteId) -> StorageResult<bool> {
        self.site(site).map(Site::is_up)
    }

    pub fn failure_history(&self, site: SiteId) -> StorageResult<&[Timestamp]> {
        self.site(site).map(Site::failure_times)
    }

    /// Whether `site` failed strictly between `from` and `to`.
    pub fn failed_between(
        &self,
        site: SiteId,
        from: Timestamp,
        to: Timestamp,
    ) -> StorageResult<bool> {
        Ok(self
            .failure_history(site)?
            .iter()
            .any(|&f| from < f && f < to))
    }

    /// Whether `site` failed at or after `since`.
    pub fn failed_since(&self, site: SiteId, since: Timestamp) -> StorageResult<bool> {
        Ok(self.failure_history(site)?.iter().any(|&f| f >= since))
    }

    /// Whether a version committed at `commit_ts` on `site` is readable by a snapshot taken at
    /// `at`: the site must not have failed in between.
    pub fn is_available(
        &self,
        site: SiteId,
        commit_ts: Timestamp,
        at: Timestamp,
    ) -> StorageResult<bool> {
        self.failed_between(site, commit_ts, at).map(|failed| !failed)
    }

    /// The most recent version of `variable` at `site` committed at or before `ts`.
    pub fn read(
        &self,
        variable: VariableId,
        site: SiteId,
        ts: Timestamp,
    ) -> StorageResult<Option<Version>> {
        self.check_variable(variable)?;
        let site = self.site(site)?;
        if !site.holds(variable) {
            return Err(StorageError::NotStoredAt {
                variable,
                site: site.id(),
            });
        }
        Ok(site.read_at(variable, ts).copied())
    }

    /// Snapshot read for a transaction that started at `ts`.
    ///
    /// Sites are tried in ascending id order; the first up site whose version as of `ts` is still
    /// available wins. Eligibility is computed per site because a failure can post-date the
    /// version it invalidates.
    pub fn snapshot_read(
        &self,
        variable: VariableId,
        ts: Timestamp,
    ) -> StorageResult<Option<SiteVersion>> {
        self.check_variable(variable)?;
        for site in self.sites.iter().filter(|s| s.is_up() && s.holds(variable)) {
            let Some(version) = self.read(variable, site.id(), ts)? else {
                continue;
            };
            if self.is_available(site.id(), version.commit_ts, ts)? {
                return Ok(Some(SiteVersion {
                    site: site.id(),
                    version,
                }));
            }
            tracing::debug!(
                site = %site.id(),
                %variable,
                commit_ts = %version.commit_ts,
                %ts,
                "version unavailable: site failed since commit"
            );
        }
        Ok(None)
    }

    /// Whether a down site holds a version of `variable` that a snapshot taken at `ts` may read
    /// once the site is back.
    pub fn available_on_down_site(
        &self,
        variable: VariableId,
        ts: Timestamp,
    ) -> StorageResult<bool> {
        self.check_variable(variable)?;
        for site in self.sites.iter().filter(|s| !s.is_up() && s.holds(variable)) {
            let Some(version) = self.read(variable, site.id(), ts)? else {
                continue;
            };
            if self.is_available(site.id(), version.commit_ts, ts)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Snapshot read restricted to the replicated path.
    pub fn replicated_read(
        &self,
        variable: VariableId,
        ts: Timestamp,
    ) -> StorageResult<Option<SiteVersion>> {
        debug_assert!(variable.is_replicated());
        self.snapshot_read(variable, ts)
    }

    /// The latest committed copy a read-write transaction may read, from the first up site
    /// whose copy is not stale.
    pub fn current_read(&self, variable: VariableId) -> StorageResult<Option<SiteVersion>> {
        self.check_variable(variable)?;
        Ok(self
            .sites
            .iter()
            .filter(|s| s.is_readable(variable))
            .find_map(|s| {
                s.latest(variable).map(|version| SiteVersion {
                    site: s.id(),
                    version: *version,
                })
            }))
    }

    pub fn write(
        &mut self,
        variable: VariableId,
        value: Value,
        site: SiteId,
        ts: Timestamp,
    ) -> StorageResult<()> {
        self.check_variable(variable)?;
        let site = self.site_mut(site)?;
        if !site.is_up() {
            return Err(StorageError::SiteDown(site.id()));
        }
        site.write(variable, value, ts)
    }

    pub fn fail(&mut self, site: SiteId, ts: Timestamp) -> StorageResult<()> {
        let site = self.site_mut(site)?;
        if !site.is_up() {
            return Err(StorageError::SiteAlreadyDown(site.id()));
        }
        if let Some(&last) = site.failure_times().last() {
            if last >= ts {
                return Err(StorageError::NonMonotonicFailure {
                    site: site.id(),
                    last,
                    given: ts,
                });
            }
        }
        site.fail(ts);
        tracing::info!(site = %site.id(), %ts, "site failed");
        Ok(())
    }

    pub fn recover(&mut self, site: SiteId, ts: Timestamp) -> StorageResult<()> {
        let site = self.site_mut(site)?;
        if site.is_up() {
            return Err(StorageError::SiteAlreadyUp(site.id()));
        }
        site.recover(ts);
        tracing::info!(site = %site.id(), %ts, "site recovered");
        Ok(())
    }

    /// No-op when the site is down: a down site holds no locks.
    pub fn release_locks(&mut self, site: SiteId, txn: TxnId) -> StorageResult<()> {
        let site = self.site_mut(site)?;
        if site.is_up() {
            site.release_all(txn);
        }
        Ok(())
    }

    /// Latest committed values per site, in site order.
    pub fn dump(&self) -> Vec<(SiteId, Vec<(VariableId, Value)>)> {
        self.sites.iter().map(|s| (s.id(), s.dump())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x(index: u32) -> VariableId {
        VariableId::new(index).unwrap()
    }

    fn site(id: u32) -> SiteId {
        SiteId::new(id).unwrap()
    }

    fn ts(tick: u64) -> Timestamp {
        Timestamp::with_ts(tick)
    }

    #[test]
    fn test_placement() {
        let dm = DataManager::new(10, 20);
        assert_eq!(dm.sites_for(x(4)).unwrap().len(), 10);
        assert_eq!(dm.sites_for(x(3)).unwrap(), vec![site(4)]);
        assert_eq!(dm.sites_for(x(19)).unwrap(), vec![site(10)]);
        assert_eq!(dm.sites_for(x(21)), Err(StorageError::UnknownVariable(x(21))));
        assert_eq!(dm.is_up(site(11)), Err(StorageError::UnknownSite(site(11))));
    }

    #[test]
    fn test_snapshot_read_skips_site_failed_since_commit() {
        let mut dm = DataManager::new(10, 20);
        dm.fail(site(1), ts(2)).unwrap();
        dm.recover(site(1), ts(3)).unwrap();

        let read = dm.snapshot_read(x(4), ts(4)).unwrap().unwrap();
        assert_eq!(read.site, site(2));
        assert_eq!(read.version.value, 40);
        // A snapshot taken before the failure can still use site 1.
        let read = dm.snapshot_read(x(4), ts(1)).unwrap().unwrap();
        assert_eq!(read.site, site(1));
    }

    #[test]
    fn test_snapshot_read_of_failed_home_site() {
        let mut dm = DataManager::new(10, 20);
        dm.fail(site(2), ts(5)).unwrap();
        assert_eq!(dm.snapshot_read(x(1), ts(6)).unwrap(), None);

        dm.recover(site(2), ts(7)).unwrap();
        assert_eq!(dm.snapshot_read(x(1), ts(8)).unwrap(), None);

        dm.write(x(1), 11, site(2), ts(9)).unwrap();
        let read = dm.snapshot_read(x(1), ts(10)).unwrap().unwrap();
        assert_eq!(read.version.value, 11);
    }

    #[test]
    fn test_current_read_skips_stale_copies() {
        let mut dm = DataManager::new(10, 20);
        dm.fail(site(1), ts(1)).unwrap();
        dm.recover(site(1), ts(2)).unwrap();
        assert_eq!(dm.current_read(x(2)).unwrap().unwrap().site, site(2));
        dm.write(x(2), 7, site(1), ts(3)).unwrap();
        let read = dm.current_read(x(2)).unwrap().unwrap();
        assert_eq!((read.site, read.version.value), (site(1), 7));
    }

    #[test]
    fn test_fail_and_recover_are_checked() {
        let mut dm = DataManager::new(10, 20);
        assert_eq!(dm.recover(site(3), ts(1)), Err(StorageError::SiteAlreadyUp(site(3))));
        dm.fail(site(3), ts(2)).unwrap();
        assert_eq!(dm.fail(site(3), ts(3)), Err(StorageError::SiteAlreadyDown(site(3))));
        dm.recover(site(3), ts(3)).unwrap();
        assert!(matches!(
            dm.fail(site(3), ts(2)),
            Err(StorageError::NonMonotonicFailure { .. })
        ));
        assert_eq!(dm.failure_history(site(3)).unwrap(), &[ts(2)]);
        assert!(dm.failed_between(site(3), ts(1), ts(3)).unwrap());
        assert!(!dm.failed_between(site(3), ts(2), ts(3)).unwrap());
        assert!(dm.failed_since(site(3), ts(2)).unwrap());
        assert!(!dm.failed_since(site(3), ts(3)).unwrap());
    }

    #[test]
    fn test_release_locks_on_down_site_is_noop() {
        let mut dm = DataManager::new(10, 20);
        let t1 = TxnId::new(1);
        dm.site_mut(site(1)).unwrap().acquire_shared(t1, x(2), ts(1)).unwrap();
        dm.release_locks(site(1), t1).unwrap();
        assert!(dm.site(site(1)).unwrap().lock_table().is_empty());

        dm.fail(site(1), ts(2)).unwrap();
        dm.release_locks(site(1), t1).unwrap();
        assert_eq!(dm.release_locks(site(11), t1), Err(StorageError::UnknownSite(site(11))));
    }

    #[test]
    fn test_down_site_version_is_kept_for_older_snapshots() {
        let mut dm = DataManager::new(10, 20);
        dm.fail(site(2), ts(5)).unwrap();
        assert_eq!(dm.snapshot_read(x(1), ts(4)).unwrap(), None);
        assert!(dm.available_on_down_site(x(1), ts(4)).unwrap());
        // Failed between the initial commit and the snapshot.
        assert!(!dm.available_on_down_site(x(1), ts(6)).unwrap());
        // Up sites never count.
        assert!(!dm.available_on_down_site(x(3), ts(4)).unwrap());

        dm.recover(site(2), ts(7)).unwrap();
        assert_eq!(dm.snapshot_read(x(1), ts(4)).unwrap().unwrap().site, site(2));
        assert!(!dm.available_on_down_site(x(1), ts(4)).unwrap());
    }
}
