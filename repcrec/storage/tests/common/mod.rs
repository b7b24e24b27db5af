use repcrec_common::constants::{DEFAULT_NUM_SITES, DEFAULT_NUM_VARIABLES};
use repcrec_common::{SiteId, Timestamp, VariableId};
use repcrec_storage::DataManager;

pub fn create_data_manager() -> DataManager {
    DataManager::new(DEFAULT_NUM_SITES, DEFAULT_NUM_VARIABLES)
}

pub fn x(index: u32) -> VariableId {
    VariableId::new(index).unwrap()
}

pub fn site(id: u32) -> SiteId {
    SiteId::new(id).unwrap()
}

pub fn ts(tick: u64) -> Timestamp {
    Timestamp::with_ts(tick)
}
