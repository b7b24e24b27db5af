//! Sites, their lock tables and version histories, and the data manager routing between them.

pub mod data_manager;
pub mod error;
pub mod lock;
pub mod site;
pub mod version;

pub use data_manager::{DataManager, SiteVersion};
pub use error::{StorageError, StorageResult};
pub use lock::{Lock, LockMode, LockState, LockTable};
pub use site::{Site, SiteStatus};
pub use version::{Version, VersionHistory};
