/// Number of sites in the default deployment.
pub const DEFAULT_NUM_SITES: u32 = 10;

/// Number of variables (`x1` to `x20`) in the default deployment.
pub const DEFAULT_NUM_VARIABLES: u32 = 20;
