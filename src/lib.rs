pub mod cache;
pub mod domains;
pub mod efg;
pub mod game;
pub mod play;
pub mod solver;

/// dimensional analysis types
pub type Utility = f64;
pub type Probability = f64;

/// outcome distributions must sum to one within this tolerance
pub const NORMALIZATION_TOLERANCE: f64 = 1e-6;

/// an iteration overrunning its time budget by more than this many
/// microseconds gets a warning in the log
pub const BUDGET_OVERSHOOT_US: u128 = 100;
