pub mod analytics;
pub mod cache;
pub mod calibration;
pub mod dashboard;
pub mod effort;
pub mod performance;
pub mod pmc;
pub mod records;
pub mod references;
pub mod store;
pub mod wellness;
pub mod workout_index;
