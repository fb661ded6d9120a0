pub mod cache;
pub mod calibration;
pub mod dashboard;
pub mod health;
pub mod pmc;
pub mod references;
pub mod wellness;
pub mod workouts;
