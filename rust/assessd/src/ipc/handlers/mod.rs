pub mod assessments;
pub mod catalog;
pub mod core;
pub mod remarks;
pub mod reports;
pub mod results;
pub mod setup;
pub mod students;
