pub mod dashboard;
pub mod health;
pub mod questions;
pub mod quiz;
pub mod taxonomy;
pub mod tokens;
