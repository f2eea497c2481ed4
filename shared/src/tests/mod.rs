//! Test modules for the shared crate

mod tasks_tests;
mod utils_tests;
