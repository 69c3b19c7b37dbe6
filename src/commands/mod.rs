pub mod check_config;
pub mod eval;
pub mod query;
