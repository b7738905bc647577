pub mod analytics;
pub mod domain;
pub mod error;
pub mod merge;
pub mod session;
pub mod validate;
