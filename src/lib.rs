pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod schedule;
pub mod sink;
pub mod stream;
