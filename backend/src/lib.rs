pub mod budget;
pub mod candidate;
pub mod config;
pub mod db;
pub mod jobs;
pub mod metrics;
pub mod schedule;
pub mod serving;
pub mod store;

pub mod error;
pub mod logger;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;
