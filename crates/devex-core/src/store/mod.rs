//! State store (§4.D): durable settings, installed-app set, and the
//! performance-metrics log, hosted behind a single-writer background actor.

pub mod actor;
pub mod db;

pub use actor::Repository;
