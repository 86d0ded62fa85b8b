pub mod alerts;
pub mod config;
pub mod db;
pub mod emitter;
pub mod guard;
pub mod hours;
pub mod live;
pub mod metrics;
pub mod normalizer;
pub mod probe;
pub mod quote;
pub mod registry;
pub mod sources;
pub mod spread;
pub mod store;
pub mod validation;

pub mod error;
pub mod time;
