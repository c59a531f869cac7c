pub mod config;
pub mod extract;
pub mod fields;
pub mod http;
pub mod index;
pub mod matcher;
pub mod merge;
pub mod model;
pub mod runtime;
pub mod store;
pub mod sync;
