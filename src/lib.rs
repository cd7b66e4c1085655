pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod gateway;
pub mod github;
pub mod model;
pub mod output;
pub mod store;
pub mod translate;
