pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod service;
pub mod telemetry;
