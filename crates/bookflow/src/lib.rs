//! Reservation booking engine: computes when a restaurant's booking window opens,
//! polls the provider inside that window and books the best preferred slot.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod providers;
pub mod reservation;
pub mod window;

pub use error::EngineError;
