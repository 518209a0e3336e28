pub mod api;
pub mod capture;
pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod pipeline;
pub mod security;
pub mod services;

pub use error::Error;
