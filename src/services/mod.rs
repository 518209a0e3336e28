pub mod alerts;
pub mod retention;

pub use retention::RetentionService;
