pub mod detection_models;
pub mod user_models;
