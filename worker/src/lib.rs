pub mod axum_http;
pub mod config;
pub mod scheduled_settlement;
pub mod usecases;
