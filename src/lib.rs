pub mod config;
pub mod database;
pub mod document;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod pipelines;
pub mod retrieval;
pub mod router;
pub mod services;
pub mod state;
pub mod utils;
pub mod vector;
