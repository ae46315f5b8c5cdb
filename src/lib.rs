pub mod cache;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod forecast;
pub mod http_client;
pub mod indicators;
pub mod market_data;
pub mod market_scan;
pub mod models;
pub mod preprocess;
pub mod providers;
pub mod service;
pub mod verify;
