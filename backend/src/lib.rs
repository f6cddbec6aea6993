pub mod api;
pub mod booking;
pub mod config;
pub mod db;
pub mod model;
pub mod notify;
pub mod payments;
pub mod state;
pub mod store;

pub mod error;
pub mod logger;
pub mod money;
pub mod time;
