pub mod app;
pub mod auction;
pub mod bidding;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod live_sync;
pub mod message_broker;
pub mod notification;
pub mod roster;
pub mod scheduler;
pub mod settlement;
pub mod store;
pub mod user;
