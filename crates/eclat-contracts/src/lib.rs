pub mod cache;
pub mod chat;
pub mod events;
pub mod menu;
pub mod models;
