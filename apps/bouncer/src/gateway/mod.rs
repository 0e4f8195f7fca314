pub mod auth;
pub mod frames;
pub mod handler;
pub mod registry;
pub mod server;
pub mod session;
