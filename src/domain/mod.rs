pub mod display;
pub mod filter;
pub mod link;
pub mod models;
pub mod registry;
pub mod scheduler;
pub mod settings;
pub mod signal;
pub mod tracker;
pub mod transport;
