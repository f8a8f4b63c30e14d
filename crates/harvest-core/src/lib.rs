pub mod broker;
pub mod clock;
pub mod error;
pub mod models;
pub mod retry;
pub mod store;
