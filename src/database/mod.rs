pub mod connection;
pub mod models;
pub mod stats;

pub use connection::Connection;
