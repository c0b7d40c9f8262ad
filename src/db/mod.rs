pub mod connection;
pub mod datasets;
pub mod history;
