mod connection;
pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;

#[cfg(test)]
pub(crate) use connection::testing;
