pub mod error;
mod migrations;
pub mod sqlite_store;
pub mod store;

#[cfg(test)]
mod test_fixtures;

pub use error::*;
pub use sqlite_store::*;
pub use store::*;
