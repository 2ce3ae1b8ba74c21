pub mod address;
pub mod clock;
pub mod coordinator;
pub mod event;
pub mod execution;
pub mod failure;
pub mod line_item;
pub mod rule;

pub use address::*;
pub use clock::*;
pub use coordinator::*;
pub use event::*;
pub use execution::*;
pub use failure::*;
pub use line_item::*;
pub use rule::*;
