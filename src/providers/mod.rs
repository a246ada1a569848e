//! Concrete [`Source`](crate::provider::Source) implementations

mod live;
mod replay;

pub use live::LiveSource;
pub use replay::ReplaySource;
