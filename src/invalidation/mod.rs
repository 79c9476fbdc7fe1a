//! Table invalidation tracking
//!
//! Writes report the tables they touched and scopes turn those reports into
//! batches. Each reader merges the batches it has not read yet, and a
//! reactive query re-runs when that union overlaps the tables it watches.

mod channel;
mod handler;
mod listen;
mod scope;
mod table;

pub use channel::{InvalidationChannel, InvalidationReceiver};
pub use handler::InvalidationHandler;
pub use listen::listen_for_invalidation;
pub use scope::{
    InvalidationScope, TableInvalidationScope, TrackOnlyInvalidationScope,
    TransactionInvalidationScope,
};
pub use table::{TableId, TableSet};
