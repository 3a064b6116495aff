// Core modules implementing the item model, wire coding, key sequencing and errors.
mod codec;
pub mod error;
pub mod item;
pub mod key;
pub mod schema;

pub(crate) use codec::duration_ms;
