//! Purpose: Define the public Rust API for the Source configuration item client.
//! Exports: `Client`, options, the item model, validation contract and errors.
//! Role: Public, additive-only surface; hides wire coding helpers.
//! Invariants: This module is the only public path to the item model and client.
//! Invariants: Internal modules remain private and are not directly exposed.

mod client;
mod options;
mod retry;
mod validation;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::item::{Item, ItemList, Link, Tag};
pub use crate::core::key::{KEY_WILDCARD, resolve_key, resolve_key_at};
pub use crate::core::schema::TypeDescriptor;
pub use client::{ApiResult, Client, QueueEnd, USER_AGENT};
pub use options::{ClientOptions, MIN_REQUEST_TIMEOUT};
pub use retry::RetryPolicy;
pub use validation::{Validate, ValidationIssue};
