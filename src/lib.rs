//! Purpose: Client library for the Source configuration item store.
//! Exports: `api` (client, typed items, validation contract, errors).
//! Role: Library backing the `srcctl` binary and embedding applications.
//! Invariants: All persistence and schema enforcement live in the remote service.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
mod core;
