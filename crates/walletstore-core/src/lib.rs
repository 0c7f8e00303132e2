//! Core abstractions for walletstore: the backing object-store contract and the
//! wallet storage capabilities built on top of it.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod storage;
pub mod wallet;
