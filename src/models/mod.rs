//! Core data models for the chunked upload service.
//!
//! `session` is the persisted view of an upload session; `requests` holds the
//! validated per-operation inputs decoded from request headers.

pub mod requests;
pub mod session;
