//! Quill Server
//!
//! Backend for serialized fiction: books, chapters kept in a dense reading
//! order, and per-reader progress that follows that order as it changes.
//!
//! # Modules
//!
//! - `ordering`: chapter insert/move/delete keeping positions `1..=N`
//! - `progress`: progress cache updates and the per-user save queue
//! - `routes`: the HTTP surface

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod ordering;
pub mod progress;
pub mod routes;
pub mod state;
