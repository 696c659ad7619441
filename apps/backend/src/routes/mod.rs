//! HTTP route handlers

pub mod auth;
pub mod books;
pub mod covers;
pub mod markups;
pub mod sync;
