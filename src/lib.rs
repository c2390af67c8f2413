#![forbid(unsafe_code)]

//! Shared building blocks for the tubeshelf server and its seeding tool.

pub mod catalog;
pub mod config;
pub mod extract;
pub mod identity;
pub mod security;
pub mod session;
pub mod youtube;
