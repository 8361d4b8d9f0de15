#![deny(unused_variables)]

pub mod album;
pub mod catalog;
pub mod config;
pub mod error;
pub mod persist;
pub mod traits;
pub mod types;
