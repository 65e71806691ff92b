//! Common configuration shared by the payload generators

pub mod config;
