#![forbid(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod library;
pub mod metadata;
pub mod origin;
pub mod service;
pub mod telemetry;
pub mod theme;
