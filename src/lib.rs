//! Offline shell cache and backend call gateway for the TSD handheld
//! terminal client.

pub mod cache;
pub mod config;
pub mod gateway;
pub mod logging;
pub mod worker;
