//! Offline shell worker.
//!
//! Follows the service worker lifecycle: `install` precaches the shell,
//! `activate` drops caches left by older versions, and `handle_fetch`
//! answers same-origin GETs from cache (assets) or network (navigations).

mod controller;
mod manifest;
mod network;
mod notify;
mod request;

pub use controller::{
  FetchDecision, FetchOutcome, InstallReport, OfflineCache, Revalidation, WorkerSettings,
  WorkerState,
};
pub use manifest::{CacheGenerations, Manifest, DEFAULT_MANIFEST};
pub use network::{HttpNetwork, Network};
pub use notify::{ClientReceiver, Notifier, UpdateNotification};
pub use request::{FetchRequest, RequestMode};
