//! Offline cache controller: install, activate, and fetch interception.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::{Origin, Url};

use super::manifest::{CacheGenerations, Manifest};
use super::network::Network;
use super::notify::{ClientReceiver, Notifier, UpdateNotification};
use super::request::FetchRequest;
use crate::cache::{CachePolicy, CacheStorage, CachedEntry, RequestKey, Response, ResponseSource};
use crate::config::Config;

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Created, no lifecycle event handled yet
  Parsed,
  Installing,
  Installed,
  Activating,
  /// Controlling clients and intercepting fetches
  Activated,
}

impl WorkerState {
  pub fn can_intercept_fetch(&self) -> bool {
    matches!(self, WorkerState::Activated)
  }
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      WorkerState::Parsed => "parsed",
      WorkerState::Installing => "installing",
      WorkerState::Installed => "installed",
      WorkerState::Activating => "activating",
      WorkerState::Activated => "activated",
    };
    f.write_str(s)
  }
}

/// Static settings for one worker version.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  pub origin: Url,
  pub generations: CacheGenerations,
  pub manifest: Manifest,
  /// Page served for navigations when the network is down
  pub shell_entry: Url,
  pub policy: CachePolicy,
}

impl WorkerSettings {
  pub fn from_config(config: &Config) -> Result<Self> {
    let origin = config.origin_url()?;
    let manifest = Manifest::resolve(&origin, &config.precache)?;
    let shell_entry = origin
      .join(&config.shell_entry)
      .map_err(|e| eyre!("Invalid shell entry '{}': {}", config.shell_entry, e))?;

    Ok(Self {
      generations: CacheGenerations::new(&config.cache_prefix, &config.version),
      manifest,
      shell_entry,
      policy: CachePolicy {
        allow_opaque: config.allow_opaque,
      },
      origin,
    })
  }
}

/// Outcome of the install step.
#[derive(Debug, Default, Clone)]
pub struct InstallReport {
  pub stored: Vec<Url>,
  pub failed: Vec<Url>,
}

impl InstallReport {
  pub fn is_complete(&self) -> bool {
    self.failed.is_empty()
  }
}

/// What happened to a background refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revalidation {
  /// Network copy matches the cached one
  Unchanged,
  /// Cache entry replaced and clients told
  Updated { notified: usize },
  /// Network answered with something we don't store
  NotCacheable { status: u16 },
  /// Network fetch or cache write failed
  Failed,
}

/// A response for an intercepted request.
#[derive(Debug)]
pub struct FetchOutcome {
  pub response: Response,
  pub source: ResponseSource,
  /// Background refresh started for a cache hit
  pub revalidation: Option<JoinHandle<Revalidation>>,
}

impl FetchOutcome {
  fn new(response: Response, source: ResponseSource) -> Self {
    Self {
      response,
      source,
      revalidation: None,
    }
  }
}

/// Result of offering a request to the worker.
#[derive(Debug)]
pub enum FetchDecision {
  /// Not ours: the caller performs the default network fetch
  Passthrough,
  Respond(FetchOutcome),
}

impl FetchDecision {
  pub fn is_passthrough(&self) -> bool {
    matches!(self, FetchDecision::Passthrough)
  }
}

/// The offline cache controller.
///
/// Serves the app shell from cache, keeps it fresh in the background and
/// tells clients when something they may have rendered has changed.
pub struct OfflineCache<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  notifier: Notifier,
  settings: Arc<WorkerSettings>,
  origin: Origin,
  state: Arc<RwLock<WorkerState>>,
}

impl<S: CacheStorage, N: Network> OfflineCache<S, N> {
  pub fn new(storage: S, network: N, settings: WorkerSettings) -> Self {
    Self::with_shared(Arc::new(storage), Arc::new(network), settings)
  }

  /// Build a controller over storage and network shared with others,
  /// e.g. the next worker version.
  pub fn with_shared(storage: Arc<S>, network: Arc<N>, settings: WorkerSettings) -> Self {
    Self {
      storage,
      network,
      notifier: Notifier::new(),
      origin: settings.origin.origin(),
      settings: Arc::new(settings),
      state: Arc::new(RwLock::new(WorkerState::Parsed)),
    }
  }

  pub fn state(&self) -> WorkerState {
    *self.state.read().unwrap_or_else(|e| e.into_inner())
  }

  fn transition(&self, to: WorkerState) {
    let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
    let from = *state;
    debug!(from = %from, to = %to, "Worker state change");
    *state = to;
  }

  pub fn generations(&self) -> &CacheGenerations {
    &self.settings.generations
  }

  /// Register an open client for update notifications.
  pub fn subscribe(&self) -> ClientReceiver {
    self.notifier.subscribe()
  }

  // ==========================================================================
  // Lifecycle
  // ==========================================================================

  /// Precache every manifest URL into the current precache generation.
  ///
  /// Individual failures are logged and reported, never fatal. The worker
  /// skips waiting, so it is ready to activate when this returns.
  pub async fn install(&self) -> InstallReport {
    self.transition(WorkerState::Installing);
    let precache = &self.settings.generations.precache;
    info!(cache = %precache, assets = self.settings.manifest.len(), "Installing");

    if let Err(e) = self.storage.open_cache(precache) {
      error!(cache = %precache, error = %e, "Failed to open precache");
    }

    // Fetch concurrently, write in manifest order
    let urls = self.settings.manifest.urls();
    let fetched = join_all(urls.iter().map(|url| self.fetch_for_precache(url))).await;

    let mut report = InstallReport::default();
    for (url, result) in urls.iter().zip(fetched) {
      let stored = result.and_then(|response| {
        self
          .storage
          .put_entry(precache, &RequestKey::get(url.clone()), &response)
      });
      match stored {
        Ok(()) => report.stored.push(url.clone()),
        Err(e) => {
          error!(url = %url, error = %e, "Precache failed");
          report.failed.push(url.clone());
        }
      }
    }

    self.transition(WorkerState::Installed);
    info!(
      stored = report.stored.len(),
      failed = report.failed.len(),
      "Installed, skipping waiting"
    );
    report
  }

  async fn fetch_for_precache(&self, url: &Url) -> Result<Response> {
    let request = FetchRequest::get(url.clone());
    let response = self.network.fetch(&request).await?;
    if !self.settings.policy.is_cacheable(&response) {
      return Err(eyre!(
        "Unexpected {} ({}) response for {}",
        response.status,
        response.kind.as_str(),
        url
      ));
    }
    Ok(response)
  }

  /// Delete every cache generation that isn't current, then claim clients.
  ///
  /// Returns the deleted generation names.
  pub fn activate(&self) -> Vec<String> {
    self.transition(WorkerState::Activating);

    let mut deleted = Vec::new();
    match self.storage.cache_names() {
      Ok(names) => {
        for name in names {
          if self.settings.generations.is_current(&name) {
            continue;
          }
          match self.storage.delete_cache(&name) {
            Ok(_) => {
              info!(cache = %name, "Deleted stale cache");
              deleted.push(name);
            }
            Err(e) => warn!(cache = %name, error = %e, "Failed to delete stale cache"),
          }
        }
      }
      Err(e) => error!(error = %e, "Failed to list caches"),
    }

    self.transition(WorkerState::Activated);
    info!(clients = self.notifier.client_count(), "Activated, claimed clients");
    deleted
  }

  /// Resume an already installed and activated worker after a restart.
  pub fn resume(&self) -> Result<()> {
    let precache = &self.settings.generations.precache;
    if !self.storage.has_cache(precache)? {
      return Err(eyre!(
        "Cache {} not found. Run `tsd install` first.",
        precache
      ));
    }
    self.transition(WorkerState::Activated);
    Ok(())
  }

  // ==========================================================================
  // Fetch handling
  // ==========================================================================

  /// Only same-origin GETs are intercepted.
  pub fn is_eligible(&self, request: &FetchRequest) -> bool {
    request.method == reqwest::Method::GET && request.url.origin() == self.origin
  }

  /// Handle one intercepted request.
  pub async fn handle_fetch(&self, request: FetchRequest) -> FetchDecision {
    if !self.state().can_intercept_fetch() || !self.is_eligible(&request) {
      debug!(method = %request.method, url = %request.url, "Passthrough");
      return FetchDecision::Passthrough;
    }
    let Some(key) = request.cache_key() else {
      return FetchDecision::Passthrough;
    };

    let outcome = if request.is_navigation() {
      self.network_first(request).await
    } else {
      self.cache_first(request, key).await
    };
    FetchDecision::Respond(outcome)
  }

  /// Look in the precache, then the runtime cache.
  /// Storage errors count as a miss.
  fn lookup(&self, key: &RequestKey) -> Option<(String, CachedEntry)> {
    let generations = &self.settings.generations;
    for name in [&generations.precache, &generations.runtime] {
      match self.storage.match_entry(name, key) {
        Ok(Some(entry)) => return Some((name.clone(), entry)),
        Ok(None) => {}
        Err(e) => warn!(cache = %name, key = %key, error = %e, "Cache lookup failed"),
      }
    }
    None
  }

  /// Write an entry, logging instead of failing.
  fn store(&self, cache: &str, key: &RequestKey, response: &Response) {
    if let Err(e) = self.storage.put_entry(cache, key, response) {
      warn!(cache = %cache, key = %key, error = %e, "Cache write failed");
    }
  }

  async fn cache_first(&self, request: FetchRequest, key: RequestKey) -> FetchOutcome {
    if let Some((generation, entry)) = self.lookup(&key) {
      debug!(key = %key, cache = %generation, "Cache hit");
      let response = entry.response.clone();
      let this = self.clone();
      let revalidation =
        tokio::spawn(async move { this.revalidate(generation, key, entry).await });
      return FetchOutcome {
        response,
        source: ResponseSource::Cache,
        revalidation: Some(revalidation),
      };
    }

    match self.network.fetch(&request).await {
      Ok(response) => {
        if self.settings.policy.is_cacheable(&response) {
          self.store(&self.settings.generations.runtime, &key, &response);
        }
        FetchOutcome::new(response, ResponseSource::Network)
      }
      Err(e) => {
        warn!(key = %key, error = %e, "Network failed and nothing cached");
        FetchOutcome::new(Response::unavailable(key.as_str()), ResponseSource::Synthetic)
      }
    }
  }

  /// Refresh a cached entry from the network and notify clients if it changed.
  async fn revalidate(&self, generation: String, key: RequestKey, previous: CachedEntry) -> Revalidation {
    let request = FetchRequest::get(key.url().clone());
    let response = match self.network.fetch(&request).await {
      Ok(response) => response,
      Err(e) => {
        debug!(key = %key, error = %e, "Revalidation failed");
        return Revalidation::Failed;
      }
    };

    if !self.settings.policy.is_cacheable(&response) {
      debug!(key = %key, status = response.status, "Revalidation response not cacheable");
      return Revalidation::NotCacheable {
        status: response.status,
      };
    }

    let changed = previous.differs_from(&response);
    // The generation may have been deleted by a newer version meanwhile
    match self.storage.replace_entry(&generation, &key, &response) {
      Ok(true) => {}
      Ok(false) => {
        debug!(key = %key, cache = %generation, "Cache gone, dropping revalidated response");
        return Revalidation::Failed;
      }
      Err(e) => {
        warn!(cache = %generation, key = %key, error = %e, "Cache write failed");
        return Revalidation::Failed;
      }
    }
    if !changed {
      return Revalidation::Unchanged;
    }

    let notification = UpdateNotification::refresh(key.as_str(), response.etag());
    let notified = self.notifier.publish(notification);
    info!(key = %key, etag = ?response.etag(), notified, "Cached resource updated");
    Revalidation::Updated { notified }
  }

  async fn network_first(&self, mut request: FetchRequest) -> FetchOutcome {
    let attempt = match request.preload.take() {
      Some(preloaded) => {
        debug!(url = %request.url, "Using navigation preload");
        Ok(preloaded)
      }
      None => self.network.fetch(&request).await,
    };

    match attempt {
      Ok(response) => FetchOutcome::new(response, ResponseSource::Network),
      Err(e) => {
        warn!(url = %request.url, error = %e, "Navigation failed, falling back to shell");
        let shell = RequestKey::get(self.settings.shell_entry.clone());
        match self.lookup(&shell) {
          Some((_, entry)) => FetchOutcome::new(entry.response, ResponseSource::Offline),
          None => FetchOutcome::new(
            Response::unavailable(request.url.as_str()),
            ResponseSource::Synthetic,
          ),
        }
      }
    }
  }
}

impl<S: CacheStorage, N: Network> Clone for OfflineCache<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      notifier: self.notifier.clone(),
      settings: Arc::clone(&self.settings),
      origin: self.origin.clone(),
      state: Arc::clone(&self.state),
    }
  }
}
