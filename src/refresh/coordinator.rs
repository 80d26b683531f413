//! Registry of periodic refresh subscriptions and the sweeps that drive them.

use futures::future::{join_all, BoxFuture, FutureExt};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::ambient::{AmbientState, Edge, Signal, SignalSource};
use crate::cache::{CacheKey, CacheStore};
use crate::error::FetchError;

/// Re-fetch action run on each refresh.
pub type TriggerFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), FetchError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Drives re-fetches on timers, on bulk administrative requests and on
/// reconnect/foreground edges.
///
/// Cloning shares the same registry. Dropping the last clone aborts every
/// timer.
#[derive(Clone)]
pub struct RefreshCoordinator {
  inner: Arc<Inner>,
}

struct Inner {
  store: CacheStore,
  registry: Mutex<Registry>,
  ambient: Mutex<AmbientState>,
  /// Prefixes swept when the app returns to the foreground
  high_priority: Vec<String>,
}

#[derive(Default)]
struct Registry {
  next_id: u64,
  subscriptions: BTreeMap<SubscriptionId, Subscription>,
}

struct Subscription {
  key: CacheKey,
  trigger: TriggerFn,
  timer: Option<JoinHandle<()>>,
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(timer) = self.timer.take() {
      timer.abort();
    }
  }
}

impl Inner {
  fn registry(&self) -> MutexGuard<'_, Registry> {
    self.registry.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn remove(&self, id: SubscriptionId) -> bool {
    let removed = self.registry().subscriptions.remove(&id);
    removed.is_some()
  }
}

impl RefreshCoordinator {
  pub fn new(store: CacheStore, high_priority: Vec<String>) -> Self {
    Self {
      inner: Arc::new(Inner {
        store,
        registry: Mutex::new(Registry::default()),
        ambient: Mutex::new(AmbientState::default()),
        high_priority,
      }),
    }
  }

  pub fn store(&self) -> &CacheStore {
    &self.inner.store
  }

  pub fn high_priority_prefixes(&self) -> &[String] {
    &self.inner.high_priority
  }

  pub fn ambient(&self) -> AmbientState {
    *self
      .inner
      .ambient
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Register a trigger for `key`.
  ///
  /// A non-zero `interval` runs the trigger every `interval`, first one
  /// interval from now. The subscription lives until the returned
  /// [`Registration`] is cancelled or dropped. Must be called inside a tokio
  /// runtime.
  pub fn register<F, Fut>(&self, key: CacheKey, trigger: F, interval: Duration) -> Registration
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), FetchError>> + Send + 'static,
  {
    let trigger: TriggerFn = Arc::new(move || trigger().boxed());
    let timer = (!interval.is_zero()).then(|| spawn_timer(key.clone(), trigger.clone(), interval));

    let mut registry = self.inner.registry();
    registry.next_id += 1;
    let id = SubscriptionId(registry.next_id);
    registry.subscriptions.insert(
      id,
      Subscription {
        key: key.clone(),
        trigger,
        timer,
      },
    );
    debug!(key = %key, ?interval, "Registered refresh subscription");

    Registration {
      id,
      key,
      coordinator: Arc::downgrade(&self.inner),
      active: AtomicBool::new(true),
    }
  }

  /// Remove every subscription for `key`, stopping their timers.
  pub fn unregister(&self, key: &CacheKey) -> usize {
    let mut registry = self.inner.registry();
    let before = registry.subscriptions.len();
    registry.subscriptions.retain(|_, sub| &sub.key != key);
    before - registry.subscriptions.len()
  }

  pub fn subscription_count(&self) -> usize {
    self.inner.registry().subscriptions.len()
  }

  /// Keys with at least one subscription, sorted and deduplicated.
  pub fn subscribed_keys(&self) -> Vec<CacheKey> {
    let mut keys: Vec<CacheKey> = self
      .inner
      .registry()
      .subscriptions
      .values()
      .map(|sub| sub.key.clone())
      .collect();
    keys.sort();
    keys.dedup();
    keys
  }

  fn triggers_where(&self, matches: impl Fn(&CacheKey) -> bool) -> Vec<(CacheKey, TriggerFn)> {
    self
      .inner
      .registry()
      .subscriptions
      .values()
      .filter(|sub| matches(&sub.key))
      .map(|sub| (sub.key.clone(), sub.trigger.clone()))
      .collect()
  }

  /// Clear the whole store, then run every trigger.
  ///
  /// Trigger failures are logged and never abort the sweep. Returns how many
  /// triggers ran.
  pub async fn refresh_all(&self) -> usize {
    let cleared = self.inner.store.clear();
    let targets = self.triggers_where(|_| true);
    info!(cleared, subscriptions = targets.len(), "Refreshing all subscriptions");
    run_triggers(targets).await
  }

  /// Invalidate entries under `prefix`, then run the matching triggers.
  pub async fn refresh_by_prefix(&self, prefix: &str) -> usize {
    let cleared = self.inner.store.invalidate_prefix(prefix);
    let targets = self.triggers_where(|key| key.starts_with(prefix));
    info!(prefix, cleared, subscriptions = targets.len(), "Refreshing by prefix");
    run_triggers(targets).await
  }

  /// Sweep the configured high-priority prefixes.
  ///
  /// A subscription matching several prefixes runs once.
  pub async fn refresh_high_priority(&self) -> usize {
    let prefixes = &self.inner.high_priority;
    for prefix in prefixes {
      self.inner.store.invalidate_prefix(prefix);
    }
    let targets = self.triggers_where(|key| prefixes.iter().any(|p| key.starts_with(p)));
    info!(subscriptions = targets.len(), "Refreshing high-priority subscriptions");
    run_triggers(targets).await
  }

  /// Apply a platform signal; a rising edge starts the matching sweep.
  pub async fn handle_signal(&self, signal: Signal) -> Option<Edge> {
    let edge = self
      .inner
      .ambient
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .apply(signal);

    match edge {
      Some(Edge::Reconnected) => {
        info!("Connectivity regained");
        self.refresh_all().await;
      }
      Some(Edge::Foregrounded) => {
        info!("App returned to foreground");
        self.refresh_high_priority().await;
      }
      None => debug!(?signal, "Ambient signal without edge"),
    }
    edge
  }

  /// Returns whether the report was a reconnect.
  pub async fn set_online(&self, online: bool) -> bool {
    self.handle_signal(Signal::Connectivity(online)).await.is_some()
  }

  /// Returns whether the report was a return to the foreground.
  pub async fn set_foreground(&self, foreground: bool) -> bool {
    self.handle_signal(Signal::Foreground(foreground)).await.is_some()
  }

  /// Consume connectivity and lifecycle reports until both sources close.
  ///
  /// Reports are applied one at a time in arrival order.
  pub fn watch<C, L>(&self, connectivity: C, lifecycle: L) -> JoinHandle<()>
  where
    C: SignalSource,
    L: SignalSource,
  {
    let coordinator = self.clone();
    tokio::spawn(async move {
      let (mut connectivity, mut lifecycle) = (connectivity, lifecycle);
      let (mut connectivity_open, mut lifecycle_open) = (true, true);

      while connectivity_open || lifecycle_open {
        tokio::select! {
          report = connectivity.next(), if connectivity_open => match report {
            Some(online) => {
              coordinator.handle_signal(Signal::Connectivity(online)).await;
            }
            None => connectivity_open = false,
          },
          report = lifecycle.next(), if lifecycle_open => match report {
            Some(foreground) => {
              coordinator.handle_signal(Signal::Foreground(foreground)).await;
            }
            None => lifecycle_open = false,
          },
        }
      }
      debug!("Ambient signal sources closed");
    })
  }
}

impl std::fmt::Debug for RefreshCoordinator {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RefreshCoordinator")
      .field("subscriptions", &self.subscription_count())
      .field("ambient", &self.ambient())
      .field("high_priority", &self.inner.high_priority)
      .finish()
  }
}

fn spawn_timer(key: CacheKey, trigger: TriggerFn, interval: Duration) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      ticker.tick().await;
      debug!(key = %key, "Scheduled refresh");
      if let Err(e) = trigger().await {
        warn!(key = %key, error = %e, "Scheduled refresh failed");
      }
    }
  })
}

async fn run_triggers(targets: Vec<(CacheKey, TriggerFn)>) -> usize {
  let count = targets.len();
  let runs = targets.into_iter().map(|(key, trigger)| async move {
    if let Err(e) = trigger().await {
      warn!(key = %key, error = %e, "Refresh trigger failed");
    }
  });
  join_all(runs).await;
  count
}

/// Handle to one subscription. Cancelling is idempotent; dropping cancels.
#[must_use = "dropping a Registration removes the subscription"]
pub struct Registration {
  id: SubscriptionId,
  key: CacheKey,
  coordinator: Weak<Inner>,
  active: AtomicBool,
}

impl Registration {
  pub fn id(&self) -> SubscriptionId {
    self.id
  }

  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  /// Stop the timer and remove the subscription.
  ///
  /// The timer is aborted before this returns. A trigger already running may
  /// still finish its fetch, but is never scheduled again.
  pub fn cancel(&self) {
    if !self.active.swap(false, Ordering::SeqCst) {
      return;
    }
    if let Some(inner) = self.coordinator.upgrade() {
      if inner.remove(self.id) {
        debug!(key = %self.key, "Unregistered refresh subscription");
      }
    }
  }

  pub fn is_active(&self) -> bool {
    self.active.load(Ordering::SeqCst)
      && self
        .coordinator
        .upgrade()
        .is_some_and(|inner| inner.registry().subscriptions.contains_key(&self.id))
  }
}

impl Drop for Registration {
  fn drop(&mut self) {
    self.cancel();
  }
}

impl std::fmt::Debug for Registration {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Registration")
      .field("id", &self.id)
      .field("key", &self.key)
      .field("active", &self.is_active())
      .finish()
  }
}
