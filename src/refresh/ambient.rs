//! Connectivity and lifecycle state reported by the platform.

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::mpsc;

/// Process-wide platform state. Only signal handlers write it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbientState {
  pub is_online: bool,
  pub is_foreground: bool,
}

impl Default for AmbientState {
  fn default() -> Self {
    Self {
      is_online: true,
      is_foreground: true,
    }
  }
}

/// A platform report carrying the new value of one ambient flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
  Connectivity(bool),
  Foreground(bool),
}

/// A false -> true transition worth a refresh sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
  Reconnected,
  Foregrounded,
}

impl AmbientState {
  /// Record a signal and report the rising edge it caused, if any.
  ///
  /// A signal repeating the current value changes nothing.
  pub fn apply(&mut self, signal: Signal) -> Option<Edge> {
    match signal {
      Signal::Connectivity(online) => {
        let was = std::mem::replace(&mut self.is_online, online);
        (!was && online).then_some(Edge::Reconnected)
      }
      Signal::Foreground(foreground) => {
        let was = std::mem::replace(&mut self.is_foreground, foreground);
        (!was && foreground).then_some(Edge::Foregrounded)
      }
    }
  }
}

/// A stream of boolean state reports from the platform.
pub trait SignalSource: Send + 'static {
  /// Next reported value, or `None` once the platform stops reporting.
  fn next(&mut self) -> BoxFuture<'_, Option<bool>>;
}

impl SignalSource for mpsc::UnboundedReceiver<bool> {
  fn next(&mut self) -> BoxFuture<'_, Option<bool>> {
    self.recv().boxed()
  }
}

impl SignalSource for mpsc::Receiver<bool> {
  fn next(&mut self) -> BoxFuture<'_, Option<bool>> {
    self.recv().boxed()
  }
}
