use crate::commands::{self, Resolution, COMMANDS};
use crate::event::{Event, EventHandler};
use crate::remote::RemoteStore;
use color_eyre::{eyre::eyre, Result};
use portal_cache::{
  CacheKey, FetchError, Query, QueryClient, QueryOptions, QueryResult, QueryStatus,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// An open screen reading one remote query
struct Screen {
  id: usize,
  label: String,
  query: Arc<Query<Value>>,
  last_line: Option<String>,
}

/// Interactive line shell driving the cache against a simulated remote
pub struct Shell {
  client: QueryClient,
  remote: RemoteStore,
  options: QueryOptions,
  screens: Vec<Screen>,
  next_screen: usize,
  connectivity: mpsc::UnboundedSender<bool>,
  lifecycle: mpsc::UnboundedSender<bool>,
  watcher: JoinHandle<()>,
  running: bool,
}

impl Shell {
  /// Must be called inside a tokio runtime.
  pub fn new(client: QueryClient, remote: RemoteStore, options: QueryOptions) -> Self {
    let (connectivity, connectivity_rx) = mpsc::unbounded_channel();
    let (lifecycle, lifecycle_rx) = mpsc::unbounded_channel();
    let watcher = client.coordinator().watch(connectivity_rx, lifecycle_rx);

    Self {
      client,
      remote,
      options,
      screens: Vec::new(),
      next_screen: 1,
      connectivity,
      lifecycle,
      watcher,
      running: true,
    }
  }

  /// Main loop
  pub async fn run(&mut self, tick_rate: Duration) -> Result<()> {
    let mut events = EventHandler::new(tick_rate);
    if self.remote.is_empty() {
      println!("portal-cache shell, remote store is empty. Type `help` for commands.");
    } else {
      println!(
        "portal-cache shell, {} documents in the remote. Type `help` for commands.",
        self.remote.len()
      );
    }

    while self.running {
      match events.next().await {
        Some(Event::Input(line)) => match self.execute(&line) {
          Ok(Some(reply)) => println!("{}", reply),
          Ok(None) => {}
          Err(e) => println!("error: {}", e),
        },
        Some(Event::Tick) => {
          for line in self.poll_screens() {
            println!("{}", line);
          }
        }
        Some(Event::Closed) | None => break,
      }
    }

    self.shutdown();
    Ok(())
  }

  /// Run one command line and return what to print.
  pub fn execute(&mut self, line: &str) -> Result<Option<String>> {
    let Some((name, rest)) = next_token(line) else {
      return Ok(None);
    };
    let command = match commands::resolve(name) {
      Resolution::Found(command) => command,
      Resolution::Ambiguous(candidates) => {
        let names: Vec<&str> = candidates.iter().map(|c| c.name).collect();
        return Err(eyre!("'{}' is ambiguous: {}", name, names.join(", ")));
      }
      Resolution::Unknown => return Err(eyre!("Unknown command '{}', try `help`", name)),
    };
    debug!(command = command.name, "Executing command");

    match command.name {
      "open" => self.open(rest).map(Some),
      "close" => {
        let id = screen_id(rest)?;
        let index = self
          .screens
          .iter()
          .position(|s| s.id == id)
          .ok_or_else(|| eyre!("No screen {}", id))?;
        let screen = self.screens.remove(index);
        screen.query.dispose();
        Ok(Some(format!("closed [{}] {}", screen.id, screen.label)))
      }
      "screens" => Ok(Some(self.list_screens())),
      "request" => {
        let query = self.screen(rest)?.query.clone();
        tokio::spawn(async move {
          query.request().await;
        });
        Ok(None)
      }
      "force" => {
        let query = self.screen(rest)?.query.clone();
        tokio::spawn(async move {
          query.force_refresh().await;
        });
        Ok(None)
      }
      "invalidate" => {
        let screen = self.screen(rest)?;
        let reply = if screen.query.invalidate() {
          "dropped cached entry"
        } else {
          "nothing cached"
        };
        Ok(Some(reply.to_string()))
      }
      "optimistic" => {
        let (id, json) = next_token(rest).ok_or_else(|| eyre!("Usage: {}", usage("optimistic")))?;
        let id = screen_id(id)?;
        let value: Value = serde_json::from_str(json.trim())?;
        self.screen_by_id(id)?.query.set_optimistic(value)?;
        Ok(None)
      }
      "write" => {
        let (service, rest) = next_token(rest).ok_or_else(|| eyre!("Usage: {}", usage("write")))?;
        let (method, rest) = next_token(rest).ok_or_else(|| eyre!("Usage: {}", usage("write")))?;
        let [params, value]: [Value; 2] = json_values(rest)?
          .try_into()
          .map_err(|_| eyre!("Usage: {}", usage("write")))?;
        let key = CacheKey::build(service, method, &params)?;
        self.remote.write(key.clone(), value);
        Ok(Some(format!("wrote {} (cached copies keep their value until refreshed)", key)))
      }
      "fail" => {
        let failing = match rest.trim() {
          "on" => true,
          "off" => false,
          _ => return Err(eyre!("Usage: {}", usage("fail"))),
        };
        self.remote.set_failing(failing);
        Ok(Some(format!("remote {}", if failing { "failing" } else { "healthy" })))
      }
      "online" | "offline" => {
        let online = command.name == "online";
        self
          .connectivity
          .send(online)
          .map_err(|_| eyre!("Signal watcher stopped"))?;
        Ok(Some(format!("connectivity: {}", command.name)))
      }
      "foreground" | "background" => {
        let foreground = command.name == "foreground";
        self
          .lifecycle
          .send(foreground)
          .map_err(|_| eyre!("Signal watcher stopped"))?;
        Ok(Some(format!("lifecycle: {}", command.name)))
      }
      "refresh" => {
        let coordinator = self.client.coordinator().clone();
        let prefix = rest.trim().to_string();
        tokio::spawn(async move {
          let count = if prefix.is_empty() {
            coordinator.refresh_all().await
          } else {
            coordinator.refresh_by_prefix(&prefix).await
          };
          info!(count, prefix = %prefix, "Manual refresh finished");
          println!("refreshed {} subscription(s)", count);
        });
        Ok(None)
      }
      "stats" => Ok(Some(self.stats())),
      "help" => Ok(Some(help())),
      "quit" => {
        self.running = false;
        Ok(None)
      }
      _ => Err(eyre!("Command '{}' is not handled", command.name)),
    }
  }

  /// Status lines for screens whose state changed since the last poll
  pub fn poll_screens(&mut self) -> Vec<String> {
    let mut changed = Vec::new();
    for screen in &mut self.screens {
      let line = status_line(&screen.query.snapshot());
      if screen.last_line.as_deref() != Some(line.as_str()) {
        changed.push(format!("[{}] {}: {}", screen.id, screen.label, line));
        screen.last_line = Some(line);
      }
    }
    changed
  }

  fn open(&mut self, args: &str) -> Result<String> {
    let (service, rest) = next_token(args).ok_or_else(|| eyre!("Usage: {}", usage("open")))?;
    let (method, rest) = next_token(rest).ok_or_else(|| eyre!("Usage: {}", usage("open")))?;
    let params = match json_values(rest)?.as_slice() {
      [] => json!({}),
      [params] => params.clone(),
      _ => return Err(eyre!("Usage: {}", usage("open"))),
    };
    let key = CacheKey::build(service, method, &params)?;

    let remote = self.remote.clone();
    let target = key.clone();
    let query = Arc::new(self.client.query(
      key,
      move || {
        let remote = remote.clone();
        let key = target.clone();
        async move { remote.read(&key).await.map_err(FetchError::new) }
      },
      self.options,
    ));

    let id = self.next_screen;
    self.next_screen += 1;
    let label = format!("{}.{} {}", service, method, params);
    self.screens.push(Screen {
      id,
      label: label.clone(),
      query: query.clone(),
      last_line: None,
    });

    // Mount fetch
    tokio::spawn(async move {
      query.request().await;
    });
    Ok(format!("opened [{}] {}", id, label))
  }

  fn screen(&self, args: &str) -> Result<&Screen> {
    self.screen_by_id(screen_id(args)?)
  }

  fn screen_by_id(&self, id: usize) -> Result<&Screen> {
    self
      .screens
      .iter()
      .find(|s| s.id == id)
      .ok_or_else(|| eyre!("No screen {}", id))
  }

  fn list_screens(&self) -> String {
    if self.screens.is_empty() {
      return "no open screens".to_string();
    }
    self
      .screens
      .iter()
      .map(|s| {
        format!(
          "[{}] {}: {}{}",
          s.id,
          s.label,
          status_line(&s.query.snapshot()),
          if s.query.is_registered() { " (auto-refresh)" } else { "" }
        )
      })
      .collect::<Vec<_>>()
      .join("\n")
  }

  fn stats(&self) -> String {
    let coordinator = self.client.coordinator();
    let stats = self.client.store().stats();
    let ambient = coordinator.ambient();

    let mut lines = vec![
      format!(
        "cache: {} entries, {} fresh, {} fetching",
        stats.entries, stats.fresh, stats.in_flight
      ),
      format!(
        "subscriptions: {}, online: {}, foreground: {}, remote reads: {}",
        coordinator.subscription_count(),
        ambient.is_online,
        ambient.is_foreground,
        self.remote.reads()
      ),
    ];
    for entry in self.client.store().summary() {
      lines.push(format!(
        "  {} {} ({})",
        if entry.fresh { "fresh" } else { "stale" },
        entry.key,
        entry.age
      ));
    }
    lines.join("\n")
  }

  /// Stop auto-refresh and the signal watcher
  fn shutdown(&mut self) {
    for screen in self.screens.drain(..) {
      screen.query.dispose();
    }
    self.watcher.abort();
  }
}

impl Drop for Shell {
  fn drop(&mut self) {
    self.watcher.abort();
  }
}

fn status_line(result: &QueryResult<Value>) -> String {
  let value = result
    .value
    .as_ref()
    .map(Value::to_string)
    .unwrap_or_else(|| "-".to_string());

  match result.status() {
    QueryStatus::Idle => "idle".to_string(),
    QueryStatus::Loading => "loading".to_string(),
    QueryStatus::Refreshing => format!("refreshing, showing {}", value),
    QueryStatus::Success => match result.last_updated {
      Some(at) => format!("{} (updated {})", value, at.format("%H:%M:%S UTC")),
      None => value,
    },
    QueryStatus::Error => {
      let error = result
        .error
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
      format!("error: {}; showing {}", error, value)
    }
  }
}

fn help() -> String {
  COMMANDS
    .iter()
    .map(|c| format!("  {:<52} {}", c.usage, c.description))
    .collect::<Vec<_>>()
    .join("\n")
}

fn usage(name: &str) -> &'static str {
  COMMANDS
    .iter()
    .find(|c| c.name == name)
    .map(|c| c.usage)
    .unwrap_or("")
}

/// Split off the first whitespace-separated token
fn next_token(input: &str) -> Option<(&str, &str)> {
  let input = input.trim_start();
  if input.is_empty() {
    return None;
  }
  Some(input.split_once(char::is_whitespace).unwrap_or((input, "")))
}

/// Parse zero or more whitespace-separated JSON documents
fn json_values(input: &str) -> Result<Vec<Value>> {
  serde_json::Deserializer::from_str(input)
    .into_iter::<Value>()
    .collect::<Result<Vec<_>, _>>()
    .map_err(|e| eyre!("Invalid JSON: {}", e))
}

fn screen_id(input: &str) -> Result<usize> {
  let token = input.trim();
  token
    .parse()
    .map_err(|_| eyre!("Expected a screen number, got '{}'", token))
}
