//! # Hot-Reload Detector
//!
//! Watches each installed plugin's source directory for changes, debounces
//! bursts of filesystem events per plugin, and triggers
//! [`PluginManager::reload`] once a plugin has been quiet for
//! `reload_debounce`. Only ever constructed in `dev_mode` — the host decides
//! whether to call [`HotReloadDetector::start`] at all.
//!
//! Built on a `notify`/`tokio::sync::mpsc` watch loop, generalized from a
//! single watched tree to one watcher multiplexed across every installed
//! plugin's directory, with a cancel-and-reschedule debounce per plugin
//! instead of returning on the first relevant event.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use plugin_kernel_sdk::{PluginContainer, PluginDefinition};

use crate::manager::PluginManager;

/// Produces the replacement definition and container for a plugin after its
/// directory has been quiet for the debounce window. Returns `None` when the
/// rebuild yields zero compiled units — per the inverted validity check, a
/// debounce firing on a build that produced nothing is treated as "not yet
/// ready" rather than "nothing to deploy", and reload is skipped rather than
/// tearing down the running instance.
pub type RebuildFn = Arc<
    dyn Fn(String) -> Pin<Box<dyn std::future::Future<Output = Option<(PluginDefinition, Arc<dyn PluginContainer>)>> + Send>>
        + Send
        + Sync,
>;

/// `true` iff `event` is a content change worth debouncing a reload over:
/// creates, modifies, and removes, excluding build-artifact and editor-swap
/// noise.
fn is_relevant_change(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|p| {
        let s = p.to_string_lossy();
        !s.contains("/target/")
            && !s.contains("/.git/")
            && !s.ends_with('~')
            && !s.ends_with(".swp")
            && !s.ends_with(".tmp")
    })
}

/// Map a changed path back to the plugin id owning it: the first path
/// component under the watched root.
fn plugin_id_for_path(root: &Path, changed: &Path) -> Option<String> {
    let relative = changed.strip_prefix(root).ok()?;
    relative
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
}

/// Per-plugin cancel-and-reschedule debounce: each call to [`trigger`]
/// aborts any pending fire for that plugin and schedules a new one
/// `debounce` in the future. Kept independent of the filesystem glue so the
/// scheduling behavior is testable without real fs events.
pub struct Debouncer {
    debounce: Duration,
    pending: DashMap<String, tokio::task::JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: DashMap::new(),
        }
    }

    /// Cancel any pending fire for `plugin_id` and schedule a new one. The
    /// previous task's abort means a burst of edits collapses to exactly one
    /// fire, `debounce` after the last one.
    pub fn trigger<F>(self: &Arc<Self>, plugin_id: String, on_fire: F)
    where
        F: FnOnce() -> Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + 'static,
    {
        if let Some((_, handle)) = self.pending.remove(&plugin_id) {
            handle.abort();
        }
        let debounce = self.debounce;
        let this = self.clone();
        let key = plugin_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            this.pending.remove(&key);
            on_fire().await;
        });
        self.pending.insert(plugin_id, handle);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Owns the filesystem watcher and the per-plugin debouncers, wired to call
/// back into a [`PluginManager`] on a settled change.
pub struct HotReloadDetector {
    manager: Arc<PluginManager>,
    watch_roots: Vec<PathBuf>,
    rebuild: RebuildFn,
    debouncer: Arc<Debouncer>,
}

impl HotReloadDetector {
    pub fn new(
        manager: Arc<PluginManager>,
        watch_roots: Vec<PathBuf>,
        debounce: Duration,
        rebuild: RebuildFn,
    ) -> Self {
        Self {
            manager,
            watch_roots,
            rebuild,
            debouncer: Arc::new(Debouncer::new(debounce)),
        }
    }

    /// Start watching every configured root. Spawns the blocking `notify`
    /// watcher on its own thread (its callback cannot be async) bridged to
    /// this runtime through an mpsc channel, and an async task draining that
    /// channel into per-plugin debounce triggers. Returns the watcher handle
    /// so the caller controls its lifetime — dropping it stops watching.
    pub fn start(self: Arc<Self>) -> notify::Result<RecommendedWatcher> {
        let (tx, mut rx) = mpsc::channel::<Event>(256);
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.blocking_send(event);
                }
            },
            notify::Config::default(),
        )?;
        for root in &self.watch_roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
        }

        let roots = self.watch_roots.clone();
        let detector = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !is_relevant_change(&event) {
                    continue;
                }
                let mut touched: HashMap<String, ()> = HashMap::new();
                for path in &event.paths {
                    for root in &roots {
                        if let Some(plugin_id) = plugin_id_for_path(root, path) {
                            touched.insert(plugin_id, ());
                        }
                    }
                }
                for plugin_id in touched.into_keys() {
                    detector.schedule_reload(plugin_id);
                }
            }
        });

        Ok(watcher)
    }

    fn schedule_reload(self: &Arc<Self>, plugin_id: String) {
        let manager = self.manager.clone();
        let rebuild = self.rebuild.clone();
        self.debouncer.trigger(plugin_id.clone(), move || {
            Box::pin(async move {
                match rebuild(plugin_id.clone()).await {
                    Some((definition, container)) => {
                        if let Err(e) = manager.reload(definition, container).await {
                            tracing::warn!(plugin_id, error = %e, "hot-reload failed");
                        }
                    }
                    None => {
                        tracing::debug!(plugin_id, "hot-reload skipped: zero compiled units");
                    }
                }
            })
        });
    }
}
