use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::FallbackConfig;

/// Loads the fallback configuration from disk and optionally hot-reloads it.
///
/// This crate plays the role spec §1 calls "configuration file discovery and
/// parsing, hot-reload file watching" — an external collaborator that hands
/// the engine an already-validated [`FallbackConfig`] snapshot via
/// `FallbackEngine::update_config`. The engine itself never touches the
/// filesystem.
pub struct ConfigLoader {
    config: Arc<RwLock<FallbackConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > RATEWARDEN_CONFIG env >
    /// ~/.ratewarden/fallback.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("RATEWARDEN_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ratewarden")
            .join("fallback.toml")
    }

    /// Load the config from disk, falling back to defaults if the file is
    /// absent. Applies env overrides, then repairs (I4) and strictly
    /// validates the result.
    pub fn load(path: Option<&Path>) -> ratewarden_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let mut config = if config_path.exists() {
            info!(?config_path, "loading fallback configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str::<FallbackConfig>(&raw).map_err(|e| {
                ratewarden_core::RwError::Config(format!(
                    "failed to parse {}: {}",
                    config_path.display(),
                    e
                ))
            })?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            FallbackConfig::default()
        };

        config = Self::apply_env_overrides(config);

        for w in config.validate_and_repair() {
            warn!("{}", w);
        }
        config
            .validate_strict()
            .map_err(ratewarden_core::RwError::Config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> FallbackConfig {
        self.config.read().clone()
    }

    /// Shared handle, for wiring into a reload callback.
    pub fn shared(&self) -> Arc<RwLock<FallbackConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn apply_env_overrides(mut config: FallbackConfig) -> FallbackConfig {
        if let Ok(v) = std::env::var("RATEWARDEN_COOLDOWN_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                config.cooldown_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("RATEWARDEN_MAX_RETRIES") {
            if let Ok(n) = v.parse::<u32>() {
                config.retry_policy.max_retries = n;
            }
        }
        if let Ok(v) = std::env::var("RATEWARDEN_HEALTH_SELECTION") {
            config.health_selection_enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        config
    }

    /// Reload the config from disk into the shared snapshot.
    pub fn reload(&self) -> ratewarden_core::Result<()> {
        if !self.config_path.exists() {
            return Err(ratewarden_core::RwError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let mut new_config = toml::from_str::<FallbackConfig>(&raw).map_err(|e| {
            ratewarden_core::RwError::Config(format!(
                "failed to parse {}: {}",
                self.config_path.display(),
                e
            ))
        })?;
        new_config = Self::apply_env_overrides(new_config);
        for w in new_config.validate_and_repair() {
            warn!("{}", w);
        }
        new_config
            .validate_strict()
            .map_err(ratewarden_core::RwError::Config)?;
        *self.config.write() = new_config;
        info!("fallback configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that reloads the shared snapshot
    /// whenever the config file changes. The returned watcher must be kept
    /// alive for watching to continue; dropping it stops the watch.
    ///
    /// Unlike `reload`, which overwrites this loader's own snapshot, this
    /// takes an explicit `on_reload` callback so the caller (typically the
    /// binary wiring `FallbackEngine::update_config`) decides what happens
    /// with the new config — the engine's update path does more than a
    /// plain field swap (circuit breaker / prioritizer recreation, spec §6).
    pub fn watch(
        &self,
        on_reload: impl Fn(FallbackConfig) + Send + 'static,
    ) -> ratewarden_core::Result<notify::RecommendedWatcher> {
        let config_path = self.config_path.clone();
        info!(?config_path, "starting fallback config file watcher");

        let path_for_event = config_path.clone();
        let mut watcher = notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| {
            match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    let is_our_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == path_for_event.file_name());
                    if !is_our_file {
                        return;
                    }
                    info!("fallback config file changed, reloading");
                    match std::fs::read_to_string(&path_for_event) {
                        Ok(raw) => match toml::from_str::<FallbackConfig>(&raw) {
                            Ok(mut new_config) => {
                                new_config = ConfigLoader::apply_env_overrides(new_config);
                                for w in new_config.validate_and_repair() {
                                    warn!("{}", w);
                                }
                                if let Err(e) = new_config.validate_strict() {
                                    warn!(error = %e, "reloaded config failed strict validation, keeping current config");
                                    return;
                                }
                                on_reload(new_config);
                                info!("fallback configuration hot-reloaded successfully");
                            }
                            Err(e) => {
                                warn!(error = %e, "config file has errors, keeping current config");
                            }
                        },
                        Err(e) => {
                            warn!(error = %e, "failed to read config file during hot-reload");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "file watcher error");
                }
            }
        })
        .map_err(|e| {
            ratewarden_core::RwError::Config(format!("failed to create file watcher: {e}"))
        })?;

        let watch_path = self.config_path.parent().unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                ratewarden_core::RwError::Config(format!("failed to watch config directory: {e}"))
            })?;

        Ok(watcher)
    }
}
