//! Cache coordinator
//!
//! The sole gateway for catalog and configuration data. Reads are
//! cache-aside: local store first, backend on a miss, store updated from
//! the response. Saves are write-through: the backend confirms before the
//! local copy changes. Corrupt cached entries are purged and refetched
//! instead of being surfaced, and a backend restart (observed through the
//! startup identifier) invalidates the cached configuration.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::store::KvStore;
use crate::api::{ApiResponse, CatalogCard, Config, Transport};

/// Storage key prefix for per-path catalog entries
pub const CATALOG_PREFIX: &str = "catalog_";
/// Storage key for the cached configuration
pub const CONFIG_KEY: &str = "sys_config";
/// Storage key for the last observed server startup identifier
pub const SERVER_ID_KEY: &str = "sys_server_id";

/// Outcome of a best-effort cache write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreWrite {
    /// The value is in the store
    Committed,
    /// The write failed and was swallowed; the cache stays stale or absent
    Degraded,
}

/// Outcome of a server identity reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityCheck {
    /// The status call failed or carried no identifier; nothing was done
    Skipped,
    /// Identifier matches the stored one; nothing was done
    Unchanged,
    /// First observation or a changed identifier; the config cache was
    /// flushed and the new identifier recorded
    RestartDetected {
        previous: Option<String>,
        current: String,
    },
}

/// Mediates every catalog and configuration access between callers and
/// the backend. The transport and the store handle are injected at
/// construction; nothing else may touch the coordinator's storage keys.
pub struct CacheCoordinator<T, S> {
    transport: T,
    store: S,
}

impl<T: Transport, S: KvStore> CacheCoordinator<T, S> {
    pub fn new(transport: T, store: S) -> Self {
        Self { transport, store }
    }

    /// Access the underlying transport, for operations that bypass the
    /// cache entirely (job control).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch catalog cards for a path, serving from cache when possible.
    ///
    /// A cached entry that no longer deserializes is purged and treated
    /// as a miss. Always terminates in an envelope; a transport failure
    /// passes through unchanged.
    ///
    /// # Arguments
    /// * `path` - Catalog path, used verbatim in the storage key
    /// * `force_refresh` - Skip the cache lookup and fetch from the backend
    pub async fn get_catalog(
        &self,
        path: &str,
        force_refresh: bool,
    ) -> ApiResponse<Vec<CatalogCard>> {
        let cache_key = format!("{CATALOG_PREFIX}{path}");

        if !force_refresh {
            if let Some(raw) = self.store.get(&cache_key) {
                match serde_json::from_str::<Vec<CatalogCard>>(&raw) {
                    Ok(cards) => {
                        debug!(key = %cache_key, "Catalog cache hit");
                        return ApiResponse::ok(cards);
                    }
                    Err(e) => {
                        warn!(key = %cache_key, error = %e, "Cached catalog entry corrupt, purging");
                        self.store.remove(&cache_key);
                    }
                }
            }
        }

        let response = self.transport.get_library_files(path).await;
        if !response.success {
            return response;
        }
        match response.data {
            Some(cards) => {
                self.cache_put(&cache_key, &cards);
                ApiResponse::ok(cards)
            }
            // A success envelope with no payload is unusable; report a
            // generic failure instead of passing it through.
            None => ApiResponse::err("Unknown error retrieving catalog"),
        }
    }

    /// Fetch the configuration, serving from cache when possible.
    ///
    /// Beyond being parseable, a cached value must expose a `server`
    /// section; anything else is purged and refetched. A transport
    /// failure leaves the cache untouched.
    pub async fn get_config(&self, force_refresh: bool) -> ApiResponse<Config> {
        if !force_refresh {
            if let Some(raw) = self.store.get(CONFIG_KEY) {
                match Self::parse_cached_config(&raw) {
                    Some(config) => {
                        debug!("Config cache hit");
                        return ApiResponse::ok(config);
                    }
                    None => self.store.remove(CONFIG_KEY),
                }
            }
        }

        let response = self.transport.get_config().await;
        if !response.success {
            return response;
        }
        match response.data {
            Some(config) => {
                self.cache_put(CONFIG_KEY, &config);
                ApiResponse::ok(config)
            }
            None => ApiResponse::err("Unknown error retrieving configuration"),
        }
    }

    /// Persist a configuration (write-through).
    ///
    /// The backend is always asked first; the local cache changes only
    /// after it confirms. The reply may wrap the persisted object one
    /// level deep or echo it directly; either way exactly the unwrapped
    /// object is cached and returned. On failure the cache is untouched
    /// and the failure envelope is returned as-is.
    pub async fn save_config(&self, config: &Config) -> ApiResponse<Config> {
        let response = self.transport.save_config(config).await;

        if !response.success {
            return ApiResponse {
                success: false,
                data: None,
                error: response.error,
            };
        }

        let persisted = match response.data {
            Some(reply) => reply.into_config(),
            // Confirmed save with no echo: fall back to what was submitted
            None => config.clone(),
        };

        self.cache_put(CONFIG_KEY, &persisted);
        ApiResponse::ok(persisted)
    }

    /// Reconcile the stored server identity with the live backend.
    ///
    /// Best-effort: a failed status call or a missing identifier is a
    /// silent no-op. A first-ever or changed identifier means the backend
    /// restarted and lost its in-memory state, so the cached configuration
    /// is flushed before the new identifier is recorded. The catalog cache
    /// is deliberately left intact; a restart does not change what was
    /// already indexed.
    pub async fn verify_server_identity(&self) -> IdentityCheck {
        let response = self.transport.get_server_status().await;
        if !response.success {
            return IdentityCheck::Skipped;
        }
        let current = match response.data.and_then(|status| status.startup_time) {
            Some(id) => id,
            None => return IdentityCheck::Skipped,
        };

        let previous = self.store.get(SERVER_ID_KEY);
        if previous.as_deref() == Some(current.as_str()) {
            return IdentityCheck::Unchanged;
        }

        info!(previous = ?previous, current = %current, "Server restart detected, flushing config cache");
        self.flush_config();
        if let Err(e) = self.store.set(SERVER_ID_KEY, &current) {
            warn!(error = %e, "Failed to record server identity");
        }

        IdentityCheck::RestartDetected { previous, current }
    }

    /// Remove every cached catalog entry, leaving the configuration and
    /// identity entries untouched. Safe to call on an empty cache.
    pub fn flush_catalog(&self) {
        let mut removed = 0usize;
        for key in self.store.keys() {
            if key.starts_with(CATALOG_PREFIX) {
                self.store.remove(&key);
                removed += 1;
            }
        }
        debug!(removed = removed, "Catalog cache flushed");
    }

    /// Remove the cached configuration. Safe to call when none is cached.
    pub fn flush_config(&self) {
        self.store.remove(CONFIG_KEY);
        debug!("Config cache flushed");
    }

    /// Validate and decode a cached configuration value. Returns None when
    /// the value is corrupt or lacks the required `server` section.
    fn parse_cached_config(raw: &str) -> Option<Config> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Cached config unparsable, flushing");
                return None;
            }
        };

        if !value.get("server").is_some_and(Value::is_object) {
            warn!("Cached config invalid (missing server section), flushing");
            return None;
        }

        match serde_json::from_value::<Config>(value) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(error = %e, "Cached config does not match the expected shape, flushing");
                None
            }
        }
    }

    /// Serialize and store a value, swallowing (but recording) write
    /// failures: a fetched result is still returned to the caller even
    /// when it could not be cached.
    fn cache_put<V: Serialize>(&self, key: &str, value: &V) -> StoreWrite {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to serialize cache value");
                return StoreWrite::Degraded;
            }
        };
        match self.store.set(key, &json) {
            Ok(()) => StoreWrite::Committed,
            Err(e) => {
                warn!(key = key, error = %e, "Cache write failed, keeping result uncached");
                StoreWrite::Degraded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::api::{
        FilterRules, ModuleCommon, SaveConfigReply, SegmentingSettings, ServerSettings,
        ServerStatus, WeedingSettings,
    };
    use crate::cache::store::MemoryStore;

    /// Scripted transport that records how many times each operation ran
    #[derive(Default)]
    struct ScriptedTransport {
        status_calls: AtomicUsize,
        catalog_calls: AtomicUsize,
        config_calls: AtomicUsize,
        save_calls: AtomicUsize,
        status_response: Mutex<Option<ApiResponse<ServerStatus>>>,
        catalog_response: Mutex<Option<ApiResponse<Vec<CatalogCard>>>>,
        config_response: Mutex<Option<ApiResponse<Config>>>,
        save_response: Mutex<Option<ApiResponse<SaveConfigReply>>>,
    }

    impl ScriptedTransport {
        fn script_status(&self, response: ApiResponse<ServerStatus>) {
            *self.status_response.lock().unwrap() = Some(response);
        }

        fn script_catalog(&self, response: ApiResponse<Vec<CatalogCard>>) {
            *self.catalog_response.lock().unwrap() = Some(response);
        }

        fn script_config(&self, response: ApiResponse<Config>) {
            *self.config_response.lock().unwrap() = Some(response);
        }

        fn script_save(&self, response: ApiResponse<SaveConfigReply>) {
            *self.save_response.lock().unwrap() = Some(response);
        }
    }

    #[async_trait::async_trait]
    impl<'a> Transport for &'a ScriptedTransport {
        async fn get_server_status(&self) -> ApiResponse<ServerStatus> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            self.status_response
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| ApiResponse::err("no scripted status"))
        }

        async fn get_library_files(&self, _path: &str) -> ApiResponse<Vec<CatalogCard>> {
            self.catalog_calls.fetch_add(1, Ordering::SeqCst);
            self.catalog_response
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| ApiResponse::err("no scripted catalog"))
        }

        async fn get_config(&self) -> ApiResponse<Config> {
            self.config_calls.fetch_add(1, Ordering::SeqCst);
            self.config_response
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| ApiResponse::err("no scripted config"))
        }

        async fn save_config(&self, _config: &Config) -> ApiResponse<SaveConfigReply> {
            self.save_calls.fetch_add(1, Ordering::SeqCst);
            self.save_response
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| ApiResponse::err("no scripted save"))
        }
    }

    fn sample_cards(tag: &str) -> Vec<CatalogCard> {
        vec![CatalogCard {
            name: format!("{tag}.txt"),
            path: format!("/library/{tag}.txt"),
            size_bytes: 42,
            is_directory: false,
            modified: 1_714_070_000,
        }]
    }

    fn sample_config(host: &str) -> Config {
        let common = ModuleCommon {
            dry_run_mode: true,
            log_path: "logs".to_string(),
            log_file_prefix: "weeding".to_string(),
        };
        Config {
            server: ServerSettings {
                host: host.to_string(),
                port: 8000,
                root_path: "/library".to_string(),
                scripts_dir: "scripts".to_string(),
                frontend_port: None,
            },
            weeding: WeedingSettings {
                common: common.clone(),
                holding_bin: "holding_bin".to_string(),
                filters: FilterRules::default(),
            },
            segmenting: SegmentingSettings {
                common,
                max_mb: 100,
                chunk_limit: 1000,
                filters: FilterRules::default(),
            },
        }
    }

    fn status_with_identity(id: &str) -> ApiResponse<ServerStatus> {
        ApiResponse::ok(ServerStatus {
            status: "online".to_string(),
            message: None,
            startup_time: Some(id.to_string()),
        })
    }

    #[tokio::test]
    async fn test_second_catalog_read_is_a_cache_hit() {
        let transport = ScriptedTransport::default();
        transport.script_catalog(ApiResponse::ok(sample_cards("alice")));
        let console = CacheCoordinator::new(&transport, MemoryStore::new());

        let first = console.get_catalog("/library", false).await;
        let second = console.get_catalog("/library", false).await;

        assert!(first.success && second.success);
        assert_eq!(first.data, second.data);
        assert_eq!(transport.catalog_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forced_refresh_always_fetches_and_overwrites() {
        let transport = ScriptedTransport::default();
        transport.script_catalog(ApiResponse::ok(sample_cards("alice")));
        let console = CacheCoordinator::new(&transport, MemoryStore::new());

        console.get_catalog("/library", false).await;

        transport.script_catalog(ApiResponse::ok(sample_cards("bob")));
        let refreshed = console.get_catalog("/library", true).await;

        assert_eq!(transport.catalog_calls.load(Ordering::SeqCst), 2);
        assert_eq!(refreshed.data.unwrap()[0].name, "bob.txt");

        // The stored entry was replaced, so an unforced read now sees bob
        let cached = console.get_catalog("/library", false).await;
        assert_eq!(cached.data.unwrap()[0].name, "bob.txt");
        assert_eq!(transport.catalog_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_corrupt_catalog_entry_is_purged_and_refetched() {
        let transport = ScriptedTransport::default();
        transport.script_catalog(ApiResponse::ok(sample_cards("alice")));
        let store = MemoryStore::new();
        store.set("catalog_/library", "{definitely not json").unwrap();
        let console = CacheCoordinator::new(&transport, store);

        let response = console.get_catalog("/library", false).await;

        assert!(response.success);
        assert_eq!(transport.catalog_calls.load(Ordering::SeqCst), 1);
        // The corrupt value was replaced by the fresh fetch
        let healed = console.store.get("catalog_/library").unwrap();
        assert!(serde_json::from_str::<Vec<CatalogCard>>(&healed).is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_removed_even_when_refetch_fails() {
        let transport = ScriptedTransport::default();
        transport.script_catalog(ApiResponse::err("backend down"));
        let store = MemoryStore::new();
        store.set("catalog_/library", "{bad").unwrap();
        let console = CacheCoordinator::new(&transport, store);

        let response = console.get_catalog("/library", false).await;

        assert!(!response.success);
        assert_eq!(transport.catalog_calls.load(Ordering::SeqCst), 1);
        // The corrupt value is gone even though nothing replaced it
        assert!(console.store.get("catalog_/library").is_none());
    }

    #[tokio::test]
    async fn test_catalog_failure_passes_through_and_keeps_cache() {
        let transport = ScriptedTransport::default();
        transport.script_catalog(ApiResponse::ok(sample_cards("alice")));
        let console = CacheCoordinator::new(&transport, MemoryStore::new());
        console.get_catalog("/library", false).await;

        transport.script_catalog(ApiResponse::err("backend down"));
        let failed = console.get_catalog("/library", true).await;

        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("backend down"));
        // Failure never evicts previously valid data
        assert!(console.store.get("catalog_/library").is_some());
    }

    #[tokio::test]
    async fn test_success_without_payload_becomes_generic_failure() {
        let transport = ScriptedTransport::default();
        transport.script_catalog(ApiResponse {
            success: true,
            data: None,
            error: None,
        });
        let console = CacheCoordinator::new(&transport, MemoryStore::new());

        let response = console.get_catalog("/library", false).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("Unknown error"));
    }

    #[tokio::test]
    async fn test_degraded_store_write_still_returns_fetched_data() {
        let transport = ScriptedTransport::default();
        transport.script_catalog(ApiResponse::ok(sample_cards("alice")));
        let store = MemoryStore::new();
        store.fail_writes(true);
        let console = CacheCoordinator::new(&transport, store);

        let response = console.get_catalog("/library", false).await;

        assert!(response.success);
        assert_eq!(response.data.unwrap().len(), 1);
        // The write was swallowed; the key stayed absent
        assert!(console.store.get("catalog_/library").is_none());
        assert_eq!(
            console.cache_put("catalog_/library", &sample_cards("alice")),
            StoreWrite::Degraded
        );
    }

    #[tokio::test]
    async fn test_serverless_config_is_treated_as_corrupt() {
        let transport = ScriptedTransport::default();
        transport.script_config(ApiResponse::ok(sample_config("localhost")));
        let store = MemoryStore::new();
        store
            .set(CONFIG_KEY, r#"{"weeding": {}, "segmenting": {}}"#)
            .unwrap();
        let console = CacheCoordinator::new(&transport, store);

        let response = console.get_config(false).await;

        assert!(response.success);
        assert_eq!(transport.config_calls.load(Ordering::SeqCst), 1);
        let healed = console.store.get(CONFIG_KEY).unwrap();
        let value: Value = serde_json::from_str(&healed).unwrap();
        assert!(value.get("server").is_some());
    }

    #[tokio::test]
    async fn test_cached_config_skips_the_network() {
        let transport = ScriptedTransport::default();
        transport.script_config(ApiResponse::ok(sample_config("localhost")));
        let console = CacheCoordinator::new(&transport, MemoryStore::new());

        let first = console.get_config(false).await;
        let second = console.get_config(false).await;

        assert_eq!(first.data, second.data);
        assert_eq!(transport.config_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_save_config_caches_the_unwrapped_object() {
        let transport = ScriptedTransport::default();
        let persisted = sample_config("archive.internal");
        transport.script_save(ApiResponse::ok(SaveConfigReply::Enveloped {
            message: Some("Configuration updated".to_string()),
            data: persisted.clone(),
        }));
        let console = CacheCoordinator::new(&transport, MemoryStore::new());

        let response = console.save_config(&sample_config("localhost")).await;

        assert!(response.success);
        assert_eq!(response.data.as_ref().unwrap().server.host, "archive.internal");
        // The stored value is the unwrapped config, not the outer envelope
        let cached = console.store.get(CONFIG_KEY).unwrap();
        assert_eq!(cached, serde_json::to_string(&persisted).unwrap());
    }

    #[tokio::test]
    async fn test_save_config_falls_back_to_submitted_value() {
        let transport = ScriptedTransport::default();
        transport.script_save(ApiResponse {
            success: true,
            data: None,
            error: None,
        });
        let console = CacheCoordinator::new(&transport, MemoryStore::new());

        let submitted = sample_config("localhost");
        let response = console.save_config(&submitted).await;

        assert!(response.success);
        assert_eq!(
            console.store.get(CONFIG_KEY).unwrap(),
            serde_json::to_string(&submitted).unwrap()
        );
    }

    #[tokio::test]
    async fn test_failed_save_leaves_cached_config_untouched() {
        let transport = ScriptedTransport::default();
        transport.script_config(ApiResponse::ok(sample_config("localhost")));
        let console = CacheCoordinator::new(&transport, MemoryStore::new());
        console.get_config(false).await;
        let before = console.store.get(CONFIG_KEY).unwrap();

        transport.script_save(ApiResponse::err("disk full on backend"));
        let response = console.save_config(&sample_config("elsewhere")).await;

        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("disk full on backend"));
        assert_eq!(console.store.get(CONFIG_KEY).unwrap(), before);
        assert_eq!(transport.save_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_identity_reconciliation_lifecycle() {
        let transport = ScriptedTransport::default();
        let store = MemoryStore::new();
        store.set(CONFIG_KEY, r#"{"server": {}}"#).unwrap();
        store.set("catalog_/library", "[]").unwrap();
        let console = CacheCoordinator::new(&transport, store);

        // First-ever observation counts as a restart
        transport.script_status(status_with_identity("1000"));
        let first = console.verify_server_identity().await;
        assert_eq!(
            first,
            IdentityCheck::RestartDetected {
                previous: None,
                current: "1000".to_string()
            }
        );
        assert!(console.store.get(CONFIG_KEY).is_none());
        assert_eq!(console.store.get(SERVER_ID_KEY).as_deref(), Some("1000"));

        // Unchanged identifier is a no-op
        console.store.set(CONFIG_KEY, r#"{"server": {}}"#).unwrap();
        let second = console.verify_server_identity().await;
        assert_eq!(second, IdentityCheck::Unchanged);
        assert!(console.store.get(CONFIG_KEY).is_some());

        // A changed identifier flushes config again and updates the record
        transport.script_status(status_with_identity("2000"));
        let third = console.verify_server_identity().await;
        assert_eq!(
            third,
            IdentityCheck::RestartDetected {
                previous: Some("1000".to_string()),
                current: "2000".to_string()
            }
        );
        assert!(console.store.get(CONFIG_KEY).is_none());
        assert_eq!(console.store.get(SERVER_ID_KEY).as_deref(), Some("2000"));

        // The catalog cache survived all three checks
        assert_eq!(console.store.get("catalog_/library").as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_identity_check_failure_is_a_silent_noop() {
        let transport = ScriptedTransport::default();
        let store = MemoryStore::new();
        store.set(CONFIG_KEY, r#"{"server": {}}"#).unwrap();
        let console = CacheCoordinator::new(&transport, store);

        // Status call fails outright
        transport.script_status(ApiResponse::err("connection refused"));
        assert_eq!(console.verify_server_identity().await, IdentityCheck::Skipped);

        // Status succeeds but carries no identifier
        transport.script_status(ApiResponse::ok(ServerStatus {
            status: "online".to_string(),
            message: None,
            startup_time: None,
        }));
        assert_eq!(console.verify_server_identity().await, IdentityCheck::Skipped);

        assert!(console.store.get(CONFIG_KEY).is_some());
        assert!(console.store.get(SERVER_ID_KEY).is_none());
    }

    #[tokio::test]
    async fn test_flush_catalog_removes_only_prefixed_keys() {
        let transport = ScriptedTransport::default();
        let store = MemoryStore::new();
        store.set("catalog_/library", "[]").unwrap();
        store.set("catalog_/library/fiction", "[]").unwrap();
        store.set(CONFIG_KEY, r#"{"server": {}}"#).unwrap();
        store.set(SERVER_ID_KEY, "1000").unwrap();
        let console = CacheCoordinator::new(&transport, store);

        console.flush_catalog();

        assert!(console.store.get("catalog_/library").is_none());
        assert!(console.store.get("catalog_/library/fiction").is_none());
        assert!(console.store.get(CONFIG_KEY).is_some());
        assert_eq!(console.store.get(SERVER_ID_KEY).as_deref(), Some("1000"));
    }

    #[tokio::test]
    async fn test_flushes_are_idempotent() {
        let transport = ScriptedTransport::default();
        let store = MemoryStore::new();
        store.set("unrelated", "kept").unwrap();
        let console = CacheCoordinator::new(&transport, store);

        console.flush_catalog();
        console.flush_config();
        console.flush_catalog();
        console.flush_config();

        assert_eq!(console.store.get("unrelated").as_deref(), Some("kept"));
    }
}
