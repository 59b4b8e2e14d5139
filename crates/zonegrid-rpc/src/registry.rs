//! Registry for locally exposed service objects, keyed by service type.

use crate::service::{EventListener, ServiceEvent, ServiceMethod, ServiceObject};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use zonegrid_types::{ZoneGridError, ZoneGridResult};

/// Metadata describing one registered service object.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    /// Service type (API URI).
    pub api: String,
    /// Content-derived fingerprint; stable across processes for identical
    /// `(api, display_name, description)`.
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub registered_at: DateTime<Utc>,
}

/// A service object frozen into the registry: metadata plus its dispatch
/// table and event listeners. Listeners stay mutable after registration;
/// the dispatch table does not.
pub struct RegisteredService {
    info: ServiceInfo,
    methods: HashMap<String, Arc<dyn ServiceMethod>>,
    listeners: RwLock<HashMap<String, Vec<Arc<dyn EventListener>>>>,
}

impl RegisteredService {
    pub fn info(&self) -> &ServiceInfo {
        &self.info
    }

    /// Look up a method handler by its (possibly dotted) dispatch key.
    pub fn handler(&self, method: &str) -> Option<Arc<dyn ServiceMethod>> {
        self.methods.get(method).cloned()
    }
}

/// Hook invoked after every register/unregister so a parent coordinator can
/// republish the zone's service set.
pub trait RegistryWatcher: Send + Sync {
    fn services_changed(&self);
}

/// Holds the service objects local to one node.
pub struct Registry {
    objects: RwLock<HashMap<String, Vec<Arc<RegisteredService>>>>,
    watcher: RwLock<Option<Arc<dyn RegistryWatcher>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            watcher: RwLock::new(None),
        }
    }

    /// Install the re-publish hook.
    pub fn set_watcher(&self, watcher: Arc<dyn RegistryWatcher>) {
        let mut slot = self.watcher.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(watcher);
    }

    /// Register a service object as an RPC request receiver.
    ///
    /// The fingerprint id is computed here. Registering a second object with
    /// the same `(api, id)` is a local bug: it fails and leaves the registry
    /// unchanged.
    pub fn register_object(&self, object: ServiceObject) -> ZoneGridResult<ServiceInfo> {
        let id = fingerprint(&object.api, &object.display_name, &object.description);
        let info = ServiceInfo {
            api: object.api.clone(),
            id: id.clone(),
            display_name: object.display_name.clone(),
            description: object.description.clone(),
            registered_at: Utc::now(),
        };

        {
            let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
            let entries = objects.entry(object.api.clone()).or_default();
            if entries.iter().any(|existing| existing.info.id == id) {
                return Err(ZoneGridError::DuplicateService { api: object.api, id });
            }
            debug!(api = %info.api, id = %info.id, "Registering service object");
            entries.push(Arc::new(RegisteredService {
                info: info.clone(),
                methods: object.methods,
                listeners: RwLock::new(object.listeners),
            }));
        }

        self.notify_watcher();
        Ok(info)
    }

    /// Unregister the object matching `(api, id)`; removes the type entry
    /// when its list empties.
    pub fn unregister_object(&self, api: &str, id: &str) {
        {
            let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
            if let Some(entries) = objects.get_mut(api) {
                debug!(api = %api, id = %id, "Removing service object");
                entries.retain(|existing| existing.info.id != id);
                if entries.is_empty() {
                    objects.remove(api);
                }
            }
        }

        self.notify_watcher();
    }

    /// Snapshot of all registered objects, `type -> [service info]`.
    pub fn registered_objects_map(&self) -> HashMap<String, Vec<ServiceInfo>> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects
            .iter()
            .map(|(api, entries)| {
                (
                    api.clone(),
                    entries.iter().map(|s| s.info.clone()).collect(),
                )
            })
            .collect()
    }

    /// Find a service by type and fingerprint id.
    ///
    /// Meta-service types (discovery/dashboard style) are always-singleton
    /// and are not expected to carry a meaningful id: when no exact match
    /// exists, the first object of the type is returned for them.
    pub fn service_with_type_and_id(
        &self,
        api: &str,
        id: Option<&str>,
    ) -> Option<Arc<RegisteredService>> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        let entries = objects.get(api)?;

        if let Some(id) = id {
            if let Some(found) = entries.iter().find(|s| s.info.id == id) {
                return Some(Arc::clone(found));
            }
        }
        if is_meta_service(api) {
            return entries.first().cloned();
        }
        None
    }

    /// Broadcast an event to every registered object listening for it. A
    /// failing listener is logged and never aborts delivery to the rest.
    pub fn emit_event(&self, event: &ServiceEvent) {
        let services: Vec<Arc<RegisteredService>> = {
            let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
            objects.values().flatten().cloned().collect()
        };

        for service in services {
            let listeners: Vec<Arc<dyn EventListener>> = {
                let table = service.listeners.read().unwrap_or_else(|e| e.into_inner());
                match table.get(&event.name) {
                    Some(listeners) => listeners.clone(),
                    None => continue,
                }
            };
            for listener in listeners {
                if let Err(error) = listener.on_event(event) {
                    warn!(
                        api = %service.info.api,
                        event = %event.name,
                        error = %error,
                        "Service event listener failed"
                    );
                }
            }
        }
    }

    /// Attach a listener to an already-registered service. Unknown targets
    /// are logged and ignored.
    pub fn add_listener(
        &self,
        api: &str,
        id: &str,
        event: impl Into<String>,
        listener: Arc<dyn EventListener>,
    ) {
        let Some(service) = self.find(api, id) else {
            warn!(api = %api, id = %id, "Cannot add listener, service not registered");
            return;
        };
        let mut table = service.listeners.write().unwrap_or_else(|e| e.into_inner());
        table.entry(event.into()).or_default().push(listener);
    }

    /// Detach a listener. Removing one that was never attached is a no-op,
    /// logged for diagnosis.
    pub fn remove_listener(
        &self,
        api: &str,
        id: &str,
        event: &str,
        listener: &Arc<dyn EventListener>,
    ) {
        let Some(service) = self.find(api, id) else {
            debug!(api = %api, id = %id, "No-op listener removal, service not registered");
            return;
        };
        let mut table = service.listeners.write().unwrap_or_else(|e| e.into_inner());
        let Some(listeners) = table.get_mut(event) else {
            debug!(api = %api, event = %event, "No-op listener removal, event has no listeners");
            return;
        };
        let before = listeners.len();
        listeners.retain(|existing| !Arc::ptr_eq(existing, listener));
        if listeners.len() == before {
            debug!(api = %api, event = %event, "No-op listener removal, listener not attached");
        }
    }

    fn find(&self, api: &str, id: &str) -> Option<Arc<RegisteredService>> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects
            .get(api)?
            .iter()
            .find(|s| s.info.id == id)
            .map(Arc::clone)
    }

    fn notify_watcher(&self) {
        let watcher = {
            let slot = self.watcher.read().unwrap_or_else(|e| e.into_inner());
            slot.clone()
        };
        if let Some(watcher) = watcher {
            watcher.services_changed();
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Reserved always-singleton meta-service categories, addressed by type
/// alone.
pub fn is_meta_service(api: &str) -> bool {
    api.contains("ServiceDiscovery") || api.contains("Dashboard")
}

/// Deterministic fingerprint over a service's identifying fields.
pub fn fingerprint(api: &str, display_name: &str, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api.as_bytes());
    hasher.update(display_name.as_bytes());
    hasher.update(description.as_bytes());
    hex::encode(hasher.finalize())
}
