//! Registry implementation

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::binder::EndpointBinder;
use crate::domain::{
    FunctionsConfiguration, KeyValueSetting, ManagerKey, SharedConfiguration, TaskParameter, TaskResult,
};
use crate::error::{FunctionsError, Result};
use crate::http::HttpBinder;
use crate::manager::Manager;

static GLOBAL: OnceLock<Registry> = OnceLock::new();

struct Registration {
    manager: Manager,
    bind: Option<SocketAddr>,
}

#[derive(Default)]
struct RegistryState {
    managers: HashMap<ManagerKey, Registration>,
    key_values: Vec<KeyValueSetting>,
}

struct Shared {
    state: Mutex<RegistryState>,
    configuration: SharedConfiguration,
    binder: Arc<dyn EndpointBinder>,
}

/// Map from (component, state machine) to its Manager, plus shared settings
///
/// Cheap to clone; clones share the same map. Use [`Registry::global`] for the
/// process-wide instance or build explicit instances for isolation.
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

impl Registry {
    /// Registry that exposes bound managers over HTTP
    pub fn new() -> Self {
        Self::with_binder(Arc::new(HttpBinder::new()))
    }

    pub fn with_binder(binder: Arc<dyn EndpointBinder>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RegistryState::default()),
                configuration: SharedConfiguration::default(),
                binder,
            }),
        }
    }

    /// Lazily created process-wide registry
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(|| {
            debug!("Registry::global: initialising");
            Registry::new()
        })
    }

    /// Create and publish the Manager for a key, optionally binding it to an address
    pub async fn create_manager(
        &self,
        component_name: &str,
        state_machine_name: &str,
        bind: Option<SocketAddr>,
    ) -> Result<Manager> {
        let key = ManagerKey::new(component_name, state_machine_name);
        debug!(%key, ?bind, "Registry::create_manager: called");

        if self.shared.state.lock().managers.contains_key(&key) {
            return Err(duplicate(&key));
        }

        let manager = Manager::with_configuration(component_name, state_machine_name, self.shared.configuration.clone());

        if let Some(addr) = bind {
            self.shared.binder.bind(addr, self.clone()).await?;
        }

        let published = {
            let mut state = self.shared.state.lock();
            if state.managers.contains_key(&key) {
                false
            } else {
                state.managers.insert(
                    key.clone(),
                    Registration {
                        manager: manager.clone(),
                        bind,
                    },
                );
                true
            }
        };

        if !published {
            debug!(%key, "Registry::create_manager: lost race, releasing binding");
            if let Some(addr) = bind {
                self.shared.binder.release(addr).await;
            }
            return Err(duplicate(&key));
        }

        info!(%key, ?bind, "Function manager registered");
        Ok(manager)
    }

    /// Remove a Manager, abandon its pending requests and release its binding
    pub async fn unregister_manager(&self, manager: &Manager) -> Result<()> {
        debug!(key = %manager.key(), "Registry::unregister_manager: called");

        let registration = {
            let mut state = self.shared.state.lock();
            let owned = state
                .managers
                .get(manager.key())
                .is_some_and(|registration| registration.manager.ptr_eq(manager));
            if owned { state.managers.remove(manager.key()) } else { None }
        };
        let Some(registration) = registration else {
            return Err(unknown(manager.key()));
        };

        self.retire(registration).await;
        info!(key = %manager.key(), "Function manager unregistered");
        Ok(())
    }

    async fn retire(&self, registration: Registration) {
        let abandoned = registration.manager.close();
        if abandoned > 0 {
            warn!(key = %registration.manager.key(), abandoned, "Pending requests abandoned");
        }
        if let Some(addr) = registration.bind {
            self.shared.binder.release(addr).await;
        }
    }

    /// Unregister every Manager and release every binding
    pub async fn shutdown(&self) {
        let registrations: Vec<Registration> = {
            let mut state = self.shared.state.lock();
            state.managers.drain().map(|(_, registration)| registration).collect()
        };
        debug!(count = registrations.len(), "Registry::shutdown: called");

        for registration in registrations {
            self.retire(registration).await;
        }
        info!("Registry shut down");
    }

    /// Look up the Manager for a key
    pub fn manager(&self, component_name: &str, state_machine_name: &str) -> Option<Manager> {
        let key = ManagerKey::new(component_name, state_machine_name);
        self.shared
            .state
            .lock()
            .managers
            .get(&key)
            .map(|registration| registration.manager.clone())
    }

    fn require(&self, component_name: &str, state_machine_name: &str) -> Result<Manager> {
        self.manager(component_name, state_machine_name)
            .ok_or_else(|| unknown(&ManagerKey::new(component_name, state_machine_name)))
    }

    /// Hand the next queued task for a key to a worker
    pub fn route_dequeue(&self, component_name: &str, state_machine_name: &str) -> Result<Option<TaskParameter>> {
        debug!(%component_name, %state_machine_name, "Registry::route_dequeue: called");
        Ok(self.require(component_name, state_machine_name)?.dequeue())
    }

    /// Deliver a worker's result to the Manager it names
    pub fn route_resolve(&self, result: Option<TaskResult>) -> Result<()> {
        let result = result.ok_or_else(|| FunctionsError::missing("Result"))?;
        debug!(correlation_id = %result.correlation_id, "Registry::route_resolve: called");
        self.require(&result.component_name, &result.state_machine_name)?
            .resolve_result(Some(result))
    }

    /// Replace the shared configuration; invalid values leave the old one in force
    pub fn set_configuration(&self, configuration: FunctionsConfiguration) -> Result<()> {
        debug!(timeout_ms = ?configuration.timeout_in_millis, "Registry::set_configuration: called");
        self.shared.configuration.set(configuration)?;
        info!(timeout_ms = ?configuration.timeout_in_millis, "Functions configuration updated");
        Ok(())
    }

    pub fn configuration(&self) -> FunctionsConfiguration {
        self.shared.configuration.get()
    }

    /// Append a string resource
    pub fn add_key_value(&self, component_name: &str, key: &str, value: &str) {
        debug!(%component_name, %key, "Registry::add_key_value: called");
        self.shared
            .state
            .lock()
            .key_values
            .push(KeyValueSetting::new(component_name, key, value));
    }

    /// Snapshot of the string resources, in insertion order
    pub fn key_values(&self) -> Vec<KeyValueSetting> {
        self.shared.state.lock().key_values.clone()
    }

    /// Number of registered managers
    pub fn len(&self) -> usize {
        self.shared.state.lock().managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("managers", &self.len()).finish_non_exhaustive()
    }
}

fn duplicate(key: &ManagerKey) -> FunctionsError {
    FunctionsError::DuplicateKey {
        component: key.component_name.clone(),
        state_machine: key.state_machine_name.clone(),
    }
}

fn unknown(key: &ManagerKey) -> FunctionsError {
    FunctionsError::UnknownKey {
        component: key.component_name.clone(),
        state_machine: key.state_machine_name.clone(),
    }
}
