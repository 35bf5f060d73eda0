//! String-keyed dependency-injection and lifecycle container.
//!
//! Services are registered by name with an explicit list of dependency names
//! and no reflection or auto-wiring. Resolution walks the dependency graph
//! depth-first with a visiting stack, so a cycle fails with
//! [`ContainerError::CircularDependency`] naming the full path instead of
//! recursing forever.
//!
//! # Lifecycles
//!
//! - [`Lifecycle::Singleton`]: built once, cached for the process lifetime
//! - [`Lifecycle::Transient`]: the factory runs on every resolution
//! - [`Lifecycle::Scoped`]: cached per scope id, dropped by
//!   [`dispose_scope`](ServiceContainer::dispose_scope)
//!
//! # Decorators
//!
//! Named wrapper functions registered via
//! [`register_decorator`](ServiceContainer::register_decorator) and listed
//! per descriptor. They are plain ordered composition applied after the
//! factory runs, not proxies.
//!
//! # Lifecycle hooks
//!
//! `on_start` hooks run in dependency order during
//! [`start_all`](ServiceContainer::start_all) (dependency before dependent);
//! the first failure aborts startup and rolls already-started services back
//! with best-effort `on_stop` calls. [`stop_all`](ServiceContainer::stop_all)
//! runs in reverse start order and is best-effort throughout.
//!
//! # Example
//!
//! ```
//! use nectar_core::container::{ServiceContainer, ServiceRegistration};
//! use std::sync::Arc;
//!
//! struct Greeter(&'static str);
//!
//! let container = ServiceContainer::new();
//! container.register(ServiceRegistration::build("greeter", |_deps| Ok(Greeter("hello"))));
//!
//! let greeter: Arc<Greeter> = container.get_as("greeter").unwrap();
//! assert_eq!(greeter.0, "hello");
//! ```

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::{
    any::Any,
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use thiserror::Error;

use crate::errors::ServiceError;

/// A resolved service value, shared type-erased.
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// Factory building a service from its resolved dependencies.
pub type ServiceFactory =
    Arc<dyn Fn(&DependencyBag) -> Result<ServiceInstance, ContainerError> + Send + Sync>;

/// Named wrapper applied to an instance after creation.
pub type DecoratorFn = Arc<dyn Fn(ServiceInstance) -> ServiceInstance + Send + Sync>;

/// Async lifecycle hook (`on_start`, `on_stop`, `on_dispose`).
pub type LifecycleHook =
    Arc<dyn Fn(ServiceInstance) -> BoxFuture<'static, Result<(), ContainerError>> + Send + Sync>;

/// Async health probe for one instance.
pub type HealthCheck = Arc<dyn Fn(ServiceInstance) -> BoxFuture<'static, bool> + Send + Sync>;

/// Errors raised by service registration and resolution.
///
/// Container failures are fatal to the triggering call and are never
/// swallowed or degraded.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContainerError {
    /// No descriptor under this name.
    #[error("Service not registered: {0}")]
    NotRegistered(String),

    /// The dependency graph loops; the message is the full cycle path.
    #[error("Circular dependency: {0}")]
    CircularDependency(String),

    /// A descriptor references a decorator name with no registration.
    #[error("Decorator not registered: {0}")]
    DecoratorNotRegistered(String),

    /// The stored instance is not of the requested type.
    #[error("Service {0} resolved to an unexpected type")]
    TypeMismatch(String),

    /// A scoped service was resolved without a scope id.
    #[error("Scoped service {0} requires a scope id")]
    ScopeRequired(String),

    /// The service factory returned an error.
    #[error("Factory for {name} failed: {message}")]
    FactoryFailed { name: String, message: String },

    /// A lifecycle hook returned an error.
    #[error("{hook} hook for {name} failed: {message}")]
    HookFailed { name: String, hook: &'static str, message: String },

    /// `start_all` aborted; already-started services were rolled back.
    #[error("Startup aborted: {0}")]
    StartupAborted(String),
}

impl From<ContainerError> for ServiceError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::CircularDependency(path) => ServiceError::CircularDependency(path),
            ContainerError::NotRegistered(name) => ServiceError::NotFound(format!("service {name}")),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

/// How long a resolved instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// One instance for the process lifetime.
    Singleton,
    /// A new instance on every resolution.
    Transient,
    /// One instance per scope id, dropped with the scope.
    Scoped,
}

/// Dependencies resolved for a factory, keyed by dependency name.
pub struct DependencyBag {
    entries: HashMap<String, ServiceInstance>,
}

impl DependencyBag {
    /// Returns the dependency under `name` downcast to `T`.
    ///
    /// # Errors
    ///
    /// [`ContainerError::NotRegistered`] if the name was not declared as a
    /// dependency, [`ContainerError::TypeMismatch`] if the stored instance is
    /// a different type.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, ContainerError> {
        let instance = self
            .entries
            .get(name)
            .ok_or_else(|| ContainerError::NotRegistered(name.to_string()))?;
        Arc::clone(instance)
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch(name.to_string()))
    }

    /// Returns the type-erased dependency under `name`, if declared.
    #[must_use]
    pub fn raw(&self, name: &str) -> Option<ServiceInstance> {
        self.entries.get(name).cloned()
    }
}

/// Declarative registration for one service.
///
/// Built with [`ServiceRegistration::new`] (type-erased factory) or
/// [`ServiceRegistration::build`] / [`ServiceRegistration::instance`]
/// (typed conveniences), then customized with the builder methods.
pub struct ServiceRegistration {
    name: String,
    factory: ServiceFactory,
    lifecycle: Lifecycle,
    dependencies: Vec<String>,
    decorators: Vec<String>,
    on_start: Option<LifecycleHook>,
    on_stop: Option<LifecycleHook>,
    on_dispose: Option<LifecycleHook>,
    health: Option<HealthCheck>,
}

impl ServiceRegistration {
    /// Registration with a raw type-erased factory. Defaults to
    /// [`Lifecycle::Singleton`], no dependencies, no decorators, no hooks.
    #[must_use]
    pub fn new(name: impl Into<String>, factory: ServiceFactory) -> Self {
        Self {
            name: name.into(),
            factory,
            lifecycle: Lifecycle::Singleton,
            dependencies: Vec::new(),
            decorators: Vec::new(),
            on_start: None,
            on_stop: None,
            on_dispose: None,
            health: None,
        }
    }

    /// Registration from a typed factory; the result is wrapped in `Arc`
    /// automatically.
    #[must_use]
    pub fn build<T, F>(name: impl Into<String>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&DependencyBag) -> Result<T, ContainerError> + Send + Sync + 'static,
    {
        Self::new(
            name,
            Arc::new(move |deps| {
                let value = factory(deps)?;
                Ok(Arc::new(value) as ServiceInstance)
            }),
        )
    }

    /// Registration of an already-built shared instance (always effectively a
    /// singleton).
    #[must_use]
    pub fn instance<T: Send + Sync + 'static>(name: impl Into<String>, value: Arc<T>) -> Self {
        Self::new(
            name,
            Arc::new(move |_deps| Ok(Arc::clone(&value) as ServiceInstance)),
        )
    }

    #[must_use]
    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Declares dependency names, resolved before the factory runs and passed
    /// in the [`DependencyBag`].
    #[must_use]
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = names.into_iter().map(Into::into).collect();
        self
    }

    /// Declares decorator names applied in order after creation.
    #[must_use]
    pub fn decorated_with<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.decorators = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn on_start(mut self, hook: LifecycleHook) -> Self {
        self.on_start = Some(hook);
        self
    }

    #[must_use]
    pub fn on_stop(mut self, hook: LifecycleHook) -> Self {
        self.on_stop = Some(hook);
        self
    }

    #[must_use]
    pub fn on_dispose(mut self, hook: LifecycleHook) -> Self {
        self.on_dispose = Some(hook);
        self
    }

    /// Attaches a health probe; aggregated by
    /// [`health_status`](ServiceContainer::health_status) once the service is
    /// initialized.
    #[must_use]
    pub fn with_health_check(mut self, check: HealthCheck) -> Self {
        self.health = Some(check);
        self
    }
}

struct ServiceDescriptor {
    factory: ServiceFactory,
    lifecycle: Lifecycle,
    dependencies: Vec<String>,
    decorators: Vec<String>,
    on_start: Option<LifecycleHook>,
    on_stop: Option<LifecycleHook>,
    on_dispose: Option<LifecycleHook>,
    health: Option<HealthCheck>,
    resolutions: AtomicU64,
}

/// Aggregated health across initialized services.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerHealth {
    /// `true` when every checked service passed.
    pub healthy: bool,
    /// Per-service results; only initialized services with a health check
    /// appear here.
    pub services: HashMap<String, bool>,
}

/// Container observability counters.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerMetrics {
    pub registered: usize,
    /// Cached singleton + scoped instances currently alive.
    pub initialized: usize,
    /// Resolution count per service name (cache hits included).
    pub resolutions: HashMap<String, u64>,
}

/// String-keyed service registry with lifecycle management.
///
/// Cheap to share behind an `Arc`; all interior state is concurrent.
pub struct ServiceContainer {
    descriptors: RwLock<HashMap<String, Arc<ServiceDescriptor>>>,
    decorators: RwLock<HashMap<String, DecoratorFn>>,
    singletons: DashMap<String, ServiceInstance>,
    scoped: DashMap<String, HashMap<String, ServiceInstance>>,
    /// Names in start order, for reverse-order stop.
    started: Mutex<Vec<String>>,
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceContainer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptors: RwLock::new(HashMap::new()),
            decorators: RwLock::new(HashMap::new()),
            singletons: DashMap::new(),
            scoped: DashMap::new(),
            started: Mutex::new(Vec::new()),
        }
    }

    /// Stores a descriptor. Re-registering a name overwrites the descriptor
    /// and drops any cached singleton so the new factory takes effect.
    pub fn register(&self, registration: ServiceRegistration) {
        let name = registration.name.clone();
        let descriptor = Arc::new(ServiceDescriptor {
            factory: registration.factory,
            lifecycle: registration.lifecycle,
            dependencies: registration.dependencies,
            decorators: registration.decorators,
            on_start: registration.on_start,
            on_stop: registration.on_stop,
            on_dispose: registration.on_dispose,
            health: registration.health,
            resolutions: AtomicU64::new(0),
        });

        let replaced = self.descriptors.write().insert(name.clone(), descriptor).is_some();
        if replaced {
            self.singletons.remove(&name);
            tracing::debug!(service = %name, "service re-registered, cached instance dropped");
        } else {
            tracing::debug!(service = %name, "service registered");
        }
    }

    /// Registers a named decorator for use in
    /// [`ServiceRegistration::decorated_with`] lists.
    pub fn register_decorator(&self, name: impl Into<String>, decorator: DecoratorFn) {
        self.decorators.write().insert(name.into(), decorator);
    }

    /// `true` if a descriptor exists under `name`.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.descriptors.read().contains_key(name)
    }

    /// Resolves a process-wide service.
    ///
    /// # Errors
    ///
    /// See [`ContainerError`]; circular dependencies and unknown names are
    /// fatal to this call.
    pub fn get(&self, name: &str) -> Result<ServiceInstance, ContainerError> {
        let mut visiting = Vec::new();
        self.resolve(name, None, &mut visiting)
    }

    /// Resolves a service within `scope_id` (required by scoped descriptors;
    /// singletons and transients ignore it).
    ///
    /// # Errors
    ///
    /// See [`ContainerError`].
    pub fn get_scoped(
        &self,
        name: &str,
        scope_id: &str,
    ) -> Result<ServiceInstance, ContainerError> {
        let mut visiting = Vec::new();
        self.resolve(name, Some(scope_id), &mut visiting)
    }

    /// Resolves and downcasts a process-wide service.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get), plus [`ContainerError::TypeMismatch`].
    pub fn get_as<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, ContainerError> {
        self.get(name)?
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch(name.to_string()))
    }

    fn resolve(
        &self,
        name: &str,
        scope_id: Option<&str>,
        visiting: &mut Vec<String>,
    ) -> Result<ServiceInstance, ContainerError> {
        if visiting.iter().any(|n| n == name) {
            let mut path: Vec<&str> = visiting.iter().map(String::as_str).collect();
            path.push(name);
            return Err(ContainerError::CircularDependency(path.join(" -> ")));
        }

        let descriptor = self
            .descriptors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ContainerError::NotRegistered(name.to_string()))?;

        descriptor.resolutions.fetch_add(1, Ordering::Relaxed);

        match descriptor.lifecycle {
            Lifecycle::Singleton => {
                if let Some(existing) = self.singletons.get(name) {
                    return Ok(Arc::clone(existing.value()));
                }
            }
            Lifecycle::Scoped => {
                let scope_id =
                    scope_id.ok_or_else(|| ContainerError::ScopeRequired(name.to_string()))?;
                if let Some(scope) = self.scoped.get(scope_id) {
                    if let Some(existing) = scope.get(name) {
                        return Ok(Arc::clone(existing));
                    }
                }
            }
            Lifecycle::Transient => {}
        }

        visiting.push(name.to_string());
        let mut entries = HashMap::with_capacity(descriptor.dependencies.len());
        for dependency in &descriptor.dependencies {
            let instance = self.resolve(dependency, scope_id, visiting)?;
            entries.insert(dependency.clone(), instance);
        }
        visiting.pop();

        let mut instance = (descriptor.factory)(&DependencyBag { entries }).map_err(|err| {
            match err {
                // Keep structured container errors from nested resolutions.
                err @ (ContainerError::CircularDependency(_)
                | ContainerError::NotRegistered(_)
                | ContainerError::TypeMismatch(_)) => err,
                other => ContainerError::FactoryFailed {
                    name: name.to_string(),
                    message: other.to_string(),
                },
            }
        })?;

        // Decorators wrap in registration-list order.
        for decorator_name in &descriptor.decorators {
            let decorator = self
                .decorators
                .read()
                .get(decorator_name)
                .cloned()
                .ok_or_else(|| ContainerError::DecoratorNotRegistered(decorator_name.clone()))?;
            instance = decorator(instance);
        }

        match descriptor.lifecycle {
            Lifecycle::Singleton => {
                // First writer wins under concurrent creation, so every caller
                // observes the same instance from here on.
                let cached = self
                    .singletons
                    .entry(name.to_string())
                    .or_insert(instance)
                    .value()
                    .clone();
                Ok(cached)
            }
            Lifecycle::Scoped => {
                let scope_id = scope_id.unwrap_or_default().to_string();
                let cached = self
                    .scoped
                    .entry(scope_id)
                    .or_default()
                    .entry(name.to_string())
                    .or_insert(instance)
                    .clone();
                Ok(cached)
            }
            Lifecycle::Transient => Ok(instance),
        }
    }

    /// Instantiates all singletons and runs `on_start` hooks in dependency
    /// order (dependency before dependent).
    ///
    /// # Errors
    ///
    /// The first failing factory or hook aborts startup with
    /// [`ContainerError::StartupAborted`]; services started earlier get a
    /// best-effort `on_stop` in reverse order.
    pub async fn start_all(&self) -> Result<(), ContainerError> {
        let order = self.startup_order()?;
        let mut started: Vec<String> = Vec::new();

        for name in order {
            let descriptor = match self.descriptors.read().get(&name).cloned() {
                Some(descriptor) if descriptor.lifecycle == Lifecycle::Singleton => descriptor,
                // Transient/scoped services have no process-lifetime instance
                // to start.
                _ => continue,
            };

            let startup = async {
                let instance = self.get(&name)?;
                if let Some(hook) = &descriptor.on_start {
                    hook(Arc::clone(&instance)).await.map_err(|err| {
                        ContainerError::HookFailed {
                            name: name.clone(),
                            hook: "on_start",
                            message: err.to_string(),
                        }
                    })?;
                }
                Ok::<(), ContainerError>(())
            };

            if let Err(err) = startup.await {
                tracing::error!(service = %name, error = %err, "startup failed, rolling back");
                self.stop_names(started.iter().rev()).await;
                return Err(ContainerError::StartupAborted(err.to_string()));
            }

            tracing::debug!(service = %name, "service started");
            started.push(name);
        }

        *self.started.lock() = started;
        Ok(())
    }

    /// Runs `on_stop` hooks in reverse start order. Best-effort: a failing
    /// hook is logged and does not prevent the remaining hooks.
    pub async fn stop_all(&self) {
        let started = std::mem::take(&mut *self.started.lock());
        self.stop_names(started.iter().rev()).await;
    }

    async fn stop_names(&self, names: impl Iterator<Item = &String>) {
        for name in names {
            let descriptor = self.descriptors.read().get(name).cloned();
            let Some(descriptor) = descriptor else { continue };
            let Some(hook) = &descriptor.on_stop else { continue };
            let Some(instance) = self.singletons.get(name).map(|e| Arc::clone(e.value())) else {
                continue;
            };

            if let Err(err) = hook(instance).await {
                tracing::warn!(service = %name, error = %err, "on_stop hook failed");
            } else {
                tracing::debug!(service = %name, "service stopped");
            }
        }
    }

    /// Runs `on_dispose` for every instance tied to `scope_id`, then drops
    /// the scope. Dispose failures are logged, not propagated.
    pub async fn dispose_scope(&self, scope_id: &str) {
        let Some((_, instances)) = self.scoped.remove(scope_id) else {
            return;
        };

        for (name, instance) in instances {
            let descriptor = self.descriptors.read().get(&name).cloned();
            if let Some(hook) = descriptor.as_ref().and_then(|d| d.on_dispose.as_ref()) {
                if let Err(err) = hook(instance).await {
                    tracing::warn!(
                        service = %name,
                        scope = scope_id,
                        error = %err,
                        "on_dispose hook failed"
                    );
                }
            }
        }
        tracing::debug!(scope = scope_id, "scope disposed");
    }

    /// Probes every *already initialized* instance that has a health check.
    ///
    /// Services that were never resolved are not force-initialized and do not
    /// appear in the result.
    pub async fn health_status(&self) -> ContainerHealth {
        let mut services = HashMap::new();

        let checks: Vec<(String, HealthCheck, ServiceInstance)> = {
            let descriptors = self.descriptors.read();
            descriptors
                .iter()
                .filter_map(|(name, descriptor)| {
                    let check = descriptor.health.clone()?;
                    let instance = match descriptor.lifecycle {
                        Lifecycle::Singleton | Lifecycle::Transient => {
                            self.singletons.get(name).map(|e| Arc::clone(e.value()))
                        }
                        Lifecycle::Scoped => self.scoped.iter().find_map(|scope| {
                            scope.value().get(name).map(Arc::clone)
                        }),
                    }?;
                    Some((name.clone(), check, instance))
                })
                .collect()
        };

        for (name, check, instance) in checks {
            let passed = check(instance).await;
            services.insert(name, passed);
        }

        ContainerHealth { healthy: services.values().all(|ok| *ok), services }
    }

    /// Registered/initialized counts and per-service resolution counters.
    #[must_use]
    pub fn metrics(&self) -> ContainerMetrics {
        let descriptors = self.descriptors.read();
        let resolutions = descriptors
            .iter()
            .map(|(name, d)| (name.clone(), d.resolutions.load(Ordering::Relaxed)))
            .collect();

        let scoped_instances: usize = self.scoped.iter().map(|scope| scope.value().len()).sum();

        ContainerMetrics {
            registered: descriptors.len(),
            initialized: self.singletons.len() + scoped_instances,
            resolutions,
        }
    }

    /// Depth-first postorder over the dependency graph: every service appears
    /// after its dependencies. Also surfaces cycles before any hook runs.
    fn startup_order(&self) -> Result<Vec<String>, ContainerError> {
        let descriptors = self.descriptors.read();
        let mut names: Vec<&String> = descriptors.keys().collect();
        // Stable iteration independent of map order.
        names.sort();

        let mut order = Vec::with_capacity(names.len());
        let mut done: Vec<String> = Vec::new();
        let mut visiting: Vec<String> = Vec::new();

        fn visit(
            name: &str,
            descriptors: &HashMap<String, Arc<ServiceDescriptor>>,
            visiting: &mut Vec<String>,
            done: &mut Vec<String>,
            order: &mut Vec<String>,
        ) -> Result<(), ContainerError> {
            if done.iter().any(|n| n == name) {
                return Ok(());
            }
            if visiting.iter().any(|n| n == name) {
                let mut path: Vec<&str> = visiting.iter().map(String::as_str).collect();
                path.push(name);
                return Err(ContainerError::CircularDependency(path.join(" -> ")));
            }
            let Some(descriptor) = descriptors.get(name) else {
                return Err(ContainerError::NotRegistered(name.to_string()));
            };

            visiting.push(name.to_string());
            for dependency in &descriptor.dependencies {
                visit(dependency, descriptors, visiting, done, order)?;
            }
            visiting.pop();

            done.push(name.to_string());
            order.push(name.to_string());
            Ok(())
        }

        for name in names {
            visit(name, &descriptors, &mut visiting, &mut done, &mut order)?;
        }
        Ok(order)
    }
}
