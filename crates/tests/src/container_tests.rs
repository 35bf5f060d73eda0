//! Service container scenarios closer to real wiring: request scopes,
//! decorator stacks, and startup ordering across a realistic graph.

use futures::FutureExt;
use nectar_core::container::{
    ContainerError, Lifecycle, ServiceContainer, ServiceInstance, ServiceRegistration,
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

struct Repository {
    connections: usize,
}

struct RequestContext {
    id: usize,
}

#[test]
fn three_level_dependency_chain_resolves_bottom_up() {
    let container = ServiceContainer::new();

    container.register(ServiceRegistration::build("config", |_| Ok(42usize)));
    container.register(
        ServiceRegistration::build("repository", |deps| {
            let size: Arc<usize> = deps.get("config")?;
            Ok(Repository { connections: *size })
        })
        .depends_on(["config"]),
    );
    container.register(
        ServiceRegistration::build("api", |deps| {
            let repo: Arc<Repository> = deps.get("repository")?;
            Ok(format!("api with {} connections", repo.connections))
        })
        .depends_on(["repository"]),
    );

    let api: Arc<String> = container.get_as("api").unwrap();
    assert_eq!(api.as_str(), "api with 42 connections");
}

#[test]
fn diamond_dependencies_share_the_singleton() {
    let container = ServiceContainer::new();
    let built = Arc::new(AtomicUsize::new(0));
    let built_clone = Arc::clone(&built);

    container.register(ServiceRegistration::build("base", move |_| {
        built_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    container.register(
        ServiceRegistration::build("left", |deps| deps.get::<()>("base").map(|_| "left"))
            .depends_on(["base"]),
    );
    container.register(
        ServiceRegistration::build("right", |deps| deps.get::<()>("base").map(|_| "right"))
            .depends_on(["base"]),
    );
    container.register(
        ServiceRegistration::build("top", |_| Ok(())).depends_on(["left", "right"]),
    );

    let _ = container.get("top").unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 1, "diamond base built once");
}

#[test]
fn long_cycle_is_reported_with_full_path() {
    let container = ServiceContainer::new();
    container.register(ServiceRegistration::build("a", |_| Ok(())).depends_on(["b"]));
    container.register(ServiceRegistration::build("b", |_| Ok(())).depends_on(["c"]));
    container.register(ServiceRegistration::build("c", |_| Ok(())).depends_on(["a"]));

    match container.get("a").unwrap_err() {
        ContainerError::CircularDependency(path) => assert_eq!(path, "a -> b -> c -> a"),
        other => panic!("expected cycle, got {other:?}"),
    }
}

#[tokio::test]
async fn request_scope_lifecycle_mirrors_http_requests() {
    let container = Arc::new(ServiceContainer::new());
    let disposed = Arc::new(AtomicUsize::new(0));
    let next_id = Arc::new(AtomicUsize::new(0));

    let next_id_clone = Arc::clone(&next_id);
    let disposed_clone = Arc::clone(&disposed);
    container.register(
        ServiceRegistration::build("requestContext", move |_| {
            Ok(RequestContext { id: next_id_clone.fetch_add(1, Ordering::SeqCst) })
        })
        .lifecycle(Lifecycle::Scoped)
        .on_dispose(Arc::new(move |_| {
            let disposed = Arc::clone(&disposed_clone);
            async move {
                disposed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })),
    );

    // Two "requests" resolve the same context within a scope, different across.
    let r1a: Arc<RequestContext> =
        container.get_scoped("requestContext", "req-1").unwrap().downcast().unwrap();
    let r1b: Arc<RequestContext> =
        container.get_scoped("requestContext", "req-1").unwrap().downcast().unwrap();
    let r2: Arc<RequestContext> =
        container.get_scoped("requestContext", "req-2").unwrap().downcast().unwrap();

    assert_eq!(r1a.id, r1b.id);
    assert_ne!(r1a.id, r2.id);

    container.dispose_scope("req-1").await;
    container.dispose_scope("req-2").await;
    assert_eq!(disposed.load(Ordering::SeqCst), 2);
    assert_eq!(container.metrics().initialized, 0);
}

#[test]
fn decorator_stack_wraps_in_registration_order() {
    let container = ServiceContainer::new();

    container.register_decorator(
        "logging",
        Arc::new(|instance: ServiceInstance| {
            let inner: Arc<Vec<&'static str>> = instance.downcast().unwrap();
            let mut layers = (*inner).clone();
            layers.push("logging");
            Arc::new(layers) as ServiceInstance
        }),
    );
    container.register_decorator(
        "metrics",
        Arc::new(|instance: ServiceInstance| {
            let inner: Arc<Vec<&'static str>> = instance.downcast().unwrap();
            let mut layers = (*inner).clone();
            layers.push("metrics");
            Arc::new(layers) as ServiceInstance
        }),
    );

    container.register(
        ServiceRegistration::build("handler", |_| Ok(vec!["core"]))
            .decorated_with(["logging", "metrics"]),
    );

    let layers: Arc<Vec<&'static str>> = container.get_as("handler").unwrap();
    assert_eq!(*layers, vec!["core", "logging", "metrics"]);
}

#[tokio::test]
async fn startup_order_follows_the_dependency_graph() {
    let container = ServiceContainer::new();
    let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    for (name, deps) in [
        ("database", vec![]),
        ("cache", vec![]),
        ("repository", vec!["database", "cache"]),
        ("api", vec!["repository"]),
    ] {
        let order_clone = Arc::clone(&order);
        let name_owned = name.to_string();
        container.register(
            ServiceRegistration::build(name, |_| Ok(()))
                .depends_on(deps)
                .on_start(Arc::new(move |_| {
                    let order = Arc::clone(&order_clone);
                    let name = name_owned.clone();
                    async move {
                        order.lock().push(name);
                        Ok(())
                    }
                    .boxed()
                })),
        );
    }

    container.start_all().await.unwrap();

    let seen = order.lock().clone();
    let position = |name: &str| seen.iter().position(|n| n == name).unwrap();
    assert!(position("database") < position("repository"));
    assert!(position("cache") < position("repository"));
    assert!(position("repository") < position("api"));

    container.stop_all().await;
}

#[tokio::test]
async fn stop_all_reverses_start_order() {
    let container = ServiceContainer::new();
    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    for (name, deps) in [("db", vec![]), ("api", vec!["db"])] {
        let start_events = Arc::clone(&events);
        let stop_events = Arc::clone(&events);
        let start_name = format!("start:{name}");
        let stop_name = format!("stop:{name}");
        container.register(
            ServiceRegistration::build(name, |_| Ok(()))
                .depends_on(deps)
                .on_start(Arc::new(move |_| {
                    let events = Arc::clone(&start_events);
                    let label = start_name.clone();
                    async move {
                        events.lock().push(label);
                        Ok(())
                    }
                    .boxed()
                }))
                .on_stop(Arc::new(move |_| {
                    let events = Arc::clone(&stop_events);
                    let label = stop_name.clone();
                    async move {
                        events.lock().push(label);
                        Ok(())
                    }
                    .boxed()
                })),
        );
    }

    container.start_all().await.unwrap();
    container.stop_all().await;

    let seen = events.lock().clone();
    assert_eq!(seen, vec!["start:db", "start:api", "stop:api", "stop:db"]);
}
