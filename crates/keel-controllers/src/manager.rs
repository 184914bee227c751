//! Controller manager.
//!
//! Level-triggered dispatch: watch events (plus a startup resync) feed a
//! deduplicated work queue drained by a pool of workers. Reconciles for the
//! same (kind, namespace, name) key are serialized; across keys they run in
//! parallel. Errors requeue with a delay, conflicts almost immediately.

use async_trait::async_trait;
use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use keel_core::{ClusterClient, KeelResult, WatchEvent};

const ERROR_REQUEUE: Duration = Duration::from_secs(10);
const CONFLICT_REQUEUE: Duration = Duration::from_millis(200);
const BUSY_REQUEUE: Duration = Duration::from_millis(100);

/// One unit of reconcile work
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Request {
    pub namespace: String,
    pub name: String,
}

impl Request {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// What to do after a successful reconcile
#[derive(Debug, Clone, Copy, Default)]
pub struct Action {
    pub requeue_after: Option<Duration>,
}

impl Action {
    /// Wait for the next event
    pub fn done() -> Self {
        Self::default()
    }

    /// Re-reconcile after the interval (continuous probing)
    pub fn requeue_after(interval: Duration) -> Self {
        Self {
            requeue_after: Some(interval),
        }
    }
}

/// A level-triggered controller owning one resource kind
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn kind(&self) -> &'static str;

    /// Additional kinds whose events this controller maps to requests
    fn watched_kinds(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Map a dependency event to the requests it should enqueue
    async fn map_dependency(&self, _event: &WatchEvent) -> Vec<Request> {
        Vec::new()
    }

    async fn reconcile(&self, request: &Request) -> KeelResult<Action>;
}

struct WorkItem {
    reconciler: Arc<dyn Reconciler>,
    request: Request,
}

pub struct ControllerManager {
    cluster: ClusterClient,
    reconcilers: Vec<Arc<dyn Reconciler>>,
    workers: usize,
}

impl ControllerManager {
    pub fn new(cluster: ClusterClient) -> Self {
        Self {
            cluster,
            reconcilers: Vec::new(),
            workers: 4,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn register(&mut self, reconciler: Arc<dyn Reconciler>) {
        self.reconcilers.push(reconciler);
    }

    /// Run until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> KeelResult<()> {
        let (tx, rx) = mpsc::unbounded_channel::<WorkItem>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let pending: Arc<DashSet<(String, Request)>> = Arc::new(DashSet::new());
        let active: Arc<DashSet<(String, Request)>> = Arc::new(DashSet::new());

        // Startup resync: every existing object gets one reconcile.
        for reconciler in &self.reconcilers {
            let objects = self.cluster.backend().list_all(reconciler.kind()).await?;
            for object in objects {
                let request = Request::new(
                    object["metadata"]["namespace"].as_str().unwrap_or("default"),
                    object["metadata"]["name"].as_str().unwrap_or_default(),
                );
                enqueue(&tx, &pending, reconciler.clone(), request);
            }
        }

        // Watch intake.
        let watch_shutdown = shutdown.clone();
        let watch_reconcilers = self.reconcilers.clone();
        let watch_tx = tx.clone();
        let watch_pending = pending.clone();
        let mut watch_rx = self.cluster.watch();
        let watch_task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = watch_shutdown.cancelled() => break,
                    event = watch_rx.recv() => match event {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("watch stream lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    },
                };

                for reconciler in &watch_reconcilers {
                    if event.kind == reconciler.kind() {
                        enqueue(
                            &watch_tx,
                            &watch_pending,
                            reconciler.clone(),
                            Request::new(&event.namespace, &event.name),
                        );
                    }
                    if reconciler.watched_kinds().contains(&event.kind.as_str()) {
                        for request in reconciler.map_dependency(&event).await {
                            enqueue(&watch_tx, &watch_pending, reconciler.clone(), request);
                        }
                    }
                }
            }
        });

        // Worker pool.
        let mut workers = Vec::new();
        for worker_id in 0..self.workers {
            let rx = rx.clone();
            let tx = tx.clone();
            let pending = pending.clone();
            let active = active.clone();
            let shutdown = shutdown.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    let item = {
                        let mut guard = rx.lock().await;
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            item = guard.recv() => match item {
                                Some(item) => item,
                                None => break,
                            },
                        }
                    };

                    let key = (item.reconciler.kind().to_string(), item.request.clone());
                    pending.remove(&key);

                    // Serialize per key: if busy, push back with a delay.
                    if !active.insert(key.clone()) {
                        requeue_later(&tx, &pending, item, BUSY_REQUEUE);
                        continue;
                    }

                    let result = item.reconciler.reconcile(&item.request).await;
                    active.remove(&key);

                    match result {
                        Ok(action) => {
                            if let Some(interval) = action.requeue_after {
                                requeue_later(&tx, &pending, item, interval);
                            }
                        }
                        Err(e) if e.is_conflict() => {
                            tracing::debug!(
                                worker_id,
                                kind = item.reconciler.kind(),
                                object = %format!("{}/{}", item.request.namespace, item.request.name),
                                "reconcile conflict, retrying"
                            );
                            requeue_later(&tx, &pending, item, CONFLICT_REQUEUE);
                        }
                        Err(e) => {
                            tracing::warn!(
                                worker_id,
                                kind = item.reconciler.kind(),
                                object = %format!("{}/{}", item.request.namespace, item.request.name),
                                "reconcile failed: {}",
                                e
                            );
                            requeue_later(&tx, &pending, item, ERROR_REQUEUE);
                        }
                    }
                }
            }));
        }

        shutdown.cancelled().await;
        watch_task.abort();
        for worker in workers {
            worker.abort();
        }
        Ok(())
    }
}

fn enqueue(
    tx: &mpsc::UnboundedSender<WorkItem>,
    pending: &DashSet<(String, Request)>,
    reconciler: Arc<dyn Reconciler>,
    request: Request,
) {
    let key = (reconciler.kind().to_string(), request.clone());
    if !pending.insert(key) {
        return;
    }
    let _ = tx.send(WorkItem {
        reconciler,
        request,
    });
}

fn requeue_later(
    tx: &mpsc::UnboundedSender<WorkItem>,
    pending: &DashSet<(String, Request)>,
    item: WorkItem,
    delay: Duration,
) {
    let tx = tx.clone();
    let pending = pending.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        enqueue(&tx, &pending, item.reconciler, item.request);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{ClusterBackend, InMemoryCluster};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReconciler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Reconciler for CountingReconciler {
        fn kind(&self) -> &'static str {
            "Model"
        }

        async fn reconcile(&self, _request: &Request) -> KeelResult<Action> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(Action::done())
        }
    }

    #[tokio::test]
    async fn test_watch_event_drives_reconcile() {
        let backend = Arc::new(InMemoryCluster::new());
        let cluster = ClusterClient::new(backend.clone());
        let count = Arc::new(AtomicUsize::new(0));

        let mut manager = ControllerManager::new(cluster.clone());
        manager.register(Arc::new(CountingReconciler {
            count: count.clone(),
        }));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(manager.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        backend
            .create(
                "Model",
                serde_json::json!({
                    "kind": "Model",
                    "metadata": {"name": "m", "namespace": "default"},
                    "spec": {}
                }),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);

        shutdown.cancel();
        let _ = handle.await;
    }
}
