//! Subscription fan-out engine.
//!
//! One `subscribe` call owns:
//! - a producer per matched service, which sends the manager's snapshot and
//!   then forwards its pushes;
//! - a producer per matched auxiliary stream (no snapshot);
//! - a producer for `server` capability events;
//! - the calling task, which drains the merged channel onto the connection.
//!
//! Producers stop when their source closes or when the drain side drops the
//! shared stop signal. Each one releases its own channel on the way out.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dank_protocol::{Params, RequestId, Response, ServiceEvent, Services};
use dank_services::params::string_list_param;
use dank_transport::ClientConnection;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tracing::debug;

use crate::registry::{ManagerRegistry, ServiceKind};
use crate::router::ManagerDyn;

/// Capacity of the per-subscription aggregation channel.
pub const EVENT_CAPACITY: usize = 256;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// `params.services`, or `["all"]` when absent or empty.
pub fn requested_services(params: &Params) -> Vec<String> {
    let services = string_list_param(params, "services");
    if services.is_empty() {
        vec![Services::ALL.to_string()]
    } else {
        services
    }
}

/// What a producer gives back when it exits.
enum Release {
    Capabilities {
        key: String,
    },
    State {
        manager: Arc<dyn ManagerDyn>,
        key: String,
        /// Set for lazily activated managers, which hold a registry reference.
        lazy: Option<ServiceKind>,
    },
    Aux {
        manager: Arc<dyn ManagerDyn>,
        stream: &'static str,
        key: String,
    },
}

impl Release {
    async fn run(self, registry: &ManagerRegistry) {
        match self {
            Release::Capabilities { key } => registry.unsubscribe_capabilities(&key),
            Release::State { manager, key, lazy } => {
                manager.unsubscribe_dyn(&key);
                if let Some(kind) = lazy {
                    registry.release(kind).await;
                }
            }
            Release::Aux { manager, stream, key } => manager.unsubscribe_aux_dyn(stream, &key),
        }
    }
}

struct Producer {
    service: &'static str,
    initial: Option<Value>,
    source: broadcast::Receiver<Value>,
    release: Release,
}

/// Stream events for `services` to `client` until the connection closes.
/// The first frame is always a `server` event.
pub async fn run(
    registry: Arc<ManagerRegistry>,
    client: ClientConnection,
    id: RequestId,
    services: Vec<String>,
) {
    let subscription = format!(
        "{}-{}",
        client.id(),
        NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed)
    );
    let subscribe_all = services.iter().any(|s| s == Services::ALL);
    let wants = |name: &str| subscribe_all || services.iter().any(|s| s == name);

    let mut producers = Vec::new();

    let key = format!("{subscription}-{}", Services::SERVER);
    producers.push(Producer {
        service: Services::SERVER,
        initial: None,
        source: registry.subscribe_capabilities(&key),
        release: Release::Capabilities { key },
    });

    for kind in ServiceKind::ALL {
        let capability = kind.capability();
        let wants_state = wants(capability);
        let lazy = wants_state && registry.is_lazy(kind);
        let manager = if lazy {
            registry.acquire(kind).await
        } else {
            registry.get(kind)
        };
        let Some(manager) = manager else { continue };

        let key = format!("{subscription}-{capability}");
        if wants_state {
            let source = manager.subscribe_dyn(&key);
            producers.push(Producer {
                service: capability,
                initial: Some(manager.state_dyn()),
                source,
                release: Release::State {
                    manager: manager.clone(),
                    key: key.clone(),
                    lazy: lazy.then_some(kind),
                },
            });
        }

        for aux in manager.aux_streams_dyn() {
            let wanted = if aux.implied { wants_state } else { wants(aux.name) };
            if !wanted {
                continue;
            }
            if let Some(source) = manager.subscribe_aux_dyn(aux.name, &key) {
                producers.push(Producer {
                    service: aux.name,
                    initial: None,
                    source,
                    release: Release::Aux {
                        manager: manager.clone(),
                        stream: aux.name,
                        key: key.clone(),
                    },
                });
            }
        }
    }

    debug!(
        "Subscription {subscription} started with {} stream(s)",
        producers.len()
    );

    let (events_tx, mut events_rx) = mpsc::channel(EVENT_CAPACITY);
    let (stop_tx, stop_rx) = watch::channel(());
    let mut tasks = JoinSet::new();
    for producer in producers {
        tasks.spawn(produce(
            producer,
            registry.clone(),
            events_tx.clone(),
            stop_rx.clone(),
        ));
    }
    drop(events_tx);

    let greeting = ServiceEvent::new(Services::SERVER, server_info_value(&registry));
    if client
        .send_response(&Response::success(id.clone(), greeting.into_value()))
        .await
        .is_ok()
    {
        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let frame = Response::success(id.clone(), ServiceEvent::into_value(event));
                    if client.send_response(&frame).await.is_err() {
                        break;
                    }
                }
                _ = client.closed() => break,
            }
        }
    }

    drop(stop_tx);
    while tasks.join_next().await.is_some() {}
    debug!("Subscription {subscription} closed");
}

fn server_info_value(registry: &ManagerRegistry) -> Value {
    serde_json::to_value(registry.server_info()).unwrap_or(Value::Null)
}

async fn produce(
    producer: Producer,
    registry: Arc<ManagerRegistry>,
    events: mpsc::Sender<ServiceEvent>,
    mut stop: watch::Receiver<()>,
) {
    let Producer {
        service,
        initial,
        mut source,
        release,
    } = producer;

    let delivered = match initial {
        Some(data) => forward(&events, &mut stop, ServiceEvent::new(service, data)).await,
        None => true,
    };

    if delivered {
        loop {
            tokio::select! {
                received = source.recv() => match received {
                    Ok(data) => {
                        if !forward(&events, &mut stop, ServiceEvent::new(service, data)).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("{service} subscriber skipped {skipped} stale event(s)");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = stop.changed() => break,
            }
        }
    }

    release.run(&registry).await;
}

/// Queue one event unless the subscription is stopping.
async fn forward(
    events: &mpsc::Sender<ServiceEvent>,
    stop: &mut watch::Receiver<()>,
    event: ServiceEvent,
) -> bool {
    tokio::select! {
        sent = events.send(event) => sent.is_ok(),
        _ = stop.changed() => false,
    }
}
