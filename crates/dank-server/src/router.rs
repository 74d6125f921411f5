//! Request router: dispatches each request to a manager by namespace or to
//! a built-in method.

use std::pin::Pin;
use std::sync::Arc;

use dank_protocol::{
    HandlerError, HandlerResult, Methods, Params, Request, RequestId, Response, SUBSCRIBE_SUFFIX,
    Services,
};
use dank_services::plugins::PluginsService;
use dank_services::{AuxStream, Manager};
use dank_transport::{ClientConnection, RequestHandler};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::registry::{ManagerRegistry, ServiceKind};
use crate::subscription;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe wrapper for the Manager trait.
pub trait ManagerDyn: Send + Sync {
    fn capability_dyn(&self) -> &'static str;
    fn handle_dyn<'a>(&'a self, method: &'a str, params: Params) -> BoxFuture<'a, HandlerResult>;
    fn state_dyn(&self) -> Value;
    fn subscribe_dyn(&self, id: &str) -> broadcast::Receiver<Value>;
    fn unsubscribe_dyn(&self, id: &str);
    fn aux_streams_dyn(&self) -> &'static [AuxStream];
    fn subscribe_aux_dyn(&self, stream: &str, id: &str) -> Option<broadcast::Receiver<Value>>;
    fn unsubscribe_aux_dyn(&self, stream: &str, id: &str);
    fn close_dyn(&self) -> BoxFuture<'_, ()>;
}

impl<M: Manager> ManagerDyn for M {
    fn capability_dyn(&self) -> &'static str {
        self.capability()
    }
    fn handle_dyn<'a>(&'a self, method: &'a str, params: Params) -> BoxFuture<'a, HandlerResult> {
        Box::pin(self.handle(method, params))
    }
    fn state_dyn(&self) -> Value {
        self.state()
    }
    fn subscribe_dyn(&self, id: &str) -> broadcast::Receiver<Value> {
        self.subscribe(id)
    }
    fn unsubscribe_dyn(&self, id: &str) {
        self.unsubscribe(id)
    }
    fn aux_streams_dyn(&self) -> &'static [AuxStream] {
        self.aux_streams()
    }
    fn subscribe_aux_dyn(&self, stream: &str, id: &str) -> Option<broadcast::Receiver<Value>> {
        self.subscribe_aux(stream, id)
    }
    fn unsubscribe_aux_dyn(&self, stream: &str, id: &str) {
        self.unsubscribe_aux(stream, id)
    }
    fn close_dyn(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.close())
    }
}

/// The request handler behind the socket. Owns the registry and the
/// always-on plugins service.
pub struct DankServer {
    registry: Arc<ManagerRegistry>,
    plugins: PluginsService,
}

impl DankServer {
    pub fn new(registry: Arc<ManagerRegistry>, plugins: PluginsService) -> Self {
        Self { registry, plugins }
    }

    pub fn registry(&self) -> &Arc<ManagerRegistry> {
        &self.registry
    }

    /// Route one request and write its response. Subscriptions keep
    /// writing until the connection closes.
    pub async fn route(&self, request: Request, client: ClientConnection) {
        let Request { id, method, params } = request;

        if let Some((namespace, action)) = method.split_once('.') {
            if namespace == Services::PLUGINS {
                let outcome = self.plugins.handle(&method, params).await;
                respond(&client, id, outcome).await;
                return;
            }

            if let Some(kind) = ServiceKind::from_namespace(namespace) {
                let Some(manager) = self.registry.get(kind) else {
                    respond(&client, id, Err(HandlerError::not_initialized(kind.label()))).await;
                    return;
                };
                if action == SUBSCRIBE_SUFFIX {
                    let services = vec![kind.capability().to_string()];
                    subscription::run(self.registry.clone(), client, id, services).await;
                    return;
                }
                let outcome = manager.handle_dyn(&method, params).await;
                respond(&client, id, outcome).await;
                return;
            }
        }

        match method.as_str() {
            Methods::PING => respond(&client, id, Ok(Value::from("pong"))).await,
            Methods::GET_SERVER_INFO => {
                let outcome = serde_json::to_value(self.registry.server_info())
                    .map_err(|e| HandlerError::context("encode server info", e));
                respond(&client, id, outcome).await;
            }
            Methods::SUBSCRIBE => {
                let services = subscription::requested_services(&params);
                subscription::run(self.registry.clone(), client, id, services).await;
            }
            _ => respond(&client, id, Err(HandlerError::unknown_method(&method))).await,
        }
    }
}

async fn respond(client: &ClientConnection, id: RequestId, outcome: HandlerResult) {
    if client.send_response(&Response::from_result(id, outcome)).await.is_err() {
        debug!("Client {} gone before its response was written", client.id());
    }
}

impl RequestHandler for DankServer {
    fn greeting(&self) -> Value {
        serde_json::to_value(self.registry.server_info()).unwrap_or(Value::Null)
    }

    async fn handle_request(&self, request: Request, client: ClientConnection) {
        self.route(request, client).await;
    }
}
