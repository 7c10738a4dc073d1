//! Worker-facing HTTP routes and the listener binder

use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{FunctionsConfiguration, KeyValueSetting, TaskResult};
use crate::error::{FunctionsError, Result};
use crate::registry::{EndpointBinder, Registry};

/// Body of every 400 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "Message")]
    pub message: String,
}

/// Query string of `GET /Functions`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TaskQuery {
    #[serde(rename = "componentName", alias = "ComponentName")]
    component_name: String,
    #[serde(rename = "stateMachineName", alias = "StateMachineName")]
    state_machine_name: String,
}

struct ApiError(FunctionsError);

impl From<FunctionsError> for ApiError {
    fn from(err: FunctionsError) -> Self {
        Self(err)
    }
}

// Malformed requests get the same `{"Message"}` body as any other validation failure
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(status = %rejection.status(), "Rejecting malformed request body");
        Self(FunctionsError::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        warn!(status = %rejection.status(), "Rejecting malformed query string");
        Self(FunctionsError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            error!(error = %self.0, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = ErrorBody {
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the router serving `registry`, at the root and under `/api`
pub fn router(registry: Registry) -> Router {
    let routes = Router::new()
        .route("/Functions", get(get_task).post(post_task_result))
        .route("/Configuration", post(post_configuration))
        .route("/StringResources", get(get_string_resources));

    Router::new().merge(routes.clone()).nest("/api", routes).with_state(registry)
}

/// GET /Functions
async fn get_task(
    State(registry): State<Registry>,
    query: std::result::Result<Query<TaskQuery>, QueryRejection>,
) -> std::result::Result<Response, ApiError> {
    let Query(query) = query?;
    debug!(component_name = %query.component_name, state_machine_name = %query.state_machine_name, "get_task: called");
    match registry.route_dequeue(&query.component_name, &query.state_machine_name)? {
        Some(task) => Ok((StatusCode::OK, Json(task)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// POST /Functions
async fn post_task_result(
    State(registry): State<Registry>,
    body: std::result::Result<Json<Option<TaskResult>>, JsonRejection>,
) -> std::result::Result<StatusCode, ApiError> {
    debug!("post_task_result: called");
    let Json(result) = body?;
    registry.route_resolve(result)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /Configuration
async fn post_configuration(
    State(registry): State<Registry>,
    body: std::result::Result<Json<Option<FunctionsConfiguration>>, JsonRejection>,
) -> std::result::Result<StatusCode, ApiError> {
    let Json(configuration) = body?;
    debug!(?configuration, "post_configuration: called");
    let configuration = configuration.ok_or_else(|| FunctionsError::missing("Configuration"))?;
    registry.set_configuration(configuration)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /StringResources
async fn get_string_resources(State(registry): State<Registry>) -> Json<Vec<KeyValueSetting>> {
    debug!("get_string_resources: called");
    Json(registry.key_values())
}

struct Listener {
    refs: usize,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Serves the registry over HTTP, one listener per bound address
///
/// Managers bound to the same address share its listener; the listener shuts
/// down gracefully when the last of them is released.
#[derive(Default)]
pub struct HttpBinder {
    listeners: Mutex<HashMap<SocketAddr, Listener>>,
}

impl HttpBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Addresses with a live listener
    pub async fn bound_addresses(&self) -> Vec<SocketAddr> {
        self.listeners.lock().await.keys().copied().collect()
    }
}

#[async_trait]
impl EndpointBinder for HttpBinder {
    async fn bind(&self, addr: SocketAddr, registry: Registry) -> Result<()> {
        debug!(%addr, "HttpBinder::bind: called");
        let mut listeners = self.listeners.lock().await;

        if let Some(listener) = listeners.get_mut(&addr) {
            listener.refs += 1;
            debug!(%addr, refs = listener.refs, "HttpBinder::bind: sharing listener");
            return Ok(());
        }

        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|source| FunctionsError::Bind { addr, source })?;
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = router(registry);

        let task = tokio::spawn(async move {
            let served = axum::serve(tcp, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                error!(%addr, error = %e, "HTTP listener failed");
            }
        });

        listeners.insert(
            addr,
            Listener {
                refs: 1,
                shutdown,
                task,
            },
        );
        info!(%addr, "HTTP listener started");
        Ok(())
    }

    async fn release(&self, addr: SocketAddr) {
        debug!(%addr, "HttpBinder::release: called");
        let stopped = {
            let mut listeners = self.listeners.lock().await;
            let remaining = listeners.get_mut(&addr).map(|listener| {
                listener.refs -= 1;
                listener.refs
            });
            match remaining {
                Some(0) => listeners.remove(&addr),
                Some(_) => None,
                None => {
                    warn!(%addr, "Release of unbound address ignored");
                    None
                }
            }
        };

        if let Some(listener) = stopped {
            let _ = listener.shutdown.send(());
            if let Err(e) = listener.task.await {
                error!(%addr, error = %e, "HTTP listener task panicked");
            }
            info!(%addr, "HTTP listener stopped");
        }
    }
}
