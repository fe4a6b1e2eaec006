//! # Plugin Server
//!
//! The plugin-author side of the wire protocol: implement [`CostSource`]
//! for your pricing backend, hand it to [`serve`], and the process becomes
//! a launchable FinFocus plugin. The server binds a loopback TCP listener,
//! prints the one-line handshake on stdout, and answers length-prefixed
//! JSON frames until the host sends the graceful `stop` request.
//!
//! Requests are dispatched concurrently per frame, so a slow budget query
//! never blocks a projected-cost answer on the same connection. Responses
//! carry the request's correlation id, matching what
//! [`crate::transport::RpcConnection`] expects on the host side.
//!
//! ```rust
//! use finfocus_plugin_sdk::server;
//! use std::sync::Arc;
//!
//! # async fn run(my_source: Arc<dyn finfocus_plugin_sdk::CostSource>) -> finfocus_plugin_sdk::Result<()> {
//! // In a plugin binary's main:
//! server::serve(my_source).await
//! # }
//! ```

use crate::client::CostSource;
use crate::error::PluginError;
use crate::models::{
    BudgetFilter, DismissRequest, EstimateOverrides, RecommendationQuery, ResourceDescriptor,
    UsageGranularity, UsageWindow,
};
use crate::proto::{methods, RpcErrorBody, RpcRequest, RpcResponse, MAX_FRAME_LEN, PROTOCOL_VERSION};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

/// Error codes used in response error bodies.
pub mod error_codes {
    /// The handler itself failed.
    pub const INTERNAL: i32 = 1;
    /// The request parameters did not deserialize.
    pub const BAD_PARAMS: i32 = 2;
    /// The method name is not part of the surface.
    pub const UNKNOWN_METHOD: i32 = 3;
}

/// A bound plugin server that has not started accepting yet.
///
/// Splitting bind from run lets embedders (and tests) learn the listen
/// address before the accept loop takes over the task.
pub struct BoundServer {
    listener: TcpListener,
    source: Arc<dyn CostSource>,
    shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
}

impl BoundServer {
    /// The address the host should dial.
    pub fn local_addr(&self) -> Result<SocketAddr, PluginError> {
        Ok(self.listener.local_addr()?)
    }

    /// The handshake line announcing this server.
    pub fn handshake_line(&self) -> Result<String, PluginError> {
        let addr = self.local_addr()?;
        Ok(format!(
            "{}|tcp|{}|{}",
            PROTOCOL_VERSION,
            addr,
            self.source.plugin_info().version
        ))
    }

    /// A handle that stops the accept loop from another task.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Accept and serve connections until a `stop` request arrives or the
    /// shutdown handle fires.
    pub async fn run(self) -> Result<(), PluginError> {
        let mut shutdown_rx = self.shutdown_rx;
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "host connected");
                            let source = Arc::clone(&self.source);
                            let shutdown_tx = self.shutdown_tx.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, source, shutdown_tx).await;
                            });
                        }
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!("plugin server shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Bind a plugin server on an ephemeral loopback port.
pub async fn bind(source: Arc<dyn CostSource>) -> Result<BoundServer, PluginError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|err| PluginError::transport(format!("binding plugin listener: {err}")))?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    Ok(BoundServer { listener, source, shutdown_rx, shutdown_tx })
}

/// Bind, print the handshake line on stdout, and serve until stopped.
///
/// This is the whole `main` of a plugin binary.
pub async fn serve(source: Arc<dyn CostSource>) -> Result<(), PluginError> {
    let server = bind(source).await?;
    let line = server.handshake_line()?;
    {
        use std::io::Write;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
    }
    server.run().await
}

async fn handle_connection(
    stream: TcpStream,
    source: Arc<dyn CostSource>,
    shutdown_tx: watch::Sender<bool>,
) {
    let (mut reader, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));

    loop {
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            warn!(len, "host sent an oversized frame, closing connection");
            break;
        }
        let mut payload = vec![0u8; len];
        if reader.read_exact(&mut payload).await.is_err() {
            break;
        }
        let request: RpcRequest = match serde_json::from_slice(&payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "host sent an unparseable frame");
                continue;
            }
        };

        if request.method == methods::STOP {
            let response = RpcResponse { id: request.id, result: Some(serde_json::json!({})), error: None };
            let _ = write_response(&writer, &response).await;
            let _ = shutdown_tx.send(true);
            break;
        }

        // Dispatch concurrently so one slow handler does not serialize the
        // connection.
        let source = Arc::clone(&source);
        let writer = Arc::clone(&writer);
        tokio::spawn(async move {
            let response = dispatch(&*source, request).await;
            if let Err(err) = write_response(&writer, &response).await {
                warn!(error = %err, "failed to write response");
            }
        });
    }
}

async fn write_response(
    writer: &Mutex<OwnedWriteHalf>,
    response: &RpcResponse,
) -> Result<(), PluginError> {
    let payload = serde_json::to_vec(response)?;
    let mut writer = writer.lock().await;
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

#[derive(Deserialize)]
struct ResourceParams {
    resource: ResourceDescriptor,
}

#[derive(Deserialize)]
struct ActualCostParams {
    resource: ResourceDescriptor,
    window: UsageWindow,
    granularity: UsageGranularity,
}

#[derive(Deserialize)]
struct EstimateParams {
    resource: ResourceDescriptor,
    overrides: EstimateOverrides,
}

async fn dispatch(source: &dyn CostSource, request: RpcRequest) -> RpcResponse {
    let id = request.id;
    let result = match request.method.as_str() {
        methods::PLUGIN_INFO => serde_json::to_value(source.plugin_info()).map_err(internal),
        methods::PROJECTED_COST => match parse::<ResourceParams>(request.params) {
            Ok(params) => call(source.projected_cost(&params.resource).await),
            Err(err) => Err(err),
        },
        methods::ACTUAL_COST => match parse::<ActualCostParams>(request.params) {
            Ok(params) => call(
                source
                    .actual_cost(&params.resource, params.window, params.granularity)
                    .await,
            ),
            Err(err) => Err(err),
        },
        methods::RECOMMENDATIONS => match parse::<RecommendationQuery>(request.params) {
            Ok(query) => call(source.recommendations(&query).await),
            Err(err) => Err(err),
        },
        methods::BUDGETS => match parse::<BudgetFilter>(request.params) {
            Ok(filter) => call(source.budgets(&filter).await),
            Err(err) => Err(err),
        },
        methods::ESTIMATE_COST => match parse::<EstimateParams>(request.params) {
            Ok(params) => call(source.estimate_cost(&params.resource, &params.overrides).await),
            Err(err) => Err(err),
        },
        methods::DISMISS_RECOMMENDATION => match parse::<DismissRequest>(request.params) {
            Ok(dismiss) => call(source.dismiss_recommendation(&dismiss).await),
            Err(err) => Err(err),
        },
        other => Err(RpcErrorBody {
            code: error_codes::UNKNOWN_METHOD,
            message: format!("unknown method: {other}"),
        }),
    };

    match result {
        Ok(value) => RpcResponse { id, result: Some(value), error: None },
        Err(error) => RpcResponse { id, result: None, error: Some(error) },
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: serde_json::Value) -> Result<T, RpcErrorBody> {
    serde_json::from_value(params).map_err(|err| RpcErrorBody {
        code: error_codes::BAD_PARAMS,
        message: format!("invalid parameters: {err}"),
    })
}

fn call<T: serde::Serialize>(outcome: Result<T, PluginError>) -> Result<serde_json::Value, RpcErrorBody> {
    match outcome {
        Ok(value) => serde_json::to_value(value).map_err(internal),
        Err(err) => Err(RpcErrorBody { code: error_codes::INTERNAL, message: err.to_string() }),
    }
}

fn internal(err: serde_json::Error) -> RpcErrorBody {
    RpcErrorBody { code: error_codes::INTERNAL, message: err.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Feature, PluginInfo, ProjectedCost};
    use crate::proto::Handshake;
    use crate::transport::RpcConnection;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;

    struct StaticSource {
        info: PluginInfo,
    }

    impl StaticSource {
        fn new() -> Self {
            let capabilities: HashSet<Feature> =
                [Feature::ProjectedCosts, Feature::PluginInfo].into_iter().collect();
            Self {
                info: PluginInfo {
                    name: "static".to_string(),
                    version: "0.9.0".to_string(),
                    providers: vec!["aws".to_string()],
                    capabilities,
                    protocol_version: PROTOCOL_VERSION,
                },
            }
        }
    }

    #[async_trait]
    impl CostSource for StaticSource {
        fn name(&self) -> &str {
            &self.info.name
        }

        fn plugin_info(&self) -> &PluginInfo {
            &self.info
        }

        async fn projected_cost(
            &self,
            resource: &ResourceDescriptor,
        ) -> Result<ProjectedCost, PluginError> {
            if resource.id == "known" {
                Ok(ProjectedCost {
                    monthly: Some(30.5),
                    currency: "USD".to_string(),
                    notes: "flat rate".to_string(),
                })
            } else {
                Ok(ProjectedCost::default())
            }
        }

        async fn actual_cost(
            &self,
            _resource: &ResourceDescriptor,
            _window: UsageWindow,
            _granularity: UsageGranularity,
        ) -> Result<crate::models::ActualCostSeries, PluginError> {
            Ok(crate::models::ActualCostSeries::default())
        }

        async fn recommendations(
            &self,
            _query: &RecommendationQuery,
        ) -> Result<Vec<crate::models::Recommendation>, PluginError> {
            Ok(Vec::new())
        }

        async fn budgets(
            &self,
            _filter: &BudgetFilter,
        ) -> Result<Vec<crate::models::BudgetStatus>, PluginError> {
            Ok(Vec::new())
        }

        async fn estimate_cost(
            &self,
            resource: &ResourceDescriptor,
            _overrides: &EstimateOverrides,
        ) -> Result<ProjectedCost, PluginError> {
            self.projected_cost(resource).await
        }

        async fn dismiss_recommendation(
            &self,
            _request: &DismissRequest,
        ) -> Result<crate::models::DismissResponse, PluginError> {
            Err(PluginError::FeatureNotSupported { feature: Feature::DismissRecommendations })
        }
    }

    #[tokio::test]
    async fn full_round_trip_against_a_bound_server() {
        let server = bind(Arc::new(StaticSource::new())).await.unwrap();
        let line = server.handshake_line().unwrap();
        let handshake = Handshake::parse(&line).unwrap();
        assert_eq!(handshake.protocol_version, PROTOCOL_VERSION);
        assert_eq!(handshake.server_version, "0.9.0");

        let address = handshake.address.clone();
        let server_task = tokio::spawn(server.run());

        let conn = RpcConnection::connect(&address).await.unwrap();

        let info: PluginInfo = serde_json::from_value(
            conn.call(methods::PLUGIN_INFO, serde_json::Value::Null, Duration::from_secs(1))
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(info.name, "static");

        let resource = ResourceDescriptor::new("known", "aws:ec2:Instance");
        let cost: ProjectedCost = serde_json::from_value(
            conn.call(
                methods::PROJECTED_COST,
                serde_json::json!({ "resource": resource }),
                Duration::from_secs(1),
            )
            .await
            .unwrap(),
        )
        .unwrap();
        assert_eq!(cost.monthly, Some(30.5));
        assert_eq!(cost.notes, "flat rate");

        // Stop terminates the accept loop.
        conn.call(methods::STOP, serde_json::Value::Null, Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), server_task)
            .await
            .expect("server should stop on request")
            .unwrap()
            .unwrap();
        conn.close().await;
    }

    #[tokio::test]
    async fn unknown_methods_and_bad_params_report_error_codes() {
        let server = bind(Arc::new(StaticSource::new())).await.unwrap();
        let address = server.local_addr().unwrap().to_string();
        let shutdown = server.shutdown_handle();
        let server_task = tokio::spawn(server.run());

        let conn = RpcConnection::connect(&address).await.unwrap();

        let err = conn
            .call("mystery_method", serde_json::Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PluginError::Rpc { code, .. } if code == error_codes::UNKNOWN_METHOD
        ));

        let err = conn
            .call(
                methods::PROJECTED_COST,
                serde_json::json!({"not_a_resource": true}),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PluginError::Rpc { code, .. } if code == error_codes::BAD_PARAMS
        ));

        conn.close().await;
        let _ = shutdown.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(1), server_task).await;
    }
}
