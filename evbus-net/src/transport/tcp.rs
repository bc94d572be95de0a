//! Connection-per-call TCP client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use evbus_config::TransportConfig;
use evbus_telemetry::BusMetrics;

use super::RpcClient;
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::protocol::{read_frame, write_frame, Call, RpcReply, RpcRequest};

#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Option<Duration>,
    call_timeout: Option<Duration>,
    max_frame_bytes: usize,
    metrics: Option<BusMetrics>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

impl TcpTransport {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout_ms.map(Duration::from_millis),
            call_timeout: config.call_timeout_ms.map(Duration::from_millis),
            max_frame_bytes: config.max_frame_bytes,
            metrics: None,
        }
    }

    /// Observes every call's round-trip time in `metrics.rpc_latency`.
    pub fn with_metrics(mut self, metrics: BusMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    async fn connect(&self, address: &str) -> Result<TcpStream, TransportError> {
        let connect = TcpStream::connect(address);
        let result = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => connect.await,
        };
        result.map_err(|e| TransportError::Connect {
            address: address.to_owned(),
            reason: e.to_string(),
        })
    }

    async fn exchange(&self, endpoint: &Endpoint, call: Call) -> Result<RpcReply, TransportError> {
        let mut stream = self.connect(&endpoint.dial_address()).await?;
        let request = RpcRequest {
            path: endpoint.path.clone(),
            call,
        };
        write_frame(&mut stream, &request, self.max_frame_bytes).await?;
        read_frame(&mut stream, self.max_frame_bytes)
            .await?
            .ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl RpcClient for TcpTransport {
    #[instrument(level = "debug", skip_all, fields(endpoint = %endpoint, method = %call.method()))]
    async fn call(&self, endpoint: &Endpoint, call: Call) -> Result<RpcReply, TransportError> {
        let started = Instant::now();
        let result = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange(endpoint, call))
                .await
                .unwrap_or(Err(TransportError::Timeout(limit))),
            None => self.exchange(endpoint, call).await,
        };
        if let Some(metrics) = &self.metrics {
            metrics.rpc_latency.observe(started.elapsed().as_secs_f64());
        }
        if let Err(error) = &result {
            debug!(%error, "RPC call failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let transport = TcpTransport::default();
        let endpoint = Endpoint::new(address.to_string(), "/_bus_");
        let result = transport
            .call(
                &endpoint,
                Call::Query(crate::protocol::QueryRequest {
                    topic: "t".into(),
                    args: Vec::new(),
                }),
            )
            .await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[tokio::test]
    async fn silent_peer_hits_the_call_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let transport = TcpTransport::from_config(&TransportConfig {
            call_timeout_ms: Some(50),
            ..TransportConfig::default()
        });
        let metrics = BusMetrics::new().unwrap();
        let transport = transport.with_metrics(metrics.clone());
        let endpoint = Endpoint::new(address.to_string(), "/_bus_");
        let result = transport
            .call(
                &endpoint,
                Call::Query(crate::protocol::QueryRequest {
                    topic: "t".into(),
                    args: Vec::new(),
                }),
            )
            .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
        assert_eq!(metrics.rpc_latency.get_sample_count(), 1);
    }
}
