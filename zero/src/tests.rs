//! End-to-end tests for the broker, workers and clients
//! Covers a hand-written frame handler and the full server facade

use crate::config::{CONNECT, CONNECTED, GET_RPC_CONTRACT};
use crate::worker::connect_channel;
use crate::*;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Hand-written handler, bypassing the registry
pub struct Calculator;

#[async_trait]
impl FrameHandler for Calculator {
    async fn handle(&self, function_name: &str, payload: Bytes) -> Bytes {
        let encoder = MsgPackEncoder;
        let reply = match function_name {
            CONNECT => encoder.encode(CONNECTED),
            "add" | "multiply" => {
                let (a, b): (i32, i32) = encoder.decode_type(&payload).unwrap_or_default();
                let result = if function_name == "add" { a + b } else { a * b };
                encoder.encode(&result)
            }
            other => encoder.encode(&Value::single_entry(
                config::FUNCTION_NOT_FOUND,
                format!("Function `{other}` not found!"),
            )),
        };
        Bytes::from(reply.unwrap_or_default())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Contract)]
pub struct Reading {
    pub sensor: String,
    pub value: f64,
}

fn latest(sensor: String) -> Result<Reading> {
    Ok(Reading {
        sensor,
        value: 25.3,
    })
}

async fn average(readings: Vec<Reading>) -> std::result::Result<f64, String> {
    if readings.is_empty() {
        return Err("no readings".to_string());
    }
    Ok(readings.iter().map(|r| r.value).sum::<f64>() / readings.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn thread_server() -> ZeroServer {
        ZeroServer::with_config(
            ServerConfig::new("127.0.0.1", 0)
                .with_workers(2)
                .with_worker_mode(WorkerMode::Thread),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_broker_and_worker_with_manual_handler() {
        let broker = Broker::bind("tcp://127.0.0.1:0", "tcp://127.0.0.1:0", 100)
            .await
            .unwrap();
        let port = broker.public_port().unwrap();
        let channel = broker.worker_channel().to_string();
        let broker_handle = broker.handle();
        let broker_task = tokio::spawn(broker.listen());

        let (shutdown, shutdown_rx) = tokio::sync::watch::channel(false);
        let transport = connect_channel(&channel, Duration::from_secs(5)).await.unwrap();
        let worker_task = tokio::spawn(async move {
            let mut worker = Worker::new(0, Calculator, shutdown_rx);
            worker.listen(transport).await
        });

        let client = AsyncZeroClient::new("127.0.0.1", port);
        let sum: i32 = timeout(Duration::from_secs(5), client.call("add", (10, 5)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sum, 15);

        let product: i32 = timeout(Duration::from_secs(5), client.call("multiply", (6, 7)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product, 42);

        let err = client.call::<_, i32>("divide", (1, 0)).await.unwrap_err();
        assert_eq!(err.category(), "method_resolution");

        client.close();
        shutdown.send_replace(true);
        assert!(worker_task.await.unwrap().is_ok());
        broker_handle.close();
        assert!(broker_task.await.unwrap().is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_with_sync_and_async_handlers() {
        let mut server = thread_server();
        server.register_rpc("latest", latest).unwrap();
        server.register_async_rpc("average", average).unwrap();
        let handle = server.start().unwrap();

        let client = AsyncZeroClient::new("127.0.0.1", handle.port());
        let reading: Reading = client.call("latest", "outdoor").await.unwrap();
        assert_eq!(reading.sensor, "outdoor");

        let readings = vec![
            Reading {
                sensor: "a".to_string(),
                value: 1.0,
            },
            Reading {
                sensor: "b".to_string(),
                value: 3.0,
            },
        ];
        let mean: f64 = client.call("average", readings).await.unwrap();
        assert_eq!(mean, 2.0);

        let err = client
            .call::<_, f64>("average", Vec::<Reading>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteException { ref detail } if detail == "no readings"));

        // Untyped results decode generically
        let raw: Value = client.call("latest", "indoor").await.unwrap();
        assert_eq!(raw.get("sensor").and_then(Value::as_str), Some("indoor"));

        client.close();
        handle.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generated_client_source() {
        let mut server = thread_server();
        server.register_rpc("latest", latest).unwrap();
        server.register_async_rpc("average", average).unwrap();
        let handle = server.start().unwrap();

        let client = AsyncZeroClient::new("127.0.0.1", handle.port());
        let source: String = client
            .call(GET_RPC_CONTRACT, ("localhost", 5559u16))
            .await
            .unwrap();
        assert!(source.contains("pub struct Reading"));
        assert!(source.contains("ZeroClient::new(\"localhost\", 5559)"));
        assert!(source.contains("pub fn latest(&self, msg: String) -> Result<Reading>"));
        assert!(source.contains("pub fn average(&self, msg: Vec<Reading>) -> Result<f64>"));

        client.close();
        handle.shutdown();
    }
}
