//! Echo server with one worker process per core
//!
//! Run with `cargo run --example echo_server -- [port]`, then try the
//! `echo_client` example against it. Set `ZERO_LOG=debug` to see every frame.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use zero::{Contract, Result, ServerConfig, ZeroServer};

#[derive(Contract, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    High,
}

#[derive(Contract, Serialize, Deserialize, Debug, Clone)]
pub struct Order {
    pub id: u64,
    pub items: Vec<String>,
    pub priority: Priority,
}

#[derive(Contract, Serialize, Deserialize, Debug, Clone)]
pub struct Receipt {
    pub order_id: u64,
    pub accepted: bool,
    pub note: Option<String>,
}

fn echo(msg: String) -> Result<String> {
    Ok(msg)
}

fn echo_dict(msg: HashMap<i64, String>) -> Result<HashMap<i64, String>> {
    Ok(msg)
}

fn hello() -> Result<String> {
    Ok("hello world".to_string())
}

fn sleep(msec: u64) -> Result<String> {
    std::thread::sleep(Duration::from_millis(msec));
    Ok(format!("slept for {msec} msecs"))
}

async fn square_root(n: f64) -> std::result::Result<f64, String> {
    if n < 0.0 {
        return Err(format!("cannot take the square root of {n}"));
    }
    Ok(n.sqrt())
}

async fn place_order(order: Order) -> Result<Receipt> {
    tokio::time::sleep(Duration::from_millis(10)).await;
    let accepted = !order.items.is_empty();
    Ok(Receipt {
        order_id: order.id,
        accepted,
        note: (!accepted).then(|| "empty order".to_string()),
    })
}

fn main() -> Result<()> {
    zero::logging::init();

    let port = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(5559);

    let mut server = ZeroServer::with_config(ServerConfig::new("0.0.0.0", port));
    server.register_rpc("echo", echo)?;
    server.register_rpc("echo_dict", echo_dict)?;
    server.register_rpc("hello", hello)?;
    server.register_rpc("sleep", sleep)?;
    server.register_async_rpc("square_root", square_root)?;
    server.register_async_rpc("place_order", place_order)?;
    server.run()
}
