//! Process-mode serving: this test binary re-executes itself as the
//! supervisor, which in turn re-executes it once per worker

#![cfg(unix)]

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use zero::{ClientConfig, MsgPackEncoder, Result, ServerConfig, WorkerMode, ZeroClient, ZeroServer};

const SERVER_PORT_ENV: &str = "ZERO_TEST_SERVER_PORT";
const TEST_NAME: &str = "test_process_mode_serves_until_sigterm";

fn echo(msg: String) -> Result<String> {
    Ok(msg)
}

fn serve(port: u16) -> Result<()> {
    let mut server = ZeroServer::with_config(
        ServerConfig::new("127.0.0.1", port)
            .with_workers(2)
            .with_worker_mode(WorkerMode::Process),
    );
    server.register_rpc("echo", echo)?;
    server.run()
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn ipc_files_of(pid: u32) -> Vec<String> {
    let prefix = format!("zero-{pid}-");
    std::fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(&prefix))
        .collect()
}

#[test]
fn test_process_mode_serves_until_sigterm() {
    // Supervisor and worker children land here
    if let Ok(port) = std::env::var(SERVER_PORT_ENV) {
        serve(port.parse().unwrap()).unwrap();
        return;
    }

    let port = free_port();
    let mut supervisor = Command::new(std::env::current_exe().unwrap())
        .args([TEST_NAME, "--exact", "--nocapture", "--test-threads=1"])
        .env(SERVER_PORT_ENV, port.to_string())
        .stdout(Stdio::null())
        .spawn()
        .unwrap();
    let pid = supervisor.id();

    let client = ZeroClient::with_config(
        ClientConfig::new("127.0.0.1", port).with_connect_timeout(Duration::from_secs(1)),
        MsgPackEncoder,
    );
    let deadline = Instant::now() + Duration::from_secs(20);
    let reply = loop {
        match client.call::<_, String>("echo", "hello") {
            Ok(reply) => break reply,
            Err(e) if Instant::now() < deadline => {
                assert!(supervisor.try_wait().unwrap().is_none(), "server exited: {e}");
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                let _ = supervisor.kill();
                panic!("server never answered: {e}");
            }
        }
    };
    assert_eq!(reply, "hello");
    assert_eq!(ipc_files_of(pid).len(), 1);
    client.close();

    let sent = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .unwrap();
    assert!(sent.success());

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = supervisor.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            let _ = supervisor.kill();
            panic!("server did not stop after SIGTERM");
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    assert!(status.success(), "server exited with {status}");
    assert!(ipc_files_of(pid).is_empty());
}
