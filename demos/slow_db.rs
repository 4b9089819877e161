//! demos/slow_db.rs
//! Simulates a database that is slow to come up: nothing listens for the
//! first N seconds, then a plain TCP listener appears on the port.
//! Run: cargo run --example slow_db -- [port] [delay_secs]
//! Then in another shell: cargo run -- wait-db --tcp

use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let port: u16 = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5432);
    let delay_secs: u64 = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    println!("slow_db: sleeping {delay_secs}s before listening on 127.0.0.1:{port}");
    sleep(Duration::from_secs(delay_secs)).await;

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("bind failed");
    println!("slow_db: up, accepting connections");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                println!("slow_db: connection from {peer}");
                // Hold the socket briefly so connect-style probes see success.
                tokio::spawn(async move {
                    sleep(Duration::from_millis(100)).await;
                    drop(stream);
                });
            }
            Err(e) => {
                eprintln!("slow_db: accept error: {e}");
            }
        }
    }
}
