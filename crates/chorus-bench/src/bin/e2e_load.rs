//! End-to-end load test for Chorus.
//!
//! Connects a set of WebSocket clients that all submit and all receive, so
//! every submission is fanned out to every client over real network I/O.
//!
//! ```bash
//! chorus &
//! e2e_load 16 ws://127.0.0.1:8080/ws
//! ```

use chorus_protocol::{codec, ClientFrame, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;
/// Pause between submissions per client.
const SEND_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    out_of_order: AtomicU64,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    println!("Chorus end-to-end load test");
    println!("  Server:  {url}");
    println!("  Clients: {num_clients}");
    println!("  Warmup: {WARMUP_SECS}s, Measurement: {BENCH_SECS}s");
    println!();

    let counters = Arc::new(Counters::default());
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let handles: Vec<_> = (0..num_clients)
        .map(|client_id| {
            let counters = Arc::clone(&counters);
            let barrier = Arc::clone(&barrier);
            let url = url.clone();
            tokio::spawn(async move {
                if let Err(e) = run_client(client_id, &url, counters, barrier).await {
                    eprintln!("Client {client_id} error: {e}");
                }
            })
        })
        .collect();

    // Wait for all clients to connect
    barrier.wait().await;
    println!("All {num_clients} clients connected");

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    counters.sent.store(0, Ordering::SeqCst);
    counters.received.store(0, Ordering::SeqCst);
    let start = Instant::now();

    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let sent = counters.sent.load(Ordering::SeqCst);
    let received = counters.received.load(Ordering::SeqCst);

    println!();
    println!("Results");
    println!("  Duration:        {elapsed:>10.2}s");
    println!("  Submitted:       {sent:>10} ({:.0} msg/s)", sent as f64 / elapsed);
    println!(
        "  Delivered:       {received:>10} ({:.0} msg/s)",
        received as f64 / elapsed
    );
    println!(
        "  Out of order:    {:>10}",
        counters.out_of_order.load(Ordering::SeqCst)
    );

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    url: &str,
    counters: Arc<Counters>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Any backlog replay finishes during warmup
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // Wait for the Connected frame
    if let Some(Ok(Message::Text(text))) = receiver.next().await {
        let connected: ServerFrame = serde_json::from_str(&text)?;
        if !matches!(connected, ServerFrame::Connected { .. }) {
            return Err(format!("unexpected first frame: {text}").into());
        }
    }

    barrier.wait().await;

    let recv_counters = Arc::clone(&counters);
    let recv_task = tokio::spawn(async move {
        let mut last_id = 0;
        while let Some(Ok(message)) = receiver.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            if let Ok(ServerFrame::Message { id, .. }) = serde_json::from_str(&text) {
                if id <= last_id {
                    recv_counters.out_of_order.fetch_add(1, Ordering::Relaxed);
                }
                last_id = id;
                recv_counters.received.fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    let author = format!("client-{client_id}");
    loop {
        let frame = ClientFrame::submit(author.as_str(), "x".repeat(64));
        if sender
            .send(Message::Text(codec::encode_json(&frame)?))
            .await
            .is_err()
        {
            break;
        }
        counters.sent.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(SEND_INTERVAL).await;
    }

    recv_task.abort();
    Ok(())
}
