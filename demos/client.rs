use rand::distr::Alphanumeric;
use rand::{thread_rng, Rng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use wavelink::config::ClientConfig;
use wavelink::handshake::connect_async;
use wavelink::{Handler, OpCode};

/// Counts replies and, once three have arrived, closes the connection from inside
/// `on_message` — the pattern this crate expects for handlers that need to do async
/// work of their own: spawn a task holding a cloned `Sender` rather than making the
/// trait itself async.
struct Counter {
    sender: Arc<tokio::sync::OnceCell<wavelink::Sender<wavelink::stream::SocketFlowStream>>>,
    replies: AtomicUsize,
}

impl Handler for Counter {
    fn on_message(&mut self, payload: Vec<u8>, _opcode: OpCode) -> Option<(Vec<u8>, OpCode)> {
        println!("received message: {}", String::from_utf8_lossy(&payload));

        if self.replies.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
            if let Some(sender) = self.sender.get().cloned() {
                tokio::spawn(async move {
                    sender.close(1000, "received three replies").await.ok();
                });
            }
        }
        None
    }

    fn on_close(&mut self, status: u16, reason: String) {
        println!("connection closed: {status} {reason}");
    }
}

async fn handle_connection(addr: &str) {
    let sender_slot = Arc::new(tokio::sync::OnceCell::new());
    let handler = Counter {
        sender: sender_slot.clone(),
        replies: AtomicUsize::new(0),
    };

    let connection = match connect_async(addr, ClientConfig::default(), handler).await {
        Ok(connection) => connection,
        Err(err) => {
            eprintln!("handshake failed: {err}");
            return;
        }
    };

    sender_slot
        .set(connection.sender())
        .unwrap_or_else(|_| panic!("sender slot set exactly once"));

    let ticker_sender = connection.sender();
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            let payload = random_string().into_bytes();
            if ticker_sender.send(&payload, OpCode::Text, 64 << 10).await.is_err() {
                break;
            }
        }
    });

    if let Err(err) = connection.run().await {
        eprintln!("connection ended in error: {err}");
    }
}

#[tokio::main]
async fn main() {
    handle_connection("ws://127.0.0.1:9002").await;
}

fn random_string() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(30)
        .map(char::from)
        .collect()
}
