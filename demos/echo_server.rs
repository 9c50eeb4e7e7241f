use log::*;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use wavelink::handshake::accept_async;
use wavelink::{Handler, OpCode};

struct Echo;

impl Handler for Echo {
    fn on_open(&mut self) {
        info!("connection open");
    }

    fn on_message(&mut self, payload: Vec<u8>, opcode: OpCode) -> Option<(Vec<u8>, OpCode)> {
        Some((payload, opcode))
    }

    fn on_close(&mut self, status: u16, reason: String) {
        info!("connection closed: {status} {reason}");
    }
}

async fn handle_connection(peer: SocketAddr, stream: TcpStream) {
    match accept_async(stream, Echo).await {
        Ok(connection) => {
            if let Err(e) = connection.run().await {
                error!("connection with {peer} ended in error: {e}");
            }
        }
        Err(err) => error!("handshake with {peer} failed: {err}"),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let addr = "127.0.0.1:9002";
    let listener = TcpListener::bind(&addr).await.expect("can't listen");
    info!("listening on: {addr}");

    while let Ok((stream, _)) = listener.accept().await {
        let peer = stream
            .peer_addr()
            .expect("connected streams should have a peer address");
        info!("peer address: {peer}");

        tokio::spawn(handle_connection(peer, stream));
    }
}
