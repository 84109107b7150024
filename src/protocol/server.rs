//! Scripted `OP_MSG` server for wire tests.
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    thread::{self, JoinHandle},
};

use bson::{Document, doc};
use log::{info, warn};

use super::message::{HEADER_LEN, Message, MessageHeader};

/// Answers requests from one connection with canned replies, in order, then `{ok: 1}`
/// once they run out. Every request body is recorded.
pub(crate) struct ScriptedServer {
    address: SocketAddr,
    handle: JoinHandle<Vec<Document>>,
}

impl ScriptedServer {
    pub fn start(replies: Vec<Document>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        info!("listening at {address}");

        let handle = thread::spawn(move || match listener.accept() {
            Ok((stream, _)) => handle_connection(stream, replies.into()),
            Err(e) => {
                warn!("broken connection: {e:?}");
                Vec::new()
            }
        });

        Self { address, handle }
    }

    pub fn uri(&self) -> String {
        format!("mongodb://{}", self.address)
    }

    /// Waits for the client to hang up and returns what it sent.
    pub fn requests(self) -> Vec<Document> {
        self.handle.join().unwrap()
    }
}

fn read_request(stream: &mut TcpStream) -> io::Result<Message> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header)?;
    let header = MessageHeader::from_bytes(&header);

    let len = header.payload_len().map_err(io::Error::other)?;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;

    Message::decode(&header, &payload).map_err(io::Error::other)
}

fn handle_connection(mut stream: TcpStream, mut replies: VecDeque<Document>) -> Vec<Document> {
    let mut requests = Vec::new();
    let mut next_id = 1000;

    loop {
        let req = match read_request(&mut stream) {
            Ok(req) => req,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return requests,
            Err(e) => {
                warn!("broken connection: {e:?}");
                return requests;
            }
        };
        info!("received request: {:?}", req.body);

        let body = replies.pop_front().unwrap_or_else(|| doc! { "ok": 1.0 });
        requests.push(req.body);

        next_id += 1;
        let (header, payload) = Message::reply(next_id, req.request_id, body)
            .encode()
            .unwrap();
        stream.write_all(&header.to_bytes()).unwrap();
        stream.write_all(&payload).unwrap();
    }
}
