// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process RESP listener for pool and redirect tests.
//!
//! Each accepted connection gets an index (0, 1, ...) and every command it
//! sends is passed to the handler along with that index. The handler decides
//! whether to answer, stay silent or hang up.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use redis::IntoConnectionInfo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::node_pool::{NodePool, NodeSettings};

pub(crate) enum Reply {
    Send(Vec<u8>),
    Silent,
    Close,
}

impl Reply {
    pub(crate) fn status(s: &str) -> Self {
        Reply::Send(format!("+{}\r\n", s).into_bytes())
    }

    pub(crate) fn int(n: i64) -> Self {
        Reply::Send(format!(":{}\r\n", n).into_bytes())
    }

    pub(crate) fn error(msg: &str) -> Self {
        Reply::Send(format!("-{}\r\n", msg).into_bytes())
    }

    /// A `CLUSTER SLOTS` reply giving every slot to `127.0.0.1:port`.
    pub(crate) fn all_slots_to(port: u16) -> Self {
        Reply::Send(format!("*1\r\n*3\r\n:0\r\n:16383\r\n*3\r\n$9\r\n127.0.0.1\r\n:{}\r\n$4\r\nnode\r\n", port).into_bytes())
    }
}

type Handler = dyn Fn(usize, &[String]) -> Reply + Send + Sync;

/// Answers like a standalone server: `PONG`, cluster support disabled,
/// `:1` for writes, an empty `ZRANGE` and `OK` for anything else.
pub(crate) fn standalone(_conn: usize, args: &[String]) -> Reply {
    match args.first().map(|c| c.to_ascii_uppercase()).as_deref() {
        Some("PING") => Reply::status("PONG"),
        Some("CLUSTER") => Reply::error("ERR This instance has cluster support disabled"),
        Some("ZADD" | "ZREM" | "ZREMRANGEBYRANK") => Reply::int(1),
        Some("ZRANGE") => Reply::Send(b"*0\r\n".to_vec()),
        _ => Reply::status("OK"),
    }
}

pub(crate) struct TestNode {
    addr: String,
    port: u16,
    accepted: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<(usize, Vec<String>)>>>,
    task: JoinHandle<()>,
}

impl TestNode {
    pub(crate) async fn start<F>(handler: F) -> Self
    where
        F: Fn(usize, &[String]) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let task = {
            let accepted = accepted.clone();
            let received = received.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let id = accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(socket, id, handler.clone(), received.clone()));
                }
            })
        };

        Self {
            addr: format!("127.0.0.1:{}", port),
            port,
            accepted,
            received,
            task,
        }
    }

    pub(crate) fn addr(&self) -> &str {
        &self.addr
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Connections accepted so far.
    pub(crate) fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// How many `name` commands arrived, on any connection.
    pub(crate) fn count(&self, name: &str) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|(_, args)| args.first().is_some_and(|c| c.eq_ignore_ascii_case(name)))
            .count()
    }

    /// Command names in arrival order, without connection setup chatter.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|(_, args)| args.first().map(|c| c.to_ascii_uppercase()))
            .filter(|c| c != "CLIENT" && c != "HELLO")
            .collect()
    }

    pub(crate) fn pool(&self, settings: NodeSettings) -> Arc<NodePool> {
        let info = format!("redis://{}", self.addr).into_connection_info().unwrap();
        NodePool::new(self.addr.clone(), info, settings).unwrap()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    id: usize,
    handler: Arc<Handler>,
    received: Arc<Mutex<Vec<(usize, Vec<String>)>>>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        while let Some((args, used)) = parse_command(&buf) {
            buf.drain(..used);
            received.lock().push((id, args.clone()));
            match handler(id, &args) {
                Reply::Send(bytes) => {
                    if socket.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
                Reply::Silent => {}
                Reply::Close => return,
            }
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// One `*N` array of bulk strings from the front of `buf`, with the number
/// of bytes it took. `None` until the whole command has arrived.
fn parse_command(buf: &[u8]) -> Option<(Vec<String>, usize)> {
    let (count, mut pos) = read_header(buf, 0, b'*')?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let (len, start) = read_header(buf, pos, b'$')?;
        let end = start + len;
        if buf.len() < end + 2 {
            return None;
        }
        args.push(String::from_utf8_lossy(&buf[start..end]).into_owned());
        pos = end + 2;
    }
    Some((args, pos))
}

fn read_header(buf: &[u8], pos: usize, marker: u8) -> Option<(usize, usize)> {
    if *buf.get(pos)? != marker {
        return None;
    }
    let rest = &buf[pos + 1..];
    let eol = rest.windows(2).position(|w| w == b"\r\n")?;
    let n = std::str::from_utf8(&rest[..eol]).ok()?.parse().ok()?;
    Some((n, pos + 1 + eol + 2))
}

#[test]
fn test_parse_command_waits_for_complete_frame() {
    let frame = b"*2\r\n$4\r\nPING\r\n$2\r\nhi\r\n";
    assert_eq!(parse_command(frame), Some((vec!["PING".to_string(), "hi".to_string()], frame.len())));
    assert_eq!(parse_command(&frame[..frame.len() - 3]), None);
    assert_eq!(parse_command(b""), None);
}
