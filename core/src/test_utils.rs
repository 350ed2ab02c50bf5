//! In memory stand in for the PDA VM used by the tests

use futures::StreamExt;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::config::Config;
use crate::connection::Connection;

pub struct FakeVm {
    lines: FramedRead<ReadHalf<DuplexStream>, LinesCodec>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeVm {
    /// Write a raw line to the client
    pub async fn emit(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .unwrap();
    }

    /// Next command the client sent as its token and the rest of the line, `None` once the
    /// client has shut its write half
    pub async fn next_command(&mut self) -> Option<(u64, String)> {
        let line = self.lines.next().await?.unwrap();
        let line = line.strip_prefix('#').expect("command without a token");
        let mut parts = line.splitn(2, ' ');
        let token = parts.next().unwrap().parse().unwrap();
        Some((token, parts.next().unwrap_or("").to_string()))
    }

    /// Wait for the next command, check it's `command` and return its token
    pub async fn expect(&mut self, command: &str) -> u64 {
        let (token, text) = self.next_command().await.expect("connection closed");
        assert_eq!(text, command);
        token
    }

    pub async fn reply(&mut self, token: u64, body: &str) {
        self.emit(&format!("#{} {}", token, body)).await;
    }

    /// Expect `command` and answer it with `body`
    pub async fn serve(&mut self, command: &str, body: &str) {
        let token = self.expect(command).await;
        self.reply(token, body).await;
    }
}

pub fn connect_with(config: &Config) -> (Connection, FakeVm) {
    let (client, vm) = tokio::io::duplex(4096);
    let (client_read, client_write) = tokio::io::split(client);
    let (vm_read, vm_write) = tokio::io::split(vm);

    let conn = Connection::from_stream(client_read, client_write, config);
    let vm = FakeVm {
        lines: FramedRead::new(vm_read, LinesCodec::new()),
        writer: vm_write,
    };

    (conn, vm)
}

pub fn connect() -> (Connection, FakeVm) {
    connect_with(&Config::new())
}
