mod dispatch;
mod runtime;
mod server;

use anyhow::{Result, anyhow};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::UnixStream,
};

pub use runtime::socket_path;
pub use server::run_daemon;

fn connect(req: &serde_json::Value) -> Result<BufReader<UnixStream>> {
    let sock = socket_path()?;
    if !sock.exists() {
        return Err(anyhow!(
            "handctl daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)?;
    let line = serde_json::to_string(req)? + "\n";
    stream.write_all(line.as_bytes())?;
    Ok(BufReader::new(stream))
}

pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    let mut reader = connect(&req)?;
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: serde_json::Value = serde_json::from_str(&resp)?;
    Ok(v)
}

/// Sends `req` and hands every response line to `on_line` until the daemon
/// closes the stream or `on_line` returns false.
pub fn client_stream(
    req: serde_json::Value,
    mut on_line: impl FnMut(serde_json::Value) -> bool,
) -> Result<()> {
    let reader = connect(&req)?;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if !on_line(serde_json::from_str(&line)?) {
            break;
        }
    }
    Ok(())
}
