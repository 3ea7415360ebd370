// ABOUTME: In-process fake Redis server for integration tests.
// ABOUTME: Speaks enough RESP for handshakes, PING, SELECT, AUTH, and KEYS.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpListener;

#[derive(Default)]
struct State {
    password: Option<String>,
    keys: Vec<String>,
    connections: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

/// A fake cache server accepting TCP connections or caller-supplied streams.
#[derive(Clone)]
pub struct FakeCache {
    addr: Option<SocketAddr>,
    state: Arc<State>,
}

impl FakeCache {
    /// A server that is not listening anywhere; feed it streams with `serve`.
    pub fn detached(password: Option<&str>, keys: &[&str]) -> Self {
        Self {
            addr: None,
            state: Arc::new(State {
                password: password.map(str::to_string),
                keys: keys.iter().map(|k| k.to_string()).collect(),
                ..Default::default()
            }),
        }
    }

    /// Listen on a random loopback port.
    pub async fn start(password: Option<&str>, keys: &[&str]) -> Self {
        Self::start_on("127.0.0.1:0", password, keys).await
    }

    pub async fn start_on(bind: &str, password: Option<&str>, keys: &[&str]) -> Self {
        let listener = TcpListener::bind(bind).await.expect("bind fake cache");
        let mut server = Self::detached(password, keys);
        server.addr = Some(listener.local_addr().expect("fake cache address"));

        let accept_server = server.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_server.serve(stream);
            }
        });

        server
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr.expect("fake cache is not listening")
    }

    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Number of client sessions served so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Commands received, upper-cased name followed by arguments.
    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().clone()
    }

    /// Serve one client session over `stream`.
    pub fn serve<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.state.connections.fetch_add(1, Ordering::SeqCst);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let _ = session(state, stream).await;
        });
    }
}

async fn session<S>(state: Arc<State>, stream: S) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let mut authenticated = state.password.is_none();

    while let Some(args) = read_command(&mut stream).await? {
        let Some(name) = args.first().map(|a| a.to_ascii_uppercase()) else {
            continue;
        };
        let mut recorded = vec![name.clone()];
        recorded.extend(args[1..].iter().cloned());
        state.commands.lock().push(recorded.join(" "));

        let reply = match name.as_str() {
            "AUTH" => match (&state.password, args.last()) {
                (Some(expected), Some(given)) if args.len() > 1 && expected == given => {
                    authenticated = true;
                    "+OK\r\n".to_string()
                }
                (None, _) => "-ERR AUTH called without any password configured\r\n".to_string(),
                _ => "-WRONGPASS invalid username-password pair or user is disabled.\r\n"
                    .to_string(),
            },
            "CLIENT" => "+OK\r\n".to_string(),
            "QUIT" => {
                stream.write_all(b"+OK\r\n").await?;
                return Ok(());
            }
            _ if !authenticated => "-NOAUTH Authentication required.\r\n".to_string(),
            "PING" => "+PONG\r\n".to_string(),
            "SELECT" => "+OK\r\n".to_string(),
            "KEYS" => {
                let pattern = args.get(1).map(String::as_str).unwrap_or("*");
                let matches: Vec<&String> = state
                    .keys
                    .iter()
                    .filter(|k| glob_match(pattern.as_bytes(), k.as_bytes()))
                    .collect();
                let mut reply = format!("*{}\r\n", matches.len());
                for key in matches {
                    reply.push_str(&format!("${}\r\n{}\r\n", key.len(), key));
                }
                reply
            }
            other => format!("-ERR unknown command '{}'\r\n", other),
        };

        stream.write_all(reply.as_bytes()).await?;
        stream.flush().await?;
    }

    Ok(())
}

/// Read one RESP array of bulk strings. Returns None at end of stream.
async fn read_command<R>(reader: &mut R) -> std::io::Result<Option<Vec<String>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }

    let count: usize = line
        .trim_end()
        .strip_prefix('*')
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| invalid(format!("expected array header, got {:?}", line)))?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await?;
        let len: usize = line
            .trim_end()
            .strip_prefix('$')
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| invalid(format!("expected bulk header, got {:?}", line)))?;

        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data).await?;
        data.truncate(len);
        args.push(String::from_utf8_lossy(&data).into_owned());
    }

    Ok(Some(args))
}

fn invalid(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message)
}

/// Glob matching supporting `*` and `?`.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}
