use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::Instrument;

use crate::client::ServerState;
use crate::protocol::{self, Method, Request};
use crate::{Error, ServerConfig};

type Waiter = oneshot::Sender<Result<Value, Error>>;
type Reply = oneshot::Receiver<Result<Value, Error>>;

/// Why the channel to a server closed.
#[derive(Clone, Debug)]
enum Closed {
    Exited,
    Faulted(String),
}

#[derive(Default)]
struct PendingInner {
    waiters: HashMap<u64, Waiter>,
    closed: bool,
}

/// Outstanding requests of one connection, keyed by correlation id.
#[derive(Default)]
struct Pending {
    next_id: AtomicU64,
    inner: Mutex<PendingInner>,
}

impl Pending {
    #[inline]
    fn lock(&self) -> MutexGuard<'_, PendingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issues a correlation id and a receiver for its response, or `None`
    /// once the channel has closed.
    fn register(&self) -> Option<(u64, Reply)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        inner.waiters.insert(id, tx);
        Some((id, rx))
    }

    /// Resolves the request with `id`. Returns `false` if no request with
    /// that id was ever issued.
    fn complete(&self, id: u64, result: Result<Value, Error>) -> bool {
        let waiter = self.lock().waiters.remove(&id);
        match waiter {
            Some(waiter) => {
                // The caller may have given up in the meantime.
                waiter.send(result).ok();
                true
            }
            None => {
                let issued =
                    id != 0 && id <= self.next_id.load(Ordering::Relaxed);
                if issued {
                    trace!("dropping late response to request {id}");
                }
                issued
            }
        }
    }

    #[inline]
    fn remove(&self, id: u64) {
        self.lock().waiters.remove(&id);
    }

    /// Rejects all outstanding and future requests. Returns how many
    /// requests were outstanding.
    fn close(&self, closed: &Closed, server_id: &str) -> usize {
        let waiters = {
            let mut inner = self.lock();
            inner.closed = true;
            std::mem::take(&mut inner.waiters)
        };
        let count = waiters.len();
        for (_, waiter) in waiters {
            let err = match closed {
                Closed::Exited => Error::Unavailable(server_id.to_owned()),
                Closed::Faulted(reason) => Error::Protocol(reason.clone()),
            };
            waiter.send(Err(err)).ok();
        }
        count
    }

    #[cfg(test)]
    fn outstanding(&self) -> usize {
        self.lock().waiters.len()
    }
}

/// Removes an abandoned request from the table, e.g. when the caller was
/// cancelled while waiting.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

/// What the reader task needs to stop the server.
struct ReaderHandle {
    kill_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The channel to one running server process.
pub(crate) struct Connection {
    server_id: Arc<str>,
    pending: Arc<Pending>,
    state: Arc<Mutex<ServerState>>,
    stdin: AsyncMutex<Option<ChildStdin>>,
    reader: Mutex<Option<ReaderHandle>>,
    grace: Duration,
}

impl Connection {
    /// Launches the server process and starts reading its output.
    pub fn spawn(
        config: &ServerConfig,
        grace: Duration,
    ) -> Result<Self, Error> {
        let spawn_error = |source| Error::Spawn {
            server_id: config.id.clone(),
            source,
        };
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;
        let missing = |stream| {
            spawn_error(std::io::Error::other(format!("no {stream} pipe")))
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        debug!(
            server_id = %config.id,
            pid = ?child.id(),
            "spawned server `{}`",
            config.command
        );

        let server_id: Arc<str> = Arc::from(config.id.as_str());
        let pending = Arc::new(Pending::default());
        let state = Arc::new(Mutex::new(ServerState::Starting));
        let span = debug_span!("remote reader", server_id = %server_id);
        tokio::spawn(forward_stderr(stderr).instrument(span.clone()));

        let (kill_tx, kill_rx) = oneshot::channel();
        let reader = Reader {
            server_id: Arc::clone(&server_id),
            pending: Arc::clone(&pending),
            state: Arc::clone(&state),
            grace,
        };
        let task = tokio::spawn(
            reader.run(child, stdout, kill_rx).instrument(span),
        );

        Ok(Self {
            server_id,
            pending,
            state,
            stdin: AsyncMutex::new(Some(stdin)),
            reader: Mutex::new(Some(ReaderHandle { kill_tx, task })),
            grace,
        })
    }

    #[inline]
    pub fn state(&self) -> ServerState {
        *lock(&self.state)
    }

    #[inline]
    pub fn set_state(&self, state: ServerState) {
        *lock(&self.state) = state;
    }

    #[inline]
    fn unavailable(&self) -> Error {
        Error::Unavailable(self.server_id.to_string())
    }

    /// Sends a request and waits for its response.
    ///
    /// Dropping the returned future abandons the request. A response that
    /// arrives for it later is discarded.
    pub async fn request(
        &self,
        method: Method,
        params: Value,
    ) -> Result<Value, Error> {
        let (id, rx) =
            self.pending.register().ok_or_else(|| self.unavailable())?;
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };
        let line = protocol::encode_line(&Request { id, method, params })?;
        {
            let mut stdin = self.stdin.lock().await;
            let Some(writer) = stdin.as_mut() else {
                return Err(self.unavailable());
            };
            let written = async {
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await
            };
            if let Err(err) = written.await {
                debug!(
                    server_id = %self.server_id,
                    "failed to write request {id}: {err}"
                );
                return Err(self.unavailable());
            }
        }
        trace!(server_id = %self.server_id, "sent request {id}");

        rx.await.unwrap_or_else(|_| Err(self.unavailable()))
    }

    /// Closes the channel and waits for the server to exit, killing it after
    /// the grace period.
    pub async fn shutdown(&self) {
        // Closing stdin is the signal for the server to exit.
        self.stdin.lock().await.take();

        let handle = lock(&self.reader).take();
        let Some(ReaderHandle { kill_tx, mut task }) = handle else {
            return;
        };
        if timeout(self.grace, &mut task).await.is_ok() {
            return;
        }
        debug!(
            server_id = %self.server_id,
            "server ignored shutdown, killing it"
        );
        kill_tx.send(()).ok();
        task.await.ok();
    }
}

struct Reader {
    server_id: Arc<str>,
    pending: Arc<Pending>,
    state: Arc<Mutex<ServerState>>,
    grace: Duration,
}

impl Reader {
    async fn run(
        self,
        mut child: Child,
        stdout: ChildStdout,
        mut kill_rx: oneshot::Receiver<()>,
    ) {
        let mut lines = BufReader::new(stdout).lines();
        let mut killed = false;
        let closed = loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = &mut kill_rx => {
                    killed = true;
                    break Closed::Exited;
                }
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break Closed::Exited,
                Err(err) => {
                    warn!("failed to read from server: {err}");
                    break Closed::Exited;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let response = match protocol::decode_response(&line) {
                Ok(response) => response,
                Err(err) => break Closed::Faulted(err.to_string()),
            };
            if let Some(reason) = response.shape_error() {
                break Closed::Faulted(reason);
            }
            let id = response.id;
            if !self.pending.complete(id, response.into_result()) {
                break Closed::Faulted(format!(
                    "response to unknown request {id}"
                ));
            }
        };

        // Publish the new state before failing the waiters, so they observe
        // it once they wake up.
        {
            let mut state = lock(&self.state);
            match &closed {
                Closed::Exited if *state != ServerState::Degraded => {
                    *state = ServerState::Terminated;
                }
                Closed::Exited => {}
                Closed::Faulted(_) => *state = ServerState::Degraded,
            }
        }
        let outstanding = self.pending.close(&closed, &self.server_id);
        match &closed {
            Closed::Exited if outstanding > 0 => warn!(
                outstanding,
                "server closed its output with requests in flight"
            ),
            Closed::Exited => debug!("server closed its output"),
            Closed::Faulted(reason) => {
                warn!(outstanding, "server is degraded: {reason}");
            }
        }

        // Nothing can be read from a desynchronized stream anymore.
        if killed || matches!(closed, Closed::Faulted(_)) {
            child.start_kill().ok();
        }
        match timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => debug!("server exited with {status}"),
            Ok(Err(err)) => warn!("failed to wait for server: {err}"),
            Err(_) => {
                child.start_kill().ok();
                child.wait().await.ok();
            }
        }
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("stderr: {line}");
    }
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_pending_table() {
        let pending = Pending::default();
        let (first, mut first_rx) = pending.register().unwrap();
        let (second, mut second_rx) = pending.register().unwrap();
        assert_ne!(first, second);

        // Responses complete their own request, in any order.
        assert!(pending.complete(second, Ok(json!(2))));
        assert!(pending.complete(first, Ok(json!(1))));
        assert_eq!(first_rx.try_recv().unwrap().unwrap(), json!(1));
        assert_eq!(second_rx.try_recv().unwrap().unwrap(), json!(2));

        // A late response to an issued id is tolerated, an id that was never
        // issued is not.
        assert!(pending.complete(first, Ok(json!(1))));
        assert!(!pending.complete(99, Ok(json!(99))));
    }

    #[test]
    fn test_close_rejects_everything() {
        let pending = Pending::default();
        let receivers: Vec<_> =
            (0..3).map(|_| pending.register().unwrap().1).collect();
        assert_eq!(pending.close(&Closed::Exited, "genes"), 3);
        for mut rx in receivers {
            assert!(matches!(
                rx.try_recv().unwrap(),
                Err(Error::Unavailable(id)) if id == "genes"
            ));
        }
        assert!(pending.register().is_none());
        assert_eq!(pending.outstanding(), 0);
    }

    #[test]
    fn test_guard_removes_abandoned_request() {
        let pending = Pending::default();
        let (id, _rx) = pending.register().unwrap();
        drop(PendingGuard {
            pending: &pending,
            id,
        });
        assert_eq!(pending.outstanding(), 0);
    }
}
