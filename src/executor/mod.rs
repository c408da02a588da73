//! Batch dispatcher: concurrent execution across hosts.
//!
//! A fixed pool of N workers (enforced by a semaphore) pulls hosts, runs
//! the per-host timeline — dial, authenticate, operate, release — and
//! publishes one result per host on a channel. Results arrive in
//! completion order; the dispatcher never drops them. Whole-task deadline
//! and interrupt handling live in the task facade, which owns the
//! consuming end of the channel.

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::connection::{ConnectionError, ConnectionResult, JumpHost, SshConnection, TargetHost};

/// Outcome status of one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    /// The operation completed and exited cleanly
    Success,
    /// Any stage of the per-host timeline failed
    Failed,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostStatus::Success => write!(f, "success"),
            HostStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The per-host outcome record.
#[derive(Debug, Clone)]
pub struct HostResult {
    /// Host alias
    pub alias: String,
    /// Success or failure
    pub status: HostStatus,
    /// Captured output or failure prose
    pub message: String,
}

impl HostResult {
    /// A successful result carrying the captured output.
    pub fn success(alias: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            status: HostStatus::Success,
            message: message.into(),
        }
    }

    /// A failed result carrying the error prose.
    pub fn failed(alias: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            status: HostStatus::Failed,
            message: message.into(),
        }
    }
}

/// Aggregated counts for one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    /// Stable identifier of this invocation
    pub task_id: String,
    /// Hosts that succeeded
    pub success_count: usize,
    /// Hosts that failed
    pub failure_count: usize,
    /// Wall-clock seconds from dispatch to summary
    pub elapsed: f64,
}

/// One of the four operation kinds, run against an established session.
#[async_trait]
pub trait HostOperation: Send + Sync {
    /// Execute the operation; the returned string becomes the result
    /// message.
    async fn run(&self, conn: &SshConnection, host: &TargetHost) -> ConnectionResult<String>;
}

/// The batch dispatcher.
pub struct BatchExecutor {
    concurrency: usize,
    conn_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
    jump: Option<Arc<JumpHost>>,
}

impl BatchExecutor {
    /// Create a dispatcher. Zero timeouts mean no deadline; concurrency is
    /// clamped to at least one worker.
    pub fn new(
        concurrency: usize,
        conn_timeout: Option<Duration>,
        command_timeout: Option<Duration>,
        jump: Option<JumpHost>,
    ) -> Self {
        Self {
            concurrency: concurrency.max(1),
            conn_timeout,
            command_timeout,
            jump: jump.map(Arc::new),
        }
    }

    /// Fan out `op` across `hosts` and return the result stream.
    ///
    /// Exactly one `HostResult` per host is published unless the consumer
    /// drops the receiver first (task deadline or interrupt).
    pub fn dispatch(
        &self,
        hosts: Vec<TargetHost>,
        op: Arc<dyn HostOperation>,
    ) -> mpsc::Receiver<HostResult> {
        let conn_timeout = self.conn_timeout;
        let command_timeout = self.command_timeout;
        let jump = self.jump.clone();

        debug!(
            hosts = hosts.len(),
            concurrency = self.concurrency,
            "dispatching batch"
        );

        fan_out(hosts, self.concurrency, move |host| {
            let op = op.clone();
            let jump = jump.clone();
            async move {
                run_host(host, op, conn_timeout, command_timeout, jump).await
            }
        })
    }
}

/// Semaphore-bounded fan-out across hosts.
///
/// This is the scheduling core, separated from the SSH timeline so the
/// bounding and fan-in behavior can be exercised on its own: at most
/// `concurrency` runners are in flight, every host produces exactly one
/// result, and a panicking runner is converted into a `Failed` record
/// rather than a lost one.
pub fn fan_out<F, Fut>(
    hosts: Vec<TargetHost>,
    concurrency: usize,
    run: F,
) -> mpsc::Receiver<HostResult>
where
    F: Fn(TargetHost) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = HostResult> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(hosts.len().max(1));
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

    for host in hosts {
        let tx = tx.clone();
        let semaphore = semaphore.clone();
        let run = run.clone();

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let alias = host.alias.clone();
            let result = match std::panic::AssertUnwindSafe(run(host))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(host = %alias, "host worker panicked");
                    HostResult::failed(alias, "internal error: host worker panicked")
                }
            };

            // the receiver may already be gone after a task deadline;
            // dropping the result then is the documented behavior
            let _ = tx.send(result).await;
        });
    }

    rx
}

/// The per-host timeline: connect under the connection deadline, run the
/// operation under the command deadline, release the session.
async fn run_host(
    host: TargetHost,
    op: Arc<dyn HostOperation>,
    conn_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
    jump: Option<Arc<JumpHost>>,
) -> HostResult {
    let alias = host.alias.clone();

    let connect = SshConnection::connect(&host, jump.as_deref());
    let connected = match conn_timeout {
        Some(limit) => match timeout(limit, connect).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::ConnectionFailed(format!(
                "connect to {}:{} timed out after {}s",
                host.address,
                host.port,
                limit.as_secs()
            ))),
        },
        None => connect.await,
    };

    let conn = match connected {
        Ok(conn) => conn,
        Err(e) => {
            debug!(host = %alias, error = %e, "host failed before operation");
            return HostResult::failed(alias, e.to_string());
        }
    };

    let outcome = match command_timeout {
        Some(limit) => match timeout(limit, op.run(&conn, &host)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::CommandTimeout(limit.as_secs())),
        },
        None => op.run(&conn, &host).await,
    };

    conn.close().await;

    match outcome {
        Ok(message) => HostResult::success(alias, message),
        Err(e) => HostResult::failed(alias, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn host(alias: &str) -> TargetHost {
        TargetHost {
            alias: alias.to_string(),
            address: alias.to_string(),
            port: 22,
            user: "tester".to_string(),
            password: None,
            auth_methods: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_one_result_per_host() {
        let hosts: Vec<_> = (0..20).map(|i| host(&format!("h{}", i))).collect();
        let mut rx = fan_out(hosts, 4, |h| async move {
            HostResult::success(h.alias, "ok")
        });

        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 20);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let hosts: Vec<_> = (0..16).map(|i| host(&format!("h{}", i))).collect();
        let in_flight2 = in_flight.clone();
        let peak2 = peak.clone();

        let mut rx = fan_out(hosts, 3, move |h| {
            let in_flight = in_flight2.clone();
            let peak = peak2.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                HostResult::success(h.alias, "ok")
            }
        });

        while rx.recv().await.is_some() {}
        assert!(
            peak.load(Ordering::SeqCst) <= 3,
            "peak concurrency {} exceeded the pool size",
            peak.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_result() {
        let hosts = vec![host("ok"), host("boom")];
        let mut rx = fan_out(hosts, 2, |h| async move {
            if h.alias == "boom" {
                panic!("deliberate");
            }
            HostResult::success(h.alias, "fine")
        });

        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }

        assert_eq!(results.len(), 2);
        let boom = results.iter().find(|r| r.alias == "boom").unwrap();
        assert_eq!(boom.status, HostStatus::Failed);
        assert!(boom.message.contains("panicked"));
    }

    #[tokio::test]
    async fn test_stuck_host_does_not_block_others() {
        let hosts = vec![host("stuck"), host("fast")];
        let mut rx = fan_out(hosts, 2, |h| async move {
            if h.alias == "stuck" {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            HostResult::success(h.alias, "ok")
        });

        // the fast host completes while the stuck one sleeps
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("fast host should finish promptly")
            .unwrap();
        assert_eq!(first.alias, "fast");
    }

    #[test]
    fn test_status_display_matches_log_stream() {
        assert_eq!(HostStatus::Success.to_string(), "success");
        assert_eq!(HostStatus::Failed.to_string(), "failed");
    }
}
