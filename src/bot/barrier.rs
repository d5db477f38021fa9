use std::{
    any::Any,
    backtrace::Backtrace,
    cell::{Cell, RefCell},
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Once,
    },
    task::{Context, Poll},
};

use tokio::{sync::Notify, task::JoinHandle};
use uuid::Uuid;

use super::dispatcher::HandlerResult;

/* Fault Barrier
 * Every unit of work runs in its own tokio task, wrapped by a boundary that turns a panic
 * or an escaped handler error into a log line. Nothing is re-raised: a faulty unit cannot
 * affect the process, the router, or any other unit.
 * The boundary sits inside the spawned task, so isolation is per unit, not per scheduler.
 */

/// A panic caught inside a unit of work.
#[derive(Debug, Clone)]
pub struct Fault {
    pub message: String,
    pub location: Option<String>,
    pub trace: Option<String>,
}

impl Fault {
    fn from_panic(payload: Box<dyn Any + Send>) -> Fault {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            text.to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        };

        let (location, trace) = LAST_PANIC
            .with(|last| last.borrow_mut().take())
            .unwrap_or_default();

        Fault {
            message,
            location,
            trace,
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {}", self.message, location),
            None => write!(f, "{}", self.message),
        }
    }
}

/* Panic hook plumbing
 * While a unit is being polled, the hook records the location and a backtrace for the
 * barrier to log, instead of printing them to stderr. Outside of units the previous hook
 * runs as usual.
 */
type PanicRecord = (Option<String>, Option<String>);

thread_local! {
    static CONTAINED: Cell<bool> = Cell::new(false);
    static LAST_PANIC: RefCell<Option<PanicRecord>> = RefCell::new(None);
}

static HOOK: Once = Once::new();

fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CONTAINED.with(Cell::get) {
                let location = info.location().map(|l| l.to_string());
                let trace = Backtrace::force_capture().to_string();
                LAST_PANIC.with(|last| *last.borrow_mut() = Some((location, Some(trace))));
            } else {
                previous(info);
            }
        }));
    });
}

// Marks the current thread as polling a contained unit until dropped.
struct ContainedScope {
    outer: bool,
}

impl ContainedScope {
    fn enter() -> Self {
        ContainedScope {
            outer: CONTAINED.with(|c| c.replace(true)),
        }
    }
}

impl Drop for ContainedScope {
    fn drop(&mut self) {
        CONTAINED.with(|c| c.set(self.outer));
    }
}

// Polls the inner future, catching any panic raised while doing so.
struct Contained<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for Contained<F> {
    type Output = Result<F::Output, Fault>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.inner.as_mut();
        let _scope = ContainedScope::enter();

        match panic::catch_unwind(AssertUnwindSafe(|| inner.poll(cx))) {
            Ok(Poll::Ready(output)) => Poll::Ready(Ok(output)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(Fault::from_panic(payload))),
        }
    }
}

// Counts a unit as in flight until dropped.
struct InFlight {
    active: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl InFlight {
    fn start(active: &Arc<AtomicUsize>, idle: &Arc<Notify>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        InFlight {
            active: Arc::clone(active),
            idle: Arc::clone(idle),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

#[derive(Clone)]
pub struct FaultBarrier {
    faults: Arc<AtomicU64>,
    active: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl FaultBarrier {
    pub fn new() -> Self {
        install_panic_hook();
        FaultBarrier {
            faults: Arc::new(AtomicU64::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /* Schedules a unit of work on a fresh tokio task and returns immediately.
     * Must be called from within a tokio runtime.
     * The returned handle never resolves to a panic, the fault is contained in the task.
     */
    pub fn run<F>(&self, unit: F) -> JoinHandle<()>
    where
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let faults = Arc::clone(&self.faults);
        let in_flight = InFlight::start(&self.active, &self.idle);

        tokio::spawn(async move {
            let _in_flight = in_flight;
            let contained = Contained {
                inner: Box::pin(unit),
            };

            match contained.await {
                Ok(Ok(())) => {
                    log::debug!("Fault Barrier - Unit {} completed", id);
                }
                Ok(Err(err)) => {
                    faults.fetch_add(1, Ordering::SeqCst);
                    log::error!("Fault Barrier - Unit {} failed: {}", id, err);
                }
                Err(fault) => {
                    faults.fetch_add(1, Ordering::SeqCst);
                    log::error!(
                        "Fault Barrier - PANIC in unit {}: {}\n{}",
                        id,
                        fault,
                        fault.trace.as_deref().unwrap_or("<no backtrace captured>")
                    );
                }
            }
        })
    }

    // Number of faults intercepted so far.
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::SeqCst)
    }

    // Number of units currently running.
    pub fn in_flight(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    // Resolves once no unit is in flight.
    pub async fn drain(&self) {
        loop {
            let idle = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }
}

impl Default for FaultBarrier {
    fn default() -> Self {
        FaultBarrier::new()
    }
}

// Tests
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::FaultBarrier;
    use crate::bot::{BotError, HandlerResult};

    async fn explode() -> HandlerResult {
        panic!("handler blew up")
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let barrier = FaultBarrier::new();

        let handle = barrier.run(async {
            let amount: f64 = "not-a-number".parse().unwrap();
            let _ = amount;
            Ok(())
        });

        // The task itself finishes cleanly, the panic never escapes it
        assert!(handle.await.is_ok());
        assert_eq!(barrier.faults(), 1);
        assert_eq!(barrier.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_healthy_unit_runs_after_fault() {
        let barrier = FaultBarrier::new();

        barrier
            .run(explode())
            .await
            .unwrap();

        let (tx, rx) = oneshot::channel();
        barrier.run(async move {
            tx.send(42).unwrap();
            Ok(())
        });

        assert_eq!(rx.await.unwrap(), 42);
        barrier.drain().await;
        assert_eq!(barrier.faults(), 1);
    }

    #[tokio::test]
    async fn test_handler_error_counts_as_fault() {
        let barrier = FaultBarrier::new();

        barrier
            .run(async { Err(BotError::UserError("bad input".to_string())) })
            .await
            .unwrap();

        assert_eq!(barrier.faults(), 1);
    }

    #[tokio::test]
    async fn test_run_does_not_block_caller() {
        let barrier = FaultBarrier::new();
        let (tx, rx) = oneshot::channel::<()>();

        let handle = barrier.run(async move {
            let _ = rx.await;
            Ok(())
        });

        // Control is back here while the unit is still waiting
        assert_eq!(barrier.in_flight(), 1);
        assert!(!handle.is_finished());

        tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(barrier.in_flight(), 0);
        assert_eq!(barrier.faults(), 0);
    }

    #[tokio::test]
    async fn test_panic_after_await_is_contained() {
        let barrier = FaultBarrier::new();

        barrier
            .run(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let args: Vec<String> = Vec::new();
                let _ = &args[3];
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(barrier.faults(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drain_waits_for_units() {
        let barrier = FaultBarrier::new();

        for _ in 0..4 {
            barrier.run(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            });
        }

        barrier.drain().await;
        assert_eq!(barrier.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drain_when_idle_returns() {
        let barrier = FaultBarrier::new();
        barrier.drain().await;
        assert_eq!(barrier.faults(), 0);
    }
}
