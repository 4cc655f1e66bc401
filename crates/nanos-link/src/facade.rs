//! Asynchronous front end over the blocking signer.
//!
//! Every operation is queued to a single background worker and returns a
//! [`Pending`] handle. The handle is a `Future` for async callers and offers a
//! blocking [`Pending::wait`] for everyone else, so results land on whichever
//! context the caller chooses.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use nanos_apdu::{Address, Command, ExchangeResult, Signature, Version, HASH_SIZE};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{LifecycleErrorCode, LinkResult, SignerError, SignerResult};
use crate::session::{spawn_listener, DeviceListener, DeviceSession, SearchOutcome};
use crate::signer::HardwareSigner;

type Job = Box<dyn FnOnce() + Send + 'static>;

// ============================================================================
// Pending Operations
// ============================================================================

/// Handle to a queued operation.
///
/// Dropping or canceling the handle stops result delivery. A job that has not
/// started yet is skipped; a job already talking to the device runs to
/// completion (or timeout) and its result is discarded.
pub struct Pending<T> {
    rx: oneshot::Receiver<SignerResult<T>>,
    canceled: Arc<AtomicBool>,
}

impl<T> Pending<T> {
    fn ready(result: SignerResult<T>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Pending {
            rx,
            canceled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop result delivery.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Block the current thread until the result arrives.
    ///
    /// Must not be called from within an async runtime; `.await` the handle there.
    pub fn wait(mut self) -> SignerResult<T> {
        let (_, closed) = oneshot::channel();
        let rx = std::mem::replace(&mut self.rx, closed);
        rx.blocking_recv().unwrap_or(Err(SignerError::Canceled))
    }
}

impl<T> Future for Pending<T> {
    type Output = SignerResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SignerError::Canceled)))
    }
}

impl<T> Drop for Pending<T> {
    fn drop(&mut self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Discovery Poll Loop
// ============================================================================

struct DiscoveryLoop {
    stop: Sender<()>,
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

#[derive(Default)]
struct Discovery {
    current: Mutex<Option<DiscoveryLoop>>,
}

impl Discovery {
    fn is_running(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|l| l.running.load(Ordering::SeqCst))
    }

    fn stop(&self) {
        let Some(current) = self.current.lock().take() else {
            return;
        };
        let _ = current.stop.send(());
        if current.thread.thread().id() != thread::current().id() {
            let _ = current.thread.join();
        }
    }
}

fn discovery_loop(
    session: Arc<DeviceSession>,
    jobs: Sender<Job>,
    search_queued: Arc<AtomicBool>,
    interval: Duration,
    stop: Receiver<()>,
) {
    let ticker = crossbeam_channel::tick(interval);
    let denied = Arc::new(AtomicBool::new(false));
    // Only the first search of a loop may re-prompt after an earlier denial
    let mut retry_denied = true;
    debug!(?interval, "discovery started");

    loop {
        if session.is_ready() || session.is_destroyed() {
            break;
        }
        if denied.load(Ordering::SeqCst) {
            debug!("permission denied, discovery stopped");
            break;
        }

        if !search_queued.swap(true, Ordering::SeqCst) {
            let session = session.clone();
            let queued = search_queued.clone();
            let latch = denied.clone();
            let retry = std::mem::replace(&mut retry_denied, false);
            let job: Job = Box::new(move || {
                let outcome = if retry {
                    session.search()
                } else {
                    session.search_unless_denied()
                };
                match outcome {
                    Ok(SearchOutcome::PermissionDenied) => latch.store(true, Ordering::SeqCst),
                    Ok(outcome) => trace!(?outcome, "search"),
                    Err(e) => debug!(error = %e, "search failed"),
                }
                queued.store(false, Ordering::SeqCst);
            });
            if jobs.send(job).is_err() {
                break;
            }
        }

        crossbeam_channel::select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => {}
        }
    }

    debug!(ready = session.is_ready(), "discovery finished");
}

/// Stops discovery when the device goes away, then forwards to the user's listener.
struct StopOnDisconnect<L> {
    inner: L,
    discovery: Arc<Discovery>,
}

impl<L: DeviceListener> DeviceListener for StopOnDisconnect<L> {
    fn on_device_ready(&mut self) {
        self.inner.on_device_ready();
    }

    fn on_disconnected(&mut self) {
        self.discovery.stop();
        self.inner.on_disconnected();
    }

    fn on_error(&mut self, code: LifecycleErrorCode, cause: &str) {
        self.inner.on_error(code, cause);
    }
}

// ============================================================================
// Async Signer
// ============================================================================

/// Cancellable asynchronous access to a [`HardwareSigner`].
pub struct AsyncSigner {
    signer: HardwareSigner,
    jobs: Sender<Job>,
    discovery: Arc<Discovery>,
    search_queued: Arc<AtomicBool>,
}

impl AsyncSigner {
    /// Start the background worker for `session`.
    pub fn new(session: Arc<DeviceSession>) -> LinkResult<Self> {
        let (jobs, queue) = crossbeam_channel::unbounded::<Job>();
        thread::Builder::new()
            .name("nanos-worker".to_string())
            .spawn(move || {
                for job in queue.iter() {
                    job();
                }
                trace!("worker exiting");
            })?;

        Ok(AsyncSigner {
            signer: HardwareSigner::new(session),
            jobs,
            discovery: Arc::new(Discovery::default()),
            search_queued: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn signer(&self) -> &HardwareSigner {
        &self.signer
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        self.signer.session()
    }

    pub fn is_ready(&self) -> bool {
        self.session().is_ready()
    }

    fn submit<T, F>(&self, f: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&HardwareSigner) -> SignerResult<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let canceled = Arc::new(AtomicBool::new(false));
        let flag = canceled.clone();
        let signer = self.signer.clone();

        let job: Job = Box::new(move || {
            if flag.load(Ordering::SeqCst) {
                trace!("skipping canceled job");
                return;
            }
            let result = f(&signer);
            if flag.load(Ordering::SeqCst) {
                trace!("discarding result of canceled job");
                return;
            }
            let _ = tx.send(result);
        });

        // A dead worker drops the job, which resolves the handle as canceled
        let _ = self.jobs.send(job);
        Pending { rx, canceled }
    }

    /// Queue a raw exchange.
    pub fn exchange(&self, command: Command, payload: Vec<u8>) -> Pending<ExchangeResult> {
        self.submit(move |signer| Ok(signer.exchange(command, &payload)?))
    }

    /// Queue a device search.
    pub fn search(&self) -> Pending<SearchOutcome> {
        self.submit(|signer| Ok(signer.session().search()?))
    }

    pub fn get_version(&self) -> Pending<Version> {
        self.submit(|signer| signer.get_version())
    }

    pub fn get_address(&self) -> Pending<Address> {
        self.submit(|signer| signer.get_address())
    }

    pub fn get_address_at(&self, index: u32, silent: bool) -> Pending<Address> {
        self.submit(move |signer| signer.get_address_at(index, silent))
    }

    pub fn sign_tx_hash(&self, hash: Vec<u8>) -> Pending<Signature> {
        self.sign_tx_hash_at(0, hash)
    }

    /// Queue a signature. A hash of the wrong length fails immediately.
    pub fn sign_tx_hash_at(&self, index: u32, hash: Vec<u8>) -> Pending<Signature> {
        if hash.len() != HASH_SIZE {
            return Pending::ready(Err(SignerError::InvalidHashLength(hash.len())));
        }
        self.submit(move |signer| signer.sign_tx_hash_at(index, &hash))
    }

    /// Start polling `search()` until the device is ready or permission is denied.
    ///
    /// Returns `false` if a poll loop is already running.
    pub fn start_discovery(&self) -> LinkResult<bool> {
        let mut current = self.discovery.current.lock();
        if current
            .as_ref()
            .is_some_and(|l| l.running.load(Ordering::SeqCst))
        {
            return Ok(false);
        }
        if let Some(finished) = current.take() {
            let _ = finished.thread.join();
        }

        let session = self.session().clone();
        let interval = session.config().poll_interval();
        let jobs = self.jobs.clone();
        let queued = self.search_queued.clone();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let (stop, stop_rx) = crossbeam_channel::bounded(1);

        let thread = thread::Builder::new()
            .name("nanos-discovery".to_string())
            .spawn(move || {
                discovery_loop(session, jobs, queued, interval, stop_rx);
                flag.store(false, Ordering::SeqCst);
            })?;

        *current = Some(DiscoveryLoop {
            stop,
            running,
            thread,
        });
        Ok(true)
    }

    /// Stop the poll loop, waiting for it to exit.
    pub fn stop_discovery(&self) {
        self.discovery.stop();
    }

    pub fn is_discovering(&self) -> bool {
        self.discovery.is_running()
    }

    /// Deliver lifecycle events to `listener`, replacing any previous one.
    ///
    /// A disconnect also stops the discovery poll loop.
    pub fn set_listener<L>(&self, listener: L) -> LinkResult<()>
    where
        L: DeviceListener + 'static,
    {
        let events = self.session().subscribe();
        spawn_listener(
            events,
            StopOnDisconnect {
                inner: listener,
                discovery: self.discovery.clone(),
            },
        )?;
        Ok(())
    }

    /// Stop discovery and destroy the session.
    pub fn destroy(&self) {
        self.discovery.stop();
        self.session().destroy();
    }
}

impl Drop for AsyncSigner {
    fn drop(&mut self) {
        self.discovery.stop();
    }
}
