//! # Listen worker
//!
//! A [`CommandPort`] listen can block for a long time. To keep the main loop responsive to process
//! interrupts the port lives on its own worker thread and the main loop waits for each reply in
//! short slices, giving up when interrupted or when the optional listen timeout expires.
//!
//! A listen which is still running when the main loop gives up on it is not restarted. The next
//! call to [`ListenWorker::listen`] waits on that same listen instead.
//!
//! Dropping the worker hangs up on the port and waits up to [`STOP_TIMEOUT`] for the thread to
//! finish, so the port is dropped (and can save its state) before the process exits.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    ports::{CommandPort, ListenError},
    shutdown::InterruptFlag,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Longest time a dropped worker waits for its thread to finish.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the listen worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenParams {
    /// Give up waiting for a listen after this long, or wait indefinitely if not set.
    ///
    /// Units: seconds
    #[serde(default)]
    pub listen_timeout_s: Option<f64>,

    /// How often the wait checks for an interrupt.
    ///
    /// Units: seconds
    #[serde(default = "default_poll_interval_s")]
    pub poll_interval_s: f64,
}

/// Handle to the thread owning the command port.
pub struct ListenWorker {
    /// Dropped to tell the worker to stop
    request_tx: Option<Sender<()>>,
    reply_rx: Receiver<Result<Option<String>, ListenError>>,
    params: ListenParams,

    /// True while a request has been sent and its reply not yet received
    outstanding: bool,

    /// Disconnects when the worker thread exits
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Result of waiting for a listen.
#[derive(Debug)]
pub enum ListenWait {
    /// The listen completed
    Heard(Result<Option<String>, ListenError>),

    /// The listen timeout expired first
    TimedOut,

    /// A process interrupt arrived first
    Interrupted,

    /// The worker has stopped, no more commands will arrive
    Closed,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ListenParams {
    fn default() -> Self {
        Self {
            listen_timeout_s: None,
            poll_interval_s: default_poll_interval_s(),
        }
    }
}

impl ListenWorker {
    /// Start the worker, building the command port on the worker thread.
    ///
    /// Building the port on its own thread means the port itself doesn't need to be `Send`. Any
    /// error building the port is returned here.
    pub fn spawn<F, P>(build_port: F, params: ListenParams) -> Result<Self, ListenError>
    where
        F: FnOnce() -> Result<P, ListenError> + Send + 'static,
        P: CommandPort
    {
        let (request_tx, request_rx) = channel::<()>();
        let (reply_tx, reply_rx) = channel();
        let (init_tx, init_rx) = channel();
        let (done_tx, done_rx) = channel::<()>();

        let handle = thread::Builder::new()
            .name("listen_worker".into())
            .spawn(move || {
                let _done_tx = done_tx;

                let mut port = match build_port() {
                    Ok(p) => {
                        init_tx.send(Ok(())).ok();
                        p
                    }
                    Err(e) => {
                        init_tx.send(Err(e)).ok();
                        return
                    }
                };

                // Serve requests until the main side hangs up
                while request_rx.recv().is_ok() {
                    let result = port.listen_once();
                    if reply_tx.send(result).is_err() {
                        break
                    }
                }

                debug!("Listen worker exiting");
            })?;

        match init_rx.recv() {
            Ok(Ok(())) => (),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(ListenError::Closed),
        }

        info!("Listen worker started");

        Ok(Self {
            request_tx: Some(request_tx),
            reply_rx,
            params,
            outstanding: false,
            done_rx,
            handle: Some(handle),
        })
    }

    /// Start the worker with an already built port.
    pub fn from_port<P>(port: P, params: ListenParams) -> Result<Self, ListenError>
    where
        P: CommandPort + Send + 'static
    {
        Self::spawn(move || Ok(port), params)
    }

    /// Listen once, waiting until a reply, the timeout, or an interrupt.
    pub fn listen(&mut self, interrupt: &InterruptFlag) -> ListenWait {
        if !self.outstanding {
            let sent = match self.request_tx {
                Some(ref tx) => tx.send(()).is_ok(),
                None => false,
            };
            if !sent {
                return ListenWait::Closed
            }
            self.outstanding = true;
        }
        else {
            debug!("Resuming the previous listen");
        }

        let start = Instant::now();
        let timeout = self.params.listen_timeout_s.map(util::time::secs_to_duration);
        let poll = util::time::secs_to_duration(self.params.poll_interval_s)
            .max(Duration::from_millis(1));

        loop {
            match self.reply_rx.recv_timeout(poll) {
                Ok(r) => {
                    self.outstanding = false;
                    return ListenWait::Heard(r)
                }
                Err(RecvTimeoutError::Timeout) => {
                    if interrupt.is_set() {
                        return ListenWait::Interrupted
                    }
                    if let Some(t) = timeout {
                        if start.elapsed() >= t {
                            warn!("Listen timed out after {:.1} s", t.as_secs_f64());
                            return ListenWait::TimedOut
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.outstanding = false;
                    return ListenWait::Closed
                }
            }
        }
    }
}

impl Drop for ListenWorker {
    fn drop(&mut self) {
        // The worker finishes any listen in progress, then sees the hang up
        self.request_tx = None;

        match self.done_rx.recv_timeout(STOP_TIMEOUT) {
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        warn!("Listen worker panicked");
                    }
                }
                debug!("Listen worker stopped");
            }
            _ => warn!(
                "Listen worker still busy after {:.1} s, leaving it running",
                STOP_TIMEOUT.as_secs_f64()
            ),
        }
    }
}

fn default_poll_interval_s() -> f64 {
    0.05
}
