use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time;

use crate::driver::{Driver, WriteOutcome};
use crate::{Error, Handle, Result, WriteMode};

/// Kind of a queued GATT operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Write(WriteMode),
    Subscribe,
    Unsubscribe,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Read => "read",
            OperationKind::Write(WriteMode::WithResponse) => "write with response",
            OperationKind::Write(WriteMode::WithoutResponse) => "write without response",
            OperationKind::Subscribe => "subscribe",
            OperationKind::Unsubscribe => "unsubscribe",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Request {
    Read { handle: Handle },
    Write { handle: Handle, data: Vec<u8>, mode: WriteMode },
    SetNotify { handle: Handle, enabled: bool },
}

impl Request {
    pub(crate) fn kind(&self) -> OperationKind {
        match self {
            Request::Read { .. } => OperationKind::Read,
            Request::Write { mode, .. } => OperationKind::Write(*mode),
            Request::SetNotify { enabled: true, .. } => OperationKind::Subscribe,
            Request::SetNotify { enabled: false, .. } => OperationKind::Unsubscribe,
        }
    }

    pub(crate) fn handle(&self) -> Handle {
        match self {
            Request::Read { handle }
            | Request::Write { handle, .. }
            | Request::SetNotify { handle, .. } => *handle,
        }
    }

    async fn perform(&self, driver: &dyn Driver) -> Result<Response> {
        match self {
            Request::Read { handle } => driver.read(*handle).await.map(Response::Value),
            Request::Write { handle, data, mode } => {
                let outcome = driver.write(*handle, data, *mode).await?;
                if outcome != WriteOutcome::expected_for(*mode) {
                    log::warn!(
                        "Driver completed {:?} write on {} with {:?}",
                        mode,
                        handle,
                        outcome
                    );
                }
                Ok(Response::Written(outcome))
            }
            Request::SetNotify { handle, enabled } => driver
                .set_notify(*handle, *enabled)
                .await
                .map(|_| Response::Done),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Response {
    Value(Vec<u8>),
    Written(WriteOutcome),
    Done,
}

type Reply = oneshot::Sender<Result<Response>>;

struct Operation {
    id: u64,
    request: Request,
    reply: Reply,
}

/// The request the driver is working on. `reply` is gone once the caller was
/// answered with `ConnectionLost`; the slot stays taken until the driver returns.
struct InFlight {
    id: u64,
    reply: Option<Reply>,
}

#[derive(Default)]
struct Queue {
    next_id: u64,
    in_flight: Option<InFlight>,
    pending: VecDeque<Operation>,
}

impl Queue {
    /// Take the next operation whose caller is still waiting and mark it in flight.
    fn advance(&mut self) -> Option<(u64, Request)> {
        while let Some(operation) = self.pending.pop_front() {
            if operation.reply.is_closed() {
                log::debug!(
                    "Skipping {} on {}, caller stopped waiting",
                    operation.request.kind(),
                    operation.request.handle()
                );
                continue;
            }
            self.in_flight = Some(InFlight {
                id: operation.id,
                reply: Some(operation.reply),
            });
            return Some((operation.id, operation.request));
        }
        None
    }
}

/// Serializes GATT requests of one connection and matches each native
/// completion to the request that caused it.
///
/// At most one request is handed to the driver at a time; the rest wait in
/// submission order.
#[derive(Clone)]
pub(crate) struct Correlator {
    driver: Arc<dyn Driver>,
    queue: Arc<Mutex<Queue>>,
}

impl Correlator {
    pub(crate) fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            queue: Arc::new(Mutex::new(Queue::default())),
        }
    }

    pub(crate) fn submit(&self, request: Request, timeout: Duration) -> PendingResult {
        let (reply, receiver) = oneshot::channel();
        let kind = request.kind();
        let handle = request.handle();

        let mut queue = self.queue.lock().unwrap();
        let id = queue.next_id;
        queue.next_id += 1;

        if queue.in_flight.is_none() {
            queue.in_flight = Some(InFlight {
                id,
                reply: Some(reply),
            });
            self.dispatch(id, request);
        } else {
            log::trace!("Queueing {} on {} behind {} others", kind, handle, queue.pending.len() + 1);
            queue.pending.push_back(Operation { id, request, reply });
        }

        PendingResult {
            receiver,
            timeout,
            kind,
            handle,
        }
    }

    fn dispatch(&self, id: u64, request: Request) {
        log::debug!("Dispatching {} on {}", request.kind(), request.handle());

        let correlator = self.clone();
        tokio::spawn(async move {
            let result = request.perform(correlator.driver.as_ref()).await;
            correlator.complete(id, &request, result);
        });
    }

    fn complete(&self, id: u64, request: &Request, result: Result<Response>) {
        let mut queue = self.queue.lock().unwrap();

        match queue.in_flight.take() {
            Some(InFlight {
                id: current,
                reply: Some(reply),
            }) if current == id => {
                if reply.send(result).is_err() {
                    log::debug!(
                        "Discarding late completion of {} on {}",
                        request.kind(),
                        request.handle()
                    );
                }
            }
            Some(InFlight {
                id: current,
                reply: None,
            }) if current == id => {
                log::debug!(
                    "Discarding completion of {} on {} after the queue was cleared",
                    request.kind(),
                    request.handle()
                );
            }
            other => {
                queue.in_flight = other;
                log::warn!(
                    "Ignoring completion of {} on {}, it is not in flight",
                    request.kind(),
                    request.handle()
                );
                return;
            }
        }

        if let Some((next, request)) = queue.advance() {
            self.dispatch(next, request);
        }
    }

    /// Resolve every in-flight and queued operation with `ConnectionLost`.
    pub(crate) fn fail_all(&self) {
        let mut queue = self.queue.lock().unwrap();

        let mut failed = 0;
        if let Some(reply) = queue.in_flight.as_mut().and_then(|slot| slot.reply.take()) {
            let _ = reply.send(Err(Error::ConnectionLost));
            failed += 1;
        }
        for operation in queue.pending.drain(..) {
            let _ = operation.reply.send(Err(Error::ConnectionLost));
            failed += 1;
        }

        if failed > 0 {
            log::debug!("Failed {} pending operations with ConnectionLost", failed);
        }
    }

    /// Operations currently in flight or queued, not counting a request
    /// whose caller was already failed by `fail_all`.
    pub(crate) fn len(&self) -> usize {
        let queue = self.queue.lock().unwrap();
        let in_flight = queue
            .in_flight
            .as_ref()
            .map_or(false, |slot| slot.reply.is_some());
        queue.pending.len() + usize::from(in_flight)
    }
}

/// Caller side of a submitted operation.
///
/// Dropping it before the result arrives cancels the operation: a queued
/// operation is never dispatched, a dispatched one has its result discarded.
pub(crate) struct PendingResult {
    receiver: oneshot::Receiver<Result<Response>>,
    timeout: Duration,
    kind: OperationKind,
    handle: Handle,
}

impl PendingResult {
    pub(crate) async fn wait(self) -> Result<Response> {
        match time::timeout(self.timeout, self.receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                log::warn!(
                    "{} on {} timed out after {:?}",
                    self.kind,
                    self.handle,
                    self.timeout
                );
                Err(Error::OperationTimeout {
                    kind: self.kind,
                    handle: self.handle,
                    timeout: self.timeout,
                })
            }
        }
    }
}
