use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{self, BoxFuture, Either, FutureExt, Shared};
use futures::{Stream, StreamExt};
use stream_cancel::{Trigger, Valved};
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tokio::time;
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};

use crate::correlator::{Correlator, PendingResult, Request, Response};
use crate::driver::{Driver, DriverEvent, DriverEvents};
use crate::registry::{NotificationRegistry, NotifyCallback};
use crate::state::{ConnectionState, StateMachine};
use crate::{
    AttributeTable, Characteristic, Error, Handle, Result, SessionConfig, Target, WriteMode,
};

type Transition<T> = Shared<BoxFuture<'static, T>>;

/// Lifecycle notifications of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    /// The session was disconnected on request.
    Disconnected,
    /// The link went away without being asked to.
    ConnectionLost,
}

#[derive(Default)]
struct Link {
    machine: StateMachine,
    connecting: Option<(Transition<Result<()>>, AbortHandle)>,
    disconnecting: Option<Transition<()>>,
    table: Option<Arc<AttributeTable>>,
    pump: Option<Trigger>,
}

struct Inner {
    identifier: String,
    config: SessionConfig,
    driver: Arc<dyn Driver>,
    link: Mutex<Link>,
    correlator: Correlator,
    registry: NotificationRegistry,
    events: broadcast::Sender<SessionEvent>,
}

/// GATT client session with one device.
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identifier", &self.inner.identifier)
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    /// Create a session for the device `identifier`, as understood by `driver`.
    pub fn new(identifier: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
        Self::with_config(identifier, driver, SessionConfig::default())
    }

    pub fn with_config(
        identifier: impl Into<String>,
        driver: Arc<dyn Driver>,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);

        Self {
            inner: Arc::new(Inner {
                identifier: identifier.into(),
                correlator: Correlator::new(driver.clone()),
                driver,
                config,
                link: Mutex::new(Link::default()),
                registry: NotificationRegistry::default(),
                events,
            }),
        }
    }

    #[inline]
    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.link.lock().unwrap().machine.state()
    }

    /// Connected and services discovered
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state().is_ready()
    }

    /// Attributes discovered on the current connection
    pub fn attributes(&self) -> Option<Arc<AttributeTable>> {
        self.inner.link.lock().unwrap().table.clone()
    }

    /// Get characteristic by handle or UUID
    pub fn characteristic(&self, target: impl Into<Target>) -> Result<Characteristic> {
        let target = target.into();
        self.resolve(|table| table.characteristic(target).cloned())
    }

    /// Handles with an active subscription
    pub fn subscriptions(&self) -> Vec<Handle> {
        self.inner.registry.handles()
    }

    /// Number of operations in flight or waiting for their turn
    pub fn pending_operations(&self) -> usize {
        self.inner.correlator.len()
    }

    /// Create a new stream that receives session events.
    pub fn event_stream(&self) -> Pin<Box<dyn Stream<Item = SessionEvent> + Send>> {
        let receiver = self.inner.events.subscribe();
        Box::pin(BroadcastStream::new(receiver).filter_map(|x| async move { x.ok() }))
    }

    /// Connect and discover services.
    ///
    /// Joins the attempt in progress if there is one, and returns immediately
    /// when already connected.
    pub async fn connect(&self) -> Result<()> {
        enum Wait {
            Connect(Transition<Result<()>>),
            Disconnect(Transition<()>),
        }

        loop {
            let wait = {
                let mut link = self.inner.link.lock().unwrap();
                match link.machine.begin_connect() {
                    Ok(Some(generation)) => {
                        let (outcome, abort) = self.inner.spawn_connect(generation);
                        link.connecting = Some((outcome.clone(), abort));
                        Wait::Connect(outcome)
                    }
                    Ok(None) => return Ok(()),
                    Err(Error::AlreadyConnecting) => match &link.connecting {
                        Some((outcome, _)) => Wait::Connect(outcome.clone()),
                        None => return Err(Error::AlreadyConnecting),
                    },
                    Err(Error::AlreadyDisconnecting) => match &link.disconnecting {
                        Some(outcome) => Wait::Disconnect(outcome.clone()),
                        None => return Err(Error::AlreadyDisconnecting),
                    },
                    Err(err) => return Err(err),
                }
            };

            match wait {
                Wait::Connect(outcome) => return outcome.await,
                Wait::Disconnect(outcome) => {
                    log::debug!("Waiting for {} to disconnect first", self.identifier());
                    outcome.await;
                }
            }
        }
    }

    /// Disconnect from the device.
    ///
    /// Always ends in the disconnected state; driver failures during teardown
    /// are logged and swallowed. Calling it while already disconnected does
    /// nothing.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.teardown(None).await;
        Ok(())
    }

    /// Connect and return a guard that disconnects when released or dropped.
    pub async fn connect_scoped(&self) -> Result<ConnectionGuard> {
        self.connect().await?;
        Ok(ConnectionGuard {
            session: self.clone(),
            armed: true,
        })
    }

    /// Run `body` on a connected session, disconnecting afterwards whether the
    /// body succeeded, failed, panicked or was cancelled.
    pub async fn with_connection<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.connect_scoped().await?;
        let result = body(guard.session.clone()).await;
        guard.release().await?;
        result
    }

    pub async fn read_characteristic(&self, target: impl Into<Target>) -> Result<Vec<u8>> {
        self.read_characteristic_with_timeout(target, self.inner.config.operation_timeout)
            .await
    }

    /// Like [`Session::read_characteristic`], failing with
    /// [`Error::OperationTimeout`] when the device does not answer within `timeout`.
    pub async fn read_characteristic_with_timeout(
        &self,
        target: impl Into<Target>,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let target = target.into();
        let response = self
            .run(
                |table| {
                    let characteristic = table.readable(target)?;
                    Ok(Request::Read {
                        handle: characteristic.handle,
                    })
                },
                timeout,
            )
            .await?;
        value_of(response)
    }

    pub async fn write_characteristic(
        &self,
        target: impl Into<Target>,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        self.write_characteristic_with_timeout(target, data, mode, self.inner.config.operation_timeout)
            .await
    }

    pub async fn write_characteristic_with_timeout(
        &self,
        target: impl Into<Target>,
        data: &[u8],
        mode: WriteMode,
        timeout: Duration,
    ) -> Result<()> {
        let target = target.into();
        self.run(
            |table| {
                let characteristic = table.writable(target, mode)?;
                Ok(Request::Write {
                    handle: characteristic.handle,
                    data: data.to_vec(),
                    mode,
                })
            },
            timeout,
        )
        .await
        .map(|_| ())
    }

    pub async fn read_descriptor(&self, target: impl Into<Target>) -> Result<Vec<u8>> {
        self.read_descriptor_with_timeout(target, self.inner.config.operation_timeout)
            .await
    }

    pub async fn read_descriptor_with_timeout(
        &self,
        target: impl Into<Target>,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let target = target.into();
        let response = self
            .run(
                |table| {
                    let descriptor = table.descriptor(target)?;
                    Ok(Request::Read {
                        handle: descriptor.handle,
                    })
                },
                timeout,
            )
            .await?;
        value_of(response)
    }

    pub async fn write_descriptor(&self, target: impl Into<Target>, data: &[u8]) -> Result<()> {
        self.write_descriptor_with_timeout(target, data, self.inner.config.operation_timeout)
            .await
    }

    pub async fn write_descriptor_with_timeout(
        &self,
        target: impl Into<Target>,
        data: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        let target = target.into();
        self.run(
            |table| {
                let descriptor = table.descriptor(target)?;
                Ok(Request::Write {
                    handle: descriptor.handle,
                    data: data.to_vec(),
                    mode: WriteMode::WithResponse,
                })
            },
            timeout,
        )
        .await
        .map(|_| ())
    }

    /// Deliver notifications or indications of a characteristic to `callback`.
    ///
    /// A characteristic has at most one subscriber; subscribing again replaces
    /// the previous callback.
    pub async fn subscribe<F>(&self, target: impl Into<Target>, callback: F) -> Result<()>
    where
        F: FnMut(Handle, Vec<u8>) + Send + 'static,
    {
        let target = target.into();
        let handle = self.resolve(|table| Ok(table.notifiable(target)?.handle))?;

        if self.inner.registry.contains(handle) {
            log::debug!("Replacing subscription on {}", handle);
            self.unsubscribe(handle).await?;
        }

        let callback: NotifyCallback = Box::new(callback);
        let mut pending = PendingSubscription {
            registry: &self.inner.registry,
            handle,
            id: None,
        };
        self.run(
            |table| {
                table.notifiable(Target::Handle(handle))?;
                // Registered before enabling so the first value cannot slip past.
                pending.id = Some(pending.registry.insert(handle, callback));
                Ok(Request::SetNotify {
                    handle,
                    enabled: true,
                })
            },
            self.inner.config.operation_timeout,
        )
        .await?;

        pending.keep();
        Ok(())
    }

    /// Subscribe and receive the values as a stream.
    ///
    /// The stream ends when the subscription is removed or the connection
    /// goes away.
    pub async fn notifications(
        &self,
        target: impl Into<Target>,
    ) -> Result<Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribe(target, move |_, value| {
            sender.send(value).ok();
        })
        .await?;

        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    /// Stop notifications of a characteristic. Does nothing if there is no
    /// subscription.
    pub async fn unsubscribe(&self, target: impl Into<Target>) -> Result<()> {
        let target = target.into();
        let handle = self.resolve(|table| Ok(table.characteristic(target)?.handle))?;

        if !self.inner.registry.remove(handle) {
            log::debug!("No subscription on {}", handle);
            return Ok(());
        }

        self.run(
            |_| {
                Ok(Request::SetNotify {
                    handle,
                    enabled: false,
                })
            },
            self.inner.config.operation_timeout,
        )
        .await
        .map(|_| ())
    }

    /// Bond with the device. Fails with [`Error::NativeOperationFailed`] on
    /// drivers without pairing support.
    pub async fn pair(&self) -> Result<()> {
        self.inner.link.lock().unwrap().machine.ready()?;
        log::info!("Pairing with {}", self.identifier());
        self.inner.driver.pair().await
    }

    /// Remove the bond with the device.
    pub async fn unpair(&self) -> Result<()> {
        self.inner.link.lock().unwrap().machine.ready()?;
        log::info!("Unpairing from {}", self.identifier());
        self.inner.driver.unpair().await
    }

    /// Run `lookup` against the attribute table of a ready connection.
    fn resolve<T>(&self, lookup: impl FnOnce(&AttributeTable) -> Result<T>) -> Result<T> {
        let link = self.inner.link.lock().unwrap();
        link.machine.ready()?;
        let table = link.table.as_ref().ok_or(Error::NotConnected)?;
        lookup(table)
    }

    /// Validate and queue a request, then wait for its completion.
    async fn run(
        &self,
        build: impl FnOnce(&AttributeTable) -> Result<Request>,
        timeout: Duration,
    ) -> Result<Response> {
        // Queued while holding the link so a concurrent teardown either
        // rejects the request or fails it with the rest of the queue.
        let pending = self.resolve(|table| {
            let request = build(table)?;
            Ok(self.inner.correlator.submit(request, timeout))
        })?;
        self.settle(pending).await
    }

    async fn settle(&self, pending: PendingResult) -> Result<Response> {
        let result = pending.wait().await;

        if let Err(err) = &result {
            if self.inner.config.disconnect_on_error && err.is_operation_failure() {
                log::warn!("Disconnecting from {} after: {}", self.identifier(), err);
                self.disconnect().await?;
            }
        }

        result
    }
}

/// Callback registered by a `subscribe` whose enable request has not
/// completed. Removed again unless kept.
struct PendingSubscription<'a> {
    registry: &'a NotificationRegistry,
    handle: Handle,
    id: Option<u64>,
}

impl PendingSubscription<'_> {
    fn keep(mut self) {
        self.id = None;
    }
}

impl Drop for PendingSubscription<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if self.registry.remove_exact(self.handle, id) {
                log::debug!("Dropped unconfirmed subscription on {}", self.handle);
            }
        }
    }
}

fn value_of(response: Response) -> Result<Vec<u8>> {
    match response {
        Response::Value(value) => Ok(value),
        other => Err(Error::native(
            None,
            format!("expected a value, driver completed with {:?}", other),
        )),
    }
}

/// Resolves when the link of `events` goes away.
async fn until_lost(events: &mut DriverEvents) {
    while let Some(event) = events.next().await {
        match event {
            DriverEvent::ConnectionLost => return,
            DriverEvent::ValueChanged { handle, .. } => {
                log::trace!("Ignoring value on {} before discovery finished", handle)
            }
        }
    }
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        self.events.send(event).ok();
    }

    fn spawn_connect(self: &Arc<Self>, generation: u64) -> (Transition<Result<()>>, AbortHandle) {
        let task = tokio::spawn(self.clone().establish(generation));
        let abort = task.abort_handle();

        let outcome = async move {
            match task.await {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => Err(Error::ConnectionFailed(
                    "connection attempt was cancelled".to_string(),
                )),
                Err(err) => Err(Error::ConnectionFailed(err.to_string())),
            }
        }
        .boxed()
        .shared();

        (outcome, abort)
    }

    async fn establish(self: Arc<Self>, generation: u64) -> Result<()> {
        log::info!("Connecting to {}", self.identifier);

        let attempt = async {
            self.driver.connect(&self.identifier).await?;

            let established = {
                let mut link = self.link.lock().unwrap();
                link.machine.link_established(generation)
            };
            if !established {
                return Err(Error::ConnectionFailed(
                    "connection attempt was superseded".to_string(),
                ));
            }

            let mut events = self.driver.events().await?;
            let services = match future::select(
                self.driver.discover_services(),
                Box::pin(until_lost(&mut events)),
            )
            .await
            {
                Either::Left((services, _)) => services?,
                Either::Right(((), _)) => return Err(Error::ConnectionLost),
            };

            // Reported after discovery returned but before the pump runs.
            loop {
                match events.next().now_or_never() {
                    Some(Some(DriverEvent::ConnectionLost)) | Some(None) => {
                        return Err(Error::ConnectionLost)
                    }
                    Some(Some(DriverEvent::ValueChanged { handle, .. })) => {
                        log::trace!("Ignoring value on {} before discovery finished", handle)
                    }
                    None => break,
                }
            }

            Ok((events, AttributeTable::new(services)?))
        };

        let failure = match time::timeout(self.config.connection_timeout, attempt).await {
            Ok(Ok((events, table))) => {
                if self.go_live(generation, events, table) {
                    return Ok(());
                }
                Error::ConnectionFailed("connection attempt was superseded".to_string())
            }
            Ok(Err(Error::ConnectionFailed(reason))) => Error::ConnectionFailed(reason),
            Ok(Err(err)) => Error::ConnectionFailed(err.to_string()),
            Err(_) => Error::ConnectionFailed(format!(
                "timed out after {:?}",
                self.config.connection_timeout
            )),
        };

        log::warn!("Could not connect to {}: {}", self.identifier, failure);
        if let Err(err) = self.driver.disconnect().await {
            log::debug!("Cleanup after failed connect: {}", err);
        }

        let mut link = self.link.lock().unwrap();
        if link.machine.connect_failed(generation) {
            link.connecting = None;
        }
        Err(failure)
    }

    /// Publish the discovered table and start relaying driver events.
    fn go_live(self: &Arc<Self>, generation: u64, events: DriverEvents, table: AttributeTable) -> bool {
        let services = table.services().len();
        {
            let mut link = self.link.lock().unwrap();
            if !link.machine.services_discovered(generation) {
                return false;
            }

            let (trigger, events) = Valved::new(events);
            link.table = Some(Arc::new(table));
            link.pump = Some(trigger);
            link.connecting = None;

            tokio::spawn(self.clone().pump(generation, events));
        }

        log::info!("Connected to {} ({} services)", self.identifier, services);
        self.emit(SessionEvent::Connected);
        true
    }

    /// Relay driver events of link `generation` until it goes away.
    async fn pump(self: Arc<Self>, generation: u64, mut events: Valved<DriverEvents>) {
        while let Some(event) = events.next().await {
            match event {
                DriverEvent::ValueChanged { handle, value } => {
                    if !self.registry.dispatch(handle, value) {
                        log::trace!("Ignoring value on {}, nobody subscribed", handle);
                    }
                }
                DriverEvent::ConnectionLost => {
                    log::warn!("Connection to {} lost", self.identifier);
                    self.teardown(Some(generation)).await;
                    return;
                }
            }
        }

        let live = self.link.lock().unwrap().machine.is_live(generation);
        if live {
            log::warn!("Event stream of {} ended, treating the link as lost", self.identifier);
            self.teardown(Some(generation)).await;
        }
    }

    /// Tear the link down, or join the teardown already in progress.
    ///
    /// `lost` carries the generation of a link that dropped on its own.
    async fn teardown(self: &Arc<Self>, lost: Option<u64>) {
        let outcome = {
            let mut link = self.link.lock().unwrap();
            match link.machine.begin_disconnect(lost) {
                Ok(None) => return,
                Ok(Some(_)) => {
                    if let Some((_, abort)) = link.connecting.take() {
                        abort.abort();
                    }
                    link.pump = None;
                    link.table = None;

                    self.correlator.fail_all();
                    let subscribed = self.registry.clear();

                    let outcome = self.spawn_release(subscribed, lost.is_some());
                    link.disconnecting = Some(outcome.clone());
                    outcome
                }
                Err(_) => match &link.disconnecting {
                    Some(outcome) => outcome.clone(),
                    None => return,
                },
            }
        };

        outcome.await;
    }

    fn spawn_release(self: &Arc<Self>, subscribed: Vec<Handle>, lost: bool) -> Transition<()> {
        let task = tokio::spawn(self.clone().release(subscribed, lost));
        let inner = self.clone();

        async move {
            if let Err(err) = task.await {
                log::error!("Teardown of {} failed: {}", inner.identifier, err);
                inner.finish_disconnect();
            }
        }
        .boxed()
        .shared()
    }

    async fn release(self: Arc<Self>, subscribed: Vec<Handle>, lost: bool) {
        if !lost {
            for handle in subscribed {
                if let Err(err) = self.driver.set_notify(handle, false).await {
                    log::debug!("Could not disable notifications on {}: {}", handle, err);
                }
            }
        }

        if let Err(err) = self.driver.disconnect().await {
            log::warn!("Ignoring failed disconnect from {}: {}", self.identifier, err);
        }

        self.finish_disconnect();
        log::info!("Disconnected from {}", self.identifier);
        self.emit(if lost {
            SessionEvent::ConnectionLost
        } else {
            SessionEvent::Disconnected
        });
    }

    fn finish_disconnect(&self) {
        let mut link = self.link.lock().unwrap();
        link.machine.finish_disconnect();
        link.disconnecting = None;
    }
}

/// Keeps a session connected for a scope.
///
/// Disconnects on [`ConnectionGuard::release`], or from a spawned task when
/// dropped without being released.
pub struct ConnectionGuard {
    session: Session,
    armed: bool,
}

impl ConnectionGuard {
    pub async fn release(mut self) -> Result<()> {
        self.armed = false;
        self.session.disconnect().await
    }
}

impl Deref for ConnectionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let session = self.session.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    session.disconnect().await.ok();
                });
            }
            Err(_) => log::warn!(
                "Connection guard for {} dropped outside a runtime, not disconnecting",
                self.session.identifier()
            ),
        }
    }
}
