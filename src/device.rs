//! Device discovery, connection, and lifetime.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast};

use crate::error::{Error, Result};
use crate::mtp::DeviceEvent;
use crate::ptp::{DeviceInfo, DevicePropertyCode, PropListQuirks, StorageId};
use crate::session::Engine;
use crate::storage::Storage;
use crate::transport::{DiscoveredDevice, MtpTransport, UsbTransport, discover_devices};

/// Default per-transfer deadline. Some devices are slow to produce large
/// directories, so this errs on the generous side.
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);
/// Default deadline for one interrupt read; [`MtpDevice::next_event`]
/// returns [`Error::Timeout`] when no event arrived, and pollers simply call
/// again.
const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(1);

/// Configures and opens MTP devices.
///
/// ```no_run
/// # async fn demo() -> Result<(), mtp_rs::Error> {
/// use std::time::Duration;
/// use mtp_rs::{MtpDevice, MtpDeviceBuilder};
///
/// let devices = MtpDevice::list_devices()?;
/// let device = MtpDeviceBuilder::new()
///     .timeout(Duration::from_secs(30))
///     .open(&devices[0])
///     .await?;
/// println!("connected to {}", device.device_info().model);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MtpDeviceBuilder {
    timeout: Duration,
    event_timeout: Duration,
    strict_property_lists: bool,
    extra_devices: Vec<(u16, u16)>,
}

impl Default for MtpDeviceBuilder {
    fn default() -> Self {
        MtpDeviceBuilder {
            timeout: DEFAULT_IO_TIMEOUT,
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            strict_property_lists: false,
            extra_devices: Vec::new(),
        }
    }
}

impl MtpDeviceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline for each USB transfer (not for a whole operation; a large
    /// download performs many transfers, each under this deadline).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deadline for one [`MtpDevice::next_event`] poll.
    pub fn event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = timeout;
        self
    }

    /// Fail property-list parsing when the device returns property codes it
    /// was not asked for, instead of logging and counting the quirk.
    pub fn strict_property_lists(mut self, strict: bool) -> Self {
        self.strict_property_lists = strict;
        self
    }

    /// Adds a vendor/product pair to the discovery allow-list, for devices
    /// whose descriptors do not advertise the PTP class.
    pub fn allow_device(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.extra_devices.push((vendor_id, product_id));
        self
    }

    /// Enumerates devices honoring this builder's allow-list.
    pub fn list_devices(&self) -> Result<Vec<DiscoveredDevice>> {
        discover_devices(&self.extra_devices)
    }

    /// Opens `device`, claims its MTP interface, and starts a session.
    pub async fn open(self, device: &DiscoveredDevice) -> Result<MtpDevice> {
        let transport = UsbTransport::open(device)?;
        self.open_transport(transport).await
    }

    /// Opens the first MTP device on the bus.
    pub async fn open_first(self) -> Result<MtpDevice> {
        let devices = self.list_devices()?;
        let Some(first) = devices.first() else {
            return Err(Error::NoDevice);
        };
        self.open(first).await
    }

    /// Starts a session over an already-constructed transport. This is the
    /// seam for exercising the full engine against a scripted transport.
    pub async fn open_transport<T: MtpTransport>(self, transport: T) -> Result<MtpDevice<T>> {
        let transport = Arc::new(transport);
        let mut engine = Engine::new(Arc::clone(&transport), self.timeout, self.strict_property_lists);

        // GetDeviceInfo is legal outside a session (transaction id 0); fetch
        // capabilities first so session setup can log what it is talking to.
        let info = engine.get_device_info().await?;
        info!(
            "device: {} {} (MTP {}.{:02}, {} operations)",
            info.manufacturer,
            info.model,
            info.standard_version / 100,
            info.standard_version % 100,
            info.operations_supported.len()
        );
        engine.open_session().await?;

        Ok(MtpDevice {
            transport,
            engine: Arc::new(Mutex::new(engine)),
            info,
            event_timeout: self.event_timeout,
        })
    }
}

/// An open MTP session with one device.
///
/// The device enforces a single transaction at a time; all operations
/// serialize on an internal session mutex, so an `MtpDevice` can be shared
/// across tasks behind an `Arc`. Dropping the device closes the session on
/// a best-effort basis; call [`MtpDevice::close`] to observe the result.
pub struct MtpDevice<T: MtpTransport = UsbTransport> {
    transport: Arc<T>,
    engine: Arc<Mutex<Engine<T>>>,
    info: DeviceInfo,
    event_timeout: Duration,
}

impl MtpDevice {
    /// Lists MTP-capable devices without opening any of them.
    pub fn list_devices() -> Result<Vec<DiscoveredDevice>> {
        discover_devices(&[])
    }

    /// Opens `device` with default options.
    pub async fn open(device: &DiscoveredDevice) -> Result<MtpDevice> {
        MtpDeviceBuilder::new().open(device).await
    }
}

impl<T: MtpTransport> MtpDevice<T> {
    /// Capability record fetched at connection time.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Counters for device quirks observed on this session.
    pub async fn quirks(&self) -> PropListQuirks {
        self.engine.lock().await.quirks()
    }

    /// Lists the device's storages with their info records.
    pub async fn storages(&self) -> Result<Vec<Storage<'_, T>>> {
        let mut engine = self.engine.lock().await;
        let ids = engine.get_storage_ids().await?;
        let mut storages = Vec::with_capacity(ids.len());
        for id in ids {
            match engine.get_storage_info(id).await {
                Ok(info) => storages.push(Storage::new(self, id, info)),
                // A storage can unmount between the two calls (SD card pulled).
                Err(err) if !err.is_fatal() => {
                    warn!("GetStorageInfo for {id:?} failed: {err}");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(storages)
    }

    /// Opens one storage by id.
    pub async fn storage(&self, id: StorageId) -> Result<Storage<'_, T>> {
        let mut engine = self.engine.lock().await;
        let info = engine.get_storage_info(id).await?;
        Ok(Storage::new(self, id, info))
    }

    /// Raw value of a device property, interpretation left to the caller.
    pub async fn device_property(&self, property: DevicePropertyCode) -> Result<bytes::Bytes> {
        self.engine.lock().await.get_device_prop_value(property).await
    }

    /// Polls the interrupt endpoint for one device event.
    ///
    /// Returns [`Error::Timeout`] when the device had nothing to say within
    /// the event deadline; callers poll in a loop. The interrupt endpoint is
    /// independent of the request path, so polling does not block concurrent
    /// transfers.
    pub async fn next_event(&self) -> Result<DeviceEvent> {
        let raw = self.transport.interrupt_in(self.event_timeout).await?;
        if raw.is_empty() {
            // Spurious zero-length interrupt transfers happen; treat them
            // like an idle poll.
            return Err(Error::Timeout);
        }
        let event = DeviceEvent::decode(raw)?;
        debug!("device event: {event:?}");
        Ok(event)
    }

    /// Spawns a background task that polls for events and hands them to
    /// `on_event`, retrying transient failures with backoff. The watcher
    /// stops on disconnect or when [`EventWatcher::stop`] is called.
    ///
    /// ```no_run
    /// # async fn demo(device: std::sync::Arc<mtp_rs::MtpDevice>) {
    /// let watcher = mtp_rs::MtpDevice::watch_events(&device, |event| {
    ///     println!("device event: {event:?}");
    /// });
    /// # watcher.stop();
    /// # }
    /// ```
    pub fn watch_events<F>(device: &Arc<Self>, on_event: F) -> EventWatcher
    where
        F: Fn(DeviceEvent) + Send + Sync + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let device = Arc::clone(device);

        let handle = tokio::spawn(async move {
            debug!("event watcher started");
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.recv() => {
                        debug!("event watcher shutting down");
                        break;
                    }

                    result = device.next_event() => match result {
                        Ok(event) => on_event(event),
                        Err(Error::Timeout) => {
                            // No event within the deadline; brief pause to
                            // avoid a tight loop on chatty error-free idles.
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                        Err(Error::Disconnected) => {
                            info!("device disconnected; event watcher exiting");
                            break;
                        }
                        Err(err) => {
                            warn!("event read failed: {err}; backing off");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            }
            debug!("event watcher exited");
        });

        EventWatcher {
            shutdown: shutdown_tx,
            handle,
        }
    }

    /// Closes the session. The device handle is unusable afterwards.
    pub async fn close(self) -> Result<()> {
        let mut engine = self.engine.lock().await;
        engine.close_session().await
    }

    pub(crate) async fn lock_engine(&self) -> tokio::sync::MutexGuard<'_, Engine<T>> {
        self.engine.lock().await
    }

    pub(crate) async fn lock_engine_owned(&self) -> OwnedMutexGuard<Engine<T>> {
        Arc::clone(&self.engine).lock_owned().await
    }
}

impl<T: MtpTransport> Drop for MtpDevice<T> {
    fn drop(&mut self) {
        // Best-effort CloseSession so the device does not hold a stale
        // session across reconnects. Only possible when a runtime is still
        // around; otherwise the device will report SessionAlreadyOpen next
        // time and the open path recovers.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let engine = Arc::clone(&self.engine);
            runtime.spawn(async move {
                if let Err(err) = engine.lock().await.close_session().await {
                    debug!("close on drop failed: {err}");
                }
            });
        }
    }
}

/// Handle to a running background event loop; see
/// [`MtpDevice::watch_events`].
pub struct EventWatcher {
    shutdown: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl EventWatcher {
    /// Signals the watcher task to exit. Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    /// True once the watcher task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
