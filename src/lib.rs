//! Host-side Media Transfer Protocol (MTP/PTP) over USB.
//!
//! Connects to portable devices (Android phones in "File transfer" mode,
//! PTP cameras) and exchanges files and metadata with them: storage and
//! directory listings, streaming download/upload with progress and
//! cancellation, virtual path resolution over MTP's flat handle space, and
//! device-originated change events.
//!
//! # Architecture
//!
//! - [`ptp`]: pure wire layer: little-endian codec, the 12-byte container
//!   framing, code registries, datasets, property lists
//! - `transport`: USB boundary: bulk/interrupt endpoints, packetization,
//!   zero-length-packet handling, stall recovery (nusb-backed)
//! - `session`: the transaction engine: one command, optional data phase,
//!   one response, serialized by a session mutex
//! - [`MtpDevice`] / [`Storage`]: the file-oriented API on top, including
//!   recursive transfers and path resolution
//! - [`mtp`]: device events read from the interrupt endpoint
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), mtp_rs::Error> {
//! use mtp_rs::MtpDevice;
//!
//! let listed = MtpDevice::list_devices()?;
//! let device = MtpDevice::open(&listed[0]).await?;
//! for storage in device.storages().await? {
//!     println!("{}: {} bytes free", storage.info().description, storage.info().free_space_bytes);
//!     for object in storage.list_objects(None).await? {
//!         println!("  {:10} {}", object.size, object.filename);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! MTP allows a single transaction in flight per session. All operations
//! serialize on an internal mutex, so sharing an [`MtpDevice`] across tasks
//! is safe but not parallel. The interrupt endpoint is independent:
//! [`MtpDevice::next_event`] and the request path do not block each other.

mod device;
mod error;
pub mod mtp;
pub mod ptp;
mod session;
mod storage;
mod stream;
mod transport;

pub use device::{EventWatcher, MtpDevice, MtpDeviceBuilder};
pub use error::{Error, Result, UsbError};
pub use mtp::DeviceEvent;
pub use ptp::{ObjectHandle, StorageId};
pub use storage::{FileDownload, NewObjectInfo, ObjectInfo, ScanResult, Storage};
pub use stream::{ByteStream, BoxedByteStream, CancellationToken, ProgressFn};
pub use transport::{DiscoveredDevice, MtpTransport, UsbTransport};
