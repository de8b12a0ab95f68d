//! MTP device events.
//!
//! Devices report changes (object added, object removed, storage mounted)
//! as event containers on the interrupt endpoint. Poll one event at a time
//! with [`MtpDevice::next_event`](crate::MtpDevice::next_event), or spawn an
//! [`EventWatcher`](crate::EventWatcher) to dispatch events to a callback in
//! the background.

use crate::error::{Error, Result};
use crate::ptp::{Container, ContainerType, EventCode, ObjectHandle, StorageId};

/// A decoded device-initiated event.
///
/// Events carry zero to three parameters and never have a data phase.
/// Unknown codes are preserved rather than dropped so callers can log
/// vendor-specific traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    ObjectAdded { handle: ObjectHandle },
    ObjectRemoved { handle: ObjectHandle },
    ObjectInfoChanged { handle: ObjectHandle },
    StoreAdded { storage_id: StorageId },
    StoreRemoved { storage_id: StorageId },
    StorageInfoChanged { storage_id: StorageId },
    DeviceInfoChanged,
    DeviceReset,
    /// Anything this crate does not know by name, parameters included.
    Unknown { code: u16, params: Vec<u32> },
}

impl DeviceEvent {
    /// Decodes an event container read from the interrupt endpoint.
    pub(crate) fn decode(raw: bytes::Bytes) -> Result<DeviceEvent> {
        let container = Container::decode(raw)?;
        if container.kind != ContainerType::Event {
            return Err(Error::invalid_data(format!(
                "expected event container on interrupt endpoint, got {:?}",
                container.kind
            )));
        }
        let params = container.params()?;
        if params.len() > 3 {
            return Err(Error::invalid_data(format!(
                "event carries {} parameters, at most 3 are allowed",
                params.len()
            )));
        }
        let code = EventCode(container.code);
        let first = params.first().copied().unwrap_or(0);
        Ok(match code {
            EventCode::ObjectAdded => DeviceEvent::ObjectAdded {
                handle: ObjectHandle(first),
            },
            EventCode::ObjectRemoved => DeviceEvent::ObjectRemoved {
                handle: ObjectHandle(first),
            },
            EventCode::ObjectInfoChanged => DeviceEvent::ObjectInfoChanged {
                handle: ObjectHandle(first),
            },
            EventCode::StoreAdded => DeviceEvent::StoreAdded {
                storage_id: StorageId(first),
            },
            EventCode::StoreRemoved => DeviceEvent::StoreRemoved {
                storage_id: StorageId(first),
            },
            EventCode::StorageInfoChanged => DeviceEvent::StorageInfoChanged {
                storage_id: StorageId(first),
            },
            EventCode::DeviceInfoChanged => DeviceEvent::DeviceInfoChanged,
            EventCode::DeviceReset => DeviceEvent::DeviceReset,
            _ => DeviceEvent::Unknown {
                code: container.code,
                params,
            },
        })
    }
}
