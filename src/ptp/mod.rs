//! PTP protocol layer: wire codec, container framing, code registries,
//! datasets, and the property-list parser.
//!
//! Everything in this module is pure encode/decode with no I/O; the
//! transport and session layers sit on top.

mod codes;
mod container;
pub(crate) mod properties;
mod records;
pub(crate) mod wire;

pub use codes::{
    AccessCapability, AssociationType, ContainerType, DataTypeCode, DevicePropertyCode, EventCode, ObjectFormatCode,
    ObjectPropertyCode, OperationCode, ResponseCode, StorageType,
};
pub use container::{
    CONTAINER_HEADER_LEN, Container, ContainerHeader, MAX_ASSEMBLED_CONTAINER, UNKNOWN_CONTAINER_LEN,
};
pub use properties::{PropListQuirks, PropertyValue};
pub use records::{DateTime, DeviceInfo, ObjectInfoRecord, StorageInfo, format_timestamp};

/// Device-assigned object handle.
///
/// Handles are opaque 32-bit values; the host never synthesizes one. The
/// two reserved values are [`ObjectHandle::ROOT`] (the storage root, used as
/// a parent in listings) and [`ObjectHandle::DEVICE`] (the whole device,
/// reported as the parent of top-level objects by some firmwares).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectHandle(pub u32);

impl ObjectHandle {
    /// The storage root. Not a valid handle for object operations.
    pub const ROOT: ObjectHandle = ObjectHandle(0xFFFF_FFFF);
    /// The device itself. Not a valid handle for object operations.
    pub const DEVICE: ObjectHandle = ObjectHandle(0);

    /// Returns true for the two reserved sentinel values.
    pub fn is_sentinel(self) -> bool {
        self == ObjectHandle::ROOT || self == ObjectHandle::DEVICE
    }
}

/// Device-assigned storage id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StorageId(pub u32);

impl StorageId {
    /// Matches every storage in `GetObjectHandles` queries.
    pub const ALL: StorageId = StorageId(0xFFFF_FFFF);
    /// Lets the device pick a storage in `SendObjectInfo`.
    pub const ANY: StorageId = StorageId(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_values() {
        assert_eq!(ObjectHandle::ROOT.0, 0xFFFF_FFFF);
        assert_eq!(ObjectHandle::DEVICE.0, 0);
        assert!(ObjectHandle::ROOT.is_sentinel());
        assert!(ObjectHandle::DEVICE.is_sentinel());
        assert!(!ObjectHandle(0x10).is_sentinel());
        assert_eq!(StorageId::ALL.0, 0xFFFF_FFFF);
        assert_eq!(StorageId::ANY.0, 0);
    }
}
