//! Wire-format records: device info, storage info, object info, timestamps.
//!
//! Field order in the decode/encode functions is binding; it mirrors the
//! PIMA 15740 dataset layouts byte for byte.

use num_traits::FromPrimitive;

use super::codes::{
    AccessCapability, AssociationType, DevicePropertyCode, EventCode, ObjectFormatCode, OperationCode, StorageType,
};
use super::wire::{WireReader, WireWriter};
use crate::error::Result;

/// Device capability record returned by `GetDeviceInfo`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceInfo {
    pub standard_version: u16,
    pub vendor_extension_id: u32,
    pub vendor_extension_version: u16,
    pub vendor_extension_desc: String,
    pub functional_mode: u16,
    pub operations_supported: Vec<OperationCode>,
    pub events_supported: Vec<EventCode>,
    pub device_properties_supported: Vec<DevicePropertyCode>,
    pub capture_formats: Vec<ObjectFormatCode>,
    pub image_formats: Vec<ObjectFormatCode>,
    pub manufacturer: String,
    pub model: String,
    pub device_version: String,
    pub serial_number: String,
}

impl DeviceInfo {
    pub fn decode(payload: &[u8]) -> Result<DeviceInfo> {
        let mut r = WireReader::new(payload);
        Ok(DeviceInfo {
            standard_version: r.u16("standard version")?,
            vendor_extension_id: r.u32("vendor extension id")?,
            vendor_extension_version: r.u16("vendor extension version")?,
            vendor_extension_desc: r.string("vendor extension desc")?,
            functional_mode: r.u16("functional mode")?,
            operations_supported: r
                .array_u16("operations supported")?
                .into_iter()
                .map(OperationCode)
                .collect(),
            events_supported: r.array_u16("events supported")?.into_iter().map(EventCode).collect(),
            device_properties_supported: r
                .array_u16("device properties supported")?
                .into_iter()
                .map(DevicePropertyCode)
                .collect(),
            capture_formats: r
                .array_u16("capture formats")?
                .into_iter()
                .map(ObjectFormatCode)
                .collect(),
            image_formats: r.array_u16("image formats")?.into_iter().map(ObjectFormatCode).collect(),
            manufacturer: r.string("manufacturer")?,
            model: r.string("model")?,
            device_version: r.string("device version")?,
            serial_number: r.string("serial number")?,
        })
    }

    /// Returns true if the device advertises `operation`.
    pub fn supports_operation(&self, operation: OperationCode) -> bool {
        self.operations_supported.contains(&operation)
    }

    /// Returns true if the device advertises `event`.
    pub fn supports_event(&self, event: EventCode) -> bool {
        self.events_supported.contains(&event)
    }
}

/// Storage record returned by `GetStorageInfo`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StorageInfo {
    pub storage_type: StorageType,
    pub filesystem_type: u16,
    pub access_capability: AccessCapability,
    pub max_capacity: u64,
    pub free_space_bytes: u64,
    pub free_space_objects: u32,
    pub description: String,
    pub volume_label: String,
}

impl StorageInfo {
    pub fn decode(payload: &[u8]) -> Result<StorageInfo> {
        let mut r = WireReader::new(payload);
        let storage_type = StorageType::from_u16(r.u16("storage type")?).unwrap_or(StorageType::Undefined);
        let filesystem_type = r.u16("filesystem type")?;
        let access_capability =
            AccessCapability::from_u16(r.u16("access capability")?).unwrap_or(AccessCapability::ReadWrite);
        Ok(StorageInfo {
            storage_type,
            filesystem_type,
            access_capability,
            max_capacity: r.u64("max capacity")?,
            free_space_bytes: r.u64("free space")?,
            free_space_objects: r.u32("free space in objects")?,
            description: r.string("storage description")?,
            volume_label: r.string("volume label")?,
        })
    }

    /// Returns true when the storage reports any read-only capability.
    pub fn is_read_only(&self) -> bool {
        !matches!(self.access_capability, AccessCapability::ReadWrite)
    }
}

/// Object record as carried by `GetObjectInfo` and `SendObjectInfo`.
#[derive(Debug, Clone, Default)]
pub struct ObjectInfoRecord {
    pub storage_id: u32,
    pub object_format: ObjectFormatCode,
    pub protection_status: u16,
    pub object_compressed_size: u32,
    pub thumb_format: u16,
    pub thumb_compressed_size: u32,
    pub thumb_pix_width: u32,
    pub thumb_pix_height: u32,
    pub image_pix_width: u32,
    pub image_pix_height: u32,
    pub image_bit_depth: u32,
    pub parent_object: u32,
    pub association_type: AssociationType,
    pub association_desc: u32,
    pub sequence_number: u32,
    pub filename: String,
    pub capture_date: String,
    pub modification_date: String,
    pub keywords: String,
}

impl ObjectInfoRecord {
    pub fn decode(payload: &[u8]) -> Result<ObjectInfoRecord> {
        let mut r = WireReader::new(payload);
        Ok(ObjectInfoRecord {
            storage_id: r.u32("storage id")?,
            object_format: ObjectFormatCode(r.u16("object format")?),
            protection_status: r.u16("protection status")?,
            object_compressed_size: r.u32("compressed size")?,
            thumb_format: r.u16("thumb format")?,
            thumb_compressed_size: r.u32("thumb compressed size")?,
            thumb_pix_width: r.u32("thumb width")?,
            thumb_pix_height: r.u32("thumb height")?,
            image_pix_width: r.u32("image width")?,
            image_pix_height: r.u32("image height")?,
            image_bit_depth: r.u32("image bit depth")?,
            parent_object: r.u32("parent object")?,
            association_type: AssociationType::from_u16(r.u16("association type")?)
                .unwrap_or(AssociationType::Undefined),
            association_desc: r.u32("association desc")?,
            sequence_number: r.u32("sequence number")?,
            filename: r.string("filename")?,
            capture_date: r.string("capture date")?,
            modification_date: r.string("modification date")?,
            keywords: r.string("keywords")?,
        })
    }

    pub fn encode(&self) -> Result<bytes::Bytes> {
        let mut w = WireWriter::with_capacity(64 + self.filename.len() * 2);
        w.u32(self.storage_id);
        w.u16(self.object_format.0);
        w.u16(self.protection_status);
        w.u32(self.object_compressed_size);
        w.u16(self.thumb_format);
        w.u32(self.thumb_compressed_size);
        w.u32(self.thumb_pix_width);
        w.u32(self.thumb_pix_height);
        w.u32(self.image_pix_width);
        w.u32(self.image_pix_height);
        w.u32(self.image_bit_depth);
        w.u32(self.parent_object);
        w.u16(self.association_type as u16);
        w.u32(self.association_desc);
        w.u32(self.sequence_number);
        w.string(&self.filename)?;
        w.string(&self.capture_date)?;
        w.string(&self.modification_date)?;
        w.string(&self.keywords)?;
        Ok(w.finish())
    }

    pub fn is_association(&self) -> bool {
        self.object_format.is_association()
    }
}

impl Default for ObjectFormatCode {
    fn default() -> Self {
        ObjectFormatCode::Undefined
    }
}

impl Default for AssociationType {
    fn default() -> Self {
        AssociationType::Undefined
    }
}

/// MTP timestamp, wire format `YYYYMMDDThhmmss` with optional tenths of a
/// second and timezone suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    /// Parses a wire timestamp. Returns `None` for empty or malformed
    /// strings; devices frequently leave date fields blank.
    pub fn parse(timespec: &str) -> Option<DateTime> {
        let bytes = timespec.as_bytes();
        if bytes.len() < 15 || bytes[8] != b'T' {
            return None;
        }
        if !bytes[..8].iter().chain(&bytes[9..15]).all(u8::is_ascii_digit) {
            return None;
        }
        let digits = |range: std::ops::Range<usize>| -> u16 {
            timespec[range].parse().unwrap_or(0)
        };
        let dt = DateTime {
            year: digits(0..4),
            month: digits(4..6) as u8,
            day: digits(6..8) as u8,
            hour: digits(9..11) as u8,
            minute: digits(11..13) as u8,
            second: digits(13..15) as u8,
        };
        if dt.month == 0 || dt.month > 12 || dt.day == 0 || dt.day > 31 {
            return None;
        }
        if dt.hour > 23 || dt.minute > 59 || dt.second > 60 {
            return None;
        }
        Some(dt)
    }

    /// Encodes the wire form `YYYYMMDDThhmmss`.
    pub fn to_wire(self) -> String {
        format!(
            "{:04}{:02}{:02}T{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }

    /// Seconds since the Unix epoch, ignoring timezones. Good enough for
    /// file listings; MTP timestamps are device-local anyway.
    pub fn to_unix_timestamp(self) -> u64 {
        let days_in_month = |year: u16, month: u8| -> u64 {
            match month {
                1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
                4 | 6 | 9 | 11 => 30,
                _ => {
                    if year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) {
                        29
                    } else {
                        28
                    }
                }
            }
        };
        let mut days: u64 = 0;
        for y in 1970..self.year {
            days += if y % 4 == 0 && (y % 100 != 0 || y % 400 == 0) { 366 } else { 365 };
        }
        for m in 1..self.month {
            days += days_in_month(self.year, m);
        }
        days += u64::from(self.day.saturating_sub(1));
        days * 86_400 + u64::from(self.hour) * 3_600 + u64::from(self.minute) * 60 + u64::from(self.second)
    }
}

impl std::fmt::Display for DateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Formats a raw wire timestamp for display, inserting separators when it
/// has the canonical 15-character shape and returning it untouched otherwise.
pub fn format_timestamp(timespec: &str) -> String {
    match DateTime::parse(timespec) {
        Some(dt) => dt.to_string(),
        None => timespec.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device_info() -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u16(100); // standard version
        w.u32(0x0000_0006); // vendor extension id (MTP)
        w.u16(100);
        w.string("microsoft.com: 1.0; android.com: 1.0;").unwrap();
        w.u16(0); // functional mode
        w.array_u16(&[0x1001, 0x1002, 0x1009, 0x9805]);
        w.array_u16(&[0x4002, 0x4003]);
        w.array_u16(&[0xD402]);
        w.array_u16(&[]);
        w.array_u16(&[0x3801, 0x3001]);
        w.string("Google").unwrap();
        w.string("Pixel 8").unwrap();
        w.string("14").unwrap();
        w.string("0123456789ABCDEF").unwrap();
        w.finish().to_vec()
    }

    #[test]
    fn test_device_info_decode() {
        let info = DeviceInfo::decode(&sample_device_info()).unwrap();
        assert_eq!(info.standard_version, 100);
        assert_eq!(info.manufacturer, "Google");
        assert_eq!(info.model, "Pixel 8");
        assert!(info.supports_operation(OperationCode::GetObjectPropList));
        assert!(!info.supports_operation(OperationCode::SendObject));
        assert!(info.supports_event(EventCode::ObjectAdded));
        assert_eq!(info.image_formats, vec![ObjectFormatCode::ExifJpeg, ObjectFormatCode::Association]);
    }

    #[test]
    fn test_device_info_truncated() {
        let full = sample_device_info();
        // Chop inside the operations array; decode must error, not panic.
        assert!(DeviceInfo::decode(&full[..20]).is_err());
    }

    #[test]
    fn test_storage_info_decode() {
        let mut w = WireWriter::new();
        w.u16(0x0003); // FixedRAM
        w.u16(0x0002); // generic hierarchical
        w.u16(0x0000); // read-write
        w.u64(128_000_000_000);
        w.u64(64_000_000_000);
        w.u32(0xFFFF_FFFF);
        w.string("Internal shared storage").unwrap();
        w.string("").unwrap();
        let info = StorageInfo::decode(&w.finish()).unwrap();
        assert_eq!(info.storage_type, StorageType::FixedRAM);
        assert_eq!(info.access_capability, AccessCapability::ReadWrite);
        assert_eq!(info.max_capacity, 128_000_000_000);
        assert_eq!(info.description, "Internal shared storage");
        assert!(!info.is_read_only());
    }

    #[test]
    fn test_storage_info_unknown_type_tolerated() {
        let mut w = WireWriter::new();
        w.u16(0x8001); // vendor-specific storage type
        w.u16(0x0002);
        w.u16(0x0001); // read-only
        w.u64(1);
        w.u64(1);
        w.u32(0);
        w.string("Camera").unwrap();
        w.string("").unwrap();
        let info = StorageInfo::decode(&w.finish()).unwrap();
        assert_eq!(info.storage_type, StorageType::Undefined);
        assert!(info.is_read_only());
    }

    #[test]
    fn test_object_info_roundtrip() {
        let record = ObjectInfoRecord {
            storage_id: 0x0001_0001,
            object_format: ObjectFormatCode::ExifJpeg,
            object_compressed_size: 1_048_576,
            parent_object: 0x42,
            filename: "IMG_0001.jpg".into(),
            capture_date: "20240117T093015".into(),
            modification_date: "20240117T093015".into(),
            ..Default::default()
        };
        let encoded = record.encode().unwrap();
        let decoded = ObjectInfoRecord::decode(&encoded).unwrap();
        assert_eq!(decoded.filename, "IMG_0001.jpg");
        assert_eq!(decoded.object_format, ObjectFormatCode::ExifJpeg);
        assert_eq!(decoded.object_compressed_size, 1_048_576);
        assert_eq!(decoded.parent_object, 0x42);
        assert_eq!(decoded.modification_date, "20240117T093015");
        assert!(!decoded.is_association());
    }

    #[test]
    fn test_datetime_parse() {
        let dt = DateTime::parse("20240117T093015").unwrap();
        assert_eq!((dt.year, dt.month, dt.day), (2024, 1, 17));
        assert_eq!((dt.hour, dt.minute, dt.second), (9, 30, 15));
        // Suffixes (tenths, timezone) are accepted and ignored.
        assert!(DateTime::parse("20240117T093015.0").is_some());
        assert!(DateTime::parse("20240117T093015+0100").is_some());
    }

    #[test]
    fn test_datetime_rejects_malformed() {
        assert!(DateTime::parse("").is_none());
        assert!(DateTime::parse("2024-01-17").is_none());
        assert!(DateTime::parse("20240117 093015").is_none());
        assert!(DateTime::parse("20241317T093015").is_none()); // month 13
        assert!(DateTime::parse("20240117T253015").is_none()); // hour 25
    }

    #[test]
    fn test_datetime_display_and_wire() {
        let dt = DateTime::parse("20240117T093015").unwrap();
        assert_eq!(dt.to_string(), "2024-01-17 09:30:15");
        assert_eq!(dt.to_wire(), "20240117T093015");
    }

    #[test]
    fn test_format_timestamp_passthrough() {
        assert_eq!(format_timestamp("20240117T093015"), "2024-01-17 09:30:15");
        assert_eq!(format_timestamp("not a date"), "not a date");
        assert_eq!(format_timestamp(""), "");
    }

    #[test]
    fn test_unix_timestamp() {
        // 1970-01-01T00:00:00
        let epoch = DateTime::parse("19700101T000000").unwrap();
        assert_eq!(epoch.to_unix_timestamp(), 0);
        // 2024-01-01T00:00:00 UTC = 1704067200
        let y2024 = DateTime::parse("20240101T000000").unwrap();
        assert_eq!(y2024.to_unix_timestamp(), 1_704_067_200);
    }
}
