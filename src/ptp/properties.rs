//! Object property values and the `GetObjectPropList` reply parser.
//!
//! The property-list reply is the bulk path for directory listings: one
//! transaction carries `(object, property, value)` triples for a whole
//! directory instead of one round-trip per object. Devices get this subtly
//! wrong in several known ways, so the parser tolerates duplicates (last
//! value wins) and, in lenient mode, property codes that were never asked
//! for.

use log::warn;

use super::ObjectHandle;
use super::codes::{DataTypeCode, ObjectPropertyCode};
use super::wire::WireReader;
use crate::error::{Error, Result};
use num_traits::FromPrimitive;

/// A decoded object property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Int(i64),
    Uint(u64),
    Int128(i128),
    Uint128(u128),
    String(String),
    /// `ArrayUint8` / `ArrayInt8` payloads, kept raw.
    Bytes(Vec<u8>),
    IntArray(Vec<i64>),
    UintArray(Vec<u64>),
}

impl PropertyValue {
    /// Decodes one value of the given wire type.
    pub fn decode(r: &mut WireReader<'_>, data_type: DataTypeCode) -> Result<PropertyValue> {
        use DataTypeCode as D;
        Ok(match data_type {
            D::Int8 => PropertyValue::Int(r.u8("Int8 value")? as i8 as i64),
            D::Uint8 => PropertyValue::Uint(u64::from(r.u8("Uint8 value")?)),
            D::Int16 => PropertyValue::Int(r.u16("Int16 value")? as i16 as i64),
            D::Uint16 => PropertyValue::Uint(u64::from(r.u16("Uint16 value")?)),
            D::Int32 => PropertyValue::Int(r.u32("Int32 value")? as i32 as i64),
            D::Uint32 => PropertyValue::Uint(u64::from(r.u32("Uint32 value")?)),
            D::Int64 => PropertyValue::Int(r.u64("Int64 value")? as i64),
            D::Uint64 => PropertyValue::Uint(r.u64("Uint64 value")?),
            D::Int128 => PropertyValue::Int128(r.u128("Int128 value")? as i128),
            D::Uint128 => PropertyValue::Uint128(r.u128("Uint128 value")?),
            D::String => PropertyValue::String(r.string("string value")?),
            D::ArrayUint8 | D::ArrayInt8 => PropertyValue::Bytes(r.byte_array("byte array value")?),
            D::ArrayInt16 => PropertyValue::IntArray(read_array(r, 2, |r| Ok(r.u16("Int16 element")? as i16 as i64))?),
            D::ArrayUint16 => {
                PropertyValue::UintArray(read_array(r, 2, |r| Ok(u64::from(r.u16("Uint16 element")?)))?)
            }
            D::ArrayInt32 => PropertyValue::IntArray(read_array(r, 4, |r| Ok(r.u32("Int32 element")? as i32 as i64))?),
            D::ArrayUint32 => {
                PropertyValue::UintArray(read_array(r, 4, |r| Ok(u64::from(r.u32("Uint32 element")?)))?)
            }
            D::ArrayInt64 => PropertyValue::IntArray(read_array(r, 8, |r| Ok(r.u64("Int64 element")? as i64))?),
            D::ArrayUint64 => PropertyValue::UintArray(read_array(r, 8, |r| r.u64("Uint64 element"))?),
            D::ArrayInt128 | D::ArrayUint128 => {
                // Nothing meaningful to hold these in; skip the payload.
                let count = r.u32("Int128 array count")? as usize;
                r.skip(count * 16, "Int128 array elements")?;
                PropertyValue::Bytes(Vec::new())
            }
            D::Undefined => {
                return Err(Error::invalid_data("property value with Undefined data type"));
            }
        })
    }

    /// Skips one value of the given wire type without materializing it.
    pub fn skip(r: &mut WireReader<'_>, data_type: DataTypeCode) -> Result<()> {
        use DataTypeCode as D;
        match data_type {
            D::Int8 | D::Uint8 => r.skip(1, "scalar value"),
            D::Int16 | D::Uint16 => r.skip(2, "scalar value"),
            D::Int32 | D::Uint32 => r.skip(4, "scalar value"),
            D::Int64 | D::Uint64 => r.skip(8, "scalar value"),
            D::Int128 | D::Uint128 => r.skip(16, "scalar value"),
            D::String => r.string("string value").map(drop),
            D::ArrayInt8 | D::ArrayUint8 => {
                let len = r.u32("array length")? as usize;
                r.skip(len, "array payload")
            }
            D::ArrayInt16 | D::ArrayUint16 => skip_array(r, 2),
            D::ArrayInt32 | D::ArrayUint32 => skip_array(r, 4),
            D::ArrayInt64 | D::ArrayUint64 => skip_array(r, 8),
            D::ArrayInt128 | D::ArrayUint128 => skip_array(r, 16),
            D::Undefined => Err(Error::invalid_data("property value with Undefined data type")),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PropertyValue::Uint(v) => Some(*v),
            PropertyValue::Int(v) => u64::try_from(*v).ok(),
            PropertyValue::Uint128(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_u64().and_then(|v| u32::try_from(v).ok())
    }
}

fn read_array<T>(
    r: &mut WireReader<'_>,
    elem_size: usize,
    mut read: impl FnMut(&mut WireReader<'_>) -> Result<T>,
) -> Result<Vec<T>> {
    let count = r.u32("array count")? as usize;
    if r.remaining() < count * elem_size {
        return Err(Error::invalid_data(format!(
            "array claims {count} elements but only {} bytes remain",
            r.remaining()
        )));
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(read(r)?);
    }
    Ok(out)
}

fn skip_array(r: &mut WireReader<'_>, elem_size: usize) -> Result<()> {
    let count = r.u32("array count")? as usize;
    r.skip(count * elem_size, "array elements")
}

/// Counters for the known ways devices deviate from the MTP standard in
/// property list replies. Quirks are logged and tallied, never silently
/// dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct PropListQuirks {
    /// Entries whose property code differed from the single requested one.
    pub mismatched_property_codes: u64,
    /// Entries repeating an (object, property) pair; the later value won.
    pub duplicate_entries: u64,
}

impl PropListQuirks {
    pub fn total(&self) -> u64 {
        self.mismatched_property_codes + self.duplicate_entries
    }
}

/// One `(object, property, value)` triple from a property-list reply.
#[derive(Debug, Clone)]
pub struct PropListEntry {
    pub handle: ObjectHandle,
    pub property: ObjectPropertyCode,
    pub value: PropertyValue,
}

/// Parses a `GetObjectPropList` reply, invoking `visit` per decoded triple.
///
/// `requested` is the property the host asked for; when it is
/// [`ObjectPropertyCode::All`] every code is accepted. Otherwise a
/// mismatched code is a device quirk: in lenient mode it is logged, counted
/// in `quirks`, and still delivered (the object itself is real even if the
/// label is wrong); in strict mode it fails the parse.
pub fn parse_prop_list(
    payload: &[u8],
    requested: ObjectPropertyCode,
    strict: bool,
    quirks: &mut PropListQuirks,
    mut visit: impl FnMut(PropListEntry),
) -> Result<()> {
    let mut r = WireReader::new(payload);
    let count = r.u32("property list count")?;
    for index in 0..count {
        let handle = ObjectHandle(r.u32("property list object id")?);
        let property = ObjectPropertyCode(r.u16("property list property code")?);
        let raw_type = r.u16("property list data type")?;
        let data_type = DataTypeCode::from_u16(raw_type).ok_or_else(|| {
            Error::invalid_data(format!(
                "property list entry {index}: unknown data type {raw_type:#06x}"
            ))
        })?;
        let value = PropertyValue::decode(&mut r, data_type)?;

        if requested != ObjectPropertyCode::All && property != requested {
            if strict {
                return Err(Error::invalid_data(format!(
                    "device returned property {property:?} while {requested:?} was requested"
                )));
            }
            warn!(
                "property list quirk: got {property:?} for object {} while querying {requested:?}",
                handle.0
            );
            quirks.mismatched_property_codes += 1;
        }

        visit(PropListEntry { handle, property, value });
    }
    if !r.is_empty() {
        warn!("property list reply has {} trailing bytes", r.remaining());
    }
    Ok(())
}

/// Collects a single-property reply into `(handle, value)` pairs, resolving
/// duplicates in favor of the last occurrence.
pub fn collect_prop_values(
    payload: &[u8],
    requested: ObjectPropertyCode,
    strict: bool,
    quirks: &mut PropListQuirks,
) -> Result<Vec<(ObjectHandle, PropertyValue)>> {
    let mut order: Vec<ObjectHandle> = Vec::new();
    let mut values: std::collections::HashMap<ObjectHandle, PropertyValue> = std::collections::HashMap::new();
    let mut duplicates = 0u64;
    parse_prop_list(payload, requested, strict, quirks, |entry| {
        if values.insert(entry.handle, entry.value).is_some() {
            duplicates += 1;
        } else {
            order.push(entry.handle);
        }
    })?;
    if duplicates > 0 {
        warn!("property list reply repeated {duplicates} (object, property) entries; kept the last value");
        quirks.duplicate_entries += duplicates;
    }
    let mut out = Vec::with_capacity(order.len());
    for handle in order {
        if let Some(value) = values.remove(&handle) {
            out.push((handle, value));
        }
    }
    Ok(out)
}
