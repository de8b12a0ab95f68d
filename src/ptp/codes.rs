//! PTP/MTP wire code registries.
//!
//! Operation, response, event, object-format, and property codes are open
//! sets: devices routinely report vendor extensions the host has never heard
//! of, and response codes must be preserved verbatim even when unknown. They
//! are therefore `u16` newtypes with named constants rather than closed
//! enums. Closed tag sets that gate decoding (container type, data type)
//! are real enums.

use std::fmt;

use num_derive::FromPrimitive;

macro_rules! wire_code {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$cmeta:meta])* $code:ident = $value:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(pub u16);

        #[allow(non_upper_case_globals)]
        impl $name {
            $($(#[$cmeta])* pub const $code: $name = $name($value);)+

            /// Returns the name of the code if it is a known standard code.
            pub fn name(self) -> Option<&'static str> {
                match self {
                    $(Self::$code => Some(stringify!($code)),)+
                    _ => None,
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.name() {
                    Some(name) => f.write_str(name),
                    None => write!(f, concat!(stringify!($name), "({:#06x})"), self.0),
                }
            }
        }

        impl From<$name> for u16 {
            fn from(code: $name) -> u16 {
                code.0
            }
        }

        impl From<u16> for $name {
            fn from(raw: u16) -> $name {
                $name(raw)
            }
        }
    };
}

wire_code! {
    /// PTP/MTP operation codes (PIMA 15740 plus the MTP 0x98xx extensions).
    OperationCode {
        GetDeviceInfo = 0x1001,
        OpenSession = 0x1002,
        CloseSession = 0x1003,
        GetStorageIDs = 0x1004,
        GetStorageInfo = 0x1005,
        GetNumObjects = 0x1006,
        GetObjectHandles = 0x1007,
        GetObjectInfo = 0x1008,
        GetObject = 0x1009,
        GetThumb = 0x100A,
        DeleteObject = 0x100B,
        SendObjectInfo = 0x100C,
        SendObject = 0x100D,
        FormatStore = 0x100F,
        ResetDevice = 0x1010,
        GetDevicePropDesc = 0x1014,
        GetDevicePropValue = 0x1015,
        SetDevicePropValue = 0x1016,
        MoveObject = 0x1019,
        CopyObject = 0x101A,
        GetPartialObject = 0x101B,
        GetObjectPropsSupported = 0x9801,
        GetObjectPropDesc = 0x9802,
        GetObjectPropValue = 0x9803,
        SetObjectPropValue = 0x9804,
        GetObjectPropList = 0x9805,
        GetObjectReferences = 0x9810,
        SetObjectReferences = 0x9811,
    }
}

wire_code! {
    /// PTP/MTP response codes. Exact wire values are load-bearing: callers
    /// match on them to distinguish full storage from read-only storage from
    /// missing objects.
    ResponseCode {
        Ok = 0x2001,
        GeneralError = 0x2002,
        SessionNotOpen = 0x2003,
        InvalidTransactionId = 0x2004,
        OperationNotSupported = 0x2005,
        ParameterNotSupported = 0x2006,
        IncompleteTransfer = 0x2007,
        InvalidStorageId = 0x2008,
        InvalidObjectHandle = 0x2009,
        DevicePropNotSupported = 0x200A,
        InvalidObjectFormatCode = 0x200B,
        StoreFull = 0x200C,
        ObjectWriteProtected = 0x200D,
        StoreReadOnly = 0x200E,
        AccessDenied = 0x200F,
        NoThumbnailPresent = 0x2010,
        StoreNotAvailable = 0x2013,
        SpecificationByFormatUnsupported = 0x2014,
        NoValidObjectInfo = 0x2015,
        DeviceBusy = 0x2019,
        InvalidParentObject = 0x201A,
        InvalidParameter = 0x201D,
        SessionAlreadyOpen = 0x201E,
        TransactionCancelled = 0x201F,
        InvalidObjectPropCode = 0xA801,
        InvalidObjectPropFormat = 0xA802,
        ObjectTooLarge = 0xA809,
    }
}

wire_code! {
    /// Device-initiated event codes, delivered over the interrupt endpoint.
    EventCode {
        CancelTransaction = 0x4001,
        ObjectAdded = 0x4002,
        ObjectRemoved = 0x4003,
        StoreAdded = 0x4004,
        StoreRemoved = 0x4005,
        DevicePropChanged = 0x4006,
        ObjectInfoChanged = 0x4007,
        DeviceInfoChanged = 0x4008,
        RequestObjectTransfer = 0x4009,
        StoreFull = 0x400A,
        DeviceReset = 0x400B,
        StorageInfoChanged = 0x400C,
        CaptureComplete = 0x400D,
        ObjectPropChanged = 0xC801,
    }
}

wire_code! {
    /// Object format codes. `Association` marks directories.
    ObjectFormatCode {
        Undefined = 0x3000,
        Association = 0x3001,
        Text = 0x3004,
        Html = 0x3005,
        Wav = 0x3008,
        Mp3 = 0x3009,
        Avi = 0x300A,
        Mpeg = 0x300B,
        Asf = 0x300C,
        ExifJpeg = 0x3801,
        Bmp = 0x3804,
        Gif = 0x3807,
        Jfif = 0x3808,
        Png = 0x380B,
        Tiff = 0x380D,
        Wma = 0xB901,
        Ogg = 0xB902,
        Aac = 0xB903,
        Flac = 0xB906,
        Wmv = 0xB981,
        Mp4 = 0xB982,
        Mp2 = 0xB983,
        ThreeGp = 0xB984,
        AbstractAudioVideoPlaylist = 0xBA05,
        Xml = 0xBA82,
    }
}

wire_code! {
    /// Object property codes used with the 0x98xx property operations.
    ObjectPropertyCode {
        StorageId = 0xDC01,
        ObjectFormat = 0xDC02,
        ProtectionStatus = 0xDC03,
        ObjectSize = 0xDC04,
        ObjectFilename = 0xDC07,
        DateCreated = 0xDC08,
        DateModified = 0xDC09,
        ParentObject = 0xDC0B,
        PersistentUniqueObjectId = 0xDC41,
        Name = 0xDC44,
        DateAdded = 0xDC4E,
        All = 0xFFFF,
    }
}

wire_code! {
    /// Device property codes.
    DevicePropertyCode {
        BatteryLevel = 0x5001,
        ImageSize = 0x5003,
        DateTime = 0x5011,
        SynchronizationPartner = 0xD401,
        DeviceFriendlyName = 0xD402,
        SessionInitiatorVersionInfo = 0xD406,
        PerceivedDeviceType = 0xD407,
    }
}

impl ObjectPropertyCode {
    /// The `All` placeholder widens to 0xFFFFFFFF when packed as a command
    /// parameter; every other code is zero-extended.
    pub(crate) fn as_param(self) -> u32 {
        if self == ObjectPropertyCode::All {
            0xFFFF_FFFF
        } else {
            u32::from(self.0)
        }
    }
}

impl ObjectFormatCode {
    /// Infers an object format from a filename extension.
    ///
    /// This is a small built-in table covering the formats Android devices
    /// care about; anything else uploads as `Undefined`, which devices accept.
    pub fn from_filename(filename: &str) -> ObjectFormatCode {
        let ext = match filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
            _ => return ObjectFormatCode::Undefined,
        };
        match ext.as_str() {
            "jpg" | "jpeg" => ObjectFormatCode::ExifJpeg,
            "png" => ObjectFormatCode::Png,
            "gif" => ObjectFormatCode::Gif,
            "bmp" => ObjectFormatCode::Bmp,
            "tif" | "tiff" => ObjectFormatCode::Tiff,
            "wav" => ObjectFormatCode::Wav,
            "mp3" => ObjectFormatCode::Mp3,
            "wma" => ObjectFormatCode::Wma,
            "ogg" | "oga" => ObjectFormatCode::Ogg,
            "aac" | "m4a" => ObjectFormatCode::Aac,
            "flac" => ObjectFormatCode::Flac,
            "avi" => ObjectFormatCode::Avi,
            "mpg" | "mpeg" => ObjectFormatCode::Mpeg,
            "asf" => ObjectFormatCode::Asf,
            "wmv" => ObjectFormatCode::Wmv,
            "mp4" | "m4v" => ObjectFormatCode::Mp4,
            "3gp" | "3gpp" => ObjectFormatCode::ThreeGp,
            "txt" | "log" => ObjectFormatCode::Text,
            "htm" | "html" => ObjectFormatCode::Html,
            "xml" => ObjectFormatCode::Xml,
            _ => ObjectFormatCode::Undefined,
        }
    }

    /// Returns true for the directory format.
    pub fn is_association(self) -> bool {
        self == ObjectFormatCode::Association
    }
}

/// Container kinds from the 12-byte container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
pub enum ContainerType {
    Command = 1,
    Data = 2,
    Response = 3,
    Event = 4,
}

/// Data type tags used in property descriptors and property lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
pub enum DataTypeCode {
    Undefined = 0x0000,
    Int8 = 0x0001,
    Uint8 = 0x0002,
    Int16 = 0x0003,
    Uint16 = 0x0004,
    Int32 = 0x0005,
    Uint32 = 0x0006,
    Int64 = 0x0007,
    Uint64 = 0x0008,
    Int128 = 0x0009,
    Uint128 = 0x000A,
    ArrayInt8 = 0x4001,
    ArrayUint8 = 0x4002,
    ArrayInt16 = 0x4003,
    ArrayUint16 = 0x4004,
    ArrayInt32 = 0x4005,
    ArrayUint32 = 0x4006,
    ArrayInt64 = 0x4007,
    ArrayUint64 = 0x4008,
    ArrayInt128 = 0x4009,
    ArrayUint128 = 0x400A,
    String = 0xFFFF,
}

/// Storage hardware kinds reported by `GetStorageInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum StorageType {
    Undefined = 0x0000,
    FixedROM = 0x0001,
    RemovableROM = 0x0002,
    FixedRAM = 0x0003,
    RemovableRAM = 0x0004,
}

/// Storage access rights reported by `GetStorageInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum AccessCapability {
    ReadWrite = 0x0000,
    ReadOnly = 0x0001,
    ReadOnlyWithDeletion = 0x0002,
}

/// Association subtype carried by directory objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
pub enum AssociationType {
    Undefined = 0x0000,
    GenericFolder = 0x0001,
    Album = 0x0002,
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn test_known_code_debug_name() {
        assert_eq!(format!("{:?}", OperationCode::OpenSession), "OpenSession");
        assert_eq!(format!("{:?}", ResponseCode::Ok), "Ok");
        assert_eq!(format!("{:?}", ObjectFormatCode::Association), "Association");
    }

    #[test]
    fn test_unknown_code_debug_raw() {
        assert_eq!(format!("{:?}", OperationCode(0x9999)), "OperationCode(0x9999)");
        assert_eq!(format!("{:?}", ResponseCode(0xA807)), "ResponseCode(0xa807)");
    }

    #[test]
    fn test_reserved_wire_values() {
        // These exact values are on the wire; regressions here corrupt traffic.
        assert_eq!(OperationCode::OpenSession.0, 0x1002);
        assert_eq!(OperationCode::GetObject.0, 0x1009);
        assert_eq!(OperationCode::SendObjectInfo.0, 0x100C);
        assert_eq!(OperationCode::SendObject.0, 0x100D);
        assert_eq!(ResponseCode::Ok.0, 0x2001);
        assert_eq!(ResponseCode::InvalidParentObject.0, 0x201A);
    }

    #[test]
    fn test_container_type_from_wire() {
        assert_eq!(ContainerType::from_u16(1), Some(ContainerType::Command));
        assert_eq!(ContainerType::from_u16(4), Some(ContainerType::Event));
        assert_eq!(ContainerType::from_u16(0), None);
        assert_eq!(ContainerType::from_u16(5), None);
    }

    #[test]
    fn test_format_from_filename() {
        assert_eq!(ObjectFormatCode::from_filename("IMG_0001.JPG"), ObjectFormatCode::ExifJpeg);
        assert_eq!(ObjectFormatCode::from_filename("clip.mp4"), ObjectFormatCode::Mp4);
        assert_eq!(ObjectFormatCode::from_filename("notes.txt"), ObjectFormatCode::Text);
        assert_eq!(ObjectFormatCode::from_filename("README"), ObjectFormatCode::Undefined);
        // A leading dot is a hidden file, not an extension.
        assert_eq!(ObjectFormatCode::from_filename(".hidden"), ObjectFormatCode::Undefined);
    }

    #[test]
    fn test_property_all_widens_as_param() {
        assert_eq!(ObjectPropertyCode::All.as_param(), 0xFFFF_FFFF);
        assert_eq!(ObjectPropertyCode::ObjectFilename.as_param(), 0xDC07);
    }

    #[test]
    fn test_storage_type_names() {
        // The Debug names are part of the public surface: callers render them
        // directly in storage listings.
        assert_eq!(format!("{:?}", StorageType::FixedRAM), "FixedRAM");
        assert_eq!(format!("{:?}", StorageType::RemovableROM), "RemovableROM");
    }
}
