//! Storage-scoped object operations: listing, transfer, mutation, and
//! virtual path resolution.
//!
//! MTP exposes a flat handle space; the hierarchy exists only through each
//! object's parent link. [`Storage::resolve`] turns `/`-separated virtual
//! paths into handles by walking listings, and the recursive transfer
//! helpers mirror a directory tree between the device and the local
//! filesystem.

use std::io;
use std::path::Path;

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;

use crate::device::MtpDevice;
use crate::error::{Error, Result};
use crate::ptp::properties::PropListEntry;
use crate::ptp::{
    AssociationType, DateTime, ObjectFormatCode, ObjectHandle, ObjectInfoRecord, ObjectPropertyCode, OperationCode,
    PropertyValue, StorageId, StorageInfo,
};
use crate::session::{DataInStart, DataPhaseIn, Engine};
use crate::stream::{BoxedByteStream, CancellationToken, ProgressFn};
use crate::transport::{MtpTransport, UsbTransport};

/// Compressed-size marker for objects of 4 GiB or more; the real size then
/// comes from the `ObjectSize` property.
const SIZE_OVERFLOW_MARKER: u32 = 0xFFFF_FFFF;

/// A file or directory on the device.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ObjectInfo {
    pub handle: ObjectHandle,
    pub storage_id: StorageId,
    pub filename: String,
    pub format: ObjectFormatCode,
    /// Size in bytes; zero for directories.
    pub size: u64,
    /// Parent directory, [`ObjectHandle::ROOT`] for top-level objects.
    pub parent: ObjectHandle,
    pub protection_status: u16,
    pub created: Option<DateTime>,
    pub modified: Option<DateTime>,
}

impl ObjectInfo {
    fn from_record(handle: ObjectHandle, record: ObjectInfoRecord, fallback_storage: StorageId) -> ObjectInfo {
        let storage_id = if record.storage_id == 0 {
            fallback_storage
        } else {
            StorageId(record.storage_id)
        };
        ObjectInfo {
            handle,
            storage_id,
            filename: record.filename,
            format: record.object_format,
            size: u64::from(record.object_compressed_size),
            parent: fold_parent(ObjectHandle(record.parent_object)),
            protection_status: record.protection_status,
            created: DateTime::parse(&record.capture_date),
            modified: DateTime::parse(&record.modification_date),
        }
    }

    /// True when the object is a directory (an `Association`).
    pub fn is_directory(&self) -> bool {
        self.format.is_association()
    }
}

/// Devices report `Device` (0) as the parent of top-level objects; the path
/// layer treats the storage root as the parent in that case.
fn fold_parent(parent: ObjectHandle) -> ObjectHandle {
    if parent == ObjectHandle::DEVICE {
        ObjectHandle::ROOT
    } else {
        parent
    }
}

/// Metadata for an object about to be uploaded.
#[derive(Debug, Clone)]
pub struct NewObjectInfo {
    pub filename: String,
    pub size: u64,
    pub format: ObjectFormatCode,
    pub modified: Option<DateTime>,
}

impl NewObjectInfo {
    /// Describes a file, inferring the object format from the filename
    /// extension.
    pub fn file(filename: &str, size: u64) -> NewObjectInfo {
        NewObjectInfo {
            filename: filename.to_string(),
            size,
            format: ObjectFormatCode::from_filename(filename),
            modified: None,
        }
    }

    /// Describes a directory.
    pub fn folder(name: &str) -> NewObjectInfo {
        NewObjectInfo {
            filename: name.to_string(),
            size: 0,
            format: ObjectFormatCode::Association,
            modified: None,
        }
    }

    pub fn with_format(mut self, format: ObjectFormatCode) -> Self {
        self.format = format;
        self
    }

    pub fn with_modified(mut self, modified: DateTime) -> Self {
        self.modified = Some(modified);
        self
    }

    fn to_record(&self) -> ObjectInfoRecord {
        ObjectInfoRecord {
            // Storage and parent travel as SendObjectInfo parameters.
            storage_id: 0,
            object_format: self.format,
            object_compressed_size: u32::try_from(self.size).unwrap_or(SIZE_OVERFLOW_MARKER),
            association_type: if self.format.is_association() {
                AssociationType::GenericFolder
            } else {
                AssociationType::Undefined
            },
            filename: self.filename.clone(),
            modification_date: self.modified.map(DateTime::to_wire).unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Statistics gathered by [`Storage::scan`] ahead of a recursive transfer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ScanResult {
    pub file_count: usize,
    pub dir_count: usize,
    pub total_bytes: u64,
}

/// One storage of an open device.
pub struct Storage<'d, T: MtpTransport = UsbTransport> {
    device: &'d MtpDevice<T>,
    id: StorageId,
    info: StorageInfo,
}

impl<'d, T: MtpTransport> std::fmt::Debug for Storage<'d, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("id", &self.id).field("info", &self.info).finish()
    }
}

impl<'d, T: MtpTransport> Storage<'d, T> {
    pub(crate) fn new(device: &'d MtpDevice<T>, id: StorageId, info: StorageInfo) -> Self {
        Storage { device, id, info }
    }

    pub fn id(&self) -> StorageId {
        self.id
    }

    pub fn info(&self) -> &StorageInfo {
        &self.info
    }

    fn supports(&self, operation: OperationCode) -> bool {
        self.device.device_info().supports_operation(operation)
    }

    // ------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------

    /// Raw child handles of `parent` (`None` for the storage root).
    pub async fn object_handles(&self, parent: Option<ObjectHandle>) -> Result<Vec<ObjectHandle>> {
        let parent = parent.unwrap_or(ObjectHandle::ROOT);
        let mut engine = self.device.lock_engine().await;
        engine.get_object_handles(self.id, None, parent).await
    }

    /// Lists the children of `parent` with their metadata.
    ///
    /// Uses one `GetObjectPropList` transaction when the device supports it,
    /// falling back to a `GetObjectInfo` round-trip per child otherwise.
    /// Objects whose individual queries fail are logged and skipped; only
    /// session-fatal errors abort the listing.
    pub async fn list_objects(&self, parent: Option<ObjectHandle>) -> Result<Vec<ObjectInfo>> {
        let parent = parent.unwrap_or(ObjectHandle::ROOT);
        let mut engine = self.device.lock_engine().await;

        if self.supports(OperationCode::GetObjectPropList) {
            match self.list_via_prop_list(&mut engine, parent).await {
                Ok(objects) => return Ok(objects),
                Err(err) if !err.is_fatal() => {
                    warn!("property-list listing of {parent:?} failed ({err}); falling back to per-object queries");
                }
                Err(err) => return Err(err),
            }
        }
        self.list_via_object_info(&mut engine, parent).await
    }

    async fn list_via_prop_list(&self, engine: &mut Engine<T>, parent: ObjectHandle) -> Result<Vec<ObjectInfo>> {
        let entries = engine
            .get_object_prop_list(parent, None, ObjectPropertyCode::All, 1)
            .await?;

        #[derive(Default)]
        struct Partial {
            filename: Option<String>,
            format: Option<u16>,
            size: Option<u64>,
            parent: Option<u32>,
            storage: Option<u32>,
            protection: Option<u16>,
            created: Option<DateTime>,
            modified: Option<DateTime>,
        }

        let mut order: Vec<ObjectHandle> = Vec::new();
        let mut partials: std::collections::HashMap<ObjectHandle, Partial> = std::collections::HashMap::new();
        for PropListEntry { handle, property, value } in entries {
            if handle == parent {
                // Some firmwares include the queried directory itself.
                continue;
            }
            let partial = partials.entry(handle).or_insert_with(|| {
                order.push(handle);
                Partial::default()
            });
            match property {
                ObjectPropertyCode::ObjectFilename => partial.filename = value.as_str().map(str::to_owned),
                ObjectPropertyCode::ObjectFormat => partial.format = value.as_u32().map(|v| v as u16),
                ObjectPropertyCode::ObjectSize => partial.size = value.as_u64(),
                ObjectPropertyCode::ParentObject => partial.parent = value.as_u32(),
                ObjectPropertyCode::StorageId => partial.storage = value.as_u32(),
                ObjectPropertyCode::ProtectionStatus => partial.protection = value.as_u32().map(|v| v as u16),
                ObjectPropertyCode::DateCreated => {
                    partial.created = value.as_str().and_then(DateTime::parse);
                }
                ObjectPropertyCode::DateModified => {
                    partial.modified = value.as_str().and_then(DateTime::parse);
                }
                _ => {}
            }
        }

        let mut objects = Vec::with_capacity(order.len());
        for handle in order {
            let Some(partial) = partials.remove(&handle) else {
                continue;
            };
            match (partial.filename, partial.format) {
                (Some(filename), Some(format)) => objects.push(ObjectInfo {
                    handle,
                    storage_id: partial.storage.map_or(self.id, StorageId),
                    filename,
                    format: ObjectFormatCode(format),
                    size: partial.size.unwrap_or(0),
                    parent: fold_parent(partial.parent.map_or(parent, ObjectHandle)),
                    protection_status: partial.protection.unwrap_or(0),
                    created: partial.created,
                    modified: partial.modified,
                }),
                // The bulk reply did not carry enough to describe this
                // object; one GetObjectInfo round-trip fills the gap.
                _ => match engine.get_object_info(handle).await {
                    Ok(record) => objects.push(ObjectInfo::from_record(handle, record, self.id)),
                    Err(err) if !err.is_fatal() => {
                        warn!("GetObjectInfo for {handle:?} failed: {err}");
                    }
                    Err(err) => return Err(err),
                },
            }
        }
        Ok(objects)
    }

    async fn list_via_object_info(&self, engine: &mut Engine<T>, parent: ObjectHandle) -> Result<Vec<ObjectInfo>> {
        let handles = engine.get_object_handles(self.id, None, parent).await?;
        let mut objects = Vec::with_capacity(handles.len());
        for handle in handles {
            match engine.get_object_info(handle).await {
                Ok(record) => objects.push(ObjectInfo::from_record(handle, record, self.id)),
                Err(err) if !err.is_fatal() => {
                    warn!("GetObjectInfo for {handle:?} failed: {err}");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(objects)
    }

    /// Metadata for one object.
    pub async fn get_object_info(&self, handle: ObjectHandle) -> Result<ObjectInfo> {
        let mut engine = self.device.lock_engine().await;
        let record = engine.get_object_info(handle).await?;
        let mut info = ObjectInfo::from_record(handle, record, self.id);
        if info.size == u64::from(SIZE_OVERFLOW_MARKER) && self.supports(OperationCode::GetObjectPropValue) {
            // Objects of 4 GiB and larger overflow the 32-bit size field.
            info.size = engine
                .get_object_integer_property(handle, ObjectPropertyCode::ObjectSize)
                .await?;
        }
        Ok(info)
    }

    /// The object's filename, via the cheap property query when available.
    pub async fn filename(&self, handle: ObjectHandle) -> Result<String> {
        let mut engine = self.device.lock_engine().await;
        self.filename_locked(&mut engine, handle).await
    }

    async fn filename_locked(&self, engine: &mut Engine<T>, handle: ObjectHandle) -> Result<String> {
        if self.supports(OperationCode::GetObjectPropValue) {
            engine
                .get_object_string_property(handle, ObjectPropertyCode::ObjectFilename)
                .await
        } else {
            Ok(engine.get_object_info(handle).await?.filename)
        }
    }

    // ------------------------------------------------------------------
    // Path resolution
    // ------------------------------------------------------------------

    /// Resolves an absolute virtual path to an object handle.
    pub async fn resolve(&self, path: &str) -> Result<ObjectHandle> {
        self.resolve_from(ObjectHandle::ROOT, path).await
    }

    /// Resolves `path` starting at `base` (used for relative paths).
    ///
    /// Empty components and `.` are no-ops, `..` moves to the parent
    /// (saturating at the root), and every other component is matched
    /// case-sensitively against the children of the current directory. A
    /// missing component fails with [`Error::PathNotFound`] naming it.
    pub async fn resolve_from(&self, base: ObjectHandle, path: &str) -> Result<ObjectHandle> {
        let mut engine = self.device.lock_engine().await;
        let mut current = if path.starts_with('/') { ObjectHandle::ROOT } else { base };
        for component in path.split('/') {
            if component.is_empty() || component == "." {
                continue;
            }
            if component == ".." {
                current = self.parent_locked(&mut engine, current).await?;
                continue;
            }
            current = self
                .child_by_name_locked(&mut engine, current, component)
                .await?
                .ok_or_else(|| Error::PathNotFound {
                    component: component.to_string(),
                })?;
        }
        Ok(current)
    }

    /// Parent of `handle`, with the device sentinel folded to the root.
    pub async fn object_parent(&self, handle: ObjectHandle) -> Result<ObjectHandle> {
        let mut engine = self.device.lock_engine().await;
        self.parent_locked(&mut engine, handle).await
    }

    async fn parent_locked(&self, engine: &mut Engine<T>, handle: ObjectHandle) -> Result<ObjectHandle> {
        if handle == ObjectHandle::ROOT || handle == ObjectHandle::DEVICE {
            return Ok(ObjectHandle::ROOT);
        }
        let parent = if self.supports(OperationCode::GetObjectPropValue) {
            match engine
                .get_object_integer_property(handle, ObjectPropertyCode::ParentObject)
                .await
            {
                Ok(raw) => ObjectHandle(raw as u32),
                Err(err) if !err.is_fatal() => {
                    debug!("ParentObject property for {handle:?} failed ({err}); using GetObjectInfo");
                    ObjectHandle(engine.get_object_info(handle).await?.parent_object)
                }
                Err(err) => return Err(err),
            }
        } else {
            ObjectHandle(engine.get_object_info(handle).await?.parent_object)
        };
        Ok(fold_parent(parent))
    }

    async fn child_by_name_locked(
        &self,
        engine: &mut Engine<T>,
        parent: ObjectHandle,
        name: &str,
    ) -> Result<Option<ObjectHandle>> {
        if self.supports(OperationCode::GetObjectPropList) {
            match engine
                .get_object_prop_values(parent, None, ObjectPropertyCode::ObjectFilename, 1)
                .await
            {
                Ok(pairs) => {
                    return Ok(pairs
                        .into_iter()
                        .find(|(_, value)| value.as_str() == Some(name))
                        .map(|(handle, _)| handle));
                }
                Err(err) if !err.is_fatal() => {
                    debug!("filename prop-list lookup under {parent:?} failed ({err}); walking handles");
                }
                Err(err) => return Err(err),
            }
        }
        let handles = engine.get_object_handles(self.id, None, parent).await?;
        for handle in handles {
            match self.filename_locked(engine, handle).await {
                Ok(filename) if filename == name => return Ok(Some(handle)),
                Ok(_) => {}
                Err(err) if !err.is_fatal() => {
                    warn!("filename lookup for {handle:?} failed: {err}");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Download
    // ------------------------------------------------------------------

    /// Starts a streaming download of one object.
    ///
    /// The returned [`FileDownload`] holds the session lock: consume it to
    /// the end (or drop it, which schedules a transaction cancel) before
    /// issuing other operations on this device.
    pub async fn download_stream(&self, handle: ObjectHandle) -> Result<FileDownload<T>> {
        let mut guard = self.device.lock_engine_owned().await;
        let (tid, start) = guard.begin_data_in(OperationCode::GetObject, &[handle.0]).await?;
        match start {
            DataInStart::Data(phase) => Ok(FileDownload {
                guard,
                tid,
                phase: Some(phase),
                transferred: 0,
                progress: None,
                cancel: None,
            }),
            // OK with no data phase: an empty object on a terse device.
            DataInStart::Response(_) => Ok(FileDownload {
                guard,
                tid,
                phase: None,
                transferred: 0,
                progress: None,
                cancel: None,
            }),
        }
    }

    /// Downloads an entire object into memory. Intended for small objects;
    /// use [`Storage::download_to_file`] or [`Storage::download_stream`]
    /// for anything sizeable.
    pub async fn read_object(&self, handle: ObjectHandle) -> Result<Bytes> {
        let mut download = self.download_stream(handle).await?;
        let mut out = BytesMut::with_capacity(download.total_size().unwrap_or(0) as usize);
        while let Some(chunk) = download.next_chunk().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out.freeze())
    }

    /// Reads `len` bytes of an object starting at `offset` without
    /// transferring the rest. Needs device support for `GetPartialObject`.
    pub async fn read_object_range(&self, handle: ObjectHandle, offset: u32, len: u32) -> Result<Bytes> {
        let mut engine = self.device.lock_engine().await;
        engine.get_partial_object(handle, offset, len).await
    }

    /// Downloads one object to a local file, reporting progress and honoring
    /// cancellation at chunk granularity.
    pub async fn download_to_file(
        &self,
        handle: ObjectHandle,
        dest: &Path,
        progress: Option<ProgressFn>,
        cancel: Option<CancellationToken>,
    ) -> Result<u64> {
        let mut download = self.download_stream(handle).await?;
        if let Some(progress) = progress {
            download = download.with_progress(progress);
        }
        if let Some(cancel) = cancel {
            download = download.with_cancellation(cancel);
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = download.next_chunk().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        drop(download);
        file.flush().await?;
        debug!("downloaded {written} bytes to {}", dest.display());
        Ok(written)
    }

    // ------------------------------------------------------------------
    // Upload and mutation
    // ------------------------------------------------------------------

    /// Uploads an object from a chunk stream. `parent` of `None` places it
    /// in the storage root. Returns the new object's handle.
    pub async fn upload<S>(&self, parent: Option<ObjectHandle>, info: NewObjectInfo, data: S) -> Result<ObjectHandle>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Unpin,
    {
        self.upload_with(parent, info, data, None, None).await
    }

    /// [`Storage::upload`] with progress reporting and cancellation.
    pub async fn upload_with<S>(
        &self,
        parent: Option<ObjectHandle>,
        info: NewObjectInfo,
        data: S,
        progress: Option<ProgressFn>,
        cancel: Option<CancellationToken>,
    ) -> Result<ObjectHandle>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Unpin,
    {
        let parent = parent.unwrap_or(ObjectHandle::ROOT);
        let record = info.to_record();
        let mut engine = self.device.lock_engine().await;
        let (placed_storage, _placed_parent, handle) = engine.send_object_info(self.id, parent, &record).await?;
        debug!(
            "SendObjectInfo placed {:?} as {handle:?} on {placed_storage:?}",
            info.filename
        );
        engine
            .send_object(info.size, data, progress.as_ref(), cancel.as_ref())
            .await?;
        info!("uploaded {} ({} bytes) as {handle:?}", info.filename, info.size);
        Ok(handle)
    }

    /// Uploads a local file, inferring name, size, and format.
    pub async fn upload_file(
        &self,
        parent: Option<ObjectHandle>,
        source: &Path,
        progress: Option<ProgressFn>,
        cancel: Option<CancellationToken>,
    ) -> Result<ObjectHandle> {
        let filename = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::InvalidInput, "source has no filename")))?
            .to_string();
        let stream = BoxedByteStream::from_path(source).await?;
        let mut info = NewObjectInfo::file(&filename, stream.size());
        if let Ok(metadata) = tokio::fs::metadata(source).await
            && let Ok(modified) = metadata.modified()
            && let Some(dt) = system_time_to_datetime(modified)
        {
            info = info.with_modified(dt);
        }
        self.upload_with(parent, info, stream, progress, cancel).await
    }

    /// Creates a directory under `parent`. Fails with
    /// [`Error::AlreadyExists`] when a child of that name is present.
    pub async fn create_folder(&self, parent: Option<ObjectHandle>, name: &str) -> Result<ObjectHandle> {
        let parent = parent.unwrap_or(ObjectHandle::ROOT);
        let record = NewObjectInfo::folder(name).to_record();
        let mut engine = self.device.lock_engine().await;
        match engine.send_object_info(self.id, parent, &record).await {
            Ok((_, _, handle)) => {
                info!("created folder {name:?} as {handle:?}");
                Ok(handle)
            }
            Err(err @ Error::Protocol { .. }) => {
                // Devices disagree on the response code for "it exists";
                // a name probe decides whether this was a collision.
                if self.child_by_name_locked(&mut engine, parent, name).await?.is_some() {
                    Err(Error::AlreadyExists { name: name.to_string() })
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Creates a directory, or returns the existing one of the same name.
    pub async fn create_or_reuse_folder(&self, parent: Option<ObjectHandle>, name: &str) -> Result<ObjectHandle> {
        match self.create_folder(parent, name).await {
            Err(Error::AlreadyExists { .. }) => {
                let parent = parent.unwrap_or(ObjectHandle::ROOT);
                let mut engine = self.device.lock_engine().await;
                self.child_by_name_locked(&mut engine, parent, name)
                    .await?
                    .ok_or_else(|| Error::PathNotFound {
                        component: name.to_string(),
                    })
            }
            other => other,
        }
    }

    /// Deletes one object. Directories must be empty; recursion is the
    /// caller's policy decision.
    pub async fn delete(&self, handle: ObjectHandle) -> Result<()> {
        let mut engine = self.device.lock_engine().await;
        engine.delete_object(handle).await
    }

    /// Renames an object via the `ObjectFilename` property.
    pub async fn rename(&self, handle: ObjectHandle, new_name: &str) -> Result<()> {
        let mut engine = self.device.lock_engine().await;
        engine
            .set_object_string_property(handle, ObjectPropertyCode::ObjectFilename, new_name)
            .await
    }

    /// Moves an object under a new parent, optionally across storages.
    pub async fn move_object(
        &self,
        handle: ObjectHandle,
        new_parent: ObjectHandle,
        storage: Option<StorageId>,
    ) -> Result<()> {
        // MoveObject uses 0, not 0xFFFFFFFF, for "storage root".
        let parent_param = if new_parent == ObjectHandle::ROOT {
            ObjectHandle(0)
        } else {
            new_parent
        };
        let mut engine = self.device.lock_engine().await;
        engine
            .move_object(handle, storage.unwrap_or(self.id), parent_param)
            .await
    }

    /// A single string-typed object property.
    pub async fn string_property(&self, handle: ObjectHandle, property: ObjectPropertyCode) -> Result<String> {
        let mut engine = self.device.lock_engine().await;
        engine.get_object_string_property(handle, property).await
    }

    /// A single integer-typed object property, widened to `u64`.
    pub async fn integer_property(&self, handle: ObjectHandle, property: ObjectPropertyCode) -> Result<u64> {
        let mut engine = self.device.lock_engine().await;
        engine.get_object_integer_property(handle, property).await
    }

    /// Object property codes the device supports for `format`.
    pub async fn supported_properties(&self, format: Option<ObjectFormatCode>) -> Result<Vec<ObjectPropertyCode>> {
        let mut engine = self.device.lock_engine().await;
        engine.get_object_props_supported(format).await
    }

    /// One property for every child of `parent` in a single transaction.
    pub async fn property_for_children(
        &self,
        parent: Option<ObjectHandle>,
        property: ObjectPropertyCode,
    ) -> Result<Vec<(ObjectHandle, PropertyValue)>> {
        let parent = parent.unwrap_or(ObjectHandle::ROOT);
        let mut engine = self.device.lock_engine().await;
        engine.get_object_prop_values(parent, None, property, 1).await
    }

    // ------------------------------------------------------------------
    // Recursive transfers
    // ------------------------------------------------------------------

    /// Counts files, directories, and bytes under `handle` before a
    /// recursive transfer.
    pub async fn scan(&self, handle: ObjectHandle) -> Result<ScanResult> {
        let info = self.get_object_info(handle).await?;
        self.scan_entry(&info).await
    }

    async fn scan_entry(&self, info: &ObjectInfo) -> Result<ScanResult> {
        if !info.is_directory() {
            return Ok(ScanResult {
                file_count: 1,
                dir_count: 0,
                total_bytes: info.size,
            });
        }
        let mut result = ScanResult {
            dir_count: 1,
            ..Default::default()
        };
        for child in self.list_objects(Some(info.handle)).await? {
            let child_result = Box::pin(self.scan_entry(&child)).await?;
            result.file_count += child_result.file_count;
            result.dir_count += child_result.dir_count;
            result.total_bytes += child_result.total_bytes;
        }
        Ok(result)
    }

    /// Recursively downloads `source` (file or directory) into `dest`.
    ///
    /// Local directories are created as needed. Per-file failures are
    /// logged and skipped; session-fatal errors and cancellation abort the
    /// whole walk. Returns the number of bytes transferred.
    pub async fn download_recursive(
        &self,
        source: ObjectHandle,
        dest: &Path,
        cancel: Option<CancellationToken>,
    ) -> Result<u64> {
        let info = self.get_object_info(source).await?;
        self.download_entry(&info, dest, &cancel).await
    }

    async fn download_entry(
        &self,
        info: &ObjectInfo,
        dest: &Path,
        cancel: &Option<CancellationToken>,
    ) -> Result<u64> {
        if let Some(token) = cancel {
            token.check()?;
        }
        if !info.is_directory() {
            return self.download_to_file(info.handle, dest, None, cancel.clone()).await;
        }

        tokio::fs::create_dir_all(dest).await?;
        let mut total: u64 = 0;
        for child in self.list_objects(Some(info.handle)).await? {
            if !is_safe_filename(&child.filename) {
                warn!("skipping object {:?} with unusable name {:?}", child.handle, child.filename);
                continue;
            }
            let child_dest = dest.join(&child.filename);
            match Box::pin(self.download_entry(&child, &child_dest, cancel)).await {
                Ok(bytes) => total += bytes,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!("skipping {}: {err}", child.filename),
            }
        }
        debug!("downloaded directory {} ({total} bytes) to {}", info.filename, dest.display());
        Ok(total)
    }

    /// Recursively uploads a local file or directory under `parent`.
    ///
    /// Directories are created or reused by name; entries other than plain
    /// files and directories (sockets, symlinks) are skipped. Returns the
    /// number of bytes transferred.
    pub async fn upload_recursive(
        &self,
        parent: Option<ObjectHandle>,
        source: &Path,
        cancel: Option<CancellationToken>,
    ) -> Result<u64> {
        if let Some(token) = &cancel {
            token.check()?;
        }
        let metadata = tokio::fs::metadata(source).await?;

        if metadata.is_file() {
            self.upload_file(parent, source, None, cancel).await?;
            return Ok(metadata.len());
        }
        if !metadata.is_dir() {
            debug!("skipping special file {}", source.display());
            return Ok(0);
        }

        let dir_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::InvalidInput, "source has no directory name")))?;
        let dir_handle = self.create_or_reuse_folder(parent, dir_name).await?;

        let mut total: u64 = 0;
        let mut entries = tokio::fs::read_dir(source).await?;
        while let Some(entry) = entries.next_entry().await? {
            match Box::pin(self.upload_recursive(Some(dir_handle), &entry.path(), cancel.clone())).await {
                Ok(bytes) => total += bytes,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!("skipping {}: {err}", entry.path().display()),
            }
        }
        debug!("uploaded directory {} ({total} bytes)", source.display());
        Ok(total)
    }
}

/// Device-supplied names become local path components on download; anything
/// that would escape the destination directory is refused.
fn is_safe_filename(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\0')
}

fn system_time_to_datetime(time: std::time::SystemTime) -> Option<DateTime> {
    let secs = time.duration_since(std::time::UNIX_EPOCH).ok()?.as_secs();
    // Days-to-date conversion, civil-from-days style.
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let mut year: u16 = 1970;
    let mut remaining = days;
    loop {
        let leap = year % 4 == 0 && (year % 100 != 0 || year % 400 == 0);
        let in_year: u64 = if leap { 366 } else { 365 };
        if remaining < in_year {
            break;
        }
        remaining -= in_year;
        year += 1;
    }
    let leap = year % 4 == 0 && (year % 100 != 0 || year % 400 == 0);
    let month_lengths: [u64; 12] = [31, if leap { 29 } else { 28 }, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month: u8 = 1;
    for len in month_lengths {
        if remaining < len {
            break;
        }
        remaining -= len;
        month += 1;
    }
    Some(DateTime {
        year,
        month,
        day: (remaining + 1) as u8,
        hour: (rem / 3_600) as u8,
        minute: (rem % 3_600 / 60) as u8,
        second: (rem % 60) as u8,
    })
}

/// A streaming object download: one `GetObject` data phase consumed chunk
/// by chunk.
///
/// Holds the session lock for its whole lifetime, so nothing else can talk
/// to the device until the download finishes or is dropped. Dropping it
/// mid-stream schedules a transaction cancel that runs before the next
/// operation.
pub struct FileDownload<T: MtpTransport = UsbTransport> {
    guard: OwnedMutexGuard<Engine<T>>,
    tid: u32,
    /// `None` once the data phase (and response) completed, or when the
    /// device answered with an empty response instead of a data phase.
    phase: Option<DataPhaseIn>,
    transferred: u64,
    progress: Option<ProgressFn>,
    cancel: Option<CancellationToken>,
}

impl<T: MtpTransport> FileDownload<T> {
    /// Declared payload size; `None` when the device streams an
    /// unknown-length data phase.
    pub fn total_size(&self) -> Option<u64> {
        match &self.phase {
            Some(phase) => phase.total(),
            None => Some(self.transferred),
        }
    }

    /// Bytes handed out so far.
    pub fn bytes_transferred(&self) -> u64 {
        self.transferred
    }

    /// Attaches a progress callback invoked after each chunk.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Attaches a cancellation token checked before each chunk.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Pulls the next chunk. Returns `None` once the transfer completed and
    /// the terminating response was validated.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        let phase = self.phase.as_mut()?;

        if let Some(token) = &self.cancel
            && token.is_cancelled()
        {
            let abort = self.guard.abort_data_phase(self.tid).await;
            self.phase = None;
            if let Err(err) = abort {
                warn!("cancel of transaction {} did not recover the session: {err}", self.tid);
            }
            return Some(Err(Error::Cancelled));
        }

        match self.guard.data_in_next(self.tid, phase).await {
            Ok(Some(chunk)) => {
                self.transferred += chunk.len() as u64;
                if let Some(report) = &self.progress {
                    report(self.transferred, phase.total().unwrap_or(self.transferred));
                }
                Some(Ok(chunk))
            }
            Ok(None) => {
                let total = phase.total();
                let result = self.guard.finish_data_in(OperationCode::GetObject, self.tid).await;
                self.phase = None;
                match result {
                    Ok(_) => {
                        if let Some(total) = total
                            && total != self.transferred
                        {
                            return Some(Err(Error::invalid_data(format!(
                                "data phase declared {total} bytes but delivered {}",
                                self.transferred
                            ))));
                        }
                        None
                    }
                    Err(err) => Some(Err(err)),
                }
            }
            Err(err) => {
                // data_in_next already marked the transaction aborted.
                self.phase = None;
                Some(Err(err))
            }
        }
    }
}

impl<T: MtpTransport> Drop for FileDownload<T> {
    fn drop(&mut self) {
        if self.phase.is_some() {
            // Abandoned mid-stream: recovery happens before the next command.
            self.guard.mark_aborted(self.tid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_filename() {
        assert!(is_safe_filename("IMG_0001.jpg"));
        assert!(is_safe_filename("weird name (1)"));
        assert!(!is_safe_filename(""));
        assert!(!is_safe_filename("."));
        assert!(!is_safe_filename(".."));
        assert!(!is_safe_filename("a/b"));
        assert!(!is_safe_filename("nul\0byte"));
    }

    #[test]
    fn test_fold_parent() {
        assert_eq!(fold_parent(ObjectHandle::DEVICE), ObjectHandle::ROOT);
        assert_eq!(fold_parent(ObjectHandle(0x42)), ObjectHandle(0x42));
        assert_eq!(fold_parent(ObjectHandle::ROOT), ObjectHandle::ROOT);
    }

    #[test]
    fn test_new_object_info_file() {
        let info = NewObjectInfo::file("clip.mp4", 4096);
        assert_eq!(info.format, ObjectFormatCode::Mp4);
        assert_eq!(info.size, 4096);
        let record = info.to_record();
        assert_eq!(record.object_compressed_size, 4096);
        assert_eq!(record.association_type, AssociationType::Undefined);
        assert_eq!(record.filename, "clip.mp4");
    }

    #[test]
    fn test_new_object_info_folder() {
        let record = NewObjectInfo::folder("Camera").to_record();
        assert!(record.object_format.is_association());
        assert_eq!(record.association_type, AssociationType::GenericFolder);
        assert_eq!(record.object_compressed_size, 0);
    }

    #[test]
    fn test_new_object_info_size_overflow() {
        let record = NewObjectInfo::file("huge.bin", 5 * 1024 * 1024 * 1024).to_record();
        assert_eq!(record.object_compressed_size, SIZE_OVERFLOW_MARKER);
    }

    #[test]
    fn test_system_time_to_datetime() {
        let time = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_704_067_200);
        let dt = system_time_to_datetime(time).unwrap();
        assert_eq!((dt.year, dt.month, dt.day), (2024, 1, 1));
        assert_eq!((dt.hour, dt.minute, dt.second), (0, 0, 0));
        // And it round-trips through the wire format parser.
        assert_eq!(DateTime::parse(&dt.to_wire()), Some(dt));
    }

    #[test]
    fn test_object_info_from_record_size_and_parent() {
        let record = ObjectInfoRecord {
            storage_id: 0,
            object_format: ObjectFormatCode::ExifJpeg,
            object_compressed_size: 1000,
            parent_object: 0, // device sentinel
            filename: "a.jpg".into(),
            ..Default::default()
        };
        let info = ObjectInfo::from_record(ObjectHandle(5), record, StorageId(0x10001));
        assert_eq!(info.parent, ObjectHandle::ROOT);
        assert_eq!(info.storage_id, StorageId(0x10001));
        assert_eq!(info.size, 1000);
        assert!(!info.is_directory());
    }
}
