//! The transaction engine: one command, an optional data phase, one
//! response, all under the session lock.
//!
//! The engine owns the transaction counter, the session state, and the
//! container pipe. Exactly one transaction is in flight at a time; the
//! device-facing invariants live here so the public API on
//! [`MtpDevice`](crate::MtpDevice) and [`Storage`](crate::Storage) can stay
//! simple.
//!
//! A transaction that dies mid-data-phase (dropped download, cancelled
//! upload, transport error) leaves the device half-framed. The engine
//! records the aborted transaction id and, before the next command, runs
//! cancel-and-drain: the MTP `CancelRequest` control transfer, a bounded
//! drain of the bulk-IN endpoint, then `GetDeviceStatus` polling until the
//! device reports OK. If the device never settles, the session is marked
//! broken and every subsequent call fails with
//! [`Error::SessionBroken`](crate::Error::SessionBroken).


use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ptp::properties::{PropListEntry, PropListQuirks, collect_prop_values, parse_prop_list};
use crate::ptp::wire::WireReader;
use crate::ptp::{
    Container, ContainerHeader, ContainerType, DeviceInfo, DevicePropertyCode, ObjectFormatCode, ObjectHandle,
    ObjectInfoRecord, ObjectPropertyCode, OperationCode, PropertyValue, ResponseCode, StorageId, StorageInfo,
};
use crate::stream::{ByteStream, CancellationToken, IO_CHUNK_SIZE, ProgressFn};
use crate::transport::{ContainerPipe, MtpTransport};

/// Session id this host assigns; devices accept any non-zero value and only
/// one session exists at a time.
pub(crate) const SESSION_ID: u32 = 1;

/// Per-read deadline while draining a cancelled transfer.
const DRAIN_READ_TIMEOUT: Duration = Duration::from_millis(200);
/// Upper bound on drain reads; a device still streaming after this many
/// chunks is not going to stop, and the session is declared broken.
const DRAIN_MAX_READS: usize = 1024;
const STATUS_POLL_ATTEMPTS: usize = 10;
const STATUS_POLL_DELAY: Duration = Duration::from_millis(100);

pub(crate) struct Engine<T: MtpTransport> {
    pipe: ContainerPipe<T>,
    next_transaction_id: u32,
    session_open: bool,
    broken: bool,
    /// Transaction whose data phase was abandoned; triggers recovery before
    /// the next command.
    aborted_transaction: Option<u32>,
    strict_property_lists: bool,
    quirks: PropListQuirks,
}

/// Streaming inbound data phase state.
pub(crate) struct DataPhaseIn {
    total: Option<u64>,
    received: u64,
    pending: Option<Bytes>,
    done: bool,
}

impl DataPhaseIn {
    pub(crate) fn total(&self) -> Option<u64> {
        self.total
    }
}

/// What arrived when a data phase was expected: data, or an immediate
/// response from a device that had nothing to send.
pub(crate) enum DataInStart {
    Data(DataPhaseIn),
    Response(Vec<u32>),
}

impl<T: MtpTransport> Engine<T> {
    pub(crate) fn new(transport: Arc<T>, timeout: Duration, strict_property_lists: bool) -> Self {
        Engine {
            pipe: ContainerPipe::new(transport, timeout),
            next_transaction_id: 1,
            session_open: false,
            broken: false,
            aborted_transaction: None,
            strict_property_lists,
            quirks: PropListQuirks::default(),
        }
    }

    pub(crate) fn quirks(&self) -> PropListQuirks {
        self.quirks
    }

    fn next_tid(&mut self) -> u32 {
        let tid = self.next_transaction_id;
        // Wrap past the reserved id 0.
        self.next_transaction_id = self.next_transaction_id.checked_add(1).unwrap_or(1);
        tid
    }

    pub(crate) fn mark_aborted(&mut self, transaction_id: u32) {
        self.aborted_transaction = Some(transaction_id);
    }

    async fn ensure_ready(&mut self, op: OperationCode) -> Result<()> {
        if self.broken {
            return Err(Error::SessionBroken);
        }
        if let Some(tid) = self.aborted_transaction.take() {
            debug!("recovering session after aborted transaction {tid}");
            self.cancel_and_drain(tid).await?;
        }
        let pre_session = matches!(
            op,
            OperationCode::OpenSession | OperationCode::GetDeviceInfo | OperationCode::CloseSession
        );
        if !self.session_open && !pre_session {
            return Err(Error::SessionNotOpen);
        }
        Ok(())
    }

    /// Sends a command container and returns its transaction id.
    async fn command(&mut self, op: OperationCode, params: &[u32]) -> Result<u32> {
        self.ensure_ready(op).await?;
        // Id 0 is reserved for commands issued outside a session: OpenSession
        // itself and the pre-session GetDeviceInfo probe.
        let tid = if self.session_open { self.next_tid() } else { 0 };
        debug!("{op:?} [tid {tid}] params {params:08x?}");
        self.pipe.write_container(&Container::command(op, tid, params)).await?;
        Ok(tid)
    }

    async fn read_response(&mut self, op: OperationCode, tid: u32) -> Result<Vec<u32>> {
        match self.pipe.read_container().await {
            Ok(container) => container.expect_response(op, tid),
            Err(err) => {
                // A lost response leaves the transaction dangling on the
                // device side; schedule recovery before the next command.
                if matches!(err, Error::Timeout | Error::Usb(_)) {
                    self.mark_aborted(tid);
                }
                Err(err)
            }
        }
    }

    /// Runs an operation with no data phase.
    pub(crate) async fn run(&mut self, op: OperationCode, params: &[u32]) -> Result<Vec<u32>> {
        let tid = self.command(op, params).await?;
        self.read_response(op, tid).await
    }

    /// Runs an operation with a bounded inbound data phase, assembling the
    /// whole payload in memory.
    pub(crate) async fn run_data_in(&mut self, op: OperationCode, params: &[u32]) -> Result<Bytes> {
        let tid = self.command(op, params).await?;
        let container = match self.pipe.read_container().await {
            Ok(c) => c,
            Err(err) => {
                if matches!(err, Error::Timeout | Error::Usb(_)) {
                    self.mark_aborted(tid);
                }
                return Err(err);
            }
        };
        match container.kind {
            ContainerType::Data => {
                if container.transaction_id != tid {
                    return Err(Error::invalid_data(format!(
                        "data container transaction id {} does not match command {tid}",
                        container.transaction_id
                    )));
                }
                if container.code != op.0 {
                    warn!("data container echoes {:#06x} instead of {op:?}", container.code);
                }
                let payload = container.payload;
                self.read_response(op, tid).await?;
                Ok(payload)
            }
            ContainerType::Response => {
                // Some devices answer a data-in operation with a bare
                // response; OK means "nothing to send".
                container.expect_response(op, tid)?;
                Ok(Bytes::new())
            }
            other => Err(Error::invalid_data(format!(
                "expected data or response for {op:?}, got {other:?} container"
            ))),
        }
    }

    /// Runs an operation with an outbound data phase held in memory
    /// (object-info records, property values).
    pub(crate) async fn run_data_out(&mut self, op: OperationCode, params: &[u32], payload: &[u8]) -> Result<Vec<u32>> {
        let tid = self.command(op, params).await?;
        let data = Container::encode(ContainerType::Data, op.0, tid, payload);
        self.pipe.write_container(&data).await?;
        self.read_response(op, tid).await
    }

    /// Starts a streaming inbound data phase. The caller must drive
    /// [`Engine::data_in_next`] to completion (or abort) before issuing any
    /// other operation; the session mutex enforces this structurally.
    pub(crate) async fn begin_data_in(&mut self, op: OperationCode, params: &[u32]) -> Result<(u32, DataInStart)> {
        let tid = self.command(op, params).await?;
        let first = match self.pipe.read_first_transfer().await {
            Ok(first) => first,
            Err(err) => {
                if matches!(err, Error::Timeout | Error::Usb(_)) {
                    self.mark_aborted(tid);
                }
                return Err(err);
            }
        };
        let header = ContainerHeader::parse(&first)?;
        match header.kind {
            ContainerType::Data => {
                if header.transaction_id != tid {
                    self.mark_aborted(tid);
                    return Err(Error::invalid_data(format!(
                        "data container transaction id {} does not match command {tid}",
                        header.transaction_id
                    )));
                }
                let payload = Bytes::copy_from_slice(&first[crate::ptp::CONTAINER_HEADER_LEN..]);
                let received = payload.len() as u64;
                let total = header.payload_len();
                let done = match total {
                    Some(total) => received >= total,
                    // Unknown length: a short first transfer already ends it.
                    None => first.len() < self.pipe.max_packet_in(),
                };
                Ok((
                    tid,
                    DataInStart::Data(DataPhaseIn {
                        total,
                        received,
                        pending: (!payload.is_empty()).then_some(payload),
                        done,
                    }),
                ))
            }
            ContainerType::Response => {
                let container = Container::decode(first)?;
                Ok((tid, DataInStart::Response(container.expect_response(op, tid)?)))
            }
            other => {
                self.mark_aborted(tid);
                Err(Error::invalid_data(format!(
                    "expected data phase for {op:?}, got {other:?} container"
                )))
            }
        }
    }

    /// Pulls the next chunk of a streaming data phase; `None` when the
    /// declared length has been consumed.
    pub(crate) async fn data_in_next(&mut self, tid: u32, phase: &mut DataPhaseIn) -> Result<Option<Bytes>> {
        if let Some(pending) = phase.pending.take() {
            return Ok(Some(pending));
        }
        if phase.done {
            return Ok(None);
        }
        let chunk = match phase.total {
            Some(total) => {
                let want = ((total - phase.received).min(IO_CHUNK_SIZE as u64)) as usize;
                let chunk = self.read_or_abort(tid, want).await?;
                if chunk.is_empty() {
                    self.mark_aborted(tid);
                    return Err(Error::invalid_data(format!(
                        "data phase ended after {} of {total} bytes",
                        phase.received
                    )));
                }
                phase.received += chunk.len() as u64;
                phase.done = phase.received >= total;
                chunk
            }
            None => {
                let max_packet = self.pipe.max_packet_in();
                let chunk = self.read_or_abort(tid, max_packet).await?;
                phase.received += chunk.len() as u64;
                if chunk.len() < max_packet {
                    phase.done = true;
                }
                if chunk.is_empty() {
                    return Ok(None);
                }
                chunk
            }
        };
        Ok(Some(chunk))
    }

    async fn read_or_abort(&mut self, tid: u32, want: usize) -> Result<Bytes> {
        match self.pipe.read_transfer(want).await {
            Ok(chunk) => Ok(chunk),
            Err(err) => {
                self.mark_aborted(tid);
                Err(err)
            }
        }
    }

    /// Terminates a streaming data phase by reading the response.
    pub(crate) async fn finish_data_in(&mut self, op: OperationCode, tid: u32) -> Result<Vec<u32>> {
        self.read_response(op, tid).await
    }

    /// Cancels the transaction owning a streaming phase and recovers the
    /// session. Used for both user cancellation and abandoned downloads.
    pub(crate) async fn abort_data_phase(&mut self, tid: u32) -> Result<()> {
        self.cancel_and_drain(tid).await
    }

    async fn cancel_and_drain(&mut self, tid: u32) -> Result<()> {
        if let Err(err) = self.pipe.send_cancel_request(tid).await {
            warn!("CancelRequest for transaction {tid} failed: {err}");
        }

        let mut drained: u64 = 0;
        let mut settled = false;
        for _ in 0..DRAIN_MAX_READS {
            match self.pipe.drain_read(IO_CHUNK_SIZE, DRAIN_READ_TIMEOUT).await {
                Ok(chunk) if chunk.is_empty() => {
                    settled = true;
                    break;
                }
                Ok(chunk) => drained += chunk.len() as u64,
                Err(Error::Timeout) => {
                    settled = true;
                    break;
                }
                Err(err) => {
                    warn!("drain read failed: {err}");
                    break;
                }
            }
        }

        let mut status_ok = false;
        if settled {
            for _ in 0..STATUS_POLL_ATTEMPTS {
                match self.pipe.device_status().await {
                    Ok(code) if code == ResponseCode::Ok.0 => {
                        status_ok = true;
                        break;
                    }
                    Ok(code) => debug!("device status {code:#06x} after cancelling transaction {tid}"),
                    Err(err) => {
                        debug!("device status poll failed: {err}");
                        break;
                    }
                }
                tokio::time::sleep(STATUS_POLL_DELAY).await;
            }
        }

        if status_ok {
            info!("transaction {tid} cancelled; drained {drained} bytes");
            Ok(())
        } else {
            warn!("device did not settle after cancelling transaction {tid}; marking session broken");
            self.broken = true;
            Err(Error::SessionBroken)
        }
    }

    /// Streams an outbound data phase of exactly `size` payload bytes from
    /// `source`.
    ///
    /// The 12-byte data container header is joined in front of the payload
    /// so header and first payload bytes travel in one contiguous transfer,
    /// and chunks are coalesced up to [`IO_CHUNK_SIZE`] before submission.
    /// An intermediate short packet would end the container early on the
    /// device side.
    pub(crate) async fn send_data_stream<S>(
        &mut self,
        op: OperationCode,
        tid: u32,
        size: u64,
        source: S,
        progress: Option<&ProgressFn>,
        cancel: Option<&CancellationToken>,
    ) -> Result<()>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Unpin,
    {
        let header = ContainerHeader::encode(ContainerType::Data, op.0, tid, Some(size));
        let mut joined =
            ByteStream::from_bytes(Bytes::copy_from_slice(&header)).join(ByteStream::new(size, source));
        let container_len = joined.size();
        let header_len = crate::ptp::CONTAINER_HEADER_LEN as u64;

        let mut buffer = Vec::with_capacity(IO_CHUNK_SIZE.min(container_len as usize));
        let mut sent: u64 = 0;
        loop {
            if let Some(token) = cancel
                && token.is_cancelled()
            {
                self.cancel_and_drain(tid).await?;
                return Err(Error::Cancelled);
            }
            let chunk = match joined.next_chunk().await {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) if err.kind() == io::ErrorKind::Interrupted => {
                    self.cancel_and_drain(tid).await?;
                    return Err(Error::Cancelled);
                }
                Some(Err(err)) => {
                    self.cancel_and_drain(tid).await?;
                    return Err(Error::Io(err));
                }
            };

            sent += chunk.len() as u64;
            if sent > container_len {
                self.cancel_and_drain(tid).await?;
                return Err(Error::invalid_data(format!(
                    "source produced more than the declared {size} bytes"
                )));
            }

            let mut rest = &chunk[..];
            while !rest.is_empty() {
                let room = IO_CHUNK_SIZE - buffer.len();
                let take = room.min(rest.len());
                buffer.extend_from_slice(&rest[..take]);
                rest = &rest[take..];
                if buffer.len() == IO_CHUNK_SIZE {
                    self.write_or_abort(tid, &buffer).await?;
                    buffer.clear();
                }
            }
            if let Some(report) = progress {
                report(sent.saturating_sub(header_len), size);
            }
        }

        if sent != container_len {
            self.cancel_and_drain(tid).await?;
            return Err(Error::invalid_data(format!(
                "source provided {} bytes but the object was declared as {size}",
                sent.saturating_sub(header_len)
            )));
        }
        if !buffer.is_empty() {
            self.write_or_abort(tid, &buffer).await?;
        }
        self.pipe.finish_streamed_container(container_len).await
    }

    async fn write_or_abort(&mut self, tid: u32, data: &[u8]) -> Result<()> {
        match self.pipe.write_transfer(data).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.mark_aborted(tid);
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Typed operations
    // ------------------------------------------------------------------

    pub(crate) async fn open_session(&mut self) -> Result<()> {
        match self.run(OperationCode::OpenSession, &[SESSION_ID]).await {
            Ok(_) => {}
            Err(Error::Protocol { code, .. }) if code == ResponseCode::SessionAlreadyOpen => {
                // A previous host crashed without closing. Close the stale
                // session and reopen.
                warn!("device reports a stale open session; closing it and retrying");
                self.run(OperationCode::CloseSession, &[]).await.ok();
                self.run(OperationCode::OpenSession, &[SESSION_ID]).await?;
            }
            Err(err) => return Err(err),
        }
        self.session_open = true;
        self.next_transaction_id = 1;
        info!("MTP session {SESSION_ID} open");
        Ok(())
    }

    pub(crate) async fn close_session(&mut self) -> Result<()> {
        if !self.session_open {
            return Ok(());
        }
        let result = self.run(OperationCode::CloseSession, &[]).await;
        self.session_open = false;
        info!("MTP session closed");
        result.map(drop)
    }

    pub(crate) async fn get_device_info(&mut self) -> Result<DeviceInfo> {
        let payload = self.run_data_in(OperationCode::GetDeviceInfo, &[]).await?;
        DeviceInfo::decode(&payload)
    }

    pub(crate) async fn get_storage_ids(&mut self) -> Result<Vec<StorageId>> {
        let payload = self.run_data_in(OperationCode::GetStorageIDs, &[]).await?;
        let mut r = WireReader::new(&payload);
        Ok(r.array_u32("storage ids")?.into_iter().map(StorageId).collect())
    }

    pub(crate) async fn get_storage_info(&mut self, storage: StorageId) -> Result<StorageInfo> {
        let payload = self.run_data_in(OperationCode::GetStorageInfo, &[storage.0]).await?;
        StorageInfo::decode(&payload)
    }

    pub(crate) async fn get_object_handles(
        &mut self,
        storage: StorageId,
        format: Option<ObjectFormatCode>,
        parent: ObjectHandle,
    ) -> Result<Vec<ObjectHandle>> {
        let format = format.map_or(0, |f| u32::from(f.0));
        let payload = self
            .run_data_in(OperationCode::GetObjectHandles, &[storage.0, format, parent.0])
            .await?;
        let mut r = WireReader::new(&payload);
        Ok(r.array_u32("object handles")?.into_iter().map(ObjectHandle).collect())
    }

    pub(crate) async fn get_object_info(&mut self, handle: ObjectHandle) -> Result<ObjectInfoRecord> {
        let payload = self.run_data_in(OperationCode::GetObjectInfo, &[handle.0]).await?;
        ObjectInfoRecord::decode(&payload)
    }

    pub(crate) async fn delete_object(&mut self, handle: ObjectHandle) -> Result<()> {
        self.run(OperationCode::DeleteObject, &[handle.0, 0]).await.map(drop)
    }

    /// Sends the object-info record and returns the device's placement:
    /// `(storage, parent, new handle)`.
    pub(crate) async fn send_object_info(
        &mut self,
        storage: StorageId,
        parent: ObjectHandle,
        record: &ObjectInfoRecord,
    ) -> Result<(StorageId, ObjectHandle, ObjectHandle)> {
        let payload = record.encode()?;
        let params = self
            .run_data_out(OperationCode::SendObjectInfo, &[storage.0, parent.0], &payload)
            .await?;
        if params.len() < 3 {
            return Err(Error::invalid_data(format!(
                "SendObjectInfo response carried {} parameters, expected 3",
                params.len()
            )));
        }
        Ok((StorageId(params[0]), ObjectHandle(params[1]), ObjectHandle(params[2])))
    }

    pub(crate) async fn send_object<S>(
        &mut self,
        size: u64,
        source: S,
        progress: Option<&ProgressFn>,
        cancel: Option<&CancellationToken>,
    ) -> Result<()>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Unpin,
    {
        let tid = self.command(OperationCode::SendObject, &[]).await?;
        self.send_data_stream(OperationCode::SendObject, tid, size, source, progress, cancel)
            .await?;
        self.read_response(OperationCode::SendObject, tid).await.map(drop)
    }

    pub(crate) async fn move_object(
        &mut self,
        handle: ObjectHandle,
        storage: StorageId,
        new_parent: ObjectHandle,
    ) -> Result<()> {
        self.run(OperationCode::MoveObject, &[handle.0, storage.0, new_parent.0])
            .await
            .map(drop)
    }

    pub(crate) async fn get_partial_object(&mut self, handle: ObjectHandle, offset: u32, len: u32) -> Result<Bytes> {
        self.run_data_in(OperationCode::GetPartialObject, &[handle.0, offset, len])
            .await
    }

    pub(crate) async fn get_object_props_supported(
        &mut self,
        format: Option<ObjectFormatCode>,
    ) -> Result<Vec<ObjectPropertyCode>> {
        let format = format.map_or(0, |f| u32::from(f.0));
        let payload = self
            .run_data_in(OperationCode::GetObjectPropsSupported, &[format])
            .await?;
        let mut r = WireReader::new(&payload);
        Ok(r.array_u16("supported properties")?
            .into_iter()
            .map(ObjectPropertyCode)
            .collect())
    }

    /// Fetches properties for every object under `parent` in a single
    /// transaction, returning the raw `(object, property, value)` triples in
    /// wire order. Use with [`ObjectPropertyCode::All`] to hydrate listings.
    pub(crate) async fn get_object_prop_list(
        &mut self,
        parent: ObjectHandle,
        format: Option<ObjectFormatCode>,
        property: ObjectPropertyCode,
        depth: u32,
    ) -> Result<Vec<PropListEntry>> {
        let format = format.map_or(0, |f| u32::from(f.0));
        let payload = self
            .run_data_in(
                OperationCode::GetObjectPropList,
                &[parent.0, format, property.as_param(), 0, depth],
            )
            .await?;
        let mut entries = Vec::new();
        parse_prop_list(
            &payload,
            property,
            self.strict_property_lists,
            &mut self.quirks,
            |entry| entries.push(entry),
        )?;
        Ok(entries)
    }

    /// Single-property variant of [`Engine::get_object_prop_list`], deduped
    /// so the last value per object wins.
    pub(crate) async fn get_object_prop_values(
        &mut self,
        parent: ObjectHandle,
        format: Option<ObjectFormatCode>,
        property: ObjectPropertyCode,
        depth: u32,
    ) -> Result<Vec<(ObjectHandle, PropertyValue)>> {
        let format = format.map_or(0, |f| u32::from(f.0));
        let payload = self
            .run_data_in(
                OperationCode::GetObjectPropList,
                &[parent.0, format, property.as_param(), 0, depth],
            )
            .await?;
        collect_prop_values(&payload, property, self.strict_property_lists, &mut self.quirks)
    }

    pub(crate) async fn get_object_prop_value(
        &mut self,
        handle: ObjectHandle,
        property: ObjectPropertyCode,
    ) -> Result<Bytes> {
        self.run_data_in(OperationCode::GetObjectPropValue, &[handle.0, u32::from(property.0)])
            .await
    }

    /// `GetObjectPropValue` decoded as a string; the value arrives untagged,
    /// its type implied by the property.
    pub(crate) async fn get_object_string_property(
        &mut self,
        handle: ObjectHandle,
        property: ObjectPropertyCode,
    ) -> Result<String> {
        let payload = self.get_object_prop_value(handle, property).await?;
        let mut r = WireReader::new(&payload);
        r.string("string property value")
    }

    /// `GetObjectPropValue` decoded as an unsigned integer of whatever width
    /// the device used.
    pub(crate) async fn get_object_integer_property(
        &mut self,
        handle: ObjectHandle,
        property: ObjectPropertyCode,
    ) -> Result<u64> {
        let payload = self.get_object_prop_value(handle, property).await?;
        let mut r = WireReader::new(&payload);
        match payload.len() {
            1 => Ok(u64::from(r.u8("integer property")?)),
            2 => Ok(u64::from(r.u16("integer property")?)),
            4 => Ok(u64::from(r.u32("integer property")?)),
            8 => r.u64("integer property"),
            16 => {
                let value = r.u128("integer property")?;
                u64::try_from(value)
                    .map_err(|_| Error::invalid_data("128-bit property value exceeds u64 range"))
            }
            n => Err(Error::invalid_data(format!("integer property value of {n} bytes"))),
        }
    }

    pub(crate) async fn set_object_string_property(
        &mut self,
        handle: ObjectHandle,
        property: ObjectPropertyCode,
        value: &str,
    ) -> Result<()> {
        let mut w = crate::ptp::wire::WireWriter::new();
        w.string(value)?;
        self.run_data_out(
            OperationCode::SetObjectPropValue,
            &[handle.0, u32::from(property.0)],
            &w.finish(),
        )
        .await
        .map(drop)
    }

    /// Raw device property bytes; interpretation is property-specific.
    pub(crate) async fn get_device_prop_value(&mut self, property: DevicePropertyCode) -> Result<Bytes> {
        self.run_data_in(OperationCode::GetDevicePropValue, &[u32::from(property.0)])
            .await
    }
}
