//! USB transport abstraction and container framing.
//!
//! [`MtpTransport`] is the boundary between the protocol engine and the USB
//! stack: a pair of bulk endpoints, an interrupt endpoint, and class control
//! requests on the interface. [`UsbTransport`] is the nusb-backed production
//! implementation; tests drive the engine through a scripted mock.
//!
//! [`ContainerPipe`] frames PTP containers over the raw endpoints: it
//! appends the zero-length packet that terminates exact-multiple transfers,
//! reassembles inbound containers from their declared length, handles the
//! `0xFFFFFFFF` unknown-length streaming marker, and retries once across an
//! endpoint stall after clearing the halt.

mod usb;

#[cfg(test)]
pub(crate) mod mock;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::{debug, warn};

use crate::error::{Error, Result, UsbError};
use crate::ptp::{Container, ContainerHeader, MAX_ASSEMBLED_CONTAINER, UNKNOWN_CONTAINER_LEN};

pub use usb::{DiscoveredDevice, UsbTransport, discover_devices};

/// MTP class control request: cancel the transaction named in the payload.
pub(crate) const REQ_CANCEL: u8 = 0x64;
/// MTP class control request: poll device status after a cancel or stall.
pub(crate) const REQ_GET_DEVICE_STATUS: u8 = 0x67;

/// Byte-level USB access used by the session engine.
///
/// One implementation per backend; all methods take `&self` because the
/// request path (bulk) and the event listener (interrupt) run on different
/// tasks against the same transport.
pub trait MtpTransport: Send + Sync + 'static {
    /// Max packet size of the bulk-IN endpoint.
    fn max_packet_in(&self) -> usize;

    /// Max packet size of the bulk-OUT endpoint; governs ZLP insertion.
    fn max_packet_out(&self) -> usize;

    /// Submits one outbound bulk transfer.
    fn bulk_out(&self, data: &[u8], timeout: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Submits one inbound bulk transfer of up to `max_len` bytes. The
    /// transfer completes early on a short or zero-length packet.
    fn bulk_in(&self, max_len: usize, timeout: Duration) -> impl Future<Output = Result<Bytes>> + Send;

    /// Reads one interrupt transfer (an event container).
    fn interrupt_in(&self, timeout: Duration) -> impl Future<Output = Result<Bytes>> + Send;

    /// Class control request with an outbound data stage, directed at the
    /// MTP interface.
    fn control_out(&self, request: u8, value: u16, data: &[u8], timeout: Duration)
    -> impl Future<Output = Result<()>> + Send;

    /// Class control request with an inbound data stage.
    fn control_in(&self, request: u8, value: u16, len: usize, timeout: Duration)
    -> impl Future<Output = Result<Bytes>> + Send;

    fn clear_halt_in(&self) -> impl Future<Output = Result<()>> + Send;

    fn clear_halt_out(&self) -> impl Future<Output = Result<()>> + Send;
}

impl<T: MtpTransport> MtpTransport for Arc<T> {
    fn max_packet_in(&self) -> usize {
        (**self).max_packet_in()
    }

    fn max_packet_out(&self) -> usize {
        (**self).max_packet_out()
    }

    async fn bulk_out(&self, data: &[u8], timeout: Duration) -> Result<()> {
        (**self).bulk_out(data, timeout).await
    }

    async fn bulk_in(&self, max_len: usize, timeout: Duration) -> Result<Bytes> {
        (**self).bulk_in(max_len, timeout).await
    }

    async fn interrupt_in(&self, timeout: Duration) -> Result<Bytes> {
        (**self).interrupt_in(timeout).await
    }

    async fn control_out(&self, request: u8, value: u16, data: &[u8], timeout: Duration) -> Result<()> {
        (**self).control_out(request, value, data, timeout).await
    }

    async fn control_in(&self, request: u8, value: u16, len: usize, timeout: Duration) -> Result<Bytes> {
        (**self).control_in(request, value, len, timeout).await
    }

    async fn clear_halt_in(&self) -> Result<()> {
        (**self).clear_halt_in().await
    }

    async fn clear_halt_out(&self) -> Result<()> {
        (**self).clear_halt_out().await
    }
}

fn is_stall(err: &Error) -> bool {
    matches!(
        err,
        Error::Usb(UsbError::Transfer(nusb::transfer::TransferError::Stall))
    )
}

/// Frames PTP containers over an [`MtpTransport`].
pub(crate) struct ContainerPipe<T> {
    transport: Arc<T>,
    pub(crate) timeout: Duration,
}

impl<T: MtpTransport> ContainerPipe<T> {
    pub(crate) fn new(transport: Arc<T>, timeout: Duration) -> Self {
        ContainerPipe { transport, timeout }
    }

    pub(crate) fn max_packet_in(&self) -> usize {
        self.transport.max_packet_in()
    }

    pub(crate) fn max_packet_out(&self) -> usize {
        self.transport.max_packet_out()
    }

    /// One outbound transfer, clearing a halt and retrying once on stall.
    pub(crate) async fn write_transfer(&self, data: &[u8]) -> Result<()> {
        match self.transport.bulk_out(data, self.timeout).await {
            Err(err) if is_stall(&err) => {
                warn!("bulk-out stalled; clearing halt and retrying");
                self.transport.clear_halt_out().await?;
                self.transport.bulk_out(data, self.timeout).await
            }
            other => other,
        }
    }

    /// One inbound transfer, clearing a halt and retrying once on stall.
    pub(crate) async fn read_transfer(&self, max_len: usize) -> Result<Bytes> {
        match self.transport.bulk_in(max_len, self.timeout).await {
            Err(err) if is_stall(&err) => {
                warn!("bulk-in stalled; clearing halt and retrying");
                self.transport.clear_halt_in().await?;
                self.transport.bulk_in(max_len, self.timeout).await
            }
            other => other,
        }
    }

    /// Writes a complete container and, when its length is an exact multiple
    /// of the bulk-OUT max packet size, the terminating zero-length packet.
    pub(crate) async fn write_container(&self, container: &[u8]) -> Result<()> {
        let len = container.len();
        self.write_transfer(container).await?;
        if len % self.max_packet_out() == 0 {
            debug!("container of {len} bytes is packet-aligned; sending ZLP");
            self.write_transfer(&[]).await?;
        }
        Ok(())
    }

    /// Emits the trailing ZLP for a streamed data phase of `container_len`
    /// total bytes when the endpoint requires one.
    pub(crate) async fn finish_streamed_container(&self, container_len: u64) -> Result<()> {
        if container_len % self.max_packet_out() as u64 == 0 {
            debug!("streamed container of {container_len} bytes is packet-aligned; sending ZLP");
            self.write_transfer(&[]).await?;
        }
        Ok(())
    }

    /// Reads the first transfer of a container. The header must arrive in
    /// the first packet; a single spurious zero-length packet left over from
    /// a previous phase boundary is tolerated.
    pub(crate) async fn read_first_transfer(&self) -> Result<Bytes> {
        for _ in 0..2 {
            let chunk = self.read_transfer(self.max_packet_in()).await?;
            if !chunk.is_empty() {
                return Ok(chunk);
            }
            debug!("discarding spurious zero-length packet before container header");
        }
        Err(Error::invalid_data("expected container header, got zero-length packets"))
    }

    /// Reads and assembles one complete container. Used for responses and
    /// bounded data phases (info records, handle lists, property lists);
    /// object data phases stream instead.
    pub(crate) async fn read_container(&self) -> Result<Container> {
        let first = self.read_first_transfer().await?;
        let header = ContainerHeader::parse(&first)?;

        let mut buf = BytesMut::from(&first[..]);
        if header.length == UNKNOWN_CONTAINER_LEN {
            // Unknown-length container outside a streamed object transfer:
            // accumulate until a short packet, within the assembly cap. A
            // short first transfer already ends it.
            while buf.len() % self.max_packet_in() == 0 {
                let chunk = self.read_transfer(self.max_packet_in()).await?;
                let short = chunk.len() < self.max_packet_in();
                buf.extend_from_slice(&chunk);
                if buf.len() as u32 > MAX_ASSEMBLED_CONTAINER {
                    return Err(Error::invalid_data("unbounded container exceeds assembly limit"));
                }
                if short {
                    break;
                }
            }
            // Rewrite the length so decode can validate it.
            let total = buf.len() as u32;
            buf[0..4].copy_from_slice(&total.to_le_bytes());
            return Container::decode(buf.freeze());
        }

        if header.length > MAX_ASSEMBLED_CONTAINER {
            return Err(Error::invalid_data(format!(
                "container of {} bytes exceeds assembly limit",
                header.length
            )));
        }
        let total = header.length as usize;
        while buf.len() < total {
            let want = (total - buf.len()).min(crate::stream::IO_CHUNK_SIZE);
            let chunk = self.read_transfer(want).await?;
            if chunk.is_empty() {
                return Err(Error::invalid_data(format!(
                    "container ended after {} of {total} bytes",
                    buf.len()
                )));
            }
            buf.extend_from_slice(&chunk);
        }
        if buf.len() > total {
            return Err(Error::invalid_data(format!(
                "device sent {} bytes for a {total}-byte container",
                buf.len()
            )));
        }
        Container::decode(buf.freeze())
    }

    /// Raw bulk read with a caller-supplied short deadline, used while
    /// draining a cancelled transfer. No stall retry: the status poll that
    /// follows decides whether the device recovered.
    pub(crate) async fn drain_read(&self, max_len: usize, timeout: Duration) -> Result<Bytes> {
        self.transport.bulk_in(max_len, timeout).await
    }

    /// Sends the MTP `CancelRequest` class request for `transaction_id`.
    pub(crate) async fn send_cancel_request(&self, transaction_id: u32) -> Result<()> {
        let mut payload = Vec::with_capacity(6);
        payload.extend_from_slice(&0x4001u16.to_le_bytes()); // CancelTransaction event code
        payload.extend_from_slice(&transaction_id.to_le_bytes());
        self.transport.control_out(REQ_CANCEL, 0, &payload, self.timeout).await
    }

    /// Polls `GetDeviceStatus` once, returning the status code.
    pub(crate) async fn device_status(&self) -> Result<u16> {
        let reply = self.transport.control_in(REQ_GET_DEVICE_STATUS, 0, 64, self.timeout).await?;
        if reply.len() < 4 {
            return Err(Error::invalid_data(format!("device status reply of {} bytes", reply.len())));
        }
        Ok(u16::from_le_bytes([reply[2], reply[3]]))
    }

    pub(crate) async fn interrupt_in(&self, timeout: Duration) -> Result<Bytes> {
        self.transport.interrupt_in(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;
    use crate::ptp::{ContainerType, OperationCode, ResponseCode};

    fn pipe(mock: &Arc<MockTransport>) -> ContainerPipe<MockTransport> {
        ContainerPipe::new(Arc::clone(mock), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_zlp_after_packet_aligned_container() {
        let mock = Arc::new(MockTransport::new(512));
        let pipe = pipe(&mock);
        // 512-byte container: exact multiple, one ZLP must follow.
        pipe.write_container(&vec![0u8; 512]).await.unwrap();
        let writes = mock.bulk_out_log();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].len(), 512);
        assert_eq!(writes[1].len(), 0);
    }

    #[tokio::test]
    async fn test_no_zlp_after_short_container() {
        let mock = Arc::new(MockTransport::new(512));
        let pipe = pipe(&mock);
        pipe.write_container(&vec![0u8; 516]).await.unwrap();
        let writes = mock.bulk_out_log();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].len(), 516);
    }

    #[tokio::test]
    async fn test_read_container_across_packets() {
        let mock = Arc::new(MockTransport::new(512));
        // A 700-byte data container arrives as 512 + 188.
        let payload = vec![7u8; 688];
        let raw = Container::encode(ContainerType::Data, OperationCode::GetObject.0, 3, &payload);
        assert_eq!(raw.len(), 700);
        mock.queue_bulk_in(raw);

        let got = pipe(&mock).read_container().await.unwrap();
        assert_eq!(got.kind, ContainerType::Data);
        assert_eq!(got.transaction_id, 3);
        assert_eq!(got.payload.len(), 688);
    }

    #[tokio::test]
    async fn test_read_container_tolerates_leading_zlp() {
        let mock = Arc::new(MockTransport::new(512));
        mock.queue_bulk_in(Vec::new());
        mock.queue_bulk_in(Container::encode(
            ContainerType::Response,
            ResponseCode::Ok.0,
            1,
            &[],
        ));
        let got = pipe(&mock).read_container().await.unwrap();
        assert_eq!(got.kind, ContainerType::Response);
    }

    #[tokio::test]
    async fn test_read_unknown_length_container_until_short_packet() {
        let mock = Arc::new(MockTransport::new(512));
        // Header declares 0xFFFFFFFF; actual payload ends with a short packet.
        let payload = vec![9u8; 1000];
        let mut raw = Vec::new();
        raw.extend_from_slice(&ContainerHeader::encode(
            ContainerType::Data,
            OperationCode::GetObject.0,
            5,
            None,
        ));
        raw.extend_from_slice(&payload);
        mock.queue_bulk_in(raw);

        let got = pipe(&mock).read_container().await.unwrap();
        assert_eq!(got.payload.len(), 1000);
        assert_eq!(got.transaction_id, 5);
    }

    #[tokio::test]
    async fn test_oversized_container_rejected() {
        let mock = Arc::new(MockTransport::new(512));
        let mut raw = Container::encode(ContainerType::Data, OperationCode::GetObject.0, 1, &[0u8; 16]);
        raw[0..4].copy_from_slice(&(64 * 1024 * 1024u32).to_le_bytes());
        mock.queue_bulk_in(raw);
        let err = pipe(&mock).read_container().await.unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_truncated_container_times_out_as_error() {
        let mock = Arc::new(MockTransport::new(512));
        // Declares 700 bytes but only 512 arrive; the next read hits an
        // empty queue, which the mock reports as a timeout.
        let mut raw = Container::encode(ContainerType::Data, OperationCode::GetObject.0, 1, &vec![1u8; 688]);
        raw.truncate(512);
        mock.queue_bulk_in(raw);
        let err = pipe(&mock).read_container().await.unwrap_err();
        assert!(matches!(err, Error::Timeout), "got {err:?}");
    }

    #[tokio::test]
    async fn test_stall_recovery_retries_once() {
        let mock = Arc::new(MockTransport::new(512));
        mock.stall_next_bulk_in();
        mock.queue_bulk_in(Container::encode(ContainerType::Response, ResponseCode::Ok.0, 1, &[]));
        let got = pipe(&mock).read_container().await.unwrap();
        assert_eq!(got.kind, ContainerType::Response);
        assert_eq!(mock.clear_halt_in_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_request_payload_layout() {
        let mock = Arc::new(MockTransport::new(512));
        pipe(&mock).send_cancel_request(0x11223344).await.unwrap();
        let log = mock.control_out_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, REQ_CANCEL);
        assert_eq!(log[0].1, vec![0x01, 0x40, 0x44, 0x33, 0x22, 0x11]);
    }
}
