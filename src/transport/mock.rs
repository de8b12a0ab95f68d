//! Scripted in-memory transport for engine and framing tests.
//!
//! Each queued bulk-in buffer models one device-side transfer: the mock
//! hands out up to the requested length per read and re-queues the
//! remainder, so a large data phase is consumed with exactly the chunking
//! the pipe asks for. An empty queue reads as a timeout, which is also how
//! the real transport reports a silent device.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result, UsbError};

pub(crate) struct MockTransport {
    max_packet: usize,
    bulk_in: Mutex<VecDeque<Vec<u8>>>,
    bulk_out: Mutex<Vec<Vec<u8>>>,
    interrupt_in: Mutex<VecDeque<Vec<u8>>>,
    control_out: Mutex<Vec<(u8, Vec<u8>)>>,
    /// Status codes handed out by GetDeviceStatus polls; defaults to OK.
    device_status: Mutex<VecDeque<u16>>,
    stall_bulk_in: AtomicUsize,
    clear_halt_in: AtomicUsize,
    clear_halt_out: AtomicUsize,
}

impl MockTransport {
    pub(crate) fn new(max_packet: usize) -> Self {
        MockTransport {
            max_packet,
            bulk_in: Mutex::new(VecDeque::new()),
            bulk_out: Mutex::new(Vec::new()),
            interrupt_in: Mutex::new(VecDeque::new()),
            control_out: Mutex::new(Vec::new()),
            device_status: Mutex::new(VecDeque::new()),
            stall_bulk_in: AtomicUsize::new(0),
            clear_halt_in: AtomicUsize::new(0),
            clear_halt_out: AtomicUsize::new(0),
        }
    }

    pub(crate) fn queue_bulk_in(&self, transfer: Vec<u8>) {
        self.bulk_in.lock().unwrap().push_back(transfer);
    }

    pub(crate) fn queue_interrupt(&self, transfer: Vec<u8>) {
        self.interrupt_in.lock().unwrap().push_back(transfer);
    }

    pub(crate) fn queue_device_status(&self, code: u16) {
        self.device_status.lock().unwrap().push_back(code);
    }

    /// Makes the next bulk-in submission fail with a stall.
    pub(crate) fn stall_next_bulk_in(&self) {
        self.stall_bulk_in.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn bulk_out_log(&self) -> Vec<Vec<u8>> {
        self.bulk_out.lock().unwrap().clone()
    }

    pub(crate) fn control_out_log(&self) -> Vec<(u8, Vec<u8>)> {
        self.control_out.lock().unwrap().clone()
    }

    pub(crate) fn clear_halt_in_count(&self) -> usize {
        self.clear_halt_in.load(Ordering::SeqCst)
    }

    pub(crate) fn pending_bulk_in_bytes(&self) -> usize {
        self.bulk_in.lock().unwrap().iter().map(Vec::len).sum()
    }
}

impl super::MtpTransport for MockTransport {
    fn max_packet_in(&self) -> usize {
        self.max_packet
    }

    fn max_packet_out(&self) -> usize {
        self.max_packet
    }

    async fn bulk_out(&self, data: &[u8], _timeout: Duration) -> Result<()> {
        self.bulk_out.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn bulk_in(&self, max_len: usize, _timeout: Duration) -> Result<Bytes> {
        if self.stall_bulk_in.load(Ordering::SeqCst) > 0 {
            self.stall_bulk_in.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Usb(UsbError::Transfer(nusb::transfer::TransferError::Stall)));
        }
        let mut queue = self.bulk_in.lock().unwrap();
        let Some(mut transfer) = queue.pop_front() else {
            return Err(Error::Timeout);
        };
        if transfer.len() > max_len {
            let rest = transfer.split_off(max_len);
            queue.push_front(rest);
        }
        Ok(Bytes::from(transfer))
    }

    async fn interrupt_in(&self, _timeout: Duration) -> Result<Bytes> {
        match self.interrupt_in.lock().unwrap().pop_front() {
            Some(transfer) => Ok(Bytes::from(transfer)),
            None => Err(Error::Timeout),
        }
    }

    async fn control_out(&self, request: u8, _value: u16, data: &[u8], _timeout: Duration) -> Result<()> {
        self.control_out.lock().unwrap().push((request, data.to_vec()));
        Ok(())
    }

    async fn control_in(&self, request: u8, _value: u16, _len: usize, _timeout: Duration) -> Result<Bytes> {
        if request == super::REQ_GET_DEVICE_STATUS {
            let code = self
                .device_status
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(crate::ptp::ResponseCode::Ok.0);
            let mut reply = Vec::with_capacity(4);
            reply.extend_from_slice(&4u16.to_le_bytes());
            reply.extend_from_slice(&code.to_le_bytes());
            return Ok(Bytes::from(reply));
        }
        Ok(Bytes::new())
    }

    async fn clear_halt_in(&self) -> Result<()> {
        self.clear_halt_in.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear_halt_out(&self) -> Result<()> {
        self.clear_halt_out.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
