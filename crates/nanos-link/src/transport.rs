//! Chunked bulk transport over a claimed HID interface.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nanos_metrics::metric_defs;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{LinkError, LinkResult};
use crate::platform::{EndpointDescriptor, UsbConnection};

/// Upper bound on frames discarded by one [`ChunkedTransport::drain`].
const MAX_DRAIN_FRAMES: usize = 256;

/// Moves byte buffers across one IN and one OUT endpoint.
///
/// All transfers are serialized by a single lock, so concurrent callers never
/// run the underlying bulk primitive at the same time.
pub struct ChunkedTransport {
    connection: Mutex<Option<Box<dyn UsbConnection>>>,
    interface: u8,
    endpoint_in: EndpointDescriptor,
    endpoint_out: EndpointDescriptor,
    timeout: Duration,
    read_size: usize,
    unsynced: AtomicBool,
}

impl ChunkedTransport {
    /// Wrap a connection whose `interface` has already been claimed.
    pub fn new(
        connection: Box<dyn UsbConnection>,
        interface: u8,
        endpoint_in: EndpointDescriptor,
        endpoint_out: EndpointDescriptor,
        timeout: Duration,
        buffer_size: usize,
    ) -> Self {
        ChunkedTransport {
            connection: Mutex::new(Some(connection)),
            interface,
            endpoint_in,
            endpoint_out,
            timeout,
            read_size: buffer_size.min(endpoint_in.max_packet_size),
            unsynced: AtomicBool::new(false),
        }
    }

    /// Perform one bulk read.
    ///
    /// Returns the bytes received, which is empty when the transfer timed out.
    pub fn read(&self) -> LinkResult<Vec<u8>> {
        let mut guard = self.connection.lock();
        let connection = guard.as_mut().ok_or(LinkError::NotConnected)?;

        let mut buf = vec![0u8; self.read_size];
        let received = match connection.bulk_in(self.endpoint_in.address, &mut buf, self.timeout) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(LinkError::Io(e)),
        };
        buf.truncate(received);

        if received == 0 {
            metrics::counter!(metric_defs::TRANSPORT_READ_TIMEOUTS.name).increment(1);
        } else {
            metrics::counter!(metric_defs::TRANSPORT_FRAMES_READ.name).increment(1);
            metrics::counter!(metric_defs::TRANSPORT_BYTES_READ.name).increment(received as u64);
            trace!(len = received, "bulk in");
        }
        Ok(buf)
    }

    /// Write `data` in chunks of the OUT endpoint's max packet size.
    ///
    /// A chunk that moves no bytes or fails aborts the write with
    /// [`LinkError::ConnectionLost`]. Returns the total bytes written.
    pub fn write(&self, data: &[u8]) -> LinkResult<usize> {
        let mut guard = self.connection.lock();
        let connection = guard.as_mut().ok_or(LinkError::NotConnected)?;

        let chunk_size = self.endpoint_out.max_packet_size.max(1);
        let mut written = 0;
        for chunk in data.chunks(chunk_size) {
            match connection.bulk_out(self.endpoint_out.address, chunk, self.timeout) {
                Ok(n) if n > 0 => {
                    written += n;
                    metrics::counter!(metric_defs::TRANSPORT_FRAMES_WRITTEN.name).increment(1);
                    metrics::counter!(metric_defs::TRANSPORT_BYTES_WRITTEN.name).increment(n as u64);
                }
                Ok(_) => {
                    warn!(written, "bulk out moved no bytes");
                    return Err(LinkError::ConnectionLost);
                }
                Err(e) => {
                    warn!(written, error = %e, "bulk out failed");
                    return Err(LinkError::ConnectionLost);
                }
            }
        }
        trace!(len = written, "bulk out");
        Ok(written)
    }

    /// Flag that the IN endpoint may still hold frames of an abandoned response.
    pub fn mark_unsynced(&self) {
        self.unsynced.store(true, Ordering::SeqCst);
    }

    /// Whether the next read starts a fresh response.
    pub fn is_synced(&self) -> bool {
        !self.unsynced.load(Ordering::SeqCst)
    }

    /// Discard inbound frames until a read comes back empty.
    ///
    /// Returns the number of frames discarded. The transport counts as synced
    /// again once an empty read is seen.
    pub fn drain(&self) -> LinkResult<usize> {
        let mut discarded = 0;
        while discarded < MAX_DRAIN_FRAMES {
            let bytes = self.read()?;
            if bytes.is_empty() {
                self.unsynced.store(false, Ordering::SeqCst);
                return Ok(discarded);
            }
            trace!(frame = %hex::encode(&bytes), "discard frame");
            discarded += 1;
        }
        warn!(discarded, "device still sending after drain");
        self.mark_unsynced();
        Ok(discarded)
    }

    /// Release the interface and close the connection.
    ///
    /// Waits for any transfer in progress. Later reads and writes fail with
    /// [`LinkError::NotConnected`].
    pub fn close(&self) {
        if let Some(mut connection) = self.connection.lock().take() {
            if let Err(e) = connection.release_interface(self.interface) {
                debug!(error = %e, "release interface failed");
            }
            connection.close();
        }
    }

    /// Whether [`close`](Self::close) has not been called yet.
    pub fn is_open(&self) -> bool {
        self.connection.lock().is_some()
    }

    /// Number of bytes requested per read.
    pub fn read_size(&self) -> usize {
        self.read_size
    }
}

impl std::fmt::Debug for ChunkedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedTransport")
            .field("interface", &self.interface)
            .field("endpoint_in", &self.endpoint_in.address)
            .field("endpoint_out", &self.endpoint_out.address)
            .field("timeout", &self.timeout)
            .finish()
    }
}
