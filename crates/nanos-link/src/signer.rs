//! Command/response exchanges and the typed signer commands.

use std::sync::Arc;
use std::time::Instant;

use nanos_apdu::{
    Address, Command, ExchangeResult, OutboundFrame, ResponseAssembler, Signature, StatusCode,
    Version, DERIVE_INDEX_SIZE, HASH_SIZE,
};
use nanos_metrics::{metric_defs, ExchangeLabels};
use tracing::{debug, trace, warn};

use crate::error::{LinkError, LinkResult, SignerError, SignerResult};
use crate::session::DeviceSession;

/// Runs exchanges against a [`DeviceSession`].
///
/// Only one exchange should be outstanding per session. A second caller
/// blocks on the transport lock until the first finishes.
#[derive(Debug, Clone)]
pub struct HardwareSigner {
    session: Arc<DeviceSession>,
    read_wait_cycles: u32,
}

impl HardwareSigner {
    pub fn new(session: Arc<DeviceSession>) -> Self {
        let read_wait_cycles = session.config().read_wait_cycles;
        HardwareSigner {
            session,
            read_wait_cycles,
        }
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    /// Send `command` and wait up to the configured number of read cycles.
    pub fn exchange(&self, command: Command, payload: &[u8]) -> LinkResult<ExchangeResult> {
        self.exchange_with_wait(command, payload, self.read_wait_cycles)
    }

    /// Send `command` and read until a full response arrives or `wait_cycles`
    /// reads come back empty.
    ///
    /// A write that loses the connection disconnects the session and no read
    /// is attempted.
    pub fn exchange_with_wait(
        &self,
        command: Command,
        payload: &[u8],
        wait_cycles: u32,
    ) -> LinkResult<ExchangeResult> {
        let started = Instant::now();
        let result = self.run_exchange(command, payload, wait_cycles);

        let status = match &result {
            Ok(response) => response.status,
            Err(e) => e.status(),
        };
        let labels = ExchangeLabels::new(command.as_str(), status.as_str());
        metrics::counter!(metric_defs::EXCHANGE_COMPLETED.name, &labels.to_labels()).increment(1);
        metrics::histogram!(metric_defs::EXCHANGE_DURATION.name, "command" => command.as_str())
            .record(started.elapsed().as_secs_f64());

        debug!(%command, %status, elapsed = ?started.elapsed(), "exchange complete");
        result
    }

    fn run_exchange(
        &self,
        command: Command,
        payload: &[u8],
        wait_cycles: u32,
    ) -> LinkResult<ExchangeResult> {
        let transport = self.session.transport()?;
        let frame = OutboundFrame::encode(command, payload)?;

        if !transport.is_synced() {
            let discarded = transport.drain()?;
            debug!(discarded, "discarded stale response frames");
        }

        trace!(frame = %hex::encode(frame.as_bytes()), "write frame");
        match transport.write(frame.as_bytes()) {
            Ok(_) => {}
            Err(LinkError::ConnectionLost) => {
                warn!(%command, "connection lost during write");
                self.session.disconnect();
                return Err(LinkError::ConnectionLost);
            }
            Err(e) => return Err(e),
        }

        let mut assembler = ResponseAssembler::new();
        let mut waited = 0;
        loop {
            let bytes = transport.read().inspect_err(|_| transport.mark_unsynced())?;
            if bytes.is_empty() {
                waited += 1;
                if waited >= wait_cycles {
                    warn!(%command, cycles = waited, "read timeout");
                    // A late reply must not be taken for the next response
                    transport.mark_unsynced();
                    return Err(LinkError::ReadTimeout { cycles: waited });
                }
                continue;
            }

            trace!(
                seq = assembler.frames_received(),
                frame = %hex::encode(&bytes),
                "read frame"
            );
            match assembler.push(&bytes) {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {}
                Err(e) => {
                    warn!(%command, error = %e, "bad response frame");
                    transport.mark_unsynced();
                    if let Err(drain) = transport.drain() {
                        debug!(error = %drain, "drain after bad frame failed");
                    }
                    return Err(e.into());
                }
            }
        }
    }

    /// Read the application version.
    pub fn get_version(&self) -> SignerResult<Version> {
        let data = self.checked(Command::GetVersion, &[])?;
        Version::decode(&data).map_err(|_| malformed(data))
    }

    /// Derive the address at index 0 with on-device confirmation.
    pub fn get_address(&self) -> SignerResult<Address> {
        self.get_address_at(0, false)
    }

    /// Derive the address at `index`. `silent` skips the on-device confirmation.
    pub fn get_address_at(&self, index: u32, silent: bool) -> SignerResult<Address> {
        let command = if silent {
            Command::GetAddressSilent
        } else {
            Command::GetAddress
        };
        let data = self.checked(command, &index.to_be_bytes())?;
        Address::decode(&data).map_err(|_| malformed(data))
    }

    /// Sign a 32-byte transaction hash with the key at index 0.
    pub fn sign_tx_hash(&self, hash: &[u8]) -> SignerResult<Signature> {
        self.sign_tx_hash_at(0, hash)
    }

    /// Sign a 32-byte transaction hash with the key at `index`.
    pub fn sign_tx_hash_at(&self, index: u32, hash: &[u8]) -> SignerResult<Signature> {
        if hash.len() != HASH_SIZE {
            return Err(SignerError::InvalidHashLength(hash.len()));
        }

        let mut payload = Vec::with_capacity(DERIVE_INDEX_SIZE + HASH_SIZE);
        payload.extend_from_slice(&index.to_be_bytes());
        payload.extend_from_slice(hash);

        let data = self.checked(Command::SignHash, &payload)?;
        Signature::decode(&data).map_err(|_| malformed(data))
    }

    /// Exchange and require an Ok status with a non-empty body.
    fn checked(&self, command: Command, payload: &[u8]) -> SignerResult<Vec<u8>> {
        let result = self.exchange(command, payload)?;
        if !result.is_ok() {
            return Err(SignerError::Response {
                status: result.status,
                data: result.data,
            });
        }
        if result.data.is_empty() {
            return Err(SignerError::Response {
                status: StatusCode::EmptyResponse,
                data: Vec::new(),
            });
        }
        Ok(result.data)
    }
}

fn malformed(data: Vec<u8>) -> SignerError {
    SignerError::Malformed {
        status: StatusCode::InvalidResponse,
        data,
    }
}
