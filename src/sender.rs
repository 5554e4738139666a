// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use crate::protocol::*;
use crate::serial::SerialPort;
use std::io::Read;
use std::marker::PhantomData;
use std::time::Duration;

/// How long a single response read may block before it counts as a
/// protocol error
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of CAN bytes written when a transfer is aborted
const ABORT_CAN_COUNT: usize = 2;

// ============================================================================
// Transfer Parameters
// ============================================================================

/// Transfer mode, fixed for the lifetime of one transfer. Selects the
/// payload size and the start-of-packet marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Classic XMODEM, 128-byte payloads framed with SOH
    Xmodem,
    /// XMODEM-1K, 1024-byte payloads framed with STX
    Xmodem1k,
}

impl Mode {
    pub fn payload_size(self) -> usize {
        match self {
            Mode::Xmodem => 128,
            Mode::Xmodem1k => 1024,
        }
    }

    pub fn start_marker(self) -> u8 {
        match self {
            Mode::Xmodem => SOH,
            Mode::Xmodem1k => STX,
        }
    }
}

/// Error detection scheme, selected by the receiver during the handshake
/// and immutable for the remainder of the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDetection {
    /// 8-bit arithmetic checksum, one check byte per packet
    Checksum8,
    /// CRC-16/XMODEM, two check bytes per packet (high byte first)
    Crc16,
}

/// Protocol events reported to the injected observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// No valid mode-selection byte observed yet
    HandshakeRetry { errors: u32 },
    /// Packet rejected or response garbled, retransmitting
    PacketRetry { sequence: u8, errors: u32 },
    /// EOT not acknowledged, resending
    EotRetry { errors: u32 },
    /// Abort sequence (two CAN bytes) written
    Aborted,
    /// Receiver cancelled the transfer with repeated CAN
    Cancelled,
}

type EventSink = Box<dyn FnMut(Event) + Send>;
type PacketCallback = Box<dyn FnMut(u8, &[u8]) + Send>;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum SenderError {
    Io(std::io::Error),
    TransferComplete,
    HandshakeFailed,
    Cancelled,
    PacketRejected { sequence: u8 },
    EotRejected,
}

impl std::fmt::Display for SenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderError::Io(e) => write!(f, "I/O error: {}", e),
            SenderError::TransferComplete => write!(f, "Transfer complete"),
            SenderError::HandshakeFailed => write!(f, "No NAK or CRC request from receiver"),
            SenderError::Cancelled => write!(f, "Transfer cancelled by receiver"),
            SenderError::PacketRejected { sequence } => {
                write!(f, "Packet {} rejected too many times", sequence)
            }
            SenderError::EotRejected => write!(f, "EOT was not acknowledged"),
        }
    }
}

impl std::error::Error for SenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SenderError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SenderError {
    fn from(err: std::io::Error) -> Self {
        SenderError::Io(err)
    }
}

// ============================================================================
// States
// ============================================================================

pub struct WaitHandshake;
pub struct CheckMoreData;
pub struct TransmitBlock;
pub struct SendChecksum;
pub struct SendEot;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct XmodemFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    stream: Box<dyn Read + Send>,
    mode: Mode,
    scheme: ErrorDetection,
    pad: u8,
    retry_limit: u32,
    sequence: u8,
    error_count: u32,
    cancel_pending: bool,
    buffer: Vec<u8>,
    check: u16,
    events: EventSink,
    progress: Option<PacketCallback>,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError>;
}

// ============================================================================
// Helpers shared by all states
// ============================================================================

impl<S> XmodemFsm<S> {
    fn transition<T>(self) -> Box<XmodemFsm<T>> {
        Box::new(XmodemFsm {
            state: PhantomData,
            serial: self.serial,
            stream: self.stream,
            mode: self.mode,
            scheme: self.scheme,
            pad: self.pad,
            retry_limit: self.retry_limit,
            sequence: self.sequence,
            error_count: self.error_count,
            cancel_pending: self.cancel_pending,
            buffer: self.buffer,
            check: self.check,
            events: self.events,
            progress: self.progress,
        })
    }

    fn io_error(&self, e: std::io::Error) -> SenderError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        SenderError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    /// Read a single byte, mapping a timed-out or empty read to `None`
    fn read_byte(&mut self, timeout: Duration) -> std::io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.serial.read_timeout(&mut buf, timeout) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write the abort sequence. Best effort, no response awaited.
    fn abort(&mut self, count: usize) -> Result<(), SenderError> {
        for _ in 0..count {
            self.serial.write_all(&[CAN]).map_err(|e| self.io_error(e))?;
        }
        (self.events)(Event::Aborted);
        Ok(())
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for XmodemFsm<WaitHandshake> {
    // The receiver drives mode selection: stay passive until it sends
    // NAK (checksum mode) or 'C' (CRC mode).
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        let byte = fsm.read_byte(RESPONSE_TIMEOUT).map_err(|e| fsm.io_error(e))?;
        match byte {
            Some(NAK) => {
                fsm.scheme = ErrorDetection::Checksum8;
                fsm.error_count = 0;
                let next = fsm.transition::<CheckMoreData>();
                Ok(next as Box<dyn SenderState>)
            }
            Some(CRC) => {
                fsm.scheme = ErrorDetection::Crc16;
                fsm.error_count = 0;
                let next = fsm.transition::<CheckMoreData>();
                Ok(next as Box<dyn SenderState>)
            }
            Some(CAN) => {
                // The receiver asked to cancel. Tolerate a single CAN
                // (it may still be flushing); a second consecutive one
                // ends the transfer without our own CAN sequence.
                if fsm.cancel_pending {
                    (fsm.events)(Event::Cancelled);
                    return Err(SenderError::Cancelled);
                }
                fsm.cancel_pending = true;
                Ok(Box::new(fsm) as Box<dyn SenderState>)
            }
            other => {
                if other.is_some() {
                    fsm.cancel_pending = false;
                }
                fsm.error_count += 1;
                if fsm.error_count >= fsm.retry_limit {
                    fsm.abort(ABORT_CAN_COUNT)?;
                    return Err(SenderError::HandshakeFailed);
                }
                (fsm.events)(Event::HandshakeRetry { errors: fsm.error_count });
                Ok(Box::new(fsm) as Box<dyn SenderState>)
            }
        }
    }
}

impl SenderState for XmodemFsm<CheckMoreData> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        // One chunk per packet; a zero-length read signals end of input.
        let bytes_read = fsm.stream.read(&mut fsm.buffer).map_err(|e| fsm.io_error(e))?;
        if bytes_read == 0 {
            fsm.error_count = 0;
            let next = fsm.transition::<SendEot>();
            return Ok(next as Box<dyn SenderState>);
        }

        fsm.buffer[bytes_read..].fill(fsm.pad);
        fsm.check = match fsm.scheme {
            ErrorDetection::Checksum8 => calc_checksum(&fsm.buffer) as u16,
            ErrorDetection::Crc16 => calc_crc(&fsm.buffer),
        };

        let next = fsm.transition::<TransmitBlock>();
        Ok(next as Box<dyn SenderState>)
    }
}

impl SenderState for XmodemFsm<TransmitBlock> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        let header = [fsm.mode.start_marker(), fsm.sequence, 0xFF - fsm.sequence];
        fsm.serial.write_all(&header).map_err(|e| fsm.io_error(e))?;
        fsm.serial.write_all(&fsm.buffer).map_err(|e| fsm.io_error(e))?;

        // Fires once per transmission attempt, retransmissions included.
        if let Some(callback) = fsm.progress.as_mut() {
            callback(fsm.sequence, &fsm.buffer);
        }

        let next = fsm.transition::<SendChecksum>();
        Ok(next as Box<dyn SenderState>)
    }
}

impl SenderState for XmodemFsm<SendChecksum> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        match fsm.scheme {
            ErrorDetection::Checksum8 => {
                let check = [fsm.check as u8];
                fsm.serial.write_all(&check).map_err(|e| fsm.io_error(e))?;
            }
            ErrorDetection::Crc16 => {
                let check = fsm.check.to_be_bytes();
                fsm.serial.write_all(&check).map_err(|e| fsm.io_error(e))?;
            }
        }

        match fsm.read_byte(RESPONSE_TIMEOUT).map_err(|e| fsm.io_error(e))? {
            Some(ACK) => {
                fsm.sequence = fsm.sequence.wrapping_add(1);
                fsm.error_count = 0;
                let next = fsm.transition::<CheckMoreData>();
                Ok(next as Box<dyn SenderState>)
            }
            // NAK, unexpected byte and timeout all get the same
            // treatment: retransmit the identical packet, no backoff.
            _ => {
                fsm.error_count += 1;
                if fsm.error_count >= fsm.retry_limit {
                    fsm.abort(ABORT_CAN_COUNT)?;
                    return Err(SenderError::PacketRejected { sequence: fsm.sequence });
                }
                (fsm.events)(Event::PacketRetry {
                    sequence: fsm.sequence,
                    errors: fsm.error_count,
                });
                let next = fsm.transition::<TransmitBlock>();
                Ok(next as Box<dyn SenderState>)
            }
        }
    }
}

impl SenderState for XmodemFsm<SendEot> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        fsm.serial.write_all(&[EOT]).map_err(|e| fsm.io_error(e))?;

        match fsm.read_byte(RESPONSE_TIMEOUT).map_err(|e| fsm.io_error(e))? {
            Some(ACK) => Err(SenderError::TransferComplete),
            _ => {
                fsm.error_count += 1;
                if fsm.error_count >= fsm.retry_limit {
                    fsm.abort(ABORT_CAN_COUNT)?;
                    return Err(SenderError::EotRejected);
                }
                (fsm.events)(Event::EotRetry { errors: fsm.error_count });
                Ok(Box::new(fsm) as Box<dyn SenderState>)
            }
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl XmodemFsm<WaitHandshake> {
    /// A new transfer over `serial`, reading packet payloads from
    /// `stream`. The sequence number starts at 1 and only advances on
    /// acknowledgement.
    pub fn new(
        serial: Box<dyn SerialPort>,
        stream: Box<dyn Read + Send>,
        mode: Mode,
        retry_limit: u32,
    ) -> Self {
        XmodemFsm {
            state: PhantomData::<WaitHandshake>,
            serial,
            stream,
            mode,
            scheme: ErrorDetection::Checksum8,
            pad: PAD,
            retry_limit,
            sequence: 1,
            error_count: 0,
            cancel_pending: false,
            buffer: vec![0; mode.payload_size()],
            check: 0,
            events: Box::new(|_| {}),
            progress: None,
        }
    }

    /// Fill byte used to pad the final short chunk (default 0x1A)
    pub fn pad_byte(mut self, pad: u8) -> Self {
        self.pad = pad;
        self
    }

    /// Observer for protocol events. The engine never logs on its own.
    pub fn on_event(mut self, sink: impl FnMut(Event) + Send + 'static) -> Self {
        self.events = Box::new(sink);
        self
    }

    /// Callback invoked with (sequence, payload) after the payload bytes
    /// of each transmission attempt are queued. Retransmissions invoke it
    /// again with the same sequence.
    pub fn on_packet(mut self, callback: impl FnMut(u8, &[u8]) + Send + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn start(self) -> Box<dyn SenderState> {
        Box::new(self)
    }
}

/// Drive the state machine to completion. `Ok(true)` means every chunk
/// was acknowledged and the EOT handshake completed; `Ok(false)` means
/// the protocol failed (retries exhausted or receiver cancelled); `Err`
/// carries a channel or data-source fault.
pub fn run_sender(mut state: Box<dyn SenderState>) -> Result<bool, SenderError> {
    loop {
        match state.step() {
            Ok(next) => state = next,
            Err(SenderError::TransferComplete) => return Ok(true),
            Err(e @ SenderError::Io(_)) => return Err(e),
            Err(_) => return Ok(false),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockSerialPort;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    fn expect_packet(
        writes: &mut Vec<u8>,
        mode: Mode,
        scheme: ErrorDetection,
        sequence: u8,
        data: &[u8],
        pad: u8,
    ) {
        let mut payload = data.to_vec();
        payload.resize(mode.payload_size(), pad);

        writes.push(mode.start_marker());
        writes.push(sequence);
        writes.push(0xFF - sequence);
        writes.extend_from_slice(&payload);
        match scheme {
            ErrorDetection::Checksum8 => writes.push(calc_checksum(&payload)),
            ErrorDetection::Crc16 => {
                writes.extend_from_slice(&calc_crc(&payload).to_be_bytes())
            }
        }
    }

    #[test]
    fn test_sender_checksum_mode_single_packet() {
        let responses = vec![Some(NAK), Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        expect_packet(&mut expected_writes, Mode::Xmodem, ErrorDetection::Checksum8, 1, b"hello", PAD);
        expected_writes.push(EOT);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = XmodemFsm::new(mock_serial, Box::new(Cursor::new(b"hello".to_vec())), Mode::Xmodem, 32);

        assert_eq!(run_sender(fsm.start()).unwrap(), true);
    }

    #[test]
    fn test_sender_crc_mode_three_1k_blocks() {
        // 1024 + 1024 + 400 bytes: the last packet is padded with
        // 624 bytes of 0x1A
        let data: Vec<u8> = (0..2448usize).map(|i| (i % 251) as u8).collect();

        let responses = vec![Some(CRC), Some(ACK), Some(ACK), Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        expect_packet(&mut expected_writes, Mode::Xmodem1k, ErrorDetection::Crc16, 1, &data[..1024], PAD);
        expect_packet(&mut expected_writes, Mode::Xmodem1k, ErrorDetection::Crc16, 2, &data[1024..2048], PAD);
        expect_packet(&mut expected_writes, Mode::Xmodem1k, ErrorDetection::Crc16, 3, &data[2048..], PAD);
        expected_writes.push(EOT);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = XmodemFsm::new(mock_serial, Box::new(Cursor::new(data)), Mode::Xmodem1k, 32);

        assert_eq!(run_sender(fsm.start()).unwrap(), true);
    }

    #[test]
    fn test_sender_empty_stream_sends_eot_only() {
        let responses = vec![Some(CRC), Some(ACK)];
        let expected_writes = vec![EOT];

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = XmodemFsm::new(mock_serial, Box::new(Cursor::new(Vec::new())), Mode::Xmodem, 32);

        assert_eq!(run_sender(fsm.start()).unwrap(), true);
    }

    #[test]
    fn test_sender_nak_retransmits_identical_packet() {
        let responses = vec![Some(NAK), Some(NAK), Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        expect_packet(&mut expected_writes, Mode::Xmodem, ErrorDetection::Checksum8, 1, b"retry", PAD);
        expect_packet(&mut expected_writes, Mode::Xmodem, ErrorDetection::Checksum8, 1, b"retry", PAD);
        expected_writes.push(EOT);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = XmodemFsm::new(mock_serial, Box::new(Cursor::new(b"retry".to_vec())), Mode::Xmodem, 32);

        assert_eq!(run_sender(fsm.start()).unwrap(), true);
    }

    #[test]
    fn test_sender_packet_retry_exhaustion_aborts() {
        let responses = vec![Some(NAK), Some(NAK), Some(NAK), Some(NAK)];

        let mut expected_writes = Vec::new();
        for _ in 0..3 {
            expect_packet(&mut expected_writes, Mode::Xmodem, ErrorDetection::Checksum8, 1, b"doomed", PAD);
        }
        expected_writes.push(CAN);
        expected_writes.push(CAN);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = XmodemFsm::new(mock_serial, Box::new(Cursor::new(b"doomed".to_vec())), Mode::Xmodem, 3);

        assert_eq!(run_sender(fsm.start()).unwrap(), false);
    }

    #[test]
    fn test_sender_silent_receiver_fails_handshake() {
        // 32 timed-out reads, then the abort sequence and nothing else
        let responses = vec![None; 32];
        let expected_writes = vec![CAN, CAN];

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = XmodemFsm::new(mock_serial, Box::new(Cursor::new(b"unsent".to_vec())), Mode::Xmodem, 32);

        assert_eq!(run_sender(fsm.start()).unwrap(), false);
    }

    #[test]
    fn test_sender_double_can_cancels_without_abort() {
        let responses = vec![Some(CAN), Some(CAN)];
        let expected_writes = Vec::new();

        let events = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = XmodemFsm::new(mock_serial, Box::new(Cursor::new(b"unsent".to_vec())), Mode::Xmodem, 32)
            .on_event(move |event| log.lock().unwrap().push(event));

        assert_eq!(run_sender(fsm.start()).unwrap(), false);
        assert_eq!(*events.lock().unwrap(), vec![Event::Cancelled]);
    }

    #[test]
    fn test_sender_single_can_is_tolerated() {
        let responses = vec![Some(CAN), Some(NAK), Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        expect_packet(&mut expected_writes, Mode::Xmodem, ErrorDetection::Checksum8, 1, b"data", PAD);
        expected_writes.push(EOT);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = XmodemFsm::new(mock_serial, Box::new(Cursor::new(b"data".to_vec())), Mode::Xmodem, 32);

        assert_eq!(run_sender(fsm.start()).unwrap(), true);
    }

    #[test]
    fn test_sender_other_byte_clears_pending_cancel() {
        // CAN, junk, CAN is not a consecutive pair: the transfer proceeds
        let responses = vec![Some(CAN), Some(0x00), Some(CAN), Some(NAK), Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        expect_packet(&mut expected_writes, Mode::Xmodem, ErrorDetection::Checksum8, 1, b"data", PAD);
        expected_writes.push(EOT);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = XmodemFsm::new(mock_serial, Box::new(Cursor::new(b"data".to_vec())), Mode::Xmodem, 32);

        assert_eq!(run_sender(fsm.start()).unwrap(), true);
    }

    #[test]
    fn test_sender_eot_retried_until_ack() {
        let responses = vec![Some(NAK), Some(ACK), Some(0x00), Some(ACK)];

        let mut expected_writes = Vec::new();
        expect_packet(&mut expected_writes, Mode::Xmodem, ErrorDetection::Checksum8, 1, b"tail", PAD);
        expected_writes.push(EOT);
        expected_writes.push(EOT);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = XmodemFsm::new(mock_serial, Box::new(Cursor::new(b"tail".to_vec())), Mode::Xmodem, 32);

        assert_eq!(run_sender(fsm.start()).unwrap(), true);
    }

    #[test]
    fn test_sender_eot_exhaustion_aborts() {
        let responses = vec![Some(NAK), Some(ACK), None, None];

        let mut expected_writes = Vec::new();
        expect_packet(&mut expected_writes, Mode::Xmodem, ErrorDetection::Checksum8, 1, b"tail", PAD);
        expected_writes.push(EOT);
        expected_writes.push(EOT);
        expected_writes.push(CAN);
        expected_writes.push(CAN);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = XmodemFsm::new(mock_serial, Box::new(Cursor::new(b"tail".to_vec())), Mode::Xmodem, 2);

        assert_eq!(run_sender(fsm.start()).unwrap(), false);
    }

    #[test]
    fn test_sender_sequence_wraps_to_zero() {
        // 257 full packets: sequences 1..=255, 0, 1
        let packets = 257usize;
        let data: Vec<u8> = (0..packets * 128).map(|i| (i % 256) as u8).collect();

        let mut responses = vec![Some(NAK)];
        responses.extend(std::iter::repeat(Some(ACK)).take(packets + 1));

        let mut expected_writes = Vec::new();
        for k in 1..=packets {
            let sequence = (k % 256) as u8;
            let chunk = &data[(k - 1) * 128..k * 128];
            expect_packet(&mut expected_writes, Mode::Xmodem, ErrorDetection::Checksum8, sequence, chunk, PAD);
        }
        expected_writes.push(EOT);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = XmodemFsm::new(mock_serial, Box::new(Cursor::new(data)), Mode::Xmodem, 32);

        assert_eq!(run_sender(fsm.start()).unwrap(), true);
    }

    #[test]
    fn test_sender_progress_callback_fires_per_attempt() {
        let responses = vec![Some(NAK), Some(NAK), Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        expect_packet(&mut expected_writes, Mode::Xmodem, ErrorDetection::Checksum8, 1, b"ping", PAD);
        expect_packet(&mut expected_writes, Mode::Xmodem, ErrorDetection::Checksum8, 1, b"ping", PAD);
        expected_writes.push(EOT);

        let attempts = Arc::new(Mutex::new(Vec::new()));
        let log = attempts.clone();

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = XmodemFsm::new(mock_serial, Box::new(Cursor::new(b"ping".to_vec())), Mode::Xmodem, 32)
            .on_packet(move |sequence, payload| {
                assert_eq!(payload.len(), 128);
                log.lock().unwrap().push(sequence);
            });

        assert_eq!(run_sender(fsm.start()).unwrap(), true);
        // the rejected attempt and the accepted one both report sequence 1
        assert_eq!(*attempts.lock().unwrap(), vec![1, 1]);
    }

    #[test]
    fn test_sender_custom_pad_byte() {
        let responses = vec![Some(NAK), Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        expect_packet(&mut expected_writes, Mode::Xmodem, ErrorDetection::Checksum8, 1, b"ab", 0x00);
        expected_writes.push(EOT);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = XmodemFsm::new(mock_serial, Box::new(Cursor::new(b"ab".to_vec())), Mode::Xmodem, 32)
            .pad_byte(0x00);

        assert_eq!(run_sender(fsm.start()).unwrap(), true);
    }

    #[test]
    fn test_sender_garbage_handshake_bytes_count_toward_retry() {
        let responses = vec![Some(0x7F), None, Some(NAK), Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        expect_packet(&mut expected_writes, Mode::Xmodem, ErrorDetection::Checksum8, 1, b"late", PAD);
        expected_writes.push(EOT);

        let events = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = XmodemFsm::new(mock_serial, Box::new(Cursor::new(b"late".to_vec())), Mode::Xmodem, 32)
            .on_event(move |event| log.lock().unwrap().push(event));

        assert_eq!(run_sender(fsm.start()).unwrap(), true);
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                Event::HandshakeRetry { errors: 1 },
                Event::HandshakeRetry { errors: 2 },
            ]
        );
    }
}
