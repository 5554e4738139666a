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

use crate::sender::{Event, Mode, SenderError, XmodemFsm, run_sender};
use crate::serial::SerialPort;
use log::{debug, info, warn};
use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Settle time after each DTR edge during the wake-up sequence
const WAKE_SETTLE: Duration = Duration::from_secs(1);

/// How long to wait for the bootloader banner line
const BANNER_TIMEOUT: Duration = Duration::from_secs(10);

/// Command that drops the application into its bootloader
const WAKE_COMMAND: &[u8] = b"bl1\n";

// ============================================================================
// Device
// ============================================================================

/// A target device reachable over one serial link. Owns the port for the
/// lifetime of the session; `upload_firmware` hands it to the transfer
/// engine.
pub struct Device {
    serial: Box<dyn SerialPort>,
}

impl Device {
    pub fn new(serial: Box<dyn SerialPort>) -> Self {
        Device { serial }
    }

    /// Pulse DTR to reset the target, then ask it to stay in the
    /// bootloader. Returns whether the expected banner was seen.
    pub fn start_bootloader(&mut self) -> std::io::Result<bool> {
        self.serial.set_dtr(true)?;
        thread::sleep(WAKE_SETTLE);
        self.serial.set_dtr(false)?;
        thread::sleep(WAKE_SETTLE);

        self.serial.write_all(WAKE_COMMAND)?;
        let banner = self.read_line(BANNER_TIMEOUT)?;
        debug!("boot banner: {:?}", banner);
        Ok(banner.trim().ends_with("bootloader"))
    }

    /// Run one XMODEM transfer of `path` to the device, reporting
    /// progress on stdout.
    pub fn upload_firmware(
        self,
        path: &Path,
        mode: Mode,
        retry_limit: u32,
        pad: u8,
    ) -> Result<bool, SenderError> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        info!("Uploading {} ({} bytes)", path.display(), file_size);

        let mut counted_sequence = None;
        let mut sent: u64 = 0;
        let mut last_percent = None;

        let fsm = XmodemFsm::new(self.serial, Box::new(file), mode, retry_limit)
            .pad_byte(pad)
            .on_event(report_event)
            .on_packet(move |sequence, payload| {
                // retransmissions repeat the sequence; count each packet once
                if counted_sequence != Some(sequence) {
                    counted_sequence = Some(sequence);
                    sent += payload.len() as u64;
                }
                let percent = (sent.min(file_size) * 100) / file_size.max(1);
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    println!("{}%", percent);
                }
            });

        run_sender(fsm.start())
    }

    fn read_line(&mut self, timeout: Duration) -> std::io::Result<String> {
        let mut line = Vec::new();
        loop {
            let mut buf = [0u8; 1];
            match self.serial.read_timeout(&mut buf, timeout) {
                Ok(0) => break,
                Ok(_) if buf[0] == b'\n' => break,
                Ok(_) => line.push(buf[0]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

fn report_event(event: Event) {
    match event {
        Event::HandshakeRetry { errors } => {
            debug!("handshake: no mode request yet (attempt {})", errors)
        }
        Event::PacketRetry { sequence, errors } => {
            warn!("packet {} not accepted, retransmitting (error {})", sequence, errors)
        }
        Event::EotRetry { errors } => {
            warn!("EOT not acknowledged, resending (error {})", errors)
        }
        Event::Aborted => warn!("transfer aborted, CAN sequence sent"),
        Event::Cancelled => warn!("receiver cancelled the transfer"),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ACK, CRC, EOT, PAD, SOH, calc_crc};
    use crate::serial::MockSerialPort;

    fn banner_responses(line: &[u8]) -> Vec<Option<u8>> {
        line.iter().map(|&b| Some(b)).collect()
    }

    #[test]
    fn test_device_detects_bootloader_banner() {
        let mock_serial = Box::new(
            MockSerialPort::new(banner_responses(b"bootloader\n"), b"bl1\n".to_vec())
                .expect_dtr(vec![true, false]),
        );

        let mut device = Device::new(mock_serial);
        assert!(device.start_bootloader().unwrap());
    }

    #[test]
    fn test_device_rejects_unexpected_banner() {
        let mock_serial = Box::new(
            MockSerialPort::new(banner_responses(b"shell\n"), b"bl1\n".to_vec())
                .expect_dtr(vec![true, false]),
        );

        let mut device = Device::new(mock_serial);
        assert!(!device.start_bootloader().unwrap());
    }

    #[test]
    fn test_device_uploads_firmware_end_to_end() {
        let test_file = std::env::temp_dir().join("fwlink_upload_test.bin");
        std::fs::write(&test_file, b"firmware image").unwrap();

        let responses = vec![Some(CRC), Some(ACK), Some(ACK)];

        let mut payload = b"firmware image".to_vec();
        payload.resize(128, PAD);
        let mut expected_writes = vec![SOH, 1, 0xFE];
        expected_writes.extend_from_slice(&payload);
        expected_writes.extend_from_slice(&calc_crc(&payload).to_be_bytes());
        expected_writes.push(EOT);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let device = Device::new(mock_serial);

        let result = device
            .upload_firmware(&test_file, Mode::Xmodem, 32, PAD)
            .unwrap();
        assert!(result);

        std::fs::remove_file(&test_file).ok();
    }
}
