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

//! XMODEM protocol constants and check-value computation

use crc::{CRC_16_XMODEM, Crc};

/// Start of header - begins transmission of a 128-byte packet
pub const SOH: u8 = 0x01;

/// Start of text - begins transmission of a 1024-byte packet
pub const STX: u8 = 0x02;

/// End of transmission - sender signals the stream is exhausted
pub const EOT: u8 = 0x04;

/// Acknowledge - receiver accepted the packet or the EOT
pub const ACK: u8 = 0x06;

/// Negative acknowledge - retransmit the packet, or (during the
/// handshake) select 8-bit checksum mode
pub const NAK: u8 = 0x15;

/// Cancel - either side unilaterally terminates the transfer
pub const CAN: u8 = 0x18;

/// CRC request - receiver selects CRC-16 mode during the handshake
pub const CRC: u8 = 0x43;

/// Default fill byte for the final short chunk
pub const PAD: u8 = 0x1A;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// 8-bit arithmetic checksum: sum of all payload bytes, modulo 256.
pub fn calc_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// CRC-16/XMODEM: polynomial 0x1021, initial value 0, no reflection.
pub fn calc_crc(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}
