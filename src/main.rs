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

// XMODEM firmware uploader
mod device;
mod protocol;
mod sender;
mod serial;

use clap::Parser;
use device::Device;
use log::{LevelFilter, error, info};
use sender::Mode;
use serial::RealSerialPort;
use serialport::{DataBits, Parity, StopBits};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fwlink")]
#[command(about = "XMODEM firmware uploader for serial bootloaders", long_about = None)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name = "BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name = "BITS")]
    stop_bits: u8,

    /// Transfer mode (xmodem or xmodem1k)
    #[arg(short, long, default_value = "xmodem1k")]
    mode: String,

    /// Consecutive protocol errors tolerated before aborting
    #[arg(long, default_value = "32", value_name = "COUNT")]
    retry: u32,

    /// Fill byte for the final short packet (decimal or 0x-prefixed hex)
    #[arg(long, default_value = "0x1A", value_name = "BYTE")]
    pad: String,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    /// Firmware image to upload
    file: PathBuf,
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn parse_mode(mode: &str) -> Result<Mode, String> {
    match mode.to_lowercase().as_str() {
        "xmodem" => Ok(Mode::Xmodem),
        "xmodem1k" => Ok(Mode::Xmodem1k),
        _ => Err(format!("Invalid mode: {}. Must be 'xmodem' or 'xmodem1k'", mode)),
    }
}

fn parse_pad(pad: &str) -> Result<u8, String> {
    let parsed = match pad.strip_prefix("0x").or_else(|| pad.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => pad.parse::<u8>(),
    };
    parsed.map_err(|_| format!("Invalid pad byte: {}. Must be 0-255 or 0x00-0xFF", pad))
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if cli.debug { LevelFilter::Debug } else { LevelFilter::Info })
        .format_timestamp(None)
        .init();

    let data_bits = match parse_data_bits(cli.data_bits) {
        Ok(db) => db,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let parity = match parse_parity(&cli.parity) {
        Ok(p) => p,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let stop_bits = match parse_stop_bits(cli.stop_bits) {
        Ok(sb) => sb,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let mode = match parse_mode(&cli.mode) {
        Ok(m) => m,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let pad = match parse_pad(&cli.pad) {
        Ok(p) => p,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if !cli.file.is_file() {
        error!("Firmware file not found: {}", cli.file.display());
        std::process::exit(1);
    }

    info!("Opening serial port: {}", cli.port);
    let serial_port = match RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits) {
        Ok(port) => port,
        Err(e) => {
            error!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };

    let mut device = Device::new(Box::new(serial_port));

    match device.start_bootloader() {
        Ok(true) => info!("Bootloader ready"),
        Ok(false) => {
            error!("Device not detected");
            std::process::exit(1);
        }
        Err(e) => {
            error!("Bootloader wake-up failed: {}", e);
            std::process::exit(1);
        }
    }

    match device.upload_firmware(&cli.file, mode, cli.retry, pad) {
        Ok(true) => info!("Done"),
        Ok(false) => {
            error!("Transfer failed");
            std::process::exit(1);
        }
        Err(e) => {
            error!("Upload failed: {}", e);
            std::process::exit(1);
        }
    }
}
