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

// XMODEM/CRC file transfer over a serial port
use clap::{Parser, Subcommand};
use log::LevelFilter;
use serialport::{DataBits, Parity, StopBits};
use std::path::{Path, PathBuf};
use xmod::protocol::{BLOCK_SIZE, MAX_BLOCKS, SUB};
use xmod::{RealSerialPort, ReceiverSession, RetryPolicy, SenderSession, SystemClock, TransferError};

#[derive(Parser)]
#[command(name = "xmod")]
#[command(about = "Simplified XMODEM/CRC file transfer over RS-232", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name="BITS")]
    stop_bits: u8,

    /// Idle time in milliseconds before a retry
    #[arg(long, default_value = "1000", value_name = "MS")]
    timeout_ms: u64,

    /// Consecutive retries before giving up
    #[arg(long, default_value = "15")]
    max_retries: u32,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file (at most 255 blocks of 128 bytes)
    Send {
        /// File to send
        file: PathBuf,
    },
    /// Receive into a file
    Receive {
        /// File to write the received blocks to
        file: PathBuf,

        /// Receive buffer size in 128-byte blocks
        #[arg(long, default_value = "64")]
        blocks: usize,
    },
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

fn init_logging(debug: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if debug {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let data_bits = match parse_data_bits(cli.data_bits) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let parity = match parse_parity(&cli.parity) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let stop_bits = match parse_stop_bits(cli.stop_bits) {
        Ok(sb) => sb,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let policy = RetryPolicy {
        timeout_ms: cli.timeout_ms,
        max_retries: cli.max_retries,
    };

    println!("Opening serial port: {}", cli.port);
    println!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let mut serial_port = match RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Send { file } => {
            println!("\nSending file: {}", file.display());
            match send_file(&mut serial_port, &file, policy) {
                Ok(blocks) => println!("\nFile sent successfully! ({} blocks)", blocks),
                Err(e) => {
                    eprintln!("Send failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Receive { file, blocks } => {
            println!("\nReceiving to: {}", file.display());
            match receive_file(&mut serial_port, &file, blocks, policy) {
                Ok(bytes) => println!("\nFile received successfully! ({} bytes)", bytes),
                Err(e) => {
                    eprintln!("Receive failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Reads `file` into a block-aligned buffer padded with SUB.
fn load_blocks(file: &Path) -> Result<Vec<u8>, TransferError> {
    let mut data = std::fs::read(file)?;

    let blocks = data.len().div_ceil(BLOCK_SIZE).max(1);
    if blocks > MAX_BLOCKS {
        return Err(TransferError::BufferSize(blocks * BLOCK_SIZE));
    }
    data.resize(blocks * BLOCK_SIZE, SUB);
    Ok(data)
}

fn send_file(serial_port: &mut RealSerialPort, file: &Path, policy: RetryPolicy) -> Result<usize, TransferError> {
    let buffer = load_blocks(file)?;
    let mut clock = SystemClock::new();

    let mut session = SenderSession::new(&buffer)?.with_policy(policy);
    let summary = session.run(serial_port, &mut clock)?;
    Ok(summary.blocks)
}

fn receive_file(serial_port: &mut RealSerialPort, file: &Path, blocks: usize, policy: RetryPolicy) -> Result<usize, TransferError> {
    let mut buffer = vec![0u8; blocks * BLOCK_SIZE];
    let mut clock = SystemClock::new();

    let mut session = ReceiverSession::new(&mut buffer)?.with_policy(policy);
    let summary = session.run(serial_port, &mut clock)?;
    if summary.blocks > blocks {
        log::warn!("Received {} blocks into a {} block buffer, earlier blocks were overwritten", summary.blocks, blocks);
    }

    std::fs::write(file, &buffer[..summary.bytes])?;
    Ok(summary.bytes)
}
