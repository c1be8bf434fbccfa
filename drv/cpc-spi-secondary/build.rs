// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::io::Write;

const CONFIG_VAR: &str = "CPC_SPI_CONFIG";

/// Largest transfer a single DMA descriptor can move.
const DMA_MAX_XFER_LEN: usize = 1024;

/// Sizing for the transport, given as TOML in `$CPC_SPI_CONFIG`. Every field
/// is optional.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TransportConfig {
    rx_queue_size: usize,
    tx_queue_size: usize,
    rx_data_max_length: usize,
    bitrate: u32,
    crc_error_injection_frequency: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            rx_queue_size: 10,
            tx_queue_size: 10,
            rx_data_max_length: DMA_MAX_XFER_LEN,
            bitrate: 10_000_000,
            crc_error_injection_frequency: 100,
        }
    }
}

fn main() -> Result<()> {
    let config = config_or_default()?;
    check_config(&config)?;
    generate_config(&config)?;
    Ok(())
}

fn config_or_default() -> Result<TransportConfig> {
    // Emitted whether or not the var is present, so that we'll be re-run if
    // it becomes present.
    println!("cargo:rerun-if-env-changed={CONFIG_VAR}");

    let text = match std::env::var(CONFIG_VAR) {
        Ok(text) => {
            println!("--- toml for ${CONFIG_VAR} ---");
            println!("{text}");
            text
        }
        Err(_) => {
            println!("--- var ${CONFIG_VAR} not present, using default ---");
            return Ok(TransportConfig::default());
        }
    };
    toml::from_str(&text).with_context(|| format!("parsing ${CONFIG_VAR}"))
}

fn check_config(config: &TransportConfig) -> Result<()> {
    // Entries are addressed by a u8 index.
    for (name, size) in [
        ("rx_queue_size", config.rx_queue_size),
        ("tx_queue_size", config.tx_queue_size),
    ] {
        if size == 0 || size > usize::from(u8::MAX) {
            bail!("{name} must be between 1 and {}, got {size}", u8::MAX);
        }
    }
    if config.rx_data_max_length < 2 {
        bail!(
            "rx_data_max_length must leave room for the FCS, got {}",
            config.rx_data_max_length
        );
    }
    if config.rx_data_max_length > DMA_MAX_XFER_LEN {
        bail!(
            "rx_data_max_length {} exceeds the largest DMA transfer ({})",
            config.rx_data_max_length,
            DMA_MAX_XFER_LEN
        );
    }
    if config.bitrate == 0 {
        bail!("bitrate must be non-zero");
    }
    if config.crc_error_injection_frequency == 0 {
        bail!("crc_error_injection_frequency must be non-zero");
    }
    Ok(())
}

fn generate_config(config: &TransportConfig) -> Result<()> {
    let out_dir = std::env::var("OUT_DIR").context("OUT_DIR not set")?;
    let dest_path = std::path::Path::new(&out_dir).join("cpc_spi_config.rs");
    let mut out = std::fs::File::create(&dest_path)?;

    writeln!(
        out,
        "pub const RX_QUEUE_SIZE: usize = {};",
        config.rx_queue_size
    )?;
    writeln!(
        out,
        "pub const TX_QUEUE_SIZE: usize = {};",
        config.tx_queue_size
    )?;
    writeln!(
        out,
        "pub const RX_DATA_MAX_LENGTH: usize = {};",
        config.rx_data_max_length
    )?;
    writeln!(out, "pub const BITRATE: u32 = {};", config.bitrate)?;
    writeln!(
        out,
        "pub const CRC_ERROR_INJECTION_FREQUENCY: u32 = {};",
        config.crc_error_injection_frequency
    )?;

    Ok(())
}
