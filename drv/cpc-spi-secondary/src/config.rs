// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build-time sizing, generated from `$CPC_SPI_CONFIG` by the build script.

use drv_cpc_api::hdlc::{FCS_SIZE, HEADER_RAW_SIZE};

include!(concat!(env!("OUT_DIR"), "/cpc_spi_config.rs"));

/// Largest transfer a single DMA descriptor can move.
pub const DMA_MAX_XFER_LEN: usize = 1024;

/// Largest payload that still fits one transfer once the header and FCS are
/// accounted for.
pub const DMA_MAX_XFER_PAYLOAD_LEN: usize =
    DMA_MAX_XFER_LEN - HEADER_RAW_SIZE - FCS_SIZE;

// The build script checks these too, but it can't see the constants above.
const _: () = assert!(RX_DATA_MAX_LENGTH <= DMA_MAX_XFER_LEN);
const _: () = assert!(DMA_MAX_XFER_PAYLOAD_LEN + FCS_SIZE <= DMA_MAX_XFER_LEN);
