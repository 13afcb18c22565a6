//! FB-01 System Exclusive messages and dump framing.

use log::{debug, warn};

use crate::{Error, Result};
use crate::fb01::{InstrumentNumber, SystemChannel};

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;
pub const YAMAHA: u8 = 0x43;
pub const FB01_ID: u8 = 0x75;

/// Bytes before the payload of a dump: F0 43 75 0s zz pp pp, then two
/// byte-count bytes.
pub const HEADER_SIZE: usize = 9;

/// Bytes after the payload of a dump: checksum and F7.
pub const TRAILER_SIZE: usize = 2;

pub const CONFIGURATION_ADDRESS: u8 = 0x10;
pub const INSTRUMENT_ADDRESS: u8 = 0x18;
pub const VOICE_PARAMETER_BASE: u8 = 0x40;

const CONFIGURATION_DUMP: u8 = 0x20;
const VOICE_DUMP_REQUEST: u8 = 0x28;
const VOICE_DUMP: u8 = 0x08;

/// Parameter change for a configuration or instrument byte.
pub fn parameter_change(channel: SystemChannel, address: u8, offset: u8, value: u8) -> Vec<u8> {
    vec![YAMAHA, FB01_ID, channel.as_byte(), address, offset, value]
}

/// Parameter change for a voice byte, sent as two nibbles (low first).
pub fn voice_parameter_change(channel: SystemChannel, address: u8, offset: u8, value: u8) -> Vec<u8> {
    vec![YAMAHA, FB01_ID, channel.as_byte(), address, offset, value & 0x0F, value >> 4]
}

pub fn configuration_dump_request(channel: SystemChannel) -> Vec<u8> {
    vec![YAMAHA, FB01_ID, channel.as_byte(), CONFIGURATION_DUMP, 0x01, 0x00]
}

pub fn voice_dump_request(channel: SystemChannel, instrument: InstrumentNumber) -> Vec<u8> {
    vec![YAMAHA, FB01_ID, channel.as_byte(), VOICE_DUMP_REQUEST + instrument.index(), 0x00, 0x00]
}

/// The first bytes of the device's answer to `configuration_dump_request`.
pub fn configuration_dump_header(channel: SystemChannel) -> Vec<u8> {
    vec![SYSEX_START, YAMAHA, FB01_ID, channel.as_byte()]
}

/// The first bytes of the device's answer to `voice_dump_request`.
pub fn voice_dump_header(channel: SystemChannel, instrument: InstrumentNumber) -> Vec<u8> {
    vec![SYSEX_START, YAMAHA, FB01_ID, channel.as_byte(), VOICE_DUMP + instrument.index(), 0x00, 0x00]
}

/// Two's complement of the 7-bit sum of `data`.
pub fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b));
    sum.wrapping_neg() & 0x7F
}

/// Splits every byte into two, low nibble first.
pub fn nibblize(data: &[u8]) -> Vec<u8> {
    data.iter().flat_map(|b| [b & 0x0F, b >> 4]).collect()
}

/// Joins low/high nibble pairs back into bytes. A trailing odd byte is dropped.
pub fn denibblize(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(2)
        .map(|pair| (pair[0] & 0x0F) | ((pair[1] & 0x0F) << 4))
        .collect()
}

/// Turns a dump payload into the bytes of a `size` byte entity. The device
/// sends either plain bytes or nibble pairs.
pub fn decode_payload(payload: &[u8], size: usize) -> Result<Vec<u8>> {
    if payload.len() == size {
        Ok(payload.to_vec())
    }
    else if payload.len() == size * 2 {
        Ok(denibblize(payload))
    }
    else {
        Err(Error::InvalidLength { actual: payload.len(), expected: size })
    }
}

/// Accumulates a streamed dump until its stated length has arrived.
///
/// With an expected header the capture first skips whatever precedes that
/// header, so unrelated traffic may be interleaved with the answer.
#[derive(Debug, Default)]
pub struct Capture {
    header: Option<Vec<u8>>,
    synced: bool,
    data: Vec<u8>,
}

impl Capture {
    /// Captures from the first byte received.
    pub fn new() -> Self {
        Self { header: None, synced: true, data: Vec::new() }
    }

    /// Captures from the first occurrence of `header`.
    pub fn matching(header: Vec<u8>) -> Self {
        Self { header: Some(header), synced: false, data: Vec::new() }
    }

    /// Adds a chunk. Returns true once the dump is complete.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        if self.is_complete() {
            return true;
        }
        self.data.extend_from_slice(chunk);
        if !self.synced {
            self.sync();
        }
        self.is_complete()
    }

    fn sync(&mut self) {
        let header = match &self.header {
            Some(header) => header,
            None => {
                self.synced = true;
                return;
            }
        };

        if let Some(position) = self.data.windows(header.len()).position(|w| w == header.as_slice()) {
            if position > 0 {
                debug!("skipping {} bytes before dump header", position);
            }
            self.data.drain(..position);
            self.synced = true;
            return;
        }

        // Keep the longest tail that could still grow into the header.
        let keep = (1..header.len()).rev()
            .find(|&n| self.data.ends_with(&header[..n]))
            .unwrap_or(0);
        let skip = self.data.len() - keep;
        self.data.drain(..skip);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Payload size stated in the header, known once nine bytes are in.
    pub fn stated_size(&self) -> Option<usize> {
        if !self.synced || self.data.len() < HEADER_SIZE {
            return None;
        }
        Some((((self.data[7] & 0x01) as usize) << 7) + self.data[8] as usize)
    }

    pub fn is_complete(&self) -> bool {
        match self.stated_size() {
            Some(size) => self.data.len() >= size + HEADER_SIZE + TRAILER_SIZE,
            None => false,
        }
    }

    /// The payload between header and trailer, once complete.
    pub fn payload(&self) -> Option<&[u8]> {
        if !self.is_complete() {
            return None;
        }
        let size = self.stated_size()?;
        Some(&self.data[HEADER_SIZE..HEADER_SIZE + size])
    }

    /// Checks the trailing checksum against the payload.
    pub fn checksum_matches(&self) -> bool {
        match (self.payload(), self.stated_size()) {
            (Some(payload), Some(size)) => self.data[HEADER_SIZE + size] == checksum(payload),
            _ => false,
        }
    }

    /// Consumes the capture, returning its payload.
    pub fn into_payload(self) -> Option<Vec<u8>> {
        let size = self.stated_size()?;
        if !self.is_complete() {
            return None;
        }
        let total = size + HEADER_SIZE + TRAILER_SIZE;
        if self.data.len() > total {
            warn!("dropping {} bytes received after the dump", self.data.len() - total);
        }
        if !self.checksum_matches() {
            warn!("dump checksum mismatch: got {:#04X}, computed {:#04X}",
                self.data[HEADER_SIZE + size],
                checksum(&self.data[HEADER_SIZE..HEADER_SIZE + size]));
        }
        Some(self.data[HEADER_SIZE..HEADER_SIZE + size].to_vec())
    }
}
