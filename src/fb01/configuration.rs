use std::sync::Arc;

use log::{debug, info};

use crate::{Error, Result};
use crate::link::{DeviceLink, Endpoint};
use crate::memory::{FieldSpec, Memory, Observers, ParameterStore, RegisterMap};
use crate::fb01::{
    enum_index,
    enum_name,
    push_offsets,
    read_name,
    write_name,
    InstrumentNumber,
    LFO_WAVEFORMS,
};
use crate::fb01::instrument::{Instrument, INSTRUMENT_SIZE};
use crate::fb01::sysex::{self, CONFIGURATION_ADDRESS};

pub const CONFIGURATION_SIZE: usize = 0xA0;

/// Offset of instrument 1; the others follow every `INSTRUMENT_SIZE` bytes.
const INSTRUMENTS_OFFSET: usize = 0x20;

pub static CONFIGURATION_MAP: RegisterMap = RegisterMap {
    name: "configuration",
    size: CONFIGURATION_SIZE,
    fields: &[
        FieldSpec::new("voice_function_combine", 0, 1, 0x08, 0x01),
        FieldSpec::new("lfo_speed", 1, 127, 0x09, 0x7F),
        FieldSpec::new("amd", 1, 127, 0x0A, 0x7F),
        FieldSpec::new("pmd", 1, 127, 0x0B, 0x7F),
        FieldSpec::new("lfo_waveform_internal", 0, 3, 0x0C, 0x03),
        FieldSpec::new("kc_reception_mode", 0, 2, 0x0D, 0x03),
    ],
};

/// A configuration: the name and common settings of the device, and the
/// eight instruments laid out in the same buffer.
#[derive(Debug)]
pub struct Configuration {
    store: ParameterStore,
    endpoint: Option<Endpoint>,
    observers: Observers,
    instruments: Vec<Instrument>,
}

impl Configuration {
    /// Makes an all-zero configuration. With a link, every change is sent
    /// to the device as it happens.
    pub fn new(link: Option<Arc<DeviceLink>>) -> Self {
        Self::with_memory(link, Memory::new(CONFIGURATION_SIZE))
    }

    /// Makes a detached configuration from raw or nibble encoded bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let data = sysex::decode_payload(data, CONFIGURATION_SIZE)?;
        Ok(Self::with_memory(None, Memory::from_bytes(data)))
    }

    fn with_memory(link: Option<Arc<DeviceLink>>, memory: Memory) -> Self {
        let instruments = InstrumentNumber::all()
            .map(|number| {
                let start = INSTRUMENTS_OFFSET + number.index() as usize * INSTRUMENT_SIZE;
                Instrument::new(link.clone(), number, memory.view(start, INSTRUMENT_SIZE))
            })
            .collect();

        Self {
            store: ParameterStore::new(&CONFIGURATION_MAP, memory),
            endpoint: link.map(|link| Endpoint::bytes(link, CONFIGURATION_ADDRESS)),
            observers: Observers::default(),
            instruments,
        }
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    pub fn get(&self, name: &str) -> Result<i32> {
        self.store.get(name)
    }

    pub fn set(&mut self, name: &str, value: i32) -> Result<()> {
        let offset = self.store.set(name, value)?;
        self.push(&[offset])
    }

    pub fn min(&self, name: &str) -> Result<i32> {
        self.store.min(name)
    }

    pub fn max(&self, name: &str) -> Result<i32> {
        self.store.max(name)
    }

    fn push(&self, offsets: &[usize]) -> Result<()> {
        push_offsets(self.endpoint.as_ref(), &self.store, offsets)
    }

    pub fn name(&self) -> String {
        read_name(&self.store)
    }

    pub fn set_name(&mut self, name: &str) -> Result<()> {
        let offsets = write_name(&self.store, name);
        self.push(&offsets)
    }

    pub fn lfo_waveform(&self) -> Result<&'static str> {
        let index = self.store.get("lfo_waveform_internal")?;
        Ok(enum_name("LFO waveform", &LFO_WAVEFORMS, index))
    }

    pub fn set_lfo_waveform(&mut self, waveform: &str) -> Result<()> {
        let index = enum_index("LFO waveform", &LFO_WAVEFORMS, waveform)?;
        self.set("lfo_waveform_internal", index)
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn instruments_mut(&mut self) -> &mut [Instrument] {
        &mut self.instruments
    }

    pub fn instrument(&self, number: InstrumentNumber) -> &Instrument {
        &self.instruments[number.index() as usize]
    }

    pub fn instrument_mut(&mut self, number: InstrumentNumber) -> &mut Instrument {
        &mut self.instruments[number.index() as usize]
    }

    /// Looks up an instrument by a plain number, checking the range.
    pub fn instrument_by_number(&self, number: i32) -> Result<&Instrument> {
        let number = InstrumentNumber::try_from(number)?;
        Ok(self.instrument(number))
    }

    /// Loads the whole configuration from the device. On timeout or a
    /// malformed dump nothing changes.
    pub fn bulk_fetch(&mut self) -> Result<()> {
        let link = match &self.endpoint {
            Some(endpoint) => Arc::clone(endpoint.link()),
            None => return Err(Error::Transport("configuration is not connected to a device".to_string())),
        };
        let payload = link.bulk_dump()?;
        info!("received configuration dump of {} bytes", payload.len());
        self.replace_memory(&payload)
    }

    /// Registers a listener for wholesale replacement of the configuration.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.observers.subscribe(listener);
    }

    /// Replaces the configuration and all instrument data with a dump
    /// payload, then notifies the configuration's observers and each
    /// instrument's observers.
    pub fn replace_memory(&mut self, payload: &[u8]) -> Result<()> {
        let data = sysex::decode_payload(payload, CONFIGURATION_SIZE)?;
        self.store.memory().replace(&data)?;
        debug!("configuration \"{}\" replaced", self.name());
        self.observers.notify(&data);
        for instrument in self.instruments.iter_mut() {
            instrument.notify();
        }
        Ok(())
    }

    /// Fills every configuration and instrument field with a random legal value.
    pub fn randomize(&mut self) -> Result<()> {
        let offsets = self.store.randomize();
        self.push(&offsets)?;
        for instrument in self.instruments.iter_mut() {
            instrument.randomize()?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.store.memory().to_vec()
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new(None)
    }
}
