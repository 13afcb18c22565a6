use std::sync::Arc;

use log::{debug, warn};

use crate::{Error, Result};
use crate::link::{DeviceLink, Endpoint};
use crate::memory::{FieldSpec, Memory, Observers, ParameterStore, RegisterMap};
use crate::fb01::{
    enum_index,
    enum_name,
    get_offset,
    key_name,
    key_number,
    push_offsets,
    stored_value,
    InstrumentNumber,
    KEY_COUNT,
    PMD_CONTROLLERS,
};
use crate::fb01::sysex::{self, INSTRUMENT_ADDRESS};
use crate::fb01::voice::Voice;

pub const INSTRUMENT_SIZE: usize = 0x10;

pub static INSTRUMENT_MAP: RegisterMap = RegisterMap {
    name: "instrument",
    size: INSTRUMENT_SIZE,
    fields: &[
        FieldSpec::new("notes", 0, 8, 0x00, 0x0F),
        FieldSpec::new("midi_channel_internal", 0, 15, 0x01, 0x0F),
        FieldSpec::new("upper_key_limit_internal", 0, KEY_COUNT - 1, 0x02, 0x7F),
        FieldSpec::new("lower_key_limit_internal", 0, KEY_COUNT - 1, 0x03, 0x7F),
        FieldSpec::new("voice_bank_no", 0, 6, 0x04, 0x07),
        FieldSpec::new("voice_no", 0, 47, 0x05, 0x7F),
        FieldSpec::new("detune", 0, 127, 0x06, 0x7F),
        FieldSpec::new("octave_transpose_internal", 0, 4, 0x07, 0x07),
        FieldSpec::new("output_level", 0, 127, 0x08, 0x7F),
        FieldSpec::new("pan_internal", 0, 127, 0x09, 0x7F),
        FieldSpec::new("lfo_enable", 0, 1, 0x0A, 0x01),
        FieldSpec::new("portamento_time", 0, 127, 0x0B, 0x7F),
        FieldSpec::new("pitchbender_range", 0, 12, 0x0C, 0x0F),
        FieldSpec::new("mono", 0, 1, 0x0D, 0x01),
        FieldSpec::new("pmd_controller_internal", 0, 4, 0x0E, 0x07),
    ],
};

const MIDI_CHANNEL_OFFSET: i32 = 1;
const OCTAVE_TRANSPOSE_OFFSET: i32 = -2;
const PAN_OFFSET: i32 = -64;

/// One of the eight instruments of a configuration, and the voice it plays.
#[derive(Debug)]
pub struct Instrument {
    number: InstrumentNumber,
    store: ParameterStore,
    endpoint: Option<Endpoint>,
    observers: Observers,
    voice: Voice,
}

impl Instrument {
    /// Makes instrument `number` over `memory`, which is normally a view
    /// into the configuration buffer.
    pub fn new(link: Option<Arc<DeviceLink>>, number: InstrumentNumber, memory: Memory) -> Self {
        let endpoint = link.clone()
            .map(|link| Endpoint::bytes(link, INSTRUMENT_ADDRESS + number.index()));
        Self {
            number,
            store: ParameterStore::new(&INSTRUMENT_MAP, memory),
            endpoint,
            observers: Observers::default(),
            voice: Voice::new(link, number),
        }
    }

    pub fn number(&self) -> InstrumentNumber {
        self.number
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

    fn set_offset(&mut self, name: &str, offset: i32, value: i32) -> Result<()> {
        let value = stored_value(&self.store, name, offset, value)?;
        self.set(name, value)
    }

    /// MIDI channel (1...16).
    pub fn midi_channel(&self) -> Result<i32> {
        get_offset(&self.store, "midi_channel_internal", MIDI_CHANNEL_OFFSET)
    }

    pub fn set_midi_channel(&mut self, channel: i32) -> Result<()> {
        self.set_offset("midi_channel_internal", MIDI_CHANNEL_OFFSET, channel)
    }

    pub fn min_midi_channel(&self) -> Result<i32> {
        Ok(self.store.min("midi_channel_internal")? + MIDI_CHANNEL_OFFSET)
    }

    pub fn max_midi_channel(&self) -> Result<i32> {
        Ok(self.store.max("midi_channel_internal")? + MIDI_CHANNEL_OFFSET)
    }

    /// Octave transpose (-2...2).
    pub fn octave_transpose(&self) -> Result<i32> {
        get_offset(&self.store, "octave_transpose_internal", OCTAVE_TRANSPOSE_OFFSET)
    }

    pub fn set_octave_transpose(&mut self, transpose: i32) -> Result<()> {
        self.set_offset("octave_transpose_internal", OCTAVE_TRANSPOSE_OFFSET, transpose)
    }

    pub fn min_octave_transpose(&self) -> Result<i32> {
        Ok(self.store.min("octave_transpose_internal")? + OCTAVE_TRANSPOSE_OFFSET)
    }

    pub fn max_octave_transpose(&self) -> Result<i32> {
        Ok(self.store.max("octave_transpose_internal")? + OCTAVE_TRANSPOSE_OFFSET)
    }

    /// Pan (-64...63), 0 is center.
    pub fn pan(&self) -> Result<i32> {
        get_offset(&self.store, "pan_internal", PAN_OFFSET)
    }

    pub fn set_pan(&mut self, pan: i32) -> Result<()> {
        self.set_offset("pan_internal", PAN_OFFSET, pan)
    }

    pub fn min_pan(&self) -> Result<i32> {
        Ok(self.store.min("pan_internal")? + PAN_OFFSET)
    }

    pub fn max_pan(&self) -> Result<i32> {
        Ok(self.store.max("pan_internal")? + PAN_OFFSET)
    }

    pub fn upper_key_limit(&self) -> Result<i32> {
        self.store.get("upper_key_limit_internal")
    }

    /// Sets the highest key played. The lower limit follows it down if
    /// needed, so the lower limit never exceeds the upper one.
    pub fn set_upper_key_limit(&mut self, limit: i32) -> Result<()> {
        let lower = self.lower_key_limit()?;
        let offsets = if lower > limit {
            self.store.set_many(&[
                ("upper_key_limit_internal", limit),
                ("lower_key_limit_internal", limit),
            ])?
        }
        else {
            vec![self.store.set("upper_key_limit_internal", limit)?]
        };
        self.push(&offsets)
    }

    pub fn lower_key_limit(&self) -> Result<i32> {
        self.store.get("lower_key_limit_internal")
    }

    /// Sets the lowest key played. The upper limit follows it up if needed.
    pub fn set_lower_key_limit(&mut self, limit: i32) -> Result<()> {
        let upper = self.upper_key_limit()?;
        let offsets = if upper < limit {
            self.store.set_many(&[
                ("lower_key_limit_internal", limit),
                ("upper_key_limit_internal", limit),
            ])?
        }
        else {
            vec![self.store.set("lower_key_limit_internal", limit)?]
        };
        self.push(&offsets)
    }

    pub fn min_upper_key_limit(&self) -> Result<i32> {
        self.store.min("upper_key_limit_internal")
    }

    pub fn max_upper_key_limit(&self) -> Result<i32> {
        self.store.max("upper_key_limit_internal")
    }

    pub fn min_lower_key_limit(&self) -> Result<i32> {
        self.store.min("lower_key_limit_internal")
    }

    pub fn max_lower_key_limit(&self) -> Result<i32> {
        self.store.max("lower_key_limit_internal")
    }

    pub fn upper_key_limit_name(&self) -> Result<String> {
        let limit = self.upper_key_limit()?;
        Ok(key_name(limit).unwrap_or_default())
    }

    pub fn set_upper_key_limit_name(&mut self, name: &str) -> Result<()> {
        let limit = key_number(name).ok_or_else(|| Error::UnknownKeyName(name.to_string()))?;
        self.set_upper_key_limit(limit)
    }

    pub fn lower_key_limit_name(&self) -> Result<String> {
        let limit = self.lower_key_limit()?;
        Ok(key_name(limit).unwrap_or_default())
    }

    pub fn set_lower_key_limit_name(&mut self, name: &str) -> Result<()> {
        let limit = key_number(name).ok_or_else(|| Error::UnknownKeyName(name.to_string()))?;
        self.set_lower_key_limit(limit)
    }

    pub fn pmd_controller(&self) -> Result<&'static str> {
        let index = self.store.get("pmd_controller_internal")?;
        Ok(enum_name("PMD controller", &PMD_CONTROLLERS, index))
    }

    pub fn set_pmd_controller(&mut self, controller: &str) -> Result<()> {
        let index = enum_index("PMD controller", &PMD_CONTROLLERS, controller)?;
        self.set("pmd_controller_internal", index)
    }

    pub fn voice(&self) -> &Voice {
        &self.voice
    }

    pub fn voice_mut(&mut self) -> &mut Voice {
        &mut self.voice
    }

    /// Fetches this instrument's voice from the device. If the device does
    /// not answer in time the voice keeps its current data.
    pub fn read_voice(&mut self) -> Result<()> {
        let link = match &self.endpoint {
            Some(endpoint) => Arc::clone(endpoint.link()),
            None => return Err(Error::Transport("instrument is not connected to a device".to_string())),
        };
        match link.read_voice(self.number) {
            Ok(payload) => self.voice.replace_memory(&payload),
            Err(e) => {
                warn!("reading voice of instrument {} failed: {}", self.number, e);
                Err(e)
            }
        }
    }

    /// Registers a listener for wholesale replacement of the instrument data.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.observers.subscribe(listener);
    }

    /// Replaces all instrument data with a dump payload and notifies observers.
    pub fn replace_memory(&mut self, payload: &[u8]) -> Result<()> {
        let data = sysex::decode_payload(payload, INSTRUMENT_SIZE)?;
        self.store.memory().replace(&data)?;
        self.notify();
        Ok(())
    }

    /// Tells observers the instrument's bytes were replaced from outside.
    pub(crate) fn notify(&mut self) {
        let data = self.to_bytes();
        debug!("instrument {} replaced: {:02X?}", self.number, data);
        self.observers.notify(&data);
    }

    /// Fills every field with a random legal value, keeping the key limits
    /// in order.
    pub fn randomize(&mut self) -> Result<()> {
        let offsets = self.store.randomize();
        self.push(&offsets)?;
        let lower = self.lower_key_limit()?;
        if lower > self.upper_key_limit()? {
            self.set_upper_key_limit(lower)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.store.memory().to_vec()
    }
}
