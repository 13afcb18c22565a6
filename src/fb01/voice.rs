use std::sync::Arc;

use bit::BitIndex;
use log::debug;

use crate::Result;
use crate::link::{DeviceLink, Endpoint};
use crate::memory::{FieldSpec, Memory, Observers, ParameterStore, RegisterMap};
use crate::fb01::{
    enum_index,
    enum_name,
    get_offset,
    push_offsets,
    read_name,
    stored_value,
    write_name,
    InstrumentNumber,
    OperatorNumber,
    LFO_WAVEFORMS,
    PMD_CONTROLLERS,
};
use crate::fb01::operator::{Operator, OPERATOR_SIZE};
use crate::fb01::sysex::{self, INSTRUMENT_ADDRESS, VOICE_PARAMETER_BASE};

pub const VOICE_SIZE: usize = 0x40;

/// Offset of operator 1; the others follow every `OPERATOR_SIZE` bytes.
const OPERATORS_OFFSET: usize = 0x10;

const OPERATOR_COUNT: usize = 4;

const ALGORITHM_OFFSET: i32 = 1;

pub static VOICE_MAP: RegisterMap = RegisterMap {
    name: "voice",
    size: VOICE_SIZE,
    fields: &[
        FieldSpec::new("lfo_speed", 0, 255, 0x08, 0xFF),
        FieldSpec::new("lfo_load_enable", 0, 1, 0x09, 0x80),
        FieldSpec::new("amd", 0, 127, 0x09, 0x7F),
        FieldSpec::new("lfo_sync", 0, 1, 0x0A, 0x80),
        FieldSpec::new("pmd", 0, 127, 0x0A, 0x7F),
        FieldSpec::new("operator_enable", 0, 15, 0x0B, 0x78),
        FieldSpec::new("feedback", 0, 7, 0x0C, 0x38),
        FieldSpec::new("algorithm_internal", 0, 7, 0x0C, 0x07),
        FieldSpec::new("pms", 0, 7, 0x0D, 0x70),
        FieldSpec::new("ams", 0, 3, 0x0D, 0x03),
        FieldSpec::new("lfo_waveform_internal", 0, 3, 0x0E, 0x60),
        FieldSpec::new("mono", 0, 1, 0x3A, 0x80),
        FieldSpec::new("portamento_time", 0, 127, 0x3A, 0x7F),
        FieldSpec::new("pmd_controller_internal", 0, 4, 0x3B, 0x70),
        FieldSpec::new("pitchbender_range", 0, 12, 0x3B, 0x0F),
    ],
};

/// The voice played by one instrument: 64 bytes holding a name, the common
/// voice parameters and four operators.
///
/// Voice bytes travel as nibble pairs, at the owning instrument's address.
#[derive(Debug)]
pub struct Voice {
    instrument: InstrumentNumber,
    store: ParameterStore,
    endpoint: Option<Endpoint>,
    operators: Vec<Operator>,
    observers: Observers,
}

impl Voice {
    pub fn new(link: Option<Arc<DeviceLink>>, instrument: InstrumentNumber) -> Self {
        let memory = Memory::new(VOICE_SIZE);
        let endpoint = link.map(|link| {
            Endpoint::nibbles(link, INSTRUMENT_ADDRESS + instrument.index(), VOICE_PARAMETER_BASE)
        });

        let operators: Vec<Operator> = OperatorNumber::all()
            .map(|number| {
                let start = OPERATORS_OFFSET + number.index() * OPERATOR_SIZE;
                Operator::new(
                    number,
                    memory.view(start, OPERATOR_SIZE),
                    endpoint.as_ref().map(|e| e.offset_by(start as u8)))
            })
            .collect();
        debug_assert_eq!(operators.len(), OPERATOR_COUNT);

        Self {
            instrument,
            store: ParameterStore::new(&VOICE_MAP, memory),
            endpoint,
            operators,
            observers: Default::default(),
        }
    }

    pub fn instrument(&self) -> InstrumentNumber {
        self.instrument
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

    /// Algorithm (1...8).
    pub fn algorithm(&self) -> Result<i32> {
        get_offset(&self.store, "algorithm_internal", ALGORITHM_OFFSET)
    }

    pub fn set_algorithm(&mut self, algorithm: i32) -> Result<()> {
        let value = stored_value(&self.store, "algorithm_internal", ALGORITHM_OFFSET, algorithm)?;
        self.set("algorithm_internal", value)
    }

    pub fn min_algorithm(&self) -> Result<i32> {
        Ok(self.store.min("algorithm_internal")? + ALGORITHM_OFFSET)
    }

    pub fn max_algorithm(&self) -> Result<i32> {
        Ok(self.store.max("algorithm_internal")? + ALGORITHM_OFFSET)
    }

    pub fn lfo_waveform(&self) -> Result<&'static str> {
        let index = self.store.get("lfo_waveform_internal")?;
        Ok(enum_name("LFO waveform", &LFO_WAVEFORMS, index))
    }

    pub fn set_lfo_waveform(&mut self, waveform: &str) -> Result<()> {
        let index = enum_index("LFO waveform", &LFO_WAVEFORMS, waveform)?;
        self.set("lfo_waveform_internal", index)
    }

    pub fn pmd_controller(&self) -> Result<&'static str> {
        let index = self.store.get("pmd_controller_internal")?;
        Ok(enum_name("PMD controller", &PMD_CONTROLLERS, index))
    }

    pub fn set_pmd_controller(&mut self, controller: &str) -> Result<()> {
        let index = enum_index("PMD controller", &PMD_CONTROLLERS, controller)?;
        self.set("pmd_controller_internal", index)
    }

    pub fn operator_enabled(&self, number: OperatorNumber) -> Result<bool> {
        let flags = self.store.get("operator_enable")? as u8;
        Ok(flags.bit(number.index()))
    }

    pub fn set_operator_enabled(&mut self, number: OperatorNumber, enabled: bool) -> Result<()> {
        let mut flags = self.store.get("operator_enable")? as u8;
        flags.set_bit(number.index(), enabled);
        self.set("operator_enable", flags as i32)
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub fn operator(&self, number: OperatorNumber) -> &Operator {
        &self.operators[number.index()]
    }

    pub fn operator_mut(&mut self, number: OperatorNumber) -> &mut Operator {
        &mut self.operators[number.index()]
    }

    /// Registers a listener for wholesale replacement of the voice data.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.observers.subscribe(listener);
    }

    /// Replaces all voice data with a dump payload and notifies observers.
    /// On error the voice is left as it was.
    pub fn replace_memory(&mut self, payload: &[u8]) -> Result<()> {
        let data = sysex::decode_payload(payload, VOICE_SIZE)?;
        self.store.memory().replace(&data)?;
        debug!("voice of instrument {} replaced: \"{}\"", self.instrument, self.name());
        self.observers.notify(&data);
        Ok(())
    }

    /// Fills every voice and operator field with a random legal value.
    pub fn randomize(&mut self) -> Result<()> {
        let offsets = self.store.randomize();
        self.push(&offsets)?;
        for operator in self.operators.iter_mut() {
            operator.randomize()?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.store.memory().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use crate::{Error, Ranged};
    use crate::link::mock;

    fn voice() -> Voice {
        Voice::new(None, InstrumentNumber::new(1))
    }

    #[test]
    fn test_every_field_round_trips() {
        let mut voice = voice();
        for spec in VOICE_MAP.fields {
            for value in spec.min..=spec.max {
                voice.set(spec.name, value).unwrap();
                assert_eq!(voice.get(spec.name).unwrap(), value, "{}", spec.name);
            }
            let last = voice.get(spec.name).unwrap();
            assert!(voice.set(spec.name, spec.min - 1).is_err());
            assert!(voice.set(spec.name, spec.max + 1).is_err());
            assert_eq!(voice.get(spec.name).unwrap(), last);
        }
    }

    #[test]
    fn test_algorithm_offset() {
        let mut voice = voice();
        assert_eq!(voice.min_algorithm().unwrap(), 1);
        assert_eq!(voice.max_algorithm().unwrap(), 8);
        for algorithm in 1..=8 {
            voice.set_algorithm(algorithm).unwrap();
            assert_eq!(voice.algorithm().unwrap(), algorithm);
            assert_eq!(voice.get("algorithm_internal").unwrap(), algorithm - 1);
        }
        assert_eq!(
            voice.set_algorithm(0),
            Err(Error::Range { name: "algorithm_internal", value: 0, min: 1, max: 8 }));
        assert_eq!(
            voice.set_algorithm(9),
            Err(Error::Range { name: "algorithm_internal", value: 9, min: 1, max: 8 }));
        assert_eq!(voice.algorithm().unwrap(), 8);
    }

    #[test]
    fn test_lfo_waveform() {
        let mut voice = voice();
        for name in LFO_WAVEFORMS {
            voice.set_lfo_waveform(name).unwrap();
            assert_eq!(voice.lfo_waveform().unwrap(), name);
        }
        assert!(matches!(voice.set_lfo_waveform("Sine"), Err(Error::UnknownEnumValue { .. })));
        assert_eq!(voice.lfo_waveform().unwrap(), "Sample and Hold");
    }

    #[test]
    fn test_pmd_controller() {
        let mut voice = voice();
        voice.set_pmd_controller("Breath controller").unwrap();
        assert_eq!(voice.pmd_controller().unwrap(), "Breath controller");
        assert_eq!(voice.get("pmd_controller_internal").unwrap(), 3);
    }

    #[test]
    fn test_operator_enable_flags() {
        let mut voice = voice();
        voice.set_operator_enabled(OperatorNumber::new(1), true).unwrap();
        voice.set_operator_enabled(OperatorNumber::new(4), true).unwrap();
        assert_eq!(voice.get("operator_enable").unwrap(), 0b1001);
        assert_eq!(voice.to_bytes()[0x0B], 0b1001 << 3);
        assert!(voice.operator_enabled(OperatorNumber::new(4)).unwrap());
        assert!(!voice.operator_enabled(OperatorNumber::new(2)).unwrap());

        voice.set_operator_enabled(OperatorNumber::new(1), false).unwrap();
        assert_eq!(voice.get("operator_enable").unwrap(), 0b1000);
    }

    #[test]
    fn test_operators_are_views() {
        let mut voice = voice();
        voice.operator_mut(OperatorNumber::new(2)).set("tl", 0x55).unwrap();
        assert_eq!(voice.to_bytes()[0x18], 0x55);
        assert_eq!(voice.operators().len(), OPERATOR_COUNT);
    }

    #[test]
    fn test_name() {
        let mut voice = voice();
        voice.set_name("Brass").unwrap();
        assert_eq!(voice.name(), "Brass  ");
    }

    #[test]
    fn test_pushes_nibbles() {
        let (link, sent) = mock::link(vec![]);
        let mut voice = Voice::new(Some(link), InstrumentNumber::new(2));
        voice.set("pmd", 0x23).unwrap();
        voice.operator_mut(OperatorNumber::new(1)).set("tl", 0x7F).unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0], vec![0x43, 0x75, 0x00, 0x19, 0x4A, 0x03, 0x02]);
        assert_eq!(sent[1], vec![0x43, 0x75, 0x00, 0x19, 0x50, 0x0F, 0x07]);
    }

    #[test]
    fn test_replace_memory_notifies() {
        let mut voice = voice();
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        voice.subscribe(move |data| {
            assert_eq!(data.len(), VOICE_SIZE);
            *counter.lock().unwrap() += 1;
        });

        let mut data = vec![0u8; VOICE_SIZE];
        data[..7].copy_from_slice(b"E.PIANO");
        data[0x10] = 0x33;
        voice.replace_memory(&sysex::nibblize(&data)).unwrap();

        assert_eq!(voice.name(), "E.PIANO");
        assert_eq!(voice.operator(OperatorNumber::new(1)).get("tl").unwrap(), 0x33);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_out_of_range_pmd_controller_in_dump() {
        let mut voice = voice();
        let mut data = vec![0u8; VOICE_SIZE];
        data[0x3B] = 0x50;
        voice.replace_memory(&data).unwrap();
        assert_eq!(voice.get("pmd_controller_internal").unwrap(), 5);
        assert_eq!(voice.pmd_controller().unwrap(), "Not assigned");
    }

    #[test]
    fn test_name_after_replace_sends_7_bit_bytes() {
        let (link, sent) = mock::link(vec![]);
        let mut voice = Voice::new(Some(link), InstrumentNumber::new(1));
        voice.replace_memory(&vec![0xFF; VOICE_SIZE]).unwrap();
        voice.set_name("OBOE").unwrap();

        assert_eq!(voice.name(), "OBOE   ");
        assert!(voice.to_bytes()[..7].iter().all(|b| *b < 0x80));
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 7);
        assert_eq!(sent[0], vec![0x43, 0x75, 0x00, 0x18, 0x40, 0x0F, 0x04]);
        assert!(sent.iter().flatten().all(|b| *b < 0x80));
    }

    #[test]
    fn test_replace_memory_rejects_bad_length() {
        let mut voice = voice();
        voice.set("pmd", 9).unwrap();
        let before = voice.to_bytes();
        assert!(matches!(voice.replace_memory(&[0; 10]), Err(Error::InvalidLength { .. })));
        assert_eq!(voice.to_bytes(), before);
    }

    #[test]
    fn test_randomize() {
        let mut voice = voice();
        voice.randomize().unwrap();
        for spec in VOICE_MAP.fields {
            assert!(spec.contains(voice.get(spec.name).unwrap()));
        }
    }
}
