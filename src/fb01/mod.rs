//! The FB-01 parameter hierarchy: one configuration with eight instruments,
//! each instrument playing one voice of four operators.

use log::warn;

use crate::{Error, Result, Ranged};
use crate::link::Endpoint;
use crate::memory::ParameterStore;

pub mod configuration;
pub mod instrument;
pub mod voice;
pub mod operator;
pub mod sysex;

pub use configuration::Configuration;
pub use instrument::Instrument;
pub use voice::Voice;
pub use operator::Operator;

/// LFO waveforms in stored order.
pub const LFO_WAVEFORMS: [&str; 4] = ["Sawtooth", "Square", "Triangle", "Sample and Hold"];

/// PMD controller sources in stored order.
pub const PMD_CONTROLLERS: [&str; 5] = [
    "Not assigned",
    "After touch",
    "Modulation wheel",
    "Breath controller",
    "Foot controller",
];

/// Length of configuration and voice names.
pub const NAME_LENGTH: usize = 7;

/// Number of key names, C-2 ... G8.
pub const KEY_COUNT: i32 = 128;

const TONES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "H"];

/// System channel (1...16), transmitted as 0...15.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SystemChannel(i32);

crate::ranged_impl!(SystemChannel, "system_channel", 1, 16, 1);

impl SystemChannel {
    /// The 0-based channel used on the wire.
    pub fn as_byte(&self) -> u8 {
        (self.0 - 1) as u8
    }
}

/// Instrument number (1...8).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct InstrumentNumber(i32);

crate::ranged_impl!(InstrumentNumber, "instrument", 1, 8, 1);

impl InstrumentNumber {
    /// 0-based index, as used in device addresses.
    pub fn index(&self) -> u8 {
        (self.0 - 1) as u8
    }

    pub fn all() -> impl Iterator<Item = InstrumentNumber> {
        (Self::FIRST..=Self::LAST).map(InstrumentNumber)
    }
}

/// Operator number (1...4).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct OperatorNumber(i32);

crate::ranged_impl!(OperatorNumber, "operator", 1, 4, 1);

impl OperatorNumber {
    pub fn index(&self) -> usize {
        (self.0 - 1) as usize
    }

    pub fn all() -> impl Iterator<Item = OperatorNumber> {
        (Self::FIRST..=Self::LAST).map(OperatorNumber)
    }
}

/// Name of key `number`, e.g. 60 is "C3".
pub fn key_name(number: i32) -> Option<String> {
    if !(0..KEY_COUNT).contains(&number) {
        return None;
    }
    Some(format!("{}{}", TONES[(number % 12) as usize], number / 12 - 2))
}

/// Number of the key called `name`.
pub fn key_number(name: &str) -> Option<i32> {
    (0..KEY_COUNT).find(|&n| key_name(n).as_deref() == Some(name))
}

pub fn key_names() -> Vec<String> {
    (0..KEY_COUNT).filter_map(key_name).collect()
}

/// Position of `name` in `list`, or an `UnknownEnumValue` error.
pub(crate) fn enum_index(kind: &'static str, list: &[&str], name: &str) -> Result<i32> {
    list.iter()
        .position(|item| *item == name)
        .map(|index| index as i32)
        .ok_or_else(|| Error::UnknownEnumValue { kind, value: name.to_string() })
}

/// Name of stored enum value `index`. Dump data may hold values past the end
/// of the list; those read as the first entry.
pub(crate) fn enum_name(kind: &'static str, list: &[&'static str], index: i32) -> &'static str {
    match usize::try_from(index).ok().and_then(|i| list.get(i)) {
        Some(name) => *name,
        None => {
            warn!("{} out of range: {}, using \"{}\"", kind, index, list[0]);
            list[0]
        }
    }
}

/// Reads field `name` with `offset` added.
pub(crate) fn get_offset(store: &ParameterStore, name: &str, offset: i32) -> Result<i32> {
    Ok(store.get(name)? + offset)
}

/// Checks `value` against the range of `name` as seen with `offset` added,
/// and returns the value to store.
pub(crate) fn stored_value(store: &ParameterStore, name: &str, offset: i32, value: i32) -> Result<i32> {
    let spec = store.spec(name)?;
    if !spec.contains(value - offset) {
        return Err(Error::Range {
            name: spec.name,
            value,
            min: spec.min + offset,
            max: spec.max + offset,
        });
    }
    Ok(value - offset)
}

/// Reads the 7-bit ASCII name from the start of the store's buffer.
pub(crate) fn read_name(store: &ParameterStore) -> String {
    let bytes = store.memory().lock();
    bytes[..NAME_LENGTH].iter().map(|b| (b & 0x7F) as char).collect()
}

/// Writes a space padded name, returning the offsets written.
pub(crate) fn write_name(store: &ParameterStore, name: &str) -> Vec<usize> {
    let mut padded: Vec<u8> = name.chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .take(NAME_LENGTH)
        .collect();
    padded.resize(NAME_LENGTH, b' ');

    let mut bytes = store.memory().lock();
    for (offset, c) in padded.iter().enumerate() {
        bytes[offset] = c & 0x7F;
    }
    (0..NAME_LENGTH).collect()
}

/// Sends the current value of each byte in `offsets` to the device, if the
/// entity is attached to one.
pub(crate) fn push_offsets(endpoint: Option<&Endpoint>, store: &ParameterStore, offsets: &[usize]) -> Result<()> {
    if let Some(endpoint) = endpoint {
        for &offset in offsets {
            endpoint.push(offset, store.memory().byte(offset))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FieldSpec, Memory, RegisterMap};

    #[test]
    fn test_key_names() {
        assert_eq!(key_name(0).unwrap(), "C-2");
        assert_eq!(key_name(1).unwrap(), "C#-2");
        assert_eq!(key_name(11).unwrap(), "H-2");
        assert_eq!(key_name(60).unwrap(), "C3");
        assert_eq!(key_name(127).unwrap(), "G8");
        assert_eq!(key_name(128), None);
        assert_eq!(key_name(-1), None);
        assert_eq!(key_names().len(), 128);
    }

    #[test]
    fn test_enum_name_out_of_range() {
        assert_eq!(enum_name("PMD controller", &PMD_CONTROLLERS, 4), "Foot controller");
        assert_eq!(enum_name("PMD controller", &PMD_CONTROLLERS, 5), "Not assigned");
        assert_eq!(enum_name("PMD controller", &PMD_CONTROLLERS, 7), "Not assigned");
        assert_eq!(enum_name("LFO waveform", &LFO_WAVEFORMS, -1), "Sawtooth");
    }

    #[test]
    fn test_key_numbers() {
        for n in 0..KEY_COUNT {
            assert_eq!(key_number(&key_name(n).unwrap()), Some(n));
        }
        assert_eq!(key_number("H8"), None);
        assert_eq!(key_number("B3"), None);
    }

    #[test]
    fn test_enum_index() {
        assert_eq!(enum_index("LFO waveform", &LFO_WAVEFORMS, "Triangle").unwrap(), 2);
        assert_eq!(
            enum_index("LFO waveform", &LFO_WAVEFORMS, "Sine"),
            Err(Error::UnknownEnumValue { kind: "LFO waveform", value: "Sine".to_string() }));
    }

    #[test]
    fn test_system_channel_on_the_wire() {
        assert_eq!(SystemChannel::new(1).as_byte(), 0);
        assert_eq!(SystemChannel::new(16).as_byte(), 15);
        assert!(SystemChannel::try_from(0).is_err());
        assert!(SystemChannel::try_from(17).is_err());
        assert_eq!(SystemChannel::default().value(), 1);
    }

    #[test]
    fn test_random_numbers_in_range() {
        for _ in 0..20 {
            assert!(InstrumentNumber::contains(InstrumentNumber::random().value()));
            assert!(OperatorNumber::contains(OperatorNumber::random().value()));
        }
    }

    #[test]
    fn test_numbers() {
        assert_eq!(InstrumentNumber::all().count(), 8);
        assert_eq!(InstrumentNumber::new(8).index(), 7);
        assert_eq!(OperatorNumber::all().map(|n| n.index()).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_register_maps_well_formed() {
        let maps = [
            &configuration::CONFIGURATION_MAP,
            &instrument::INSTRUMENT_MAP,
            &voice::VOICE_MAP,
            &operator::OPERATOR_MAP,
        ];
        for map in maps {
            let mut seen = Vec::new();
            for spec in map.fields {
                let run = (spec.mask >> spec.shift()) as u16;
                assert!(spec.mask != 0 && (run & (run + 1)) == 0,
                    "{}.{}: mask not contiguous", map.name, spec.name);
                assert!(0 <= spec.min && spec.min <= spec.max, "{}.{}", map.name, spec.name);
                assert!(spec.max < (1 << spec.width()), "{}.{}: max does not fit", map.name, spec.name);
                assert!(spec.offset < map.size, "{}.{}: outside buffer", map.name, spec.name);
                assert!(!seen.contains(&spec.name), "{}.{} declared twice", map.name, spec.name);
                seen.push(spec.name);
            }
        }
    }

    #[test]
    fn test_fields_clear_of_names() {
        // Names occupy bytes 0...6 of configurations and voices.
        for spec in configuration::CONFIGURATION_MAP.fields.iter().chain(voice::VOICE_MAP.fields) {
            assert!(spec.offset >= NAME_LENGTH, "{} overlaps the name", spec.name);
        }
    }

    static NAMED: RegisterMap = RegisterMap {
        name: "named",
        size: 8,
        fields: &[FieldSpec::new("x", 0, 1, 7, 0x01)],
    };

    #[test]
    fn test_name_round_trip() {
        let store = ParameterStore::new(&NAMED, Memory::new(8));
        write_name(&store, "PIANO");
        assert_eq!(read_name(&store), "PIANO  ");
        write_name(&store, "TOO LONG NAME");
        assert_eq!(read_name(&store), "TOO LON");
        assert_eq!(store.memory().byte(7), 0);
    }

    #[test]
    fn test_name_clears_high_bit() {
        let store = ParameterStore::new(&NAMED, Memory::from_bytes(vec![0xFF; 8]));
        write_name(&store, "AB");
        assert_eq!(&store.memory().to_vec()[..7], b"AB     ");
        assert_eq!(store.memory().byte(7), 0xFF);
    }

    #[test]
    fn test_offset_ranges() {
        let mut store = ParameterStore::new(&NAMED, Memory::new(8));
        assert_eq!(stored_value(&store, "x", 1, 2).unwrap(), 1);
        assert_eq!(
            stored_value(&store, "x", 1, 0),
            Err(Error::Range { name: "x", value: 0, min: 1, max: 2 }));
        store.set("x", 1).unwrap();
        assert_eq!(get_offset(&store, "x", 1).unwrap(), 2);
    }
}
