use bit::BitIndex;

use crate::Result;
use crate::link::Endpoint;
use crate::memory::{FieldSpec, Memory, ParameterStore, RegisterMap};
use crate::fb01::{push_offsets, OperatorNumber};

pub const OPERATOR_SIZE: usize = 0x08;

pub static OPERATOR_MAP: RegisterMap = RegisterMap {
    name: "operator",
    size: OPERATOR_SIZE,
    fields: &[
        FieldSpec::new("tl", 0, 127, 0x00, 0x7F),
        FieldSpec::new("scaling_internal_bit0", 0, 1, 0x01, 0x80),
        FieldSpec::new("tl_velocity_sensitivity", 0, 7, 0x01, 0x70),
        FieldSpec::new("level_scaling_depth", 0, 15, 0x02, 0xF0),
        FieldSpec::new("adjust_for_tl", 0, 15, 0x02, 0x0F),
        FieldSpec::new("scaling_internal_bit1", 0, 1, 0x03, 0x80),
        FieldSpec::new("detune", 0, 7, 0x03, 0x70),
        FieldSpec::new("detune_frequency", 0, 15, 0x03, 0x0F),
        FieldSpec::new("rate_scaling_depth", 0, 3, 0x04, 0xC0),
        FieldSpec::new("ar", 0, 31, 0x04, 0x1F),
        FieldSpec::new("carrier", 0, 1, 0x05, 0x80),
        FieldSpec::new("ar_velocity_sensitivity", 0, 3, 0x05, 0x60),
        FieldSpec::new("d1r", 0, 31, 0x05, 0x1F),
        FieldSpec::new("inharmonic_frequency", 0, 3, 0x06, 0xC0),
        FieldSpec::new("d2r", 0, 31, 0x06, 0x1F),
        FieldSpec::new("sl", 0, 15, 0x07, 0xF0),
        FieldSpec::new("rr", 0, 15, 0x07, 0x0F),
    ],
};

/// Keyboard level scaling type (0...3), stored as two bits in different bytes.
const LEVEL_SCALING_TYPE: FieldSpec = FieldSpec::new("level_scaling_type", 0, 3, 0x01, 0x03);

/// One of the four operators of a voice. Its bytes are a view into the
/// voice's buffer.
#[derive(Debug)]
pub struct Operator {
    number: OperatorNumber,
    store: ParameterStore,
    endpoint: Option<Endpoint>,
}

impl Operator {
    pub fn new(number: OperatorNumber, memory: Memory, endpoint: Option<Endpoint>) -> Self {
        Self {
            number,
            store: ParameterStore::new(&OPERATOR_MAP, memory),
            endpoint,
        }
    }

    pub fn number(&self) -> OperatorNumber {
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
        push_offsets(self.endpoint.as_ref(), &self.store, &[offset])
    }

    pub fn min(&self, name: &str) -> Result<i32> {
        self.store.min(name)
    }

    pub fn max(&self, name: &str) -> Result<i32> {
        self.store.max(name)
    }

    pub fn level_scaling_type(&self) -> Result<i32> {
        let bit0 = self.store.get("scaling_internal_bit0")?;
        let bit1 = self.store.get("scaling_internal_bit1")?;
        Ok(bit0 | (bit1 << 1))
    }

    pub fn set_level_scaling_type(&mut self, value: i32) -> Result<()> {
        LEVEL_SCALING_TYPE.check(value)?;
        let bits = value as u8;
        let offsets = self.store.set_many(&[
            ("scaling_internal_bit0", bits.bit(0) as i32),
            ("scaling_internal_bit1", bits.bit(1) as i32),
        ])?;
        push_offsets(self.endpoint.as_ref(), &self.store, &offsets)
    }

    pub fn min_level_scaling_type(&self) -> i32 {
        LEVEL_SCALING_TYPE.min
    }

    pub fn max_level_scaling_type(&self) -> i32 {
        LEVEL_SCALING_TYPE.max
    }

    pub fn randomize(&mut self) -> Result<()> {
        let offsets = self.store.randomize();
        push_offsets(self.endpoint.as_ref(), &self.store, &offsets)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.store.memory().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Ranged};

    fn operator() -> Operator {
        Operator::new(OperatorNumber::new(1), Memory::new(OPERATOR_SIZE), None)
    }

    #[test]
    fn test_every_field_round_trips() {
        let mut op = operator();
        for spec in OPERATOR_MAP.fields {
            for value in spec.min..=spec.max {
                op.set(spec.name, value).unwrap();
                assert_eq!(op.get(spec.name).unwrap(), value, "{}", spec.name);
            }
            let last = op.get(spec.name).unwrap();
            assert!(matches!(op.set(spec.name, spec.min - 1), Err(Error::Range { .. })));
            assert!(matches!(op.set(spec.name, spec.max + 1), Err(Error::Range { .. })));
            assert_eq!(op.get(spec.name).unwrap(), last);
        }
    }

    #[test]
    fn test_level_scaling_type_round_trip() {
        let mut op = operator();
        for value in 0..=3 {
            op.set_level_scaling_type(value).unwrap();
            assert_eq!(op.level_scaling_type().unwrap(), value);
            assert_eq!(op.get("scaling_internal_bit0").unwrap(), value & 0x01);
            assert_eq!(op.get("scaling_internal_bit1").unwrap(), value >> 1);
        }
    }

    #[test]
    fn test_level_scaling_type_bits() {
        let mut op = operator();
        op.set("tl_velocity_sensitivity", 5).unwrap();
        op.set("detune_frequency", 9).unwrap();
        op.set_level_scaling_type(3).unwrap();
        assert_eq!(op.to_bytes()[1], 0x80 | 0x50);
        assert_eq!(op.to_bytes()[3], 0x80 | 0x09);

        op.set_level_scaling_type(2).unwrap();
        assert_eq!(op.to_bytes()[1], 0x50);
        assert_eq!(op.to_bytes()[3], 0x89);
    }

    #[test]
    fn test_level_scaling_type_rejected_before_mutation() {
        let mut op = operator();
        op.set_level_scaling_type(1).unwrap();
        let before = op.to_bytes();
        assert!(matches!(op.set_level_scaling_type(4), Err(Error::Range { .. })));
        assert!(matches!(op.set_level_scaling_type(-1), Err(Error::Range { .. })));
        assert_eq!(op.to_bytes(), before);
        assert_eq!(op.min_level_scaling_type(), 0);
        assert_eq!(op.max_level_scaling_type(), 3);
    }

    #[test]
    fn test_randomize() {
        let mut op = operator();
        op.randomize().unwrap();
        for spec in OPERATOR_MAP.fields {
            assert!(spec.contains(op.get(spec.name).unwrap()));
        }
    }
}
