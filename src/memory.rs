//! Declarative bit-field register maps and the generic engine that reads and
//! writes named parameters in a byte buffer.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, trace};
use rand::Rng;

use crate::{Error, Result};

/// One named parameter: its legal range and where its bits live.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub min: i32,
    pub max: i32,
    pub offset: usize,
    pub mask: u8,
}

impl FieldSpec {
    pub const fn new(name: &'static str, min: i32, max: i32, offset: usize, mask: u8) -> Self {
        Self { name, min, max, offset, mask }
    }

    /// Number of positions the value is shifted left inside its byte.
    pub fn shift(&self) -> u32 {
        self.mask.trailing_zeros()
    }

    /// Number of bits available to the value.
    pub fn width(&self) -> u32 {
        self.mask.count_ones()
    }

    pub fn contains(&self, value: i32) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn check(&self, value: i32) -> Result<()> {
        if self.contains(value) {
            Ok(())
        }
        else {
            Err(Error::Range { name: self.name, value, min: self.min, max: self.max })
        }
    }

    /// Reads this field out of the byte that holds it.
    pub fn extract(&self, byte: u8) -> i32 {
        ((byte & self.mask) >> self.shift()) as i32
    }

    /// Returns `byte` with this field replaced by `value`, other bits kept.
    pub fn insert(&self, byte: u8, value: i32) -> u8 {
        (byte & !self.mask) | (((value as u8) << self.shift()) & self.mask)
    }
}

/// The schema of one entity type: its buffer size and its fields.
#[derive(Debug)]
pub struct RegisterMap {
    pub name: &'static str,
    pub size: usize,
    pub fields: &'static [FieldSpec],
}

impl RegisterMap {
    pub fn field(&self, name: &str) -> Result<&'static FieldSpec> {
        let fields: &'static [FieldSpec] = self.fields;
        fields.iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| Error::NoSuchField(format!("{}.{}", self.name, name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        let fields: &'static [FieldSpec] = self.fields;
        fields.iter().map(|spec| spec.name)
    }
}

/// A window into a shared byte buffer.
///
/// The root entity creates the buffer; sub-entities get disjoint views of it,
/// so writing through a view changes the parent's bytes in place.
#[derive(Clone)]
pub struct Memory {
    bytes: Arc<Mutex<Vec<u8>>>,
    start: usize,
    len: usize,
}

impl Memory {
    /// Makes a zero-filled buffer of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self::from_bytes(vec![0; size])
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        let len = data.len();
        Self { bytes: Arc::new(Mutex::new(data)), start: 0, len }
    }

    /// Makes a view of `len` bytes starting at `start`, relative to this window.
    pub fn view(&self, start: usize, len: usize) -> Memory {
        assert!(start + len <= self.len,
            "view {}..{} outside of {} byte window", start, start + len, self.len);
        Memory { bytes: Arc::clone(&self.bytes), start: self.start + start, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Locks the underlying buffer and exposes this window as a slice.
    pub fn lock(&self) -> Window<'_> {
        let guard = self.bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Window { guard, start: self.start, len: self.len }
    }

    pub fn byte(&self, offset: usize) -> u8 {
        self.lock()[offset]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.lock().to_vec()
    }

    /// Overwrites the whole window. The length must match exactly.
    pub fn replace(&self, data: &[u8]) -> Result<()> {
        if data.len() != self.len {
            return Err(Error::InvalidLength { actual: data.len(), expected: self.len });
        }
        self.lock().copy_from_slice(data);
        Ok(())
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Memory {{ start: {:#04X}, len: {:#04X}, bytes: {:02X?} }}",
            self.start, self.len, &*self.lock())
    }
}

/// A locked window; dereferences to the window's bytes.
pub struct Window<'a> {
    guard: MutexGuard<'a, Vec<u8>>,
    start: usize,
    len: usize,
}

impl Deref for Window<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard[self.start..self.start + self.len]
    }
}

impl DerefMut for Window<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard[self.start..self.start + self.len]
    }
}

/// Callbacks run around every store write.
///
/// Neither method is called while the buffer is locked, so a hook may read
/// the store it is attached to.
pub trait WriteHook: Send + Sync {
    fn before_store(&self, _field: &FieldSpec, _value: i32) {}
    fn after_store(&self, _field: &FieldSpec, _byte: u8) {}
}

/// Typed, range-checked access to the fields of one register map.
pub struct ParameterStore {
    map: &'static RegisterMap,
    memory: Memory,
    hook: Option<Arc<dyn WriteHook>>,
}

impl ParameterStore {
    pub fn new(map: &'static RegisterMap, memory: Memory) -> Self {
        debug_assert_eq!(memory.len(), map.size,
            "{} needs {} bytes", map.name, map.size);
        Self { map, memory, hook: None }
    }

    pub fn map(&self) -> &'static RegisterMap {
        self.map
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn set_hook(&mut self, hook: Option<Arc<dyn WriteHook>>) {
        self.hook = hook;
    }

    pub fn spec(&self, name: &str) -> Result<&'static FieldSpec> {
        self.map.field(name)
    }

    pub fn get(&self, name: &str) -> Result<i32> {
        let spec = self.spec(name)?;
        Ok(spec.extract(self.memory.byte(spec.offset)))
    }

    pub fn min(&self, name: &str) -> Result<i32> {
        Ok(self.spec(name)?.min)
    }

    pub fn max(&self, name: &str) -> Result<i32> {
        Ok(self.spec(name)?.max)
    }

    /// Stores `value` and returns the offset of the byte that changed.
    pub fn set(&mut self, name: &str, value: i32) -> Result<usize> {
        let offsets = self.set_many(&[(name, value)])?;
        Ok(offsets[0])
    }

    /// Validates every write first, then applies all of them under a single
    /// lock. Returns the distinct offsets touched, in write order.
    pub fn set_many(&mut self, writes: &[(&str, i32)]) -> Result<Vec<usize>> {
        let mut specs = Vec::with_capacity(writes.len());
        for &(name, value) in writes {
            let spec = self.spec(name)?;
            spec.check(value)?;
            specs.push((spec, value));
        }

        if let Some(hook) = &self.hook {
            for &(spec, value) in &specs {
                hook.before_store(spec, value);
            }
        }

        let mut offsets: Vec<usize> = Vec::with_capacity(specs.len());
        let mut stored = Vec::with_capacity(specs.len());
        {
            let mut bytes = self.memory.lock();
            for &(spec, value) in &specs {
                let byte = spec.insert(bytes[spec.offset], value);
                trace!("{}.{} = {} -> [{:#04X}] = {:#04X}",
                    self.map.name, spec.name, value, spec.offset, byte);
                bytes[spec.offset] = byte;
                stored.push((spec, byte));
                if !offsets.contains(&spec.offset) {
                    offsets.push(spec.offset);
                }
            }
        }

        if let Some(hook) = &self.hook {
            for &(spec, byte) in &stored {
                hook.after_store(spec, byte);
            }
        }

        Ok(offsets)
    }

    /// Puts a random legal value into every field.
    pub fn randomize(&mut self) -> Vec<usize> {
        let mut rng = rand::rng();
        let values: Vec<(&str, i32)> = self.map.fields.iter()
            .map(|spec| (spec.name, rng.random_range(spec.min..=spec.max)))
            .collect();
        debug!("randomizing {} fields of {}", values.len(), self.map.name);
        // Every value was drawn from its own field's range.
        self.set_many(&values).unwrap_or_default()
    }
}

impl fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ParameterStore")
            .field("map", &self.map.name)
            .field("memory", &self.memory)
            .finish()
    }
}

pub type Listener = Box<dyn FnMut(&[u8]) + Send>;

/// Listeners told about wholesale buffer replacement. They receive the new
/// contents of the entity's buffer.
#[derive(Default)]
pub struct Observers {
    listeners: Vec<Listener>,
}

impl Observers {
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn notify(&mut self, data: &[u8]) {
        for listener in self.listeners.iter_mut() {
            listener(data);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Observers({})", self.listeners.len())
    }
}
