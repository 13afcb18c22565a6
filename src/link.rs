//! The connection to a device: transport capabilities, the shared link that
//! serializes every exchange, and per-entity push endpoints.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::{Error, Result, Ranged};
use crate::fb01::{InstrumentNumber, SystemChannel};
use crate::fb01::sysex::{self, Capture};

/// Outgoing half of a MIDI connection.
pub trait Sender: Send {
    /// Names of the ports that can be opened.
    fn ports(&self) -> Vec<String> {
        Vec::new()
    }

    fn open_port(&mut self, device: &str) -> Result<()>;

    /// Sends one System Exclusive message. `message` holds the bytes between
    /// F0 and F7; framing them is up to the transport.
    fn sysex(&mut self, message: &[u8]) -> Result<()>;
}

/// Incoming half of a MIDI connection.
pub trait Receiver: Send {
    fn open_port(&mut self, device: &str) -> Result<()>;

    /// Waits at most `timeout` for the next chunk of raw bytes.
    /// Returns `Ok(None)` if nothing arrived in time.
    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

/// Settings of a device link.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LinkConfig {
    pub system_channel: SystemChannel,
    /// Upper bound on waiting for a dump.
    pub timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            system_channel: SystemChannel::default(),
            timeout: Duration::from_secs(2),
        }
    }
}

struct Transport {
    sender: Box<dyn Sender>,
    receiver: Box<dyn Receiver>,
}

/// A connection to one FB-01.
///
/// Shared by reference between all entities that push updates. The
/// transport is locked for the whole of each exchange, so pushes and
/// dump captures never interleave on the wire.
pub struct DeviceLink {
    transport: Mutex<Transport>,
    system_channel: AtomicI32,
    timeout: Duration,
}

impl DeviceLink {
    pub fn new(sender: Box<dyn Sender>, receiver: Box<dyn Receiver>) -> Self {
        Self::with_config(sender, receiver, LinkConfig::default())
    }

    pub fn with_config(sender: Box<dyn Sender>, receiver: Box<dyn Receiver>, config: LinkConfig) -> Self {
        Self {
            transport: Mutex::new(Transport { sender, receiver }),
            system_channel: AtomicI32::new(config.system_channel.value()),
            timeout: config.timeout,
        }
    }

    fn transport(&self) -> MutexGuard<'_, Transport> {
        self.transport.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn devices(&self) -> Vec<String> {
        self.transport().sender.ports()
    }

    /// Opens both directions of `device`.
    pub fn open(&self, device: &str) -> Result<()> {
        let mut transport = self.transport();
        transport.sender.open_port(device)?;
        transport.receiver.open_port(device)?;
        info!("opened MIDI device \"{}\"", device);
        Ok(())
    }

    /// Channels a device can be set to listen on.
    pub fn channels(&self) -> std::ops::RangeInclusive<i32> {
        SystemChannel::FIRST..=SystemChannel::LAST
    }

    pub fn system_channel(&self) -> SystemChannel {
        SystemChannel::new(self.system_channel.load(Ordering::SeqCst))
    }

    pub fn set_system_channel(&self, channel: i32) -> Result<()> {
        let channel = SystemChannel::try_from(channel)?;
        self.system_channel.store(channel.value(), Ordering::SeqCst);
        debug!("system channel set to {}", channel);
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends a raw System Exclusive message.
    pub fn sysex(&self, message: &[u8]) -> Result<()> {
        debug!("-> {:02X?}", message);
        self.transport().sender.sysex(message)
    }

    /// Sets one byte of configuration or instrument memory.
    pub fn push(&self, address: u8, offset: u8, value: u8) -> Result<()> {
        self.sysex(&sysex::parameter_change(self.system_channel(), address, offset, value))
    }

    /// Sets one byte of voice memory, sent as two nibbles.
    pub fn push_nibbles(&self, address: u8, offset: u8, value: u8) -> Result<()> {
        self.sysex(&sysex::voice_parameter_change(self.system_channel(), address, offset, value))
    }

    /// Requests the configuration memory and returns the dump payload.
    /// Bytes ahead of the dump, such as active sensing, are skipped.
    pub fn bulk_dump(&self) -> Result<Vec<u8>> {
        let channel = self.system_channel();
        let request = sysex::configuration_dump_request(channel);
        let header = sysex::configuration_dump_header(channel);
        self.exchange(&request, Capture::matching(header))
    }

    /// Requests the voice of one instrument and returns the dump payload.
    /// Unrelated messages arriving meanwhile are skipped.
    pub fn read_voice(&self, instrument: InstrumentNumber) -> Result<Vec<u8>> {
        let channel = self.system_channel();
        let request = sysex::voice_dump_request(channel, instrument);
        let header = sysex::voice_dump_header(channel, instrument);
        self.exchange(&request, Capture::matching(header))
    }

    fn exchange(&self, request: &[u8], mut capture: Capture) -> Result<Vec<u8>> {
        let mut transport = self.transport();
        debug!("-> {:02X?}", request);
        transport.sender.sysex(request)?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!("no complete answer to {:02X?} after {:?} ({} bytes captured)",
                    request, self.timeout, capture.len());
                return Err(Error::DeviceTimeout(self.timeout));
            }
            if let Some(chunk) = transport.receiver.receive(deadline - now)? {
                debug!("<- {:02X?}", chunk);
                if capture.feed(&chunk) {
                    break;
                }
                if let Some(size) = capture.stated_size() {
                    debug!("dump size = {:#04X}, have {} bytes", size, capture.len());
                }
            }
        }

        capture.into_payload().ok_or(Error::DeviceTimeout(self.timeout))
    }
}

impl fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DeviceLink")
            .field("system_channel", &self.system_channel())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Where an entity sends its single-byte updates.
#[derive(Debug, Clone)]
pub struct Endpoint {
    link: Arc<DeviceLink>,
    address: u8,
    base: u8,
    nibbles: bool,
}

impl Endpoint {
    /// Bytes go out as they are, at `address`.
    pub fn bytes(link: Arc<DeviceLink>, address: u8) -> Self {
        Self { link, address, base: 0, nibbles: false }
    }

    /// Bytes go out as nibble pairs, at `address`, parameter `base + offset`.
    pub fn nibbles(link: Arc<DeviceLink>, address: u8, base: u8) -> Self {
        Self { link, address, base, nibbles: true }
    }

    /// The same endpoint, for a sub-entity starting `delta` bytes further in.
    pub fn offset_by(&self, delta: u8) -> Self {
        Self { base: self.base + delta, ..self.clone() }
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    pub fn push(&self, offset: usize, value: u8) -> Result<()> {
        let parameter = self.base + offset as u8;
        if self.nibbles {
            self.link.push_nibbles(self.address, parameter, value)
        }
        else {
            self.link.push(self.address, parameter, value)
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;

    pub(crate) type Sent = Arc<Mutex<Vec<Vec<u8>>>>;

    pub(crate) struct MockSender {
        pub sent: Sent,
        pub fail: bool,
    }

    impl Sender for MockSender {
        fn ports(&self) -> Vec<String> {
            vec!["FB-01".to_string()]
        }

        fn open_port(&mut self, device: &str) -> Result<()> {
            if device == "FB-01" {
                Ok(())
            }
            else {
                Err(Error::Transport(format!("no port named {}", device)))
            }
        }

        fn sysex(&mut self, message: &[u8]) -> Result<()> {
            if self.fail {
                return Err(Error::Transport("cable unplugged".to_string()));
            }
            self.sent.lock().unwrap().push(message.to_vec());
            Ok(())
        }
    }

    /// Replays scripted chunks, then stays silent.
    pub(crate) struct MockReceiver {
        pub chunks: VecDeque<Vec<u8>>,
    }

    impl Receiver for MockReceiver {
        fn open_port(&mut self, _device: &str) -> Result<()> {
            Ok(())
        }

        fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
            match self.chunks.pop_front() {
                Some(chunk) => Ok(Some(chunk)),
                None => {
                    std::thread::sleep(timeout.min(Duration::from_millis(5)));
                    Ok(None)
                }
            }
        }
    }

    pub(crate) fn link(chunks: Vec<Vec<u8>>) -> (Arc<DeviceLink>, Sent) {
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));
        let sender = MockSender { sent: sent.clone(), fail: false };
        let receiver = MockReceiver { chunks: chunks.into() };
        let config = LinkConfig { timeout: Duration::from_millis(50), ..LinkConfig::default() };
        (Arc::new(DeviceLink::with_config(Box::new(sender), Box::new(receiver), config)), sent)
    }

    pub(crate) fn failing_link() -> Arc<DeviceLink> {
        let sender = MockSender { sent: Arc::new(Mutex::new(Vec::new())), fail: true };
        let receiver = MockReceiver { chunks: VecDeque::new() };
        Arc::new(DeviceLink::new(Box::new(sender), Box::new(receiver)))
    }
}
