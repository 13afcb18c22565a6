//! MIDI transport backed by `midir`.

use std::sync::mpsc;
use std::time::Duration;

use log::{debug, info};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use crate::{Error, Result};
use crate::link::{DeviceLink, LinkConfig, Receiver, Sender};
use crate::fb01::sysex::{SYSEX_END, SYSEX_START};

const CLIENT_NAME: &str = "fb01";

fn transport_error(e: impl std::fmt::Display) -> Error {
    Error::Transport(e.to_string())
}

/// Sends System Exclusive messages to a MIDI output port.
#[derive(Default)]
pub struct MidirSender {
    connection: Option<MidiOutputConnection>,
}

impl MidirSender {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Sender for MidirSender {
    fn ports(&self) -> Vec<String> {
        match MidiOutput::new(CLIENT_NAME) {
            Ok(output) => output.ports()
                .iter()
                .filter_map(|port| output.port_name(port).ok())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn open_port(&mut self, device: &str) -> Result<()> {
        let output = MidiOutput::new(CLIENT_NAME).map_err(transport_error)?;
        let port = output.ports()
            .into_iter()
            .find(|port| output.port_name(port).map(|name| name == device).unwrap_or(false))
            .ok_or_else(|| Error::Transport(format!("no MIDI output named \"{}\"", device)))?;
        let connection = output.connect(&port, CLIENT_NAME).map_err(transport_error)?;
        self.connection = Some(connection);
        info!("MIDI output \"{}\" connected", device);
        Ok(())
    }

    fn sysex(&mut self, message: &[u8]) -> Result<()> {
        let connection = self.connection.as_mut()
            .ok_or_else(|| Error::Transport("MIDI output is not open".to_string()))?;
        let mut framed = Vec::with_capacity(message.len() + 2);
        framed.push(SYSEX_START);
        framed.extend_from_slice(message);
        framed.push(SYSEX_END);
        connection.send(&framed).map_err(transport_error)
    }
}

/// Collects raw bytes from a MIDI input port, System Exclusive included.
#[derive(Default)]
pub struct MidirReceiver {
    connection: Option<MidiInputConnection<()>>,
    incoming: Option<mpsc::Receiver<Vec<u8>>>,
}

impl MidirReceiver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Receiver for MidirReceiver {
    fn open_port(&mut self, device: &str) -> Result<()> {
        let mut input = MidiInput::new(CLIENT_NAME).map_err(transport_error)?;
        input.ignore(Ignore::TimeAndActiveSense);
        let port = input.ports()
            .into_iter()
            .find(|port| input.port_name(port).map(|name| name == device).unwrap_or(false))
            .ok_or_else(|| Error::Transport(format!("no MIDI input named \"{}\"", device)))?;

        let (tx, rx) = mpsc::channel();
        let connection = input
            .connect(
                &port,
                CLIENT_NAME,
                move |_stamp, message, _| {
                    // The receiving side is gone once the link is dropped.
                    let _ = tx.send(message.to_vec());
                },
                (),
            )
            .map_err(transport_error)?;

        self.connection = Some(connection);
        self.incoming = Some(rx);
        info!("MIDI input \"{}\" connected", device);
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let incoming = self.incoming.as_ref()
            .ok_or_else(|| Error::Transport("MIDI input is not open".to_string()))?;
        match incoming.recv_timeout(timeout) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                debug!("MIDI input closed");
                Err(Error::Transport("MIDI input closed".to_string()))
            }
        }
    }
}

/// Opens `device` in both directions and wraps it in a link.
pub fn connect(device: &str, config: LinkConfig) -> Result<DeviceLink> {
    let link = DeviceLink::with_config(
        Box::new(MidirSender::new()),
        Box::new(MidirReceiver::new()),
        config);
    link.open(device)?;
    Ok(link)
}
