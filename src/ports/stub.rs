//! In-memory MIDI backend
//!
//! Used by the test suites and handy for running the server on machines without MIDI
//! hardware. Inputs are fed through channels handed out by [`StubPorts::input_feed`];
//! everything sent to an output is recorded and can be read back with [`StubPorts::sent`].

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{resolve_port_name, InputStream, MidiPorts, OutputPort};
use crate::error::PortError;
use crate::midi::MidiMessage;

/// A message recorded by a stub output: (port name, message)
pub type SentMessage = (String, MidiMessage);

#[derive(Default)]
pub struct StubPorts {
    inputs: Vec<String>,
    outputs: Vec<String>,
    failing_open: HashSet<String>,
    fail_send_after: Option<usize>,
    fail_enumeration: bool,
    feeds: Mutex<HashMap<String, Receiver<MidiMessage>>>,
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

impl StubPorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = names.into_iter().map(Into::into).collect();
        self
    }

    /// Opening this port (input or output) fails with a connect error
    pub fn failing_open(mut self, name: impl Into<String>) -> Self {
        self.failing_open.insert(name.into());
        self
    }

    /// Every output accepts `count` messages in total, then fails
    pub fn failing_send_after(mut self, count: usize) -> Self {
        self.fail_send_after = Some(count);
        self
    }

    /// Enumeration returns a backend error
    pub fn failing_enumeration(mut self) -> Self {
        self.fail_enumeration = true;
        self
    }

    /// Sender feeding the next stream opened on input `name`
    ///
    /// Dropping the sender ends that stream. Inputs opened without a feed end at once.
    pub fn input_feed(&self, name: &str) -> Sender<MidiMessage> {
        let (tx, rx) = unbounded();
        self.feeds.lock().insert(name.to_string(), rx);
        tx
    }

    /// Everything sent to any output so far
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    fn check_enumeration(&self) -> Result<(), PortError> {
        if self.fail_enumeration {
            return Err(PortError::Backend("stub enumeration failure".to_string()));
        }
        Ok(())
    }

    fn check_open(&self, name: &str) -> Result<(), PortError> {
        if self.failing_open.contains(name) {
            return Err(PortError::Connect {
                port: name.to_string(),
                reason: "stub open failure".to_string(),
            });
        }
        Ok(())
    }
}

impl MidiPorts for StubPorts {
    fn input_names(&self) -> Result<Vec<String>, PortError> {
        self.check_enumeration()?;
        Ok(self.inputs.clone())
    }

    fn output_names(&self) -> Result<Vec<String>, PortError> {
        self.check_enumeration()?;
        Ok(self.outputs.clone())
    }

    fn open_input(&self, name: &str) -> Result<InputStream, PortError> {
        let index = resolve_port_name(&self.inputs, name)
            .ok_or_else(|| PortError::InputNotFound(name.to_string()))?;
        let port = &self.inputs[index];
        self.check_open(port)?;

        let rx = match self.feeds.lock().remove(port) {
            Some(rx) => rx,
            None => unbounded().1,
        };
        Ok(InputStream::from_receiver(rx))
    }

    fn open_output(&self, name: &str) -> Result<Box<dyn OutputPort>, PortError> {
        let index = resolve_port_name(&self.outputs, name)
            .ok_or_else(|| PortError::OutputNotFound(name.to_string()))?;
        let port = &self.outputs[index];
        self.check_open(port)?;

        Ok(Box::new(StubOutput {
            name: port.clone(),
            sent: self.sent.clone(),
            fail_after: self.fail_send_after,
        }))
    }
}

struct StubOutput {
    name: String,
    sent: Arc<Mutex<Vec<SentMessage>>>,
    fail_after: Option<usize>,
}

impl OutputPort for StubOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, message: &MidiMessage) -> Result<(), PortError> {
        let mut sent = self.sent.lock();
        if self.fail_after.is_some_and(|limit| sent.len() >= limit) {
            return Err(PortError::Send {
                port: self.name.clone(),
                reason: "stub send failure".to_string(),
            });
        }
        sent.push((self.name.clone(), message.clone()));
        Ok(())
    }
}
