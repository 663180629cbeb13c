//! Mock transport for testing
//!
//! Records every command it receives and answers queries from a scripted
//! table, so instrument wrappers can be exercised without hardware. It
//! provides:
//! - A shared call log (clones observe the same log)
//! - Scripted replies per query command, with a fallback reply
//! - Controllable failure injection

use super::{ResourceManager, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// One call observed by a [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `write(command)`
    Write(String),
    /// `query(command)`
    Query(String),
    /// Device clear
    Clear,
    /// Session closed
    Close,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<MockCall>,
    replies: HashMap<String, VecDeque<String>>,
    default_reply: Option<String>,
    fail_after: Option<usize>,
    closed: bool,
}

/// Mock transport for testing
///
/// # Example
///
/// ```
/// use lab_instruments::transport::{MockTransport, Transport};
///
/// # tokio_test::block_on(async {
/// let mock = MockTransport::new("GPIB0::1::INSTR");
/// mock.push_reply("*IDN?", "KEITHLEY,2230G-30-1,123,1.0");
///
/// let mut transport = mock.clone();
/// transport.write("OUTP ON").await.unwrap();
/// assert_eq!(transport.query("*IDN?").await.unwrap(), "KEITHLEY,2230G-30-1,123,1.0");
/// assert_eq!(mock.writes(), vec!["OUTP ON".to_string()]);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct MockTransport {
    resource: String,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Open mock session at `resource` with an empty log.
    pub fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A poisoned log is still a usable log.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue `reply` for the next `query(command)`. Replies for the same
    /// command are served in order.
    pub fn push_reply(&self, command: &str, reply: &str) {
        self.state()
            .replies
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
    }

    /// Reply used for queries without a queued answer.
    pub fn set_default_reply(&self, reply: &str) {
        self.state().default_reply = Some(reply.to_string());
    }

    /// Make the next operation fail with an I/O error.
    pub fn inject_next_failure(&self) {
        self.inject_failure_after(0);
    }

    /// Let `succeeding` operations through, then fail the one after.
    pub fn inject_failure_after(&self, succeeding: usize) {
        self.state().fail_after = Some(succeeding);
    }

    /// Every call seen so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    /// Only the written commands, in order.
    pub fn writes(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Write(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// Only the queried commands, in order.
    pub fn queries(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Query(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget the calls logged so far.
    pub fn clear_log(&self) {
        self.state().calls.clear();
    }

    /// Whether the current session has been closed.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Start a new session; the log and scripted replies carry over.
    fn reopen(&self) {
        self.state().closed = false;
    }

    fn record(&self, call: MockCall) -> Result<(), TransportError> {
        self.begin(call).map(drop)
    }

    fn begin(&self, call: MockCall) -> Result<MutexGuard<'_, MockState>, TransportError> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed(self.resource.clone()));
        }
        let failing = state.fail_after == Some(0);
        state.fail_after = state.fail_after.and_then(|n| n.checked_sub(1));
        if failing {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "injected failure",
            )));
        }
        state.calls.push(call);
        Ok(state)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&mut self, command: &str) -> Result<(), TransportError> {
        self.record(MockCall::Write(command.to_string()))
    }

    async fn query(&mut self, command: &str) -> Result<String, TransportError> {
        let mut state = self.begin(MockCall::Query(command.to_string()))?;
        let queued = state
            .replies
            .get_mut(command)
            .and_then(|queue| queue.pop_front());
        queued
            .or_else(|| state.default_reply.clone())
            .ok_or_else(|| TransportError::Timeout(command.to_string()))
    }

    async fn clear(&mut self) -> Result<(), TransportError> {
        self.record(MockCall::Clear)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.begin(MockCall::Close)?.closed = true;
        Ok(())
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

/// Resource manager handing out [`MockTransport`]s registered in advance.
#[derive(Debug, Clone, Default)]
pub struct MockResourceManager {
    resources: Arc<Mutex<Vec<MockTransport>>>,
}

impl MockResourceManager {
    /// Manager with no resources attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource; returns the handle tests can inspect later.
    pub fn add(&self, resource: &str) -> MockTransport {
        let mock = MockTransport::new(resource);
        self.resources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(mock.clone());
        mock
    }
}

#[async_trait]
impl ResourceManager for MockResourceManager {
    async fn open(&self, resource: &str) -> Result<Box<dyn Transport>, TransportError> {
        let resources = self.resources.lock().unwrap_or_else(|e| e.into_inner());
        let mock = resources
            .iter()
            .find(|mock| mock.resource == resource)
            .ok_or_else(|| TransportError::Connection {
                resource: resource.to_string(),
                reason: "no such resource".to_string(),
            })?;
        mock.reopen();
        Ok(Box::new(mock.clone()))
    }

    async fn list_resources(&self) -> Result<Vec<String>, TransportError> {
        let resources = self.resources.lock().unwrap_or_else(|e| e.into_inner());
        Ok(resources.iter().map(|mock| mock.resource.clone()).collect())
    }
}
