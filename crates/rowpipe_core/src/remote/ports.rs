use std::ops::Range;

use hashbrown::HashSet;
use parking_lot::Mutex;
use rowpipe_error::{ErrorKind, RowpipeError, Result};

/// Ports used by the remote output servers of this process.
///
/// A port is reserved for as long as a server is listening on it and returned
/// to the pool when the server is torn down.
#[derive(Debug, Default)]
pub struct PortPool {
    state: Mutex<PortPoolState>,
}

#[derive(Debug, Default)]
struct PortPoolState {
    /// Range ports are allocated from, if any.
    range: Option<Range<u16>>,
    in_use: HashSet<u16>,
}

impl PortPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool allocating ports from `range`.
    pub fn with_range(range: Range<u16>) -> Self {
        PortPool {
            state: Mutex::new(PortPoolState {
                range: Some(range),
                in_use: HashSet::new(),
            }),
        }
    }

    /// Mark `port` as in use.
    pub fn reserve(&self, port: u16) -> Result<()> {
        let mut state = self.state.lock();
        if !state.in_use.insert(port) {
            return Err(RowpipeError::new("Port is already in use by another remote output")
                .with_kind(ErrorKind::ChannelIo)
                .with_field("port", port));
        }
        Ok(())
    }

    /// Return `port` to the pool.
    pub fn release(&self, port: u16) {
        self.state.lock().in_use.remove(&port);
    }

    /// Reserve and return the lowest free port in the configured range.
    pub fn allocate(&self) -> Result<u16> {
        let mut state = self.state.lock();
        let range = state.range.clone().ok_or_else(|| {
            RowpipeError::new("Port pool has no range to allocate from")
                .with_kind(ErrorKind::InvalidConfig)
        })?;

        for port in range.clone() {
            if state.in_use.insert(port) {
                return Ok(port);
            }
        }

        Err(RowpipeError::new("No free ports left in port pool")
            .with_kind(ErrorKind::ChannelIo)
            .with_field("start", range.start)
            .with_field("end", range.end))
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        self.state.lock().in_use.contains(&port)
    }
}
