use parking_lot::Mutex;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("no free port in {start}-{end}")]
    Exhausted { start: u16, end: u16 },
}

/// Exclusive host-port allocation over an inclusive range.
///
/// The pool is the only owner of port state. Ports are handed out lowest
/// first and become available again on [`release`](PortPool::release).
#[derive(Debug)]
pub struct PortPool {
    start: u16,
    end: u16,
    in_use: Mutex<BTreeSet<u16>>,
}

impl PortPool {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            in_use: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn acquire(&self) -> Result<u16, PortError> {
        let mut in_use = self.in_use.lock();
        let port = (self.start..=self.end)
            .find(|p| !in_use.contains(p))
            .ok_or(PortError::Exhausted {
                start: self.start,
                end: self.end,
            })?;
        in_use.insert(port);
        Ok(port)
    }

    /// Return a port to the pool. Releasing a free port is a no-op.
    pub fn release(&self, port: u16) -> bool {
        self.in_use.lock().remove(&port)
    }

    pub fn in_use(&self) -> Vec<u16> {
        self.in_use.lock().iter().copied().collect()
    }

    pub fn capacity(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            usize::from(self.end - self.start) + 1
        }
    }
}
