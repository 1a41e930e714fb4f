//! Round-robin pool of provider addresses for one method.

use patchbay_wire::HostAddress;

/// Ordered provider list with a rotating cursor. Not internally locked; the
/// owning map's mutex serializes reads with add/remove.
#[derive(Default)]
pub(crate) struct HostPool {
    hosts: Vec<HostAddress>,
    cursor: usize,
}

impl HostPool {
    pub(crate) fn new(hosts: Vec<HostAddress>) -> Self {
        let mut pool = Self {
            hosts: Vec::new(),
            cursor: 0,
        };
        for host in hosts {
            pool.add(host);
        }
        pool
    }

    /// Next host in rotation; `None` when the pool is empty.
    pub(crate) fn next(&mut self) -> Option<HostAddress> {
        if self.hosts.is_empty() {
            return None;
        }
        let host = self.hosts[self.cursor % self.hosts.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);
        Some(host)
    }

    /// Adds a host; an address already pooled is not duplicated, so a later
    /// removal leaves no stale entry behind.
    pub(crate) fn add(&mut self, host: HostAddress) {
        if !self.hosts.contains(&host) {
            self.hosts.push(host);
        }
    }

    /// Removes the first matching entry, scanning linearly.
    pub(crate) fn remove(&mut self, host: &HostAddress) -> bool {
        match self.hosts.iter().position(|candidate| candidate == host) {
            Some(index) => {
                self.hosts.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn contains(&self, host: &HostAddress) -> bool {
        self.hosts.contains(host)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
