//! Native journald datagram protocol.
//!
//! Entries are sent to the journal socket as `KEY=value` lines; a value
//! containing a newline is encoded in the length-prefixed binary form the
//! protocol defines for that case.

use std::collections::HashMap;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::Path;

/// The journal's datagram socket.
pub const JOURNAL_SOCKET: &str = "/run/systemd/journal/socket";

/// Syslog priority recorded with each entry.
///
/// The journal rate-limits each priority level separately, which is why
/// daemon-synthesized events are sent at a different level than container
/// output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Priority {
    /// Error conditions (container stderr).
    Err = 3,
    /// Warnings (daemon-synthesized events).
    Warning = 4,
    /// Informational (container stdout).
    Info = 6,
}

/// Sink accepting journal entries; implemented by [`Journal`] and by
/// recording fakes in tests.
pub(crate) trait JournalWriter: Send + Sync {
    /// Send one entry with the given message body, priority, and fields.
    fn send(
        &self,
        message: &str,
        priority: Priority,
        vars: &HashMap<String, String>,
    ) -> io::Result<()>;
}

/// A connection to the host journal.
#[derive(Debug)]
pub struct Journal {
    socket: UnixDatagram,
}

impl Journal {
    /// Whether the host journal is accepting entries.
    #[must_use]
    pub fn available() -> bool {
        Path::new(JOURNAL_SOCKET).exists()
    }

    /// Connect to the journal socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created or connected.
    pub fn connect() -> io::Result<Self> {
        let socket = UnixDatagram::unbound()?;
        socket.connect(JOURNAL_SOCKET)?;
        Ok(Self { socket })
    }
}

impl JournalWriter for Journal {
    fn send(
        &self,
        message: &str,
        priority: Priority,
        vars: &HashMap<String, String>,
    ) -> io::Result<()> {
        let mut payload = Vec::with_capacity(message.len() + 64);
        append_field(&mut payload, "MESSAGE", message.as_bytes());
        append_field(&mut payload, "PRIORITY", &[b'0' + priority as u8]);
        for (key, value) in vars {
            append_field(&mut payload, key, value.as_bytes());
        }
        self.socket.send(&payload)?;
        Ok(())
    }
}

fn append_field(payload: &mut Vec<u8>, key: &str, value: &[u8]) {
    payload.extend_from_slice(key.as_bytes());
    if value.contains(&b'\n') {
        // Binary form: KEY '\n' <u64-le length> <value> '\n'
        payload.push(b'\n');
        payload.extend_from_slice(&(value.len() as u64).to_le_bytes());
        payload.extend_from_slice(value);
    } else {
        payload.push(b'=');
        payload.extend_from_slice(value);
    }
    payload.push(b'\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_field_encoding() {
        let mut payload = Vec::new();
        append_field(&mut payload, "CONTAINER_ID", b"abc123");
        assert_eq!(payload, b"CONTAINER_ID=abc123\n");
    }

    #[test]
    fn multiline_field_uses_binary_form() {
        let mut payload = Vec::new();
        append_field(&mut payload, "MESSAGE", b"two\nlines");

        let mut expected = b"MESSAGE\n".to_vec();
        expected.extend_from_slice(&9u64.to_le_bytes());
        expected.extend_from_slice(b"two\nlines\n");
        assert_eq!(payload, expected);
    }
}
