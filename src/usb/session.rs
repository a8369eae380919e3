//! Register read/write protocol over a device's bulk endpoints.
//!
//! Each command is a big-endian `u16` with the command nibble in the
//! top 4 bits and `(addr << 6) | port` (6 bits each) in the low 12,
//! optionally followed by a payload. `DeviceSession` is generic over
//! [`BulkIo`] so the framing/chunking/timeout logic can be unit tested
//! without a real USB device. These calls block the reactor thread for
//! the duration of the transfer, per `spec.md` §9: FTDI's synchronous
//! bulk transfer API offers no non-blocking alternative worth wrapping.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use crate::error::SessionError;

const CMD_READREG: u16 = 1;
const CMD_WRITEREG: u16 = 2;
const CMD_READREG_N: u16 = 3;
const CMD_WRITEREG_N: u16 = 4;

/// Max words per burst packet; the packet's length field is itself a `u16`.
const MAX_WORDS_PER_PACKET: usize = u16::MAX as usize;

const READ_RETRY_ATTEMPTS: usize = 100;
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

/// The bulk-transfer surface `DeviceSession` needs. The real
/// implementation forwards to `rusb`'s synchronous bulk transfer
/// calls on the FTDI interface-A endpoints; tests substitute a fake.
pub trait BulkIo {
    fn write_bulk(&mut self, data: &[u8]) -> Result<usize, SessionError>;
    /// A single attempt to read into `buf`; may return fewer bytes
    /// than `buf.len()` (a short read), never more.
    fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize, SessionError>;
}

fn command_word(cmd: u16, addr: u8, port: u8) -> u16 {
    (cmd << 12) | (u16::from(addr & 0x3f) << 6) | u16::from(port & 0x3f)
}

/// One tracked register whose value changed since the last poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegChanged {
    pub addr: u8,
    pub port: u8,
    pub value: u16,
}

pub struct DeviceSession<IO> {
    io: IO,
    tracked_regs: BTreeMap<(u8, u8), u16>,
}

impl<IO: BulkIo> DeviceSession<IO> {
    pub fn new(io: IO) -> Self {
        Self { io, tracked_regs: BTreeMap::new() }
    }

    /// Borrows the underlying transport, e.g. so `registry::reprogram`
    /// can reach the live `UsbFtdiDevice`'s handle to open interface B
    /// for JTAG without disturbing the session's hold on interface A.
    pub fn io(&self) -> &IO {
        &self.io
    }

    fn write_exact(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let n = self.io.write_bulk(data)?;
        if n != data.len() {
            return Err(SessionError::PartialWrite { expected: data.len(), actual: n });
        }
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SessionError> {
        let mut received = 0;
        for attempt in 0..READ_RETRY_ATTEMPTS {
            let n = self.io.read_bulk(&mut buf[received..])?;
            received += n;
            if received == buf.len() {
                return Ok(());
            }
            if attempt + 1 < READ_RETRY_ATTEMPTS {
                thread::sleep(READ_RETRY_DELAY);
            }
        }
        Err(SessionError::ReadTimeout { expected: buf.len(), received })
    }

    pub fn write_reg(&mut self, addr: u8, port: u8, value: u16) -> Result<(), SessionError> {
        let mut cmd = Vec::with_capacity(4);
        cmd.extend_from_slice(&command_word(CMD_WRITEREG, addr, port).to_be_bytes());
        cmd.extend_from_slice(&value.to_be_bytes());
        self.write_exact(&cmd)
    }

    pub fn read_reg(&mut self, addr: u8, port: u8) -> Result<u16, SessionError> {
        let cmd = command_word(CMD_READREG, addr, port).to_be_bytes();
        self.write_exact(&cmd)?;
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// `data_be` is a flat buffer of big-endian `u16` words.
    pub fn write_reg_n(&mut self, addr: u8, port: u8, data_be: &[u8]) -> Result<(), SessionError> {
        let words: Vec<u16> =
            data_be.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();

        let mut sent = 0;
        while sent != words.len() {
            let chunk_len = (words.len() - sent).min(MAX_WORDS_PER_PACKET);
            let mut packet = Vec::with_capacity(4 + chunk_len * 2);
            packet.extend_from_slice(&command_word(CMD_WRITEREG_N, addr, port).to_be_bytes());
            packet.extend_from_slice(&(chunk_len as u16).to_be_bytes());
            for word in &words[sent..sent + chunk_len] {
                packet.extend_from_slice(&word.to_be_bytes());
            }
            self.write_exact(&packet)?;
            sent += chunk_len;
        }
        Ok(())
    }

    /// Returns a flat buffer of big-endian `u16` words.
    pub fn read_reg_n(&mut self, addr: u8, port: u8, n_words: u32) -> Result<Vec<u8>, SessionError> {
        let n_words = n_words as usize;
        let mut out = Vec::with_capacity(n_words * 2);
        let mut read = 0;
        while read != n_words {
            let chunk_len = (n_words - read).min(MAX_WORDS_PER_PACKET);
            let mut cmd = Vec::with_capacity(4);
            cmd.extend_from_slice(&command_word(CMD_READREG_N, addr, port).to_be_bytes());
            cmd.extend_from_slice(&(chunk_len as u16).to_be_bytes());
            self.write_exact(&cmd)?;

            let mut chunk = vec![0u8; chunk_len * 2];
            self.read_exact(&mut chunk)?;
            out.extend_from_slice(&chunk);
            read += chunk_len;
        }
        Ok(out)
    }

    pub fn track_reg(&mut self, addr: u8, port: u8, enabled: bool) {
        if enabled {
            self.tracked_regs.entry((addr, port)).or_insert(0);
        } else {
            self.tracked_regs.remove(&(addr, port));
        }
    }

    fn note_tracked(&mut self, addr: u8, port: u8, value: u16) -> bool {
        if let Some(prev) = self.tracked_regs.get_mut(&(addr, port)) {
            let changed = *prev != value;
            *prev = value;
            changed
        } else {
            false
        }
    }

    /// Poll every tracked register in one burst: a single combined
    /// write of all read commands followed by one combined read of all
    /// results. Returns the registers whose value changed since the
    /// previous poll.
    pub fn update_tracked(&mut self) -> Result<Vec<RegChanged>, SessionError> {
        let addr_ports: Vec<(u8, u8)> = self.tracked_regs.keys().copied().collect();
        if addr_ports.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = Vec::with_capacity(addr_ports.len() * 2);
        for &(addr, port) in &addr_ports {
            cmd.extend_from_slice(&command_word(CMD_READREG, addr, port).to_be_bytes());
        }
        self.write_exact(&cmd)?;

        let mut results = vec![0u8; addr_ports.len() * 2];
        self.read_exact(&mut results)?;

        let mut changed = Vec::new();
        for (i, &(addr, port)) in addr_ports.iter().enumerate() {
            let value = u16::from_be_bytes([results[i * 2], results[i * 2 + 1]]);
            if self.note_tracked(addr, port, value) {
                changed.push(RegChanged { addr, port, value });
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeIo {
        written: Vec<u8>,
        /// Queue of chunks returned by successive `read_bulk` calls;
        /// an empty chunk simulates a short read of zero bytes.
        to_read: VecDeque<Vec<u8>>,
        write_short_by: usize,
    }

    impl BulkIo for FakeIo {
        fn write_bulk(&mut self, data: &[u8]) -> Result<usize, SessionError> {
            self.written.extend_from_slice(data);
            Ok(data.len() - self.write_short_by.min(data.len()))
        }

        fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize, SessionError> {
            let Some(chunk) = self.to_read.pop_front() else {
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            Ok(n)
        }
    }

    #[test]
    fn write_reg_frames_command_and_value() {
        let io = FakeIo::default();
        let mut session = DeviceSession::new(io);
        session.write_reg(3, 1, 0x1234).unwrap();
        assert_eq!(session.io.written, vec![0x20, 0xc1, 0x12, 0x34]);
    }

    #[test]
    fn read_reg_accumulates_short_reads() {
        let mut io = FakeIo::default();
        io.to_read.push_back(vec![0x12]);
        io.to_read.push_back(vec![0x34]);
        let mut session = DeviceSession::new(io);
        let value = session.read_reg(0, 0).unwrap();
        assert_eq!(value, 0x1234);
    }

    #[test]
    fn read_reg_times_out_on_persistent_short_read() {
        let io = FakeIo::default(); // never supplies any bytes
        let mut session = DeviceSession::new(io);
        let err = session.read_reg(0, 0).unwrap_err();
        assert!(matches!(err, SessionError::ReadTimeout { .. }));
    }

    #[test]
    fn partial_write_is_fatal() {
        let mut io = FakeIo::default();
        io.write_short_by = 1;
        let mut session = DeviceSession::new(io);
        let err = session.write_reg(0, 0, 0).unwrap_err();
        assert!(matches!(err, SessionError::PartialWrite { .. }));
    }

    #[test]
    fn write_reg_n_chunks_bursts_at_max_words_per_packet() {
        let io = FakeIo::default();
        let words = vec![0u8; (MAX_WORDS_PER_PACKET + 10) * 2];
        let mut session = DeviceSession::new(io);
        session.write_reg_n(0, 0, &words).unwrap();
        // first packet: 4 byte header + MAX_WORDS_PER_PACKET*2 bytes
        // second packet: 4 byte header + 10*2 bytes
        let expected_len = (4 + MAX_WORDS_PER_PACKET * 2) + (4 + 10 * 2);
        assert_eq!(session.io.written.len(), expected_len);
    }

    #[test]
    fn update_tracked_reports_only_changed_registers() {
        let mut io = FakeIo::default();
        // one combined read response for two tracked regs: [0, 1]
        io.to_read.push_back(vec![0x00, 0x00, 0x00, 0x01]);
        let mut session = DeviceSession::new(io);
        session.track_reg(0, 0, true);
        session.track_reg(0, 1, true);
        let changed = session.update_tracked().unwrap();
        // both went from implicit 0 -> (0, 1); only (0,1) differs
        assert_eq!(changed, vec![RegChanged { addr: 0, port: 1, value: 1 }]);
    }

    #[test]
    fn read_reg_does_not_suppress_a_later_tracked_change() {
        let mut io = FakeIo::default();
        io.to_read.push_back(vec![0x00, 0x2a]); // explicit readreg reply: 42
        io.to_read.push_back(vec![0x00, 0x2a]); // update_tracked reply: still 42
        let mut session = DeviceSession::new(io);
        session.track_reg(0, 0, true);

        assert_eq!(session.read_reg(0, 0).unwrap(), 42);
        // the baseline is still the pre-read value of 0, so the poll
        // must still report the change to 42 rather than treating the
        // client's own readreg as having already observed it.
        let changed = session.update_tracked().unwrap();
        assert_eq!(changed, vec![RegChanged { addr: 0, port: 0, value: 42 }]);
    }

    #[test]
    fn update_tracked_with_nothing_tracked_does_no_io() {
        let io = FakeIo::default();
        let mut session = DeviceSession::new(io);
        assert_eq!(session.update_tracked().unwrap(), Vec::new());
        assert!(session.io.written.is_empty());
    }
}
