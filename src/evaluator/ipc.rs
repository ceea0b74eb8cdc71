//! Buffered line I/O over calculator pipes.
//!
//! Reads and writes retry on `EINTR`, which the shutdown signal handler can
//! cause while a worker is blocked waiting on a long relaxation.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::os::unix::io::{AsFd, BorrowedFd, OwnedFd};

/// Buffer size for calculator pipes. Structures with forces can be large.
const BUFFER_SIZE: usize = 64 * 1024;

/// An owned pipe end with `EINTR`-safe reads and writes.
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    pub fn new(fd: impl Into<OwnedFd>) -> Self {
        Self { fd: fd.into() }
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reads newline-terminated messages.
pub struct LineReader {
    reader: BufReader<PipeFd>,
    line: String,
}

impl LineReader {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, fd),
            line: String::with_capacity(4096),
        }
    }

    /// Read the next non-blank line without its terminator. `None` on EOF.
    pub fn read_line(&mut self) -> io::Result<Option<&str>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            let trimmed_len = self.line.trim_end_matches(['\n', '\r']).len();
            self.line.truncate(trimmed_len);
            if !self.line.trim().is_empty() {
                return Ok(Some(&self.line));
            }
        }
    }
}

/// Writes newline-terminated messages, flushing after each.
pub struct LineWriter {
    writer: BufWriter<PipeFd>,
}

impl LineWriter {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            writer: BufWriter::with_capacity(BUFFER_SIZE, fd),
        }
    }

    /// Write a line (appending a newline if missing) and flush.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_pipe() -> (PipeFd, PipeFd) {
        let (read_fd, write_fd) = nix::unistd::pipe().expect("Failed to create pipe");
        (PipeFd::new(read_fd), PipeFd::new(write_fd))
    }

    #[test]
    fn test_line_round_trip_through_pipe() {
        let (read_fd, write_fd) = create_pipe();
        let mut reader = LineReader::new(read_fd);
        let mut writer = LineWriter::new(write_fd);

        writer.write_line(r#"{"type":"exit"}"#).unwrap();
        writer.write_line("second\n").unwrap();
        drop(writer);

        assert_eq!(reader.read_line().unwrap(), Some(r#"{"type":"exit"}"#));
        assert_eq!(reader.read_line().unwrap(), Some("second"));
        assert_eq!(reader.read_line().unwrap(), None);
    }

    #[test]
    fn test_blank_lines_and_crlf_are_skipped() {
        let (read_fd, write_fd) = create_pipe();
        let mut reader = LineReader::new(read_fd);
        let mut writer = LineWriter::new(write_fd);

        writer.write_line("\r\n").unwrap();
        writer.write_line("").unwrap();
        writer.write_line("payload\r\n").unwrap();
        drop(writer);

        assert_eq!(reader.read_line().unwrap(), Some("payload"));
        assert_eq!(reader.read_line().unwrap(), None);
    }
}
