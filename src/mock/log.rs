//! Optional TCP traffic log.
//!
//! Mirrors what a protocol analyst wants from a quick session dump: a
//! timestamp per session, indent-structured sections per request, and hex
//! dumps of everything sent and received.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Local;

#[derive(Debug)]
pub(crate) struct WireLog {
    file: File,
    indent: usize,
    depth: usize,
}

impl WireLog {
    pub(crate) fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file,
            indent: 2,
            depth: 0,
        })
    }

    pub(crate) fn session_start(&mut self) {
        let _ = writeln!(self.file, "@ {}", Local::now().format("%Y-%m-%d %H:%M.%S"));
        self.enter("Connect");
    }

    pub(crate) fn session_end(&mut self) {
        self.exit();
        self.line("Close.");
        let _ = writeln!(self.file);
        let _ = self.file.flush();
    }

    pub(crate) fn enter(&mut self, section: &str) {
        let _ = writeln!(self.file, "{}{}:", self.padding(), section);
        self.depth += 1;
    }

    pub(crate) fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn line(&mut self, message: &str) {
        let _ = writeln!(self.file, "{}{}", self.padding(), message);
    }

    pub(crate) fn send(&mut self, data: &[u8]) {
        self.line(&format!("send: {}", hex(data)));
    }

    /// Received bytes, eight to a line.
    pub(crate) fn recv(&mut self, data: &[u8]) {
        for (index, chunk) in data.chunks(8).enumerate() {
            let head = if index == 0 { "recv: " } else { "      " };
            self.line(&format!("{}{}", head, hex(chunk)));
        }
    }

    fn padding(&self) -> String {
        " ".repeat(self.depth * self.indent)
    }
}

fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
