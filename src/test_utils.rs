/// # Test Utilities Module
///
/// Fixtures shared by the unit tests: an output sink that can be read back
/// after it has been handed to a dispatcher, and a process runner that records
/// what it was asked to run instead of spawning anything.
use crate::core::Result;
use crate::dispatcher::ProcessRunner;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Cloneable in-memory writer; all clones append to the same bytes.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.bytes.lock().unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Records every program invocation as `[program, args...]`.
#[derive(Debug, Clone, Default)]
pub struct RecordingRunner {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl RecordingRunner {
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProcessRunner for RecordingRunner {
    fn run(&mut self, program: &str, args: &[String]) -> Result<()> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().cloned());
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}
