//! A bounded in-memory pipe for cross-thread streaming.
//!
//! [`BoundedPipe`] connects a writing thread to a reading thread through a
//! fixed-capacity ring of bytes. Writers block when the pipe is full,
//! readers block when it is empty, so an archive can be produced and
//! consumed concurrently with constant memory.
//!
//! Closing the pipe releases both sides: readers drain the remaining bytes
//! and then see end-of-stream; writers get a broken-pipe error.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex};

struct PipeState {
    buffer: VecDeque<u8>,
    capacity: usize,
    closed: bool,
}

struct PipeInner {
    state: Mutex<PipeState>,
    not_full: Condvar,
    not_empty: Condvar,
}

/// A bounded, blocking, byte-oriented pipe.
///
/// Clones share the same buffer; the usual pattern is one clone per side.
///
/// # Example
///
/// ```rust
/// use std::io::{Read, Write};
/// use zipedit::BoundedPipe;
///
/// let mut writer = BoundedPipe::with_capacity(16);
/// let mut reader = writer.clone();
///
/// let handle = std::thread::spawn(move || {
///     writer.write_all(b"hello pipe").unwrap();
///     writer.close();
/// });
///
/// let mut received = Vec::new();
/// reader.read_to_end(&mut received).unwrap();
/// handle.join().unwrap();
/// assert_eq!(received, b"hello pipe");
/// ```
#[derive(Clone)]
pub struct BoundedPipe {
    inner: Arc<PipeInner>,
}

impl BoundedPipe {
    /// Creates a pipe holding at most `capacity` buffered bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PipeInner {
                state: Mutex::new(PipeState {
                    buffer: VecDeque::with_capacity(capacity.max(1)),
                    capacity: capacity.max(1),
                    closed: false,
                }),
                not_full: Condvar::new(),
                not_empty: Condvar::new(),
            }),
        }
    }

    /// Closes the pipe. Blocked writers fail, blocked readers drain the
    /// buffer and then see end-of-stream. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        drop(state);
        self.inner.not_full.notify_all();
        self.inner.not_empty.notify_all();
    }

    /// The number of bytes currently buffered.
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Whether the buffer is currently empty.
    pub fn is_empty(&self) -> bool {
        self.lock().buffer.is_empty()
    }

    /// Whether the pipe has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PipeState> {
        // Poisoning only matters if a holder panicked; the byte queue is
        // still structurally valid, so keep going.
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Read for BoundedPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.lock();
        loop {
            if !state.buffer.is_empty() {
                let n = buf.len().min(state.buffer.len());
                for slot in buf.iter_mut().take(n) {
                    // Length was just checked under the lock.
                    *slot = state.buffer.pop_front().unwrap_or(0);
                }
                drop(state);
                self.inner.not_full.notify_all();
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            state = match self.inner.not_empty.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

impl Write for BoundedPipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "pipe closed",
                ));
            }
            let room = state.capacity - state.buffer.len();
            if room > 0 {
                let n = buf.len().min(room);
                state.buffer.extend(&buf[..n]);
                drop(state);
                self.inner.not_empty.notify_all();
                return Ok(n);
            }
            state = match self.inner.not_full.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
