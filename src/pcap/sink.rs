//! Output destinations for encoded pcap bytes.
//!
//! A [`PcapSink`] is append-only: sessions hand it whole record batches and
//! never seek. [`WriteSink`] adapts any [`std::io::Write`]; [`SharedSink`] lets
//! several sessions append to one destination owned by somebody else.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use super::encoder::encode_global_header;

pub trait PcapSink: Send {
    /// Append `buf` completely or fail.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Flush and release the destination. Later writes fail.
    fn close(&mut self) -> io::Result<()>;
}

impl<S: PcapSink + ?Sized> PcapSink for Box<S> {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "pcap sink is closed")
}

/// Sink over any `Write` implementation (files, buffers, sockets).
///
/// Closing flushes and drops the writer.
#[derive(Debug)]
pub struct WriteSink<W: Write + Send> {
    inner: Option<W>,
}

impl<W: Write + Send> WriteSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Some(writer),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn get_ref(&self) -> Option<&W> {
        self.inner.as_ref()
    }

    /// Take the writer back without flushing. `None` once closed.
    pub fn into_inner(self) -> Option<W> {
        self.inner
    }
}

impl<W: Write + Send> PcapSink for WriteSink<W> {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(w) => w.write_all(buf),
            None => Err(closed_error()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(w) => w.flush(),
            None => Err(closed_error()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self.inner.take() {
            Some(mut w) => w.flush(),
            None => Ok(()),
        }
    }
}

/// A sink whose lifecycle belongs to its creator, cloned into any number of
/// shared-mode sessions.
///
/// Each `write_all` runs under one lock acquisition, so batches from
/// different sessions never interleave mid-record.
#[derive(Clone)]
pub struct SharedSink {
    inner: Arc<Mutex<Box<dyn PcapSink>>>,
}

impl SharedSink {
    pub fn new<S: PcapSink + 'static>(sink: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Box<dyn PcapSink>>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "shared pcap sink poisoned"))
    }

    /// Write the pcap file header. Shared-mode sessions never do this
    /// themselves, so the owner calls it once before handing out clones.
    pub fn write_global_header(&self) -> io::Result<()> {
        write_global_header(&mut **self.lock()?)
    }

    /// Close the underlying destination. Sessions still holding clones will
    /// see their next write fail.
    pub fn close_shared(&self) -> io::Result<()> {
        self.lock()?.close()
    }

    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl PcapSink for SharedSink {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.lock()?.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        self.close_shared()
    }
}

/// Write the 24-byte pcap file header to `sink`.
pub fn write_global_header(sink: &mut dyn PcapSink) -> io::Result<()> {
    sink.write_all(&encode_global_header())
}
