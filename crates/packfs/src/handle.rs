//! User-visible file handles: lifecycle accounting against their mounts,
//! plus optional read/write buffering.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::archive::ArchiveFile;
use crate::error::{self, Error};
use crate::mount::Mount;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleMode {
	Read,
	Write,
	Append,
}

impl HandleMode {
	fn writable(self) -> bool {
		matches!(self, Self::Write | Self::Append)
	}
}

/// An open file in the virtual namespace.
///
/// A handle pins its originating mount: the mount cannot be removed (nor
/// the write directory replaced) while the handle lives. Dropping the
/// handle closes it, flushing buffered writes on a best-effort basis;
/// call [`FileHandle::close`] instead when flush failures matter.
///
/// A handle is freely `Send`, but it is one cursor; share it between
/// threads behind your own lock or not at all.
pub struct FileHandle {
	mount: Arc<Mount>,
	file: Box<dyn ArchiveFile>,
	mode: HandleMode,
	buffer: Buffer,
}

impl std::fmt::Debug for FileHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FileHandle")
			.field("mode", &self.mode)
			.finish_non_exhaustive()
	}
}

/// Buffer state. `capacity == 0` means buffering is off.
///
/// In read mode, `bytes[index..fill]` is data pulled from the backend but
/// not yet handed out. In write mode, `bytes[..fill]` is data accepted
/// but not yet pushed down.
#[derive(Default)]
struct Buffer {
	bytes: Vec<u8>,
	capacity: usize,
	fill: usize,
	index: usize,
}

impl FileHandle {
	pub(crate) fn new(mount: Arc<Mount>, file: Box<dyn ArchiveFile>, mode: HandleMode) -> Self {
		if mode.writable() {
			mount.open_writes.fetch_add(1, Ordering::AcqRel);
		} else {
			mount.open_reads.fetch_add(1, Ordering::AcqRel);
		}

		Self {
			mount,
			file,
			mode,
			buffer: Buffer::default(),
		}
	}

	pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
		self.read_inner(buf).map_err(error::noted)
	}

	fn read_inner(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
		if self.mode != HandleMode::Read {
			return Err(Error::NotSupported);
		}

		if self.buffer.capacity == 0 {
			return self.file.read(buf);
		}

		let mut done = 0;

		while done < buf.len() {
			if self.buffer.index < self.buffer.fill {
				let available = self.buffer.fill - self.buffer.index;
				let take = usize::min(available, buf.len() - done);
				let from = self.buffer.index;
				buf[done..done + take]
					.copy_from_slice(&self.buffer.bytes[from..from + take]);
				self.buffer.index += take;
				done += take;
				continue;
			}

			let capacity = self.buffer.capacity;
			let filled = self.file.read(&mut self.buffer.bytes[..capacity])?;
			self.buffer.index = 0;
			self.buffer.fill = filled;

			if filled == 0 {
				break;
			}
		}

		Ok(done)
	}

	pub fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
		self.write_inner(buf).map_err(error::noted)
	}

	fn write_inner(&mut self, buf: &[u8]) -> Result<usize, Error> {
		if !self.mode.writable() {
			return Err(Error::NotSupported);
		}

		if self.buffer.capacity == 0 {
			return self.file.write(buf);
		}

		if self.buffer.fill + buf.len() > self.buffer.capacity {
			self.flush_writes()?;
		}

		// Anything bigger than the whole buffer goes straight down.
		if buf.len() >= self.buffer.capacity {
			return self.write_all_unbuffered(buf).map(|()| buf.len());
		}

		let fill = self.buffer.fill;
		self.buffer.bytes[fill..fill + buf.len()].copy_from_slice(buf);
		self.buffer.fill += buf.len();
		Ok(buf.len())
	}

	fn write_all_unbuffered(&mut self, mut buf: &[u8]) -> Result<(), Error> {
		while !buf.is_empty() {
			let count = self.file.write(buf)?;

			if count == 0 {
				return Err(Error::Io(io::ErrorKind::WriteZero.into()));
			}

			buf = &buf[count..];
		}

		Ok(())
	}

	fn flush_writes(&mut self) -> Result<(), Error> {
		if self.mode.writable() && self.buffer.fill > 0 {
			let pending = std::mem::take(&mut self.buffer.bytes);
			let result = self.write_all_unbuffered(&pending[..self.buffer.fill]);
			self.buffer.bytes = pending;
			self.buffer.fill = 0;
			result?;
		}

		Ok(())
	}

	/// Repositions the handle. Buffered state is reconciled first: pending
	/// writes are flushed, and a buffered reader lands inside its own
	/// window without touching the backend when it can.
	pub fn seek(&mut self, pos: u64) -> Result<(), Error> {
		self.seek_inner(pos).map_err(error::noted)
	}

	fn seek_inner(&mut self, pos: u64) -> Result<(), Error> {
		if self.buffer.capacity == 0 {
			return self.file.seek(pos);
		}

		if self.mode.writable() {
			self.flush_writes()?;
			return self.file.seek(pos);
		}

		let backend_pos = self.file.tell();
		let window_start = backend_pos - self.buffer.fill as u64;

		if pos >= window_start && pos < backend_pos {
			self.buffer.index = (pos - window_start) as usize;
			return Ok(());
		}

		self.buffer.index = 0;
		self.buffer.fill = 0;
		self.file.seek(pos)
	}

	#[must_use]
	pub fn tell(&self) -> u64 {
		if self.buffer.capacity == 0 {
			return self.file.tell();
		}

		if self.mode.writable() {
			self.file.tell() + self.buffer.fill as u64
		} else {
			self.file.tell() - (self.buffer.fill - self.buffer.index) as u64
		}
	}

	#[must_use]
	pub fn eof(&self) -> bool {
		if self.buffer.index < self.buffer.fill && self.mode == HandleMode::Read {
			return false;
		}

		self.file.eof()
	}

	pub fn length(&self) -> Result<u64, Error> {
		self.file.length().map_err(error::noted)
	}

	pub fn flush(&mut self) -> Result<(), Error> {
		self.flush_inner().map_err(error::noted)
	}

	fn flush_inner(&mut self) -> Result<(), Error> {
		self.flush_writes()?;
		self.file.flush()
	}

	/// Gives this handle an owned buffer of `size` bytes, or disables
	/// buffering with `size == 0`. Pending buffered state is reconciled
	/// with the backend first.
	pub fn set_buffer(&mut self, size: usize) -> Result<(), Error> {
		self.set_buffer_inner(size).map_err(error::noted)
	}

	fn set_buffer_inner(&mut self, size: usize) -> Result<(), Error> {
		if self.mode.writable() {
			self.flush_writes()?;
		} else if self.buffer.index < self.buffer.fill {
			// Rewind the backend to where the consumer actually is.
			let logical = self.tell();
			self.file.seek(logical)?;
		}

		self.buffer = Buffer {
			bytes: vec![0; size],
			capacity: size,
			fill: 0,
			index: 0,
		};

		Ok(())
	}

	/// An independent handle over the same entry, positioned at 0.
	/// Only read handles can be duplicated.
	pub fn duplicate(&self) -> Result<FileHandle, Error> {
		self.duplicate_inner().map_err(error::noted)
	}

	fn duplicate_inner(&self) -> Result<FileHandle, Error> {
		if self.mode != HandleMode::Read {
			return Err(Error::NotSupported);
		}

		let file = self.file.duplicate()?;
		Ok(Self::new(self.mount.clone(), file, HandleMode::Read))
	}

	/// Closes the handle, surfacing any flush failure. (The handle is
	/// gone either way; `Drop` covers the no-questions-asked path.)
	pub fn close(mut self) -> Result<(), Error> {
		self.flush_inner().map_err(error::noted)
	}
}

impl Drop for FileHandle {
	fn drop(&mut self) {
		if self.mode.writable() {
			let _ = self.flush_inner();
			self.mount.open_writes.fetch_sub(1, Ordering::AcqRel);
		} else {
			self.mount.open_reads.fetch_sub(1, Ordering::AcqRel);
		}
	}
}

impl io::Read for FileHandle {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.read_inner(buf).map_err(io::Error::from)
	}
}

impl io::Write for FileHandle {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.write_inner(buf).map_err(io::Error::from)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.flush_inner().map_err(io::Error::from)
	}
}

impl io::Seek for FileHandle {
	fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
		let target = match pos {
			io::SeekFrom::Start(offset) => Some(offset),
			io::SeekFrom::Current(delta) => self.tell().checked_add_signed(delta),
			io::SeekFrom::End(delta) => self
				.length()
				.map_err(io::Error::from)?
				.checked_add_signed(delta),
		};

		let target = target.ok_or_else(|| io::Error::from(Error::SeekOutOfRange))?;
		self.seek_inner(target).map_err(io::Error::from)?;
		Ok(target)
	}
}
