//! The capability contract every storage backend satisfies, and the
//! registry of known formats.

pub(crate) mod dir;
pub(crate) mod flat;
pub(crate) mod grp;
pub(crate) mod hog;
pub(crate) mod qpak;
pub(crate) mod wad;
pub(crate) mod zip;

use std::path::Path;
use std::time::SystemTime;

use crate::error::Error;
use crate::path::VPath;

/// Identification for one supported archive format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveInfo {
	/// Customary file extension, upper-case (e.g. `"WAD"`).
	pub extension: &'static str,
	pub description: &'static str,
}

/// What a virtual path resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
	File,
	Directory,
	Symlink,
	Other,
}

/// Metadata for one entry, as answered by the first mount that knows it.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
	/// `None` when the backend cannot cheaply know (e.g. directories).
	pub size: Option<u64>,
	pub mod_time: Option<SystemTime>,
	pub kind: FileKind,
	pub read_only: bool,
}

/// A mounted backend instance.
///
/// Only the real-directory backend accepts mutation; the default bodies
/// report [`Error::ReadOnlyArchive`] so read-only formats implement just
/// the operations they have.
pub(crate) trait Archive: Send + Sync {
	fn info(&self) -> &'static ArchiveInfo;

	fn exists(&self, path: &VPath) -> Result<bool, Error>;

	fn is_directory(&self, path: &VPath) -> Result<bool, Error>;

	fn is_symlink(&self, path: &VPath) -> Result<bool, Error>;

	fn stat(&self, path: &VPath) -> Result<Stat, Error>;

	fn last_mod_time(&self, path: &VPath) -> Result<SystemTime, Error>;

	/// Calls `emit` once per direct child of `dir`. Never recurses.
	fn enumerate(
		&self,
		dir: &VPath,
		omit_symlinks: bool,
		emit: &mut dyn FnMut(&str),
	) -> Result<(), Error>;

	fn open_read(&self, path: &VPath) -> Result<Box<dyn ArchiveFile>, Error>;

	fn open_write(&self, _: &VPath) -> Result<Box<dyn ArchiveFile>, Error> {
		Err(Error::ReadOnlyArchive)
	}

	fn open_append(&self, _: &VPath) -> Result<Box<dyn ArchiveFile>, Error> {
		Err(Error::ReadOnlyArchive)
	}

	fn remove(&self, _: &VPath) -> Result<(), Error> {
		Err(Error::ReadOnlyArchive)
	}

	fn mkdir(&self, _: &VPath) -> Result<(), Error> {
		Err(Error::ReadOnlyArchive)
	}
}

/// An open file state produced by a backend.
///
/// Positions are absolute within the entry; implementors keep their own
/// cursor, so two states over the same entry never disturb each other.
pub(crate) trait ArchiveFile: Send {
	fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

	fn write(&mut self, _: &[u8]) -> Result<usize, Error> {
		Err(Error::NotSupported)
	}

	/// Absolute reposition. `pos` may equal the entry length (leaving the
	/// state at end-of-file); anything beyond that is [`Error::PastEof`].
	fn seek(&mut self, pos: u64) -> Result<(), Error>;

	fn tell(&self) -> u64;

	fn length(&self) -> Result<u64, Error>;

	fn eof(&self) -> bool;

	fn flush(&mut self) -> Result<(), Error> {
		Ok(())
	}

	/// An independent state over the same entry, positioned at 0.
	fn duplicate(&self) -> Result<Box<dyn ArchiveFile>, Error>;
}

/// One registered format: cheap signature probing plus opening.
pub(crate) trait Archiver: Send + Sync {
	fn info(&self) -> &'static ArchiveInfo;

	/// Signature check only; must have no side effects on failure.
	fn probe(&self, source: &Path, for_writing: bool) -> bool;

	fn open(&self, source: &Path, for_writing: bool) -> Result<Box<dyn Archive>, Error>;
}

/// Probe order at mount time. The real-directory backend goes last since
/// it accepts anything directory-shaped.
pub(crate) static ARCHIVERS: [&dyn Archiver; 6] = [
	&zip::ZipArchiver,
	&grp::GrpArchiver,
	&hog::HogArchiver,
	&wad::WadArchiver,
	&qpak::QpakArchiver,
	&dir::DirArchiver,
];

/// The read-only archive formats this build understands.
pub(crate) static SUPPORTED: [ArchiveInfo; 5] = [
	zip::INFO,
	grp::INFO,
	hog::INFO,
	wad::INFO,
	qpak::INFO,
];
