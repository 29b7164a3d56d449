//! Shared machinery for archives whose table of contents is one sorted,
//! flat array of named entries with no directory structure.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use arrayvec::ArrayString;

use crate::archive::{Archive, ArchiveFile, ArchiveInfo, FileKind, Stat};
use crate::error::Error;
use crate::path::VPath;
use crate::platform;

/// Fits the longest fixed-width name any supported format defines.
pub(crate) const NAME_MAX: usize = 16;

/// One entry: a bounded name, an absolute byte offset into the archive
/// stream, and an uncompressed size. Immutable once the mount is built.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlatEntry {
	pub(crate) name: ArrayString<NAME_MAX>,
	pub(crate) start: u64,
	pub(crate) size: u64,
}

/// Case-insensitive ASCII ordering; deliberately locale-free.
pub(crate) fn cmp_ci_ascii(a: &str, b: &str) -> Ordering {
	a.bytes()
		.map(|byte| byte.to_ascii_lowercase())
		.cmp(b.bytes().map(|byte| byte.to_ascii_lowercase()))
}

/// Decodes a fixed-width name field: stops at the first NUL, drops padding
/// spaces off the end, and replaces any non-ASCII byte.
pub(crate) fn fixed_name(raw: &[u8]) -> ArrayString<NAME_MAX> {
	let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
	let mut trimmed = &raw[..end];

	while let [rest @ .., b' '] = trimmed {
		trimmed = rest;
	}

	let mut name = ArrayString::new();

	for &byte in trimmed.iter().take(NAME_MAX) {
		name.push(if byte.is_ascii() { byte as char } else { '?' });
	}

	name
}

/// A mounted flat-index archive. The per-format modules parse the header
/// into the entry array; everything after that is identical across them.
pub(crate) struct FlatArchive {
	info: &'static ArchiveInfo,
	source: Arc<PathBuf>,
	mod_time: Option<SystemTime>,
	name_limit: usize,
	entries: Vec<FlatEntry>,
}

impl FlatArchive {
	pub(crate) fn new(
		info: &'static ArchiveInfo,
		source: &Path,
		name_limit: usize,
		mut entries: Vec<FlatEntry>,
	) -> Self {
		entries.sort_unstable_by(|a, b| cmp_ci_ascii(&a.name, &b.name));

		Self {
			info,
			source: Arc::new(source.to_path_buf()),
			mod_time: platform::mod_time(source).ok(),
			name_limit,
			entries,
		}
	}

	/// Binary search over the sorted table. Names over the format's limit
	/// or containing a separator can never match and are rejected without
	/// touching the array.
	fn find(&self, path: &VPath) -> Option<&FlatEntry> {
		let name = path.as_str();

		if name.len() > self.name_limit || name.contains('/') {
			return None;
		}

		self.entries
			.binary_search_by(|entry| cmp_ci_ascii(&entry.name, name))
			.ok()
			.map(|i| &self.entries[i])
	}

	#[cfg(test)]
	pub(crate) fn entries(&self) -> &[FlatEntry] {
		&self.entries
	}
}

impl Archive for FlatArchive {
	fn info(&self) -> &'static ArchiveInfo {
		self.info
	}

	fn exists(&self, path: &VPath) -> Result<bool, Error> {
		Ok(self.find(path).is_some())
	}

	fn is_directory(&self, _: &VPath) -> Result<bool, Error> {
		// These formats have no directory concept at all.
		Ok(false)
	}

	fn is_symlink(&self, _: &VPath) -> Result<bool, Error> {
		Ok(false)
	}

	fn stat(&self, path: &VPath) -> Result<Stat, Error> {
		let entry = self.find(path).ok_or(Error::NoSuchFile)?;

		Ok(Stat {
			size: Some(entry.size),
			mod_time: self.mod_time,
			kind: FileKind::File,
			read_only: true,
		})
	}

	fn last_mod_time(&self, path: &VPath) -> Result<SystemTime, Error> {
		// The formats store no per-entry timestamps; the archive
		// file's own is the best available answer.
		if self.find(path).is_none() {
			return Err(Error::NoSuchFile);
		}

		self.mod_time.ok_or(Error::NotSupported)
	}

	fn enumerate(
		&self,
		dir: &VPath,
		_omit_symlinks: bool,
		emit: &mut dyn FnMut(&str),
	) -> Result<(), Error> {
		if !dir.is_root() {
			return Ok(());
		}

		for entry in &self.entries {
			emit(&entry.name);
		}

		Ok(())
	}

	fn open_read(&self, path: &VPath) -> Result<Box<dyn ArchiveFile>, Error> {
		let entry = *self.find(path).ok_or(Error::NoSuchFile)?;
		Ok(Box::new(FlatFile::open(
			self.source.clone(),
			entry.start,
			entry.size,
		)?))
	}
}

/// An open reader over one `[start, start + size)` span of an archive
/// stream. Each instance owns its own platform handle, so concurrent
/// readers on one archive never fight over a cursor.
pub(crate) struct FlatFile {
	source: Arc<PathBuf>,
	file: File,
	start: u64,
	size: u64,
	pos: u64,
}

impl FlatFile {
	pub(crate) fn open(source: Arc<PathBuf>, start: u64, size: u64) -> Result<Self, Error> {
		let file = File::open(source.as_ref())?;

		Ok(Self {
			source,
			file,
			start,
			size,
			pos: 0,
		})
	}
}

impl ArchiveFile for FlatFile {
	fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
		let left = self.size - self.pos;
		let want = u64::min(buf.len() as u64, left) as usize;

		if want == 0 {
			return Ok(0);
		}

		self.file.seek(SeekFrom::Start(self.start + self.pos))?;
		let count = platform::read_retrying(&mut self.file, &mut buf[..want])?;
		self.pos += count as u64;
		Ok(count)
	}

	fn seek(&mut self, pos: u64) -> Result<(), Error> {
		if pos > self.size {
			return Err(Error::PastEof);
		}

		self.pos = pos;
		Ok(())
	}

	fn tell(&self) -> u64 {
		self.pos
	}

	fn length(&self) -> Result<u64, Error> {
		Ok(self.size)
	}

	fn eof(&self) -> bool {
		self.pos >= self.size
	}

	fn duplicate(&self) -> Result<Box<dyn ArchiveFile>, Error> {
		Ok(Box::new(Self::open(
			self.source.clone(),
			self.start,
			self.size,
		)?))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn name_decoding() {
		assert_eq!(fixed_name(b"STBAR\0\0\0").as_str(), "STBAR");
		assert_eq!(fixed_name(b"TILES000.ART").as_str(), "TILES000.ART");
		assert_eq!(fixed_name(b"A.TXT   \0   ").as_str(), "A.TXT");
		assert_eq!(fixed_name(b"").as_str(), "");
	}

	#[test]
	fn ci_ordering() {
		assert_eq!(cmp_ci_ascii("a.txt", "A.TXT"), Ordering::Equal);
		assert_eq!(cmp_ci_ascii("A.TXT", "b.txt"), Ordering::Less);
		assert_eq!(cmp_ci_ascii("Z", "a"), Ordering::Greater);
	}
}
