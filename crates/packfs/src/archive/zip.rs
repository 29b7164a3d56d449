//! ZIP support, driven by the archive's own central directory.
//!
//! Entry names are full paths; a trailing `/` marks a directory record.
//! Unix-made entries flagged as symbolic links have their targets read
//! once at mount time, and lookups chase them up to a fixed bound.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use flate2::read::DeflateDecoder;
use log::warn;
use zip_structs::zip_central_directory::ZipCDEntry;
use zip_structs::zip_eocd::ZipEOCD;

use crate::archive::{Archive, ArchiveFile, ArchiveInfo, Archiver, FileKind, Stat};
use crate::error::Error;
use crate::path::VPath;
use crate::platform;

pub(crate) const INFO: ArchiveInfo = ArchiveInfo {
	extension: "ZIP",
	description: "PkZip/WinZip/Info-Zip compatible",
};

/// Chain links to follow before assuming the links are circular.
const SYMLINK_RECURSE_LIMIT: u32 = 20;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

const LOCAL_HEADER_MAGIC: &[u8; 4] = b"PK\x03\x04";
const LOCAL_HEADER_LEN: u64 = 30;

/// Longest symlink target worth reading.
const LINK_TARGET_MAX: u64 = 4096;

#[derive(Debug)]
struct ZipEntry {
	/// Full path; any trailing directory slash is already stripped.
	name: String,
	is_dir: bool,
	method: u16,
	compressed_size: u64,
	uncompressed_size: u64,
	local_header_pos: u64,
	/// Target path, verbatim as stored in the archive.
	symlink: Option<String>,
}

/// The platforms whose archivers record Unix modes, according to Info-ZIP:
/// Unix, BeOS, Atari.
fn host_does_symlinks(version_made_by: u16) -> bool {
	matches!(version_made_by >> 8, 3 | 16 | 5)
}

fn record_is_symlink(cd: &ZipCDEntry) -> bool {
	host_does_symlinks(cd.version_made_by)
		&& cd.uncompressed_size > 0
		&& (cd.external_file_attributes >> 16) & 0o170000 == 0o120000
}

/// Walks a local file header to find where the entry's data begins.
/// The central directory's name/extra lengths need not match the local
/// copy's, so the local record is authoritative.
fn data_start(file: &mut File, local_header_pos: u64) -> Result<u64, Error> {
	file.seek(SeekFrom::Start(local_header_pos))?;

	let mut fixed = [0u8; LOCAL_HEADER_LEN as usize];
	file.read_exact(&mut fixed)?;

	if &fixed[..4] != LOCAL_HEADER_MAGIC {
		return Err(Error::Corrupt("mismatched local file header"));
	}

	let name_len = u64::from(u16::from_le_bytes([fixed[26], fixed[27]]));
	let extra_len = u64::from(u16::from_le_bytes([fixed[28], fixed[29]]));
	Ok(local_header_pos + LOCAL_HEADER_LEN + name_len + extra_len)
}

enum Found {
	Entry(usize),
	/// A directory that exists only as a path prefix of other entries.
	ImplicitDir,
}

pub(crate) struct ZipArchive {
	source: Arc<PathBuf>,
	mod_time: Option<SystemTime>,
	/// Sorted by name for binary search and prefix scans.
	entries: Vec<ZipEntry>,
}

impl ZipArchive {
	fn find_index(&self, name: &str) -> Option<usize> {
		self.entries
			.binary_search_by(|entry| entry.name.as_str().cmp(name))
			.ok()
	}

	fn has_prefix(&self, name: &str) -> bool {
		let prefix = format!("{name}/");
		let at = self
			.entries
			.partition_point(|entry| entry.name.as_str() < prefix.as_str());

		self.entries
			.get(at)
			.is_some_and(|entry| entry.name.starts_with(&prefix))
	}

	/// Resolves a name, chasing symbolic links up to the recursion bound.
	/// `Ok(None)` means the name is simply absent.
	fn resolve(&self, name: &str, mut follow: u32) -> Result<Option<Found>, Error> {
		let mut name = name.trim_matches('/').to_owned();

		loop {
			if name.is_empty() {
				return Ok(Some(Found::ImplicitDir));
			}

			if let Some(index) = self.find_index(&name) {
				let entry = &self.entries[index];

				if let Some(target) = &entry.symlink {
					if follow == 0 {
						return Err(Error::TooManySymlinks);
					}

					follow -= 1;
					name = target.trim_matches('/').to_owned();
					continue;
				}

				return Ok(Some(Found::Entry(index)));
			}

			if self.has_prefix(&name) {
				return Ok(Some(Found::ImplicitDir));
			}

			return Ok(None);
		}
	}

	fn resolve_entry(&self, path: &VPath) -> Result<&ZipEntry, Error> {
		match self.resolve(path.as_str(), SYMLINK_RECURSE_LIMIT)? {
			Some(Found::Entry(index)) => Ok(&self.entries[index]),
			Some(Found::ImplicitDir) => Err(Error::NotAFile),
			None => Err(Error::NoSuchFile),
		}
	}
}

impl Archive for ZipArchive {
	fn info(&self) -> &'static ArchiveInfo {
		&INFO
	}

	fn exists(&self, path: &VPath) -> Result<bool, Error> {
		Ok(self
			.resolve(path.as_str(), SYMLINK_RECURSE_LIMIT)?
			.is_some())
	}

	fn is_directory(&self, path: &VPath) -> Result<bool, Error> {
		match self.resolve(path.as_str(), SYMLINK_RECURSE_LIMIT)? {
			Some(Found::ImplicitDir) => Ok(true),
			Some(Found::Entry(index)) => Ok(self.entries[index].is_dir),
			None => Ok(false),
		}
	}

	fn is_symlink(&self, path: &VPath) -> Result<bool, Error> {
		let name = path.as_str().trim_matches('/');

		Ok(self
			.find_index(name)
			.is_some_and(|index| self.entries[index].symlink.is_some()))
	}

	fn stat(&self, path: &VPath) -> Result<Stat, Error> {
		match self
			.resolve(path.as_str(), SYMLINK_RECURSE_LIMIT)?
			.ok_or(Error::NoSuchFile)?
		{
			Found::ImplicitDir => Ok(Stat {
				size: None,
				mod_time: self.mod_time,
				kind: FileKind::Directory,
				read_only: true,
			}),
			Found::Entry(index) => {
				let entry = &self.entries[index];

				Ok(Stat {
					size: (!entry.is_dir).then_some(entry.uncompressed_size),
					mod_time: self.mod_time,
					kind: if entry.is_dir {
						FileKind::Directory
					} else {
						FileKind::File
					},
					read_only: true,
				})
			}
		}
	}

	fn last_mod_time(&self, path: &VPath) -> Result<SystemTime, Error> {
		if self
			.resolve(path.as_str(), SYMLINK_RECURSE_LIMIT)?
			.is_none()
		{
			return Err(Error::NoSuchFile);
		}

		self.mod_time.ok_or(Error::NotSupported)
	}

	fn enumerate(
		&self,
		dir: &VPath,
		omit_symlinks: bool,
		emit: &mut dyn FnMut(&str),
	) -> Result<(), Error> {
		let dir = dir.as_str().trim_matches('/');
		let mut last_emitted: Option<&str> = None;

		for entry in &self.entries {
			if omit_symlinks && entry.symlink.is_some() {
				continue;
			}

			let child = if dir.is_empty() {
				entry.name.as_str()
			} else {
				let Some(rest) = entry
					.name
					.strip_prefix(dir)
					.and_then(|rest| rest.strip_prefix('/'))
				else {
					continue;
				};

				rest
			};

			if child.is_empty() {
				continue;
			}

			// Only the first path segment below `dir` is a direct child;
			// the sort keeps equal segments adjacent, so remembering the
			// last one suppresses duplicates.
			let segment = child.split('/').next().unwrap_or(child);

			if last_emitted != Some(segment) {
				emit(segment);
				last_emitted = Some(segment);
			}
		}

		Ok(())
	}

	fn open_read(&self, path: &VPath) -> Result<Box<dyn ArchiveFile>, Error> {
		let entry = self.resolve_entry(path)?;

		if entry.is_dir {
			return Err(Error::NotAFile);
		}

		let mut file = File::open(self.source.as_ref())?;
		let start = data_start(&mut file, entry.local_header_pos)?;

		Ok(Box::new(ZipFile::new(
			self.source.clone(),
			start,
			entry.method,
			entry.compressed_size,
			entry.uncompressed_size,
		)?))
	}
}

enum EntryReader {
	Stored(io::Take<File>),
	Deflated(DeflateDecoder<io::Take<File>>),
}

/// One open entry, with its own decompressor state.
///
/// Seeking backwards resets the stream to the entry's start; any forward
/// distance is covered by decompress-and-discard.
struct ZipFile {
	source: Arc<PathBuf>,
	data_start: u64,
	method: u16,
	compressed_size: u64,
	size: u64,
	pos: u64,
	reader: EntryReader,
}

impl ZipFile {
	fn new(
		source: Arc<PathBuf>,
		data_start: u64,
		method: u16,
		compressed_size: u64,
		size: u64,
	) -> Result<Self, Error> {
		let reader = make_reader(&source, data_start, method, compressed_size)?;

		Ok(Self {
			source,
			data_start,
			method,
			compressed_size,
			size,
			pos: 0,
			reader,
		})
	}

	fn rewind(&mut self) -> Result<(), Error> {
		self.reader = make_reader(
			&self.source,
			self.data_start,
			self.method,
			self.compressed_size,
		)?;
		self.pos = 0;
		Ok(())
	}

	fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
		let count = match &mut self.reader {
			EntryReader::Stored(reader) => {
				platform::read_retrying(reader, buf).map_err(Error::Io)?
			}
			EntryReader::Deflated(reader) => {
				platform::read_retrying(reader, buf).map_err(Error::Compression)?
			}
		};

		self.pos += count as u64;
		Ok(count)
	}

	/// Decompresses and discards `count` bytes.
	fn skip(&mut self, mut count: u64) -> Result<(), Error> {
		let mut scratch = [0u8; 8192];

		while count > 0 {
			let want = u64::min(count, scratch.len() as u64) as usize;

			match self.read_raw(&mut scratch[..want])? {
				0 => return Err(Error::Corrupt("entry stream ended early")),
				n => count -= n as u64,
			}
		}

		Ok(())
	}
}

fn make_reader(
	source: &Path,
	data_start: u64,
	method: u16,
	compressed_size: u64,
) -> Result<EntryReader, Error> {
	let mut file = File::open(source)?;
	file.seek(SeekFrom::Start(data_start))?;
	let bounded = file.take(compressed_size);

	match method {
		METHOD_STORED => Ok(EntryReader::Stored(bounded)),
		METHOD_DEFLATED => Ok(EntryReader::Deflated(DeflateDecoder::new(bounded))),
		_ => Err(Error::NotSupported),
	}
}

impl ArchiveFile for ZipFile {
	fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
		let left = self.size - self.pos;
		let want = u64::min(buf.len() as u64, left) as usize;

		if want == 0 {
			return Ok(0);
		}

		self.read_raw(&mut buf[..want])
	}

	fn seek(&mut self, pos: u64) -> Result<(), Error> {
		if pos > self.size {
			return Err(Error::PastEof);
		}

		if pos < self.pos {
			self.rewind()?;
		}

		let ahead = pos - self.pos;

		if ahead > 0 {
			self.skip(ahead)?;
		}

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
		Ok(Box::new(Self::new(
			self.source.clone(),
			self.data_start,
			self.method,
			self.compressed_size,
			self.size,
		)?))
	}
}

/// Reads and decompresses a symlink entry's content at mount time.
fn read_link_target(file: &mut File, cd: &ZipCDEntry) -> Result<String, Error> {
	if u64::from(cd.uncompressed_size) > LINK_TARGET_MAX {
		return Err(Error::Corrupt("oversized symlink target"));
	}

	let start = data_start(file, u64::from(cd.local_header_position))?;
	file.seek(SeekFrom::Start(start))?;
	let mut bytes = Vec::with_capacity(cd.uncompressed_size as usize);

	match cd.compression_method {
		METHOD_STORED => {
			file.take(u64::from(cd.uncompressed_size))
				.read_to_end(&mut bytes)?;
		}
		METHOD_DEFLATED => {
			DeflateDecoder::new(file.take(u64::from(cd.compressed_size)))
				.take(u64::from(cd.uncompressed_size))
				.read_to_end(&mut bytes)
				.map_err(Error::Compression)?;
		}
		_ => return Err(Error::NotSupported),
	}

	String::from_utf8(bytes).map_err(|_| Error::DataError)
}

pub(crate) struct ZipArchiver;

impl Archiver for ZipArchiver {
	fn info(&self) -> &'static ArchiveInfo {
		&INFO
	}

	fn probe(&self, source: &Path, for_writing: bool) -> bool {
		if for_writing {
			return false;
		}

		let Ok(mut file) = File::open(source) else {
			return false;
		};

		ZipEOCD::from_reader(&mut file).is_ok()
	}

	fn open(&self, source: &Path, for_writing: bool) -> Result<Box<dyn Archive>, Error> {
		if for_writing {
			return Err(Error::ReadOnlyArchive);
		}

		let mut file = File::open(source)?;
		let eocd = ZipEOCD::from_reader(&mut file).map_err(Error::Zip)?;
		let records = ZipCDEntry::all_from_eocd(&mut file, &eocd).map_err(Error::Zip)?;

		let mut entries = Vec::with_capacity(records.len());

		for cd in &records {
			let Ok(raw_name) = std::str::from_utf8(&cd.file_name_raw) else {
				warn!(
					"skipping non-UTF-8 entry name in {}",
					source.display()
				);
				continue;
			};

			let is_dir = raw_name.ends_with('/');
			let name = raw_name.trim_matches('/').to_owned();

			if name.is_empty() {
				continue;
			}

			let symlink = if record_is_symlink(cd) {
				Some(read_link_target(&mut file, cd)?)
			} else {
				None
			};

			entries.push(ZipEntry {
				name,
				is_dir,
				method: cd.compression_method,
				compressed_size: u64::from(cd.compressed_size),
				uncompressed_size: u64::from(cd.uncompressed_size),
				local_header_pos: u64::from(cd.local_header_position),
				symlink,
			});
		}

		entries.sort_unstable_by(|a, b| a.name.cmp(&b.name));

		Ok(Box::new(ZipArchive {
			source: Arc::new(source.to_path_buf()),
			mod_time: platform::mod_time(source).ok(),
			entries,
		}))
	}
}
