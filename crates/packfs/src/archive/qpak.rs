//! Quake PACK support: the one flat format whose entry names carry real
//! paths, so a directory tree gets materialized over the sorted table.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use byteorder::{ReadBytesExt, LE};

use crate::archive::flat::{cmp_ci_ascii, FlatFile};
use crate::archive::{Archive, ArchiveFile, ArchiveInfo, Archiver, FileKind, Stat};
use crate::error::Error;
use crate::path::VPath;
use crate::platform;

pub(crate) const INFO: ArchiveInfo = ArchiveInfo {
	extension: "PAK",
	description: "Quake PAK file format",
};

const MAGIC: &[u8; 4] = b"PACK";
const RECORD_LEN: u32 = 64;

#[derive(Debug)]
struct QpakEntry {
	/// Full path with forward slashes, e.g. `maps/e1m1.bsp`.
	name: String,
	start: u64,
	size: u64,
}

/// A directory node. Children are named once; file leaves index into the
/// archive's entry array.
#[derive(Debug, Default)]
struct QpakDir {
	/// Empty for the root.
	name: String,
	dirs: Vec<QpakDir>,
	files: Vec<(String, usize)>,
}

impl QpakDir {
	fn subdir(&self, name: &str) -> Option<&QpakDir> {
		self.dirs
			.iter()
			.find(|dir| dir.name.eq_ignore_ascii_case(name))
	}

	fn subdir_or_insert(&mut self, name: &str) -> &mut QpakDir {
		if let Some(i) = self
			.dirs
			.iter()
			.position(|dir| dir.name.eq_ignore_ascii_case(name))
		{
			return &mut self.dirs[i];
		}

		self.dirs.push(QpakDir {
			name: name.to_owned(),
			..QpakDir::default()
		});

		self.dirs.last_mut().unwrap()
	}

	fn attach(&mut self, path: &str, entry_index: usize) {
		match path.split_once('/') {
			None => {
				if !self
					.files
					.iter()
					.any(|(name, _)| name.eq_ignore_ascii_case(path))
				{
					self.files.push((path.to_owned(), entry_index));
				}
			}
			Some((dir_name, rest)) => {
				self.subdir_or_insert(dir_name).attach(rest, entry_index);
			}
		}
	}
}

pub(crate) struct QpakArchive {
	source: Arc<PathBuf>,
	mod_time: Option<SystemTime>,
	/// Sorted case-insensitively for `O(log N)` absolute lookup.
	entries: Vec<QpakEntry>,
	root: QpakDir,
}

enum Found<'a> {
	File(&'a QpakEntry),
	Dir(&'a QpakDir),
}

impl QpakArchive {
	fn find_dir(&self, path: &VPath) -> Option<&QpakDir> {
		let mut dir = &self.root;

		for comp in path.components() {
			dir = dir.subdir(comp)?;
		}

		Some(dir)
	}

	fn find(&self, path: &VPath) -> Option<Found<'_>> {
		if path.is_root() {
			return Some(Found::Dir(&self.root));
		}

		// Files go through the sorted table; only directories need the tree.
		if let Ok(i) = self
			.entries
			.binary_search_by(|entry| cmp_ci_ascii(&entry.name, path.as_str()))
		{
			return Some(Found::File(&self.entries[i]));
		}

		self.find_dir(path).map(Found::Dir)
	}
}

impl Archive for QpakArchive {
	fn info(&self) -> &'static ArchiveInfo {
		&INFO
	}

	fn exists(&self, path: &VPath) -> Result<bool, Error> {
		Ok(self.find(path).is_some())
	}

	fn is_directory(&self, path: &VPath) -> Result<bool, Error> {
		Ok(matches!(self.find(path), Some(Found::Dir(_))))
	}

	fn is_symlink(&self, _: &VPath) -> Result<bool, Error> {
		Ok(false)
	}

	fn stat(&self, path: &VPath) -> Result<Stat, Error> {
		match self.find(path).ok_or(Error::NoSuchFile)? {
			Found::File(entry) => Ok(Stat {
				size: Some(entry.size),
				mod_time: self.mod_time,
				kind: FileKind::File,
				read_only: true,
			}),
			Found::Dir(_) => Ok(Stat {
				size: None,
				mod_time: self.mod_time,
				kind: FileKind::Directory,
				read_only: true,
			}),
		}
	}

	fn last_mod_time(&self, path: &VPath) -> Result<SystemTime, Error> {
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
		match self.find(dir) {
			Some(Found::Dir(node)) => {
				for sub in &node.dirs {
					emit(&sub.name);
				}

				for (name, _) in &node.files {
					emit(name);
				}

				Ok(())
			}
			Some(Found::File(_)) => Err(Error::NotADirectory),
			None => Err(Error::NoSuchPath),
		}
	}

	fn open_read(&self, path: &VPath) -> Result<Box<dyn ArchiveFile>, Error> {
		match self.find(path).ok_or(Error::NoSuchFile)? {
			Found::File(entry) => Ok(Box::new(FlatFile::open(
				self.source.clone(),
				entry.start,
				entry.size,
			)?)),
			Found::Dir(_) => Err(Error::NotAFile),
		}
	}
}

fn read_header(file: &mut File) -> Result<(u32, u32), Error> {
	let mut magic = [0u8; 4];
	file.read_exact(&mut magic)?;

	if &magic != MAGIC {
		return Err(Error::UnsupportedArchive);
	}

	let dir_offset = file.read_u32::<LE>()?;
	let dir_len = file.read_u32::<LE>()?;

	if dir_len % RECORD_LEN != 0 {
		return Err(Error::Corrupt("PACK directory length is not a record multiple"));
	}

	Ok((dir_offset, dir_len))
}

pub(crate) struct QpakArchiver;

impl Archiver for QpakArchiver {
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

		read_header(&mut file).is_ok()
	}

	fn open(&self, source: &Path, for_writing: bool) -> Result<Box<dyn Archive>, Error> {
		if for_writing {
			return Err(Error::ReadOnlyArchive);
		}

		let mut file = File::open(source)?;
		let (dir_offset, dir_len) = read_header(&mut file)?;
		let count = dir_len / RECORD_LEN;
		file.seek(SeekFrom::Start(u64::from(dir_offset)))?;

		let mut entries = Vec::with_capacity(count as usize);

		for _ in 0..count {
			let mut raw = [0u8; 56];
			file.read_exact(&mut raw)?;
			let start = u64::from(file.read_u32::<LE>()?);
			let size = u64::from(file.read_u32::<LE>()?);

			let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
			let Ok(name) = std::str::from_utf8(&raw[..end]) else {
				return Err(Error::Corrupt("PACK entry name is not valid text"));
			};

			entries.push(QpakEntry {
				name: name.trim_matches('/').to_owned(),
				start,
				size,
			});
		}

		entries.sort_unstable_by(|a, b| cmp_ci_ascii(&a.name, &b.name));

		let mut root = QpakDir::default();

		for (i, entry) in entries.iter().enumerate() {
			if entry.name.is_empty() {
				continue;
			}

			root.attach(&entry.name, i);
		}

		Ok(Box::new(QpakArchive {
			source: Arc::new(source.to_path_buf()),
			mod_time: platform::mod_time(source).ok(),
			entries,
			root,
		}))
	}
}
