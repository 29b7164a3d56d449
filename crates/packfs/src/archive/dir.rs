//! Real-directory backend: maps a slice of the host file system into the
//! virtual namespace. The only backend that accepts writes.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::archive::{Archive, ArchiveFile, ArchiveInfo, Archiver, FileKind, Stat};
use crate::error::Error;
use crate::path::VPath;
use crate::platform;

pub(crate) const INFO: ArchiveInfo = ArchiveInfo {
	extension: "",
	description: "Real directory",
};

fn io_err(err: io::Error) -> Error {
	match err.kind() {
		io::ErrorKind::NotFound => Error::NoSuchFile,
		io::ErrorKind::AlreadyExists => Error::FileExists,
		_ => Error::Io(err),
	}
}

pub(crate) struct DirArchive {
	root: PathBuf,
}

impl DirArchive {
	/// Translates a virtual path into a real one under the mount source.
	fn resolve(&self, path: &VPath) -> PathBuf {
		let mut real = self.root.clone();

		for comp in path.components() {
			real.push(comp);
		}

		real
	}
}

impl Archive for DirArchive {
	fn info(&self) -> &'static ArchiveInfo {
		&INFO
	}

	fn exists(&self, path: &VPath) -> Result<bool, Error> {
		Ok(fs::symlink_metadata(self.resolve(path)).is_ok())
	}

	fn is_directory(&self, path: &VPath) -> Result<bool, Error> {
		match fs::metadata(self.resolve(path)) {
			Ok(meta) => Ok(meta.is_dir()),
			Err(_) => Ok(false),
		}
	}

	fn is_symlink(&self, path: &VPath) -> Result<bool, Error> {
		match fs::symlink_metadata(self.resolve(path)) {
			Ok(meta) => Ok(meta.file_type().is_symlink()),
			Err(_) => Ok(false),
		}
	}

	fn stat(&self, path: &VPath) -> Result<Stat, Error> {
		let meta = fs::symlink_metadata(self.resolve(path)).map_err(io_err)?;
		let file_type = meta.file_type();

		let kind = if file_type.is_file() {
			FileKind::File
		} else if file_type.is_dir() {
			FileKind::Directory
		} else if file_type.is_symlink() {
			FileKind::Symlink
		} else {
			FileKind::Other
		};

		Ok(Stat {
			size: file_type.is_file().then(|| meta.len()),
			mod_time: meta.modified().ok(),
			kind,
			read_only: meta.permissions().readonly(),
		})
	}

	fn last_mod_time(&self, path: &VPath) -> Result<SystemTime, Error> {
		platform::mod_time(&self.resolve(path)).map_err(io_err)
	}

	fn enumerate(
		&self,
		dir: &VPath,
		omit_symlinks: bool,
		emit: &mut dyn FnMut(&str),
	) -> Result<(), Error> {
		let real = self.resolve(dir);

		for name in platform::list_dir(&real).map_err(io_err)? {
			if omit_symlinks {
				let is_link = fs::symlink_metadata(real.join(&name))
					.map(|meta| meta.file_type().is_symlink())
					.unwrap_or(false);

				if is_link {
					continue;
				}
			}

			emit(&name);
		}

		Ok(())
	}

	fn open_read(&self, path: &VPath) -> Result<Box<dyn ArchiveFile>, Error> {
		let real = self.resolve(path);
		let meta = fs::metadata(&real).map_err(io_err)?;

		if meta.is_dir() {
			return Err(Error::NotAFile);
		}

		let file = File::open(&real).map_err(io_err)?;
		Ok(Box::new(DirFile {
			path: real,
			file,
			pos: 0,
			writable: false,
		}))
	}

	fn open_write(&self, path: &VPath) -> Result<Box<dyn ArchiveFile>, Error> {
		let real = self.resolve(path);

		if let Some(parent) = real.parent() {
			fs::create_dir_all(parent).map_err(io_err)?;
		}

		let file = File::create(&real).map_err(io_err)?;
		Ok(Box::new(DirFile {
			path: real,
			file,
			pos: 0,
			writable: true,
		}))
	}

	fn open_append(&self, path: &VPath) -> Result<Box<dyn ArchiveFile>, Error> {
		let real = self.resolve(path);

		if let Some(parent) = real.parent() {
			fs::create_dir_all(parent).map_err(io_err)?;
		}

		let file = OpenOptions::new()
			.append(true)
			.create(true)
			.open(&real)
			.map_err(io_err)?;

		let pos = file.metadata().map_err(io_err)?.len();

		Ok(Box::new(DirFile {
			path: real,
			file,
			pos,
			writable: true,
		}))
	}

	fn remove(&self, path: &VPath) -> Result<(), Error> {
		let real = self.resolve(path);
		let meta = fs::symlink_metadata(&real).map_err(io_err)?;

		if meta.is_dir() {
			fs::remove_dir(&real).map_err(io_err)
		} else {
			fs::remove_file(&real).map_err(io_err)
		}
	}

	fn mkdir(&self, path: &VPath) -> Result<(), Error> {
		let real = self.resolve(path);

		match fs::create_dir(&real) {
			Ok(()) => Ok(()),
			Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
				if real.is_dir() {
					Ok(())
				} else {
					Err(Error::FileExists)
				}
			}
			Err(err) => Err(io_err(err)),
		}
	}
}

/// An open real file. Position is tracked here so `tell` stays cheap and
/// append-mode writes keep an honest cursor.
struct DirFile {
	path: PathBuf,
	file: File,
	pos: u64,
	writable: bool,
}

impl ArchiveFile for DirFile {
	fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
		let count = platform::read_retrying(&mut self.file, buf)?;
		self.pos += count as u64;
		Ok(count)
	}

	fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
		if !self.writable {
			return Err(Error::NotSupported);
		}

		let count = platform::write_retrying(&mut self.file, buf)?;
		self.pos += count as u64;
		Ok(count)
	}

	fn seek(&mut self, pos: u64) -> Result<(), Error> {
		self.file.seek(SeekFrom::Start(pos))?;
		self.pos = pos;
		Ok(())
	}

	fn tell(&self) -> u64 {
		self.pos
	}

	fn length(&self) -> Result<u64, Error> {
		Ok(self.file.metadata()?.len())
	}

	fn eof(&self) -> bool {
		self.file
			.metadata()
			.map(|meta| self.pos >= meta.len())
			.unwrap_or(true)
	}

	fn flush(&mut self) -> Result<(), Error> {
		if self.writable {
			self.file.flush()?;
		}

		Ok(())
	}

	fn duplicate(&self) -> Result<Box<dyn ArchiveFile>, Error> {
		let file = File::open(&self.path).map_err(io_err)?;

		Ok(Box::new(Self {
			path: self.path.clone(),
			file,
			pos: 0,
			writable: false,
		}))
	}
}

pub(crate) struct DirArchiver;

impl Archiver for DirArchiver {
	fn info(&self) -> &'static ArchiveInfo {
		&INFO
	}

	fn probe(&self, source: &Path, _for_writing: bool) -> bool {
		// Directories ARE archives in this backend.
		source.is_dir()
	}

	fn open(&self, source: &Path, _for_writing: bool) -> Result<Box<dyn Archive>, Error> {
		if !source.is_dir() {
			return Err(Error::UnsupportedArchive);
		}

		Ok(Box::new(DirArchive {
			root: source.to_path_buf(),
		}))
	}
}
