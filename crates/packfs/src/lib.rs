//! # packfs
//!
//! An overlay virtual file system: real directories and read-only archives
//! of several game formats (ZIP, GRP, HOG, WAD, PAK) are merged into one
//! forward-slash namespace, so that consumers can open, read, enumerate,
//! and (inside one designated write directory) write files without caring
//! where the bytes actually live.
//!
//! Earlier mounts shadow later ones; whichever mount answers first for a
//! path answers for all of its attributes. Mutating operations go only to
//! the write directory. Paths containing `.`/`..` components, backslashes,
//! or colons are rejected outright, and symbolic links are refused unless
//! [`VirtualFs::permit_symbolic_links`] says otherwise.

mod archive;
mod error;
mod handle;
mod mount;
mod path;
mod platform;

#[cfg(test)]
mod test;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::warn;
use parking_lot::Mutex;

use self::handle::HandleMode;
use self::mount::VfsState;

pub use self::archive::{ArchiveInfo, FileKind, Stat};
pub use self::error::{Error, ErrorKind};
pub use self::handle::FileHandle;
pub use self::path::{VPath, VPathBuf};

/// The version of this library, as built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
	pub major: u16,
	pub minor: u16,
	pub patch: u16,
}

#[must_use]
pub fn linked_version() -> Version {
	Version {
		major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
		minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
		patch: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
	}
}

/// The read-only archive formats this build can mount.
#[must_use]
pub fn supported_archive_types() -> &'static [ArchiveInfo] {
	&archive::SUPPORTED
}

/// The platform's native path separator, for display purposes.
/// Virtual paths always use `/`.
#[must_use]
pub fn dir_separator() -> &'static str {
	std::path::MAIN_SEPARATOR_STR
}

/// Reads and clears the calling thread's most recent failure.
///
/// Successful operations never clear the slot, and a new failure simply
/// overwrites the old one; read this only after something has failed.
#[must_use]
pub fn last_error() -> Option<ErrorKind> {
	error::take()
}

/// The mount stack and everything hanging off it.
///
/// All methods take `&self`; internal state is serialized behind one
/// mutex, so a `VirtualFs` can be shared freely between threads. Handles
/// returned by the `open_*` methods are independent of each other and of
/// this object's lock.
pub struct VirtualFs {
	state: Mutex<VfsState>,
	base_dir: PathBuf,
	user_dir: PathBuf,
}

impl VirtualFs {
	#[must_use]
	pub fn new() -> Self {
		Self {
			state: Mutex::new(VfsState::new()),
			base_dir: platform::base_dir(),
			user_dir: platform::user_dir(),
		}
	}

	/// Where the running executable lives.
	#[must_use]
	pub fn base_dir(&self) -> &Path {
		&self.base_dir
	}

	/// The user's home directory, or the base dir when there is none.
	#[must_use]
	pub fn user_dir(&self) -> &Path {
		&self.user_dir
	}

	/// Where `org`'s application `app` should keep per-user writable data.
	#[must_use]
	pub fn pref_dir(&self, org: &str, app: &str) -> PathBuf {
		platform::pref_dir(org, app)
	}

	/// Detected CD-ROM mount points, best-effort.
	#[must_use]
	pub fn cdrom_dirs(&self) -> Vec<PathBuf> {
		platform::cdrom_dirs()
	}

	// Mount management --------------------------------------------------

	/// Adds `source` (a directory or archive file) to the search path,
	/// appearing under `point` (`""` for the namespace root). `append`
	/// places it after every existing mount, otherwise before them.
	///
	/// Mounting the same source twice is allowed; each mount is its own
	/// entry.
	pub fn mount(
		&self,
		source: impl AsRef<Path>,
		point: &VPath,
		append: bool,
	) -> Result<(), Error> {
		self.state
			.lock()
			.mount(source.as_ref(), point, append)
			.map_err(error::noted)
	}

	/// Removes the first mount whose source matches `source` exactly.
	/// Fails with [`ErrorKind::FilesStillOpen`] while any read handle
	/// refers to it.
	pub fn unmount(&self, source: impl AsRef<Path>) -> Result<(), Error> {
		self.state
			.lock()
			.unmount(source.as_ref())
			.map_err(error::noted)
	}

	/// The sources of every mount, in search order.
	#[must_use]
	pub fn search_path(&self) -> Vec<PathBuf> {
		self.state
			.lock()
			.search_path
			.iter()
			.map(|mount| mount.source.clone())
			.collect()
	}

	/// Where `source`'s contents appear in the namespace, if mounted.
	#[must_use]
	pub fn mount_point(&self, source: impl AsRef<Path>) -> Option<VPathBuf> {
		let source = source.as_ref();

		self.state
			.lock()
			.search_path
			.iter()
			.find(|mount| mount.source == source)
			.map(|mount| mount.point.clone())
	}

	/// Replaces the write directory, or clears it with `None`. Fails with
	/// [`ErrorKind::FilesStillOpen`] while a write handle is open on the
	/// current one.
	pub fn set_write_dir(&self, path: Option<&Path>) -> Result<(), Error> {
		self.state.lock().set_write_dir(path).map_err(error::noted)
	}

	#[must_use]
	pub fn write_dir(&self) -> Option<PathBuf> {
		self.state
			.lock()
			.write_dir
			.as_ref()
			.map(|mount| mount.source.clone())
	}

	/// Whether lookups may traverse symbolic links. Off by default; while
	/// off, any path whose prefix is a link fails with
	/// [`ErrorKind::SymlinkForbidden`].
	pub fn permit_symbolic_links(&self, allow: bool) {
		self.state.lock().allow_symlinks = allow;
	}

	#[must_use]
	pub fn symbolic_links_permitted(&self) -> bool {
		self.state.lock().allow_symlinks
	}

	// Queries -----------------------------------------------------------

	#[must_use]
	pub fn exists(&self, path: &VPath) -> bool {
		let Ok(norm) = path.normalize().map_err(error::noted) else {
			return false;
		};

		self.state.lock().exists(&norm)
	}

	#[must_use]
	pub fn is_directory(&self, path: &VPath) -> bool {
		let Ok(norm) = path.normalize().map_err(error::noted) else {
			return false;
		};

		self.state.lock().is_directory(&norm)
	}

	/// Always `false` while symbolic links are forbidden.
	#[must_use]
	pub fn is_symlink(&self, path: &VPath) -> bool {
		let Ok(norm) = path.normalize().map_err(error::noted) else {
			return false;
		};

		self.state.lock().is_symlink(&norm)
	}

	/// Metadata from the first mount that knows `path`; an overlaid entry
	/// shadows deeper ones entirely.
	pub fn stat(&self, path: &VPath) -> Result<Stat, Error> {
		let norm = path.normalize().map_err(error::noted)?;
		self.state.lock().stat(&norm).map_err(error::noted)
	}

	pub fn last_mod_time(&self, path: &VPath) -> Result<SystemTime, Error> {
		let norm = path.normalize().map_err(error::noted)?;
		self.state.lock().last_mod_time(&norm).map_err(error::noted)
	}

	/// The source backing `path` after overlay resolution.
	pub fn real_dir(&self, path: &VPath) -> Result<PathBuf, Error> {
		let norm = path.normalize().map_err(error::noted)?;
		self.state.lock().real_dir(&norm).map_err(error::noted)
	}

	/// The merged direct children of `path` across every mount, in
	/// search-path order with first occurrences winning. An empty result
	/// is just an empty `Vec`.
	pub fn enumerate_files(&self, path: &VPath) -> Result<Vec<String>, Error> {
		let norm = path.normalize().map_err(error::noted)?;
		Ok(self.state.lock().enumerate(&norm))
	}

	// File access -------------------------------------------------------

	/// Opens `path` for reading from the first mount that can supply it.
	pub fn open_read(&self, path: &VPath) -> Result<FileHandle, Error> {
		let norm = path.normalize().map_err(error::noted)?;

		// The handle has to register against its mount before the lock
		// drops, or a concurrent unmount could slip between the two.
		let state = self.state.lock();
		let (mount, file) = state.open_read(&norm).map_err(error::noted)?;
		Ok(FileHandle::new(mount, file, HandleMode::Read))
	}

	/// Opens `path` in the write directory, truncating anything there.
	/// Missing parent directories are created.
	pub fn open_write(&self, path: &VPath) -> Result<FileHandle, Error> {
		let norm = path.normalize().map_err(error::noted)?;

		let state = self.state.lock();
		let (mount, file) = state.open_write(&norm, false).map_err(error::noted)?;
		Ok(FileHandle::new(mount, file, HandleMode::Write))
	}

	/// Like [`VirtualFs::open_write`], but positioned at the end of any
	/// existing content.
	pub fn open_append(&self, path: &VPath) -> Result<FileHandle, Error> {
		let norm = path.normalize().map_err(error::noted)?;

		let state = self.state.lock();
		let (mount, file) = state.open_write(&norm, true).map_err(error::noted)?;
		Ok(FileHandle::new(mount, file, HandleMode::Append))
	}

	// Mutation ----------------------------------------------------------

	/// Creates a directory (and any missing parents) in the write
	/// directory. Parents created before a failure stay behind.
	pub fn mkdir(&self, path: &VPath) -> Result<(), Error> {
		let norm = path.normalize().map_err(error::noted)?;
		self.state.lock().mkdir(&norm).map_err(error::noted)
	}

	/// Deletes a file or empty directory in the write directory.
	pub fn delete(&self, path: &VPath) -> Result<(), Error> {
		let norm = path.normalize().map_err(error::noted)?;
		self.state.lock().remove(&norm).map_err(error::noted)
	}

	// Lifecycle ---------------------------------------------------------

	/// One-call setup: makes the preference directory for `org`/`app` the
	/// write dir (creating it if needed), then appends it and the base
	/// dir (and optionally CD-ROM dirs) to the search path, and finally
	/// mounts any archive found in the search path whose name ends in
	/// `.{archive_ext}`, before the directories if `archives_first`.
	pub fn set_sane_config(
		&self,
		org: &str,
		app: &str,
		archive_ext: Option<&str>,
		include_cdroms: bool,
		archives_first: bool,
	) -> Result<(), Error> {
		let pref = self.pref_dir(org, app);

		if fs::create_dir_all(&pref).is_err() || self.set_write_dir(Some(&pref)).is_err() {
			return Err(error::noted(Error::CantSetWriteDir));
		}

		self.mount(&pref, VPath::new(""), true)?;
		let base = self.base_dir.clone();
		self.mount(&base, VPath::new(""), true)?;

		if include_cdroms {
			for cd in self.cdrom_dirs() {
				// Unreadable discs are not fatal.
				if let Err(err) = self.mount(&cd, VPath::new(""), true) {
					warn!("CD-ROM {} not mounted: {err}", cd.display());
				}
			}
		}

		if let Some(ext) = archive_ext {
			let suffix = format!(".{}", ext.to_ascii_lowercase());

			for name in self.enumerate_files(VPath::new(""))? {
				if !name.to_ascii_lowercase().ends_with(&suffix) {
					continue;
				}

				let Ok(real) = self.real_dir(VPath::new(&name)) else {
					continue;
				};

				let full = real.join(&name);

				if let Err(err) = self.mount(&full, VPath::new(""), !archives_first) {
					warn!("archive {} not mounted: {err}", full.display());
				}
			}
		}

		Ok(())
	}

	/// Orderly shutdown: fails with [`ErrorKind::FilesStillOpen`] while
	/// any write handle (then any read handle) is outstanding, otherwise
	/// clears the write directory and the whole search path. Dropping the
	/// object skips the check; handles keep their backing archives alive
	/// on their own.
	pub fn deinit(&self) -> Result<(), Error> {
		use std::sync::atomic::Ordering;

		let mut state = self.state.lock();

		if let Some(write_dir) = &state.write_dir {
			if write_dir.open_writes.load(Ordering::Acquire) != 0 {
				return Err(error::noted(Error::FilesStillOpen));
			}
		}

		state.write_dir = None;

		if state
			.search_path
			.iter()
			.any(|mount| mount.open_reads.load(Ordering::Acquire) != 0)
		{
			return Err(error::noted(Error::FilesStillOpen));
		}

		state.search_path.clear();
		Ok(())
	}
}

impl Default for VirtualFs {
	fn default() -> Self {
		Self::new()
	}
}
