//! Mount entries, archive probing, the per-request security check, and
//! the first-match resolver over the ordered search path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use indexmap::IndexSet;
use log::{debug, info};

use crate::archive::{Archive, ArchiveFile, Stat, ARCHIVERS};
use crate::error::{self, Error};
use crate::path::{VPath, VPathBuf};

/// One element of the search path: a source, the virtual point its
/// contents appear under, and the opened backend.
pub(crate) struct Mount {
	pub(crate) source: PathBuf,
	/// Normalized; the empty string is the namespace root.
	pub(crate) point: VPathBuf,
	pub(crate) archive: Box<dyn Archive>,
	pub(crate) open_reads: AtomicUsize,
	pub(crate) open_writes: AtomicUsize,
}

impl Mount {
	/// Probes every registered backend in order; the first to recognize
	/// the source opens it. A backend that probes successfully but fails
	/// to open is final; nothing else gets tried after it.
	pub(crate) fn open(source: &Path, point: &VPath, for_writing: bool) -> Result<Self, Error> {
		let point = point.normalize().map_err(|_| Error::InvalidArgument)?;

		let archiver = ARCHIVERS
			.iter()
			.find(|archiver| archiver.probe(source, for_writing))
			.ok_or(Error::UnsupportedArchive)?;

		let archive = archiver.open(source, for_writing)?;

		Ok(Self {
			source: source.to_path_buf(),
			point,
			archive,
			open_reads: AtomicUsize::new(0),
			open_writes: AtomicUsize::new(0),
		})
	}

	/// If this mount covers `vpath`, the remainder to hand its backend.
	/// Both sides must already be normalized.
	pub(crate) fn split<'p>(&self, vpath: &'p VPath) -> Option<&'p VPath> {
		let point = self.point.as_str();

		if point.is_empty() {
			return Some(vpath);
		}

		if vpath.as_str() == point {
			return Some(VPath::new(""));
		}

		vpath
			.as_str()
			.strip_prefix(point)
			.and_then(|rest| rest.strip_prefix('/'))
			.map(VPath::new)
	}

	/// The symlink half of the per-request security policy: with links
	/// denied, every prefix of the remainder is checked against the
	/// backend. (Malformed components are rejected before any mount is
	/// consulted.) Failures land in the thread's error slot even when the
	/// overall operation degrades to "not found".
	pub(crate) fn verify_symlink_policy(
		&self,
		rest: &VPath,
		allow_symlinks: bool,
	) -> Result<(), Error> {
		if allow_symlinks {
			return Ok(());
		}

		let mut prefix = String::with_capacity(rest.byte_len());

		for comp in rest.components() {
			if !prefix.is_empty() {
				prefix.push('/');
			}

			prefix.push_str(comp);

			if self.archive.is_symlink(VPath::new(&prefix))? {
				return Err(error::noted(Error::SymlinkForbidden));
			}
		}

		Ok(())
	}
}

/// Everything behind the library mutex.
pub(crate) struct VfsState {
	pub(crate) search_path: Vec<Arc<Mount>>,
	pub(crate) write_dir: Option<Arc<Mount>>,
	pub(crate) allow_symlinks: bool,
}

impl VfsState {
	pub(crate) fn new() -> Self {
		Self {
			search_path: Vec::new(),
			write_dir: None,
			allow_symlinks: false,
		}
	}

	pub(crate) fn mount(
		&mut self,
		source: &Path,
		point: &VPath,
		append: bool,
	) -> Result<(), Error> {
		let mount = Arc::new(Mount::open(source, point, false)?);

		info!(
			"mounted {} at \"/{}\"",
			mount.source.display(),
			mount.point
		);

		if append {
			self.search_path.push(mount);
		} else {
			self.search_path.insert(0, mount);
		}

		Ok(())
	}

	pub(crate) fn unmount(&mut self, source: &Path) -> Result<(), Error> {
		let index = self
			.search_path
			.iter()
			.position(|mount| mount.source == source)
			.ok_or(Error::NotInSearchPath)?;

		if self.search_path[index].open_reads.load(Ordering::Acquire) != 0 {
			return Err(Error::FilesStillOpen);
		}

		let mount = self.search_path.remove(index);
		info!("unmounted {}", mount.source.display());
		Ok(())
	}

	pub(crate) fn set_write_dir(&mut self, path: Option<&Path>) -> Result<(), Error> {
		if let Some(current) = &self.write_dir {
			if current.open_writes.load(Ordering::Acquire) != 0 {
				return Err(Error::FilesStillOpen);
			}
		}

		self.write_dir = None;

		if let Some(path) = path {
			let mount = Mount::open(path, VPath::new(""), true)?;
			info!("write directory is now {}", path.display());
			self.write_dir = Some(Arc::new(mount));
		}

		Ok(())
	}

	fn write_mount(&self) -> Result<&Arc<Mount>, Error> {
		self.write_dir.as_ref().ok_or(Error::NoWriteDirectory)
	}

	/// Walks mounts in order; `found` is called with the first backend to
	/// report existence of the remainder, and its answer is final.
	fn first_match<T>(
		&self,
		vpath: &VPath,
		mut found: impl FnMut(&Arc<Mount>, &VPath) -> Result<T, Error>,
	) -> Result<T, Error> {
		for mount in &self.search_path {
			let Some(rest) = mount.split(vpath) else {
				continue;
			};

			if mount
				.verify_symlink_policy(rest, self.allow_symlinks)
				.is_err()
			{
				continue;
			}

			match mount.archive.exists(rest) {
				Ok(true) => return found(mount, rest),
				Ok(false) => {}
				// e.g. a circular symlink chain; remembered for the
				// caller even when the operation degrades to "not found".
				Err(err) => error::note(err.kind()),
			}
		}

		Err(Error::NoSuchPath)
	}

	pub(crate) fn real_dir(&self, vpath: &VPath) -> Result<PathBuf, Error> {
		self.first_match(vpath, |mount, _| Ok(mount.source.clone()))
	}

	pub(crate) fn exists(&self, vpath: &VPath) -> bool {
		self.first_match(vpath, |_, _| Ok(())).is_ok()
	}

	pub(crate) fn is_directory(&self, vpath: &VPath) -> bool {
		self.first_match(vpath, |mount, rest| mount.archive.is_directory(rest))
			.unwrap_or(false)
	}

	pub(crate) fn is_symlink(&self, vpath: &VPath) -> bool {
		if !self.allow_symlinks {
			return false;
		}

		self.first_match(vpath, |mount, rest| mount.archive.is_symlink(rest))
			.unwrap_or(false)
	}

	pub(crate) fn stat(&self, vpath: &VPath) -> Result<Stat, Error> {
		self.first_match(vpath, |mount, rest| mount.archive.stat(rest))
	}

	pub(crate) fn last_mod_time(&self, vpath: &VPath) -> Result<SystemTime, Error> {
		self.first_match(vpath, |mount, rest| mount.archive.last_mod_time(rest))
	}

	/// Merged enumeration: every mount contributes its direct children in
	/// its own order; across mounts, search-path order rules and the first
	/// occurrence of a name wins.
	pub(crate) fn enumerate(&self, vpath: &VPath) -> Vec<String> {
		let mut merged: IndexSet<String> = IndexSet::new();
		let omit_symlinks = !self.allow_symlinks;

		for mount in &self.search_path {
			let Some(rest) = mount.split(vpath) else {
				continue;
			};

			if mount
				.verify_symlink_policy(rest, self.allow_symlinks)
				.is_err()
			{
				continue;
			}

			let result = mount.archive.enumerate(rest, omit_symlinks, &mut |name| {
				merged.insert(name.to_owned());
			});

			if let Err(err) = result {
				debug!(
					"no enumeration of \"/{vpath}\" from {}: {err}",
					mount.source.display()
				);
			}
		}

		merged.into_iter().collect()
	}

	pub(crate) fn open_read(
		&self,
		vpath: &VPath,
	) -> Result<(Arc<Mount>, Box<dyn ArchiveFile>), Error> {
		let mut last_err = None;

		for mount in &self.search_path {
			let Some(rest) = mount.split(vpath) else {
				continue;
			};

			if mount
				.verify_symlink_policy(rest, self.allow_symlinks)
				.is_err()
			{
				continue;
			}

			match mount.archive.open_read(rest) {
				Ok(file) => return Ok((mount.clone(), file)),
				Err(err) => {
					debug!(
						"\"/{vpath}\" not opened from {}: {err}",
						mount.source.display()
					);

					if !matches!(err, Error::NoSuchFile) {
						last_err = Some(err);
					}
				}
			}
		}

		Err(last_err.unwrap_or(Error::NoSuchFile))
	}

	pub(crate) fn open_write(
		&self,
		vpath: &VPath,
		append: bool,
	) -> Result<(Arc<Mount>, Box<dyn ArchiveFile>), Error> {
		let mount = self.write_mount()?;
		mount.verify_symlink_policy(vpath, self.allow_symlinks)?;

		let file = if append {
			mount.archive.open_append(vpath)?
		} else {
			mount.archive.open_write(vpath)?
		};

		Ok((mount.clone(), file))
	}

	/// Creates each missing level in turn. Partial success is real: levels
	/// already created stay behind if a later one fails.
	pub(crate) fn mkdir(&self, vpath: &VPath) -> Result<(), Error> {
		if vpath.is_root() {
			return Err(Error::InvalidArgument);
		}

		let mount = self.write_mount()?;
		mount.verify_symlink_policy(vpath, self.allow_symlinks)?;

		let mut prefix = String::with_capacity(vpath.byte_len());

		for comp in vpath.components() {
			if !prefix.is_empty() {
				prefix.push('/');
			}

			prefix.push_str(comp);
			mount.archive.mkdir(VPath::new(&prefix))?;
		}

		Ok(())
	}

	pub(crate) fn remove(&self, vpath: &VPath) -> Result<(), Error> {
		if vpath.is_root() {
			return Err(Error::InvalidArgument);
		}

		let mount = self.write_mount()?;
		mount.verify_symlink_policy(vpath, self.allow_symlinks)?;
		mount.archive.remove(vpath)
	}
}
