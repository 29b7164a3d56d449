//! Host lookups the core consumes: well-known directories, canonical paths,
//! directory listings, and modification times.

use std::env;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::warn;

#[must_use]
pub(crate) fn base_dir() -> PathBuf {
	if let Ok(exe) = env::current_exe() {
		if let Some(parent) = exe.parent() {
			return parent.to_path_buf();
		}
	}

	env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[must_use]
pub(crate) fn user_dir() -> PathBuf {
	#[cfg(windows)]
	{
		if let Some(profile) = env::var_os("USERPROFILE") {
			return PathBuf::from(profile);
		}
	}

	#[cfg(not(windows))]
	{
		if let Some(home) = env::var_os("HOME") {
			return PathBuf::from(home);
		}
	}

	base_dir()
}

/// Where an application should keep its per-user writable data.
/// XDG-style on Unix, `APPDATA` on Windows.
#[must_use]
pub(crate) fn pref_dir(org: &str, app: &str) -> PathBuf {
	#[cfg(windows)]
	let root = env::var_os("APPDATA")
		.map(PathBuf::from)
		.unwrap_or_else(user_dir);

	#[cfg(not(windows))]
	let root = env::var_os("XDG_DATA_HOME")
		.map(PathBuf::from)
		.unwrap_or_else(|| user_dir().join(".local/share"));

	root.join(org).join(app)
}

pub(crate) fn real_path(path: &Path) -> io::Result<PathBuf> {
	fs::canonicalize(path)
}

/// Mounted CD-ROM file systems, best-effort. Only the Linux mount table
/// is consulted; everywhere else the answer is empty.
#[must_use]
pub(crate) fn cdrom_dirs() -> Vec<PathBuf> {
	#[cfg(target_os = "linux")]
	{
		let Ok(mounts) = fs::read_to_string("/proc/mounts") else {
			return Vec::new();
		};

		mounts
			.lines()
			.filter_map(|line| {
				let mut fields = line.split_whitespace();
				let _device = fields.next()?;
				let mount_point = fields.next()?;
				let fs_type = fields.next()?;

				matches!(fs_type, "iso9660" | "udf").then(|| PathBuf::from(mount_point))
			})
			.collect()
	}

	#[cfg(not(target_os = "linux"))]
	Vec::new()
}

/// Names of the direct children of a real directory.
/// Non-UTF-8 names cannot appear in the virtual namespace and are skipped.
pub(crate) fn list_dir(path: &Path) -> io::Result<Vec<String>> {
	let mut names = Vec::new();

	for dirent in fs::read_dir(path)? {
		let dirent = dirent?;

		match dirent.file_name().into_string() {
			Ok(name) => names.push(name),
			Err(raw) => warn!(
				"skipping non-UTF-8 name in {}: {:?}",
				path.display(),
				raw
			),
		}
	}

	Ok(names)
}

pub(crate) fn mod_time(path: &Path) -> io::Result<SystemTime> {
	fs::metadata(path)?.modified()
}

/// `Read::read`, retried through interrupted system calls.
pub(crate) fn read_retrying<R: Read + ?Sized>(
	reader: &mut R,
	buf: &mut [u8],
) -> io::Result<usize> {
	loop {
		match reader.read(buf) {
			Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
			other => return other,
		}
	}
}

/// `Write::write`, retried through interrupted system calls.
pub(crate) fn write_retrying<W: Write + ?Sized>(
	writer: &mut W,
	buf: &[u8],
) -> io::Result<usize> {
	loop {
		match writer.write(buf) {
			Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
			other => return other,
		}
	}
}
