//! Failure reporting: the rich error type, its flat discriminants, and the
//! per-thread last-error slot.

use std::cell::Cell;

use zip_structs::zip_error::ZipReadError;

/// One discriminant per failure class the library can report.
///
/// This is what [`last_error`](crate::last_error) hands back; the richer
/// [`Error`] carries payloads where there is a useful cause to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	AlreadyInitialized,
	NotInitialized,
	InvalidArgument,
	OutOfMemory,
	FilesStillOpen,
	NoWriteDirectory,
	NotInSearchPath,
	NotSupported,
	UnsupportedArchive,
	NoSuchFile,
	NoSuchPath,
	InsecurePath,
	SymlinkForbidden,
	TooManySymlinks,
	NotADirectory,
	NotAFile,
	PastEof,
	SeekOutOfRange,
	ReadOnlyArchive,
	Io,
	Corrupt,
	DataError,
	CompressionError,
	FileExists,
	CantSetWriteDir,
	NotAHandle,
}

#[derive(Debug)]
pub enum Error {
	AlreadyInitialized,
	NotInitialized,
	InvalidArgument,
	OutOfMemory,
	FilesStillOpen,
	NoWriteDirectory,
	NotInSearchPath,
	NotSupported,
	UnsupportedArchive,
	NoSuchFile,
	NoSuchPath,
	InsecurePath,
	SymlinkForbidden,
	TooManySymlinks,
	NotADirectory,
	NotAFile,
	PastEof,
	SeekOutOfRange,
	ReadOnlyArchive,
	Io(std::io::Error),
	Corrupt(&'static str),
	DataError,
	Compression(std::io::Error),
	FileExists,
	CantSetWriteDir,
	NotAHandle,
	Zip(ZipReadError),
}

impl Error {
	#[must_use]
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::AlreadyInitialized => ErrorKind::AlreadyInitialized,
			Self::NotInitialized => ErrorKind::NotInitialized,
			Self::InvalidArgument => ErrorKind::InvalidArgument,
			Self::OutOfMemory => ErrorKind::OutOfMemory,
			Self::FilesStillOpen => ErrorKind::FilesStillOpen,
			Self::NoWriteDirectory => ErrorKind::NoWriteDirectory,
			Self::NotInSearchPath => ErrorKind::NotInSearchPath,
			Self::NotSupported => ErrorKind::NotSupported,
			Self::UnsupportedArchive => ErrorKind::UnsupportedArchive,
			Self::NoSuchFile => ErrorKind::NoSuchFile,
			Self::NoSuchPath => ErrorKind::NoSuchPath,
			Self::InsecurePath => ErrorKind::InsecurePath,
			Self::SymlinkForbidden => ErrorKind::SymlinkForbidden,
			Self::TooManySymlinks => ErrorKind::TooManySymlinks,
			Self::NotADirectory => ErrorKind::NotADirectory,
			Self::NotAFile => ErrorKind::NotAFile,
			Self::PastEof => ErrorKind::PastEof,
			Self::SeekOutOfRange => ErrorKind::SeekOutOfRange,
			Self::ReadOnlyArchive => ErrorKind::ReadOnlyArchive,
			Self::Io(_) => ErrorKind::Io,
			Self::Corrupt(_) => ErrorKind::Corrupt,
			Self::DataError => ErrorKind::DataError,
			Self::Compression(_) => ErrorKind::CompressionError,
			Self::FileExists => ErrorKind::FileExists,
			Self::CantSetWriteDir => ErrorKind::CantSetWriteDir,
			Self::NotAHandle => ErrorKind::NotAHandle,
			Self::Zip(_) => ErrorKind::Corrupt,
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Io(err) | Self::Compression(err) => Some(err),
			Self::Zip(err) => Some(err),
			_ => None,
		}
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::AlreadyInitialized => write!(f, "already initialized"),
			Self::NotInitialized => write!(f, "not initialized"),
			Self::InvalidArgument => write!(f, "invalid argument"),
			Self::OutOfMemory => write!(f, "out of memory"),
			Self::FilesStillOpen => write!(f, "files are still open"),
			Self::NoWriteDirectory => write!(f, "no write directory is set"),
			Self::NotInSearchPath => write!(f, "no such entry in the search path"),
			Self::NotSupported => write!(f, "operation not supported"),
			Self::UnsupportedArchive => write!(f, "unsupported archive type"),
			Self::NoSuchFile => write!(f, "no such file"),
			Self::NoSuchPath => write!(f, "no such path"),
			Self::InsecurePath => write!(f, "insecure path"),
			Self::SymlinkForbidden => write!(f, "symbolic links are disallowed"),
			Self::TooManySymlinks => write!(f, "too many levels of symbolic links"),
			Self::NotADirectory => write!(f, "not a directory"),
			Self::NotAFile => write!(f, "not a file"),
			Self::PastEof => write!(f, "attempted to move past the end of the file"),
			Self::SeekOutOfRange => write!(f, "seek target is out of range"),
			Self::ReadOnlyArchive => write!(f, "archive is read-only"),
			Self::Io(err) => write!(f, "I/O error: {err}"),
			Self::Corrupt(what) => write!(f, "corrupt archive: {what}"),
			Self::DataError => write!(f, "malformed data"),
			Self::Compression(err) => write!(f, "(de)compression error: {err}"),
			Self::FileExists => write!(f, "file already exists"),
			Self::CantSetWriteDir => write!(f, "failed to set the write directory"),
			Self::NotAHandle => write!(f, "not a file handle"),
			Self::Zip(err) => write!(f, "zip archive read error: {err}"),
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(value: std::io::Error) -> Self {
		Self::Io(value)
	}
}

impl From<Error> for std::io::Error {
	fn from(value: Error) -> Self {
		match value {
			Error::Io(err) | Error::Compression(err) => err,
			other => std::io::Error::other(other),
		}
	}
}

thread_local! {
	static LAST_ERROR: Cell<Option<ErrorKind>> = const { Cell::new(None) };
}

/// Records `kind` as the calling thread's most recent failure,
/// overwriting whatever was there.
pub(crate) fn note(kind: ErrorKind) {
	LAST_ERROR.with(|slot| slot.set(Some(kind)));
}

/// Records the error in the calling thread's slot and hands it back,
/// for use at the public API boundary.
pub(crate) fn noted(err: Error) -> Error {
	note(err.kind());
	err
}

/// Reads and clears the calling thread's slot.
#[must_use]
pub(crate) fn take() -> Option<ErrorKind> {
	LAST_ERROR.with(Cell::take)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn slot_smoke() {
		assert_eq!(take(), None);
		note(ErrorKind::NoSuchFile);
		note(ErrorKind::PastEof);
		assert_eq!(take(), Some(ErrorKind::PastEof));
		assert_eq!(take(), None);
	}
}
