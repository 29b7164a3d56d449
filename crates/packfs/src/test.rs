use std::fs;
use std::io::Read;
use std::path::PathBuf;

use tempfile::TempDir;

use super::*;

// Archive image builders ////////////////////////////////////////////////

fn build_grp(entries: &[(&str, &[u8])]) -> Vec<u8> {
	let mut out = Vec::new();
	out.extend_from_slice(b"KenSilverman");
	out.extend_from_slice(&u32::try_from(entries.len()).unwrap().to_le_bytes());

	for (name, data) in entries {
		let mut raw = [0u8; 12];
		raw[..name.len()].copy_from_slice(name.as_bytes());
		out.extend_from_slice(&raw);
		out.extend_from_slice(&u32::try_from(data.len()).unwrap().to_le_bytes());
	}

	for (_, data) in entries {
		out.extend_from_slice(data);
	}

	out
}

fn build_hog(entries: &[(&str, &[u8])]) -> Vec<u8> {
	let mut out = Vec::new();
	out.extend_from_slice(b"DHF");

	for (name, data) in entries {
		let mut raw = [0u8; 13];
		raw[..name.len()].copy_from_slice(name.as_bytes());
		out.extend_from_slice(&raw);
		out.extend_from_slice(&u32::try_from(data.len()).unwrap().to_le_bytes());
		out.extend_from_slice(data);
	}

	out
}

fn build_wad(entries: &[(&str, &[u8])]) -> Vec<u8> {
	let mut out = Vec::new();
	out.extend_from_slice(b"PWAD");
	out.extend_from_slice(&u32::try_from(entries.len()).unwrap().to_le_bytes());

	let mut data_len = 0u32;

	for (_, data) in entries {
		data_len += u32::try_from(data.len()).unwrap();
	}

	out.extend_from_slice(&(12 + data_len).to_le_bytes());

	let mut starts = Vec::new();

	for (_, data) in entries {
		starts.push(u32::try_from(out.len()).unwrap());
		out.extend_from_slice(data);
	}

	for ((name, data), start) in entries.iter().zip(starts) {
		out.extend_from_slice(&start.to_le_bytes());
		out.extend_from_slice(&u32::try_from(data.len()).unwrap().to_le_bytes());
		let mut raw = [0u8; 8];
		raw[..name.len()].copy_from_slice(name.as_bytes());
		out.extend_from_slice(&raw);
	}

	out
}

fn build_pak(entries: &[(&str, &[u8])]) -> Vec<u8> {
	let mut out = Vec::new();
	out.extend_from_slice(b"PACK");
	out.extend_from_slice(&[0u8; 8]); // patched below

	let mut starts = Vec::new();

	for (_, data) in entries {
		starts.push(u32::try_from(out.len()).unwrap());
		out.extend_from_slice(data);
	}

	let dir_offset = u32::try_from(out.len()).unwrap();

	for ((name, data), start) in entries.iter().zip(starts) {
		let mut raw = [0u8; 56];
		raw[..name.len()].copy_from_slice(name.as_bytes());
		out.extend_from_slice(&raw);
		out.extend_from_slice(&start.to_le_bytes());
		out.extend_from_slice(&u32::try_from(data.len()).unwrap().to_le_bytes());
	}

	let dir_len = u32::try_from(entries.len() * 64).unwrap();
	out[4..8].copy_from_slice(&dir_offset.to_le_bytes());
	out[8..12].copy_from_slice(&dir_len.to_le_bytes());
	out
}

struct ZipMember<'m> {
	name: &'m str,
	data: &'m [u8],
	deflate: bool,
	symlink: bool,
}

impl<'m> ZipMember<'m> {
	fn plain(name: &'m str, data: &'m [u8]) -> Self {
		Self {
			name,
			data,
			deflate: false,
			symlink: false,
		}
	}

	fn deflated(name: &'m str, data: &'m [u8]) -> Self {
		Self {
			name,
			data,
			deflate: true,
			symlink: false,
		}
	}

	fn link(name: &'m str, target: &'m str) -> Self {
		Self {
			name,
			data: target.as_bytes(),
			deflate: false,
			symlink: true,
		}
	}
}

fn build_zip(members: &[ZipMember]) -> Vec<u8> {
	let mut out = Vec::new();
	let mut locals = Vec::new();

	for member in members {
		let (stored, method): (Vec<u8>, u16) = if member.deflate {
			let mut enc = flate2::read::DeflateEncoder::new(
				member.data,
				flate2::Compression::default(),
			);
			let mut compressed = Vec::new();
			enc.read_to_end(&mut compressed).unwrap();
			(compressed, 8)
		} else {
			(member.data.to_vec(), 0)
		};

		let mut crc = flate2::Crc::new();
		crc.update(member.data);
		let crc = crc.sum();

		let local_pos = u32::try_from(out.len()).unwrap();
		out.extend_from_slice(b"PK\x03\x04");
		out.extend_from_slice(&20u16.to_le_bytes()); // version needed
		out.extend_from_slice(&0u16.to_le_bytes()); // flags
		out.extend_from_slice(&method.to_le_bytes());
		out.extend_from_slice(&0u32.to_le_bytes()); // DOS time + date
		out.extend_from_slice(&crc.to_le_bytes());
		out.extend_from_slice(&u32::try_from(stored.len()).unwrap().to_le_bytes());
		out.extend_from_slice(&u32::try_from(member.data.len()).unwrap().to_le_bytes());
		out.extend_from_slice(&u16::try_from(member.name.len()).unwrap().to_le_bytes());
		out.extend_from_slice(&0u16.to_le_bytes()); // extra field length
		out.extend_from_slice(member.name.as_bytes());
		out.extend_from_slice(&stored);

		locals.push((local_pos, method, crc, u32::try_from(stored.len()).unwrap()));
	}

	let cd_start = u32::try_from(out.len()).unwrap();

	for (member, (local_pos, method, crc, stored_len)) in members.iter().zip(&locals) {
		out.extend_from_slice(b"PK\x01\x02");
		out.extend_from_slice(&((3u16 << 8) | 20).to_le_bytes()); // made by: Unix
		out.extend_from_slice(&20u16.to_le_bytes()); // version needed
		out.extend_from_slice(&0u16.to_le_bytes()); // flags
		out.extend_from_slice(&method.to_le_bytes());
		out.extend_from_slice(&0u32.to_le_bytes()); // DOS time + date
		out.extend_from_slice(&crc.to_le_bytes());
		out.extend_from_slice(&stored_len.to_le_bytes());
		out.extend_from_slice(&u32::try_from(member.data.len()).unwrap().to_le_bytes());
		out.extend_from_slice(&u16::try_from(member.name.len()).unwrap().to_le_bytes());
		out.extend_from_slice(&0u16.to_le_bytes()); // extra field length
		out.extend_from_slice(&0u16.to_le_bytes()); // comment length
		out.extend_from_slice(&0u16.to_le_bytes()); // disk number start
		out.extend_from_slice(&0u16.to_le_bytes()); // internal attributes

		let mode: u32 = if member.symlink { 0o120777 } else { 0o100644 };
		out.extend_from_slice(&(mode << 16).to_le_bytes());
		out.extend_from_slice(&local_pos.to_le_bytes());
		out.extend_from_slice(member.name.as_bytes());
	}

	let cd_len = u32::try_from(out.len()).unwrap() - cd_start;
	out.extend_from_slice(b"PK\x05\x06");
	out.extend_from_slice(&0u32.to_le_bytes()); // disk numbers
	out.extend_from_slice(&u16::try_from(members.len()).unwrap().to_le_bytes());
	out.extend_from_slice(&u16::try_from(members.len()).unwrap().to_le_bytes());
	out.extend_from_slice(&cd_len.to_le_bytes());
	out.extend_from_slice(&cd_start.to_le_bytes());
	out.extend_from_slice(&0u16.to_le_bytes()); // comment length
	out
}

// Fixture helpers ///////////////////////////////////////////////////////

fn write_archive(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
	let path = dir.path().join(name);
	fs::write(&path, bytes).unwrap();
	path
}

fn read_all(handle: &mut FileHandle) -> Vec<u8> {
	let mut out = Vec::new();
	let mut buf = [0u8; 48];

	loop {
		match handle.read(&mut buf).unwrap() {
			0 => break,
			count => out.extend_from_slice(&buf[..count]),
		}
	}

	out
}

fn sample_grp(dir: &TempDir) -> PathBuf {
	// Deliberately out of order; the mount must sort.
	write_archive(
		dir,
		"sample.grp",
		&build_grp(&[("B.TXT", b"HI!" as &[u8]), ("A.TXT", b"HELLO")]),
	)
}

// Flat-index backends ///////////////////////////////////////////////////

#[test]
fn grp_smoke() {
	let dir = TempDir::new().unwrap();
	let grp = sample_grp(&dir);

	let vfs = VirtualFs::new();
	vfs.mount(&grp, VPath::new(""), true).unwrap();

	assert_eq!(
		vfs.enumerate_files(VPath::new("")).unwrap(),
		vec!["A.TXT".to_string(), "B.TXT".to_string()]
	);

	let mut handle = vfs.open_read(VPath::new("A.TXT")).unwrap();
	assert_eq!(handle.length().unwrap(), 5);

	let mut buf = [0u8; 5];
	assert_eq!(handle.read(&mut buf).unwrap(), 5);
	assert_eq!(&buf, b"HELLO");

	assert_eq!(handle.read(&mut buf[..1]).unwrap(), 0);
	assert!(handle.eof());

	let mut b = vfs.open_read(VPath::new("B.TXT")).unwrap();
	assert_eq!(read_all(&mut b), b"HI!");
}

#[test]
fn grp_lookup_is_case_insensitive() {
	let dir = TempDir::new().unwrap();
	let grp = sample_grp(&dir);

	let vfs = VirtualFs::new();
	vfs.mount(&grp, VPath::new(""), true).unwrap();

	assert!(vfs.exists(VPath::new("a.txt")));
	assert!(vfs.exists(VPath::new("A.txt")));
	assert!(!vfs.is_directory(VPath::new("A.TXT")));
}

#[test]
fn grp_name_limit() {
	let dir = TempDir::new().unwrap();

	let grp = write_archive(
		&dir,
		"names.grp",
		&build_grp(&[("TILES000.ART", b"artdata")]),
	);

	let vfs = VirtualFs::new();
	vfs.mount(&grp, VPath::new(""), true).unwrap();

	// Exactly 12 characters works; 13 can never match and must fail
	// without probing the table.
	assert!(vfs.exists(VPath::new("TILES000.ART")));

	let err = vfs.open_read(VPath::new("TILES0000.ART")).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NoSuchFile);
}

#[test]
fn hog_smoke() {
	let dir = TempDir::new().unwrap();

	let hog = write_archive(
		&dir,
		"sample.hog",
		&build_hog(&[
			("descent.txb", b"briefing text" as &[u8]),
			("level01.rdl", b"\x01\x02\x03\x04"),
		]),
	);

	let vfs = VirtualFs::new();
	vfs.mount(&hog, VPath::new(""), true).unwrap();

	let mut handle = vfs.open_read(VPath::new("level01.rdl")).unwrap();
	assert_eq!(read_all(&mut handle), b"\x01\x02\x03\x04");

	// 13 characters is this format's name ceiling.
	assert!(vfs.exists(VPath::new("descent.txb")));
	assert!(!vfs.exists(VPath::new("descent01.txb1")));
	assert_eq!(last_error(), None);
}

#[test]
fn wad_smoke() {
	let dir = TempDir::new().unwrap();

	let wad = write_archive(
		&dir,
		"sample.wad",
		&build_wad(&[("STBAR", b"statusbar" as &[u8]), ("E1M1", b"\xAA\xBB")]),
	);

	let vfs = VirtualFs::new();
	vfs.mount(&wad, VPath::new(""), true).unwrap();

	assert_eq!(
		vfs.enumerate_files(VPath::new("")).unwrap(),
		vec!["E1M1".to_string(), "STBAR".to_string()]
	);

	let mut handle = vfs.open_read(VPath::new("STBAR")).unwrap();
	assert_eq!(read_all(&mut handle), b"statusbar");

	let stat = vfs.stat(VPath::new("E1M1")).unwrap();
	assert_eq!(stat.size, Some(2));
	assert_eq!(stat.kind, FileKind::File);
	assert!(stat.read_only);
}

#[test]
fn flat_seek_boundaries() {
	let dir = TempDir::new().unwrap();
	let grp = sample_grp(&dir);

	let vfs = VirtualFs::new();
	vfs.mount(&grp, VPath::new(""), true).unwrap();

	let mut handle = vfs.open_read(VPath::new("A.TXT")).unwrap();
	let len = handle.length().unwrap();

	// Seeking to the exact length parks the handle at end-of-file;
	// one past it is out of bounds.
	handle.seek(len).unwrap();
	assert!(handle.eof());

	let err = handle.seek(len + 1).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::PastEof);

	// `seek(tell())` changes nothing about subsequent reads.
	handle.seek(1).unwrap();
	handle.seek(handle.tell()).unwrap();
	assert_eq!(read_all(&mut handle), b"ELLO");
}

// Hierarchical backend //////////////////////////////////////////////////

#[test]
fn qpak_smoke() {
	let dir = TempDir::new().unwrap();

	let pak = write_archive(
		&dir,
		"sample.pak",
		&build_pak(&[
			("gfx/a.png", b"imageA" as &[u8]),
			("gfx/b.png", b"imageB"),
			("snd/x.wav", b"wave"),
		]),
	);

	let vfs = VirtualFs::new();
	vfs.mount(&pak, VPath::new(""), true).unwrap();

	assert_eq!(
		vfs.enumerate_files(VPath::new("")).unwrap(),
		vec!["gfx".to_string(), "snd".to_string()]
	);

	assert_eq!(
		vfs.enumerate_files(VPath::new("gfx")).unwrap(),
		vec!["a.png".to_string(), "b.png".to_string()]
	);

	assert!(vfs.is_directory(VPath::new("gfx")));
	assert!(!vfs.is_directory(VPath::new("gfx/a.png")));

	let mut handle = vfs.open_read(VPath::new("gfx/b.png")).unwrap();
	assert_eq!(read_all(&mut handle), b"imageB");

	let stat = vfs.stat(VPath::new("snd")).unwrap();
	assert_eq!(stat.kind, FileKind::Directory);

	let err = vfs.open_read(VPath::new("gfx/missing.png")).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NoSuchFile);
}

// Directory backend & overlay semantics /////////////////////////////////

#[test]
fn overlay_shadowing() {
	let dir1 = TempDir::new().unwrap();
	let dir2 = TempDir::new().unwrap();
	fs::write(dir1.path().join("foo.txt"), b"one").unwrap();
	fs::write(dir2.path().join("foo.txt"), b"two").unwrap();

	let vfs = VirtualFs::new();
	vfs.mount(dir1.path(), VPath::new(""), true).unwrap();
	vfs.mount(dir2.path(), VPath::new(""), true).unwrap();

	assert_eq!(vfs.real_dir(VPath::new("foo.txt")).unwrap(), dir1.path());

	let mut handle = vfs.open_read(VPath::new("foo.txt")).unwrap();
	assert_eq!(read_all(&mut handle), b"one");
	drop(handle);

	let stat = vfs.stat(VPath::new("foo.txt")).unwrap();
	assert_eq!(stat.size, Some(3));

	vfs.unmount(dir1.path()).unwrap();

	assert_eq!(vfs.real_dir(VPath::new("foo.txt")).unwrap(), dir2.path());

	let mut handle = vfs.open_read(VPath::new("foo.txt")).unwrap();
	assert_eq!(read_all(&mut handle), b"two");
}

#[test]
fn write_dir_roundtrip() {
	let dir = TempDir::new().unwrap();

	let vfs = VirtualFs::new();
	vfs.set_write_dir(Some(dir.path())).unwrap();
	assert_eq!(vfs.write_dir(), Some(dir.path().to_path_buf()));

	// No mkdir beforehand; the missing parent comes into being.
	let mut handle = vfs.open_write(VPath::new("sub/x.dat")).unwrap();
	assert_eq!(handle.write(b"\xDE\xAD\xBE\xEF").unwrap(), 4);
	handle.close().unwrap();

	vfs.mount(dir.path(), VPath::new(""), true).unwrap();

	let mut handle = vfs.open_read(VPath::new("sub/x.dat")).unwrap();
	assert_eq!(handle.length().unwrap(), 4);
	assert_eq!(read_all(&mut handle), b"\xDE\xAD\xBE\xEF");
}

#[test]
fn append_extends() {
	let dir = TempDir::new().unwrap();

	let vfs = VirtualFs::new();
	vfs.set_write_dir(Some(dir.path())).unwrap();
	vfs.mount(dir.path(), VPath::new(""), true).unwrap();

	let mut handle = vfs.open_write(VPath::new("log.txt")).unwrap();
	handle.write(b"first").unwrap();
	handle.close().unwrap();

	let mut handle = vfs.open_append(VPath::new("log.txt")).unwrap();
	assert_eq!(handle.tell(), 5);
	handle.write(b"|second").unwrap();
	handle.close().unwrap();

	let mut handle = vfs.open_read(VPath::new("log.txt")).unwrap();
	assert_eq!(read_all(&mut handle), b"first|second");
}

#[test]
fn mkdir_and_delete() {
	let dir = TempDir::new().unwrap();

	let vfs = VirtualFs::new();
	vfs.set_write_dir(Some(dir.path())).unwrap();
	vfs.mount(dir.path(), VPath::new(""), true).unwrap();

	vfs.mkdir(VPath::new("a/b/c")).unwrap();
	assert!(vfs.is_directory(VPath::new("a/b/c")));

	// Re-running over existing levels is not an error.
	vfs.mkdir(VPath::new("a/b")).unwrap();

	vfs.delete(VPath::new("a/b/c")).unwrap();
	assert!(!vfs.exists(VPath::new("a/b/c")));

	let err = vfs.delete(VPath::new("a/b/c")).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NoSuchFile);
}

#[test]
fn no_write_dir() {
	let vfs = VirtualFs::new();

	let err = vfs.open_write(VPath::new("x.dat")).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NoWriteDirectory);
	assert_eq!(last_error(), Some(ErrorKind::NoWriteDirectory));

	let err = vfs.mkdir(VPath::new("d")).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NoWriteDirectory);
}

#[test]
fn archives_are_read_only() {
	let dir = TempDir::new().unwrap();
	let grp = sample_grp(&dir);

	let vfs = VirtualFs::new();
	vfs.mount(&grp, VPath::new(""), true).unwrap();

	// Mutation only ever consults the write directory; with none set,
	// the archive is never even asked.
	let err = vfs.open_write(VPath::new("A.TXT")).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NoWriteDirectory);
}

// Mount management //////////////////////////////////////////////////////

#[test]
fn unmount_refused_while_open() {
	let dir = TempDir::new().unwrap();
	let grp = sample_grp(&dir);

	let vfs = VirtualFs::new();
	vfs.mount(&grp, VPath::new(""), true).unwrap();

	let handle = vfs.open_read(VPath::new("A.TXT")).unwrap();

	let err = vfs.unmount(&grp).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::FilesStillOpen);

	drop(handle);
	vfs.unmount(&grp).unwrap();
}

#[test]
fn write_dir_change_refused_while_open() {
	let dir1 = TempDir::new().unwrap();
	let dir2 = TempDir::new().unwrap();

	let vfs = VirtualFs::new();
	vfs.set_write_dir(Some(dir1.path())).unwrap();

	let handle = vfs.open_write(VPath::new("pending.dat")).unwrap();

	let err = vfs.set_write_dir(Some(dir2.path())).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::FilesStillOpen);

	drop(handle);
	vfs.set_write_dir(Some(dir2.path())).unwrap();
}

#[test]
fn search_path_roundtrip() {
	let dir = TempDir::new().unwrap();
	let grp = sample_grp(&dir);
	let extra = TempDir::new().unwrap();

	let vfs = VirtualFs::new();
	vfs.mount(extra.path(), VPath::new(""), true).unwrap();
	let before = vfs.search_path();

	vfs.mount(&grp, VPath::new(""), true).unwrap();
	vfs.unmount(&grp).unwrap();

	assert_eq!(vfs.search_path(), before);

	let err = vfs.unmount("/no/such/mount").unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotInSearchPath);
}

#[test]
fn prepend_takes_priority() {
	let dir1 = TempDir::new().unwrap();
	let dir2 = TempDir::new().unwrap();
	fs::write(dir1.path().join("foo.txt"), b"appended").unwrap();
	fs::write(dir2.path().join("foo.txt"), b"prepended").unwrap();

	let vfs = VirtualFs::new();
	vfs.mount(dir1.path(), VPath::new(""), true).unwrap();
	vfs.mount(dir2.path(), VPath::new(""), false).unwrap();

	assert_eq!(vfs.search_path(), vec![dir2.path(), dir1.path()]);

	let mut handle = vfs.open_read(VPath::new("foo.txt")).unwrap();
	assert_eq!(read_all(&mut handle), b"prepended");
}

#[test]
fn mount_points() {
	let dir = TempDir::new().unwrap();
	let grp = sample_grp(&dir);

	let vfs = VirtualFs::new();
	vfs.mount(&grp, VPath::new("assets/base"), true).unwrap();

	assert_eq!(vfs.mount_point(&grp).unwrap(), "assets/base");

	assert!(vfs.exists(VPath::new("assets/base/A.TXT")));
	assert!(!vfs.exists(VPath::new("A.TXT")));
	assert!(!vfs.exists(VPath::new("assets/baseball")));

	assert_eq!(
		vfs.enumerate_files(VPath::new("assets/base")).unwrap(),
		vec!["A.TXT".to_string(), "B.TXT".to_string()]
	);

	let mut handle = vfs.open_read(VPath::new("/assets/base/A.TXT")).unwrap();
	assert_eq!(read_all(&mut handle), b"HELLO");

	let err = vfs
		.mount(&grp, VPath::new("bad\\point"), true)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn unsupported_archive() {
	let dir = TempDir::new().unwrap();
	let junk = write_archive(&dir, "junk.bin", b"not an archive at all");

	let vfs = VirtualFs::new();
	let err = vfs.mount(&junk, VPath::new(""), true).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::UnsupportedArchive);
	assert_eq!(last_error(), Some(ErrorKind::UnsupportedArchive));
	assert!(vfs.search_path().is_empty());
}

// Path safety ///////////////////////////////////////////////////////////

#[test]
fn insecure_paths_rejected() {
	let dir = TempDir::new().unwrap();
	fs::write(dir.path().join("real.txt"), b"data").unwrap();

	let vfs = VirtualFs::new();
	vfs.mount(dir.path(), VPath::new(""), true).unwrap();
	vfs.set_write_dir(Some(dir.path())).unwrap();

	for bad in [".", "..", "a/../real.txt", "a\\b", "c:evil", "./real.txt"] {
		assert!(!vfs.exists(VPath::new(bad)), "`{bad}` slipped through");
		assert_eq!(last_error(), Some(ErrorKind::InsecurePath));

		let err = vfs.open_read(VPath::new(bad)).unwrap_err();
		assert_eq!(err.kind(), ErrorKind::InsecurePath);

		let err = vfs.open_write(VPath::new(bad)).unwrap_err();
		assert_eq!(err.kind(), ErrorKind::InsecurePath);

		let err = vfs.delete(VPath::new(bad)).unwrap_err();
		assert_eq!(err.kind(), ErrorKind::InsecurePath);
	}
}

// ZIP backend ///////////////////////////////////////////////////////////

#[test]
fn zip_stored_smoke() {
	let dir = TempDir::new().unwrap();

	let zip = write_archive(
		&dir,
		"sample.zip",
		&build_zip(&[
			ZipMember::plain("readme.txt", b"hello zip"),
			ZipMember::plain("gfx/wall.png", b"wall"),
			ZipMember::plain("gfx/floor.png", b"floor"),
		]),
	);

	let vfs = VirtualFs::new();
	vfs.mount(&zip, VPath::new(""), true).unwrap();

	assert_eq!(
		vfs.enumerate_files(VPath::new("")).unwrap(),
		vec!["gfx".to_string(), "readme.txt".to_string()]
	);

	assert_eq!(
		vfs.enumerate_files(VPath::new("gfx")).unwrap(),
		vec!["floor.png".to_string(), "wall.png".to_string()]
	);

	assert!(vfs.is_directory(VPath::new("gfx")));
	assert!(!vfs.is_directory(VPath::new("readme.txt")));

	let mut handle = vfs.open_read(VPath::new("gfx/wall.png")).unwrap();
	assert_eq!(read_all(&mut handle), b"wall");
}

#[test]
fn zip_deflate_read_and_seek() {
	let data: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();

	let dir = TempDir::new().unwrap();
	let zip = write_archive(
		&dir,
		"deflated.zip",
		&build_zip(&[ZipMember::deflated("blob.bin", &data)]),
	);

	let vfs = VirtualFs::new();
	vfs.mount(&zip, VPath::new(""), true).unwrap();

	let mut handle = vfs.open_read(VPath::new("blob.bin")).unwrap();
	assert_eq!(handle.length().unwrap(), data.len() as u64);
	assert_eq!(read_all(&mut handle), data);
	assert!(handle.eof());

	// Backwards forces a decompressor reset; forwards discards.
	handle.seek(4).unwrap();
	let mut buf = [0u8; 4];
	assert_eq!(handle.read(&mut buf).unwrap(), 4);
	assert_eq!(&buf[..], &data[4..8]);

	handle.seek(32_000).unwrap();
	assert_eq!(handle.tell(), 32_000);
	assert_eq!(handle.read(&mut buf).unwrap(), 4);
	assert_eq!(&buf[..], &data[32_000..32_004]);

	let err = handle.seek(data.len() as u64 + 1).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::PastEof);
}

#[test]
fn zip_symlink_policy() {
	let dir = TempDir::new().unwrap();

	let zip = write_archive(
		&dir,
		"links.zip",
		&build_zip(&[
			ZipMember::plain("target.txt", b"SECRET"),
			ZipMember::link("link", "target.txt"),
		]),
	);

	let vfs = VirtualFs::new();
	vfs.mount(&zip, VPath::new(""), true).unwrap();

	// Denied by default.
	assert!(!vfs.exists(VPath::new("link")));
	assert_eq!(last_error(), Some(ErrorKind::SymlinkForbidden));
	assert!(!vfs.is_symlink(VPath::new("link")));

	// The plain file is unaffected.
	assert!(vfs.exists(VPath::new("target.txt")));

	vfs.permit_symbolic_links(true);

	assert!(vfs.exists(VPath::new("link")));
	assert!(vfs.is_symlink(VPath::new("link")));

	let mut handle = vfs.open_read(VPath::new("link")).unwrap();
	assert_eq!(read_all(&mut handle), b"SECRET");
}

#[test]
fn zip_symlink_loop() {
	let dir = TempDir::new().unwrap();

	let zip = write_archive(
		&dir,
		"loop.zip",
		&build_zip(&[
			ZipMember::link("a", "b"),
			ZipMember::link("b", "a"),
		]),
	);

	let vfs = VirtualFs::new();
	vfs.mount(&zip, VPath::new(""), true).unwrap();
	vfs.permit_symbolic_links(true);

	assert!(!vfs.exists(VPath::new("a")));
	assert_eq!(last_error(), Some(ErrorKind::TooManySymlinks));
}

#[test]
fn zip_dangling_symlink() {
	let dir = TempDir::new().unwrap();

	let zip = write_archive(
		&dir,
		"dangling.zip",
		&build_zip(&[ZipMember::link("ghost", "nowhere.txt")]),
	);

	let vfs = VirtualFs::new();
	vfs.mount(&zip, VPath::new(""), true).unwrap();
	vfs.permit_symbolic_links(true);

	assert!(!vfs.exists(VPath::new("ghost")));

	let err = vfs.open_read(VPath::new("ghost")).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NoSuchFile);
}

// Handles ///////////////////////////////////////////////////////////////

#[test]
fn duplicate_reads_independently() {
	let dir = TempDir::new().unwrap();
	let grp = sample_grp(&dir);

	let vfs = VirtualFs::new();
	vfs.mount(&grp, VPath::new(""), true).unwrap();

	let mut original = vfs.open_read(VPath::new("A.TXT")).unwrap();
	let mut buf = [0u8; 2];
	original.read(&mut buf).unwrap();

	let mut dup = original.duplicate().unwrap();
	assert_eq!(dup.tell(), 0);
	assert_eq!(read_all(&mut dup), b"HELLO");

	// The original's cursor was never touched.
	assert_eq!(read_all(&mut original), b"LLO");
}

#[test]
fn buffered_reads_match_unbuffered() {
	let payload: Vec<u8> = (0u8..=255).cycle().take(1000).collect();

	let dir = TempDir::new().unwrap();
	let grp = write_archive(
		&dir,
		"big.grp",
		&build_grp(&[("BLOB.DAT", payload.as_slice())]),
	);

	let vfs = VirtualFs::new();
	vfs.mount(&grp, VPath::new(""), true).unwrap();

	let mut handle = vfs.open_read(VPath::new("BLOB.DAT")).unwrap();
	handle.set_buffer(64).unwrap();

	let mut out = Vec::new();
	let mut buf = [0u8; 23];

	loop {
		match handle.read(&mut buf).unwrap() {
			0 => break,
			count => out.extend_from_slice(&buf[..count]),
		}
	}

	assert_eq!(out, payload);
	assert!(handle.eof());

	// Seeking inside the buffered window and far out of it both land
	// where they should.
	handle.seek(10).unwrap();
	assert_eq!(handle.tell(), 10);
	let mut one = [0u8; 1];
	handle.read(&mut one).unwrap();
	assert_eq!(one[0], payload[10]);

	handle.seek(900).unwrap();
	handle.read(&mut one).unwrap();
	assert_eq!(one[0], payload[900]);
}

#[test]
fn buffered_writes_flush_on_close() {
	let dir = TempDir::new().unwrap();

	let vfs = VirtualFs::new();
	vfs.set_write_dir(Some(dir.path())).unwrap();
	vfs.mount(dir.path(), VPath::new(""), true).unwrap();

	let mut handle = vfs.open_write(VPath::new("buffered.dat")).unwrap();
	handle.set_buffer(256).unwrap();

	for chunk in [b"alpha" as &[u8], b"beta", b"gamma"] {
		assert_eq!(handle.write(chunk).unwrap(), chunk.len());
	}

	// Nothing reached the backend yet; everything must on close.
	handle.close().unwrap();

	let mut handle = vfs.open_read(VPath::new("buffered.dat")).unwrap();
	assert_eq!(read_all(&mut handle), b"alphabetagamma");
}

#[test]
fn handle_io_traits() {
	use std::io::{Read as _, SeekFrom};

	let dir = TempDir::new().unwrap();
	let grp = sample_grp(&dir);

	let vfs = VirtualFs::new();
	vfs.mount(&grp, VPath::new(""), true).unwrap();

	let mut handle = vfs.open_read(VPath::new("A.TXT")).unwrap();
	std::io::Seek::seek(&mut handle, SeekFrom::End(-2)).unwrap();

	let mut out = String::new();
	handle.read_to_string(&mut out).unwrap();
	assert_eq!(out, "LO");
}

// Lifecycle /////////////////////////////////////////////////////////////

#[test]
fn deinit_checks_handles() {
	let dir = TempDir::new().unwrap();
	let grp = sample_grp(&dir);

	let vfs = VirtualFs::new();
	vfs.mount(&grp, VPath::new(""), true).unwrap();

	let handle = vfs.open_read(VPath::new("A.TXT")).unwrap();

	let err = vfs.deinit().unwrap_err();
	assert_eq!(err.kind(), ErrorKind::FilesStillOpen);

	drop(handle);
	vfs.deinit().unwrap();
	assert!(vfs.search_path().is_empty());
	assert_eq!(vfs.write_dir(), None);
}

#[test]
fn enumerate_empty_and_missing() {
	let dir = TempDir::new().unwrap();

	let vfs = VirtualFs::new();
	vfs.mount(dir.path(), VPath::new(""), true).unwrap();

	assert!(vfs.enumerate_files(VPath::new("")).unwrap().is_empty());
	assert!(vfs
		.enumerate_files(VPath::new("no/such/dir"))
		.unwrap()
		.is_empty());
}

#[test]
fn merged_enumeration_dedups() {
	let dir1 = TempDir::new().unwrap();
	let dir2 = TempDir::new().unwrap();
	fs::write(dir1.path().join("both.txt"), b"1").unwrap();
	fs::write(dir1.path().join("only1.txt"), b"1").unwrap();
	fs::write(dir2.path().join("both.txt"), b"2").unwrap();
	fs::write(dir2.path().join("only2.txt"), b"2").unwrap();

	let vfs = VirtualFs::new();
	vfs.mount(dir1.path(), VPath::new(""), true).unwrap();
	vfs.mount(dir2.path(), VPath::new(""), true).unwrap();

	let mut names = vfs.enumerate_files(VPath::new("")).unwrap();
	names.sort();

	assert_eq!(
		names,
		vec![
			"both.txt".to_string(),
			"only1.txt".to_string(),
			"only2.txt".to_string()
		]
	);
}

#[test]
fn version_and_archive_types() {
	let version = linked_version();
	assert_eq!(version.major, 0);

	let types = supported_archive_types();
	assert!(types.iter().any(|info| info.extension == "ZIP"));
	assert!(types.iter().any(|info| info.extension == "GRP"));
	assert!(types.iter().any(|info| info.extension == "HOG"));
	assert!(types.iter().any(|info| info.extension == "WAD"));
	assert!(types.iter().any(|info| info.extension == "PAK"));
	assert!(!dir_separator().is_empty());
}

#[test]
fn last_mod_time_smoke() {
	let dir = TempDir::new().unwrap();
	let grp = sample_grp(&dir);

	let vfs = VirtualFs::new();
	vfs.mount(&grp, VPath::new(""), true).unwrap();

	// Entries inherit the archive file's own timestamp.
	let whole = fs::metadata(&grp).unwrap().modified().unwrap();
	assert_eq!(vfs.last_mod_time(VPath::new("A.TXT")).unwrap(), whole);

	let err = vfs.last_mod_time(VPath::new("MISSING")).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NoSuchPath);
}
