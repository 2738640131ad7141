//! Filesystem-facing behavior: deriving members from real paths,
//! hardlink detection, appending, and extraction back onto disk.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use reel_format::{
    ArchiveReader, ArchiveWriter, Codec, Error, Member, TypeFlag, WriteOptions,
};

fn build_tree(root: &std::path::Path) {
    fs::create_dir(root.join("sub")).unwrap();
    fs::write(root.join("top.txt"), b"top level").unwrap();
    fs::write(root.join("sub/inner.txt"), b"inner file").unwrap();
    std::os::unix::fs::symlink("inner.txt", root.join("sub/pointer")).unwrap();
}

#[test]
fn add_and_extract_a_tree() {
    let src = tempfile::tempdir().unwrap();
    build_tree(src.path());
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("tree.tar");

    {
        let mut writer = ArchiveWriter::create(&archive).unwrap();
        writer.add_as(src.path(), "tree").unwrap();
        let names: Vec<_> = writer.members().iter().map(|m| m.name.clone()).collect();
        assert_eq!(
            names,
            ["tree", "tree/sub", "tree/sub/inner.txt", "tree/sub/pointer", "tree/top.txt"]
        );
        writer.finish().unwrap();
    }

    let reader = ArchiveReader::open(&archive).unwrap();
    assert_eq!(reader.member("tree").unwrap().typeflag, TypeFlag::Directory);
    assert_eq!(
        reader
            .read_all(reader.member("tree/sub/inner.txt").unwrap())
            .unwrap(),
        b"inner file"
    );
    let pointer = reader.member("tree/sub/pointer").unwrap();
    assert_eq!(pointer.typeflag, TypeFlag::Symlink);
    assert_eq!(pointer.linkname, "inner.txt");

    let out = tempfile::tempdir().unwrap();
    reader.extract_all(out.path()).unwrap();
    assert_eq!(
        fs::read(out.path().join("tree/top.txt")).unwrap(),
        b"top level"
    );
    assert_eq!(
        fs::read(out.path().join("tree/sub/pointer")).unwrap(),
        b"inner file"
    );
    assert!(out
        .path()
        .join("tree/sub/pointer")
        .symlink_metadata()
        .unwrap()
        .file_type()
        .is_symlink());
}

#[test]
fn permissions_round_trip() {
    let src = tempfile::tempdir().unwrap();
    let path = src.path().join("script");
    fs::write(&path, b"#!/bin/sh\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

    let mut writer = ArchiveWriter::new(Vec::new());
    writer.add_as(&path, "script").unwrap();
    let bytes = writer.finish().unwrap();

    let reader = ArchiveReader::from_bytes(bytes, Default::default()).unwrap();
    assert_eq!(reader.member("script").unwrap().mode, 0o755);

    let out = tempfile::tempdir().unwrap();
    reader.extract_all(out.path()).unwrap();
    let mode = fs::metadata(out.path().join("script")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[test]
fn second_reference_to_an_inode_becomes_a_hardlink() {
    let src = tempfile::tempdir().unwrap();
    let first = src.path().join("first");
    fs::write(&first, b"shared").unwrap();
    let second = src.path().join("second");
    fs::hard_link(&first, &second).unwrap();

    let mut writer = ArchiveWriter::new(Vec::new());
    writer.add_as(&first, "first").unwrap();
    writer.add_as(&second, "second").unwrap();
    let bytes = writer.finish().unwrap();

    let reader = ArchiveReader::from_bytes(bytes, Default::default()).unwrap();
    let second = reader.member("second").unwrap();
    assert_eq!(second.typeflag, TypeFlag::HardLink);
    assert_eq!(second.linkname, "first");
    assert_eq!(second.size, 0);
    // The link still reads as the target's content.
    assert_eq!(reader.read_all(second).unwrap(), b"shared");
}

#[test]
fn dereferencing_stores_full_copies() {
    let src = tempfile::tempdir().unwrap();
    let first = src.path().join("first");
    fs::write(&first, b"shared").unwrap();
    let second = src.path().join("second");
    fs::hard_link(&first, &second).unwrap();
    let sym = src.path().join("sym");
    std::os::unix::fs::symlink(&first, &sym).unwrap();

    let mut writer = ArchiveWriter::new_with(
        Vec::new(),
        WriteOptions {
            dereference: true,
            ..WriteOptions::default()
        },
    );
    writer.add_as(&first, "first").unwrap();
    writer.add_as(&second, "second").unwrap();
    writer.add_as(&sym, "sym").unwrap();
    let bytes = writer.finish().unwrap();

    let reader = ArchiveReader::from_bytes(bytes, Default::default()).unwrap();
    for name in ["first", "second", "sym"] {
        let member = reader.member(name).unwrap();
        assert_eq!(member.typeflag, TypeFlag::Regular, "{}", name);
        assert_eq!(reader.read_all(member).unwrap(), b"shared");
    }
}

#[test]
fn archive_does_not_swallow_itself() {
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("data"), b"payload").unwrap();
    let archive = src.path().join("self.tar");

    {
        let mut writer = ArchiveWriter::create(&archive).unwrap();
        // The destination lives inside the tree being added.
        writer.add_as(src.path(), "tree").unwrap();
        writer.finish().unwrap();
    }

    let reader = ArchiveReader::open(&archive).unwrap();
    let names: Vec<_> = reader.names().collect();
    assert!(names.contains(&"tree/data"));
    assert!(!names.iter().any(|n| n.ends_with("self.tar")));
}

#[test]
fn self_inclusion_check_survives_a_directory_change() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("data"), b"payload").unwrap();

    // Create the archive through a relative path, then change the
    // working directory before adding the tree that contains it.
    let prev = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    let mut writer = ArchiveWriter::create("self.tar").unwrap();
    std::env::set_current_dir(&prev).unwrap();

    writer.add_as(dir.path(), "tree").unwrap();
    writer.finish().unwrap();

    let reader = ArchiveReader::open(dir.path().join("self.tar")).unwrap();
    let names: Vec<_> = reader.names().collect();
    assert!(names.contains(&"tree/data"));
    assert!(!names.iter().any(|n| n.ends_with("self.tar")));
}

#[test]
fn append_extends_an_existing_archive() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("grow.tar");

    {
        let mut writer = ArchiveWriter::create(&archive).unwrap();
        let mut member = Member::new("foo");
        member.size = 3;
        writer.add_file(&member, Some(&mut &b"one"[..])).unwrap();
        writer.finish().unwrap();
    }
    {
        let mut writer = ArchiveWriter::append(&archive).unwrap();
        let mut member = Member::new("bar");
        member.size = 3;
        writer.add_file(&member, Some(&mut &b"two"[..])).unwrap();
        writer.finish().unwrap();
    }

    let reader = ArchiveReader::open(&archive).unwrap();
    let names: Vec<_> = reader.names().collect();
    assert_eq!(names, ["foo", "bar"]);
    assert_eq!(reader.read_all(reader.member("foo").unwrap()).unwrap(), b"one");
    assert_eq!(reader.read_all(reader.member("bar").unwrap()).unwrap(), b"two");
}

#[test]
fn append_to_an_empty_file_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("fresh.tar");
    fs::write(&archive, b"").unwrap();

    {
        let mut writer = ArchiveWriter::append(&archive).unwrap();
        let mut member = Member::new("only");
        member.size = 2;
        writer.add_file(&member, Some(&mut &b"ok"[..])).unwrap();
        writer.finish().unwrap();
    }
    let reader = ArchiveReader::open(&archive).unwrap();
    assert_eq!(reader.names().collect::<Vec<_>>(), ["only"]);
}

#[test]
fn append_to_a_compressed_archive_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("packed.tar.gz");
    {
        let mut writer = ArchiveWriter::create_with(
            &archive,
            WriteOptions {
                codec: Codec::Gzip,
                ..WriteOptions::default()
            },
        )
        .unwrap();
        let mut member = Member::new("foo");
        member.size = 1;
        writer.add_file(&member, Some(&mut &b"x"[..])).unwrap();
        writer.finish().unwrap();
    }
    assert!(matches!(
        ArchiveWriter::append(&archive),
        Err(Error::Read(_))
    ));
}

#[test]
fn stat_reports_filesystem_metadata() {
    let src = tempfile::tempdir().unwrap();
    let path = src.path().join("file");
    fs::write(&path, b"12345").unwrap();

    let mut writer = ArchiveWriter::new(Vec::new());
    let member = writer.stat(&path, "file").unwrap();
    assert_eq!(member.typeflag, TypeFlag::Regular);
    assert_eq!(member.size, 5);
    assert!(member.mtime > 0.0);
}
