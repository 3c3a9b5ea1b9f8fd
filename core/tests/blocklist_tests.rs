//! Block-list files read through a session

mod common;

use common::{gzip, pattern, session, DiskBuilder, TestSession};
use stage2_core::disk::DeviceSpec;
use stage2_core::{Error, FileState, FsRegistry, SessionConfig};

const PART_START: u64 = 63;

fn fixture() -> (TestSession, Vec<u8>, Vec<u8>) {
    let first = pattern(2 * 512, 1);
    let second = pattern(3 * 512, 2);
    let device = DiskBuilder::new(2048)
        .primary(0, 0x83, PART_START as u32, 1000)
        .bytes(PART_START + 100, &first)
        .bytes(PART_START + 500, &second)
        .build();
    let config = SessionConfig::with_root(0x80, DeviceSpec::slice(0x80, 0).partition);
    (session(vec![(0x80, device)], FsRegistry::new(), config), first, second)
}

#[test]
fn test_read_across_ranges() {
    let (mut session, first, second) = fixture();
    session.open("100+2,500+3").unwrap();
    assert_eq!(session.state(), FileState::BlockList);
    assert_eq!(session.length(), 2560);

    session.seek(512).unwrap();
    let mut buf = vec![0u8; 1024];
    assert_eq!(session.read(&mut buf).unwrap(), 1024);
    assert_eq!(&buf[..512], &first[512..]);
    assert_eq!(&buf[512..], &second[..512]);
    assert_eq!(session.position(), 1536);

    // Backwards seek rewinds the range cursor
    session.seek(10).unwrap();
    let mut small = [0u8; 16];
    session.read(&mut small).unwrap();
    assert_eq!(&small[..], &first[10..26]);
}

#[test]
fn test_whole_file_matches_ranges() {
    let (mut session, first, second) = fixture();
    session.open("100+2,500+3").unwrap();
    let data = session.read_to_end().unwrap();
    assert_eq!(data.len(), 2560);
    assert_eq!(&data[..1024], &first[..]);
    assert_eq!(&data[1024..], &second[..]);

    // End of file
    let mut buf = [0u8; 8];
    assert_eq!(session.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_explicit_device_and_whole_disk_offsets() {
    let (mut session, first, _) = fixture();
    session.open("(hd0,0)100+1").unwrap();
    let a = session.read_to_end().unwrap();
    session.open("(hd0)163+1").unwrap();
    let b = session.read_to_end().unwrap();
    assert_eq!(a, b);
    assert_eq!(a, &first[..512]);
}

#[test]
fn test_trailing_byte_length() {
    let (mut session, first, second) = fixture();
    session.open("100+2,500+3,1500").unwrap();
    assert_eq!(session.length(), 1500);
    let data = session.read_to_end().unwrap();
    assert_eq!(data.len(), 1500);
    assert_eq!(&data[1024..], &second[..476]);
    assert_eq!(&data[..1024], &first[..]);

    assert_eq!(session.seek(1501), Err(Error::FileLength));
}

#[test]
fn test_bad_names() {
    let (mut session, _, _) = fixture();
    for name in ["100+0", "100+2x", "100+2,,", "100+2,9999", "abc"] {
        assert_eq!(session.open(name), Err(Error::BadFilename), "{}", name);
        assert_eq!(session.state(), FileState::Closed);
    }
    assert_eq!(session.open("(hd0,3)0+1"), Err(Error::NoPart));
}

#[test]
fn test_read_past_partition_end() {
    let (mut session, _, _) = fixture();
    session.open("990+20").unwrap();
    let mut buf = vec![0u8; 512];
    session.seek(9 * 512).unwrap();
    session.read(&mut buf).unwrap();
    assert_eq!(session.read(&mut buf), Err(Error::OutsidePart));
    assert_eq!(session.position(), 10 * 512);
}

#[test]
fn test_compressed_block_list() {
    let payload = pattern(40_000, 9);
    let compressed = gzip(&payload, None);
    let sectors = (compressed.len() + 511) / 512;
    let device = DiskBuilder::new(2048)
        .primary(0, 0x83, PART_START as u32, 1000)
        .bytes(PART_START + 200, &compressed)
        .build();
    let config = SessionConfig::with_root(0x80, DeviceSpec::slice(0x80, 0).partition);
    let mut session = session(vec![(0x80, device)], FsRegistry::new(), config);

    session
        .open(&format!("200+{},{}", sectors, compressed.len()))
        .unwrap();
    assert_eq!(session.state(), FileState::Compressed);
    assert_eq!(session.length(), payload.len() as u64);
    assert_eq!(session.read_to_end().unwrap(), payload);
}
