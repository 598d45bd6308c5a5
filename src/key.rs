// record key: 0x00 | folder(64) | device(32) | name(var)
// global key: 0x01 | folder(64) | name(var)
// folder is right-padded with 0x00 to 64 bytes; name has no length prefix
// and runs to the end of the key.

use crate::device::DeviceId;

pub const RECORD_TAG: u8 = 0x00;
pub const GLOBAL_TAG: u8 = 0x01;
pub const FOLDER_LEN: usize = 64;
pub const DEVICE_LEN: usize = DeviceId::LEN;

const NAME_UPPER_BOUND: [u8; 4] = [0xFF; 4];

fn push_padded_folder(buf: &mut Vec<u8>, folder: &str) {
    let bytes = folder.as_bytes();
    assert!(bytes.len() <= FOLDER_LEN, "folder id exceeds {FOLDER_LEN} bytes");
    buf.extend_from_slice(bytes);
    buf.resize(buf.len() + (FOLDER_LEN - bytes.len()), 0);
}

pub fn record_key(folder: &str, device: &DeviceId, name: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + FOLDER_LEN + DEVICE_LEN + name.len());
    buf.push(RECORD_TAG);
    push_padded_folder(&mut buf, folder);
    buf.extend_from_slice(device.as_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf
}

pub fn global_key(folder: &str, name: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + FOLDER_LEN + name.len());
    buf.push(GLOBAL_TAG);
    push_padded_folder(&mut buf, folder);
    buf.extend_from_slice(name.as_bytes());
    buf
}

pub fn record_range(folder: &str, device: &DeviceId) -> (Vec<u8>, Vec<u8>) {
    let mut start = Vec::with_capacity(1 + FOLDER_LEN + DEVICE_LEN);
    start.push(RECORD_TAG);
    push_padded_folder(&mut start, folder);
    start.extend_from_slice(device.as_bytes());
    let mut end = start.clone();
    end.extend_from_slice(&NAME_UPPER_BOUND);
    (start, end)
}

pub fn record_range_all_devices(folder: &str) -> (Vec<u8>, Vec<u8>) {
    let mut start = Vec::with_capacity(1 + FOLDER_LEN);
    start.push(RECORD_TAG);
    push_padded_folder(&mut start, folder);
    let mut end = start.clone();
    end.extend_from_slice(&[0xFF; DEVICE_LEN + 4]);
    (start, end)
}

pub fn record_range_all() -> (Vec<u8>, Vec<u8>) {
    (vec![RECORD_TAG], vec![RECORD_TAG + 1])
}

pub fn global_range(folder: &str) -> (Vec<u8>, Vec<u8>) {
    let mut start = Vec::with_capacity(1 + FOLDER_LEN);
    start.push(GLOBAL_TAG);
    push_padded_folder(&mut start, folder);
    let mut end = start.clone();
    end.extend_from_slice(&NAME_UPPER_BOUND);
    (start, end)
}

pub fn global_range_all() -> (Vec<u8>, Vec<u8>) {
    (vec![GLOBAL_TAG], vec![GLOBAL_TAG + 1])
}

fn parse_folder(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

pub fn parse_record_key(key: &[u8]) -> (String, DeviceId, String) {
    assert!(key.len() >= 1 + FOLDER_LEN + DEVICE_LEN, "truncated record key");
    assert_eq!(key[0], RECORD_TAG, "not a record key");
    let folder = parse_folder(&key[1..1 + FOLDER_LEN]);
    let device_start = 1 + FOLDER_LEN;
    let device_end = device_start + DEVICE_LEN;
    let mut device_bytes = [0u8; DEVICE_LEN];
    device_bytes.copy_from_slice(&key[device_start..device_end]);
    let name = String::from_utf8_lossy(&key[device_end..]).into_owned();
    (folder, DeviceId::from_bytes(device_bytes), name)
}

pub fn parse_global_key(key: &[u8]) -> (String, String) {
    assert!(key.len() >= 1 + FOLDER_LEN, "truncated global key");
    assert_eq!(key[0], GLOBAL_TAG, "not a global key");
    let folder = parse_folder(&key[1..1 + FOLDER_LEN]);
    let name = String::from_utf8_lossy(&key[1 + FOLDER_LEN..]).into_owned();
    (folder, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(b: u8) -> DeviceId {
        DeviceId::from_bytes([b; 32])
    }

    #[test]
    fn record_key_round_trips() {
        let key = record_key("docs", &dev(7), "notes/a.txt");
        let (folder, device, name) = parse_record_key(&key);
        assert_eq!(folder, "docs");
        assert_eq!(device, dev(7));
        assert_eq!(name, "notes/a.txt");
    }

    #[test]
    fn global_key_round_trips() {
        let key = global_key("docs", "notes/a.txt");
        let (folder, name) = parse_global_key(&key);
        assert_eq!(folder, "docs");
        assert_eq!(name, "notes/a.txt");
    }

    #[test]
    fn record_and_global_ranges_are_disjoint() {
        let (rs, re) = record_range("docs", &dev(1));
        let (gs, ge) = global_range("docs");
        assert_ne!(rs[0], gs[0]);
        assert!(re[0] == RECORD_TAG && ge[0] == GLOBAL_TAG);
    }

    #[test]
    fn names_sort_within_device_range() {
        let (start, end) = record_range("docs", &dev(1));
        let a = record_key("docs", &dev(1), "a");
        let z = record_key("docs", &dev(1), "zzzzzz");
        assert!(start <= a && a < end);
        assert!(start <= z && z < end);
        assert!(a < z);
    }

    #[test]
    fn folder_padding_does_not_leak_across_keys() {
        // "doc" is a prefix of "docs"; padding must keep their ranges disjoint.
        let short = global_range("doc");
        let long_folder_key = global_key("docs", "x");
        assert!(long_folder_key < short.0 || long_folder_key >= short.1);
    }
}
