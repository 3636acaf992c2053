//! ClientHello inspection for SNI routing.
//!
//! The proxy never terminates TLS; it only reads the plaintext prefix of the
//! handshake. `probe` decides whether a full first record has been buffered,
//! `parse` extracts the `server_name` extension from it.
//!
//! References:
//! - https://datatracker.ietf.org/doc/html/rfc8446 (TLS 1.3)
//! - https://datatracker.ietf.org/doc/html/rfc6066 (SNI Extension)

/// Outer TLS record header: content type, legacy version, payload length.
pub const TLS_RECORD_HEADER_LEN: usize = 5;

/// Upper bound for the preread buffer. Real ClientHellos are well under
/// 2 KiB; anything still incomplete at this size is rejected.
pub const MAX_CLIENT_HELLO_BYTES: usize = 16 * 1024;

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const EXT_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST: u8 = 0x00;

// Record header (5) + handshake type (1) + handshake length (3)
// + client_version (2) + random (32): everything before session_id.
const CLIENT_HELLO_FIXED_PREFIX: usize = 43;

/// Verdict on a partially buffered record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// More bytes are needed before the record can be judged.
    Incomplete,
    /// The first byte is not a TLS handshake record.
    NotTls,
    /// A full record is buffered; the value is its total length
    /// including the record header.
    Complete(usize),
}

/// Examine the outer record header of a partially buffered stream.
pub fn probe(buf: &[u8]) -> Probe {
    if let Some(&first) = buf.first() {
        if first != CONTENT_TYPE_HANDSHAKE {
            return Probe::NotTls;
        }
    }
    if buf.len() < TLS_RECORD_HEADER_LEN {
        return Probe::Incomplete;
    }
    let record_len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
    let needed = record_len.saturating_add(TLS_RECORD_HEADER_LEN);
    if buf.len() >= needed {
        Probe::Complete(needed)
    } else {
        Probe::Incomplete
    }
}

/// Extract the `host_name` value of the first SNI extension from a fully
/// buffered ClientHello record.
///
/// Returns `None` when the record is not a ClientHello, carries no SNI,
/// names a non-hostname entry, or any length field overruns the record.
pub fn parse(buf: &[u8]) -> Option<String> {
    let total = match probe(buf) {
        Probe::Complete(n) => n,
        _ => return None,
    };
    let record = &buf[..total];
    if *record.get(TLS_RECORD_HEADER_LEN)? != HANDSHAKE_TYPE_CLIENT_HELLO {
        return None;
    }

    let mut off = CLIENT_HELLO_FIXED_PREFIX;

    let session_id_len = *record.get(off)? as usize;
    off = off.checked_add(1 + session_id_len)?;

    let cipher_suites_len = read_u16(record, off)? as usize;
    off = off.checked_add(2 + cipher_suites_len)?;

    let compression_len = *record.get(off)? as usize;
    off = off.checked_add(1 + compression_len)?;

    let extensions_len = read_u16(record, off)? as usize;
    off = off.checked_add(2)?;
    let ext_end = off.checked_add(extensions_len)?;
    if ext_end > record.len() {
        return None;
    }

    while off + 4 <= ext_end {
        let ext_type = read_u16(record, off)?;
        let ext_len = read_u16(record, off + 2)? as usize;
        off += 4;
        if ext_type == EXT_SERVER_NAME {
            // server_name_list length, then the first (in practice only)
            // entry: name type + name length + name bytes.
            let _list_len = read_u16(record, off)?;
            if *record.get(off + 2)? != NAME_TYPE_HOST {
                return None;
            }
            let name_len = read_u16(record, off + 3)? as usize;
            if name_len == 0 {
                return None;
            }
            let start = off + 5;
            let name = record.get(start..start.checked_add(name_len)?)?;
            return String::from_utf8(name.to_vec()).ok();
        }
        off = off.checked_add(ext_len)?;
    }
    None
}

fn read_u16(buf: &[u8], off: usize) -> Option<u16> {
    let hi = *buf.get(off)?;
    let lo = *buf.get(off.checked_add(1)?)?;
    Some(u16::from_be_bytes([hi, lo]))
}
