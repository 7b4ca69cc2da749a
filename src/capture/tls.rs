//! Minimal TLS record / ClientHello walker (§9): just enough to pull the
//! Server Name Indication extension out of a single captured frame. No
//! session state, no reassembly across TCP segments — if the ClientHello is
//! fragmented, extraction simply fails and the caller writes nothing.

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_TYPE_SNI: u16 = 0x0000;
const SNI_NAME_TYPE_HOSTNAME: u8 = 0x00;

/// Walk a TCP payload looking for a TLS record containing a ClientHello, and
/// return its SNI hostname if present.
pub fn extract_sni(payload: &[u8]) -> Option<String> {
    if payload.len() < 5 || payload[0] != CONTENT_TYPE_HANDSHAKE {
        return None;
    }
    let record_len = u16::from_be_bytes([payload[3], payload[4]]) as usize;
    let record_body = payload.get(5..5 + record_len)?;

    if record_body.len() < 4 || record_body[0] != HANDSHAKE_TYPE_CLIENT_HELLO {
        return None;
    }
    let handshake_len =
        u32::from_be_bytes([0, record_body[1], record_body[2], record_body[3]]) as usize;
    let hello = record_body.get(4..4 + handshake_len)?;

    // ClientHello: version(2) + random(32) + session_id_len(1) + session_id
    let mut cursor = 2 + 32;
    let session_id_len = *hello.get(cursor)? as usize;
    cursor += 1 + session_id_len;

    // cipher_suites_len(2) + cipher_suites
    let cipher_suites_len = u16::from_be_bytes([*hello.get(cursor)?, *hello.get(cursor + 1)?]) as usize;
    cursor += 2 + cipher_suites_len;

    // compression_methods_len(1) + compression_methods
    let compression_len = *hello.get(cursor)? as usize;
    cursor += 1 + compression_len;

    if cursor + 2 > hello.len() {
        return None;
    }
    let extensions_len = u16::from_be_bytes([hello[cursor], hello[cursor + 1]]) as usize;
    cursor += 2;
    let extensions = hello.get(cursor..cursor + extensions_len)?;

    find_sni_extension(extensions)
}

fn find_sni_extension(extensions: &[u8]) -> Option<String> {
    let mut cursor = 0;
    while cursor + 4 <= extensions.len() {
        let ext_type = u16::from_be_bytes([extensions[cursor], extensions[cursor + 1]]);
        let ext_len = u16::from_be_bytes([extensions[cursor + 2], extensions[cursor + 3]]) as usize;
        let ext_data = extensions.get(cursor + 4..cursor + 4 + ext_len)?;

        if ext_type == EXTENSION_TYPE_SNI {
            return parse_server_name_list(ext_data);
        }
        cursor += 4 + ext_len;
    }
    None
}

fn parse_server_name_list(data: &[u8]) -> Option<String> {
    if data.len() < 2 {
        return None;
    }
    let list_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let list = data.get(2..2 + list_len)?;

    let mut cursor = 0;
    while cursor + 3 <= list.len() {
        let name_type = list[cursor];
        let name_len = u16::from_be_bytes([list[cursor + 1], list[cursor + 2]]) as usize;
        let name = list.get(cursor + 3..cursor + 3 + name_len)?;

        if name_type == SNI_NAME_TYPE_HOSTNAME {
            return std::str::from_utf8(name).ok().map(|s| s.to_lowercase());
        }
        cursor += 3 + name_len;
    }
    None
}
