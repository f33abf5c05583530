//! MySQL wire protocol: framing, primitives, and packet payloads.
//!
//! The server side of the client/server protocol only. Frames are 3-byte
//! little-endian payload length plus a 1-byte sequence id; all sequencing
//! policy lives in the engine, so the codec moves raw `(seq, payload)` pairs.
//! Reference: https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basics.html

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::rngs::OsRng;
use rand::Rng;
use tokio_util::codec::{Decoder, Encoder};

use super::{ProtocolError, MAX_MESSAGE_BYTES};

/// Largest payload a single frame can carry. A frame of exactly this size
/// signals continuation into the next frame.
pub const MAX_SEGMENT: usize = 0xFF_FFFF;

// Capability flags.
pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
pub const CLIENT_FOUND_ROWS: u32 = 0x0000_0002;
pub const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
pub const CLIENT_NO_SCHEMA: u32 = 0x0000_0010;
pub const CLIENT_ODBC: u32 = 0x0000_0040;
pub const CLIENT_LOCAL_FILES: u32 = 0x0000_0080;
pub const CLIENT_IGNORE_SPACE: u32 = 0x0000_0100;
pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
pub const CLIENT_INTERACTIVE: u32 = 0x0000_0400;
pub const CLIENT_SSL: u32 = 0x0000_0800;
pub const CLIENT_IGNORE_SIGPIPE: u32 = 0x0000_1000;
pub const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
pub const CLIENT_RESERVED: u32 = 0x0000_4000;
pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
pub const CLIENT_MULTI_STATEMENTS: u32 = 0x0001_0000;
pub const CLIENT_MULTI_RESULTS: u32 = 0x0002_0000;
pub const CLIENT_PS_MULTI_RESULTS: u32 = 0x0004_0000;
pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
pub const CLIENT_CONNECT_ATTRS: u32 = 0x0010_0000;
pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x0020_0000;
pub const CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS: u32 = 0x0040_0000;
pub const CLIENT_SESSION_TRACK: u32 = 0x0080_0000;

/// What the gateway advertises in the handshake. SSL, compression, and
/// deprecate-EOF are deliberately absent: the gateway refuses TLS, never
/// compresses, and always uses EOF-terminated result sets.
pub const SERVER_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_FOUND_ROWS
    | CLIENT_LONG_FLAG
    | CLIENT_CONNECT_WITH_DB
    | CLIENT_NO_SCHEMA
    | CLIENT_ODBC
    | CLIENT_LOCAL_FILES
    | CLIENT_IGNORE_SPACE
    | CLIENT_PROTOCOL_41
    | CLIENT_INTERACTIVE
    | CLIENT_IGNORE_SIGPIPE
    | CLIENT_TRANSACTIONS
    | CLIENT_RESERVED
    | CLIENT_SECURE_CONNECTION
    | CLIENT_MULTI_STATEMENTS
    | CLIENT_MULTI_RESULTS
    | CLIENT_PS_MULTI_RESULTS
    | CLIENT_PLUGIN_AUTH
    | CLIENT_CONNECT_ATTRS
    | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
    | CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS
    | CLIENT_SESSION_TRACK;

pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
pub const CHARSET_UTF8_GENERAL_CI: u8 = 0x21;
pub const AUTH_PLUGIN_NAME: &str = "mysql_native_password";
pub const PROTOCOL_VERSION: u8 = 10;

/// One logical MySQL packet: payload plus the sequence id it arrived with
/// (decode) or must be framed with (encode).
#[derive(Debug, Clone)]
pub struct Packet {
    pub seq: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(seq: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }
}

/// Frame-level codec. Reassembles multi-segment messages (a segment of
/// exactly 2^24-1 bytes continues into the next frame) and enforces the
/// 16 MB message cap.
#[derive(Debug, Default)]
pub struct MySqlCodec {
    pending: Option<BytesMut>,
}

impl MySqlCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for MySqlCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, ProtocolError> {
        loop {
            if src.len() < 4 {
                return Ok(None);
            }
            let payload_len =
                (src[0] as usize) | ((src[1] as usize) << 8) | ((src[2] as usize) << 16);
            let seq = src[3];
            if src.len() < 4 + payload_len {
                src.reserve(4 + payload_len - src.len());
                return Ok(None);
            }

            src.advance(4);
            let segment = src.split_to(payload_len);

            let assembled = self.pending.take();
            let total = assembled.as_ref().map_or(0, |p| p.len()) + segment.len();
            if total > MAX_MESSAGE_BYTES {
                return Err(ProtocolError::FrameTooLarge {
                    got: total,
                    max: MAX_MESSAGE_BYTES,
                });
            }

            let payload = match assembled {
                Some(mut p) => {
                    p.extend_from_slice(&segment);
                    p
                }
                None => segment,
            };

            if payload_len == MAX_SEGMENT {
                // Continuation: stash and keep consuming buffered frames.
                self.pending = Some(payload);
                continue;
            }

            return Ok(Some(Packet {
                seq,
                payload: payload.freeze(),
            }));
        }
    }
}

impl Encoder<Packet> for MySqlCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if item.payload.len() >= MAX_SEGMENT {
            return Err(ProtocolError::FrameTooLarge {
                got: item.payload.len(),
                max: MAX_SEGMENT,
            });
        }
        dst.reserve(4 + item.payload.len());
        let len = item.payload.len();
        dst.put_u8((len & 0xFF) as u8);
        dst.put_u8(((len >> 8) & 0xFF) as u8);
        dst.put_u8(((len >> 16) & 0xFF) as u8);
        dst.put_u8(item.seq);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

// ============================================================================
// Primitive encodings
// ============================================================================

pub fn get_lenenc_int(buf: &mut BytesMut) -> Result<u64, ProtocolError> {
    if buf.is_empty() {
        return Err(ProtocolError::Truncated("length-encoded integer"));
    }
    let first = buf.get_u8();
    match first {
        0..=0xFA => Ok(first as u64),
        0xFC => {
            if buf.len() < 2 {
                return Err(ProtocolError::Truncated("2-byte length-encoded integer"));
            }
            Ok(buf.get_u16_le() as u64)
        }
        0xFD => {
            if buf.len() < 3 {
                return Err(ProtocolError::Truncated("3-byte length-encoded integer"));
            }
            let lo = buf.get_u16_le() as u64;
            let hi = buf.get_u8() as u64;
            Ok(lo | (hi << 16))
        }
        0xFE => {
            if buf.len() < 8 {
                return Err(ProtocolError::Truncated("8-byte length-encoded integer"));
            }
            Ok(buf.get_u64_le())
        }
        marker => Err(ProtocolError::ReservedLengthMarker(marker)),
    }
}

pub fn put_lenenc_int(dst: &mut BytesMut, val: u64) {
    if val < 0xFB {
        dst.put_u8(val as u8);
    } else if val < 0x1_0000 {
        dst.put_u8(0xFC);
        dst.put_u16_le(val as u16);
    } else if val < 0x100_0000 {
        dst.put_u8(0xFD);
        dst.put_u8((val & 0xFF) as u8);
        dst.put_u8(((val >> 8) & 0xFF) as u8);
        dst.put_u8(((val >> 16) & 0xFF) as u8);
    } else {
        dst.put_u8(0xFE);
        dst.put_u64_le(val);
    }
}

pub fn get_lenenc_bytes(buf: &mut BytesMut) -> Result<Bytes, ProtocolError> {
    let len = get_lenenc_int(buf)? as usize;
    if buf.len() < len {
        return Err(ProtocolError::Truncated("length-encoded string"));
    }
    Ok(buf.split_to(len).freeze())
}

pub fn put_lenenc_bytes(dst: &mut BytesMut, s: &[u8]) {
    put_lenenc_int(dst, s.len() as u64);
    dst.put_slice(s);
}

pub fn get_cstr(buf: &mut BytesMut) -> Result<String, ProtocolError> {
    let pos = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::UnterminatedString("NUL-terminated string"))?;
    let s = String::from_utf8(buf.split_to(pos).to_vec())
        .map_err(|_| ProtocolError::InvalidUtf8("NUL-terminated string"))?;
    buf.advance(1);
    Ok(s)
}

// ============================================================================
// Handshake
// ============================================================================

/// Per-session scramble data for the handshake. Generated from the OS CSPRNG
/// and filtered to contain no NUL bytes, which terminate wire strings.
#[derive(Debug, Clone)]
pub struct Scramble {
    pub part1: [u8; 8],
    pub part2: [u8; 12],
}

impl Scramble {
    pub fn generate() -> Self {
        let mut part1 = [0u8; 8];
        let mut part2 = [0u8; 12];
        for b in part1.iter_mut().chain(part2.iter_mut()) {
            *b = OsRng.gen_range(1..=255u8);
        }
        Self { part1, part2 }
    }
}

/// Build the Handshake v10 payload (sent at sequence id 0).
pub fn build_handshake(server_version: &str, connection_id: u32, scramble: &Scramble) -> BytesMut {
    let mut payload = BytesMut::with_capacity(128);
    payload.put_u8(PROTOCOL_VERSION);
    payload.put_slice(server_version.as_bytes());
    payload.put_u8(0);
    payload.put_u32_le(connection_id);
    payload.put_slice(&scramble.part1);
    payload.put_u8(0); // filler
    payload.put_u16_le((SERVER_CAPABILITIES & 0xFFFF) as u16);
    payload.put_u8(CHARSET_UTF8_GENERAL_CI);
    payload.put_u16_le(SERVER_STATUS_AUTOCOMMIT);
    payload.put_u16_le(((SERVER_CAPABILITIES >> 16) & 0xFFFF) as u16);
    payload.put_u8((scramble.part1.len() + scramble.part2.len() + 1) as u8);
    payload.put_slice(&[0u8; 10]);
    payload.put_slice(&scramble.part2);
    payload.put_u8(0);
    payload.put_slice(AUTH_PLUGIN_NAME.as_bytes());
    payload.put_u8(0);
    payload
}

/// Parsed client handshake response.
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub capabilities: u32,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin: Option<String>,
}

/// What the client sent in response to the handshake: either a full login
/// request or the 32-byte SSL-request short packet.
#[derive(Debug, Clone)]
pub enum LoginRequest {
    Ssl { capabilities: u32 },
    Login(HandshakeResponse),
}

pub fn parse_handshake_response(payload: &Bytes) -> Result<LoginRequest, ProtocolError> {
    let total_len = payload.len();
    let mut buf = BytesMut::from(&payload[..]);
    if buf.len() < 32 {
        return Err(ProtocolError::Truncated("handshake response header"));
    }
    let capabilities = buf.get_u32_le();
    let max_packet_size = buf.get_u32_le();
    let charset = buf.get_u8();
    buf.advance(23); // reserved

    // An SSL-capable client first sends just the 32-byte prefix.
    if capabilities & CLIENT_SSL != 0 && total_len == 32 {
        return Ok(LoginRequest::Ssl { capabilities });
    }

    let username = get_cstr(&mut buf)?;

    let auth_response = if capabilities & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        get_lenenc_bytes(&mut buf)?.to_vec()
    } else if capabilities & CLIENT_SECURE_CONNECTION != 0 {
        if buf.is_empty() {
            return Err(ProtocolError::Truncated("auth response length"));
        }
        let len = buf.get_u8() as usize;
        if buf.len() < len {
            return Err(ProtocolError::Truncated("auth response"));
        }
        buf.split_to(len).to_vec()
    } else {
        // Pre-4.1 clients send a NUL-terminated scramble.
        get_cstr(&mut buf)?.into_bytes()
    };

    let database = if capabilities & CLIENT_CONNECT_WITH_DB != 0 && !buf.is_empty() {
        get_cstr(&mut buf).ok().filter(|s| !s.is_empty())
    } else {
        None
    };

    let auth_plugin = if capabilities & CLIENT_PLUGIN_AUTH != 0 && !buf.is_empty() {
        get_cstr(&mut buf).ok()
    } else {
        None
    };

    Ok(LoginRequest::Login(HandshakeResponse {
        capabilities,
        max_packet_size,
        charset,
        username,
        auth_response,
        database,
        auth_plugin,
    }))
}

// ============================================================================
// Command phase
// ============================================================================

/// A command-phase request, parsed from the first payload byte.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Quit,
    InitDb(String),
    Query(String),
    FieldList,
    CreateDb,
    DropDb,
    Refresh,
    Statistics,
    ProcessInfo,
    Connect,
    ProcessKill,
    Debug,
    Ping,
    ChangeUser,
    Other(u8),
}

impl Command {
    pub fn parse(payload: &Bytes) -> Command {
        if payload.is_empty() {
            return Command::Other(0);
        }
        let rest = || String::from_utf8_lossy(&payload[1..]).into_owned();
        match payload[0] {
            0x01 => Command::Quit,
            0x02 => Command::InitDb(rest()),
            0x03 => Command::Query(rest()),
            0x04 => Command::FieldList,
            0x05 => Command::CreateDb,
            0x06 => Command::DropDb,
            0x08 => Command::Refresh,
            0x09 => Command::Statistics,
            0x0A => Command::ProcessInfo,
            0x0B => Command::Connect,
            0x0C => Command::ProcessKill,
            0x0D => Command::Debug,
            0x0E => Command::Ping,
            0x11 => Command::ChangeUser,
            op => Command::Other(op),
        }
    }
}

// ============================================================================
// Response payloads
// ============================================================================

pub fn build_ok(affected_rows: u64, last_insert_id: u64) -> BytesMut {
    let mut payload = BytesMut::with_capacity(16);
    payload.put_u8(0x00);
    put_lenenc_int(&mut payload, affected_rows);
    put_lenenc_int(&mut payload, last_insert_id);
    payload.put_u16_le(SERVER_STATUS_AUTOCOMMIT);
    payload.put_u16_le(0); // warnings
    payload
}

pub fn build_err(code: u16, sql_state: &str, message: &str) -> BytesMut {
    let mut payload = BytesMut::with_capacity(16 + message.len());
    payload.put_u8(0xFF);
    payload.put_u16_le(code);
    payload.put_u8(b'#');
    let state = sql_state.as_bytes();
    for i in 0..5 {
        payload.put_u8(*state.get(i).unwrap_or(&b' '));
    }
    payload.put_slice(message.as_bytes());
    payload
}

/// EOF payload: always exactly 5 bytes, so a row whose first value byte is
/// 0xFE cannot be mistaken for it.
pub fn build_eof() -> BytesMut {
    let mut payload = BytesMut::with_capacity(5);
    payload.put_u8(0xFE);
    payload.put_u16_le(0); // warnings
    payload.put_u16_le(SERVER_STATUS_AUTOCOMMIT);
    payload
}

pub fn build_column_count(count: u64) -> BytesMut {
    let mut payload = BytesMut::with_capacity(9);
    put_lenenc_int(&mut payload, count);
    payload
}

/// Everything the column-definition packet needs beyond its fixed fields.
#[derive(Debug, Clone)]
pub struct ColumnMeta<'a> {
    pub schema: &'a str,
    pub table: &'a str,
    pub name: &'a str,
    pub type_byte: u8,
    pub column_length: u32,
    pub flags: u16,
    pub decimals: u8,
}

impl<'a> ColumnMeta<'a> {
    /// Metadata for a synthesized text column, used by intercepted queries.
    pub fn text(name: &'a str) -> Self {
        Self {
            schema: "",
            table: "",
            name,
            type_byte: 0x0F,
            column_length: 255,
            flags: 0,
            decimals: 0,
        }
    }
}

pub fn build_column_def(meta: &ColumnMeta<'_>) -> BytesMut {
    let mut payload = BytesMut::with_capacity(64);
    put_lenenc_bytes(&mut payload, b"def");
    put_lenenc_bytes(&mut payload, meta.schema.as_bytes());
    put_lenenc_bytes(&mut payload, meta.table.as_bytes());
    put_lenenc_bytes(&mut payload, meta.table.as_bytes());
    put_lenenc_bytes(&mut payload, meta.name.as_bytes());
    put_lenenc_bytes(&mut payload, meta.name.as_bytes());
    payload.put_u8(0x0C); // length of the fixed-size block
    payload.put_u16_le(CHARSET_UTF8_GENERAL_CI as u16);
    payload.put_u32_le(meta.column_length);
    payload.put_u8(meta.type_byte);
    payload.put_u16_le(meta.flags);
    payload.put_u8(meta.decimals);
    payload.put_u16_le(0); // filler
    payload
}

/// Text-protocol row: NULL cells are the 0xFB marker, everything else a
/// length-encoded string.
pub fn build_text_row(cells: &[Option<String>]) -> BytesMut {
    let mut payload = BytesMut::with_capacity(16 * cells.len().max(1));
    for cell in cells {
        match cell {
            Some(v) => put_lenenc_bytes(&mut payload, v.as_bytes()),
            None => payload.put_u8(0xFB),
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut MySqlCodec, bytes: &[u8]) -> Vec<Packet> {
        let mut src = BytesMut::from(bytes);
        let mut out = Vec::new();
        while let Some(p) = codec.decode(&mut src).unwrap() {
            out.push(p);
        }
        out
    }

    #[test]
    fn lenenc_int_round_trip() {
        for val in [0u64, 1, 0xFA, 0xFB, 300, 0xFFFF, 0x1_0000, 0xFF_FFFF, 0x100_0000, u64::MAX] {
            let mut buf = BytesMut::new();
            put_lenenc_int(&mut buf, val);
            assert_eq!(get_lenenc_int(&mut buf).unwrap(), val, "value {val}");
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn lenenc_int_reserved_markers() {
        for marker in [0xFBu8, 0xFF] {
            let mut buf = BytesMut::from(&[marker][..]);
            assert!(matches!(
                get_lenenc_int(&mut buf),
                Err(ProtocolError::ReservedLengthMarker(m)) if m == marker
            ));
        }
    }

    #[test]
    fn frame_round_trip() {
        let mut codec = MySqlCodec::new();
        let mut wire = BytesMut::new();
        codec
            .encode(Packet::new(5, Bytes::from_static(b"hello")), &mut wire)
            .unwrap();
        assert_eq!(&wire[..4], &[5, 0, 0, 5]);

        let packets = decode_all(&mut codec, &wire);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].seq, 5);
        assert_eq!(&packets[0].payload[..], b"hello");
    }

    #[test]
    fn multi_segment_concatenation() {
        // A full-size segment followed by a tail is one logical message.
        let mut wire = BytesMut::new();
        wire.put_slice(&[0xFF, 0xFF, 0xFF, 0]);
        wire.put_slice(&vec![0xAB; MAX_SEGMENT]);
        wire.put_slice(&[1, 0, 0, 1]);
        wire.put_slice(b"!");

        let mut codec = MySqlCodec::new();
        let packets = decode_all(&mut codec, &wire);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload.len(), MAX_SEGMENT + 1);
        assert_eq!(&packets[0].payload[MAX_SEGMENT..], b"!");
    }

    #[test]
    fn oversize_message_is_rejected() {
        // A continuation that pushes the logical message past the cap is
        // fatal.
        let mut wire = BytesMut::new();
        wire.put_slice(&[0xFF, 0xFF, 0xFF, 0]);
        wire.put_slice(&vec![0u8; MAX_SEGMENT]);
        wire.put_slice(&[8, 0, 0, 1]);
        wire.put_slice(b"overflow");

        let mut codec = MySqlCodec::new();
        let mut src = BytesMut::from(&wire[..]);
        // First call stashes the full segment, second sees the overflow.
        loop {
            match codec.decode(&mut src) {
                Ok(Some(_)) => panic!("oversize message must not decode"),
                Ok(None) => continue,
                Err(e) => {
                    assert!(matches!(e, ProtocolError::FrameTooLarge { .. }));
                    break;
                }
            }
        }
    }

    #[test]
    fn scramble_has_no_nul_bytes() {
        for _ in 0..32 {
            let s = Scramble::generate();
            assert!(s.part1.iter().all(|&b| b != 0));
            assert!(s.part2.iter().all(|&b| b != 0));
        }
    }

    #[test]
    fn handshake_layout() {
        let scramble = Scramble::generate();
        let payload = build_handshake("5.7.25", 7, &scramble);
        assert_eq!(payload[0], 10);
        assert_eq!(&payload[1..7], b"5.7.25");
        assert_eq!(payload[7], 0);
        // connection id
        assert_eq!(&payload[8..12], &7u32.to_le_bytes());
        // scramble part 1 then filler
        assert_eq!(&payload[12..20], &scramble.part1);
        assert_eq!(payload[20], 0);
        // trailing plugin name
        assert!(payload.ends_with(b"mysql_native_password\0"));
    }

    #[test]
    fn handshake_response_parses_user_and_database() {
        let caps = CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION | CLIENT_CONNECT_WITH_DB;
        let mut payload = BytesMut::new();
        payload.put_u32_le(caps);
        payload.put_u32_le(1 << 24);
        payload.put_u8(CHARSET_UTF8_GENERAL_CI);
        payload.put_slice(&[0u8; 23]);
        payload.put_slice(b"root\0");
        payload.put_u8(3);
        payload.put_slice(&[1, 2, 3]);
        payload.put_slice(b"demo\0");

        match parse_handshake_response(&payload.freeze()).unwrap() {
            LoginRequest::Login(resp) => {
                assert_eq!(resp.username, "root");
                assert_eq!(resp.auth_response, vec![1, 2, 3]);
                assert_eq!(resp.database.as_deref(), Some("demo"));
            }
            other => panic!("expected login, got {other:?}"),
        }
    }

    #[test]
    fn handshake_response_detects_ssl_short_packet() {
        let mut payload = BytesMut::new();
        payload.put_u32_le(CLIENT_PROTOCOL_41 | CLIENT_SSL);
        payload.put_u32_le(1 << 24);
        payload.put_u8(CHARSET_UTF8_GENERAL_CI);
        payload.put_slice(&[0u8; 23]);
        assert_eq!(payload.len(), 32);

        assert!(matches!(
            parse_handshake_response(&payload.freeze()).unwrap(),
            LoginRequest::Ssl { .. }
        ));
    }

    #[test]
    fn ok_packet_shape() {
        let ok = build_ok(3, 0);
        assert_eq!(ok[0], 0x00);
        assert!(ok.len() >= 7);
        assert_eq!(ok[1], 3);
    }

    #[test]
    fn err_packet_pads_sql_state() {
        let err = build_err(1045, "28", "denied");
        assert_eq!(err[0], 0xFF);
        assert_eq!(&err[1..3], &1045u16.to_le_bytes());
        assert_eq!(err[3], b'#');
        assert_eq!(&err[4..9], b"28   ");
        assert_eq!(&err[9..], b"denied");
    }

    #[test]
    fn eof_packet_is_five_bytes() {
        let eof = build_eof();
        assert_eq!(eof.len(), 5);
        assert_eq!(eof[0], 0xFE);
    }

    #[test]
    fn text_row_encodes_null_and_values() {
        let row = build_text_row(&[Some("demo".into()), None]);
        assert_eq!(&row[..], &[4, b'd', b'e', b'm', b'o', 0xFB]);
    }

    #[test]
    fn command_parse_dispatch() {
        assert_eq!(Command::parse(&Bytes::from_static(&[0x0E])), Command::Ping);
        assert_eq!(Command::parse(&Bytes::from_static(&[0x01])), Command::Quit);
        assert_eq!(
            Command::parse(&Bytes::from_static(b"\x03SELECT 1")),
            Command::Query("SELECT 1".into())
        );
        assert_eq!(
            Command::parse(&Bytes::from_static(b"\x02demo")),
            Command::InitDb("demo".into())
        );
        assert_eq!(Command::parse(&Bytes::from_static(&[0x42])), Command::Other(0x42));
    }
}
