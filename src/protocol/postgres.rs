//! PostgreSQL wire protocol (version 3.0): framing and message types.
//!
//! The codec decodes frontend messages and encodes backend messages. Startup
//! frames carry no type tag, only a big-endian length that includes itself;
//! after startup every frame is a 1-byte tag plus such a length. The SSL
//! refusal byte `N` is the one thing written outside the codec, directly on
//! the underlying stream, because it is not a framed message.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{ProtocolError, MAX_MESSAGE_BYTES};

pub const PROTOCOL_VERSION_3_0: u32 = 196_608;
pub const SSL_REQUEST_CODE: u32 = 80_877_103; // 0x04D2162F
pub const CANCEL_REQUEST_CODE: u32 = 80_877_102;

/// Transaction status byte carried by ReadyForQuery.
pub const TXN_IDLE: u8 = b'I';
pub const TXN_IN_BLOCK: u8 = b'T';
pub const TXN_FAILED: u8 = b'E';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Statement,
    Portal,
}

/// Messages a client sends to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    SslRequest,
    CancelRequest,
    Startup {
        version: u32,
        parameters: Vec<(String, String)>,
    },
    Query(String),
    Parse {
        name: String,
        query: String,
        param_types: Vec<u32>,
    },
    Bind {
        portal: String,
        statement: String,
        param_formats: Vec<i16>,
        params: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    },
    Describe {
        kind: TargetKind,
        name: String,
    },
    Execute {
        portal: String,
        max_rows: i32,
    },
    Close {
        kind: TargetKind,
        name: String,
    },
    Sync,
    Flush,
    Terminate,
    Unknown(u8),
}

/// One column of a RowDescription.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: u32,
    pub column_attr: i16,
    pub type_oid: u32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: i16,
}

impl FieldDescription {
    pub fn new(name: impl Into<String>, type_oid: u32, type_size: i16) -> Self {
        Self {
            name: name.into(),
            table_oid: 0,
            column_attr: 0,
            type_oid,
            type_size,
            type_modifier: -1,
            format: 0,
        }
    }
}

/// Messages the gateway sends to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    AuthenticationOk,
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: u32, secret_key: u32 },
    ReadyForQuery { status: u8 },
    RowDescription { fields: Vec<FieldDescription> },
    DataRow { values: Vec<Option<String>> },
    CommandComplete { tag: String },
    EmptyQueryResponse,
    ErrorResponse { severity: String, code: String, message: String },
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    ParameterDescription { param_types: Vec<u32> },
}

/// Two-phase codec: length-only startup frames until a StartupMessage has
/// been seen, tagged frames after. An SSLRequest does not leave the startup
/// phase, because the actual StartupMessage follows the refusal byte.
#[derive(Debug)]
pub struct PostgresCodec {
    startup: bool,
}

impl Default for PostgresCodec {
    fn default() -> Self {
        Self { startup: true }
    }
}

impl PostgresCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read_cstr(buf: &mut BytesMut) -> Result<String, ProtocolError> {
    let pos = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::UnterminatedString("message string"))?;
    let s = String::from_utf8(buf.split_to(pos).to_vec())
        .map_err(|_| ProtocolError::InvalidUtf8("message string"))?;
    buf.advance(1);
    Ok(s)
}

fn need(buf: &BytesMut, n: usize, what: &'static str) -> Result<(), ProtocolError> {
    if buf.len() < n {
        return Err(ProtocolError::Truncated(what));
    }
    Ok(())
}

impl Decoder for PostgresCodec {
    type Item = FrontendMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<FrontendMessage>, ProtocolError> {
        if self.startup {
            if src.len() < 4 {
                return Ok(None);
            }
            let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
            if len < 8 {
                return Err(ProtocolError::Truncated("startup message"));
            }
            if len > MAX_MESSAGE_BYTES {
                return Err(ProtocolError::FrameTooLarge {
                    got: len,
                    max: MAX_MESSAGE_BYTES,
                });
            }
            if src.len() < len {
                src.reserve(len - src.len());
                return Ok(None);
            }
            let mut body = src.split_to(len);
            body.advance(4);
            let code = body.get_u32();
            match code {
                SSL_REQUEST_CODE => return Ok(Some(FrontendMessage::SslRequest)),
                CANCEL_REQUEST_CODE => return Ok(Some(FrontendMessage::CancelRequest)),
                version => {
                    let mut parameters = Vec::new();
                    while !body.is_empty() && body[0] != 0 {
                        let key = read_cstr(&mut body)?;
                        let value = read_cstr(&mut body)?;
                        parameters.push((key, value));
                    }
                    self.startup = false;
                    return Ok(Some(FrontendMessage::Startup { version, parameters }));
                }
            }
        }

        if src.len() < 5 {
            return Ok(None);
        }
        let tag = src[0];
        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len < 4 {
            return Err(ProtocolError::Truncated("message length"));
        }
        if len > MAX_MESSAGE_BYTES {
            return Err(ProtocolError::FrameTooLarge {
                got: len,
                max: MAX_MESSAGE_BYTES,
            });
        }
        if src.len() < 1 + len {
            src.reserve(1 + len - src.len());
            return Ok(None);
        }
        let mut body = src.split_to(1 + len);
        body.advance(5);

        let msg = match tag {
            b'Q' => {
                let sql = read_cstr(&mut body)?;
                FrontendMessage::Query(sql)
            }
            b'P' => {
                let name = read_cstr(&mut body)?;
                let query = read_cstr(&mut body)?;
                need(&body, 2, "parse parameter count")?;
                let count = body.get_i16() as usize;
                let mut param_types = Vec::with_capacity(count);
                for _ in 0..count {
                    need(&body, 4, "parse parameter type")?;
                    param_types.push(body.get_u32());
                }
                FrontendMessage::Parse { name, query, param_types }
            }
            b'B' => {
                let portal = read_cstr(&mut body)?;
                let statement = read_cstr(&mut body)?;
                need(&body, 2, "bind format count")?;
                let nformats = body.get_i16() as usize;
                let mut param_formats = Vec::with_capacity(nformats);
                for _ in 0..nformats {
                    need(&body, 2, "bind format")?;
                    param_formats.push(body.get_i16());
                }
                need(&body, 2, "bind parameter count")?;
                let nparams = body.get_i16() as usize;
                let mut params = Vec::with_capacity(nparams);
                for _ in 0..nparams {
                    need(&body, 4, "bind parameter length")?;
                    let vlen = body.get_i32();
                    if vlen < 0 {
                        params.push(None);
                    } else {
                        let vlen = vlen as usize;
                        need(&body, vlen, "bind parameter value")?;
                        params.push(Some(body.split_to(vlen).to_vec()));
                    }
                }
                need(&body, 2, "bind result format count")?;
                let nresults = body.get_i16() as usize;
                let mut result_formats = Vec::with_capacity(nresults);
                for _ in 0..nresults {
                    need(&body, 2, "bind result format")?;
                    result_formats.push(body.get_i16());
                }
                FrontendMessage::Bind {
                    portal,
                    statement,
                    param_formats,
                    params,
                    result_formats,
                }
            }
            b'D' | b'C' => {
                need(&body, 1, "describe/close kind")?;
                let kind = match body.get_u8() {
                    b'S' => TargetKind::Statement,
                    b'P' => TargetKind::Portal,
                    _ => return Err(ProtocolError::Truncated("describe/close kind byte")),
                };
                let name = read_cstr(&mut body)?;
                if tag == b'D' {
                    FrontendMessage::Describe { kind, name }
                } else {
                    FrontendMessage::Close { kind, name }
                }
            }
            b'E' => {
                let portal = read_cstr(&mut body)?;
                need(&body, 4, "execute row limit")?;
                let max_rows = body.get_i32();
                FrontendMessage::Execute { portal, max_rows }
            }
            b'S' => FrontendMessage::Sync,
            b'H' => FrontendMessage::Flush,
            b'X' => FrontendMessage::Terminate,
            other => FrontendMessage::Unknown(other),
        };
        Ok(Some(msg))
    }
}

fn put_message(dst: &mut BytesMut, tag: u8, body: &[u8]) {
    dst.reserve(5 + body.len());
    dst.put_u8(tag);
    dst.put_u32((body.len() + 4) as u32);
    dst.put_slice(body);
}

impl Encoder<BackendMessage> for PostgresCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: BackendMessage, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        serialize_into(item, dst);
        Ok(())
    }
}

/// Serialize one backend message to its wire form. Also used outside the
/// codec for the pre-handshake connect-failure message.
pub fn serialize(msg: BackendMessage) -> BytesMut {
    let mut dst = BytesMut::new();
    serialize_into(msg, &mut dst);
    dst
}

fn serialize_into(item: BackendMessage, dst: &mut BytesMut) {
    match item {
        BackendMessage::AuthenticationOk => {
            put_message(dst, b'R', &0u32.to_be_bytes());
        }
        BackendMessage::ParameterStatus { name, value } => {
            let mut body = BytesMut::with_capacity(name.len() + value.len() + 2);
            body.put_slice(name.as_bytes());
            body.put_u8(0);
            body.put_slice(value.as_bytes());
            body.put_u8(0);
            put_message(dst, b'S', &body);
        }
        BackendMessage::BackendKeyData { process_id, secret_key } => {
            let mut body = BytesMut::with_capacity(8);
            body.put_u32(process_id);
            body.put_u32(secret_key);
            put_message(dst, b'K', &body);
        }
        BackendMessage::ReadyForQuery { status } => {
            put_message(dst, b'Z', &[status]);
        }
        BackendMessage::RowDescription { fields } => {
            let mut body = BytesMut::with_capacity(32 * fields.len() + 2);
            body.put_i16(fields.len() as i16);
            for f in &fields {
                body.put_slice(f.name.as_bytes());
                body.put_u8(0);
                body.put_u32(f.table_oid);
                body.put_i16(f.column_attr);
                body.put_u32(f.type_oid);
                body.put_i16(f.type_size);
                body.put_i32(f.type_modifier);
                body.put_i16(f.format);
            }
            put_message(dst, b'T', &body);
        }
        BackendMessage::DataRow { values } => {
            let mut body = BytesMut::with_capacity(16 * values.len() + 2);
            body.put_i16(values.len() as i16);
            for v in &values {
                match v {
                    Some(text) => {
                        body.put_i32(text.len() as i32);
                        body.put_slice(text.as_bytes());
                    }
                    None => body.put_i32(-1),
                }
            }
            put_message(dst, b'D', &body);
        }
        BackendMessage::CommandComplete { tag } => {
            let mut body = BytesMut::with_capacity(tag.len() + 1);
            body.put_slice(tag.as_bytes());
            body.put_u8(0);
            put_message(dst, b'C', &body);
        }
        BackendMessage::EmptyQueryResponse => {
            put_message(dst, b'I', &[]);
        }
        BackendMessage::ErrorResponse { severity, code, message } => {
            let mut body = BytesMut::with_capacity(severity.len() + code.len() + message.len() + 8);
            body.put_u8(b'S');
            body.put_slice(severity.as_bytes());
            body.put_u8(0);
            body.put_u8(b'C');
            body.put_slice(code.as_bytes());
            body.put_u8(0);
            body.put_u8(b'M');
            body.put_slice(message.as_bytes());
            body.put_u8(0);
            body.put_u8(0); // field list terminator
            put_message(dst, b'E', &body);
        }
        BackendMessage::ParseComplete => put_message(dst, b'1', &[]),
        BackendMessage::BindComplete => put_message(dst, b'2', &[]),
        BackendMessage::CloseComplete => put_message(dst, b'3', &[]),
        BackendMessage::NoData => put_message(dst, b'n', &[]),
        BackendMessage::ParameterDescription { param_types } => {
            let mut body = BytesMut::with_capacity(2 + 4 * param_types.len());
            body.put_i16(param_types.len() as i16);
            for oid in &param_types {
                body.put_u32(*oid);
            }
            put_message(dst, b't', &body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(msg: BackendMessage) -> BytesMut {
        let mut codec = PostgresCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(msg, &mut dst).unwrap();
        dst
    }

    #[test]
    fn decode_ssl_request_stays_in_startup() {
        let mut codec = PostgresCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(8);
        buf.put_u32(SSL_REQUEST_CODE);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(FrontendMessage::SslRequest)
        );

        // The real startup message still parses afterwards.
        let params = b"user\0postgres\0database\0dmp\0\0";
        buf.put_u32(8 + params.len() as u32);
        buf.put_u32(PROTOCOL_VERSION_3_0);
        buf.put_slice(params);
        match codec.decode(&mut buf).unwrap() {
            Some(FrontendMessage::Startup { version, parameters }) => {
                assert_eq!(version, PROTOCOL_VERSION_3_0);
                assert_eq!(parameters[0], ("user".into(), "postgres".into()));
                assert_eq!(parameters[1], ("database".into(), "dmp".into()));
            }
            other => panic!("expected startup, got {other:?}"),
        }
    }

    #[test]
    fn decode_simple_query() {
        let mut codec = PostgresCodec::new();
        codec.startup = false;
        let mut buf = BytesMut::new();
        buf.put_u8(b'Q');
        buf.put_u32(4 + 9);
        buf.put_slice(b"SELECT 1\0");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(FrontendMessage::Query("SELECT 1".into()))
        );
    }

    #[test]
    fn decode_parse_and_bind() {
        let mut codec = PostgresCodec::new();
        codec.startup = false;
        let mut buf = BytesMut::new();

        let parse_body = b"s1\0SELECT $1\0\x00\x01\x00\x00\x00\x19";
        buf.put_u8(b'P');
        buf.put_u32(4 + parse_body.len() as u32);
        buf.put_slice(parse_body);

        match codec.decode(&mut buf).unwrap() {
            Some(FrontendMessage::Parse { name, query, param_types }) => {
                assert_eq!(name, "s1");
                assert_eq!(query, "SELECT $1");
                assert_eq!(param_types, vec![25]);
            }
            other => panic!("expected parse, got {other:?}"),
        }

        let mut bind_body = BytesMut::new();
        bind_body.put_slice(b"\0s1\0"); // unnamed portal, statement s1
        bind_body.put_i16(0); // no param formats
        bind_body.put_i16(2);
        bind_body.put_i32(2);
        bind_body.put_slice(b"42");
        bind_body.put_i32(-1); // NULL
        bind_body.put_i16(0); // no result formats
        buf.put_u8(b'B');
        buf.put_u32(4 + bind_body.len() as u32);
        buf.put_slice(&bind_body);

        match codec.decode(&mut buf).unwrap() {
            Some(FrontendMessage::Bind { portal, statement, params, .. }) => {
                assert_eq!(portal, "");
                assert_eq!(statement, "s1");
                assert_eq!(params, vec![Some(b"42".to_vec()), None]);
            }
            other => panic!("expected bind, got {other:?}"),
        }
    }

    #[test]
    fn authentication_ok_wire_shape() {
        let wire = encode(BackendMessage::AuthenticationOk);
        assert_eq!(&wire[..], &[b'R', 0, 0, 0, 8, 0, 0, 0, 0]);
    }

    #[test]
    fn ready_for_query_wire_shape() {
        let wire = encode(BackendMessage::ReadyForQuery { status: TXN_IDLE });
        assert_eq!(&wire[..], &[b'Z', 0, 0, 0, 5, b'I']);
    }

    #[test]
    fn row_description_wire_shape() {
        let wire = encode(BackendMessage::RowDescription {
            fields: vec![FieldDescription::new("id", 23, 4)],
        });
        assert_eq!(wire[0], b'T');
        // column count
        assert_eq!(&wire[5..7], &1i16.to_be_bytes());
        // name
        assert_eq!(&wire[7..10], b"id\0");
        // table oid 0, attnum 0, type oid 23
        assert_eq!(&wire[10..14], &0u32.to_be_bytes());
        assert_eq!(&wire[14..16], &0i16.to_be_bytes());
        assert_eq!(&wire[16..20], &23u32.to_be_bytes());
        // size 4, typmod -1, text format
        assert_eq!(&wire[20..22], &4i16.to_be_bytes());
        assert_eq!(&wire[22..26], &(-1i32).to_be_bytes());
        assert_eq!(&wire[26..28], &0i16.to_be_bytes());
    }

    #[test]
    fn data_row_null_and_text() {
        let wire = encode(BackendMessage::DataRow {
            values: vec![Some("1".into()), None],
        });
        assert_eq!(wire[0], b'D');
        assert_eq!(&wire[5..7], &2i16.to_be_bytes());
        assert_eq!(&wire[7..11], &1i32.to_be_bytes());
        assert_eq!(wire[11], b'1');
        assert_eq!(&wire[12..16], &(-1i32).to_be_bytes());
    }

    #[test]
    fn error_response_fields_and_terminator() {
        let wire = encode(BackendMessage::ErrorResponse {
            severity: "ERROR".into(),
            code: "42000".into(),
            message: "SQL Error: nope".into(),
        });
        assert_eq!(wire[0], b'E');
        let body = &wire[5..];
        assert_eq!(body[0], b'S');
        assert!(body.windows(6).any(|w| w == b"42000\0"));
        assert_eq!(body[body.len() - 1], 0);
    }

    #[test]
    fn oversize_frame_is_rejected() {
        let mut codec = PostgresCodec::new();
        codec.startup = false;
        let mut buf = BytesMut::new();
        buf.put_u8(b'Q');
        buf.put_u32(MAX_MESSAGE_BYTES as u32 + 1);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }
}
