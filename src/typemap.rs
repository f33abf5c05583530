//! Column-type translation between the backend view and each wire protocol.
//!
//! Everything is serialized in text format; this module only decides the
//! declared metadata: the MySQL column-type byte, flags, and display length,
//! and the PostgreSQL type OID and size.

use crate::backend::{ColumnDesc, ColumnKind};

// MySQL column-definition flags.
pub const MYSQL_FLAG_NOT_NULL: u16 = 0x0001;
pub const MYSQL_FLAG_UNSIGNED: u16 = 0x0020;
pub const MYSQL_FLAG_AUTO_INCREMENT: u16 = 0x0200;

/// MySQL protocol type byte for a backend column kind. Unmapped kinds fall
/// back to VAR_STRING.
pub fn mysql_type_byte(kind: ColumnKind) -> u8 {
    match kind {
        ColumnKind::Bit => 0x10,
        ColumnKind::TinyInt | ColumnKind::Bool => 0x01,
        ColumnKind::SmallInt => 0x02,
        ColumnKind::Int => 0x03,
        ColumnKind::BigInt => 0x08,
        ColumnKind::Float => 0x04,
        ColumnKind::Double => 0x05,
        ColumnKind::Decimal => 0x00,
        ColumnKind::Date => 0x0A,
        ColumnKind::Time => 0x0B,
        ColumnKind::Timestamp => 0x0C,
        ColumnKind::Char | ColumnKind::Varchar | ColumnKind::Text => 0x0F,
        ColumnKind::Bytes => 0xFC,
        ColumnKind::Other => 0x0F,
    }
}

pub fn mysql_flags(col: &ColumnDesc) -> u16 {
    let mut flags = 0;
    if !col.nullable {
        flags |= MYSQL_FLAG_NOT_NULL;
    }
    if col.auto_increment {
        flags |= MYSQL_FLAG_AUTO_INCREMENT;
    }
    if !col.signed {
        flags |= MYSQL_FLAG_UNSIGNED;
    }
    flags
}

/// Declared display length for the column-definition packet.
pub fn mysql_display_length(col: &ColumnDesc) -> u32 {
    match col.kind {
        ColumnKind::Int | ColumnKind::BigInt => 11,
        ColumnKind::Date => 10,
        ColumnKind::Timestamp => 19,
        ColumnKind::Decimal => u32::from(col.precision) + 2,
        ColumnKind::Char | ColumnKind::Varchar => col.display_size,
        _ => 255,
    }
}

/// PostgreSQL type OID for a backend column kind, text format. Unmapped
/// kinds fall back to `text` (25).
pub fn pg_type_oid(kind: ColumnKind) -> u32 {
    match kind {
        ColumnKind::Bool => 16,
        ColumnKind::SmallInt | ColumnKind::TinyInt => 21,
        ColumnKind::Int => 23,
        ColumnKind::BigInt => 20,
        ColumnKind::Float => 700,
        ColumnKind::Double => 701,
        ColumnKind::Decimal => 1700,
        ColumnKind::Char => 1042,
        ColumnKind::Varchar => 1043,
        ColumnKind::Date => 1082,
        ColumnKind::Time => 1083,
        ColumnKind::Timestamp => 1114,
        ColumnKind::Bytes => 17,
        ColumnKind::Bit | ColumnKind::Text | ColumnKind::Other => 25,
    }
}

/// Declared type size: byte width for fixed types, -1 for variable ones.
pub fn pg_type_size(kind: ColumnKind) -> i16 {
    match kind {
        ColumnKind::Bool => 1,
        ColumnKind::SmallInt | ColumnKind::TinyInt => 2,
        ColumnKind::Int | ColumnKind::Float | ColumnKind::Date => 4,
        ColumnKind::BigInt | ColumnKind::Double | ColumnKind::Time | ColumnKind::Timestamp => 8,
        _ => -1,
    }
}
