//! Query-related backend messages.

use std::mem::size_of;

use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U16 as U16BE, U32 as U32BE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr};
use crate::protocol::types::{FormatCode, Oid};

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    /// Data type OID
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    /// Type modifier (type-specific)
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: U16BE,
}

impl FieldDescriptionTail {
    pub fn table_oid(&self) -> Oid {
        self.table_oid.get()
    }

    pub fn column_id(&self) -> i16 {
        self.column_id.get()
    }

    pub fn type_oid(&self) -> Oid {
        self.type_oid.get()
    }

    pub fn type_size(&self) -> i16 {
        self.type_size.get()
    }

    pub fn type_modifier(&self) -> i32 {
        self.type_modifier.get()
    }

    pub fn format(&self) -> FormatCode {
        FormatCode::from(self.format.get())
    }
}

/// Field description within a RowDescription.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    pub name: &'a str,
    pub tail: &'a FieldDescriptionTail,
}

/// RowDescription message - describes the columns in a result set.
#[derive(Debug)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

        let (head, mut data) = read_bytes(payload, 2)?;
        let num_fields = U16BE::ref_from_bytes(head)?.get() as usize;
        let mut fields = Vec::with_capacity(num_fields);

        for _ in 0..num_fields {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = read_bytes(rest, TAIL_SIZE)?;
            fields.push(FieldDescription {
                name,
                tail: FieldDescriptionTail::ref_from_bytes(tail)?,
            });
            data = rest;
        }

        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescription<'a>> {
        self.fields.iter()
    }
}

/// DataRow message - one row of column values.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    num_columns: u16,
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (head, columns_data) = read_bytes(payload, 2)?;
        Ok(Self {
            num_columns: U16BE::ref_from_bytes(head)?.get(),
            columns_data,
        })
    }

    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Iterate over column values; `None` is SQL NULL.
    pub fn iter(&self) -> DataRowIter<'a> {
        DataRowIter {
            remaining: self.columns_data,
        }
    }

    /// Check every length prefix against the payload and the expected column count.
    pub fn validate(&self, expected_columns: usize) -> Result<()> {
        if self.len() != expected_columns {
            return Err(Error::Protocol(format!(
                "DataRow has {} columns, RowDescription has {}",
                self.len(),
                expected_columns
            )));
        }
        let mut data = self.columns_data;
        for _ in 0..self.num_columns {
            let (len, rest) = read_bytes(data, 4)?;
            let len = I32BE::ref_from_bytes(len)?.get();
            data = if len < 0 {
                rest
            } else {
                read_bytes(rest, len as usize)?.1
            };
        }
        Ok(())
    }
}

/// Iterator over column values in a DataRow.
#[derive(Debug, Clone)]
pub struct DataRowIter<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for DataRowIter<'a> {
    type Item = Option<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        let len;
        (len, self.remaining) = self.remaining.split_at_checked(4)?;
        let len = i32::from_be_bytes([len[0], len[1], len[2], len[3]]);

        if len < 0 {
            return Some(None);
        }
        let value;
        (value, self.remaining) = self.remaining.split_at_checked(len as usize)?;
        Some(Some(value))
    }
}

/// CommandComplete message - successful completion of one command.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// Command tag (e.g., "SELECT 5", "INSERT 0 1", "UPDATE 10")
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }
}

/// Number of rows a command tag reports, if any.
pub fn tag_rows_affected(tag: &str) -> Option<u64> {
    let mut parts = tag.split_whitespace();
    match (parts.next()?, parts.next(), parts.next()) {
        ("INSERT", Some(_oid), Some(count)) => count.parse().ok(),
        (
            "SELECT" | "UPDATE" | "DELETE" | "MERGE" | "COPY" | "MOVE" | "FETCH",
            Some(count),
            None,
        ) => count.parse().ok(),
        _ => None,
    }
}

/// OID of the inserted row from an `INSERT oid rows` tag; `None` when zero or absent.
pub fn tag_inserted_oid(tag: &str) -> Option<Oid> {
    let mut parts = tag.split_whitespace();
    if parts.next()? != "INSERT" {
        return None;
    }
    parts.next()?.parse::<Oid>().ok().filter(|&oid| oid != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_description(cols: &[(&str, Oid)]) -> Vec<u8> {
        let mut out = (cols.len() as u16).to_be_bytes().to_vec();
        for (name, oid) in cols {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
            out.extend_from_slice(&16384_u32.to_be_bytes());
            out.extend_from_slice(&1_i16.to_be_bytes());
            out.extend_from_slice(&oid.to_be_bytes());
            out.extend_from_slice(&4_i16.to_be_bytes());
            out.extend_from_slice(&(-1_i32).to_be_bytes());
            out.extend_from_slice(&0_u16.to_be_bytes());
        }
        out
    }

    #[test]
    fn parse_row_description() {
        let payload = row_description(&[("id", 23), ("name", 25)]);
        let desc = RowDescription::parse(&payload).unwrap();
        assert_eq!(desc.len(), 2);
        let names: Vec<_> = desc.iter().map(|f| f.name).collect();
        assert_eq!(names, ["id", "name"]);
        let first = desc.iter().next().unwrap();
        assert_eq!(first.tail.type_oid(), 23);
        assert_eq!(first.tail.table_oid(), 16384);
        assert_eq!(first.tail.type_size(), 4);
        assert_eq!(first.tail.format(), FormatCode::Text);
    }

    #[test]
    fn truncated_row_description_is_an_error() {
        let payload = row_description(&[("id", 23)]);
        assert!(RowDescription::parse(&payload[..payload.len() - 3]).is_err());
        assert!(RowDescription::parse(&[0]).is_err());
    }

    #[test]
    fn data_row_values_and_nulls() {
        let mut payload = 3_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&1_i32.to_be_bytes());
        payload.push(b'7');
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_i32.to_be_bytes());

        let row = DataRow::parse(&payload).unwrap();
        row.validate(3).unwrap();
        let values: Vec<_> = row.iter().collect();
        assert_eq!(values, vec![Some(&b"7"[..]), None, Some(&b""[..])]);
        assert!(row.validate(2).is_err());
    }

    #[test]
    fn data_row_with_short_value_fails_validation() {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&10_i32.to_be_bytes());
        payload.extend_from_slice(b"abc");
        assert!(DataRow::parse(&payload).unwrap().validate(1).is_err());
    }

    #[test]
    fn command_tags() {
        assert_eq!(tag_rows_affected("SELECT 5"), Some(5));
        assert_eq!(tag_rows_affected("INSERT 0 2"), Some(2));
        assert_eq!(tag_rows_affected("UPDATE 10"), Some(10));
        assert_eq!(tag_rows_affected("CREATE TABLE"), None);
        assert_eq!(tag_inserted_oid("INSERT 16401 1"), Some(16401));
        assert_eq!(tag_inserted_oid("INSERT 0 1"), None);
        assert_eq!(tag_inserted_oid("UPDATE 1"), None);
    }
}
