//! Postgres row operation.
//!
//! - [`Row`]
//! - [`Column`]
//! - [`QueryResult`]
//! - [`FromRow`]
//! - [`Decode`]
//! - [`Index`]
use std::{fmt, sync::Arc};

use crate::{
    Result,
    common::ByteStr,
    postgres::{ProtocolError, backend::DataRow},
    value::{self, TypeDecodeError, Value},
};

pub use crate::postgres::ColumnDescriptor;

/// Postgres row.
///
/// NULL column is [`None`].
#[derive(Clone, PartialEq)]
pub struct Row {
    columns: Arc<[ColumnDescriptor]>,
    values: Vec<Option<Value>>,
}

impl Row {
    /// Decode `DataRow` message against its `RowDescription`.
    ///
    /// Field count missmatch is a [`ProtocolError`], undecodable value is a [`TypeDecodeError`].
    pub(crate) fn from_data_row(
        columns: &Arc<[ColumnDescriptor]>,
        data: DataRow,
        strict: bool,
    ) -> Result<Row> {
        if data.column_len as usize != columns.len() {
            return Err(ProtocolError::ColumnCount {
                expect: columns.len(),
                found: data.column_len as usize,
            }
            .into());
        }

        let mut values = Vec::with_capacity(columns.len());

        for (column, value) in columns.iter().zip(data.values()) {
            let value = match value? {
                Some(value) => value::decode(column.type_oid, &value, strict)
                    .map(Some)
                    .map_err(|err|crate::Error::from(err).context(format!("column `{}`", column.name)))?,
                None => None,
            };
            values.push(value);
        }

        Ok(Row { columns: columns.clone(), values })
    }

    /// Returns `true` if row contains no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns the column descriptors.
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Get column value, [`None`] is NULL.
    pub fn value<I: Index>(&self, idx: I) -> Result<Option<&Value>, TypeDecodeError> {
        let nth = idx.position(&self.columns)?;
        Ok(self.values[nth].as_ref())
    }

    /// Try get and decode column.
    pub fn try_get<I: Index, R: Decode>(&self, idx: I) -> Result<R, TypeDecodeError> {
        let nth = idx.position(&self.columns)?;
        R::decode(Column {
            descriptor: &self.columns[nth],
            value: self.values[nth].as_ref(),
        })
    }

    /// Iterate columns in declaration order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = Column<'_>> {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(descriptor, value)|Column { descriptor, value: value.as_ref() })
    }

    /// Consume self into column values.
    pub fn into_values(self) -> Vec<Option<Value>> {
        self.values
    }

    /// Try decode type using [`FromRow`] implementation.
    pub fn decode<D: FromRow>(self) -> Result<D, TypeDecodeError> {
        D::from_row(self)
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for column in self.iter() {
            dbg.key(&column.name());
            match column.value() {
                Some(value) => dbg.value(value),
                None => dbg.value(&format_args!("NULL")),
            };
        }
        dbg.finish()
    }
}

/// Borrowed column of a [`Row`].
#[derive(Debug, Clone, Copy)]
pub struct Column<'a> {
    descriptor: &'a ColumnDescriptor,
    value: Option<&'a Value>,
}

impl<'a> Column<'a> {
    /// Returns column name.
    pub fn name(&self) -> &'a str {
        &self.descriptor.name
    }

    /// Returns column descriptor.
    pub fn descriptor(&self) -> &'a ColumnDescriptor {
        self.descriptor
    }

    /// Return `true` if value is NULL.
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Returns the value, [`None`] is NULL.
    pub fn value(&self) -> Option<&'a Value> {
        self.value
    }

    /// Returns the value, NULL is [`TypeDecodeError::Null`].
    pub fn try_value(&self) -> Result<&'a Value, TypeDecodeError> {
        self.value.ok_or(TypeDecodeError::Null)
    }

    /// Try decode type using [`Decode`] implementation.
    pub fn decode<D: Decode>(self) -> Result<D, TypeDecodeError> {
        D::decode(self)
    }
}

/// The command tag from `CommandComplete`.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandTag {
    tag: ByteStr,
}

impl CommandTag {
    pub(crate) fn new(tag: ByteStr) -> Self {
        Self { tag }
    }

    /// The full tag, e.g. `INSERT 0 1`.
    pub fn as_str(&self) -> &str {
        &self.tag
    }

    /// The command word, e.g. `INSERT`.
    pub fn command(&self) -> &str {
        self.tag.split_whitespace().next().unwrap_or_default()
    }

    /// Number of rows affected or returned.
    ///
    /// Returns [`None`] for command that does not report rows.
    pub fn rows(&self) -> Option<u64> {
        let mut whs = self.tag.split_whitespace();
        let tag = whs.next()?;
        let rows = whs.next()?;
        match tag {
            // INSERT oid rows
            "INSERT" => whs.next()?,
            "SELECT" | "UPDATE" | "DELETE" | "MERGE" | "FETCH" | "MOVE" | "COPY" => rows,
            _ => return None,
        }
        .parse()
        .ok()
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)
    }
}

impl fmt::Debug for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.tag, f)
    }
}

/// Result of a query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub(crate) columns: Arc<[ColumnDescriptor]>,
    pub(crate) rows: Vec<Row>,
    pub(crate) command_tag: Option<CommandTag>,
}

impl QueryResult {
    /// Returns the column descriptors, empty if the statement returns no data.
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Returns the rows.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Consume self into the rows.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Returns the command tag, [`None`] for empty query.
    pub fn command_tag(&self) -> Option<&CommandTag> {
        self.command_tag.as_ref()
    }

    /// Number of rows affected or returned, as reported by the command tag.
    pub fn rows_affected(&self) -> Option<u64> {
        self.command_tag.as_ref().and_then(CommandTag::rows)
    }

    /// Returns `true` if query returns no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Try decode every row using [`FromRow`] implementation.
    pub fn decode<T: FromRow>(self) -> Result<Vec<T>, TypeDecodeError> {
        self.rows.into_iter().map(T::from_row).collect()
    }
}

impl IntoIterator for QueryResult {
    type Item = Row;

    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

// ===== Traits =====

/// Type that can be constructed from a row.
pub trait FromRow: Sized {
    /// Construct self from row.
    fn from_row(row: Row) -> Result<Self, TypeDecodeError>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self, TypeDecodeError> {
        Ok(row)
    }
}

macro_rules! from_row_tuple {
    ($($t:ident $i:literal),*) => {
        impl<$($t),*> FromRow for ($($t),*,)
        where
            $($t: Decode),*
        {
            fn from_row(row: Row) -> Result<Self, TypeDecodeError> {
                Ok((
                    $(row.try_get($i)?),*,
                ))
            }
        }
    };
}

from_row_tuple!(T0 0);
from_row_tuple!(T0 0, T1 1);
from_row_tuple!(T0 0, T1 1, T2 2);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3);

/// A type that can be constructed from [`Column`].
pub trait Decode: Sized {
    /// Try decode self from column.
    fn decode(column: Column) -> Result<Self, TypeDecodeError>;
}

impl<T: Decode> Decode for Option<T> {
    fn decode(column: Column) -> Result<Self, TypeDecodeError> {
        match column.is_null() {
            true => Ok(None),
            false => column.decode().map(Some),
        }
    }
}

impl Decode for Value {
    fn decode(column: Column) -> Result<Self, TypeDecodeError> {
        column.try_value().cloned()
    }
}

macro_rules! decode {
    ($($ty:ty: $name:literal, $value:pat => $body:expr;)*) => {$(
        impl Decode for $ty {
            fn decode(column: Column) -> Result<Self, TypeDecodeError> {
                match column.try_value()? {
                    $value => $body,
                    #[allow(unreachable_patterns)]
                    found => Err(TypeDecodeError::Mismatch { expect: $name, found: found.kind() }),
                }
            }
        }
    )*};
}

decode! {
    bool: "bool", Value::Bool(b) => Ok(*b);
    i64: "i64", Value::Int(i) => Ok(*i);
    i32: "i32", Value::Int(i) => i32::try_from(*i).map_err(|_|TypeDecodeError::OutOfRange(*i, "i32"));
    i16: "i16", Value::Int(i) => i16::try_from(*i).map_err(|_|TypeDecodeError::OutOfRange(*i, "i16"));
    f64: "f64", Value::Float(f) => Ok(*f);
    String: "String", Value::Text(s) => Ok(s.clone());
}

/// Type that can be used for indexing column.
pub trait Index: Sized + sealed::Sealed {
    /// Returns the column position.
    fn position(self, columns: &[ColumnDescriptor]) -> Result<usize, TypeDecodeError>;
}

impl Index for usize {
    fn position(self, columns: &[ColumnDescriptor]) -> Result<usize, TypeDecodeError> {
        match self < columns.len() {
            true => Ok(self),
            false => Err(TypeDecodeError::ColumnNotFound(
                String::from(itoa::Buffer::new().format(self)).into(),
            )),
        }
    }
}

impl Index for &str {
    fn position(self, columns: &[ColumnDescriptor]) -> Result<usize, TypeDecodeError> {
        match columns.iter().position(|e|e.name == self) {
            Some(nth) => Ok(nth),
            None => Err(TypeDecodeError::ColumnNotFound(String::from(self).into())),
        }
    }
}

mod sealed {
    pub trait Sealed { }
    impl Sealed for usize { }
    impl Sealed for &str { }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;
    use crate::{
        error::ErrorKind,
        postgres::pg_type::{BOOL, INT4, TEXT},
    };

    fn column(name: &'static str, type_oid: u32) -> ColumnDescriptor {
        ColumnDescriptor {
            name: ByteStr::from_static(name),
            table_oid: 0,
            column_attr: 0,
            type_oid,
            type_size: -1,
            type_modifier: -1,
            format: 0,
        }
    }

    fn columns() -> Arc<[ColumnDescriptor]> {
        Arc::from([column("id", INT4), column("name", TEXT), column("is_active", BOOL)])
    }

    fn data_row(body: &'static [u8]) -> DataRow {
        let mut body = Bytes::from_static(body);
        let column_len = u16::from_be_bytes([body[0], body[1]]);
        body = body.slice(2..);
        DataRow { column_len, body }
    }

    #[test]
    fn decode_row() {
        let data = data_row(b"\0\x03\0\0\0\x011\0\0\0\x05Alice\0\0\0\x01t");
        let row = Row::from_data_row(&columns(), data, true).unwrap();

        assert_eq!(row.value("id").unwrap(), Some(&Value::Int(1)));
        assert_eq!(row.try_get::<_, String>("name").unwrap(), "Alice");
        assert!(row.try_get::<_, bool>(2).unwrap());
        assert_eq!(row.clone().decode::<(i32, String, bool)>().unwrap(), (1, "Alice".into(), true));
        assert_eq!(format!("{row:?}"), r#"{"id": Int(1), "name": Text("Alice"), "is_active": Bool(true)}"#);
    }

    #[test]
    fn null_is_none() {
        let data = data_row(b"\0\x03\0\0\0\x012\xff\xff\xff\xff\xff\xff\xff\xff");
        let row = Row::from_data_row(&columns(), data, true).unwrap();

        assert_eq!(row.value("name").unwrap(), None);
        assert_eq!(row.try_get::<_, Option<String>>(1).unwrap(), None);
        assert!(matches!(row.try_get::<_, String>(1), Err(TypeDecodeError::Null)));
    }

    #[test]
    fn column_count_missmatch() {
        let data = data_row(b"\0\x01\0\0\0\x011");
        let err = Row::from_data_row(&columns(), data, true).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(ProtocolError::ColumnCount { expect: 3, found: 1 })));
        assert!(err.is_fatal());
    }

    #[test]
    fn malformed_value_is_not_fatal() {
        let data = data_row(b"\0\x03\0\0\0\x01x\0\0\0\0\0\0\0\x01t");
        let err = Row::from_data_row(&columns(), data, true).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Decode(TypeDecodeError::Invalid { .. })));
        assert!(!err.is_fatal());
    }

    #[test]
    fn typed_errors() {
        let data = data_row(b"\0\x03\0\0\0\x0599999\0\0\0\0\0\0\0\x01f");
        let row = Row::from_data_row(&columns(), data, true).unwrap();

        assert!(matches!(row.try_get::<_, i64>("missing"), Err(TypeDecodeError::ColumnNotFound(_))));
        assert!(matches!(row.try_get::<_, i64>(3), Err(TypeDecodeError::ColumnNotFound(_))));
        assert!(matches!(row.try_get::<_, i16>(0), Err(TypeDecodeError::OutOfRange(99999, "i16"))));
        assert!(matches!(row.try_get::<_, bool>(0), Err(TypeDecodeError::Mismatch { expect: "bool", found: "int" })));
    }

    #[test]
    fn command_tag_rows() {
        let tag = |s: &'static str| CommandTag::new(ByteStr::from_static(s));
        assert_eq!(tag("SELECT 1").rows(), Some(1));
        assert_eq!(tag("INSERT 0 3").rows(), Some(3));
        assert_eq!(tag("INSERT 0 3").command(), "INSERT");
        assert_eq!(tag("CREATE TABLE").rows(), None);
        assert_eq!(tag("BEGIN").rows(), None);
    }
}
