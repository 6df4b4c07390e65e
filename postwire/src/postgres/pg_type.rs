
/// Postgres object identifier.
///
/// The oid type is implemented as an unsigned four-byte integer.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;

macro_rules! oid {
    ($($name:ident = $oid:literal, $doc:literal;)*) => {
        $(
            #[doc = $doc]
            pub const $name: Oid = $oid;
        )*

        /// Returns postgres type name of known [`Oid`].
        pub fn type_name(oid: Oid) -> Option<&'static str> {
            match oid {
                $($oid => Some($doc.split('`').nth(1).unwrap_or($doc)),)*
                _ => None,
            }
        }
    };
}

oid! {
    UNSPECIFIED = 0, "`unspecified`, let the server infer the type";
    BOOL = 16, "`bool` boolean, 'true'/'false'";
    CHAR = 18, "`char` single character";
    NAME = 19, "`name` 63-byte type for storing system identifiers";
    INT8 = 20, "`int8` ~18 digit integer, 8-byte storage";
    INT2 = 21, "`int2` -32 thousand to 32 thousand, 2-byte storage";
    INT4 = 23, "`int4` -2 billion to 2 billion integer, 4-byte storage";
    TEXT = 25, "`text` variable-length string, no limit specified";
    OID = 26, "`oid` object identifier(oid), maximum 4 billion";
    FLOAT4 = 700, "`float4` single-precision floating point number, 4-byte storage";
    FLOAT8 = 701, "`float8` double-precision floating point number, 8-byte storage";
    BPCHAR = 1042, "`bpchar` char(length), blank-padded string, fixed storage length";
    VARCHAR = 1043, "`varchar` varchar(length), non-blank-padded string, variable storage length";
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_type_name() {
        assert_eq!(type_name(INT4), Some("int4"));
        assert_eq!(type_name(VARCHAR), Some("varchar"));
        assert_eq!(type_name(3802), None);
    }
}
