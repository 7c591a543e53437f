//! Property tests for the token stream decoder.

#![allow(clippy::unwrap_used)]

use bytes::{Bytes, BytesMut};
use mssql_types::{SqlValue, TypeInfo};
use proptest::prelude::*;
use tds_protocol::{ColMetaData, Column, Done, Token, TokenStream, TokenType};

fn metadata() -> ColMetaData {
    ColMetaData::new(vec![
        Column::new("id", TypeInfo::int(8)),
        Column::new("name", TypeInfo::nvarchar(40)),
        Column::new("flag", TypeInfo::bit()),
        Column::new("blob", TypeInfo::varbinary(64)),
    ])
}

fn row_strategy() -> impl Strategy<Value = Vec<SqlValue>> {
    (
        proptest::option::of(any::<i64>()),
        proptest::option::of("[a-zA-Z0-9 ]{0,40}"),
        proptest::option::of(any::<bool>()),
        proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
    )
        .prop_map(|(id, name, flag, blob)| {
            vec![
                id.map_or(SqlValue::Null, SqlValue::BigInt),
                name.map_or(SqlValue::Null, SqlValue::String),
                flag.map_or(SqlValue::Null, SqlValue::Bool),
                blob.map_or(SqlValue::Null, |b| SqlValue::Binary(Bytes::from(b))),
            ]
        })
}

proptest! {
    #[test]
    fn rows_decode_in_order_with_either_encoding(
        rows in proptest::collection::vec((row_strategy(), any::<bool>()), 0..20)
    ) {
        let metadata = metadata();
        let mut buf = BytesMut::new();
        metadata.encode(&mut buf).unwrap();
        for (values, compressed) in &rows {
            if *compressed {
                metadata.encode_nbc_row(values, &mut buf).unwrap();
            } else {
                metadata.encode_row(values, &mut buf).unwrap();
            }
        }
        Done::with_count(rows.len() as u64, false).encode(TokenType::Done, &mut buf);

        let tokens = TokenStream::new(buf.freeze()).collect::<Result<Vec<_>, _>>().unwrap();
        prop_assert_eq!(tokens.len(), rows.len() + 2);
        for (token, (values, _)) in tokens[1..].iter().zip(&rows) {
            prop_assert_eq!(token, &Token::Row(values.clone()));
        }
        prop_assert!(matches!(tokens.last(), Some(Token::Done(done)) if !done.has_more()));
    }

    #[test]
    fn arbitrary_input_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let stream = TokenStream::new(Bytes::from(data));
        let mut errors = 0;
        for result in stream {
            if result.is_err() {
                errors += 1;
            }
        }
        prop_assert!(errors <= 1);
    }
}
