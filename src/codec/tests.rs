use super::*;

fn field(value: &str) -> Field {
    Some(value.to_string())
}

#[test]
fn test_encode_plain_row_uses_crlf() {
    let encoded = encode(&[field("2"), field("bob"), field("x")], 10).unwrap();
    assert_eq!(encoded, b"2,bob,x\r\n");
}

#[test]
fn test_encode_null_as_empty_field() {
    let encoded = encode(&[field("1"), field("alice"), None], 10).unwrap();
    assert_eq!(encoded, b"1,alice,\r\n");
}

#[test]
fn test_round_trip_with_delimiters_quotes_and_newlines() {
    let record = vec![
        field("a,b"),
        field("say \"hi\""),
        field("line1\nline2"),
        field("crlf\r\ninside"),
        None,
        field(" padded "),
    ];
    let encoded = encode(&record, 10).unwrap();
    assert!(encoded.ends_with(b"\r\n"));
    assert_eq!(decode(&encoded).unwrap(), record);
}

#[test]
fn test_round_trip_single_null_field() {
    let record = vec![None];
    let encoded = encode(&record, 1).unwrap();
    assert_eq!(decode(&encoded).unwrap(), record);
}

#[test]
fn test_empty_string_decodes_as_null() {
    // NULL and '' share one encoding on the wire.
    let encoded = encode(&[field(""), field("v")], 10).unwrap();
    assert_eq!(decode(&encoded).unwrap(), vec![None, field("v")]);
}

#[test]
fn test_encode_rejects_rows_wider_than_limit() {
    let record = vec![field("1"), field("2"), field("3")];
    match encode(&record, 2) {
        Err(DriverError::WidthViolation { columns, limit }) => {
            assert_eq!(columns, 3);
            assert_eq!(limit, 2);
        }
        other => panic!("expected width violation, got {:?}", other),
    }
    assert!(encode(&record, 3).is_ok());
}

#[test]
fn test_encode_rejects_empty_record() {
    assert!(matches!(encode(&[], 10), Err(DriverError::Stream(_))));
}

#[test]
fn test_decode_rejects_multiple_records() {
    assert!(decode(b"1,a\r\n2,b\r\n").is_err());
    assert!(decode(b"").is_err());
}

#[tokio::test]
async fn test_writer_streams_records() {
    let mut out = Vec::new();
    let mut writer = RecordWriter::new(&mut out, 3);
    writer
        .write_record(&[field("1"), field("alice"), None])
        .await
        .unwrap();
    writer
        .write_record(&[field("2"), field("bob"), field("x")])
        .await
        .unwrap();
    assert_eq!(writer.records(), 2);
    assert_eq!(writer.finish().await.unwrap(), 2);
    assert_eq!(out, b"1,alice,\r\n2,bob,x\r\n");
}

#[tokio::test]
async fn test_writer_keeps_single_null_rows_visible() {
    let mut out = Vec::new();
    let mut writer = RecordWriter::new(&mut out, 1);
    writer.write_record(&[field("1")]).await.unwrap();
    writer.write_record(&[None]).await.unwrap();
    writer.write_record(&[field("3")]).await.unwrap();
    assert_eq!(writer.finish().await.unwrap(), 3);
    assert_eq!(out, b"1\r\n\"\"\r\n3\r\n");

    let mut reader = RecordReader::new(&out[..], 1);
    let mut rows = Vec::new();
    while let Some(record) = reader.next_record().await.unwrap() {
        rows.push(record);
    }
    assert_eq!(rows, vec![vec![field("1")], vec![None], vec![field("3")]]);
}

#[tokio::test]
async fn test_writer_rejects_width_change() {
    let mut out = Vec::new();
    let mut writer = RecordWriter::new(&mut out, 5);
    writer.write_record(&[field("1"), field("2")]).await.unwrap();
    let err = writer.write_record(&[field("1")]).await.unwrap_err();
    assert!(err.to_string().contains("Record 2 has 1 columns, expected 2"));
}

#[tokio::test]
async fn test_writer_rejects_width_violation_before_writing() {
    let mut out = Vec::new();
    let mut writer = RecordWriter::new(&mut out, 1);
    let err = writer.write_record(&[field("1"), field("2")]).await.unwrap_err();
    assert!(matches!(err, DriverError::WidthViolation { columns: 2, limit: 1 }));
    assert_eq!(writer.records(), 0);
    drop(writer);
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_reader_handles_quoted_newlines() {
    let input = b"1,\"multi\r\nline\",x\r\n2,\"a,\"\"b\"\"\",\r\n";
    let mut reader = RecordReader::new(&input[..], 3);
    assert_eq!(
        reader.next_record().await.unwrap(),
        Some(vec![field("1"), field("multi\r\nline"), field("x")])
    );
    assert_eq!(
        reader.next_record().await.unwrap(),
        Some(vec![field("2"), field("a,\"b\""), None])
    );
    assert_eq!(reader.next_record().await.unwrap(), None);
    assert_eq!(reader.records(), 2);
}

#[tokio::test]
async fn test_reader_accepts_lf_and_skips_blank_lines() {
    let input = b"1,a\n\r\n2,b\n";
    let mut reader = RecordReader::new(&input[..], 2);
    assert_eq!(reader.next_record().await.unwrap(), Some(vec![field("1"), field("a")]));
    assert_eq!(reader.next_record().await.unwrap(), Some(vec![field("2"), field("b")]));
    assert_eq!(reader.next_record().await.unwrap(), None);
}

#[tokio::test]
async fn test_reader_reads_blank_line_as_single_null() {
    let mut reader = RecordReader::new(&b"1\n\n3\n"[..], 1).with_blank_as_null();
    assert_eq!(reader.next_record().await.unwrap(), Some(vec![field("1")]));
    assert_eq!(reader.next_record().await.unwrap(), Some(vec![None]));
    assert_eq!(reader.next_record().await.unwrap(), Some(vec![field("3")]));
    assert_eq!(reader.next_record().await.unwrap(), None);
    assert_eq!(reader.records(), 3);

    let mut reader = RecordReader::new(&b"\n\n"[..], 4).with_blank_as_null();
    assert_eq!(reader.next_record().await.unwrap(), Some(vec![None]));
    assert_eq!(reader.next_record().await.unwrap(), Some(vec![None]));
    assert_eq!(reader.next_record().await.unwrap(), None);
}

#[tokio::test]
async fn test_reader_rejects_blank_line_in_wide_stream() {
    let mut reader = RecordReader::new(&b"1,a\n\n2,b\n"[..], 2).with_blank_as_null();
    assert!(reader.next_record().await.unwrap().is_some());
    let err = reader.next_record().await.unwrap_err();
    assert!(err.to_string().contains("Record 2 is blank"));
}

#[tokio::test]
async fn test_reader_rejects_truncated_record() {
    let mut reader = RecordReader::new(&b"1,a\r\n2,b"[..], 2);
    assert!(reader.next_record().await.unwrap().is_some());
    let err = reader.next_record().await.unwrap_err();
    assert!(err.to_string().contains("missing its line terminator"));

    let mut reader = RecordReader::new(&b"1,\"open\r\n"[..], 2);
    let err = reader.next_record().await.unwrap_err();
    assert!(err.to_string().contains("inside a quoted field"));
}

#[tokio::test]
async fn test_reader_enforces_limit_and_width() {
    let mut reader = RecordReader::new(&b"1,2,3\r\n"[..], 2);
    assert!(matches!(
        reader.next_record().await,
        Err(DriverError::WidthViolation { columns: 3, limit: 2 })
    ));

    let mut reader = RecordReader::new(&b"1,2\r\n3\r\n"[..], 4);
    assert!(reader.next_record().await.unwrap().is_some());
    assert!(reader.next_record().await.is_err());
}
