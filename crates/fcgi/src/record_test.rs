//! Tests for the FastCGI record layer

use crate::record::*;

#[test]
fn test_header_round_trip() {
    let header = RecordHeader {
        record_type: RecordType::Params,
        request_id: 513,
        content_length: 1000,
        padding_length: 7,
    };
    let parsed = RecordHeader::parse(&header.encode()).unwrap();
    assert_eq!(parsed, header);
}

#[test]
fn test_header_rejects_bad_version() {
    let mut bytes = RecordHeader {
        record_type: RecordType::Stdin,
        request_id: 1,
        content_length: 0,
        padding_length: 0,
    }
    .encode();
    bytes[0] = 9;
    assert_eq!(RecordHeader::parse(&bytes), Err(FcgiError::BadVersion(9)));
}

#[test]
fn test_header_rejects_unknown_type() {
    let mut bytes = RecordHeader {
        record_type: RecordType::Stdin,
        request_id: 1,
        content_length: 0,
        padding_length: 0,
    }
    .encode();
    bytes[1] = 42;
    assert_eq!(RecordHeader::parse(&bytes), Err(FcgiError::UnknownType(42)));
}

#[test]
fn test_record_type_codes_match_the_spec() {
    for (code, expected) in [
        (1u8, RecordType::BeginRequest),
        (2, RecordType::AbortRequest),
        (3, RecordType::EndRequest),
        (4, RecordType::Params),
        (5, RecordType::Stdin),
        (6, RecordType::Stdout),
        (7, RecordType::Stderr),
        (8, RecordType::Data),
    ] {
        assert_eq!(RecordType::from_u8(code), Some(expected));
        assert_eq!(expected as u8, code);
    }
    assert_eq!(RecordType::from_u8(0), None);
    assert_eq!(RecordType::from_u8(12), None);
}

#[test]
fn test_encode_record_pads_to_eight() {
    let mut out = Vec::new();
    encode_record(RecordType::Stdin, 1, b"abc", &mut out);

    // 8 header + 3 body + 5 padding
    assert_eq!(out.len(), 16);
    let header = RecordHeader::parse(&out[..8].try_into().unwrap()).unwrap();
    assert_eq!(header.content_length, 3);
    assert_eq!(header.padding_length, 5);
    assert_eq!(&out[8..11], b"abc");
}

#[test]
fn test_encode_empty_record_has_no_padding() {
    let mut out = Vec::new();
    encode_record(RecordType::Stdin, 1, &[], &mut out);
    assert_eq!(out.len(), 8);
}

#[test]
fn test_begin_request_round_trip() {
    let body = BeginRequestBody {
        role: roles::RESPONDER,
        flags: FLAG_KEEP_CONN,
    };
    assert_eq!(BeginRequestBody::parse(&body.encode()).unwrap(), body);
}

#[test]
fn test_end_request_round_trip() {
    let body = EndRequestBody {
        app_status: 0x0102_0304,
        protocol_status: protocol_status::OVERLOADED,
    };
    assert_eq!(EndRequestBody::parse(&body.encode()).unwrap(), body);
}

#[test]
fn test_params_round_trip_short_and_long() {
    let long_value = "v".repeat(300);
    let pairs = vec![
        ("SCRIPT_NAME", "/index.php"),
        ("QUERY_STRING", ""),
        ("LONG", long_value.as_str()),
    ];
    let body = encode_params(pairs.clone());
    let decoded = decode_params(&body).unwrap();

    assert_eq!(decoded.len(), 3);
    for ((name, value), (dn, dv)) in pairs.iter().zip(decoded.iter()) {
        assert_eq!(name, dn);
        assert_eq!(value, dv);
    }
}

#[test]
fn test_params_reject_truncated_body() {
    let body = encode_params(vec![("NAME", "value")]);
    assert!(decode_params(&body[..body.len() - 1]).is_err());
}
