use serde_json::Value;
use ferry_error::{ErrorCode, ErrorContext, FerryError};

#[test]
fn test_json_serialization() {
    let error = FerryError::new(ErrorCode::TableNotFound, "Table 'status_code' not found")
        .with_context(ErrorContext::TableNotFound {
            table: "status_code".to_string(),
            available_tables: vec!["status_codes".to_string(), "orders".to_string()],
        })
        .with_hint("Did you mean 'status_codes'?");

    let json = error.to_json();

    let v: Value = serde_json::from_str(&json).expect("valid json");

    assert_eq!(v["code"], "FERRY-2003");
    assert_eq!(v["message"], "Table 'status_code' not found");
    assert_eq!(v["hint"], "Did you mean 'status_codes'?");
    assert_eq!(v["context"]["type"], "table_not_found");
    assert_eq!(v["context"]["table"], "status_code");
}

#[test]
fn test_json_roundtrip_keeps_code() {
    let error = FerryError::new(ErrorCode::CodeTableOverload, "capacity reached")
        .with_context(ErrorContext::Capacity {
            limit: 2,
            in_use: 2,
        });

    let back: FerryError = serde_json::from_str(&error.to_json()).expect("valid json");
    assert_eq!(back.code, ErrorCode::CodeTableOverload);
    match back.context {
        Some(ErrorContext::Capacity { limit, in_use }) => {
            assert_eq!(limit, 2);
            assert_eq!(in_use, 2);
        }
        other => panic!("unexpected context: {:?}", other),
    }
}

#[test]
fn test_error_code_parsing() {
    let code: ErrorCode = "FERRY-1004".to_string().try_into().unwrap();
    assert_eq!(code, ErrorCode::ConnectorRejected);
}
