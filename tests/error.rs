use std::time::Duration;

use serde_json::Value;
use tasksync::error::{exit_codes, Error, JsonError, MutationKind};

#[test]
fn exit_code_user_errors() {
    let errors = [
        Error::validation("title", "cannot be empty"),
        Error::InvalidArgument("bad input".to_string()),
        Error::NotFound("01hx".to_string()),
        Error::Busy("01hx".to_string()),
    ];
    for err in errors {
        assert_eq!(err.exit_code(), exit_codes::USER_ERROR, "{err}");
        assert!(!err.is_retryable(), "{err}");
    }
}

#[test]
fn exit_code_auth_required() {
    let err = Error::Auth("session expired".to_string());
    assert_eq!(err.exit_code(), exit_codes::AUTH_REQUIRED);
    assert!(err.requires_reauth());
}

#[test]
fn exit_code_operation_failed() {
    let errors = [
        Error::Network("reset".to_string()),
        Error::Timeout(Duration::from_secs(10)),
        Error::Payload("missing id".to_string()),
        Error::SessionEnded,
        Error::OperationFailed("boom".to_string()),
    ];
    for err in errors {
        assert_eq!(err.exit_code(), exit_codes::OPERATION_FAILED, "{err}");
    }
}

#[test]
fn only_transport_failures_are_retryable() {
    assert!(Error::Network("reset".to_string()).is_retryable());
    assert!(Error::Timeout(Duration::from_millis(100)).is_retryable());
    assert!(!Error::Payload("bad".to_string()).is_retryable());
    assert!(!Error::SessionEnded.is_retryable());
    assert!(!Error::Auth("expired".to_string()).is_retryable());
}

#[test]
fn mutation_context_keeps_the_cause() {
    let err = Error::mutation(
        MutationKind::ToggleComplete,
        "01hx",
        Error::NotFound("01hx".to_string()),
    );
    assert!(matches!(err.cause(), Error::NotFound(_)));
    assert_eq!(err.exit_code(), exit_codes::USER_ERROR);

    let details = err.details().expect("details");
    assert_eq!(details["operation"], Value::String("toggle_complete".to_string()));
    assert_eq!(details["id"], Value::String("01hx".to_string()));
    assert_eq!(details["retryable"], Value::Bool(false));
}

#[test]
fn validation_details_name_the_field() {
    let err = Error::validation("description", "too long");
    assert_eq!(err.to_string(), "Invalid description: too long");
    let details = err.details().expect("details");
    assert_eq!(details["field"], Value::String("description".to_string()));
    assert_eq!(details["reason"], Value::String("too long".to_string()));
}

#[test]
fn json_error_includes_details() {
    let err = Error::validation("title", "cannot be empty");
    let json = JsonError::from(&err);
    assert_eq!(json.code, exit_codes::USER_ERROR);
    assert!(json.details.is_some());

    let value = serde_json::to_value(&json).expect("serialize");
    assert_eq!(value["error"], Value::String(err.to_string()));
}

#[test]
fn json_error_omits_missing_details() {
    let err = Error::Network("reset".to_string());
    let value = serde_json::to_value(JsonError::from(&err)).expect("serialize");
    assert!(value.get("details").is_none());
    assert_eq!(value["code"], Value::from(exit_codes::OPERATION_FAILED));
}
