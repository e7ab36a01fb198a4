//! Tests for error types

use labtrack_db::Error;

#[test]
fn test_not_found_error() {
    let error = Error::NotFound("Experiment e1 not found".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Not found"));
    assert!(error_str.contains("e1"));
}

#[test]
fn test_already_exists_error() {
    let error = Error::AlreadyExists("Experiment e1 already exists".to_string());
    assert!(format!("{error}").contains("Already exists"));
}

#[test]
fn test_conflict_error() {
    let error = Error::Conflict("Figure a.png already exists".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Conflict"));
    assert!(error_str.contains("a.png"));
}

#[test]
fn test_invalid_argument_error() {
    let error = Error::InvalidArgument("Unrecognized tags operator XOR".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid argument"));
    assert!(error_str.contains("XOR"));
}

#[test]
fn test_persistence_failure_error() {
    let error = Error::PersistenceFailure("disk full".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Persistence failure"));
    assert!(error_str.contains("rolled back"));
}

#[test]
fn test_persistence_wraps_io() {
    let io = Error::Io(std::io::Error::new(
        std::io::ErrorKind::PermissionDenied,
        "read-only file system",
    ));
    let wrapped = Error::persistence(&io);
    assert!(matches!(wrapped, Error::PersistenceFailure(ref msg) if msg.contains("read-only")));

    let already = Error::PersistenceFailure("x".to_string());
    assert!(matches!(Error::persistence(&already), Error::PersistenceFailure(ref msg) if msg == "x"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    assert!(format!("{error}").contains("IO error"));
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("JSON error"));
}

#[test]
fn test_error_debug_format() {
    let error = Error::NotFound("x".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("NotFound"));
}
