use agent_relay::delivery::{failure_text, CANCELLED_NOTICE, TIMEOUT_NOTICE};
use agent_relay::AppError;

#[test]
fn display_prefixes_each_category() {
    assert_eq!(AppError::Config("bad".into()).to_string(), "config: bad");
    assert_eq!(AppError::Storage("disk".into()).to_string(), "storage: disk");
    assert_eq!(
        AppError::AlreadyRunning("helper:C1".into()).to_string(),
        "already running: helper:C1"
    );
    assert_eq!(
        AppError::Timeout { seconds: 300 }.to_string(),
        "timeout: agent timed out after 300 seconds"
    );
    assert_eq!(
        AppError::ExternalAgent {
            exit_code: Some(2),
            diagnostics: "boom".into()
        }
        .to_string(),
        "agent: exited with code 2: boom"
    );
    assert_eq!(
        AppError::ExternalAgent {
            exit_code: None,
            diagnostics: String::new()
        }
        .to_string(),
        "agent: terminated by signal: "
    );
}

#[test]
fn only_resume_failed_is_recoverable() {
    assert!(AppError::ResumeFailed("No conversation found".into()).is_resume_failure());
    assert!(!AppError::Cancelled.is_resume_failure());
    assert!(!AppError::Timeout { seconds: 1 }.is_resume_failure());
}

#[test]
fn io_and_toml_errors_convert() {
    let io: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(io, AppError::Io(msg) if msg.contains("gone")));

    let toml_err = toml::from_str::<toml::Table>("= broken").unwrap_err();
    let config: AppError = toml_err.into();
    assert!(matches!(config, AppError::Config(msg) if msg.starts_with("invalid config")));
}

#[test]
fn user_facing_failure_texts() {
    assert_eq!(failure_text(&AppError::Cancelled), CANCELLED_NOTICE);
    assert_eq!(failure_text(&AppError::Timeout { seconds: 5 }), TIMEOUT_NOTICE);
    assert_eq!(
        failure_text(&AppError::AgentNotFound("claude".into())),
        "Error: agent not found: claude"
    );
}
