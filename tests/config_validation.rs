use sitemirror::{ConfigError, Controller, Layout};
use std::time::Duration;

#[test]
fn test_zero_concurrency_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let result = Controller::builder("https://example.com/blog/")
        .output_dir(dir.path())
        .concurrency(0)
        .build();

    match result {
        Err(ConfigError::InvalidConcurrency(0)) => {}
        _ => panic!("Expected InvalidConcurrency error"),
    }
}

#[test]
fn test_invalid_scope_url_rejected() {
    let dir = tempfile::tempdir().unwrap();
    for scope in ["", "not a url", "ftp://example.com/pub/", "mailto:someone@example.com"] {
        let result = Controller::builder(scope).output_dir(dir.path()).build();
        assert!(
            matches!(result, Err(ConfigError::InvalidScopeUrl(_))),
            "scope {:?} should be rejected",
            scope
        );
    }
}

#[test]
fn test_zero_timeout_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let result = Controller::builder("https://example.com/")
        .output_dir(dir.path())
        .timeout(Duration::ZERO)
        .build();

    assert!(matches!(result, Err(ConfigError::InvalidTimeout)));
}

#[test]
fn test_negative_or_non_finite_delay_rejected() {
    let dir = tempfile::tempdir().unwrap();
    for delay in [-1.0, f64::NAN, f64::INFINITY] {
        let result = Controller::builder("https://example.com/")
            .output_dir(dir.path())
            .delay_secs(delay)
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidDelay(_))));
    }
}

#[test]
fn test_empty_user_agent_list_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let result = Controller::builder("https://example.com/")
        .output_dir(dir.path())
        .user_agents(Vec::new())
        .build();

    assert!(matches!(result, Err(ConfigError::EmptyUserAgents)));
}

#[test]
fn test_unwritable_output_root_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let result = Controller::builder("https://example.com/")
        .output_dir(blocker.join("mirror"))
        .build();

    assert!(matches!(result, Err(ConfigError::OutputDir { .. })));
}

#[test]
fn test_valid_configuration_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("nested").join("mirror");
    let controller = Controller::builder("https://Example.com/blog/post1")
        .output_dir(&output)
        .concurrency(4)
        .delay(Duration::from_millis(100))
        .timeout(Duration::from_secs(5))
        .preserve_structure(false)
        .build()
        .unwrap();

    assert!(output.is_dir());
    assert_eq!(controller.scope().as_str(), "https://example.com/blog/post1/");
    assert_eq!(controller.config().concurrency(), 4);
    assert_eq!(controller.config().delay(), Duration::from_millis(100));
    assert_eq!(controller.config().layout(), Layout::Flat);
}

#[test]
fn test_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let controller = Controller::builder("https://example.com/")
        .output_dir(dir.path())
        .build()
        .unwrap();

    assert_eq!(controller.config().concurrency(), 1);
    assert_eq!(controller.config().delay(), Duration::from_secs(1));
    assert_eq!(controller.config().layout(), Layout::Structured);
}
