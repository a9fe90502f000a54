use std::process::Command;

#[test]
fn init_creates_valid_toml() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_ctxstore"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "ctxstore init failed: {}", String::from_utf8_lossy(&output.stderr));

    let config_path = dir.path().join(".ctxstore.toml");
    assert!(config_path.exists(), ".ctxstore.toml should exist");

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("[embedding]"));
    assert!(content.contains("[query]"));

    let config: ctxstore_core::CtxConfig = toml::from_str(&content).unwrap();
    assert_eq!(config.query.k, 3);
}

#[test]
fn init_refuses_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".ctxstore.toml"), "# existing").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_ctxstore"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let content = std::fs::read_to_string(dir.path().join(".ctxstore.toml")).unwrap();
    assert_eq!(content, "# existing");
}
