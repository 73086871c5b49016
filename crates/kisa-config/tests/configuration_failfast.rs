use std::ffi::OsString;
use std::fs;

use kisa_config::Config;
use ortho_config::OrthoConfig;
use tempfile::TempDir;

#[test]
fn malformed_config_file_is_reported() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let path = temp_dir.path().join("kisa.toml");
    fs::write(&path, "notification_limit = \"lots\"\n").expect("write malformed config");

    let args = vec![
        OsString::from("kisad"),
        OsString::from("--config-path"),
        path.into_os_string(),
    ];

    let error = Config::load_from_iter(args).expect_err("loading must fail");
    assert!(!error.to_string().is_empty(), "error should describe the failure");
}

#[test]
fn invalid_socket_flag_is_rejected() {
    let args = vec![
        OsString::from("kisad"),
        OsString::from("--socket"),
        OsString::from("tcp://127.0.0.1:9000"),
    ];

    assert!(Config::load_from_iter(args).is_err());
}
