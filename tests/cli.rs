//! Exit codes and output of the `gallery` binary.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn gallery(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gallery"))
        .args(args)
        .output()
        .unwrap()
}

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

const UNIVERSE: &str = r#"
[[scenario]]
label = "O0"

[[scenario]]
label = "O2"

[[toolchain]]
id = "gcc-15.2-x64"
baseline = { O0 = ["-O0"], O2 = ["-O2"] }
"#;

#[test]
fn test_unreadable_corpus_root() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    let out = gallery(&["check", "--src", missing.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(4));
}

#[test]
fn test_check_reports_rejections() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "loops/ok.c", "int f(void);\n");
    write(
        dir.path(),
        "loops/bad.c",
        "/* @gallery-hints\n *   optimize: yes\n */\n",
    );
    let out = gallery(&["check", "--src", dir.path().to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("bad.c"), "{stdout}");
    assert!(stdout.contains("1 fixtures loaded, 1 rejected"), "{stdout}");
}

#[test]
fn test_matrix_summary_and_config_errors() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    write(&src, "memory/a.c", "/* @gallery-hints\n *   scenario-exclude: O0\n */\n");
    write(&src, "memory/b.c", "int b;\n");
    let config = dir.path().join("gallery.toml");
    fs::write(&config, UNIVERSE).unwrap();
    let (src, config) = (src.to_str().unwrap(), config.to_str().unwrap());

    let out = gallery(&["matrix", "--src", src, "--config", config]);
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("memory/a gcc-15.2-x64 O0 skipped: scenario excluded"), "{stdout}");
    assert!(stdout.contains("memory/b gcc-15.2-x64 O2 included: -O2"), "{stdout}");
    assert!(
        stdout.contains("2 files x 1 toolchains x 2 scenarios = 4 cells (3 included)"),
        "{stdout}"
    );

    let out = gallery(&["matrix", "--src", src, "--config", config, "--toolchain", "icc-2021"]);
    assert_eq!(out.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("icc-2021"), "{stderr}");
}
