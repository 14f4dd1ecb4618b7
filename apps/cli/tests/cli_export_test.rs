//! Integration tests for the `tinytune export` command.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tinytune() -> Command {
    let mut cmd = Command::cargo_bin("tinytune").unwrap();
    cmd.env_remove("RUST_LOG").env_remove("TINYTUNE_EXPORT__LLAMA_CPP_DIR").env_remove("TINYTUNE_EXPORT__PYTHON");
    cmd
}

#[test]
fn test_export_missing_model_dir() {
    let temp = TempDir::new().unwrap();

    tinytune()
        .current_dir(temp.path())
        .args(["export", "--model-dir", "merged", "--output-file", "model.gguf"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("export failed"))
        .stderr(predicate::str::contains("model directory not found"));
}

#[test]
fn test_export_rejects_unknown_quantization() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("merged")).unwrap();

    tinytune()
        .current_dir(temp.path())
        .args(["export", "--model-dir", "merged", "--output-file", "model.gguf", "--quantization", "Q2_K"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown quantization level `Q2_K`"));
}

#[cfg(unix)]
mod with_fake_llama_cpp {
    use super::*;
    use std::path::PathBuf;

    /// Run through `/bin/sh` in place of python; `$5` is the --outfile value.
    const CONVERTER: &str = "echo \"converting $1\"\nprintf 'GGUF' > \"$5\"\n";

    fn setup() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let llama = temp.path().join("llama.cpp");
        std::fs::create_dir_all(&llama).unwrap();
        std::fs::create_dir_all(temp.path().join("merged")).unwrap();
        std::fs::write(llama.join("convert_hf_to_gguf.py"), CONVERTER).unwrap();
        (temp, llama)
    }

    #[test]
    fn test_export_without_quantizer_keeps_f16() {
        let (temp, llama) = setup();

        tinytune()
            .current_dir(temp.path())
            .args(["export", "--model-dir", "merged", "--output-file", "out/model.gguf", "--python", "/bin/sh"])
            .arg("--llama-cpp-dir")
            .arg(&llama)
            .assert()
            .success()
            .stdout(predicate::str::contains("GGUF export complete"))
            .stdout(predicate::str::contains("skipped (F16)"))
            .stderr(predicate::str::contains("quantizer binary not found"));

        assert_eq!(std::fs::read_to_string(temp.path().join("out/model.gguf")).unwrap(), "GGUF");
        assert!(!temp.path().join("out/model_f16_temp.gguf").exists());
    }

    #[test]
    fn test_export_tools_from_config_file() {
        let (temp, llama) = setup();
        let config = temp.path().join("custom.toml");
        std::fs::write(
            &config,
            format!("[export]\npython = \"/bin/sh\"\nllama_cpp_dir = \"{}\"\n", llama.display()),
        )
        .unwrap();

        let output = tinytune()
            .current_dir(temp.path())
            .args(["export", "--model-dir", "merged", "--output-file", "model.gguf", "--json", "--config"])
            .arg(&config)
            .output()
            .unwrap();
        assert!(output.status.success());

        let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(result["states"], serde_json::json!(["NOT_STARTED", "CONVERTING_F16", "SKIPPED", "COMPLETED"]));
        assert_eq!(result["artifact"]["size_bytes"], 4);
        assert_eq!(result["artifact"]["quantized_path"], serde_json::Value::Null);
    }

    #[test]
    fn test_export_tools_from_environment() {
        let (temp, llama) = setup();

        tinytune()
            .current_dir(temp.path())
            .env("TINYTUNE_EXPORT__PYTHON", "/bin/sh")
            .env("TINYTUNE_EXPORT__LLAMA_CPP_DIR", &llama)
            .args(["export", "--model-dir", "merged", "--output-file", "model.gguf"])
            .assert()
            .success();

        assert!(temp.path().join("model.gguf").is_file());
    }
}
