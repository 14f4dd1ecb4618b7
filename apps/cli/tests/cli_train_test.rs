//! Integration tests for the `tinytune train` command, driven by a shell worker.

#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const WORKER_SCRIPT: &str = r#"#!/bin/sh
tokdir="$1"
while IFS= read -r line; do
  case "$line" in
    *'"op":"load"'*)
      printf '{"status":"ok","result":{"modules":["model.layers.0.self_attn.q_proj","model.layers.0.self_attn.v_proj"],"tokenizer_dir":"%s"}}\n' "$tokdir" ;;
    *'"op":"apply_adapter"'*)
      echo '{"status":"ok","result":{"trainable_params":64,"total_params":6400}}' ;;
    *'"op":"forward_backward"'*)
      echo '{"status":"ok","result":{"loss":1.5}}' ;;
    *'"op":"shutdown"'*)
      echo '{"status":"ok"}'
      exit 0 ;;
    *)
      echo '{"status":"ok"}' ;;
  esac
done
"#;

const OOM_SCRIPT: &str = r#"#!/bin/sh
read -r line
echo '{"status":"error","kind":"oom","message":"CPU allocator: out of memory"}'
"#;

fn write_tokenizer(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    let tokenizer_json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"<pad>": 0, "</s>": 1, "[UNK]": 2, "hello": 3, "world": 4},
            "unk_token": "[UNK]"
        }
    });
    std::fs::write(dir.join("tokenizer.json"), tokenizer_json.to_string()).unwrap();
    std::fs::write(dir.join("tokenizer_config.json"), r#"{"pad_token": "<pad>"}"#).unwrap();
}

fn setup(script: &str) -> (TempDir, String) {
    let temp = TempDir::new().unwrap();
    let tokdir = temp.path().join("tokenizer");
    write_tokenizer(&tokdir);
    let worker = temp.path().join("worker.sh");
    std::fs::write(&worker, script).unwrap();
    std::fs::write(
        temp.path().join("train.jsonl"),
        "{\"text\": \"hello world\"}\n{\"instruction\": \"hello\", \"response\": \"world\"}\n",
    )
    .unwrap();

    let command = format!("/bin/sh {} {}", worker.display(), tokdir.display());
    (temp, command)
}

#[test]
fn test_train_writes_adapter_and_manifest() {
    let (temp, worker) = setup(WORKER_SCRIPT);

    tinytune_train(&temp, &worker)
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded 2 training examples"))
        .stdout(predicate::str::contains("Epoch 1/1, Step 1/1, Loss: 1.5000"))
        .stdout(predicate::str::contains("Training complete"))
        .stdout(predicate::str::contains("Merged model:"));

    let out = temp.path().join("out");
    assert!(out.join("adaptation_config.json").is_file());

    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("training_manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["job_id"], "cli-job");
    assert_eq!(manifest["metrics"]["steps"], 1);
}

#[test]
fn test_train_out_of_memory_exits_with_failure() {
    let (temp, worker) = setup(OOM_SCRIPT);

    tinytune_train(&temp, &worker)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("training failed"))
        .stderr(predicate::str::contains("out of memory"))
        .stderr(predicate::str::contains("lower --batch-size"));
}

#[test]
fn test_train_rejects_invalid_hyperparameters() {
    let (temp, worker) = setup(WORKER_SCRIPT);

    tinytune_train(&temp, &worker)
        .args(["--grad-accum", "0"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("grad_accum must be >= 1"))
        .stderr(predicate::str::contains("the job input is invalid"));
}

fn tinytune_train(temp: &TempDir, worker: &str) -> Command {
    let mut cmd = Command::cargo_bin("tinytune").unwrap();
    cmd.env_remove("RUST_LOG")
        .current_dir(temp.path())
        .args(["train", "--job-id", "cli-job", "--dataset", "train.jsonl", "--base-model", "tiny-llama"])
        .args(["--output-dir", "out", "--epochs", "1", "--worker", worker]);
    cmd
}
