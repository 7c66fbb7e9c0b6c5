//! Build script for rankmesh
//!
//! Embeds the git revision, build time and target triple so that
//! `rankmesh version` and the startup log line identify the binary
//! that joined a group.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = command_output("git", &["rev-parse", "--short=8", "HEAD"])
        .unwrap_or_else(|| "unknown".to_string());
    let git_branch = command_output("git", &["rev-parse", "--abbrev-ref", "HEAD"])
        .unwrap_or_else(|| "unknown".to_string());
    let git_dirty = match command_output("git", &["status", "--porcelain"]) {
        Some(status) if !status.is_empty() => "true",
        Some(_) => "false",
        None => "unknown",
    };
    let rustc_version =
        command_output("rustc", &["--version"]).unwrap_or_else(|| "unknown".to_string());

    let build_timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let host = env::var("HOST").unwrap_or_else(|_| "unknown".to_string());

    let vars = [
        ("RANKMESH_GIT_HASH", git_hash.as_str()),
        ("RANKMESH_GIT_BRANCH", git_branch.as_str()),
        ("RANKMESH_GIT_DIRTY", git_dirty),
        ("RANKMESH_BUILD_TIMESTAMP", build_timestamp.as_str()),
        ("RANKMESH_TARGET", target.as_str()),
        ("RANKMESH_PROFILE", profile.as_str()),
        ("RANKMESH_RUSTC_VERSION", rustc_version.as_str()),
        ("RANKMESH_HOST", host.as_str()),
    ];
    for (key, value) in vars {
        println!("cargo:rustc-env={}={}", key, value);
    }
}

/// Run a command and return its trimmed stdout, or `None` if it failed
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}
