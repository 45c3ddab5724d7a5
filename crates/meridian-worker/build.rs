//! Build script for meridian-worker.
//!
//! Computes a SHA-256 content hash over this crate's own `src/` tree and
//! embeds it in the binary as `MERIDIAN_IMPL_HASH`, read back via `env!`
//! in `src/init.rs`. This ties the identity-check hash to the compiled
//! code rather than a deployment-supplied value, matching `spec.md`'s
//! "content hash computed at build time" requirement.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

fn visit(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            visit(&path, files);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            files.push(path);
        }
    }
}

fn main() {
    let manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap());
    let src_dir = manifest_dir.join("src");

    let mut files = Vec::new();
    visit(&src_dir, &mut files);
    files.sort();

    let mut hasher = Sha256::new();
    for file in &files {
        let contents = std::fs::read(file).expect("read source file for implementation hash");
        hasher.update(&contents);
    }
    let hash = hasher.finalize();
    let hash_hex = hash.iter().map(|b| format!("{b:02x}")).collect::<String>();

    println!("cargo:rustc-env=MERIDIAN_IMPL_HASH={hash_hex}");
    println!("cargo:rerun-if-changed={}", src_dir.display());
}
