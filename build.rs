// build.rs
// Records the Cargo build profile so the startup banner can report which build is running.

use std::env;

fn main() {
    // Tell Cargo to only re-run this build script if build.rs itself changes.
    println!("cargo:rerun-if-changed=build.rs");

    let profile = env::var("PROFILE").unwrap_or_else(|_| {
        eprintln!("[build.rs] WARN: PROFILE environment variable not found. Recording 'debug'.");
        "debug".to_string()
    });

    // Only one LAPACK provider may be linked.
    let providers = ["OPENBLAS_STATIC", "OPENBLAS_SYSTEM", "INTEL_MKL_STATIC"]
        .iter()
        .filter(|feature| env::var(format!("CARGO_FEATURE_{}", feature)).is_ok())
        .count();
    if providers > 1 {
        println!(
            "cargo:warning=More than one LAPACK provider feature is enabled; disable default features when selecting another one."
        );
    }

    println!("cargo:rustc-env=TRACE_BUILD_PROFILE={}", profile);
}
