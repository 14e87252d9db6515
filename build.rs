use std::env;
use std::fs;
use std::path::Path;
use std::process::Command;

pub fn main() {
    // Version info must be emitted before anything else can return early
    generate_version_info();

    println!("cargo:rerun-if-changed=migrations");
    println!("cargo:rerun-if-changed=web/src");
    println!("cargo:rerun-if-changed=web/package.json");

    let target = env::var("TARGET").unwrap_or_default();
    if target.contains("musl") {
        println!("cargo:warning=Configuring bundled PostgreSQL build for musl static linking");
        #[cfg(not(feature = "bundled-postgres"))]
        println!("cargo:warning=bundled-postgres feature not enabled - build may fail!");
    }

    // include_dir! needs the directory to exist even when the SPA is built separately
    let web_build_path = Path::new("web/build");
    if !web_build_path.exists() {
        fs::create_dir_all(web_build_path)
            .expect("Failed to create web/build directory for include_dir! macro");
    }

    if env::var("SKIP_WEB_BUILD").is_ok() {
        println!("Skipping web build due to SKIP_WEB_BUILD environment variable");
        return;
    }

    // In dev mode the SPA runs on the Vite dev server and talks to the API on :1337
    let profile = env::var("PROFILE").unwrap_or_else(|_| "debug".to_string());
    if profile != "release" || !Path::new("web/package.json").exists() {
        println!("Skipping web build (profile: {})", profile);
        return;
    }

    let steps: [&[&str]; 2] = [&["install"], &["run", "build"]];
    for args in steps {
        let output = Command::new("npm")
            .args(args)
            .current_dir("web")
            .output()
            .expect("Failed to execute npm");

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            panic!(
                "npm {} failed:\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}",
                args.join(" ")
            );
        }
    }
}

/// Emit `VERGEN_GIT_DESCRIBE` and `VERGEN_GIT_SHA` for `--version` and `/data/status`.
///
/// Outside a git checkout vergen falls back to idempotent placeholder values.
fn generate_version_info() {
    use vergen_git2::{BuildBuilder, CargoBuilder, Emitter, Git2Builder};

    let build = BuildBuilder::default()
        .build_timestamp(true)
        .build()
        .expect("Failed to configure build info");

    let cargo = CargoBuilder::default()
        .target_triple(true)
        .build()
        .expect("Failed to configure cargo info");

    let git2 = Git2Builder::default()
        .describe(true, true, None)
        .sha(true)
        .build()
        .expect("Failed to configure git info");

    Emitter::default()
        .add_instructions(&build)
        .expect("Failed to add build instructions")
        .add_instructions(&cargo)
        .expect("Failed to add cargo instructions")
        .add_instructions(&git2)
        .expect("Failed to add git instructions")
        .emit()
        .expect("Failed to emit version info");
}
