use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for prism")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all checks: fmt, clippy, tests, smoke renders
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates
    Clippy,
    /// Run all tests
    Test,
    /// Render every manifest in scenes/ headlessly
    Smoke,
    /// Build rustdoc for the workspace
    Doc,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            run_fmt()?;
            run_clippy()?;
            run_tests()?;
            run_smoke()?;
        }
        Commands::Fmt => run_fmt()?,
        Commands::Clippy => run_clippy()?,
        Commands::Test => run_tests()?,
        Commands::Smoke => run_smoke()?,
        Commands::Doc => cargo("doc", &["doc", "--workspace", "--no-deps"])?,
    }

    Ok(())
}

fn cargo(step: &str, args: &[&str]) -> Result<()> {
    println!("==> cargo {}", args.join(" "));
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{step} failed");
    }
    Ok(())
}

fn run_fmt() -> Result<()> {
    cargo("cargo fmt check", &["fmt", "--all", "--", "--check"])
}

fn run_clippy() -> Result<()> {
    cargo(
        "cargo clippy",
        &[
            "clippy",
            "--workspace",
            "--all-targets",
            "--",
            "-D",
            "warnings",
        ],
    )
}

fn run_tests() -> Result<()> {
    cargo("cargo test", &["test", "--workspace"])
}

/// The demo scene plus every `scenes/*.yaml`, three frames each.
fn run_smoke() -> Result<()> {
    let render = [
        "run",
        "-q",
        "-p",
        "prism-cli",
        "--",
        "render",
        "--frames",
        "3",
    ];
    cargo("demo render", &render)?;

    let scenes = Path::new("scenes");
    if !scenes.is_dir() {
        return Ok(());
    }
    let mut manifests: Vec<_> = std::fs::read_dir(scenes)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_manifest(path))
        .collect();
    manifests.sort();

    for manifest in manifests {
        let manifest = manifest.to_string_lossy();
        let mut args = render.to_vec();
        args.push(&manifest);
        cargo(&format!("render {manifest}"), &args)?;
    }
    Ok(())
}

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}
