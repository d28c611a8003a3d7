// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Optional path-valued argument
fn path_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).long(name).value_name("PATH").help(help)
}

fn build_cli() -> Command {
    Command::new("depfetch")
        .version(env!("CARGO_PKG_VERSION"))
        .author("depfetch Contributors")
        .about("Restore every NuGet package a source tree references")
        .arg(
            Arg::new("source")
                .short('s')
                .long("source")
                .value_name("DIR")
                .default_value(".")
                .help("Source tree to restore"),
        )
        .arg(
            Arg::new("threads")
                .short('j')
                .long("threads")
                .value_name("N")
                .help("Worker threads for project restore and package recovery"),
        )
        .arg(path_arg("scratch-dir", "Root directory for package output and scaffold projects"))
        .arg(path_arg("diagnostics", "Append diagnostics as JSON lines to this file"))
        .arg(path_arg("dotnet", "Path or name of the dotnet executable"))
        .arg(path_arg("nuget", "Path or name of the nuget executable"))
        .arg(
            Arg::new("cleanup")
                .long("cleanup")
                .action(ArgAction::SetTrue)
                .help("Remove the package directories before exiting"),
        )
        .arg(
            Arg::new("no-feed-check")
                .long("no-feed-check")
                .action(ArgAction::SetTrue)
                .help("Skip the feed reachability check"),
        )
        .arg(
            Arg::new("package")
                .long("package")
                .value_name("NAME")
                .action(ArgAction::Append)
                .help("Additionally restore this package on its own (repeatable)"),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("depfetch.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
