// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("equo")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Entropy Project")
        .about("Entropy package manager client")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .global(true)
                .default_value("/etc/entropy/equo.toml")
                .help("Path to the settings file"),
        )
        .arg(
            Arg::new("root")
                .short('r')
                .long("root")
                .global(true)
                .help("Operate on a system mounted at this root instead of /"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log progress information"),
        )
        .subcommand(
            Command::new("update")
                .about("Synchronize repositories")
                .arg(
                    Arg::new("repos")
                        .num_args(0..)
                        .help("Repository ids to synchronize (all configured ones if omitted)"),
                )
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Download even when the remote revision matches the local one"),
                )
                .arg(
                    Arg::new("quiet")
                        .short('q')
                        .long("quiet")
                        .action(ArgAction::SetTrue)
                        .help("Only report the final result of each repository"),
                )
                .arg(
                    Arg::new("wait")
                        .short('w')
                        .long("wait")
                        .action(ArgAction::SetTrue)
                        .help("Wait for other instances to release the resource lock"),
                ),
        )
        .subcommand(
            Command::new("conf")
                .about("Configuration file updates")
                .subcommand_required(true)
                .subcommand(Command::new("info").about("List pending configuration file updates"))
                .subcommand(
                    Command::new("update")
                        .about("Resolve pending configuration file updates")
                        .arg(
                            Arg::new("auto_only")
                                .short('a')
                                .long("auto-only")
                                .action(ArgAction::SetTrue)
                                .help("Merge trivial updates and exit without prompting"),
                        ),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Use CARGO_MANIFEST_DIR which is always set by cargo
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

    let man_path = man_dir.join("equo.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
