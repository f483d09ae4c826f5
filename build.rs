// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn package_args() -> Arg {
    Arg::new("packages")
        .required(true)
        .num_args(1..)
        .value_name("PACKAGE")
        .help("Paths to the package files")
}

fn run_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("test")
            .long("test")
            .action(ArgAction::SetTrue)
            .help("Check everything but don't change the system"),
    )
    .arg(
        Arg::new("noscripts")
            .long("noscripts")
            .action(ArgAction::SetTrue)
            .help("Don't run package scriptlets"),
    )
    .arg(
        Arg::new("justdb")
            .long("justdb")
            .action(ArgAction::SetTrue)
            .help("Only update the package database"),
    )
    .arg(
        Arg::new("script_out")
            .long("script-out")
            .value_name("PATH")
            .help("Write scriptlet output to this file"),
    )
    .arg(
        Arg::new("ignore_problems")
            .long("ignore-problems")
            .action(ArgAction::SetTrue)
            .help("Run even when preparation finds problems"),
    )
}

fn build_cli() -> Command {
    Command::new("pkgtx")
        .version(env!("CARGO_PKG_VERSION"))
        .author("pkgtx Contributors")
        .about("Install, upgrade and erase RPM packages transactionally")
        .subcommand_required(false)
        .arg(
            Arg::new("root")
                .short('r')
                .long("root")
                .global(true)
                .help("Install root directory"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .global(true)
                .help("Configuration file (JSON)"),
        )
        .arg(
            Arg::new("setopt")
                .long("setopt")
                .value_name("KEY=VALUE")
                .action(ArgAction::Append)
                .global(true)
                .help("Override a configuration option"),
        )
        .subcommand(run_args(
            Command::new("install")
                .about("Install package files")
                .arg(package_args()),
        ))
        .subcommand(run_args(
            Command::new("upgrade")
                .about("Upgrade installed packages from package files")
                .arg(package_args()),
        ))
        .subcommand(run_args(
            Command::new("reinstall")
                .about("Reinstall installed packages from package files")
                .arg(package_args()),
        ))
        .subcommand(run_args(
            Command::new("erase").about("Erase installed packages").arg(
                Arg::new("names")
                    .required(true)
                    .num_args(1..)
                    .help("Names of installed packages"),
            ),
        ))
        .subcommand(
            Command::new("check")
                .about("Check whether package files could be installed, without running")
                .arg(package_args()),
        )
        .subcommand(
            Command::new("list")
                .about("List installed packages")
                .arg(Arg::new("pattern").help("Only show packages whose name contains this text")),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell", "elvish"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("pkgtx.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
