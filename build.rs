// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: config directory
fn config_dir_arg() -> Arg {
    Arg::new("config_dir")
        .short('c')
        .long("config-dir")
        .value_name("DIR")
        .required(true)
        .help("Directory holding imageforge.toml and package lists")
}

/// Common argument: work directory
fn work_dir_arg() -> Arg {
    Arg::new("work_dir")
        .short('w')
        .long("work-dir")
        .value_name("DIR")
        .required(true)
        .help("Scratch directory for the root tree, mounts and raw images")
}

fn flag(name: &'static str, long: &'static str, help: &'static str) -> Arg {
    Arg::new(name).long(long).action(ArgAction::SetTrue).help(help)
}

fn build_cli() -> Command {
    Command::new("imageforge")
        .version(env!("CARGO_PKG_VERSION"))
        .author("imageforge Contributors")
        .about("Build bootable Linux disk images and root filesystem tarballs")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log at debug level"),
        )
        .subcommand(
            Command::new("build")
                .about("Build an image from a config directory")
                .arg(work_dir_arg())
                .arg(config_dir_arg())
                .arg(
                    Arg::new("out_dir")
                        .short('o')
                        .long("out-dir")
                        .value_name("DIR")
                        .required(true)
                        .help("Where finished artifacts are written"),
                )
                .arg(
                    flag(
                        "no_compress",
                        "no-compress",
                        "Copy the raw image instead of compressing it to .xz",
                    )
                    .short('x'),
                )
                .arg(
                    flag(
                        "fast_forward",
                        "fast-forward",
                        "Compress with the fastest xz level",
                    )
                    .short('f'),
                )
                .arg(flag(
                    "skip_bootstrap",
                    "skip-bootstrap",
                    "Reuse an already bootstrapped root tree in the work directory",
                ))
                .arg(flag(
                    "keep_work_dir",
                    "keep-work-dir",
                    "Leave the work directory in place after the build",
                )),
        )
        .subcommand(
            Command::new("plan")
                .about("Print the partition layout and the commands a build would run")
                .arg(config_dir_arg())
                .arg(
                    Arg::new("size")
                        .long("size")
                        .value_name("SIZE")
                        .help("Device size to plan for (e.g. 8G)"),
                )
                .arg(
                    Arg::new("disk")
                        .long("disk")
                        .default_value("/dev/loop0")
                        .help("Device path to plan against"),
                )
                .arg(
                    Arg::new("alt_disk")
                        .long("alt-disk")
                        .default_value("/dev/loop1")
                        .help("Second device path for split builds"),
                )
                .arg(flag("json", "json", "Print the plan as JSON")),
        )
        .subcommand(
            Command::new("check")
                .about("Check that the host can run a build")
                .arg(config_dir_arg()),
        )
        .subcommand(
            Command::new("clean")
                .about("Undo what a failed build left behind")
                .arg(work_dir_arg())
                .arg(
                    Arg::new("devices")
                        .long("device")
                        .value_name("PATH")
                        .action(ArgAction::Append)
                        .help("Loop devices to release"),
                ),
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

    let man_path = man_dir.join("imageforge.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
