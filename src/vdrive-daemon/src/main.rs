mod daemon;

use log::error;
use std::env;
use std::path::PathBuf;

use crate::daemon::{run_drive, DriveRunOptions, DEFAULT_DRIVE_CONFIG_PATH};

fn usage() -> String {
    format!(
        "usage: vdrive-daemon <mountpoint> [--config <path>] [--create] [--check-data]\n\
         defaults:\n\
         --config {}",
        DEFAULT_DRIVE_CONFIG_PATH
    )
}

fn parse_args(args: Vec<String>) -> Result<DriveRunOptions, String> {
    if args.is_empty() || args[0] == "-h" || args[0] == "--help" {
        return Err(usage());
    }

    let mount_point = PathBuf::from(args[0].clone());
    let mut config_path = PathBuf::from(DEFAULT_DRIVE_CONFIG_PATH);
    let mut create = false;
    let mut check_data = false;

    let mut i = 1usize;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| "missing value for --config".to_string())?;
                config_path = PathBuf::from(value);
            }
            "--create" => {
                create = true;
            }
            "--check-data" => {
                check_data = true;
            }
            other => {
                return Err(format!("unknown argument: {}\n{}", other, usage()));
            }
        }
        i += 1;
    }

    Ok(DriveRunOptions {
        mount_point,
        config_path,
        create,
        check_data,
    })
}

fn main() {
    env_logger::init();
    let options = match parse_args(env::args().skip(1).collect()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{}", msg);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run_drive(options)) {
        error!("run vdrive-daemon failed: {}", err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod daemon_tests;
