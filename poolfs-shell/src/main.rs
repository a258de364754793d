use anyhow::{Context, Result};
use clap::{App, Arg};
use log::warn;
use poolfs::geometry::{DEFAULT_BLOCK_SIZE, DEFAULT_TOTAL_SIZE};
use poolfs::{FileSystem, Geometry};
use poolfs_shell::image::{self, DEFAULT_IMAGE_PATH};
use poolfs_shell::{logging, Flow, Session};
use std::io::{self, BufRead, Write};
use std::path::Path;

fn main() {
    logging::init();
    if let Err(error) = run() {
        eprintln!("error: {:#}", error);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let total_default = DEFAULT_TOTAL_SIZE.to_string();
    let block_default = DEFAULT_BLOCK_SIZE.to_string();
    let matches = App::new("poolfs")
        .about("Block pool filesystem shell")
        .after_help("Ctrl-C ends the session without saving; use exit or Ctrl-D to persist.")
        .arg(
            Arg::with_name("image")
                .long("image")
                .takes_value(true)
                .default_value(DEFAULT_IMAGE_PATH)
                .help("Image file loaded at start and saved on exit"),
        )
        .arg(
            Arg::with_name("total-size")
                .long("total-size")
                .takes_value(true)
                .default_value(&total_default)
                .help("Pool capacity in bytes for a new image"),
        )
        .arg(
            Arg::with_name("block-size")
                .long("block-size")
                .takes_value(true)
                .default_value(&block_default)
                .help("Block size in bytes for a new image"),
        )
        .get_matches();

    let image_path = Path::new(matches.value_of("image").unwrap_or(DEFAULT_IMAGE_PATH));
    let total_size = parse_size(
        "--total-size",
        matches.value_of("total-size").unwrap_or(total_default.as_str()),
    )?;
    let block_size = parse_size(
        "--block-size",
        matches.value_of("block-size").unwrap_or(block_default.as_str()),
    )?;
    let geometry = Geometry::new(total_size, block_size).with_context(|| {
        format!(
            "invalid pool geometry: --total-size {} --block-size {}",
            total_size, block_size
        )
    })?;

    let fs = match image::load(image_path) {
        Ok(Some(fs)) => fs,
        Ok(None) => FileSystem::new(geometry),
        Err(err) => {
            let aside = image::set_aside(image_path).with_context(|| {
                format!(
                    "cannot read {} ({}) and cannot move it out of the way",
                    image_path.display(),
                    err
                )
            })?;
            warn!(
                "starting with an empty filesystem, previous image kept at {}: {}",
                aside.display(),
                err
            );
            FileSystem::new(geometry)
        }
    };

    let mut session = Session::new(fs);
    repl(&mut session).context("shell I/O failed")?;

    image::save(image_path, session.fs())
        .with_context(|| format!("could not persist {}", image_path.display()))
}

fn repl(session: &mut Session) -> io::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write!(out, "{}", session.handle_line("help").0)?;

    loop {
        write!(out, "{}", session.prompt())?;
        out.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            writeln!(out)?;
            return Ok(());
        }
        let (text, flow) = session.handle_line(&line);
        write!(out, "{}", text)?;
        if flow == Flow::Exit {
            return Ok(());
        }
    }
}

fn parse_size(flag: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .with_context(|| format!("invalid {} {}", flag, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_sizes_name_the_flag() {
        assert_eq!(parse_size("--block-size", "64").unwrap(), 64);
        let err = parse_size("--total-size", "abc").unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.starts_with("invalid --total-size abc: "), "{}", message);
    }
}
