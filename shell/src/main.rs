// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    io::{self, BufRead, Write},
    process::ExitCode,
};

use dassie_ds_file::FileStorage;
use dassie_fs::{Entry, FileSystem, Location, Result};
use dassie_fs_fat32::Volume;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// One tokenized input line. Anything that does not parse is ignored, like
/// every other failure at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Command<'line> {
    Quit,
    ChangeDirectory(Option<&'line str>),
    List { long: bool, path: Option<&'line str> },
    Concatenate(&'line str),
    MakeDirectory(&'line str),
    MakeFile(&'line str),
    Ignored,
}

fn parse(line: &str) -> Command {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("quit") => Command::Quit,
        Some("cd") => Command::ChangeDirectory(tokens.next()),
        Some("ls") => match tokens.next() {
            Some("-l") => Command::List {
                long: true,
                path: tokens.next(),
            },
            path => Command::List { long: false, path },
        },
        Some("cat") => tokens.next().map_or(Command::Ignored, Command::Concatenate),
        Some("mkdir") => tokens
            .next()
            .map_or(Command::Ignored, Command::MakeDirectory),
        Some("touch") => tokens.next().map_or(Command::Ignored, Command::MakeFile),
        _ => Command::Ignored,
    }
}

/// Demote the silent conditions (not found, already exists, wrong kind) to
/// `None`; anything else stays fatal.
fn silently<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(error) if error.is_silent() => Ok(None),
        Err(error) => Err(error),
    }
}

fn long_listing(entry: &Entry) -> String {
    let header = if entry.is_directory() {
        "drwx------ 1 root root "
    } else {
        "-rwx------ 1 root root "
    };
    let size = if entry.is_directory() { 0 } else { entry.size };
    let day = entry.modified_date & 0x1F;
    let month = ((entry.modified_date >> 5) & 0x0F) as usize;
    let month = MONTH_NAMES
        .get(month.wrapping_sub(1))
        .copied()
        .unwrap_or("December");
    let hour = (entry.modified_time >> 11) & 0x1F;
    let minute = (entry.modified_time >> 5) & 0x3F;
    format!(
        "{header}{size} {month} {day:02} {hour:02}:{minute:02} {name}",
        name = entry.name
    )
}

fn run<FS: FileSystem>(fs: &FS) -> Result<()> {
    let stdin = io::stdin();
    let mut cwd = Location::root();
    let mut line = String::new();
    loop {
        print!("{}>", cwd.path);
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        match parse(&line) {
            Command::Quit => return Ok(()),
            Command::Ignored | Command::ChangeDirectory(None) => {}
            Command::ChangeDirectory(Some(target)) => {
                if let Some(location) = silently(fs.resolve(&cwd, target))? {
                    cwd = location;
                }
            }
            Command::List { long, path } => {
                let at = match path {
                    Some(path) => silently(fs.resolve(&cwd, path))?,
                    None => Some(cwd.clone()),
                };
                if let Some(at) = at {
                    let entries = fs.entries(&at)?;
                    if long {
                        for entry in &entries {
                            println!("{}", long_listing(entry));
                        }
                    } else {
                        for entry in &entries {
                            print!("{} ", entry.name);
                        }
                        println!();
                    }
                }
            }
            Command::Concatenate(target) => {
                if let Some(contents) = silently(fs.read_file(&cwd, target))? {
                    io::stdout().write_all(&contents)?;
                    if !contents.ends_with(b"\n") {
                        println!();
                    }
                }
            }
            Command::MakeDirectory(target) => {
                silently(fs.make_directory(&cwd, target))?;
            }
            Command::MakeFile(target) => {
                silently(fs.make_file(&cwd, target))?;
            }
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let Some(image_path) = std::env::args().nth(1) else {
        eprintln!("Usage: dassie <image>");
        return ExitCode::FAILURE;
    };
    let session = FileStorage::open(&image_path)
        .and_then(Volume::mount)
        .and_then(|volume| run(&volume));
    match session {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("dassie: {error}");
            ExitCode::FAILURE
        }
    }
}
