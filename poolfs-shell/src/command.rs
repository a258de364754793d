use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Advisory access mode of an open file. The filesystem itself never checks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

impl FromStr for OpenMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(OpenMode::Read),
            "w" => Ok(OpenMode::Write),
            "a" => Ok(OpenMode::Append),
            other => Err(ParseError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self {
            OpenMode::Read => "r",
            OpenMode::Write => "w",
            OpenMode::Append => "a",
        };
        f.write_str(mode)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("invalid command: {0}")]
    Unknown(String),
    #[error("{command} expects <{argument}>")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("not a number: {0}")]
    InvalidNumber(String),
    #[error("invalid mode {0}, expected r, w or a")]
    InvalidMode(String),
}

/// One parsed shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Exit,
    Touch(String),
    Mkdir(String),
    Remove(String),
    Move { name: String, destination: String },
    ChangeDir(String),
    List(Option<String>),
    Pwd,
    Open { name: String, mode: OpenMode },
    Close(String),
    Write { name: String, content: String },
    Append { name: String, content: String },
    Truncate { name: String, size: usize },
    MoveWithin {
        name: String,
        start: usize,
        length: usize,
        destination: usize,
    },
    Cat(String),
    ReadFrom {
        name: String,
        start: usize,
        length: usize,
    },
    MemoryMap,
    FreeSpace,
}

/// Command synopsis and description, in the order `help` prints them.
pub const MENU: &[(&str, &str)] = &[
    ("help", "Display this menu"),
    ("touch <filename>", "Create a new file"),
    ("rm <filename | dirname>", "Remove a file or directory"),
    ("mkdir <dirname>", "Create a new directory"),
    ("cd <dirname | ..>", "Change directory"),
    ("pwd", "Print the current directory"),
    ("mv <name> <new name | dirname | dirname/new name>", "Move a file or directory"),
    ("open <filename> <r | w | a>", "Open a file"),
    ("close <filename>", "Close a file"),
    ("wf <filename> <content>", "Write to a file"),
    ("af <filename> <content>", "Append to a file"),
    ("tf <filename> <size>", "Truncate a file"),
    ("mwf <filename> <start> <length> <destination>", "Move content within a file"),
    ("cat <filename>", "Read a whole file"),
    ("rf <filename> <start> <length>", "Read part of a file"),
    ("ls [path]", "List files and directories"),
    ("mmap", "Display the block map"),
    ("df", "Display free space"),
    ("exit", "Save and exit"),
];

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (word, rest) = next_word(line);
        let mut args = Args { command: word, rest };
        let command = match word {
            "" => return Err(ParseError::Empty),
            "help" => Command::Help,
            "exit" => Command::Exit,
            "touch" => Command::Touch(args.word("filename")?),
            "mkdir" => Command::Mkdir(args.word("dirname")?),
            "rm" => Command::Remove(args.word("name")?),
            "mv" => Command::Move {
                name: args.word("name")?,
                destination: args.word("destination")?,
            },
            "cd" => Command::ChangeDir(args.word("path")?),
            "ls" => Command::List(args.optional_word()),
            "pwd" => Command::Pwd,
            "open" => Command::Open {
                name: args.word("filename")?,
                mode: args.word("mode")?.parse()?,
            },
            "close" => Command::Close(args.word("filename")?),
            "wf" => Command::Write {
                name: args.word("filename")?,
                content: args.remainder(),
            },
            "af" => Command::Append {
                name: args.word("filename")?,
                content: args.remainder(),
            },
            "tf" => Command::Truncate {
                name: args.word("filename")?,
                size: args.number("size")?,
            },
            "mwf" => Command::MoveWithin {
                name: args.word("filename")?,
                start: args.number("start")?,
                length: args.number("length")?,
                destination: args.number("destination")?,
            },
            "cat" => Command::Cat(args.word("filename")?),
            "rf" => Command::ReadFrom {
                name: args.word("filename")?,
                start: args.number("start")?,
                length: args.number("length")?,
            },
            "mmap" => Command::MemoryMap,
            "df" => Command::FreeSpace,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

struct Args<'a> {
    command: &'a str,
    rest: &'a str,
}

impl<'a> Args<'a> {
    fn optional_word(&mut self) -> Option<String> {
        let (word, rest) = next_word(self.rest);
        self.rest = rest;
        if word.is_empty() {
            None
        } else {
            Some(word.to_string())
        }
    }

    fn word(&mut self, argument: &'static str) -> Result<String, ParseError> {
        let command = static_name(self.command);
        self.optional_word()
            .ok_or(ParseError::MissingArgument { command, argument })
    }

    fn number(&mut self, argument: &'static str) -> Result<usize, ParseError> {
        let word = self.word(argument)?;
        word.parse().map_err(|_| ParseError::InvalidNumber(word))
    }

    /// Everything left on the line, inner spacing preserved.
    fn remainder(&mut self) -> String {
        let rest = self.rest.trim_start().to_string();
        self.rest = "";
        rest
    }
}

fn next_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(end) => (&s[..end], &s[end..]),
        None => (s, ""),
    }
}

/// Maps a command word onto the static name used in error messages.
fn static_name(command: &str) -> &'static str {
    MENU.iter()
        .map(|(synopsis, _)| *synopsis)
        .find(|synopsis| next_word(synopsis).0 == command)
        .map(|synopsis| next_word(synopsis).0)
        .unwrap_or("command")
}
