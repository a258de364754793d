use crate::command::{Command, OpenMode, ParseError, MENU};

use log::debug;
use poolfs::{EntryKind, FileSystem, FsError, NodeId};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("{name} is not open in {needed} mode")]
    NotOpen { name: String, needed: &'static str },
    #[error("{0} is not open")]
    AlreadyClosed(String),
}

/// What the caller should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// A command interpreter bound to one filesystem.
///
/// Holds the per-connection state the filesystem does not know about: the
/// current directory and which files are open in which mode.
pub struct Session {
    fs: FileSystem,
    cwd: NodeId,
    open_files: HashMap<NodeId, OpenMode>,
}

impl Session {
    pub fn new(fs: FileSystem) -> Self {
        let cwd = fs.root();
        Self {
            fs,
            cwd,
            open_files: HashMap::new(),
        }
    }

    pub fn fs(&self) -> &FileSystem {
        &self.fs
    }

    pub fn prompt(&self) -> String {
        format!("{}> ", self.fs.path_of(self.cwd))
    }

    /// Runs one line and renders either its output or its error as text.
    pub fn handle_line(&mut self, line: &str) -> (String, Flow) {
        match line.parse::<Command>() {
            Ok(command) => match self.execute(command) {
                Ok(reply) => reply,
                Err(err) => (format!("{}\n", err), Flow::Continue),
            },
            Err(ParseError::Empty) => (String::new(), Flow::Continue),
            Err(err) => (format!("{}\nType help for the list of commands.\n", err), Flow::Continue),
        }
    }

    pub fn execute(&mut self, command: Command) -> Result<(String, Flow), SessionError> {
        debug!("executing {:?}", command);
        let cwd = self.cwd;
        let text = match command {
            Command::Help => menu(),
            Command::Exit => return Ok(("Persisting data...\n".to_string(), Flow::Exit)),
            Command::Touch(name) => {
                self.fs.create_file(cwd, &name)?;
                "File has been created successfully!\n".to_string()
            }
            Command::Mkdir(name) => {
                self.fs.create_dir(cwd, &name)?;
                "Directory has been created successfully!\n".to_string()
            }
            Command::Remove(name) => {
                self.fs.remove(cwd, &name)?;
                self.forget_removed();
                "Deleted successfully!\n".to_string()
            }
            Command::Move { name, destination } => {
                self.fs.move_entry(cwd, &name, &destination)?;
                self.forget_removed();
                "Moved successfully!\n".to_string()
            }
            Command::ChangeDir(path) => {
                self.cwd = self.fs.change_dir(cwd, &path)?;
                String::new()
            }
            Command::List(path) => self.listing(path.as_deref())?,
            Command::Pwd => format!("{}\n", self.fs.path_of(cwd)),
            Command::Open { name, mode } => {
                let id = self.file_id(&name)?;
                self.open_files.insert(id, mode);
                format!("File opened successfully in {} mode!\n", mode)
            }
            Command::Close(name) => {
                let id = self.file_id(&name)?;
                self.open_files
                    .remove(&id)
                    .ok_or(SessionError::AlreadyClosed(name))?;
                "File closed successfully!\n".to_string()
            }
            Command::Write { name, content } => {
                self.require(&name, &[OpenMode::Write])?;
                self.fs.write_file(cwd, &name, content.as_bytes(), 0)?;
                "File written successfully!\n".to_string()
            }
            Command::Append { name, content } => {
                self.require(&name, &[OpenMode::Append])?;
                self.fs.append_file(cwd, &name, content.as_bytes())?;
                "File appended successfully!\n".to_string()
            }
            Command::Truncate { name, size } => {
                self.require(&name, &[OpenMode::Write])?;
                self.fs.truncate_file(cwd, &name, size)?;
                "File truncated successfully!\n".to_string()
            }
            Command::MoveWithin {
                name,
                start,
                length,
                destination,
            } => {
                self.require(&name, &[OpenMode::Write])?;
                self.fs
                    .relocate_in_file(cwd, &name, start, length, destination)?;
                "File content moved successfully!\n".to_string()
            }
            Command::Cat(name) => {
                self.require(&name, &[OpenMode::Read, OpenMode::Write])?;
                let bytes = self.fs.read_to_end(cwd, &name)?;
                format!("{}\n", String::from_utf8_lossy(bytes))
            }
            Command::ReadFrom {
                name,
                start,
                length,
            } => {
                self.require(&name, &[OpenMode::Read, OpenMode::Write])?;
                let bytes = self.fs.read_file(cwd, &name, start, length)?;
                format!("{}\n", String::from_utf8_lossy(bytes))
            }
            Command::MemoryMap => self.block_map(),
            Command::FreeSpace => {
                let total = self.fs.pool().geometry().total_size();
                format!("{} of {} bytes free\n", self.fs.free_space(), total)
            }
        };
        Ok((text, Flow::Continue))
    }

    fn file_id(&self, name: &str) -> Result<NodeId, SessionError> {
        let id = self
            .fs
            .tree()
            .get_child(self.cwd, name)
            .ok_or_else(|| FsError::NoSuchChild(name.to_string()))?;
        self.fs.file(self.cwd, name)?;
        Ok(id)
    }

    /// Checks the advisory mode of `name`. Missing files and directories are
    /// reported by the filesystem call that follows, so they pass here.
    fn require(&self, name: &str, modes: &[OpenMode]) -> Result<(), SessionError> {
        let id = match self.file_id(name) {
            Ok(id) => id,
            Err(_) => return Ok(()),
        };
        match self.open_files.get(&id) {
            Some(mode) if modes.contains(mode) => Ok(()),
            _ => Err(SessionError::NotOpen {
                name: name.to_string(),
                needed: match modes[0] {
                    OpenMode::Read => "read",
                    OpenMode::Write => "write",
                    OpenMode::Append => "append",
                },
            }),
        }
    }

    /// Drops open-state for nodes that no longer exist, so a reused node slot
    /// does not inherit it.
    fn forget_removed(&mut self) {
        let tree = self.fs.tree();
        self.open_files
            .retain(|&id, _| tree.node(id).map_or(false, |node| node.as_file().is_some()));
    }

    fn listing(&self, path: Option<&str>) -> Result<String, SessionError> {
        let lines = self.fs.list(self.cwd, path)?.into_iter().map(|entry| {
            let suffix = match entry.kind {
                EntryKind::Directory if !entry.name.ends_with('/') => "/",
                _ => "",
            };
            format!("{}-- {}{}\n", "\t".repeat(entry.depth), entry.name, suffix)
        });
        Ok(lines.collect())
    }

    fn block_map(&self) -> String {
        let pool = self.fs.pool();
        let mut out: String = self
            .fs
            .block_map()
            .into_iter()
            .map(|usage| match usage.address {
                Some(addr) => format!(
                    "block {:>3}  {:#06x}  reserved {:>4}  used {:>4}\n",
                    usage.block, addr, usage.reserved, usage.used
                ),
                None => format!("block {:>3}  free\n", usage.block),
            })
            .collect();
        out.push_str(&format!(
            "{} of {} bytes used, {} free blocks of {} bytes\n",
            pool.space_used(),
            pool.geometry().total_size(),
            pool.free_blocks().count(),
            pool.geometry().block_size()
        ));
        out
    }
}

fn menu() -> String {
    let mut out = String::from("---------- Available Commands ----------\n");
    for (synopsis, description) in MENU {
        out.push_str(&format!("-- {}  :  {}\n", synopsis, description));
    }
    out.push_str("----------------------------------------\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(session: &mut Session, line: &str) -> String {
        session.handle_line(line).0
    }

    #[test]
    fn write_needs_the_file_open_for_writing() {
        let mut session = Session::new(FileSystem::default());
        run(&mut session, "touch notes");
        assert_eq!(
            run(&mut session, "wf notes hi"),
            "notes is not open in write mode\n"
        );
        run(&mut session, "open notes w");
        assert_eq!(run(&mut session, "wf notes hi"), "File written successfully!\n");
        assert_eq!(run(&mut session, "cat notes"), "hi\n");
    }

    #[test]
    fn append_needs_append_mode() {
        let mut session = Session::new(FileSystem::default());
        run(&mut session, "touch log");
        run(&mut session, "open log w");
        assert!(run(&mut session, "af log x").contains("append mode"));
        run(&mut session, "open log a");
        run(&mut session, "af log one");
        run(&mut session, "af log two");
        run(&mut session, "open log r");
        assert_eq!(run(&mut session, "cat log"), "onetwo\n");
        assert_eq!(run(&mut session, "rf log 3 3"), "two\n");
    }

    #[test]
    fn close_clears_the_mode() {
        let mut session = Session::new(FileSystem::default());
        run(&mut session, "touch f");
        run(&mut session, "open f w");
        assert_eq!(run(&mut session, "close f"), "File closed successfully!\n");
        assert_eq!(run(&mut session, "close f"), "f is not open\n");
        assert!(run(&mut session, "wf f x").contains("not open"));
    }

    #[test]
    fn navigation_and_listing() {
        let mut session = Session::new(FileSystem::default());
        run(&mut session, "mkdir docs");
        run(&mut session, "cd docs");
        assert_eq!(session.prompt(), "/docs> ");
        run(&mut session, "touch a");
        run(&mut session, "cd ..");
        assert_eq!(run(&mut session, "pwd"), "/\n");
        assert_eq!(run(&mut session, "ls"), "-- /\n\t-- docs/\n");
        assert_eq!(run(&mut session, "ls docs"), "-- docs/\n\t-- a\n");
        assert_eq!(
            run(&mut session, "cd nowhere"),
            "no such path: nowhere\n"
        );
    }

    #[test]
    fn removed_files_lose_their_open_state() {
        let mut session = Session::new(FileSystem::default());
        run(&mut session, "touch old");
        run(&mut session, "open old w");
        run(&mut session, "rm old");
        run(&mut session, "touch new");
        assert!(run(&mut session, "wf new x").contains("not open"));
    }

    #[test]
    fn mmap_and_df_report_usage() {
        let mut session = Session::new(FileSystem::default());
        run(&mut session, "touch f");
        run(&mut session, "open f w");
        run(&mut session, "wf f hello");
        let map = run(&mut session, "mmap");
        assert!(map.starts_with("block   0  0x0000  reserved    5  used    5\nblock   1  free\n"));
        assert!(map.ends_with("5 of 1024 bytes used, 15 free blocks of 64 bytes\n"));
        assert_eq!(run(&mut session, "df"), "1019 of 1024 bytes free\n");
    }

    #[test]
    fn errors_are_rendered_not_fatal() {
        let mut session = Session::new(FileSystem::default());
        assert!(run(&mut session, "bogus").starts_with("invalid command: bogus"));
        assert_eq!(run(&mut session, ""), "");
        assert_eq!(run(&mut session, "rm ghost"), "no such file or directory: ghost\n");
        assert_eq!(session.handle_line("exit").1, Flow::Exit);
    }
}
