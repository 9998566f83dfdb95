use crate::dir::{DirEntry, EntryKind};
use crate::disk::Disk;
use crate::error::Result;
use crate::fs::{FatFileSystem, FileSystem};
use std::io::{self, BufRead, Write};

const PROMPT: &str = "filesystem> ";

const HELP: &str = "\
Available commands:
format, create <file>, cat <file>, ls,
cp <source> <dest>, mv <source> <dest>, rm <file>,
append <source> <dest>, mkdir <dir>, cd <dir>, pwd,
chmod <rights> <file>, help, quit";

enum Reply {
    Done,
    Text(String),
    Content(Vec<u8>),
    Listing(Vec<DirEntry>),
    Usage(&'static str),
}

/// Line-oriented front end for a mounted filesystem.
pub struct Shell<D: Disk> {
    fs: FatFileSystem<D>,
}

impl<D: Disk> Shell<D> {
    pub fn new(fs: FatFileSystem<D>) -> Self {
        Shell { fs }
    }

    pub fn into_inner(self) -> FatFileSystem<D> {
        self.fs
    }

    /// Executes commands from `input` until it ends or `quit` is read.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> io::Result<()> {
        let mut lines = input.lines();
        loop {
            write!(output, "{}", PROMPT)?;
            output.flush()?;

            let line = match lines.next() {
                Some(line) => line?,
                None => break,
            };
            let words: Vec<&str> = line.split_whitespace().collect();
            let (command, args) = match words.split_first() {
                Some((command, args)) => (*command, args),
                None => continue,
            };

            let reply = match (command, args) {
                ("quit", []) | ("exit", []) => break,
                ("create", [path]) => {
                    let content = read_content(&mut lines)?;
                    self.fs.create(path, content.as_bytes()).map(|_| Reply::Done)
                }
                ("create", _) => {
                    read_content(&mut lines)?;
                    Ok(Reply::Usage("create <file>"))
                }
                _ => self.dispatch(command, args),
            };

            match reply {
                Ok(reply) => write_reply(&mut output, reply)?,
                Err(e) => writeln!(output, "error: {}", e)?,
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, command: &str, args: &[&str]) -> Result<Reply> {
        let reply = match (command, args) {
            ("help", []) => Reply::Text(HELP.to_string()),
            ("format", []) => {
                self.fs.format()?;
                Reply::Done
            }
            ("cat", [path]) => Reply::Content(self.fs.read(path)?),
            ("ls", []) => Reply::Listing(self.fs.ls()),
            ("cp", [source, dest]) => {
                self.fs.copy(source, dest)?;
                Reply::Done
            }
            ("mv", [source, dest]) => {
                self.fs.rename(source, dest)?;
                Reply::Done
            }
            ("rm", [path]) => {
                self.fs.remove(path)?;
                Reply::Done
            }
            ("append", [source, dest]) => {
                self.fs.append(source, dest)?;
                Reply::Done
            }
            ("mkdir", [path]) => {
                self.fs.mkdir(path)?;
                Reply::Done
            }
            ("cd", [path]) => {
                self.fs.cd(path)?;
                Reply::Done
            }
            ("pwd", []) => Reply::Text(self.fs.pwd()?),
            ("chmod", [rights, path]) => {
                self.fs.chmod(rights, path)?;
                Reply::Done
            }
            ("cat", _) | ("rm", _) => Reply::Usage("<command> <file>"),
            ("cp", _) | ("mv", _) | ("append", _) => Reply::Usage("<command> <source> <dest>"),
            ("mkdir", _) | ("cd", _) => Reply::Usage("<command> <dir>"),
            ("chmod", _) => Reply::Usage("chmod <rights> <file>"),
            _ => Reply::Text(format!(
                "unknown command: {}\ntype 'help' for a list of commands",
                command
            )),
        };
        Ok(reply)
    }
}

/// Collects the lines following `create` up to the first blank one.
fn read_content<I>(lines: &mut I) -> io::Result<String>
where
    I: Iterator<Item = io::Result<String>>,
{
    let mut content = String::new();
    for line in lines {
        let line = line?;
        if line.is_empty() {
            break;
        }
        content.push_str(&line);
        content.push('\n');
    }
    Ok(content)
}

fn write_reply<W: Write>(output: &mut W, reply: Reply) -> io::Result<()> {
    match reply {
        Reply::Done => Ok(()),
        Reply::Text(text) => writeln!(output, "{}", text),
        Reply::Usage(text) => writeln!(output, "usage: {}", text),
        Reply::Content(data) => {
            output.write_all(&data)?;
            if !data.ends_with(b"\n") {
                writeln!(output)?;
            }
            Ok(())
        }
        Reply::Listing(entries) => {
            writeln!(output, "{:<24}{:<6}{:<14}size", "name", "type", "accessrights")?;
            for entry in entries {
                let (kind, size) = match entry.kind {
                    EntryKind::File => ("file", entry.size.to_string()),
                    EntryKind::Directory => ("dir", "-".to_string()),
                };
                writeln!(
                    output,
                    "{:<24}{:<6}{:<14}{}",
                    entry.name,
                    kind,
                    entry.rights.to_string(),
                    size
                )?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::BlockDisk;
    use tempfile::NamedTempFile;

    fn session(script: &str) -> String {
        let image = NamedTempFile::new().unwrap();
        let disk = BlockDisk::open(image.path(), 64).unwrap();
        let mut fs = FatFileSystem::mount(disk).unwrap();
        fs.format().unwrap();

        let mut shell = Shell::new(fs);
        let mut output = Vec::new();
        shell.run(script.as_bytes(), &mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn create_reads_until_blank_line() {
        let out = session("create notes\nfirst\nsecond\n\ncat notes\nquit\n");
        assert!(out.contains("first\nsecond\n"));
        assert!(!out.contains("error"));
    }

    #[test]
    fn ls_prints_rights_and_sizes() {
        let out = session("create a\nxyz\n\nmkdir d\nls\n");
        assert!(out.contains("accessrights"));
        let file_row = out.lines().find(|l| l.contains("a ")).unwrap();
        assert!(file_row.contains("file"));
        assert!(file_row.contains("rw-"));
        assert!(file_row.trim_end().ends_with('4'));
        let dir_row = out.lines().find(|l| l.contains("dir ")).unwrap();
        assert!(dir_row.contains("rwx"));
        assert!(dir_row.trim_end().ends_with('-'));
    }

    #[test]
    fn errors_are_reported_and_the_session_continues() {
        let out = session("cat missing\ncd nowhere\nchmod x nothing\npwd\n");
        assert_eq!(out.matches("error:").count(), 3);
        assert!(out.contains("'missing' not found"));
        assert!(out.contains("invalid access rights 'x'"));
        assert!(out.ends_with("/\nfilesystem> "));
    }

    #[test]
    fn malformed_create_skips_its_content() {
        let out = session("create a b\nmkdir x\n\nls\n");
        assert!(out.contains("usage: create <file>"));
        assert!(!out.lines().any(|l| l.starts_with("x ")));
        assert!(!out.contains("error"));
    }

    #[test]
    fn unknown_commands_and_bad_arity_are_explained() {
        let out = session("frobnicate\ncp onlyone\n");
        assert!(out.contains("unknown command: frobnicate"));
        assert!(out.contains("usage: <command> <source> <dest>"));
    }
}
