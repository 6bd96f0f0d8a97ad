use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::error;

use crate::error::{Error, Result};
use crate::raft::log::LogEntry;
use crate::raft::NodeId;

const LOG_FILE: &str = "log";
const METADATA_FILE: &str = "metadata";
const DUMP_FILE: &str = "dump";

/// The durable metadata triple, rewritten on every change that must survive
/// a crash.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    pub commit_length: u64,
    pub current_term: u64,
    pub voted_for: Option<NodeId>,
}

impl std::fmt::Display for Metadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Commit length {} Term {} Node Voted For ID {}",
            self.commit_length,
            self.current_term,
            match self.voted_for {
                Some(id) => id.to_string(),
                None => "None".to_string(),
            }
        )
    }
}

impl Metadata {
    fn parse(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["Commit", "length", commit, "Term", term, "Node", "Voted", "For", "ID", voted] => {
                Ok(Self {
                    commit_length: commit.parse()?,
                    current_term: term.parse()?,
                    voted_for: match *voted {
                        "None" => None,
                        id => Some(id.parse()?),
                    },
                })
            }
            _ => Err(Error::Parse(format!("malformed metadata line {:?}", line))),
        }
    }
}

/// The per-node persistent store: an append-only `log` file, an atomically
/// rewritten `metadata` file, and a free-form `dump` audit trail.
///
/// Log lines are `<command_text> <term>`; the term is the final token so
/// commands may contain spaces. The dump is never read for recovery.
pub struct DiskStorage {
    dir: PathBuf,
    log_file: File,
    dump_file: File,
}

impl DiskStorage {
    /// Fresh start: wipes any previous state in `dir` and begins empty.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        for name in [LOG_FILE, METADATA_FILE, DUMP_FILE] {
            let path = dir.join(name);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        let mut storage = Self {
            dir: dir.to_path_buf(),
            log_file: open_append(&dir.join(LOG_FILE))?,
            dump_file: open_append(&dir.join(DUMP_FILE))?,
        };
        storage.write_metadata(&Metadata::default())?;
        Ok(storage)
    }

    /// Restart: recovers the metadata triple and the full log from disk.
    /// Missing files (a crash before the first durable change) read as empty.
    pub fn open(dir: &Path) -> Result<(Self, Metadata, Vec<LogEntry>)> {
        fs::create_dir_all(dir)?;

        let metadata_path = dir.join(METADATA_FILE);
        let metadata = if metadata_path.exists() {
            Metadata::parse(&fs::read_to_string(&metadata_path)?)?
        } else {
            Metadata::default()
        };

        let log_path = dir.join(LOG_FILE);
        let mut entries = Vec::new();
        if log_path.exists() {
            for line in BufReader::new(File::open(&log_path)?).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                entries.push(parse_log_line(&line)?);
            }
        }

        let storage = Self {
            dir: dir.to_path_buf(),
            log_file: open_append(&log_path)?,
            dump_file: open_append(&dir.join(DUMP_FILE))?,
        };
        Ok((storage, metadata, entries))
    }

    /// Appends one entry to the log file, write-through.
    pub fn append_entry(&mut self, entry: &LogEntry) -> Result<()> {
        self.append_entries(std::slice::from_ref(entry))
    }

    /// Appends a batch of entries to the log file, syncing once at the end.
    pub fn append_entries(&mut self, entries: &[LogEntry]) -> Result<()> {
        for entry in entries {
            writeln!(self.log_file, "{} {}", entry.command, entry.term)?;
        }
        self.log_file.flush()?;
        self.log_file.sync_data()?;
        Ok(())
    }

    /// Rewrites the log file to exactly `entries`, atomically. Used when a
    /// follower truncates to the common prefix after a conflict.
    pub fn rewrite_log(&mut self, entries: &[LogEntry]) -> Result<()> {
        let path = self.dir.join(LOG_FILE);
        let tmp = self.dir.join(format!("{}.tmp", LOG_FILE));
        {
            let mut file = File::create(&tmp)?;
            for entry in entries {
                writeln!(file, "{} {}", entry.command, entry.term)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        self.log_file = open_append(&path)?;
        Ok(())
    }

    /// Atomically rewrites the metadata file.
    pub fn write_metadata(&mut self, metadata: &Metadata) -> Result<()> {
        let path = self.dir.join(METADATA_FILE);
        let tmp = self.dir.join(format!("{}.tmp", METADATA_FILE));
        {
            let mut file = File::create(&tmp)?;
            write!(file, "{}", metadata)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Appends one line to the audit dump. Best-effort: the dump is not used
    /// for recovery, so a failed write is reported but fails nothing.
    pub fn dump(&mut self, line: &str) {
        if let Err(err) = writeln!(self.dump_file, "{}", line).and_then(|_| self.dump_file.flush())
        {
            error!("dump write failed: {}", err);
        }
    }
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn parse_log_line(line: &str) -> Result<LogEntry> {
    let (command, term) = line
        .trim_end()
        .rsplit_once(' ')
        .ok_or_else(|| Error::Parse(format!("malformed log line {:?}", line)))?;
    Ok(LogEntry { term: term.parse()?, command: command.to_string() })
}
