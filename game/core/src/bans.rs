use bedrock::logging::{self, Logger};
use chrono::{DateTime, TimeZone, Utc};
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

/// One banned address. The name and reason are operator bookkeeping; only
/// the address takes part in the connect check.
#[derive(Clone, Debug, PartialEq)]
pub struct BanEntry {
    pub address: String,
    pub name: String,
    pub reason: String,
    pub time: DateTime<Utc>,
}

/// The ban file: one entry per line, `address unix-time name reason...`,
/// read at startup and rewritten on every change.
pub struct BanList {
    path: Option<PathBuf>,
    entries: RefCell<Vec<BanEntry>>,
    log: Logger,
}

impl BanList {
    pub fn load<'a, L: Into<Option<&'a Logger>>>(path: PathBuf, log: L) -> BanList {
        let log = logging::child_or_discard(log);
        let mut entries = Vec::new();

        match fs::read_to_string(&path) {
            Ok(contents) => {
                for line in contents.lines() {
                    match parse_line(line) {
                        Some(entry) => entries.push(entry),
                        None => {
                            if !line.trim().is_empty() {
                                logging::warn!(log, "skipping malformed ban line"; "line" => line);
                            }
                        }
                    }
                }
                logging::info!(log, "ban list loaded"; "count" => entries.len());
            }
            Err(_) => {
                // First boot; the file appears on the first ban.
            }
        }

        BanList {
            path: Some(path),
            entries: RefCell::new(entries),
            log,
        }
    }

    /// A list that never touches disk, for tests.
    pub fn in_memory() -> BanList {
        BanList {
            path: None,
            entries: RefCell::new(Vec::new()),
            log: logging::child_or_discard(None),
        }
    }

    pub fn is_banned(&self, address: &str) -> bool {
        self.entries
            .borrow()
            .iter()
            .any(|entry| entry.address == address)
    }

    pub fn add(&self, address: &str, name: &str, reason: &str) {
        if self.is_banned(address) {
            return;
        }
        self.entries.borrow_mut().push(BanEntry {
            address: address.to_string(),
            name: name.to_string(),
            reason: reason.to_string(),
            time: Utc::now(),
        });
        self.save();
    }

    pub fn remove(&self, address: &str) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|entry| entry.address != address);
        let removed = entries.len() != before;
        drop(entries);

        if removed {
            self.save();
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.entries.borrow().len()
    }

    fn save(&self) {
        let path = match &self.path {
            Some(path) => path,
            None => return,
        };

        let mut out = String::new();
        for entry in self.entries.borrow().iter() {
            out.push_str(&format!(
                "{} {} {} {}\n",
                entry.address,
                entry.time.timestamp(),
                entry.name,
                entry.reason
            ));
        }

        if let Err(err) = fs::write(path, out) {
            logging::warn!(self.log, "failed writing ban list";
                           "path" => %path.display(), "error" => %err);
        }
    }
}

fn parse_line(line: &str) -> Option<BanEntry> {
    let mut parts = line.trim().splitn(4, ' ');
    let address = parts.next()?.to_string();
    if address.is_empty() {
        return None;
    }
    let time = parts
        .next()
        .and_then(|ts| ts.parse::<i64>().ok())
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or_else(Utc::now);
    let name = parts.next().unwrap_or("").to_string();
    let reason = parts.next().unwrap_or("").to_string();

    Some(BanEntry {
        address,
        name,
        reason,
        time,
    })
}
