//! # Alignment Oracle
//!
//! The oracle is an external tool that aligns a reference rendering of the score
//! with the performance and reports two text artifacts:
//!
//! - a **correspondence table** (`*_corresp.txt`): one header line, then rows whose
//!   columns 5, 6 and 8 hold the score id, its onset in seconds and its MIDI pitch.
//!   Rows with score id `*` are insertions and carry no score information.
//! - a **match list** (`*_match.txt`): four header lines, then either
//!   `//Missing ...` rows naming an omitted score id in the last column, or rows
//!   giving the performed onset (column 1), spelled pitch (column 3) and the
//!   matched score id (column 9, `*` for none).
//!
//! Score ids are of the form `P1-1-12`; only the part after the last `-` is kept.
//!
//! [`ProcessOracle`] runs the tool in a temporary directory that is removed on
//! every exit path. [`PrecomputedOracle`] reads artifacts produced earlier.

use crate::document::Pitch;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const REFERENCE_STEM: &str = "score";
pub const PERFORMANCE_STEM: &str = "perform";
const CORRESP_SUFFIX: &str = "_corresp.txt";
const MATCH_SUFFIX: &str = "_match.txt";
const MATCH_HEADER_LINES: usize = 4;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Failed to start oracle '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Oracle exited with code {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("Oracle timed out after {millis}ms")]
    TimedOut { millis: u128 },

    #[error("Malformed {file} at line {line}: {message}")]
    Malformed {
        file: String,
        line: usize,
        message: String,
    },

    #[error("Oracle I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One record of the match list
#[derive(Debug, Clone, PartialEq)]
pub enum MatchRecord {
    /// A score note the performer omitted
    Missing { score_id: String },
    /// A performed note, with the score note it was matched to if any
    Performed {
        time: f64,
        pitch: u8,
        score_id: Option<String>,
    },
}

/// Parsed oracle artifacts for one (score, performance) pair
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OracleOutput {
    /// score id → (pitch, onset seconds on the reference rendering)
    pub correspondence: HashMap<String, (u8, f64)>,
    pub matches: Vec<MatchRecord>,
}

impl OracleOutput {
    pub fn from_texts(corresp: &str, matches: &str) -> Result<Self, OracleError> {
        Ok(Self {
            correspondence: parse_corresp(corresp)?,
            matches: parse_match(matches)?,
        })
    }

    pub fn load(corresp: &Path, matches: &Path) -> Result<Self, OracleError> {
        let corresp = std::fs::read_to_string(corresp)?;
        let matches = std::fs::read_to_string(matches)?;
        Self::from_texts(&corresp, &matches)
    }
}

fn score_id(raw: &str) -> String {
    raw.rsplit('-').next().unwrap_or(raw).to_string()
}

fn malformed(file: &str, line: usize, message: impl Into<String>) -> OracleError {
    OracleError::Malformed {
        file: file.to_string(),
        line,
        message: message.into(),
    }
}

pub fn parse_corresp(text: &str) -> Result<HashMap<String, (u8, f64)>, OracleError> {
    const FILE: &str = "correspondence table";
    let mut table = HashMap::new();
    for (idx, line) in text.lines().enumerate().skip(1) {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.is_empty() {
            continue;
        }
        if cols.len() < 9 {
            return Err(malformed(FILE, idx + 1, format!("expected 9+ columns, found {}", cols.len())));
        }
        if cols[5] == "*" {
            continue;
        }
        let time: f64 = cols[6]
            .parse()
            .map_err(|_| malformed(FILE, idx + 1, format!("bad onset '{}'", cols[6])))?;
        let pitch: u8 = cols[8]
            .parse()
            .ok()
            .filter(|p| *p <= 127)
            .ok_or_else(|| malformed(FILE, idx + 1, format!("bad pitch '{}'", cols[8])))?;
        table.insert(score_id(cols[5]), (pitch, time));
    }
    Ok(table)
}

pub fn parse_match(text: &str) -> Result<Vec<MatchRecord>, OracleError> {
    const FILE: &str = "match list";
    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate().skip(MATCH_HEADER_LINES) {
        let cols: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = cols.first() else {
            continue;
        };
        if *first == "//Missing" {
            let last = cols
                .last()
                .filter(|_| cols.len() > 1)
                .ok_or_else(|| malformed(FILE, idx + 1, "missing row without score id"))?;
            records.push(MatchRecord::Missing {
                score_id: score_id(last),
            });
            continue;
        }
        if first.starts_with("//") {
            continue;
        }
        if cols.len() < 10 {
            return Err(malformed(FILE, idx + 1, format!("expected 10+ columns, found {}", cols.len())));
        }
        let time: f64 = cols[1]
            .parse()
            .map_err(|_| malformed(FILE, idx + 1, format!("bad onset '{}'", cols[1])))?;
        let pitch = Pitch::parse(cols[3])
            .ok_or_else(|| malformed(FILE, idx + 1, format!("bad pitch word '{}'", cols[3])))?;
        let score_id = match cols[9] {
            "*" => None,
            id => Some(score_id(id)),
        };
        records.push(MatchRecord::Performed {
            time,
            pitch: pitch.midi,
            score_id,
        });
    }
    Ok(records)
}

/// Produces correspondence and match records for a reference rendering of the
/// score and a performance.
pub trait AlignmentOracle: Send + Sync {
    fn align(&self, reference: &Path, performance: &Path) -> Result<OracleOutput, OracleError>;
}

/// Runs the external alignment tool as a child process
#[derive(Debug, Clone)]
pub struct ProcessOracle {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessOracle {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, OracleError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                // The child may exit between the poll and the kill
                let _ = child.kill();
                let _ = child.wait();
                return Err(OracleError::TimedOut {
                    millis: self.timeout.as_millis(),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl AlignmentOracle for ProcessOracle {
    /// Invoked as `<program> <args...> score perform` inside a fresh directory
    /// holding `score.mid` and `perform.mid`.
    fn align(&self, reference: &Path, performance: &Path) -> Result<OracleOutput, OracleError> {
        let workdir = tempfile::TempDir::new()?;
        let dir = workdir.path();
        std::fs::copy(reference, dir.join(format!("{}.mid", REFERENCE_STEM)))?;
        std::fs::copy(performance, dir.join(format!("{}.mid", PERFORMANCE_STEM)))?;
        let stderr_path = dir.join("oracle.stderr");

        tracing::debug!(program = %self.program, dir = %dir.display(), "Running alignment oracle");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(REFERENCE_STEM)
            .arg(PERFORMANCE_STEM)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(File::create(&stderr_path)?))
            .spawn()
            .map_err(|source| OracleError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let status = self.wait(&mut child)?;
        if !status.success() {
            let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();
            return Err(OracleError::Failed {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        OracleOutput::load(
            &dir.join(format!("{}{}", PERFORMANCE_STEM, CORRESP_SUFFIX)),
            &dir.join(format!("{}{}", PERFORMANCE_STEM, MATCH_SUFFIX)),
        )
    }
}

/// Serves artifacts that were produced by an earlier oracle run
#[derive(Debug, Clone)]
pub struct PrecomputedOracle {
    pub corresp: PathBuf,
    pub matches: PathBuf,
}

impl PrecomputedOracle {
    pub fn new(corresp: impl Into<PathBuf>, matches: impl Into<PathBuf>) -> Self {
        Self {
            corresp: corresp.into(),
            matches: matches.into(),
        }
    }

    /// Artifacts named after a performance file: `x.mid` → `x_corresp.txt`, `x_match.txt`.
    pub fn beside(performance: &Path) -> Self {
        let stem = performance.with_extension("");
        let stem = stem.to_string_lossy();
        Self::new(
            format!("{}{}", stem, CORRESP_SUFFIX),
            format!("{}{}", stem, MATCH_SUFFIX),
        )
    }
}

impl AlignmentOracle for PrecomputedOracle {
    fn align(&self, _reference: &Path, _performance: &Path) -> Result<OracleOutput, OracleError> {
        OracleOutput::load(&self.corresp, &self.matches)
    }
}
