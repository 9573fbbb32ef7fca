//! JSONL event import.
//!
//! Reads Nostr events from JSONL files (one JSON event per line), optionally
//! gzip-compressed, verifies each event's id and signature, and hands the
//! parsed events to a callback.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use pensieve_core::{Event, NOSTR_GENESIS_TIMESTAMP};
use serde::Serialize;

use crate::{Error, Result};

/// Extensions accepted when the input is a directory (before any `.gz`).
const JSONL_EXTENSIONS: &[&str] = &["jsonl", "json", "ndjson"];

/// Configuration for the JSONL source.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    /// Input file or directory path.
    pub input: PathBuf,

    /// Skip signature/ID verification (faster but unsafe).
    pub skip_validation: bool,

    /// Continue processing on errors (log and skip invalid events).
    pub continue_on_error: bool,

    /// Limit number of files to process.
    pub limit: Option<usize>,

    /// Progress reporting interval (events).
    pub progress_interval: usize,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            skip_validation: false,
            continue_on_error: true,
            limit: None,
            progress_interval: 100_000,
        }
    }
}

/// Import statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportStats {
    pub files_processed: usize,
    pub total_events: usize,
    pub valid_events: usize,
    pub invalid_events: usize,
    pub json_errors: usize,
    pub validation_errors: usize,
    /// Events dated before the Nostr genesis date.
    pub pre_genesis: usize,
}

/// JSONL file event source.
pub struct JsonlSource {
    config: JsonlConfig,
}

impl JsonlSource {
    pub fn new(config: JsonlConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JsonlConfig {
        &self.config
    }

    /// Read every input file, calling `handler` for each valid event.
    ///
    /// The handler returns `Ok(false)` to stop early.
    pub fn process<F>(&self, mut handler: F) -> Result<ImportStats>
    where
        F: FnMut(Event) -> Result<bool>,
    {
        let mut stats = ImportStats::default();

        let files = self.collect_files()?;
        tracing::info!("Found {} JSONL files to process", files.len());

        for (file_idx, file_path) in files.iter().enumerate() {
            tracing::info!(
                "[{}/{}] Processing: {}",
                file_idx + 1,
                files.len(),
                file_path.display()
            );

            match self.process_file(file_path, &mut handler, &mut stats) {
                Ok(true) => stats.files_processed += 1,
                Ok(false) => {
                    stats.files_processed += 1;
                    break;
                }
                Err(e) => {
                    tracing::warn!("Error processing {}: {}", file_path.display(), e);
                    if !self.config.continue_on_error {
                        return Err(e);
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Collect files to process based on input path.
    fn collect_files(&self) -> Result<Vec<PathBuf>> {
        let input = &self.config.input;

        let mut files = if input.is_file() {
            vec![input.clone()]
        } else if input.is_dir() {
            let mut entries: Vec<_> = fs::read_dir(input)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|path| path.is_file() && is_jsonl(path))
                .collect();

            // Sort for deterministic processing order
            entries.sort();
            entries
        } else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Input path does not exist: {}", input.display()),
            )));
        };

        if let Some(limit) = self.config.limit {
            files.truncate(limit);
        }

        Ok(files)
    }

    /// Process one file. Returns `Ok(false)` if the handler asked to stop.
    fn process_file<F>(
        &self,
        file_path: &Path,
        handler: &mut F,
        stats: &mut ImportStats,
    ) -> Result<bool>
    where
        F: FnMut(Event) -> Result<bool>,
    {
        let file = File::open(file_path)?;
        let reader: Box<dyn BufRead> = if is_gzip(file_path) {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = match line_result {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!("Line {}: I/O error: {}", line_num + 1, e);
                    stats.invalid_events += 1;
                    if self.config.continue_on_error {
                        continue;
                    }
                    return Err(Error::Io(e));
                }
            };

            if line.trim().is_empty() {
                continue;
            }
            stats.total_events += 1;

            let parsed = if self.config.skip_validation {
                Event::from_json_unverified(&line)
            } else {
                Event::from_json_verified(&line)
            };

            let event = match parsed {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("Line {}: {}", line_num + 1, e);
                    stats.invalid_events += 1;
                    match e {
                        pensieve_core::Error::Json(_) => stats.json_errors += 1,
                        _ => stats.validation_errors += 1,
                    }
                    if self.config.continue_on_error {
                        continue;
                    }
                    return Err(e.into());
                }
            };

            if event.created_at < NOSTR_GENESIS_TIMESTAMP {
                tracing::debug!(id = %event.id, created_at = event.created_at, "skipping pre-genesis event");
                stats.invalid_events += 1;
                stats.pre_genesis += 1;
                continue;
            }

            stats.valid_events += 1;

            match handler(event) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!("Handler signaled stop");
                    return Ok(false);
                }
                Err(e) => {
                    if self.config.continue_on_error {
                        tracing::warn!("Handler error: {}", e);
                    } else {
                        return Err(e);
                    }
                }
            }

            if stats
                .total_events
                .is_multiple_of(self.config.progress_interval.max(1))
            {
                tracing::info!(
                    "Progress: {} events, {} valid, {} invalid",
                    stats.total_events,
                    stats.valid_events,
                    stats.invalid_events
                );
            }
        }

        Ok(true)
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// `events.jsonl`, `events.ndjson.gz`, and so on.
fn is_jsonl(path: &Path) -> bool {
    let inner = if is_gzip(path) {
        path.file_stem().map(Path::new)
    } else {
        Some(path)
    };

    inner
        .and_then(|p| p.extension())
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| JSONL_EXTENSIONS.contains(&ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::TempDir;

    fn line(id_char: char, created_at: u32) -> String {
        serde_json::json!({
            "id": id_char.to_string().repeat(64),
            "pubkey": "b".repeat(64),
            "created_at": created_at,
            "kind": 1,
            "tags": [["t", "nostr"]],
            "content": "hello",
            "sig": "c".repeat(128),
        })
        .to_string()
    }

    fn unverified(input: PathBuf) -> JsonlSource {
        JsonlSource::new(JsonlConfig {
            input,
            skip_validation: true,
            ..Default::default()
        })
    }

    fn collect(source: &JsonlSource) -> (Vec<Event>, ImportStats) {
        let mut events = Vec::new();
        let stats = source
            .process(|event| {
                events.push(event);
                Ok(true)
            })
            .unwrap();
        (events, stats)
    }

    #[test]
    fn test_reads_plain_file_and_skips_bad_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let content = format!(
            "{}\n\nnot json\n{}\n",
            line('a', 1_700_000_000),
            line('d', 1_700_000_001)
        );
        fs::write(&path, content).unwrap();

        let (events, stats) = collect(&unverified(path));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tags, vec![vec!["t", "nostr"]]);
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.json_errors, 1);
    }

    #[test]
    fn test_reads_gzip_in_directory_order() {
        let dir = TempDir::new().unwrap();

        fs::write(dir.path().join("a.jsonl"), line('a', 1_700_000_000)).unwrap();

        let file = File::create(dir.path().join("b.ndjson.gz")).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        writeln!(encoder, "{}", line('b', 1_700_000_000)).unwrap();
        encoder.finish().unwrap();

        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let (events, stats) = collect(&unverified(dir.path().to_path_buf()));
        let ids: Vec<_> = events.iter().map(|e| &e.id[..1]).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(stats.files_processed, 2);
    }

    #[test]
    fn test_pre_genesis_events_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.jsonl");
        fs::write(&path, line('a', 1_000)).unwrap();

        let (events, stats) = collect(&unverified(path));
        assert!(events.is_empty());
        assert_eq!(stats.pre_genesis, 1);
    }

    #[test]
    fn test_verification_rejects_bad_signature() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forged.jsonl");
        fs::write(&path, line('a', 1_700_000_000)).unwrap();

        let source = JsonlSource::new(JsonlConfig {
            input: path,
            ..Default::default()
        });
        let (events, stats) = collect(&source);
        assert!(events.is_empty());
        assert_eq!(stats.invalid_events, 1);
    }

    #[test]
    fn test_handler_can_stop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let content = format!("{}\n{}\n", line('a', 1_700_000_000), line('d', 1_700_000_000));
        fs::write(&path, content).unwrap();

        let mut seen = 0;
        unverified(path)
            .process(|_| {
                seen += 1;
                Ok(false)
            })
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let source = unverified(PathBuf::from("/definitely/not/here"));
        assert!(source.process(|_| Ok(true)).is_err());
    }

    #[test]
    fn test_is_jsonl() {
        assert!(is_jsonl(Path::new("x.jsonl")));
        assert!(is_jsonl(Path::new("x.json.gz")));
        assert!(!is_jsonl(Path::new("x.gz")));
        assert!(!is_jsonl(Path::new("x.txt")));
    }
}
