//! Interactive leader shell.
//!
//! Reads verbs from stdin while finalized searches arrive on the results
//! channel; both are serviced from one `select!` loop so a slow gather
//! never blocks the prompt.

use lumo_cluster::{FinalizedSearch, LeaderNode, SearchMode, UploadOutcome};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

const RANKED_SHOWN: usize = 20;

pub struct Shell {
    leader: Arc<LeaderNode>,
    results: mpsc::Receiver<FinalizedSearch>,
}

impl Shell {
    pub fn new(leader: Arc<LeaderNode>, results: mpsc::Receiver<FinalizedSearch>) -> Self {
        Self { leader, results }
    }

    /// Serve verbs until `quit` or stdin closes.
    pub async fn run(mut self) -> std::io::Result<()> {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        print_help();
        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if !self.dispatch(line.trim()).await {
                            return Ok(());
                        }
                    }
                    None => {
                        self.leader.quit().await;
                        return Ok(());
                    }
                },
                Some(result) = self.results.recv() => print_result(&result),
            }
        }
    }

    /// Returns false when the shell should exit.
    async fn dispatch(&self, line: &str) -> bool {
        let mut words = line.split_whitespace();
        match words.next() {
            None => {}
            Some("upload") => match words.next() {
                Some(path) => self.upload(Path::new(path)).await,
                None => println!("usage: upload <file>"),
            },
            Some("mass_upload") => match words.next() {
                Some(dir) => self.mass_upload(Path::new(dir)).await,
                None => println!("usage: mass_upload <dir>"),
            },
            Some("search") => {
                let mode = words.next().and_then(parse_mode);
                let prompt = words.collect::<Vec<_>>().join(" ");
                match mode {
                    Some(mode) if !prompt.is_empty() => {
                        if let Err(e) = self.leader.search(&prompt, mode).await {
                            println!("search failed: {}", e);
                        }
                    }
                    _ => println!("usage: search <meta|vector|fusion> <prompt>"),
                }
            }
            Some("get") => {
                let dir = words.next().map(PathBuf::from);
                let prompt = words.collect::<Vec<_>>().join(" ");
                match dir {
                    Some(dir) if !prompt.is_empty() => {
                        if let Err(e) = self.leader.get(&prompt, dir).await {
                            println!("get failed: {}", e);
                        }
                    }
                    _ => println!("usage: get <output-dir> <prompt>"),
                }
            }
            Some("ls") => {
                for member in self.leader.ls() {
                    println!(
                        "shard {} at {} [{:?}] outbox={}",
                        member.shard_id, member.addr, member.status, member.outbox_len
                    );
                }
            }
            Some("clear") => {
                self.leader.clear().await;
                println!("cleared");
            }
            Some("quit") => {
                self.leader.quit().await;
                return false;
            }
            Some("help") => print_help(),
            Some(other) => println!("unknown command: {}", other),
        }
        true
    }

    async fn upload(&self, path: &Path) {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => {
                println!("not a file path: {}", path.display());
                return;
            }
        };
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("jpg")
            .to_string();
        let payload = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                println!("cannot read {}: {}", path.display(), e);
                return;
            }
        };
        match self.leader.upload(&name, &format, payload).await {
            Ok(UploadOutcome::Routed { photo_id, shard_id }) => {
                println!("{} -> shard {} as {}", name, shard_id, photo_id);
            }
            Ok(UploadOutcome::Duplicate { photo_id }) => {
                println!("{} already indexed as {}", name, photo_id);
            }
            Err(e) => println!("upload failed: {}", e),
        }
    }

    async fn mass_upload(&self, dir: &Path) {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                println!("cannot read {}: {}", dir.display(), e);
                return;
            }
        };
        let mut sent = 0usize;
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if path.is_file() {
                        self.upload(&path).await;
                        sent += 1;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    println!("directory walk failed: {}", e);
                    break;
                }
            }
        }
        println!("{} files processed", sent);
    }
}

fn parse_mode(word: &str) -> Option<SearchMode> {
    match word {
        "meta" => Some(SearchMode::MetadataOnly),
        "vector" => Some(SearchMode::VectorOnly),
        "fusion" => Some(SearchMode::MetaFusion),
        _ => None,
    }
}

fn print_result(result: &FinalizedSearch) {
    let partial = if result.partial { " (partial)" } else { "" };
    println!(
        "[{}]{} \"{}\" w_m={:.3} w_v={:.3}, {} ranked",
        result.request_id,
        partial,
        result.prompt,
        result.w_m,
        result.w_v,
        result.ranked.len()
    );
    for photo in result.ranked.iter().take(RANKED_SHOWN) {
        println!("  {:.4}  {}", photo.score, photo.photo_id);
    }
    if result.ranked.len() > RANKED_SHOWN {
        println!("  ... {} more", result.ranked.len() - RANKED_SHOWN);
    }
    if let Some(dir) = &result.output_dir {
        println!("  photos written to {}", dir.display());
    }
}

fn print_help() {
    println!("commands:");
    println!("  upload <file>                  index one photo");
    println!("  mass_upload <dir>              index every file in a directory");
    println!("  search <meta|vector|fusion> <prompt>");
    println!("  get <output-dir> <prompt>      fused search, saves ranked photos");
    println!("  ls                             list shard members");
    println!("  clear                          wipe all indexed data");
    println!("  quit                           stop shards and exit");
}
