//! UCI engine driver. One engine process is spawned per request and torn
//! down afterwards, so concurrent reviews never share engine state.

use chess::Board;
use log::{debug, warn};
use std::env;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::analysis::analyzer::{
    Analysis, AnalysisLimits, Analyzer, AnalyzerError, Budget, Evaluation, ProbeReport,
};
use crate::config::AppConfig;
use crate::game::rules::{parse_uci, to_san};

const EXE_NAMES: [&str; 3] = ["stockfish", "stockfish.exe", "stockfish-windows-x86-64-avx2.exe"];
const ENGINE_DIRS: [&str; 3] = ["engines", "engine", "bin"];
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct UciAnalyzer {
    preferred: Option<PathBuf>,
    args: Vec<String>,
    grace: Duration,
    depth_ceiling: Duration,
}

impl UciAnalyzer {
    pub fn new(preferred: Option<PathBuf>, grace: Duration, depth_ceiling: Duration) -> Self {
        Self {
            preferred,
            args: Vec::new(),
            grace,
            depth_ceiling,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.engine_path.clone(),
            config.analyzer_grace,
            config.depth_ceiling,
        )
    }

    /// Extra command-line arguments passed to the engine binary.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// A configured path is taken literally; discovery only runs without one.
    fn locate(&self) -> Option<PathBuf> {
        find_engine_path(self.preferred.as_deref(), self.preferred.is_some())
    }

    fn spawn(&self, path: &Path, timeout: Duration) -> Result<EngineProcess, AnalyzerError> {
        EngineProcess::spawn(path, &self.args, timeout)
    }
}

impl Analyzer for UciAnalyzer {
    fn analyze(&self, position: &Board, limits: &AnalysisLimits) -> Result<Analysis, AnalyzerError> {
        let path = self.locate().ok_or(AnalyzerError::NotFound)?;
        let mut engine = self.spawn(&path, limits.deadline(self.grace, self.depth_ceiling))?;

        let engine_name = engine.handshake()?;
        if let Some(skill) = limits.skill_level {
            engine.send(&format!("setoption name Skill Level value {skill}"))?;
        }
        engine.send("isready")?;
        engine.wait_for("readyok")?;

        engine.send(&format!("position fen {position}"))?;
        engine.send(&go_command(limits.budget))?;

        let mut last = InfoLine::default();
        let best_move = loop {
            let line = engine.next_line()?;
            if let Some(best) = parse_bestmove(&line) {
                break best;
            }
            if let Some(info) = parse_info(&line) {
                if info.score.is_some() {
                    last = info;
                }
            }
        };

        if let Some(best) = &best_move {
            let legal = parse_uci(best).is_some_and(|mv| position.legal(mv));
            if !legal {
                return Err(AnalyzerError::Protocol(format!(
                    "engine reported an illegal best move: {best}"
                )));
            }
        }

        debug!(
            "{} analysed {}: best={:?} eval={:?}",
            engine_name, position, best_move, last.score
        );

        Ok(Analysis {
            engine: engine_name,
            best_move,
            evaluation: last.score,
            pv: pv_to_san(position, &last.pv),
        })
    }

    fn probe(&self) -> ProbeReport {
        let path = match self.locate() {
            Some(path) => path,
            None => {
                return ProbeReport {
                    available: false,
                    path: None,
                    identity: None,
                    error: Some(AnalyzerError::NotFound.to_string()),
                }
            }
        };

        match self
            .spawn(&path, PROBE_TIMEOUT)
            .and_then(|mut engine| engine.handshake())
        {
            Ok(identity) => ProbeReport {
                available: true,
                path: Some(path),
                identity: Some(identity),
                error: None,
            },
            Err(e) => {
                warn!("Engine probe failed for {}: {}", path.display(), e);
                ProbeReport {
                    available: false,
                    path: Some(path),
                    identity: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// Locate an engine binary.
///
/// Order: `preferred` (with `strict`, a missing preferred path ends the
/// search), `STOCKFISH_PATH`, `engines/`, `engine/` and `bin/` under the
/// working directory, then `PATH`.
pub fn find_engine_path(preferred: Option<&Path>, strict: bool) -> Option<PathBuf> {
    if let Some(path) = preferred {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        if strict {
            return None;
        }
    }

    if let Some(path) = env::var_os("STOCKFISH_PATH").map(PathBuf::from) {
        if path.exists() {
            return Some(path);
        }
    }

    if let Ok(cwd) = env::current_dir() {
        for dir in ENGINE_DIRS {
            for name in EXE_NAMES {
                let candidate = cwd.join(dir).join(name);
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }
    }

    let search_path = env::var_os("PATH")?;
    env::split_paths(&search_path)
        .flat_map(|dir| EXE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

fn go_command(budget: Budget) -> String {
    match budget {
        Budget::MoveTime(ms) => format!("go movetime {ms}"),
        Budget::Depth(depth) => format!("go depth {depth}"),
    }
}

struct EngineProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    lines: Receiver<String>,
    deadline: Instant,
    timeout: Duration,
}

impl EngineProcess {
    fn spawn(path: &Path, args: &[String], timeout: Duration) -> Result<Self, AnalyzerError> {
        let mut child = Command::new(path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(AnalyzerError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AnalyzerError::Protocol("engine stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AnalyzerError::Protocol("engine stdout unavailable".to_string()))?;

        // Reads block, so a helper thread forwards lines and the caller waits with a deadline.
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            lines: rx,
            deadline: Instant::now() + timeout,
            timeout,
        })
    }

    fn send(&mut self, command: &str) -> Result<(), AnalyzerError> {
        writeln!(self.stdin, "{command}")?;
        self.stdin.flush()?;
        Ok(())
    }

    fn next_line(&mut self) -> Result<String, AnalyzerError> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        match self.lines.recv_timeout(remaining) {
            Ok(line) => Ok(line),
            Err(RecvTimeoutError::Timeout) => Err(AnalyzerError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(AnalyzerError::Exited),
        }
    }

    /// Read until a line equal to `token`, returning the lines before it.
    fn wait_for(&mut self, token: &str) -> Result<Vec<String>, AnalyzerError> {
        let mut seen = Vec::new();
        loop {
            let line = self.next_line()?;
            if line.trim() == token {
                return Ok(seen);
            }
            seen.push(line);
        }
    }

    /// `uci` → `uciok`, returning the engine's `id name`.
    fn handshake(&mut self) -> Result<String, AnalyzerError> {
        self.send("uci")?;
        let preamble = self.wait_for("uciok")?;
        Ok(preamble
            .iter()
            .find_map(|line| line.trim().strip_prefix("id name "))
            .map(|name| name.trim().to_string())
            .unwrap_or_else(|| "Stockfish".to_string()))
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        let _ = self.send("quit");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct InfoLine {
    score: Option<Evaluation>,
    pv: Vec<String>,
}

fn parse_info(line: &str) -> Option<InfoLine> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "info" {
        return None;
    }
    let mut info = InfoLine::default();
    while let Some(token) = tokens.next() {
        match token {
            "string" => return None,
            "score" => {
                let kind = tokens.next()?;
                let value = tokens.next()?.parse::<i32>().ok()?;
                info.score = match kind {
                    "cp" => Some(Evaluation::Centipawns(value)),
                    "mate" => Some(Evaluation::Mate(value)),
                    _ => None,
                };
            }
            "pv" => {
                info.pv = tokens.by_ref().map(str::to_string).collect();
            }
            _ => {}
        }
    }
    Some(info)
}

/// `Some(best)` for a `bestmove` line; the inner value is `None` for `(none)`.
fn parse_bestmove(line: &str) -> Option<Option<String>> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "bestmove" {
        return None;
    }
    Some(
        tokens
            .next()
            .filter(|mv| *mv != "(none)" && *mv != "0000")
            .map(str::to_string),
    )
}

/// Convert a UCI principal variation to SAN, stopping at the first move
/// that is malformed or illegal in the position reached so far.
pub fn pv_to_san(position: &Board, pv: &[String]) -> Vec<String> {
    let mut board = *position;
    let mut sans = Vec::with_capacity(pv.len());
    for text in pv {
        let mv = match parse_uci(text) {
            Some(mv) if board.legal(mv) => mv,
            _ => break,
        };
        sans.push(to_san(&board, mv));
        board = board.make_move_new(mv);
    }
    sans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_line_with_centipawns_and_pv() {
        let info = parse_info("info depth 12 seldepth 18 multipv 1 score cp -34 nodes 1000 pv e7e5 g1f3")
            .expect("info");
        assert_eq!(info.score, Some(Evaluation::Centipawns(-34)));
        assert_eq!(info.pv, vec!["e7e5", "g1f3"]);
    }

    #[test]
    fn info_line_with_mate_and_bounds() {
        let info = parse_info("info depth 20 score mate -2 upperbound pv h7h6").expect("info");
        assert_eq!(info.score, Some(Evaluation::Mate(-2)));
        assert!(parse_info("info string NNUE evaluation enabled").is_none());
        assert!(parse_info("readyok").is_none());
        assert_eq!(parse_info("info depth 1 currmove e2e4").map(|i| i.score), Some(None));
    }

    #[test]
    fn bestmove_lines() {
        assert_eq!(parse_bestmove("bestmove e2e4 ponder e7e5"), Some(Some("e2e4".to_string())));
        assert_eq!(parse_bestmove("bestmove (none)"), Some(None));
        assert_eq!(parse_bestmove("info depth 3"), None);
    }

    #[test]
    fn pv_stops_at_first_illegal_move() {
        let pv: Vec<String> = ["e2e4", "e7e5", "g1f3", "e1e3", "b8c6"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(pv_to_san(&Board::default(), &pv), vec!["e4", "e5", "Nf3"]);

        let garbage = vec!["zz".to_string(), "e2e4".to_string()];
        assert!(pv_to_san(&Board::default(), &garbage).is_empty());
    }

    #[test]
    fn missing_engine_probe_does_not_fail() {
        let analyzer = UciAnalyzer::new(
            Some(PathBuf::from("/definitely/not/here/stockfish")),
            Duration::from_millis(100),
            Duration::from_secs(1),
        );
        let report = analyzer.probe();
        assert!(!report.available);
        assert!(report.path.is_none());
        assert_eq!(report.error.as_deref(), Some("Stockfish not found"));

        let err = analyzer
            .analyze(&Board::default(), &AnalysisLimits::movetime(10))
            .expect_err("no engine");
        assert!(matches!(err, AnalyzerError::NotFound));
    }

    #[cfg(unix)]
    mod scripted_engine {
        use super::*;
        use std::fs;

        const FAKE_ENGINE: &str = r#"
while read line; do
  case "$line" in
    uci) echo "id name FakeFish 1"; echo "uciok";;
    isready) echo "readyok";;
    go*) echo "info depth 1 score cp 25 pv e2e4"; echo "info depth 2 score cp 31 pv e2e4 e7e5 g1f3 a1a1"; echo "bestmove e2e4";;
    quit) exit 0;;
  esac
done
"#;

        const SILENT_ENGINE: &str = r#"
while read line; do
  case "$line" in
    uci) echo "uciok";;
    isready) echo "readyok";;
    quit) exit 0;;
  esac
done
"#;

        fn shell_engine(script: &str) -> (UciAnalyzer, PathBuf) {
            let path = env::temp_dir().join(format!("fake-engine-{}.sh", uuid::Uuid::new_v4()));
            fs::write(&path, script).expect("write script");
            let analyzer = UciAnalyzer::new(
                Some(PathBuf::from("/bin/sh")),
                Duration::from_millis(300),
                Duration::from_secs(2),
            )
            .with_args(vec![path.display().to_string()]);
            (analyzer, path)
        }

        #[test]
        fn analyse_reads_last_scored_info() {
            let (analyzer, script) = shell_engine(FAKE_ENGINE);
            let analysis = analyzer
                .analyze(&Board::default(), &AnalysisLimits::movetime(10))
                .expect("analysis");
            let _ = fs::remove_file(script);

            assert_eq!(analysis.engine, "FakeFish 1");
            assert_eq!(analysis.best_move.as_deref(), Some("e2e4"));
            assert_eq!(analysis.evaluation, Some(Evaluation::Centipawns(31)));
            assert_eq!(analysis.pv, vec!["e4", "e5", "Nf3"]);
        }

        #[test]
        fn probe_reports_identity() {
            let (analyzer, script) = shell_engine(FAKE_ENGINE);
            let report = analyzer.probe();
            let _ = fs::remove_file(script);
            assert!(report.available);
            assert_eq!(report.identity.as_deref(), Some("FakeFish 1"));
        }

        #[test]
        fn silent_engine_times_out() {
            let (analyzer, script) = shell_engine(SILENT_ENGINE);
            let err = analyzer
                .analyze(&Board::default(), &AnalysisLimits::movetime(10))
                .expect_err("times out");
            let _ = fs::remove_file(script);
            assert!(matches!(err, AnalyzerError::Timeout(_)));
        }
    }
}
