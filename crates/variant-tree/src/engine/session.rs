//! UCI エンジンプロセス

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::info::{InfoAggregate, parse_info_line};
use super::{Analysis, Analyzer, EngineOptions};
use crate::error::{Error, Result};

/// ハンドシェイクと `isready` の待ち時間上限
pub const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(30);
/// `quit` 後に自発的な終了を待つ時間
pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_secs(1);
pub const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 1 本のエンジンに対する入出力をカプセル化する。
///
/// 標準出力は専用スレッドで読み、チャネル経由で受け取る。
pub struct EngineSession {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<String>,
    opt_names: HashSet<String>,
    raw_log: Option<Box<dyn Write + Send>>,
    path: PathBuf,
    /// 現在エンジンに設定されている MultiPV
    multipv: Option<usize>,
    /// `go` を送って `bestmove` をまだ受け取っていない
    searching: bool,
    closed: bool,
}

impl EngineSession {
    /// エンジンを起動し、ハンドシェイクと設定まで済ませる。
    pub fn start(opts: &EngineOptions) -> Result<Self> {
        let mut session = Self::spawn(&opts.path, &opts.args, opts.raw_log.as_deref())?;
        session.configure(opts)?;
        Ok(session)
    }

    /// エンジンを起動し、`uci` / `uciok` のハンドシェイクを行う。
    pub fn spawn(path: &Path, args: &[String], raw_log: Option<&Path>) -> Result<Self> {
        let mut cmd = Command::new(path);
        cmd.args(args).stdin(Stdio::piped()).stdout(Stdio::piped());
        // 端末の Ctrl-C がエンジンに直接届くと探索中に落ちるので、別プロセスグループにする
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd
            .spawn()
            .map_err(|source| Error::EngineUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::EngineProtocol("engine has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::EngineProtocol("engine has no stdout".to_string()))?;
        let (tx, rx) = mpsc::channel::<String>();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let raw_log: Option<Box<dyn Write + Send>> = match raw_log {
            Some(log_path) => {
                let file = OpenOptions::new().create(true).append(true).open(log_path).map_err(
                    |source| Error::Persistence {
                        operation: "open raw log",
                        path: log_path.to_path_buf(),
                        source,
                    },
                )?;
                Some(Box::new(BufWriter::new(file)))
            }
            None => None,
        };

        let mut session = Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            opt_names: HashSet::new(),
            raw_log,
            path: path.to_path_buf(),
            multipv: None,
            searching: false,
            closed: false,
        };
        session.handshake()?;
        Ok(session)
    }

    fn handshake(&mut self) -> Result<()> {
        self.write_line("uci")?;
        loop {
            let line = self.recv_line(ENGINE_READY_TIMEOUT)?;
            if let Some(rest) = line.strip_prefix("option ") {
                if let Some(name) = parse_option_name(rest) {
                    self.opt_names.insert(name);
                }
            } else if line == "uciok" {
                break;
            }
        }
        debug!("{}: {} options advertised", self.path.display(), self.opt_names.len());
        Ok(())
    }

    /// 変種・スレッド数・ハッシュ・候補手数などを設定する。
    ///
    /// 実行中に呼び直してもよい（変種の切り替えなど）。
    pub fn configure(&mut self, opts: &EngineOptions) -> Result<()> {
        if let Some(path) = &opts.variants_file {
            self.write_line(&format!("load {}", path.display()))?;
        }
        self.set_option_if_available("UCI_Variant", &opts.variant)?;
        match &opts.eval_file {
            Some(path) => {
                self.set_option_if_available("EvalFile", &path.display().to_string())?;
                self.set_option_if_available("Use NNUE", "true")?;
            }
            None => self.set_option_if_available("Use NNUE", "false")?,
        }
        self.set_option_if_available("Threads", &opts.threads.to_string())?;
        self.set_option_if_available("Hash", &opts.hash_mb.to_string())?;
        self.set_option_if_available("MultiPV", &opts.multipv.to_string())?;
        self.multipv = Some(opts.multipv);
        for opt in &opts.extra_options {
            if let Some((name, value)) = opt.split_once('=') {
                self.set_option_if_available(name.trim(), value.trim())?;
            } else {
                // "=" がない場合はボタン型オプションとみなし、値なしで送る
                self.write_line(&format!("setoption name {}", opt.trim()))?;
            }
        }
        self.sync_ready()?;
        self.write_line("ucinewgame")?;
        self.sync_ready()
    }

    /// `fen` を `depth` まで探索する。`bestmove` が届くまでブロックする。
    pub fn analyze(&mut self, fen: &str, depth: u32, multipv: usize) -> Result<Analysis> {
        if self.searching {
            return Err(Error::EngineBusy);
        }
        if self.multipv != Some(multipv) {
            self.set_option_if_available("MultiPV", &multipv.to_string())?;
            self.multipv = Some(multipv);
        }
        self.write_line(&format!("position fen {fen}"))?;
        self.write_line(&format!("go depth {depth}"))?;
        self.searching = true;

        let mut aggregate = InfoAggregate::new(multipv);
        loop {
            let line = self.recv_blocking()?;
            if let Some(info) = parse_info_line(&line) {
                aggregate.update(info);
                continue;
            }
            if let Some(rest) = line.strip_prefix("bestmove") {
                self.searching = false;
                let analysis = aggregate.into_analysis();
                let best = rest.split_whitespace().next().unwrap_or_default();
                let no_move = best.is_empty() || best == "(none)" || best == "0000";
                if no_move != analysis.is_terminal() {
                    warn!(
                        "bestmove '{best}' disagrees with {} candidate line(s) for {fen}",
                        analysis.candidates.len()
                    );
                }
                return Ok(analysis);
            }
        }
    }

    /// 初期局面の FEN を `d` コマンドで取得する。
    pub fn start_fen(&mut self) -> Result<String> {
        self.write_line("position startpos")?;
        self.display_fen()
    }

    /// `fen` で `mv` を指した後の FEN を `d` コマンドで取得する。
    pub fn fen_after(&mut self, fen: &str, mv: &str) -> Result<String> {
        self.write_line(&format!("position fen {fen} moves {mv}"))?;
        self.display_fen()
    }

    fn display_fen(&mut self) -> Result<String> {
        if self.searching {
            return Err(Error::EngineBusy);
        }
        self.write_line("d")?;
        self.write_line("isready")?;
        let mut fen = None;
        loop {
            let line = self.recv_line(ENGINE_READY_TIMEOUT)?;
            if let Some(rest) = line.strip_prefix("Fen:") {
                fen = Some(rest.trim().to_string());
            } else if line == "readyok" {
                break;
            }
        }
        fen.ok_or_else(|| Error::EngineProtocol("no 'Fen:' line in 'd' output".to_string()))
    }

    pub fn sync_ready(&mut self) -> Result<()> {
        self.write_line("isready")?;
        loop {
            let line = self.recv_line(ENGINE_READY_TIMEOUT)?;
            if line == "readyok" {
                break;
            }
        }
        Ok(())
    }

    pub fn set_option_if_available(&mut self, name: &str, value: &str) -> Result<()> {
        if self.opt_names.is_empty() || self.opt_names.contains(name) {
            self.write_line(&format!("setoption name {name} value {value}"))?;
        } else {
            debug!("{}: option '{name}' not supported, skipped", self.path.display());
        }
        Ok(())
    }

    pub fn recv_line(&mut self, timeout: Duration) -> Result<String> {
        let line = self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => Error::EngineProtocol(format!(
                "no response from {} within {}s",
                self.path.display(),
                timeout.as_secs()
            )),
            RecvTimeoutError::Disconnected => self.crashed(),
        })?;
        self.log_raw('<', &line);
        Ok(line)
    }

    fn recv_blocking(&mut self) -> Result<String> {
        let line = self.rx.recv().map_err(|_| self.crashed())?;
        self.log_raw('<', &line);
        Ok(line)
    }

    pub fn write_line(&mut self, msg: &str) -> Result<()> {
        self.log_raw('>', msg);
        let written = self
            .stdin
            .write_all(msg.as_bytes())
            .and_then(|_| self.stdin.write_all(b"\n"))
            .and_then(|_| self.stdin.flush());
        written.map_err(|e| {
            Error::EngineCrashed(format!("{}: write failed: {e}", self.path.display()))
        })
    }

    fn crashed(&mut self) -> Error {
        let status = match self.child.try_wait() {
            Ok(Some(status)) => status.to_string(),
            _ => "stdout closed".to_string(),
        };
        Error::EngineCrashed(format!("{} exited unexpectedly ({status})", self.path.display()))
    }

    fn log_raw(&mut self, dir: char, line: &str) {
        if let Some(writer) = self.raw_log.as_mut() {
            let _ = writeln!(writer, "{dir} {line}");
            let _ = writer.flush();
        }
    }

    /// `quit` を送り、一定時間内に終わらなければ kill する。複数回呼んでもよい。
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.write_line("quit");
        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                debug!("{}: exited", self.path.display());
                return;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        warn!("{}: did not quit in time, killing", self.path.display());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Analyzer for EngineSession {
    fn start_fen(&mut self) -> Result<String> {
        EngineSession::start_fen(self)
    }

    fn fen_after(&mut self, fen: &str, mv: &str) -> Result<String> {
        EngineSession::fen_after(self, fen, mv)
    }

    fn analyze(&mut self, fen: &str, depth: u32, multipv: usize) -> Result<Analysis> {
        EngineSession::analyze(self, fen, depth, multipv)
    }

    fn shutdown(&mut self) {
        EngineSession::shutdown(self)
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// `option name <N> type ...` からオプション名を取り出す（名前は空白を含み得る）。
pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace();
    tokens.find(|tok| *tok == "name")?;
    let parts: Vec<&str> = tokens.take_while(|tok| *tok != "type").collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_names_may_contain_spaces() {
        assert_eq!(
            parse_option_name("option name Use NNUE type check default true").as_deref(),
            Some("Use NNUE")
        );
        assert_eq!(
            parse_option_name("name MultiPV type spin default 1 min 1 max 500").as_deref(),
            Some("MultiPV")
        );
        assert_eq!(parse_option_name("name type spin"), None);
        assert_eq!(parse_option_name("type spin"), None);
    }

    #[test]
    fn missing_binary_is_engine_unavailable() {
        let err = EngineSession::spawn(Path::new("/nonexistent/variant-engine"), &[], None)
            .err()
            .unwrap();
        assert!(matches!(err, Error::EngineUnavailable { .. }));
        assert!(err.is_engine_failure());
    }
}
