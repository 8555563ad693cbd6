//! Common test utilities for variant-tree tests

#![allow(dead_code)] // These utilities may be used by various test files

use std::collections::HashMap;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use variant_tree::engine::{Analysis, Analyzer, Candidate};
use variant_tree::error::{Error, Result};
use variant_tree::lifecycle::StopFlag;
use variant_tree::score::Score;
use variant_tree::tree::TreeStore;

pub const START: &str = "start";

/// Scripted in-process engine.
///
/// Positions are named by appending moves to the parent name, so the child of
/// `"start"` via `"a"` is `"start a"`.
#[derive(Default)]
pub struct Scripted {
    lines: HashMap<String, Vec<(String, Score)>>,
    terminal: HashMap<String, Score>,
    /// `fen_after` on this position fails as if the engine died
    crash_on: Option<String>,
    /// request a stop once this many analyses have been made
    stop_after: Option<(usize, StopFlag)>,
    pub calls: Vec<(String, usize)>,
    pub shutdowns: usize,
}

impl Scripted {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(mut self, fen: &str, moves: &[(&str, Score)]) -> Self {
        let moves = moves.iter().map(|(mv, s)| (mv.to_string(), *s)).collect();
        self.lines.insert(fen.to_string(), moves);
        self
    }

    pub fn terminal(mut self, fen: &str, score: Score) -> Self {
        self.terminal.insert(fen.to_string(), score);
        self
    }

    pub fn crash_on(mut self, fen: &str) -> Self {
        self.crash_on = Some(fen.to_string());
        self
    }

    pub fn stop_after(mut self, analyses: usize, flag: StopFlag) -> Self {
        self.stop_after = Some((analyses, flag));
        self
    }
}

impl Analyzer for Scripted {
    fn start_fen(&mut self) -> Result<String> {
        Ok(START.to_string())
    }

    fn fen_after(&mut self, fen: &str, mv: &str) -> Result<String> {
        if self.crash_on.as_deref() == Some(fen) {
            return Err(Error::EngineCrashed("scripted crash".to_string()));
        }
        Ok(format!("{fen} {mv}"))
    }

    fn analyze(&mut self, fen: &str, depth: u32, multipv: usize) -> Result<Analysis> {
        self.calls.push((fen.to_string(), multipv));
        if let Some((limit, flag)) = &self.stop_after {
            if self.calls.len() >= *limit {
                flag.request_stop();
            }
        }
        if let Some(score) = self.terminal.get(fen) {
            return Ok(Analysis {
                position_score: Some(*score),
                ..Default::default()
            });
        }
        let Some(moves) = self.lines.get(fen) else {
            return Err(Error::EngineProtocol(format!("unscripted position '{fen}'")));
        };
        let candidates = moves
            .iter()
            .take(multipv)
            .map(|(mv, score)| Candidate {
                mv: mv.clone(),
                score: *score,
                depth,
                pv: vec![mv.clone()],
            })
            .collect();
        Ok(Analysis {
            candidates,
            ..Default::default()
        })
    }

    fn shutdown(&mut self) {
        self.shutdowns += 1;
    }
}

/// Root mates in 2 through `a`, but `b` turns out to be mate at once.
pub fn mate_script() -> Scripted {
    Scripted::new()
        .line(START, &[("a", Score::Mate(2)), ("b", Score::Cp(900))])
        .line("start a", &[("x", Score::Mate(-1))])
        .line("start a x", &[("z", Score::Mate(1))])
        .terminal("start a x z", Score::Mate(0))
        .terminal("start b", Score::Mate(0))
}

/// Engine that never runs out of moves.
///
/// Every position answers exactly the requested number of candidates
/// `m0, m1, ...` with falling scores, so nodes are only ever widened.
#[derive(Default)]
pub struct Endless {
    delay: Duration,
    /// snapshot file read back at the start of every analysis
    watch: Option<PathBuf>,
    stop_after: Option<(usize, StopFlag)>,
    pub analyses: usize,
    /// snapshots found on disk while the run was in progress
    pub observed: Vec<TreeStore>,
}

impl Endless {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn watch(mut self, path: PathBuf) -> Self {
        self.watch = Some(path);
        self
    }

    pub fn stop_after(mut self, analyses: usize, flag: StopFlag) -> Self {
        self.stop_after = Some((analyses, flag));
        self
    }
}

impl Analyzer for Endless {
    fn start_fen(&mut self) -> Result<String> {
        Ok(START.to_string())
    }

    fn fen_after(&mut self, fen: &str, mv: &str) -> Result<String> {
        Ok(format!("{fen} {mv}"))
    }

    fn analyze(&mut self, _fen: &str, depth: u32, multipv: usize) -> Result<Analysis> {
        if let Some(path) = self.watch.as_ref().filter(|p| p.exists()) {
            self.observed.push(TreeStore::load(path, || unreachable!())?);
        }
        thread::sleep(self.delay);
        self.analyses += 1;
        if let Some((limit, flag)) = &self.stop_after {
            if self.analyses >= *limit {
                flag.request_stop();
            }
        }
        let candidates = (0..multipv)
            .map(|i| Candidate {
                mv: format!("m{i}"),
                score: Score::Cp(40 - 10 * i as i32),
                depth,
                pv: vec![format!("m{i}")],
            })
            .collect();
        Ok(Analysis {
            candidates,
            ..Default::default()
        })
    }

    fn shutdown(&mut self) {}
}
