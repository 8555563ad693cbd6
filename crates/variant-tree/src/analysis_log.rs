//! 解析記録ファイル
//!
//! 解析のたびに 1 レコードを追記する人間向けのテキストログ。
//!
//! ```text
//!
//! Analysis #12
//! cp -35
//! pv e2e4 e7e5
//! alt1 g1f3 cp 41
//! alt2 f1c4 mate 3
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::engine::Analysis;
use crate::error::{Error, Result};
use crate::score::{self, Score};

/// 追記モードで開いた解析記録
pub struct AnalysisLog {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl AnalysisLog {
    /// ファイルを追記モードで開く（無ければ作る）。
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| Error::Persistence {
                operation: "create directory for",
                path: path.to_path_buf(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| Error::Persistence {
                operation: "open analysis log",
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    /// 1 回の解析を書き出す。
    ///
    /// `leaf_score` は解析前の葉の評価値、`line` はルートから葉までの指し手。
    pub fn record(
        &mut self,
        seq: u64,
        leaf_score: Option<i32>,
        line: &[&str],
        analysis: &Analysis,
    ) -> Result<()> {
        let mut text = format!("\nAnalysis #{seq}\n");
        match leaf_score {
            Some(raw) => text.push_str(&score::describe(raw)),
            None => text.push('-'),
        }
        text.push_str(&format!("\npv {}\n", line.join(" ")));
        if analysis.is_terminal() {
            let result = analysis.position_score.map(uci_score).unwrap_or_else(|| "-".to_string());
            text.push_str(&format!("terminal {result}\n"));
        }
        for (i, cand) in analysis.candidates.iter().enumerate() {
            text.push_str(&format!("alt{} {} {}\n", i + 1, cand.mv, uci_score(cand.score)));
        }
        self.writer
            .write_all(text.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|source| Error::Persistence {
                operation: "append to",
                path: self.path.clone(),
                source,
            })
    }
}

/// エンジンが報告した形のまま（`cp 35` / `mate -2`）
fn uci_score(score: Score) -> String {
    match score {
        Score::Cp(v) => format!("cp {v}"),
        Score::Mate(n) => format!("mate {n}"),
    }
}
