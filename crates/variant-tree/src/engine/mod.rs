//! 外部解析エンジンとのやり取り
//!
//! - `info`: `info` 行の解析と multipv 順位ごとの集約
//! - `session`: エンジンプロセスの起動・設定・解析・終了
//!
//! 探索ループは [`Analyzer`] トレイト越しにエンジンを使うので、
//! テストではサブプロセス無しのスクリプト実装に差し替えられる。

pub mod info;
mod session;

use std::path::PathBuf;

pub use session::{
    ENGINE_QUIT_POLL_INTERVAL, ENGINE_QUIT_TIMEOUT, ENGINE_READY_TIMEOUT, EngineSession,
    parse_option_name,
};

use crate::error::Result;
use crate::score::Score;

/// エンジンが報告した候補手 1 つ
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub mv: String,
    /// 手番側視点のスコア
    pub score: Score,
    pub depth: u32,
    pub pv: Vec<String>,
}

impl Candidate {
    /// 内部スケールの評価値
    pub fn raw(&self) -> i32 {
        self.score.to_raw()
    }
}

/// 1 局面の解析結果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Analysis {
    /// エンジンの順位順（最善が先頭）、指し手の重複なし
    pub candidates: Vec<Candidate>,
    /// pv を伴わない info 行のスコア（詰み・ステイルメイト局面で出る）
    pub position_score: Option<Score>,
    /// 先頭の指し手が上位と重複して捨てた行の数
    pub duplicates: usize,
}

impl Analysis {
    /// 合法手が無い局面か
    pub fn is_terminal(&self) -> bool {
        self.candidates.is_empty()
    }

    /// エンジンが報告した順位の数（重複で捨てた行を含む）
    pub fn reported(&self) -> usize {
        self.candidates.len() + self.duplicates
    }
}

/// エンジンプロセス起動時の設定
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOptions {
    pub path: PathBuf,
    pub args: Vec<String>,
    /// `UCI_Variant`
    pub variant: String,
    pub threads: usize,
    pub hash_mb: u32,
    pub multipv: usize,
    /// Fairy-Stockfish の `load <variants.ini>`
    pub variants_file: Option<PathBuf>,
    /// NNUE 評価関数ファイル。指定が無ければ `Use NNUE false`。
    pub eval_file: Option<PathBuf>,
    /// 追加の UCI オプション (Name=Value 形式)
    pub extra_options: Vec<String>,
    /// 送受信した生のプロトコル行を追記するファイル
    pub raw_log: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("stockfish"),
            args: Vec::new(),
            variant: "chess".to_string(),
            threads: 4,
            hash_mb: 8192,
            multipv: 3,
            variants_file: None,
            eval_file: None,
            extra_options: Vec::new(),
            raw_log: None,
        }
    }
}

/// 探索ループから見たエンジン
pub trait Analyzer {
    /// 初期局面の FEN
    fn start_fen(&mut self) -> Result<String>;

    /// `fen` で `mv` を指した後の FEN
    fn fen_after(&mut self, fen: &str, mv: &str) -> Result<String>;

    /// `fen` を `depth` まで探索し、最大 `multipv` 個の候補手を返す。
    fn analyze(&mut self, fen: &str, depth: u32, multipv: usize) -> Result<Analysis>;

    /// エンジンを終了する。複数回呼んでもよい。
    fn shutdown(&mut self);
}
