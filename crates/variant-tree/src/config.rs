//! 実行設定
//!
//! TOML ファイルから読み込み、コマンドライン引数で上書きする。
//! 未指定の項目は既定値（Stockfish、chess、depth 30、MultiPV 3）になる。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::engine::EngineOptions;
use crate::error::{Error, Result};
use crate::explorer::ExplorerSettings;

/// 探索全体の設定
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExplorerConfig {
    /// 変種名（`UCI_Variant` と保存先のファイル名に使う）
    pub variant: String,
    pub engine_path: PathBuf,
    pub engine_args: Vec<String>,
    pub threads: usize,
    pub hash_mb: u32,
    /// 1 回の解析で新しく求める候補手数
    pub multipv: usize,
    pub depth: u32,
    /// ツリーファイルを置くディレクトリ
    pub dir: PathBuf,
    pub variants_file: Option<PathBuf>,
    pub eval_file: Option<PathBuf>,
    /// 追加の UCI オプション (Name=Value 形式)
    pub extra_options: Vec<String>,
    /// 初期局面。未指定ならエンジンの startpos。
    pub start_fen: Option<String>,
    /// 時間による自動保存の間隔（秒）。0 で無効。
    pub autosave_secs: u64,
    /// 解析回数による自動保存の間隔。0 で無効。
    pub autosave_every: u64,
    /// ツリーファイルの隣に `.log` として解析記録を追記する
    pub analysis_log: bool,
    pub raw_log: Option<PathBuf>,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        let engine = EngineOptions::default();
        Self {
            variant: engine.variant,
            engine_path: engine.path,
            engine_args: engine.args,
            threads: engine.threads,
            hash_mb: engine.hash_mb,
            multipv: engine.multipv,
            depth: 30,
            dir: PathBuf::from("."),
            variants_file: None,
            eval_file: None,
            extra_options: Vec::new(),
            start_fen: None,
            autosave_secs: 300,
            autosave_every: 1,
            analysis_log: true,
            raw_log: None,
        }
    }
}

impl ExplorerConfig {
    /// TOML ファイルから読み込む。書かれていない項目は既定値。
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::Persistence {
            operation: "read",
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// 値の範囲を検査する。
    pub fn validate(&self) -> Result<()> {
        if self.variant.trim().is_empty() {
            return Err(Error::Config("variant must not be empty".to_string()));
        }
        if self.variant.contains(['/', '\\']) {
            return Err(Error::Config(format!(
                "variant '{}' must not contain a path separator",
                self.variant
            )));
        }
        if self.multipv == 0 {
            return Err(Error::Config("multipv must be at least 1".to_string()));
        }
        if self.depth == 0 {
            return Err(Error::Config("depth must be at least 1".to_string()));
        }
        if self.threads == 0 {
            return Err(Error::Config("threads must be at least 1".to_string()));
        }
        for opt in &self.extra_options {
            if opt.trim().is_empty() {
                return Err(Error::Config("empty engine option".to_string()));
            }
        }
        Ok(())
    }

    /// ツリーの保存先 `<dir>/<variant>/<variant>_<depth>.tree`
    pub fn tree_path(&self) -> PathBuf {
        self.dir
            .join(&self.variant)
            .join(format!("{}_{}.tree", self.variant, self.depth))
    }

    /// 解析記録の保存先。ツリーファイルの拡張子を `.log` にしたもの。
    pub fn analysis_log_path(tree_path: &Path) -> PathBuf {
        tree_path.with_extension("log")
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        (self.autosave_secs > 0).then(|| Duration::from_secs(self.autosave_secs))
    }

    pub fn autosave_every(&self) -> Option<u64> {
        (self.autosave_every > 0).then_some(self.autosave_every)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            path: self.engine_path.clone(),
            args: self.engine_args.clone(),
            variant: self.variant.clone(),
            threads: self.threads,
            hash_mb: self.hash_mb,
            multipv: self.multipv,
            variants_file: self.variants_file.clone(),
            eval_file: self.eval_file.clone(),
            extra_options: self.extra_options.clone(),
            raw_log: self.raw_log.clone(),
        }
    }

    pub fn explorer_settings(&self) -> ExplorerSettings {
        ExplorerSettings {
            depth: self.depth,
            multipv: self.multipv,
        }
    }
}
