//! エラー型
//!
//! ツリー操作の誤用（プログラムの不変条件違反）、エンジン境界での失敗、
//! 永続化の失敗を 1 つの列挙型で扱う。

use std::path::PathBuf;

use crate::tree::NodeId;

/// variant-tree 全体のエラー
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// 存在しない親ノードに子を追加しようとした
    #[error("invalid parent node {0}")]
    InvalidParent(NodeId),

    /// 子を持つノードに評価値を上書きしようとした
    #[error("node {0} is already expanded")]
    AlreadyExpanded(NodeId),

    /// 存在しないノード ID を参照した
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// エンジンを起動できなかった（バイナリが無い・実行できない）
    #[error("engine unavailable at {path}: {source}")]
    EngineUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// エンジン応答が不正、または期待した応答が期限内に来なかった
    #[error("engine protocol error: {0}")]
    EngineProtocol(String),

    /// エンジンプロセスが予期せず終了した
    #[error("engine crashed: {0}")]
    EngineCrashed(String),

    /// 前回の探索が bestmove を返さないまま次の探索を要求された
    #[error("engine is busy with an unfinished search")]
    EngineBusy,

    /// スナップショットの読み書きに失敗した
    #[error("failed to {operation} {path}: {source}")]
    Persistence {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 保存ファイルの内容が壊れている
    #[error("malformed tree file at line {line}: {message}")]
    Format { line: usize, message: String },

    /// 設定値が不正
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// エンジン境界の失敗か（探索ループを止めて保存・終了すべきもの）
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            Error::EngineUnavailable { .. }
                | Error::EngineProtocol(_)
                | Error::EngineCrashed(_)
                | Error::EngineBusy
        )
    }

    /// 不変条件違反（正しい状態遷移では起こり得ない）か
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidParent(_) | Error::AlreadyExpanded(_) | Error::UnknownNode(_)
        )
    }

    pub(crate) fn format(line: usize, message: impl Into<String>) -> Self {
        Error::Format {
            line,
            message: message.into(),
        }
    }
}

/// variant-tree の Result 型
pub type Result<T> = std::result::Result<T, Error>;
