//! variant-tree: UCI エンジンで局面ツリーを少しずつ育てるツール
//!
//! 最も有望な未展開局面をエンジンに解析させ、候補手を子ノードとして追加し、
//! 距離補正した評価値を negamax でルートまで伝播する。ツリーはファイルに
//! 保存され、中断しても次回の起動で続きから再開できる。
//!
//! - [`score`]: 評価値の補正と集約（I/O なし）
//! - [`tree`]: ノードのアリーナと保存形式
//! - [`engine`]: UCI エンジンとの入出力
//! - [`explorer`]: 選択 → 展開のサイクル
//! - [`lifecycle`]: 自動保存・停止・終了処理
//! - [`analysis_log`]: 解析ごとの記録ファイル
//! - [`config`]: 実行設定

pub mod analysis_log;
pub mod config;
pub mod engine;
pub mod error;
pub mod explorer;
pub mod lifecycle;
pub mod score;
pub mod tree;

pub use error::{Error, Result};
