//! 展開サイクル
//!
//! 1 サイクルで葉を 1 つ選び、エンジンの候補手を子ノードとして追加し、
//! 評価値の変化を祖先へ伝播する。

use log::{debug, info, warn};

use crate::analysis_log::AnalysisLog;
use crate::engine::{Analysis, Analyzer};
use crate::error::{Error, Result};
use crate::score;
use crate::tree::{NodeId, TreeStore};

/// 1 サイクルの結果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// `node` を解析した
    Expanded {
        node: NodeId,
        /// 新しく作った子ノード数
        added: usize,
        /// 今回 complete になったか
        completed: bool,
        /// 解析の通し番号
        analysis: u64,
    },
    /// ツリー全体が調べ尽くされた
    Done,
}

/// 探索の設定値
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExplorerSettings {
    pub depth: u32,
    pub multipv: usize,
}

/// 選択 → 展開を繰り返す探索器
pub struct Explorer<A: Analyzer> {
    analyzer: A,
    settings: ExplorerSettings,
    analysis_log: Option<AnalysisLog>,
}

/// 追加予定の子ノード
struct PendingChild {
    mv: String,
    raw: i32,
    fen: String,
}

impl<A: Analyzer> Explorer<A> {
    pub fn new(analyzer: A, settings: ExplorerSettings) -> Self {
        Self {
            analyzer,
            settings,
            analysis_log: None,
        }
    }

    /// 解析のたびに記録を追記するファイルを設定する。
    pub fn with_analysis_log(mut self, log: AnalysisLog) -> Self {
        self.analysis_log = Some(log);
        self
    }

    pub fn analyzer_mut(&mut self) -> &mut A {
        &mut self.analyzer
    }

    /// 1 サイクル実行する。
    ///
    /// エンジンの失敗はツリーを変更する前に返すので、途中まで展開された
    /// ノードは残らない。
    pub fn step(&mut self, tree: &mut TreeStore) -> Result<Step> {
        let Some(path) = tree.path_to_best_leaf() else {
            return Ok(Step::Done);
        };
        let Some(&target) = path.last() else {
            return Ok(Step::Done);
        };
        let node = tree.node(target)?;
        let fen = node.fen.clone();
        let leaf_score = node.raw_score;
        let existing = node.children.len();
        let widening = existing > 0;
        let requested = existing + self.settings.multipv;

        let analysis = self.analyzer.analyze(&fen, self.settings.depth, requested)?;
        let terminal = if analysis.is_terminal() {
            Some(Self::terminal_score(tree, target, &fen, &analysis)?)
        } else {
            None
        };
        let pending = self.collect_children(tree, target, &fen, &analysis)?;

        let seq = tree.record_analysis();
        let added = pending.len();
        let completed = if let Some(score) = terminal {
            match score {
                Some(raw) => tree.set_evaluation(target, raw, true)?,
                // 既に子がある局面で候補手が消えることは無いはずだが、
                // 少なくとも同じ局面を選び続けないようにする
                None => tree.mark_complete(target)?,
            }
            true
        } else {
            for child in pending {
                let id = tree.create_node(target, child.mv, child.fen)?;
                tree.set_evaluation(id, child.raw, false)?;
            }
            // 要求数に届かなければ合法手が尽きている。広げても新しい手が
            // 出なければそれ以上は無い。重複で捨てた行は報告された数に含める。
            let completed = analysis.reported() < requested || (widening && added == 0);
            if completed {
                tree.mark_complete(target)?;
            }
            completed
        };
        let visited = tree.propagate_from(target)?;

        self.log_step(tree, seq, target, &analysis, requested, visited);
        if let Some(log) = self.analysis_log.as_mut() {
            let line = tree.line_to(target);
            if let Err(e) = log.record(seq, leaf_score, &line, &analysis) {
                warn!("{e}");
            }
        }
        Ok(Step::Expanded {
            node: target,
            added,
            completed,
            analysis: seq,
        })
    }

    /// 候補手のうち未登録のものについて、子局面の FEN を先に取得しておく。
    fn collect_children(
        &mut self,
        tree: &TreeStore,
        target: NodeId,
        fen: &str,
        analysis: &Analysis,
    ) -> Result<Vec<PendingChild>> {
        let mut pending = Vec::new();
        for cand in &analysis.candidates {
            if tree.child_by_move(target, &cand.mv).is_some() {
                continue;
            }
            let child_fen = self.analyzer.fen_after(fen, &cand.mv)?;
            pending.push(PendingChild {
                mv: cand.mv.clone(),
                raw: score::to_child(cand.raw()),
                fen: child_fen,
            });
        }
        Ok(pending)
    }

    /// 終局した葉の評価値。既に子があるノードなら `None`。
    fn terminal_score(
        tree: &TreeStore,
        target: NodeId,
        fen: &str,
        analysis: &Analysis,
    ) -> Result<Option<i32>> {
        if !tree.node(target)?.is_leaf() {
            return Ok(None);
        }
        let score = analysis.position_score.ok_or_else(|| {
            Error::EngineProtocol(format!("no score reported for terminal position {fen}"))
        })?;
        Ok(Some(score.to_raw()))
    }

    fn log_step(
        &self,
        tree: &TreeStore,
        seq: u64,
        target: NodeId,
        analysis: &Analysis,
        requested: usize,
        visited: usize,
    ) {
        let line = tree.line_to(target).join(" ");
        let line = if line.is_empty() { "(root)".to_string() } else { line };
        match analysis.candidates.first() {
            Some(best) => info!(
                "#{seq} {line} | {} | {} pv {} | {}/{} candidates",
                tree.get(target).map(|n| n.children.len()).unwrap_or(0),
                score::describe(best.raw()),
                best.pv.join(" "),
                analysis.candidates.len(),
                requested
            ),
            None => info!(
                "#{seq} {line} | terminal {}",
                analysis
                    .position_score
                    .map(|s| score::describe(s.to_raw()))
                    .unwrap_or_else(|| "-".to_string())
            ),
        }
        for (i, cand) in analysis.candidates.iter().enumerate() {
            debug!("alt{} {} {}", i + 1, cand.mv, score::describe(cand.raw()));
        }
        debug!(
            "propagated through {visited} node(s), root {} pv {}",
            tree.root().raw_score.map(score::describe).unwrap_or_else(|| "-".to_string()),
            tree.principal_variation().join(" ")
        );
    }
}
