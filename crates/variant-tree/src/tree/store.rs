//! ノードのアリーナとツリー操作
//!
//! ノードは ID で添字付けされた `Vec` に格納する。ID は作成順に割り当てられ、
//! 削除しないので常に `0..next_id` が密に埋まる。子の ID は必ず親より大きい。

use log::debug;

use super::node::{Node, NodeId, ROOT};
use crate::error::{Error, Result};
use crate::score::{self, ChildEval};

/// 局面ツリー
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeStore {
    nodes: Vec<Node>,
    analyses: u64,
}

impl TreeStore {
    /// ルートのみのツリーを作る。
    pub fn new(root_fen: impl Into<String>) -> Self {
        Self {
            nodes: vec![Node::new(ROOT, None, root_fen.into(), None)],
            analyses: 0,
        }
    }

    /// 保存済みフィールドからツリーを組み立てる。
    ///
    /// 構造（ID の密性・親子関係）を検査し、親リンクと派生フィールドを
    /// 末端から再計算する。保存された評価値・最善子・長さが子から再計算した
    /// 値と食い違えば壊れたファイルとして扱う。
    pub(crate) fn from_parts(mut nodes: Vec<Node>, analyses: u64) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::format(0, "tree has no root"));
        }
        for (idx, node) in nodes.iter().enumerate() {
            if node.id != idx {
                return Err(Error::format(0, format!("node ids are not dense at {}", node.id)));
            }
        }
        if nodes[ROOT].move_from_parent.is_some() {
            return Err(Error::format(0, "root must not have a move"));
        }
        let len = nodes.len();
        let mut parents: Vec<Option<NodeId>> = vec![None; len];
        for node in &nodes {
            for &child in &node.children {
                if child <= node.id || child >= len {
                    return Err(Error::format(
                        0,
                        format!("node {} has invalid child {}", node.id, child),
                    ));
                }
                if parents[child].replace(node.id).is_some() {
                    return Err(Error::format(0, format!("node {child} has two parents")));
                }
            }
            if let Some(best) = node.best_child {
                if best >= node.children.len() {
                    return Err(Error::format(
                        0,
                        format!("node {} best index {} out of range", node.id, best),
                    ));
                }
            }
        }
        for (id, parent) in parents.iter().enumerate().skip(1) {
            if parent.is_none() {
                return Err(Error::format(0, format!("node {id} is unreachable")));
            }
        }
        for (node, parent) in nodes.iter_mut().zip(parents) {
            node.parent = parent;
        }

        let mut tree = Self { nodes, analyses };
        let stored: Vec<(Option<i32>, Option<usize>, u32)> =
            tree.nodes.iter().map(|n| (n.raw_score, n.best_child, n.length)).collect();
        for id in (0..len).rev() {
            tree.recompute_node(id)?;
        }
        for (node, (raw, best, length)) in tree.nodes.iter().zip(stored) {
            if node.raw_score != raw || node.best_child != best || node.length != length {
                return Err(Error::format(
                    0,
                    format!(
                        "node {}: stored raw/best/length {:?}/{:?}/{} do not match children \
                         ({:?}/{:?}/{})",
                        node.id, raw, best, length, node.raw_score, node.best_child, node.length
                    ),
                ));
            }
        }
        Ok(tree)
    }

    pub fn root(&self) -> &Node {
        &self.nodes[ROOT]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id).ok_or(Error::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id).ok_or(Error::UnknownNode(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// ルートが常に存在するので空にはならない
    pub fn is_empty(&self) -> bool {
        false
    }

    /// 次に割り当てる ID
    pub fn next_id(&self) -> NodeId {
        self.nodes.len()
    }

    /// エンジン解析の累計回数
    pub fn analyses(&self) -> u64 {
        self.analyses
    }

    /// 解析回数を 1 進めて新しい通し番号を返す
    pub fn record_analysis(&mut self) -> u64 {
        self.analyses += 1;
        self.analyses
    }

    /// `parent` の子として新しいノードを作る。
    pub fn create_node(
        &mut self,
        parent: NodeId,
        mv: impl Into<String>,
        fen: impl Into<String>,
    ) -> Result<NodeId> {
        if parent >= self.nodes.len() {
            return Err(Error::InvalidParent(parent));
        }
        let id = self.nodes.len();
        self.nodes.push(Node::new(id, Some(parent), fen.into(), Some(mv.into())));
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    /// 未展開ノードにエンジン評価値を記録する。
    ///
    /// `is_terminal` なら合法手が無いので complete にする。
    pub fn set_evaluation(&mut self, id: NodeId, raw: i32, is_terminal: bool) -> Result<()> {
        let node = self.node_mut(id)?;
        if !node.children.is_empty() {
            return Err(Error::AlreadyExpanded(id));
        }
        node.raw_score = Some(raw);
        if is_terminal {
            node.complete = true;
        }
        self.recompute_node(id)?;
        Ok(())
    }

    /// これ以上の候補手が無いことを記録する。
    pub fn mark_complete(&mut self, id: NodeId) -> Result<()> {
        self.node_mut(id)?.complete = true;
        Ok(())
    }

    /// 直下の子だけから評価値・最善子・長さを計算し直す。
    ///
    /// 値が変わったら `true`。
    pub fn recompute_node(&mut self, id: NodeId) -> Result<bool> {
        let node = self.node(id)?;
        let (raw, best, length, adjusted, exhausted) = if node.children.is_empty() {
            let raw = node.raw_score;
            (raw, None, 0, score::adjust(raw.unwrap_or(0), 0), node.complete)
        } else {
            let evals: Vec<ChildEval> = node
                .children
                .iter()
                .map(|&c| ChildEval {
                    adjusted: self.nodes[c].adjusted_score,
                    length: self.nodes[c].length,
                })
                .collect();
            let Some(agg) = score::negamax_aggregate(&evals) else {
                return Ok(false);
            };
            let best_child = &self.nodes[node.children[agg.best_index]];
            let raw = score::backup(best_child.raw_score.unwrap_or(0));
            let exhausted = node.complete && node.children.iter().all(|&c| self.nodes[c].exhausted);
            (
                Some(raw),
                Some(agg.best_index),
                agg.length,
                score::adjust(raw, agg.length),
                exhausted,
            )
        };

        let node = &mut self.nodes[id];
        let changed = node.raw_score != raw
            || node.best_child != best
            || node.length != length
            || node.adjusted_score != adjusted
            || node.exhausted != exhausted;
        node.raw_score = raw;
        node.best_child = best;
        node.length = length;
        node.adjusted_score = adjusted;
        node.exhausted = exhausted;
        Ok(changed)
    }

    /// `id` を再計算し、続けて祖先を値が変わらなくなるまで再計算する。
    ///
    /// `id` 自身は変化の有無に関わらず親へ進む（`set_evaluation` 済みの場合がある）。
    /// 再計算したノード数を返す。
    pub fn propagate_from(&mut self, id: NodeId) -> Result<usize> {
        self.recompute_node(id)?;
        let mut visited = 1;
        let mut current = self.nodes[id].parent;
        while let Some(cur) = current {
            visited += 1;
            if !self.recompute_node(cur)? {
                debug!("propagation settled at node {cur}");
                break;
            }
            current = self.nodes[cur].parent;
        }
        Ok(visited)
    }

    /// ルートから最善子をたどり、次に展開すべきノードまでの経路を返す。
    ///
    /// 止まるのは子の無いノード、下位候補を調べ直すべきノード、子がすべて
    /// 調べ尽くされた未完了ノードのいずれか。調べ尽くされた子は避けて
    /// 次善の子へ進む。ツリー全体が調べ尽くされていれば `None`。
    pub fn path_to_best_leaf(&self) -> Option<Vec<NodeId>> {
        if self.root().exhausted {
            return None;
        }
        let mut path = vec![ROOT];
        let mut node = self.root();
        loop {
            if node.is_leaf() || node.has_open_slot() {
                return Some(path);
            }
            let next = match node.best_child_id() {
                Some(id) if !self.nodes[id].exhausted => Some(id),
                _ => self.best_unexhausted_child(node),
            };
            match next {
                Some(id) => {
                    path.push(id);
                    node = &self.nodes[id];
                }
                None => return Some(path),
            }
        }
    }

    fn best_unexhausted_child(&self, node: &Node) -> Option<NodeId> {
        let open: Vec<NodeId> =
            node.children.iter().copied().filter(|&c| !self.nodes[c].exhausted).collect();
        let evals: Vec<ChildEval> = open
            .iter()
            .map(|&c| ChildEval {
                adjusted: self.nodes[c].adjusted_score,
                length: self.nodes[c].length,
            })
            .collect();
        score::negamax_aggregate(&evals).map(|agg| open[agg.best_index])
    }

    /// `parent` の子のうち指し手 `mv` のもの
    pub fn child_by_move(&self, parent: NodeId, mv: &str) -> Option<NodeId> {
        let node = self.nodes.get(parent)?;
        node.children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].move_from_parent.as_deref() == Some(mv))
    }

    /// ルートから `id` までの指し手列
    pub fn line_to(&self, id: NodeId) -> Vec<&str> {
        let mut moves = Vec::new();
        let mut cur = self.nodes.get(id);
        while let Some(node) = cur {
            if let Some(mv) = node.move_from_parent.as_deref() {
                moves.push(mv);
            }
            cur = node.parent.and_then(|p| self.nodes.get(p));
        }
        moves.reverse();
        moves
    }

    /// ルートからの最善手順
    pub fn principal_variation(&self) -> Vec<&str> {
        let mut moves = Vec::new();
        let mut node = self.root();
        while let Some(child) = node.best_child_id() {
            node = &self.nodes[child];
            if let Some(mv) = node.move_from_parent.as_deref() {
                moves.push(mv);
            }
        }
        moves
    }

    /// 各ノードの長さ・最善子・評価値が子と整合しているかを調べ、違反を列挙する。
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut out = Vec::new();
        for node in &self.nodes {
            if node.children.is_empty() {
                if node.length != 0 || node.best_child.is_some() {
                    out.push(format!(
                        "leaf {} has length {} / best {:?}",
                        node.id, node.length, node.best_child
                    ));
                }
                continue;
            }
            let evals: Vec<ChildEval> = node
                .children
                .iter()
                .map(|&c| ChildEval {
                    adjusted: self.nodes[c].adjusted_score,
                    length: self.nodes[c].length,
                })
                .collect();
            let Some(agg) = score::negamax_aggregate(&evals) else {
                continue;
            };
            if node.best_child != Some(agg.best_index) {
                out.push(format!(
                    "node {} best {:?}, expected {}",
                    node.id, node.best_child, agg.best_index
                ));
                continue;
            }
            let best = &self.nodes[node.children[agg.best_index]];
            if node.length != best.length + 1 {
                out.push(format!("node {} length {} != 1 + {}", node.id, node.length, best.length));
            }
            let expected_raw = score::backup(best.raw_score.unwrap_or(0));
            if node.raw_score != Some(expected_raw)
                || node.adjusted_score != score::adjust(expected_raw, node.length)
            {
                out.push(format!("node {} score is stale", node.id));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::MATE;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn expand(tree: &mut TreeStore, parent: NodeId, cands: &[(&str, i32)]) -> Vec<NodeId> {
        let ids = cands
            .iter()
            .map(|(mv, raw)| {
                let id = tree.create_node(parent, *mv, format!("{START} {mv}")).unwrap();
                tree.set_evaluation(id, score::to_child(*raw), false).unwrap();
                id
            })
            .collect();
        tree.propagate_from(parent).unwrap();
        ids
    }

    #[test]
    fn create_node_rejects_unknown_parent() {
        let mut tree = TreeStore::new(START);
        assert!(matches!(tree.create_node(5, "e2e4", START), Err(Error::InvalidParent(5))));
        let id = tree.create_node(ROOT, "e2e4", START).unwrap();
        assert_eq!(id, 1);
        assert_eq!(tree.next_id(), 2);
        assert_eq!(tree.node(id).unwrap().parent, Some(ROOT));
    }

    #[test]
    fn set_evaluation_only_on_unexpanded_nodes() {
        let mut tree = TreeStore::new(START);
        expand(&mut tree, ROOT, &[("e2e4", 30)]);
        assert!(matches!(tree.set_evaluation(ROOT, 10, false), Err(Error::AlreadyExpanded(0))));
        tree.set_evaluation(1, -20, true).unwrap();
        let leaf = tree.node(1).unwrap();
        assert!(leaf.is_terminal());
        assert!(leaf.exhausted);
    }

    #[test]
    fn root_picks_best_candidate_after_sign_flip() {
        let mut tree = TreeStore::new(START);
        let ids = expand(&mut tree, ROOT, &[("e2e4", 50), ("d2d4", 10), ("a2a3", -5)]);
        assert_eq!(ids, vec![1, 2, 3]);
        let root = tree.root();
        assert_eq!(root.best_child, Some(0));
        assert_eq!(root.length, 1);
        assert_eq!(root.raw_score, Some(50));
        assert_eq!(tree.node(1).unwrap().raw_score, Some(-50));
        assert_eq!(tree.principal_variation(), vec!["e2e4"]);
        assert!(tree.invariant_violations().is_empty());
    }

    #[test]
    fn recompute_is_idempotent() {
        let mut tree = TreeStore::new(START);
        expand(&mut tree, ROOT, &[("e2e4", 50), ("d2d4", 10)]);
        expand(&mut tree, 1, &[("e7e5", 20), ("c7c5", 15)]);
        let before = tree.clone();
        assert!(!tree.recompute_node(ROOT).unwrap());
        assert!(!tree.recompute_node(1).unwrap());
        assert_eq!(tree, before);
    }

    #[test]
    fn refutation_moves_best_child_and_length() {
        let mut tree = TreeStore::new(START);
        expand(&mut tree, ROOT, &[("e2e4", 50), ("d2d4", 40)]);
        // e2e4 への応手で黒が +200 → 白にとって -200
        expand(&mut tree, 1, &[("e7e5", 200)]);
        let root = tree.root();
        assert_eq!(root.best_child, Some(1));
        assert_eq!(root.length, 1);
        assert_eq!(tree.principal_variation(), vec!["d2d4"]);
        assert!(tree.invariant_violations().is_empty());
    }

    #[test]
    fn propagation_stops_when_nothing_changes() {
        let mut tree = TreeStore::new(START);
        expand(&mut tree, ROOT, &[("e2e4", 50), ("d2d4", 10)]);
        expand(&mut tree, 2, &[("d7d5", 0)]);
        // d2d4 側の変化は最善手順に影響しないのでルートまで届かない
        assert!(!tree.recompute_node(ROOT).unwrap());
        assert_eq!(tree.propagate_from(2).unwrap(), 2);
    }

    #[test]
    fn path_follows_best_children_and_open_slots() {
        let mut tree = TreeStore::new(START);
        assert_eq!(tree.path_to_best_leaf(), Some(vec![ROOT]));
        expand(&mut tree, ROOT, &[("e2e4", 50), ("d2d4", 40)]);
        assert_eq!(tree.path_to_best_leaf(), Some(vec![ROOT, 1]));
        // e2e4 が否定されて最下位の d2d4 が最善 → ルートの下位候補を調べ直す
        expand(&mut tree, 1, &[("e7e5", 200)]);
        assert!(tree.root().has_open_slot());
        assert_eq!(tree.path_to_best_leaf(), Some(vec![ROOT]));
    }

    #[test]
    fn exhausted_subtrees_are_skipped() {
        let mut tree = TreeStore::new(START);
        expand(&mut tree, ROOT, &[("e2e4", MATE - 1), ("d2d4", 10)]);
        tree.mark_complete(ROOT).unwrap();
        // e2e4 の先は詰み（合法手なし）
        tree.set_evaluation(1, -MATE, true).unwrap();
        tree.propagate_from(1).unwrap();
        assert_eq!(tree.root().best_child, Some(0));
        assert_eq!(tree.path_to_best_leaf(), Some(vec![ROOT, 2]));

        tree.set_evaluation(2, 0, true).unwrap();
        tree.propagate_from(2).unwrap();
        assert!(tree.root().exhausted);
        assert_eq!(tree.path_to_best_leaf(), None);
    }

    #[test]
    fn line_to_and_child_by_move() {
        let mut tree = TreeStore::new(START);
        expand(&mut tree, ROOT, &[("e2e4", 50)]);
        expand(&mut tree, 1, &[("c7c5", -20)]);
        assert_eq!(tree.child_by_move(ROOT, "e2e4"), Some(1));
        assert_eq!(tree.child_by_move(ROOT, "d2d4"), None);
        assert_eq!(tree.line_to(2), vec!["e2e4", "c7c5"]);
    }
}
