//! ツリーのノード

/// ノード ID。0 は常にルート。再利用しない。
pub type NodeId = usize;

/// ルートノードの ID
pub const ROOT: NodeId = 0;

/// 探索済み、または評価待ちの 1 局面
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    /// 親ノード（保存しない。読み込み時に子リストから復元する）
    pub parent: Option<NodeId>,
    pub fen: String,
    /// 親からこの局面に至る指し手。ルートのみ `None`。
    pub move_from_parent: Option<String>,
    /// 手番側視点の評価値。未評価なら `None`。
    pub raw_score: Option<i32>,
    /// 距離補正後の比較用評価値（保存しない）
    pub adjusted_score: i32,
    /// 最善継続の末端までの ply 数
    pub length: u32,
    pub best_child: Option<usize>,
    /// 展開順（= エンジンの候補順位順）の子ノード
    pub children: Vec<NodeId>,
    /// 全合法手が子として記録済み
    pub complete: bool,
    /// 自分と全子孫が complete（保存しない）
    pub exhausted: bool,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        parent: Option<NodeId>,
        fen: String,
        move_from_parent: Option<String>,
    ) -> Self {
        Self {
            id,
            parent,
            fen,
            move_from_parent,
            raw_score: None,
            adjusted_score: 0,
            length: 0,
            best_child: None,
            children: Vec::new(),
            complete: false,
            exhausted: false,
        }
    }

    /// 合法手が 1 つも無い局面
    pub fn is_terminal(&self) -> bool {
        self.complete && self.children.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// 最善子 ID
    pub fn best_child_id(&self) -> Option<NodeId> {
        self.best_child.and_then(|idx| self.children.get(idx).copied())
    }

    /// 未報告の下位候補手を調べ直す価値があるか。
    ///
    /// 上位候補がすべて否定され、最下位の候補が最善になった未完了ノード。
    pub fn has_open_slot(&self) -> bool {
        !self.complete
            && !self.children.is_empty()
            && self.best_child == Some(self.children.len() - 1)
    }
}
