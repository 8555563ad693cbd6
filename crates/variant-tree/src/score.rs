//! 評価値モデル
//!
//! エンジンの生評価値（手番側視点の centipawn または詰み）を整数スケールに
//! 載せ、末端までの距離による補正と negamax 集約を行う。I/O は一切持たない。
//!
//! スケールは YaneuraOu / rshogi-core の `Value` と同じく `MATE` 付近を詰みに
//! 予約し、詰みスコアは「詰みまでの手数（ply）」を `MATE - ply` として保持する。

/// 詰み（勝ち側の最大スコア）
pub const MATE: i32 = 32000;

/// 詰みスコアとして表現できる最大手数
pub const MAX_MATE_PLY: i32 = 1000;

/// これ以上の絶対値は詰みスコア
pub const MATE_IN_MAX_PLY: i32 = MATE - MAX_MATE_PLY;

/// centipawn 評価値が取り得る絶対値の上限（詰み帯には入らない）
pub const CP_LIMIT: i32 = MATE_IN_MAX_PLY - 1;

/// エンジンが info 行で報告するスコア
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Score {
    /// `score cp <x>`
    Cp(i32),
    /// `score mate <n>`（n は手数ではなく「手」。正なら手番側が詰ます）
    Mate(i32),
}

impl Score {
    /// 内部の整数スケールに変換する。
    ///
    /// `mate n`（n > 0）は `2n - 1` ply で詰ますので `MATE - (2n - 1)`、
    /// `mate -n` は `2n` ply で詰まされるので `-(MATE - 2n)`。
    pub fn to_raw(self) -> i32 {
        match self {
            Score::Cp(cp) => clamp_cp(i64::from(cp)),
            Score::Mate(n) if n > 0 => {
                let ply = n.saturating_mul(2).saturating_sub(1).min(MAX_MATE_PLY);
                MATE - ply
            }
            Score::Mate(n) => {
                let ply = n.saturating_mul(-2).min(MAX_MATE_PLY);
                -(MATE - ply)
            }
        }
    }

    pub fn is_mate(self) -> bool {
        matches!(self, Score::Mate(_))
    }
}

/// 詰みスコアか
#[inline]
pub fn is_mate_score(raw: i32) -> bool {
    raw.abs() >= MATE_IN_MAX_PLY
}

/// 詰みまでの ply 数（詰みスコアでなければ `None`）
#[inline]
pub fn mate_ply(raw: i32) -> Option<i32> {
    if is_mate_score(raw) {
        Some(MATE - raw.abs())
    } else {
        None
    }
}

#[inline]
fn clamp_cp(v: i64) -> i32 {
    v.clamp(-i64::from(CP_LIMIT), i64::from(CP_LIMIT)) as i32
}

/// 親局面での候補手スコアを、その手を指した後の子局面（相手手番）の視点に変換する。
///
/// 符号を反転し、詰みは 1 ply 近づける。
pub fn to_child(raw: i32) -> i32 {
    if raw >= MATE_IN_MAX_PLY {
        -(raw + 1).min(MATE)
    } else if raw <= -MATE_IN_MAX_PLY {
        (-raw + 1).min(MATE)
    } else {
        -raw
    }
}

/// 子局面の評価値を親局面の手番側視点に戻す（`to_child` の逆）。
///
/// 符号を反転し、詰みは 1 ply 遠ざける。
pub fn backup(child_raw: i32) -> i32 {
    let v = -child_raw;
    if v >= MATE_IN_MAX_PLY {
        (v - 1).max(MATE_IN_MAX_PLY)
    } else if v <= -MATE_IN_MAX_PLY {
        (v + 1).min(-MATE_IN_MAX_PLY)
    } else {
        v
    }
}

/// 末端までの距離で評価値を補正する。
///
/// `raw + length * log2(|raw| + 1) * sign(raw)` を四捨五入し、centipawn 帯に収める。
/// 0 は補正しない。詰みスコアは既に正確な ply 距離を持っているのでそのまま返す。
pub fn adjust(raw: i32, length: u32) -> i32 {
    if raw == 0 || length == 0 || is_mate_score(raw) {
        return raw;
    }
    let magnitude = f64::from(raw.unsigned_abs());
    let bonus = (f64::from(length) * (magnitude + 1.0).log2()).round() as i64;
    clamp_cp(i64::from(raw) + bonus * i64::from(raw.signum()))
}

/// 集約に使う子ノードの要約
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildEval {
    pub adjusted: i32,
    pub length: u32,
}

/// negamax 集約の結果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Aggregate {
    /// 最善子のインデックス
    pub best_index: usize,
    /// 親の手番側から見た最善値 `max(-child.adjusted)`
    pub value: i32,
    /// `1 + length(best)`
    pub length: u32,
}

/// 親の手番側が `-child.adjusted` を最大化する子を選ぶ。
///
/// 同値なら `length` の短い方、それも同じなら先に展開された方を選ぶ。
/// 子が無ければ `None`。
pub fn negamax_aggregate(children: &[ChildEval]) -> Option<Aggregate> {
    let mut best: Option<(usize, ChildEval)> = None;
    for (idx, child) in children.iter().enumerate() {
        let better = match best {
            None => true,
            Some((_, cur)) => {
                let (cand, champ) = (-i64::from(child.adjusted), -i64::from(cur.adjusted));
                cand > champ || (cand == champ && child.length < cur.length)
            }
        };
        if better {
            best = Some((idx, *child));
        }
    }
    best.map(|(best_index, child)| Aggregate {
        best_index,
        value: child.adjusted.saturating_neg(),
        length: child.length.saturating_add(1),
    })
}

/// ログ表示用。`cp +35` / `mate +3` / `mate -2` の形に戻す。
pub fn describe(raw: i32) -> String {
    match mate_ply(raw) {
        Some(ply) if raw > 0 => format!("mate +{}", (ply + 1) / 2),
        Some(ply) => format!("mate -{}", ply / 2),
        None => format!("cp {raw:+}"),
    }
}
