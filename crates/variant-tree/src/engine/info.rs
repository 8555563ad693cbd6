//! `info` 行の解析と集約

use std::collections::{BTreeMap, HashSet};

use log::warn;

use super::{Analysis, Candidate};
use crate::score::Score;

/// スコアの種類
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Bound {
    #[default]
    Exact,
    /// `lowerbound`（fail high 中の暫定値）
    Lower,
    /// `upperbound`（fail low 中の暫定値）
    Upper,
}

/// 1 本の `info` 行から取り出した値
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InfoLine {
    pub depth: Option<u32>,
    pub multipv: Option<usize>,
    pub score: Option<Score>,
    pub bound: Bound,
    pub pv: Vec<String>,
}

/// `info ...` 行を解析する。`info` 以外と `info string` は `None`。
pub fn parse_info_line(line: &str) -> Option<InfoLine> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first() != Some(&"info") || tokens.get(1) == Some(&"string") {
        return None;
    }
    let mut info = InfoLine::default();
    let mut i = 1;
    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                info.depth = tokens.get(i + 1).and_then(|v| v.parse().ok());
                i += 2;
            }
            "multipv" => {
                info.multipv = tokens.get(i + 1).and_then(|v| v.parse().ok());
                i += 2;
            }
            "score" => {
                let value = tokens.get(i + 2).and_then(|v| v.parse::<i32>().ok());
                info.score = match (tokens.get(i + 1).copied(), value) {
                    (Some("cp"), Some(v)) => Some(Score::Cp(v)),
                    (Some("mate"), Some(v)) => Some(Score::Mate(v)),
                    _ => None,
                };
                i += 3;
            }
            "lowerbound" => {
                info.bound = Bound::Lower;
                i += 1;
            }
            "upperbound" => {
                info.bound = Bound::Upper;
                i += 1;
            }
            "pv" => {
                info.pv.extend(tokens[i + 1..].iter().map(|s| s.to_string()));
                break;
            }
            _ => i += 1,
        }
    }
    Some(info)
}

#[derive(Clone, Debug)]
struct RankEntry {
    score: Score,
    depth: u32,
    exact: bool,
    pv: Vec<String>,
}

impl RankEntry {
    /// 同じ順位の既存行を置き換えるべきか。
    ///
    /// 確定値は暫定値（bound）より優先し、同じ種類なら深い方、同じ深さなら後着を採る。
    fn supersedes(&self, old: &RankEntry) -> bool {
        match (self.exact, old.exact) {
            (false, true) => false,
            (true, false) => true,
            _ => self.depth >= old.depth,
        }
    }
}

/// 1 回の `go` の間に届いた info 行を順位ごとにまとめる。
///
/// 順位の到着順は問わない。要求数を超える順位は無視する。
#[derive(Debug)]
pub struct InfoAggregate {
    limit: usize,
    lines: BTreeMap<usize, RankEntry>,
    position_score: Option<Score>,
}

impl InfoAggregate {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            lines: BTreeMap::new(),
            position_score: None,
        }
    }

    pub fn update(&mut self, info: InfoLine) {
        let Some(score) = info.score else {
            return;
        };
        if info.pv.is_empty() {
            self.position_score = Some(score);
            return;
        }
        let rank = info.multipv.unwrap_or(1);
        if rank == 0 || rank > self.limit {
            return;
        }
        let entry = RankEntry {
            score,
            depth: info.depth.unwrap_or(0),
            exact: info.bound == Bound::Exact,
            pv: info.pv,
        };
        match self.lines.get(&rank) {
            Some(old) if !entry.supersedes(old) => {}
            _ => {
                self.lines.insert(rank, entry);
            }
        }
    }

    /// 順位順の候補手に変換する。先頭の指し手が重複する行は上位のみ残す。
    pub fn into_analysis(self) -> Analysis {
        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(self.lines.len());
        let mut duplicates = 0;
        for (rank, entry) in self.lines {
            let Some(mv) = entry.pv.first().cloned() else {
                continue;
            };
            if !seen.insert(mv.clone()) {
                warn!("multipv {rank} repeats {mv}, dropped");
                duplicates += 1;
                continue;
            }
            candidates.push(Candidate {
                mv,
                score: entry.score,
                depth: entry.depth,
                pv: entry.pv,
            });
        }
        Analysis {
            candidates,
            position_score: self.position_score,
            duplicates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(agg: &mut InfoAggregate, lines: &[&str]) {
        for line in lines {
            if let Some(info) = parse_info_line(line) {
                agg.update(info);
            }
        }
    }

    #[test]
    fn parses_scores_bounds_and_pv() {
        let info = parse_info_line(
            "info depth 12 seldepth 18 multipv 2 score cp -35 upperbound nodes 1000 pv d7d5 c2c4",
        )
        .unwrap();
        assert_eq!(info.depth, Some(12));
        assert_eq!(info.multipv, Some(2));
        assert_eq!(info.score, Some(Score::Cp(-35)));
        assert_eq!(info.bound, Bound::Upper);
        assert_eq!(info.pv, vec!["d7d5", "c2c4"]);

        let mate = parse_info_line("info depth 0 score mate 0").unwrap();
        assert_eq!(mate.score, Some(Score::Mate(0)));
        assert!(mate.pv.is_empty());

        assert!(parse_info_line("info string NNUE evaluation enabled").is_none());
        assert!(parse_info_line("bestmove e2e4").is_none());
    }

    #[test]
    fn keeps_deepest_exact_line_per_rank_in_any_order() {
        let mut agg = InfoAggregate::new(3);
        feed(
            &mut agg,
            &[
                "info depth 10 multipv 2 score cp 20 pv d2d4 d7d5",
                "info depth 10 multipv 1 score cp 40 pv e2e4",
                "info depth 11 multipv 1 score cp 90 lowerbound pv e2e4",
                "info depth 11 multipv 3 score mate -4 pv a2a3",
                "info depth 11 multipv 2 score cp 15 pv d2d4 g8f6",
                "info depth 9 multipv 2 score cp 99 pv d2d4",
                "info depth 11 multipv 4 score cp 5 pv h2h3",
            ],
        );
        let analysis = agg.into_analysis();
        let moves: Vec<_> = analysis.candidates.iter().map(|c| c.mv.as_str()).collect();
        assert_eq!(moves, vec!["e2e4", "d2d4", "a2a3"]);
        assert_eq!(analysis.candidates[0].score, Score::Cp(40));
        assert_eq!(analysis.candidates[1].score, Score::Cp(15));
        assert_eq!(analysis.candidates[1].depth, 11);
        assert_eq!(analysis.candidates[2].score, Score::Mate(-4));
        assert!(!analysis.is_terminal());
    }

    #[test]
    fn duplicate_first_moves_are_dropped() {
        let mut agg = InfoAggregate::new(2);
        feed(
            &mut agg,
            &[
                "info depth 5 multipv 1 score cp 10 pv e2e4",
                "info depth 5 multipv 2 score cp 8 pv e2e4 e7e5",
            ],
        );
        let analysis = agg.into_analysis();
        assert_eq!(analysis.candidates.len(), 1);
        assert_eq!(analysis.duplicates, 1);
        assert_eq!(analysis.reported(), 2);
    }

    #[test]
    fn mated_position_has_score_but_no_candidates() {
        let mut agg = InfoAggregate::new(3);
        feed(&mut agg, &["info depth 0 score mate 0"]);
        let analysis = agg.into_analysis();
        assert!(analysis.is_terminal());
        assert_eq!(analysis.position_score, Some(Score::Mate(0)));
    }
}
