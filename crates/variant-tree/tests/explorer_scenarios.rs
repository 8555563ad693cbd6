//! Explorer cycles driven by a scripted engine

mod common;

use std::fs;

use common::{START, Scripted, mate_script};
use variant_tree::analysis_log::AnalysisLog;
use variant_tree::explorer::{Explorer, ExplorerSettings, Step};
use variant_tree::score::{self, MATE, Score};
use variant_tree::tree::{ROOT, TreeStore};

fn settings(multipv: usize) -> ExplorerSettings {
    ExplorerSettings { depth: 20, multipv }
}

fn run_to_end(explorer: &mut Explorer<Scripted>, tree: &mut TreeStore, limit: usize) -> usize {
    for i in 0..limit {
        if explorer.step(tree).unwrap() == Step::Done {
            return i;
        }
    }
    panic!("tree not exhausted after {limit} steps");
}

#[test]
fn root_expansion_creates_children_and_picks_best() {
    let script = Scripted::new().line(
        START,
        &[("e2e4", Score::Cp(50)), ("d2d4", Score::Cp(10)), ("a2a3", Score::Cp(-5))],
    );
    let mut tree = TreeStore::new(START);
    let mut explorer = Explorer::new(script, settings(3));

    let step = explorer.step(&mut tree).unwrap();
    assert!(matches!(step, Step::Expanded { node: ROOT, added: 3, completed: false, .. }));

    let root = tree.root();
    assert_eq!(root.children, vec![1, 2, 3]);
    assert_eq!(root.best_child, Some(0));
    assert_eq!(root.length, 1);
    assert_eq!(root.raw_score, Some(50));
    // 子は相手手番視点
    assert_eq!(tree.node(1).unwrap().raw_score, Some(-50));
    assert_eq!(tree.node(3).unwrap().raw_score, Some(5));
    assert_eq!(tree.node(2).unwrap().fen, "start d2d4");
    assert!(tree.invariant_violations().is_empty());
}

#[test]
fn shorter_mate_found_later_takes_over() {
    let mut tree = TreeStore::new(START);
    let mut explorer = Explorer::new(mate_script(), settings(2));

    explorer.step(&mut tree).unwrap();
    // a: 2 手詰め
    assert_eq!(tree.root().best_child, Some(0));
    assert_eq!(score::describe(tree.root().raw_score.unwrap()), "mate +2");

    // a の先を詰みまで読み切る
    for _ in 0..3 {
        explorer.step(&mut tree).unwrap();
    }
    assert!(tree.node(1).unwrap().exhausted);
    assert_eq!(tree.root().best_child, Some(0));
    assert_eq!(tree.root().length, 3);
    assert_eq!(tree.principal_variation(), vec!["a", "x", "z"]);

    // 調べ尽くした a を避けて b へ。b はその場で詰み
    let step = explorer.step(&mut tree).unwrap();
    assert!(matches!(step, Step::Expanded { node: 2, completed: true, .. }));
    let root = tree.root();
    assert_eq!(root.best_child, Some(1));
    assert_eq!(root.raw_score, Some(MATE - 1));
    assert_eq!(root.length, 1);
    assert_eq!(score::describe(root.raw_score.unwrap()), "mate +1");
    assert_eq!(tree.principal_variation(), vec!["b"]);
    assert!(tree.invariant_violations().is_empty());
}

#[test]
fn open_root_is_widened_until_exhausted() {
    let mut tree = TreeStore::new(START);
    let mut explorer = Explorer::new(mate_script(), settings(2));
    let steps = run_to_end(&mut explorer, &mut tree, 20);
    assert_eq!(steps, 6);
    assert!(tree.root().complete);
    assert!(tree.root().exhausted);
    assert_eq!(tree.path_to_best_leaf(), None);

    // 最後の解析は最下位の b が最善になったルートの候補を広げたもの
    let calls = &explorer.analyzer_mut().calls;
    assert_eq!(calls.first(), Some(&(START.to_string(), 2)));
    assert_eq!(calls.last(), Some(&(START.to_string(), 4)));
    assert_eq!(tree.analyses(), 6);
}

#[test]
fn repeated_moves_are_not_duplicated() {
    let script = Scripted::new()
        .line(START, &[("a", Score::Cp(20)), ("b", Score::Cp(10)), ("c", Score::Cp(5))])
        .terminal("start a", Score::Cp(300));
    let mut tree = TreeStore::new(START);
    let mut explorer = Explorer::new(script, settings(2));

    explorer.step(&mut tree).unwrap();
    assert_eq!(tree.root().children.len(), 2);
    // a は相手から見て +300 で終局 → ルートにとって最悪、b が最善（最下位）になる
    explorer.step(&mut tree).unwrap();
    assert!(tree.root().has_open_slot());

    let step = explorer.step(&mut tree).unwrap();
    assert!(matches!(step, Step::Expanded { node: ROOT, added: 1, completed: true, .. }));
    let moves: Vec<_> = tree
        .root()
        .children
        .iter()
        .map(|&c| tree.node(c).unwrap().move_from_parent.clone().unwrap())
        .collect();
    assert_eq!(moves, vec!["a", "b", "c"]);
}

#[test]
fn engine_failure_leaves_tree_untouched() {
    let mut tree = TreeStore::new(START);
    let mut explorer = Explorer::new(mate_script().crash_on("start a"), settings(2));
    explorer.step(&mut tree).unwrap();
    let before = tree.clone();

    let err = explorer.step(&mut tree).unwrap_err();
    assert!(err.is_engine_failure());
    assert_eq!(tree, before);
}

#[test]
fn every_cycle_is_appended_to_analysis_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chess").join("chess_20.log");
    let mut tree = TreeStore::new(START);
    let log = AnalysisLog::open(&path).unwrap();
    let mut explorer = Explorer::new(mate_script(), settings(2)).with_analysis_log(log);

    explorer.step(&mut tree).unwrap();
    explorer.step(&mut tree).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(
        text,
        "\nAnalysis #1\n-\npv \nalt1 a mate 2\nalt2 b cp 900\n\
         \nAnalysis #2\nmate -1\npv a\nalt1 x mate -1\n"
    );
}
