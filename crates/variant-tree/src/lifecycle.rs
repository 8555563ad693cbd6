//! 実行ループ・自動保存・終了処理
//!
//! 停止要求はサイクルの合間にだけ確認する。自動保存スレッドも探索と同じ
//! ロックを取るので、スナップショットは常にサイクル境界の状態になる。
//! 保存待ちの間は探索側が次のサイクルに入らず、ロックを譲る。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel as chan;
use log::{error, info, warn};

use crate::engine::Analyzer;
use crate::error::Result;
use crate::explorer::{Explorer, Step};
use crate::score;
use crate::tree::TreeStore;

/// 協調的な停止フラグ。Ctrl-C ハンドラなどから立てる。
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// 共有ツリーをロックする。ポイズンしていても中身は一貫しているので使う。
pub fn lock_tree(tree: &Mutex<TreeStore>) -> MutexGuard<'_, TreeStore> {
    tree.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 保存待ちの間、探索側がロックの再取得を控えるときのポーリング間隔
pub const AUTOSAVE_HANDOFF_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// 一定間隔でツリーを保存するバックグラウンドスレッド
pub struct Autosaver {
    shutdown: Option<chan::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    /// タイマーが発火してから保存を終えるまで立つ
    pending: Arc<AtomicBool>,
}

impl Autosaver {
    pub fn spawn(tree: Arc<Mutex<TreeStore>>, path: PathBuf, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = chan::bounded::<()>(0);
        let pending = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&pending);
        let handle = thread::spawn(move || {
            let ticker = chan::tick(interval);
            let mut last_saved = None;
            loop {
                chan::select! {
                    recv(ticker) -> _ => {
                        flag.store(true, Ordering::Release);
                        autosave(&lock_tree(&tree), &path, &mut last_saved);
                        flag.store(false, Ordering::Release);
                    }
                    recv(shutdown_rx) -> _ => break,
                }
            }
            flag.store(false, Ordering::Release);
        });
        Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
            pending,
        }
    }

    /// 保存待ちがあれば終わるまで待つ。サイクルの前に呼ぶ。
    pub fn wait_for_pending_save(&self) {
        while self.pending.load(Ordering::Acquire) {
            thread::sleep(AUTOSAVE_HANDOFF_POLL_INTERVAL);
        }
    }

    /// スレッドを止めて終了を待つ。
    pub fn stop(&mut self) {
        // 送信側を落とすと recv がエラーで返る
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("autosave thread panicked");
            }
        }
    }
}

fn autosave(tree: &TreeStore, path: &Path, last_saved: &mut Option<u64>) {
    if *last_saved == Some(tree.analyses()) {
        return;
    }
    match tree.save(path) {
        Ok(()) => {
            *last_saved = Some(tree.analyses());
            info!("autosaved {} nodes to {}", tree.len(), path.display());
        }
        Err(e) => warn!("autosave failed: {e}"),
    }
}

impl Drop for Autosaver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 実行ループの設定
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOptions {
    pub tree_path: PathBuf,
    /// 時間による自動保存
    pub autosave_interval: Option<Duration>,
    /// 解析回数による自動保存
    pub autosave_every: Option<u64>,
}

/// ループの終わり方
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// 停止要求で止まった
    Stopped,
    /// ツリー全体を調べ尽くした
    Exhausted,
}

/// 終了時の要約
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub outcome: Outcome,
    pub nodes: usize,
    pub analyses: u64,
    pub root_score: Option<i32>,
    pub principal_variation: Vec<String>,
}

impl RunSummary {
    fn capture(outcome: Outcome, tree: &TreeStore) -> Self {
        Self {
            outcome,
            nodes: tree.len(),
            analyses: tree.analyses(),
            root_score: tree.root().raw_score,
            principal_variation: tree
                .principal_variation()
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    pub fn log(&self) {
        info!(
            "{:?}: {} nodes, {} analyses, root {} pv {}",
            self.outcome,
            self.nodes,
            self.analyses,
            self.root_score.map(score::describe).unwrap_or_else(|| "-".to_string()),
            self.principal_variation.join(" ")
        );
    }
}

/// 停止要求かツリーの枯渇まで探索し、保存してエンジンを終了する。
///
/// エンジンや保存の失敗ではループを止め、最後の保存を試みてからエラーを返す。
/// 不変条件違反のときは壊れている可能性のあるツリーで前回の保存を上書きしない。
pub fn run<A: Analyzer>(
    explorer: &mut Explorer<A>,
    tree: &Arc<Mutex<TreeStore>>,
    opts: &RunOptions,
    stop: &StopFlag,
) -> Result<RunSummary> {
    let mut autosaver = opts
        .autosave_interval
        .map(|interval| Autosaver::spawn(Arc::clone(tree), opts.tree_path.clone(), interval));

    let result = explore(explorer, tree, opts, stop, autosaver.as_ref());

    if let Some(saver) = autosaver.as_mut() {
        saver.stop();
    }
    let skip_save = matches!(&result, Err(e) if e.is_fatal());
    let saved = if skip_save {
        error!("tree invariant broken, keeping the previous snapshot");
        Ok(())
    } else {
        save_final(&lock_tree(tree), &opts.tree_path)
    };
    explorer.analyzer_mut().shutdown();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Err(save_err) = saved {
                error!("final save failed: {save_err}");
            }
            return Err(e);
        }
    };
    saved?;
    let summary = RunSummary::capture(outcome, &lock_tree(tree));
    summary.log();
    Ok(summary)
}

fn explore<A: Analyzer>(
    explorer: &mut Explorer<A>,
    tree: &Mutex<TreeStore>,
    opts: &RunOptions,
    stop: &StopFlag,
    autosaver: Option<&Autosaver>,
) -> Result<Outcome> {
    loop {
        if stop.is_stopped() {
            info!("stop requested");
            return Ok(Outcome::Stopped);
        }
        if let Some(saver) = autosaver {
            saver.wait_for_pending_save();
        }
        let mut guard = lock_tree(tree);
        match explorer.step(&mut guard)? {
            Step::Done => {
                info!("tree exhausted");
                return Ok(Outcome::Exhausted);
            }
            Step::Expanded { analysis, .. } => {
                if let Some(every) = opts.autosave_every.filter(|&n| n > 0) {
                    if analysis % every == 0 {
                        // 失敗してもツリーは残っているので次の機会に保存し直す
                        match guard.save(&opts.tree_path) {
                            Ok(()) => {
                                info!("saved {} nodes after analysis #{analysis}", guard.len())
                            }
                            Err(e) => warn!("periodic save failed: {e}"),
                        }
                    }
                }
            }
        }
    }
}

fn save_final(tree: &TreeStore, path: &Path) -> Result<()> {
    tree.save(path)?;
    info!("saved {} nodes to {}", tree.len(), path.display());
    Ok(())
}
