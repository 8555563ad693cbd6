//! ツリーファイルの読み書き
//!
//! 1 ノード 1 行のテキスト形式（version 1）。
//!
//! ```text
//! % variant-tree 1 next_id=4 analyses=1
//! % id;move;raw;best;length;fen;children;complete
//! 0;;50;0;1;rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1;1,2,3;0
//! ```
//!
//! 先頭行はバージョン付きヘッダ、それ以外の `%` 行はコメント。空欄は null。
//! 保存は同じディレクトリの一時ファイルに書いてから rename で置き換えるので、
//! 書き込み途中で落ちても直前のスナップショットは壊れない。

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tempfile::NamedTempFile;

use super::node::{Node, NodeId};
use super::store::TreeStore;
use crate::error::{Error, Result};

/// ファイル形式のマジック
pub const FORMAT_MAGIC: &str = "variant-tree";
/// ファイル形式のバージョン
pub const FORMAT_VERSION: u32 = 1;

const FIELD_SEP: char = ';';
const FIELD_COUNT: usize = 8;

fn persistence(operation: &'static str, path: &Path, source: io::Error) -> Error {
    Error::Persistence {
        operation,
        path: path.to_path_buf(),
        source,
    }
}

impl TreeStore {
    /// ファイルから読み込む。ファイルが無ければ `root_fen` でルートのみのツリーを作る。
    pub fn load<F>(path: &Path, root_fen: F) -> Result<Self>
    where
        F: FnOnce() -> Result<String>,
    {
        match File::open(path) {
            Ok(file) => Self::decode(BufReader::new(file), path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::new(root_fen()?)),
            Err(e) => Err(persistence("open", path, e)),
        }
    }

    /// スナップショットをアトミックに保存する。
    ///
    /// 失敗してもメモリ上のツリーはそのままなので、呼び出し側は再試行できる。
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| persistence("create directory for", path, e))?;
        let mut tmp = NamedTempFile::new_in(&dir)
            .map_err(|e| persistence("create temporary file for", path, e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            self.write_to(&mut writer).map_err(|e| match e {
                Error::Persistence { source, .. } => persistence("write", path, source),
                other => other,
            })?;
            writer.flush().map_err(|e| persistence("write", path, e))?;
        }
        tmp.as_file().sync_all().map_err(|e| persistence("sync", path, e))?;
        tmp.persist(path).map_err(|e| persistence("replace", path, e.error))?;
        Ok(())
    }

    /// 任意の出力先に書き出す。
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let io_err = |e| persistence("write", Path::new("-"), e);
        writeln!(
            writer,
            "% {FORMAT_MAGIC} {FORMAT_VERSION} next_id={} analyses={}",
            self.next_id(),
            self.analyses()
        )
        .map_err(io_err)?;
        writeln!(writer, "% saved {}", Local::now().to_rfc3339()).map_err(io_err)?;
        writeln!(writer, "% id;move;raw;best;length;fen;children;complete").map_err(io_err)?;
        for node in self.nodes() {
            let line = encode_node(node)?;
            writeln!(writer, "{line}").map_err(io_err)?;
        }
        Ok(())
    }

    /// 任意の入力から読み込む。
    pub fn read_from<R: BufRead>(reader: R) -> Result<Self> {
        Self::decode(reader, Path::new("-"))
    }

    fn decode<R: BufRead>(reader: R, path: &Path) -> Result<Self> {
        let mut header: Option<Header> = None;
        let mut nodes = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|e| persistence("read", path, e))?;
            let trimmed = line.trim_end_matches('\r');
            if header.is_none() {
                header = Some(parse_header(trimmed, line_no)?);
                continue;
            }
            if trimmed.is_empty() || trimmed.starts_with('%') {
                continue;
            }
            nodes.push(decode_node(trimmed, line_no)?);
        }
        let header = header.ok_or_else(|| Error::format(1, "missing header"))?;
        if header.next_id != nodes.len() {
            return Err(Error::format(
                1,
                format!("next_id {} does not match {} records", header.next_id, nodes.len()),
            ));
        }
        TreeStore::from_parts(nodes, header.analyses)
    }
}

struct Header {
    next_id: usize,
    analyses: u64,
}

fn parse_header(line: &str, line_no: usize) -> Result<Header> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("%") || tokens.next() != Some(FORMAT_MAGIC) {
        return Err(Error::format(line_no, "not a variant-tree file"));
    }
    let version = tokens
        .next()
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or_else(|| Error::format(line_no, "missing format version"))?;
    if version != FORMAT_VERSION {
        return Err(Error::format(line_no, format!("unsupported format version {version}")));
    }
    let mut next_id = None;
    let mut analyses = 0;
    for tok in tokens {
        match tok.split_once('=') {
            Some(("next_id", v)) => {
                next_id = Some(v.parse().map_err(|_| Error::format(line_no, "invalid next_id"))?);
            }
            Some(("analyses", v)) => {
                analyses = v.parse().map_err(|_| Error::format(line_no, "invalid analyses"))?;
            }
            _ => {}
        }
    }
    let next_id = next_id.ok_or_else(|| Error::format(line_no, "missing next_id"))?;
    Ok(Header { next_id, analyses })
}

fn encode_node(node: &Node) -> Result<String> {
    let mv = node.move_from_parent.as_deref().unwrap_or("");
    for field in [mv, node.fen.as_str()] {
        if field.contains(FIELD_SEP) || field.contains('\n') {
            return Err(Error::format(
                node.id + 1,
                format!("node {} field '{}' contains a separator", node.id, field),
            ));
        }
    }
    let raw = node.raw_score.map(|v| v.to_string()).unwrap_or_default();
    let best = node.best_child.map(|v| v.to_string()).unwrap_or_default();
    let children = node.children.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(",");
    Ok(format!(
        "{};{};{};{};{};{};{};{}",
        node.id,
        mv,
        raw,
        best,
        node.length,
        node.fen,
        children,
        u8::from(node.complete)
    ))
}

fn decode_node(line: &str, line_no: usize) -> Result<Node> {
    let fields: Vec<&str> = line.split(FIELD_SEP).collect();
    if fields.len() != FIELD_COUNT {
        return Err(Error::format(
            line_no,
            format!("expected {FIELD_COUNT} fields, got {}", fields.len()),
        ));
    }
    let bad = |what: &str| Error::format(line_no, format!("invalid {what}"));

    let id: NodeId = fields[0].trim().parse().map_err(|_| bad("id"))?;
    let move_from_parent = Some(fields[1].trim()).filter(|s| !s.is_empty()).map(str::to_string);
    let raw_score = match fields[2].trim() {
        "" => None,
        s => Some(s.parse::<i32>().map_err(|_| bad("raw score"))?),
    };
    let best_child = match fields[3].trim() {
        "" => None,
        s => Some(s.parse::<usize>().map_err(|_| bad("best index"))?),
    };
    let length = fields[4].trim().parse::<u32>().map_err(|_| bad("length"))?;
    let fen = fields[5].trim();
    if fen.is_empty() {
        return Err(bad("fen"));
    }
    let children: Vec<NodeId> = match fields[6].trim() {
        "" => Vec::new(),
        s => s
            .split(',')
            .map(|c| c.trim().parse().map_err(|_| bad("child id")))
            .collect::<Result<Vec<_>>>()?,
    };
    let complete = match fields[7].trim() {
        "0" => false,
        "1" => true,
        _ => return Err(bad("complete flag")),
    };

    let mut node = Node::new(id, None, fen.to_string(), move_from_parent);
    node.raw_score = raw_score;
    node.best_child = best_child;
    node.length = length;
    node.children = children;
    node.complete = complete;
    Ok(node)
}
