//! 共享日志模块 - 只追加的行式日志文件
//!
//! 行号从 1 开始，在文件生命周期内稳定。读取是惰性的，大日志不会整体载入内存。

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// 带行号的一行日志
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedLine {
    pub number: usize,
    pub text: String,
}

impl NumberedLine {
    /// 交给 selector 的一行：`<行号>\t<内容>`
    pub fn to_selector_row(&self) -> String {
        format!("{}\t{}", self.number, self.text)
    }
}

/// 日志文件
#[derive(Debug, Clone)]
pub struct LogRecord {
    path: PathBuf,
}

impl LogRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// 文件存在且非空
    pub fn has_content(&self) -> bool {
        std::fs::metadata(&self.path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// 惰性的带行号视图
    pub fn numbered_lines(&self) -> Result<NumberedLines> {
        let file = File::open(&self.path)
            .with_context(|| format!("无法打开日志文件: {}", self.path.display()))?;
        Ok(NumberedLines::new(BufReader::new(file)))
    }

    /// 单次扫描，为每个 BlockSpec 找出最近一次匹配的块
    pub fn scan(&self, specs: &[BlockSpec]) -> Result<Vec<Option<LogBlock>>> {
        let mut scanners: Vec<BlockScanner<'_>> = specs.iter().map(BlockScanner::new).collect();
        for line in self.numbered_lines()? {
            let line = line?;
            for scanner in scanners.iter_mut() {
                scanner.feed(&line);
            }
        }
        Ok(scanners.into_iter().map(BlockScanner::finish).collect())
    }
}

/// 惰性行迭代器，非 UTF-8 内容按 lossy 方式解码
pub struct NumberedLines {
    reader: Box<dyn BufRead + Send>,
    next_number: usize,
    buf: Vec<u8>,
}

impl NumberedLines {
    pub fn new<R: BufRead + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Box::new(reader),
            next_number: 1,
            buf: Vec::new(),
        }
    }
}

impl Iterator for NumberedLines {
    type Item = io::Result<NumberedLine>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                while matches!(self.buf.last(), Some(b'\n') | Some(b'\r')) {
                    self.buf.pop();
                }
                let line = NumberedLine {
                    number: self.next_number,
                    text: String::from_utf8_lossy(&self.buf).into_owned(),
                };
                self.next_number += 1;
                Some(Ok(line))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// 块匹配规则：包含任一 marker 的行，加上前 `before` 行和后 `after` 行
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSpec {
    pub markers: Vec<String>,
    pub before: usize,
    pub after: usize,
}

impl BlockSpec {
    pub fn new<S: Into<String>>(markers: impl IntoIterator<Item = S>, before: usize, after: usize) -> Self {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
            before,
            after,
        }
    }

    fn matches(&self, text: &str) -> bool {
        self.markers.iter().any(|m| text.contains(m.as_str()))
    }
}

/// 提取出的日志块
#[derive(Debug, Clone, PartialEq)]
pub struct LogBlock {
    /// 匹配行的行号
    pub matched_line: usize,
    pub lines: Vec<NumberedLine>,
}

impl LogBlock {
    pub fn texts(&self) -> Vec<&str> {
        self.lines.iter().map(|l| l.text.as_str()).collect()
    }
}

/// 流式扫描：保留最近 `before` 行历史，新匹配总是替换旧块
struct BlockScanner<'a> {
    spec: &'a BlockSpec,
    history: VecDeque<NumberedLine>,
    latest: Option<LogBlock>,
    remaining_after: usize,
}

impl<'a> BlockScanner<'a> {
    fn new(spec: &'a BlockSpec) -> Self {
        Self {
            spec,
            history: VecDeque::with_capacity(spec.before + 1),
            latest: None,
            remaining_after: 0,
        }
    }

    fn feed(&mut self, line: &NumberedLine) {
        if self.spec.matches(&line.text) {
            let mut lines: Vec<NumberedLine> = self.history.iter().cloned().collect();
            lines.push(line.clone());
            self.latest = Some(LogBlock {
                matched_line: line.number,
                lines,
            });
            self.remaining_after = self.spec.after;
        } else if self.remaining_after > 0 {
            if let Some(block) = self.latest.as_mut() {
                block.lines.push(line.clone());
            }
            self.remaining_after -= 1;
        }

        if self.spec.before > 0 {
            if self.history.len() == self.spec.before {
                self.history.pop_front();
            }
            self.history.push_back(line.clone());
        }
    }

    fn finish(self) -> Option<LogBlock> {
        self.latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_log(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_numbered_lines_are_one_based() {
        let file = write_log(&["alpha", "beta", "gamma"]);
        let record = LogRecord::new(file.path());
        let lines: Vec<NumberedLine> = record.numbered_lines().unwrap().map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].number, 1);
        assert_eq!(lines[2].text, "gamma");
        assert_eq!(lines[1].to_selector_row(), "2\tbeta");
    }

    #[test]
    fn test_crlf_and_invalid_utf8() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"one\r\n\xff\xfetwo\nthree").unwrap();
        let record = LogRecord::new(file.path());
        let texts: Vec<String> = record.numbered_lines().unwrap().map(|l| l.unwrap().text).collect();
        assert_eq!(texts.len(), 3);
        assert_eq!(texts[0], "one");
        assert!(texts[1].ends_with("two"));
        assert_eq!(texts[2], "three");
    }

    #[test]
    fn test_has_content() {
        let empty = tempfile::NamedTempFile::new().unwrap();
        assert!(!LogRecord::new(empty.path()).has_content());
        assert!(!LogRecord::new("/nonexistent/pane-warden.log").has_content());
        let file = write_log(&["x"]);
        assert!(LogRecord::new(file.path()).has_content());
    }

    #[test]
    fn test_single_match_window() {
        // Given: 只有第 10 行包含 ERROR
        let lines: Vec<String> = (1..=20)
            .map(|i| if i == 10 { "10 ERROR boom".to_string() } else { format!("{} ok", i) })
            .collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let file = write_log(&refs);

        // When: 1 行前文、5 行后文
        let spec = BlockSpec::new(["ERROR", "CRITICAL"], 1, 5);
        let block = LogRecord::new(file.path()).scan(&[spec]).unwrap().remove(0).unwrap();

        // Then: 第 9..=15 行，不多不少
        let numbers: Vec<usize> = block.lines.iter().map(|l| l.number).collect();
        assert_eq!(numbers, vec![9, 10, 11, 12, 13, 14, 15]);
        assert_eq!(block.matched_line, 10);
    }

    #[test]
    fn test_most_recent_match_wins() {
        let file = write_log(&["a", "ERROR first", "b", "c", "CRITICAL second", "d"]);
        let spec = BlockSpec::new(["ERROR", "CRITICAL"], 1, 5);
        let block = LogRecord::new(file.path()).scan(&[spec]).unwrap().remove(0).unwrap();
        assert_eq!(block.matched_line, 5);
        assert_eq!(block.texts(), vec!["c", "CRITICAL second", "d"]);
    }

    #[test]
    fn test_match_on_first_line_has_no_preceding() {
        let file = write_log(&["ERROR at start", "x"]);
        let spec = BlockSpec::new(["ERROR"], 1, 5);
        let block = LogRecord::new(file.path()).scan(&[spec]).unwrap().remove(0).unwrap();
        assert_eq!(block.texts(), vec!["ERROR at start", "x"]);
    }

    #[test]
    fn test_no_marker_no_block() {
        let file = write_log(&["all good", "still good"]);
        let specs = [BlockSpec::new(["ERROR", "CRITICAL"], 1, 5), BlockSpec::new(["Traceback"], 0, 20)];
        let blocks = LogRecord::new(file.path()).scan(&specs).unwrap();
        assert!(blocks.iter().all(Option::is_none));
    }

    #[test]
    fn test_trace_block_capped_at_twenty_after() {
        let mut lines = vec!["Traceback (most recent call last):".to_string()];
        lines.extend((1..=30).map(|i| format!("  frame {}", i)));
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let file = write_log(&refs);

        let spec = BlockSpec::new(["Traceback"], 0, 20);
        let block = LogRecord::new(file.path()).scan(&[spec]).unwrap().remove(0).unwrap();
        assert_eq!(block.lines.len(), 21);
        assert_eq!(block.lines[0].number, 1);
        assert_eq!(block.lines.last().unwrap().text, "  frame 20");
    }
}
