//! Block feed
//!
//! Blocks arrive as JSON lines, one block per line:
//!
//! ```text
//! {"height":1,"time":"2024-01-01T01:00:00Z","txs":[...]}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use registry_core::{BlockHeader, SignedTx};
use serde::{Deserialize, Serialize};
use std::io::BufRead;

/// One block of the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedBlock {
    /// Block height
    pub height: u64,
    /// Block time
    pub time: DateTime<Utc>,
    /// Transactions, in delivery order
    #[serde(default)]
    pub txs: Vec<SignedTx>,
}

impl FeedBlock {
    /// Header for `chain_id`
    pub fn header(&self, chain_id: &str) -> BlockHeader {
        BlockHeader::new(chain_id, self.height, self.time)
    }

    /// Encode as one feed line (no trailing newline)
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Iterator over the blocks of a feed
#[derive(Debug)]
pub struct BlockFeed<R> {
    reader: R,
    line: usize,
    last_height: Option<u64>,
}

impl<R: BufRead> BlockFeed<R> {
    /// Read blocks from `reader`
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            last_height: None,
        }
    }

    fn feed_error(&self, message: impl Into<String>) -> Error {
        Error::Feed {
            line: self.line,
            message: message.into(),
        }
    }

    fn next_block(&mut self) -> Result<Option<FeedBlock>> {
        let mut buf = String::new();
        loop {
            buf.clear();
            if self.reader.read_line(&mut buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;

            let trimmed = buf.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let block: FeedBlock =
                serde_json::from_str(trimmed).map_err(|e| self.feed_error(e.to_string()))?;
            if let Some(last) = self.last_height {
                if block.height <= last {
                    return Err(self.feed_error(format!(
                        "height {} does not follow {}",
                        block.height, last
                    )));
                }
            }
            self.last_height = Some(block.height);
            return Ok(Some(block));
        }
    }
}

impl<R: BufRead> Iterator for BlockFeed<R> {
    type Item = Result<FeedBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry_core::{crypto::KeyPair, Msg};
    use std::io::Cursor;

    fn block(height: u64) -> FeedBlock {
        FeedBlock {
            height,
            time: "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
                + chrono::Duration::hours(height as i64),
            txs: vec![],
        }
    }

    #[test]
    fn test_reads_blocks_and_skips_comments() {
        let keypair = KeyPair::from_seed(&[3u8; 32]);
        let mut first = block(1);
        first.txs.push(
            SignedTx::sign(
                Msg::ReserveAuthority { name: "alice".into() },
                "registry-test",
                0,
                0,
                &keypair,
            )
            .unwrap(),
        );
        let input = format!(
            "# replay\n{}\n\n{}\n",
            first.to_line().unwrap(),
            block(2).to_line().unwrap()
        );

        let blocks: Vec<FeedBlock> = BlockFeed::new(Cursor::new(input))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(blocks, vec![first, block(2)]);
        assert_eq!(blocks[1].header("registry-test").height, 2);
    }

    #[test]
    fn test_txs_default_to_empty() {
        let input = r#"{"height":4,"time":"2024-01-01T04:00:00Z"}"#;
        let blocks: Vec<FeedBlock> = BlockFeed::new(Cursor::new(input))
            .collect::<Result<_>>()
            .unwrap();
        assert!(blocks[0].txs.is_empty());
    }

    #[test]
    fn test_reports_bad_line_number() {
        let input = format!("{}\nnot json\n", block(1).to_line().unwrap());
        let err = BlockFeed::new(Cursor::new(input))
            .collect::<Result<Vec<_>>>()
            .unwrap_err();
        assert!(matches!(err, Error::Feed { line: 2, .. }));
    }

    #[test]
    fn test_rejects_non_increasing_heights() {
        let input = format!("{}\n{}\n", block(2).to_line().unwrap(), block(2).to_line().unwrap());
        let err = BlockFeed::new(Cursor::new(input))
            .collect::<Result<Vec<_>>>()
            .unwrap_err();
        assert!(matches!(err, Error::Feed { line: 2, .. }));
    }
}
