//! Mail source seam — blocking discovery/fetch operations over a mailbox.
//!
//! `ImapSession` is the production implementation; tests use in-memory
//! fakes. All methods are blocking and run under `spawn_blocking`.

use tracing::warn;

use crate::error::IngestError;

/// A raw item fetched from the mail source.
#[derive(Debug, Clone)]
pub struct RawItem {
    /// Source sequence identifier (IMAP UID).
    pub uid: u32,
    /// Raw RFC822 bytes.
    pub raw: Vec<u8>,
}

/// Discovery and fetch operations against one selected folder.
pub trait MailSource {
    /// UIDs strictly newer than the checkpoint.
    fn search_since(&mut self, checkpoint: u32) -> Result<Vec<u32>, IngestError>;

    /// UIDs of unseen items.
    fn search_unseen(&mut self) -> Result<Vec<u32>, IngestError>;

    /// UIDs of the most recent `n` items by sequence number.
    fn recent_window(&mut self, n: usize) -> Result<Vec<u32>, IngestError>;

    /// Fetch one raw item by UID.
    fn fetch(&mut self, uid: u32) -> Result<RawItem, IngestError>;
}

/// Tiered discovery, then bounded fetch.
///
/// Discovery tiers (first non-empty result wins):
/// 1. items strictly newer than the checkpoint;
/// 2. unseen items;
/// 3. the most recent `window` items — the recovery net for checkpoint
///    corruption and cold starts.
///
/// A failing tier falls through to the next. Per-item fetch failures are
/// logged and skipped; they never abort the batch.
pub fn collect_items(
    source: &mut dyn MailSource,
    checkpoint: u32,
    batch_size: usize,
    window: usize,
) -> Result<Vec<RawItem>, IngestError> {
    let mut uids = match source.search_since(checkpoint) {
        // Servers answer `<start>:*` with the last item even when nothing is
        // newer, so filter on the checkpoint again.
        Ok(found) => found.into_iter().filter(|u| *u > checkpoint).collect(),
        Err(e) => {
            warn!(error = %e, "Checkpoint search failed; falling back to unseen");
            Vec::new()
        }
    };

    if uids.is_empty() {
        uids = match source.search_unseen() {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Unseen search failed; falling back to recent window");
                Vec::new()
            }
        };
    }

    if uids.is_empty() {
        uids = source.recent_window(window)?;
    }

    uids.sort_unstable();
    uids.truncate(batch_size);

    let mut items = Vec::with_capacity(uids.len());
    for uid in uids {
        match source.fetch(uid) {
            Ok(item) => items.push(item),
            Err(e) => warn!(uid, error = %e, "Skipping unfetchable item"),
        }
    }
    Ok(items)
}

#[cfg(test)]
pub mod test_support {
    //! In-memory mail source for ingestor tests.

    use super::*;

    #[derive(Default)]
    pub struct FakeSource {
        /// (uid, raw bytes) for every item on the "server".
        pub items: Vec<(u32, Vec<u8>)>,
        /// UIDs reported as unseen.
        pub unseen: Vec<u32>,
        /// Force the checkpoint search to error (tier fallback tests).
        pub fail_since: bool,
        /// Force the unseen search to error.
        pub fail_unseen: bool,
    }

    impl FakeSource {
        pub fn with_items(items: Vec<(u32, Vec<u8>)>) -> Self {
            Self {
                items,
                ..Default::default()
            }
        }
    }

    impl MailSource for FakeSource {
        fn search_since(&mut self, checkpoint: u32) -> Result<Vec<u32>, IngestError> {
            if self.fail_since {
                return Err(IngestError::Protocol("SEARCH rejected".into()));
            }
            Ok(self
                .items
                .iter()
                .map(|(uid, _)| *uid)
                .filter(|uid| *uid > checkpoint)
                .collect())
        }

        fn search_unseen(&mut self) -> Result<Vec<u32>, IngestError> {
            if self.fail_unseen {
                return Err(IngestError::Protocol("SEARCH rejected".into()));
            }
            Ok(self.unseen.clone())
        }

        fn recent_window(&mut self, n: usize) -> Result<Vec<u32>, IngestError> {
            let mut uids: Vec<u32> = self.items.iter().map(|(uid, _)| *uid).collect();
            uids.sort_unstable();
            let skip = uids.len().saturating_sub(n);
            Ok(uids.into_iter().skip(skip).collect())
        }

        fn fetch(&mut self, uid: u32) -> Result<RawItem, IngestError> {
            self.items
                .iter()
                .find(|(u, _)| *u == uid)
                .map(|(u, raw)| RawItem {
                    uid: *u,
                    raw: raw.clone(),
                })
                .ok_or_else(|| IngestError::Protocol(format!("no such uid {uid}")))
        }
    }
}
