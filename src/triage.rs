//! Stream triage
//!
//! Decides per configured stream whether it still needs a resumable full
//! sync or has already moved on to an incremental strategy.

use crate::config::{ConfiguredCatalog, ConfiguredStream};
use crate::error::Result;
use crate::state::{CursorState, PersistedStates, StateType, XminState, XminStatus};
use crate::types::SyncMode;
use tracing::{debug, info};

/// Streams of a catalog grouped by the strategy that reads them next
#[derive(Debug, Clone, Default)]
pub struct StreamsCategorised {
    /// Need a ctid initial sync (new, resuming, or forced back)
    pub needs_full_sync: Vec<ConfiguredStream>,
    /// Continue with the xmin watermark
    pub by_watermark: Vec<ConfiguredStream>,
    /// Continue with the cursor column
    pub by_cursor: Vec<ConfiguredStream>,
}

impl StreamsCategorised {
    /// Total number of streams
    pub fn len(&self) -> usize {
        self.needs_full_sync.len() + self.by_watermark.len() + self.by_cursor.len()
    }

    /// Whether no stream was classified
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Classify every stream of the catalog.
///
/// `xmin_status` is the server's current transaction id position; without it
/// saved xmin watermarks are trusted as is. Invalid persisted state fails the
/// whole triage before anything is read.
pub fn classify(
    persisted: &PersistedStates,
    catalog: &ConfiguredCatalog,
    xmin_status: Option<&XminStatus>,
) -> Result<StreamsCategorised> {
    let mut result = StreamsCategorised::default();

    for configured in &catalog.streams {
        let stream = &configured.stream;

        let saved = persisted
            .get(stream)
            .map(|value| StateType::of_value(stream, value).map(|kind| (value, kind)))
            .transpose()?;

        if configured.sync_mode == SyncMode::FullRefresh {
            result.needs_full_sync.push(configured.clone());
            continue;
        }

        let Some((value, kind)) = saved else {
            debug!(stream = %stream, "No saved state, initial sync required");
            result.needs_full_sync.push(configured.clone());
            continue;
        };

        match kind {
            StateType::Ctid => {
                result.needs_full_sync.push(configured.clone());
            }
            StateType::Xmin => {
                let saved = XminState::from_value(stream, value)?;
                let wrapped = xmin_status.is_some_and(|status| status.requires_full_sync(&saved));
                if wrapped {
                    info!(
                        stream = %stream,
                        saved_wraparound = saved.num_wraparound,
                        "Transaction id wrapped around since the last sync, full resync required"
                    );
                    result.needs_full_sync.push(configured.clone());
                } else {
                    result.by_watermark.push(configured.clone());
                }
            }
            StateType::Standard => {
                CursorState::from_value(stream, value)?;
                result.by_cursor.push(configured.clone());
            }
        }
    }

    info!(
        full_sync = result.needs_full_sync.len(),
        watermark = result.by_watermark.len(),
        cursor = result.by_cursor.len(),
        "Streams categorised"
    );
    Ok(result)
}
