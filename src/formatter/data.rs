use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info};

use crate::config::Config;
use crate::formatter::Reporter;
use crate::metric::{MetricName, MetricValue};
use crate::publish::{Published, Publisher};
use crate::snapshot::{Snapshot, SnapshotStore};

/// Keeps the structured values: saves the snapshot and, when enabled,
/// publishes the rendered report.
pub struct DataReporter<'a> {
    config: &'a Config,
    store: SnapshotStore,
    publish: bool,
    saved: Option<PathBuf>,
    published: Option<Published>,
}

impl<'a> DataReporter<'a> {
    pub fn new(config: &'a Config, publish: bool) -> Self {
        Self {
            config,
            store: SnapshotStore::new(&config.data_dir),
            publish,
            saved: None,
            published: None,
        }
    }

    pub fn saved(&self) -> Option<&PathBuf> {
        self.saved.as_ref()
    }

    pub fn published(&self) -> Option<&Published> {
        self.published.as_ref()
    }
}

impl Reporter for DataReporter<'_> {
    fn metric(&mut self, name: MetricName, value: &MetricValue) -> Result<()> {
        debug!("{name}: {}", serde_json::to_string(value)?);
        Ok(())
    }

    fn finish(&mut self, snapshot: &Snapshot) -> Result<()> {
        info!("Writing {} ...", snapshot.file_name());
        let path = self.store.save(snapshot)?;
        self.saved = Some(path);

        if self.publish {
            let published = Publisher::new(self.config)?.publish_latest(snapshot)?;
            if let Some(external) = &published.external_path {
                info!("published {external}");
            }
            self.published = Some(published);
        }
        Ok(())
    }
}
