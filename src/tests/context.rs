use std::io;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::testing::RecordingPageStore;
use crate::Config;
use crate::WalEngine;

/// Open an engine with a recording page store in a new temp dir.
pub(crate) fn new_testing(
    f: impl FnOnce(&mut Config),
) -> Result<(TestContext, WalEngine, Arc<RecordingPageStore>), io::Error> {
    let mut ctx = TestContext::new()?;
    f(&mut ctx.config);

    let (engine, ps) = ctx.new_engine()?;
    Ok((ctx, engine, ps))
}

pub(crate) struct TestContext {
    pub(crate) config: Config,

    _temp_dir: TempDir,
}

impl TestContext {
    /// A config with a 4KB segment and the checkpoint timer effectively off.
    pub(crate) fn new() -> Result<TestContext, io::Error> {
        let temp_dir = tempfile::tempdir()?;

        let config = Config {
            dir: temp_dir.path().to_str().unwrap().to_string(),
            wal_segment_size: Some(4096),
            checkpoint_frequency: Some(Duration::from_secs(3600)),
            ..Default::default()
        };

        Ok(TestContext {
            config,
            _temp_dir: temp_dir,
        })
    }

    pub(crate) fn arc_config(&self) -> Arc<Config> {
        Arc::new(self.config.clone())
    }

    pub(crate) fn new_engine(
        &self,
    ) -> Result<(WalEngine, Arc<RecordingPageStore>), io::Error> {
        let ps = Arc::new(RecordingPageStore::default());
        let engine = WalEngine::open(self.arc_config(), ps.clone())?;
        Ok((engine, ps))
    }
}
