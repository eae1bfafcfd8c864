use std::path::{Path, PathBuf};

use hf_hub::{
    Cache, Repo,
    api::tokio::{Api, ApiBuilder, Progress},
};
use indicatif::ProgressBar;
use once_cell::sync::Lazy;
use tracing::{Instrument, info, trace};

use crate::progress::{PROGRESS_TRACE_TARGET, progress_bar};

/// The hub client and the cache it fills. Both honor `HF_HOME` and
/// `HF_ENDPOINT`, so the inference backend resolves the same files.
struct Hub {
    api: Api,
    cache: Cache,
}

static HUB: Lazy<Hub> = Lazy::new(|| {
    let cache = Cache::from_env();
    let api = ApiBuilder::from_env()
        .with_cache_dir(cache.path().to_path_buf())
        .high()
        .build()
        .expect("build HF API client");
    Hub { api, cache }
});

pub fn cache_dir() -> &'static Path {
    HUB.cache.path()
}

fn model(name: &str) -> Repo {
    Repo::model(name.to_string())
}

/// Mirrors hub transfer progress onto a terminal bar and trace events.
#[derive(Clone)]
struct Reporter {
    pb: ProgressBar,
    filename: String,
    received: u64,
}

impl Reporter {
    fn new(filename: &str) -> Self {
        Self {
            pb: progress_bar(filename),
            filename: filename.to_string(),
            received: 0,
        }
    }
}

impl Progress for Reporter {
    async fn init(&mut self, size: usize, _filename: &str) {
        self.received = 0;
        self.pb.set_length(size as u64);
        self.pb.set_position(0);
    }

    async fn update(&mut self, size: usize) {
        self.received += size as u64;
        self.pb.inc(size as u64);
        trace!(
            target: PROGRESS_TRACE_TARGET,
            file = %self.filename,
            received = self.received,
            "download"
        );
    }

    async fn finish(&mut self) {
        self.pb.finish_and_clear();
    }
}

/// Path of `filename` from `repo_name`, fetching it when the cache misses.
pub async fn download(repo_name: &str, filename: &str) -> anyhow::Result<PathBuf> {
    if let Some(path) = HUB.cache.repo(model(repo_name)).get(filename) {
        return Ok(path);
    }

    let fetch = async {
        info!("fetching {filename} from {repo_name}");
        let path = HUB
            .api
            .repo(model(repo_name))
            .download_with_progress(filename, Reporter::new(filename))
            .await?;
        Ok::<_, anyhow::Error>(path)
    };
    fetch
        .instrument(tracing::info_span!("hf_download", repo = repo_name, filename))
        .await
}
