use std::time::Duration;

use lipsync_core::http::fastest_mirror;
use strum::{Display, EnumIter, IntoEnumIterator};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum PypiEndpoint {
    #[strum(serialize = "https://pypi.org")]
    Official,
    #[strum(serialize = "https://mirrors.tuna.tsinghua.edu.cn")]
    Tsinghua,
}

impl PypiEndpoint {
    /// Simple-API index URL suitable for `pip install --index-url`.
    pub fn index_url(&self) -> String {
        match self {
            PypiEndpoint::Official => format!("{self}/simple"),
            PypiEndpoint::Tsinghua => format!("{self}/pypi/web/simple"),
        }
    }
}

/// Picks the index that answers fastest, falling back to the official one.
pub async fn fastest_endpoint() -> PypiEndpoint {
    let urls: Vec<String> = PypiEndpoint::iter().map(|e| e.index_url()).collect();
    let bases: Vec<&str> = urls.iter().map(String::as_str).collect();

    fastest_mirror(&bases, "pip/", PROBE_TIMEOUT)
        .await
        .and_then(|url| PypiEndpoint::iter().find(|e| e.index_url() == url))
        .unwrap_or(PypiEndpoint::Official)
}
