use std::time::{Duration, Instant};

use futures::future::join_all;
use once_cell::sync::Lazy;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

static HTTP_CLIENT: Lazy<ClientWithMiddleware> = Lazy::new(|| {
    ClientBuilder::new(
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("build reqwest client"),
    )
    .with(RetryTransientMiddleware::new_with_policy(
        ExponentialBackoff::builder().build_with_max_retries(3),
    ))
    .build()
});

pub fn http_client() -> &'static ClientWithMiddleware {
    &HTTP_CLIENT
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Given a list of base URLs and a test path, returns the fastest mirror
/// (by HTTP round-trip time) that answers with a success status.
///
/// `test_path` is appended to each base URL like `<base>/<test_path>`.
pub async fn fastest_mirror<'a>(
    base_urls: &[&'a str],
    test_path: &str,
    timeout: Duration,
) -> Option<&'a str> {
    let futures = base_urls.iter().map(|&base| {
        let url = join_url(base, test_path);

        async move {
            let start = Instant::now();
            let res = http_client()
                .head(&url)
                .timeout(timeout)
                .send()
                .await
                .ok()
                .filter(|resp| resp.status().is_success() || resp.status().is_redirection());

            res.map(|_| (base, start.elapsed()))
        }
    });

    join_all(futures)
        .await
        .into_iter()
        .flatten()
        .min_by_key(|(_, elapsed)| *elapsed)
        .map(|(base, _)| base)
}
