use async_trait::async_trait;

/// Rendered page as captured after `domcontentloaded`.
#[derive(Debug, Clone)]
pub struct BrowserPage {
    pub title: String,
    pub text: String,
}

/// External headless-browser driver. The runner only depends on this seam;
/// when no driver is wired in, browser fetches fall back to the configured
/// readable mirror.
#[async_trait]
pub trait BrowserFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<BrowserPage>;
}
