//! In-memory fakes of the service ports.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::ArtifactMetadata;
use crate::errors::{GenflowError, ProviderError, Result};
use crate::ports::{
    BackgroundRemover, ConvertOptions, GenerationProvider, GenerationRequest, ImageOps,
    MetadataClient, MetadataContext, QualityGate, QualityVerdict,
};

/// Image operations over an in-memory file table.
///
/// Reading a path that was never written returns placeholder bytes, so
/// downloads do not need to exist on disk.
#[derive(Debug, Default)]
pub struct FakeImageOps {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl FakeImageOps {
    /// Creates fake image operations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call of operation `op` fail.
    pub fn fail_on(&self, op: &str) {
        self.failing.lock().insert(op.to_string());
    }

    /// Stops failing operation `op`.
    pub fn recover(&self, op: &str) {
        self.failing.lock().remove(op);
    }

    /// Delays every call of operation `op`.
    pub fn delay_on(&self, op: &str, delay: Duration) {
        self.delays.lock().insert(op.to_string(), delay);
    }

    /// Operations called so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Returns true if `path` holds a file.
    #[must_use]
    pub fn exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    async fn enter(&self, op: &str, label: String) -> Result<()> {
        self.calls.lock().push(label);
        let delay = self.delays.lock().get(op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(op) {
            return Err(GenflowError::internal(format!("{op} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageOps for FakeImageOps {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.enter("read", "read".into()).await?;
        let stored = self.files.lock().get(path).cloned();
        Ok(stored.unwrap_or_else(|| format!("image:{}", path.display()).into_bytes()))
    }

    async fn write(&self, path: &Path, image: &[u8]) -> Result<()> {
        self.enter("write", "write".into()).await?;
        self.files.lock().insert(path.to_path_buf(), image.to_vec());
        Ok(())
    }

    async fn sharpen(&self, mut image: Vec<u8>, _strength: f64) -> Result<Vec<u8>> {
        self.enter("sharpen", "sharpen".into()).await?;
        image.extend_from_slice(b"+sharp");
        Ok(image)
    }

    async fn saturate(&self, mut image: Vec<u8>, _factor: f64) -> Result<Vec<u8>> {
        self.enter("saturate", "saturate".into()).await?;
        image.extend_from_slice(b"+sat");
        Ok(image)
    }

    async fn convert(&self, mut image: Vec<u8>, options: &ConvertOptions) -> Result<Vec<u8>> {
        self.enter("convert", format!("convert:{}", options.format)).await?;
        image.extend_from_slice(format!("+{}", options.format).as_bytes());
        Ok(image)
    }

    async fn trim(&self, mut image: Vec<u8>) -> Result<Vec<u8>> {
        self.enter("trim", "trim".into()).await?;
        image.extend_from_slice(b"+trim");
        Ok(image)
    }

    async fn place(&self, from: &Path, to: &Path) -> Result<()> {
        self.enter("place", "place".into()).await?;
        let mut files = self.files.lock();
        let image = files
            .remove(from)
            .unwrap_or_else(|| format!("image:{}", from.display()).into_bytes());
        files.insert(to.to_path_buf(), image);
        Ok(())
    }
}

/// Background remover that tags its input.
#[derive(Debug, Default)]
pub struct FakeBackgroundRemover {
    calls: AtomicUsize,
    fail: std::sync::atomic::AtomicBool,
}

impl FakeBackgroundRemover {
    /// Creates a working remover.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a remover whose calls fail.
    #[must_use]
    pub fn failing() -> Self {
        let remover = Self::default();
        remover.fail.store(true, Ordering::SeqCst);
        remover
    }

    /// Number of calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackgroundRemover for FakeBackgroundRemover {
    async fn remove(&self, mut image: Vec<u8>, _size: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(GenflowError::internal("remove.bg rejected the image"));
        }
        image.extend_from_slice(b"+nobg");
        Ok(image)
    }
}

/// Generation provider returning fake URLs.
#[derive(Debug)]
pub struct FakeGenerationProvider {
    results_per_call: usize,
    failures_left: AtomicUsize,
    always_fail: bool,
    delay: Option<Duration>,
    requests: Mutex<Vec<GenerationRequest>>,
    downloads: AtomicUsize,
}

impl Default for FakeGenerationProvider {
    fn default() -> Self {
        Self {
            results_per_call: 1,
            failures_left: AtomicUsize::new(0),
            always_fail: false,
            delay: None,
            requests: Mutex::new(Vec::new()),
            downloads: AtomicUsize::new(0),
        }
    }
}

impl FakeGenerationProvider {
    /// Creates a provider returning one result per call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider whose calls always fail.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::default()
        }
    }

    /// Sets the number of URLs returned per call.
    #[must_use]
    pub fn with_results_per_call(mut self, n: usize) -> Self {
        self.results_per_call = n;
        self
    }

    /// Fails the first `n` calls.
    #[must_use]
    pub fn with_failures(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Delays every generate call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    /// Number of generate calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl GenerationProvider for FakeGenerationProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted_failure = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if self.always_fail || scripted_failure {
            return Err(ProviderError::new(self.name(), "service unavailable").into());
        }

        Ok((0..self.results_per_call)
            .map(|n| format!("fake://{}/{}/{n}", request.run_id, request.item_index))
            .collect())
    }

    async fn download(&self, _url: &str, dir: &Path) -> Result<PathBuf> {
        let n = self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(dir.join(format!("download_{n:04}.png")))
    }
}

/// Quality gate answering from a script.
#[derive(Debug, Default)]
pub struct FakeQualityGate {
    script: Mutex<VecDeque<Option<QualityVerdict>>>,
    fallback: Option<QualityVerdict>,
    delay: Option<Duration>,
    checked: Mutex<Vec<PathBuf>>,
}

impl FakeQualityGate {
    /// A gate that passes everything.
    #[must_use]
    pub fn passing() -> Self {
        Self {
            fallback: Some(QualityVerdict::pass()),
            ..Self::default()
        }
    }

    /// A gate that rejects everything.
    #[must_use]
    pub fn rejecting(reason: &str) -> Self {
        Self {
            fallback: Some(QualityVerdict::reject(reason)),
            ..Self::default()
        }
    }

    /// A gate whose calls fail.
    #[must_use]
    pub fn failing() -> Self {
        Self::default()
    }

    /// Answers the next calls in order, `None` meaning an error, then falls
    /// back to passing.
    #[must_use]
    pub fn scripted(verdicts: Vec<Option<QualityVerdict>>) -> Self {
        Self {
            script: Mutex::new(verdicts.into()),
            fallback: Some(QualityVerdict::pass()),
            ..Self::default()
        }
    }

    /// Delays every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Paths checked so far.
    #[must_use]
    pub fn checked(&self) -> Vec<PathBuf> {
        self.checked.lock().clone()
    }
}

#[async_trait]
impl QualityGate for FakeQualityGate {
    async fn check(&self, path: &Path) -> Result<QualityVerdict> {
        self.checked.lock().push(path.to_path_buf());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().pop_front();
        match next.unwrap_or_else(|| self.fallback.clone()) {
            Some(verdict) => Ok(verdict),
            None => Err(GenflowError::internal("quality gate unavailable")),
        }
    }
}

/// Metadata client deriving metadata from the prompt.
#[derive(Debug, Default)]
pub struct FakeMetadataClient {
    fail: bool,
    calls: AtomicUsize,
}

impl FakeMetadataClient {
    /// Creates a working client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client whose calls fail.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Number of calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataClient for FakeMetadataClient {
    async fn generate(&self, _path: &Path, context: &MetadataContext) -> Result<ArtifactMetadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(GenflowError::internal("metadata service unavailable"));
        }

        let tags = context
            .prompt
            .split_whitespace()
            .map(String::from)
            .chain(context.keyword.clone())
            .collect();
        Ok(ArtifactMetadata::new(
            context.prompt.clone(),
            format!("Generated from \"{}\"", context.prompt),
            tags,
        ))
    }
}
