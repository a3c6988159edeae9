use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Model load failed: {message}")]
    Load { message: String },

    #[error("Embedding worker has stopped")]
    WorkerStopped,
}

/// Messages sent to the embedding worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum EmbeddingRequest {
    Init,
    Embed { id: String, locator: PathBuf },
}

/// Messages sent back by the embedding worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum EmbeddingResponse {
    Ready,
    Progress {
        message: String,
    },
    Embedding {
        id: String,
        vector: Vec<f32>,
    },
    Error {
        /// Set when the failure belongs to a specific embed request.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        message: String,
    },
}

/// Produces a fixed-length feature vector for an image.
///
/// Providers are owned by the worker thread. `load` runs at most once before
/// the first successful `embed`; both may be slow.
pub trait EmbeddingProvider: Send + 'static {
    fn load(&mut self, progress: &mut dyn FnMut(&str)) -> Result<(), EmbeddingError>;

    fn embed(&mut self, locator: &Path) -> Result<Vec<f32>, EmbeddingError>;
}

/// Handle to a dedicated embedding thread.
///
/// Dropping the handle (or calling [`terminate`](Self::terminate)) closes the
/// request channel and joins the thread once the request in progress is done.
pub struct EmbeddingWorker {
    requests: Option<mpsc::UnboundedSender<EmbeddingRequest>>,
    responses: mpsc::UnboundedReceiver<EmbeddingResponse>,
    handle: Option<JoinHandle<()>>,
}

impl EmbeddingWorker {
    pub fn spawn<P: EmbeddingProvider>(provider: P) -> Result<Self, EmbeddingError> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let handle = thread::Builder::new()
            .name("embedding-worker".to_string())
            .spawn(move || run_worker(provider, request_rx, response_tx))?;

        Ok(Self {
            requests: Some(request_tx),
            responses: response_rx,
            handle: Some(handle),
        })
    }

    pub fn send(&self, request: EmbeddingRequest) -> Result<(), EmbeddingError> {
        self.requests
            .as_ref()
            .ok_or(EmbeddingError::WorkerStopped)?
            .send(request)
            .map_err(|_| EmbeddingError::WorkerStopped)
    }

    /// Ask the worker to load its model. Answered with zero or more
    /// `Progress` notices and then `Ready` or `Error`.
    pub fn init(&self) -> Result<(), EmbeddingError> {
        self.send(EmbeddingRequest::Init)
    }

    pub fn embed(
        &self,
        id: impl Into<String>,
        locator: impl Into<PathBuf>,
    ) -> Result<(), EmbeddingError> {
        self.send(EmbeddingRequest::Embed {
            id: id.into(),
            locator: locator.into(),
        })
    }

    pub async fn recv(&mut self) -> Option<EmbeddingResponse> {
        self.responses.recv().await
    }

    /// Blocking variant of [`recv`](Self::recv). Must not be called from
    /// inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<EmbeddingResponse> {
        self.responses.blocking_recv()
    }

    /// Receive until every id in `batch` has been answered with an embedding
    /// or an error. Every response, notices included, goes to `on_response`.
    pub async fn complete_batch<F>(
        &mut self,
        batch: &mut EmbeddingBatch,
        mut on_response: F,
    ) -> Result<(), EmbeddingError>
    where
        F: FnMut(EmbeddingResponse),
    {
        while !batch.is_empty() {
            let response = self.recv().await.ok_or(EmbeddingError::WorkerStopped)?;
            let answered = match &response {
                EmbeddingResponse::Embedding { id, .. } => Some(id.clone()),
                EmbeddingResponse::Error { id: Some(id), .. } => Some(id.clone()),
                _ => None,
            };
            on_response(response);
            if let Some(id) = answered {
                batch.resolve(&id);
            }
        }
        Ok(())
    }

    pub fn terminate(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Embedding worker panicked");
            }
        }
    }
}

impl Drop for EmbeddingWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<P: EmbeddingProvider>(
    mut provider: P,
    mut requests: mpsc::UnboundedReceiver<EmbeddingRequest>,
    responses: mpsc::UnboundedSender<EmbeddingResponse>,
) {
    let mut loaded = false;

    while let Some(request) = requests.blocking_recv() {
        let response = match request {
            EmbeddingRequest::Init => match ensure_loaded(&mut provider, &mut loaded, &responses) {
                Ok(()) => EmbeddingResponse::Ready,
                Err(e) => EmbeddingResponse::Error {
                    id: None,
                    message: e.to_string(),
                },
            },
            EmbeddingRequest::Embed { id, locator } => {
                let result = ensure_loaded(&mut provider, &mut loaded, &responses)
                    .and_then(|()| provider.embed(&locator));
                match result {
                    Ok(vector) => EmbeddingResponse::Embedding { id, vector },
                    Err(e) => {
                        log::warn!("Embedding failed for {}: {}", locator.display(), e);
                        EmbeddingResponse::Error {
                            id: Some(id),
                            message: e.to_string(),
                        }
                    }
                }
            }
        };

        if responses.send(response).is_err() {
            break;
        }
    }

    log::debug!("Embedding worker exiting");
}

fn ensure_loaded<P: EmbeddingProvider>(
    provider: &mut P,
    loaded: &mut bool,
    responses: &mpsc::UnboundedSender<EmbeddingResponse>,
) -> Result<(), EmbeddingError> {
    if *loaded {
        return Ok(());
    }
    let mut report = |message: &str| {
        let _ = responses.send(EmbeddingResponse::Progress {
            message: message.to_string(),
        });
    };
    provider.load(&mut report)?;
    *loaded = true;
    Ok(())
}

/// Ids whose embeddings are still outstanding.
///
/// Clustering runs once per batch, after the last pending id resolves.
#[derive(Debug, Default)]
pub struct EmbeddingBatch {
    pending: HashSet<String>,
}

impl EmbeddingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the id was already pending.
    pub fn track(&mut self, id: impl Into<String>) -> bool {
        self.pending.insert(id.into())
    }

    /// Mark `id` answered. Returns `true` only for the call that empties the
    /// pending set.
    pub fn resolve(&mut self, id: &str) -> bool {
        self.pending.remove(id) && self.pending.is_empty()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Vector derived from the file name length; loads count calls.
    struct StubProvider {
        loads: Arc<AtomicUsize>,
    }

    impl EmbeddingProvider for StubProvider {
        fn load(&mut self, progress: &mut dyn FnMut(&str)) -> Result<(), EmbeddingError> {
            progress("loading weights");
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn embed(&mut self, locator: &Path) -> Result<Vec<f32>, EmbeddingError> {
            if locator.to_string_lossy().contains("broken") {
                return Err(EmbeddingError::Load {
                    message: "cannot read".to_string(),
                });
            }
            let len = locator.to_string_lossy().len() as f32;
            Ok(vec![len, 1.0])
        }
    }

    struct FailingProvider;

    impl EmbeddingProvider for FailingProvider {
        fn load(&mut self, _progress: &mut dyn FnMut(&str)) -> Result<(), EmbeddingError> {
            Err(EmbeddingError::Load {
                message: "weights missing".to_string(),
            })
        }

        fn embed(&mut self, _locator: &Path) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0])
        }
    }

    fn stub() -> (StubProvider, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        (
            StubProvider {
                loads: loads.clone(),
            },
            loads,
        )
    }

    #[tokio::test]
    async fn test_init_handshake() {
        let (provider, loads) = stub();
        let mut worker = EmbeddingWorker::spawn(provider).unwrap();
        worker.init().unwrap();

        assert_eq!(
            worker.recv().await,
            Some(EmbeddingResponse::Progress {
                message: "loading weights".to_string()
            })
        );
        assert_eq!(worker.recv().await, Some(EmbeddingResponse::Ready));

        // A second init does not reload.
        worker.init().unwrap();
        assert_eq!(worker.recv().await, Some(EmbeddingResponse::Ready));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        worker.terminate();
    }

    #[tokio::test]
    async fn test_complete_batch_retires_embeddings_and_errors() {
        let (provider, loads) = stub();
        let mut worker = EmbeddingWorker::spawn(provider).unwrap();

        let mut batch = EmbeddingBatch::new();
        for (id, path) in [("img_a", "/a.jpg"), ("img_b", "/broken.jpg"), ("img_c", "/cc.jpg")] {
            batch.track(id);
            worker.embed(id, path).unwrap();
        }

        let mut vectors = Vec::new();
        let mut failures = Vec::new();
        worker
            .complete_batch(&mut batch, |response| match response {
                EmbeddingResponse::Embedding { id, vector } => vectors.push((id, vector)),
                EmbeddingResponse::Error { id, .. } => failures.push(id),
                _ => {}
            })
            .await
            .unwrap();

        assert!(batch.is_empty());
        assert_eq!(
            vectors,
            vec![
                ("img_a".to_string(), vec![6.0, 1.0]),
                ("img_c".to_string(), vec![7.0, 1.0])
            ]
        );
        assert_eq!(failures, vec![Some("img_b".to_string())]);
        // Embedding without init loads lazily, once.
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_failure_reports_errors() {
        let mut worker = EmbeddingWorker::spawn(FailingProvider).unwrap();
        worker.init().unwrap();
        match worker.recv().await {
            Some(EmbeddingResponse::Error { id, message }) => {
                assert_eq!(id, None);
                assert!(message.contains("weights missing"));
            }
            other => panic!("unexpected response: {other:?}"),
        }

        worker.embed("img_x", "/x.jpg").unwrap();
        match worker.recv().await {
            Some(EmbeddingResponse::Error { id, .. }) => assert_eq!(id.as_deref(), Some("img_x")),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_blocking_recv_outside_runtime() {
        let (provider, _) = stub();
        let mut worker = EmbeddingWorker::spawn(provider).unwrap();
        worker.embed("img_1", "/abc.png").unwrap();

        let mut last = None;
        while let Some(response) = worker.blocking_recv() {
            if matches!(response, EmbeddingResponse::Embedding { .. }) {
                last = Some(response);
                break;
            }
        }
        assert_eq!(
            last,
            Some(EmbeddingResponse::Embedding {
                id: "img_1".to_string(),
                vector: vec![8.0, 1.0]
            })
        );
    }

    #[test]
    fn test_send_after_terminate_fails() {
        let (provider, _) = stub();
        let mut worker = EmbeddingWorker::spawn(provider).unwrap();
        worker.shutdown();
        assert!(matches!(worker.init(), Err(EmbeddingError::WorkerStopped)));
        assert_eq!(worker.blocking_recv(), None);
    }

    #[test]
    fn test_wire_format() {
        let request = EmbeddingRequest::Embed {
            id: "img_1".to_string(),
            locator: PathBuf::from("/photos/a.jpg"),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"op":"embed","id":"img_1","locator":"/photos/a.jpg"}"#
        );
        assert_eq!(serde_json::to_string(&EmbeddingRequest::Init).unwrap(), r#"{"op":"init"}"#);

        let error = EmbeddingResponse::Error {
            id: None,
            message: "boom".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&error).unwrap(),
            r#"{"op":"error","message":"boom"}"#
        );

        let parsed: EmbeddingResponse =
            serde_json::from_str(r#"{"op":"embedding","id":"img_2","vector":[0.5,-1.0]}"#).unwrap();
        assert_eq!(
            parsed,
            EmbeddingResponse::Embedding {
                id: "img_2".to_string(),
                vector: vec![0.5, -1.0]
            }
        );
    }

    #[test]
    fn test_batch_fires_once_when_drained() {
        let mut batch = EmbeddingBatch::new();
        assert!(batch.track("a"));
        assert!(batch.track("b"));
        assert!(!batch.track("a"));
        assert_eq!(batch.len(), 2);

        assert!(!batch.resolve("a"));
        assert!(!batch.resolve("unknown"));
        assert!(batch.is_pending("b"));
        assert!(batch.resolve("b"));
        // Already empty: no second trigger.
        assert!(!batch.resolve("b"));
        assert!(batch.is_empty());
    }
}
