// Detection bootstrap - is there a compatible render runtime on this page?
//
// Runs before anything attaches. The probe chain mirrors how an injected
// build has to feel around an uncooperative page: the devtools global hook
// first, then well-known runtime globals, then likely mount containers
// carrying internal tree linkage, then a full document walk. If nothing
// bites immediately, detection polls on an interval until the attempt budget
// runs out. Whatever the outcome, every registered callback hears about it
// exactly once; failure is a result, not an error - the page may simply not
// be a React app.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::config::DetectionConfig;
use crate::error::{Error, Result};
use crate::host::{DomHandle, HostPage};

/// Outcome of a detection run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionResult {
    pub is_react: bool,
    pub version: Option<String>,
    /// Whether the devtools-style global hook was the source of the match.
    pub devtools: bool,
}

impl DetectionResult {
    fn not_found() -> Self {
        Self {
            is_react: false,
            version: None,
            devtools: false,
        }
    }
}

type ReadyCallback = Box<dyn FnOnce(DetectionResult) + Send>;

enum DetectState {
    Pending(Vec<ReadyCallback>),
    Done(DetectionResult),
}

/// One-shot detection with callback fan-out.
pub struct DetectionBootstrap {
    page: Arc<dyn HostPage>,
    config: DetectionConfig,
    state: Arc<Mutex<DetectState>>,
}

impl DetectionBootstrap {
    pub fn new(page: Arc<dyn HostPage>, config: DetectionConfig) -> Self {
        Self {
            page,
            config,
            state: Arc::new(Mutex::new(DetectState::Pending(Vec::new()))),
        }
    }

    /// Register a callback for the detection result. Invoked immediately if
    /// detection already completed; otherwise exactly once on completion.
    pub fn on_ready(&self, callback: ReadyCallback) {
        let mut state = crate::lock(&self.state);
        match &mut *state {
            DetectState::Done(result) => {
                let result = result.clone();
                drop(state);
                callback(result);
            }
            DetectState::Pending(callbacks) => callbacks.push(callback),
        }
    }

    /// Kick off detection: one immediate attempt, then polling on the
    /// configured interval until the attempt budget is exhausted.
    pub fn start(&self) {
        if let Some(result) = try_detect(self.page.as_ref()) {
            resolve(&self.state, result);
            return;
        }
        let page = self.page.clone();
        let state = self.state.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            let interval = Duration::from_millis(config.poll_interval_ms);
            for _ in 1..config.max_attempts {
                tokio::time::sleep(interval).await;
                if matches!(&*crate::lock(&state), DetectState::Done(_)) {
                    return;
                }
                if let Some(result) = try_detect(page.as_ref()) {
                    resolve(&state, result);
                    return;
                }
            }
            tracing::debug!(
                attempts = config.max_attempts,
                "no render runtime found within the detection budget"
            );
            resolve(&state, DetectionResult::not_found());
        });
    }

    /// Wait for the detection result with a caller-owned deadline. The
    /// deadline is independent of the internal polling budget: a detection
    /// failure still resolves (with `is_react: false`); only an elapsed
    /// deadline produces an error.
    pub async fn wait_for(&self, timeout: Duration) -> Result<DetectionResult> {
        let (tx, rx) = oneshot::channel();
        self.on_ready(Box::new(move |result| {
            let _ = tx.send(result);
        }));
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(Error::Detection("detection task dropped".into())),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    /// Result so far, without waiting.
    pub fn result(&self) -> Option<DetectionResult> {
        match &*crate::lock(&self.state) {
            DetectState::Done(result) => Some(result.clone()),
            DetectState::Pending(_) => None,
        }
    }

}

/// Fan the result out exactly once and clear the callback list.
fn resolve(state: &Mutex<DetectState>, result: DetectionResult) {
    let callbacks = {
        let mut state = crate::lock(state);
        match std::mem::replace(&mut *state, DetectState::Done(result.clone())) {
            DetectState::Pending(callbacks) => callbacks,
            DetectState::Done(previous) => {
                // Already resolved; keep the first result.
                *state = DetectState::Done(previous);
                return;
            }
        }
    };
    tracing::info!(
        is_react = result.is_react,
        version = result.version.as_deref().unwrap_or("-"),
        "detection resolved"
    );
    for callback in callbacks {
        callback(result.clone());
    }
}

/// The probe chain. Returns `Some` on any conclusive sighting.
fn try_detect(page: &dyn HostPage) -> Option<DetectionResult> {
    // (a) Devtools-style global hook with at least one registered renderer.
    if let Some(runtime) = page.runtime() {
        if let Some(probe) = runtime.devtools_hook() {
            if probe.renderer_count > 0 {
                return Some(DetectionResult {
                    is_react: true,
                    version: probe.version,
                    devtools: true,
                });
            }
        }
        // (b) Well-known global runtime objects.
        if let Some(marker) = runtime.global_marker() {
            return Some(DetectionResult {
                is_react: true,
                version: Some(marker),
                devtools: false,
            });
        }
    }

    let document = page.document();

    // (c) Likely mount containers carrying internal tree linkage.
    for container in document.likely_root_containers() {
        if has_linkage(&container) {
            return Some(DetectionResult {
                is_react: true,
                version: None,
                devtools: false,
            });
        }
    }

    // (d) Full document walk looking for linkage-carrying elements.
    let mut stack = vec![document.root()];
    while let Some(element) = stack.pop() {
        if element.fiber().is_some() {
            return Some(DetectionResult {
                is_react: true,
                version: None,
                devtools: false,
            });
        }
        stack.extend(element.children());
    }

    None
}

fn has_linkage(element: &DomHandle) -> bool {
    if element.fiber().is_some() {
        return true;
    }
    element.children().iter().any(|child| child.fiber().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sim::{FiberSpec, SimOptions, SimPage};
    use crate::host::Rect;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> DetectionConfig {
        DetectionConfig {
            poll_interval_ms: 5,
            max_attempts: 5,
        }
    }

    #[tokio::test]
    async fn test_immediate_detection_via_devtools_hook() {
        let page = SimPage::new();
        let bootstrap = Arc::new(DetectionBootstrap::new(page, config()));
        bootstrap.start();
        let result = bootstrap.wait_for(Duration::from_secs(1)).await.unwrap();
        assert!(result.is_react);
        assert!(result.devtools);
        assert_eq!(result.version.as_deref(), Some("18.2.0"));
    }

    #[tokio::test]
    async fn test_detection_via_container_linkage_when_globals_hidden() {
        let page = SimPage::with_options(SimOptions {
            expose_devtools: false,
            expose_global_marker: false,
            ..SimOptions::default()
        });
        page.mount(
            FiberSpec::component("App").child(FiberSpec::host(
                "div",
                Rect::new(0.0, 0.0, 100.0, 100.0),
            )),
        )
        .unwrap();
        let bootstrap = Arc::new(DetectionBootstrap::new(page, config()));
        bootstrap.start();
        let result = bootstrap.wait_for(Duration::from_secs(1)).await.unwrap();
        assert!(result.is_react);
        assert!(!result.devtools);
        assert_eq!(result.version, None);
    }

    #[tokio::test]
    async fn test_exhaustion_resolves_not_react() {
        let page = SimPage::with_options(SimOptions {
            runtime: false,
            ..SimOptions::default()
        });
        let bootstrap = Arc::new(DetectionBootstrap::new(page, config()));
        bootstrap.start();
        let result = bootstrap.wait_for(Duration::from_secs(2)).await.unwrap();
        assert!(!result.is_react);
    }

    #[tokio::test]
    async fn test_caller_timeout_is_independent_of_polling() {
        let page = SimPage::with_options(SimOptions {
            runtime: false,
            ..SimOptions::default()
        });
        // Long internal budget, short caller deadline.
        let bootstrap = Arc::new(DetectionBootstrap::new(
            page,
            DetectionConfig {
                poll_interval_ms: 50,
                max_attempts: 100,
            },
        ));
        bootstrap.start();
        let outcome = bootstrap.wait_for(Duration::from_millis(20)).await;
        assert!(matches!(outcome, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_callbacks_fire_exactly_once_and_late_registration_is_immediate() {
        let page = SimPage::new();
        let bootstrap = Arc::new(DetectionBootstrap::new(page, config()));

        let calls = Arc::new(AtomicUsize::new(0));
        let c1 = calls.clone();
        bootstrap.on_ready(Box::new(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        }));

        bootstrap.start();
        bootstrap.wait_for(Duration::from_secs(1)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Late registration: invoked synchronously with the stored result.
        let c2 = calls.clone();
        bootstrap.on_ready(Box::new(move |result| {
            assert!(result.is_react);
            c2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
