//! Integration tests for PreloadWindow
//!
//! The mock factory can run open (instant init) or gated, where each
//! initialisation waits for a permit released by the test.

use async_trait::async_trait;
use media_core::preload::{ControllerFactory, ControllerState, PreloadWindow, VideoItem, WindowSnapshot};
use media_core::{MediaError, PreloadConfig, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

#[derive(Debug)]
struct Player {
    url: String,
}

struct MockFactory {
    gate: Option<Semaphore>,
    failing: HashSet<String>,
    fail_once: Mutex<HashSet<String>>,
    created: AtomicUsize,
    released: Mutex<Vec<String>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl MockFactory {
    fn open() -> Arc<Self> {
        Self::build(None, &[])
    }

    fn gated() -> Arc<Self> {
        Self::build(Some(Semaphore::new(0)), &[])
    }

    fn failing(urls: &[&str]) -> Arc<Self> {
        Self::build(None, urls)
    }

    /// Fails the first initialisation of each url, then succeeds
    fn failing_once(urls: &[&str]) -> Arc<Self> {
        let factory = Self::build(None, &[]);
        factory.fail_once.lock().extend(urls.iter().map(|s| s.to_string()));
        factory
    }

    fn build(gate: Option<Semaphore>, failing: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            gate,
            failing: failing.iter().map(|s| s.to_string()).collect(),
            fail_once: Mutex::new(HashSet::new()),
            created: AtomicUsize::new(0),
            released: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn allow(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn released(&self) -> Vec<String> {
        let mut released = self.released.lock().clone();
        released.sort();
        released
    }
}

#[async_trait]
impl ControllerFactory for MockFactory {
    type Handle = Player;

    async fn create_handle(&self, url: &str) -> Result<Player> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        } else {
            tokio::task::yield_now().await;
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        if self.failing.contains(url) || self.fail_once.lock().remove(url) {
            return Err(MediaError::init_failed(url, "decoder unavailable"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Player { url: url.to_string() })
    }

    async fn release_handle(&self, handle: Arc<Player>) {
        self.released.lock().push(handle.url.clone());
    }
}

fn url(i: usize) -> String {
    format!("https://cdn.example.com/{}.mp4", i)
}

fn feed(len: usize) -> Vec<VideoItem<u32>> {
    (0..len).map(|i| VideoItem::new(format!("v{}", i), url(i), 0)).collect()
}

fn ids(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
    range.map(|i| format!("v{}", i)).collect()
}

fn new_window(factory: &Arc<MockFactory>, ahead: usize, behind: usize, inits: usize) -> PreloadWindow<u32, MockFactory> {
    let config = PreloadConfig {
        preload_ahead: ahead,
        keep_behind: behind,
        max_concurrent_inits: inits,
    };
    PreloadWindow::new(Arc::clone(factory), config).unwrap()
}

async fn settle(window: &PreloadWindow<u32, MockFactory>) {
    tokio::time::timeout(Duration::from_secs(5), window.settled())
        .await
        .expect("window did not settle");
}

async fn wait_until(rx: &mut watch::Receiver<WindowSnapshot>, what: &str, pred: impl FnMut(&WindowSnapshot) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
        .unwrap();
}

/// Ids whose initialisation has been started, in feed order
fn started(snapshot: &WindowSnapshot) -> Vec<String> {
    snapshot
        .states
        .iter()
        .filter(|(_, state)| *state != ControllerState::Pending)
        .map(|(id, _)| id.clone())
        .collect()
}

fn ready_count(snapshot: &WindowSnapshot) -> usize {
    snapshot.states.iter().filter(|(_, state)| state.is_playable()).count()
}

#[tokio::test]
async fn test_scrolling_one_step_moves_window_by_one() {
    let factory = MockFactory::open();
    let window = new_window(&factory, 2, 1, 2);

    window.update_items(feed(20));
    window.recompute_window(5);
    settle(&window).await;
    assert_eq!(window.ready_ids(), ids(4..=7));

    let kept: Vec<_> = ids(5..=7).iter().map(|id| window.handle(id).unwrap()).collect();

    let plan = window.recompute_window(6);
    assert_eq!(plan.to_dispose, vec!["v4".to_string()]);
    assert_eq!(plan.to_create, vec!["v8".to_string()]);
    assert_eq!(window.state("v4"), ControllerState::Inactive);
    settle(&window).await;

    assert_eq!(window.ready_ids(), ids(5..=8));
    for (id, before) in ids(5..=7).iter().zip(&kept) {
        assert!(Arc::ptr_eq(before, &window.handle(id).unwrap()), "{} was re-created", id);
    }
    assert_eq!(factory.released(), vec![url(4)]);
    assert_eq!(factory.created(), 5);
}

#[tokio::test]
async fn test_window_matches_bounds_while_scrolling() {
    let factory = MockFactory::open();
    let window = new_window(&factory, 3, 2, 2);
    window.update_items(feed(12));

    for current in (0..12).chain((0..12).rev()) {
        window.recompute_window(current);
        settle(&window).await;

        let lo = current.saturating_sub(2);
        let hi = (current + 3).min(11);
        assert_eq!(window.live_ids(), ids(lo..=hi), "current={}", current);
        assert_eq!(window.ready_ids(), ids(lo..=hi), "current={}", current);
    }
}

#[tokio::test]
async fn test_inits_are_bounded_and_closest_first() {
    let factory = MockFactory::gated();
    let window = new_window(&factory, 2, 2, 2);
    let mut rx = window.subscribe();

    window.recompute_window(10);
    window.update_items(feed(20));

    // Closest-first: 10, 11, 9, 12, 8
    let order = ["v10", "v11", "v9", "v12", "v8"];
    assert_eq!(window.initializing_count(), 2);
    assert_eq!(window.state("v10"), ControllerState::Initializing);
    assert_eq!(window.state("v11"), ControllerState::Initializing);
    assert_eq!(window.state("v9"), ControllerState::Pending);

    for done in 1..=order.len() {
        factory.allow(1);
        wait_until(&mut rx, "one more ready", |s| ready_count(s) == done).await;

        let mut expected: Vec<String> = order[..(done + 2).min(order.len())].iter().map(|s| s.to_string()).collect();
        expected.sort_by_key(|id| id[1..].parse::<usize>().unwrap());
        assert_eq!(started(&rx.borrow()), expected);
        assert!(window.initializing_count() <= 2);
    }

    settle(&window).await;
    assert_eq!(factory.peak.load(Ordering::SeqCst), 2);
    assert_eq!(window.ready_ids(), ids(8..=12));
}

#[tokio::test]
async fn test_updating_item_data_keeps_controller() {
    let factory = MockFactory::open();
    let window = new_window(&factory, 2, 1, 2);
    window.update_items(feed(5));
    settle(&window).await;

    let before = window.handle("v1").unwrap();
    assert!(window.update_item_data("v1", 42));
    assert!(!window.update_item_data("missing", 1));
    settle(&window).await;

    assert!(Arc::ptr_eq(&before, &window.handle("v1").unwrap()));
    assert_eq!(window.item("v1").unwrap().data, 42);
    assert_eq!(factory.created(), 3);
    assert!(factory.released().is_empty());
}

#[tokio::test]
async fn test_update_items_reconciles_by_id() {
    let factory = MockFactory::open();
    let window = new_window(&factory, 2, 1, 2);
    window.update_items(feed(10));
    settle(&window).await;
    let v0 = window.handle("v0").unwrap();

    // Two new items at the head push v1 and v2 out of the window at index 0
    let mut items = vec![
        VideoItem::new("n0", "https://cdn.example.com/n0.mp4", 7),
        VideoItem::new("n1", "https://cdn.example.com/n1.mp4", 7),
    ];
    items.extend(feed(10));
    let plan = window.update_items(items);

    assert_eq!(plan.to_dispose, vec!["v1".to_string(), "v2".to_string()]);
    assert_eq!(plan.to_create, vec!["n0".to_string(), "n1".to_string()]);
    settle(&window).await;

    assert_eq!(window.ready_ids(), vec!["n0", "n1", "v0"]);
    assert!(Arc::ptr_eq(&v0, &window.handle("v0").unwrap()));
    assert_eq!(factory.released(), vec![url(1), url(2)]);
}

#[tokio::test]
async fn test_current_item_failure_is_surfaced() {
    let failing = url(3);
    let factory = MockFactory::failing(&[failing.as_str()]);
    let window = new_window(&factory, 2, 1, 2);
    window.update_items(feed(10));
    window.recompute_window(3);
    settle(&window).await;

    assert!(matches!(window.state("v3"), ControllerState::Failed(ref msg) if msg.contains("decoder unavailable")));
    assert!(!window.state("v3").is_playable());
    assert_eq!(window.ready_ids(), vec!["v2", "v4", "v5"]);
}

#[tokio::test]
async fn test_failed_current_item_retries_after_scrolling_back() {
    let flaky = url(3);
    let factory = MockFactory::failing_once(&[flaky.as_str()]);
    let window = new_window(&factory, 2, 1, 2);
    window.update_items(feed(10));
    window.recompute_window(3);
    settle(&window).await;
    assert!(matches!(window.state("v3"), ControllerState::Failed(_)));

    // Staying put does not retry
    window.recompute_window(3);
    settle(&window).await;
    assert!(matches!(window.state("v3"), ControllerState::Failed(_)));

    // One step away keeps v3 in the window and gives it another attempt
    let plan = window.recompute_window(4);
    assert!(plan.to_create.contains(&"v3".to_string()));
    settle(&window).await;
    assert_eq!(window.state("v3"), ControllerState::Ready);

    let handle = window.handle("v3").unwrap();
    window.recompute_window(3);
    settle(&window).await;
    assert_eq!(window.state("v3"), ControllerState::Ready);
    assert!(Arc::ptr_eq(&handle, &window.handle("v3").unwrap()));
}

#[tokio::test]
async fn test_non_current_failure_is_skipped() {
    let failing = url(4);
    let factory = MockFactory::failing(&[failing.as_str()]);
    let window = new_window(&factory, 2, 1, 1);
    window.update_items(feed(10));
    window.recompute_window(3);
    settle(&window).await;

    // The failed slot is dropped and the rest of the window still loads
    assert_eq!(window.state("v4"), ControllerState::Inactive);
    assert_eq!(window.ready_ids(), vec!["v2", "v3", "v5"]);
}

#[tokio::test]
async fn test_dispose_except_only_releases() {
    let factory = MockFactory::open();
    let window = new_window(&factory, 2, 1, 2);
    window.update_items(feed(20));
    window.recompute_window(5);
    settle(&window).await;

    let disposed = window.dispose_except(8);
    settle(&window).await;

    assert_eq!(disposed, ids(4..=6));
    assert_eq!(window.live_ids(), vec!["v7"]);
    assert_eq!(window.current_index(), 5);
    assert_eq!(factory.created(), 4);
    assert_eq!(factory.released(), vec![url(4), url(5), url(6)]);
}

#[tokio::test]
async fn test_empty_feed_and_dispose() {
    let factory = MockFactory::open();
    let window = new_window(&factory, 2, 1, 2);

    let plan = window.recompute_window(3);
    assert!(plan.is_noop());
    assert!(window.is_empty());

    // The current index is clamped to the last item
    window.update_items(feed(4));
    settle(&window).await;
    assert_eq!(window.ready_ids(), vec!["v2", "v3"]);

    window.dispose();
    settle(&window).await;
    assert!(window.live_ids().is_empty());
    assert_eq!(factory.released(), vec![url(2), url(3)]);

    // A disposed window creates nothing new
    window.recompute_window(1);
    settle(&window).await;
    assert_eq!(factory.created(), 2);
}

#[tokio::test]
async fn test_controller_leaving_window_during_init_is_dropped() {
    let factory = MockFactory::gated();
    let window = new_window(&factory, 0, 0, 1);
    window.update_items(feed(10));
    assert_eq!(window.state("v0"), ControllerState::Initializing);

    // v0 leaves the window before its init completes
    window.recompute_window(5);
    assert_eq!(window.state("v0"), ControllerState::Inactive);
    factory.allow(1);
    settle(&window).await;

    assert_eq!(window.ready_ids(), vec!["v5"]);
}
